use std::time::Duration;

/// Guarded HTTP downloader for remote images.
///
/// Rejects non-http(s) schemes (including on redirect), caps the redirect
/// chain, and caps the body size via both `Content-Length` and a hard limit
/// enforced while streaming.
pub struct RemoteFetcher {
    http: reqwest::Client,
}

/// Marker raised by the redirect policy when a redirect target leaves
/// http(s); lets [`map_reqwest_error`] tell this apart from the count cap.
#[derive(Debug)]
struct DisallowedRedirectScheme;

impl std::fmt::Display for DisallowedRedirectScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("redirect to disallowed scheme")
    }
}

impl std::error::Error for DisallowedRedirectScheme {}

impl RemoteFetcher {
    pub fn new(max_redirects: usize, timeout: Duration) -> Result<Self, FetchError> {
        let max_redirects = if max_redirects == 0 { 3 } else { max_redirects };
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                attempt.error("too many redirects")
            } else if !matches!(attempt.url().scheme(), "http" | "https") {
                attempt.error(DisallowedRedirectScheme)
            } else {
                attempt.follow()
            }
        });

        let http = reqwest::Client::builder()
            .redirect(policy)
            .timeout(timeout)
            .user_agent("image-crop-api/1.0")
            .build()?;

        Ok(Self { http })
    }

    /// Download `url`, returning the body and the reported content type.
    pub async fn download(
        &self,
        url: &str,
        max_bytes: u64,
    ) -> Result<(Vec<u8>, Option<String>), FetchError> {
        if !is_allowed_scheme(url) {
            return Err(FetchError::InvalidUrl);
        }

        let mut response = self.http.get(url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        if max_bytes > 0 {
            if let Some(length) = response.content_length() {
                if length > max_bytes {
                    return Err(FetchError::TooLarge);
                }
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Content-Length can lie or be absent; enforce the cap on the stream.
        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            if max_bytes > 0 && (data.len() + chunk.len()) as u64 > max_bytes {
                return Err(FetchError::TooLarge);
            }
            data.extend_from_slice(&chunk);
        }

        Ok((data, content_type))
    }
}

fn is_allowed_scheme(raw_url: &str) -> bool {
    match reqwest::Url::parse(raw_url) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_redirect() {
        if redirect_hit_disallowed_scheme(&err) {
            FetchError::InvalidUrl
        } else {
            FetchError::TooManyRedirects
        }
    } else {
        FetchError::Http(err)
    }
}

fn redirect_hit_disallowed_scheme(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.downcast_ref::<DisallowedRedirectScheme>().is_some() {
            return true;
        }
        source = cause.source();
    }
    false
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("url must use http or https")]
    InvalidUrl,

    #[error("content exceeds maximum size")]
    TooLarge,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("download failed: status {0}")]
    BadStatus(u16),

    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
}
