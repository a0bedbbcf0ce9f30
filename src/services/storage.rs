use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::{Component, Path, PathBuf};

/// Object storage for cropped images; returns a public URL for the object.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        object_name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// S3-compatible object storage (AWS S3, Cloudflare R2, MinIO).
pub struct S3Uploader {
    bucket: Box<Bucket>,
    public_base_url: String,
}

impl S3Uploader {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    async fn upload(
        &self,
        object_name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let name = sanitize_object_name(object_name)?;
        self.bucket
            .put_object_with_content_type(&name, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(format!("{}/{}", self.public_base_url, name))
    }
}

/// Filesystem-backed storage for local runs; files are served by the worker
/// under its `/files/` route.
pub struct LocalUploader {
    dir: PathBuf,
    base_url: String,
}

impl LocalUploader {
    pub fn new(dir: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Uploader for LocalUploader {
    async fn upload(
        &self,
        object_name: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let name = sanitize_object_name(object_name)?;
        let full_path = self.dir.join(&name);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, data).await?;
        Ok(format!("{}/{}", self.base_url, name))
    }
}

/// Reject empty, absolute, and traversal-bearing object names.
fn sanitize_object_name(object_name: &str) -> Result<String, StorageError> {
    if object_name.is_empty() {
        return Err(StorageError::InvalidObjectName);
    }
    let path = Path::new(object_name);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) if !part.is_empty() => parts.push(part),
                _ => return Err(StorageError::InvalidObjectName),
            },
            Component::CurDir => {}
            _ => return Err(StorageError::InvalidObjectName),
        }
    }
    if parts.is_empty() {
        return Err(StorageError::InvalidObjectName);
    }
    Ok(parts.join("/"))
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("s3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("invalid object name")]
    InvalidObjectName,
}
