use std::sync::Arc;

use crate::models::crop::ImageCropRequest;
use crate::services::fetch::{FetchError, RemoteFetcher};
use crate::services::imageproc::{self, CropRect, ImageProcError, Limits};
use crate::services::storage::{StorageError, Uploader};

/// Runs the crop pipeline for one claimed job:
/// fetch -> decode -> validate -> crop -> encode -> upload.
///
/// Any stage failure is a permanent job failure; the error text is what
/// lands in the job's `error` column.
pub struct JobProcessor {
    fetcher: RemoteFetcher,
    uploader: Arc<dyn Uploader>,
    limits: Limits,
    jpeg_quality: u8,
}

impl JobProcessor {
    pub fn new(
        fetcher: RemoteFetcher,
        uploader: Arc<dyn Uploader>,
        limits: Limits,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            fetcher,
            uploader,
            limits,
            jpeg_quality,
        }
    }

    pub async fn process(
        &self,
        job_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ProcessError> {
        let request: ImageCropRequest =
            serde_json::from_value(payload.clone()).map_err(ProcessError::Payload)?;
        if request.image_url.is_empty() {
            return Err(ProcessError::MissingImageUrl);
        }

        tracing::debug!(job_id = %job_id, url = %request.image_url, "downloading source image");
        let (data, _content_type) = self
            .fetcher
            .download(&request.image_url, self.limits.max_bytes)
            .await?;

        let img = imageproc::decode_image(&data)?;
        imageproc::validate_image(&img, self.limits.max_pixels)?;

        let cropped = imageproc::crop_image(
            &img,
            CropRect {
                x: request.x,
                y: request.y,
                width: request.width,
                height: request.height,
            },
        )?;

        let jpeg = imageproc::encode_jpeg(&cropped, self.jpeg_quality)?;

        let object_name = format!("crops/{job_id}.jpg");
        let public_url = self.uploader.upload(&object_name, &jpeg, "image/jpeg").await?;

        tracing::debug!(job_id = %job_id, url = %public_url, bytes = jpeg.len(), "crop uploaded");
        Ok(serde_json::json!({ "croppedImageUrl": public_url }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("invalid job payload: {0}")]
    Payload(serde_json::Error),

    #[error("imageUrl is required")]
    MissingImageUrl,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Image(#[from] ImageProcError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
