use reqwest::multipart::{Form, Part};
use reqwest::Body;

use super::{ensure_success, read_json, ApiClient, ApiError};
use crate::store::models::UploadResult;

/// Size of the slices the request body is fed to the transport in; progress
/// is reported once per slice.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.sent.saturating_mul(100) / self.total).min(100) as u8
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        "application/pdf"
    } else if lower.ends_with(".txt") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

impl ApiClient {
    /// Uploads one document as the multipart `file` field. `on_progress` fires
    /// as the transport pulls each slice of the body.
    pub async fn upload_document<F>(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        metadata: Option<&serde_json::Value>,
        on_progress: F,
    ) -> Result<UploadResult, ApiError>
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        let total = bytes.len() as u64;

        // Slices are cut only when the transport asks for them, so at most one
        // extra slice is alive next to the file contents.
        let body = futures::stream::unfold((bytes, 0usize), move |(bytes, offset)| {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(bytes.len());
            let next = (offset < end).then(|| {
                let slice = bytes[offset..end].to_vec();
                on_progress(UploadProgress {
                    sent: end as u64,
                    total,
                });
                (Ok::<_, std::io::Error>(slice), (bytes, end))
            });
            futures::future::ready(next)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file_name.to_string())
            .mime_str(mime_for(file_name))?;
        let form = Form::new().part("file", part);

        let mut req = self.http.post(self.url("/upload")).multipart(form);
        if let Some(metadata) = metadata {
            req = req.query(&[("metadata", metadata.to_string())]);
        }

        tracing::debug!(file_name, bytes = total, "uploading document");
        let resp = ensure_success(req.send().await?, None).await?;
        read_json(resp).await
    }
}
