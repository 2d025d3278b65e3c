use std::path::Path;

use serde::Serialize;

use super::models::{UploadRecord, UploadResult};
use super::Shared;
use crate::api::{ApiClient, ApiError, UploadProgress};
use crate::config::UploadLimits;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Idle,
    Uploading {
        progress: u8,
    },
    Success,
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadState {
    pub status: UploadStatus,
    pub file_name: Option<String>,
    pub result: Option<UploadResult>,
    pub error: Option<String>,
    /// Files uploaded during this session.
    pub uploaded_files: Vec<UploadRecord>,
}

impl UploadState {
    pub fn progress(&self) -> u8 {
        match self.status {
            UploadStatus::Uploading { progress } => progress,
            UploadStatus::Success => 100,
            UploadStatus::Idle | UploadStatus::Error => 0,
        }
    }
}

#[derive(Clone)]
pub struct UploadStore {
    state: Shared<UploadState>,
    client: ApiClient,
    limits: UploadLimits,
}

impl UploadStore {
    pub fn new(client: ApiClient, limits: UploadLimits) -> Self {
        Self {
            state: Shared::default(),
            client,
            limits,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state.snapshot()
    }

    pub async fn upload_file(
        &self,
        path: &Path,
        metadata: Option<serde_json::Value>,
    ) -> Result<UploadResult, ApiError> {
        if self.is_uploading() {
            return Err(ApiError::Busy);
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        if let Err(err) = self.limits.check_extension(&file_name) {
            self.fail(&file_name, &err);
            return Err(err);
        }
        // Size is checked from metadata so an oversized file is never read.
        let checked = match tokio::fs::metadata(path).await {
            Ok(meta) => self.limits.validate(&file_name, meta.len()),
            Err(err) => Err(ApiError::Io(err)),
        };
        if let Err(err) = checked {
            self.fail(&file_name, &err);
            return Err(err);
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = ApiError::Io(err);
                self.fail(&file_name, &err);
                return Err(err);
            }
        };
        self.upload_bytes(&file_name, bytes, metadata).await
    }

    /// Uploads `bytes` as `file_name`. Only one upload runs at a time; a call
    /// made while another is in flight fails with [`ApiError::Busy`] and leaves
    /// the state alone.
    pub async fn upload_bytes(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Result<UploadResult, ApiError> {
        if self.is_uploading() {
            return Err(ApiError::Busy);
        }
        if let Err(err) = self.limits.validate(file_name, bytes.len() as u64) {
            self.fail(file_name, &err);
            return Err(err);
        }

        {
            let mut state = self.state.lock();
            if matches!(state.status, UploadStatus::Uploading { .. }) {
                return Err(ApiError::Busy);
            }
            state.status = UploadStatus::Uploading { progress: 0 };
            state.file_name = Some(file_name.to_string());
            state.result = None;
            state.error = None;
        }

        let progress_state = self.state.clone();
        let result = self
            .client
            .upload_document(file_name, bytes, metadata.as_ref(), move |progress| {
                record_progress(&progress_state, progress)
            })
            .await
            .and_then(|result| {
                if result.is_success() {
                    Ok(result)
                } else {
                    Err(ApiError::Http {
                        status: 200,
                        message: result.message,
                    })
                }
            });

        match result {
            Ok(result) => {
                tracing::info!(file = %result.file_path, status = %result.status, "upload finished");
                let mut state = self.state.lock();
                state.status = UploadStatus::Success;
                state.uploaded_files.push(UploadRecord::from(&result));
                state.result = Some(result.clone());
                Ok(result)
            }
            Err(err) => {
                self.fail(file_name, &err);
                Err(err)
            }
        }
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self.state.lock().status, UploadStatus::Uploading { .. })
    }

    /// Back to idle; the session's upload records are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let uploaded_files = std::mem::take(&mut state.uploaded_files);
        *state = UploadState {
            uploaded_files,
            ..UploadState::default()
        };
    }

    pub fn clear(&self) {
        *self.state.lock() = UploadState::default();
    }

    fn fail(&self, file_name: &str, err: &ApiError) {
        tracing::warn!(file_name, "upload failed: {}", err);
        let mut state = self.state.lock();
        state.status = UploadStatus::Error;
        state.file_name = Some(file_name.to_string());
        state.error = Some(err.to_string());
    }
}

// Progress only moves forward, and only while an upload is running.
fn record_progress(state: &Shared<UploadState>, progress: UploadProgress) {
    let mut state = state.lock();
    if let UploadStatus::Uploading { progress: current } = &mut state.status {
        *current = (*current).max(progress.percent());
    }
}
