use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::store::models::{UploadRecord, UploadResult};
use crate::store::{Stores, UploadStatus};

const PROGRESS_POLL: Duration = Duration::from_millis(200);

pub async fn upload_document(stores: &Stores, path: &Path) -> Result<String, String> {
    let upload = stores.upload.clone();
    let watcher = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_POLL);
        let mut last = None;
        loop {
            ticker.tick().await;
            if let UploadStatus::Uploading { progress } = upload.state().status {
                if last != Some(progress) {
                    last = Some(progress);
                    eprint!("\ruploading... {:>3}%", progress);
                    let _ = std::io::stderr().flush();
                }
            }
        }
    });

    let result = stores.upload.upload_file(path, None).await;
    watcher.abort();
    eprintln!();

    let result = result.map_err(|e| e.to_string())?;
    Ok(render_upload_result(&result))
}

pub fn list_uploads(stores: &Stores) -> String {
    render_uploads(&stores.upload.state().uploaded_files)
}

fn render_upload_result(result: &UploadResult) -> String {
    let mut lines = vec![result.message.clone()];
    if let Some(size) = &result.file_size {
        lines.push(format!("  file: {} ({})", result.file_path, size));
    } else {
        lines.push(format!("  file: {}", result.file_path));
    }
    if let Some(url) = &result.public_url {
        lines.push(format!("  url:  {}", url));
    }
    if let Some(next) = &result.next_step {
        lines.push(next.clone());
    }
    lines.join("\n")
}

fn render_uploads(records: &[UploadRecord]) -> String {
    if records.is_empty() {
        return "No files uploaded this session.".to_string();
    }
    records
        .iter()
        .map(|r| {
            format!(
                "{}  {}  [{}]",
                r.uploaded_at.format("%H:%M:%S"),
                r.file_path,
                r.status
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
