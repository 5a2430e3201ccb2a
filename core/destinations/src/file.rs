//! File byte source used by uploads.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

use capshare_common::{Result, ResultExt};

/// Reads a local file as an uploadable blob.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Bytes>;
}

/// Reads files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSource;

#[async_trait]
impl FileSource for LocalFileSource {
    async fn read(&self, path: &Path) -> Result<Bytes> {
        let data = tokio::fs::read(path)
            .await
            .user_context(format!("Failed to read {}", path.display()))?;
        Ok(Bytes::from(data))
    }
}

/// MIME type from the file extension; captures default to PNG.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("mp4") => "video/mp4",
        _ => "image/png",
    }
}
