//! Blocking image download helper for adapters that fetch covers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::CoverSize;
use crate::error::StorageError;
use crate::provider::ProviderId;
use crate::record::CoverSlot;
use crate::task::CancelToken;

/// Anything smaller is a placeholder ("no image") rather than a cover.
pub const MIN_IMAGE_BYTES: u64 = 2048;

/// `<provider>_<isbn>_<slot>_<size>.jpg`, unique per attempt so parallel
/// providers never write the same file.
pub fn cover_file_name(provider: ProviderId, isbn: &str, slot: CoverSlot, size: CoverSize) -> String {
    let isbn: String = isbn.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    format!("{}_{}_{}_{}.jpg", provider, isbn, slot.index(), size.suffix())
}

#[derive(Debug, Clone)]
pub struct ImageDownloader {
    client: reqwest::blocking::Client,
    dir: PathBuf,
    min_bytes: u64,
}

impl ImageDownloader {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout.saturating_mul(4))
            .build()
            .map_err(|e| StorageError::Download {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            dir: dir.into(),
            min_bytes: MIN_IMAGE_BYTES,
        })
    }

    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Download `url` into `file_name` inside the covers directory.
    ///
    /// `Ok(None)` when cancelled, when the server has no image (non-success
    /// status), or when the body is too small to be a real cover.
    pub fn fetch(&self, cancel: &CancelToken, url: &str, file_name: &str) -> Result<Option<PathBuf>, StorageError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let download_err = |message: String| StorageError::Download {
            url: url.to_string(),
            message,
        };

        tracing::debug!("Downloading {}", url);
        let response = self.client.get(url).send().map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            tracing::debug!("{} answered {}", url, response.status());
            return Ok(None);
        }
        let bytes = response.bytes().map_err(|e| download_err(e.to_string()))?;
        if cancel.is_cancelled() {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, &bytes)?;

        if (bytes.len() as u64) < self.min_bytes {
            tracing::debug!("{} too small ({} bytes), discarding", url, bytes.len());
            if let Err(e) = std::fs::remove_file(&path) {
                return Err(StorageError::Delete { path, source: e });
            }
            return Ok(None);
        }
        Ok(Some(path))
    }
}
