//! Pick one cover image per slot out of the downloaded candidates.

use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::record::{CoverSlot, FieldKey, Record};

/// File operations the selector needs on candidate images.
pub trait CoverStorage: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Pixel dimensions, read from the image header only.
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), StorageError>;

    fn delete(&self, path: &Path) -> Result<(), StorageError>;
}

/// Candidates stored on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCoverStorage;

impl CoverStorage for LocalCoverStorage {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn dimensions(&self, path: &Path) -> Result<(u32, u32), StorageError> {
        image::image_dimensions(path).map_err(|e| StorageError::Image {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::remove_file(path).map_err(|source| StorageError::Delete {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Default)]
pub struct CoverSelection {
    pub winner: Option<PathBuf>,
    /// Losers that could not be deleted.
    pub errors: Vec<StorageError>,
}

/// Keep the largest candidate by area; the first one wins ties and empty
/// images never win. Every other candidate that exists on disk is deleted.
pub fn select_cover(storage: &dyn CoverStorage, candidates: &[PathBuf]) -> CoverSelection {
    let mut winner: Option<&PathBuf> = None;
    let mut best_area = 0u64;
    for path in candidates {
        if !storage.exists(path) {
            continue;
        }
        match storage.dimensions(path) {
            Ok((w, h)) => {
                let area = u64::from(w) * u64::from(h);
                if area > best_area {
                    winner = Some(path);
                    best_area = area;
                }
            }
            Err(e) => tracing::debug!("Skipping cover candidate: {}", e),
        }
    }

    let mut errors = Vec::new();
    for path in candidates {
        if Some(path) == winner || !storage.exists(path) {
            continue;
        }
        if let Err(e) = storage.delete(path) {
            tracing::warn!("{}", e);
            errors.push(e);
        }
    }
    CoverSelection {
        winner: winner.cloned(),
        errors,
    }
}

/// Resolve every slot of a merged record: candidate lists are replaced by
/// the winning path. Returns the delete failures.
pub fn select_covers(storage: &dyn CoverStorage, record: &mut Record) -> Vec<StorageError> {
    let mut errors = Vec::new();
    for slot in CoverSlot::ALL {
        let candidates = record.cover_candidates(slot);
        record.remove(&FieldKey::CoverCandidates(slot));
        if candidates.is_empty() {
            continue;
        }
        let selection = select_cover(storage, &candidates);
        if let Some(path) = selection.winner {
            tracing::debug!("Cover {:?}: {}", slot, path.display());
            record.insert(FieldKey::Cover(slot), path.to_string_lossy().into_owned());
        }
        errors.extend(selection.errors);
    }
    errors
}
