// SPDX-License-Identifier: MPL-2.0

//! Durable library of wallpaper records.

mod record;
mod store;

pub use record::{DownloadState, Origin, WallpaperRecord, default_title};
pub use store::LibraryStore;

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

/// Failure to read or write the library file.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("library file I/O failed")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize library")]
    Serialize(#[from] ron::Error),
    #[error("library file {} is corrupt", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("no wallpaper with id {0}")]
    UnknownRecord(Uuid),
    #[error("wallpaper {0} has not been downloaded")]
    NotDownloaded(Uuid),
}

/// Absolute, lexically normalized form of `path` used for local lookups.
///
/// Symlinks are not resolved, so the result is stable even after the file is
/// removed.
pub fn standardize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
