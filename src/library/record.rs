// SPDX-License-Identifier: MPL-2.0

use std::{collections::BTreeSet, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a wallpaper came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Imported from a file the user picked.
    Local,
    /// Downloaded from `source_url`.
    Remote { source_url: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    #[default]
    NotDownloaded,
    Downloading,
    Downloaded,
    Failed,
}

/// A persisted library entry.
///
/// `local_path` is set exactly when `state` is [`DownloadState::Downloaded`],
/// and only a downloaded record can be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallpaperRecord {
    pub id: Uuid,
    pub title: String,
    pub origin: Origin,
    pub local_path: Option<PathBuf>,
    pub state: DownloadState,
    /// Fraction in `0.0..=1.0`, meaningful while downloading.
    pub progress: f64,
    pub is_applied: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    /// PNG copy of the thumbnail file, reloaded from `thumbnail_path` when
    /// the library is opened.
    #[serde(skip)]
    pub thumbnail_png: Option<Vec<u8>>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub last_error_message: Option<String>,
}

impl WallpaperRecord {
    pub(super) fn new(title: String, origin: Origin, state: DownloadState, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            origin,
            local_path: None,
            state,
            progress: 0.0,
            is_applied: false,
            created_at: now,
            updated_at: now,
            duration_secs: None,
            size_bytes: None,
            width: None,
            height: None,
            thumbnail_path: None,
            thumbnail_png: None,
            tags: None,
            last_error_message: None,
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        match &self.origin {
            Origin::Remote { source_url } => Some(source_url),
            Origin::Local => None,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        self.state == DownloadState::Downloaded
    }

    /// The file to play, if the record is downloaded and the file still exists.
    pub fn playable_path(&self) -> Option<&std::path::Path> {
        self.local_path
            .as_deref()
            .filter(|path| self.is_downloaded() && path.is_file())
    }
}

/// Title used for a remote record created without one: the URL's last path
/// segment, ignoring any query or fragment.
pub fn default_title(url: &str) -> String {
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);
    let segment = without_suffix
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    if segment.is_empty() || segment.contains(':') {
        url.to_string()
    } else {
        segment.to_string()
    }
}
