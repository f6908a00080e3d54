// SPDX-License-Identifier: MPL-2.0

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::record::{DownloadState, Origin, WallpaperRecord, default_title};
use super::{LibraryError, PersistenceError, standardize};
use crate::video::Metadata;

#[derive(Debug)]
struct Inner {
    records: Vec<WallpaperRecord>,
    last_stamp: DateTime<Utc>,
}

/// Record set persisted to a RON file, flushed after every mutation.
///
/// All mutations are serialized through one lock, so concurrent progress
/// callbacks and user actions always observe a consistent snapshot. Reads
/// return clones.
#[derive(Debug)]
pub struct LibraryStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl LibraryStore {
    /// Opens the library at `path`. A missing file is an empty library.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();

        let mut records: Vec<WallpaperRecord> = match fs::read_to_string(&path) {
            Ok(contents) => ron::from_str(&contents).map_err(|source| PersistenceError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(why) if why.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(why) => return Err(why.into()),
        };

        let repaired = repair(&mut records);
        load_thumbnails(&mut records);
        let last_stamp = records
            .iter()
            .map(|record| record.updated_at.max(record.created_at))
            .max()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        info!(path = %path.display(), records = records.len(), "opened wallpaper library");

        let store = Self {
            path: Some(path),
            inner: Mutex::new(Inner {
                records,
                last_stamp,
            }),
        };

        if repaired {
            info!("repaired interrupted wallpaper records");
            let mut inner = store.lock();
            store.flush(&mut inner, None);
        }

        Ok(store)
    }

    /// A library that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                records: Vec::new(),
                last_stamp: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes every record to disk. A failure is logged and noted on
    /// `culprit`; the in-memory state stays as it is.
    fn flush(&self, inner: &mut Inner, culprit: Option<Uuid>) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        if let Err(why) = write_atomically(path, &inner.records) {
            warn!(path = %path.display(), ?why, "failed to flush wallpaper library");
            if let Some(record) = culprit.and_then(|id| inner.records.iter_mut().find(|r| r.id == id)) {
                record.last_error_message = Some(format!("failed to save library: {why}"));
            }
        }
    }

    /// Applies `change` to one record, stamps and flushes it.
    fn update(
        &self,
        id: Uuid,
        change: impl FnOnce(&mut WallpaperRecord),
    ) -> Result<WallpaperRecord, LibraryError> {
        let mut inner = self.lock();
        let now = next_stamp(&mut inner);
        let record = inner
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or(LibraryError::UnknownRecord(id))?;

        change(record);
        record.updated_at = now;

        self.flush(&mut inner, Some(id));
        find(&inner, id).ok_or(LibraryError::UnknownRecord(id))
    }

    pub fn get(&self, id: Uuid) -> Option<WallpaperRecord> {
        find(&self.lock(), id)
    }

    pub fn find_by_remote(&self, url: &str) -> Option<WallpaperRecord> {
        self.lock()
            .records
            .iter()
            .find(|record| record.source_url() == Some(url))
            .cloned()
    }

    /// Looks up a local record by its standardized path.
    pub fn find_by_local(&self, path: &Path) -> Option<WallpaperRecord> {
        let path = standardize(path);
        self.lock()
            .records
            .iter()
            .find(|record| {
                record.origin == Origin::Local && record.local_path.as_deref() == Some(&path)
            })
            .cloned()
    }

    /// Returns the record for `url`, creating a `Downloading` one if needed.
    ///
    /// A non-empty `title` replaces the stored one; new records without a
    /// title are named after the URL's last path segment. The lookup and the
    /// insert share one lock, so racing callers end up with the same record.
    pub fn upsert_remote(&self, url: &str, title: Option<&str>) -> WallpaperRecord {
        let title = title.map(str::trim).filter(|title| !title.is_empty());
        let mut inner = self.lock();

        let index = match inner.records.iter().position(|record| record.source_url() == Some(url)) {
            Some(index) => {
                let Some(title) = title.filter(|title| *title != inner.records[index].title) else {
                    return inner.records[index].clone();
                };
                let title = title.to_string();
                let now = next_stamp(&mut inner);
                let record = &mut inner.records[index];
                record.title = title;
                record.updated_at = now;
                index
            }
            None => {
                let now = next_stamp(&mut inner);
                let record = WallpaperRecord::new(
                    title.map_or_else(|| default_title(url), str::to_string),
                    Origin::Remote {
                        source_url: url.to_string(),
                    },
                    DownloadState::Downloading,
                    now,
                );
                debug!(record = %record.id, url, "created remote wallpaper record");
                inner.records.push(record);
                inner.records.len() - 1
            }
        };

        let id = inner.records[index].id;
        self.flush(&mut inner, Some(id));
        inner.records[index].clone()
    }

    /// Records an imported file as downloaded. Re-importing the same path
    /// updates the existing record instead of adding a row.
    pub fn insert_local(&self, path: &Path, title: &str) -> WallpaperRecord {
        let path = standardize(path);
        let mut inner = self.lock();
        let now = next_stamp(&mut inner);

        let existing = inner.records.iter().position(|record| {
            record.origin == Origin::Local && record.local_path.as_deref() == Some(path.as_path())
        });

        let index = match existing {
            Some(index) => {
                let record = &mut inner.records[index];
                record.title = title.to_string();
                record.updated_at = now;
                index
            }
            None => {
                let mut record =
                    WallpaperRecord::new(title.to_string(), Origin::Local, DownloadState::Downloaded, now);
                record.local_path = Some(path);
                record.progress = 1.0;
                inner.records.push(record);
                inner.records.len() - 1
            }
        };

        let id = inner.records[index].id;
        self.flush(&mut inner, Some(id));
        inner.records[index].clone()
    }

    /// Records an import that never produced a file.
    ///
    /// A retry that fails again updates the earlier failed row with the same
    /// title instead of adding another one.
    pub fn insert_failed_local(&self, title: &str, message: &str) -> WallpaperRecord {
        let mut inner = self.lock();
        let now = next_stamp(&mut inner);

        let existing = inner.records.iter().position(|record| {
            record.origin == Origin::Local
                && record.state == DownloadState::Failed
                && record.local_path.is_none()
                && record.title == title
        });

        let index = match existing {
            Some(index) => {
                let record = &mut inner.records[index];
                record.last_error_message = Some(message.to_string());
                record.updated_at = now;
                index
            }
            None => {
                let mut record =
                    WallpaperRecord::new(title.to_string(), Origin::Local, DownloadState::Failed, now);
                record.last_error_message = Some(message.to_string());
                inner.records.push(record);
                inner.records.len() - 1
            }
        };

        let id = inner.records[index].id;
        self.flush(&mut inner, Some(id));
        inner.records[index].clone()
    }

    /// Moves the record into `Downloading` and raises its progress.
    ///
    /// Progress never decreases within one download; entering `Downloading`
    /// from another state starts over.
    pub fn mark_downloading(&self, id: Uuid, progress: f64) -> Result<WallpaperRecord, LibraryError> {
        let progress = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };

        self.update(id, |record| {
            if record.state == DownloadState::Downloading {
                record.progress = record.progress.max(progress);
            } else {
                record.state = DownloadState::Downloading;
                record.progress = progress;
                record.local_path = None;
                record.is_applied = false;
                record.last_error_message = None;
            }
        })
    }

    pub fn mark_downloaded(&self, id: Uuid, local_path: &Path) -> Result<WallpaperRecord, LibraryError> {
        let local_path = standardize(local_path);
        self.update(id, |record| {
            record.state = DownloadState::Downloaded;
            record.progress = 1.0;
            record.local_path = Some(local_path);
            record.last_error_message = None;
        })
    }

    /// Marks the record failed; failed records are never applied.
    pub fn mark_failed(&self, id: Uuid, message: &str) -> Result<WallpaperRecord, LibraryError> {
        let message = message.to_string();
        self.update(id, |record| {
            record.state = DownloadState::Failed;
            record.progress = 0.0;
            record.local_path = None;
            record.is_applied = false;
            record.last_error_message = Some(message);
        })
    }

    /// Makes `id` the only applied record.
    ///
    /// This is the only way to set `is_applied`; every other record is
    /// cleared under the same lock.
    pub fn set_applied_exclusive(&self, id: Uuid) -> Result<WallpaperRecord, LibraryError> {
        let mut inner = self.lock();

        match inner.records.iter().find(|record| record.id == id) {
            None => return Err(LibraryError::UnknownRecord(id)),
            Some(record) if !record.is_downloaded() => return Err(LibraryError::NotDownloaded(id)),
            Some(_) => {}
        }

        let now = next_stamp(&mut inner);
        for record in &mut inner.records {
            let applied = record.id == id;
            if record.is_applied != applied || applied {
                record.is_applied = applied;
                record.updated_at = now;
            }
        }

        self.flush(&mut inner, Some(id));
        info!(record = %id, "applied wallpaper");
        find(&inner, id).ok_or(LibraryError::UnknownRecord(id))
    }

    /// Stores extracted metadata. Absent fields keep their previous value.
    pub fn set_metadata(&self, id: Uuid, metadata: &Metadata) -> Result<WallpaperRecord, LibraryError> {
        self.update(id, |record| {
            record.duration_secs = metadata.duration_secs.or(record.duration_secs);
            record.width = metadata.width.or(record.width);
            record.height = metadata.height.or(record.height);
            record.size_bytes = metadata.size_bytes.or(record.size_bytes);
        })
    }

    pub fn set_thumbnail(&self, id: Uuid, path: &Path, png: Vec<u8>) -> Result<WallpaperRecord, LibraryError> {
        let path = path.to_path_buf();
        self.update(id, |record| {
            record.thumbnail_path = Some(path);
            record.thumbnail_png = Some(png);
        })
    }

    /// Notes an error without changing the record's state.
    pub fn note_error(&self, id: Uuid, message: &str) -> Result<WallpaperRecord, LibraryError> {
        let message = message.to_string();
        self.update(id, |record| record.last_error_message = Some(message))
    }

    pub fn applied(&self) -> Option<WallpaperRecord> {
        self.lock().records.iter().find(|record| record.is_applied).cloned()
    }

    /// The most recently updated downloaded record.
    pub fn latest_downloaded(&self) -> Option<WallpaperRecord> {
        self.lock()
            .records
            .iter()
            .filter(|record| record.is_downloaded())
            .max_by_key(|record| record.updated_at)
            .cloned()
    }

    /// Snapshot of every record, newest first.
    pub fn load_all(&self) -> Vec<WallpaperRecord> {
        let mut records = self.lock().records.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

fn find(inner: &Inner, id: Uuid) -> Option<WallpaperRecord> {
    inner.records.iter().find(|record| record.id == id).cloned()
}

/// Strictly increasing timestamps, even when the clock stalls or steps back.
fn next_stamp(inner: &mut Inner) -> DateTime<Utc> {
    let now = Utc::now();
    let stamp = if now > inner.last_stamp {
        now
    } else {
        inner.last_stamp + TimeDelta::microseconds(1)
    };
    inner.last_stamp = stamp;
    stamp
}

/// Restores the record invariants after loading. Returns whether anything changed.
fn repair(records: &mut [WallpaperRecord]) -> bool {
    let mut changed = false;

    for record in records.iter_mut() {
        match record.state {
            // the process exited mid-download
            DownloadState::Downloading => {
                record.state = DownloadState::Failed;
                record.progress = 0.0;
                record.local_path = None;
                record.last_error_message = Some("download was interrupted".into());
                changed = true;
            }
            DownloadState::Downloaded if record.local_path.is_none() => {
                record.state = DownloadState::NotDownloaded;
                changed = true;
            }
            DownloadState::NotDownloaded | DownloadState::Failed if record.local_path.is_some() => {
                record.local_path = None;
                changed = true;
            }
            _ => {}
        }

        if record.is_applied && !record.is_downloaded() {
            record.is_applied = false;
            changed = true;
        }
    }

    // keep the most recently updated applied record
    let newest_applied = records
        .iter()
        .filter(|record| record.is_applied)
        .max_by_key(|record| record.updated_at)
        .map(|record| record.id);

    for record in records.iter_mut() {
        if record.is_applied && Some(record.id) != newest_applied {
            record.is_applied = false;
            changed = true;
        }
    }

    changed
}

/// Reads each record's thumbnail back from its file, which is the only
/// persisted copy.
fn load_thumbnails(records: &mut [WallpaperRecord]) {
    for record in records.iter_mut() {
        let Some(path) = record.thumbnail_path.as_deref() else {
            continue;
        };
        match fs::read(path) {
            Ok(png) => record.thumbnail_png = Some(png),
            Err(why) => debug!(record = %record.id, path = %path.display(), %why, "thumbnail unavailable"),
        }
    }
}

fn write_atomically(path: &Path, records: &[WallpaperRecord]) -> Result<(), PersistenceError> {
    let contents = ron::ser::to_string_pretty(records, ron::ser::PrettyConfig::new())?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
