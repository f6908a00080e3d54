// SPDX-License-Identifier: MPL-2.0

//! The single entry point for "make X the wallpaper".
//!
//! The coordinator runs on the event loop thread. It starts acquisitions,
//! folds their events into the [`LibraryStore`] and drives a [`Renderer`].
//! Every "mark applied" write is guarded by the request it was issued for, so
//! a slow download finishing late never replaces a newer choice.


use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
};

use live_bg_config::Preferences;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquire::{
    self, AcquisitionError, AcquisitionEvent, EventSink, ManagedStorage, Ticket,
};
use crate::compositor::Renderer;
use crate::library::{LibraryError, LibraryStore, WallpaperRecord};
use crate::video::{MediaInspector, Metadata, PlaybackError};

/// What the user asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplySource {
    Local { path: PathBuf, title: Option<String> },
    Remote { url: String, title: Option<String> },
}

impl ApplySource {
    /// `http(s)://` inputs are remote, anything else is a local path.
    pub fn parse(input: &str, title: Option<String>) -> Self {
        let title = title.filter(|title| !title.trim().is_empty());
        if input.starts_with("http://") || input.starts_with("https://") {
            Self::Remote {
                url: input.to_string(),
                title,
            }
        } else {
            Self::Local {
                path: PathBuf::from(input),
                title,
            }
        }
    }
}

/// Result of [`Coordinator::apply`].
#[derive(Debug)]
pub enum Applied {
    /// The file was already in the library and is now playing.
    Now(WallpaperRecord),
    /// An acquisition was started; the outcome arrives as events.
    Pending(Ticket),
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("wallpaper {0} has no file to play")]
    MissingFile(Uuid),
}

pub struct Coordinator<E> {
    store: Arc<LibraryStore>,
    storage: ManagedStorage,
    inspector: Arc<dyn MediaInspector>,
    agent: ureq::Agent,
    sink: E,
    prefs: Preferences,
    next_request: u64,
    /// The request whose completion may still change the applied record.
    latest_request: Option<u64>,
    in_flight: HashMap<u64, JoinHandle<()>>,
    /// The one running download per record; events from any other ticket for
    /// the record are stale.
    downloads: HashMap<Uuid, Ticket>,
    thumbnails: HashMap<Uuid, JoinHandle<()>>,
}

impl<E: EventSink + Clone> Coordinator<E> {
    pub fn new(
        store: Arc<LibraryStore>,
        storage: ManagedStorage,
        inspector: Arc<dyn MediaInspector>,
        sink: E,
        prefs: Preferences,
    ) -> Self {
        Self {
            store,
            storage,
            inspector,
            agent: acquire::http_agent(acquire::READ_TIMEOUT),
            sink,
            prefs,
            next_request: 0,
            latest_request: None,
            in_flight: HashMap::new(),
            downloads: HashMap::new(),
            thumbnails: HashMap::new(),
        }
    }

    pub fn set_preferences(&mut self, prefs: Preferences) {
        self.prefs = prefs;
    }

    /// Number of imports and downloads still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn new_request(&mut self) -> u64 {
        self.next_request += 1;
        self.latest_request = Some(self.next_request);
        self.next_request
    }

    /// Makes `source` the wallpaper.
    ///
    /// Files already in the library play immediately. Anything else is
    /// acquired in the background and applied once its completion event is
    /// handled, unless a newer request came in meanwhile.
    pub fn apply(
        &mut self,
        source: ApplySource,
        renderer: &mut impl Renderer,
    ) -> Result<Applied, ApplyError> {
        match source {
            ApplySource::Local { path, title } => {
                if let Some(record) = self.store.find_by_local(&path) {
                    if record.playable_path().is_some() {
                        debug!(record = %record.id, "file already in library");
                        self.new_request();
                        return self.apply_downloaded(&record, renderer).map(Applied::Now);
                    }
                }

                let request = self.new_request();
                let ticket = Ticket {
                    request,
                    record: None,
                    title: title.unwrap_or_else(|| title_from_path(&path)),
                };

                info!(request, path = %path.display(), "importing video");
                let handle = acquire::spawn_import(
                    path,
                    ticket.clone(),
                    self.storage.clone(),
                    Arc::clone(&self.inspector),
                    self.sink.clone(),
                );
                self.in_flight.insert(request, handle);
                Ok(Applied::Pending(ticket))
            }

            ApplySource::Remote { url, title } => {
                let record = self.store.upsert_remote(&url, title.as_deref());

                if record.playable_path().is_some() {
                    debug!(record = %record.id, url, "remote video already downloaded");
                    self.new_request();
                    return self.apply_downloaded(&record, renderer).map(Applied::Now);
                }

                if let Some(ticket) = self.downloads.get(&record.id) {
                    debug!(request = ticket.request, record = %record.id, url, "download already running");
                    self.latest_request = Some(ticket.request);
                    return Ok(Applied::Pending(ticket.clone()));
                }

                let record = self.store.mark_downloading(record.id, 0.0)?;
                let request = self.new_request();
                let ticket = Ticket {
                    request,
                    record: Some(record.id),
                    title: record.title.clone(),
                };

                info!(request, record = %record.id, url, "downloading video");
                let handle = acquire::spawn_download(
                    self.agent.clone(),
                    url,
                    ticket.clone(),
                    self.storage.clone(),
                    Arc::clone(&self.inspector),
                    self.sink.clone(),
                );
                self.in_flight.insert(request, handle);
                self.downloads.insert(record.id, ticket.clone());
                Ok(Applied::Pending(ticket))
            }
        }
    }

    /// Applies a record that is already in the library.
    pub fn apply_record(
        &mut self,
        id: Uuid,
        renderer: &mut impl Renderer,
    ) -> Result<WallpaperRecord, ApplyError> {
        let record = self.store.get(id).ok_or(LibraryError::UnknownRecord(id))?;
        if !record.is_downloaded() {
            return Err(LibraryError::NotDownloaded(id).into());
        }

        self.new_request();
        self.apply_downloaded(&record, renderer)
    }

    /// Restores the wallpaper from the previous run.
    ///
    /// Picks the applied record, or the most recently updated downloaded one,
    /// restores the preferred aspect mode and plays it.
    pub fn reapply_last_if_available(
        &mut self,
        renderer: &mut impl Renderer,
    ) -> Option<WallpaperRecord> {
        let candidate = self
            .store
            .applied()
            .filter(|record| record.playable_path().is_some())
            .or_else(|| {
                self.store
                    .latest_downloaded()
                    .filter(|record| record.playable_path().is_some())
            });

        let Some(record) = candidate else {
            info!("no wallpaper to restore");
            return None;
        };

        renderer.set_aspect_mode(self.prefs.default_aspect);
        self.new_request();

        match self.apply_downloaded(&record, renderer) {
            Ok(record) => Some(record),
            Err(why) => {
                warn!(record = %record.id, %why, "failed to restore wallpaper");
                None
            }
        }
    }

    /// Plays a downloaded record, then marks it applied.
    fn apply_downloaded(
        &mut self,
        record: &WallpaperRecord,
        renderer: &mut impl Renderer,
    ) -> Result<WallpaperRecord, ApplyError> {
        let path = record
            .playable_path()
            .ok_or(ApplyError::MissingFile(record.id))?
            .to_path_buf();

        self.ensure_thumbnail_if_missing(record);

        if let Err(why) = renderer.play(&path) {
            // the previous wallpaper keeps playing
            let _ = self.store.note_error(record.id, &why.to_string());
            return Err(why.into());
        }

        let record = self.store.set_applied_exclusive(record.id)?;

        if self.prefs.hide_after_apply {
            info!(record = %record.id, title = %record.title, "apply finished");
        }

        Ok(record)
    }

    /// Starts regenerating the record's thumbnail if the file is missing or
    /// unreadable. Returns whether a regeneration was started.
    pub fn ensure_thumbnail_if_missing(&mut self, record: &WallpaperRecord) -> bool {
        let path = self.storage.thumbnail_path(record.id);

        if let Ok(png) = std::fs::read(&path) {
            if image::load_from_memory(&png).is_ok() {
                if record.thumbnail_path.as_deref() != Some(path.as_path())
                    || record.thumbnail_png.as_deref() != Some(png.as_slice())
                {
                    let _ = self.store.set_thumbnail(record.id, &path, png);
                }
                return false;
            }
            warn!(record = %record.id, path = %path.display(), "thumbnail is corrupt");
        }

        let Some(video) = record.playable_path() else {
            return false;
        };

        if self
            .thumbnails
            .get(&record.id)
            .is_some_and(|job| !job.is_finished())
        {
            return false;
        }

        debug!(record = %record.id, "regenerating thumbnail");
        let job = acquire::spawn_thumbnail(
            video.to_path_buf(),
            record.id,
            Arc::clone(&self.inspector),
            self.sink.clone(),
        );
        self.thumbnails.insert(record.id, job);
        true
    }

    /// Folds a worker event into the library, applying completed requests
    /// that are still the latest.
    pub fn handle_event(&mut self, event: AcquisitionEvent, renderer: &mut impl Renderer) {
        match event {
            AcquisitionEvent::Progress { ticket, fraction } => {
                if !self.is_current(&ticket) {
                    debug!(request = ticket.request, "dropping progress of a stale download");
                    return;
                }
                if let Some(id) = ticket.record {
                    if let Err(why) = self.store.mark_downloading(id, fraction) {
                        warn!(record = %id, %why, "dropping download progress");
                    }
                }
            }

            AcquisitionEvent::Completed {
                ticket,
                path,
                metadata,
            } => {
                self.finish(ticket.request);
                if !self.is_current(&ticket) {
                    debug!(request = ticket.request, path = %path.display(), "dropping stale download");
                    let _ = std::fs::remove_file(&path);
                    return;
                }
                self.settle(&ticket);
                if let Err(why) = self.complete(&ticket, &path, metadata, renderer) {
                    warn!(request = ticket.request, %why, "failed to apply acquired video");
                }
            }

            AcquisitionEvent::Failed { ticket, error } => {
                self.finish(ticket.request);
                if !self.is_current(&ticket) {
                    debug!(request = ticket.request, %error, "dropping failure of a stale download");
                    return;
                }
                self.settle(&ticket);
                self.fail(&ticket, &error);
            }

            AcquisitionEvent::Thumbnail { record, png } => {
                if let Some(job) = self.thumbnails.remove(&record) {
                    let _ = job.join();
                }
                self.store_thumbnail(record, png);
            }
        }
    }

    fn finish(&mut self, request: u64) {
        if let Some(handle) = self.in_flight.remove(&request) {
            let _ = handle.join();
        }
    }

    /// Whether `ticket` is still the running download of its record.
    /// Imports have no record yet and are always current.
    fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.record.is_none_or(|id| {
            self.downloads
                .get(&id)
                .is_some_and(|running| running.request == ticket.request)
        })
    }

    fn settle(&mut self, ticket: &Ticket) {
        if let Some(id) = ticket.record {
            self.downloads.remove(&id);
        }
    }

    fn complete(
        &mut self,
        ticket: &Ticket,
        path: &Path,
        metadata: Option<Metadata>,
        renderer: &mut impl Renderer,
    ) -> Result<(), ApplyError> {
        let record = match ticket.record {
            Some(id) => self.store.mark_downloaded(id, path)?,
            None => self.store.insert_local(path, &ticket.title),
        };

        if let Some(metadata) = metadata {
            self.store.set_metadata(record.id, &metadata)?;
            if let Some(png) = metadata.thumbnail_png {
                self.store_thumbnail(record.id, png);
            }
        }

        if self.latest_request != Some(ticket.request) {
            info!(
                request = ticket.request,
                record = %record.id,
                "acquisition finished after a newer request, not applying"
            );
            return Ok(());
        }

        let record = self.store.get(record.id).ok_or(LibraryError::UnknownRecord(record.id))?;
        self.apply_downloaded(&record, renderer)?;
        Ok(())
    }

    fn fail(&mut self, ticket: &Ticket, error: &AcquisitionError) {
        let message = error.to_string();
        let result = match ticket.record {
            Some(id) => self.store.mark_failed(id, &message),
            None => Ok(self.store.insert_failed_local(&ticket.title, &message)),
        };

        match result {
            Ok(record) => warn!(record = %record.id, %message, "acquisition failed"),
            Err(why) => warn!(request = ticket.request, %why, "failed to record acquisition failure"),
        }
    }

    fn store_thumbnail(&mut self, id: Uuid, png: Vec<u8>) {
        match self.storage.save_thumbnail(id, &png) {
            Ok(path) => {
                if let Err(why) = self.store.set_thumbnail(id, &path, png) {
                    warn!(record = %id, %why, "failed to record thumbnail");
                }
            }
            Err(why) => {
                warn!(record = %id, ?why, "failed to save thumbnail");
                let _ = self.store.note_error(id, &format!("failed to save thumbnail: {why}"));
            }
        }
    }

    /// Notes a mid-playback failure on the applied record.
    pub fn playback_failed(&mut self, error: &PlaybackError) {
        if let Some(record) = self.store.applied() {
            let _ = self.store.note_error(record.id, &error.to_string());
        }
    }
}

fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
