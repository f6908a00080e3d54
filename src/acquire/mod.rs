// SPDX-License-Identifier: MPL-2.0

//! Acquisition: everything that turns a user choice into a playable file in
//! managed storage.
//!
//! Imports and downloads run on their own worker threads and report back
//! through an [`EventSink`], which in the daemon is a calloop channel so the
//! results land on the event loop thread.

mod download;
mod import;
mod storage;

pub use download::{READ_TIMEOUT, download_to, http_agent, spawn_download};
pub use import::{import_file, spawn_import};
pub use storage::{ManagedStorage, data_root, safe_filename, sanitize};

use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

use uuid::Uuid;

use crate::video::{MediaInspector, Metadata};

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("download failed: {0}")]
    Transport(String),
    #[error("file operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a playable video: {0}")]
    Unplayable(String),
    #[error("invalid source: {0}")]
    InvalidSource(String),
}

/// Identifies one acquisition request and the record it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// Monotonic request number; a later request supersedes earlier ones.
    pub request: u64,
    /// Remote downloads have a record from the start, imports get one on completion.
    pub record: Option<Uuid>,
    pub title: String,
}

/// Progress and terminal results of a worker.
///
/// For one ticket every `Progress` is delivered before the terminal event.
#[derive(Debug)]
pub enum AcquisitionEvent {
    Progress {
        ticket: Ticket,
        fraction: f64,
    },
    Completed {
        ticket: Ticket,
        path: PathBuf,
        /// Absent when extraction failed.
        metadata: Option<Metadata>,
    },
    Failed {
        ticket: Ticket,
        error: AcquisitionError,
    },
    /// A regenerated thumbnail for an existing record.
    Thumbnail {
        record: Uuid,
        png: Vec<u8>,
    },
}

impl AcquisitionEvent {
    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            Self::Progress { ticket, .. }
            | Self::Completed { ticket, .. }
            | Self::Failed { ticket, .. } => Some(ticket),
            Self::Thumbnail { .. } => None,
        }
    }
}

/// Renders the thumbnail of `video` on a worker thread.
///
/// Failures are only logged; the record keeps whatever thumbnail it had.
pub fn spawn_thumbnail(
    video: PathBuf,
    record: Uuid,
    inspector: Arc<dyn MediaInspector>,
    sink: impl EventSink,
) -> JoinHandle<()> {
    thread::spawn(move || match inspector.thumbnail(&video) {
        Ok(png) => sink.send(AcquisitionEvent::Thumbnail { record, png }),
        Err(why) => {
            tracing::warn!(record = %record, path = %video.display(), %why, "failed to regenerate thumbnail");
        }
    })
}

/// Where workers deliver their events.
pub trait EventSink: Send + 'static {
    fn send(&self, event: AcquisitionEvent);
}

impl EventSink for calloop::channel::Sender<AcquisitionEvent> {
    fn send(&self, event: AcquisitionEvent) {
        if let Err(why) = calloop::channel::Sender::send(self, event) {
            tracing::warn!(ticket = ?why.0.ticket(), "event loop is gone, dropping acquisition event");
        }
    }
}

impl EventSink for std::sync::mpsc::Sender<AcquisitionEvent> {
    fn send(&self, event: AcquisitionEvent) {
        if let Err(why) = std::sync::mpsc::Sender::send(self, event) {
            tracing::warn!(ticket = ?why.0.ticket(), "receiver is gone, dropping acquisition event");
        }
    }
}
