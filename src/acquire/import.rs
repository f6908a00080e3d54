// SPDX-License-Identifier: MPL-2.0

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{info, warn};

use super::{AcquisitionError, AcquisitionEvent, EventSink, ManagedStorage, Ticket};
use crate::video::MediaInspector;

/// Validates `source` and copies it into storage, returning the copy.
pub fn import_file(
    source: &Path,
    title: &str,
    storage: &ManagedStorage,
    inspector: &dyn MediaInspector,
) -> Result<PathBuf, AcquisitionError> {
    if !source.is_file() {
        return Err(AcquisitionError::InvalidSource(format!(
            "{} is not a file",
            source.display()
        )));
    }

    inspector
        .validate(source)
        .map_err(|why| AcquisitionError::Unplayable(why.to_string()))?;

    Ok(storage.copy_into(source, title)?)
}

/// Imports `source` on a worker thread and reports the result to `sink`.
pub fn spawn_import(
    source: PathBuf,
    ticket: Ticket,
    storage: ManagedStorage,
    inspector: Arc<dyn MediaInspector>,
    sink: impl EventSink,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let event = match import_file(&source, &ticket.title, &storage, inspector.as_ref()) {
            Ok(path) => {
                info!(from = %source.display(), to = %path.display(), "imported video");
                let metadata = inspector
                    .inspect(&path)
                    .inspect_err(|why| warn!(path = %path.display(), %why, "metadata extraction failed"))
                    .ok();
                AcquisitionEvent::Completed {
                    ticket,
                    path,
                    metadata,
                }
            }
            Err(error) => {
                warn!(source = %source.display(), %error, "import failed");
                AcquisitionEvent::Failed { ticket, error }
            }
        };

        sink.send(event);
    })
}
