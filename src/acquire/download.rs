// SPDX-License-Identifier: MPL-2.0

use std::{
    fs::{self, File},
    io::{Read, Write},
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info, warn};

use super::{AcquisitionError, AcquisitionEvent, EventSink, ManagedStorage, Ticket};
use crate::video::MediaInspector;

const CHUNK_SIZE: usize = 64 * 1024;

/// Smallest progress step worth reporting.
const PROGRESS_STEP: f64 = 0.01;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest silence tolerated from a server before the download fails.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP agent for downloads; a server that stops sending fails the download
/// with a transport error after `read_timeout`.
pub fn http_agent(read_timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(read_timeout)
        .build()
}

/// Streams `url` into storage.
///
/// `progress` receives `bytes_received / bytes_expected` in increasing order,
/// and is never called when the server does not announce a length. The
/// partial file is removed on any error.
pub fn download_to(
    agent: &ureq::Agent,
    url: &str,
    storage: &ManagedStorage,
    mut progress: impl FnMut(f64),
) -> Result<PathBuf, AcquisitionError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AcquisitionError::InvalidSource(format!("unsupported URL: {url}")));
    }

    let response = agent
        .get(url)
        .call()
        .map_err(|why| AcquisitionError::Transport(why.to_string()))?;

    let expected = response
        .header("Content-Length")
        .and_then(|len| len.trim().parse::<u64>().ok())
        .filter(|len| *len > 0);

    debug!(url, ?expected, "download started");

    let partial = storage.partial_path()?;
    let result = stream(response.into_reader(), &partial, expected, &mut progress);

    if let Err(why) = result {
        let _ = fs::remove_file(&partial);
        return Err(why);
    }

    match storage.adopt_download(&partial, url) {
        Ok(path) => Ok(path),
        Err(why) => {
            let _ = fs::remove_file(&partial);
            Err(why.into())
        }
    }
}

fn stream(
    mut reader: impl Read,
    partial: &std::path::Path,
    expected: Option<u64>,
    progress: &mut impl FnMut(f64),
) -> Result<(), AcquisitionError> {
    let mut file = File::create(partial)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    let mut reported = 0.0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(why) if why.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(why) => return Err(AcquisitionError::Transport(why.to_string())),
        };

        file.write_all(&buf[..n])?;
        written += n as u64;

        if let Some(total) = expected {
            let fraction = (written as f64 / total as f64).min(1.0);
            if fraction - reported >= PROGRESS_STEP || (fraction >= 1.0 && reported < 1.0) {
                reported = fraction;
                progress(fraction);
            }
        }
    }

    file.sync_all()?;

    if let Some(total) = expected {
        if written < total {
            return Err(AcquisitionError::Transport(format!(
                "connection closed after {written} of {total} bytes"
            )));
        }
    }

    Ok(())
}

/// Downloads `url` on a worker thread, validating the result before it is
/// reported as completed.
pub fn spawn_download(
    agent: ureq::Agent,
    url: String,
    ticket: Ticket,
    storage: ManagedStorage,
    inspector: Arc<dyn MediaInspector>,
    sink: impl EventSink,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let downloaded = download_to(&agent, &url, &storage, |fraction| {
            sink.send(AcquisitionEvent::Progress {
                ticket: ticket.clone(),
                fraction,
            });
        });

        let event = match downloaded.and_then(|path| {
            match inspector.validate(&path) {
                Ok(()) => Ok(path),
                Err(why) => {
                    let _ = fs::remove_file(&path);
                    Err(AcquisitionError::Unplayable(why.to_string()))
                }
            }
        }) {
            Ok(path) => {
                info!(url, to = %path.display(), "downloaded video");
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
                warn!(url, %error, "download failed");
                AcquisitionEvent::Failed { ticket, error }
            }
        };

        sink.send(event);
    })
}
