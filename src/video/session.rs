// SPDX-License-Identifier: MPL-2.0

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::debug;

use super::{Frame, Pipeline, PlaybackError};

/// Identity of a playback session, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

/// The single "what's playing": one muted, endlessly looping pipeline.
///
/// Dropping the session stops its pipeline.
#[derive(Debug)]
pub struct PlaybackSession<P: Pipeline> {
    id: SessionId,
    source: PathBuf,
    pipeline: P,
    failed: bool,
}

impl<P: Pipeline> PlaybackSession<P> {
    pub fn new(id: SessionId, source: &Path, pipeline: P) -> Self {
        Self {
            id,
            source: source.to_path_buf(),
            pipeline,
            failed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_muted(&self) -> bool {
        true
    }

    pub fn is_looping(&self) -> bool {
        true
    }

    /// Whether the pipeline hit a decode error and no longer produces frames.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        self.pipeline.play()
    }

    pub fn pause(&mut self) {
        self.pipeline.pause();
    }

    pub fn frame_duration(&self) -> Duration {
        self.pipeline.frame_duration()
    }

    /// Next frame to present, or `None` when nothing new was decoded.
    pub fn tick(&mut self) -> Result<Option<Frame>, PlaybackError> {
        if self.failed {
            return Ok(None);
        }

        if let Err(why) = self.pipeline.poll() {
            self.failed = true;
            self.pipeline.stop();
            return Err(why);
        }

        Ok(self.pipeline.next_frame())
    }
}

impl<P: Pipeline> Drop for PlaybackSession<P> {
    fn drop(&mut self) {
        debug!(session = self.id.0, source = %self.source.display(), "tearing down playback session");
        self.pipeline.stop();
    }
}
