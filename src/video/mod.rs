// SPDX-License-Identifier: MPL-2.0

//! Video playback and media inspection.
//!
//! - [`session`]: the single looping, muted playback session
//! - [`player`]: GStreamer pipeline decoding into a [`frame_queue`]
//! - [`metadata`]: duration, dimensions, size and thumbnail extraction
//!
//! The compositor only talks to the [`VideoBackend`] and [`Pipeline`] traits,
//! so it can be driven without GStreamer in tests.

pub mod frame_queue;
mod metadata;
mod player;
mod session;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(test)]
mod tests;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use image::RgbaImage;

pub use metadata::{
    MediaInspector, Metadata, MetadataError, Orientation, thumbnail_sample_time,
};
pub use player::{GstMedia, VideoPlayer};
pub use session::{PlaybackSession, SessionId};

/// Default frame duration if video metadata is unavailable (60 FPS).
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(16);

/// Minimum frame duration to prevent excessive CPU usage (60 FPS cap).
pub const MIN_FRAME_DURATION: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("cannot open {}: {reason}", path.display())]
    Unopenable { path: PathBuf, reason: String },
    #[error("video pipeline failed: {0}")]
    Pipeline(String),
}

/// A decoded frame shared by every surface showing the session.
#[derive(Clone)]
pub struct Frame {
    pub image: Arc<RgbaImage>,
    /// Presentation timestamp in nanoseconds.
    pub pts: Option<u64>,
}

impl Frame {
    pub fn new(image: RgbaImage, pts: Option<u64>) -> Self {
        Self {
            image: Arc::new(image),
            pts,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("dimensions", &self.image.dimensions())
            .field("pts", &self.pts)
            .finish()
    }
}

/// Builds decode pipelines for the compositor.
pub trait VideoBackend {
    type Pipeline: Pipeline;

    /// Builds a muted decode pipeline over `path`, paused at its first frame.
    fn open(&self, path: &Path) -> Result<Self::Pipeline, PlaybackError>;
}

/// A running decode pipeline.
pub trait Pipeline {
    fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    fn stop(&mut self);

    /// Processes pending pipeline messages. End of stream seeks back to the
    /// start; an error is returned once and the pipeline stays stopped.
    fn poll(&mut self) -> Result<(), PlaybackError>;

    /// Next decoded frame, if a new one is ready.
    fn next_frame(&mut self) -> Option<Frame>;

    fn frame_duration(&self) -> Duration {
        DEFAULT_FRAME_DURATION
    }
}
