// SPDX-License-Identifier: MPL-2.0

//! Render compositor: the single owner of what is currently on screen.
//!
//! The compositor combines the [`TopologyTracker`] with at most one
//! [`PlaybackSession`] and keeps one [`VideoLayer`] per surface bound to that
//! session. Every frame the session decodes is composed once per distinct
//! surface size and aspect mode, then presented on every layer.

mod handle;
#[cfg(test)]
mod tests;

pub use handle::{Command, CompositorHandle};

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    time::Duration,
};

use image::RgbaImage;
use live_bg_config::AspectMode;
use tracing::{debug, error, info, warn};

use crate::scaler::Scaler;
use crate::topology::{DisplayHost, DisplayId, HostEvent, Rect, Surface, TopologyTracker};
use crate::video::{
    DEFAULT_FRAME_DURATION, Frame, PlaybackError, PlaybackSession, SessionId, VideoBackend,
};

/// The operations the coordinator needs from whatever renders wallpapers.
pub trait Renderer {
    /// Replaces the current wallpaper with the video at `path`.
    ///
    /// An unplayable `path` is rejected without touching what is playing.
    fn play(&mut self, path: &Path) -> Result<(), PlaybackError>;

    fn set_aspect_mode(&mut self, mode: AspectMode);
}

/// A presentation layer attached to one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoLayer {
    pub session: SessionId,
    pub aspect: AspectMode,
    pub bounds: Rect,
}

pub struct Compositor<B: VideoBackend, S> {
    backend: B,
    tracker: TopologyTracker<S>,
    session: Option<PlaybackSession<B::Pipeline>>,
    layers: BTreeMap<DisplayId, VideoLayer>,
    aspect: AspectMode,
    paused: bool,
    next_session: u64,
    last_frame: Option<Frame>,
    last_error: Option<PlaybackError>,
    scaler: Scaler,
}

impl<B: VideoBackend, S: Surface> Compositor<B, S> {
    pub fn new(backend: B, aspect: AspectMode) -> Self {
        Self {
            backend,
            tracker: TopologyTracker::new(),
            session: None,
            layers: BTreeMap::new(),
            aspect,
            paused: false,
            next_session: 0,
            last_frame: None,
            last_error: None,
            scaler: Scaler::new(),
        }
    }

    /// Stops the current session and removes every layer.
    fn teardown(&mut self) {
        self.layers.clear();
        self.last_frame = None;
        if let Some(session) = self.session.take() {
            debug!(session = session.id().0, "stopping playback session");
        }
    }

    /// Binds one layer per known surface to the current session.
    ///
    /// Stale layers are dropped first, so repeated calls never stack outputs.
    pub fn reattach(&mut self) {
        self.layers.clear();

        let Some(session) = self.session.as_ref() else {
            for (_, surface) in self.tracker.surfaces_mut() {
                surface.clear();
            }
            return;
        };

        let session_id = session.id();
        for (id, surface) in self.tracker.surfaces() {
            self.layers.insert(
                id,
                VideoLayer {
                    session: session_id,
                    aspect: self.aspect,
                    bounds: surface.frame(),
                },
            );
        }

        debug!(session = session_id.0, layers = self.layers.len(), "reattached video layers");

        if let Some(frame) = self.last_frame.clone() {
            self.present(&frame);
        }
    }

    pub fn aspect_mode(&self) -> AspectMode {
        self.aspect
    }

    /// Stops every pipeline, e.g. while the machine sleeps.
    pub fn pause_all(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        if let Some(session) = self.session.as_mut() {
            session.pause();
            info!(session = session.id().0, "paused playback");
        }
    }

    pub fn resume_all(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        if let Some(session) = self.session.as_mut() {
            match session.play() {
                Ok(()) => info!(session = session.id().0, "resumed playback"),
                Err(why) => {
                    error!(%why, "failed to resume playback");
                    self.last_error = Some(why);
                }
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Reacts to a host notification.
    pub fn handle_host_event<H>(&mut self, event: HostEvent, host: &mut H)
    where
        H: DisplayHost<Surface = S>,
    {
        debug!(?event, "host event");
        match event {
            HostEvent::Sleep => self.pause_all(),
            HostEvent::Wake => {
                self.resume_all();
                self.sync(host);
            }
            HostEvent::DisplaysChanged
            | HostEvent::SpaceChanged
            | HostEvent::AppActivated
            | HostEvent::AppDeactivated => self.sync(host),
        }
    }

    /// Syncs the surface set with the host and reattaches layers.
    pub fn sync<H>(&mut self, host: &mut H)
    where
        H: DisplayHost<Surface = S>,
    {
        self.tracker.sync(host);
        self.reattach();
    }

    /// Periodic liveness pass; returns the number of surfaces re-asserted.
    pub fn check_liveness<H>(&mut self, host: &mut H) -> usize
    where
        H: DisplayHost<Surface = S>,
    {
        let touched = self.tracker.check_liveness(host);
        if touched > 0 {
            self.reattach();
        }
        touched
    }

    /// Pulls the next decoded frame and presents it on every layer.
    ///
    /// Returns whether a new frame was shown. A pipeline error is kept for
    /// [`Compositor::take_error`] and the last frame stays on screen.
    pub fn render_frame(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        match session.tick() {
            Ok(Some(frame)) => {
                self.present(&frame);
                self.last_frame = Some(frame);
                true
            }
            Ok(None) => false,
            Err(why) => {
                error!(session = session.id().0, source = %session.source().display(), %why, "playback failed");
                self.last_error = Some(why);
                false
            }
        }
    }

    fn present(&mut self, frame: &Frame) {
        let mut composed: HashMap<(u32, u32, AspectMode), RgbaImage> = HashMap::new();

        for (id, layer) in &self.layers {
            let Some(surface) = self.tracker.surface_mut(*id) else {
                continue;
            };

            let (width, height) = surface.buffer_size();
            let key = (width, height, layer.aspect);
            if !composed.contains_key(&key) {
                match self.scaler.compose(&frame.image, layer.aspect, width, height) {
                    Ok(image) => {
                        composed.insert(key, image);
                    }
                    Err(why) => {
                        warn!(display = %id, ?why, "failed to scale frame");
                        continue;
                    }
                }
            }

            if let Some(image) = composed.get(&key) {
                surface.present(image);
            }
        }
    }

    /// How often [`Compositor::render_frame`] should run.
    pub fn frame_interval(&self) -> Duration {
        self.session
            .as_ref()
            .map_or(DEFAULT_FRAME_DURATION, PlaybackSession::frame_duration)
    }

    /// Takes the last playback error reported since the previous call.
    pub fn take_error(&mut self) -> Option<PlaybackError> {
        self.last_error.take()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(PlaybackSession::id)
    }

    pub fn source(&self) -> Option<&Path> {
        self.session.as_ref().map(PlaybackSession::source)
    }

    pub fn layers(&self) -> &BTreeMap<DisplayId, VideoLayer> {
        &self.layers
    }

    pub fn tracker(&self) -> &TopologyTracker<S> {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TopologyTracker<S> {
        &mut self.tracker
    }

    /// Runs a command redispatched through a [`CompositorHandle`].
    pub fn execute(&mut self, command: Command) {
        match command {
            Command::SetAspect(mode) => Renderer::set_aspect_mode(self, mode),
        }
    }
}

impl<B: VideoBackend, S: Surface> Renderer for Compositor<B, S> {
    fn play(&mut self, path: &Path) -> Result<(), PlaybackError> {
        // a source that fails to open leaves the current session playing
        let pipeline = self.backend.open(path)?;

        self.teardown();

        self.next_session += 1;
        let mut session = PlaybackSession::new(SessionId(self.next_session), path, pipeline);

        if self.paused {
            session.pause();
        } else {
            session.play()?;
        }

        info!(
            session = session.id().0,
            path = %path.display(),
            surfaces = self.tracker.len(),
            "playing wallpaper"
        );

        self.session = Some(session);
        self.last_error = None;
        self.reattach();
        Ok(())
    }

    fn set_aspect_mode(&mut self, mode: AspectMode) {
        if self.aspect != mode {
            info!(?mode, "changing aspect mode");
        }
        self.aspect = mode;
        for layer in self.layers.values_mut() {
            layer.aspect = mode;
        }
        self.reattach();
    }
}
