// SPDX-License-Identifier: MPL-2.0

//! GStreamer-based video player.
//!
//! One pipeline decodes the session's video into a bounded frame queue which
//! the compositor drains once per frame tick:
//!
//! ```text
//! filesrc ! decodebin ! videoconvert ! videoflip ! RGBA appsink → FrameQueue → surfaces
//! ```
//!
//! Only the video pad of `decodebin` is linked, so playback is always muted.
//! Looping seeks back to the start on end of stream.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use gstreamer::prelude::*;
use tracing::{debug, error, info, warn};

use super::frame_queue::{self, DEFAULT_QUEUE_CAPACITY, FrameQueue, SharedFrameQueue};
use super::{
    DEFAULT_FRAME_DURATION, Frame, MIN_FRAME_DURATION, Pipeline, PlaybackError, VideoBackend,
};

/// How long a pipeline may take to preroll before the source counts as unplayable.
pub(super) const PREROLL_TIMEOUT: Duration = Duration::from_secs(5);

/// GStreamer implementation of the video and inspection backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct GstMedia;

impl GstMedia {
    pub fn new() -> eyre::Result<Self> {
        gstreamer::init()?;
        Ok(Self)
    }
}

impl VideoBackend for GstMedia {
    type Pipeline = VideoPlayer;

    fn open(&self, path: &Path) -> Result<VideoPlayer, PlaybackError> {
        VideoPlayer::new(path)
    }
}

fn unopenable(path: &Path, reason: String) -> PlaybackError {
    PlaybackError::Unopenable {
        path: path.to_path_buf(),
        reason,
    }
}

/// Builds `filesrc ! decodebin ! ... ! appsink name=sink` over `path`.
pub(super) fn launch(
    path: &Path,
    filters: &str,
    sink_props: &str,
) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink), String> {
    if !path.is_file() {
        return Err("file does not exist".into());
    }

    let path_str = path
        .to_str()
        .ok_or_else(|| format!("invalid path: {}", path.display()))?;
    let escaped_path = path_str.replace('\\', "\\\\").replace('"', "\\\"");

    let description = format!(
        concat!(
            "filesrc location=\"{path}\" ! ",
            "decodebin ! ",
            "videoconvert ! ",
            "{filters}",
            "video/x-raw,format=RGBA ! ",
            "appsink name=sink {props}"
        ),
        path = escaped_path,
        filters = filters,
        props = sink_props,
    );

    debug!(pipeline = %description, "creating GStreamer pipeline");

    let pipeline = gstreamer::parse::launch(&description)
        .map_err(|why| why.to_string())?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| "failed to create pipeline".to_string())?;

    let appsink = pipeline
        .by_name("sink")
        .ok_or("failed to get appsink from pipeline")?
        .downcast::<gstreamer_app::AppSink>()
        .map_err(|_| "element 'sink' is not an AppSink".to_string())?;

    Ok((pipeline, appsink))
}

/// Pauses the pipeline and waits until it holds its first video frame.
pub(super) fn preroll(pipeline: &gstreamer::Pipeline) -> Result<(), String> {
    if pipeline.set_state(gstreamer::State::Paused).is_err() {
        return Err(pipeline_error(pipeline).unwrap_or_else(|| "failed to pause pipeline".into()));
    }

    let timeout = gstreamer::ClockTime::from_mseconds(PREROLL_TIMEOUT.as_millis() as u64);
    let (result, state, _) = pipeline.state(timeout);
    if result.is_err() || state != gstreamer::State::Paused {
        return Err(pipeline_error(pipeline).unwrap_or_else(|| "no playable video stream".into()));
    }

    Ok(())
}

/// First error message waiting on the pipeline bus.
fn pipeline_error(pipeline: &gstreamer::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    while let Some(msg) = bus.pop() {
        if let gstreamer::MessageView::Error(err) = msg.view() {
            return Some(err.error().to_string());
        }
    }
    None
}

/// Looping, muted video player feeding a [`SharedFrameQueue`].
pub struct VideoPlayer {
    pipeline: gstreamer::Pipeline,
    frame_queue: SharedFrameQueue,
    frame_duration: Duration,
    source_path: PathBuf,
    loop_count: AtomicU32,
}

impl VideoPlayer {
    /// Create a new video player for the given path, prerolled and paused.
    pub fn new(path: &Path) -> Result<Self, PlaybackError> {
        gstreamer::init().map_err(|why| unopenable(path, why.to_string()))?;

        let (pipeline, appsink) = launch(
            path,
            "videoflip video-direction=auto ! ",
            "sync=true max-buffers=4 drop=true",
        )
        .map_err(|reason| unopenable(path, reason))?;

        let frame_queue = FrameQueue::shared(DEFAULT_QUEUE_CAPACITY);
        Self::setup_appsink_callback(&appsink, std::sync::Arc::clone(&frame_queue));

        if let Err(reason) = preroll(&pipeline) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(unopenable(path, reason));
        }

        let frame_duration = Self::detect_framerate(&appsink);

        Ok(Self {
            pipeline,
            frame_queue,
            frame_duration,
            source_path: path.to_path_buf(),
            loop_count: AtomicU32::new(0),
        })
    }

    fn detect_framerate(appsink: &gstreamer_app::AppSink) -> Duration {
        let Some(caps) = appsink.static_pad("sink").and_then(|pad| pad.current_caps()) else {
            debug!("no current caps on appsink");
            return DEFAULT_FRAME_DURATION;
        };

        let Ok(info) = gstreamer_video::VideoInfo::from_caps(&caps) else {
            return DEFAULT_FRAME_DURATION;
        };

        let fps = info.fps();
        if fps.numer() > 0 && fps.denom() > 0 {
            let detected = Duration::from_secs_f64(f64::from(fps.denom()) / f64::from(fps.numer()));
            info!(
                fps = format!("{}/{}", fps.numer(), fps.denom()),
                resolution = format!("{}x{}", info.width(), info.height()),
                "detected video framerate"
            );
            return detected.max(MIN_FRAME_DURATION);
        }

        DEFAULT_FRAME_DURATION
    }

    fn setup_appsink_callback(appsink: &gstreamer_app::AppSink, frame_queue: SharedFrameQueue) {
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| Self::handle_sample(appsink, &frame_queue))
                .build(),
        );
    }

    fn handle_sample(
        appsink: &gstreamer_app::AppSink,
        frame_queue: &SharedFrameQueue,
    ) -> Result<gstreamer::FlowSuccess, gstreamer::FlowError> {
        let sample = match appsink.pull_sample() {
            Ok(sample) => sample,
            Err(why) => {
                warn!(?why, "pull_sample failed");
                return Ok(gstreamer::FlowSuccess::Ok);
            }
        };

        let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) else {
            return Ok(gstreamer::FlowSuccess::Ok);
        };

        let Ok(info) = gstreamer_video::VideoInfo::from_caps(caps) else {
            return Ok(gstreamer::FlowSuccess::Ok);
        };

        let Ok(map) = buffer.map_readable() else {
            tracing::trace!("skipped frame: buffer map blocked");
            return Ok(gstreamer::FlowSuccess::Ok);
        };

        let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
        let Some(image) =
            frame_queue::rgba_from_plane(map.as_slice(), info.width(), info.height(), stride)
        else {
            error!(len = map.size(), "buffer size mismatch");
            return Ok(gstreamer::FlowSuccess::Ok);
        };

        let pts = buffer.pts().map(|pts| pts.nseconds());
        if frame_queue.push(Frame::new(image, pts)) {
            Ok(gstreamer::FlowSuccess::Ok)
        } else {
            Err(gstreamer::FlowError::Flushing)
        }
    }

    /// Seek to the beginning for looping.
    fn seek_to_start(&self) -> Result<(), PlaybackError> {
        let seek_flags = gstreamer::SeekFlags::FLUSH
            | gstreamer::SeekFlags::KEY_UNIT
            | gstreamer::SeekFlags::SNAP_BEFORE;

        self.pipeline
            .seek_simple(seek_flags, gstreamer::ClockTime::ZERO)
            .map_err(|why| PlaybackError::Pipeline(why.to_string()))
    }
}

impl Pipeline for VideoPlayer {
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|why| PlaybackError::Pipeline(format!("failed to start pipeline: {why:?}")))?;
        Ok(())
    }

    fn pause(&mut self) {
        if let Err(why) = self.pipeline.set_state(gstreamer::State::Paused) {
            warn!(?why, "failed to pause pipeline");
        }
    }

    fn stop(&mut self) {
        self.frame_queue.stop();
        debug!(
            path = %self.source_path.display(),
            dropped = self.frame_queue.dropped(),
            "stopping video pipeline"
        );
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }

    fn poll(&mut self) -> Result<(), PlaybackError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };

        while let Some(msg) = bus.pop() {
            use gstreamer::MessageView;

            match msg.view() {
                MessageView::Eos(_) => {
                    let loop_num = self.loop_count.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(loop_num, path = %self.source_path.display(), "video EOS, seeking to start");
                    self.seek_to_start()?;
                }
                MessageView::Error(err) => {
                    error!(
                        src = ?err.src().map(|s| s.path_string()),
                        error = %err.error(),
                        "GStreamer pipeline error"
                    );
                    return Err(PlaybackError::Pipeline(err.error().to_string()));
                }
                MessageView::Warning(warning) => {
                    warn!(
                        src = ?warning.src().map(|s| s.path_string()),
                        error = %warning.error(),
                        "GStreamer pipeline warning"
                    );
                }
                MessageView::StateChanged(state) => {
                    if state.src().is_some_and(|s| s == &self.pipeline) {
                        debug!(old = ?state.old(), new = ?state.current(), "pipeline state changed");
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn next_frame(&mut self) -> Option<Frame> {
        self.frame_queue.try_pop()
    }

    fn frame_duration(&self) -> Duration {
        self.frame_duration
    }
}

impl std::fmt::Debug for VideoPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPlayer")
            .field("source_path", &self.source_path)
            .field("frame_duration", &self.frame_duration)
            .field("queued", &self.frame_queue.len())
            .finish()
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
