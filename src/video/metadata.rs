// SPDX-License-Identifier: MPL-2.0

//! Duration, dimensions, size and thumbnail extraction for local video files.

use std::{io::Cursor, path::Path, time::Duration};

use gstreamer::prelude::*;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use super::frame_queue::rgba_from_plane;
use super::player::{self, GstMedia, PREROLL_TIMEOUT};

/// Longest edge of generated thumbnails.
pub const THUMBNAIL_EDGE: u32 = 640;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to read media file")]
    Io(#[from] std::io::Error),
    #[error("not playable video: {0}")]
    Unplayable(String),
    #[error("no frame could be sampled: {0}")]
    Thumbnail(String),
}

/// Derived fields of a video file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub duration_secs: Option<f64>,
    /// Display width, after any embedded rotation.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: Option<u64>,
    /// PNG-encoded still frame.
    pub thumbnail_png: Option<Vec<u8>>,
}

/// Extracts [`Metadata`] from local media.
///
/// Runs on worker threads, so implementations are shared across them.
pub trait MediaInspector: Send + Sync {
    /// Checks that `path` opens as playable video.
    fn validate(&self, path: &Path) -> Result<(), MetadataError>;

    /// Fails as a whole when no thumbnail can be rendered; callers then
    /// leave every derived field absent.
    fn inspect(&self, path: &Path) -> Result<Metadata, MetadataError>;

    /// Renders just the thumbnail of `path`.
    fn thumbnail(&self, path: &Path) -> Result<Vec<u8>, MetadataError> {
        self.inspect(path)?
            .thumbnail_png
            .ok_or_else(|| MetadataError::Thumbnail(path.display().to_string()))
    }
}

/// Point in the video the thumbnail is taken from.
///
/// Videos longer than a second are sampled at `min(1s, duration / 2)`,
/// anything shorter (or of unknown length) at the first frame.
#[must_use]
pub fn thumbnail_sample_time(duration_secs: Option<f64>) -> Duration {
    match duration_secs {
        Some(secs) if secs.is_finite() && secs > 1.0 => Duration::from_secs_f64((secs / 2.0).min(1.0)),
        _ => Duration::ZERO,
    }
}

/// Rotation recorded in a video's `image-orientation` tag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
}

impl Orientation {
    /// Parses GStreamer tag values such as `rotate-90` or `flip-rotate-0`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "rotate-90" => Self::Rotate90,
            "rotate-180" => Self::Rotate180,
            "rotate-270" => Self::Rotate270,
            "flip-rotate-0" => Self::FlipHorizontal,
            "flip-rotate-180" => Self::FlipVertical,
            _ => Self::Identity,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }

    /// Natural `(width, height)` corrected by this orientation.
    pub fn oriented_dimensions(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Self::Identity => image,
            Self::Rotate90 => image.rotate90(),
            Self::Rotate180 => image.rotate180(),
            Self::Rotate270 => image.rotate270(),
            Self::FlipHorizontal => image.fliph(),
            Self::FlipVertical => image.flipv(),
        }
    }
}

/// Encodes a frame as a PNG no larger than [`THUMBNAIL_EDGE`] on either side.
pub fn encode_thumbnail(image: DynamicImage) -> Result<Vec<u8>, MetadataError> {
    let thumbnail = image.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE);
    let mut png = Vec::new();
    thumbnail
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|why| MetadataError::Thumbnail(why.to_string()))?;
    Ok(png)
}

impl MediaInspector for GstMedia {
    fn validate(&self, path: &Path) -> Result<(), MetadataError> {
        let (pipeline, _sink) = player::launch(path, "", "sync=false max-buffers=1")
            .map_err(|reason| MetadataError::Unplayable(format!("{}: {reason}", path.display())))?;
        let result = player::preroll(&pipeline);
        let _ = pipeline.set_state(gstreamer::State::Null);
        result.map_err(|reason| MetadataError::Unplayable(format!("{}: {reason}", path.display())))
    }

    fn inspect(&self, path: &Path) -> Result<Metadata, MetadataError> {
        let size_bytes = std::fs::metadata(path)?.len();

        let (pipeline, appsink) = player::launch(path, "", "sync=false max-buffers=1")
            .map_err(MetadataError::Unplayable)?;

        let result = inspect_pipeline(&pipeline, &appsink, path);
        let _ = pipeline.set_state(gstreamer::State::Null);

        let mut metadata = result?;
        metadata.size_bytes = Some(size_bytes);
        Ok(metadata)
    }
}

fn inspect_pipeline(
    pipeline: &gstreamer::Pipeline,
    appsink: &gstreamer_app::AppSink,
    path: &Path,
) -> Result<Metadata, MetadataError> {
    player::preroll(pipeline).map_err(MetadataError::Unplayable)?;

    let duration_secs = pipeline
        .query_duration::<gstreamer::ClockTime>()
        .map(|duration| duration.nseconds() as f64 / 1_000_000_000.0);

    let orientation = pending_orientation(pipeline);

    let dimensions = appsink
        .static_pad("sink")
        .and_then(|pad| pad.current_caps())
        .and_then(|caps| gstreamer_video::VideoInfo::from_caps(&caps).ok())
        .map(|info| orientation.oriented_dimensions(info.width(), info.height()));

    // without a thumbnail the whole extraction counts as failed
    let frame = sample_frame(pipeline, appsink, duration_secs)?;
    let thumbnail_png = encode_thumbnail(orientation.apply(frame))?;

    debug!(
        path = %path.display(),
        ?duration_secs,
        ?dimensions,
        orientation = ?orientation,
        "extracted video metadata"
    );

    Ok(Metadata {
        duration_secs,
        width: dimensions.map(|(w, _)| w),
        height: dimensions.map(|(_, h)| h),
        size_bytes: None,
        thumbnail_png: Some(thumbnail_png),
    })
}

/// Orientation from tag messages posted during preroll.
fn pending_orientation(pipeline: &gstreamer::Pipeline) -> Orientation {
    let Some(bus) = pipeline.bus() else {
        return Orientation::Identity;
    };

    let mut orientation = Orientation::Identity;
    while let Some(msg) = bus.pop_filtered(&[gstreamer::MessageType::Tag]) {
        let gstreamer::MessageView::Tag(tag) = msg.view() else {
            continue;
        };
        let tags = tag.tags();
        if let Some(value) = tags.get::<gstreamer::tags::ImageOrientation>() {
            orientation = Orientation::from_tag(value.get());
        }
    }
    orientation
}

fn sample_frame(
    pipeline: &gstreamer::Pipeline,
    appsink: &gstreamer_app::AppSink,
    duration_secs: Option<f64>,
) -> Result<DynamicImage, MetadataError> {
    let at = thumbnail_sample_time(duration_secs);
    if !at.is_zero() {
        let position = gstreamer::ClockTime::from_nseconds(at.as_nanos() as u64);
        pipeline
            .seek_simple(
                gstreamer::SeekFlags::FLUSH | gstreamer::SeekFlags::ACCURATE,
                position,
            )
            .map_err(|why| MetadataError::Thumbnail(why.to_string()))?;

        let timeout = gstreamer::ClockTime::from_mseconds(PREROLL_TIMEOUT.as_millis() as u64);
        let (result, _, _) = pipeline.state(timeout);
        result.map_err(|why| MetadataError::Thumbnail(format!("{why:?}")))?;
    }

    let sample = appsink
        .pull_preroll()
        .map_err(|why| MetadataError::Thumbnail(why.to_string()))?;

    let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) else {
        return Err(MetadataError::Thumbnail("empty preroll sample".into()));
    };

    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|why| MetadataError::Thumbnail(why.to_string()))?;
    let map = buffer
        .map_readable()
        .map_err(|why| MetadataError::Thumbnail(why.to_string()))?;

    let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
    rgba_from_plane(map.as_slice(), info.width(), info.height(), stride)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| MetadataError::Thumbnail("buffer size mismatch".into()))
}
