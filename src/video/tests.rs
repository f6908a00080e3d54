// SPDX-License-Identifier: MPL-2.0

use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, GenericImageView};

use super::fake::{FakeBackend, FakeInspector};
use super::metadata::encode_thumbnail;
use super::*;

#[test]
fn test_thumbnail_sample_time() {
    assert_eq!(thumbnail_sample_time(None), Duration::ZERO);
    assert_eq!(thumbnail_sample_time(Some(0.4)), Duration::ZERO);
    assert_eq!(thumbnail_sample_time(Some(1.0)), Duration::ZERO);
    assert_eq!(thumbnail_sample_time(Some(1.5)), Duration::from_millis(750));
    assert_eq!(thumbnail_sample_time(Some(2.0)), Duration::from_secs(1));
    assert_eq!(thumbnail_sample_time(Some(600.0)), Duration::from_secs(1));
    assert_eq!(thumbnail_sample_time(Some(f64::NAN)), Duration::ZERO);
}

#[test]
fn test_orientation_from_tag() {
    assert_eq!(Orientation::from_tag("rotate-0"), Orientation::Identity);
    assert_eq!(Orientation::from_tag("rotate-90"), Orientation::Rotate90);
    assert_eq!(Orientation::from_tag("rotate-270"), Orientation::Rotate270);
    assert_eq!(Orientation::from_tag("flip-rotate-0"), Orientation::FlipHorizontal);
    assert_eq!(Orientation::from_tag("sideways"), Orientation::Identity);
}

#[test]
fn test_oriented_dimensions() {
    assert_eq!(Orientation::Identity.oriented_dimensions(1920, 1080), (1920, 1080));
    assert_eq!(Orientation::Rotate90.oriented_dimensions(1920, 1080), (1080, 1920));
    assert_eq!(Orientation::Rotate180.oriented_dimensions(1920, 1080), (1920, 1080));
    assert_eq!(Orientation::Rotate270.oriented_dimensions(1920, 1080), (1080, 1920));
}

#[test]
fn test_orientation_rotates_thumbnail() {
    let frame = DynamicImage::new_rgba8(40, 10);
    assert_eq!(Orientation::Rotate90.apply(frame.clone()).dimensions(), (10, 40));
    assert_eq!(Orientation::FlipVertical.apply(frame).dimensions(), (40, 10));
}

#[test]
fn test_encode_thumbnail_bounds_size() {
    let png = encode_thumbnail(DynamicImage::new_rgba8(1920, 1080)).unwrap();
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!(decoded.dimensions(), (640, 360));
}

#[test]
fn test_session_tick_reports_error_once() {
    let backend = FakeBackend::default();
    let pipeline = backend.open(Path::new("/lib/a.mp4")).unwrap();
    let mut session = PlaybackSession::new(SessionId(1), Path::new("/lib/a.mp4"), pipeline);

    assert!(session.is_muted());
    assert!(session.is_looping());

    session.play().unwrap();
    assert!(session.tick().unwrap().is_some());

    backend.fail_next_poll();
    assert!(matches!(session.tick(), Err(PlaybackError::Pipeline(_))));
    assert!(session.has_failed());
    assert!(session.tick().unwrap().is_none());
    assert_eq!(backend.live(), 0);
}

#[test]
fn test_dropping_session_stops_pipeline() {
    let backend = FakeBackend::default();
    let pipeline = backend.open(Path::new("/lib/a.mp4")).unwrap();
    let mut session = PlaybackSession::new(SessionId(7), Path::new("/lib/a.mp4"), pipeline);
    session.play().unwrap();
    assert_eq!(backend.playing(), 1);

    drop(session);
    assert_eq!(backend.live(), 0);
    assert_eq!(backend.playing(), 0);
}

#[test]
fn test_fake_inspector_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("clip.mp4");
    let bad = dir.path().join("bad.mp4");
    std::fs::write(&good, b"video bytes").unwrap();
    std::fs::write(&bad, b"garbage").unwrap();

    let inspector = FakeInspector::default();
    assert!(inspector.validate(&good).is_ok());
    assert!(matches!(inspector.validate(&bad), Err(MetadataError::Unplayable(_))));

    let metadata = inspector.inspect(&good).unwrap();
    assert_eq!(metadata.size_bytes, Some(11));
    assert!(metadata.thumbnail_png.is_some());
}
