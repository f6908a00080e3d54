// SPDX-License-Identifier: MPL-2.0

use std::{path::Path, time::Duration};

use live_bg_config::AspectMode;

use super::*;
use crate::topology::Rect;
use crate::topology::fake::{FakeHost, FakeSurface};
use crate::video::fake::FakeBackend;

fn compositor(host: &mut FakeHost) -> (Compositor<FakeBackend, FakeSurface>, FakeBackend) {
    let backend = FakeBackend::default();
    let mut compositor = Compositor::new(backend.clone(), AspectMode::Fill);
    compositor.sync(host);
    (compositor, backend)
}

fn assert_layers_bound(compositor: &Compositor<FakeBackend, FakeSurface>) {
    let session = compositor.session_id().unwrap();
    assert_eq!(compositor.layers().len(), compositor.tracker().len());
    for (id, layer) in compositor.layers() {
        assert!(compositor.tracker().contains(*id));
        assert_eq!(layer.session, session);
    }
}

#[test]
fn test_play_attaches_layer_per_surface() {
    let mut host = FakeHost::with_displays(2);
    let (mut compositor, backend) = compositor(&mut host);

    compositor.play(Path::new("/lib/a.mp4")).unwrap();

    assert_eq!(compositor.source(), Some(Path::new("/lib/a.mp4")));
    assert_eq!(backend.live(), 1);
    assert_eq!(backend.playing(), 1);
    assert_layers_bound(&compositor);
    assert_eq!(compositor.layers().len(), 2);
}

#[test]
fn test_display_removal_keeps_session() {
    let mut host = FakeHost::with_displays(2);
    let (mut compositor, backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    let session = compositor.session_id();

    host.detach(1);
    compositor.handle_host_event(HostEvent::DisplaysChanged, &mut host);

    assert_eq!(compositor.tracker().len(), 1);
    assert_eq!(host.alive(), 1);
    assert_eq!(compositor.layers().len(), 1);
    assert_eq!(compositor.session_id(), session);
    assert_layers_bound(&compositor);
    // the pipeline survived the topology change
    assert_eq!(backend.opened().len(), 1);
    assert_eq!(backend.live(), 1);
}

#[test]
fn test_reattach_is_idempotent() {
    let mut host = FakeHost::with_displays(3);
    let (mut compositor, _backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();

    for _ in 0..5 {
        compositor.reattach();
        compositor.sync(&mut host);
    }

    assert_eq!(compositor.layers().len(), 3);
    assert_eq!(host.alive(), 3);
    assert_layers_bound(&compositor);
}

#[test]
fn test_layers_follow_display_frames() {
    let mut host = FakeHost::with_displays(1);
    let (mut compositor, _backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();

    host.displays[0].frame = Rect::new(0, 0, 2560, 1440);
    compositor.handle_host_event(HostEvent::SpaceChanged, &mut host);

    let layer = compositor.layers().values().next().unwrap();
    assert_eq!(layer.bounds, Rect::new(0, 0, 2560, 1440));
}

#[test]
fn test_unplayable_source_keeps_current_session() {
    let mut host = FakeHost::with_displays(2);
    let (mut compositor, backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    let session = compositor.session_id();

    backend.reject("/lib/broken.mp4");
    let result = compositor.play(Path::new("/lib/broken.mp4"));

    assert!(matches!(result, Err(PlaybackError::Unopenable { .. })));
    assert_eq!(compositor.session_id(), session);
    assert_eq!(compositor.source(), Some(Path::new("/lib/a.mp4")));
    assert_eq!(backend.live(), 1);
    assert_eq!(compositor.layers().len(), 2);
}

#[test]
fn test_play_replaces_previous_session() {
    let mut host = FakeHost::with_displays(1);
    let (mut compositor, backend) = compositor(&mut host);

    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    let first = compositor.session_id().unwrap();
    compositor.play(Path::new("/lib/b.mp4")).unwrap();
    let second = compositor.session_id().unwrap();

    assert_ne!(first, second);
    assert_eq!(backend.live(), 1);
    assert_eq!(backend.opened().len(), 2);
    assert_layers_bound(&compositor);
}

#[test]
fn test_play_opens_source_once() {
    let mut host = FakeHost::with_displays(1);
    let (mut compositor, backend) = compositor(&mut host);

    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    assert_eq!(backend.opened(), vec![Path::new("/lib/a.mp4").to_path_buf()]);

    backend.reject("/lib/broken.mp4");
    assert!(compositor.play(Path::new("/lib/broken.mp4")).is_err());
    assert_eq!(backend.opened().len(), 1);
    assert_eq!(backend.playing(), 1);

    compositor.play(Path::new("/lib/c.mp4")).unwrap();
    assert_eq!(backend.opened().len(), 2);
    assert_eq!(backend.live(), 1);
}

#[test]
fn test_aspect_change_updates_layers_in_place() {
    let mut host = FakeHost::with_displays(2);
    let (mut compositor, backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    let session = compositor.session_id();

    compositor.set_aspect_mode(AspectMode::Fit);

    assert_eq!(compositor.aspect_mode(), AspectMode::Fit);
    assert!(compositor.layers().values().all(|l| l.aspect == AspectMode::Fit));
    assert_eq!(compositor.session_id(), session);
    assert_eq!(backend.opened().len(), 1);
    assert_eq!(backend.playing(), 1);

    // surfaces added later pick up the new mode too
    host.attach(5, Rect::new(3840, 0, 1280, 1024));
    compositor.handle_host_event(HostEvent::DisplaysChanged, &mut host);
    assert_eq!(compositor.layers()[&DisplayId(5)].aspect, AspectMode::Fit);
}

#[test]
fn test_frames_fan_out_to_every_surface() {
    let mut host = FakeHost::with_displays(1);
    host.attach(1, Rect::new(1920, 0, 800, 600));
    let (mut compositor, _backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();

    assert!(compositor.render_frame());

    let primary = compositor.tracker().surface(DisplayId(0)).unwrap();
    let secondary = compositor.tracker().surface(DisplayId(1)).unwrap();
    assert_eq!(primary.presented, vec![(1920, 1080)]);
    assert_eq!(secondary.presented, vec![(800, 600)]);
}

#[test]
fn test_pause_and_resume() {
    let mut host = FakeHost::with_displays(1);
    let (mut compositor, backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();

    compositor.handle_host_event(HostEvent::Sleep, &mut host);
    assert!(compositor.is_paused());
    assert_eq!(backend.playing(), 0);
    assert!(!compositor.render_frame());

    // a new source while asleep stays paused
    compositor.play(Path::new("/lib/b.mp4")).unwrap();
    assert_eq!(backend.playing(), 0);

    compositor.handle_host_event(HostEvent::Wake, &mut host);
    assert!(!compositor.is_paused());
    assert_eq!(backend.playing(), 1);
    assert!(compositor.render_frame());
}

#[test]
fn test_pipeline_error_keeps_last_frame() {
    let mut host = FakeHost::with_displays(1);
    let (mut compositor, backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    assert!(compositor.render_frame());

    backend.fail_next_poll();
    assert!(!compositor.render_frame());
    assert!(matches!(compositor.take_error(), Some(PlaybackError::Pipeline(_))));
    assert!(compositor.take_error().is_none());

    // the frame is still shown and re-presented on reattach
    let surface = compositor.tracker().surface(DisplayId(0)).unwrap();
    assert_eq!(surface.cleared, 0);
    compositor.reattach();
    let surface = compositor.tracker().surface(DisplayId(0)).unwrap();
    assert_eq!(surface.presented.len(), 2);
}

#[test]
fn test_liveness_reasserts_and_reattaches() {
    let mut host = FakeHost::with_displays(2);
    let (mut compositor, _backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();

    compositor.tracker_mut().surface_mut(DisplayId(1)).unwrap().visible = false;
    assert_eq!(compositor.check_liveness(&mut host), 1);
    assert!(compositor.tracker().surface(DisplayId(1)).unwrap().visible);
    assert_eq!(compositor.check_liveness(&mut host), 0);
    assert_layers_bound(&compositor);
}

#[test]
fn test_empty_topology_plays_nowhere() {
    let mut host = FakeHost::default();
    let (mut compositor, _backend) = compositor(&mut host);

    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    assert!(compositor.layers().is_empty());
    assert!(compositor.render_frame());
}

#[test]
fn test_commands_redispatch_from_other_threads() {
    let mut event_loop: calloop::EventLoop<Vec<Command>> = calloop::EventLoop::try_new().unwrap();
    let (handle, channel) = CompositorHandle::new();
    event_loop
        .handle()
        .insert_source(channel, |event, _, received: &mut Vec<Command>| {
            if let calloop::channel::Event::Msg(command) = event {
                received.push(command);
            }
        })
        .unwrap();

    let remote = handle.clone();
    std::thread::spawn(move || {
        remote.set_aspect_mode(AspectMode::Original);
        remote.set_aspect_mode(AspectMode::Fit);
    })
    .join()
    .unwrap();

    let mut received = Vec::new();
    event_loop
        .dispatch(Some(Duration::from_millis(100)), &mut received)
        .unwrap();

    assert_eq!(
        received,
        vec![
            Command::SetAspect(AspectMode::Original),
            Command::SetAspect(AspectMode::Fit)
        ]
    );

    let mut host = FakeHost::with_displays(1);
    let (mut compositor, _backend) = compositor(&mut host);
    compositor.play(Path::new("/lib/a.mp4")).unwrap();
    let session = compositor.session_id();
    for command in received {
        compositor.execute(command);
    }
    assert_eq!(compositor.aspect_mode(), AspectMode::Fit);
    assert_eq!(compositor.session_id(), session);
}
