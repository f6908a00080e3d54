// SPDX-License-Identifier: MPL-2.0

//! In-memory video backend and inspector for tests.

use std::{
    cell::RefCell,
    collections::HashSet,
    path::{Path, PathBuf},
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use image::{DynamicImage, Rgba, RgbaImage};

use super::metadata::encode_thumbnail;
use super::{
    Frame, MediaInspector, Metadata, MetadataError, Pipeline, PlaybackError, VideoBackend,
};

#[derive(Debug, Default)]
pub struct FakeState {
    pub unplayable: HashSet<PathBuf>,
    pub opened: Vec<PathBuf>,
    /// Pipelines built and not yet stopped.
    pub live: usize,
    pub playing: usize,
    /// The next `poll` on any pipeline reports a decode error.
    pub fail_poll: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeBackend {
    pub fn reject(&self, path: impl Into<PathBuf>) {
        self.state.borrow_mut().unplayable.insert(path.into());
    }

    pub fn live(&self) -> usize {
        self.state.borrow().live
    }

    pub fn playing(&self) -> usize {
        self.state.borrow().playing
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.state.borrow().opened.clone()
    }

    pub fn fail_next_poll(&self) {
        self.state.borrow_mut().fail_poll = true;
    }
}

impl VideoBackend for FakeBackend {
    type Pipeline = FakePipeline;

    fn open(&self, path: &Path) -> Result<FakePipeline, PlaybackError> {
        let mut state = self.state.borrow_mut();
        if state.unplayable.contains(path) {
            return Err(PlaybackError::Unopenable {
                path: path.to_path_buf(),
                reason: "no video stream".into(),
            });
        }
        state.opened.push(path.to_path_buf());
        state.live += 1;
        Ok(FakePipeline {
            state: Rc::clone(&self.state),
            playing: false,
            stopped: false,
        })
    }
}

#[derive(Debug)]
pub struct FakePipeline {
    state: Rc<RefCell<FakeState>>,
    playing: bool,
    stopped: bool,
}

impl Pipeline for FakePipeline {
    fn play(&mut self) -> Result<(), PlaybackError> {
        if !self.playing && !self.stopped {
            self.playing = true;
            self.state.borrow_mut().playing += 1;
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.playing {
            self.playing = false;
            self.state.borrow_mut().playing -= 1;
        }
    }

    fn stop(&mut self) {
        self.pause();
        if !self.stopped {
            self.stopped = true;
            self.state.borrow_mut().live -= 1;
        }
    }

    fn poll(&mut self) -> Result<(), PlaybackError> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.fail_poll) {
            return Err(PlaybackError::Pipeline("decode error".into()));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Option<Frame> {
        self.playing
            .then(|| Frame::new(RgbaImage::from_pixel(32, 18, Rgba([200, 40, 40, 255])), None))
    }
}

/// Treats files whose contents start with `garbage` as unplayable.
#[derive(Debug, Default)]
pub struct FakeInspector {
    pub inspections: AtomicUsize,
}

impl FakeInspector {
    pub fn inspections(&self) -> usize {
        self.inspections.load(Ordering::SeqCst)
    }
}

impl MediaInspector for FakeInspector {
    fn validate(&self, path: &Path) -> Result<(), MetadataError> {
        let contents = std::fs::read(path)?;
        if contents.starts_with(b"garbage") {
            return Err(MetadataError::Unplayable(format!(
                "{} has no video track",
                path.display()
            )));
        }
        Ok(())
    }

    fn inspect(&self, path: &Path) -> Result<Metadata, MetadataError> {
        self.validate(path)?;
        self.inspections.fetch_add(1, Ordering::SeqCst);
        Ok(Metadata {
            duration_secs: Some(12.0),
            width: Some(1920),
            height: Some(1080),
            size_bytes: Some(std::fs::metadata(path)?.len()),
            thumbnail_png: Some(encode_thumbnail(DynamicImage::new_rgba8(16, 9))?),
        })
    }
}
