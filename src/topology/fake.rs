// SPDX-License-Identifier: MPL-2.0

//! In-memory host used by the unit tests.

use std::{cell::Cell, collections::HashSet, rc::Rc};

use image::RgbaImage;

use super::{Display, DisplayHost, DisplayId, Rect, Surface, SurfaceError};

#[derive(Debug)]
pub struct FakeSurface {
    pub display: DisplayId,
    pub frame: Rect,
    pub visible: bool,
    pub revivable: bool,
    pub reasserted: usize,
    pub presented: Vec<(u32, u32)>,
    pub cleared: usize,
    alive: Rc<Cell<usize>>,
}

impl Drop for FakeSurface {
    fn drop(&mut self) {
        self.alive.set(self.alive.get() - 1);
    }
}

impl Surface for FakeSurface {
    fn frame(&self) -> Rect {
        self.frame
    }

    fn set_frame(&mut self, frame: Rect) {
        self.frame = frame;
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn reassert(&mut self) -> bool {
        self.reasserted += 1;
        if self.revivable {
            self.visible = true;
        }
        self.revivable
    }

    fn present(&mut self, image: &RgbaImage) {
        self.presented.push(image.dimensions());
    }

    fn clear(&mut self) {
        self.cleared += 1;
    }
}

#[derive(Debug, Default)]
pub struct FakeHost {
    pub displays: Vec<Display>,
    pub refuse: HashSet<DisplayId>,
    pub created: usize,
    alive: Rc<Cell<usize>>,
}

impl FakeHost {
    pub fn with_displays(count: u32) -> Self {
        let mut host = Self::default();
        for n in 0..count {
            host.attach(n, Rect::new(n as i32 * 1920, 0, 1920, 1080));
        }
        host
    }

    pub fn attach(&mut self, id: u32, frame: Rect) {
        self.displays.push(Display {
            id: DisplayId(id),
            name: Some(format!("DP-{id}")),
            frame,
        });
    }

    pub fn detach(&mut self, id: u32) {
        self.displays.retain(|d| d.id != DisplayId(id));
    }

    /// Number of surfaces created by this host that have not been dropped.
    pub fn alive(&self) -> usize {
        self.alive.get()
    }
}

impl DisplayHost for FakeHost {
    type Surface = FakeSurface;

    fn displays(&self) -> Vec<Display> {
        self.displays.clone()
    }

    fn create_surface(&mut self, display: &Display) -> Result<FakeSurface, SurfaceError> {
        if self.refuse.contains(&display.id) {
            return Err(SurfaceError::Host("refused".into()));
        }

        self.created += 1;
        self.alive.set(self.alive.get() + 1);
        Ok(FakeSurface {
            display: display.id,
            frame: Rect::default(),
            visible: true,
            revivable: true,
            reasserted: 0,
            presented: Vec::new(),
            cleared: 0,
            alive: Rc::clone(&self.alive),
        })
    }
}
