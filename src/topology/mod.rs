// SPDX-License-Identifier: MPL-2.0

//! Display topology tracking.
//!
//! The tracker keeps exactly one desktop-level [`Surface`] per live display.
//! Surfaces come from a [`DisplayHost`], which is the windowing layer the
//! daemon runs under (see [`crate::wayland`]). Every host notification ends up
//! as a [`HostEvent`]; the compositor answers each of them with
//! [`TopologyTracker::sync`] followed by a reattach of its layers.

#[cfg(test)]
pub(crate) mod fake;

use std::{collections::BTreeMap, time::Duration};

use image::RgbaImage;
use tracing::{debug, info, warn};

/// Interval of the liveness check that re-asserts surface visibility.
pub const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// Stable identifier of a display for as long as it stays connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayId(pub u32);

impl std::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// Geometry of a display or surface in logical coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A display as enumerated by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Display {
    pub id: DisplayId,
    pub name: Option<String>,
    pub frame: Rect,
}

/// External notifications that may change what the surfaces look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// A display was attached, detached or changed its mode.
    DisplaysChanged,
    /// The active workspace changed.
    SpaceChanged,
    /// Another application gained focus.
    AppActivated,
    /// Focus left the previous application, e.g. for a screenshot tool.
    AppDeactivated,
    /// The machine is about to sleep.
    Sleep,
    /// The machine woke up.
    Wake,
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("display {0} is no longer available")]
    DisplayGone(DisplayId),
    #[error("the host refused to create a surface: {0}")]
    Host(String),
}

/// A borderless, input-transparent surface pinned below every application.
pub trait Surface {
    /// Current geometry of the surface.
    fn frame(&self) -> Rect;

    /// Moves and resizes the surface to the display frame.
    fn set_frame(&mut self, frame: Rect);

    /// Whether the surface is currently shown by the host.
    fn is_visible(&self) -> bool;

    /// Whether the host minimized or otherwise hid the surface.
    fn is_minimized(&self) -> bool {
        false
    }

    /// Re-shows the surface and restores its depth ordering.
    ///
    /// Returns `false` if the surface cannot be revived and has to be replaced.
    fn reassert(&mut self) -> bool;

    /// Pixel size of the buffers [`Surface::present`] expects.
    fn buffer_size(&self) -> (u32, u32) {
        let frame = self.frame();
        (frame.width, frame.height)
    }

    /// Presents composed pixels sized to [`Surface::buffer_size`].
    fn present(&mut self, image: &RgbaImage);

    /// Drops whatever content is currently presented.
    fn clear(&mut self);
}

/// The windowing layer that owns displays and hands out surfaces.
pub trait DisplayHost {
    type Surface: Surface;

    /// Enumerates the active displays. An empty list is valid.
    fn displays(&self) -> Vec<Display>;

    /// Creates a desktop-level surface covering `display`.
    fn create_surface(&mut self, display: &Display) -> Result<Self::Surface, SurfaceError>;
}

/// What a [`TopologyTracker::sync`] changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub destroyed: usize,
    pub failed: usize,
}

impl SyncReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.created > 0 || self.destroyed > 0
    }
}

/// Owns one surface per display known to the host.
#[derive(Debug)]
pub struct TopologyTracker<S> {
    surfaces: BTreeMap<DisplayId, S>,
}

impl<S> Default for TopologyTracker<S> {
    fn default() -> Self {
        Self {
            surfaces: BTreeMap::new(),
        }
    }
}

impl<S: Surface> TopologyTracker<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converges the surface set on the host's current displays.
    ///
    /// Surfaces of vanished displays are dropped, missing ones are created and
    /// every surviving surface is moved to its display's frame. Calling it
    /// again without a topology change is a no-op.
    pub fn sync<H>(&mut self, host: &mut H) -> SyncReport
    where
        H: DisplayHost<Surface = S>,
    {
        let displays = host.displays();
        let mut report = SyncReport::default();

        let before = self.surfaces.len();
        self.surfaces
            .retain(|id, _| displays.iter().any(|display| display.id == *id));
        report.destroyed = before - self.surfaces.len();

        for display in &displays {
            if let Some(surface) = self.surfaces.get_mut(&display.id) {
                if surface.frame() != display.frame {
                    surface.set_frame(display.frame);
                }
                continue;
            }

            match host.create_surface(display) {
                Ok(mut surface) => {
                    surface.set_frame(display.frame);
                    self.surfaces.insert(display.id, surface);
                    report.created += 1;
                }
                Err(why) => {
                    // retried on the next sync
                    warn!(display = %display.id, %why, "failed to create wallpaper surface");
                    report.failed += 1;
                }
            }
        }

        if report.changed() {
            info!(
                surfaces = self.surfaces.len(),
                created = report.created,
                destroyed = report.destroyed,
                "display topology changed"
            );
        }

        report
    }

    /// Re-asserts every surface the host hid or reordered behind our back.
    ///
    /// Surfaces that cannot be revived are replaced through a fresh sync.
    /// Returns the number of surfaces that needed attention.
    pub fn check_liveness<H>(&mut self, host: &mut H) -> usize
    where
        H: DisplayHost<Surface = S>,
    {
        let mut touched = 0;
        let mut dead = Vec::new();

        for (id, surface) in &mut self.surfaces {
            if surface.is_visible() && !surface.is_minimized() {
                continue;
            }

            touched += 1;
            if surface.reassert() {
                debug!(display = %id, "re-asserted hidden wallpaper surface");
            } else {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            for id in &dead {
                debug!(display = %id, "replacing wallpaper surface");
                self.surfaces.remove(id);
            }
            self.sync(host);
        }

        touched
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn contains(&self, id: DisplayId) -> bool {
        self.surfaces.contains_key(&id)
    }

    pub fn surface(&self, id: DisplayId) -> Option<&S> {
        self.surfaces.get(&id)
    }

    pub fn surface_mut(&mut self, id: DisplayId) -> Option<&mut S> {
        self.surfaces.get_mut(&id)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = (DisplayId, &S)> {
        self.surfaces.iter().map(|(id, surface)| (*id, surface))
    }

    pub fn surfaces_mut(&mut self) -> impl Iterator<Item = (DisplayId, &mut S)> {
        self.surfaces.iter_mut().map(|(id, surface)| (*id, surface))
    }
}
