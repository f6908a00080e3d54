// SPDX-License-Identifier: MPL-2.0

//! Layer-shell implementation of the topology host.
//!
//! Every `wl_output` becomes a [`Display`]; each display gets one
//! `Background` layer surface anchored to all edges, with an empty input
//! region so clicks reach the desktop below.

use std::collections::HashSet;

use image::RgbaImage;
use sctk::{
    compositor::{CompositorState, Region},
    output::{OutputInfo, OutputState},
    reexports::client::{
        QueueHandle,
        protocol::{wl_output::WlOutput, wl_shm},
    },
    shell::{
        WaylandSurface as _,
        wlr_layer::{Anchor, KeyboardInteractivity, Layer, LayerShell, LayerSurface},
    },
    shm::{Shm, slot::SlotPool},
};
use tracing::{debug, error};

use crate::LiveBg;
use crate::topology::{Display, DisplayHost, DisplayId, Rect, Surface, SurfaceError};

const NAMESPACE: &str = "wallpaper";

/// The Wayland globals needed to enumerate outputs and create surfaces.
pub struct WaylandHost {
    pub output_state: OutputState,
    pub compositor_state: CompositorState,
    pub layer_shell: LayerShell,
    pub shm: Shm,
    qh: QueueHandle<LiveBg>,
    /// Outputs whose global was removed but may still linger in `output_state`.
    gone: HashSet<u32>,
}

impl WaylandHost {
    pub fn new(
        output_state: OutputState,
        compositor_state: CompositorState,
        layer_shell: LayerShell,
        shm: Shm,
        qh: QueueHandle<LiveBg>,
    ) -> Self {
        Self {
            output_state,
            compositor_state,
            layer_shell,
            shm,
            qh,
            gone: HashSet::new(),
        }
    }

    /// Excludes `output` from [`DisplayHost::displays`] from now on.
    pub fn forget(&mut self, output: &WlOutput) {
        if let Some(info) = self.output_state.info(output) {
            self.gone.insert(info.id);
        }
    }

    fn output_for(&self, id: DisplayId) -> Option<WlOutput> {
        self.output_state.outputs().find(|output| {
            self.output_state
                .info(output)
                .is_some_and(|info| info.id == id.0)
        })
    }
}

fn display_frame(info: &OutputInfo) -> Rect {
    let (x, y) = info.logical_position.unwrap_or((0, 0));
    let (width, height) = info
        .logical_size
        .or_else(|| {
            info.modes
                .iter()
                .find(|mode| mode.current)
                .map(|mode| mode.dimensions)
        })
        .unwrap_or((0, 0));

    Rect::new(x, y, width.max(0) as u32, height.max(0) as u32)
}

impl DisplayHost for WaylandHost {
    type Surface = WaylandSurface;

    fn displays(&self) -> Vec<Display> {
        self.output_state
            .outputs()
            .filter_map(|output| self.output_state.info(&output))
            .filter(|info| !self.gone.contains(&info.id))
            .map(|info| Display {
                id: DisplayId(info.id),
                frame: display_frame(&info),
                name: info.name,
            })
            .collect()
    }

    fn create_surface(&mut self, display: &Display) -> Result<WaylandSurface, SurfaceError> {
        let output = self
            .output_for(display.id)
            .ok_or(SurfaceError::DisplayGone(display.id))?;

        let surface = self.compositor_state.create_surface(&self.qh);

        // click-through
        let region = Region::new(&self.compositor_state)
            .map_err(|why| SurfaceError::Host(why.to_string()))?;
        surface.set_input_region(Some(region.wl_region()));

        let layer = self.layer_shell.create_layer_surface(
            &self.qh,
            surface,
            Layer::Background,
            Some(NAMESPACE),
            Some(&output),
        );

        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.commit();

        let len = (display.frame.width as usize * display.frame.height as usize * 4).max(4);
        let pool =
            SlotPool::new(len, &self.shm).map_err(|why| SurfaceError::Host(why.to_string()))?;

        debug!(display = %display.id, name = ?display.name, "created layer surface");

        Ok(WaylandSurface {
            layer,
            output,
            pool,
            frame: display.frame,
            size: None,
            closed: false,
            left: false,
        })
    }
}

/// A `Background` layer surface bound to one output.
#[derive(Debug)]
pub struct WaylandSurface {
    layer: LayerSurface,
    output: WlOutput,
    pool: SlotPool,
    frame: Rect,
    /// Size from the last configure; nothing is drawn before the first one.
    size: Option<(u32, u32)>,
    closed: bool,
    left: bool,
}

impl WaylandSurface {
    pub fn layer(&self) -> &LayerSurface {
        &self.layer
    }

    pub fn output(&self) -> &WlOutput {
        &self.output
    }

    /// Applies a configure event. Returns whether the buffer size changed.
    pub fn configure(&mut self, new_size: (u32, u32)) -> bool {
        let size = match new_size {
            (0, _) | (_, 0) => (self.frame.width, self.frame.height),
            size => size,
        };
        self.size.replace(size) != Some(size)
    }

    pub fn is_configured(&self) -> bool {
        self.size.is_some()
    }

    /// The compositor destroyed the surface, it has to be recreated.
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn set_on_output(&mut self, on_output: bool) {
        self.left = !on_output;
    }

    fn draw(&mut self, fill: impl FnOnce(&mut [u8])) {
        let Some((width, height)) = self.size.filter(|(w, h)| *w > 0 && *h > 0) else {
            return;
        };
        if self.closed {
            return;
        }

        let stride = width as i32 * 4;
        let len = stride as usize * height as usize;
        if self.pool.len() < len {
            if let Err(why) = self.pool.resize(len) {
                error!(?why, "failed to resize the buffer pool");
                return;
            }
        }

        let (buffer, canvas) = match self.pool.create_buffer(
            width as i32,
            height as i32,
            stride,
            wl_shm::Format::Xrgb8888,
        ) {
            Ok(created) => created,
            Err(why) => {
                error!(?why, "failed to create buffer");
                return;
            }
        };

        fill(canvas);

        let wl_surface = self.layer.wl_surface();
        wl_surface.damage_buffer(0, 0, width as i32, height as i32);

        if let Err(why) = buffer.attach_to(wl_surface) {
            error!(?why, "buffer attachment failed");
            return;
        }

        wl_surface.commit();
    }
}

impl Surface for WaylandSurface {
    fn frame(&self) -> Rect {
        self.frame
    }

    fn set_frame(&mut self, frame: Rect) {
        // anchored to every edge, the compositor sends the new size itself
        self.frame = frame;
    }

    fn is_visible(&self) -> bool {
        !self.closed && !self.left
    }

    fn reassert(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.left = false;
        self.layer.set_layer(Layer::Background);
        self.layer.commit();
        true
    }

    fn buffer_size(&self) -> (u32, u32) {
        self.size.unwrap_or((0, 0))
    }

    fn present(&mut self, image: &RgbaImage) {
        if Some(image.dimensions()) != self.size {
            debug!(
                image = ?image.dimensions(),
                surface = ?self.size,
                "skipping frame composed for a stale size"
            );
            return;
        }
        self.draw(|canvas| xrgb8888_canvas(canvas, image));
    }

    fn clear(&mut self) {
        self.draw(|canvas| canvas.fill(0));
    }
}

/// Writes RGBA pixels as little-endian `XRGB8888`.
pub fn xrgb8888_canvas(canvas: &mut [u8], image: &RgbaImage) {
    for (dest, pixel) in canvas.chunks_exact_mut(4).zip(image.pixels()) {
        let [r, g, b, _] = pixel.0;

        let r = u32::from(r) << 16;
        let g = u32::from(g) << 8;
        let b = u32::from(b);

        dest.copy_from_slice(&(r | g | b).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xrgb_canvas_packs_little_endian() {
        let image = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgba([0x11, 0x22, 0x33, 0x00])
            } else {
                image::Rgba([0xff, 0x00, 0x80, 0xff])
            }
        });
        let mut canvas = vec![0xaa; 8];

        xrgb8888_canvas(&mut canvas, &image);

        assert_eq!(canvas, [0x33, 0x22, 0x11, 0x00, 0x80, 0x00, 0xff, 0x00]);
    }
}
