// SPDX-License-Identifier: MPL-2.0-only

//! Composes decoded frames onto a surface for each aspect mode.

use fast_image_resize::{FilterType, ResizeAlg, ResizeError, ResizeOptions, Resizer};
use image::{Rgba, RgbaImage};
use live_bg_config::AspectMode;

const LETTERBOX: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Reusable resizer; holds scratch buffers between frames.
pub struct Scaler {
    resizer: Resizer,
    algorithm: ResizeAlg,
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scaler {
    pub fn new() -> Self {
        Self {
            resizer: Resizer::new(),
            algorithm: ResizeAlg::Convolution(FilterType::Bilinear),
        }
    }

    /// Renders `frame` into a `width`x`height` image.
    ///
    /// - `Fit` letterboxes the whole frame on black.
    /// - `Fill` covers the surface and crops the overflow evenly on both sides.
    /// - `Original` stretches the frame to the surface, ignoring its aspect.
    pub fn compose(
        &mut self,
        frame: &RgbaImage,
        mode: AspectMode,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, ResizeError> {
        let (src_w, src_h) = frame.dimensions();
        if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
            return Ok(RgbaImage::from_pixel(width, height, LETTERBOX));
        }

        match mode {
            AspectMode::Original => self.resize(frame, width, height, None),

            AspectMode::Fill => {
                let crop = fill_crop((src_w, src_h), (width, height));
                self.resize(frame, width, height, Some(crop))
            }

            AspectMode::Fit => {
                let (new_w, new_h) = fit_size((src_w, src_h), (width, height));
                let scaled = self.resize(frame, new_w, new_h, None)?;
                let mut canvas = RgbaImage::from_pixel(width, height, LETTERBOX);
                image::imageops::replace(
                    &mut canvas,
                    &scaled,
                    i64::from((width - new_w) / 2),
                    i64::from((height - new_h) / 2),
                );
                Ok(canvas)
            }
        }
    }

    fn resize(
        &mut self,
        frame: &RgbaImage,
        width: u32,
        height: u32,
        crop: Option<(f64, f64, f64, f64)>,
    ) -> Result<RgbaImage, ResizeError> {
        if frame.dimensions() == (width, height) && crop.is_none() {
            return Ok(frame.clone());
        }

        let mut options = ResizeOptions::new().resize_alg(self.algorithm);
        if let Some((left, top, crop_w, crop_h)) = crop {
            options = options.crop(left, top, crop_w, crop_h);
        }

        let mut dst = RgbaImage::new(width, height);
        self.resizer.resize(frame, &mut dst, &options)?;
        Ok(dst)
    }
}

/// Largest size with the source's aspect that fits inside the surface.
pub fn fit_size(src: (u32, u32), dst: (u32, u32)) -> (u32, u32) {
    let ratio = (f64::from(dst.0) / f64::from(src.0)).min(f64::from(dst.1) / f64::from(src.1));
    (
        ((f64::from(src.0) * ratio).round() as u32).clamp(1, dst.0),
        ((f64::from(src.1) * ratio).round() as u32).clamp(1, dst.1),
    )
}

/// Centred source rectangle `(left, top, width, height)` with the surface's aspect.
pub fn fill_crop(src: (u32, u32), dst: (u32, u32)) -> (f64, f64, f64, f64) {
    let ratio = (f64::from(dst.0) / f64::from(src.0)).max(f64::from(dst.1) / f64::from(src.1));
    let crop_w = (f64::from(dst.0) / ratio).min(f64::from(src.0));
    let crop_h = (f64::from(dst.1) / ratio).min(f64::from(src.1));
    (
        (f64::from(src.0) - crop_w) / 2.0,
        (f64::from(src.1) - crop_h) / 2.0,
        crop_w,
        crop_h,
    )
}
