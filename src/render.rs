//! Drawing backend used by widgets.
//!
//! Coordinates follow the GL convention: the origin is the bottom-left corner
//! of the current target and `y` grows upward. Rotation is counter-clockwise
//! around the center of the drawn box.

use std::sync::Arc;

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{Rgba, RgbaImage};
use tracing::warn;

use crate::config::Gradient;
use crate::math::{Rect, Vector2D};
use crate::texture::Texture;

pub trait Renderer {
    /// Starts drawing into a transparent offscreen surface of `size`.
    fn push_offscreen(&mut self, size: Vector2D);

    /// Finishes the innermost offscreen surface and returns it as a texture.
    fn pop_offscreen(&mut self) -> Texture;

    /// Strokes a rounded rectangle `thickness` pixels wide along the inside of `rect`.
    fn render_border(
        &mut self,
        rect: &Rect,
        gradient: &Gradient,
        thickness: i32,
        rounding: i32,
        alpha: f64,
    );

    fn render_texture(&mut self, rect: &Rect, texture: &Texture, alpha: f64, rounding: i32);
}

/// CPU renderer that composites into an RGBA screen buffer.
pub struct SoftwareRenderer {
    screen: RgbaImage,
    offscreen: Vec<RgbaImage>,
    resizer: fir::Resizer,
}

impl SoftwareRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: RgbaImage::new(width, height),
            offscreen: Vec::new(),
            resizer: fir::Resizer::new(),
        }
    }

    /// Fills the screen with `color` ahead of a new frame.
    pub fn begin_frame(&mut self, color: [u8; 4]) {
        if !self.offscreen.is_empty() {
            warn!(depth = self.offscreen.len(), "discarding unbalanced offscreen surfaces");
            self.offscreen.clear();
        }
        for px in self.screen.pixels_mut() {
            *px = Rgba(color);
        }
    }

    /// Screen contents in top-down row order.
    pub fn screen(&self) -> &RgbaImage {
        &self.screen
    }

    fn target(&mut self) -> &mut RgbaImage {
        self.offscreen.last_mut().unwrap_or(&mut self.screen)
    }
}

impl Renderer for SoftwareRenderer {
    fn push_offscreen(&mut self, size: Vector2D) {
        let w = size.x.round().max(0.0) as u32;
        let h = size.y.round().max(0.0) as u32;
        self.offscreen.push(RgbaImage::new(w, h));
    }

    fn pop_offscreen(&mut self) -> Texture {
        match self.offscreen.pop() {
            Some(surface) => Texture::from_rgba(Arc::new(surface)),
            None => {
                warn!("pop_offscreen without a matching push");
                Texture::invalid()
            }
        }
    }

    fn render_border(
        &mut self,
        rect: &Rect,
        gradient: &Gradient,
        thickness: i32,
        rounding: i32,
        alpha: f64,
    ) {
        if rect.is_empty() || thickness <= 0 {
            return;
        }
        let t = f64::from(thickness);
        let outer = f64::from(rounding.max(0));
        let inner = (outer - t).max(0.0);
        let (sin, cos) = gradient.angle_deg.to_radians().sin_cos();
        let extent = (rect.w * cos).abs() + (rect.h * sin).abs();

        rasterize(self.target(), rect, |lx, ly| {
            if !inside_rounded(lx, ly, rect.w, rect.h, outer) {
                return None;
            }
            if inside_rounded(lx - t, ly - t, rect.w - 2.0 * t, rect.h - 2.0 * t, inner) {
                return None;
            }
            let along = (lx - rect.w / 2.0) * cos + (ly - rect.h / 2.0) * sin;
            let pos = if extent > 0.0 { along / extent + 0.5 } else { 0.0 };
            Some((gradient.sample(pos), alpha))
        });
    }

    fn render_texture(&mut self, rect: &Rect, texture: &Texture, alpha: f64, rounding: i32) {
        let Some(pixels) = texture.pixels() else {
            return;
        };
        let w = rect.w.round() as u32;
        let h = rect.h.round() as u32;
        if w == 0 || h == 0 {
            return;
        }
        let scaled = match resize_rgba(&mut self.resizer, pixels, w, h) {
            Ok(scaled) => scaled,
            Err(err) => {
                warn!(error = %err, width = w, height = h, "texture resize failed");
                return;
            }
        };
        let radius = f64::from(rounding.max(0));

        rasterize(self.target(), rect, |lx, ly| {
            if !inside_rounded(lx, ly, rect.w, rect.h, radius) {
                return None;
            }
            let col = (lx as u32).min(w - 1);
            let row = h - 1 - (ly as u32).min(h - 1);
            Some((scaled.get_pixel(col, row).0, alpha))
        });
    }
}

/// Visits every target pixel covered by `rect` (after rotation) and blends the
/// color `shade` returns for the pixel center in box-local coordinates.
fn rasterize(
    target: &mut RgbaImage,
    rect: &Rect,
    mut shade: impl FnMut(f64, f64) -> Option<([u8; 4], f64)>,
) {
    let (tw, th) = target.dimensions();
    if tw == 0 || th == 0 || rect.is_empty() {
        return;
    }
    let center = Vector2D::new(rect.x + rect.w / 2.0, rect.y + rect.h / 2.0);
    let (sin, cos) = rect.rot.sin_cos();
    let half = Vector2D::new(
        (rect.w * cos).abs() + (rect.h * sin).abs(),
        (rect.w * sin).abs() + (rect.h * cos).abs(),
    ) / 2.0;

    let x0 = (center.x - half.x).floor().max(0.0) as u32;
    let y0 = (center.y - half.y).floor().max(0.0) as u32;
    let x1 = ((center.x + half.x).ceil().max(0.0) as u32).min(tw);
    let y1 = ((center.y + half.y).ceil().max(0.0) as u32).min(th);

    for py in y0..y1 {
        for px in x0..x1 {
            let dx = f64::from(px) + 0.5 - center.x;
            let dy = f64::from(py) + 0.5 - center.y;
            let lx = dx * cos + dy * sin + rect.w / 2.0;
            let ly = -dx * sin + dy * cos + rect.h / 2.0;
            if lx < 0.0 || ly < 0.0 || lx >= rect.w || ly >= rect.h {
                continue;
            }
            if let Some((color, alpha)) = shade(lx, ly) {
                blend(target.get_pixel_mut(px, th - 1 - py), color, alpha);
            }
        }
    }
}

fn inside_rounded(x: f64, y: f64, w: f64, h: f64, radius: f64) -> bool {
    if w <= 0.0 || h <= 0.0 || x < 0.0 || y < 0.0 || x >= w || y >= h {
        return false;
    }
    let r = radius.min(w / 2.0).min(h / 2.0);
    if r <= 0.0 {
        return true;
    }
    let cx = x.clamp(r, w - r);
    let cy = y.clamp(r, h - r);
    (x - cx).powi(2) + (y - cy).powi(2) <= r * r
}

fn blend(dst: &mut Rgba<u8>, src: [u8; 4], alpha: f64) {
    let sa = f64::from(src[3]) / 255.0 * alpha.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = f64::from(dst.0[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let mixed = (f64::from(src[c]) * sa + f64::from(dst.0[c]) * da * (1.0 - sa)) / out_a;
        dst.0[c] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

fn resize_rgba(
    resizer: &mut fir::Resizer,
    source: &RgbaImage,
    target_w: u32,
    target_h: u32,
) -> Result<RgbaImage> {
    if target_w == 0 || target_h == 0 {
        anyhow::bail!("resize dimensions must be positive");
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for texture resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("texture resize failed")?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("failed to construct resized RGBA image"))
}
