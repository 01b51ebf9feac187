// ============================================================================
// EXPORT COMPOSITOR — background + strokes flattened to a fixed-size raster
// ============================================================================

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::BackgroundRef;
use crate::components::stroke::Stroke;
use crate::io::BackgroundLoader;
use crate::ops::raster::{self, ViewTransform};

pub const DEFAULT_EXPORT_WIDTH: u32 = 1080;
pub const DEFAULT_EXPORT_HEIGHT: u32 = 1920;
/// Largest export dimension accepted per axis.
pub const MAX_EXPORT_DIM: u32 = 16_384;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// How the background (and the view rectangle the strokes were drawn in) is
/// placed onto the target raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Contain: whole image visible, aspect preserved, centered.
    #[default]
    Fit,
    /// Cover: target fully covered, aspect preserved, centered crop.
    Fill,
}

impl ScaleMode {
    pub fn name(&self) -> &'static str {
        match self {
            ScaleMode::Fit => "fit",
            ScaleMode::Fill => "fill",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fit" | "contain" => Some(ScaleMode::Fit),
            "fill" | "cover" => Some(ScaleMode::Fill),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub include_background: bool,
    pub scale_mode: ScaleMode,
}

impl RenderOptions {
    pub fn new(width: u32, height: u32, include_background: bool) -> Self {
        Self {
            width,
            height,
            include_background,
            scale_mode: ScaleMode::Fit,
        }
    }

    pub fn with_scale_mode(mut self, mode: ScaleMode) -> Self {
        self.scale_mode = mode;
        self
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::new(DEFAULT_EXPORT_WIDTH, DEFAULT_EXPORT_HEIGHT, true)
    }
}

/// Error type for export rendering
#[derive(Debug)]
pub enum ExportError {
    InvalidDimensions { width: u32, height: u32 },
    TooLarge { width: u32, height: u32 },
    Allocation(String),
    /// Another export for the same session is still running.
    Busy,
    /// The background worker died before delivering a result.
    Worker(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::InvalidDimensions { width, height } => {
                write!(f, "Invalid export size {}x{}", width, height)
            }
            ExportError::TooLarge { width, height } => write!(
                f,
                "Export size {}x{} exceeds the {} px limit",
                width, height, MAX_EXPORT_DIM
            ),
            ExportError::Allocation(e) => write!(f, "Raster allocation failed: {}", e),
            ExportError::Busy => write!(f, "An export is already in progress"),
            ExportError::Worker(e) => write!(f, "Export worker failed: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

/// Where a source rectangle lands on the target (may extend past its edges).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

/// Centered, aspect-preserving placement of `src` inside `dst`.
pub fn place(src_w: f32, src_h: f32, dst_w: f32, dst_h: f32, mode: ScaleMode) -> Placement {
    let sx = dst_w / src_w;
    let sy = dst_h / src_h;
    let scale = match mode {
        ScaleMode::Fit => sx.min(sy),
        ScaleMode::Fill => sx.max(sy),
    };
    let width = src_w * scale;
    let height = src_h * scale;
    Placement {
        x: (dst_w - width) / 2.0,
        y: (dst_h - height) / 2.0,
        width,
        height,
        scale,
    }
}

/// Allocate a `width`×`height` surface filled with `fill`, reporting
/// allocation failure instead of aborting.
pub fn allocate_surface(width: u32, height: u32, fill: Rgba<u8>) -> Result<RgbaImage, ExportError> {
    if width == 0 || height == 0 {
        return Err(ExportError::InvalidDimensions { width, height });
    }
    if width > MAX_EXPORT_DIM || height > MAX_EXPORT_DIM {
        return Err(ExportError::TooLarge { width, height });
    }
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or(ExportError::TooLarge { width, height })?;

    let mut data: Vec<u8> = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| ExportError::Allocation(e.to_string()))?;
    for _ in 0..(len / 4) {
        data.extend_from_slice(&fill.0);
    }

    RgbaImage::from_raw(width, height, data)
        .ok_or_else(|| ExportError::Allocation("buffer size mismatch".into()))
}

/// Scale `image` per `mode`, center it on `base` and blend it at `opacity`.
///
/// Only the part of the image that lands on `base` is ever scaled, so the
/// working buffers stay bounded by the target size whatever the aspect ratio.
/// Upscaling samples the source bilinearly per target pixel; downscaling
/// crops the visible source rectangle and resizes just that.
pub fn draw_background(base: &mut RgbaImage, image: &RgbaImage, opacity: f32, mode: ScaleMode) {
    let opacity = opacity.clamp(0.0, 1.0);
    let (iw, ih) = image.dimensions();
    if opacity <= 0.0 || iw == 0 || ih == 0 {
        return;
    }
    let (tw, th) = base.dimensions();
    let p = place(iw as f32, ih as f32, tw as f32, th as f32, mode);

    // Visible target rectangle, snapped to whole pixels
    let dx0 = p.x.round().max(0.0);
    let dy0 = p.y.round().max(0.0);
    let dx1 = (p.x + p.width).round().min(tw as f32);
    let dy1 = (p.y + p.height).round().min(th as f32);
    if dx0 >= dx1 || dy0 >= dy1 {
        return;
    }

    if p.scale >= 1.0 {
        blend_sampled(base, image, &p, (dx0 as u32, dy0 as u32, dx1 as u32, dy1 as u32), opacity);
        return;
    }

    let sx0 = ((dx0 - p.x) / p.scale).floor().clamp(0.0, (iw - 1) as f32) as u32;
    let sy0 = ((dy0 - p.y) / p.scale).floor().clamp(0.0, (ih - 1) as f32) as u32;
    let sx1 = (((dx1 - p.x) / p.scale).ceil() as u32).clamp(sx0 + 1, iw);
    let sy1 = (((dy1 - p.y) / p.scale).ceil() as u32).clamp(sy0 + 1, ih);
    let crop = imageops::crop_imm(image, sx0, sy0, sx1 - sx0, sy1 - sy0).to_image();

    let new_w = (((sx1 - sx0) as f32 * p.scale).round() as u32).max(1);
    let new_h = (((sy1 - sy0) as f32 * p.scale).round() as u32).max(1);
    let scaled = if (new_w, new_h) == crop.dimensions() {
        crop
    } else {
        imageops::resize(&crop, new_w, new_h, FilterType::Triangle)
    };
    let off_x = (p.x + sx0 as f32 * p.scale).round() as i64;
    let off_y = (p.y + sy0 as f32 * p.scale).round() as i64;
    blend_placed(base, &scaled, off_x, off_y, opacity);
}

/// Bilinear sample of `image` under `p` for every pixel of `rect` on `base`.
fn blend_sampled(
    base: &mut RgbaImage,
    image: &RgbaImage,
    p: &Placement,
    rect: (u32, u32, u32, u32),
    opacity: f32,
) {
    let (x0, y0, x1, y1) = rect;
    let (iw, ih) = image.dimensions();
    let max_u = (iw - 1) as f32;
    let max_v = (ih - 1) as f32;
    let stride = base.width() as usize * 4;

    let buf: &mut [u8] = base;
    buf[y0 as usize * stride..y1 as usize * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(i, row)| {
            let y = y0 as f32 + i as f32;
            let v = ((y + 0.5 - p.y) / p.scale - 0.5).clamp(0.0, max_v);
            let (v0, fv) = (v.floor() as u32, v.fract());
            let v1 = (v0 + 1).min(ih - 1);
            for x in x0..x1 {
                let u = ((x as f32 + 0.5 - p.x) / p.scale - 0.5).clamp(0.0, max_u);
                let (u0, fu) = (u.floor() as u32, u.fract());
                let u1 = (u0 + 1).min(iw - 1);

                let (a, b) = (image.get_pixel(u0, v0), image.get_pixel(u1, v0));
                let (c, d) = (image.get_pixel(u0, v1), image.get_pixel(u1, v1));
                let mut px = [0u8; 4];
                for ch in 0..4 {
                    let top = a[ch] as f32 + (b[ch] as f32 - a[ch] as f32) * fu;
                    let bottom = c[ch] as f32 + (d[ch] as f32 - c[ch] as f32) * fu;
                    px[ch] = (top + (bottom - top) * fv + 0.5).clamp(0.0, 255.0) as u8;
                }

                let alpha = opacity * px[3] as f32 / 255.0;
                let xi = x as usize * 4;
                raster::blend_over(&mut row[xi..xi + 4], Rgba([px[0], px[1], px[2], 255]), alpha);
            }
        });
}

/// Blend `scaled` onto `base` with its top-left at (`off_x`, `off_y`), clipped.
fn blend_placed(base: &mut RgbaImage, scaled: &RgbaImage, off_x: i64, off_y: i64, opacity: f32) {
    let (tw, _) = base.dimensions();
    let (sw, sh) = scaled.dimensions();
    let stride = tw as usize * 4;

    let buf: &mut [u8] = base;
    buf.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = y as i64 - off_y;
            if sy < 0 || sy >= sh as i64 {
                return;
            }
            for x in 0..tw as i64 {
                let sx = x - off_x;
                if sx < 0 || sx >= sw as i64 {
                    continue;
                }
                let src = *scaled.get_pixel(sx as u32, sy as u32);
                let alpha = opacity * src[3] as f32 / 255.0;
                let xi = x as usize * 4;
                raster::blend_over(&mut row[xi..xi + 4], Rgba([src[0], src[1], src[2], 255]), alpha);
            }
        });
}

/// Immutable copy of everything an export needs, detached from the live
/// session so editing can continue while a worker renders.
#[derive(Clone, Debug, Default)]
pub struct RenderSnapshot {
    pub background: Option<BackgroundRef>,
    pub opacity: f32,
    pub view_size: Option<(f32, f32)>,
    pub strokes: Vec<Stroke>,
}

impl RenderSnapshot {
    /// Canvas-space → target-pixel mapping for the strokes.
    ///
    /// With a view size and a loaded background of `background_size`, the
    /// photo's placement inside the view is undone and its placement on the
    /// target applied, so strokes land on the same photo pixels they covered
    /// on screen. Without a background the view rectangle itself is placed.
    pub fn stroke_transform(
        &self,
        options: &RenderOptions,
        background_size: Option<(u32, u32)>,
    ) -> ViewTransform {
        let Some((vw, vh)) = self.view_size.filter(|&(w, h)| w > 0.0 && h > 0.0) else {
            return ViewTransform::IDENTITY;
        };
        let (tw, th) = (options.width as f32, options.height as f32);
        let mode = options.scale_mode;

        match background_size {
            Some((iw, ih)) if iw > 0 && ih > 0 => {
                let (iw, ih) = (iw as f32, ih as f32);
                let in_view = place(iw, ih, vw, vh, mode);
                let on_target = place(iw, ih, tw, th, mode);
                let scale = on_target.scale / in_view.scale;
                ViewTransform {
                    scale,
                    offset_x: on_target.x - in_view.x * scale,
                    offset_y: on_target.y - in_view.y * scale,
                }
            }
            _ => {
                let p = place(vw, vh, tw, th, mode);
                ViewTransform {
                    scale: p.scale,
                    offset_x: p.x,
                    offset_y: p.y,
                }
            }
        }
    }

    /// Flatten background and strokes into a new raster.
    ///
    /// The base is white; with `include_background` the background image is
    /// drawn over it at `opacity`. A background that fails to load leaves the
    /// plain white base. Strokes are painted oldest first onto a separate
    /// layer (so erasers reveal the base) which is then composited on top.
    pub fn render(
        &self,
        options: &RenderOptions,
        loader: &dyn BackgroundLoader,
    ) -> Result<RgbaImage, ExportError> {
        let mut base = allocate_surface(options.width, options.height, WHITE)?;

        // Loaded even when not drawn: stroke registration depends on its size
        let needs_image = options.include_background
            || (self.view_size.is_some() && !self.strokes.is_empty());
        let background = match &self.background {
            Some(bg) if needs_image => match loader.load(bg) {
                Ok(img) => Some(img),
                Err(e) => {
                    crate::log_warn!("Background '{}' failed to load, using white: {}", bg, e);
                    None
                }
            },
            _ => None,
        };

        if options.include_background
            && let Some(img) = &background
        {
            draw_background(&mut base, img, self.opacity, options.scale_mode);
        }

        if self.strokes.is_empty() {
            return Ok(base);
        }

        let mut layer = allocate_surface(options.width, options.height, CLEAR)?;
        let xf = self.stroke_transform(options, background.as_ref().map(|img| img.dimensions()));
        for stroke in &self.strokes {
            raster::paint_stroke(&mut layer, stroke, &xf);
        }
        raster::composite_over(&mut base, &layer);
        Ok(base)
    }
}
