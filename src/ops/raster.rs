// ============================================================================
// STROKE RASTERIZATION — antialiased round-capped polylines on an RGBA layer
// ============================================================================

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::components::stroke::{Point, Stroke};

/// Thinnest footprint a stroke is rasterized with, in target pixels.
const MIN_RADIUS_PX: f32 = 0.5;

/// Uniform scale + translation from canvas space into target pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ViewTransform {
    pub const IDENTITY: ViewTransform = ViewTransform {
        scale: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    pub fn apply(&self, p: Point) -> (f32, f32) {
        (
            p.x * self.scale + self.offset_x,
            p.y * self.scale + self.offset_y,
        )
    }
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Clone, Copy)]
struct Segment {
    ax: f32,
    ay: f32,
    bx: f32,
    by: f32,
}

impl Segment {
    /// Distance from (px, py) to the closest point on the segment.
    fn distance(&self, px: f32, py: f32) -> f32 {
        let dx = self.bx - self.ax;
        let dy = self.by - self.ay;
        let len_sq = dx * dx + dy * dy;
        let t = if len_sq < 1e-12 {
            0.0
        } else {
            (((px - self.ax) * dx + (py - self.ay) * dy) / len_sq).clamp(0.0, 1.0)
        };
        let cx = self.ax + dx * t - px;
        let cy = self.ay + dy * t - py;
        (cx * cx + cy * cy).sqrt()
    }

    fn min_y(&self) -> f32 {
        self.ay.min(self.by)
    }

    fn max_y(&self) -> f32 {
        self.ay.max(self.by)
    }
}

/// Paint one stroke onto `layer`.
///
/// Coverage at each pixel centre is `radius + 0.5 - distance` clamped to
/// [0, 1], where distance is measured to the nearest segment of the path.
/// Taking the minimum over all segments gives round caps and round joins and
/// never double-blends where a path crosses itself.
///
/// Normal strokes are blended source-over. Eraser strokes scale the layer's
/// alpha by `1 - coverage`, punching through whatever was painted earlier.
pub fn paint_stroke(layer: &mut RgbaImage, stroke: &Stroke, xf: &ViewTransform) {
    let (width, height) = layer.dimensions();
    if width == 0 || height == 0 || stroke.path().is_empty() {
        return;
    }

    let pts: Vec<(f32, f32)> = stroke.path().iter().map(|p| xf.apply(*p)).collect();
    let segments: Vec<Segment> = if pts.len() == 1 {
        let (x, y) = pts[0];
        vec![Segment { ax: x, ay: y, bx: x, by: y }]
    } else {
        pts.windows(2)
            .map(|w| Segment {
                ax: w[0].0,
                ay: w[0].1,
                bx: w[1].0,
                by: w[1].1,
            })
            .collect()
    };

    let radius = (stroke.width() * xf.scale / 2.0).max(MIN_RADIUS_PX);
    let reach = radius + 1.0;

    // Footprint bounds in target space, grown to the AA reach and clamped
    let Some((lo, hi)) = stroke.bounds() else { return };
    let (lo_x, lo_y) = xf.apply(lo);
    let (hi_x, hi_y) = xf.apply(hi);
    let pad = reach - stroke.width() * xf.scale / 2.0;
    let x0 = (lo_x - pad).floor().max(0.0);
    let y0 = (lo_y - pad).floor().max(0.0);
    let x1 = (hi_x + pad).ceil().min(width as f32 - 1.0);
    let y1 = (hi_y + pad).ceil().min(height as f32 - 1.0);
    if x0 > x1 || y0 > y1 {
        return;
    }
    let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);

    let color = stroke.color();
    let src_a = color.a as f32 / 255.0;
    if !stroke.is_eraser() && src_a <= 0.0 {
        return;
    }
    let is_eraser = stroke.is_eraser();
    let stride = width as usize * 4;

    let buf: &mut [u8] = layer;
    buf[y0 * stride..(y1 + 1) * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(i, row)| {
            let py = (y0 + i) as f32 + 0.5;
            let near: Vec<Segment> = segments
                .iter()
                .filter(|s| py >= s.min_y() - reach && py <= s.max_y() + reach)
                .copied()
                .collect();
            if near.is_empty() {
                return;
            }

            for x in x0..=x1 {
                let px = x as f32 + 0.5;
                let dist = near
                    .iter()
                    .map(|s| s.distance(px, py))
                    .fold(f32::MAX, f32::min);
                let coverage = (radius + 0.5 - dist).clamp(0.0, 1.0);
                if coverage <= 0.0 {
                    continue;
                }

                let px_bytes = &mut row[x * 4..x * 4 + 4];
                if is_eraser {
                    erase_pixel(px_bytes, coverage);
                } else {
                    let top = Rgba([color.r, color.g, color.b, 255]);
                    blend_over(px_bytes, top, src_a * coverage);
                }
            }
        });
}

/// Straight-alpha source-over of `top` (alpha given separately) onto `dst`.
pub fn blend_over(dst: &mut [u8], top: Rgba<u8>, alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    if alpha >= 1.0 {
        dst.copy_from_slice(&[top[0], top[1], top[2], 255]);
        return;
    }

    let da = dst[3] as f32 / 255.0;
    let out_a = alpha + da * (1.0 - alpha);
    if out_a <= 0.0 {
        dst.copy_from_slice(&[0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let s = top[c] as f32;
        let d = dst[c] as f32;
        let v = (s * alpha + d * da * (1.0 - alpha)) / out_a;
        dst[c] = (v + 0.5).clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
}

/// Destination-out: remove `coverage` of the pixel's alpha.
fn erase_pixel(dst: &mut [u8], coverage: f32) {
    let a = dst[3] as f32 * (1.0 - coverage);
    if a < 0.5 {
        dst.copy_from_slice(&[0, 0, 0, 0]);
    } else {
        dst[3] = (a + 0.5) as u8;
    }
}

/// Flatten `layer` over `base` in place. Both must share dimensions.
pub fn composite_over(base: &mut RgbaImage, layer: &RgbaImage) {
    debug_assert_eq!(base.dimensions(), layer.dimensions());
    let dst: &mut [u8] = base;
    let src: &[u8] = layer;
    dst.par_chunks_mut(4)
        .zip(src.par_chunks(4))
        .for_each(|(d, s)| {
            if s[3] == 0 {
                return;
            }
            blend_over(d, Rgba([s[0], s[1], s[2], 255]), s[3] as f32 / 255.0);
        });
}
