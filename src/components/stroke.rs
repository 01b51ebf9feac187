use image::Rgba;
use serde::{Deserialize, Serialize};

// ============================================================================
// COLOR
// ============================================================================

/// Straight (non-premultiplied) RGBA color.
///
/// Serializes as a `#RRGGBB` / `#RRGGBBAA` hex string so event logs and
/// drafts stay readable and stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }

    /// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA` (leading `#` optional).
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            3 => {
                let nib = |i: usize| {
                    let v = u8::from_str_radix(hex.get(i..i + 1)?, 16).ok()?;
                    Some(v * 17)
                };
                Some(Self::rgb(nib(0)?, nib(1)?, nib(2)?))
            }
            6 => Some(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid color '{}'", value))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_hex()
    }
}

// ============================================================================
// POINT
// ============================================================================

/// A position in canvas-local space.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

// ============================================================================
// STROKE
// ============================================================================

/// One committed freehand gesture. Fields are read-only: once a stroke
/// leaves the builder it never changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    color: Color,
    width: f32,
    is_eraser: bool,
    path: Vec<Point>,
}

impl Stroke {
    /// Build a finished stroke directly (drafts, tests). An empty path is
    /// allowed but paints nothing.
    pub fn new(color: Color, width: f32, is_eraser: bool, path: Vec<Point>) -> Self {
        Self {
            color,
            width,
            is_eraser,
            path,
        }
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn is_eraser(&self) -> bool {
        self.is_eraser
    }

    pub fn path(&self) -> &[Point] {
        &self.path
    }

    /// Axis-aligned bounds of the painted footprint (path grown by half the
    /// width), or `None` for an empty path.
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let first = self.path.first()?;
        let (mut min, mut max) = (*first, *first);
        for p in &self.path[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        let r = self.width / 2.0;
        Some((
            Point::new(min.x - r, min.y - r),
            Point::new(max.x + r, max.y + r),
        ))
    }

    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.path.len() * std::mem::size_of::<Point>()
    }
}

/// A stroke under construction between drag-start and drag-end.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeBuilder {
    color: Color,
    width: f32,
    is_eraser: bool,
    path: Vec<Point>,
}

impl StrokeBuilder {
    pub fn new(color: Color, width: f32, is_eraser: bool, start: Point) -> Self {
        Self {
            color,
            width,
            is_eraser,
            path: vec![start],
        }
    }

    pub fn push(&mut self, point: Point) {
        self.path.push(point);
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn is_eraser(&self) -> bool {
        self.is_eraser
    }

    pub fn points(&self) -> &[Point] {
        &self.path
    }

    pub fn finish(self) -> Stroke {
        Stroke::new(self.color, self.width, self.is_eraser, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse_in_all_lengths() {
        assert_eq!(Color::from_hex("#000"), Some(Color::BLACK));
        assert_eq!(Color::from_hex("ff8000"), Some(Color::rgb(255, 128, 0)));
        assert_eq!(
            Color::from_hex("#11223344"),
            Some(Color::rgba(0x11, 0x22, 0x33, 0x44))
        );
        assert_eq!(Color::from_hex("#12345"), None);
        assert_eq!(Color::from_hex("#gg0000"), None);
    }

    #[test]
    fn opaque_colors_drop_alpha_in_hex() {
        assert_eq!(Color::rgb(1, 2, 3).to_hex(), "#010203");
        assert_eq!(Color::rgba(1, 2, 3, 4).to_hex(), "#01020304");
    }

    #[test]
    fn color_serializes_as_hex_string() {
        let json = serde_json::to_string(&Color::rgb(255, 0, 16)).unwrap();
        assert_eq!(json, "\"#ff0010\"");
        let back: Color = serde_json::from_str("\"#ff001080\"").unwrap();
        assert_eq!(back, Color::rgba(255, 0, 16, 128));
        assert!(serde_json::from_str::<Color>("\"nope\"").is_err());
    }

    #[test]
    fn builder_keeps_seed_point_first() {
        let mut b = StrokeBuilder::new(Color::BLACK, 5.0, false, Point::new(10.0, 10.0));
        b.push(Point::new(20.0, 20.0));
        let s = b.finish();
        assert_eq!(s.path(), &[Point::new(10.0, 10.0), Point::new(20.0, 20.0)]);
        assert_eq!(s.width(), 5.0);
        assert!(!s.is_eraser());
    }

    #[test]
    fn bounds_grow_by_half_width() {
        let s = Stroke::new(
            Color::BLACK,
            4.0,
            false,
            vec![Point::new(10.0, 20.0), Point::new(30.0, 5.0)],
        );
        let (min, max) = s.bounds().unwrap();
        assert_eq!(min, Point::new(8.0, 3.0));
        assert_eq!(max, Point::new(32.0, 22.0));
        assert!(Stroke::new(Color::BLACK, 4.0, false, Vec::new()).bounds().is_none());
    }
}
