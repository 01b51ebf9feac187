use serde::{Deserialize, Serialize};

use crate::components::history::StrokeHistory;
use crate::components::stroke::{Color, Point};

/// Smallest and largest brush diameters the tool accepts (canvas units).
pub const MIN_BRUSH_WIDTH: f32 = 0.5;
pub const MAX_BRUSH_WIDTH: f32 = 500.0;
pub const DEFAULT_BRUSH_WIDTH: f32 = 8.0;

// ============================================================================
// INPUT EVENTS
// ============================================================================

/// Raw drag gesture event in canvas-local coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Start(Point),
    Move(Point),
    End,
    Cancel,
}

/// Everything the surrounding application can feed into a sketch session:
/// pointer gestures plus discrete toolbar actions. Serialized with a `type`
/// tag so recorded sessions can be replayed headless.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Start { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    End,
    Cancel,
    SelectColor { color: Color },
    SelectBrushWidth { width: f32 },
    SetEraser { enabled: bool },
    ToggleEraser,
    SetOpacity { opacity: f32 },
    Undo,
    Redo,
    Clear,
    /// `None` removes the background reference.
    SetBackground { uri: Option<String> },
    SetViewSize { width: f32, height: f32 },
}

impl InputEvent {
    pub fn as_pointer(&self) -> Option<PointerEvent> {
        match *self {
            InputEvent::Start { x, y } => Some(PointerEvent::Start(Point::new(x, y))),
            InputEvent::Move { x, y } => Some(PointerEvent::Move(Point::new(x, y))),
            InputEvent::End => Some(PointerEvent::End),
            InputEvent::Cancel => Some(PointerEvent::Cancel),
            _ => None,
        }
    }
}

// ============================================================================
// SKETCH TOOL - Bridges drag gestures to the stroke history
// ============================================================================

/// Current brush selection. Only read at drag-start, so changes never reach
/// strokes already committed or in progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolProperties {
    pub color: Color,
    pub brush_width: f32,
    pub eraser: bool,
}

impl Default for ToolProperties {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            brush_width: DEFAULT_BRUSH_WIDTH,
            eraser: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SketchTool {
    pub properties: ToolProperties,
}

impl SketchTool {
    pub fn new(properties: ToolProperties) -> Self {
        Self { properties }
    }

    /// Route one pointer event into `history`. Returns whether history changed.
    pub fn handle_pointer(&self, history: &mut StrokeHistory, event: PointerEvent) -> bool {
        match event {
            PointerEvent::Start(at) => {
                let p = self.properties;
                history
                    .start_stroke(p.color, p.brush_width, p.eraser, at)
                    .is_some()
            }
            PointerEvent::Move(to) => history.extend_stroke(to),
            PointerEvent::End => history.commit_stroke(),
            PointerEvent::Cancel => history.cancel_stroke(),
        }
    }

    pub fn set_color(&mut self, color: Color) {
        self.properties.color = color;
    }

    /// Non-finite widths are ignored; everything else is clamped into the
    /// supported brush range.
    pub fn set_brush_width(&mut self, width: f32) {
        if width.is_finite() {
            self.properties.brush_width = width.clamp(MIN_BRUSH_WIDTH, MAX_BRUSH_WIDTH);
        }
    }

    pub fn set_eraser(&mut self, enabled: bool) {
        self.properties.eraser = enabled;
    }

    pub fn toggle_eraser(&mut self) {
        self.properties.eraser = !self.properties.eraser;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drag(tool: &SketchTool, h: &mut StrokeHistory, pts: &[(f32, f32)]) {
        let (first, rest) = pts.split_first().unwrap();
        tool.handle_pointer(h, PointerEvent::Start((*first).into()));
        for p in rest {
            tool.handle_pointer(h, PointerEvent::Move((*p).into()));
        }
        tool.handle_pointer(h, PointerEvent::End);
    }

    #[test]
    fn drag_commits_one_stroke_with_selected_brush() {
        let mut tool = SketchTool::default();
        tool.set_color(Color::BLACK);
        tool.set_brush_width(5.0);
        let mut h = StrokeHistory::new();
        drag(&tool, &mut h, &[(10.0, 10.0), (20.0, 20.0), (30.0, 10.0)]);

        let s = &h.committed()[0];
        assert_eq!(h.committed().len(), 1);
        assert_eq!(s.path().len(), 3);
        assert_eq!(s.width(), 5.0);
        assert_eq!(s.color(), Color::BLACK);
        assert!(!s.is_eraser());
    }

    #[test]
    fn selection_changes_only_affect_later_strokes() {
        let mut tool = SketchTool::default();
        let mut h = StrokeHistory::new();
        drag(&tool, &mut h, &[(0.0, 0.0), (1.0, 1.0)]);

        tool.handle_pointer(&mut h, PointerEvent::Start(Point::new(2.0, 2.0)));
        tool.set_color(Color::rgb(255, 0, 0));
        tool.set_brush_width(40.0);
        tool.toggle_eraser();
        tool.handle_pointer(&mut h, PointerEvent::Move(Point::new(3.0, 3.0)));
        tool.handle_pointer(&mut h, PointerEvent::End);

        drag(&tool, &mut h, &[(4.0, 4.0)]);

        let strokes = h.committed();
        assert_eq!(strokes[0].color(), Color::BLACK);
        assert_eq!(strokes[1].color(), Color::BLACK);
        assert_eq!(strokes[1].width(), DEFAULT_BRUSH_WIDTH);
        assert!(!strokes[1].is_eraser());
        assert_eq!(strokes[2].color(), Color::rgb(255, 0, 0));
        assert_eq!(strokes[2].width(), 40.0);
        assert!(strokes[2].is_eraser());
    }

    #[test]
    fn cancel_discards_the_gesture() {
        let tool = SketchTool::default();
        let mut h = StrokeHistory::new();
        tool.handle_pointer(&mut h, PointerEvent::Start(Point::new(0.0, 0.0)));
        tool.handle_pointer(&mut h, PointerEvent::Move(Point::new(5.0, 5.0)));
        assert!(tool.handle_pointer(&mut h, PointerEvent::Cancel));
        assert!(!tool.handle_pointer(&mut h, PointerEvent::End));
        assert!(h.committed().is_empty());
    }

    #[test]
    fn brush_width_is_clamped() {
        let mut tool = SketchTool::default();
        tool.set_brush_width(0.0);
        assert_eq!(tool.properties.brush_width, MIN_BRUSH_WIDTH);
        tool.set_brush_width(1e6);
        assert_eq!(tool.properties.brush_width, MAX_BRUSH_WIDTH);
        tool.set_brush_width(f32::NAN);
        assert_eq!(tool.properties.brush_width, MAX_BRUSH_WIDTH);
    }

    #[test]
    fn events_round_trip_through_json() {
        let log = r##"[
            {"type": "select_color", "color": "#ff0000"},
            {"type": "start", "x": 1.0, "y": 2.0},
            {"type": "end"},
            {"type": "set_background", "uri": null}
        ]"##;
        let events: Vec<InputEvent> = serde_json::from_str(log).unwrap();
        assert_eq!(
            events[0],
            InputEvent::SelectColor {
                color: Color::rgb(255, 0, 0)
            }
        );
        assert_eq!(
            events[1].as_pointer(),
            Some(PointerEvent::Start(Point::new(1.0, 2.0)))
        );
        assert_eq!(events[2].as_pointer(), Some(PointerEvent::End));
        assert_eq!(events[3], InputEvent::SetBackground { uri: None });
        assert!(events[3].as_pointer().is_none());
    }
}
