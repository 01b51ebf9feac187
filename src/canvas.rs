use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::components::history::StrokeHistory;
use crate::components::stroke::Color;
use crate::components::tools::{InputEvent, PointerEvent, SketchTool, ToolProperties};
use crate::io::BackgroundLoader;
use crate::ops::compositor::{ExportError, RenderOptions, RenderSnapshot};

// ============================================================================
// BACKGROUND REFERENCE
// ============================================================================

/// Opaque handle to the reference photo (a path, `file://` URI, or any key a
/// [`BackgroundLoader`] understands). The session never decodes it itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackgroundRef(String);

impl BackgroundRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackgroundRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// CANVAS STATE - One editing session over an optional reference photo
// ============================================================================

/// A sketch session: background reference, session-only display settings,
/// the current brush selection and the stroke history.
///
/// Plain mutable value; the embedding application observes it however it
/// likes. Opacity, view size and the brush selection are never stored in
/// the stroke history.
#[derive(Clone, Debug)]
pub struct CanvasState {
    background: Option<BackgroundRef>,
    opacity: f32,
    /// Size of the on-screen view the points were captured in.
    view_size: Option<(f32, f32)>,
    pub history: StrokeHistory,
    pub tool: SketchTool,
}

impl Default for CanvasState {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasState {
    pub fn new() -> Self {
        Self {
            background: None,
            opacity: 1.0,
            view_size: None,
            history: StrokeHistory::new(),
            tool: SketchTool::default(),
        }
    }

    pub fn with_background(background: BackgroundRef) -> Self {
        let mut state = Self::new();
        state.background = Some(background);
        state
    }

    pub fn with_tool(mut self, properties: ToolProperties) -> Self {
        self.tool = SketchTool::new(properties);
        self
    }

    pub fn background(&self) -> Option<&BackgroundRef> {
        self.background.as_ref()
    }

    /// Swap the reference photo. Strokes are kept.
    pub fn set_background(&mut self, background: Option<BackgroundRef>) {
        self.background = background;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Clamped to [0, 1]; non-finite values are ignored.
    pub fn set_opacity(&mut self, opacity: f32) {
        if opacity.is_finite() {
            self.opacity = opacity.clamp(0.0, 1.0);
        }
    }

    pub fn view_size(&self) -> Option<(f32, f32)> {
        self.view_size
    }

    /// Non-positive or non-finite sizes clear the mapping (identity).
    pub fn set_view_size(&mut self, width: f32, height: f32) {
        self.view_size = if width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0 {
            Some((width, height))
        } else {
            None
        };
    }

    pub fn set_color(&mut self, color: Color) {
        self.tool.set_color(color);
    }

    pub fn set_brush_width(&mut self, width: f32) {
        self.tool.set_brush_width(width);
    }

    pub fn set_eraser(&mut self, enabled: bool) {
        self.tool.set_eraser(enabled);
    }

    pub fn toggle_eraser(&mut self) {
        self.tool.toggle_eraser();
    }

    pub fn handle_pointer(&mut self, event: PointerEvent) -> bool {
        self.tool.handle_pointer(&mut self.history, event)
    }

    pub fn undo(&mut self) -> bool {
        self.history.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.history.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn clear_all(&mut self) {
        self.history.clear_all();
    }

    /// Dispatch one input event. Returns whether anything changed.
    pub fn apply(&mut self, event: &InputEvent) -> bool {
        if let Some(pointer) = event.as_pointer() {
            return self.handle_pointer(pointer);
        }
        match event {
            InputEvent::SelectColor { color } => self.set_color(*color),
            InputEvent::SelectBrushWidth { width } => self.set_brush_width(*width),
            InputEvent::SetEraser { enabled } => self.set_eraser(*enabled),
            InputEvent::ToggleEraser => self.toggle_eraser(),
            InputEvent::SetOpacity { opacity } => self.set_opacity(*opacity),
            InputEvent::Undo => return self.undo(),
            InputEvent::Redo => return self.redo(),
            InputEvent::Clear => self.clear_all(),
            InputEvent::SetBackground { uri } => {
                self.set_background(uri.as_ref().map(BackgroundRef::new));
            }
            InputEvent::SetViewSize { width, height } => self.set_view_size(*width, *height),
            InputEvent::Start { .. }
            | InputEvent::Move { .. }
            | InputEvent::End
            | InputEvent::Cancel => return false,
        }
        true
    }

    /// Immutable copy of the committed strokes and display settings. The
    /// in-progress stroke is never part of an export.
    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            background: self.background.clone(),
            opacity: self.opacity,
            view_size: self.view_size,
            strokes: self.history.committed().to_vec(),
        }
    }

    /// Flatten the session into a `width`×`height` raster (fit scaling).
    pub fn render(
        &self,
        width: u32,
        height: u32,
        include_background: bool,
        loader: &dyn BackgroundLoader,
    ) -> Result<RgbaImage, ExportError> {
        self.render_with(&RenderOptions::new(width, height, include_background), loader)
    }

    pub fn render_with(
        &self,
        options: &RenderOptions,
        loader: &dyn BackgroundLoader,
    ) -> Result<RgbaImage, ExportError> {
        self.snapshot().render(options, loader)
    }
}
