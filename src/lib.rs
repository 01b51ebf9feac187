#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{BackgroundRef, CanvasState};
pub use components::history::StrokeHistory;
pub use components::stroke::{Color, Point, Stroke};
pub use components::tools::{InputEvent, PointerEvent, SketchTool, ToolProperties};
pub use io::{BackgroundLoader, FileBackgroundLoader, LoadError, MemoryBackgroundLoader, SaveFormat};
pub use ops::compositor::{ExportError, RenderOptions, ScaleMode};
pub use project::{ExportJob, SketchProject};
