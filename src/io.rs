use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tga::TgaEncoder;
use image::{DynamicImage, ImageEncoder, ImageError, RgbaImage};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::canvas::{BackgroundRef, CanvasState};
use crate::components::history::StrokeHistory;
use crate::components::stroke::Stroke;
use crate::components::tools::InputEvent;

/// Largest background image accepted per axis before decoding.
pub const MAX_BACKGROUND_DIM: u32 = 16_384;

// ============================================================================
// BACKGROUND LOADING
// ============================================================================

/// Error type for background image loading
#[derive(Debug)]
pub enum LoadError {
    NotFound(String),
    Io(std::io::Error),
    Decode(String),
    TooLarge { width: u32, height: u32 },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::NotFound(what) => write!(f, "Not found: {}", what),
            LoadError::Io(e) => write!(f, "I/O error: {}", e),
            LoadError::Decode(e) => write!(f, "Decode error: {}", e),
            LoadError::TooLarge { width, height } => write!(
                f,
                "Image {}x{} exceeds the {} px limit",
                width, height, MAX_BACKGROUND_DIM
            ),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<ImageError> for LoadError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::IoError(io) => LoadError::Io(io),
            other => LoadError::Decode(other.to_string()),
        }
    }
}

/// Resolves a [`BackgroundRef`] into pixels. Export workers call this off the
/// input thread, hence `Send + Sync`.
pub trait BackgroundLoader: Send + Sync {
    fn load(&self, background: &BackgroundRef) -> Result<RgbaImage, LoadError>;
}

/// Loads backgrounds from the filesystem. Accepts plain paths and `file://`
/// URIs; relative paths resolve against `base_dir` when one is set.
#[derive(Clone, Debug, Default)]
pub struct FileBackgroundLoader {
    pub base_dir: Option<PathBuf>,
}

impl FileBackgroundLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    pub fn resolve(&self, background: &BackgroundRef) -> PathBuf {
        let raw = background.as_str();
        let path = Path::new(raw.strip_prefix("file://").unwrap_or(raw));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl BackgroundLoader for FileBackgroundLoader {
    fn load(&self, background: &BackgroundRef) -> Result<RgbaImage, LoadError> {
        let path = self.resolve(background);
        if !path.is_file() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }
        let (width, height) = image::image_dimensions(&path)?;
        if width > MAX_BACKGROUND_DIM || height > MAX_BACKGROUND_DIM {
            return Err(LoadError::TooLarge { width, height });
        }
        Ok(image::open(&path)?.to_rgba8())
    }
}

/// In-memory backgrounds keyed by reference, for embedders that decode
/// photos themselves.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackgroundLoader {
    images: HashMap<BackgroundRef, RgbaImage>,
}

impl MemoryBackgroundLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, background: BackgroundRef, image: RgbaImage) {
        self.images.insert(background, image);
    }
}

impl BackgroundLoader for MemoryBackgroundLoader {
    fn load(&self, background: &BackgroundRef) -> Result<RgbaImage, LoadError> {
        self.images
            .get(background)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(background.to_string()))
    }
}

// ============================================================================
// RASTER ENCODING
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
    Tga,
}

impl SaveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_name)
    }
}

/// Encode `image` into `writer`. JPEG drops alpha; the export raster is
/// always opaque so nothing is lost.
pub fn encode_into<W: Write>(
    image: &RgbaImage,
    writer: &mut W,
    format: SaveFormat,
    quality: u8,
) -> Result<(), ImageError> {
    match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut *writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        SaveFormat::Jpeg => {
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut *writer, quality.clamp(1, 100));
            encoder.encode(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(writer);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        SaveFormat::Tga => {
            let encoder = TgaEncoder::new(&mut *writer);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
    }
    Ok(())
}

/// Encode to an in-memory buffer, ready to hand to an uploader.
pub fn encode_to_vec(image: &RgbaImage, format: SaveFormat, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    encode_into(image, &mut buf, format, quality)?;
    Ok(buf)
}

pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
) -> Result<(), ImageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    encode_into(image, &mut writer, format, quality)?;
    writer.flush()?;
    Ok(())
}

// ============================================================================
// SKD DRAFT FILE FORMAT
// ============================================================================

const SKD_MAGIC_V1: &str = "SKD1";
/// Drafts above this size are refused before decoding.
const MAX_DRAFT_BYTES: usize = 256 * 1024 * 1024;
const MAX_DRAFT_STROKES: usize = 100_000;

/// V1 serializable draft: everything needed to resume editing.
#[derive(Serialize, Deserialize)]
struct DraftFileV1 {
    magic: String,
    background: Option<BackgroundRef>,
    opacity: f32,
    view_size: Option<(f32, f32)>,
    committed: Vec<Stroke>,
    /// Redo buffer, next-to-redo first.
    undone: Vec<Stroke>,
}

/// Error type for draft file operations
#[derive(Debug)]
pub enum DraftError {
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
}

impl std::fmt::Display for DraftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftError::Io(e) => write!(f, "I/O error: {}", e),
            DraftError::Serialize(e) => write!(f, "Serialization error: {}", e),
            DraftError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for DraftError {}

impl From<std::io::Error> for DraftError {
    fn from(e: std::io::Error) -> Self {
        DraftError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for DraftError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        DraftError::Serialize(e.to_string())
    }
}

/// Serialize a session draft. The in-progress stroke and brush selection are
/// not part of a draft.
pub fn draft_to_bytes(state: &CanvasState) -> Result<Vec<u8>, DraftError> {
    let draft = DraftFileV1 {
        magic: SKD_MAGIC_V1.to_string(),
        background: state.background().cloned(),
        opacity: state.opacity(),
        view_size: state.view_size(),
        committed: state.history.committed().to_vec(),
        undone: state.history.undone().cloned().collect(),
    };
    Ok(bincode::serialize(&draft)?)
}

pub fn draft_from_bytes(raw: &[u8]) -> Result<CanvasState, DraftError> {
    if raw.len() < 12 {
        return Err(DraftError::InvalidFormat("File too small".into()));
    }
    if raw.len() > MAX_DRAFT_BYTES {
        return Err(DraftError::InvalidFormat(format!(
            "Draft is {} bytes, limit is {}",
            raw.len(),
            MAX_DRAFT_BYTES
        )));
    }

    // bincode writes a String as an 8-byte length prefix + UTF-8, so bytes
    // 8..12 hold the 4-char magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != SKD_MAGIC_V1 {
        return Err(DraftError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }

    let draft: DraftFileV1 = bincode::deserialize(raw)?;
    let stroke_count = draft.committed.len() + draft.undone.len();
    if stroke_count > MAX_DRAFT_STROKES {
        return Err(DraftError::InvalidFormat(format!(
            "Draft holds {} strokes, which exceeds the maximum of {}",
            stroke_count, MAX_DRAFT_STROKES
        )));
    }
    if let Some(bad) = draft
        .committed
        .iter()
        .chain(draft.undone.iter())
        .find(|s| !(s.width().is_finite() && s.width() > 0.0) || s.path().iter().any(|p| !p.is_finite()))
    {
        return Err(DraftError::InvalidFormat(format!(
            "Stroke with width {} has unusable geometry",
            bad.width()
        )));
    }

    let mut state = CanvasState::new();
    state.set_background(draft.background);
    state.set_opacity(draft.opacity);
    if let Some((w, h)) = draft.view_size {
        state.set_view_size(w, h);
    }
    state.history = StrokeHistory::from_parts(draft.committed, draft.undone);
    Ok(state)
}

/// Save a session as a .skd draft file.
pub fn save_draft(state: &CanvasState, path: &Path) -> Result<(), DraftError> {
    let bytes = draft_to_bytes(state)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

pub fn load_draft(path: &Path) -> Result<CanvasState, DraftError> {
    let raw = std::fs::read(path)?;
    draft_from_bytes(&raw)
}

// ============================================================================
// INPUT EVENT LOGS
// ============================================================================

/// Error type for event log loading
#[derive(Debug)]
pub enum EventLogError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for EventLogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventLogError::Io(e) => write!(f, "I/O error: {}", e),
            EventLogError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for EventLogError {}

impl From<std::io::Error> for EventLogError {
    fn from(e: std::io::Error) -> Self {
        EventLogError::Io(e)
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(e: serde_json::Error) -> Self {
        EventLogError::Parse(e.to_string())
    }
}

/// Parse a JSON array of [`InputEvent`]s.
pub fn parse_event_log(json: &str) -> Result<Vec<InputEvent>, EventLogError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_event_log(path: &Path) -> Result<Vec<InputEvent>, EventLogError> {
    let text = std::fs::read_to_string(path)?;
    parse_event_log(&text)
}

/// Feed `events` through `state` in order. Returns how many changed it.
pub fn replay(state: &mut CanvasState, events: &[InputEvent]) -> usize {
    events.iter().filter(|e| state.apply(e)).count()
}

// ============================================================================
// SYNCHRONOUS SESSION LOADER (CLI / headless mode)
// ============================================================================

/// Load a session from a `.skd` draft or a `.json` event log.
///
/// An event log ending mid-drag leaves that stroke uncommitted, so it never
/// reaches the export.
pub fn load_session_sync(path: &Path) -> Result<CanvasState, String> {
    load_session_from(path, CanvasState::new())
}

/// Like [`load_session_sync`], but event logs replay on top of `initial`
/// (saved brush and opacity defaults). Drafts carry their own state.
pub fn load_session_from(path: &Path, initial: CanvasState) -> Result<CanvasState, String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if ext == "skd" {
        return load_draft(path).map_err(|e| e.to_string());
    }

    let events = load_event_log(path).map_err(|e| e.to_string())?;
    let mut state = initial;
    let applied = replay(&mut state, &events);
    crate::log_debug!(
        "Replayed {} events ({} applied) from {}",
        events.len(),
        applied,
        path.display()
    );
    Ok(state)
}
