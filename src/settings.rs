use std::path::PathBuf;

use crate::components::stroke::Color;
use crate::components::tools::{DEFAULT_BRUSH_WIDTH, MAX_BRUSH_WIDTH, MIN_BRUSH_WIDTH, ToolProperties};
use crate::io::SaveFormat;
use crate::ops::compositor::{
    DEFAULT_EXPORT_HEIGHT, DEFAULT_EXPORT_WIDTH, MAX_EXPORT_DIM, RenderOptions, ScaleMode,
};

/// Settings that persist across sessions
#[derive(Clone, Debug, PartialEq)]
pub struct SketchSettings {
    /// Export raster size in pixels
    pub export_width: u32,
    pub export_height: u32,
    pub scale_mode: ScaleMode,
    /// Draw the reference photo under the strokes on export
    pub include_background: bool,
    pub export_format: SaveFormat,
    /// JPEG quality (1-100)
    pub export_quality: u8,
    /// Brush selection a new session starts with
    pub brush_color: Color,
    pub brush_width: f32,
    /// Background opacity a new session starts with
    pub background_opacity: f32,
}

impl Default for SketchSettings {
    fn default() -> Self {
        Self {
            export_width: DEFAULT_EXPORT_WIDTH,
            export_height: DEFAULT_EXPORT_HEIGHT,
            scale_mode: ScaleMode::Fit,
            include_background: true,
            export_format: SaveFormat::Png,
            export_quality: 90,
            brush_color: Color::BLACK,
            brush_width: DEFAULT_BRUSH_WIDTH,
            background_opacity: 1.0,
        }
    }
}

impl SketchSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/sketchfe/sketchfe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\SketchFE\sketchfe_settings.cfg
    /// On macOS:   ~/Library/Application Support/SketchFE/sketchfe_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("sketchfe");
            return Some(config_dir.join("sketchfe_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("SketchFE").join("sketchfe_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("SketchFE")
                    .join("sketchfe_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("sketchfe_settings.cfg")))
        }
    }

    pub fn to_config_string(&self) -> String {
        let format_str = match self.export_format {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpeg",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
        };
        format!(
            "export_width={}\n\
             export_height={}\n\
             scale_mode={}\n\
             include_background={}\n\
             export_format={format_str}\n\
             export_quality={}\n\
             brush_color={}\n\
             brush_width={}\n\
             background_opacity={}\n",
            self.export_width,
            self.export_height,
            self.scale_mode.name(),
            self.include_background,
            self.export_quality,
            self.brush_color.to_hex(),
            self.brush_width,
            self.background_opacity,
        )
    }

    /// Parse `key=value` lines. Unknown keys and unparsable values keep their
    /// defaults; out-of-range numbers are clamped.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "export_width" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.export_width = v.clamp(1, MAX_EXPORT_DIM);
                    }
                }
                "export_height" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.export_height = v.clamp(1, MAX_EXPORT_DIM);
                    }
                }
                "scale_mode" => {
                    if let Some(m) = ScaleMode::from_name(val) {
                        s.scale_mode = m;
                    }
                }
                "include_background" => {
                    s.include_background = val != "false";
                }
                "export_format" => {
                    if let Some(f) = SaveFormat::from_name(val) {
                        s.export_format = f;
                    }
                }
                "export_quality" => {
                    if let Ok(v) = val.parse::<u8>() {
                        s.export_quality = v.clamp(1, 100);
                    }
                }
                "brush_color" => {
                    if let Some(c) = Color::from_hex(val) {
                        s.brush_color = c;
                    }
                }
                "brush_width" => {
                    if let Ok(v) = val.parse::<f32>()
                        && v.is_finite()
                    {
                        s.brush_width = v.clamp(MIN_BRUSH_WIDTH, MAX_BRUSH_WIDTH);
                    }
                }
                "background_opacity" => {
                    if let Ok(v) = val.parse::<f32>()
                        && v.is_finite()
                    {
                        s.background_opacity = v.clamp(0.0, 1.0);
                    }
                }
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk. Failures are logged, never fatal.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, self.to_config_string()) {
            crate::log_warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    /// Load settings from disk, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        Self::from_config_str(&content)
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions::new(self.export_width, self.export_height, self.include_background)
            .with_scale_mode(self.scale_mode)
    }

    pub fn tool_properties(&self) -> ToolProperties {
        ToolProperties {
            color: self.brush_color,
            brush_width: self.brush_width,
            eraser: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_string_round_trips() {
        let settings = SketchSettings {
            export_width: 720,
            export_height: 1280,
            scale_mode: ScaleMode::Fill,
            include_background: false,
            export_format: SaveFormat::Jpeg,
            export_quality: 75,
            brush_color: Color::rgb(200, 10, 10),
            brush_width: 12.5,
            background_opacity: 0.4,
        };
        let parsed = SketchSettings::from_config_str(&settings.to_config_string());
        assert_eq!(parsed, settings);
    }

    #[test]
    fn bad_values_keep_defaults_and_ranges_clamp() {
        let parsed = SketchSettings::from_config_str(
            "# comment\n\
             export_width=abc\n\
             export_height=999999\n\
             scale_mode=stretch\n\
             export_quality=0\n\
             brush_color=purple\n\
             brush_width=-3\n\
             background_opacity=7\n\
             unknown_key=1\n\
             no equals sign\n",
        );
        let d = SketchSettings::default();
        assert_eq!(parsed.export_width, d.export_width);
        assert_eq!(parsed.export_height, MAX_EXPORT_DIM);
        assert_eq!(parsed.scale_mode, ScaleMode::Fit);
        assert_eq!(parsed.export_quality, 1);
        assert_eq!(parsed.brush_color, Color::BLACK);
        assert_eq!(parsed.brush_width, MIN_BRUSH_WIDTH);
        assert_eq!(parsed.background_opacity, 1.0);
    }

    #[test]
    fn defaults_export_full_hd_portrait() {
        let opts = SketchSettings::default().render_options();
        assert_eq!((opts.width, opts.height), (1080, 1920));
        assert!(opts.include_background);
        assert_eq!(opts.scale_mode, ScaleMode::Fit);
    }
}
