// ============================================================================
// SketchFE CLI — headless export of recorded sketch sessions
// ============================================================================
//
// Usage examples:
//   sketchfe --input session.json --output sketch.png
//   sketchfe -i session.json --background photo.jpg --opacity 0.6 -o out.jpg
//   sketchfe -i "recordings/*.json" --output-dir exported/ --format jpeg --quality 85
//   sketchfe -i draft.skd --no-background --width 720 --height 1280 -o plain.png
//
// Inputs are JSON input-event logs (replayed into a fresh session) or .skd
// drafts. Each session is flattened exactly like an in-app export.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::{BackgroundRef, CanvasState};
use crate::io::{FileBackgroundLoader, SaveFormat, encode_and_write, load_session_from, save_draft};
use crate::ops::compositor::{RenderOptions, ScaleMode};
use crate::project::SketchProject;
use crate::settings::SketchSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// SketchFE headless sketch exporter.
///
/// Replay recorded sketch sessions and flatten them into images.
#[derive(Parser, Debug)]
#[command(
    name = "sketchfe",
    about = "SketchFE headless sketch exporter",
    long_about = "Replay recorded input-event logs (.json) or drafts (.skd) and export\n\
                  the flattened sketch as PNG, JPEG, BMP or TGA.\n\n\
                  Example:\n  \
                  sketchfe --input session.json --output sketch.png\n  \
                  sketchfe -i \"logs/*.json\" --output-dir out/ --format jpeg"
)]
pub struct CliArgs {
    /// Input file(s): .json event logs or .skd drafts. Glob patterns accepted.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, bmp, tga. Inferred from --output when omitted.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100). Defaults to the saved setting.
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// Export width in pixels.
    #[arg(long, value_name = "PX")]
    pub width: Option<u32>,

    /// Export height in pixels.
    #[arg(long, value_name = "PX")]
    pub height: Option<u32>,

    /// Export strokes over plain white, ignoring the background photo.
    #[arg(long)]
    pub no_background: bool,

    /// Background placement: fit (letterbox) or fill (crop).
    #[arg(long, value_name = "MODE")]
    pub scale: Option<String>,

    /// Replace the session's background reference.
    #[arg(long, value_name = "IMAGE")]
    pub background: Option<String>,

    /// Replace the session's background opacity (0–1).
    #[arg(long, value_name = "0-1")]
    pub opacity: Option<f32>,

    /// Directory relative background paths resolve against.
    /// Defaults to each input file's directory.
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Also save the replayed session as a .skd draft. Single-file input only.
    #[arg(long, value_name = "FILE")]
    pub draft: Option<PathBuf>,

    /// Print per-file timing and mirror warnings to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let settings = SketchSettings::load();

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.draft.is_some() {
        eprintln!("error: --draft only accepts a single input file.");
        return ExitCode::FAILURE;
    }

    let options = match build_render_options(&args, &settings) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let format = match parse_format(args.format.as_deref(), args.output.as_deref(), settings.export_format) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let quality = args.quality.unwrap_or(settings.export_quality).clamp(1, 100);

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            format,
        ) else {
            eprintln!(
                "  error: cannot determine output path for '{}'.",
                input_path.display()
            );
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &args, &settings, &options, format, quality) {
            Ok(strokes) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({} strokes, {:.0}ms)",
                        output_path.display(),
                        strokes,
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                crate::log_err!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// Load, override, export and write one session. Returns the stroke count.
fn run_one(
    input: &Path,
    output: &Path,
    args: &CliArgs,
    settings: &SketchSettings,
    options: &RenderOptions,
    format: SaveFormat,
    quality: u8,
) -> Result<usize, String> {
    // -- Step 1: Load ----------------------------------------------------
    let mut initial = CanvasState::new().with_tool(settings.tool_properties());
    initial.set_opacity(settings.background_opacity);
    let state = load_session_from(input, initial).map_err(|e| format!("load failed: {}", e))?;
    let mut project = SketchProject::from_draft(input.to_path_buf(), state);
    let canvas = &mut project.canvas_state;

    // -- Step 2: Overrides -----------------------------------------------
    if let Some(bg) = &args.background {
        canvas.set_background(Some(BackgroundRef::new(bg.clone())));
    }
    if let Some(opacity) = args.opacity {
        canvas.set_opacity(opacity);
    }
    if canvas.history.is_drawing() {
        crate::log_warn!(
            "{}: log ends mid-stroke, the unfinished stroke is not exported",
            input.display()
        );
    }

    // -- Step 3: Render --------------------------------------------------
    let base_dir = args
        .base_dir
        .clone()
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let loader = FileBackgroundLoader::with_base_dir(base_dir);
    let image = project
        .export_blocking(options, &loader)
        .map_err(|e| format!("export failed: {}", e))?;

    // -- Step 4: Save ----------------------------------------------------
    encode_and_write(&image, output, format, quality).map_err(|e| format!("save failed: {}", e))?;

    if let Some(draft_path) = &args.draft {
        save_draft(&project.canvas_state, draft_path)
            .map_err(|e| format!("draft save failed: {}", e))?;
    }

    Ok(project.canvas_state.history.committed().len())
}

// ============================================================================
// Helpers
// ============================================================================

fn build_render_options(args: &CliArgs, settings: &SketchSettings) -> Result<RenderOptions, String> {
    let mut options = settings.render_options();
    if let Some(w) = args.width {
        options.width = w;
    }
    if let Some(h) = args.height {
        options.height = h;
    }
    if args.no_background {
        options.include_background = false;
    }
    if let Some(mode) = &args.scale {
        options.scale_mode = ScaleMode::from_name(mode)
            .ok_or_else(|| format!("unknown scale mode '{}' (expected fit or fill)", mode))?;
    }
    Ok(options)
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Choose the [`SaveFormat`] from `--format`, else the output extension,
/// else the saved default. An unknown `--format` value is an error.
fn parse_format(
    format_arg: Option<&str>,
    output: Option<&Path>,
    fallback: SaveFormat,
) -> Result<SaveFormat, String> {
    if let Some(name) = format_arg {
        return SaveFormat::from_name(name)
            .ok_or_else(|| format!("unknown format '{}' (expected png, jpeg, bmp or tga)", name));
    }
    Ok(output.and_then(SaveFormat::from_path).unwrap_or(fallback))
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, single-file input)
/// 2. `--output-dir` (derives filename from input stem)
/// 3. Next to the input, same stem, new extension
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: SaveFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}.{}", stem, ext)))
}
