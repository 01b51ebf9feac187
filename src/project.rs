use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{BackgroundRef, CanvasState};
use crate::components::tools::InputEvent;
use crate::io::BackgroundLoader;
use crate::ops::compositor::{ExportError, RenderOptions, RenderSnapshot};

/// Single editing session: the canvas plus export bookkeeping.
///
/// At most one export runs per session. Exports render from a snapshot, so
/// the canvas stays editable while a worker is busy.
pub struct SketchProject {
    pub id: Uuid,
    pub canvas_state: CanvasState,
    /// Draft file this session was loaded from / saved to, if any.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    /// Display name (derived from path or "Sketch-X")
    pub name: String,
    export_in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when dropped, including on unwind.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to an export running on the rayon pool.
pub struct ExportJob {
    receiver: mpsc::Receiver<Result<RgbaImage, ExportError>>,
}

impl ExportJob {
    /// Non-blocking poll; `None` while the worker is still rendering.
    pub fn try_result(&self) -> Option<Result<RgbaImage, ExportError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                Some(Err(ExportError::Worker("result channel closed".into())))
            }
        }
    }

    /// Block until the worker delivers.
    pub fn wait(self) -> Result<RgbaImage, ExportError> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(ExportError::Worker("result channel closed".into())))
    }
}

impl SketchProject {
    pub fn new_untitled(untitled_counter: usize, background: Option<BackgroundRef>) -> Self {
        let mut canvas_state = CanvasState::new();
        canvas_state.set_background(background);
        Self::with_state(format!("Sketch-{}", untitled_counter), canvas_state, None)
    }

    pub fn from_draft(path: PathBuf, canvas_state: CanvasState) -> Self {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        Self::with_state(name, canvas_state, Some(path))
    }

    fn with_state(name: String, canvas_state: CanvasState, path: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            canvas_state,
            path,
            is_dirty: false,
            name,
            export_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Apply an input event, marking the session dirty when it changed.
    pub fn apply(&mut self, event: &InputEvent) -> bool {
        let changed = self.canvas_state.apply(event);
        if changed {
            self.is_dirty = true;
        }
        changed
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    /// True while an export for this session is running. UIs disable their
    /// save action on this.
    pub fn is_exporting(&self) -> bool {
        self.export_in_flight.load(Ordering::Acquire)
    }

    fn claim_export(&self) -> Result<InFlightGuard, ExportError> {
        self.export_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlightGuard(Arc::clone(&self.export_in_flight)))
            .map_err(|_| ExportError::Busy)
    }

    /// Render on the rayon pool. Fails with [`ExportError::Busy`] if an
    /// export is already running for this session.
    pub fn begin_export(
        &self,
        options: RenderOptions,
        loader: Arc<dyn BackgroundLoader>,
    ) -> Result<ExportJob, ExportError> {
        let guard = self.claim_export()?;
        let snapshot = self.canvas_state.snapshot();
        let name = self.name.clone();
        let (sender, receiver) = mpsc::channel();

        rayon::spawn(move || {
            let result = render_guarded(&snapshot, &options, loader.as_ref(), &name);
            // Release before delivering so the receiver can export again at once
            drop(guard);
            let _ = sender.send(result);
        });

        Ok(ExportJob { receiver })
    }

    /// Render on the calling thread, still honouring the single-export rule.
    pub fn export_blocking(
        &self,
        options: &RenderOptions,
        loader: &dyn BackgroundLoader,
    ) -> Result<RgbaImage, ExportError> {
        let _guard = self.claim_export()?;
        render_guarded(&self.canvas_state.snapshot(), options, loader, &self.name)
    }
}

fn render_guarded(
    snapshot: &RenderSnapshot,
    options: &RenderOptions,
    loader: &dyn BackgroundLoader,
    name: &str,
) -> Result<RgbaImage, ExportError> {
    let start = Instant::now();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        snapshot.render(options, loader)
    }))
    .unwrap_or_else(|panic_info| {
        let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Err(ExportError::Worker(msg))
    });

    match &result {
        Ok(_) => {
            crate::log_info!(
                "Export OK  \"{}\"  {}x{}  {} strokes  ({:.0}ms)",
                name,
                options.width,
                options.height,
                snapshot.strokes.len(),
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        Err(e) => {
            crate::log_err!("Export FAILED for \"{}\": {}", name, e);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{LoadError, MemoryBackgroundLoader};
    use std::sync::{Condvar, Mutex};

    /// Holds every load until released, so a test can observe an export
    /// mid-flight.
    struct GateLoader {
        open: Mutex<bool>,
        cond: Condvar,
    }

    impl GateLoader {
        fn new() -> Self {
            Self {
                open: Mutex::new(false),
                cond: Condvar::new(),
            }
        }

        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.cond.notify_all();
        }
    }

    impl BackgroundLoader for GateLoader {
        fn load(&self, background: &BackgroundRef) -> Result<RgbaImage, LoadError> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cond.wait(open).unwrap();
            }
            Err(LoadError::NotFound(background.to_string()))
        }
    }

    fn draw(project: &mut SketchProject) {
        project.apply(&InputEvent::Start { x: 1.0, y: 1.0 });
        project.apply(&InputEvent::Move { x: 8.0, y: 8.0 });
        project.apply(&InputEvent::End);
    }

    #[test]
    fn second_export_is_rejected_while_first_runs() {
        let mut project = SketchProject::new_untitled(1, Some(BackgroundRef::new("slow")));
        draw(&mut project);

        let gate = Arc::new(GateLoader::new());
        let job = project
            .begin_export(RenderOptions::new(16, 16, true), gate.clone())
            .unwrap();
        assert!(project.is_exporting());
        assert!(matches!(
            project.begin_export(RenderOptions::new(16, 16, true), gate.clone()),
            Err(ExportError::Busy)
        ));
        assert!(matches!(
            project.export_blocking(&RenderOptions::new(16, 16, true), gate.as_ref()),
            Err(ExportError::Busy)
        ));

        // Editing continues while the export is pending
        draw(&mut project);
        assert_eq!(project.canvas_state.history.committed().len(), 2);

        gate.release();
        let img = job.wait().unwrap();
        assert_eq!(img.dimensions(), (16, 16));
        assert!(!project.is_exporting());

        let again = project
            .begin_export(RenderOptions::new(8, 8, false), gate)
            .unwrap()
            .wait();
        assert!(again.is_ok());
    }

    #[test]
    fn polling_delivers_the_export_without_blocking() {
        let mut project = SketchProject::new_untitled(4, None);
        draw(&mut project);
        let job = project
            .begin_export(RenderOptions::new(12, 12, false), Arc::new(MemoryBackgroundLoader::new()))
            .unwrap();

        let mut result = None;
        for _ in 0..5_000 {
            if let Some(r) = job.try_result() {
                result = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let img = result.expect("export never delivered").unwrap();
        assert_eq!(img.dimensions(), (12, 12));
        assert_eq!(*img.get_pixel(4, 4), image::Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn dropped_worker_reports_an_error() {
        let (sender, receiver) = mpsc::channel();
        drop(sender);
        let job = ExportJob { receiver };
        assert!(matches!(job.try_result(), Some(Err(ExportError::Worker(_)))));
        assert!(matches!(job.wait(), Err(ExportError::Worker(_))));
    }

    #[test]
    fn failed_export_releases_the_session() {
        let project = SketchProject::new_untitled(2, None);
        let loader = MemoryBackgroundLoader::new();
        assert!(matches!(
            project.export_blocking(&RenderOptions::new(0, 10, false), &loader),
            Err(ExportError::InvalidDimensions { .. })
        ));
        assert!(!project.is_exporting());
        assert!(project
            .export_blocking(&RenderOptions::new(4, 4, false), &loader)
            .is_ok());
    }

    #[test]
    fn apply_tracks_dirty_state() {
        let mut project = SketchProject::new_untitled(3, None);
        assert_eq!(project.display_title(), "Sketch-3");
        assert!(!project.apply(&InputEvent::Undo));
        assert!(!project.is_dirty);
        draw(&mut project);
        assert_eq!(project.display_title(), "Sketch-3*");
        project.mark_clean();
        assert!(!project.is_dirty);
    }
}
