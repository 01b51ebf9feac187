use std::collections::VecDeque;

use crate::components::stroke::{Color, Point, Stroke, StrokeBuilder};

// ============================================================================
// STROKE HISTORY - Linear undo/redo timeline of committed strokes
// ============================================================================

/// Committed strokes, the redo buffer and the single in-progress stroke.
///
/// `committed` and `undone` form one linear timeline: undo moves the newest
/// committed stroke to the front of `undone`, redo moves it back, and any new
/// commit drops everything in `undone`. There is no branching.
///
/// Sequencing mistakes (extending with nothing in progress, double commits,
/// undo on an empty history) are silent no-ops; the boolean results only say
/// whether anything changed.
#[derive(Clone, Debug, Default)]
pub struct StrokeHistory {
    committed: Vec<Stroke>,
    /// Front = most recently undone = next stroke `redo` restores.
    undone: VecDeque<Stroke>,
    in_progress: Option<StrokeBuilder>,
    /// Running memory total across both lists.
    total_memory: usize,
}

impl StrokeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a history from saved lists (`undone` front-first).
    pub fn from_parts(committed: Vec<Stroke>, undone: Vec<Stroke>) -> Self {
        let total_memory = committed
            .iter()
            .chain(undone.iter())
            .map(Stroke::memory_size)
            .sum();
        Self {
            committed,
            undone: undone.into(),
            in_progress: None,
            total_memory,
        }
    }

    /// Open a new stroke at `at`. Returns `None` without touching anything if
    /// a stroke is already in progress or the inputs are unusable.
    pub fn start_stroke(
        &mut self,
        color: Color,
        width: f32,
        is_eraser: bool,
        at: Point,
    ) -> Option<&StrokeBuilder> {
        if self.in_progress.is_some() {
            crate::log_debug!("start_stroke ignored: stroke already in progress");
            return None;
        }
        if !(width.is_finite() && width > 0.0) || !at.is_finite() {
            crate::log_debug!("start_stroke ignored: width={} at={:?}", width, at);
            return None;
        }
        self.in_progress = Some(StrokeBuilder::new(color, width, is_eraser, at));
        self.in_progress.as_ref()
    }

    pub fn extend_stroke(&mut self, point: Point) -> bool {
        match self.in_progress.as_mut() {
            Some(builder) if point.is_finite() => {
                builder.push(point);
                true
            }
            _ => false,
        }
    }

    /// Finalize the in-progress stroke on top of the stack. Any new commit
    /// invalidates the redo buffer.
    pub fn commit_stroke(&mut self) -> bool {
        let Some(builder) = self.in_progress.take() else {
            crate::log_debug!("commit_stroke ignored: nothing in progress");
            return false;
        };
        for stroke in self.undone.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(stroke.memory_size());
        }
        let stroke = builder.finish();
        self.total_memory += stroke.memory_size();
        self.committed.push(stroke);
        true
    }

    /// Drop the in-progress stroke without leaving any trace in history.
    pub fn cancel_stroke(&mut self) -> bool {
        self.in_progress.take().is_some()
    }

    pub fn undo(&mut self) -> bool {
        match self.committed.pop() {
            Some(stroke) => {
                self.undone.push_front(stroke);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.undone.pop_front() {
            Some(stroke) => {
                self.committed.push(stroke);
                true
            }
            None => false,
        }
    }

    /// Empty both lists. Not undoable. An in-progress stroke is left alone so
    /// a clear arriving mid-drag does not break the gesture.
    pub fn clear_all(&mut self) {
        self.committed.clear();
        self.undone.clear();
        self.total_memory = 0;
    }

    pub fn can_undo(&self) -> bool {
        !self.committed.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    pub fn is_drawing(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Committed strokes in paint order (oldest first).
    pub fn committed(&self) -> &[Stroke] {
        &self.committed
    }

    /// Redo buffer, next-to-redo first.
    pub fn undone(&self) -> impl ExactSizeIterator<Item = &Stroke> + '_ {
        self.undone.iter()
    }

    pub fn in_progress(&self) -> Option<&StrokeBuilder> {
        self.in_progress.as_ref()
    }

    pub fn redo_count(&self) -> usize {
        self.undone.len()
    }

    /// Approximate bytes held by committed strokes and the redo buffer.
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(history: &mut StrokeHistory, x: f32) -> Stroke {
        history.start_stroke(Color::BLACK, 3.0, false, Point::new(x, 0.0));
        history.extend_stroke(Point::new(x, 10.0));
        assert!(history.commit_stroke());
        history.committed().last().cloned().unwrap()
    }

    fn undone(history: &StrokeHistory) -> Vec<Stroke> {
        history.undone().cloned().collect()
    }

    #[test]
    fn three_point_stroke_is_committed_verbatim() {
        let mut h = StrokeHistory::new();
        assert!(h.start_stroke(Color::BLACK, 5.0, false, Point::new(10.0, 10.0)).is_some());
        assert!(h.extend_stroke(Point::new(20.0, 20.0)));
        assert!(h.extend_stroke(Point::new(30.0, 10.0)));
        assert!(h.commit_stroke());

        assert_eq!(h.committed().len(), 1);
        let s = &h.committed()[0];
        assert_eq!(
            s.path(),
            &[
                Point::new(10.0, 10.0),
                Point::new(20.0, 20.0),
                Point::new(30.0, 10.0)
            ]
        );
        assert_eq!(s.color(), Color::BLACK);
        assert_eq!(s.width(), 5.0);
        assert!(!s.is_eraser());
        assert!(!h.is_drawing());
    }

    #[test]
    fn undo_then_redo_restores_order() {
        let mut h = StrokeHistory::new();
        let a = commit(&mut h, 1.0);
        let b = commit(&mut h, 2.0);

        assert!(h.undo());
        assert_eq!(h.committed(), &[a.clone()]);
        assert_eq!(undone(&h), vec![b.clone()]);

        assert!(h.redo());
        assert_eq!(h.committed(), &[a, b]);
        assert!(!h.can_redo());
    }

    #[test]
    fn new_commit_discards_redo_buffer() {
        let mut h = StrokeHistory::new();
        let a = commit(&mut h, 1.0);
        let _b = commit(&mut h, 2.0);
        h.undo();
        let c = commit(&mut h, 3.0);

        assert_eq!(h.committed(), &[a, c]);
        assert_eq!(h.redo_count(), 0);
        assert!(!h.redo());
    }

    #[test]
    fn k_undos_split_timeline_in_replay_order() {
        for n in 1..=6usize {
            for k in 0..=n {
                let mut h = StrokeHistory::new();
                let all: Vec<Stroke> = (0..n).map(|i| commit(&mut h, i as f32)).collect();
                for _ in 0..k {
                    assert!(h.undo());
                }
                assert_eq!(h.committed(), &all[..n - k]);
                assert_eq!(undone(&h), all[n - k..].to_vec());

                // Replaying every redo gives back the full timeline.
                while h.redo() {}
                assert_eq!(h.committed(), &all[..]);
            }
        }
    }

    #[test]
    fn undo_and_redo_on_empty_are_noops() {
        let mut h = StrokeHistory::new();
        assert!(!h.undo());
        assert!(!h.redo());
        assert!(!h.can_undo());
        assert!(!h.can_redo());
        assert!(h.committed().is_empty());
        assert_eq!(h.redo_count(), 0);
    }

    #[test]
    fn cancelled_drag_leaves_no_trace() {
        let mut h = StrokeHistory::new();
        let a = commit(&mut h, 1.0);
        let b = commit(&mut h, 2.0);
        h.undo();

        h.start_stroke(Color::rgb(255, 0, 0), 8.0, false, Point::new(5.0, 5.0));
        h.extend_stroke(Point::new(6.0, 6.0));
        h.extend_stroke(Point::new(7.0, 7.0));
        assert!(h.cancel_stroke());

        assert_eq!(h.committed(), &[a]);
        assert_eq!(undone(&h), vec![b]);
        assert!(!h.is_drawing());
        assert!(!h.commit_stroke());
    }

    #[test]
    fn sequencing_errors_are_ignored() {
        let mut h = StrokeHistory::new();
        assert!(!h.extend_stroke(Point::new(1.0, 1.0)));
        assert!(!h.commit_stroke());
        assert!(!h.cancel_stroke());

        h.start_stroke(Color::BLACK, 2.0, false, Point::new(0.0, 0.0));
        assert!(h.start_stroke(Color::WHITE, 9.0, true, Point::new(50.0, 50.0)).is_none());
        assert_eq!(h.in_progress().unwrap().color(), Color::BLACK);

        assert!(h.commit_stroke());
        assert!(!h.commit_stroke());
        assert_eq!(h.committed().len(), 1);
    }

    #[test]
    fn unusable_inputs_do_not_open_a_stroke() {
        let mut h = StrokeHistory::new();
        assert!(h.start_stroke(Color::BLACK, 0.0, false, Point::new(0.0, 0.0)).is_none());
        assert!(h.start_stroke(Color::BLACK, f32::NAN, false, Point::new(0.0, 0.0)).is_none());
        assert!(h.start_stroke(Color::BLACK, 2.0, false, Point::new(f32::INFINITY, 0.0)).is_none());
        assert!(!h.is_drawing());

        h.start_stroke(Color::BLACK, 2.0, false, Point::new(0.0, 0.0));
        assert!(!h.extend_stroke(Point::new(f32::NAN, 1.0)));
        assert_eq!(h.in_progress().unwrap().points().len(), 1);
    }

    #[test]
    fn clear_all_empties_both_lists() {
        let mut h = StrokeHistory::new();
        commit(&mut h, 1.0);
        commit(&mut h, 2.0);
        h.undo();
        h.clear_all();
        assert!(!h.can_undo());
        assert!(!h.can_redo());
        assert_eq!(h.memory_usage(), 0);
        h.clear_all();
        assert!(!h.undo());
    }

    #[test]
    fn memory_tracks_commits_and_redo_drops() {
        let mut h = StrokeHistory::new();
        let a = commit(&mut h, 1.0);
        let b = commit(&mut h, 2.0);
        assert_eq!(h.memory_usage(), a.memory_size() + b.memory_size());
        h.undo();
        assert_eq!(h.memory_usage(), a.memory_size() + b.memory_size());
        let c = commit(&mut h, 3.0);
        assert_eq!(h.memory_usage(), a.memory_size() + c.memory_size());
    }

    #[test]
    fn from_parts_keeps_redo_order() {
        let a = Stroke::new(Color::BLACK, 1.0, false, vec![Point::new(0.0, 0.0)]);
        let b = Stroke::new(Color::WHITE, 2.0, true, vec![Point::new(1.0, 1.0)]);
        let c = Stroke::new(Color::BLACK, 3.0, false, vec![Point::new(2.0, 2.0)]);
        let mut h = StrokeHistory::from_parts(vec![a.clone()], vec![b.clone(), c.clone()]);
        assert!(h.redo());
        assert_eq!(h.committed(), &[a, b]);
        assert_eq!(undone(&h), vec![c]);
    }
}
