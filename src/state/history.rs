/// Undo/redo history of adjustment snapshots
///
/// Snapshots are whole `AdjustmentState` values. Rapid pushes (a slider
/// drag) inside the debounce window collapse into the newest entry, so one
/// gesture costs one undo step.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::state::adjustments::AdjustmentState;

#[derive(Debug)]
pub struct History {
    states: VecDeque<AdjustmentState>,
    cursor: usize,
    depth: usize,
    debounce: Duration,
    last_push: Option<Instant>,
}

impl History {
    pub fn new(depth: usize, debounce: Duration) -> Self {
        let mut states = VecDeque::with_capacity(depth.max(1));
        states.push_back(AdjustmentState::default());
        Self {
            states,
            cursor: 0,
            depth: depth.max(1),
            debounce,
            last_push: None,
        }
    }

    /// Start over from a fresh baseline (new image loaded)
    pub fn reset(&mut self, baseline: AdjustmentState) {
        self.states.clear();
        self.states.push_back(baseline);
        self.cursor = 0;
        self.last_push = None;
    }

    pub fn push(&mut self, snapshot: AdjustmentState) {
        self.push_at(snapshot, Instant::now());
    }

    pub fn push_at(&mut self, snapshot: AdjustmentState, now: Instant) {
        if self.states.get(self.cursor) == Some(&snapshot) {
            return;
        }
        self.states.truncate(self.cursor + 1);

        let coalesce = self.cursor > 0
            && self
                .last_push
                .is_some_and(|last| now.saturating_duration_since(last) < self.debounce);
        if coalesce {
            if let Some(top) = self.states.back_mut() {
                *top = snapshot;
            }
        } else {
            self.states.push_back(snapshot);
            if self.states.len() > self.depth {
                self.states.pop_front();
            }
        }
        self.cursor = self.states.len() - 1;
        self.last_push = Some(now);
    }

    pub fn undo(&mut self) -> Option<AdjustmentState> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.last_push = None;
        self.states.get(self.cursor).cloned()
    }

    pub fn redo(&mut self) -> Option<AdjustmentState> {
        if self.cursor + 1 >= self.states.len() {
            return None;
        }
        self.cursor += 1;
        self.last_push = None;
        self.states.get(self.cursor).cloned()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_exposure(value: f32) -> AdjustmentState {
        AdjustmentState {
            exposure: value,
            ..Default::default()
        }
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = History::new(50, Duration::ZERO);
        let t0 = Instant::now();
        history.push_at(with_exposure(1.0), t0);
        history.push_at(with_exposure(2.0), t0 + Duration::from_secs(1));

        assert_eq!(history.undo().unwrap().exposure, 1.0);
        assert_eq!(history.undo().unwrap().exposure, 0.0);
        assert!(history.undo().is_none());
        assert_eq!(history.redo().unwrap().exposure, 1.0);
    }

    #[test]
    fn test_debounce_coalesces_drag() {
        let mut history = History::new(50, Duration::from_millis(300));
        let t0 = Instant::now();
        history.push_at(with_exposure(0.1), t0);
        history.push_at(with_exposure(0.2), t0 + Duration::from_millis(100));
        history.push_at(with_exposure(0.3), t0 + Duration::from_millis(200));
        assert_eq!(history.len(), 2);

        history.push_at(with_exposure(0.4), t0 + Duration::from_secs(2));
        assert_eq!(history.len(), 3);
        assert_eq!(history.undo().unwrap().exposure, 0.3);
    }

    #[test]
    fn test_depth_bound() {
        let mut history = History::new(3, Duration::ZERO);
        let t0 = Instant::now();
        for i in 1..=5 {
            history.push_at(with_exposure(i as f32), t0 + Duration::from_secs(i));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.undo().unwrap().exposure, 4.0);
        assert_eq!(history.undo().unwrap().exposure, 3.0);
        assert!(!history.can_undo());
    }

    #[test]
    fn test_push_after_undo_drops_redo() {
        let mut history = History::new(10, Duration::ZERO);
        let t0 = Instant::now();
        history.push_at(with_exposure(1.0), t0);
        history.undo();
        history.push_at(with_exposure(5.0), t0 + Duration::from_secs(1));
        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
    }
}
