//! Fixed set of UI-visible transfer trackers

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotState {
    pub path: String,
    /// Fraction complete in [0, 1]
    pub progress: f64,
    pub bytes: u64,
    pub done: bool,
}

impl SlotState {
    fn idle() -> Self {
        Self {
            path: String::new(),
            progress: 0.0,
            bytes: 0,
            done: true,
        }
    }
}

/// K trackers. An update lands on the slot already showing its path, otherwise on the first
/// finished slot. When every slot is busy with another path the update is not shown.
#[derive(Debug, Clone)]
pub struct ActiveSlots {
    slots: Vec<SlotState>,
}

impl ActiveSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![SlotState::idle(); capacity.max(1)],
        }
    }

    /// Apply an update and return the index of the slot that now shows it
    pub fn apply(&mut self, path: &str, progress: f64, bytes: u64, done: bool) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .position(|s| s.path == path)
            .or_else(|| self.slots.iter().position(|s| s.done))?;

        let slot = &mut self.slots[index];
        if slot.path != path {
            slot.path = path.to_string();
        }
        slot.progress = progress.clamp(0.0, 1.0);
        slot.bytes = bytes;
        slot.done = done;
        Some(index)
    }

    pub fn get(&self, index: usize) -> Option<&SlotState> {
        self.slots.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_match_by_path_first() {
        let mut slots = ActiveSlots::new(2);
        assert_eq!(slots.apply("a", 0.1, 10, false), Some(0));
        assert_eq!(slots.apply("b", 0.2, 20, false), Some(1));
        assert_eq!(slots.apply("a", 0.5, 50, false), Some(0));
        assert_eq!(slots.get(0).unwrap().bytes, 50);
    }

    #[test]
    fn finished_slots_are_recycled() {
        let mut slots = ActiveSlots::new(2);
        slots.apply("a", 0.5, 5, false);
        slots.apply("b", 1.0, 9, true);
        assert_eq!(slots.apply("c", 0.0, 0, false), Some(1));
        assert_eq!(slots.get(1).unwrap().path, "c");
    }

    #[test]
    fn busy_slots_drop_unknown_paths() {
        let mut slots = ActiveSlots::new(1);
        slots.apply("a", 0.3, 3, false);
        assert_eq!(slots.apply("b", 0.1, 1, false), None);
        assert_eq!(slots.get(0).unwrap().path, "a");
    }

    #[test]
    fn progress_is_clamped() {
        let mut slots = ActiveSlots::new(1);
        slots.apply("a", 1.7, 3, true);
        assert_eq!(slots.get(0).unwrap().progress, 1.0);
    }
}
