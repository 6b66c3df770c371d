//! Pressed/released state of the on-screen keys.

use super::note_id::{NoteId, MAX_NOTE};

const KEY_COUNT: usize = MAX_NOTE as usize + 1;

/// Visual flag per note. The piano widget paints from this.
#[derive(Clone, Debug)]
pub struct KeyVisualState {
    pressed: [bool; KEY_COUNT],
}

impl KeyVisualState {
    pub fn new() -> Self {
        Self {
            pressed: [false; KEY_COUNT],
        }
    }

    /// Mark a key pressed or released.
    pub fn set(&mut self, note: NoteId, pressed: bool) {
        self.pressed[note.midi() as usize] = pressed;
    }

    pub fn is_pressed(&self, note: NoteId) -> bool {
        self.pressed[note.midi() as usize]
    }

    /// All pressed notes in ascending order.
    pub fn pressed_notes(&self) -> Vec<NoteId> {
        self.pressed
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p)
            .filter_map(|(n, _)| NoteId::from_midi(n as u8))
            .collect()
    }

    pub fn clear(&mut self) {
        self.pressed = [false; KEY_COUNT];
    }
}

impl Default for KeyVisualState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(n: u8) -> NoteId {
        NoteId::from_midi(n).unwrap()
    }

    #[test]
    fn test_set_and_clear() {
        let mut keys = KeyVisualState::new();
        keys.set(note(60), true);
        keys.set(note(64), true);
        assert!(keys.is_pressed(note(60)));
        assert!(!keys.is_pressed(note(62)));
        assert_eq!(keys.pressed_notes(), vec![note(60), note(64)]);

        keys.set(note(60), false);
        assert_eq!(keys.pressed_notes(), vec![note(64)]);

        keys.clear();
        assert!(keys.pressed_notes().is_empty());
    }

    #[test]
    fn test_extremes() {
        let mut keys = KeyVisualState::default();
        keys.set(note(0), true);
        keys.set(note(127), true);
        assert_eq!(keys.pressed_notes().len(), 2);
    }
}
