//! Computer keyboard as a piano.
//!
//! The Z row plays white keys and the S row the black keys between them;
//! the Q row continues an octave higher. `-` and `=` shift the octave.

use std::collections::HashMap;

use eframe::egui::Key;

use crate::notes::{NoteEvent, NoteId, Velocity};

/// Velocity for keys without pressure.
const KEY_VELOCITY: f32 = 0.8;

/// Semitone offset of each playable key from the base C.
fn semitone_for(key: Key) -> Option<i32> {
    let semitone = match key {
        Key::Z => 0,
        Key::S => 1,
        Key::X => 2,
        Key::D => 3,
        Key::C => 4,
        Key::V => 5,
        Key::G => 6,
        Key::B => 7,
        Key::H => 8,
        Key::N => 9,
        Key::J => 10,
        Key::M => 11,
        Key::Q => 12,
        Key::Num2 => 13,
        Key::W => 14,
        Key::Num3 => 15,
        Key::E => 16,
        Key::R => 17,
        Key::Num5 => 18,
        Key::T => 19,
        Key::Num6 => 20,
        Key::Y => 21,
        Key::Num7 => 22,
        Key::U => 23,
        Key::I => 24,
        _ => return None,
    };
    Some(semitone)
}

/// Maps key presses to note events and remembers which note each held key
/// started, so an octave shift never strands a note.
#[derive(Debug)]
pub struct ComputerKeyboard {
    base: NoteId,
    held: HashMap<Key, NoteId>,
}

impl ComputerKeyboard {
    pub fn new(base: NoteId) -> Self {
        Self {
            base,
            held: HashMap::new(),
        }
    }

    pub fn base(&self) -> NoteId {
        self.base
    }

    /// Translate one key event. Repeats and unmapped keys yield nothing.
    pub fn handle(&mut self, key: Key, pressed: bool, repeat: bool) -> Option<NoteEvent> {
        if repeat {
            return None;
        }
        if pressed {
            match key {
                Key::Minus => {
                    self.shift_octave(-1);
                    return None;
                }
                Key::Equals | Key::Plus => {
                    self.shift_octave(1);
                    return None;
                }
                _ => {}
            }
            if self.held.contains_key(&key) {
                return None;
            }
            let note = self.base.offset(semitone_for(key)?)?;
            self.held.insert(key, note);
            Some(NoteEvent::on(note, Velocity::new(KEY_VELOCITY)))
        } else {
            self.held.remove(&key).map(NoteEvent::off)
        }
    }

    /// Forget held keys; the caller releases the notes through a panic.
    pub fn clear(&mut self) {
        self.held.clear();
    }

    fn shift_octave(&mut self, octaves: i32) {
        if let Some(base) = self.base.offset(octaves * 12) {
            // Keep the top row playable
            if base.offset(24).is_some() {
                self.base = base;
            }
        }
    }
}

impl Default for ComputerKeyboard {
    fn default() -> Self {
        Self::new(NoteId::from_midi_masked(48))
    }
}
