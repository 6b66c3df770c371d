//! Active note bookkeeping.
//!
//! Tracks which notes are currently sounding so that a note is attacked at
//! most once and released at most once, and so that everything can be
//! force-released on focus loss, device loss or instrument switches.

use std::collections::BTreeSet;

use log::{debug, warn};

use super::key_visual::KeyVisualState;
use super::note_id::{NoteId, Velocity};
use crate::engine::AudioError;

/// Something that can start and stop notes.
pub trait NoteOutput {
    /// Start a note.
    fn attack(&mut self, note: NoteId, velocity: Velocity) -> Result<(), AudioError>;
    /// Stop a note.
    fn release(&mut self, note: NoteId) -> Result<(), AudioError>;
}

/// Set of sounding notes plus the matching key visuals.
///
/// Membership follows the last event per note: a note is in the set iff the
/// last event for it was an "on" and no "off" or panic happened since.
/// A failed attack or release is logged and does not change that rule.
#[derive(Debug, Default)]
pub struct ActiveNoteSet {
    active: BTreeSet<NoteId>,
    keys: KeyVisualState,
}

impl ActiveNoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attack `note` unless it is already sounding.
    ///
    /// Returns true if an attack was issued.
    pub fn note_on<O: NoteOutput + ?Sized>(
        &mut self,
        note: NoteId,
        velocity: Velocity,
        output: &mut O,
    ) -> bool {
        if self.active.contains(&note) {
            debug!("Ignoring duplicate note-on for {}", note);
            return false;
        }

        if let Err(e) = output.attack(note, velocity) {
            warn!("Attack failed for {}: {}", note, e);
        }
        self.keys.set(note, true);
        self.active.insert(note);
        true
    }

    /// Release `note` if it is sounding.
    ///
    /// Returns true if a release was issued.
    pub fn note_off<O: NoteOutput + ?Sized>(&mut self, note: NoteId, output: &mut O) -> bool {
        if !self.active.remove(&note) {
            debug!("Ignoring note-off for silent note {}", note);
            return false;
        }

        if let Err(e) = output.release(note) {
            warn!("Release failed for {}: {}", note, e);
        }
        self.keys.set(note, false);
        true
    }

    /// Release every sounding note and empty the set.
    ///
    /// Returns the number of releases issued.
    pub fn panic<O: NoteOutput + ?Sized>(&mut self, output: &mut O) -> usize {
        let notes = std::mem::take(&mut self.active);
        for &note in &notes {
            if let Err(e) = output.release(note) {
                warn!("Release failed for {} during panic: {}", note, e);
            }
            self.keys.set(note, false);
        }
        if !notes.is_empty() {
            debug!("Panic released {} note(s)", notes.len());
        }
        notes.len()
    }

    pub fn contains(&self, note: NoteId) -> bool {
        self.active.contains(&note)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Sounding notes in ascending order.
    pub fn notes(&self) -> impl Iterator<Item = NoteId> + '_ {
        self.active.iter().copied()
    }

    pub fn key_visuals(&self) -> &KeyVisualState {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingOutput {
        attacks: Vec<NoteId>,
        releases: Vec<NoteId>,
        fail: bool,
    }

    impl NoteOutput for RecordingOutput {
        fn attack(&mut self, note: NoteId, _velocity: Velocity) -> Result<(), AudioError> {
            self.attacks.push(note);
            if self.fail {
                Err(AudioError::NotReady)
            } else {
                Ok(())
            }
        }

        fn release(&mut self, note: NoteId) -> Result<(), AudioError> {
            self.releases.push(note);
            if self.fail {
                Err(AudioError::NotReady)
            } else {
                Ok(())
            }
        }
    }

    fn note(n: u8) -> NoteId {
        NoteId::from_midi(n).unwrap()
    }

    #[test]
    fn test_duplicate_note_on_attacks_once() {
        let mut set = ActiveNoteSet::new();
        let mut out = RecordingOutput::default();

        assert!(set.note_on(note(60), Velocity::MAX, &mut out));
        assert!(!set.note_on(note(60), Velocity::MAX, &mut out));
        assert!(!set.note_on(note(60), Velocity::new(0.2), &mut out));

        assert_eq!(out.attacks, vec![note(60)]);
        assert!(set.contains(note(60)));
        assert!(set.key_visuals().is_pressed(note(60)));
    }

    #[test]
    fn test_note_off_for_silent_note_is_noop() {
        let mut set = ActiveNoteSet::new();
        let mut out = RecordingOutput::default();

        assert!(!set.note_off(note(60), &mut out));
        assert!(out.releases.is_empty());

        set.note_on(note(60), Velocity::MAX, &mut out);
        assert!(set.note_off(note(60), &mut out));
        assert!(!set.note_off(note(60), &mut out));
        assert_eq!(out.releases, vec![note(60)]);
        assert!(!set.key_visuals().is_pressed(note(60)));
    }

    #[test]
    fn test_replay_matches_last_event_per_note() {
        // Deterministic pseudo-random sequence of on/off events.
        let mut set = ActiveNoteSet::new();
        let mut out = RecordingOutput::default();
        let mut last: HashMap<u8, bool> = HashMap::new();
        let mut seed: u32 = 0x1234_5678;

        for _ in 0..2000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let n = 48 + ((seed >> 8) % 24) as u8;
            let on = (seed >> 20) % 3 != 0;
            if on {
                set.note_on(note(n), Velocity::MAX, &mut out);
            } else {
                set.note_off(note(n), &mut out);
            }
            last.insert(n, on);
        }

        let expected: BTreeSet<NoteId> = last
            .iter()
            .filter(|&(_, &on)| on)
            .map(|(&n, _)| note(n))
            .collect();
        let actual: BTreeSet<NoteId> = set.notes().collect();
        assert_eq!(actual, expected);
        assert_eq!(set.key_visuals().pressed_notes().len(), expected.len());
    }

    #[test]
    fn test_panic_releases_each_note_once() {
        for count in [0usize, 1, 10] {
            let mut set = ActiveNoteSet::new();
            let mut out = RecordingOutput::default();
            for i in 0..count {
                set.note_on(note(40 + i as u8), Velocity::MAX, &mut out);
            }

            let released = set.panic(&mut out);
            assert_eq!(released, count);
            assert_eq!(out.releases.len(), count);
            assert!(set.is_empty());
            assert!(set.key_visuals().pressed_notes().is_empty());

            let mut sorted = out.releases.clone();
            sorted.dedup();
            assert_eq!(sorted.len(), count, "each note released exactly once");
        }
    }

    #[test]
    fn test_failures_do_not_corrupt_membership() {
        let mut set = ActiveNoteSet::new();
        let mut out = RecordingOutput {
            fail: true,
            ..Default::default()
        };

        assert!(set.note_on(note(60), Velocity::MAX, &mut out));
        assert!(set.contains(note(60)));
        assert!(!set.note_on(note(60), Velocity::MAX, &mut out));
        assert_eq!(out.attacks.len(), 1);

        assert!(set.note_off(note(60), &mut out));
        assert!(!set.contains(note(60)));

        set.note_on(note(62), Velocity::MAX, &mut out);
        assert_eq!(set.panic(&mut out), 1);
        assert!(set.is_empty());
    }
}
