//! Note identifiers and velocities.
//!
//! A note can be addressed either by its MIDI number (0-127) or by its
//! scientific pitch name ("C4", "F#2", "Bb-1"). Both forms convert into
//! each other without loss. MIDI 60 is "C4".

use std::fmt;
use std::str::FromStr;

/// Pitch class names using sharps, indexed by semitone.
const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Highest valid MIDI note number.
pub const MAX_NOTE: u8 = 127;

/// A MIDI note number in the range 0-127.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteId(u8);

impl NoteId {
    /// Middle C (MIDI 60).
    pub const MIDDLE_C: NoteId = NoteId(60);

    /// Concert A (MIDI 69, 440 Hz).
    pub const A4: NoteId = NoteId(69);

    /// Create a note from a MIDI number. Returns None above 127.
    pub fn from_midi(number: u8) -> Option<Self> {
        (number <= MAX_NOTE).then_some(Self(number))
    }

    /// Create a note from a MIDI number, masking to 7 bits like the wire format does.
    pub fn from_midi_masked(number: u8) -> Self {
        Self(number & 0x7F)
    }

    /// The MIDI note number.
    pub fn midi(self) -> u8 {
        self.0
    }

    /// Semitone within the octave (0 = C, 11 = B).
    pub fn semitone(self) -> u8 {
        self.0 % 12
    }

    /// Octave number in scientific pitch notation (MIDI 60 = octave 4).
    pub fn octave(self) -> i8 {
        (self.0 / 12) as i8 - 1
    }

    /// Whether this note sits on a black key.
    pub fn is_black_key(self) -> bool {
        matches!(self.semitone(), 1 | 3 | 6 | 8 | 10)
    }

    /// Equal-tempered frequency in Hz (A4 = 440 Hz).
    pub fn frequency(self) -> f32 {
        440.0 * 2f32.powf((self.0 as f32 - 69.0) / 12.0)
    }

    /// Offset this note by a number of semitones, staying within 0-127.
    pub fn offset(self, semitones: i32) -> Option<Self> {
        let shifted = self.0 as i32 + semitones;
        if (0..=MAX_NOTE as i32).contains(&shifted) {
            Some(Self(shifted as u8))
        } else {
            None
        }
    }

    /// Canonical pitch name, e.g. "C#4".
    pub fn name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PITCH_NAMES[self.semitone() as usize], self.octave())
    }
}

/// Error returned when a pitch name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteParseError {
    /// The string is empty or has no octave part.
    Malformed(String),
    /// The letter is not A-G.
    UnknownPitch(String),
    /// The note falls outside MIDI 0-127.
    OutOfRange(String),
}

impl fmt::Display for NoteParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(s) => write!(f, "Malformed note name: {:?}", s),
            Self::UnknownPitch(s) => write!(f, "Unknown pitch letter in {:?}", s),
            Self::OutOfRange(s) => write!(f, "Note {:?} is outside the MIDI range", s),
        }
    }
}

impl std::error::Error for NoteParseError {}

impl FromStr for NoteId {
    type Err = NoteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let letter = chars
            .next()
            .ok_or_else(|| NoteParseError::Malformed(s.to_string()))?;

        let base: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(NoteParseError::UnknownPitch(s.to_string())),
        };

        let rest = chars.as_str();
        let (accidental, octave_part) = if let Some(r) = rest.strip_prefix('#') {
            (1, r)
        } else if let Some(r) = rest.strip_prefix('b') {
            (-1, r)
        } else {
            (0, rest)
        };

        let octave: i32 = octave_part
            .parse()
            .map_err(|_| NoteParseError::Malformed(s.to_string()))?;
        if !(-1..=9).contains(&octave) {
            return Err(NoteParseError::OutOfRange(s.to_string()));
        }

        let number = (octave + 1) * 12 + base + accidental;
        if !(0..=MAX_NOTE as i32).contains(&number) {
            return Err(NoteParseError::OutOfRange(s.to_string()));
        }
        Ok(NoteId(number as u8))
    }
}

/// Normalized key velocity in the range 0.0-1.0.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Velocity(f32);

impl Velocity {
    /// Full velocity.
    pub const MAX: Velocity = Velocity(1.0);

    /// Near-silent velocity used when probing the audio route.
    pub const PROBE: Velocity = Velocity(0.001);

    /// Create a velocity, clamping into 0.0-1.0.
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Convert a raw MIDI velocity (0-127).
    pub fn from_midi(raw: u8) -> Self {
        Self::new((raw & 0x7F) as f32 / 127.0)
    }

    /// The normalized value.
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Velocity {
    fn default() -> Self {
        Self::MAX
    }
}

/// A normalized note event, regardless of where it came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    pub note: NoteId,
    pub velocity: Velocity,
    pub is_on: bool,
}

impl NoteEvent {
    pub fn on(note: NoteId, velocity: Velocity) -> Self {
        Self { note, velocity, is_on: true }
    }

    pub fn off(note: NoteId) -> Self {
        Self {
            note,
            velocity: Velocity::new(0.0),
            is_on: false,
        }
    }
}
