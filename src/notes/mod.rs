//! Notes module
//!
//! Note identifiers, velocities, the active note set and key visuals.

pub mod active_set;
pub mod key_visual;
pub mod note_id;

pub use active_set::{ActiveNoteSet, NoteOutput};
pub use key_visual::KeyVisualState;
pub use note_id::{NoteEvent, NoteId, NoteParseError, Velocity, MAX_NOTE};
