//! Widgets module
//!
//! Custom UI controls: the playable keyboard and the spectrum bars.

pub mod piano;
pub mod spectrum_display;
