//! Application module
//!
//! Contains the eframe application, the computer-keyboard mapping and theme
//! definitions.

pub mod keymap;
pub mod piano_app;
pub mod theme;

pub use piano_app::PianoApp;
