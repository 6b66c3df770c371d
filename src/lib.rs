//! MIDI Piano Library
//!
//! Plays notes from a MIDI keyboard, the on-screen keys or the computer
//! keyboard through a switchable instrument, and shows the output spectrum.

pub mod app;
pub mod engine;
pub mod instruments;
pub mod notes;
pub mod persistence;
pub mod routing;
pub mod session;
pub mod visualizer;
pub mod widgets;
