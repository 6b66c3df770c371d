//! Persistence module
//!
//! Settings save/load functionality using serde and JSON.

pub mod settings;

pub use settings::{
    load_from_file, save_to_file, KeyboardSettings, Settings, SettingsError, SwitchSettings,
    VisualizerSettings, SETTINGS_VERSION,
};
