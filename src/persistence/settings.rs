//! Application settings, stored as JSON in the user's config directory.
//!
//! Every section has defaults so files written by older versions (or edited
//! by hand) still load.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::analyser::DEFAULT_FFT_SIZE;
use crate::instruments::{default_catalog, InstrumentSpec, DEFAULT_INSTRUMENT};
use crate::notes::NoteId;
use crate::routing::SwitchConfig;
use crate::visualizer::DEFAULT_DECAY;

/// Current settings format version.
/// Increment this when making breaking changes to the format.
pub const SETTINGS_VERSION: u32 = 1;

const APP_DIR: &str = "midi_piano";
const FILE_NAME: &str = "settings.json";

/// On-screen keyboard range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardSettings {
    /// MIDI number of the leftmost key; snapped down to a C.
    pub lowest_note: u8,
    pub octaves: u8,
}

impl KeyboardSettings {
    pub fn lowest(&self) -> NoteId {
        let n = NoteId::from_midi_masked(self.lowest_note);
        NoteId::from_midi_masked(n.midi() - n.semitone())
    }

    pub fn octaves(&self) -> u8 {
        self.octaves.clamp(1, 7)
    }
}

impl Default for KeyboardSettings {
    fn default() -> Self {
        Self {
            // C3
            lowest_note: 48,
            octaves: 3,
        }
    }
}

/// Instrument switch tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchSettings {
    pub max_retries: u32,
    pub resume_timeout_ms: u64,
    pub verify_timeout_ms: u64,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        let config = SwitchConfig::default();
        Self {
            max_retries: config.max_retries,
            resume_timeout_ms: config.resume_timeout.as_millis() as u64,
            verify_timeout_ms: config.verify_timeout.as_millis() as u64,
        }
    }
}

impl From<SwitchSettings> for SwitchConfig {
    fn from(s: SwitchSettings) -> Self {
        SwitchConfig {
            max_retries: s.max_retries,
            resume_timeout: Duration::from_millis(s.resume_timeout_ms),
            verify_timeout: Duration::from_millis(s.verify_timeout_ms),
        }
    }
}

/// Analyser and bar display tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerSettings {
    pub fft_size: usize,
    pub decay: f32,
    pub analyser_enabled: bool,
}

impl Default for VisualizerSettings {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            decay: DEFAULT_DECAY,
            analyser_enabled: true,
        }
    }
}

/// Everything persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Settings format version for future compatibility.
    pub version: u32,
    pub instruments: Vec<InstrumentSpec>,
    /// Instrument selected at startup.
    pub initial_instrument: String,
    /// Port id bound at startup, if still present.
    pub last_port: Option<String>,
    pub keyboard: KeyboardSettings,
    pub switching: SwitchSettings,
    pub visualizer: VisualizerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            instruments: default_catalog(),
            initial_instrument: DEFAULT_INSTRUMENT.to_string(),
            last_port: None,
            keyboard: KeyboardSettings::default(),
            switching: SwitchSettings::default(),
            visualizer: VisualizerSettings::default(),
        }
    }
}

impl Settings {
    /// Check if this settings version is compatible with the current format.
    pub fn is_compatible(&self) -> bool {
        self.version <= SETTINGS_VERSION
    }

    /// `<config_dir>/midi_piano/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
    }

    /// Repair values that would leave the app without a usable instrument.
    pub fn normalized(mut self) -> Self {
        if !self.instruments.iter().any(|s| s.name == DEFAULT_INSTRUMENT) {
            self.instruments.insert(0, default_catalog().remove(0));
        }
        if !self
            .instruments
            .iter()
            .any(|s| s.name == self.initial_instrument)
        {
            warn!(
                "Initial instrument '{}' not in catalog; using '{}'",
                self.initial_instrument, DEFAULT_INSTRUMENT
            );
            self.initial_instrument = DEFAULT_INSTRUMENT.to_string();
        }
        self.version = SETTINGS_VERSION;
        self
    }

    pub fn switch_config(&self) -> SwitchConfig {
        self.switching.into()
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or unusable.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        if !path.exists() {
            info!("No settings at {}; using defaults", path.display());
            return Self::default();
        }
        match load_from_file(path) {
            Ok(settings) => {
                info!("Loaded settings from {}", path.display());
                settings.normalized()
            }
            Err(e) => {
                warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Error type for settings operations.
#[derive(Debug)]
pub enum SettingsError {
    /// File I/O error.
    IoError(std::io::Error),
    /// JSON serialization/deserialization error.
    SerializationError(serde_json::Error),
    /// Written by a newer version.
    IncompatibleVersion { found: u32, expected: u32 },
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "File error: {}", e),
            Self::SerializationError(e) => write!(f, "Serialization error: {}", e),
            Self::IncompatibleVersion { found, expected } => write!(
                f,
                "Incompatible settings version: found {}, expected <= {}",
                found, expected
            ),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            Self::SerializationError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err)
    }
}

/// Save settings to a JSON file, creating parent directories.
pub fn save_to_file(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load settings from a JSON file.
pub fn load_from_file(path: &Path) -> Result<Settings, SettingsError> {
    let json = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&json)?;

    if !settings.is_compatible() {
        return Err(SettingsError::IncompatibleVersion {
            found: settings.version,
            expected: SETTINGS_VERSION,
        });
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("midi_piano_settings_{}_{}", tag, std::process::id()))
            .join(FILE_NAME)
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.initial_instrument, DEFAULT_INSTRUMENT);
        assert_eq!(settings.keyboard.lowest().to_string(), "C3");
        assert_eq!(settings.keyboard.octaves(), 3);
        assert_eq!(settings.switch_config(), SwitchConfig::default());
        assert!(settings.visualizer.analyser_enabled);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let mut settings = Settings::default();
        settings.last_port = Some("port-1".into());
        settings.switching.max_retries = 1;

        save_to_file(&settings, &path).unwrap();
        let loaded = load_from_file(&path).unwrap();
        std::fs::remove_dir_all(path.parent().unwrap()).ok();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"version":1,"keyboard":{"octaves":5}}"#).unwrap();
        assert_eq!(settings.keyboard.octaves, 5);
        assert_eq!(settings.keyboard.lowest_note, 48);
        assert_eq!(settings.instruments, default_catalog());
    }

    #[test]
    fn test_newer_version_rejected() {
        let path = temp_path("future");
        let settings = Settings {
            version: SETTINGS_VERSION + 1,
            ..Settings::default()
        };
        save_to_file(&settings, &path).unwrap();
        let result = load_from_file(&path);
        let fallback = Settings::load_or_default(Some(&path));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();

        assert!(matches!(
            result,
            Err(SettingsError::IncompatibleVersion { .. })
        ));
        assert_eq!(fallback, Settings::default());
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let path = temp_path("garbage");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();
        let settings = Settings::load_or_default(Some(&path));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_or_default(Some(Path::new("/nonexistent/settings.json")));
        assert_eq!(settings, Settings::default());
        assert_eq!(Settings::load_or_default(None), Settings::default());
    }

    #[test]
    fn test_normalize_repairs_catalog() {
        let settings = Settings {
            instruments: vec![],
            initial_instrument: "Gone".into(),
            ..Settings::default()
        }
        .normalized();
        assert_eq!(settings.initial_instrument, DEFAULT_INSTRUMENT);
        assert!(settings
            .instruments
            .iter()
            .any(|s| s.name == DEFAULT_INSTRUMENT));
    }

    #[test]
    fn test_keyboard_snaps_to_c() {
        let kb = KeyboardSettings {
            lowest_note: 50,
            octaves: 0,
        };
        assert_eq!(kb.lowest().midi(), 48);
        assert_eq!(kb.octaves(), 1);
    }
}
