//! Background instrument loading.
//!
//! Sample decoding can take a while, so instruments are built on a worker
//! thread and the result is handed back over a channel that the UI thread
//! polls once per frame.

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use log::{debug, warn};

use super::{Instrument, InstrumentSpec, LoadError};

/// Builds instruments from the catalog off the UI thread.
#[derive(Clone, Debug, Default)]
pub struct InstrumentLoader {
    catalog: Vec<InstrumentSpec>,
}

impl InstrumentLoader {
    pub fn new(catalog: Vec<InstrumentSpec>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &[InstrumentSpec] {
        &self.catalog
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.catalog.iter().map(|s| s.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.catalog.iter().any(|s| s.name == name)
    }

    /// Add an entry, replacing any existing entry with the same name.
    pub fn add(&mut self, spec: InstrumentSpec) {
        if let Some(existing) = self.catalog.iter_mut().find(|s| s.name == spec.name) {
            *existing = spec;
        } else {
            self.catalog.push(spec);
        }
    }

    /// Start loading `name` on a worker thread.
    pub fn load(&self, name: &str) -> Result<PendingLoad, LoadError> {
        let spec = self
            .catalog
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| LoadError::UnknownInstrument(name.to_string()))?;

        let (tx, rx) = bounded(1);
        let spawned = std::thread::Builder::new()
            .name("instrument-loader".into())
            .spawn(move || {
                debug!("Loading instrument '{}'", spec.name);
                // The receiver may be gone if the switch was abandoned
                let _ = tx.send(spec.build());
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn loader thread: {}", e);
            return Err(LoadError::WorkerLost);
        }

        Ok(PendingLoad {
            name: name.to_string(),
            rx,
        })
    }
}

/// An in-flight load.
#[derive(Debug)]
pub struct PendingLoad {
    name: String,
    rx: Receiver<Result<Instrument, LoadError>>,
}

impl PendingLoad {
    /// A load whose result is already known.
    pub fn resolved(name: &str, result: Result<Instrument, LoadError>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self {
            name: name.to_string(),
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking check for the result.
    pub fn try_take(&self) -> Option<Result<Instrument, LoadError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(LoadError::WorkerLost)),
        }
    }

    /// Block until the result arrives. Used by tests and shutdown paths.
    pub fn wait(self) -> Result<Instrument, LoadError> {
        self.rx.recv().unwrap_or(Err(LoadError::WorkerLost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::default_catalog;
    use crate::notes::NoteId;

    #[test]
    fn test_load_known_instrument() {
        let loader = InstrumentLoader::new(default_catalog());
        let pending = loader.load("Synth Lead").unwrap();
        assert_eq!(pending.name(), "Synth Lead");
        let inst = pending.wait().unwrap();
        assert_eq!(inst.name(), "Synth Lead");
    }

    #[test]
    fn test_unknown_instrument_rejected_up_front() {
        let loader = InstrumentLoader::new(default_catalog());
        assert!(matches!(
            loader.load("Banjo"),
            Err(LoadError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_failed_load_is_reported() {
        let mut loader = InstrumentLoader::new(default_catalog());
        loader.add(InstrumentSpec::sampler(
            "Broken",
            "/nonexistent/broken.wav",
            NoteId::MIDDLE_C,
        ));
        let result = loader.load("Broken").unwrap().wait();
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_try_take_eventually_resolves() {
        let loader = InstrumentLoader::new(default_catalog());
        let pending = loader.load("Soft Pad").unwrap();
        let mut result = None;
        for _ in 0..200 {
            result = pending.try_take();
            if result.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(matches!(result, Some(Ok(_))));
    }

    #[test]
    fn test_resolved_load() {
        let pending = PendingLoad::resolved("Synth", Ok(Instrument::default_synth()));
        assert!(matches!(pending.try_take(), Some(Ok(_))));
        // The sender is gone once the value has been taken
        assert!(matches!(pending.try_take(), Some(Err(LoadError::WorkerLost))));
    }

    #[test]
    fn test_add_replaces_same_name() {
        let mut loader = InstrumentLoader::new(default_catalog());
        let before = loader.catalog().len();
        loader.add(InstrumentSpec::sampler("Synth", "/x.wav", NoteId::MIDDLE_C));
        assert_eq!(loader.catalog().len(), before);
        loader.add(InstrumentSpec::sampler("Keys", "/x.wav", NoteId::MIDDLE_C));
        assert!(loader.contains("Keys"));
    }
}
