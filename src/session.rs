//! Session
//!
//! Owns the MIDI router, the routing manager and the active note set. All
//! inputs (MIDI, on-screen keys, computer keyboard, focus changes, device
//! notifications, selector changes) become `SessionEvent`s on one FIFO queue
//! that is drained synchronously on the UI thread.

use std::collections::VecDeque;

use log::{error, info, warn};

use crate::engine::analyser::Analyser;
use crate::engine::{InputRouter, MidiPortInfo, RouterEvent};
use crate::notes::{ActiveNoteSet, NoteEvent};
use crate::routing::{AudioRoutingManager, PlaybackContext, SwitchError, SwitchOutcome};

/// Maximum number of notices kept for display.
const MAX_NOTICES: usize = 8;

/// Why all notes were released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanicReason {
    FocusLost,
    DeviceLost,
    DeviceError,
    PortChanged,
    /// Escape key or the "All notes off" button.
    UserRequest,
    /// MIDI all-sound-off / all-notes-off controller.
    AllNotesOffMessage,
}

/// Input to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Note(NoteEvent),
    Panic(PanicReason),
    /// Bind a port by id, or unbind with `None`.
    SelectPort(Option<String>),
    SelectInstrument(String),
    PortsChanged(Vec<MidiPortInfo>),
    /// The bound MIDI port disappeared.
    DeviceLost(String),
    /// The audio output failed.
    DeviceError(String),
}

impl From<RouterEvent> for SessionEvent {
    fn from(event: RouterEvent) -> Self {
        match event {
            RouterEvent::Note(note) => SessionEvent::Note(note),
            RouterEvent::AllNotesOff => SessionEvent::Panic(PanicReason::AllNotesOffMessage),
            RouterEvent::PortsChanged(ports) => SessionEvent::PortsChanged(ports),
            RouterEvent::DeviceLost(id) => SessionEvent::DeviceLost(id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message for the status bar.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

pub struct Session<R: InputRouter, C: PlaybackContext> {
    router: R,
    routing: AudioRoutingManager<C>,
    notes: ActiveNoteSet,
    queue: VecDeque<SessionEvent>,
    ports: Vec<MidiPortInfo>,
    notices: VecDeque<Notice>,
    router_events: Vec<RouterEvent>,
}

impl<R: InputRouter, C: PlaybackContext> Session<R, C> {
    pub fn new(router: R, routing: AudioRoutingManager<C>) -> Self {
        let ports = router.list_ports();
        Self {
            router,
            routing,
            notes: ActiveNoteSet::new(),
            queue: VecDeque::new(),
            ports,
            notices: VecDeque::new(),
            router_events: Vec::new(),
        }
    }

    /// Queue the startup instrument and, if it is still present, the last port.
    pub fn start(&mut self, instrument: &str, last_port: Option<&str>) {
        self.push(SessionEvent::SelectInstrument(instrument.to_string()));
        if let Some(id) = last_port {
            if self.ports.iter().any(|p| p.id == id) {
                self.push(SessionEvent::SelectPort(Some(id.to_string())));
            } else {
                info!("Last MIDI port {} not present", id);
            }
        }
    }

    pub fn push(&mut self, event: SessionEvent) {
        self.queue.push_back(event);
    }

    /// Apply already queued events, collect router, audio and loader
    /// activity, then process the queue again.
    pub fn tick(&mut self) {
        // A queued rebind must close the old port before its traffic is drained
        self.process();

        self.router.poll_events(&mut self.router_events);
        for event in self.router_events.drain(..) {
            self.queue.push_back(event.into());
        }

        let context = self.routing.context_mut();
        context.pump();
        if let Some(e) = context.take_error() {
            self.queue.push_back(SessionEvent::DeviceError(e.to_string()));
        }

        if let Some(outcome) = self.routing.poll() {
            self.report_switch(outcome);
        }

        self.process();
    }

    /// Handle every queued event in order.
    pub fn process(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Note(note) => {
                if note.is_on {
                    self.notes.note_on(note.note, note.velocity, &mut self.routing);
                } else {
                    self.notes.note_off(note.note, &mut self.routing);
                }
            }
            SessionEvent::Panic(reason) => self.panic(reason),
            SessionEvent::SelectPort(port) => self.select_port(port),
            SessionEvent::SelectInstrument(name) => self.select_instrument(&name),
            SessionEvent::PortsChanged(ports) => {
                info!("{} MIDI input(s) available", ports.len());
                self.ports = ports;
            }
            SessionEvent::DeviceLost(id) => {
                self.panic(PanicReason::DeviceLost);
                if self.router.bound_port().is_some_and(|p| p.id == id) {
                    self.router.unbind();
                }
                self.notify(NoticeLevel::Warning, "MIDI device disconnected".to_string());
            }
            SessionEvent::DeviceError(message) => {
                self.panic(PanicReason::DeviceError);
                self.notify(NoticeLevel::Error, message);
                self.recover_audio();
            }
        }
    }

    fn panic(&mut self, reason: PanicReason) {
        let released = self.notes.panic(&mut self.routing);
        if let Err(e) = self.routing.context_mut().release_all() {
            warn!("All notes off failed: {}", e);
        }
        info!("Panic ({:?}): released {} note(s)", reason, released);
    }

    fn select_port(&mut self, port: Option<String>) {
        self.panic(PanicReason::PortChanged);
        let Some(id) = port else {
            self.router.unbind();
            info!("MIDI input unbound");
            return;
        };

        match self.router.bind(&id) {
            Ok(()) => {
                let name = self
                    .router
                    .bound_port()
                    .map_or_else(|| id.clone(), |p| p.name.clone());
                self.notify(NoticeLevel::Info, format!("Listening to {}", name));
            }
            Err(e) => {
                error!("Binding MIDI port {} failed: {}", id, e);
                self.notify(NoticeLevel::Error, e.to_string());
            }
        }
    }

    fn select_instrument(&mut self, name: &str) {
        match self.routing.request_switch(name, &mut self.notes) {
            Ok(()) => self.notify(NoticeLevel::Info, format!("Loading {}...", name)),
            Err(e @ SwitchError::Busy { .. }) => self.notify(NoticeLevel::Warning, e.to_string()),
            Err(e @ SwitchError::UnknownInstrument(_)) => {
                self.notify(NoticeLevel::Error, e.to_string())
            }
        }
    }

    /// Rebuild the output after a device error and reconnect the selection.
    fn recover_audio(&mut self) {
        if self.routing.is_switching() {
            // The in-flight switch resets the context on its own failure path
            return;
        }
        if let Err(e) = self.routing.context_mut().reset() {
            warn!("Audio reset failed: {}", e);
        }
        if let Some(name) = self.routing.selection().map(str::to_string) {
            self.select_instrument(&name);
        }
    }

    fn report_switch(&mut self, outcome: SwitchOutcome) {
        match outcome {
            SwitchOutcome::Ready { instrument, .. } => {
                self.notify(NoticeLevel::Info, format!("{} ready", instrument));
            }
            SwitchOutcome::Failed {
                requested,
                error,
                restored,
            } => {
                let message = match restored {
                    Some(name) => format!(
                        "Could not load {}: {} (kept {})",
                        requested, error, name
                    ),
                    None => format!("Could not load {}: {} (no instrument)", requested, error),
                };
                self.notify(NoticeLevel::Error, message);
                self.routing.acknowledge();
            }
        }
    }

    fn notify(&mut self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Info => info!("{}", message),
            NoticeLevel::Warning => warn!("{}", message),
            NoticeLevel::Error => error!("{}", message),
        }
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice { level, message });
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn latest_notice(&self) -> Option<&Notice> {
        self.notices.back()
    }

    pub fn clear_notices(&mut self) {
        self.notices.clear();
    }

    pub fn ports(&self) -> &[MidiPortInfo] {
        &self.ports
    }

    pub fn bound_port(&self) -> Option<&MidiPortInfo> {
        self.router.bound_port()
    }

    pub fn notes(&self) -> &ActiveNoteSet {
        &self.notes
    }

    pub fn routing(&self) -> &AudioRoutingManager<C> {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut AudioRoutingManager<C> {
        &mut self.routing
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    /// The analyser when the current instrument is routed through it.
    pub fn analyser_mut(&mut self) -> Option<&mut Analyser> {
        self.routing.context_mut().analyser_mut()
    }
}
