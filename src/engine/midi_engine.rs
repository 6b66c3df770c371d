//! MIDI Engine
//!
//! Handles MIDI input from hardware controllers and virtual MIDI ports.
//! Uses midir for cross-platform MIDI access and rtrb for lock-free
//! communication from the MIDI callback thread to the UI thread.
//!
//! Only one input port is bound at a time. Every binding gets a new
//! generation number and messages are tagged with it in the callback, so a
//! rebind can never leak events from the previous port into the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::notes::{NoteEvent, NoteId, Velocity};

/// Default buffer size for MIDI events.
pub const DEFAULT_MIDI_BUFFER_SIZE: usize = 512;

/// How often the hot-plug scanner re-enumerates ports.
const SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Granularity of the scanner's sleep so shutdown is not delayed.
const SCAN_TICK: Duration = Duration::from_millis(100);

/// Client name reported to the MIDI subsystem.
const CLIENT_NAME: &str = "MIDI Piano";

/// Controller numbers of the channel-mode "all sound off" / "all notes off" messages.
const CC_ALL_SOUND_OFF: u8 = 120;
const CC_ALL_NOTES_OFF: u8 = 123;

/// Information about a MIDI input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPortInfo {
    /// Stable port identifier.
    pub id: String,
    /// Human-readable device name.
    pub name: String,
}

/// MIDI event types received from hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiEvent {
    /// Note On event.
    NoteOn {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        note: u8,
        /// Velocity (1-127).
        velocity: u8,
    },
    /// Note Off event.
    NoteOff {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        note: u8,
        /// Velocity (0-127, often ignored).
        velocity: u8,
    },
    /// Control Change (CC) event.
    ControlChange {
        /// MIDI channel (0-15).
        channel: u8,
        /// Controller number (0-127).
        controller: u8,
        /// Controller value (0-127).
        value: u8,
    },
    /// Pitch Bend event.
    PitchBend {
        /// MIDI channel (0-15).
        channel: u8,
        /// Pitch bend value (-8192 to 8191, center = 0).
        value: i16,
    },
    /// Channel Aftertouch (pressure).
    ChannelPressure {
        /// MIDI channel (0-15).
        channel: u8,
        /// Pressure value (0-127).
        pressure: u8,
    },
    /// Program Change.
    ProgramChange {
        /// MIDI channel (0-15).
        channel: u8,
        /// Program number (0-127).
        program: u8,
    },
}

impl MidiEvent {
    /// Parse a MIDI event from raw bytes.
    /// Returns None for unsupported or malformed messages.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        let channel = status & 0x0F;

        match status & 0xF0 {
            0x90 if data.len() >= 3 => {
                // Note On (velocity 0 = Note Off)
                let note = data[1] & 0x7F;
                let velocity = data[2] & 0x7F;
                if velocity == 0 {
                    Some(MidiEvent::NoteOff {
                        channel,
                        note,
                        velocity: 0,
                    })
                } else {
                    Some(MidiEvent::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0x80 if data.len() >= 3 => Some(MidiEvent::NoteOff {
                channel,
                note: data[1] & 0x7F,
                velocity: data[2] & 0x7F,
            }),
            0xB0 if data.len() >= 3 => Some(MidiEvent::ControlChange {
                channel,
                controller: data[1] & 0x7F,
                value: data[2] & 0x7F,
            }),
            0xE0 if data.len() >= 3 => {
                let lsb = (data[1] & 0x7F) as i16;
                let msb = (data[2] & 0x7F) as i16;
                // Pitch bend is 14-bit, centered at 8192
                let value = ((msb << 7) | lsb) - 8192;
                Some(MidiEvent::PitchBend { channel, value })
            }
            0xD0 if data.len() >= 2 => Some(MidiEvent::ChannelPressure {
                channel,
                pressure: data[1] & 0x7F,
            }),
            0xC0 if data.len() >= 2 => Some(MidiEvent::ProgramChange {
                channel,
                program: data[1] & 0x7F,
            }),
            _ => None,
        }
    }

    /// Get the MIDI channel for this event.
    pub fn channel(&self) -> u8 {
        match self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::ProgramChange { channel, .. } => *channel,
        }
    }

    /// Reduce this event to what the note-state machine understands.
    pub fn to_router_event(&self) -> Option<RouterEvent> {
        match *self {
            MidiEvent::NoteOn { note, velocity, .. } => Some(RouterEvent::Note(NoteEvent::on(
                NoteId::from_midi_masked(note),
                Velocity::from_midi(velocity),
            ))),
            MidiEvent::NoteOff { note, .. } => Some(RouterEvent::Note(NoteEvent::off(
                NoteId::from_midi_masked(note),
            ))),
            MidiEvent::ControlChange { controller, .. }
                if controller == CC_ALL_SOUND_OFF || controller == CC_ALL_NOTES_OFF =>
            {
                Some(RouterEvent::AllNotesOff)
            }
            _ => None,
        }
    }
}

/// Events the router hands to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    /// A normalized note-on or note-off from the bound port.
    Note(NoteEvent),
    /// The bound port asked for all notes to stop.
    AllNotesOff,
    /// The set of available ports changed.
    PortsChanged(Vec<MidiPortInfo>),
    /// The bound port disappeared.
    DeviceLost(String),
}

/// Error type for MIDI operations.
#[derive(Debug)]
pub enum MidiError {
    /// Failed to initialize MIDI subsystem.
    InitError(String),
    /// Failed to connect to device.
    ConnectionError(String),
    /// Device not found.
    DeviceNotFound(String),
}

impl std::fmt::Display for MidiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MidiError::InitError(s) => write!(f, "MIDI init error: {}", s),
            MidiError::ConnectionError(s) => write!(f, "MIDI connection error: {}", s),
            MidiError::DeviceNotFound(id) => write!(f, "MIDI device not found: {}", id),
        }
    }
}

impl std::error::Error for MidiError {}

/// Port enumeration and subscription, as seen by the session.
pub trait InputRouter {
    /// Currently available input ports.
    fn list_ports(&self) -> Vec<MidiPortInfo>;
    /// Subscribe to a port, dropping any previous subscription first.
    fn bind(&mut self, port_id: &str) -> Result<(), MidiError>;
    /// Drop the current subscription, if any.
    fn unbind(&mut self);
    /// The currently bound port.
    fn bound_port(&self) -> Option<&MidiPortInfo>;
    /// Move pending events into `out`.
    fn poll_events(&mut self, out: &mut Vec<RouterEvent>);
}

/// A raw MIDI message tagged with the binding it arrived on.
#[derive(Debug, Clone, Copy)]
struct TaggedEvent {
    generation: u64,
    event: MidiEvent,
}

/// Queue between MIDI callbacks and the UI thread.
///
/// Messages from any generation other than the active one are discarded
/// when drained.
pub struct MidiInbox {
    producer: Arc<Mutex<Producer<TaggedEvent>>>,
    consumer: Consumer<TaggedEvent>,
    active: Option<u64>,
    next_generation: u64,
}

impl MidiInbox {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self {
            producer: Arc::new(Mutex::new(producer)),
            consumer,
            active: None,
            next_generation: 1,
        }
    }

    /// Start a new generation and return the sink its callback should use.
    pub fn open(&mut self) -> MessageSink {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.active = Some(generation);
        MessageSink {
            generation,
            producer: Arc::clone(&self.producer),
        }
    }

    /// Stop accepting messages from the current generation.
    pub fn close(&mut self) {
        self.active = None;
    }

    /// Drain queued messages, keeping only those from the active generation.
    pub fn drain(&mut self, out: &mut Vec<RouterEvent>) {
        while let Ok(tagged) = self.consumer.pop() {
            if Some(tagged.generation) != self.active {
                debug!("Dropping stale MIDI message from binding {}", tagged.generation);
                continue;
            }
            debug!("MIDI: {:?}", tagged.event);
            if let Some(event) = tagged.event.to_router_event() {
                out.push(event);
            }
        }
    }
}

/// Callback-side handle that parses and enqueues raw messages.
#[derive(Clone)]
pub struct MessageSink {
    generation: u64,
    producer: Arc<Mutex<Producer<TaggedEvent>>>,
}

impl MessageSink {
    /// Parse `data` and queue it. Returns false if it was dropped.
    pub fn deliver(&self, data: &[u8]) -> bool {
        let Some(event) = MidiEvent::from_bytes(data) else {
            return false;
        };
        match self.producer.lock() {
            // Use lossy push - drop events if buffer is full
            Ok(mut producer) => producer
                .push(TaggedEvent {
                    generation: self.generation,
                    event,
                })
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// An open subscription. Dropping it closes the connection.
pub struct InputBinding {
    port: MidiPortInfo,
    connection: Option<MidiInputConnection<()>>,
}

impl InputBinding {
    pub fn port(&self) -> &MidiPortInfo {
        &self.port
    }
}

impl Drop for InputBinding {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!("MIDI disconnected from {}", self.port.name);
        }
    }
}

/// Shared state between the scanner thread and the router.
struct ScanState {
    ports: Vec<MidiPortInfo>,
    changed: bool,
}

fn enumerate_ports(midi_in: &MidiInput) -> Vec<MidiPortInfo> {
    midi_in
        .ports()
        .iter()
        .map(|p| MidiPortInfo {
            id: p.id(),
            name: midi_in
                .port_name(p)
                .unwrap_or_else(|_| "Unknown".to_string()),
        })
        .collect()
}

fn same_ports(a: &[MidiPortInfo], b: &[MidiPortInfo]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id)
}

/// MIDI input router backed by midir.
pub struct MidiRouter {
    /// Handle used for enumeration.
    midi_in: MidiInput,
    /// Queue fed by the connection callback.
    inbox: MidiInbox,
    /// Current subscription.
    binding: Option<InputBinding>,
    /// Shared state for device enumeration.
    state: Arc<Mutex<ScanState>>,
    /// Flag to signal device scan thread to stop.
    scan_running: Arc<AtomicBool>,
    /// Handle for the device scan thread.
    scan_thread: Option<thread::JoinHandle<()>>,
}

impl MidiRouter {
    /// Create a new router and start hot-plug scanning.
    pub fn new() -> Result<Self, MidiError> {
        let midi_in =
            MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::InitError(e.to_string()))?;

        let ports = enumerate_ports(&midi_in);
        info!("Found {} MIDI input port(s)", ports.len());

        let state = Arc::new(Mutex::new(ScanState {
            ports,
            changed: false,
        }));

        // Start background thread for device scanning (hot-plug detection)
        let scan_running = Arc::new(AtomicBool::new(true));
        let state_clone = Arc::clone(&state);
        let running_clone = Arc::clone(&scan_running);

        let scan_thread = thread::Builder::new()
            .name("midi-scan".to_string())
            .spawn(move || {
                let ticks = (SCAN_INTERVAL.as_millis() / SCAN_TICK.as_millis()).max(1);
                while running_clone.load(Ordering::Relaxed) {
                    for _ in 0..ticks {
                        thread::sleep(SCAN_TICK);
                        if !running_clone.load(Ordering::Relaxed) {
                            return;
                        }
                    }

                    let Ok(scanner) = MidiInput::new("MIDI Piano Scanner") else {
                        continue;
                    };
                    let new_ports = enumerate_ports(&scanner);

                    if let Ok(mut state) = state_clone.lock() {
                        if !same_ports(&state.ports, &new_ports) {
                            info!("MIDI ports changed: {} available", new_ports.len());
                            state.ports = new_ports;
                            state.changed = true;
                        }
                    }
                }
            })
            .map_err(|e| MidiError::InitError(e.to_string()))?;

        Ok(Self {
            midi_in,
            inbox: MidiInbox::new(DEFAULT_MIDI_BUFFER_SIZE),
            binding: None,
            state,
            scan_running,
            scan_thread: Some(scan_thread),
        })
    }

    fn find_port(midi_in: &MidiInput, port_id: &str) -> Option<MidiInputPort> {
        midi_in.ports().into_iter().find(|p| p.id() == port_id)
    }
}

impl InputRouter for MidiRouter {
    fn list_ports(&self) -> Vec<MidiPortInfo> {
        enumerate_ports(&self.midi_in)
    }

    fn bind(&mut self, port_id: &str) -> Result<(), MidiError> {
        // First disconnect if already connected
        self.unbind();

        let midi_in = MidiInput::new("MIDI Piano Input")
            .map_err(|e| MidiError::InitError(e.to_string()))?;
        let port = Self::find_port(&midi_in, port_id)
            .ok_or_else(|| MidiError::DeviceNotFound(port_id.to_string()))?;
        let name = midi_in
            .port_name(&port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let sink = self.inbox.open();
        let connection = midi_in
            .connect(
                &port,
                "midi-piano-input",
                move |_timestamp_us, data, _| {
                    sink.deliver(data);
                },
                (),
            )
            .map_err(|e| {
                self.inbox.close();
                MidiError::ConnectionError(e.to_string())
            })?;

        info!("MIDI connected to {}", name);
        self.binding = Some(InputBinding {
            port: MidiPortInfo {
                id: port_id.to_string(),
                name,
            },
            connection: Some(connection),
        });
        Ok(())
    }

    fn unbind(&mut self) {
        self.inbox.close();
        self.binding = None;
    }

    fn bound_port(&self) -> Option<&MidiPortInfo> {
        self.binding.as_ref().map(InputBinding::port)
    }

    fn poll_events(&mut self, out: &mut Vec<RouterEvent>) {
        self.inbox.drain(out);

        let changed = match self.state.lock() {
            Ok(mut state) if state.changed => {
                state.changed = false;
                Some(state.ports.clone())
            }
            Ok(_) => None,
            Err(_) => {
                warn!("MIDI scan state poisoned");
                None
            }
        };

        if let Some(ports) = changed {
            if let Some(bound) = self.bound_port() {
                if !ports.iter().any(|p| p.id == bound.id) {
                    out.push(RouterEvent::DeviceLost(bound.id.clone()));
                }
            }
            out.push(RouterEvent::PortsChanged(ports));
        }
    }
}

impl Drop for MidiRouter {
    fn drop(&mut self) {
        // Stop the scan thread
        self.scan_running.store(false, Ordering::Relaxed);

        // Disconnect if connected
        self.unbind();

        // Wait for scan thread to finish
        if let Some(thread) = self.scan_thread.take() {
            let _ = thread.join();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn note(n: u8) -> NoteId {
        NoteId::from_midi(n).unwrap()
    }

    #[test]
    fn test_midi_event_from_bytes_note_on() {
        let data = [0x90, 60, 100]; // Note On, channel 0, middle C, velocity 100
        let event = MidiEvent::from_bytes(&data);
        assert_eq!(
            event,
            Some(MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            })
        );
    }

    #[test]
    fn test_midi_event_from_bytes_note_off() {
        let data = [0x80, 60, 64]; // Note Off, channel 0, middle C
        let event = MidiEvent::from_bytes(&data);
        if let Some(MidiEvent::NoteOff { channel, note, .. }) = event {
            assert_eq!(channel, 0);
            assert_eq!(note, 60);
        } else {
            panic!("Expected NoteOff event");
        }
    }

    #[test]
    fn test_zero_velocity_note_on_equals_note_off() {
        let on_zero = MidiEvent::from_bytes(&[0x90, 60, 0]).unwrap();
        let off = MidiEvent::from_bytes(&[0x80, 60, 0]).unwrap();
        assert_eq!(on_zero, off);
        assert_eq!(on_zero.to_router_event(), off.to_router_event());
        assert_eq!(
            on_zero.to_router_event(),
            Some(RouterEvent::Note(NoteEvent::off(note(60))))
        );
    }

    #[test]
    fn test_data_bytes_are_masked() {
        let event = MidiEvent::from_bytes(&[0x91, 0xBC, 0xFF]).unwrap();
        assert_eq!(
            event,
            MidiEvent::NoteOn {
                channel: 1,
                note: 0x3C,
                velocity: 0x7F
            }
        );
    }

    #[test]
    fn test_note_on_normalizes_velocity() {
        let event = MidiEvent::from_bytes(&[0x90, 69, 127]).unwrap();
        match event.to_router_event() {
            Some(RouterEvent::Note(e)) => {
                assert!(e.is_on);
                assert_eq!(e.note, NoteId::A4);
                assert_eq!(e.velocity.value(), 1.0);
            }
            other => panic!("Expected note event, got {:?}", other),
        }
    }

    #[test]
    fn test_midi_event_from_bytes_pitch_bend() {
        // Pitch bend centered (8192 = 0x2000)
        let data = [0xE0, 0x00, 0x40];
        assert_eq!(
            MidiEvent::from_bytes(&data),
            Some(MidiEvent::PitchBend { channel: 0, value: 0 })
        );
    }

    #[test]
    fn test_midi_event_from_bytes_channel() {
        let data = [0x95, 60, 100]; // Note On, channel 5
        let event = MidiEvent::from_bytes(&data).unwrap();
        assert_eq!(event.channel(), 5);
    }

    #[test]
    fn test_midi_event_from_bytes_empty_and_incomplete() {
        assert!(MidiEvent::from_bytes(&[]).is_none());
        assert!(MidiEvent::from_bytes(&[0x90, 60]).is_none());
        assert!(MidiEvent::from_bytes(&[0x80]).is_none());
        assert!(MidiEvent::from_bytes(&[0xF8]).is_none()); // clock
    }

    #[test]
    fn test_non_note_messages_do_not_reach_notes() {
        let cc = MidiEvent::from_bytes(&[0xB0, 1, 64]).unwrap();
        assert!(cc.to_router_event().is_none());
        let program = MidiEvent::from_bytes(&[0xC0, 42]).unwrap();
        assert!(program.to_router_event().is_none());
    }

    #[test]
    fn test_all_notes_off_controllers() {
        for controller in [CC_ALL_SOUND_OFF, CC_ALL_NOTES_OFF] {
            let cc = MidiEvent::from_bytes(&[0xB3, controller, 0]).unwrap();
            assert_eq!(cc.to_router_event(), Some(RouterEvent::AllNotesOff));
        }
    }

    #[test]
    fn test_inbox_delivers_active_generation() {
        let mut inbox = MidiInbox::new(16);
        let sink = inbox.open();

        assert!(sink.deliver(&[0x90, 60, 100]));
        assert!(sink.deliver(&[0x80, 60, 0]));
        assert!(!sink.deliver(&[0xF8]));

        let mut out = Vec::new();
        inbox.drain(&mut out);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], RouterEvent::Note(e) if e.is_on));
        assert!(matches!(out[1], RouterEvent::Note(e) if !e.is_on));
    }

    #[test]
    fn test_rebind_drops_stale_port_events() {
        let mut inbox = MidiInbox::new(16);
        let old = inbox.open();
        old.deliver(&[0x90, 60, 100]); // queued but never drained

        inbox.close();
        let new = inbox.open();
        old.deliver(&[0x90, 61, 100]); // late callback from the old port
        new.deliver(&[0x90, 72, 100]);

        let mut out = Vec::new();
        inbox.drain(&mut out);
        assert_eq!(
            out,
            vec![RouterEvent::Note(NoteEvent::on(note(72), Velocity::from_midi(100)))]
        );
    }

    #[test]
    fn test_closed_inbox_drops_everything() {
        let mut inbox = MidiInbox::new(16);
        let sink = inbox.open();
        inbox.close();
        sink.deliver(&[0x90, 60, 100]);

        let mut out = Vec::new();
        inbox.drain(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_full_inbox_is_lossy() {
        let mut inbox = MidiInbox::new(2);
        let sink = inbox.open();
        assert!(sink.deliver(&[0x90, 60, 100]));
        assert!(sink.deliver(&[0x90, 61, 100]));
        assert!(!sink.deliver(&[0x90, 62, 100]));
    }

    #[test]
    fn test_same_ports_compares_ids() {
        let a = vec![MidiPortInfo {
            id: "1".into(),
            name: "Keys".into(),
        }];
        let b = vec![MidiPortInfo {
            id: "1".into(),
            name: "Keys (renamed)".into(),
        }];
        assert!(same_ports(&a, &b));
        assert!(!same_ports(&a, &[]));
    }

    #[test]
    fn test_midi_event_is_send_and_copy() {
        fn assert_send<T: Send>() {}
        fn assert_copy<T: Copy>() {}
        assert_send::<MidiEvent>();
        assert_copy::<MidiEvent>();
        assert_send::<MessageSink>();
    }
}
