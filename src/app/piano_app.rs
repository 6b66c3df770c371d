//! Main application struct for the MIDI piano
//!
//! Contains the PianoApp which implements eframe::App: the device and
//! instrument selectors, the spectrum display, the on-screen keyboard and
//! the status bar. All playing goes through the session.

use std::path::{Path, PathBuf};

use eframe::egui::{self, Align, Layout, RichText};
use log::{error, info, warn};

use super::keymap::ComputerKeyboard;
use super::theme;
use crate::engine::{AudioEngine, MidiRouter};
use crate::instruments::{InstrumentLoader, InstrumentSpec};
use crate::notes::NoteId;
use crate::persistence::{save_to_file, Settings};
use crate::routing::{AudioRoutingManager, ContextState, PlaybackContext, RoutingState};
use crate::session::{PanicReason, Session, SessionEvent};
use crate::visualizer::Visualizer;
use crate::widgets::piano::{piano, KeyboardLayout, PianoConfig};
use crate::widgets::spectrum_display::{spectrum_display, SpectrumConfig};

type LiveSession = Session<MidiRouter, AudioEngine>;

/// Main application state
pub struct PianoApp {
    /// `None` when MIDI or audio could not be opened.
    session: Option<LiveSession>,
    /// Message for the blocking startup error.
    fatal: Option<String>,
    settings: Settings,
    settings_path: Option<PathBuf>,
    visualizer: Visualizer,
    layout: KeyboardLayout,
    piano_config: PianoConfig,
    spectrum_config: SpectrumConfig,
    /// Key held by the pointer.
    pointer_note: Option<NoteId>,
    keyboard: ComputerKeyboard,
    was_focused: bool,
    theme_applied: bool,
}

impl PianoApp {
    /// Open MIDI and audio and start the session from `settings`.
    pub fn new(settings: Settings, settings_path: Option<PathBuf>) -> Self {
        let visual = settings.visualizer;
        let layout = KeyboardLayout::new(settings.keyboard.lowest(), settings.keyboard.octaves());

        let (session, fatal) = match open_session(&settings) {
            Ok(session) => (Some(session), None),
            Err(message) => {
                error!("{}", message);
                (None, Some(message))
            }
        };

        Self {
            session,
            fatal,
            visualizer: Visualizer::new(visual.fft_size / 2, visual.decay),
            keyboard: ComputerKeyboard::new(layout.lowest()),
            layout,
            piano_config: PianoConfig::default(),
            spectrum_config: SpectrumConfig::default(),
            pointer_note: None,
            was_focused: true,
            theme_applied: false,
            settings,
            settings_path,
        }
    }

    /// Settings as they should be written on exit.
    fn current_settings(&self) -> Settings {
        let mut settings = self.settings.clone();
        if let Some(session) = &self.session {
            let routing = session.routing();
            settings.instruments = routing.loader().catalog().to_vec();
            if let Some(selection) = routing.selection() {
                settings.initial_instrument = selection.to_string();
            }
            settings.last_port = session.bound_port().map(|p| p.id.clone());
        }
        settings
    }

    fn save_settings(&self) {
        let Some(path) = &self.settings_path else {
            return;
        };
        match save_to_file(&self.current_settings(), path) {
            Ok(()) => info!("Saved settings to {}", path.display()),
            Err(e) => warn!("Could not save settings: {}", e),
        }
    }

    /// Turn this frame's focus and key input into session events.
    fn collect_input(&mut self, ctx: &egui::Context, session: &mut LiveSession) {
        let (focused, events) = ctx.input(|i| (i.focused, i.events.clone()));

        if self.was_focused && !focused {
            self.keyboard.clear();
            self.pointer_note = None;
            session.push(SessionEvent::Panic(PanicReason::FocusLost));
        }
        self.was_focused = focused;

        for event in events {
            let egui::Event::Key {
                key,
                pressed,
                repeat,
                modifiers,
                ..
            } = event
            else {
                continue;
            };
            if key == egui::Key::Escape && pressed {
                self.keyboard.clear();
                session.push(SessionEvent::Panic(PanicReason::UserRequest));
                continue;
            }
            if modifiers.any() {
                continue;
            }
            if let Some(note) = self.keyboard.handle(key, pressed, repeat) {
                session.push(SessionEvent::Note(note));
            }
        }
    }

    /// Draw the top toolbar with the selectors
    fn draw_toolbar(ui: &mut egui::Ui, session: &LiveSession) -> ToolbarActions {
        let mut actions = ToolbarActions::default();

        ui.horizontal(|ui| {
            ui.add_space(8.0);
            ui.label(
                RichText::new("MIDI PIANO")
                    .size(18.0)
                    .color(theme::text::PRIMARY)
                    .strong(),
            );
            ui.add_space(12.0);
            ui.separator();

            // MIDI input selector
            ui.label(RichText::new("Input").color(theme::text::SECONDARY));
            let bound = session.bound_port();
            let selected = bound.map_or("None", |p| p.name.as_str());
            egui::ComboBox::from_id_salt("midi_input")
                .selected_text(selected)
                .width(180.0)
                .show_ui(ui, |ui| {
                    if ui.selectable_label(bound.is_none(), "None").clicked() {
                        actions.select_port = Some(None);
                    }
                    if session.ports().is_empty() {
                        ui.add_enabled(false, egui::Label::new("No MIDI devices"));
                    }
                    for port in session.ports() {
                        let is_bound = bound.is_some_and(|b| b.id == port.id);
                        if ui.selectable_label(is_bound, &port.name).clicked() {
                            actions.select_port = Some(Some(port.id.clone()));
                        }
                    }
                });

            ui.separator();

            // Instrument selector
            let routing = session.routing();
            ui.label(RichText::new("Instrument").color(theme::text::SECONDARY));
            let selection = routing.selection().unwrap_or("None");
            ui.add_enabled_ui(!routing.is_switching(), |ui| {
                egui::ComboBox::from_id_salt("instrument")
                    .selected_text(selection)
                    .width(160.0)
                    .show_ui(ui, |ui| {
                        for name in routing.loader().names() {
                            if ui.selectable_label(name == selection, name).clicked()
                                && name != selection
                            {
                                actions.select_instrument = Some(name.to_string());
                            }
                        }
                    });
                if ui.button("Add sample…").clicked() {
                    actions.add_sample = true;
                }
            });

            ui.separator();
            if ui
                .button(RichText::new("All notes off").color(theme::accent::WARNING))
                .clicked()
            {
                actions.panic = true;
            }

            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                ui.add_space(8.0);
                let engine = routing.context();
                let (status_text, status_color) = match engine.state() {
                    ContextState::Running => ("● Running", theme::accent::SUCCESS),
                    ContextState::Suspended => ("○ Suspended", theme::text::DISABLED),
                    ContextState::Closed => ("✖ Closed", theme::accent::ERROR),
                };
                ui.label(RichText::new(status_text).color(status_color).small());
                ui.add(
                    egui::ProgressBar::new(engine.output_level().clamp(0.0, 1.0))
                        .desired_width(60.0),
                );
                ui.label(
                    RichText::new(format!(
                        "{} • {}Hz • {}ch",
                        engine.current_device_name(),
                        engine.sample_rate(),
                        engine.channels()
                    ))
                    .color(theme::text::SECONDARY)
                    .small(),
                );
            });
        });

        actions
    }

    /// Draw the bottom status bar
    fn draw_status_bar(ui: &mut egui::Ui, session: &LiveSession) {
        ui.horizontal(|ui| {
            ui.add_space(8.0);

            match session.latest_notice() {
                Some(notice) => {
                    ui.label(
                        RichText::new(&notice.message)
                            .color(theme::notice_color(notice.level))
                            .small(),
                    );
                }
                None => {
                    ui.label(RichText::new("Ready").color(theme::text::SECONDARY).small());
                }
            }

            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                ui.add_space(8.0);
                let routing = session.routing();
                let state = match routing.state() {
                    RoutingState::Switching => {
                        format!("Loading {}", routing.in_flight().unwrap_or("…"))
                    }
                    RoutingState::Ready => "Ready".to_string(),
                    RoutingState::Failed => "Failed".to_string(),
                    RoutingState::Idle => "Idle".to_string(),
                };
                ui.label(RichText::new(state).color(theme::text::DISABLED).small());
                ui.label(
                    RichText::new(format!("{} held", session.notes().len()))
                        .color(theme::text::DISABLED)
                        .small(),
                );
            });
        });
    }

    fn draw_fatal(&self, ctx: &egui::Context, message: &str) {
        egui::CentralPanel::default().show(ctx, |_| {});
        egui::Window::new("Cannot start")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label(RichText::new(message).color(theme::accent::ERROR));
                ui.add_space(8.0);
                if ui.button("Quit").clicked() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
            });
    }
}

/// Actions collected from the toolbar for deferred execution
#[derive(Default)]
struct ToolbarActions {
    select_port: Option<Option<String>>,
    select_instrument: Option<String>,
    add_sample: bool,
    panic: bool,
}

fn open_session(settings: &Settings) -> Result<LiveSession, String> {
    let router =
        MidiRouter::new().map_err(|e| format!("MIDI is not available: {}", e))?;
    let engine = AudioEngine::new(
        settings.visualizer.fft_size,
        settings.visualizer.analyser_enabled,
    )
    .map_err(|e| format!("Audio output is not available: {}", e))?;

    let loader = InstrumentLoader::new(settings.instruments.clone());
    let routing = AudioRoutingManager::new(engine, loader, settings.switch_config());
    let mut session = Session::new(router, routing);
    session.start(&settings.initial_instrument, settings.last_port.as_deref());
    Ok(session)
}

/// Catalog entry for a WAV file picked by the user, named after the file.
fn sample_spec(path: &Path) -> InstrumentSpec {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Sample".to_string());
    InstrumentSpec::sampler(name, path, NoteId::MIDDLE_C)
}

impl eframe::App for PianoApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.theme_applied {
            theme::apply_theme(ctx);
            self.theme_applied = true;
        }

        if let Some(message) = self.fatal.clone() {
            self.draw_fatal(ctx, &message);
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        self.collect_input(ctx, &mut session);
        session.tick();

        let actions = egui::TopBottomPanel::top("toolbar")
            .frame(
                egui::Frame::none()
                    .fill(theme::background::PANEL)
                    .inner_margin(egui::Margin::symmetric(0.0, 8.0)),
            )
            .show(ctx, |ui| Self::draw_toolbar(ui, &session))
            .inner;

        egui::TopBottomPanel::bottom("status_bar")
            .frame(
                egui::Frame::none()
                    .fill(theme::background::PANEL)
                    .inner_margin(egui::Margin::symmetric(0.0, 4.0)),
            )
            .show(ctx, |ui| Self::draw_status_bar(ui, &session));

        self.visualizer.update(session.analyser_mut());

        let piano_events = egui::CentralPanel::default()
            .frame(egui::Frame::none().inner_margin(egui::Margin::same(12.0)))
            .show(ctx, |ui| {
                let spectrum_height = (ui.available_height() - self.piano_config.height - 12.0)
                    .max(60.0);
                let spectrum_config = self.spectrum_config.clone().with_height(spectrum_height);
                spectrum_display(ui, &self.visualizer, &spectrum_config);
                ui.add_space(12.0);
                piano(
                    ui,
                    session.notes().key_visuals(),
                    &self.layout,
                    &mut self.pointer_note,
                    &self.piano_config,
                )
                .events
            })
            .inner;

        for event in piano_events {
            session.push(SessionEvent::Note(event));
        }

        // Deferred toolbar actions
        if let Some(port) = actions.select_port {
            session.push(SessionEvent::SelectPort(port));
        }
        if let Some(name) = actions.select_instrument {
            session.push(SessionEvent::SelectInstrument(name));
        }
        if actions.panic {
            self.keyboard.clear();
            session.push(SessionEvent::Panic(PanicReason::UserRequest));
        }
        if actions.add_sample {
            if let Some(path) = rfd::FileDialog::new()
                .add_filter("WAV audio", &["wav"])
                .pick_file()
            {
                let spec = sample_spec(&path);
                info!("Adding sample instrument '{}' from {}", spec.name, path.display());
                let name = spec.name.clone();
                session.routing_mut().loader_mut().add(spec);
                session.push(SessionEvent::SelectInstrument(name));
            }
        }
        session.process();

        self.session = Some(session);
        ctx.request_repaint();
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Some(session) = self.session.as_mut() {
            session.push(SessionEvent::Panic(PanicReason::UserRequest));
            session.process();
        }
        self.save_settings();
    }
}
