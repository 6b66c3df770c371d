//! MIDI Piano - play a MIDI keyboard through a switchable instrument
//!
//! Entry point for the application.

use eframe::egui;
use log::info;

use midi_piano::app::PianoApp;
use midi_piano::persistence::Settings;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings_path = Settings::default_path();
    let settings = Settings::load_or_default(settings_path.as_deref());
    info!(
        "Starting with {} instrument(s), initial '{}'",
        settings.instruments.len(),
        settings.initial_instrument
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 620.0])
            .with_min_inner_size([640.0, 420.0])
            .with_title("MIDI Piano"),
        ..Default::default()
    };

    eframe::run_native(
        "MIDI Piano",
        options,
        Box::new(move |_cc| Ok(Box::new(PianoApp::new(settings, settings_path)))),
    )
}
