//! Playable piano keyboard widget.
//!
//! Draws a multi-octave keyboard from a [`KeyVisualState`] and turns pointer
//! press, drag, release and leave into note events.

use eframe::egui::{self, Color32, Pos2, Rect, Response, Sense, Ui, Vec2};

use crate::app::theme;
use crate::notes::{KeyVisualState, NoteEvent, NoteId, Velocity};

/// Key layout constants - which semitones correspond to white/black keys.
const WHITE_KEY_NOTES: [u8; 7] = [0, 2, 4, 5, 7, 9, 11]; // C D E F G A B
const BLACK_KEY_NOTES: [u8; 5] = [1, 3, 6, 8, 10]; // C# D# F# G# A#
/// Black key centres in white-key widths from the octave's C.
const BLACK_KEY_POSITIONS: [f32; 5] = [1.0, 2.0, 4.0, 5.0, 6.0];

/// Black key size relative to a white key.
const BLACK_KEY_WIDTH: f32 = 0.6;
const BLACK_KEY_HEIGHT: f32 = 0.62;

/// Softest velocity produced at the top edge of a key.
const MIN_POINTER_VELOCITY: f32 = 0.35;

/// Configuration for the piano keyboard widget.
#[derive(Clone, Debug)]
pub struct PianoConfig {
    pub height: f32,
    pub white_key_color: Color32,
    pub black_key_color: Color32,
    pub white_key_active: Color32,
    pub black_key_active: Color32,
    pub glow_color: Color32,
    /// Label every C with its note name.
    pub show_labels: bool,
}

impl Default for PianoConfig {
    fn default() -> Self {
        Self {
            height: 140.0,
            white_key_color: Color32::from_rgb(240, 240, 235), // Off-white
            black_key_color: Color32::from_rgb(30, 30, 35),    // Near-black
            white_key_active: theme::accent::PRIMARY,
            black_key_active: Color32::from_rgb(80, 140, 200),
            glow_color: theme::accent::PRIMARY,
            show_labels: true,
        }
    }
}

impl PianoConfig {
    pub fn with_height(mut self, height: f32) -> Self {
        self.height = height;
        self
    }

    pub fn with_labels(mut self, show: bool) -> Self {
        self.show_labels = show;
        self
    }
}

/// Which notes the keyboard shows, starting at a C.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyboardLayout {
    lowest: NoteId,
    octaves: u8,
}

impl KeyboardLayout {
    pub fn new(lowest: NoteId, octaves: u8) -> Self {
        Self {
            lowest,
            octaves: octaves.max(1),
        }
    }

    pub fn lowest(&self) -> NoteId {
        self.lowest
    }

    pub fn octaves(&self) -> u8 {
        self.octaves
    }

    /// Whole octaves plus the closing C.
    pub fn white_key_count(&self) -> usize {
        self.octaves as usize * 7 + 1
    }

    fn white_note(&self, index: usize) -> Option<NoteId> {
        let octave = (index / 7) as i32;
        self.lowest
            .offset(octave * 12 + WHITE_KEY_NOTES[index % 7] as i32)
    }

    /// Highest note on the keyboard.
    pub fn highest(&self) -> Option<NoteId> {
        self.white_note(self.white_key_count() - 1)
    }

    pub fn contains(&self, note: NoteId) -> bool {
        let span = self.octaves as i32 * 12;
        let rel = note.midi() as i32 - self.lowest.midi() as i32;
        (0..=span).contains(&rel)
    }

    fn white_width(&self, rect: Rect) -> f32 {
        rect.width() / self.white_key_count() as f32
    }

    /// Screen rectangle of every white key that exists.
    fn white_keys(&self, rect: Rect) -> impl Iterator<Item = (NoteId, Rect)> + '_ {
        let ww = self.white_width(rect);
        (0..self.white_key_count()).filter_map(move |i| {
            let note = self.white_note(i)?;
            let key = Rect::from_min_size(
                Pos2::new(rect.left() + i as f32 * ww, rect.top()),
                Vec2::new(ww - 1.0, rect.height()),
            );
            Some((note, key))
        })
    }

    fn black_keys(&self, rect: Rect) -> impl Iterator<Item = (NoteId, Rect)> + '_ {
        let ww = self.white_width(rect);
        let bw = ww * BLACK_KEY_WIDTH;
        let bh = rect.height() * BLACK_KEY_HEIGHT;
        (0..self.octaves as usize).flat_map(move |octave| {
            BLACK_KEY_NOTES
                .iter()
                .zip(BLACK_KEY_POSITIONS)
                .filter_map(move |(&semitone, pos)| {
                    let note = self
                        .lowest
                        .offset(octave as i32 * 12 + semitone as i32)?;
                    let centre = rect.left() + (octave as f32 * 7.0 + pos) * ww;
                    let key = Rect::from_min_size(
                        Pos2::new(centre - bw / 2.0, rect.top()),
                        Vec2::new(bw, bh),
                    );
                    Some((note, key))
                })
        })
    }

    /// The key under `pos`, black keys first since they sit on top.
    pub fn key_at(&self, rect: Rect, pos: Pos2) -> Option<NoteId> {
        if !rect.contains(pos) {
            return None;
        }
        if let Some((note, _)) = self.black_keys(rect).find(|(_, key)| key.contains(pos)) {
            return Some(note);
        }
        let index = ((pos.x - rect.left()) / self.white_width(rect)).floor() as usize;
        self.white_note(index.min(self.white_key_count() - 1))
    }

    /// Harder the further down the key the pointer lands.
    pub fn velocity_at(&self, rect: Rect, pos: Pos2, note: NoteId) -> Velocity {
        let depth = if note.is_black_key() {
            rect.height() * BLACK_KEY_HEIGHT
        } else {
            rect.height()
        };
        let t = ((pos.y - rect.top()) / depth).clamp(0.0, 1.0);
        Velocity::new(MIN_POINTER_VELOCITY + (1.0 - MIN_POINTER_VELOCITY) * t)
    }
}

impl Default for KeyboardLayout {
    fn default() -> Self {
        // C3, three octaves
        Self::new(NoteId::from_midi_masked(48), 3)
    }
}

/// Result of drawing the piano for one frame.
pub struct PianoResponse {
    pub response: Response,
    /// Note events produced by the pointer this frame.
    pub events: Vec<NoteEvent>,
}

/// Draw the keyboard and handle pointer input.
///
/// `held` carries the pointer-held key across frames; dragging onto another
/// key releases the old one and presses the new one.
pub fn piano(
    ui: &mut Ui,
    keys: &KeyVisualState,
    layout: &KeyboardLayout,
    held: &mut Option<NoteId>,
    config: &PianoConfig,
) -> PianoResponse {
    let size = Vec2::new(ui.available_width(), config.height);
    let (rect, response) = ui.allocate_exact_size(size, Sense::click_and_drag());

    let mut events = Vec::new();
    let target = if response.is_pointer_button_down_on() {
        response
            .interact_pointer_pos()
            .and_then(|pos| layout.key_at(rect, pos).map(|note| (note, pos)))
    } else {
        None
    };

    if target.map(|(note, _)| note) != *held {
        if let Some(old) = held.take() {
            events.push(NoteEvent::off(old));
        }
        if let Some((note, pos)) = target {
            events.push(NoteEvent::on(note, layout.velocity_at(rect, pos, note)));
            *held = Some(note);
        }
    }

    if ui.is_rect_visible(rect) {
        paint(ui.painter(), rect, keys, layout, config);
    }

    PianoResponse { response, events }
}

fn paint(
    painter: &egui::Painter,
    rect: Rect,
    keys: &KeyVisualState,
    layout: &KeyboardLayout,
    config: &PianoConfig,
) {
    // White keys first (background)
    for (note, key_rect) in layout.white_keys(rect) {
        let is_active = keys.is_pressed(note);
        if is_active {
            draw_glow(painter, key_rect, config.glow_color, 40, 2.0);
        }
        let key_color = if is_active {
            config.white_key_active
        } else {
            config.white_key_color
        };
        painter.rect_filled(key_rect, 2.0, key_color);
        painter.rect_stroke(
            key_rect,
            2.0,
            egui::Stroke::new(0.5, Color32::from_gray(120)),
        );

        if config.show_labels && note.semitone() == 0 {
            painter.text(
                Pos2::new(key_rect.center().x, key_rect.bottom() - 10.0),
                egui::Align2::CENTER_CENTER,
                note.name(),
                egui::FontId::proportional(10.0),
                Color32::from_gray(110),
            );
        }
    }

    // Black keys on top
    for (note, key_rect) in layout.black_keys(rect) {
        let is_active = keys.is_pressed(note);
        if is_active {
            draw_glow(painter, key_rect, config.glow_color, 50, 1.5);
        }
        let key_color = if is_active {
            config.black_key_active
        } else {
            config.black_key_color
        };
        painter.rect_filled(key_rect, 1.5, key_color);

        if !is_active {
            let highlight_rect = Rect::from_min_size(
                key_rect.min + Vec2::new(1.0, 1.0),
                Vec2::new(key_rect.width() - 2.0, 3.0),
            );
            painter.rect_filled(
                highlight_rect,
                1.0,
                Color32::from_rgba_unmultiplied(255, 255, 255, 20),
            );
        }
    }
}

/// Multi-layer glow around a pressed key.
fn draw_glow(painter: &egui::Painter, key_rect: Rect, color: Color32, alpha: u8, step: f32) {
    for layer in 0..3u8 {
        let glow_alpha = alpha.saturating_sub(layer * (alpha / 3));
        let expand = (3 - layer) as f32 * step;
        painter.rect_filled(
            key_rect.expand(expand),
            2.0,
            Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), glow_alpha),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(n: u8) -> NoteId {
        NoteId::from_midi(n).unwrap()
    }

    /// One octave plus closing C: 8 white keys, 10 px each.
    fn one_octave() -> (KeyboardLayout, Rect) {
        let layout = KeyboardLayout::new(note(60), 1);
        let rect = Rect::from_min_size(Pos2::ZERO, Vec2::new(80.0, 100.0));
        (layout, rect)
    }

    #[test]
    fn test_layout_counts() {
        let layout = KeyboardLayout::default();
        assert_eq!(layout.white_key_count(), 22);
        assert_eq!(layout.lowest().to_string(), "C3");
        assert_eq!(layout.highest().map(|n| n.to_string()), Some("C6".into()));
        assert!(layout.contains(note(48)));
        assert!(layout.contains(note(84)));
        assert!(!layout.contains(note(85)));
        assert!(!layout.contains(note(47)));
    }

    #[test]
    fn test_zero_octaves_clamped() {
        assert_eq!(KeyboardLayout::new(note(60), 0).octaves(), 1);
    }

    #[test]
    fn test_key_at_white_keys() {
        let (layout, rect) = one_octave();
        // Bottom half only hits white keys
        assert_eq!(layout.key_at(rect, Pos2::new(5.0, 90.0)), Some(note(60)));
        assert_eq!(layout.key_at(rect, Pos2::new(15.0, 90.0)), Some(note(62)));
        assert_eq!(layout.key_at(rect, Pos2::new(35.0, 90.0)), Some(note(65)));
        assert_eq!(layout.key_at(rect, Pos2::new(75.0, 90.0)), Some(note(72)));
    }

    #[test]
    fn test_key_at_black_keys_on_top() {
        let (layout, rect) = one_octave();
        // C# is centred on the C/D boundary
        assert_eq!(layout.key_at(rect, Pos2::new(10.0, 20.0)), Some(note(61)));
        assert_eq!(layout.key_at(rect, Pos2::new(40.0, 20.0)), Some(note(66)));
        // Between E and F there is no black key
        assert_eq!(layout.key_at(rect, Pos2::new(30.0, 20.0)), Some(note(65)));
        // Same x below the black key hits the white key
        assert_eq!(layout.key_at(rect, Pos2::new(10.0, 90.0)), Some(note(62)));
    }

    #[test]
    fn test_key_at_outside() {
        let (layout, rect) = one_octave();
        assert_eq!(layout.key_at(rect, Pos2::new(-1.0, 50.0)), None);
        assert_eq!(layout.key_at(rect, Pos2::new(40.0, 101.0)), None);
    }

    #[test]
    fn test_no_black_key_after_closing_c() {
        let (layout, rect) = one_octave();
        assert_eq!(layout.black_keys(rect).count(), 5);
    }

    #[test]
    fn test_keys_beyond_midi_range_skipped() {
        let layout = KeyboardLayout::new(note(120), 1);
        let rect = Rect::from_min_size(Pos2::ZERO, Vec2::new(80.0, 100.0));
        assert_eq!(layout.white_keys(rect).count(), 5); // C D E F G
        assert!(layout.highest().is_none());
    }

    #[test]
    fn test_velocity_from_depth() {
        let (layout, rect) = one_octave();
        let top = layout.velocity_at(rect, Pos2::new(5.0, 0.0), note(60));
        let bottom = layout.velocity_at(rect, Pos2::new(5.0, 100.0), note(60));
        assert!((top.value() - MIN_POINTER_VELOCITY).abs() < 1e-6);
        assert!((bottom.value() - 1.0).abs() < 1e-6);
        let black = layout.velocity_at(rect, Pos2::new(10.0, 62.0), note(61));
        assert!((black.value() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_piano_config_builder() {
        let config = PianoConfig::default().with_height(90.0).with_labels(false);
        assert_eq!(config.height, 90.0);
        assert!(!config.show_labels);
    }
}
