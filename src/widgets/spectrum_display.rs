//! Spectrum display widget.
//!
//! Draws the visualizer's frequency bins as bars with a fading trail above
//! them. Levels are already normalized to 0.0..=1.0 by the analyser.

use eframe::egui::{self, Color32, Pos2, Rect, Response, Sense, Stroke, Ui, Vec2};

use crate::app::theme;
use crate::visualizer::Visualizer;

/// Configuration for the spectrum display.
#[derive(Clone, Debug)]
pub struct SpectrumConfig {
    /// Fixed height; the width fills the available space.
    pub height: f32,
    pub color: Color32,
    pub trail_color: Color32,
    /// Number of bars the bins are grouped into. Zero draws one bar per bin.
    pub bars: usize,
    pub bar_spacing: f32,
    pub show_grid: bool,
    /// Number of horizontal grid divisions.
    pub grid_divisions: usize,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            height: 220.0,
            color: theme::signal::AUDIO,
            trail_color: Color32::from_rgba_unmultiplied(255, 255, 255, 140),
            bars: 64,
            bar_spacing: 1.0,
            show_grid: true,
            grid_divisions: 4,
        }
    }
}

impl SpectrumConfig {
    pub fn with_height(mut self, height: f32) -> Self {
        self.height = height;
        self
    }

    pub fn with_color(mut self, color: Color32) -> Self {
        self.color = color;
        self
    }

    pub fn with_bars(mut self, bars: usize) -> Self {
        self.bars = bars;
        self
    }

    pub fn with_grid(mut self, show: bool) -> Self {
        self.show_grid = show;
        self
    }
}

/// Group `levels` into `bars` buckets, keeping each bucket's loudest bin.
pub fn bar_levels(levels: &[f32], bars: usize) -> Vec<f32> {
    if bars == 0 || bars >= levels.len() {
        return levels.to_vec();
    }
    (0..bars)
        .map(|i| {
            let start = i * levels.len() / bars;
            let end = ((i + 1) * levels.len() / bars).max(start + 1);
            levels[start..end].iter().copied().fold(0.0, f32::max)
        })
        .collect()
}

/// Draw the visualizer as a bar chart.
pub fn spectrum_display(ui: &mut Ui, visualizer: &Visualizer, config: &SpectrumConfig) -> Response {
    let size = Vec2::new(ui.available_width(), config.height);
    let (rect, response) = ui.allocate_exact_size(size, Sense::hover());

    if ui.is_rect_visible(rect) {
        let painter = ui.painter();
        draw_background(painter, rect, config);

        let current = bar_levels(visualizer.current(), config.bars);
        let trail = bar_levels(visualizer.trail(), config.bars);
        draw_bars(painter, rect, &current, &trail, config);
    }

    response
}

fn draw_background(painter: &egui::Painter, rect: Rect, config: &SpectrumConfig) {
    painter.rect_filled(rect, 2.0, Color32::from_rgb(20, 22, 30));

    if config.show_grid && config.grid_divisions > 0 {
        let grid_color = Color32::from_rgba_unmultiplied(255, 255, 255, 15);
        for i in 1..config.grid_divisions {
            let y = rect.bottom() - rect.height() * i as f32 / config.grid_divisions as f32;
            painter.line_segment(
                [Pos2::new(rect.left(), y), Pos2::new(rect.right(), y)],
                Stroke::new(0.5, grid_color),
            );
        }
    }

    painter.rect_stroke(rect, 2.0, Stroke::new(1.0, Color32::from_rgb(50, 55, 70)));
}

fn draw_bars(
    painter: &egui::Painter,
    rect: Rect,
    current: &[f32],
    trail: &[f32],
    config: &SpectrumConfig,
) {
    if current.is_empty() {
        return;
    }

    let num_bars = current.len();
    let available_width = rect.width() - (num_bars as f32 - 1.0) * config.bar_spacing;
    let bar_width = (available_width / num_bars as f32).max(1.0);

    for (i, (&level, &peak)) in current.iter().zip(trail).enumerate() {
        let x = rect.left() + i as f32 * (bar_width + config.bar_spacing);
        if x > rect.right() {
            break;
        }
        let intensity = level.clamp(0.0, 1.0);
        let bar_height = intensity * rect.height();

        if bar_height > 0.5 {
            let bar_rect = Rect::from_min_size(
                Pos2::new(x, rect.bottom() - bar_height),
                Vec2::new(bar_width, bar_height),
            );
            let bar_color = if intensity > 0.85 {
                theme::accent::ERROR // Red for peaks
            } else if intensity > 0.65 {
                theme::accent::WARNING
            } else {
                config.color
            };
            painter.rect_filled(bar_rect, 1.0, bar_color);
        }

        // Trail cap
        let peak_y = rect.bottom() - peak.clamp(0.0, 1.0) * rect.height();
        if peak > intensity && peak > 0.01 {
            painter.line_segment(
                [Pos2::new(x, peak_y), Pos2::new(x + bar_width, peak_y)],
                Stroke::new(2.0, config.trail_color),
            );
        }
    }
}
