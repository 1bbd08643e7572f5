// THEORY:
// Charts are the last stop of an analysis: the trend line of percentages over
// periods, and a two-row panel that puts every frame above the overlay it
// produced. Both are drawn in memory; writing them anywhere is the caller's job.
//
// Text is deliberately absent from the images. Period labels and values travel
// next to the chart in the JSON summary, where they can be rendered by the page.

use image::{DynamicImage, GrayImage, Rgb, RgbImage, imageops};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

/// Colors and geometry of the trend chart.
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    pub margin: u32,
    pub grid_lines: u32,
    pub marker_radius: i32,
    pub background: Rgb<u8>,
    pub axis_color: Rgb<u8>,
    pub grid_color: Rgb<u8>,
    pub line_color: Rgb<u8>,
    pub marker_color: Rgb<u8>,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            margin: 48,
            grid_lines: 5,
            marker_radius: 5,
            background: Rgb([255, 255, 255]),
            axis_color: Rgb([40, 40, 40]),
            grid_color: Rgb([225, 225, 225]),
            line_color: Rgb([30, 90, 200]),
            marker_color: Rgb([30, 90, 200]),
        }
    }
}

impl ChartStyle {
    /// Pixel position of the `index`-th of `count` points holding `value`.
    pub fn point_position(&self, index: usize, count: usize, value: f64, y_max: f64) -> (f32, f32) {
        let left = self.margin as f32;
        let right = self.width.saturating_sub(self.margin) as f32;
        let top = self.margin as f32;
        let bottom = self.height.saturating_sub(self.margin) as f32;

        let x = if count <= 1 {
            (left + right) / 2.0
        } else {
            left + (right - left) * index as f32 / (count - 1) as f32
        };
        let ratio = if y_max > 0.0 { (value / y_max).clamp(0.0, 1.0) } else { 0.0 };
        let y = bottom - (bottom - top) * ratio as f32;
        (x, y)
    }
}

/// Upper bound of the y axis: the largest value, never below 1.
pub fn y_axis_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(1.0f64, f64::max)
}

/// Line chart of one value per period.
pub fn render_trend_chart(values: &[f64], style: &ChartStyle) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(style.width, style.height, style.background);
    let left = style.margin as f32;
    let right = style.width.saturating_sub(style.margin) as f32;
    let top = style.margin as f32;
    let bottom = style.height.saturating_sub(style.margin) as f32;

    // --- Grid ---
    let lines = style.grid_lines.max(1);
    for i in 1..=lines {
        let y = bottom - (bottom - top) * i as f32 / lines as f32;
        draw_line_segment_mut(&mut canvas, (left, y), (right, y), style.grid_color);
    }

    // --- Axes ---
    draw_line_segment_mut(&mut canvas, (left, top), (left, bottom), style.axis_color);
    draw_line_segment_mut(&mut canvas, (left, bottom), (right, bottom), style.axis_color);

    // --- Series ---
    let y_max = y_axis_max(values);
    let points: Vec<(f32, f32)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| style.point_position(i, values.len(), v, y_max))
        .collect();
    for pair in points.windows(2) {
        draw_line_segment_mut(&mut canvas, pair[0], pair[1], style.line_color);
    }
    for &(x, y) in &points {
        draw_filled_circle_mut(
            &mut canvas,
            (x.round() as i32, y.round() as i32),
            style.marker_radius,
            style.marker_color,
        );
    }
    canvas
}

const PANEL_PADDING: u32 = 8;

/// Frames on the top row, each overlay below the earlier frame of its pair.
/// `overlays[i]` belongs under `frames[i]`; `None` leaves the cell blank.
pub fn render_comparison_panel(frames: &[&GrayImage], overlays: &[Option<&RgbImage>]) -> RgbImage {
    let cell_w = frames
        .iter()
        .map(|f| f.width())
        .chain(overlays.iter().flatten().map(|o| o.width()))
        .max()
        .unwrap_or(0);
    let cell_h = frames
        .iter()
        .map(|f| f.height())
        .chain(overlays.iter().flatten().map(|o| o.height()))
        .max()
        .unwrap_or(0);
    let columns = frames.len().max(overlays.len()) as u32;

    let width = columns * (cell_w + PANEL_PADDING) + PANEL_PADDING;
    let height = 2 * (cell_h + PANEL_PADDING) + PANEL_PADDING;
    let mut panel = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    for (i, frame) in frames.iter().enumerate() {
        let x = PANEL_PADDING + i as u32 * (cell_w + PANEL_PADDING);
        let rgb = DynamicImage::ImageLuma8((*frame).clone()).to_rgb8();
        imageops::overlay(&mut panel, &rgb, x as i64, PANEL_PADDING as i64);
    }
    for (i, overlay) in overlays.iter().enumerate() {
        if let Some(overlay) = overlay {
            let x = PANEL_PADDING + i as u32 * (cell_w + PANEL_PADDING);
            let y = 2 * PANEL_PADDING + cell_h;
            imageops::overlay(&mut panel, *overlay, x as i64, y as i64);
        }
    }
    panel
}
