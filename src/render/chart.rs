use std::f64::consts::{FRAC_PI_2, TAU};

use anyhow::{Context, Result, anyhow};
use plotters::prelude::*;

use crate::core::{Outcome, OutcomeCounters};

/// Produces PNG bytes for one outcome distribution.
pub trait ChartRenderer {
    fn render_pie(&self, counters: &OutcomeCounters) -> Result<Vec<u8>>;
}

pub const fn outcome_color(outcome: Outcome) -> RGBColor {
    match outcome {
        Outcome::Pass => RGBColor(0x5c, 0xb8, 0x5c),
        Outcome::Fail => RGBColor(0xd9, 0x53, 0x4f),
        Outcome::Softfail => RGBColor(0xf0, 0xad, 0x4e),
        Outcome::None => RGBColor(0x5b, 0xc0, 0xde),
    }
}

const EMPTY_COLOR: RGBColor = RGBColor(0xdd, 0xdd, 0xdd);

#[derive(Debug, Clone, Copy)]
pub struct PieChartRenderer {
    pub size: u32,
}

impl Default for PieChartRenderer {
    fn default() -> Self {
        Self { size: 360 }
    }
}

impl ChartRenderer for PieChartRenderer {
    fn render_pie(&self, counters: &OutcomeCounters) -> Result<Vec<u8>> {
        let size = self.size.max(16);
        let mut pixels = vec![0u8; (size as usize) * (size as usize) * 3];
        draw_pie(&mut pixels, size, counters)?;
        encode_png(&pixels, size)
    }
}

fn draw_pie(pixels: &mut [u8], size: u32, counters: &OutcomeCounters) -> Result<()> {
    let root = BitMapBackend::with_buffer(pixels, (size, size)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| anyhow!("グラフの描画に失敗しました: {e}"))?;

    let center = (size as i32 / 2, size as i32 / 2);
    let radius = (size as f64 / 2.0) * 0.9;
    let total = counters.total();

    let sole = counters.iter().find(|(_, n)| *n == total && total > 0);
    if total == 0 || sole.is_some() {
        let color = sole.map_or(EMPTY_COLOR, |(outcome, _)| outcome_color(outcome));
        root.draw(&Circle::new(center, radius as i32, color.filled()))
            .map_err(|e| anyhow!("グラフの描画に失敗しました: {e}"))?;
    } else {
        // Clockwise from twelve o'clock, in pass/fail/softfail/none order.
        let mut start = -FRAC_PI_2;
        for (outcome, n) in counters.iter() {
            if n == 0 {
                continue;
            }
            let sweep = TAU * (n as f64 / total as f64);
            let points = wedge_points(center, radius, start, sweep);
            root.draw(&Polygon::new(points, outcome_color(outcome).filled()))
                .map_err(|e| anyhow!("グラフの描画に失敗しました: {e}"))?;
            start += sweep;
        }
    }

    root.present()
        .map_err(|e| anyhow!("グラフの描画に失敗しました: {e}"))?;
    Ok(())
}

fn wedge_points(center: (i32, i32), radius: f64, start: f64, sweep: f64) -> Vec<(i32, i32)> {
    let steps = ((sweep / TAU) * 180.0).ceil().max(2.0) as usize;
    let mut points = Vec::with_capacity(steps + 2);
    points.push(center);
    for i in 0..=steps {
        let angle = start + sweep * (i as f64 / steps as f64);
        points.push((
            center.0 + (radius * angle.cos()).round() as i32,
            center.1 + (radius * angle.sin()).round() as i32,
        ));
    }
    points
}

fn encode_png(pixels: &[u8], size: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, size, size);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .context("PNG ヘッダーの書き込みに失敗しました")?;
        writer
            .write_image_data(pixels)
            .context("PNG データの書き込みに失敗しました")?;
        writer.finish().context("PNG の書き込みに失敗しました")?;
    }
    Ok(out)
}
