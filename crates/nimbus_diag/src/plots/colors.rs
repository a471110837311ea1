//! Colour maps and palettes used by the renderers.

use plotters::style::RGBColor;

use crate::error::{DiagError, Result};

const VIRIDIS: [(f64, f64, f64); 9] = [
    (0.267, 0.005, 0.329),
    (0.283, 0.141, 0.458),
    (0.254, 0.265, 0.530),
    (0.207, 0.372, 0.553),
    (0.164, 0.471, 0.558),
    (0.128, 0.567, 0.551),
    (0.135, 0.659, 0.518),
    (0.478, 0.821, 0.318),
    (0.993, 0.906, 0.144),
];

const RDBU: [(f64, f64, f64); 9] = [
    (0.404, 0.000, 0.122),
    (0.698, 0.094, 0.169),
    (0.839, 0.376, 0.302),
    (0.957, 0.647, 0.510),
    (0.969, 0.969, 0.969),
    (0.573, 0.773, 0.871),
    (0.263, 0.576, 0.765),
    (0.129, 0.400, 0.675),
    (0.020, 0.188, 0.380),
];

pub const TAB10: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

pub const TAB20: [RGBColor; 20] = [
    RGBColor(31, 119, 180),
    RGBColor(174, 199, 232),
    RGBColor(255, 127, 14),
    RGBColor(255, 187, 120),
    RGBColor(44, 160, 44),
    RGBColor(152, 223, 138),
    RGBColor(214, 39, 40),
    RGBColor(255, 152, 150),
    RGBColor(148, 103, 189),
    RGBColor(197, 176, 213),
    RGBColor(140, 86, 75),
    RGBColor(196, 156, 148),
    RGBColor(227, 119, 194),
    RGBColor(247, 182, 210),
    RGBColor(127, 127, 127),
    RGBColor(199, 199, 199),
    RGBColor(188, 189, 34),
    RGBColor(219, 219, 141),
    RGBColor(23, 190, 207),
    RGBColor(158, 218, 229),
];

fn lerp_stops(stops: &[(f64, f64, f64)], t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (stops.len() - 1) as f64;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(stops.len() - 1);
    let frac = scaled - lo as f64;
    let (r0, g0, b0) = stops[lo];
    let (r1, g1, b1) = stops[hi];
    let ch = |a: f64, b: f64| ((a + (b - a) * frac) * 255.0).round().clamp(0.0, 255.0) as u8;
    RGBColor(ch(r0, r1), ch(g0, g1), ch(b0, b1))
}

/// Viridis, `t` in `[0, 1]`.
pub fn viridis(t: f64) -> RGBColor {
    lerp_stops(&VIRIDIS, t)
}

/// Diverging red-white-blue, `t` in `[0, 1]`; 0.5 is white.
pub fn rdbu(t: f64) -> RGBColor {
    lerp_stops(&RDBU, t)
}

/// `n` colours sampled from a listed palette at `linspace(0, 1, n)`.
pub fn sample_listed(palette: &[RGBColor], n: usize) -> Vec<RGBColor> {
    let len = palette.len();
    (0..n)
        .map(|i| {
            let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            let idx = ((t * len as f64).floor() as usize).min(len - 1);
            palette[idx]
        })
        .collect()
}

/// Parse `#rrggbb`.
pub fn parse_hex(hex: &str) -> Result<RGBColor> {
    let digits = hex.trim_start_matches('#');
    let bad = || DiagError::Config(format!("invalid colour '{hex}', expected #rrggbb"));
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(bad());
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| bad());
    Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// Discrete colour map for accumulated quantities (precipitation and friends).
#[derive(Clone, Debug)]
pub struct AccumulationScale {
    levels: Vec<f32>,
    colors: Vec<RGBColor>,
}

impl AccumulationScale {
    pub fn new(levels: &[f32], colors: &[String]) -> Result<Self> {
        if levels.len() < 2 {
            return Err(DiagError::Config(
                "accumulation scale needs at least two levels".into(),
            ));
        }
        let colors = colors
            .iter()
            .map(|c| parse_hex(c))
            .collect::<Result<Vec<_>>>()?;
        if colors.len() + 1 < levels.len() {
            return Err(DiagError::Config(format!(
                "{} accumulation levels need {} colours, got {}",
                levels.len(),
                levels.len() - 1,
                colors.len()
            )));
        }
        Ok(Self {
            levels: levels.to_vec(),
            colors,
        })
    }

    /// Colour of the interval containing `value`; values outside the levels clamp.
    pub fn color(&self, value: f32) -> RGBColor {
        let interval = self
            .levels
            .windows(2)
            .position(|w| value < w[1])
            .unwrap_or(self.levels.len() - 2);
        self.colors[interval]
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }
}
