//! Magnitude → color mapping: built-in palettes and normalization policy.

use crate::error::ConfigError;
use crate::types::{FrequencySlice, Rgb};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Built-in palettes. Serialized by their lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    /// Black (silence) to white (loud).
    Grayscale,
    /// White (silence) to black (loud), for print-style screenshots.
    Inverted,
    /// Hue ramp from dark blue through green to bright red.
    Hue,
    Magma,
    Inferno,
    Plasma,
    Viridis,
    Cividis,
}

const MAGMA: [Rgb; 8] = [
    Rgb(0, 0, 4),
    Rgb(28, 16, 68),
    Rgb(79, 18, 123),
    Rgb(129, 37, 129),
    Rgb(181, 54, 122),
    Rgb(229, 80, 100),
    Rgb(251, 135, 97),
    Rgb(252, 253, 191),
];

const INFERNO: [Rgb; 8] = [
    Rgb(0, 0, 4),
    Rgb(40, 11, 84),
    Rgb(101, 21, 110),
    Rgb(159, 42, 99),
    Rgb(212, 72, 66),
    Rgb(245, 125, 21),
    Rgb(250, 193, 39),
    Rgb(252, 255, 164),
];

const PLASMA: [Rgb; 9] = [
    Rgb(13, 8, 135),
    Rgb(75, 3, 161),
    Rgb(125, 3, 168),
    Rgb(168, 34, 150),
    Rgb(203, 70, 121),
    Rgb(229, 107, 93),
    Rgb(248, 148, 65),
    Rgb(253, 195, 40),
    Rgb(240, 249, 33),
];

const CIVIDIS: [Rgb; 10] = [
    Rgb(0, 34, 78),
    Rgb(18, 53, 112),
    Rgb(59, 73, 108),
    Rgb(87, 93, 109),
    Rgb(112, 113, 115),
    Rgb(138, 134, 120),
    Rgb(166, 157, 117),
    Rgb(196, 180, 108),
    Rgb(227, 205, 92),
    Rgb(253, 234, 69),
];

const VIRIDIS: [Rgb; 10] = [
    Rgb(68, 1, 84),
    Rgb(72, 40, 120),
    Rgb(62, 74, 137),
    Rgb(49, 104, 142),
    Rgb(38, 130, 142),
    Rgb(31, 158, 137),
    Rgb(53, 183, 121),
    Rgb(109, 205, 89),
    Rgb(180, 222, 44),
    Rgb(253, 231, 37),
];

impl ColorScheme {
    pub const ALL: [ColorScheme; 8] = [
        ColorScheme::Grayscale,
        ColorScheme::Inverted,
        ColorScheme::Hue,
        ColorScheme::Magma,
        ColorScheme::Inferno,
        ColorScheme::Plasma,
        ColorScheme::Viridis,
        ColorScheme::Cividis,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColorScheme::Grayscale => "grayscale",
            ColorScheme::Inverted => "inverted",
            ColorScheme::Hue => "hue",
            ColorScheme::Magma => "magma",
            ColorScheme::Inferno => "inferno",
            ColorScheme::Plasma => "plasma",
            ColorScheme::Viridis => "viridis",
            ColorScheme::Cividis => "cividis",
        }
    }

    /// Color of silence; also what the raster is cleared to.
    pub fn background(self) -> Rgb {
        self.map(0.0)
    }

    /// Map a normalized magnitude (clamped to 0..1) to a color.
    pub fn map(self, v: f32) -> Rgb {
        let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        match self {
            ColorScheme::Grayscale => {
                let g = (v * 255.0).round() as u8;
                Rgb(g, g, g)
            }
            ColorScheme::Inverted => {
                let g = 255 - (v * 255.0).round() as u8;
                Rgb(g, g, g)
            }
            ColorScheme::Hue => hsl_to_rgb((1.0 - v) * 240.0, 1.0, v * 0.5),
            ColorScheme::Magma => gradient(&MAGMA, v),
            ColorScheme::Inferno => gradient(&INFERNO, v),
            ColorScheme::Plasma => gradient(&PLASMA, v),
            ColorScheme::Viridis => gradient(&VIRIDIS, v),
            ColorScheme::Cividis => gradient(&CIVIDIS, v),
        }
    }
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        ColorScheme::ALL
            .iter()
            .copied()
            .find(|c| c.name() == lower)
            .ok_or_else(|| ConfigError::UnknownPalette(s.to_string()))
    }
}

/// Evenly spaced multi-stop gradient.
fn gradient(stops: &[Rgb], v: f32) -> Rgb {
    let segments = (stops.len() - 1) as f32;
    let pos = v * segments;
    let idx = (pos.floor() as usize).min(stops.len() - 2);
    stops[idx].lerp(stops[idx + 1], pos - idx as f32)
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> Rgb {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = (h.rem_euclid(360.0)) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let to_u8 = |ch: f32| ((ch + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb(to_u8(r1), to_u8(g1), to_u8(b1))
}

// ─── Normalization ──────────────────────────────────────────────────────────

/// How a sampler magnitude is shaped before it reaches the palette.
///
/// `Linear` uses the analyzer's 0..1 value as-is. `Log` applies a
/// pseudo-dB compression `ln(1 + 9v) / ln(10)` that lifts quiet detail.
/// `PerFrequency` shows each bin relative to its own recent level; the
/// rebalancing happens on the whole slice in [`BinBalancer`], after which
/// values pass through linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    Linear,
    Log,
    PerFrequency,
}

impl Normalization {
    pub fn apply(self, v: f32) -> f32 {
        let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        match self {
            Normalization::Linear | Normalization::PerFrequency => v,
            Normalization::Log => (1.0 + 9.0 * v).ln() / 10f32.ln(),
        }
    }
}

impl FromStr for Normalization {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(Normalization::Linear),
            "log" => Ok(Normalization::Log),
            "per_frequency" | "per-frequency" => Ok(Normalization::PerFrequency),
            _ => Err(ConfigError::UnknownNormalization(s.to_string())),
        }
    }
}

/// Palette plus normalization: the full magnitude → pixel function the
/// raster paints with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMapper {
    pub scheme: ColorScheme,
    pub normalization: Normalization,
}

impl ColorMapper {
    pub fn new(scheme: ColorScheme, normalization: Normalization) -> Self {
        Self {
            scheme,
            normalization,
        }
    }

    pub fn background(&self) -> Rgb {
        self.scheme.background()
    }

    pub fn color(&self, magnitude: f32) -> Rgb {
        self.scheme.map(self.normalization.apply(magnitude))
    }
}

/// Running per-bin mean for [`Normalization::PerFrequency`]. A bin sitting
/// at its own average maps to background; only excess above it is drawn.
#[derive(Debug, Clone, Default)]
pub struct BinBalancer {
    means: Vec<f32>,
}

/// Weight of the newest slice in each bin's running mean.
const BALANCE_RATE: f32 = 0.02;

impl BinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.means.clear();
    }

    /// Rescale `slice` in place against each bin's mean, then fold the raw
    /// values into the means. A change in bin count starts over.
    pub fn balance(&mut self, slice: &mut FrequencySlice) {
        if self.means.len() != slice.magnitudes.len() {
            self.means = vec![0.0; slice.magnitudes.len()];
        }
        for (v, mean) in slice.magnitudes.iter_mut().zip(self.means.iter_mut()) {
            let raw = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
            // Magnitudes are already on a dB scale: subtracting divides.
            *v = (raw - *mean).clamp(0.0, 1.0);
            *mean += BALANCE_RATE * (raw - *mean);
        }
    }
}
