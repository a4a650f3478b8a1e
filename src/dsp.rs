//! Shared DSP primitives: window functions, high-pass biquad, RMS, and test signal generators.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Analysis window applied before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Hann,
    Blackman,
    Hamming,
}

impl WindowFunction {
    pub const ALL: [WindowFunction; 3] = [
        WindowFunction::Hann,
        WindowFunction::Blackman,
        WindowFunction::Hamming,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowFunction::Hann => "hann",
            WindowFunction::Blackman => "blackman",
            WindowFunction::Hamming => "hamming",
        }
    }

    /// Periodic window of `size` points.
    pub fn coefficients(self, size: usize) -> Vec<f32> {
        if size <= 1 {
            return vec![1.0; size];
        }
        (0..size)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / size as f32;
                match self {
                    WindowFunction::Hann => 0.5 - 0.5 * phase.cos(),
                    WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowFunction::Blackman => {
                        0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                    }
                }
            })
            .collect()
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        WindowFunction::ALL
            .iter()
            .copied()
            .find(|w| w.name() == lower)
            .ok_or_else(|| ConfigError::UnknownWindow(s.to_string()))
    }
}

/// Root mean square of an audio buffer.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Second-order Butterworth high-pass (RBJ cookbook, Q = 1/√2),
/// direct form I. Used as the sampler's low-cut stage.
#[derive(Debug, Clone)]
pub struct HighPass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl HighPass {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let mut f = Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        f.set_cutoff(cutoff_hz, sample_rate);
        f
    }

    /// Recompute coefficients. Filter history is cleared so a cutoff jump
    /// cannot ring through stale state.
    pub fn set_cutoff(&mut self, cutoff_hz: f32, sample_rate: u32) {
        let fs = sample_rate.max(1) as f32;
        let fc = cutoff_hz.clamp(1.0, fs * 0.49);
        let w0 = 2.0 * PI * fc / fs;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * std::f32::consts::FRAC_1_SQRT_2);
        let a0 = 1.0 + alpha;
        self.b0 = (1.0 + cos_w0) / 2.0 / a0;
        self.b1 = -(1.0 + cos_w0) / a0;
        self.b2 = (1.0 + cos_w0) / 2.0 / a0;
        self.a1 = -2.0 * cos_w0 / a0;
        self.a2 = (1.0 - alpha) / a0;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}
