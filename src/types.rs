use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

// ─── Audio data ─────────────────────────────────────────────────────────────

/// A chunk of audio samples from a source (WAV file, live input, simulator).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Milliseconds since session start (timestamp of first sample)
    pub timestamp_ms: u64,
    /// Mono f32 samples, normalized -1.0 to 1.0
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

// ─── Spectral data ──────────────────────────────────────────────────────────

/// Normalized (0.0–1.0) magnitude per analyzer bin for one instant.
///
/// Owned by whoever asked for it: the sampler hands out a fresh buffer every
/// cycle and never aliases its internal smoothing state.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySlice {
    pub magnitudes: Vec<f32>,
}

impl FrequencySlice {
    pub fn zeroed(bin_count: usize) -> Self {
        Self {
            magnitudes: vec![0.0; bin_count],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }
}

// ─── Color ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);

    /// Component-wise linear interpolation, `t` clamped to 0..1.
    pub fn lerp(self, other: Rgb, t: f32) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// RGB plus straight alpha (0.0–1.0), used for label text and panels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub rgb: Rgb,
    pub alpha: f32,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, alpha: f32) -> Self {
        Self {
            rgb: Rgb(r, g, b),
            alpha,
        }
    }
}

// ─── Clocks ─────────────────────────────────────────────────────────────────

/// Millisecond time source. The scheduler, the render gate and label aging
/// all read time through this so tests can drive them with a virtual clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock for the live session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SessionClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_rgb_lerp_endpoints() {
        let a = Rgb(0, 100, 200);
        let b = Rgb(255, 0, 100);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.lerp(b, 2.0), b, "t is clamped");
        assert_eq!(format!("{}", Rgb(255, 0, 16)), "#ff0010");
    }
}
