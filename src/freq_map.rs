//! Frequency bin → raster coordinate mapping (linear or logarithmic).
//!
//! Coordinates run from 0 (bottom of the frequency axis) to `axis_len`.

/// Display band in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min_hz: f32,
    pub max_hz: f32,
}

impl Band {
    pub fn new(min_hz: f32, max_hz: f32) -> Self {
        Self { min_hz, max_hz }
    }

    pub fn contains(&self, hz: f32) -> bool {
        hz >= self.min_hz && hz <= self.max_hz
    }
}

/// Center frequency of an analyzer bin.
pub fn bin_frequency(bin: usize, bin_count: usize, nyquist: f32) -> f32 {
    if bin_count == 0 {
        return 0.0;
    }
    bin as f32 * nyquist / bin_count as f32
}

/// Map a bin to its coordinate along the frequency axis.
///
/// Log policy places the bin's frequency (clamped to the band) on a
/// logarithmic scale spanning the band. Linear policy is proportional to the
/// bin index over the whole analyzer range.
pub fn map_frequency_to_coordinate(
    bin: usize,
    bin_count: usize,
    nyquist: f32,
    axis_len: f32,
    band: Band,
    use_log: bool,
) -> f32 {
    if bin_count == 0 {
        return 0.0;
    }
    if use_log {
        log_coordinate(bin_frequency(bin, bin_count, nyquist), axis_len, band)
    } else {
        bin as f32 / bin_count as f32 * axis_len
    }
}

/// Same policy as [`map_frequency_to_coordinate`], starting from a frequency.
/// Used for reference lines that do not sit on a bin boundary.
pub fn frequency_to_coordinate(
    hz: f32,
    nyquist: f32,
    axis_len: f32,
    band: Band,
    use_log: bool,
) -> f32 {
    if use_log {
        log_coordinate(hz, axis_len, band)
    } else if nyquist > 0.0 {
        hz / nyquist * axis_len
    } else {
        0.0
    }
}

fn log_coordinate(hz: f32, axis_len: f32, band: Band) -> f32 {
    let lo = band.min_hz.max(f32::MIN_POSITIVE);
    let hi = band.max_hz.max(lo);
    let span = hi.ln() - lo.ln();
    if span <= 0.0 {
        return 0.0;
    }
    (hz.clamp(lo, hi).ln() - lo.ln()) / span * axis_len
}

/// Pixel span `[start, end)` covered by one bin on the frequency axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinSpan {
    pub bin: usize,
    pub start: usize,
    pub end: usize,
}

/// Spans for every in-band bin, in increasing coordinate order.
///
/// Bin `i` covers `[round(c_i), round(c_{i+1}))` so neighbours meet exactly.
/// Bins that would round to nothing still get one pixel. Out-of-band bins
/// produce no span at all.
pub fn bin_spans(
    bin_count: usize,
    nyquist: f32,
    axis_len: usize,
    band: Band,
    use_log: bool,
) -> Vec<BinSpan> {
    let mut spans = Vec::new();
    if bin_count == 0 || axis_len == 0 {
        return spans;
    }
    let len = axis_len as f32;
    for bin in 0..bin_count {
        if !band.contains(bin_frequency(bin, bin_count, nyquist)) {
            continue;
        }
        let c0 = map_frequency_to_coordinate(bin, bin_count, nyquist, len, band, use_log);
        let c1 = map_frequency_to_coordinate(bin + 1, bin_count, nyquist, len, band, use_log);
        let start = (c0.round() as usize).min(axis_len - 1);
        let end = (c1.round() as usize).clamp(start + 1, axis_len);
        spans.push(BinSpan { bin, start, end });
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const NYQUIST: f32 = 24_000.0;

    #[test]
    fn test_linear_mapping_is_proportional() {
        let band = Band::new(0.0, NYQUIST);
        let c = map_frequency_to_coordinate(256, 1024, NYQUIST, 400.0, band, false);
        assert!((c - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_log_mapping_monotonic_within_band() {
        let band = Band::new(1000.0, 11_000.0);
        let mut prev = -1.0;
        for bin in 0..1024 {
            let hz = bin_frequency(bin, 1024, NYQUIST);
            if !band.contains(hz) {
                continue;
            }
            let c = map_frequency_to_coordinate(bin, 1024, NYQUIST, 300.0, band, true);
            assert!(c > prev, "bin {} at {} Hz not increasing", bin, hz);
            prev = c;
        }
        assert!(prev <= 300.0);
    }

    #[test]
    fn test_log_band_edges_hit_axis_ends() {
        let band = Band::new(1000.0, 11_000.0);
        assert_eq!(frequency_to_coordinate(1000.0, NYQUIST, 300.0, band, true), 0.0);
        let top = frequency_to_coordinate(11_000.0, NYQUIST, 300.0, band, true);
        assert!((top - 300.0).abs() < 1e-3);
        // Clamped outside the band
        assert_eq!(frequency_to_coordinate(500.0, NYQUIST, 300.0, band, true), 0.0);
    }

    #[test]
    fn test_out_of_band_bins_never_spanned() {
        let band = Band::new(1000.0, 11_000.0);
        // 2048-point analysis at 48 kHz: bin width 23.4375 Hz, bin 21 ≈ 492 Hz
        let spans = bin_spans(1024, NYQUIST, 256, band, true);
        assert!(!spans.is_empty());
        for s in &spans {
            let hz = bin_frequency(s.bin, 1024, NYQUIST);
            assert!(band.contains(hz), "bin {} at {} Hz painted", s.bin, hz);
        }
        assert!(spans.iter().all(|s| s.bin != 21));
    }

    #[test]
    fn test_spans_contiguous_without_gaps() {
        let band = Band::new(100.0, 12_000.0);
        for use_log in [false, true] {
            let spans = bin_spans(256, NYQUIST, 600, band, use_log);
            for pair in spans.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                assert_eq!(b.bin, a.bin + 1);
                assert!(a.end > a.start, "empty span for bin {}", a.bin);
                assert!(b.start >= a.start, "spans out of order");
                let boundary = map_frequency_to_coordinate(
                    b.bin, 256, NYQUIST, 600.0, band, use_log,
                )
                .round() as usize;
                if boundary > a.start && boundary < 600 {
                    assert_eq!(a.end, boundary);
                    assert_eq!(b.start, boundary, "gap between bins {} and {}", a.bin, b.bin);
                }
            }
        }
    }

    #[test]
    fn test_narrow_bins_get_one_pixel() {
        // Many bins onto a short axis: every span must still be at least one pixel.
        let spans = bin_spans(4096, NYQUIST, 32, Band::new(0.0, NYQUIST), false);
        assert!(spans.iter().all(|s| s.end - s.start >= 1));
        assert_eq!(spans.last().unwrap().end, 32);
    }
}
