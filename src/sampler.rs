use crate::config::{
    validate_analysis_size, validate_cutoff, validate_db_range, validate_gain, Config,
};
use crate::dsp::{compute_rms, HighPass, WindowFunction};
use crate::error::ConfigError;
use crate::types::{AudioChunk, FrequencySlice};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, info, warn};
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Sample rate assumed before a source reports its own.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Level (dBFS of the normalized FFT magnitude) drawn at full palette
/// intensity. The configured dB range extends downward from here.
const DB_CEILING: f32 = -30.0;

/// Windowed real FFT over the most recent `fft_size` samples, with
/// per-bin temporal smoothing and dB → 0..1 scaling.
pub struct SpectrumAnalyzer {
    fft_size: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    window_fn: WindowFunction,
    window: Vec<f32>,
    db_range: f32,
    /// Circular history of filtered samples
    history: Vec<f32>,
    write_pos: usize,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    /// Smoothed linear magnitudes, one per output bin
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, window_fn: WindowFunction, smoothing: f32, db_range: f32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        Self {
            fft_size,
            fft,
            window_fn,
            window: window_fn.coefficients(fft_size),
            db_range,
            history: vec![0.0; fft_size],
            write_pos: 0,
            input,
            spectrum,
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    pub fn window_fn(&self) -> WindowFunction {
        self.window_fn
    }

    pub fn set_window(&mut self, window_fn: WindowFunction) {
        self.window_fn = window_fn;
        self.window = window_fn.coefficients(self.fft_size);
    }

    pub fn db_range(&self) -> f32 {
        self.db_range
    }

    pub fn push(&mut self, samples: &[f32]) {
        for &s in samples {
            self.history[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Run one analysis over the current history and return a fresh slice.
    pub fn analyze(&mut self) -> FrequencySlice {
        // Oldest sample sits at write_pos
        for i in 0..self.fft_size {
            let s = self.history[(self.write_pos + i) % self.fft_size];
            self.input[i] = s * self.window[i];
        }
        if let Err(e) = self.fft.process(&mut self.input, &mut self.spectrum) {
            debug!("FFT failed, reusing previous magnitudes: {}", e);
            return self.scaled();
        }

        let norm = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(self.spectrum.iter()) {
            let mag = bin.norm() * norm;
            *smoothed = tau * *smoothed + (1.0 - tau) * mag;
        }
        self.scaled()
    }

    fn scaled(&self) -> FrequencySlice {
        let floor = DB_CEILING - self.db_range;
        let magnitudes = self
            .smoothed
            .iter()
            .map(|&m| {
                let db = 20.0 * m.max(1e-12).log10();
                ((db - floor) / self.db_range).clamp(0.0, 1.0)
            })
            .collect();
        FrequencySlice { magnitudes }
    }
}

/// Source → optional high-pass → gain → analyzer.
pub struct AnalyzerPipeline {
    sample_rate: u32,
    filter_enabled: bool,
    cutoff_hz: f32,
    filter: HighPass,
    gain: f32,
    analyzer: SpectrumAnalyzer,
    level: f32,
    scratch: Vec<f32>,
}

impl AnalyzerPipeline {
    pub fn new(config: &Config, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            filter_enabled: config.low_cut_enabled,
            cutoff_hz: config.low_cut_hz,
            filter: HighPass::new(config.low_cut_hz, sample_rate),
            gain: config.gain,
            analyzer: SpectrumAnalyzer::new(
                sanitized_size(config.fft_size),
                config.window,
                config.smoothing,
                validate_db_range(config.db_range).unwrap_or(Config::default().db_range),
            ),
            level: 0.0,
            scratch: Vec::new(),
        }
    }

    pub fn process(&mut self, chunk: &AudioChunk) {
        if chunk.sample_rate != self.sample_rate && chunk.sample_rate > 0 {
            info!("Sampler: source rate {} Hz", chunk.sample_rate);
            self.sample_rate = chunk.sample_rate;
            self.filter.set_cutoff(self.cutoff_hz, self.sample_rate);
        }
        self.scratch.clear();
        for &s in &chunk.samples {
            let filtered = if self.filter_enabled {
                self.filter.process(s)
            } else {
                s
            };
            self.scratch.push(filtered * self.gain);
        }
        self.level = compute_rms(&self.scratch);
        self.analyzer.push(&self.scratch);
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }
}

fn sanitized_size(n: usize) -> usize {
    validate_analysis_size(n).unwrap_or_else(|e| {
        warn!("Sampler: {}; using default", e);
        Config::default().fft_size
    })
}

/// The render loop's view of the audio pipeline: one non-blocking call that
/// returns the latest magnitude snapshot.
pub struct SpectralSampler {
    input: Option<Receiver<AudioChunk>>,
    pipeline: AnalyzerPipeline,
    chunks_seen: u64,
}

impl SpectralSampler {
    pub fn new(config: &Config) -> Self {
        Self {
            input: None,
            pipeline: AnalyzerPipeline::new(config, DEFAULT_SAMPLE_RATE),
            chunks_seen: 0,
        }
    }

    /// Attach a source's chunk stream.
    pub fn connect(&mut self, input: Receiver<AudioChunk>, sample_rate: u32) {
        if sample_rate > 0 && sample_rate != self.pipeline.sample_rate {
            self.pipeline.sample_rate = sample_rate;
            self.pipeline
                .filter
                .set_cutoff(self.pipeline.cutoff_hz, sample_rate);
        }
        self.input = Some(input);
    }

    pub fn disconnect(&mut self) {
        self.input = None;
    }

    pub fn is_connected(&self) -> bool {
        self.input.is_some()
    }

    pub fn bin_count(&self) -> usize {
        self.pipeline.analyzer.bin_count()
    }

    pub fn analysis_size(&self) -> usize {
        self.pipeline.analyzer.fft_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.pipeline.sample_rate
    }

    pub fn nyquist(&self) -> f32 {
        self.pipeline.nyquist()
    }

    /// RMS of the most recent processed chunk (after filter and gain).
    pub fn input_level(&self) -> f32 {
        self.pipeline.level
    }

    /// Push a chunk directly, bypassing the channel.
    pub fn feed(&mut self, chunk: &AudioChunk) {
        self.chunks_seen += 1;
        self.pipeline.process(chunk);
    }

    /// Drain whatever audio has arrived and return the current snapshot.
    /// Never blocks; an unconnected sampler yields silence.
    pub fn sample(&mut self) -> FrequencySlice {
        let Some(rx) = self.input.as_ref() else {
            return FrequencySlice::zeroed(self.bin_count());
        };
        let mut pending = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(chunk) => pending.push(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Source finished; keep showing the last analysis.
                    break;
                }
            }
        }
        for chunk in &pending {
            self.feed(chunk);
        }
        if self.chunks_seen % 1000 == 1 && !pending.is_empty() {
            debug!("Sampler: {} chunks processed", self.chunks_seen);
        }
        self.pipeline.analyzer.analyze()
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        if self.pipeline.filter_enabled != enabled {
            self.pipeline.filter_enabled = enabled;
            self.pipeline.filter.reset();
        }
    }

    pub fn set_filter_cutoff(&mut self, hz: f32) -> Result<(), ConfigError> {
        match validate_cutoff(hz, self.nyquist()) {
            Ok(hz) => {
                self.pipeline.cutoff_hz = hz;
                self.pipeline.filter.set_cutoff(hz, self.pipeline.sample_rate);
                Ok(())
            }
            Err(e) => {
                warn!("Sampler: {}", e);
                Err(e)
            }
        }
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<(), ConfigError> {
        match validate_gain(gain) {
            Ok(g) => {
                self.pipeline.gain = g;
                Ok(())
            }
            Err(e) => {
                warn!("Sampler: {}", e);
                Err(e)
            }
        }
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.pipeline.analyzer.set_smoothing(smoothing);
    }

    pub fn set_window(&mut self, window_fn: WindowFunction) {
        if window_fn != self.pipeline.analyzer.window_fn() {
            self.pipeline.analyzer.set_window(window_fn);
            info!("Sampler: {} window", window_fn);
        }
    }

    pub fn set_db_range(&mut self, db: f32) -> Result<(), ConfigError> {
        match validate_db_range(db) {
            Ok(db) => {
                self.pipeline.analyzer.db_range = db;
                Ok(())
            }
            Err(e) => {
                warn!("Sampler: {}", e);
                Err(e)
            }
        }
    }

    /// Reallocate the analyzer. Invalid sizes never reach the pipeline.
    pub fn set_analysis_size(&mut self, n: usize) -> Result<(), ConfigError> {
        match validate_analysis_size(n) {
            Ok(n) => {
                if n != self.analysis_size() {
                    let SpectrumAnalyzer {
                        window_fn,
                        smoothing,
                        db_range,
                        ..
                    } = self.pipeline.analyzer;
                    self.pipeline.analyzer = SpectrumAnalyzer::new(n, window_fn, smoothing, db_range);
                    info!("Sampler: analysis size {} ({} bins)", n, n / 2);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Sampler: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::sine_wave;
    use crossbeam_channel::unbounded;

    fn chunk(samples: Vec<f32>) -> AudioChunk {
        AudioChunk {
            timestamp_ms: 0,
            samples,
            sample_rate: 48_000,
        }
    }

    fn peak_bin(slice: &FrequencySlice) -> usize {
        slice
            .magnitudes
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &m)| if m > best.1 { (i, m) } else { best })
            .0
    }

    #[test]
    fn test_unconnected_sampler_returns_zeros() {
        let mut s = SpectralSampler::new(&Config::default());
        let slice = s.sample();
        assert_eq!(slice.bin_count(), 1024);
        assert!(slice.magnitudes.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let (tx, rx) = unbounded();
        let mut s = SpectralSampler::new(&Config::default());
        s.connect(rx, 48_000);
        tx.send(chunk(sine_wave(3000.0, 0.8, 48_000, 100))).unwrap();
        let slice = s.sample();
        // 2048-point FFT at 48 kHz → 23.4375 Hz per bin → 3 kHz = bin 128
        let peak = peak_bin(&slice);
        assert!((127..=129).contains(&peak), "peak at bin {}", peak);
        assert!(slice.magnitudes[peak] > 0.9);
        assert!(slice.magnitudes.iter().all(|&m| (0.0..=1.0).contains(&m)));
    }

    #[test]
    fn test_sample_does_not_block_when_idle() {
        let (_tx, rx) = unbounded::<AudioChunk>();
        let mut s = SpectralSampler::new(&Config::default());
        s.connect(rx, 48_000);
        // No audio has arrived: returns the (silent) snapshot immediately.
        let slice = s.sample();
        assert!(slice.magnitudes.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_invalid_analysis_size_is_noop() {
        let mut s = SpectralSampler::new(&Config::default());
        assert!(s.set_analysis_size(1000).is_err());
        assert_eq!(s.analysis_size(), 2048);
        assert!(s.set_analysis_size(512).is_ok());
        assert_eq!(s.sample().bin_count(), 256);
    }

    #[test]
    fn test_invalid_size_in_config_never_reaches_analyzer() {
        for n in [0, 1000] {
            let cfg = Config {
                fft_size: n,
                ..Config::default()
            };
            let mut s = SpectralSampler::new(&cfg);
            assert_eq!(s.bin_count(), 1024);
            assert_eq!(s.sample().bin_count(), 1024);
        }
    }

    #[test]
    fn test_db_range_widens_quiet_detail() {
        let quiet = sine_wave(3000.0, 0.0005, 48_000, 100);
        let level_at = |db_range: f32| {
            let (tx, rx) = unbounded();
            let mut s = SpectralSampler::new(&Config::default());
            s.set_db_range(db_range).unwrap();
            s.connect(rx, 48_000);
            tx.send(chunk(quiet.clone())).unwrap();
            let slice = s.sample();
            slice.magnitudes[peak_bin(&slice)]
        };
        // ~-80 dB peak: below a 40 dB window, visible in a 100 dB one
        assert_eq!(level_at(40.0), 0.0);
        assert!(level_at(100.0) > 0.3);

        let mut s = SpectralSampler::new(&Config::default());
        assert!(s.set_db_range(10.0).is_err());
        assert!(s.set_db_range(f32::NAN).is_err());
    }

    #[test]
    fn test_blackman_leaks_less_than_hamming() {
        // Off-bin tone: far-off bins show the window's sidelobes
        let tone = sine_wave(3011.0, 0.8, 48_000, 100);
        let far_leak = |w: WindowFunction| {
            let (tx, rx) = unbounded();
            let mut s = SpectralSampler::new(&Config {
                db_range: 120.0,
                ..Config::default()
            });
            s.set_window(w);
            s.connect(rx, 48_000);
            tx.send(chunk(tone.clone())).unwrap();
            s.sample().magnitudes[200]
        };
        assert!(far_leak(WindowFunction::Blackman) < far_leak(WindowFunction::Hamming));
    }

    #[test]
    fn test_cutoff_above_nyquist_rejected() {
        let mut s = SpectralSampler::new(&Config::default());
        assert!(s.set_filter_cutoff(30_000.0).is_err());
        assert!(s.set_filter_cutoff(-5.0).is_err());
        assert!(s.set_filter_cutoff(500.0).is_ok());
    }

    #[test]
    fn test_low_cut_removes_rumble() {
        let (tx, rx) = unbounded();
        let mut s = SpectralSampler::new(&Config::default());
        s.connect(rx, 48_000);
        s.set_filter_enabled(true);
        s.set_filter_cutoff(2000.0).unwrap();
        tx.send(chunk(sine_wave(100.0, 0.8, 48_000, 200))).unwrap();
        let filtered = s.sample();

        let (tx2, rx2) = unbounded();
        let mut raw = SpectralSampler::new(&Config::default());
        raw.connect(rx2, 48_000);
        tx2.send(chunk(sine_wave(100.0, 0.8, 48_000, 200))).unwrap();
        let unfiltered = raw.sample();

        // 100 Hz ≈ bin 4
        assert!(filtered.magnitudes[4] < unfiltered.magnitudes[4]);
    }

    #[test]
    fn test_gain_zero_silences() {
        let (tx, rx) = unbounded();
        let mut s = SpectralSampler::new(&Config::default());
        s.connect(rx, 48_000);
        s.set_gain(0.0).unwrap();
        assert!(s.set_gain(f32::INFINITY).is_err());
        tx.send(chunk(sine_wave(3000.0, 0.8, 48_000, 100))).unwrap();
        let slice = s.sample();
        assert!(slice.magnitudes.iter().all(|&m| m == 0.0));
        assert_eq!(s.input_level(), 0.0);
    }

    #[test]
    fn test_smoothing_holds_energy_after_signal_stops() {
        let (tx, rx) = unbounded();
        let mut cfg = Config::default();
        cfg.smoothing = 0.8;
        let mut s = SpectralSampler::new(&cfg);
        s.connect(rx, 48_000);
        tx.send(chunk(sine_wave(3000.0, 0.8, 48_000, 100))).unwrap();
        s.sample();
        tx.send(chunk(vec![0.0; 4096])).unwrap();
        let after = s.sample();
        assert!(after.magnitudes[128] > 0.5, "smoothed energy decays gradually");
    }
}
