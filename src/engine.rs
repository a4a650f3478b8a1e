//! The spectrogram engine: one explicit instance owning the sampler, the
//! raster, the overlay and the active configuration.
//!
//! Lifecycle is `new` → `initialize` → ticks/ingests/updates → `stop`.
//! Everything here runs on the caller's thread; the coordinator guarantees
//! ticks and ingests never interleave.

use crate::colormap::{BinBalancer, ColorMapper, Normalization};
use crate::config::{Config, ConfigChanges, ConfigUpdate};
use crate::error::{EngineError, FeedError, PipelineError};
use crate::feed::FeedDocument;
use crate::freq_map::{bin_spans, BinSpan};
use crate::overlay::{DetectionOverlay, IngestReport, LabelDrawCommand, MonospaceMetrics, TextMetrics};
use crate::raster::{reference_lines, RasterBuffer, RasterCapture, ReferenceLine};
use crate::sampler::SpectralSampler;
use crate::types::{AudioChunk, Rgb};
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use serde::Serialize;

/// An opened audio stream.
pub struct SourceConnection {
    pub chunks: Receiver<AudioChunk>,
    pub sample_rate: u32,
}

/// Anything that can start delivering mono audio chunks.
pub trait AudioSource {
    fn name(&self) -> &str;
    fn connect(&mut self) -> Result<SourceConnection, PipelineError>;
}

/// What one acted render tick produced, for display consumers.
#[derive(Debug, Clone, Serialize)]
pub struct RenderFrame {
    pub tick: u64,
    pub timestamp_ms: u64,
    pub width: usize,
    pub height: usize,
    /// RGB bytes of the newly painted leading column, top row first.
    #[serde(skip)]
    pub column: Vec<u8>,
    pub background: Rgb,
    /// Raster was cleared since the previous frame; consumers should clear too.
    pub reinitialized: bool,
    /// Only present when the reference lines changed.
    pub reference_lines: Option<Vec<ReferenceLine>>,
    pub labels: Vec<LabelDrawCommand>,
    /// RMS input level after filter and gain.
    pub level: f32,
}

pub struct SpectrogramEngine {
    config: Config,
    sampler: SpectralSampler,
    raster: RasterBuffer,
    overlay: DetectionOverlay,
    mapper: ColorMapper,
    balancer: BinBalancer,
    spans: Vec<BinSpan>,
    reference_lines: Vec<ReferenceLine>,
    reference_dirty: bool,
    reinitialized: bool,
    initialized: bool,
    last_acted_ms: Option<u64>,
    ticks: u64,
    metrics: Box<dyn TextMetrics + Send>,
}

impl SpectrogramEngine {
    /// Invalid config fields are replaced by their defaults before anything
    /// is built from them.
    pub fn new(mut config: Config, width: usize, height: usize) -> Self {
        config.sanitize();
        let mapper = ColorMapper::new(config.palette, config.normalization);
        let sampler = SpectralSampler::new(&config);
        let raster = RasterBuffer::new(width, height, mapper.background());
        let mut engine = Self {
            config,
            sampler,
            raster,
            overlay: DetectionOverlay::new(),
            mapper,
            balancer: BinBalancer::new(),
            spans: Vec::new(),
            reference_lines: Vec::new(),
            reference_dirty: true,
            reinitialized: true,
            initialized: false,
            last_acted_ms: None,
            ticks: 0,
            metrics: Box::new(MonospaceMetrics::default()),
        };
        engine.recompute_geometry();
        engine
    }

    pub fn with_metrics(mut self, metrics: Box<dyn TextMetrics + Send>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Connect the audio source. On failure the engine stays uninitialized.
    pub fn initialize(&mut self, source: &mut dyn AudioSource) -> Result<(), EngineError> {
        if self.initialized {
            warn!("Engine already initialized; ignoring {}", source.name());
            return Ok(());
        }
        let conn = match source.connect() {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to open {}: {}", source.name(), e);
                return Err(e.into());
            }
        };
        self.sampler.connect(conn.chunks, conn.sample_rate);
        // The cutoff could only be checked against a nominal limit until now.
        if let Err(e) = self.sampler.set_filter_cutoff(self.config.low_cut_hz) {
            let fallback = Config::default().low_cut_hz.min(self.sampler.nyquist() / 2.0);
            warn!("Config: {}; low cut set to {} Hz", e, fallback);
            self.config.low_cut_hz = fallback;
            if let Err(e) = self.sampler.set_filter_cutoff(fallback) {
                warn!("Low cut left at its previous setting: {}", e);
            }
        }
        self.recompute_geometry();
        self.last_acted_ms = None;
        self.initialized = true;
        info!(
            "Engine initialized: {} @ {} Hz, {}x{} raster, {} bins",
            source.name(),
            self.sampler.sample_rate(),
            self.raster.width(),
            self.raster.height(),
            self.sampler.bin_count()
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.initialized {
            return;
        }
        self.sampler.disconnect();
        self.initialized = false;
        info!("Engine stopped after {} ticks", self.ticks);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn raster(&self) -> &RasterBuffer {
        &self.raster
    }

    pub fn overlay(&self) -> &DetectionOverlay {
        &self.overlay
    }

    pub fn reference_lines(&self) -> &[ReferenceLine] {
        &self.reference_lines
    }

    /// Bins per slice from the active analyzer.
    pub fn bin_count(&self) -> usize {
        self.sampler.bin_count()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_file_name(&self) -> Option<&str> {
        self.overlay.last_file()
    }

    fn recompute_geometry(&mut self) {
        self.spans = bin_spans(
            self.sampler.bin_count(),
            self.sampler.nyquist(),
            self.raster.height(),
            self.config.band(),
            self.config.log_frequency,
        );
        self.reference_lines = reference_lines(
            self.config.band(),
            self.sampler.nyquist(),
            self.raster.height(),
            self.config.log_frequency,
        );
        self.reference_dirty = true;
    }

    fn reinit_raster(&mut self, width: usize, height: usize) {
        self.raster.reinit(width, height, self.mapper.background());
        self.reinitialized = true;
    }

    // ─── Render tick ────────────────────────────────────────────────────────

    /// Gated tick: acts only when the redraw interval has elapsed since the
    /// last acted tick. Early ticks are dropped. A rendering failure aborts
    /// this tick only.
    pub fn render_tick(&mut self, now_ms: u64) -> Option<RenderFrame> {
        if !self.initialized {
            return None;
        }
        if let Some(last) = self.last_acted_ms {
            if now_ms.saturating_sub(last) < self.config.redraw_interval_ms {
                return None;
            }
        }
        self.last_acted_ms = Some(now_ms);

        let mut slice = self.sampler.sample();
        if self.config.normalization == Normalization::PerFrequency {
            self.balancer.balance(&mut slice);
        }
        let painted = self
            .raster
            .scroll()
            .and_then(|_| self.raster.paint(&slice, &self.spans, &self.mapper));
        if let Err(e) = painted {
            warn!("Render tick aborted: {}", e);
            return None;
        }

        let scrolled_off = self.overlay.scroll(1.0);
        if scrolled_off > 0 {
            debug!("{} label(s) scrolled off", scrolled_off);
        }
        self.ticks += 1;
        if self.ticks % 1200 == 0 {
            debug!(
                "Tick {}: {} labels, level {:.4}",
                self.ticks,
                self.overlay.len(),
                self.sampler.input_level()
            );
        }

        let reference_lines = if self.reference_dirty {
            self.reference_dirty = false;
            Some(if self.config.show_reference_lines {
                self.reference_lines.clone()
            } else {
                Vec::new()
            })
        } else {
            None
        };

        Some(RenderFrame {
            tick: self.ticks,
            timestamp_ms: now_ms,
            width: self.raster.width(),
            height: self.raster.height(),
            column: self.raster.leading_column_rgb(),
            background: self.raster.background(),
            reinitialized: std::mem::take(&mut self.reinitialized),
            reference_lines,
            labels: self
                .overlay
                .render(self.raster.width(), &self.config, self.metrics.as_ref()),
            level: self.sampler.input_level(),
        })
    }

    // ─── Detection feed ─────────────────────────────────────────────────────

    /// Apply one feed response in full. Errors leave the labels untouched.
    pub fn ingest_response(
        &mut self,
        response: Result<FeedDocument, FeedError>,
        now_ms: u64,
    ) -> Option<IngestReport> {
        if !self.initialized {
            debug!("Feed response dropped: engine not running");
            return None;
        }
        match response {
            Ok(doc) => {
                let report = self
                    .overlay
                    .ingest(&doc, now_ms, self.raster.width(), &self.config);
                if report.created > 0 || report.expired > 0 || report.evicted > 0 {
                    debug!(
                        "Ingest {}: +{} labels, {} suppressed, {} expired, {} evicted",
                        doc.file_name, report.created, report.suppressed, report.expired, report.evicted
                    );
                }
                Some(report)
            }
            Err(e) => {
                warn!("Detection poll failed: {}", e);
                None
            }
        }
    }

    // ─── Host operations ────────────────────────────────────────────────────

    /// Merge recognized, valid fields and rebuild whatever they feed into.
    pub fn update_config(&mut self, update: &ConfigUpdate) -> ConfigChanges {
        if update.is_empty() {
            return ConfigChanges::default();
        }
        let previous = self.config.clone();
        let mut changes = self.config.apply(update);

        if changes.analysis_size {
            if let Err(e) = self.sampler.set_analysis_size(self.config.fft_size) {
                self.config.fft_size = previous.fft_size;
                changes.analysis_size = false;
                changes.rejected.push(e);
            }
        }
        if changes.smoothing {
            self.sampler.set_smoothing(self.config.smoothing);
        }
        if changes.window {
            self.sampler.set_window(self.config.window);
        }
        if changes.db_range {
            if let Err(e) = self.sampler.set_db_range(self.config.db_range) {
                self.config.db_range = previous.db_range;
                changes.db_range = false;
                changes.rejected.push(e);
            }
        }
        if changes.filter {
            self.sampler.set_filter_enabled(self.config.low_cut_enabled);
            if self.config.low_cut_hz != previous.low_cut_hz {
                // Nyquist is only known to the sampler.
                if let Err(e) = self.sampler.set_filter_cutoff(self.config.low_cut_hz) {
                    self.config.low_cut_hz = previous.low_cut_hz;
                    changes.rejected.push(e);
                }
            }
            if let Err(e) = self.sampler.set_gain(self.config.gain) {
                self.config.gain = previous.gain;
                changes.rejected.push(e);
            }
        }
        if changes.colors {
            self.mapper = ColorMapper::new(self.config.palette, self.config.normalization);
            self.balancer.reset();
        }
        if changes.analysis_size || changes.colors {
            let (w, h) = (self.raster.width(), self.raster.height());
            self.reinit_raster(w, h);
        }
        if changes.analysis_size || changes.band_or_mapping {
            self.recompute_geometry();
        }
        if changes.reference_lines {
            self.reference_dirty = true;
        }
        if !changes.is_empty() {
            info!("Config updated: {:?}", changes);
        }
        changes
    }

    /// Reallocate the raster for new display dimensions. Prior content is
    /// discarded.
    pub fn handle_resize(&mut self, width: usize, height: usize) {
        info!("Resize {}x{} → {}x{}", self.raster.width(), self.raster.height(), width, height);
        self.reinit_raster(width, height);
        self.recompute_geometry();
    }

    pub fn capture(&self) -> RasterCapture {
        self.raster.capture()
    }
}

impl Drop for SpectrogramEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::ColorScheme;
    use crate::dsp::test_helpers::sine_wave;
    use crate::feed::FeedDetection;
    use crossbeam_channel::{unbounded, Sender};

    struct ChannelSource {
        rx: Option<Receiver<AudioChunk>>,
        sample_rate: u32,
    }

    impl AudioSource for ChannelSource {
        fn name(&self) -> &str {
            "test channel"
        }

        fn connect(&mut self) -> Result<SourceConnection, PipelineError> {
            self.rx
                .take()
                .map(|chunks| SourceConnection {
                    chunks,
                    sample_rate: self.sample_rate,
                })
                .ok_or_else(|| PipelineError::SourceUnavailable("already taken".into()))
        }
    }

    fn running(width: usize, height: usize) -> (SpectrogramEngine, Sender<AudioChunk>) {
        running_with(Config::default(), width, height, 48_000)
    }

    fn running_with(
        config: Config,
        width: usize,
        height: usize,
        sample_rate: u32,
    ) -> (SpectrogramEngine, Sender<AudioChunk>) {
        let (tx, rx) = unbounded();
        let mut engine = SpectrogramEngine::new(config, width, height);
        engine
            .initialize(&mut ChannelSource {
                rx: Some(rx),
                sample_rate,
            })
            .unwrap();
        (engine, tx)
    }

    fn robin_doc(file: &str) -> FeedDocument {
        FeedDocument {
            detections: vec![FeedDetection {
                common_name: "Robin".into(),
                confidence: 0.9,
                start: 1.0,
            }],
            delay: 1.0,
            file_name: file.into(),
        }
    }

    #[test]
    fn test_failed_source_leaves_engine_uninitialized() {
        let mut engine = SpectrogramEngine::new(Config::default(), 64, 32);
        let err = engine.initialize(&mut ChannelSource {
            rx: None,
            sample_rate: 48_000,
        });
        assert!(matches!(err, Err(EngineError::Pipeline(_))));
        assert!(!engine.is_initialized());
        assert!(engine.render_tick(1000).is_none());
    }

    #[test]
    fn test_render_gate_drops_early_ticks() {
        let (mut engine, _tx) = running(64, 32);
        assert!(engine.render_tick(0).is_some());
        assert!(engine.render_tick(16).is_none());
        assert!(engine.render_tick(49).is_none());
        assert!(engine.render_tick(50).is_some());
        assert!(engine.render_tick(66).is_none(), "gate measures from the last acted tick");
        assert_eq!(engine.ticks(), 2);
    }

    #[test]
    fn test_tone_appears_in_leading_column() {
        let (mut engine, tx) = running(32, 128);
        tx.send(AudioChunk {
            timestamp_ms: 0,
            samples: sine_wave(3000.0, 0.8, 48_000, 100),
            sample_rate: 48_000,
        })
        .unwrap();
        let frame = engine.render_tick(0).unwrap();
        assert_eq!(frame.column.len(), 128 * 3);
        let lit = frame.column.chunks(3).filter(|p| p[0] > 200).count();
        assert!(lit > 0, "3 kHz tone should light at least one row");
        assert!(frame.level > 0.1);
    }

    #[test]
    fn test_first_frame_carries_reference_lines_once() {
        let (mut engine, _tx) = running(64, 200);
        let first = engine.render_tick(0).unwrap();
        assert!(first.reinitialized);
        assert!(first.reference_lines.as_ref().is_some_and(|l| !l.is_empty()));
        let second = engine.render_tick(100).unwrap();
        assert!(!second.reinitialized);
        assert!(second.reference_lines.is_none());
    }

    #[test]
    fn test_labels_scroll_one_unit_per_acted_tick() {
        let (mut engine, _tx) = running(400, 64);
        engine.ingest_response(Ok(robin_doc("a")), 0);
        let start = engine.overlay().labels().next().unwrap().position;
        engine.render_tick(0);
        engine.render_tick(10); // gated
        engine.render_tick(50);
        let now = engine.overlay().labels().next().unwrap().position;
        assert_eq!(start - now, 2.0);
    }

    #[test]
    fn test_feed_error_leaves_labels() {
        let (mut engine, _tx) = running(400, 64);
        engine.ingest_response(Ok(robin_doc("a")), 0);
        let before: Vec<_> = engine.overlay().labels().cloned().collect();
        assert!(engine
            .ingest_response(Err(FeedError::Parse("bad".into())), 100)
            .is_none());
        let after: Vec<_> = engine.overlay().labels().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(engine.last_file_name(), Some("a"));
    }

    #[test]
    fn test_empty_update_is_noop() {
        let (mut engine, _tx) = running(64, 32);
        engine.render_tick(0);
        engine.ingest_response(Ok(robin_doc("a")), 0);
        let raster = engine.capture().rgba;
        let labels: Vec<_> = engine.overlay().labels().cloned().collect();
        let changes = engine.update_config(&ConfigUpdate::default());
        assert!(changes.is_empty());
        assert_eq!(engine.capture().rgba, raster);
        assert_eq!(engine.overlay().labels().cloned().collect::<Vec<_>>(), labels);
    }

    #[test]
    fn test_invalid_analysis_size_from_config_uses_default() {
        for n in [0, 1000] {
            let config: Config = serde_json::from_str(&format!(r#"{{"fft_size":{}}}"#, n)).unwrap();
            let (mut engine, _tx) = running_with(config, 32, 64, 48_000);
            assert_eq!(engine.config().fft_size, 2048);
            assert_eq!(engine.bin_count(), 1024);
            let frame = engine.render_tick(0).expect("tick acts");
            assert_eq!(frame.column.len(), 64 * 3);
        }
    }

    #[test]
    fn test_low_cut_checked_against_source_nyquist() {
        let config = Config {
            low_cut_hz: 10_000.0,
            ..Config::default()
        };
        // Accepted before a source is known (nominal 20 kHz limit)
        let engine = SpectrogramEngine::new(config.clone(), 16, 16);
        assert_eq!(engine.config().low_cut_hz, 10_000.0);

        let (engine, _tx) = running_with(config, 16, 16, 16_000);
        assert_eq!(engine.config().low_cut_hz, 200.0, "8 kHz Nyquist rejects 10 kHz");
    }

    #[test]
    fn test_window_and_db_range_do_not_clear_raster() {
        let (mut engine, _tx) = running(16, 16);
        engine.render_tick(0);
        let changes = engine.update_config(&ConfigUpdate {
            window: Some(crate::dsp::WindowFunction::Blackman),
            db_range: Some(90.0),
            ..Default::default()
        });
        assert!(changes.window && changes.db_range);
        assert!(changes.rejected.is_empty());
        let frame = engine.render_tick(100).unwrap();
        assert!(!frame.reinitialized);
        assert_eq!(engine.config().db_range, 90.0);
    }

    #[test]
    fn test_per_frequency_normalization_fades_steady_tone() {
        let config = Config {
            normalization: Normalization::PerFrequency,
            ..Config::default()
        };
        let (mut engine, tx) = running_with(config, 16, 128, 48_000);
        tx.send(AudioChunk {
            timestamp_ms: 0,
            samples: sine_wave(3000.0, 0.8, 48_000, 100),
            sample_rate: 48_000,
        })
        .unwrap();
        let first = engine.render_tick(0).unwrap();
        let brightest = |col: &[u8]| col.chunks(3).map(|p| p[0]).max().unwrap_or(0);
        assert!(brightest(&first.column) > 200);

        let mut last = first;
        for i in 1..=400u64 {
            last = engine.render_tick(i * 50).unwrap();
        }
        assert!(
            brightest(&last.column) < 20,
            "a tone that never changes fades to background"
        );
    }

    #[test]
    fn test_palette_change_reinitializes_raster() {
        let (mut engine, _tx) = running(16, 16);
        engine.render_tick(0);
        let changes = engine.update_config(&ConfigUpdate {
            palette: Some(ColorScheme::Inverted),
            ..Default::default()
        });
        assert!(changes.colors);
        let bg = ColorScheme::Inverted.background();
        let cap = engine.capture();
        assert!(cap.rgba.chunks(4).all(|p| p[..3] == [bg.0, bg.1, bg.2]));
    }

    #[test]
    fn test_invalid_analysis_size_keeps_state() {
        let (mut engine, _tx) = running(16, 16);
        let changes = engine.update_config(&ConfigUpdate {
            fft_size: Some(1000),
            ..Default::default()
        });
        assert!(!changes.analysis_size);
        assert_eq!(changes.rejected.len(), 1);
        assert_eq!(engine.config().fft_size, 2048);
    }

    #[test]
    fn test_cutoff_above_nyquist_rejected() {
        let (mut engine, _tx) = running(16, 16);
        let changes = engine.update_config(&ConfigUpdate {
            low_cut_hz: Some(19_000.0),
            ..Default::default()
        });
        assert!(changes.rejected.is_empty(), "19 kHz is below Nyquist");
        let changes = engine.update_config(&ConfigUpdate {
            low_cut_hz: Some(30_000.0),
            ..Default::default()
        });
        assert_eq!(changes.rejected.len(), 1);
        assert_eq!(engine.config().low_cut_hz, 19_000.0);
    }

    #[test]
    fn test_resize_discards_content() {
        let (mut engine, _tx) = running(16, 16);
        engine.render_tick(0);
        engine.handle_resize(32, 8);
        let cap = engine.capture();
        assert_eq!((cap.width, cap.height), (32, 8));
        let frame = engine.render_tick(50).unwrap();
        assert!(frame.reinitialized);
        assert!(frame.reference_lines.is_some());
    }

    #[test]
    fn test_zero_height_tick_aborts_without_stopping() {
        let (mut engine, _tx) = running(16, 16);
        engine.handle_resize(16, 0);
        assert!(engine.render_tick(0).is_none());
        engine.handle_resize(16, 16);
        assert!(engine.render_tick(100).is_some(), "later ticks still run");
    }

    #[test]
    fn test_stop_halts_ticks() {
        let (mut engine, _tx) = running(16, 16);
        engine.render_tick(0);
        engine.stop();
        assert!(!engine.is_initialized());
        assert!(engine.render_tick(1000).is_none());
        assert!(engine.ingest_response(Ok(robin_doc("b")), 1000).is_none());
    }
}
