//! Engine configuration and partial runtime updates.
//!
//! `Config` is a plain snapshot read by every tick. The only way to change it
//! while running is `Config::apply` with a `ConfigUpdate`, which validates
//! each field on its own: an invalid field is rejected (and reported) while
//! the rest of the update still lands.

use crate::colormap::{ColorScheme, Normalization};
use crate::dsp::WindowFunction;
use crate::error::ConfigError;
use crate::freq_map::Band;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

pub const MIN_ANALYSIS_SIZE: usize = 32;
pub const MAX_ANALYSIS_SIZE: usize = 32768;
pub const MIN_DB_RANGE: f32 = 20.0;
pub const MAX_DB_RANGE: f32 = 120.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum milliseconds between acted render ticks (one raster column each).
    pub redraw_interval_ms: u64,
    /// Delay between detection feed polls.
    pub poll_interval_ms: u64,
    /// Detections at or above this confidence are shown as high tier.
    pub confidence_threshold: f32,
    /// Analyzer FFT size; yields `fft_size / 2` bins.
    pub fft_size: usize,
    pub window: WindowFunction,
    /// Dynamic range in dB shown between background and full palette.
    pub db_range: f32,
    /// Temporal smoothing of bin magnitudes: 0.0 = none, close to 1.0 = heavy.
    pub smoothing: f32,
    pub palette: ColorScheme,
    pub normalization: Normalization,
    pub low_cut_enabled: bool,
    pub low_cut_hz: f32,
    /// Linear input gain applied after the low-cut stage.
    pub gain: f32,
    pub freq_min_hz: f32,
    pub freq_max_hz: f32,
    pub log_frequency: bool,
    /// Label rotation in degrees, positive = clockwise.
    pub label_rotation_deg: f32,
    /// Lifetime of high/medium labels.
    pub label_timeout_ms: u64,
    /// Lifetime of low-tier labels.
    pub low_confidence_timeout_ms: u64,
    pub max_labels: usize,
    /// A high-tier label ingested within this window suppresses repeats.
    pub duplicate_window_ms: u64,
    pub label_font_px: f32,
    pub show_reference_lines: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redraw_interval_ms: 50,
            poll_interval_ms: 1000,
            confidence_threshold: 0.7,
            fft_size: 2048,
            window: WindowFunction::Hann,
            db_range: 60.0,
            smoothing: 0.0,
            palette: ColorScheme::Grayscale,
            normalization: Normalization::Linear,
            low_cut_enabled: false,
            low_cut_hz: 200.0,
            gain: 1.0,
            freq_min_hz: 100.0,
            freq_max_hz: 12_000.0,
            log_frequency: false,
            label_rotation_deg: 0.0,
            label_timeout_ms: 45_000,
            low_confidence_timeout_ms: 20_000,
            max_labels: 15,
            duplicate_window_ms: 2_000,
            label_font_px: 14.0,
            show_reference_lines: true,
        }
    }
}

/// Any subset of `Config` fields. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    pub redraw_interval_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub confidence_threshold: Option<f32>,
    pub fft_size: Option<usize>,
    pub window: Option<WindowFunction>,
    pub db_range: Option<f32>,
    pub smoothing: Option<f32>,
    pub palette: Option<ColorScheme>,
    pub normalization: Option<Normalization>,
    pub low_cut_enabled: Option<bool>,
    pub low_cut_hz: Option<f32>,
    pub gain: Option<f32>,
    pub freq_min_hz: Option<f32>,
    pub freq_max_hz: Option<f32>,
    pub log_frequency: Option<bool>,
    pub label_rotation_deg: Option<f32>,
    pub label_timeout_ms: Option<u64>,
    pub low_confidence_timeout_ms: Option<u64>,
    pub max_labels: Option<usize>,
    pub duplicate_window_ms: Option<u64>,
    pub label_font_px: Option<f32>,
    pub show_reference_lines: Option<bool>,
}

const UPDATE_FIELDS: [&str; 22] = [
    "redraw_interval_ms",
    "poll_interval_ms",
    "confidence_threshold",
    "fft_size",
    "window",
    "db_range",
    "smoothing",
    "palette",
    "normalization",
    "low_cut_enabled",
    "low_cut_hz",
    "gain",
    "freq_min_hz",
    "freq_max_hz",
    "log_frequency",
    "label_rotation_deg",
    "label_timeout_ms",
    "low_confidence_timeout_ms",
    "max_labels",
    "duplicate_window_ms",
    "label_font_px",
    "show_reference_lines",
];

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ConfigUpdate::default()
    }

    /// Parse a JSON object field by field. Unrecognized or mistyped fields
    /// are reported and skipped; everything else is kept.
    pub fn from_json(text: &str) -> (ConfigUpdate, Vec<ConfigError>) {
        let mut errors = Vec::new();
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                errors.push(ConfigError::Malformed(e.to_string()));
                return (ConfigUpdate::default(), errors);
            }
        };
        let map = match value {
            serde_json::Value::Object(map) => map,
            other => {
                errors.push(ConfigError::Malformed(format!("expected object, got {}", other)));
                return (ConfigUpdate::default(), errors);
            }
        };

        let mut update = ConfigUpdate::default();
        for (key, val) in map {
            if !UPDATE_FIELDS.contains(&key.as_str()) {
                errors.push(ConfigError::UnknownField(key));
                continue;
            }
            let mut single = serde_json::Map::new();
            single.insert(key.clone(), val);
            match serde_json::from_value::<ConfigUpdate>(serde_json::Value::Object(single)) {
                Ok(one) => update.merge(one),
                Err(e) => errors.push(ConfigError::Malformed(format!("{}: {}", key, e))),
            }
        }
        (update, errors)
    }

    /// Overlay `other`'s present fields onto `self`.
    pub fn merge(&mut self, other: ConfigUpdate) {
        macro_rules! take {
            ($($f:ident),*) => { $( if other.$f.is_some() { self.$f = other.$f; } )* };
        }
        take!(
            redraw_interval_ms,
            poll_interval_ms,
            confidence_threshold,
            fft_size,
            window,
            db_range,
            smoothing,
            palette,
            normalization,
            low_cut_enabled,
            low_cut_hz,
            gain,
            freq_min_hz,
            freq_max_hz,
            log_frequency,
            label_rotation_deg,
            label_timeout_ms,
            low_confidence_timeout_ms,
            max_labels,
            duplicate_window_ms,
            label_font_px,
            show_reference_lines
        );
    }
}

/// What an applied update actually changed, so the engine re-initializes
/// only the derived state that depends on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigChanges {
    pub analysis_size: bool,
    pub window: bool,
    pub db_range: bool,
    /// Palette or normalization policy.
    pub colors: bool,
    /// Display band or log/linear mapping.
    pub band_or_mapping: bool,
    /// Low-cut enable/cutoff or gain.
    pub filter: bool,
    pub smoothing: bool,
    pub timing: bool,
    /// Threshold, timeouts, cap, rotation, font or suppression window.
    pub labels: bool,
    pub reference_lines: bool,
    pub rejected: Vec<ConfigError>,
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        !(self.analysis_size
            || self.window
            || self.db_range
            || self.colors
            || self.band_or_mapping
            || self.filter
            || self.smoothing
            || self.timing
            || self.labels
            || self.reference_lines)
    }
}

pub fn validate_analysis_size(n: usize) -> Result<usize, ConfigError> {
    if n.is_power_of_two() && (MIN_ANALYSIS_SIZE..=MAX_ANALYSIS_SIZE).contains(&n) {
        Ok(n)
    } else {
        Err(ConfigError::AnalysisSize(n))
    }
}

/// Cutoff must be positive and below `limit` (Nyquist once a source is known).
pub fn validate_cutoff(hz: f32, limit: f32) -> Result<f32, ConfigError> {
    if hz.is_finite() && hz > 0.0 && hz < limit {
        Ok(hz)
    } else {
        Err(ConfigError::FilterCutoff { hz, limit })
    }
}

pub fn validate_gain(g: f32) -> Result<f32, ConfigError> {
    if g.is_finite() && g >= 0.0 {
        Ok(g)
    } else {
        Err(ConfigError::Gain(g))
    }
}

fn validate_unit(v: f32, err: fn(f32) -> ConfigError) -> Result<f32, ConfigError> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(err(v))
    }
}

pub fn validate_db_range(db: f32) -> Result<f32, ConfigError> {
    if db.is_finite() && (MIN_DB_RANGE..=MAX_DB_RANGE).contains(&db) {
        Ok(db)
    } else {
        Err(ConfigError::DbRange(db))
    }
}

fn validate_band(min: f32, max: f32) -> Result<(f32, f32), ConfigError> {
    if min.is_finite() && max.is_finite() && min > 0.0 && min < max {
        Ok((min, max))
    } else {
        Err(ConfigError::Band { min, max })
    }
}

fn validate_rotation(deg: f32) -> Result<f32, ConfigError> {
    if deg.is_finite() && (-180.0..=180.0).contains(&deg) {
        Ok(deg)
    } else {
        Err(ConfigError::Rotation(deg))
    }
}

fn validate_positive<T: PartialOrd + Default>(v: T, field: &'static str) -> Result<T, ConfigError> {
    if v > T::default() {
        Ok(v)
    } else {
        Err(ConfigError::NonPositive(field))
    }
}

/// Upper bound for the low-cut frequency before a source reports its rate.
const CUTOFF_LIMIT_HZ: f32 = 20_000.0;

impl Config {
    /// Load from a JSON file. Returns None if file is absent or malformed.
    /// Fields that parse but fail validation fall back to their defaults.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Config>(&data) {
            Ok(mut c) => {
                info!("Loaded config from {:?}", path);
                c.sanitize();
                Some(c)
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn band(&self) -> Band {
        Band::new(self.freq_min_hz, self.freq_max_hz)
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Scroll units the raster advances per second at the configured cadence.
    pub fn units_per_second(&self) -> f32 {
        1000.0 / self.redraw_interval_ms.max(1) as f32
    }

    /// Check every field of a whole config (e.g. one loaded from disk).
    pub fn validate(&self) -> Vec<ConfigError> {
        self.clone().reset_invalid()
    }

    /// Replace every invalid field with its default, warning for each.
    /// Returns what was replaced.
    pub fn sanitize(&mut self) -> Vec<ConfigError> {
        let rejected = self.reset_invalid();
        for e in &rejected {
            warn!("Config: {}; using default", e);
        }
        rejected
    }

    fn reset_invalid(&mut self) -> Vec<ConfigError> {
        let defaults = Config::default();
        let mut rejected = Vec::new();

        macro_rules! check {
            ($field:ident, $checked:expr) => {
                if let Err(e) = $checked(self.$field) {
                    rejected.push(e);
                    self.$field = defaults.$field;
                }
            };
        }

        check!(fft_size, validate_analysis_size);
        check!(db_range, validate_db_range);
        check!(smoothing, |v| validate_unit(v, ConfigError::Smoothing));
        check!(confidence_threshold, |v| validate_unit(v, ConfigError::Threshold));
        check!(low_cut_hz, |v| validate_cutoff(v, CUTOFF_LIMIT_HZ));
        check!(gain, validate_gain);
        check!(label_rotation_deg, validate_rotation);
        check!(redraw_interval_ms, |v| validate_positive(v, "redraw_interval_ms"));
        check!(poll_interval_ms, |v| validate_positive(v, "poll_interval_ms"));
        check!(label_timeout_ms, |v| validate_positive(v, "label_timeout_ms"));
        check!(low_confidence_timeout_ms, |v| {
            validate_positive(v, "low_confidence_timeout_ms")
        });
        check!(max_labels, |v| validate_positive(v, "max_labels"));
        check!(label_font_px, |v| validate_positive(v, "label_font_px"));

        if let Err(e) = validate_band(self.freq_min_hz, self.freq_max_hz) {
            rejected.push(e);
            self.freq_min_hz = defaults.freq_min_hz;
            self.freq_max_hz = defaults.freq_max_hz;
        }
        rejected
    }

    /// Merge a partial update. Each field is validated independently; a
    /// rejected field keeps its previous value and is listed in
    /// `ConfigChanges::rejected`.
    pub fn apply(&mut self, update: &ConfigUpdate) -> ConfigChanges {
        let mut changes = ConfigChanges::default();

        macro_rules! set {
            ($field:ident, $flag:ident, $checked:expr) => {
                if let Some(v) = update.$field {
                    match $checked(v) {
                        Ok(v) => {
                            if self.$field != v {
                                self.$field = v;
                                changes.$flag = true;
                            }
                        }
                        Err(e) => changes.rejected.push(e),
                    }
                }
            };
        }

        set!(fft_size, analysis_size, validate_analysis_size);
        set!(window, window, Ok::<_, ConfigError>);
        set!(db_range, db_range, validate_db_range);
        set!(smoothing, smoothing, |v| validate_unit(v, ConfigError::Smoothing));
        set!(palette, colors, Ok::<_, ConfigError>);
        set!(normalization, colors, Ok::<_, ConfigError>);
        set!(low_cut_enabled, filter, Ok::<_, ConfigError>);
        set!(low_cut_hz, filter, |v| validate_cutoff(v, CUTOFF_LIMIT_HZ));
        set!(gain, filter, validate_gain);
        set!(log_frequency, band_or_mapping, Ok::<_, ConfigError>);
        set!(redraw_interval_ms, timing, |v| validate_positive(v, "redraw_interval_ms"));
        set!(poll_interval_ms, timing, |v| validate_positive(v, "poll_interval_ms"));
        set!(confidence_threshold, labels, |v| validate_unit(v, ConfigError::Threshold));
        set!(label_rotation_deg, labels, validate_rotation);
        set!(label_timeout_ms, labels, |v| validate_positive(v, "label_timeout_ms"));
        set!(low_confidence_timeout_ms, labels, |v| {
            validate_positive(v, "low_confidence_timeout_ms")
        });
        set!(max_labels, labels, |v| validate_positive(v, "max_labels"));
        set!(duplicate_window_ms, labels, Ok::<_, ConfigError>);
        set!(label_font_px, labels, |v| validate_positive(v, "label_font_px"));
        set!(show_reference_lines, reference_lines, Ok::<_, ConfigError>);

        // The band is validated as a pair so min < max holds across a
        // one-sided update.
        if update.freq_min_hz.is_some() || update.freq_max_hz.is_some() {
            let min = update.freq_min_hz.unwrap_or(self.freq_min_hz);
            let max = update.freq_max_hz.unwrap_or(self.freq_max_hz);
            match validate_band(min, max) {
                Ok((min, max)) => {
                    if self.freq_min_hz != min || self.freq_max_hz != max {
                        self.freq_min_hz = min;
                        self.freq_max_hz = max;
                        changes.band_or_mapping = true;
                    }
                }
                Err(e) => changes.rejected.push(e),
            }
        }

        for e in &changes.rejected {
            warn!("Config update rejected: {}", e);
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let mut cfg = Config::default();
        let changes = cfg.apply(&ConfigUpdate::default());
        assert!(changes.is_empty());
        assert!(changes.rejected.is_empty());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_same_value_is_not_a_change() {
        let mut cfg = Config::default();
        let changes = cfg.apply(&ConfigUpdate {
            fft_size: Some(2048),
            palette: Some(ColorScheme::Grayscale),
            ..Default::default()
        });
        assert!(changes.is_empty());
    }

    #[test]
    fn test_invalid_analysis_size_keeps_previous() {
        let mut cfg = Config::default();
        let changes = cfg.apply(&ConfigUpdate {
            fft_size: Some(1000),
            smoothing: Some(0.5),
            ..Default::default()
        });
        assert_eq!(cfg.fft_size, 2048);
        assert_eq!(changes.rejected, vec![ConfigError::AnalysisSize(1000)]);
        assert!(changes.smoothing, "valid fields still apply");
        assert_eq!(cfg.smoothing, 0.5);
    }

    #[test]
    fn test_analysis_size_bounds() {
        assert!(validate_analysis_size(32).is_ok());
        assert!(validate_analysis_size(32768).is_ok());
        assert!(validate_analysis_size(16).is_err());
        assert!(validate_analysis_size(65536).is_err());
        assert!(validate_analysis_size(0).is_err());
    }

    #[test]
    fn test_band_checked_as_pair() {
        let mut cfg = Config::default();
        // min above current max is rejected even though it is a positive number
        let changes = cfg.apply(&ConfigUpdate {
            freq_min_hz: Some(20_000.0),
            ..Default::default()
        });
        assert_eq!(changes.rejected.len(), 1);
        assert_eq!(cfg.freq_min_hz, 100.0);

        let changes = cfg.apply(&ConfigUpdate {
            freq_min_hz: Some(1000.0),
            freq_max_hz: Some(11_000.0),
            ..Default::default()
        });
        assert!(changes.band_or_mapping);
        assert_eq!(cfg.band(), Band::new(1000.0, 11_000.0));
    }

    #[test]
    fn test_malformed_rotation_rejected() {
        let mut cfg = Config::default();
        let changes = cfg.apply(&ConfigUpdate {
            label_rotation_deg: Some(f32::NAN),
            ..Default::default()
        });
        assert!(matches!(changes.rejected[0], ConfigError::Rotation(_)));
        assert_eq!(cfg.label_rotation_deg, 0.0);
    }

    #[test]
    fn test_from_json_keeps_good_fields() {
        let (update, errors) = ConfigUpdate::from_json(
            r#"{"palette":"inferno","fft_size":"big","bogus":1,"log_frequency":true}"#,
        );
        assert_eq!(update.palette, Some(ColorScheme::Inferno));
        assert_eq!(update.log_frequency, Some(true));
        assert_eq!(update.fft_size, None);
        assert_eq!(errors.len(), 2, "errors: {:?}", errors);
        assert!(errors.contains(&ConfigError::UnknownField("bogus".into())));
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let (update, errors) = ConfigUpdate::from_json("[1,2]");
        assert!(update.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_loaded_invalid_sizes_fall_back_to_default() {
        let dir = std::env::temp_dir().join(format!("live-spectrogram-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for (i, body) in [r#"{"fft_size":0}"#, r#"{"fft_size":1000}"#].iter().enumerate() {
            let path = dir.join(format!("bad{}.json", i));
            std::fs::write(&path, body).unwrap();
            let cfg = Config::load(&path).unwrap();
            assert_eq!(cfg.fft_size, 2048, "{}", body);
            assert_eq!(cfg.bin_count(), 1024);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sanitize_resets_only_bad_fields() {
        let mut cfg: Config = serde_json::from_str(
            r#"{"db_range":500,"gain":-1,"freq_min_hz":9000,"freq_max_hz":100,"max_labels":0,"palette":"magma","smoothing":0.4}"#,
        )
        .unwrap();
        let rejected = cfg.sanitize();
        assert_eq!(rejected.len(), 4, "rejected: {:?}", rejected);
        assert!(rejected.contains(&ConfigError::DbRange(500.0)));
        let defaults = Config::default();
        assert_eq!(cfg.db_range, defaults.db_range);
        assert_eq!(cfg.gain, defaults.gain);
        assert_eq!(cfg.band(), defaults.band());
        assert_eq!(cfg.max_labels, defaults.max_labels);
        assert_eq!(cfg.palette, ColorScheme::Magma, "valid fields survive");
        assert_eq!(cfg.smoothing, 0.4);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn test_window_and_db_range_updates() {
        let mut cfg = Config::default();
        let (update, errors) = ConfigUpdate::from_json(r#"{"window":"blackman","db_range":80}"#);
        assert!(errors.is_empty());
        let changes = cfg.apply(&update);
        assert!(changes.window && changes.db_range);
        assert_eq!(cfg.window, WindowFunction::Blackman);
        assert_eq!(cfg.db_range, 80.0);

        let changes = cfg.apply(&ConfigUpdate {
            db_range: Some(5.0),
            ..Default::default()
        });
        assert_eq!(changes.rejected, vec![ConfigError::DbRange(5.0)]);
        assert_eq!(cfg.db_range, 80.0);

        let (_, errors) = ConfigUpdate::from_json(r#"{"window":"kaiser"}"#);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_config_roundtrip_with_partial_file() {
        let cfg: Config = serde_json::from_str(r#"{"palette":"viridis","max_labels":5}"#).unwrap();
        assert_eq!(cfg.palette, ColorScheme::Viridis);
        assert_eq!(cfg.max_labels, 5);
        assert_eq!(cfg.fft_size, 2048, "missing fields take defaults");
    }
}
