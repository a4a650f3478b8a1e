//! Error taxonomy.
//!
//! Configuration errors are rejected at the setter boundary and only logged.
//! Pipeline errors are fatal to `initialize`. Feed and raster errors are
//! logged by the loop that hit them and never stop the next tick.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Analysis size must be a power of two within the supported range.
    AnalysisSize(usize),
    /// Low-cut filter frequency outside (0, limit).
    FilterCutoff { hz: f32, limit: f32 },
    Gain(f32),
    Smoothing(f32),
    Threshold(f32),
    /// Display band must satisfy 0 < min < max.
    Band { min: f32, max: f32 },
    Rotation(f32),
    /// Displayed dynamic range outside 20..=120 dB.
    DbRange(f32),
    /// A duration or count field that must be positive was zero.
    NonPositive(&'static str),
    UnknownPalette(String),
    UnknownNormalization(String),
    UnknownWindow(String),
    /// Field name not recognized by the update parser.
    UnknownField(String),
    Malformed(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AnalysisSize(n) => {
                write!(f, "analysis size {} is not a power of two in 32..=32768", n)
            }
            ConfigError::FilterCutoff { hz, limit } => {
                write!(f, "filter cutoff {} Hz outside (0, {}) Hz", hz, limit)
            }
            ConfigError::Gain(g) => write!(f, "gain {} must be finite and >= 0", g),
            ConfigError::Smoothing(s) => write!(f, "smoothing {} outside 0..=1", s),
            ConfigError::Threshold(t) => write!(f, "confidence threshold {} outside 0..=1", t),
            ConfigError::Band { min, max } => {
                write!(f, "frequency band [{}, {}] Hz requires 0 < min < max", min, max)
            }
            ConfigError::Rotation(r) => write!(f, "label rotation {} outside -180..=180", r),
            ConfigError::DbRange(r) => write!(f, "dB range {} outside 20..=120", r),
            ConfigError::NonPositive(field) => write!(f, "{} must be greater than zero", field),
            ConfigError::UnknownPalette(name) => write!(f, "unknown palette \"{}\"", name),
            ConfigError::UnknownNormalization(name) => {
                write!(f, "unknown normalization \"{}\"", name)
            }
            ConfigError::UnknownWindow(name) => write!(f, "unknown window \"{}\"", name),
            ConfigError::UnknownField(name) => write!(f, "unrecognized config field \"{}\"", name),
            ConfigError::Malformed(msg) => write!(f, "malformed config update: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum PipelineError {
    /// No audio source could be opened (missing file, no input device).
    SourceUnavailable(String),
    /// Source opened but reported an unusable stream format.
    UnsupportedFormat(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::SourceUnavailable(msg) => write!(f, "audio source unavailable: {}", msg),
            PipelineError::UnsupportedFormat(msg) => write!(f, "unsupported audio format: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

#[derive(Debug)]
pub enum FeedError {
    Transport(String),
    Status(u16),
    Parse(String),
    /// Worker thread is gone; no further responses will arrive.
    Disconnected,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Transport(msg) => write!(f, "detection feed unreachable: {}", msg),
            FeedError::Status(code) => write!(f, "detection feed returned HTTP {}", code),
            FeedError::Parse(msg) => write!(f, "malformed detection document: {}", msg),
            FeedError::Disconnected => write!(f, "detection feed worker disconnected"),
        }
    }
}

impl std::error::Error for FeedError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RasterError {
    /// Surface has no pixels to draw into.
    EmptySurface,
    /// Pixel storage no longer matches the declared dimensions.
    SizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterError::EmptySurface => write!(f, "raster surface is empty"),
            RasterError::SizeMismatch { expected, actual } => write!(
                f,
                "raster buffer holds {} bytes, dimensions require {}",
                actual, expected
            ),
        }
    }
}

impl std::error::Error for RasterError {}

#[derive(Debug)]
pub enum EngineError {
    Pipeline(PipelineError),
    Config(ConfigError),
    Raster(RasterError),
    NotInitialized,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Pipeline(e) => write!(f, "{}", e),
            EngineError::Config(e) => write!(f, "{}", e),
            EngineError::Raster(e) => write!(f, "{}", e),
            EngineError::NotInitialized => write!(f, "engine is not initialized"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Pipeline(e) => Some(e),
            EngineError::Config(e) => Some(e),
            EngineError::Raster(e) => Some(e),
            EngineError::NotInitialized => None,
        }
    }
}

impl From<PipelineError> for EngineError {
    fn from(e: PipelineError) -> Self {
        EngineError::Pipeline(e)
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

impl From<RasterError> for EngineError {
    fn from(e: RasterError) -> Self {
        EngineError::Raster(e)
    }
}
