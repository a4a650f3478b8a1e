use crate::engine::{AudioSource, SourceConnection};
use crate::error::PipelineError;
use crate::types::*;
use crossbeam_channel::bounded;
use hound::{SampleFormat, WavReader};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Streams a WAV file as mono AudioChunks at real-time pace, optionally
/// looping. Lets the spectrogram run against a recording with no input
/// device.
pub struct WavSource {
    path: PathBuf,
    looping: bool,
    clock: SessionClock,
}

/// Samples per AudioChunk. ~21ms at 48kHz.
const CHUNK_SIZE: usize = 1024;

impl WavSource {
    pub fn new(path: PathBuf, looping: bool, clock: SessionClock) -> Self {
        Self {
            path,
            looping,
            clock,
        }
    }
}

/// Decode the whole file to mono f32 in -1..1.
pub fn read_mono(path: &Path) -> Result<(Vec<f32>, u32), PipelineError> {
    let reader = WavReader::open(path)
        .map_err(|e| PipelineError::SourceUnavailable(format!("{:?}: {}", path, e)))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels as usize;
    if channels == 0 || sample_rate == 0 {
        return Err(PipelineError::UnsupportedFormat(format!(
            "{} Hz, {} channels",
            sample_rate, channels
        )));
    }

    info!(
        "WAV: {:?}  {} Hz  {} ch  {:?}  {} bit",
        path.file_name().unwrap_or_default(),
        sample_rate,
        channels,
        spec.sample_format,
        spec.bits_per_sample,
    );

    let samples_f32: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
        SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max)
                .collect()
        }
    };

    let mono: Vec<f32> = if channels == 1 {
        samples_f32
    } else {
        samples_f32
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    if mono.is_empty() {
        return Err(PipelineError::UnsupportedFormat(format!("{:?} has no samples", path)));
    }
    Ok((mono, sample_rate))
}

impl AudioSource for WavSource {
    fn name(&self) -> &str {
        "WAV file"
    }

    fn connect(&mut self) -> Result<SourceConnection, PipelineError> {
        let (mono, sample_rate) = read_mono(&self.path)?;
        info!(
            "WAV: {:.2}s, {} samples → streaming at real-time pace{}",
            mono.len() as f64 / sample_rate as f64,
            mono.len(),
            if self.looping { " (looping)" } else { "" }
        );

        let (tx, rx) = bounded::<AudioChunk>(64);
        let clock = self.clock.clone();
        let looping = self.looping;
        thread::Builder::new()
            .name("wav-player".into())
            .spawn(move || {
                let chunk_dur = Duration::from_secs_f64(CHUNK_SIZE as f64 / sample_rate as f64);
                'play: loop {
                    let start = Instant::now();
                    for (i, chunk) in mono.chunks(CHUNK_SIZE).enumerate() {
                        // Pace to real time: wait until this chunk's expected send time
                        let target = chunk_dur * i as u32;
                        let elapsed = start.elapsed();
                        if elapsed < target {
                            thread::sleep(target - elapsed);
                        }
                        let chunk = AudioChunk {
                            timestamp_ms: clock.now_ms(),
                            samples: chunk.to_vec(),
                            sample_rate,
                        };
                        if tx.send(chunk).is_err() {
                            // Engine stopped
                            break 'play;
                        }
                    }
                    if !looping {
                        break;
                    }
                }
                info!("WAV playback complete.");
            })
            .map_err(|e| {
                warn!("Failed to spawn WAV player: {}", e);
                PipelineError::SourceUnavailable(e.to_string())
            })?;

        Ok(SourceConnection {
            chunks: rx,
            sample_rate,
        })
    }
}
