use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use log::{error, info};
use std::thread;

use crate::engine::{AudioSource, SourceConnection};
use crate::error::PipelineError;
use crate::types::{AudioChunk, SessionClock};

const CHUNK_SIZE: usize = 1024;

/// Live input from the default capture device.
///
/// Holds the cpal `Stream` once connected; it is not `Send`, so the
/// source must stay on the thread that connected it. Drop to stop capture.
pub struct MicSource {
    clock: SessionClock,
    stream: Option<Stream>,
}

impl MicSource {
    pub fn new(clock: SessionClock) -> Self {
        Self {
            clock,
            stream: None,
        }
    }
}

impl AudioSource for MicSource {
    fn name(&self) -> &str {
        "audio input"
    }

    fn connect(&mut self) -> Result<SourceConnection, PipelineError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            PipelineError::SourceUnavailable("no default audio input device".into())
        })?;

        info!(
            "Audio input: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let supported = device
            .default_input_config()
            .map_err(|e| PipelineError::UnsupportedFormat(e.to_string()))?;
        let format = supported.sample_format();
        let sample_rate = supported.sample_rate().0;
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;

        info!("Capture config: {}Hz  {} ch  {:?}", sample_rate, channels, format);

        // Realtime callback → chunking thread. try_send keeps the callback
        // from ever blocking.
        let (raw_tx, raw_rx) = bounded::<Vec<f32>>(64);
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, raw_tx),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, raw_tx),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, raw_tx),
            fmt => {
                return Err(PipelineError::UnsupportedFormat(format!(
                    "sample format {fmt:?}"
                )))
            }
        }?;
        stream
            .play()
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        let (tx, rx) = bounded::<AudioChunk>(256);
        let clock = self.clock.clone();
        thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let mut accum: Vec<f32> = Vec::with_capacity(CHUNK_SIZE * 4);
                for block in raw_rx {
                    accum.extend_from_slice(&block);
                    while accum.len() >= CHUNK_SIZE {
                        let chunk = AudioChunk {
                            timestamp_ms: clock.now_ms(),
                            samples: accum.drain(..CHUNK_SIZE).collect(),
                            sample_rate,
                        };
                        if tx.send(chunk).is_err() {
                            return;
                        }
                    }
                }
            })
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        self.stream = Some(stream);
        Ok(SourceConnection {
            chunks: rx,
            sample_rate,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    raw_tx: Sender<Vec<f32>>,
) -> Result<Stream, PipelineError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _| {
                let _ = raw_tx.try_send(mix_mono(data, channels));
            },
            |e| error!("Audio stream error: {e}"),
            None,
        )
        .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))
}

/// Average interleaved frames down to one channel.
fn mix_mono<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| s.to_sample::<f32>()).collect();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_mono_i16() {
        let mono = mix_mono(&[i16::MAX, 0, i16::MIN, 0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.5).abs() < 1e-3);
        assert!((mono[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_mix_mono_passthrough() {
        assert_eq!(mix_mono(&[0.25f32, -0.5], 1), vec![0.25, -0.5]);
    }
}
