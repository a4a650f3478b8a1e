use crate::engine::{AudioSource, SourceConnection};
use crate::error::{FeedError, PipelineError};
use crate::feed::{DetectionFeed, FeedDetection, FeedDocument};
use crate::types::*;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

/// Synthetic birdsong: frequency-swept chirps over a noise floor, plus a
/// matching detection feed. Runs the whole pipeline with no input device
/// and no detection backend.
pub struct SyntheticSource {
    clock: SessionClock,
    sample_rate: u32,
    seed: u64,
    calls_tx: Option<Sender<EmittedCall>>,
}

/// One call in the roster: a chirp swept from `from_hz` to `to_hz`,
/// repeated `notes` times.
#[derive(Debug, Clone, Copy)]
struct Species {
    name: &'static str,
    from_hz: f32,
    to_hz: f32,
    note_ms: u32,
    gap_ms: u32,
    notes: u32,
}

const ROSTER: [Species; 4] = [
    Species { name: "European Robin", from_hz: 2800.0, to_hz: 6200.0, note_ms: 180, gap_ms: 90, notes: 5 },
    Species { name: "Eurasian Blackbird", from_hz: 1800.0, to_hz: 2600.0, note_ms: 350, gap_ms: 150, notes: 3 },
    Species { name: "Eurasian Wren", from_hz: 4500.0, to_hz: 8500.0, note_ms: 60, gap_ms: 30, notes: 12 },
    Species { name: "Common Chiffchaff", from_hz: 5200.0, to_hz: 4200.0, note_ms: 120, gap_ms: 180, notes: 6 },
];

/// Samples per chunk. ~21ms at 48kHz.
const CHUNK_SIZE: usize = 1024;
const NOISE_LEVEL: f32 = 0.02;
const CALL_AMPLITUDE: f32 = 0.5;

/// A call the generator actually played, in session time.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedCall {
    pub name: &'static str,
    pub at_ms: u64,
}

struct ActiveCall {
    species: Species,
    /// Samples since the call began.
    elapsed: u64,
}

/// Sample-accurate chirp synthesis. Time is counted in samples so phase
/// stays continuous regardless of thread scheduling.
pub struct ChirpGenerator {
    sample_rate: u32,
    rng: StdRng,
    sample_counter: u64,
    phase: f32,
    active: Option<ActiveCall>,
    next_call_at: u64,
}

impl ChirpGenerator {
    pub fn new(sample_rate: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let first = rng.gen_range(0.5..1.5) * sample_rate as f32;
        Self {
            sample_rate,
            rng,
            sample_counter: 0,
            phase: 0.0,
            active: None,
            next_call_at: first as u64,
        }
    }

    /// Session time of the next generated sample.
    pub fn position_ms(&self) -> u64 {
        self.sample_counter * 1000 / self.sample_rate as u64
    }

    /// Produce `n` samples. Returns the names of calls that started inside
    /// this block together with their start offsets in ms.
    pub fn next_block(&mut self, n: usize) -> (Vec<f32>, Vec<(&'static str, u64)>) {
        let sr = self.sample_rate as f32;
        let mut out = Vec::with_capacity(n);
        let mut started = Vec::new();

        for _ in 0..n {
            if self.active.is_none() && self.sample_counter >= self.next_call_at {
                let species = ROSTER[self.rng.gen_range(0..ROSTER.len())];
                started.push((species.name, self.position_ms()));
                self.active = Some(ActiveCall { species, elapsed: 0 });
            }

            let mut s = self.rng.gen_range(-1.0..1.0) * NOISE_LEVEL;
            let mut finished = false;
            if let Some(call) = self.active.as_mut() {
                let sp = call.species;
                let note_len = (sp.note_ms as u64 * self.sample_rate as u64) / 1000;
                let period = note_len + (sp.gap_ms as u64 * self.sample_rate as u64) / 1000;
                let within = call.elapsed % period.max(1);
                if within < note_len {
                    let t = within as f32 / note_len.max(1) as f32;
                    let freq = sp.from_hz + (sp.to_hz - sp.from_hz) * t;
                    self.phase = (self.phase + 2.0 * PI * freq / sr) % (2.0 * PI);
                    let env = (PI * t).sin();
                    s += CALL_AMPLITUDE * env * self.phase.sin();
                }
                call.elapsed += 1;
                finished = call.elapsed >= period * sp.notes as u64;
            }
            if finished {
                self.active = None;
                let gap = self.rng.gen_range(1.5..4.0) * sr;
                self.next_call_at = self.sample_counter + gap as u64;
            }

            out.push(s);
            self.sample_counter += 1;
        }
        (out, started)
    }
}

impl SyntheticSource {
    pub fn new(clock: SessionClock, seed: u64) -> Self {
        Self {
            clock,
            sample_rate: 48_000,
            seed,
            calls_tx: None,
        }
    }

    /// A feed that reports the calls this source plays.
    pub fn detection_feed(&mut self) -> SimulatedFeed {
        let (tx, rx) = unbounded();
        self.calls_tx = Some(tx);
        SimulatedFeed::new(rx, self.clock.clone(), self.seed.wrapping_add(1))
    }
}

impl AudioSource for SyntheticSource {
    fn name(&self) -> &str {
        "simulator"
    }

    fn connect(&mut self) -> Result<SourceConnection, PipelineError> {
        let (tx, rx) = bounded::<AudioChunk>(64);
        let mut gen = ChirpGenerator::new(self.sample_rate, self.seed);
        let calls_tx = self.calls_tx.take();
        let clock = self.clock.clone();
        let sample_rate = self.sample_rate;

        thread::Builder::new()
            .name("simulator".into())
            .spawn(move || {
                info!("Simulator streaming synthetic birdsong at {} Hz", sample_rate);
                let chunk_dur = Duration::from_secs_f64(CHUNK_SIZE as f64 / sample_rate as f64);
                let start = Instant::now();
                let session_start = clock.now_ms();
                for i in 0u32.. {
                    let target = chunk_dur * i;
                    let elapsed = start.elapsed();
                    if elapsed < target {
                        thread::sleep(target - elapsed);
                    }
                    let timestamp_ms = session_start + gen.position_ms();
                    let (samples, started) = gen.next_block(CHUNK_SIZE);
                    if let Some(ctx) = calls_tx.as_ref() {
                        for (name, offset_ms) in started {
                            debug!("Simulator: {} calling", name);
                            let _ = ctx.send(EmittedCall {
                                name,
                                at_ms: session_start + offset_ms,
                            });
                        }
                    }
                    let chunk = AudioChunk {
                        timestamp_ms,
                        samples,
                        sample_rate,
                    };
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
                info!("Simulator stopped");
            })
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        Ok(SourceConnection {
            chunks: rx,
            sample_rate,
        })
    }
}

// ─── Simulated detection feed ───────────────────────────────────────────────

/// Answers each poll with the calls played since the previous poll, packed
/// as one "recording" starting at the previous poll. A poll with nothing new
/// repeats the previous file name.
pub struct SimulatedFeed {
    calls_rx: Receiver<EmittedCall>,
    clock: SessionClock,
    rng: StdRng,
    window_start_ms: u64,
    files: u32,
    last_name: String,
    responses: VecDeque<FeedDocument>,
}

impl SimulatedFeed {
    fn new(calls_rx: Receiver<EmittedCall>, clock: SessionClock, seed: u64) -> Self {
        let window_start_ms = clock.now_ms();
        Self {
            calls_rx,
            clock,
            rng: StdRng::seed_from_u64(seed),
            window_start_ms,
            files: 0,
            last_name: String::new(),
            responses: VecDeque::new(),
        }
    }

    fn build_document(&mut self, now_ms: u64) -> FeedDocument {
        let calls: Vec<EmittedCall> = self.calls_rx.try_iter().collect();
        if calls.is_empty() {
            return FeedDocument {
                detections: Vec::new(),
                delay: 0.0,
                file_name: self.last_name.clone(),
            };
        }
        let window_start = self.window_start_ms.min(calls[0].at_ms);
        let detections = calls
            .iter()
            .map(|c| FeedDetection {
                common_name: c.name.to_string(),
                confidence: self.rng.gen_range(0.55..0.99),
                start: c.at_ms.saturating_sub(window_start) as f64 / 1000.0,
            })
            .collect();
        self.files += 1;
        self.last_name = format!("sim-{:05}.wav", self.files);
        self.window_start_ms = now_ms;
        FeedDocument {
            detections,
            delay: now_ms.saturating_sub(window_start) as f64 / 1000.0,
            file_name: self.last_name.clone(),
        }
    }
}

impl DetectionFeed for SimulatedFeed {
    fn request(&mut self, _last_file: Option<&str>) {
        let now = self.clock.now_ms();
        let doc = self.build_document(now);
        self.responses.push_back(doc);
    }

    fn try_response(&mut self) -> Option<Result<FeedDocument, FeedError>> {
        self.responses.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::compute_rms;

    #[test]
    fn test_generator_emits_calls_over_noise() {
        let mut gen = ChirpGenerator::new(48_000, 7);
        let mut started = Vec::new();
        let mut peak_rms: f32 = 0.0;
        // 10 s of audio
        for _ in 0..(480_000 / CHUNK_SIZE) {
            let (block, s) = gen.next_block(CHUNK_SIZE);
            assert_eq!(block.len(), CHUNK_SIZE);
            assert!(block.iter().all(|x| x.abs() <= 1.0));
            peak_rms = peak_rms.max(compute_rms(&block));
            started.extend(s);
        }
        assert!(!started.is_empty(), "at least one call in 10 s");
        assert!(peak_rms > 0.1, "calls stand above the noise floor, rms={}", peak_rms);
        assert!(started.windows(2).all(|w| w[1].1 > w[0].1));
    }

    #[test]
    fn test_generator_is_deterministic_per_seed() {
        let mut a = ChirpGenerator::new(48_000, 42);
        let mut b = ChirpGenerator::new(48_000, 42);
        assert_eq!(a.next_block(4096).0, b.next_block(4096).0);
    }

    #[test]
    fn test_feed_places_calls_in_window() {
        let (tx, rx) = unbounded();
        let clock = SessionClock::new();
        let mut feed = SimulatedFeed::new(rx, clock, 1);
        feed.window_start_ms = 1000;
        tx.send(EmittedCall { name: "European Robin", at_ms: 1500 }).unwrap();
        tx.send(EmittedCall { name: "Eurasian Wren", at_ms: 2500 }).unwrap();

        let doc = feed.build_document(4000);
        assert_eq!(doc.file_name, "sim-00001.wav");
        assert_eq!(doc.detections.len(), 2);
        assert_eq!(doc.detections[0].start, 0.5);
        assert_eq!(doc.delay, 3.0);
        assert!(doc.detections.iter().all(|d| (0.55..0.99).contains(&d.confidence)));

        let idle = feed.build_document(5000);
        assert_eq!(idle.file_name, "sim-00001.wav", "nothing new repeats the name");
        assert!(idle.detections.is_empty());
    }
}
