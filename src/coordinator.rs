use crate::config::ConfigUpdate;
use crate::engine::{AudioSource, RenderFrame, SpectrogramEngine};
use crate::error::EngineError;
use crate::feed::DetectionFeed;
use crate::raster::RasterCapture;
use crate::scheduler::{Scheduler, Task, DISPLAY_SYNC_MS};
use crate::types::Clock;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, trace, warn};
use std::time::Duration;

/// Resize events closer together than this collapse into one reallocation.
pub const RESIZE_DEBOUNCE_MS: u64 = 150;

/// Host requests, delivered to the coordinator thread.
#[derive(Debug)]
pub enum ControlMessage {
    Resize { width: usize, height: usize },
    Update(ConfigUpdate),
    /// Reply channel for the raster snapshot.
    Capture(Sender<RasterCapture>),
    Stop,
}

/// The coordinator owns the engine and runs both timed loops on one
/// thread. Render frames fan out to consumers; feed responses and control
/// messages are applied between ticks, never during one.
pub struct Coordinator<C: Clock> {
    engine: SpectrogramEngine,
    scheduler: Scheduler<C>,
    feed: Option<Box<dyn DetectionFeed>>,
    control_rx: Receiver<ControlMessage>,
    frame_txs: Vec<Sender<RenderFrame>>,
    /// (width, height, apply-at ms)
    pending_resize: Option<(usize, usize, u64)>,
    frames_dropped: u64,
}

impl<C: Clock> Coordinator<C> {
    pub fn new(
        engine: SpectrogramEngine,
        clock: C,
        control_rx: Receiver<ControlMessage>,
        frame_txs: Vec<Sender<RenderFrame>>,
    ) -> Self {
        Self {
            engine,
            scheduler: Scheduler::new(clock),
            feed: None,
            control_rx,
            frame_txs,
            pending_resize: None,
            frames_dropped: 0,
        }
    }

    pub fn with_feed(mut self, feed: Box<dyn DetectionFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn engine(&self) -> &SpectrogramEngine {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_initialized() && self.scheduler.is_running()
    }

    /// Initialize the engine against `source` and arm both loops.
    pub fn start(&mut self, source: &mut dyn AudioSource) -> Result<(), EngineError> {
        self.engine.initialize(source)?;
        let poll_ms = self.engine.config().poll_interval_ms;
        self.scheduler.start(DISPLAY_SYNC_MS, poll_ms);
        if self.feed.is_none() {
            self.scheduler.cancel(Task::Poll);
        }
        info!(
            "Coordinator running (detection feed: {})",
            if self.feed.is_some() { "ON" } else { "OFF" }
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.engine.stop();
        self.pending_resize = None;
    }

    /// One pass of the loop at the clock's current time. Returns false once
    /// stopped.
    pub fn step(&mut self) -> bool {
        while let Ok(msg) = self.control_rx.try_recv() {
            self.handle_control(msg);
        }
        if !self.is_running() {
            return false;
        }
        let now = self.scheduler.now_ms();

        if let Some((w, h, due)) = self.pending_resize {
            if now >= due {
                self.pending_resize = None;
                self.engine.handle_resize(w, h);
            }
        }

        // Each response is ingested whole before any render tick below.
        if let Some(feed) = self.feed.as_mut() {
            while let Some(response) = feed.try_response() {
                self.engine.ingest_response(response, now);
            }
        }

        for task in self.scheduler.due_tasks() {
            match task {
                Task::Render => {
                    if let Some(frame) = self.engine.render_tick(now) {
                        self.publish(frame);
                    }
                }
                Task::Poll => {
                    if let Some(feed) = self.feed.as_mut() {
                        trace!("Poll (last_file={:?})", self.engine.last_file_name());
                        feed.request(self.engine.last_file_name());
                    }
                }
            }
        }
        true
    }

    /// Run until stopped. Sleeps between due times, waking early for
    /// control messages.
    pub fn run(&mut self) {
        while self.step() {
            let now = self.scheduler.now_ms();
            let mut wake = self.scheduler.next_wakeup_ms().unwrap_or(now + DISPLAY_SYNC_MS);
            if let Some((_, _, due)) = self.pending_resize {
                wake = wake.min(due);
            }
            // Feed responses are polled on render cadence at the latest.
            let wait = wake.saturating_sub(now).min(DISPLAY_SYNC_MS);
            match self.control_rx.recv_timeout(Duration::from_millis(wait)) {
                Ok(msg) => self.handle_control(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(Duration::from_millis(wait));
                }
            }
        }
        info!(
            "Coordinator shutting down after {} ticks ({} frames dropped)",
            self.engine.ticks(),
            self.frames_dropped
        );
    }

    fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Resize { width, height } => {
                let due = self.scheduler.now_ms() + RESIZE_DEBOUNCE_MS;
                self.pending_resize = Some((width, height, due));
            }
            ControlMessage::Update(update) => {
                let changes = self.engine.update_config(&update);
                if changes.timing {
                    self.scheduler
                        .set_poll_delay(self.engine.config().poll_interval_ms);
                }
            }
            ControlMessage::Capture(reply) => {
                if reply.send(self.engine.capture()).is_err() {
                    warn!("Capture requester went away");
                }
            }
            ControlMessage::Stop => {
                info!("Stop requested");
                self.stop();
            }
        }
    }

    fn publish(&mut self, frame: RenderFrame) {
        for tx in &self.frame_txs {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.frames_dropped += 1;
                    if self.frames_dropped % 100 == 1 {
                        debug!("Consumer lagging: {} frames dropped", self.frames_dropped);
                    }
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}
