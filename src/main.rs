use live_spectrogram::colormap::{ColorScheme, Normalization};
use live_spectrogram::config::{Config, ConfigUpdate};
use live_spectrogram::console_display;
use live_spectrogram::control;
use live_spectrogram::coordinator::{ControlMessage, Coordinator};
use live_spectrogram::dsp::WindowFunction;
use live_spectrogram::engine::{AudioSource, RenderFrame, SpectrogramEngine};
use live_spectrogram::feed::{DetectionFeed, HttpFeed};
use live_spectrogram::simulator::SyntheticSource;
use live_spectrogram::types::*;
use live_spectrogram::wav_player::WavSource;
use live_spectrogram::ws_server;
#[cfg(feature = "audio")]
use live_spectrogram::audio_input;
#[cfg(feature = "gui")]
use live_spectrogram::webview_app;

use clap::Parser;
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{error, info, warn};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

#[derive(Parser)]
#[command(name = "live-spectrogram")]
#[command(about = "Scrolling live spectrogram with detection label overlays")]
struct Cli {
    /// JSON config file (missing fields take defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stream a WAV file instead of synthetic audio
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Restart the WAV file when it ends
    #[arg(long = "loop")]
    looping: bool,

    /// Capture from the default audio input (requires the 'audio' feature)
    #[arg(long)]
    mic: bool,

    /// Detection feed URL, polled for {detections, delay, file_name}
    #[arg(long)]
    feed_url: Option<String>,

    /// Run without any detection feed
    #[arg(long)]
    no_feed: bool,

    /// Seed for the synthetic source (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Raster width in columns (time axis)
    #[arg(long, default_value_t = 1024)]
    width: usize,

    /// Raster height in rows (frequency axis)
    #[arg(long, default_value_t = 320)]
    height: usize,

    /// Palette: grayscale, inverted, hue, magma, inferno, plasma, viridis, cividis
    #[arg(long)]
    palette: Option<ColorScheme>,

    /// Magnitude normalization: linear, log or per_frequency
    #[arg(long)]
    normalization: Option<Normalization>,

    /// Analysis window: hann, blackman or hamming
    #[arg(long)]
    window: Option<WindowFunction>,

    /// Displayed dynamic range in dB (20–120)
    #[arg(long)]
    db_range: Option<f32>,

    /// Analysis (FFT) size, power of two in 32..=32768
    #[arg(long)]
    fft_size: Option<usize>,

    /// Logarithmic frequency axis
    #[arg(long)]
    log_freq: bool,

    /// Minimum milliseconds between raster columns
    #[arg(long)]
    redraw_ms: Option<u64>,

    /// Confidence threshold for high-tier labels (0–1)
    #[arg(long)]
    threshold: Option<f32>,

    /// Enable console waterfall (for headless use)
    #[arg(long)]
    console: bool,

    /// Console waterfall refresh rate (Hz)
    #[arg(long, default_value_t = 10)]
    console_hz: u32,

    /// Console waterfall width in characters
    #[arg(long, default_value_t = 64)]
    console_cols: usize,

    /// Disable the native GUI window
    #[arg(long)]
    no_gui: bool,

    /// Enable the browser viewer (HTTP + WebSocket)
    #[arg(long)]
    ws: bool,

    /// Viewer bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    ws_addr: String,

    /// Suppress auto-opening the browser when --ws is active.
    #[arg(long)]
    no_open: bool,

    /// Write a PNG of the raster here on exit
    #[arg(long)]
    capture_on_exit: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigUpdate {
        ConfigUpdate {
            palette: self.palette,
            normalization: self.normalization,
            window: self.window,
            db_range: self.db_range,
            fft_size: self.fft_size,
            log_frequency: self.log_freq.then_some(true),
            redraw_interval_ms: self.redraw_ms,
            confidence_threshold: self.threshold,
            ..Default::default()
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.into()).spawn(f) {
        Ok(h) => Some(h),
        Err(e) => {
            error!("Failed to spawn {} thread: {}", name, e);
            None
        }
    }
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let clock = SessionClock::new();

    let mut config = cli
        .config
        .as_deref()
        .and_then(Config::load)
        .unwrap_or_default();
    let overrides = cli.overrides();
    if !overrides.is_empty() {
        config.apply(&overrides);
    }

    let gui_enabled = cfg!(feature = "gui") && !cli.no_gui;

    info!("═══════════════════════════════════════════════");
    info!("  LIVE SPECTROGRAM v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Source: {}",
        match (&cli.wav, cli.mic) {
            (Some(p), _) => format!("WAV {:?}", p),
            (None, true) => "audio input".to_string(),
            (None, false) => "SIMULATOR".to_string(),
        }
    );
    info!(
        "  Raster: {}x{}, FFT {}, palette {}, {} axis",
        cli.width,
        cli.height,
        config.fft_size,
        config.palette,
        if config.log_frequency { "log" } else { "linear" }
    );
    if gui_enabled { info!("  UI: WebView (wry) → http://{}", cli.ws_addr.replace("0.0.0.0", "localhost")); }
    if cli.ws { info!("  UI: viewer on {}", cli.ws_addr); }
    if cli.console { info!("  UI: Console waterfall"); }
    info!("═══════════════════════════════════════════════");

    // Channels: coordinator → consumers
    let mut frame_txs: Vec<Sender<RenderFrame>> = Vec::new();
    let (control_tx, control_rx) = unbounded::<ControlMessage>();
    let mut handles = Vec::new();

    // ─── Console waterfall (opt-in, for headless/debug) ─────────────
    if cli.console {
        let (tx, rx) = bounded::<RenderFrame>(256);
        frame_txs.push(tx);
        let (hz, cols) = (cli.console_hz, cli.console_cols);
        handles.extend(spawn_named("display", move || {
            console_display::ConsoleDisplay::new(rx, hz, cols).run();
        }));
    }

    // ─── Viewer server ──────────────────────────────────────────────
    // Always started when the webview GUI is active (it loads the viewer).
    if gui_enabled || cli.ws {
        let (tx, rx) = bounded::<RenderFrame>(1024);
        frame_txs.push(tx);
        let ws_addr = cli.ws_addr.clone();
        handles.extend(spawn_named("ws-server", move || {
            ws_server::WsServer::new(rx, ws_addr).run();
        }));

        if cli.ws && !gui_enabled && !cli.no_open {
            let url = format!("http://{}", cli.ws_addr.replace("0.0.0.0", "localhost"));
            handles.extend(spawn_named("browser-open", move || {
                thread::sleep(std::time::Duration::from_millis(800));
                #[cfg(target_os = "macos")]
                let _ = std::process::Command::new("open").arg(&url).spawn();
                #[cfg(target_os = "linux")]
                let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
                info!("Browser opened at {}", url);
            }));
        }
    }

    // ─── Audio source + detection feed ──────────────────────────────
    // The source stays on this thread: a live input stream is not Send.
    let mut sim_feed = None;
    let mut source: Box<dyn AudioSource> = if let Some(path) = cli.wav.clone() {
        Box::new(WavSource::new(path, cli.looping, clock.clone()))
    } else if cli.mic {
        #[cfg(feature = "audio")]
        {
            Box::new(audio_input::MicSource::new(clock.clone()))
        }
        #[cfg(not(feature = "audio"))]
        {
            error!("--mic requires the 'audio' feature. Falling back to simulator.");
            let mut sim = SyntheticSource::new(clock.clone(), cli.seed.unwrap_or_else(rand::random));
            sim_feed = Some(sim.detection_feed());
            Box::new(sim)
        }
    } else {
        let mut sim = SyntheticSource::new(clock.clone(), cli.seed.unwrap_or_else(rand::random));
        sim_feed = Some(sim.detection_feed());
        Box::new(sim)
    };

    let feed: Option<Box<dyn DetectionFeed>> = if cli.no_feed {
        None
    } else if let Some(url) = cli.feed_url.clone() {
        match HttpFeed::spawn(url) {
            Ok(f) => Some(Box::new(f)),
            Err(e) => {
                warn!("Detection feed disabled: {}", e);
                None
            }
        }
    } else {
        sim_feed.map(|f| Box::new(f) as Box<dyn DetectionFeed>)
    };

    // ─── Coordinator ────────────────────────────────────────────────
    let engine = SpectrogramEngine::new(config, cli.width, cli.height);
    let mut coord = Coordinator::new(engine, clock.clone(), control_rx, frame_txs);
    if let Some(f) = feed {
        coord = coord.with_feed(f);
    }
    if let Err(e) = coord.start(source.as_mut()) {
        error!("Could not start: {}", e);
        std::process::exit(1);
    }

    let capture_path = cli.capture_on_exit.clone();
    let coord_handle = spawn_named("coordinator", move || {
        coord.run();
        if let Some(path) = capture_path {
            match coord.engine().capture().save_png(&path) {
                Ok(()) => info!("Raster saved to {:?}", path),
                Err(e) => error!("Capture on exit failed: {}", e),
            }
        }
    });

    // ─── Operator commands on stdin ─────────────────────────────────
    let stdin_tx = control_tx.clone();
    // Not joined: it blocks on stdin until EOF.
    let _ = spawn_named("control", move || {
        control::run(std::io::stdin().lock(), stdin_tx);
    });

    // ─── Launch WebView on main thread (blocks until window closes) ──
    //
    // WKWebView (via wry/tao) MUST run on the main thread on macOS.
    #[cfg(feature = "gui")]
    if gui_enabled {
        // Give the server a moment to bind before the WebView tries to load.
        thread::sleep(std::time::Duration::from_millis(600));
        let url = format!("http://{}", cli.ws_addr.replace("0.0.0.0", "localhost"));
        info!("Launching WebView at {}", url);
        if let Err(e) = webview_app::run(&url, cli.width as u32, cli.height as u32) {
            error!("WebView failed: {}", e);
        }
    }

    info!("Running headless. Type 'quit' or press Ctrl+C to stop.");
    if let Some(h) = coord_handle {
        let _ = h.join();
    }
    drop(control_tx);
    drop(source);
    drop(handles);
}
