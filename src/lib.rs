pub mod colormap;
pub mod config;
pub mod console_display;
pub mod control;
pub mod coordinator;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod feed;
pub mod freq_map;
pub mod overlay;
pub mod raster;
pub mod sampler;
pub mod scheduler;
pub mod simulator;
pub mod types;
pub mod wav_player;
pub mod ws_server;

#[cfg(feature = "audio")]
pub mod audio_input;

#[cfg(feature = "gui")]
pub mod webview_app;
