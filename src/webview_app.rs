use tao::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};
use wry::WebViewBuilder;

/// Open a native window showing the viewer served at `url`.
/// Runs the tao event loop on the current thread and only returns on a
/// setup error; closing the window exits the process.
pub fn run(url: &str, width: u32, height: u32) -> Result<(), String> {
    let event_loop = EventLoop::new();

    let window = WindowBuilder::new()
        .with_title("Live Spectrogram")
        .with_inner_size(tao::dpi::LogicalSize::new(width + 24, height + 24))
        .with_min_inner_size(tao::dpi::LogicalSize::new(320_u32, 200_u32))
        .build(&event_loop)
        .map_err(|e| format!("window: {e}"))?;

    let _webview = WebViewBuilder::new()
        .with_url(url)
        .build(&window)
        .map_err(|e| format!("webview: {e}"))?;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;
        if let Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        } = event
        {
            *control_flow = ControlFlow::Exit;
        }
    })
}
