//! Window management using winit

use std::sync::Arc;
use thiserror::Error;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Failed to create window: {0}")]
    Creation(#[from] winit::error::OsError),
    #[error("Event loop failed: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("Setup failed: {0}")]
    Setup(String),
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, WindowError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)?,
        );

        Ok(Self {
            window,
            width,
            height,
            resized: false,
            close_requested: false,
        })
    }

    /// Get arc reference to window, for backend initialization
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Take the resize flag, clearing it
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Run the event loop, calling `setup` once with the window and then
/// `frame` on every iteration until the window closes
pub fn run<S, E, T, F>(
    title: &str,
    width: u32,
    height: u32,
    setup: S,
    mut frame: F,
) -> Result<(), WindowError>
where
    S: FnOnce(&Window) -> Result<T, E>,
    E: std::fmt::Display,
    F: FnMut(&mut Window, &mut T) + 'static,
    T: 'static,
{
    let event_loop = EventLoop::new()?;
    let mut window = Window::new(&event_loop, title, width, height)?;
    let mut state = setup(&window).map_err(|e| WindowError::Setup(e.to_string()))?;

    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);
                if window.should_close() {
                    elwt.exit();
                }
            }
            Event::AboutToWait => {
                frame(&mut window, &mut state);
                window.request_redraw();
            }
            _ => {}
        }
    })?;
    Ok(())
}
