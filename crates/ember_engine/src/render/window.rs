//! Window management using GLFW
//!
//! The windowing layer is an external collaborator; this wrapper exposes
//! exactly what the renderer consumes: framebuffer size, event polling,
//! close state, required instance extensions, and surface creation.

use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW library failed to initialize
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// Window creation failed
    #[error("Window creation failed")]
    CreationFailed,

    /// Other GLFW error
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result alias for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a window configured for Vulkan rendering (no GL context)
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self {
            glfw,
            window,
            events,
        })
    }

    /// Whether the user has requested the window to close
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request the window to close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the windowing event queue
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Drain queued window events
    pub fn flush_events(&self) -> glfw::FlushedMessages<(f64, glfw::WindowEvent)> {
        glfw::flush_messages(&self.events)
    }

    /// Framebuffer size in pixels (may differ from logical window size)
    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width as u32, height as u32)
    }

    /// Block while the framebuffer has zero area (minimized window)
    ///
    /// The swapchain cannot be rebuilt against a zero-extent surface, so the
    /// resize path parks here until the window regains area.
    pub fn wait_while_minimized(&mut self) {
        loop {
            let (width, height) = self.get_framebuffer_size();
            if width > 0 && height > 0 {
                return;
            }
            self.glfw.wait_events();
        }
    }

    /// Required Vulkan instance extensions for surface creation
    pub fn get_required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("no Vulkan support in GLFW".to_string()))
    }

    /// Access the raw GLFW window (for surface creation)
    pub fn inner(&self) -> &glfw::PWindow {
        &self.window
    }
}
