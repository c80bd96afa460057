//! Video output surface and its transport controller

use crate::ResizeMode;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// The view a session renders into
pub trait PlayerSurface: Send + Sync {
    fn set_resize_mode(&self, mode: ResizeMode);
    fn show_controller(&self);
    fn hide_controller(&self);
    fn set_controller_timeout(&self, timeout_ms: u32);
    fn set_title(&self, title: &str);
    fn enter_fullscreen(&self);
}

/// Last values applied to a [`HeadlessSurface`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SurfaceState {
    pub resize_mode: ResizeMode,
    pub controller_visible: bool,
    pub controller_timeout_ms: u32,
    pub title: Option<String>,
    pub fullscreen: bool,
}

/// Surface without a display; records what was applied
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl HeadlessSurface {
    pub fn new(controller_timeout_ms: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SurfaceState {
                controller_timeout_ms,
                ..Default::default()
            })),
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state.lock().clone()
    }
}

impl PlayerSurface for HeadlessSurface {
    fn set_resize_mode(&self, mode: ResizeMode) {
        self.state.lock().resize_mode = mode;
    }

    fn show_controller(&self) {
        self.state.lock().controller_visible = true;
    }

    fn hide_controller(&self) {
        self.state.lock().controller_visible = false;
    }

    fn set_controller_timeout(&self, timeout_ms: u32) {
        self.state.lock().controller_timeout_ms = timeout_ms;
    }

    fn set_title(&self, title: &str) {
        debug!(title, "Video title set");
        self.state.lock().title = Some(title.to_string());
    }

    fn enter_fullscreen(&self) {
        self.state.lock().fullscreen = true;
    }
}
