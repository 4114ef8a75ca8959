//! Lock-screen widgets and the per-session context they share.

pub mod image;

use std::cell::Cell;
use std::rc::Rc;

use crate::math::{Rect, Vector2D};
use crate::render::Renderer;
use crate::resources::ResourceGateway;
use crate::timer::TimerQueue;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderData {
    pub opacity: f64,
}

impl Default for RenderData {
    fn default() -> Self {
        Self { opacity: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    Default,
    Pointer,
}

/// The output a widget is laid out on.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub name: String,
    pub viewport: Vector2D,
}

pub trait Widget {
    /// Draws the widget. Returns `true` when another frame is needed soon.
    fn draw(&mut self, renderer: &mut dyn Renderer, data: &RenderData) -> bool;

    /// Screen rectangle in Wayland coordinates (top-left origin).
    fn bounding_box(&self) -> Rect;

    fn on_click(&mut self, _button: u32, _down: bool, _pos: Vector2D) {}

    fn on_hover(&mut self, _pos: Vector2D) -> Option<CursorShape> {
        None
    }
}

/// State shared by every widget of one lock session.
pub struct LockContext {
    pub resources: Rc<dyn ResourceGateway>,
    pub timers: TimerQueue,
    redraw: Cell<bool>,
    terminating: Cell<bool>,
}

impl LockContext {
    pub fn new(resources: Rc<dyn ResourceGateway>, timers: TimerQueue) -> Rc<Self> {
        Rc::new(Self {
            resources,
            timers,
            redraw: Cell::new(false),
            terminating: Cell::new(false),
        })
    }

    /// Asks the host to redraw every output.
    pub fn request_redraw(&self) {
        self.redraw.set(true);
    }

    pub fn take_redraw(&self) -> bool {
        self.redraw.replace(false)
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.get()
    }

    pub fn set_terminating(&self) {
        self.terminating.set(true);
    }
}
