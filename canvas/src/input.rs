//! Input model: keys, wheel deltas, the board viewport, and the gesture state machine.
//!
//! `InputState` is the active gesture being tracked between press and
//! release. Each dragging variant carries the context needed to compute the
//! next incremental update.

#[cfg(test)]
#[path = "input_test.rs"]
mod input_test;

use mapstate::TokenId;

use crate::camera::{Point, Size};

/// A keyboard key as reported by the host (e.g. `"+"`, `"-"`, `"Escape"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key(pub String);

impl Key {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Scale step direction bound to this key: `+1` zooms in, `-1` zooms out.
    #[must_use]
    pub fn zoom_direction(&self) -> Option<f64> {
        match self.0.as_str() {
            "+" => Some(1.0),
            "-" => Some(-1.0),
            _ => None,
        }
    }
}

/// Wheel / trackpad scroll delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct WheelDelta {
    /// Horizontal scroll amount in pixels (unused for zoom).
    pub dx: f64,
    /// Vertical scroll amount in pixels (positive = down = zoom out).
    pub dy: f64,
}

/// The board's rendering surface, in board coordinates with origin at top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    /// Strict interior test used to start a map drag.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x > 0.0 && p.x < self.width && p.y > 0.0 && p.y < self.height
    }

    /// Inclusive test used to accept wheel zoom, edges included.
    #[must_use]
    pub fn covers(&self, p: Point) -> bool {
        p.x >= 0.0 && p.x <= self.width && p.y >= 0.0 && p.y <= self.height
    }
}

/// Internal state for the input state machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InputState {
    /// No gesture in progress; waiting for the next press.
    #[default]
    Idle,
    /// The user is panning the map (and every token with it).
    DraggingMap {
        /// Board-space position of the previous pointer event, used to compute the pan delta.
        last: Point,
    },
    /// The user is moving a single token.
    DraggingToken {
        /// Id of the token being dragged.
        id: TokenId,
        /// Pointer position minus token position at press time.
        grab: Point,
    },
}

impl InputState {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}
