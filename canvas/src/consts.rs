//! Shared numeric constants for the canvas crate.

// ── Zoom ────────────────────────────────────────────────────────

pub use mapstate::{MAX_SCALE, MIN_SCALE};

/// Scale of a freshly created view.
pub const DEFAULT_SCALE: f64 = 1.0;

/// Scale change per wheel delta unit. Positive wheel deltas (scroll down) zoom out.
pub const WHEEL_ZOOM_SENSITIVITY: f64 = 0.001;

/// Scale change per `+` / `-` key press.
pub const KEY_ZOOM_STEP: f64 = 0.1;

// ── Tokens ──────────────────────────────────────────────────────

/// Height every new token is normalized to; width follows the asset's aspect ratio.
pub const TOKEN_HEIGHT: f64 = 50.0;
