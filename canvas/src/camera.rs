//! Geometry engine: points, sizes, the map view, and the pan/zoom math.
//!
//! Everything here is pure. Board coordinates are the fixed pixel space of the
//! rendering surface; map coordinates are the background image's own pixel
//! space, related to board coordinates by [`MapView`]'s offset and scale.

#[cfg(test)]
#[path = "camera_test.rs"]
mod camera_test;

use std::ops::{Add, Sub};

use mapstate::Position;

use crate::consts::{DEFAULT_SCALE, MAX_SCALE, MIN_SCALE};

/// A point (or displacement) in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl From<Position> for Point {
    fn from(p: Position) -> Self {
        Self::new(p.x, p.y)
    }
}

impl From<Point> for Position {
    fn from(p: Point) -> Self {
        Position::new(p.x, p.y)
    }
}

/// Width and height of a box in board units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// The center of a box of this size, relative to its top-left corner.
    #[must_use]
    pub fn half(self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }
}

/// Pan/zoom placement of the background image on the board.
///
/// `offset` is the board-space position of the image's top-left corner and is
/// unbounded. `scale` always lies in `[MIN_SCALE, MAX_SCALE]` when produced by
/// [`zoom`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    pub offset: Point,
    pub scale: f64,
}

impl Default for MapView {
    fn default() -> Self {
        Self { offset: Point::default(), scale: DEFAULT_SCALE }
    }
}

impl MapView {
    /// Convert a board-space point to map coordinates.
    #[must_use]
    pub fn board_to_map(&self, board: Point) -> Point {
        Point::new((board.x - self.offset.x) / self.scale, (board.y - self.offset.y) / self.scale)
    }

    /// Convert a map-space point to board coordinates.
    #[must_use]
    pub fn map_to_board(&self, map: Point) -> Point {
        Point::new(map.x * self.scale + self.offset.x, map.y * self.scale + self.offset.y)
    }
}

/// Result of a [`zoom`]: the new view plus the change that was actually applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomOutcome {
    pub view: MapView,
    /// Post-clamp scale delta (`new.scale - old.scale`).
    pub applied: f64,
    /// `new.scale / old.scale`; `1.0` when nothing changed.
    pub factor: f64,
}

impl ZoomOutcome {
    /// Whether the zoom changed the scale at all.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.applied.abs() > 0.0
    }
}

/// Translate the view by `delta`. Panning is never clamped.
#[must_use]
pub fn pan(view: MapView, delta: Point) -> MapView {
    MapView { offset: view.offset + delta, scale: view.scale }
}

/// Add `delta_scale` to the view's scale and clamp to `[MIN_SCALE, MAX_SCALE]`.
///
/// A NaN delta leaves the view untouched. Infinite deltas saturate at a bound.
#[must_use]
pub fn zoom(view: MapView, delta_scale: f64) -> ZoomOutcome {
    let old = view.scale;
    if delta_scale.is_nan() {
        return ZoomOutcome { view, applied: 0.0, factor: 1.0 };
    }
    let new = (old + delta_scale).clamp(MIN_SCALE, MAX_SCALE);
    ZoomOutcome {
        view: MapView { offset: view.offset, scale: new },
        applied: new - old,
        factor: new / old,
    }
}

/// Reposition a token after a zoom so its anchor keeps the same map-relative spot.
///
/// Per axis: `new = (old + anchor - offset) * factor + offset - anchor`, with
/// `factor = new_view.scale / old_view.scale`. The zoom center is the map
/// origin, not the pointer.
#[must_use]
pub fn rescale_about_map(position: Point, anchor: Point, old_view: &MapView, new_view: &MapView) -> Point {
    let factor = new_view.scale / old_view.scale;
    let origin = new_view.offset;
    Point::new(
        (position.x + anchor.x - origin.x) * factor + origin.x - anchor.x,
        (position.y + anchor.y - origin.y) * factor + origin.y - anchor.y,
    )
}

/// Offset that centers a background of size `image` on a board of size `board`.
#[must_use]
pub fn centered_offset(board: Size, image: Size) -> Point {
    Point::new((board.width - image.width) / 2.0, (board.height - image.height) / 2.0)
}

/// Bring a persisted scale into `[MIN_SCALE, MAX_SCALE]`; non-finite values fall back to the default.
#[must_use]
pub fn clamp_scale(scale: f64) -> f64 {
    if scale.is_finite() { scale.clamp(MIN_SCALE, MAX_SCALE) } else { DEFAULT_SCALE }
}
