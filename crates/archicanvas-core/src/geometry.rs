#![forbid(unsafe_code)]

//! World-space geometric primitives.
//!
//! All coordinates are `f64` world units (the diagram's own coordinate space,
//! independent of pan and zoom). Boxes are immutable values: every operation
//! returns a new box.
//!
//! # Intersection semantics
//!
//! [`AxisAlignedBox::intersects`] uses closed intervals on both axes. Boxes
//! that merely touch along an edge intersect, and a zero-area box (a point or
//! a degenerate line) intersects any box that contains it. This keeps point
//! items visible to rectangle queries without a separate code path.

use serde::{Deserialize, Serialize};

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Whether both coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A width/height pair, used for container sizes in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    /// Create a new size.
    #[inline]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Whether the size is finite and non-negative on both axes.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width >= 0.0 && self.height >= 0.0
    }
}

/// An axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisAlignedBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width (never negative for a valid box).
    pub width: f64,
    /// Height (never negative for a valid box).
    pub height: f64,
}

impl AxisAlignedBox {
    /// Create a new box. No validation is performed; see [`Self::is_valid`].
    #[inline]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Zero-area box at a point.
    #[inline]
    pub const fn from_point(p: Point) -> Self {
        Self::new(p.x, p.y, 0.0, 0.0)
    }

    /// Smallest box containing both corner points, in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    /// Bounds of the segment `a`–`b` padded by `padding` on every side.
    ///
    /// Connections are indexed with this box so that a thin horizontal or
    /// vertical edge still has some area to hit.
    pub fn from_segment(a: Point, b: Point, padding: f64) -> Self {
        Self::from_corners(a, b).expand(padding.max(0.0))
    }

    /// Right edge.
    #[inline]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[inline]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Center point.
    #[inline]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Area in square world units.
    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Whether the box has zero width or zero height.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.width == 0.0 || self.height == 0.0
    }

    /// Finite coordinates and non-negative extent.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Closed-interval containment test.
    #[inline]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains_box(&self, other: &AxisAlignedBox) -> bool {
        other.x >= self.x
            && other.right() <= self.right()
            && other.y >= self.y
            && other.bottom() <= self.bottom()
    }

    /// Closed-interval overlap test (touching edges intersect).
    #[inline]
    pub fn intersects(&self, other: &AxisAlignedBox) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &AxisAlignedBox) -> AxisAlignedBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        AxisAlignedBox::new(x, y, right - x, bottom - y)
    }

    /// Grow the box by `margin` on every side. Negative margins shrink it,
    /// clamping the extent at zero around the original center.
    pub fn expand(&self, margin: f64) -> AxisAlignedBox {
        let width = self.width + 2.0 * margin;
        let height = self.height + 2.0 * margin;
        if width < 0.0 || height < 0.0 {
            let c = self.center();
            let w = width.max(0.0);
            let h = height.max(0.0);
            return AxisAlignedBox::new(c.x - w / 2.0, c.y - h / 2.0, w, h);
        }
        AxisAlignedBox::new(self.x - margin, self.y - margin, width, height)
    }

    /// Union of all boxes in the iterator, or `None` when it is empty.
    pub fn union_all<I>(boxes: I) -> Option<AxisAlignedBox>
    where
        I: IntoIterator<Item = AxisAlignedBox>,
    {
        boxes.into_iter().reduce(|acc, b| acc.union(&b))
    }
}
