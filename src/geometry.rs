use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Where an embedded image (or a merged group of them) sits on a page.
///
/// Top-left origin, `y` growing downward, like a rendered page bitmap. A `PlacementRect` is
/// never degenerate: `x1 > x0` and `y1 > y0` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PlacementRect {
    /// Build a rectangle from its corners, returning `None` when it has no area
    /// or a coordinate is not finite.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Option<Self> {
        let finite = [x0, y0, x1, y1].iter().all(|v| v.is_finite());
        if finite && x1 > x0 && y1 > y0 {
            Some(Self { x0, y0, x1, y1 })
        } else {
            None
        }
    }

    /// Build a rectangle from any two opposite corners.
    pub fn from_corners(a: (f32, f32), b: (f32, f32)) -> Option<Self> {
        Self::new(a.0.min(b.0), a.1.min(b.1), a.0.max(b.0), a.1.max(b.1))
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Ratio of the longer side to the shorter one; the shorter side is floored at one unit
    /// so hairline rectangles report a large but finite ratio.
    pub fn aspect_ratio(&self) -> f32 {
        let (w, h) = (self.width(), self.height());
        w.max(h) / w.min(h).max(1.0)
    }

    /// Smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.x0 <= other.x0 && self.y0 <= other.y0 && self.x1 >= other.x1 && self.y1 >= other.y1
    }

    /// Proximity test used for clustering: both the horizontal and the vertical gap between the
    /// rectangles are at most `threshold`. Overlapping rectangles have negative gaps.
    pub fn is_near(&self, other: &Self, threshold: f32) -> bool {
        let x_close = !(self.x1 + threshold < other.x0 || other.x1 + threshold < self.x0);
        let y_close = !(self.y1 + threshold < other.y0 || other.y1 + threshold < self.y0);
        x_close && y_close
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn expand(&self, margin: f32) -> Self {
        Self {
            x0: self.x0 - margin,
            y0: self.y0 - margin,
            x1: self.x1 + margin,
            y1: self.y1 + margin,
        }
    }

    /// Intersection with `bounds`, or `None` when nothing of `self` lies inside them.
    pub fn clip_to(&self, bounds: &Self) -> Option<Self> {
        Self::new(
            self.x0.max(bounds.x0),
            self.y0.max(bounds.y0),
            self.x1.min(bounds.x1),
            self.y1.min(bounds.y1),
        )
    }

    /// Reading order: top edge first, then left edge.
    pub fn reading_order(&self, other: &Self) -> Ordering {
        self.y0
            .total_cmp(&other.y0)
            .then_with(|| self.x0.total_cmp(&other.x0))
    }
}
