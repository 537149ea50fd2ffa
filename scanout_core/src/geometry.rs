// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer pixel geometry.
//!
//! Kernel mode-setting works in whole pixels, so sizes, points and rects here
//! are integers. Overlap tests convert to [`kurbo::Rect`].

/// A size in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// A zero size.
    pub const ZERO: Self = Self::new(0, 0);

    /// Creates a size.
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the size with width and height swapped.
    #[inline]
    #[must_use]
    pub const fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Returns `true` if either dimension is zero.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns `true` if `self` fits inside `other` in both dimensions.
    #[inline]
    #[must_use]
    pub const fn fits_within(self, other: Self) -> bool {
        self.width <= other.width && self.height <= other.height
    }
}

/// A position in pixels. May be negative (a cursor partly off-screen).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

impl Point {
    /// The origin.
    pub const ORIGIN: Self = Self::new(0, 0);

    /// Creates a point.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Top-left corner.
    pub origin: Point,
    /// Extent.
    pub size: Size,
}

impl Rect {
    /// Creates a rect from an origin and a size.
    #[inline]
    #[must_use]
    pub const fn new(origin: Point, size: Size) -> Self {
        Self { origin, size }
    }

    /// Creates a rect at the origin.
    #[inline]
    #[must_use]
    pub const fn from_size(size: Size) -> Self {
        Self::new(Point::ORIGIN, size)
    }

    /// Returns `true` if the two rects share a non-empty area.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        if self.size.is_empty() || other.size.is_empty() {
            return false;
        }
        let overlap = kurbo::Rect::from(self).intersect(kurbo::Rect::from(other));
        overlap.area() > 0.0
    }
}

impl From<Rect> for kurbo::Rect {
    fn from(r: Rect) -> Self {
        Self::from_origin_size(
            (f64::from(r.origin.x), f64::from(r.origin.y)),
            (f64::from(r.size.width), f64::from(r.size.height)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposed_swaps_dimensions() {
        assert_eq!(Size::new(1920, 1080).transposed(), Size::new(1080, 1920));
    }

    #[test]
    fn overlapping_rects_intersect() {
        let screen = Rect::from_size(Size::new(1920, 1080));
        let cursor = Rect::new(Point::new(100, 100), Size::new(64, 64));
        assert!(cursor.intersects(screen));
    }

    #[test]
    fn edge_touching_rects_do_not_intersect() {
        let screen = Rect::from_size(Size::new(1920, 1080));
        let right = Rect::new(Point::new(1920, 0), Size::new(64, 64));
        let above = Rect::new(Point::new(0, -64), Size::new(64, 64));
        assert!(!right.intersects(screen), "touching the right edge is outside");
        assert!(!above.intersects(screen), "touching the top edge is outside");
    }

    #[test]
    fn partially_offscreen_rect_intersects() {
        let screen = Rect::from_size(Size::new(1920, 1080));
        let cursor = Rect::new(Point::new(-32, -32), Size::new(64, 64));
        assert!(cursor.intersects(screen));
    }

    #[test]
    fn empty_rect_never_intersects() {
        let screen = Rect::from_size(Size::new(1920, 1080));
        assert!(!Rect::from_size(Size::ZERO).intersects(screen));
    }

    #[test]
    fn fits_within_checks_both_axes() {
        assert!(Size::new(64, 64).fits_within(Size::new(64, 64)));
        assert!(!Size::new(65, 10).fits_within(Size::new(64, 64)));
    }
}
