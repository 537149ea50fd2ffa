// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plane rotation and reflection.

use crate::geometry::Size;

bitflags::bitflags! {
    /// A plane's `rotation` bitmask.
    ///
    /// Bit positions match the kernel's `DRM_MODE_ROTATE_*` and
    /// `DRM_MODE_REFLECT_*` values, so the bits are pushed to the kernel
    /// unchanged.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PlaneTransformation: u32 {
        /// No rotation.
        const ROTATE_0 = 1 << 0;
        /// Rotated by 90 degrees counter-clockwise.
        const ROTATE_90 = 1 << 1;
        /// Rotated by 180 degrees.
        const ROTATE_180 = 1 << 2;
        /// Rotated by 270 degrees counter-clockwise.
        const ROTATE_270 = 1 << 3;
        /// Mirrored along the x axis.
        const REFLECT_X = 1 << 4;
        /// Mirrored along the y axis.
        const REFLECT_Y = 1 << 5;
    }
}

impl Default for PlaneTransformation {
    fn default() -> Self {
        Self::ROTATE_0
    }
}

impl PlaneTransformation {
    /// Enum entry names the kernel uses for each bit, in bit order.
    pub const KERNEL_NAMES: [(&'static str, Self); 6] = [
        ("rotate-0", Self::ROTATE_0),
        ("rotate-90", Self::ROTATE_90),
        ("rotate-180", Self::ROTATE_180),
        ("rotate-270", Self::ROTATE_270),
        ("reflect-x", Self::REFLECT_X),
        ("reflect-y", Self::REFLECT_Y),
    ];

    /// Returns `true` if the transformation swaps the axes.
    #[must_use]
    pub const fn is_transposing(self) -> bool {
        self.intersects(Self::ROTATE_90.union(Self::ROTATE_270))
    }

    /// Returns the buffer size needed to fill `mode` under this transformation.
    #[must_use]
    pub const fn apply_to(self, mode: Size) -> Size {
        if self.is_transposing() {
            mode.transposed()
        } else {
            mode
        }
    }

    /// Returns the bitmask as a property value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.bits() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turns_transpose() {
        let mode = Size::new(1920, 1080);
        assert_eq!(PlaneTransformation::ROTATE_90.apply_to(mode), Size::new(1080, 1920));
        assert_eq!(PlaneTransformation::ROTATE_270.apply_to(mode), Size::new(1080, 1920));
    }

    #[test]
    fn half_turns_and_reflections_keep_size() {
        let mode = Size::new(1920, 1080);
        assert_eq!(PlaneTransformation::ROTATE_0.apply_to(mode), mode);
        assert_eq!(PlaneTransformation::ROTATE_180.apply_to(mode), mode);
        let flipped = PlaneTransformation::ROTATE_0 | PlaneTransformation::REFLECT_X;
        assert_eq!(flipped.apply_to(mode), mode);
    }

    #[test]
    fn rotation_with_reflection_still_transposes() {
        let t = PlaneTransformation::ROTATE_90 | PlaneTransformation::REFLECT_Y;
        assert!(t.is_transposing());
    }

    #[test]
    fn default_is_identity() {
        assert_eq!(PlaneTransformation::default(), PlaneTransformation::ROTATE_0);
        assert_eq!(PlaneTransformation::default().value(), 1);
    }
}
