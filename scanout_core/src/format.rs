// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pixel formats, modifiers and per-plane format tables.

use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

/// A four-character pixel format code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    /// 32-bit RGB with an ignored alpha byte.
    pub const XRGB8888: Self = Self::from_chars(*b"XR24");
    /// 32-bit RGB with alpha.
    pub const ARGB8888: Self = Self::from_chars(*b"AR24");
    /// 32-bit BGR with an ignored alpha byte.
    pub const XBGR8888: Self = Self::from_chars(*b"XB24");
    /// 32-bit BGR with alpha.
    pub const ABGR8888: Self = Self::from_chars(*b"AB24");

    /// Builds a code from its four characters.
    #[must_use]
    pub const fn from_chars(c: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(c))
    }

    /// Returns the four characters.
    #[must_use]
    pub const fn chars(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.chars();
        if [a, b, c, d].iter().all(u8::is_ascii_graphic) {
            write!(
                f,
                "Fourcc({}{}{}{})",
                char::from(a),
                char::from(b),
                char::from(c),
                char::from(d)
            )
        } else {
            write!(f, "Fourcc({:#010x})", self.0)
        }
    }
}

/// A buffer layout modifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Modifier(pub u64);

impl Modifier {
    /// Plain row-major layout.
    pub const LINEAR: Self = Self(0);
    /// "No explicit modifier"; the driver picks an implicit layout.
    pub const INVALID: Self = Self(0x00ff_ffff_ffff_ffff);
}

/// Supported formats and, per format, the modifiers scan-out accepts.
///
/// An empty modifier list means "any implicit modifier", which is what the
/// legacy path and planes without `IN_FORMATS` report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormatTable {
    formats: HashMap<Fourcc, Vec<Modifier>>,
}

impl FormatTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed table used when planes are not individually negotiated.
    #[must_use]
    pub fn legacy() -> Self {
        let mut table = Self::new();
        table.insert(Fourcc::XRGB8888, Vec::new());
        table.insert(Fourcc::ARGB8888, Vec::new());
        table
    }

    /// Adds a format with its modifier list, replacing any previous entry.
    pub fn insert(&mut self, format: Fourcc, modifiers: Vec<Modifier>) {
        self.formats.insert(format, modifiers);
    }

    /// Returns whether `format` can be scanned out at all.
    #[must_use]
    pub fn is_format_supported(&self, format: Fourcc) -> bool {
        self.formats.contains_key(&format)
    }

    /// Returns the modifiers accepted for `format` (empty if unsupported or
    /// implicit).
    #[must_use]
    pub fn supported_modifiers(&self, format: Fourcc) -> &[Modifier] {
        self.formats.get(&format).map_or(&[], Vec::as_slice)
    }

    /// Returns whether a buffer of `format` with `modifier` can be scanned out.
    #[must_use]
    pub fn accepts(&self, format: Fourcc, modifier: Modifier) -> bool {
        match self.formats.get(&format) {
            Some(mods) => mods.is_empty() || mods.contains(&modifier),
            None => false,
        }
    }

    /// Returns the number of formats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Returns `true` if no format is supported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Iterates formats in ascending code order.
    pub fn formats(&self) -> impl Iterator<Item = Fourcc> {
        let mut codes: Vec<Fourcc> = self.formats.keys().copied().collect();
        codes.sort_unstable();
        codes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{format, vec};

    #[test]
    fn fourcc_matches_kernel_codes() {
        assert_eq!(Fourcc::XRGB8888.0, 0x3432_5258);
        assert_eq!(Fourcc::ARGB8888.0, 0x3432_5241);
        assert_eq!(format!("{:?}", Fourcc::XRGB8888), "Fourcc(XR24)");
    }

    #[test]
    fn legacy_table_has_two_formats_without_modifiers() {
        let table = FormatTable::legacy();
        assert_eq!(table.len(), 2);
        assert!(table.is_format_supported(Fourcc::XRGB8888));
        assert!(table.is_format_supported(Fourcc::ARGB8888));
        assert!(!table.is_format_supported(Fourcc::XBGR8888));
        assert!(table.supported_modifiers(Fourcc::XRGB8888).is_empty());
        assert!(table.accepts(Fourcc::XRGB8888, Modifier(0x1234)));
    }

    #[test]
    fn explicit_modifiers_restrict_acceptance() {
        let mut table = FormatTable::new();
        table.insert(Fourcc::XRGB8888, vec![Modifier::LINEAR]);
        assert!(table.accepts(Fourcc::XRGB8888, Modifier::LINEAR));
        assert!(!table.accepts(Fourcc::XRGB8888, Modifier(0x0100_0000_0000_0001)));
        assert!(!table.accepts(Fourcc::ARGB8888, Modifier::LINEAR));
    }

    #[test]
    fn unsupported_format_has_no_modifiers() {
        assert!(FormatTable::new().supported_modifiers(Fourcc::ABGR8888).is_empty());
    }
}
