// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-channel gamma lookup tables.

use alloc::vec::Vec;

/// A gamma ramp: one 16-bit lookup table per color channel.
///
/// All three channels always have the same length, which must match the
/// CRTC's gamma size for the ramp to be accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GammaRamp {
    red: Vec<u16>,
    green: Vec<u16>,
    blue: Vec<u16>,
}

impl GammaRamp {
    /// Builds a ramp from three channel tables.
    ///
    /// Returns `None` if the channels differ in length or are empty.
    #[must_use]
    pub fn new(red: Vec<u16>, green: Vec<u16>, blue: Vec<u16>) -> Option<Self> {
        if red.is_empty() || red.len() != green.len() || red.len() != blue.len() {
            return None;
        }
        Some(Self { red, green, blue })
    }

    /// Builds an identity ramp with `size` entries per channel.
    #[must_use]
    pub fn linear(size: usize) -> Self {
        let table: Vec<u16> = (0..size)
            .map(|i| {
                if size <= 1 {
                    return u16::MAX;
                }
                let scaled = i as u64 * u64::from(u16::MAX) / (size as u64 - 1);
                u16::try_from(scaled).unwrap_or(u16::MAX)
            })
            .collect();
        Self {
            red: table.clone(),
            green: table.clone(),
            blue: table,
        }
    }

    /// Returns the number of entries per channel.
    #[must_use]
    pub fn size(&self) -> usize {
        self.red.len()
    }

    /// Returns the red channel.
    #[must_use]
    pub fn red(&self) -> &[u16] {
        &self.red
    }

    /// Returns the green channel.
    #[must_use]
    pub fn green(&self) -> &[u16] {
        &self.green
    }

    /// Returns the blue channel.
    #[must_use]
    pub fn blue(&self) -> &[u16] {
        &self.blue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn mismatched_channels_are_rejected() {
        assert!(GammaRamp::new(vec![0, 1], vec![0, 1], vec![0]).is_none());
        assert!(GammaRamp::new(vec![], vec![], vec![]).is_none());
    }

    #[test]
    fn linear_ramp_spans_full_range() {
        let ramp = GammaRamp::linear(1024);
        assert_eq!(ramp.size(), 1024);
        assert_eq!(ramp.red()[0], 0);
        assert_eq!(ramp.red()[1023], u16::MAX);
        assert_eq!(ramp.red(), ramp.blue());
        assert!(ramp.green().windows(2).all(|w| w[0] <= w[1]), "ramp is monotonic");
    }
}
