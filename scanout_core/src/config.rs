// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU configuration.

/// Default capacity of the output event queue.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for a [`Gpu`](crate::gpu::Gpu).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuConfig {
    /// Use the legacy strategy even when atomic mode-setting is available.
    pub force_legacy: bool,
    /// Capacity of the output event queue. When full, the oldest event is
    /// dropped.
    pub event_capacity: usize,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuConfig {
    /// Picks the strategy from the device's capabilities.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            force_legacy: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Always uses the legacy strategy.
    #[must_use]
    pub const fn legacy() -> Self {
        Self {
            force_legacy: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the output event queue capacity (at least 1).
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Reads overrides from the environment.
    ///
    /// `SCANOUT_NO_ATOMIC=1` forces the legacy strategy.
    #[cfg(feature = "std")]
    #[must_use]
    pub fn from_env() -> Self {
        extern crate std;
        Self::with_no_atomic(std::env::var("SCANOUT_NO_ATOMIC").ok().as_deref())
    }

    #[cfg(any(test, feature = "std"))]
    fn with_no_atomic(value: Option<&str>) -> Self {
        Self {
            force_legacy: value == Some("1"),
            ..Self::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert!(!GpuConfig::new().force_legacy);
        assert!(GpuConfig::legacy().force_legacy);
        assert_eq!(GpuConfig::default(), GpuConfig::new());
    }

    #[test]
    fn no_atomic_override() {
        assert!(GpuConfig::with_no_atomic(Some("1")).force_legacy);
        assert!(!GpuConfig::with_no_atomic(Some("0")).force_legacy);
        assert!(!GpuConfig::with_no_atomic(None).force_legacy);
    }

    #[cfg(feature = "std")]
    #[test]
    fn from_env_keeps_the_defaults() {
        let config = GpuConfig::from_env();
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn event_capacity_is_at_least_one() {
        assert_eq!(GpuConfig::new().with_event_capacity(0).event_capacity, 1);
        assert_eq!(GpuConfig::new().with_event_capacity(8).event_capacity, 8);
    }
}
