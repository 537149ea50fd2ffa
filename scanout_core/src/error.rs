// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors returned by pipeline and transaction operations.
//!
//! Every fallible public operation returns [`CommitError`]. When one is
//! returned, no pending state staged by that operation survives: the
//! operation's journal has been rolled back. The only exception is the
//! legacy path, where kernel calls that already succeeded stay applied
//! (see [`CommitError::Legacy`]).

use core::fmt;

use crate::device::DeviceError;

/// A capability or argument check that failed before any kernel call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CapabilityError {
    /// Overscan must be within `0..=100`.
    OverscanOutOfRange(u32),
    /// The connector has neither an `overscan` nor an `underscan` property.
    NoOverscanProperty,
    /// The connector has no `Broadcast RGB` property.
    NoRgbRangeProperty,
    /// The `Broadcast RGB` property lacks the requested value.
    UnsupportedRgbRange,
    /// Variable refresh is not available on this pipeline.
    NoVrr,
    /// The CRTC has no `GAMMA_LUT` property.
    NoGammaLut,
    /// The ramp size does not match the CRTC's gamma size.
    GammaSizeMismatch {
        /// Entries the CRTC expects.
        expected: u32,
        /// Entries supplied.
        actual: usize,
    },
    /// The plane cannot apply the requested rotation or reflection.
    UnsupportedTransformation,
    /// The operation needs atomic mode-setting.
    LegacyUnsupported,
    /// The connector has no mode at this index.
    ModeOutOfRange(usize),
    /// The buffer's size, format or modifier cannot be scanned out here.
    BufferMismatch,
    /// The cursor image exceeds the device's cursor size.
    CursorTooLarge,
    /// The pipeline has no primary plane.
    NoPrimaryPlane,
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverscanOutOfRange(v) => write!(f, "overscan {v} is outside 0..=100"),
            Self::NoOverscanProperty => f.write_str("connector does not support overscan"),
            Self::NoRgbRangeProperty => f.write_str("connector does not support RGB range"),
            Self::UnsupportedRgbRange => f.write_str("RGB range value not offered by the driver"),
            Self::NoVrr => f.write_str("variable refresh is not supported"),
            Self::NoGammaLut => f.write_str("CRTC has no GAMMA_LUT property"),
            Self::GammaSizeMismatch { expected, actual } => {
                write!(f, "gamma ramp has {actual} entries, CRTC expects {expected}")
            }
            Self::UnsupportedTransformation => f.write_str("plane does not support transformation"),
            Self::LegacyUnsupported => f.write_str("operation requires atomic mode-setting"),
            Self::ModeOutOfRange(i) => write!(f, "connector has no mode {i}"),
            Self::BufferMismatch => f.write_str("buffer does not match the pipeline"),
            Self::CursorTooLarge => f.write_str("cursor image exceeds the cursor size"),
            Self::NoPrimaryPlane => f.write_str("pipeline has no primary plane"),
        }
    }
}

impl core::error::Error for CapabilityError {}

/// A legacy ioctl step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LegacyStep {
    /// DPMS power change.
    Dpms,
    /// `SetCrtc` mode set.
    Modeset,
    /// A connector property write.
    Property,
    /// Gamma ramp upload.
    Gamma,
    /// Page flip.
    PageFlip,
    /// Cursor image or position.
    Cursor,
}

impl LegacyStep {
    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dpms => "dpms",
            Self::Modeset => "modeset",
            Self::Property => "property",
            Self::Gamma => "gamma",
            Self::PageFlip => "page flip",
            Self::Cursor => "cursor",
        }
    }
}

/// Failure of a pipeline or transaction operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitError {
    /// Rejected locally; the kernel was not called.
    Capability(CapabilityError),
    /// The kernel rejected the test-only request.
    Validation(DeviceError),
    /// The kernel rejected a request that had passed its test.
    Commit(DeviceError),
    /// A legacy step failed. Steps before it on the same pipeline stay
    /// applied.
    Legacy {
        /// Step that failed.
        step: LegacyStep,
        /// Kernel error.
        error: DeviceError,
    },
    /// The previous page flip has not completed yet.
    FlipPending,
    /// The pipeline was explicitly deactivated.
    Inactive,
    /// Allocating a test buffer or property blob failed.
    Allocation(DeviceError),
}

impl CommitError {
    /// The error came from a local check.
    #[must_use]
    pub const fn is_capability(&self) -> bool {
        matches!(self, Self::Capability(_))
    }
}

impl From<CapabilityError> for CommitError {
    fn from(err: CapabilityError) -> Self {
        Self::Capability(err)
    }
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capability(err) => write!(f, "capability check failed: {err}"),
            Self::Validation(err) => write!(f, "kernel rejected test commit: {err}"),
            Self::Commit(err) => write!(f, "kernel rejected tested commit: {err}"),
            Self::Legacy { step, error } => write!(f, "legacy {} failed: {error}", step.name()),
            Self::FlipPending => f.write_str("a page flip is still pending"),
            Self::Inactive => f.write_str("pipeline is inactive"),
            Self::Allocation(err) => write!(f, "allocation failed: {err}"),
        }
    }
}

impl core::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Capability(err) => Some(err),
            Self::Validation(err) | Self::Commit(err) | Self::Allocation(err) => Some(err),
            Self::Legacy { error, .. } => Some(error),
            Self::FlipPending | Self::Inactive => None,
        }
    }
}
