// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel mode-setting device contract.
//!
//! [`Device`] is the only seam between the engine and the kernel. A real
//! implementation wraps a DRM file descriptor and issues ioctls; the
//! `scanout_mock` crate provides an in-memory one for tests.
//!
//! The trait covers four areas:
//!
//! - **Discovery**: capabilities, resources, per-object info and
//!   properties. Called when a [`Gpu`](crate::gpu::Gpu) is created and on
//!   hotplug.
//! - **Resources**: property blobs, dumb buffers and framebuffer
//!   registrations.
//! - **Commit**: [`atomic_commit`](Device::atomic_commit) for the atomic
//!   path, and the per-concern legacy calls (`set_crtc`, `page_flip`,
//!   `set_gamma`, cursor calls, `set_property`).
//! - **Events**: [`read_events`](Device::read_events) drains page-flip
//!   completions.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::format::{FormatTable, Fourcc, Modifier};
use crate::gamma::GammaRamp;
use crate::geometry::{Point, Size};
use crate::id::{BlobId, FramebufferId, GemHandle, ObjectId, PropertyId};
use crate::request::{AtomicRequest, CommitFlags};
use crate::time::HostTime;

/// Errors reported by a [`Device`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceError {
    /// The driver does not implement the call (`ENOTSUP`/`EOPNOTSUPP`).
    NotSupported,
    /// The kernel rejected the arguments or configuration (`EINVAL`).
    InvalidArgument,
    /// The object is busy, e.g. a flip is already queued (`EBUSY`).
    Busy,
    /// The caller is not DRM master (`EACCES`).
    PermissionDenied,
    /// An object id does not exist (`ENOENT`).
    NoSuchObject,
    /// The kernel ran out of memory (`ENOMEM`).
    OutOfMemory,
    /// Any other errno.
    Os(i32),
}

impl DeviceError {
    /// Maps a positive errno value.
    #[must_use]
    pub const fn from_errno(errno: i32) -> Self {
        match errno {
            95 => Self::NotSupported,
            22 => Self::InvalidArgument,
            16 => Self::Busy,
            13 => Self::PermissionDenied,
            2 => Self::NoSuchObject,
            12 => Self::OutOfMemory,
            other => Self::Os(other),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported => f.write_str("operation not supported by the driver"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::Busy => f.write_str("device or resource busy"),
            Self::PermissionDenied => f.write_str("permission denied (not DRM master)"),
            Self::NoSuchObject => f.write_str("no such mode-setting object"),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::Os(errno) => write!(f, "kernel error (errno {errno})"),
        }
    }
}

impl core::error::Error for DeviceError {}

/// Device-wide capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCaps {
    /// The driver offers the atomic client capability.
    pub atomic: bool,
    /// Largest cursor image the legacy cursor API accepts.
    pub cursor_size: Size,
    /// Framebuffers may carry explicit modifiers.
    pub addfb_modifiers: bool,
}

/// Top-level object lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    /// Connector ids.
    pub connectors: Vec<ObjectId>,
    /// CRTC ids, in pipe order.
    pub crtcs: Vec<ObjectId>,
}

/// How a property's value is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Unsigned integer range.
    Range,
    /// Signed integer range.
    SignedRange,
    /// One of a list of named values.
    Enum,
    /// A set of named bits; enum entries carry bit positions.
    Bitmask,
    /// A blob id.
    Blob,
    /// A kernel object id.
    Object,
}

/// A named value of an enum or bitmask property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumEntry {
    /// Name as reported by the kernel.
    pub name: String,
    /// Value (enum) or bit position (bitmask).
    pub value: u64,
}

/// A property as reported by the kernel for one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Property id.
    pub id: PropertyId,
    /// Property name.
    pub name: String,
    /// Current value.
    pub value: u64,
    /// The property cannot be written.
    pub immutable: bool,
    /// Value interpretation.
    pub kind: PropertyKind,
    /// Named values for enum and bitmask properties.
    pub enums: Vec<EnumEntry>,
}

/// A display mode.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModeInfo {
    /// Visible size.
    pub size: Size,
    /// Refresh rate in millihertz.
    pub refresh_mhz: u32,
    /// Pixel clock in kHz.
    pub clock_khz: u32,
    /// The sink marks this mode as preferred.
    pub preferred: bool,
    /// Mode name, e.g. `1920x1080`.
    pub name: String,
}

/// Connector state as reported by the kernel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// A sink is attached.
    pub connected: bool,
    /// Modes the sink advertises.
    pub modes: Vec<ModeInfo>,
    /// Bitmask of CRTC pipe indices this connector can be driven by.
    pub possible_crtcs: u32,
}

/// CRTC state as reported by the kernel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrtcInfo {
    /// Mode currently programmed, if the CRTC is enabled.
    pub mode: Option<ModeInfo>,
    /// Legacy gamma table size.
    pub gamma_size: u32,
}

/// Plane state as reported by the kernel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Bitmask of CRTC pipe indices this plane can be attached to.
    pub possible_crtcs: u32,
    /// Formats and modifiers the plane scans out.
    pub formats: FormatTable,
}

/// Data for a property blob.
#[derive(Clone, Copy, Debug)]
pub enum BlobData<'a> {
    /// A `MODE_ID` blob.
    Mode(&'a ModeInfo),
    /// A `GAMMA_LUT` blob.
    GammaLut(&'a GammaRamp),
}

/// A CPU-mappable buffer allocated on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DumbBuffer {
    /// Allocation handle.
    pub handle: GemHandle,
    /// Bytes per row.
    pub pitch: u32,
    /// Size in pixels.
    pub size: Size,
    /// Pixel format.
    pub format: Fourcc,
}

/// Everything needed to register a framebuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferDesc {
    /// Backing allocation.
    pub handle: GemHandle,
    /// Size in pixels.
    pub size: Size,
    /// Pixel format.
    pub format: Fourcc,
    /// Layout modifier.
    pub modifier: Modifier,
    /// Bytes per row.
    pub pitch: u32,
}

/// A cursor image for the legacy cursor API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorImage {
    /// Backing allocation.
    pub handle: GemHandle,
    /// Size in pixels.
    pub size: Size,
}

/// An event read from the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A flip requested with [`CommitFlags::PAGE_FLIP_EVENT`] completed.
    PageFlip {
        /// CRTC that flipped.
        crtc: ObjectId,
        /// Vblank sequence number.
        sequence: u32,
        /// When the new frame started scanning out.
        timestamp: HostTime,
    },
    /// A queued flip will never complete (device lost, CRTC reset).
    FlipAborted {
        /// CRTC whose flip was dropped.
        crtc: ObjectId,
    },
}

/// The kernel mode-setting interface used by the engine.
pub trait Device {
    /// Returns device-wide capabilities.
    fn capabilities(&self) -> DeviceCaps;

    /// Enables the atomic (and universal planes) client capability.
    fn enable_atomic(&mut self) -> Result<(), DeviceError>;

    /// Lists connectors and CRTCs.
    fn resources(&self) -> Result<Resources, DeviceError>;

    /// Lists planes. Only meaningful after [`enable_atomic`](Self::enable_atomic).
    fn planes(&self) -> Result<Vec<ObjectId>, DeviceError>;

    /// Probes a connector.
    fn connector(&self, id: ObjectId) -> Result<ConnectorInfo, DeviceError>;

    /// Queries a CRTC.
    fn crtc(&self, id: ObjectId) -> Result<CrtcInfo, DeviceError>;

    /// Queries a plane.
    fn plane(&self, id: ObjectId) -> Result<PlaneInfo, DeviceError>;

    /// Returns an object's properties with their current values.
    fn properties(&self, id: ObjectId) -> Result<Vec<PropertyInfo>, DeviceError>;

    /// Creates a property blob.
    fn create_blob(&mut self, data: BlobData<'_>) -> Result<BlobId, DeviceError>;

    /// Destroys a property blob.
    fn destroy_blob(&mut self, blob: BlobId) -> Result<(), DeviceError>;

    /// Allocates a dumb buffer.
    fn create_dumb_buffer(&mut self, size: Size, format: Fourcc)
    -> Result<DumbBuffer, DeviceError>;

    /// Frees a dumb buffer.
    fn destroy_dumb_buffer(&mut self, handle: GemHandle) -> Result<(), DeviceError>;

    /// Registers a framebuffer for scan-out.
    fn add_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError>;

    /// Unregisters a framebuffer.
    fn remove_framebuffer(&mut self, fb: FramebufferId) -> Result<(), DeviceError>;

    /// Submits an atomic request.
    fn atomic_commit(
        &mut self,
        request: &AtomicRequest,
        flags: CommitFlags,
    ) -> Result<(), DeviceError>;

    /// Legacy full mode set. `fb` and `mode` of `None` disable the CRTC.
    fn set_crtc(
        &mut self,
        crtc: ObjectId,
        fb: Option<FramebufferId>,
        position: Point,
        connectors: &[ObjectId],
        mode: Option<&ModeInfo>,
    ) -> Result<(), DeviceError>;

    /// Legacy framebuffer swap.
    fn page_flip(
        &mut self,
        crtc: ObjectId,
        fb: FramebufferId,
        flags: CommitFlags,
    ) -> Result<(), DeviceError>;

    /// Sets (or with `None`, hides) the cursor image with a hotspot.
    fn set_cursor2(
        &mut self,
        crtc: ObjectId,
        image: Option<CursorImage>,
        hotspot: Point,
    ) -> Result<(), DeviceError>;

    /// Sets (or with `None`, hides) the cursor image without a hotspot.
    fn set_cursor(&mut self, crtc: ObjectId, image: Option<CursorImage>)
    -> Result<(), DeviceError>;

    /// Moves the cursor.
    fn move_cursor(&mut self, crtc: ObjectId, position: Point) -> Result<(), DeviceError>;

    /// Legacy gamma ramp upload.
    fn set_gamma(&mut self, crtc: ObjectId, ramp: &GammaRamp) -> Result<(), DeviceError>;

    /// Legacy single-property write.
    fn set_property(
        &mut self,
        object: ObjectId,
        property: PropertyId,
        value: u64,
    ) -> Result<(), DeviceError>;

    /// Appends pending events to `events`. Does not block.
    fn read_events(&mut self, events: &mut Vec<DeviceEvent>) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn errno_mapping() {
        assert_eq!(DeviceError::from_errno(22), DeviceError::InvalidArgument);
        assert_eq!(DeviceError::from_errno(95), DeviceError::NotSupported);
        assert_eq!(DeviceError::from_errno(5), DeviceError::Os(5));
    }

    #[test]
    fn display_mentions_errno_for_unknown_errors() {
        assert_eq!(DeviceError::Os(5).to_string(), "kernel error (errno 5)");
    }
}
