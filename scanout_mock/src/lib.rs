// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory kernel mode-setting device.
//!
//! [`MockDevice`] implements [`Device`](scanout_core::device::Device)
//! without a kernel. It keeps connectors, CRTCs and planes with the property
//! sets a typical driver exposes, validates atomic requests the way the
//! kernel does (object and property existence, immutable properties,
//! framebuffer and blob references, the modeset flag) and applies them
//! unless `TEST_ONLY` is set. Legacy calls update the same state.
//!
//! The device is a cheap handle: clones share state, so a test can hand one
//! clone to a [`Gpu`](scanout_core::gpu::Gpu) and keep another to inspect
//! the hardware after the GPU is gone.
//!
//! ```
//! use scanout_core::config::GpuConfig;
//! use scanout_core::gpu::Gpu;
//! use scanout_mock::{MockDevice, mode};
//!
//! let device = MockDevice::new(1);
//! device.add_connector(&[mode(1920, 1080, 60)]);
//! let gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
//! assert_eq!(gpu.pipelines().len(), 1);
//! ```
//!
//! Failures can be injected per request ([`MockDevice::fail_next_commit`],
//! [`MockDevice::fail_next_test`]), per property
//! ([`MockDevice::reject_property`]) and per legacy call
//! ([`MockDevice::fail_legacy`]).

mod device;
mod objects;
#[cfg(test)]
mod scenarios;

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use scanout_core::device::{
    CursorImage, DeviceCaps, DeviceError, DeviceEvent, DumbBuffer, EnumEntry, FramebufferDesc,
    ModeInfo, PropertyInfo, PropertyKind,
};
use scanout_core::format::{FormatTable, Fourcc, Modifier};
use scanout_core::gamma::GammaRamp;
use scanout_core::geometry::{Rect, Size};
use scanout_core::id::{BlobId, FramebufferId, GemHandle, ObjectId, PropertyId};
use scanout_core::object::PlaneType;
use scanout_core::request::{CommitFlags, PropertyWrite};
use scanout_core::time::HostTime;

pub use objects::mode;
use objects::{Ids, MockConnector, MockCrtc, MockPlane};

/// Gamma table size of CRTCs created by [`MockDevice::new`].
pub const DEFAULT_GAMMA_SIZE: u32 = 256;

/// A legacy ioctl, for failure injection and the call log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LegacyCall {
    /// `set_crtc`.
    SetCrtc,
    /// `page_flip`.
    PageFlip,
    /// `set_cursor2`.
    SetCursor2,
    /// `set_cursor`.
    SetCursor,
    /// `move_cursor`.
    MoveCursor,
    /// `set_gamma`.
    SetGamma,
    /// `set_property`.
    SetProperty,
}

/// One atomic request as the device saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    /// Flags the request carried.
    pub flags: CommitFlags,
    /// Property writes in request order.
    pub writes: Vec<PropertyWrite>,
    /// What the device answered.
    pub result: Result<(), DeviceError>,
    /// Number of legacy calls logged before this request.
    pub legacy_calls_before: usize,
}

impl CommitRecord {
    /// The request only validated.
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.flags.contains(CommitFlags::TEST_ONLY)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum MockBlob {
    Mode(ModeInfo),
    GammaLut(GammaRamp),
}

#[derive(Debug)]
pub(crate) struct MockState {
    pub(crate) ids: Ids,
    pub(crate) caps: DeviceCaps,
    pub(crate) atomic_enabled: bool,
    pub(crate) connectors: Vec<MockConnector>,
    pub(crate) crtcs: Vec<MockCrtc>,
    pub(crate) planes: Vec<MockPlane>,
    pub(crate) blobs: HashMap<BlobId, MockBlob>,
    pub(crate) framebuffers: HashMap<FramebufferId, FramebufferDesc>,
    pub(crate) dumb_buffers: HashMap<GemHandle, DumbBuffer>,
    pub(crate) events: Vec<DeviceEvent>,
    pub(crate) clock: HostTime,
    pub(crate) vblank: u32,
    pub(crate) fail_next_commit: Option<DeviceError>,
    pub(crate) fail_next_test: Option<DeviceError>,
    pub(crate) rejected: Vec<String>,
    pub(crate) legacy_failures: HashMap<LegacyCall, DeviceError>,
    pub(crate) cursor2_supported: bool,
    pub(crate) commits: Vec<CommitRecord>,
    pub(crate) legacy_calls: Vec<LegacyCall>,
}

/// Formats every mock plane scans out.
fn default_formats() -> FormatTable {
    let mut formats = FormatTable::new();
    formats.insert(Fourcc::XRGB8888, vec![Modifier::LINEAR]);
    formats.insert(Fourcc::ARGB8888, vec![Modifier::LINEAR]);
    formats
}

fn all_pipes(count: usize) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1_u32 << count) - 1
    }
}

impl MockState {
    fn connector_mut(&mut self, id: ObjectId) -> &mut MockConnector {
        self.connectors
            .iter_mut()
            .find(|c| c.id == id)
            .unwrap_or_else(|| panic!("no mock connector {id:?}"))
    }

    fn crtc(&self, id: ObjectId) -> &MockCrtc {
        self.crtcs
            .iter()
            .find(|c| c.id == id)
            .unwrap_or_else(|| panic!("no mock CRTC {id:?}"))
    }

    fn crtc_mut(&mut self, id: ObjectId) -> &mut MockCrtc {
        self.crtcs
            .iter_mut()
            .find(|c| c.id == id)
            .unwrap_or_else(|| panic!("no mock CRTC {id:?}"))
    }

    pub(crate) fn props(&self, id: ObjectId) -> Option<&Vec<PropertyInfo>> {
        if let Some(c) = self.connectors.iter().find(|c| c.id == id) {
            return Some(&c.props);
        }
        if let Some(c) = self.crtcs.iter().find(|c| c.id == id) {
            return Some(&c.props);
        }
        self.planes.iter().find(|p| p.id == id).map(|p| &p.props)
    }

    pub(crate) fn props_mut(&mut self, id: ObjectId) -> Option<&mut Vec<PropertyInfo>> {
        if let Some(c) = self.connectors.iter_mut().find(|c| c.id == id) {
            return Some(&mut c.props);
        }
        if let Some(c) = self.crtcs.iter_mut().find(|c| c.id == id) {
            return Some(&mut c.props);
        }
        self.planes
            .iter_mut()
            .find(|p| p.id == id)
            .map(|p| &mut p.props)
    }

    fn props_or_panic(&mut self, id: ObjectId) -> &mut Vec<PropertyInfo> {
        self.props_mut(id)
            .unwrap_or_else(|| panic!("no mock object {id:?}"))
    }
}

/// An in-memory mode-setting device. Clones share state.
#[derive(Clone, Debug)]
pub struct MockDevice {
    pub(crate) state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    /// Creates a device with `crtcs` CRTCs, each with its own primary plane.
    ///
    /// The device offers atomic mode-setting, 64x64 cursors and
    /// framebuffer modifiers, and CRTCs have [`DEFAULT_GAMMA_SIZE`] gamma
    /// entries.
    #[must_use]
    pub fn new(crtcs: usize) -> Self {
        Self::with_gamma_size(crtcs, DEFAULT_GAMMA_SIZE)
    }

    /// Like [`new`](Self::new) with a different gamma table size.
    #[must_use]
    pub fn with_gamma_size(crtcs: usize, gamma_size: u32) -> Self {
        let mut ids = Ids::new();
        let mut crtc_list = Vec::with_capacity(crtcs);
        let mut planes = Vec::with_capacity(crtcs);
        for pipe in 0..crtcs {
            crtc_list.push(MockCrtc::new(&mut ids, gamma_size));
            let mask = if pipe < 32 { 1 << pipe } else { 0 };
            planes.push(MockPlane::new(
                &mut ids,
                PlaneType::Primary,
                mask,
                default_formats(),
            ));
        }
        let state = MockState {
            ids,
            caps: DeviceCaps {
                atomic: true,
                cursor_size: Size::new(64, 64),
                addfb_modifiers: true,
            },
            atomic_enabled: false,
            connectors: Vec::new(),
            crtcs: crtc_list,
            planes,
            blobs: HashMap::new(),
            framebuffers: HashMap::new(),
            dumb_buffers: HashMap::new(),
            events: Vec::new(),
            clock: HostTime::from_sec_usec(1, 0),
            vblank: 0,
            fail_next_commit: None,
            fail_next_test: None,
            rejected: Vec::new(),
            legacy_failures: HashMap::new(),
            cursor2_supported: true,
            commits: Vec::new(),
            legacy_calls: Vec::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    // -- Building --

    /// Adds a connected connector that any CRTC can drive. The first mode is
    /// marked preferred.
    pub fn add_connector(&self, modes: &[ModeInfo]) -> ObjectId {
        let mut state = self.state.borrow_mut();
        let possible = all_pipes(state.crtcs.len());
        let mut connector = MockConnector::new(&mut state.ids, possible);
        connector.modes = modes.to_vec();
        if let Some(first) = connector.modes.first_mut() {
            first.preferred = true;
        }
        let id = connector.id;
        state.connectors.push(connector);
        id
    }

    /// Appends a mode to a connector.
    ///
    /// # Panics
    ///
    /// Panics if the connector does not exist.
    pub fn add_mode(&self, connector: ObjectId, mode: ModeInfo) {
        self.state.borrow_mut().connector_mut(connector).modes.push(mode);
    }

    /// Plugs or unplugs a connector.
    ///
    /// # Panics
    ///
    /// Panics if the connector does not exist.
    pub fn set_connected(&self, connector: ObjectId, connected: bool) {
        self.state.borrow_mut().connector_mut(connector).connected = connected;
    }

    /// Removes a connector, as for an unplugged DisplayPort MST sink.
    pub fn remove_connector(&self, connector: ObjectId) {
        self.state
            .borrow_mut()
            .connectors
            .retain(|c| c.id != connector);
    }

    /// Adds a plane of `plane_type` attachable to the pipes in
    /// `possible_crtcs`.
    pub fn add_plane(&self, plane_type: PlaneType, possible_crtcs: u32) -> ObjectId {
        let mut state = self.state.borrow_mut();
        let plane = MockPlane::new(&mut state.ids, plane_type, possible_crtcs, default_formats());
        let id = plane.id;
        state.planes.push(plane);
        id
    }

    /// Removes a plane.
    pub fn remove_plane(&self, plane: ObjectId) {
        self.state.borrow_mut().planes.retain(|p| p.id != plane);
    }

    /// Controls whether the atomic client capability is offered.
    pub fn set_atomic_supported(&self, supported: bool) {
        self.state.borrow_mut().caps.atomic = supported;
    }

    /// Controls whether `set_cursor2` is implemented.
    pub fn set_cursor2_supported(&self, supported: bool) {
        self.state.borrow_mut().cursor2_supported = supported;
    }

    /// Adds a range property to an object and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if the object does not exist.
    pub fn add_property(&self, object: ObjectId, name: &str, value: u64) -> PropertyId {
        let mut state = self.state.borrow_mut();
        let info = objects::range(&mut state.ids, name, value);
        let id = info.id;
        state.props_or_panic(object).push(info);
        id
    }

    /// Adds an enum property whose entries have the values `0..names.len()`.
    ///
    /// # Panics
    ///
    /// Panics if the object does not exist.
    pub fn add_enum_property(
        &self,
        object: ObjectId,
        name: &str,
        value: u64,
        names: &[&str],
    ) -> PropertyId {
        let mut state = self.state.borrow_mut();
        let info = objects::enumeration(&mut state.ids, name, value, names, false);
        let id = info.id;
        state.props_or_panic(object).push(info);
        id
    }

    /// Drops a property from an object.
    ///
    /// # Panics
    ///
    /// Panics if the object does not exist.
    pub fn remove_property(&self, object: ObjectId, name: &str) {
        self.state
            .borrow_mut()
            .props_or_panic(object)
            .retain(|p| p.name != name);
    }

    /// Overwrites a property value behind the engine's back.
    ///
    /// # Panics
    ///
    /// Panics if the object does not exist.
    pub fn set_property_value(&self, object: ObjectId, name: &str, value: u64) {
        objects::set(self.state.borrow_mut().props_or_panic(object), name, value);
    }

    /// Restricts an enum property to the named entries.
    ///
    /// # Panics
    ///
    /// Panics if the object does not exist.
    pub fn restrict_enum(&self, object: ObjectId, name: &str, keep: &[&str]) {
        let mut state = self.state.borrow_mut();
        if let Some(prop) = objects::find_mut(state.props_or_panic(object), name) {
            prop.enums
                .retain(|e: &EnumEntry| keep.contains(&e.name.as_str()));
            if prop.kind == PropertyKind::Bitmask {
                prop.value &= prop
                    .enums
                    .iter()
                    .fold(0, |acc, e| acc | (1 << e.value));
            }
        }
    }

    /// Programs a mode as if an earlier client had left the CRTC lit.
    ///
    /// # Panics
    ///
    /// Panics if the CRTC does not exist.
    pub fn set_crtc_mode(&self, crtc: ObjectId, mode: Option<ModeInfo>) {
        let mut state = self.state.borrow_mut();
        let crtc = state.crtc_mut(crtc);
        objects::set(&mut crtc.props, "ACTIVE", u64::from(mode.is_some()));
        crtc.mode = mode;
    }

    // -- Failure injection --

    /// The next real atomic commit fails with `error`.
    pub fn fail_next_commit(&self, error: DeviceError) {
        self.state.borrow_mut().fail_next_commit = Some(error);
    }

    /// The next test-only atomic commit fails with `error`.
    pub fn fail_next_test(&self, error: DeviceError) {
        self.state.borrow_mut().fail_next_test = Some(error);
    }

    /// Every request or legacy write touching a property called `name`
    /// fails with `EINVAL`.
    pub fn reject_property(&self, name: &str) {
        self.state.borrow_mut().rejected.push(name.to_owned());
    }

    /// The next `call` fails with `error`.
    pub fn fail_legacy(&self, call: LegacyCall, error: DeviceError) {
        self.state.borrow_mut().legacy_failures.insert(call, error);
    }

    /// Replaces any queued flip on `crtc` with an abort notification.
    pub fn queue_flip_abort(&self, crtc: ObjectId) {
        let mut state = self.state.borrow_mut();
        state.events.retain(|e| {
            !matches!(e, DeviceEvent::PageFlip { crtc: c, .. } if *c == crtc)
        });
        state.events.push(DeviceEvent::FlipAborted { crtc });
    }

    // -- Inspection --

    /// Connector ids in creation order.
    #[must_use]
    pub fn connector_ids(&self) -> Vec<ObjectId> {
        self.state.borrow().connectors.iter().map(|c| c.id).collect()
    }

    /// CRTC ids in pipe order.
    #[must_use]
    pub fn crtc_ids(&self) -> Vec<ObjectId> {
        self.state.borrow().crtcs.iter().map(|c| c.id).collect()
    }

    /// Plane ids in creation order.
    #[must_use]
    pub fn plane_ids(&self) -> Vec<ObjectId> {
        self.state.borrow().planes.iter().map(|p| p.id).collect()
    }

    /// The value of an object's property, if both exist.
    #[must_use]
    pub fn prop(&self, object: ObjectId, name: &str) -> Option<u64> {
        let state = self.state.borrow();
        objects::find(state.props(object)?, name).map(|p| p.value)
    }

    /// The cursor image shown on a CRTC.
    ///
    /// # Panics
    ///
    /// Panics if the CRTC does not exist.
    #[must_use]
    pub fn cursor(&self, crtc: ObjectId) -> Option<CursorImage> {
        self.state.borrow().crtc(crtc).cursor
    }

    /// The rectangle the cursor covers, if one is shown.
    ///
    /// # Panics
    ///
    /// Panics if the CRTC does not exist.
    #[must_use]
    pub fn cursor_rect(&self, crtc: ObjectId) -> Option<Rect> {
        let state = self.state.borrow();
        let crtc = state.crtc(crtc);
        crtc.cursor.map(|image| Rect::new(crtc.cursor_pos, image.size))
    }

    /// The gamma table programmed on a CRTC, by either API.
    ///
    /// # Panics
    ///
    /// Panics if the CRTC does not exist.
    #[must_use]
    pub fn gamma(&self, crtc: ObjectId) -> Option<GammaRamp> {
        self.state.borrow().crtc(crtc).gamma.clone()
    }

    /// The mode a CRTC is driving.
    ///
    /// # Panics
    ///
    /// Panics if the CRTC does not exist.
    #[must_use]
    pub fn crtc_mode(&self, crtc: ObjectId) -> Option<ModeInfo> {
        self.state.borrow().crtc(crtc).mode.clone()
    }

    /// Registered framebuffers.
    #[must_use]
    pub fn framebuffer_count(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    /// Live property blobs.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.state.borrow().blobs.len()
    }

    /// Allocated dumb buffers.
    #[must_use]
    pub fn dumb_buffer_count(&self) -> usize {
        self.state.borrow().dumb_buffers.len()
    }

    /// Events not yet read.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    /// Every atomic request so far, oldest first.
    #[must_use]
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state.borrow().commits.clone()
    }

    /// Every legacy call so far, oldest first.
    #[must_use]
    pub fn legacy_calls(&self) -> Vec<LegacyCall> {
        self.state.borrow().legacy_calls.clone()
    }

    /// Forgets the commit and legacy call logs.
    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.commits.clear();
        state.legacy_calls.clear();
    }
}
