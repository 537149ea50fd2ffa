// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`Device`] implementation: resources, atomic validation and the legacy
//! calls.

use scanout_core::device::{
    BlobData, ConnectorInfo, CrtcInfo, CursorImage, Device, DeviceCaps, DeviceError, DeviceEvent,
    DumbBuffer, FramebufferDesc, ModeInfo, PlaneInfo, PropertyInfo, PropertyKind, Resources,
};
use scanout_core::format::{Fourcc, Modifier};
use scanout_core::gamma::GammaRamp;
use scanout_core::geometry::{Point, Size};
use scanout_core::id::{BlobId, FramebufferId, GemHandle, ObjectId, PropertyId};
use scanout_core::request::{AtomicRequest, CommitFlags};
use scanout_core::time::{Duration, HostTime};

use crate::objects::{self, MockConnector, MockCrtc, MockPlane};
use crate::{CommitRecord, LegacyCall, MockBlob, MockDevice, MockState};

/// Time between two simulated vblanks, about 60 Hz.
const FRAME: Duration = Duration::from_micros(16_667);

fn id32(value: u64) -> Result<u32, DeviceError> {
    u32::try_from(value).map_err(|_| DeviceError::InvalidArgument)
}

/// Object state an atomic request is applied to before it is validated.
#[derive(Clone)]
struct Scratch {
    connectors: Vec<MockConnector>,
    crtcs: Vec<MockCrtc>,
    planes: Vec<MockPlane>,
}

impl Scratch {
    fn props_mut(&mut self, id: ObjectId) -> Option<(&mut Vec<PropertyInfo>, bool)> {
        if let Some(c) = self.connectors.iter_mut().find(|c| c.id == id) {
            return Some((&mut c.props, true));
        }
        if let Some(c) = self.crtcs.iter_mut().find(|c| c.id == id) {
            return Some((&mut c.props, false));
        }
        self.planes
            .iter_mut()
            .find(|p| p.id == id)
            .map(|p| (&mut p.props, false))
    }
}

fn value(props: &[PropertyInfo], name: &str) -> u64 {
    objects::find(props, name).map_or(0, |p| p.value)
}

impl MockState {
    fn take_legacy_failure(&mut self, call: LegacyCall) -> Result<(), DeviceError> {
        self.legacy_calls.push(call);
        match self.legacy_failures.remove(&call) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn tick(&mut self) -> (u32, HostTime) {
        self.vblank += 1;
        self.clock = self.clock + FRAME;
        (self.vblank, self.clock)
    }

    fn queue_flip(&mut self, crtc: ObjectId) {
        let (sequence, timestamp) = self.tick();
        self.events.push(DeviceEvent::PageFlip {
            crtc,
            sequence,
            timestamp,
        });
    }

    fn flip_queued(&self, crtc: ObjectId) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, DeviceEvent::PageFlip { crtc: c, .. } if *c == crtc))
    }

    fn primary_plane_mut(&mut self, crtc: ObjectId) -> Option<&mut MockPlane> {
        let pipe = self.crtcs.iter().position(|c| c.id == crtc)?;
        self.planes.iter_mut().find(|p| p.is_primary_for(pipe))
    }

    fn check_blob(&self, kind: &str, value: u64) -> Result<(), DeviceError> {
        if value == 0 {
            return Ok(());
        }
        let blob = self
            .blobs
            .get(&BlobId(id32(value)?))
            .ok_or(DeviceError::InvalidArgument)?;
        match (kind, blob) {
            ("MODE_ID", MockBlob::Mode(_))
            | ("GAMMA_LUT", MockBlob::GammaLut(_))
            | ("IN_FORMATS", _) => Ok(()),
            _ => Err(DeviceError::InvalidArgument),
        }
    }

    /// Applies `request` to a copy of the object state and checks the
    /// result. Returns the new state and the CRTCs that flip.
    fn evaluate(
        &self,
        request: &AtomicRequest,
        flags: CommitFlags,
    ) -> Result<(Scratch, Vec<ObjectId>), DeviceError> {
        let mut scratch = Scratch {
            connectors: self.connectors.clone(),
            crtcs: self.crtcs.clone(),
            planes: self.planes.clone(),
        };
        let mut modeset = false;
        let mut touched = Vec::new();
        for write in request.writes() {
            let (props, is_connector) = scratch
                .props_mut(write.object)
                .ok_or(DeviceError::NoSuchObject)?;
            let prop = props
                .iter_mut()
                .find(|p| p.id == write.property)
                .ok_or(DeviceError::InvalidArgument)?;
            if prop.immutable || self.rejected.iter().any(|r| *r == prop.name) {
                return Err(DeviceError::InvalidArgument);
            }
            if prop.kind == PropertyKind::Blob {
                self.check_blob(&prop.name, write.value)?;
            }
            if prop.name == "overscan" && write.value > 100 {
                return Err(DeviceError::InvalidArgument);
            }
            let routing = matches!(prop.name.as_str(), "ACTIVE" | "MODE_ID")
                || is_connector && prop.name == "CRTC_ID";
            if routing && prop.value != write.value {
                modeset = true;
            }
            prop.value = write.value;
            if !touched.contains(&write.object) {
                touched.push(write.object);
            }
        }
        if modeset && !flags.contains(CommitFlags::ALLOW_MODESET) {
            return Err(DeviceError::InvalidArgument);
        }

        for crtc in scratch.crtcs.iter_mut().filter(|c| touched.contains(&c.id)) {
            let active = value(&crtc.props, "ACTIVE") == 1;
            let mode_id = value(&crtc.props, "MODE_ID");
            crtc.mode = match self.blobs.get(&BlobId(id32(mode_id)?)) {
                Some(MockBlob::Mode(mode)) if active => Some(mode.clone()),
                _ if active => return Err(DeviceError::InvalidArgument),
                _ => None,
            };
            let lut = value(&crtc.props, "GAMMA_LUT");
            if let Some(MockBlob::GammaLut(ramp)) = self.blobs.get(&BlobId(id32(lut)?)) {
                if u32::try_from(ramp.size()).ok() != Some(crtc.gamma_size) {
                    return Err(DeviceError::InvalidArgument);
                }
                crtc.gamma = Some(ramp.clone());
            }
        }

        for (pipe, crtc) in scratch.crtcs.iter().enumerate() {
            let routed = scratch
                .connectors
                .iter()
                .filter(|c| value(&c.props, "CRTC_ID") == u64::from(crtc.id.0));
            for connector in routed {
                if pipe >= 32 || connector.possible_crtcs & (1 << pipe) == 0 {
                    return Err(DeviceError::InvalidArgument);
                }
            }
        }
        for connector in &scratch.connectors {
            let target = value(&connector.props, "CRTC_ID");
            if target != 0 && !scratch.crtcs.iter().any(|c| u64::from(c.id.0) == target) {
                return Err(DeviceError::InvalidArgument);
            }
        }

        let mut flips = Vec::new();
        for plane in &scratch.planes {
            let target = value(&plane.props, "CRTC_ID");
            if target == 0 {
                continue;
            }
            let Some((pipe, crtc)) = scratch
                .crtcs
                .iter()
                .enumerate()
                .find(|(_, c)| u64::from(c.id.0) == target)
            else {
                return Err(DeviceError::InvalidArgument);
            };
            let fb = value(&plane.props, "FB_ID");
            let registered = fb != 0
                && self
                    .framebuffers
                    .contains_key(&FramebufferId(id32(fb)?));
            let attachable = pipe < 32 && plane.possible_crtcs & (1 << pipe) != 0;
            if !registered || !attachable || crtc.mode.is_none() {
                return Err(DeviceError::InvalidArgument);
            }
            if touched.contains(&plane.id) || touched.contains(&crtc.id) {
                flips.push(crtc.id);
            }
        }
        flips.dedup();
        Ok((scratch, flips))
    }

    fn atomic(&mut self, request: &AtomicRequest, flags: CommitFlags) -> Result<(), DeviceError> {
        if !self.atomic_enabled {
            return Err(DeviceError::NotSupported);
        }
        let test = flags.contains(CommitFlags::TEST_ONLY);
        let injected = if test {
            self.fail_next_test.take()
        } else {
            self.fail_next_commit.take()
        };
        if let Some(err) = injected {
            return Err(err);
        }
        let (scratch, flips) = self.evaluate(request, flags)?;
        let event = flags.contains(CommitFlags::PAGE_FLIP_EVENT);
        if event && flips.iter().any(|&crtc| self.flip_queued(crtc)) {
            return Err(DeviceError::Busy);
        }
        if test {
            return Ok(());
        }
        self.connectors = scratch.connectors;
        self.crtcs = scratch.crtcs;
        self.planes = scratch.planes;
        if event {
            for crtc in flips {
                self.queue_flip(crtc);
            }
        }
        Ok(())
    }

    fn legacy_set_crtc(
        &mut self,
        crtc: ObjectId,
        fb: Option<FramebufferId>,
        connectors: &[ObjectId],
        mode: Option<&ModeInfo>,
    ) -> Result<(), DeviceError> {
        if !self.crtcs.iter().any(|c| c.id == crtc) {
            return Err(DeviceError::NoSuchObject);
        }
        if fb.is_some() != mode.is_some()
            || fb.is_some_and(|fb| !self.framebuffers.contains_key(&fb))
            || !connectors
                .iter()
                .all(|id| self.connectors.iter().any(|c| c.id == *id))
        {
            return Err(DeviceError::InvalidArgument);
        }
        let crtc_value = u64::from(crtc.0);
        for connector in &mut self.connectors {
            if connectors.contains(&connector.id) && mode.is_some() {
                objects::set(&mut connector.props, "CRTC_ID", crtc_value);
            } else if value(&connector.props, "CRTC_ID") == crtc_value {
                objects::set(&mut connector.props, "CRTC_ID", 0);
            }
        }
        let state = self.crtcs.iter_mut().find(|c| c.id == crtc);
        if let Some(state) = state {
            state.mode = mode.cloned();
            objects::set(&mut state.props, "ACTIVE", u64::from(mode.is_some()));
        }
        if let Some(plane) = self.primary_plane_mut(crtc) {
            let fb = fb.map_or(0, FramebufferId::value);
            objects::set(&mut plane.props, "FB_ID", fb);
            objects::set(&mut plane.props, "CRTC_ID", if fb == 0 { 0 } else { crtc_value });
        }
        Ok(())
    }

    fn legacy_page_flip(
        &mut self,
        crtc: ObjectId,
        fb: FramebufferId,
        flags: CommitFlags,
    ) -> Result<(), DeviceError> {
        let Some(state) = self.crtcs.iter().find(|c| c.id == crtc) else {
            return Err(DeviceError::NoSuchObject);
        };
        if state.mode.is_none() || !self.framebuffers.contains_key(&fb) {
            return Err(DeviceError::InvalidArgument);
        }
        if self.flip_queued(crtc) {
            return Err(DeviceError::Busy);
        }
        if let Some(plane) = self.primary_plane_mut(crtc) {
            objects::set(&mut plane.props, "FB_ID", fb.value());
        }
        if flags.contains(CommitFlags::PAGE_FLIP_EVENT) {
            self.queue_flip(crtc);
        }
        Ok(())
    }

    fn crtc_state_mut(&mut self, crtc: ObjectId) -> Result<&mut MockCrtc, DeviceError> {
        self.crtcs
            .iter_mut()
            .find(|c| c.id == crtc)
            .ok_or(DeviceError::NoSuchObject)
    }

    fn legacy_cursor(
        &mut self,
        crtc: ObjectId,
        image: Option<CursorImage>,
        hotspot: Point,
    ) -> Result<(), DeviceError> {
        let max = self.caps.cursor_size;
        if image.is_some_and(|i| !i.size.fits_within(max)) {
            return Err(DeviceError::InvalidArgument);
        }
        let state = self.crtc_state_mut(crtc)?;
        state.cursor = image;
        state.hotspot = hotspot;
        Ok(())
    }

    fn legacy_property(
        &mut self,
        object: ObjectId,
        property: PropertyId,
        new: u64,
    ) -> Result<(), DeviceError> {
        let rejected = self.rejected.clone();
        let props = self.props_mut(object).ok_or(DeviceError::NoSuchObject)?;
        let prop = props
            .iter_mut()
            .find(|p| p.id == property)
            .ok_or(DeviceError::InvalidArgument)?;
        if prop.immutable
            || rejected.contains(&prop.name)
            || prop.name == "overscan" && new > 100
        {
            return Err(DeviceError::InvalidArgument);
        }
        prop.value = new;
        Ok(())
    }
}

impl Device for MockDevice {
    fn capabilities(&self) -> DeviceCaps {
        self.state.borrow().caps
    }

    fn enable_atomic(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        if !state.caps.atomic {
            return Err(DeviceError::NotSupported);
        }
        state.atomic_enabled = true;
        Ok(())
    }

    fn resources(&self) -> Result<Resources, DeviceError> {
        let state = self.state.borrow();
        Ok(Resources {
            connectors: state.connectors.iter().map(|c| c.id).collect(),
            crtcs: state.crtcs.iter().map(|c| c.id).collect(),
        })
    }

    fn planes(&self) -> Result<Vec<ObjectId>, DeviceError> {
        let state = self.state.borrow();
        if !state.atomic_enabled {
            return Err(DeviceError::NotSupported);
        }
        Ok(state.planes.iter().map(|p| p.id).collect())
    }

    fn connector(&self, id: ObjectId) -> Result<ConnectorInfo, DeviceError> {
        let state = self.state.borrow();
        let c = state
            .connectors
            .iter()
            .find(|c| c.id == id)
            .ok_or(DeviceError::NoSuchObject)?;
        Ok(ConnectorInfo {
            connected: c.connected,
            modes: if c.connected { c.modes.clone() } else { Vec::new() },
            possible_crtcs: c.possible_crtcs,
        })
    }

    fn crtc(&self, id: ObjectId) -> Result<CrtcInfo, DeviceError> {
        let state = self.state.borrow();
        let c = state
            .crtcs
            .iter()
            .find(|c| c.id == id)
            .ok_or(DeviceError::NoSuchObject)?;
        Ok(CrtcInfo {
            mode: c.mode.clone(),
            gamma_size: c.gamma_size,
        })
    }

    fn plane(&self, id: ObjectId) -> Result<PlaneInfo, DeviceError> {
        let state = self.state.borrow();
        let p = state
            .planes
            .iter()
            .find(|p| p.id == id)
            .ok_or(DeviceError::NoSuchObject)?;
        Ok(PlaneInfo {
            possible_crtcs: p.possible_crtcs,
            formats: p.formats.clone(),
        })
    }

    fn properties(&self, id: ObjectId) -> Result<Vec<PropertyInfo>, DeviceError> {
        self.state
            .borrow()
            .props(id)
            .cloned()
            .ok_or(DeviceError::NoSuchObject)
    }

    fn create_blob(&mut self, data: BlobData<'_>) -> Result<BlobId, DeviceError> {
        let mut state = self.state.borrow_mut();
        let blob = match data {
            BlobData::Mode(mode) => MockBlob::Mode(mode.clone()),
            BlobData::GammaLut(ramp) => MockBlob::GammaLut(ramp.clone()),
        };
        let id = BlobId(state.ids.next());
        state.blobs.insert(id, blob);
        Ok(id)
    }

    fn destroy_blob(&mut self, blob: BlobId) -> Result<(), DeviceError> {
        self.state
            .borrow_mut()
            .blobs
            .remove(&blob)
            .map(drop)
            .ok_or(DeviceError::NoSuchObject)
    }

    fn create_dumb_buffer(
        &mut self,
        size: Size,
        format: Fourcc,
    ) -> Result<DumbBuffer, DeviceError> {
        if size.is_empty() {
            return Err(DeviceError::InvalidArgument);
        }
        let mut state = self.state.borrow_mut();
        let buffer = DumbBuffer {
            handle: GemHandle(state.ids.next()),
            pitch: size.width * 4,
            size,
            format,
        };
        state.dumb_buffers.insert(buffer.handle, buffer);
        Ok(buffer)
    }

    fn destroy_dumb_buffer(&mut self, handle: GemHandle) -> Result<(), DeviceError> {
        self.state
            .borrow_mut()
            .dumb_buffers
            .remove(&handle)
            .map(drop)
            .ok_or(DeviceError::NoSuchObject)
    }

    fn add_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError> {
        let mut state = self.state.borrow_mut();
        let explicit = desc.modifier != Modifier::LINEAR && desc.modifier != Modifier::INVALID;
        if desc.size.is_empty() || explicit && !state.caps.addfb_modifiers {
            return Err(DeviceError::InvalidArgument);
        }
        let id = FramebufferId(state.ids.next());
        state.framebuffers.insert(id, *desc);
        Ok(id)
    }

    fn remove_framebuffer(&mut self, fb: FramebufferId) -> Result<(), DeviceError> {
        self.state
            .borrow_mut()
            .framebuffers
            .remove(&fb)
            .map(drop)
            .ok_or(DeviceError::NoSuchObject)
    }

    fn atomic_commit(
        &mut self,
        request: &AtomicRequest,
        flags: CommitFlags,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        let result = state.atomic(request, flags);
        let legacy_calls_before = state.legacy_calls.len();
        state.commits.push(CommitRecord {
            flags,
            writes: request.writes().to_vec(),
            result,
            legacy_calls_before,
        });
        result
    }

    fn set_crtc(
        &mut self,
        crtc: ObjectId,
        fb: Option<FramebufferId>,
        _position: Point,
        connectors: &[ObjectId],
        mode: Option<&ModeInfo>,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.take_legacy_failure(LegacyCall::SetCrtc)?;
        state.legacy_set_crtc(crtc, fb, connectors, mode)
    }

    fn page_flip(
        &mut self,
        crtc: ObjectId,
        fb: FramebufferId,
        flags: CommitFlags,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.take_legacy_failure(LegacyCall::PageFlip)?;
        state.legacy_page_flip(crtc, fb, flags)
    }

    fn set_cursor2(
        &mut self,
        crtc: ObjectId,
        image: Option<CursorImage>,
        hotspot: Point,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.take_legacy_failure(LegacyCall::SetCursor2)?;
        if !state.cursor2_supported {
            return Err(DeviceError::NotSupported);
        }
        state.legacy_cursor(crtc, image, hotspot)
    }

    fn set_cursor(
        &mut self,
        crtc: ObjectId,
        image: Option<CursorImage>,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.take_legacy_failure(LegacyCall::SetCursor)?;
        state.legacy_cursor(crtc, image, Point::ORIGIN)
    }

    fn move_cursor(&mut self, crtc: ObjectId, position: Point) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.take_legacy_failure(LegacyCall::MoveCursor)?;
        state.crtc_state_mut(crtc)?.cursor_pos = position;
        Ok(())
    }

    fn set_gamma(&mut self, crtc: ObjectId, ramp: &GammaRamp) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.take_legacy_failure(LegacyCall::SetGamma)?;
        let crtc = state.crtc_state_mut(crtc)?;
        if u32::try_from(ramp.size()).ok() != Some(crtc.gamma_size) {
            return Err(DeviceError::InvalidArgument);
        }
        crtc.gamma = Some(ramp.clone());
        Ok(())
    }

    fn set_property(
        &mut self,
        object: ObjectId,
        property: PropertyId,
        value: u64,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.take_legacy_failure(LegacyCall::SetProperty)?;
        state.legacy_property(object, property, value)
    }

    fn read_events(&mut self, events: &mut Vec<DeviceEvent>) -> Result<(), DeviceError> {
        events.append(&mut self.state.borrow_mut().events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode;

    fn fb(device: &mut MockDevice, size: Size) -> FramebufferId {
        let dumb = device.create_dumb_buffer(size, Fourcc::XRGB8888).unwrap();
        device
            .add_framebuffer(&FramebufferDesc {
                handle: dumb.handle,
                size,
                format: Fourcc::XRGB8888,
                modifier: Modifier::LINEAR,
                pitch: dumb.pitch,
            })
            .unwrap()
    }

    fn prop_id(device: &MockDevice, object: ObjectId, name: &str) -> PropertyId {
        device
            .properties(object)
            .unwrap()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
            .id
    }

    /// Builds a request that lights CRTC 0 with `fb` for `conn`.
    fn enable_request(device: &mut MockDevice, conn: ObjectId, fb: FramebufferId) -> AtomicRequest {
        let crtc = device.crtc_ids()[0];
        let plane = device.plane_ids()[0];
        let blob = device.create_blob(BlobData::Mode(&mode(640, 480, 60))).unwrap();
        let mut request = AtomicRequest::new();
        request.add(conn, prop_id(device, conn, "CRTC_ID"), u64::from(crtc.0));
        request.add(crtc, prop_id(device, crtc, "MODE_ID"), blob.value());
        request.add(crtc, prop_id(device, crtc, "ACTIVE"), 1);
        request.add(plane, prop_id(device, plane, "CRTC_ID"), u64::from(crtc.0));
        request.add(plane, prop_id(device, plane, "FB_ID"), fb.value());
        request
    }

    #[test]
    fn modeset_needs_the_flag() {
        let mut device = MockDevice::new(1);
        let conn = device.add_connector(&[mode(640, 480, 60)]);
        device.enable_atomic().unwrap();
        let fb = fb(&mut device, Size::new(640, 480));
        let request = enable_request(&mut device, conn, fb);
        assert_eq!(
            device.atomic_commit(&request, CommitFlags::TEST_ONLY),
            Err(DeviceError::InvalidArgument)
        );
        device
            .atomic_commit(&request, CommitFlags::TEST_ONLY | CommitFlags::ALLOW_MODESET)
            .unwrap();
        let crtc = device.crtc_ids()[0];
        assert_eq!(device.prop(crtc, "ACTIVE"), Some(0), "test-only applies nothing");
        device
            .atomic_commit(&request, CommitFlags::ALLOW_MODESET | CommitFlags::PAGE_FLIP_EVENT)
            .unwrap();
        assert_eq!(device.prop(crtc, "ACTIVE"), Some(1));
        assert_eq!(device.crtc_mode(crtc).map(|m| m.size), Some(Size::new(640, 480)));
        assert_eq!(device.pending_events(), 1);
    }

    #[test]
    fn queued_flip_makes_the_next_one_busy() {
        let mut device = MockDevice::new(1);
        let conn = device.add_connector(&[mode(640, 480, 60)]);
        device.enable_atomic().unwrap();
        let fb = fb(&mut device, Size::new(640, 480));
        let request = enable_request(&mut device, conn, fb);
        let flags = CommitFlags::ALLOW_MODESET | CommitFlags::PAGE_FLIP_EVENT;
        device.atomic_commit(&request, flags).unwrap();
        assert_eq!(device.atomic_commit(&request, flags), Err(DeviceError::Busy));
        let mut events = Vec::new();
        device.read_events(&mut events).unwrap();
        assert!(matches!(events[..], [DeviceEvent::PageFlip { sequence: 1, .. }]));
        device.atomic_commit(&request, flags).unwrap();
    }

    #[test]
    fn immutable_and_rejected_properties_fail() {
        let mut device = MockDevice::new(1);
        device.enable_atomic().unwrap();
        let crtc = device.crtc_ids()[0];
        let mut request = AtomicRequest::new();
        request.add(crtc, prop_id(&device, crtc, "GAMMA_LUT_SIZE"), 16);
        assert_eq!(
            device.atomic_commit(&request, CommitFlags::TEST_ONLY),
            Err(DeviceError::InvalidArgument)
        );

        device.reject_property("VRR_ENABLED");
        let mut request = AtomicRequest::new();
        request.add(crtc, prop_id(&device, crtc, "VRR_ENABLED"), 1);
        assert_eq!(
            device.atomic_commit(&request, CommitFlags::TEST_ONLY),
            Err(DeviceError::InvalidArgument)
        );
        assert_eq!(device.commits().len(), 2);
    }

    #[test]
    fn legacy_flip_needs_a_mode() {
        let mut device = MockDevice::new(1);
        let conn = device.add_connector(&[mode(640, 480, 60)]);
        let crtc = device.crtc_ids()[0];
        let fb = fb(&mut device, Size::new(640, 480));
        assert_eq!(
            device.page_flip(crtc, fb, CommitFlags::PAGE_FLIP_EVENT),
            Err(DeviceError::InvalidArgument)
        );
        device
            .set_crtc(crtc, Some(fb), Point::ORIGIN, &[conn], Some(&mode(640, 480, 60)))
            .unwrap();
        assert_eq!(device.prop(conn, "CRTC_ID"), Some(u64::from(crtc.0)));
        device.page_flip(crtc, fb, CommitFlags::PAGE_FLIP_EVENT).unwrap();
        assert_eq!(device.prop(device.plane_ids()[0], "FB_ID"), Some(fb.value()));
        assert_eq!(
            device.legacy_calls(),
            [LegacyCall::PageFlip, LegacyCall::SetCrtc, LegacyCall::PageFlip]
        );
    }

    #[test]
    fn injected_legacy_failure_fires_once() {
        let mut device = MockDevice::new(1);
        let crtc = device.crtc_ids()[0];
        device.fail_legacy(LegacyCall::MoveCursor, DeviceError::Busy);
        assert_eq!(
            device.move_cursor(crtc, Point::new(1, 1)),
            Err(DeviceError::Busy)
        );
        device.move_cursor(crtc, Point::new(1, 1)).unwrap();
    }

    #[test]
    fn cursor2_can_be_unsupported() {
        let mut device = MockDevice::new(1);
        let crtc = device.crtc_ids()[0];
        device.set_cursor2_supported(false);
        let image = CursorImage {
            handle: GemHandle(99),
            size: Size::new(64, 64),
        };
        assert_eq!(
            device.set_cursor2(crtc, Some(image), Point::ORIGIN),
            Err(DeviceError::NotSupported)
        );
        device.set_cursor(crtc, Some(image)).unwrap();
        assert_eq!(device.cursor(crtc), Some(image));
    }
}
