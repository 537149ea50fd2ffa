// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware objects: connectors, CRTCs and planes.
//!
//! Each object wraps one kernel mode-setting object. Its identity and
//! capabilities are read once at discovery; its mutable state lives in a
//! [`PropertyTable`] plus a few [`Staged`] values for state that is not a
//! kernel property. Objects are owned by the [`Gpu`](crate::gpu::Gpu) in
//! [`Arena`]s and referenced from pipelines by [`Handle`].

use alloc::vec::Vec;

use crate::arena::Arena;
use crate::buffer::FlipSlots;
use crate::device::{ConnectorInfo, Device, CrtcInfo, ModeInfo, PlaneInfo, PropertyInfo};
use crate::format::FormatTable;
use crate::gamma::GammaRamp;
use crate::geometry::Size;
use crate::id::{ArenaItem, BlobId, Handle, ObjectId};
use crate::pipeline::Pipeline;
use crate::property::{
    ConnectorProperty, CrtcProperty, PlaneProperty, PropertyTable, Staged,
};
use crate::transform::PlaneTransformation;

/// DPMS value for a powered connector.
pub const DPMS_ON: u64 = 0;
/// DPMS value for a powered-down connector.
pub const DPMS_OFF: u64 = 3;

/// A mode advertised by a connector, with its cached `MODE_ID` blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorMode {
    info: ModeInfo,
    blob: Option<BlobId>,
}

impl ConnectorMode {
    fn new(info: ModeInfo) -> Self {
        Self { info, blob: None }
    }

    /// Kernel mode description.
    #[must_use]
    pub fn info(&self) -> &ModeInfo {
        &self.info
    }

    /// Visible size.
    #[must_use]
    pub fn size(&self) -> Size {
        self.info.size
    }

    /// Refresh rate in millihertz.
    #[must_use]
    pub fn refresh_mhz(&self) -> u32 {
        self.info.refresh_mhz
    }

    /// The `MODE_ID` blob, once one was created.
    #[must_use]
    pub fn blob(&self) -> Option<BlobId> {
        self.blob
    }

    pub(crate) fn set_blob(&mut self, blob: BlobId) {
        self.blob = Some(blob);
    }
}

/// A display output port.
#[derive(Debug)]
pub struct Connector {
    id: ObjectId,
    props: PropertyTable<ConnectorProperty>,
    modes: Vec<ConnectorMode>,
    possible_crtcs: u32,
    connected: bool,
    pub(crate) mode: Staged<usize>,
}

impl ArenaItem for Connector {
    const KIND: &'static str = "Connector";
}

impl Connector {
    pub(crate) fn new(id: ObjectId, info: ConnectorInfo, props: &[PropertyInfo]) -> Self {
        let preferred = info.modes.iter().position(|m| m.preferred).unwrap_or(0);
        Self {
            id,
            props: PropertyTable::from_kernel(props),
            modes: info.modes.into_iter().map(ConnectorMode::new).collect(),
            possible_crtcs: info.possible_crtcs,
            connected: info.connected,
            mode: Staged::new(preferred),
        }
    }

    /// Kernel object id.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Property table.
    #[must_use]
    pub fn properties(&self) -> &PropertyTable<ConnectorProperty> {
        &self.props
    }

    pub(crate) fn properties_mut(&mut self) -> &mut PropertyTable<ConnectorProperty> {
        &mut self.props
    }

    /// Modes the sink advertises.
    #[must_use]
    pub fn modes(&self) -> &[ConnectorMode] {
        &self.modes
    }

    pub(crate) fn mode_mut(&mut self, index: usize) -> Option<&mut ConnectorMode> {
        self.modes.get_mut(index)
    }

    /// Index of the mode the kernel is driving.
    #[must_use]
    pub fn current_mode_index(&self) -> usize {
        *self.mode.current()
    }

    /// Index of the mode the next commit programs.
    #[must_use]
    pub fn pending_mode_index(&self) -> usize {
        *self.mode.pending()
    }

    /// The mode the kernel is driving.
    #[must_use]
    pub fn current_mode(&self) -> Option<&ConnectorMode> {
        self.modes.get(*self.mode.current())
    }

    /// The mode the next commit programs.
    #[must_use]
    pub fn pending_mode(&self) -> Option<&ConnectorMode> {
        self.modes.get(*self.mode.pending())
    }

    /// Bitmask of CRTC pipe indices that can drive this connector.
    #[must_use]
    pub fn possible_crtcs(&self) -> u32 {
        self.possible_crtcs
    }

    /// A sink is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The sink is a head-mounted display and must not get a desktop output.
    #[must_use]
    pub fn is_non_desktop(&self) -> bool {
        self.props.current(ConnectorProperty::NonDesktop) == Some(1)
    }

    /// The sink supports variable refresh.
    #[must_use]
    pub fn vrr_capable(&self) -> bool {
        self.props.current(ConnectorProperty::VrrCapable) == Some(1)
    }

    /// Overscan can be set, either directly or through underscan borders.
    #[must_use]
    pub fn has_overscan(&self) -> bool {
        self.props.has(ConnectorProperty::Overscan)
            || self.props.has(ConnectorProperty::Underscan)
    }

    /// Applies a fresh probe. Returns `true` if the mode list changed, and
    /// the blobs of modes that went away.
    pub(crate) fn update(&mut self, info: ConnectorInfo) -> (bool, Vec<BlobId>) {
        self.connected = info.connected;
        self.possible_crtcs = info.possible_crtcs;
        let unchanged = self.modes.len() == info.modes.len()
            && self.modes.iter().zip(&info.modes).all(|(a, b)| a.info == *b);
        if unchanged {
            return (false, Vec::new());
        }
        let current = self.current_mode().map(|m| m.info.clone());
        let stale = self.modes.drain(..).filter_map(|m| m.blob).collect();
        self.modes = info.modes.into_iter().map(ConnectorMode::new).collect();
        let index = current
            .and_then(|c| self.modes.iter().position(|m| m.info == c))
            .or_else(|| self.modes.iter().position(|m| m.info.preferred))
            .unwrap_or(0);
        self.mode.reset(index);
        (true, stale)
    }

    /// Blobs this connector owns.
    pub(crate) fn blobs(&self) -> impl Iterator<Item = BlobId> + '_ {
        self.modes.iter().filter_map(|m| m.blob)
    }
}

/// A display controller.
#[derive(Debug)]
pub struct Crtc {
    id: ObjectId,
    pipe: u32,
    props: PropertyTable<CrtcProperty>,
    legacy_gamma_size: u32,
    kernel_mode: Option<ModeInfo>,
    pub(crate) slots: FlipSlots,
    pub(crate) gamma_blob: Staged<Option<BlobId>>,
    pub(crate) owned_blobs: Vec<BlobId>,
    pub(crate) legacy_gamma: Staged<Option<GammaRamp>>,
}

impl ArenaItem for Crtc {
    const KIND: &'static str = "Crtc";
}

impl Crtc {
    pub(crate) fn new(id: ObjectId, pipe: u32, info: CrtcInfo, props: &[PropertyInfo]) -> Self {
        Self {
            id,
            pipe,
            props: PropertyTable::from_kernel(props),
            legacy_gamma_size: info.gamma_size,
            kernel_mode: info.mode,
            slots: FlipSlots::default(),
            gamma_blob: Staged::new(None),
            owned_blobs: Vec::new(),
            legacy_gamma: Staged::new(None),
        }
    }

    /// Kernel object id.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Index in the device's CRTC list, used by possible-CRTC masks.
    #[must_use]
    pub fn pipe(&self) -> u32 {
        self.pipe
    }

    /// Property table.
    #[must_use]
    pub fn properties(&self) -> &PropertyTable<CrtcProperty> {
        &self.props
    }

    pub(crate) fn properties_mut(&mut self) -> &mut PropertyTable<CrtcProperty> {
        &mut self.props
    }

    /// Mode the kernel reported at discovery.
    #[must_use]
    pub fn kernel_mode(&self) -> Option<&ModeInfo> {
        self.kernel_mode.as_ref()
    }

    /// Entries in the gamma ramp: `GAMMA_LUT_SIZE` when present, else the
    /// legacy gamma size.
    #[must_use]
    pub fn gamma_ramp_size(&self) -> u32 {
        self.props
            .current(CrtcProperty::GammaLutSize)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.legacy_gamma_size)
    }

    /// Buffers on screen and queued.
    #[must_use]
    pub fn slots(&self) -> &FlipSlots {
        &self.slots
    }

    /// Tests whether the pipe index is in `mask`.
    #[must_use]
    pub fn matches_mask(&self, mask: u32) -> bool {
        self.pipe < 32 && mask & (1 << self.pipe) != 0
    }
}

/// What a plane is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaneType {
    /// The plane a CRTC scans its main framebuffer from.
    Primary,
    /// A hardware cursor plane.
    Cursor,
    /// Any other plane.
    Overlay,
}

impl PlaneType {
    /// Parses the kernel's `type` enum name.
    #[must_use]
    pub fn from_kernel_name(name: &str) -> Self {
        match name {
            "Primary" => Self::Primary,
            "Cursor" => Self::Cursor,
            _ => Self::Overlay,
        }
    }
}

/// A scan-out layer.
#[derive(Debug)]
pub struct Plane {
    id: ObjectId,
    plane_type: PlaneType,
    possible_crtcs: u32,
    formats: FormatTable,
    transformations: PlaneTransformation,
    props: PropertyTable<PlaneProperty>,
    pub(crate) slots: FlipSlots,
}

impl ArenaItem for Plane {
    const KIND: &'static str = "Plane";
}

impl Plane {
    pub(crate) fn new(id: ObjectId, info: PlaneInfo, props: &[PropertyInfo]) -> Self {
        let props = PropertyTable::<PlaneProperty>::from_kernel(props);
        let plane_type = props
            .get(PlaneProperty::Type)
            .and_then(|p| p.enum_name(p.current()))
            .map_or(PlaneType::Overlay, PlaneType::from_kernel_name);
        let transformations = props.get(PlaneProperty::Rotation).map_or(
            PlaneTransformation::ROTATE_0,
            |p| {
                PlaneTransformation::from_bits_truncate(
                    u32::try_from(p.bitmask()).unwrap_or(u32::MAX),
                )
            },
        );
        Self {
            id,
            plane_type,
            possible_crtcs: info.possible_crtcs,
            formats: info.formats,
            transformations,
            props,
            slots: FlipSlots::default(),
        }
    }

    /// Kernel object id.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Plane usage.
    #[must_use]
    pub fn plane_type(&self) -> PlaneType {
        self.plane_type
    }

    /// Bitmask of CRTC pipe indices this plane can be attached to.
    #[must_use]
    pub fn possible_crtcs(&self) -> u32 {
        self.possible_crtcs
    }

    /// Formats and modifiers the plane scans out.
    #[must_use]
    pub fn formats(&self) -> &FormatTable {
        &self.formats
    }

    /// Rotations and reflections the plane supports.
    #[must_use]
    pub fn supported_transformations(&self) -> PlaneTransformation {
        self.transformations
    }

    /// Transformation the next commit applies.
    #[must_use]
    pub fn pending_transformation(&self) -> PlaneTransformation {
        self.props
            .pending(PlaneProperty::Rotation)
            .and_then(|v| u32::try_from(v).ok())
            .map_or(PlaneTransformation::ROTATE_0, PlaneTransformation::from_bits_truncate)
    }

    /// Property table.
    #[must_use]
    pub fn properties(&self) -> &PropertyTable<PlaneProperty> {
        &self.props
    }

    pub(crate) fn properties_mut(&mut self) -> &mut PropertyTable<PlaneProperty> {
        &mut self.props
    }

    /// Buffers on screen and queued.
    #[must_use]
    pub fn slots(&self) -> &FlipSlots {
        &self.slots
    }

    /// A primary plane that can be attached to `crtc`.
    #[must_use]
    pub fn is_primary_for(&self, crtc: &Crtc) -> bool {
        self.plane_type == PlaneType::Primary && crtc.matches_mask(self.possible_crtcs)
    }
}

/// Everything a [`Gpu`](crate::gpu::Gpu) owns besides the device.
#[derive(Debug, Default)]
pub(crate) struct Objects {
    pub(crate) connectors: Arena<Connector>,
    pub(crate) crtcs: Arena<Crtc>,
    pub(crate) planes: Arena<Plane>,
    pub(crate) pipelines: Arena<Pipeline>,
}

impl Objects {
    pub(crate) fn find_connector(&self, id: ObjectId) -> Option<Handle<Connector>> {
        self.connectors
            .iter()
            .find_map(|(h, c)| (c.id == id).then_some(h))
    }

    pub(crate) fn find_crtc(&self, id: ObjectId) -> Option<Handle<Crtc>> {
        self.crtcs.iter().find_map(|(h, c)| (c.id == id).then_some(h))
    }

    /// Destroys gamma blobs that neither the current nor the pending
    /// `GAMMA_LUT` refers to.
    pub(crate) fn sweep_gamma_blobs<D: Device>(&mut self, device: &mut D) {
        for (_, crtc) in self.crtcs.iter_mut() {
            let (current, pending) = (*crtc.gamma_blob.current(), *crtc.gamma_blob.pending());
            crtc.owned_blobs.retain(|&blob| {
                if Some(blob) == current || Some(blob) == pending {
                    return true;
                }
                if let Err(err) = device.destroy_blob(blob) {
                    log::warn!("failed to destroy gamma blob {blob:?}: {err}");
                }
                false
            });
        }
    }

    /// The pipeline bound to the CRTC with kernel id `id`.
    pub(crate) fn pipeline_for_crtc(&self, id: ObjectId) -> Option<Handle<Pipeline>> {
        self.pipelines
            .iter()
            .find_map(|(h, p)| (self.crtcs.get(p.crtc()).id == id).then_some(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EnumEntry, PropertyKind};
    use crate::format::Fourcc;
    use crate::property::property_info;
    use alloc::string::String;
    use alloc::vec;

    fn mode(w: u32, h: u32, preferred: bool) -> ModeInfo {
        ModeInfo {
            size: Size::new(w, h),
            refresh_mhz: 60_000,
            clock_khz: 148_500,
            preferred,
            name: String::from("mode"),
        }
    }

    fn enum_prop(id: u32, name: &str, value: u64, kind: PropertyKind, names: &[&str]) -> PropertyInfo {
        PropertyInfo {
            kind,
            enums: names
                .iter()
                .zip(0_u64..)
                .map(|(n, v)| EnumEntry {
                    name: String::from(*n),
                    value: v,
                })
                .collect(),
            ..property_info(id, name, value)
        }
    }

    #[test]
    fn connector_starts_on_preferred_mode() {
        let info = ConnectorInfo {
            connected: true,
            modes: vec![mode(1280, 720, false), mode(1920, 1080, true)],
            possible_crtcs: 1,
        };
        let c = Connector::new(ObjectId(30), info, &[]);
        assert_eq!(c.current_mode_index(), 1);
        assert_eq!(c.pending_mode().map(ConnectorMode::size), Some(Size::new(1920, 1080)));
    }

    #[test]
    fn connector_update_reports_mode_changes() {
        let info = ConnectorInfo {
            connected: true,
            modes: vec![mode(1920, 1080, true)],
            possible_crtcs: 1,
        };
        let mut c = Connector::new(ObjectId(30), info.clone(), &[]);
        c.mode_mut(0).unwrap().set_blob(BlobId(9));
        assert_eq!(c.update(info.clone()), (false, vec![]));

        let mut more = info;
        more.modes.insert(0, mode(1280, 720, false));
        let (changed, stale) = c.update(more);
        assert!(changed);
        assert_eq!(stale, [BlobId(9)]);
        assert_eq!(c.current_mode_index(), 1, "keeps driving the same mode");
    }

    #[test]
    fn non_desktop_and_vrr_flags() {
        let info = ConnectorInfo::default();
        let c = Connector::new(
            ObjectId(1),
            info,
            &[property_info(1, "non-desktop", 1), property_info(2, "vrr_capable", 0)],
        );
        assert!(c.is_non_desktop());
        assert!(!c.vrr_capable());
        assert!(!c.has_overscan());
    }

    #[test]
    fn crtc_gamma_size_prefers_lut_property() {
        let info = CrtcInfo {
            mode: None,
            gamma_size: 256,
        };
        let legacy = Crtc::new(ObjectId(10), 0, info.clone(), &[]);
        assert_eq!(legacy.gamma_ramp_size(), 256);
        let atomic = Crtc::new(ObjectId(10), 0, info, &[property_info(5, "GAMMA_LUT_SIZE", 1024)]);
        assert_eq!(atomic.gamma_ramp_size(), 1024);
    }

    #[test]
    fn crtc_pipe_mask() {
        let crtc = Crtc::new(ObjectId(11), 2, CrtcInfo::default(), &[]);
        assert!(crtc.matches_mask(0b100));
        assert!(!crtc.matches_mask(0b011));
    }

    #[test]
    fn plane_reads_type_and_rotations() {
        let mut formats = FormatTable::new();
        formats.insert(Fourcc::XRGB8888, vec![]);
        let plane = Plane::new(
            ObjectId(40),
            PlaneInfo {
                possible_crtcs: 0b1,
                formats,
            },
            &[
                enum_prop(1, "type", 1, PropertyKind::Enum, &["Overlay", "Primary", "Cursor"]),
                enum_prop(
                    2,
                    "rotation",
                    1,
                    PropertyKind::Bitmask,
                    &["rotate-0", "rotate-90", "rotate-180", "rotate-270"],
                ),
            ],
        );
        assert_eq!(plane.plane_type(), PlaneType::Primary);
        assert!(plane.supported_transformations().contains(PlaneTransformation::ROTATE_270));
        assert!(!plane.supported_transformations().contains(PlaneTransformation::REFLECT_X));
        assert_eq!(plane.pending_transformation(), PlaneTransformation::ROTATE_0);
        let crtc = Crtc::new(ObjectId(11), 0, CrtcInfo::default(), &[]);
        assert!(plane.is_primary_for(&crtc));
    }
}
