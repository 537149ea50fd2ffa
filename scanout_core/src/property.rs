// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Double-buffered kernel properties.
//!
//! Every property the engine knows about holds two values: `current`, what
//! the kernel last acknowledged, and `pending`, what the next commit will
//! push. Pipelines and the commit engine stage values into `pending`; only
//! the commit engine promotes `pending` to `current`, and only after the
//! kernel accepted the request.
//!
//! Properties are addressed by small per-object enums ([`ConnectorProperty`],
//! [`CrtcProperty`], [`PlaneProperty`]) rather than by string, and a
//! [`PropertyTable`] maps each enum variant to the kernel property of the
//! same name, if the driver exposes one.

use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::device::{EnumEntry, PropertyInfo, PropertyKind};
use crate::id::PropertyId;

/// A set of property names known to the engine for one object type.
pub trait PropertyName: Copy + Eq + core::fmt::Debug + 'static {
    /// Every variant, in table order.
    const ALL: &'static [Self];

    /// The kernel's name for this property.
    fn name(self) -> &'static str;

    /// Position in [`ALL`](Self::ALL).
    fn index(self) -> usize;
}

/// Connector properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectorProperty {
    /// The CRTC driving this connector (0 when disabled).
    CrtcId,
    /// The sink is a head-mounted display, not a desktop output.
    NonDesktop,
    /// Legacy power state.
    Dpms,
    /// Overscan compensation in percent.
    Overscan,
    /// The sink supports variable refresh.
    VrrCapable,
    /// Underscan on/off, used when `overscan` is missing.
    Underscan,
    /// Vertical underscan border.
    UnderscanVBorder,
    /// Horizontal underscan border.
    UnderscanHBorder,
    /// Full/limited RGB quantization range.
    BroadcastRgb,
}

impl PropertyName for ConnectorProperty {
    const ALL: &'static [Self] = &[
        Self::CrtcId,
        Self::NonDesktop,
        Self::Dpms,
        Self::Overscan,
        Self::VrrCapable,
        Self::Underscan,
        Self::UnderscanVBorder,
        Self::UnderscanHBorder,
        Self::BroadcastRgb,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::CrtcId => "CRTC_ID",
            Self::NonDesktop => "non-desktop",
            Self::Dpms => "DPMS",
            Self::Overscan => "overscan",
            Self::VrrCapable => "vrr_capable",
            Self::Underscan => "underscan",
            Self::UnderscanVBorder => "underscan vborder",
            Self::UnderscanHBorder => "underscan hborder",
            Self::BroadcastRgb => "Broadcast RGB",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// CRTC properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CrtcProperty {
    /// Blob holding the programmed mode.
    ModeId,
    /// The CRTC is powered.
    Active,
    /// Variable refresh is enabled.
    VrrEnabled,
    /// Blob holding the gamma lookup table.
    GammaLut,
    /// Entries in the gamma lookup table.
    GammaLutSize,
}

impl PropertyName for CrtcProperty {
    const ALL: &'static [Self] = &[
        Self::ModeId,
        Self::Active,
        Self::VrrEnabled,
        Self::GammaLut,
        Self::GammaLutSize,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::ModeId => "MODE_ID",
            Self::Active => "ACTIVE",
            Self::VrrEnabled => "VRR_ENABLED",
            Self::GammaLut => "GAMMA_LUT",
            Self::GammaLutSize => "GAMMA_LUT_SIZE",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Plane properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaneProperty {
    /// Primary, cursor or overlay.
    Type,
    /// Source x in 16.16 fixed point.
    SrcX,
    /// Source y in 16.16 fixed point.
    SrcY,
    /// Source width in 16.16 fixed point.
    SrcW,
    /// Source height in 16.16 fixed point.
    SrcH,
    /// Destination x on the CRTC.
    CrtcX,
    /// Destination y on the CRTC.
    CrtcY,
    /// Destination width on the CRTC.
    CrtcW,
    /// Destination height on the CRTC.
    CrtcH,
    /// Framebuffer being scanned out.
    FbId,
    /// CRTC the plane is attached to.
    CrtcId,
    /// Rotation/reflection bitmask.
    Rotation,
    /// Blob listing formats and modifiers.
    InFormats,
}

impl PropertyName for PlaneProperty {
    const ALL: &'static [Self] = &[
        Self::Type,
        Self::SrcX,
        Self::SrcY,
        Self::SrcW,
        Self::SrcH,
        Self::CrtcX,
        Self::CrtcY,
        Self::CrtcW,
        Self::CrtcH,
        Self::FbId,
        Self::CrtcId,
        Self::Rotation,
        Self::InFormats,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::SrcX => "SRC_X",
            Self::SrcY => "SRC_Y",
            Self::SrcW => "SRC_W",
            Self::SrcH => "SRC_H",
            Self::CrtcX => "CRTC_X",
            Self::CrtcY => "CRTC_Y",
            Self::CrtcW => "CRTC_W",
            Self::CrtcH => "CRTC_H",
            Self::FbId => "FB_ID",
            Self::CrtcId => "CRTC_ID",
            Self::Rotation => "rotation",
            Self::InFormats => "IN_FORMATS",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One kernel property with its current and pending values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    id: PropertyId,
    name: &'static str,
    current: u64,
    pending: u64,
    immutable: bool,
    kind: PropertyKind,
    enums: Vec<EnumEntry>,
}

impl Property {
    fn from_info(name: &'static str, info: &PropertyInfo) -> Self {
        Self {
            id: info.id,
            name,
            current: info.value,
            pending: info.value,
            immutable: info.immutable,
            kind: info.kind,
            enums: info.enums.clone(),
        }
    }

    /// Kernel property id.
    #[must_use]
    pub const fn id(&self) -> PropertyId {
        self.id
    }

    /// Kernel property name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Value the kernel last acknowledged.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.current
    }

    /// Value the next commit pushes.
    #[must_use]
    pub const fn pending(&self) -> u64 {
        self.pending
    }

    /// The kernel does not accept writes to this property.
    #[must_use]
    pub const fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// The pending value differs from the acknowledged one and must be
    /// pushed to the kernel.
    #[must_use]
    pub const fn needs_commit(&self) -> bool {
        !self.immutable && self.pending != self.current
    }

    /// How the value is interpreted.
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Named values for enum and bitmask properties.
    #[must_use]
    pub fn enums(&self) -> &[EnumEntry] {
        &self.enums
    }

    /// Returns the value of the enum entry called `name`.
    ///
    /// For bitmask properties the entry value is a bit position and the
    /// returned value is the corresponding bit.
    #[must_use]
    pub fn enum_value(&self, name: &str) -> Option<u64> {
        let entry = self.enums.iter().find(|e| e.name == name)?;
        match self.kind {
            PropertyKind::Bitmask => 1_u64.checked_shl(u32::try_from(entry.value).ok()?),
            _ => Some(entry.value),
        }
    }

    /// Returns the name of the enum entry whose value is `value`.
    #[must_use]
    pub fn enum_name(&self, value: u64) -> Option<&str> {
        self.enums
            .iter()
            .find(|e| e.value == value)
            .map(|e| e.name.as_str())
    }

    /// Returns the union of every bit a bitmask property can carry.
    #[must_use]
    pub fn bitmask(&self) -> u64 {
        self.enums
            .iter()
            .filter_map(|e| 1_u64.checked_shl(u32::try_from(e.value).ok()?))
            .fold(0, |acc, bit| acc | bit)
    }

    pub(crate) fn set_pending(&mut self, value: u64) {
        self.pending = value;
    }

    /// Copies pending to current. Engine-only, after kernel acknowledgment.
    pub(crate) fn commit_pending(&mut self) {
        self.current = self.pending;
    }

    /// Records a value the kernel accepted through a legacy single-property
    /// write.
    pub(crate) fn set_current(&mut self, value: u64) {
        self.current = value;
        self.pending = value;
    }
}

/// The properties of one object, addressed by `P`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyTable<P> {
    props: Vec<Option<Property>>,
    _names: PhantomData<P>,
}

impl<P: PropertyName> PropertyTable<P> {
    /// Builds a table from the kernel's property list. Kernel properties with
    /// unknown names are ignored; known names the kernel lacks are absent.
    #[must_use]
    pub fn from_kernel(infos: &[PropertyInfo]) -> Self {
        let props = P::ALL
            .iter()
            .map(|&p| {
                infos
                    .iter()
                    .find(|info| info.name == p.name())
                    .map(|info| Property::from_info(p.name(), info))
            })
            .collect();
        Self {
            props,
            _names: PhantomData,
        }
    }

    /// Returns the property, if the kernel exposes it.
    #[must_use]
    pub fn get(&self, p: P) -> Option<&Property> {
        self.props.get(p.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, p: P) -> Option<&mut Property> {
        self.props.get_mut(p.index()).and_then(Option::as_mut)
    }

    /// Returns whether the kernel exposes `p`.
    #[must_use]
    pub fn has(&self, p: P) -> bool {
        self.get(p).is_some()
    }

    /// Current value of `p`, if present.
    #[must_use]
    pub fn current(&self, p: P) -> Option<u64> {
        self.get(p).map(Property::current)
    }

    /// Pending value of `p`, if present.
    #[must_use]
    pub fn pending(&self, p: P) -> Option<u64> {
        self.get(p).map(Property::pending)
    }

    /// Iterates present properties in table order.
    pub fn iter(&self) -> impl Iterator<Item = (P, &Property)> + '_ {
        P::ALL
            .iter()
            .zip(&self.props)
            .filter_map(|(&p, prop)| prop.as_ref().map(|prop| (p, prop)))
    }

    /// Returns `true` if any property needs to be pushed.
    #[must_use]
    pub fn needs_commit(&self) -> bool {
        self.iter().any(|(_, prop)| prop.needs_commit())
    }
}

/// A double-buffered value that is not a kernel property.
///
/// Used for state the engine tracks next to the property tables: the
/// connector's mode index, a pipeline's requested power state, its primary
/// buffer and legacy gamma ramps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Staged<T> {
    current: T,
    pending: T,
}

impl<T: Clone + PartialEq> Staged<T> {
    /// Creates a value whose current and pending halves are equal.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            current: value.clone(),
            pending: value,
        }
    }

    /// Last value the kernel acknowledged.
    #[must_use]
    pub const fn current(&self) -> &T {
        &self.current
    }

    /// Value the next commit applies.
    #[must_use]
    pub const fn pending(&self) -> &T {
        &self.pending
    }

    /// The pending value differs from the acknowledged one.
    #[must_use]
    pub fn needs_commit(&self) -> bool {
        self.pending != self.current
    }

    /// Replaces the pending value, returning the previous one.
    pub(crate) fn set_pending(&mut self, value: T) -> T {
        core::mem::replace(&mut self.pending, value)
    }

    pub(crate) fn commit_pending(&mut self) {
        self.current = self.pending.clone();
    }

    /// Overwrites both halves, for state learned from the kernel.
    pub(crate) fn reset(&mut self, value: T) {
        self.current = value.clone();
        self.pending = value;
    }
}

/// Builds a range [`PropertyInfo`].
#[cfg(test)]
pub(crate) fn property_info(id: u32, name: &str, value: u64) -> PropertyInfo {
    PropertyInfo {
        id: PropertyId(id),
        name: alloc::string::String::from(name),
        value,
        immutable: false,
        kind: PropertyKind::Range,
        enums: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    fn enum_info(id: u32, name: &str, value: u64, kind: PropertyKind, names: &[&str]) -> PropertyInfo {
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
    fn table_picks_known_names_only() {
        let table: PropertyTable<CrtcProperty> = PropertyTable::from_kernel(&[
            property_info(1, "ACTIVE", 0),
            property_info(2, "MODE_ID", 0),
            property_info(3, "SOMETHING_ELSE", 9),
        ]);
        assert!(table.has(CrtcProperty::Active));
        assert!(table.has(CrtcProperty::ModeId));
        assert!(!table.has(CrtcProperty::GammaLut));
        assert_eq!(table.iter().count(), 2);
    }

    #[test]
    fn pending_is_promoted_only_on_commit() {
        let mut table: PropertyTable<CrtcProperty> =
            PropertyTable::from_kernel(&[property_info(1, "ACTIVE", 0)]);
        let active = table.get_mut(CrtcProperty::Active).unwrap();
        active.set_pending(1);
        assert_eq!(active.current(), 0);
        assert!(active.needs_commit());
        active.commit_pending();
        assert_eq!(table.current(CrtcProperty::Active), Some(1));
        assert!(!table.needs_commit());
    }

    #[test]
    fn immutable_properties_never_need_commit() {
        let mut info = property_info(5, "vrr_capable", 1);
        info.immutable = true;
        let mut table: PropertyTable<ConnectorProperty> = PropertyTable::from_kernel(&[info]);
        table.get_mut(ConnectorProperty::VrrCapable).unwrap().set_pending(0);
        assert!(!table.needs_commit());
    }

    #[test]
    fn enum_lookup_by_name() {
        let table: PropertyTable<ConnectorProperty> = PropertyTable::from_kernel(&[enum_info(
            6,
            "Broadcast RGB",
            0,
            PropertyKind::Enum,
            &["Automatic", "Full", "Limited 16:235"],
        )]);
        let prop = table.get(ConnectorProperty::BroadcastRgb).unwrap();
        assert_eq!(prop.enum_value("Full"), Some(1));
        assert_eq!(prop.enum_value("Bogus"), None);
        assert_eq!(prop.enum_name(2), Some("Limited 16:235"));
    }

    #[test]
    fn bitmask_entries_map_to_bits() {
        let table: PropertyTable<PlaneProperty> = PropertyTable::from_kernel(&[enum_info(
            7,
            "rotation",
            1,
            PropertyKind::Bitmask,
            &["rotate-0", "rotate-90", "rotate-180"],
        )]);
        let prop = table.get(PlaneProperty::Rotation).unwrap();
        assert_eq!(prop.enum_value("rotate-90"), Some(0b10));
        assert_eq!(prop.bitmask(), 0b111);
    }

    #[test]
    fn set_current_updates_both_values() {
        let mut table: PropertyTable<ConnectorProperty> =
            PropertyTable::from_kernel(&[property_info(8, "DPMS", 0)]);
        table.get_mut(ConnectorProperty::Dpms).unwrap().set_current(3);
        assert_eq!(table.current(ConnectorProperty::Dpms), Some(3));
        assert_eq!(table.pending(ConnectorProperty::Dpms), Some(3));
    }

    #[test]
    fn staged_value_tracks_both_halves() {
        let mut mode = Staged::new(0_usize);
        assert_eq!(mode.set_pending(2), 0);
        assert!(mode.needs_commit());
        assert_eq!(mode.set_pending(0), 2);
        assert!(!mode.needs_commit());
        mode.set_pending(1);
        mode.commit_pending();
        assert_eq!(*mode.current(), 1);
        assert!(!mode.needs_commit());
    }
}
