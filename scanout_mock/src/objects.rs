// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated kernel objects and their property lists.

use scanout_core::device::{CursorImage, EnumEntry, ModeInfo, PropertyInfo, PropertyKind};
use scanout_core::format::FormatTable;
use scanout_core::gamma::GammaRamp;
use scanout_core::geometry::{Point, Size};
use scanout_core::id::{ObjectId, PropertyId};
use scanout_core::object::PlaneType;
use scanout_core::transform::PlaneTransformation;

/// Builds a mode the way `cvt` would name it.
#[must_use]
pub fn mode(width: u32, height: u32, refresh_hz: u32) -> ModeInfo {
    ModeInfo {
        size: Size::new(width, height),
        refresh_mhz: refresh_hz * 1000,
        clock_khz: width * height / 1000 * refresh_hz,
        preferred: false,
        name: format!("{width}x{height}"),
    }
}

/// Hands out kernel ids. Objects, properties, blobs, framebuffers and GEM
/// handles share one counter so ids never collide in test output.
#[derive(Debug)]
pub(crate) struct Ids(u32);

impl Ids {
    pub(crate) fn new() -> Self {
        Self(0)
    }

    pub(crate) fn next(&mut self) -> u32 {
        self.0 += 1;
        self.0
    }
}

pub(crate) fn range(ids: &mut Ids, name: &str, value: u64) -> PropertyInfo {
    PropertyInfo {
        id: PropertyId(ids.next()),
        name: name.to_owned(),
        value,
        immutable: false,
        kind: PropertyKind::Range,
        enums: Vec::new(),
    }
}

pub(crate) fn immutable(ids: &mut Ids, name: &str, value: u64) -> PropertyInfo {
    PropertyInfo {
        immutable: true,
        ..range(ids, name, value)
    }
}

pub(crate) fn typed(ids: &mut Ids, name: &str, value: u64, kind: PropertyKind) -> PropertyInfo {
    PropertyInfo {
        kind,
        ..range(ids, name, value)
    }
}

/// An enum (or with `bitmask`, a bitmask) property. Entry values are list
/// positions.
pub(crate) fn enumeration(
    ids: &mut Ids,
    name: &str,
    value: u64,
    names: &[&str],
    bitmask: bool,
) -> PropertyInfo {
    PropertyInfo {
        kind: if bitmask {
            PropertyKind::Bitmask
        } else {
            PropertyKind::Enum
        },
        enums: names
            .iter()
            .zip(0_u64..)
            .map(|(name, value)| EnumEntry {
                name: (*name).to_owned(),
                value,
            })
            .collect(),
        ..range(ids, name, value)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct MockConnector {
    pub(crate) id: ObjectId,
    pub(crate) connected: bool,
    pub(crate) modes: Vec<ModeInfo>,
    pub(crate) possible_crtcs: u32,
    pub(crate) props: Vec<PropertyInfo>,
}

impl MockConnector {
    pub(crate) fn new(ids: &mut Ids, possible_crtcs: u32) -> Self {
        let id = ObjectId(ids.next());
        let props = vec![
            typed(ids, "CRTC_ID", 0, PropertyKind::Object),
            enumeration(ids, "DPMS", 0, &["On", "Standby", "Suspend", "Off"], false),
            immutable(ids, "non-desktop", 0),
            immutable(ids, "vrr_capable", 0),
            range(ids, "overscan", 0),
            enumeration(
                ids,
                "Broadcast RGB",
                0,
                &["Automatic", "Full", "Limited 16:235"],
                false,
            ),
        ];
        Self {
            id,
            connected: true,
            modes: Vec::new(),
            possible_crtcs,
            props,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct MockCrtc {
    pub(crate) id: ObjectId,
    pub(crate) gamma_size: u32,
    pub(crate) mode: Option<ModeInfo>,
    pub(crate) gamma: Option<GammaRamp>,
    pub(crate) cursor: Option<CursorImage>,
    pub(crate) hotspot: Point,
    pub(crate) cursor_pos: Point,
    pub(crate) props: Vec<PropertyInfo>,
}

impl MockCrtc {
    pub(crate) fn new(ids: &mut Ids, gamma_size: u32) -> Self {
        let id = ObjectId(ids.next());
        let props = vec![
            typed(ids, "MODE_ID", 0, PropertyKind::Blob),
            range(ids, "ACTIVE", 0),
            range(ids, "VRR_ENABLED", 0),
            typed(ids, "GAMMA_LUT", 0, PropertyKind::Blob),
            immutable(ids, "GAMMA_LUT_SIZE", u64::from(gamma_size)),
        ];
        Self {
            id,
            gamma_size,
            mode: None,
            gamma: None,
            cursor: None,
            hotspot: Point::ORIGIN,
            cursor_pos: Point::ORIGIN,
            props,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct MockPlane {
    pub(crate) id: ObjectId,
    pub(crate) possible_crtcs: u32,
    pub(crate) formats: FormatTable,
    pub(crate) props: Vec<PropertyInfo>,
}

impl MockPlane {
    pub(crate) fn new(
        ids: &mut Ids,
        plane_type: PlaneType,
        possible_crtcs: u32,
        formats: FormatTable,
    ) -> Self {
        let id = ObjectId(ids.next());
        let type_value = match plane_type {
            PlaneType::Overlay => 0,
            PlaneType::Primary => 1,
            PlaneType::Cursor => 2,
        };
        let mut kind = enumeration(
            ids,
            "type",
            type_value,
            &["Overlay", "Primary", "Cursor"],
            false,
        );
        kind.immutable = true;
        let rotations: Vec<&str> = PlaneTransformation::KERNEL_NAMES
            .iter()
            .map(|(name, _)| *name)
            .collect();
        let mut props = vec![
            kind,
            typed(ids, "FB_ID", 0, PropertyKind::Object),
            typed(ids, "CRTC_ID", 0, PropertyKind::Object),
        ];
        for name in [
            "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W", "CRTC_H",
        ] {
            props.push(range(ids, name, 0));
        }
        props.push(enumeration(
            ids,
            "rotation",
            PlaneTransformation::ROTATE_0.value(),
            &rotations,
            true,
        ));
        let mut in_formats = typed(ids, "IN_FORMATS", 0, PropertyKind::Blob);
        in_formats.immutable = true;
        props.push(in_formats);
        Self {
            id,
            possible_crtcs,
            formats,
            props,
        }
    }

    pub(crate) fn is_primary_for(&self, pipe: usize) -> bool {
        let primary = self
            .props
            .iter()
            .any(|p| p.name == "type" && p.value == 1);
        primary && pipe < 32 && self.possible_crtcs & (1 << pipe) != 0
    }
}

pub(crate) fn find<'a>(props: &'a [PropertyInfo], name: &str) -> Option<&'a PropertyInfo> {
    props.iter().find(|p| p.name == name)
}

pub(crate) fn find_mut<'a>(
    props: &'a mut [PropertyInfo],
    name: &str,
) -> Option<&'a mut PropertyInfo> {
    props.iter_mut().find(|p| p.name == name)
}

pub(crate) fn set(props: &mut [PropertyInfo], name: &str, value: u64) {
    if let Some(prop) = find_mut(props, name) {
        prop.value = value;
    }
}
