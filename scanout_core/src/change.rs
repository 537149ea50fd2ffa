// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Change-sets and transactions.
//!
//! A change-set describes only what a caller wants to change; every field
//! is optional and `None` means "leave as is". Change-sets never carry
//! current values. They are staged into the pending halves of the affected
//! objects by the commit engine, never applied to current state directly.
//!
//! A [`Transaction`] maps pipelines to their change-sets and is committed as
//! one unit: all pipelines in one atomic request, or one legacy call
//! sequence per pipeline in pipeline order.

use alloc::collections::BTreeMap;

use crate::buffer::Buffer;
use crate::gamma::GammaRamp;
use crate::geometry::Point;
use crate::id::Handle;
use crate::pipeline::Pipeline;
use crate::transform::PlaneTransformation;

/// Refresh timing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Fixed refresh rate.
    #[default]
    Fixed,
    /// Variable refresh rate.
    Adaptive,
}

/// RGB quantization range sent to the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RgbRange {
    /// Let the driver decide.
    #[default]
    Automatic,
    /// Full range, 0 to 255.
    Full,
    /// Limited range, 16 to 235.
    Limited,
}

impl RgbRange {
    /// The `Broadcast RGB` enum name for this range.
    #[must_use]
    pub const fn kernel_name(self) -> &'static str {
        match self {
            Self::Automatic => "Automatic",
            Self::Full => "Full",
            Self::Limited => "Limited 16:235",
        }
    }

    /// Parses a `Broadcast RGB` enum name.
    #[must_use]
    pub fn from_kernel_name(name: &str) -> Option<Self> {
        [Self::Automatic, Self::Full, Self::Limited]
            .into_iter()
            .find(|r| r.kernel_name() == name)
    }
}

/// Connector-side changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectorChange {
    /// Index into the connector's mode list.
    pub mode: Option<usize>,
    /// Overscan in percent.
    pub overscan: Option<u32>,
    /// RGB quantization range.
    pub rgb_range: Option<RgbRange>,
}

/// CRTC-side changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrtcChange {
    /// Requested power state.
    pub active: Option<bool>,
    /// Gamma ramp.
    pub gamma: Option<GammaRamp>,
    /// Refresh timing.
    pub sync_mode: Option<SyncMode>,
}

/// Primary plane changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneChange {
    /// Next content buffer.
    pub buffer: Option<Buffer>,
    /// Rotation and reflection.
    pub transformation: Option<PlaneTransformation>,
}

/// Cursor changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CursorChange {
    /// New image; `Some(None)` hides the cursor.
    pub buffer: Option<Option<Buffer>>,
    /// Hotspot within the image.
    pub hotspot: Option<Point>,
    /// Position on the output.
    pub position: Option<Point>,
}

/// Everything one pipeline should change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineChange {
    /// Connector-side changes.
    pub connector: ConnectorChange,
    /// CRTC-side changes.
    pub crtc: CrtcChange,
    /// Primary plane changes.
    pub plane: PlaneChange,
    /// Cursor changes.
    pub cursor: CursorChange,
}

impl PipelineChange {
    /// An empty change-set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects a mode by index.
    #[must_use]
    pub fn with_mode(mut self, index: usize) -> Self {
        self.connector.mode = Some(index);
        self
    }

    /// Sets overscan.
    #[must_use]
    pub fn with_overscan(mut self, overscan: u32) -> Self {
        self.connector.overscan = Some(overscan);
        self
    }

    /// Sets the RGB range.
    #[must_use]
    pub fn with_rgb_range(mut self, range: RgbRange) -> Self {
        self.connector.rgb_range = Some(range);
        self
    }

    /// Requests a power state.
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.crtc.active = Some(active);
        self
    }

    /// Sets the gamma ramp.
    #[must_use]
    pub fn with_gamma(mut self, ramp: GammaRamp) -> Self {
        self.crtc.gamma = Some(ramp);
        self
    }

    /// Sets refresh timing.
    #[must_use]
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.crtc.sync_mode = Some(mode);
        self
    }

    /// Sets the next content buffer.
    #[must_use]
    pub fn with_buffer(mut self, buffer: Buffer) -> Self {
        self.plane.buffer = Some(buffer);
        self
    }

    /// Sets rotation and reflection.
    #[must_use]
    pub fn with_transformation(mut self, transformation: PlaneTransformation) -> Self {
        self.plane.transformation = Some(transformation);
        self
    }

    /// Sets or hides the cursor image.
    #[must_use]
    pub fn with_cursor(mut self, buffer: Option<Buffer>, hotspot: Point) -> Self {
        self.cursor.buffer = Some(buffer);
        self.cursor.hotspot = Some(hotspot);
        self
    }

    /// Moves the cursor.
    #[must_use]
    pub fn with_cursor_position(mut self, position: Point) -> Self {
        self.cursor.position = Some(position);
        self
    }

    /// Returns `true` if nothing is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlays `other`: fields set in `other` replace those in `self`.
    pub fn merge(&mut self, other: Self) {
        fn take<T>(dst: &mut Option<T>, src: Option<T>) {
            if src.is_some() {
                *dst = src;
            }
        }
        take(&mut self.connector.mode, other.connector.mode);
        take(&mut self.connector.overscan, other.connector.overscan);
        take(&mut self.connector.rgb_range, other.connector.rgb_range);
        take(&mut self.crtc.active, other.crtc.active);
        take(&mut self.crtc.gamma, other.crtc.gamma);
        take(&mut self.crtc.sync_mode, other.crtc.sync_mode);
        take(&mut self.plane.buffer, other.plane.buffer);
        take(&mut self.plane.transformation, other.plane.transformation);
        take(&mut self.cursor.buffer, other.cursor.buffer);
        take(&mut self.cursor.hotspot, other.cursor.hotspot);
        take(&mut self.cursor.position, other.cursor.position);
    }
}

/// Change-sets for several pipelines, committed together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    changes: BTreeMap<Handle<Pipeline>, PipelineChange>,
}

impl Transaction {
    /// An empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transaction touching one pipeline.
    #[must_use]
    pub fn single(pipeline: Handle<Pipeline>, change: PipelineChange) -> Self {
        let mut tx = Self::new();
        tx.insert(pipeline, change);
        tx
    }

    /// Adds a change-set, merging with any already present for `pipeline`.
    pub fn insert(&mut self, pipeline: Handle<Pipeline>, change: PipelineChange) {
        self.changes.entry(pipeline).or_default().merge(change);
    }

    /// Returns the change-set for `pipeline`.
    #[must_use]
    pub fn get(&self, pipeline: Handle<Pipeline>) -> Option<&PipelineChange> {
        self.changes.get(&pipeline)
    }

    /// Iterates change-sets in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<Pipeline>, &PipelineChange)> + '_ {
        self.changes.iter().map(|(&h, c)| (h, c))
    }

    /// Pipelines in the transaction, in order.
    pub fn pipelines(&self) -> impl Iterator<Item = Handle<Pipeline>> + '_ {
        self.changes.keys().copied()
    }

    /// Number of pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns `true` if no pipeline is included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_unset_fields() {
        let mut a = PipelineChange::new().with_mode(1).with_overscan(10);
        a.merge(PipelineChange::new().with_overscan(20).with_active(true));
        assert_eq!(a.connector.mode, Some(1));
        assert_eq!(a.connector.overscan, Some(20));
        assert_eq!(a.crtc.active, Some(true));
    }

    #[test]
    fn transaction_merges_per_pipeline() {
        let p = Handle::<Pipeline>::new(0, 0);
        let q = Handle::<Pipeline>::new(1, 0);
        let mut tx = Transaction::new();
        tx.insert(q, PipelineChange::new().with_active(false));
        tx.insert(p, PipelineChange::new().with_mode(0));
        tx.insert(p, PipelineChange::new().with_sync_mode(SyncMode::Adaptive));
        assert_eq!(tx.len(), 2);
        assert_eq!(tx.pipelines().collect::<alloc::vec::Vec<_>>(), [p, q]);
        let change = tx.get(p).unwrap();
        assert_eq!(change.connector.mode, Some(0));
        assert_eq!(change.crtc.sync_mode, Some(SyncMode::Adaptive));
    }

    #[test]
    fn empty_change_set() {
        assert!(PipelineChange::new().is_empty());
        assert!(!PipelineChange::new().with_cursor_position(Point::ORIGIN).is_empty());
    }

    #[test]
    fn rgb_range_names_round_trip() {
        assert_eq!(RgbRange::from_kernel_name("Limited 16:235"), Some(RgbRange::Limited));
        assert_eq!(RgbRange::from_kernel_name("Bogus"), None);
    }
}
