// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Staging journal.
//!
//! Every write to a pending value made while an operation runs goes
//! through a [`Journal`], which records the value it replaced. If the
//! operation fails, [`Journal::rollback`] restores the pending state that
//! existed before the operation began, newest entry first. Current values
//! are never journaled: only the commit engine writes them, and only after
//! the kernel accepted a request.
//!
//! Entries are tagged with the [`Concern`] they belong to so the legacy
//! path can revert just the steps that did not run.

use alloc::vec::Vec;

use crate::buffer::Buffer;
use crate::gamma::GammaRamp;
use crate::id::{BlobId, Handle};
use crate::object::Objects;
use crate::pipeline::{CursorState, Pipeline};
use crate::property::{ConnectorProperty, CrtcProperty, PlaneProperty};

/// Legacy call group an entry belongs to, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Concern {
    /// Requested power state.
    Power,
    /// Mode.
    Modeset,
    /// Connector and CRTC properties.
    Property,
    /// Gamma ramp.
    Gamma,
    /// Primary plane content.
    Flip,
    /// Cursor image and position.
    Cursor,
}

#[derive(Clone, Debug)]
pub(crate) enum Entry {
    ConnectorProp {
        prop: ConnectorProperty,
        previous: u64,
    },
    CrtcProp {
        prop: CrtcProperty,
        previous: u64,
    },
    PlaneProp {
        prop: PlaneProperty,
        previous: u64,
    },
    Mode(usize),
    Active(bool),
    Buffer(Option<Buffer>),
    Cursor(CursorState),
    LegacyGamma(Option<GammaRamp>),
    GammaBlob(Option<BlobId>),
    LegacyModeset(bool),
}

impl Entry {
    pub(crate) fn concern(&self) -> Concern {
        match self {
            Self::ConnectorProp { .. } | Self::CrtcProp { .. } => Concern::Property,
            Self::Mode(_) | Self::LegacyModeset(_) => Concern::Modeset,
            Self::Active(_) => Concern::Power,
            Self::LegacyGamma(_) | Self::GammaBlob(_) => Concern::Gamma,
            Self::PlaneProp { .. } | Self::Buffer(_) => Concern::Flip,
            Self::Cursor(_) => Concern::Cursor,
        }
    }
}

/// Previous pending values, newest last.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    records: Vec<(Handle<Pipeline>, Entry)>,
}

impl Journal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, pipeline: Handle<Pipeline>, entry: Entry) {
        self.records.push((pipeline, entry));
    }

    /// Stages a connector property. Returns `false` if the connector lacks
    /// it.
    pub(crate) fn connector_prop(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        prop: ConnectorProperty,
        value: u64,
    ) -> bool {
        let conn = objects.pipelines.get(pipeline).connector();
        let Some(property) = objects.connectors.get_mut(conn).properties_mut().get_mut(prop)
        else {
            return false;
        };
        let previous = property.pending();
        if previous != value {
            property.set_pending(value);
            self.push(pipeline, Entry::ConnectorProp { prop, previous });
        }
        true
    }

    /// Stages a CRTC property. Returns `false` if the CRTC lacks it.
    pub(crate) fn crtc_prop(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        prop: CrtcProperty,
        value: u64,
    ) -> bool {
        let crtc = objects.pipelines.get(pipeline).crtc();
        let Some(property) = objects.crtcs.get_mut(crtc).properties_mut().get_mut(prop) else {
            return false;
        };
        let previous = property.pending();
        if previous != value {
            property.set_pending(value);
            self.push(pipeline, Entry::CrtcProp { prop, previous });
        }
        true
    }

    /// Stages a primary plane property. Returns `false` if there is no
    /// plane or it lacks the property.
    pub(crate) fn plane_prop(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        prop: PlaneProperty,
        value: u64,
    ) -> bool {
        let Some(plane) = objects.pipelines.get(pipeline).plane() else {
            return false;
        };
        let Some(property) = objects.planes.get_mut(plane).properties_mut().get_mut(prop) else {
            return false;
        };
        let previous = property.pending();
        if previous != value {
            property.set_pending(value);
            self.push(pipeline, Entry::PlaneProp { prop, previous });
        }
        true
    }

    pub(crate) fn mode(&mut self, objects: &mut Objects, pipeline: Handle<Pipeline>, index: usize) {
        let conn = objects.pipelines.get(pipeline).connector();
        let staged = &mut objects.connectors.get_mut(conn).mode;
        if *staged.pending() != index {
            let previous = staged.set_pending(index);
            self.push(pipeline, Entry::Mode(previous));
        }
    }

    pub(crate) fn active(&mut self, objects: &mut Objects, pipeline: Handle<Pipeline>, active: bool) {
        let staged = &mut objects.pipelines.get_mut(pipeline).active;
        if *staged.pending() != active {
            let previous = staged.set_pending(active);
            self.push(pipeline, Entry::Active(previous));
        }
    }

    pub(crate) fn buffer(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        buffer: Option<Buffer>,
    ) {
        let staged = &mut objects.pipelines.get_mut(pipeline).buffer;
        if *staged.pending() != buffer {
            let previous = staged.set_pending(buffer);
            self.push(pipeline, Entry::Buffer(previous));
        }
    }

    pub(crate) fn cursor(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        cursor: CursorState,
    ) {
        let slot = &mut objects.pipelines.get_mut(pipeline).cursor;
        if *slot != cursor {
            let previous = core::mem::replace(slot, cursor);
            self.push(pipeline, Entry::Cursor(previous));
        }
    }

    pub(crate) fn legacy_gamma(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        ramp: Option<GammaRamp>,
    ) {
        let crtc = objects.pipelines.get(pipeline).crtc();
        let staged = &mut objects.crtcs.get_mut(crtc).legacy_gamma;
        if *staged.pending() != ramp {
            let previous = staged.set_pending(ramp);
            self.push(pipeline, Entry::LegacyGamma(previous));
        }
    }

    pub(crate) fn gamma_blob(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        blob: Option<BlobId>,
    ) {
        let crtc = objects.pipelines.get(pipeline).crtc();
        let staged = &mut objects.crtcs.get_mut(crtc).gamma_blob;
        if *staged.pending() != blob {
            let previous = staged.set_pending(blob);
            self.push(pipeline, Entry::GammaBlob(previous));
        }
    }

    pub(crate) fn legacy_modeset(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        needed: bool,
    ) {
        let slot = &mut objects.pipelines.get_mut(pipeline).legacy_needs_modeset;
        if *slot != needed {
            let previous = core::mem::replace(slot, needed);
            self.push(pipeline, Entry::LegacyModeset(previous));
        }
    }

    /// Reverts every entry, newest first. Returns the number reverted.
    pub(crate) fn rollback(&mut self, objects: &mut Objects) -> usize {
        let n = self.records.len();
        while let Some((pipeline, entry)) = self.records.pop() {
            undo(objects, pipeline, entry);
        }
        n
    }

    /// Reverts the entries of `pipeline` whose concern is `from` or later,
    /// newest first. Other entries stay recorded.
    pub(crate) fn rollback_from(
        &mut self,
        objects: &mut Objects,
        pipeline: Handle<Pipeline>,
        from: Concern,
    ) -> usize {
        let mut reverted = 0;
        let mut i = self.records.len();
        while i > 0 {
            i -= 1;
            if self.records[i].0 == pipeline && self.records[i].1.concern() >= from {
                let (p, entry) = self.records.remove(i);
                undo(objects, p, entry);
                reverted += 1;
            }
        }
        reverted
    }

    /// Forgets the entries of `pipeline` for `concern`: the step ran and a
    /// later failure must not revert it.
    pub(crate) fn settle(&mut self, pipeline: Handle<Pipeline>, concern: Concern) {
        self.records
            .retain(|(p, entry)| *p != pipeline || entry.concern() != concern);
    }

    /// Forgets the entries of one connector property of `pipeline`.
    pub(crate) fn settle_connector_prop(
        &mut self,
        pipeline: Handle<Pipeline>,
        prop: ConnectorProperty,
    ) {
        self.records.retain(|(p, entry)| {
            *p != pipeline || !matches!(entry, Entry::ConnectorProp { prop: q, .. } if *q == prop)
        });
    }

    /// Keeps everything staged.
    pub(crate) fn accept(&mut self) {
        self.records.clear();
    }
}

fn undo(objects: &mut Objects, pipeline: Handle<Pipeline>, entry: Entry) {
    let Some(pipe) = objects.pipelines.try_get(pipeline) else {
        return;
    };
    let (conn, crtc, plane) = (pipe.connector(), pipe.crtc(), pipe.plane());
    match entry {
        Entry::ConnectorProp { prop, previous } => {
            if let Some(p) = objects.connectors.get_mut(conn).properties_mut().get_mut(prop) {
                p.set_pending(previous);
            }
        }
        Entry::CrtcProp { prop, previous } => {
            if let Some(p) = objects.crtcs.get_mut(crtc).properties_mut().get_mut(prop) {
                p.set_pending(previous);
            }
        }
        Entry::PlaneProp { prop, previous } => {
            if let Some(plane) = plane
                && let Some(p) = objects.planes.get_mut(plane).properties_mut().get_mut(prop)
            {
                p.set_pending(previous);
            }
        }
        Entry::Mode(previous) => {
            objects.connectors.get_mut(conn).mode.set_pending(previous);
        }
        Entry::Active(previous) => {
            objects.pipelines.get_mut(pipeline).active.set_pending(previous);
        }
        Entry::Buffer(previous) => {
            objects.pipelines.get_mut(pipeline).buffer.set_pending(previous);
        }
        Entry::Cursor(previous) => {
            objects.pipelines.get_mut(pipeline).cursor = previous;
        }
        Entry::LegacyGamma(previous) => {
            objects.crtcs.get_mut(crtc).legacy_gamma.set_pending(previous);
        }
        Entry::GammaBlob(previous) => {
            objects.crtcs.get_mut(crtc).gamma_blob.set_pending(previous);
        }
        Entry::LegacyModeset(previous) => {
            objects.pipelines.get_mut(pipeline).legacy_needs_modeset = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concerns_follow_legacy_order() {
        assert!(Concern::Power < Concern::Modeset);
        assert!(Concern::Modeset < Concern::Property);
        assert!(Concern::Property < Concern::Gamma);
        assert!(Concern::Gamma < Concern::Flip);
        assert!(Concern::Flip < Concern::Cursor);
        assert_eq!(Entry::Active(true).concern(), Concern::Power);
        assert_eq!(Entry::Mode(0).concern(), Concern::Modeset);
        assert_eq!(
            Entry::ConnectorProp {
                prop: ConnectorProperty::Overscan,
                previous: 0,
            }
            .concern(),
            Concern::Property
        );
        assert_eq!(Entry::Buffer(None).concern(), Concern::Flip);
        assert_eq!(Entry::GammaBlob(None).concern(), Concern::Gamma);
        assert_eq!(Entry::Cursor(CursorState::default()).concern(), Concern::Cursor);
    }

    #[test]
    fn settled_entries_survive_a_later_rollback() {
        let p = Handle::new(0, 0);
        let mut journal = Journal::new();
        journal.push(p, Entry::Mode(0));
        journal.push(p, Entry::LegacyModeset(true));
        journal.push(
            p,
            Entry::ConnectorProp {
                prop: ConnectorProperty::Overscan,
                previous: 0,
            },
        );
        journal.push(
            p,
            Entry::ConnectorProp {
                prop: ConnectorProperty::BroadcastRgb,
                previous: 0,
            },
        );
        journal.push(p, Entry::Buffer(None));

        journal.settle(p, Concern::Modeset);
        journal.settle_connector_prop(p, ConnectorProperty::Overscan);
        assert_eq!(journal.len(), 2, "broadcast RGB and buffer remain");

        let other = Handle::new(1, 0);
        journal.settle(other, Concern::Flip);
        assert_eq!(journal.len(), 2, "other pipelines are untouched");

        let mut objects = Objects::default();
        assert_eq!(journal.rollback_from(&mut objects, p, Concern::Property), 2);
        assert!(journal.is_empty());
    }

    #[test]
    fn empty_journal_rolls_back_nothing() {
        let mut journal = Journal::new();
        let mut objects = Objects::default();
        assert!(journal.is_empty());
        assert_eq!(journal.rollback(&mut objects), 0);
    }
}
