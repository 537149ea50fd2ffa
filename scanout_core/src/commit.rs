// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The commit engine.
//!
//! The engine turns staged pipeline state into kernel calls using one of two
//! strategies, chosen once per GPU:
//!
//! ```text
//!                  stage(change-set)            journal records old pending
//!                         │
//!          ┌──────────────┴──────────────┐
//!       Atomic                         Legacy
//!   prepare full state             local validation only
//!   build request                  per pipeline, in order:
//!   TEST_ONLY ──fail──▶ Validation   DPMS ─▶ SetCrtc + props
//!   real commit ─fail─▶ Commit        ─▶ gamma ─▶ page flip ─▶ cursor
//!   promote pushed pending→current  failed step: revert it and later
//! ```
//!
//! # Atomic
//!
//! Every atomic commit is preceded by a test-only request carrying the same
//! properties. For a pipeline that ends up active the request carries every
//! property whose pending value differs from its current value, plus the
//! routing and scan-out properties (`CRTC_ID`, `MODE_ID`, `ACTIVE`,
//! `FB_ID`) so the kernel sees a complete configuration. For a pipeline
//! being switched off only connector `CRTC_ID=0`, CRTC `ACTIVE=0` and plane
//! `CRTC_ID=0` are sent. When the kernel accepts the request exactly the
//! properties it carried are promoted; when it rejects it nothing is.
//!
//! # Legacy
//!
//! There is no kernel-side test. Each step that succeeds promotes its own
//! state; a failing step reverts the staged state of that step and every
//! later step of the same pipeline and stops. Other pipelines in the
//! transaction still run.

use alloc::vec::Vec;

use log::{error, warn};

use crate::buffer::{self, Buffer, ReleaseQueue};
use crate::change::{CursorChange, PipelineChange, RgbRange, SyncMode};
use crate::device::{BlobData, Device, DeviceCaps, DeviceError};
use crate::error::{CapabilityError, CommitError, LegacyStep};
use crate::format::Fourcc;
use crate::gamma::GammaRamp;
use crate::geometry::{Point, Size};
use crate::id::{BlobId, Handle, ObjectId};
use crate::journal::{Concern, Journal};
use crate::object::{Connector, ConnectorMode, Crtc, DPMS_OFF, DPMS_ON, Objects, Plane};
use crate::output::{BoundedQueue, OutputEvent};
use crate::pipeline::{self, Pipeline};
use crate::property::{
    ConnectorProperty, CrtcProperty, PlaneProperty, PropertyName, PropertyTable,
};
use crate::request::{AtomicRequest, CommitFlags};
use crate::time::HostTime;
use crate::trace::{
    CommitEvent, CommitOutcome, LegacyStepEvent, PageFlipEvent, PresentFailedEvent,
    RollbackEvent, Tracer,
};
use crate::transform::PlaneTransformation;

/// Kernel programming model used by a GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// One validated, all-or-nothing property request per transaction.
    Atomic,
    /// Separate ioctls per concern, without a kernel-side test.
    Legacy,
}

impl Strategy {
    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Atomic => "atomic",
            Self::Legacy => "legacy",
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Pushed {
    Connector(Handle<Connector>, ConnectorProperty),
    Crtc(Handle<Crtc>, CrtcProperty),
    Plane(Handle<Plane>, PlaneProperty),
}

#[derive(Debug, Default)]
struct Built {
    request: AtomicRequest,
    pushed: Vec<Pushed>,
    modeset: bool,
    flip: bool,
}

/// Adds the properties of one object to `built`. `forced` are pushed even
/// when unchanged; when `full` is false only `forced` are considered.
/// Changes to `routing` properties require a modeset.
fn push_table<P: PropertyName>(
    built: &mut Built,
    object: ObjectId,
    table: &PropertyTable<P>,
    forced: &[P],
    routing: &[P],
    full: bool,
    mut record: impl FnMut(P) -> Pushed,
) {
    for (name, prop) in table.iter() {
        let is_forced = forced.contains(&name);
        if prop.is_immutable() || !(is_forced || full && prop.needs_commit()) {
            continue;
        }
        built.request.add(object, prop.id(), prop.pending());
        built.pushed.push(record(name));
        if routing.contains(&name) && prop.pending() != prop.current() {
            built.modeset = true;
        }
    }
}

fn timestamp() -> Option<HostTime> {
    #[cfg(feature = "std")]
    {
        Some(crate::time::now())
    }
    #[cfg(not(feature = "std"))]
    {
        None
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Borrowed view of a [`Gpu`](crate::gpu::Gpu) used for one operation.
pub(crate) struct Engine<'g, D: Device> {
    pub(crate) device: &'g mut D,
    pub(crate) objects: &'g mut Objects,
    pub(crate) events: &'g mut BoundedQueue<OutputEvent>,
    pub(crate) releases: &'g ReleaseQueue,
    pub(crate) tracer: Tracer<'g>,
    pub(crate) strategy: Strategy,
    pub(crate) caps: DeviceCaps,
    pub(crate) sequence: &'g mut u64,
}

impl<D: Device> Engine<'_, D> {
    // -- Staging --

    /// Validates `change` and writes it into pending state.
    pub(crate) fn stage(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        change: &PipelineChange,
    ) -> Result<(), CommitError> {
        if let Some(index) = change.connector.mode {
            self.stage_mode(journal, p, index)?;
        }
        if let Some(active) = change.crtc.active {
            journal.active(self.objects, p, active);
        }
        if let Some(overscan) = change.connector.overscan {
            self.stage_overscan(journal, p, overscan)?;
        }
        if let Some(range) = change.connector.rgb_range {
            self.stage_rgb_range(journal, p, range)?;
        }
        if let Some(mode) = change.crtc.sync_mode {
            self.stage_sync_mode(journal, p, mode)?;
        }
        if let Some(ramp) = &change.crtc.gamma {
            self.stage_gamma(journal, p, ramp)?;
        }
        if let Some(transformation) = change.plane.transformation {
            self.stage_transformation(journal, p, transformation)?;
        }
        if let Some(buffer) = &change.plane.buffer {
            self.stage_buffer(journal, p, buffer)?;
        }
        self.stage_cursor(journal, p, &change.cursor)
    }

    fn stage_mode(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        index: usize,
    ) -> Result<(), CommitError> {
        let connector = self.objects.connectors.get(self.objects.pipelines.get(p).connector());
        if index >= connector.modes().len() {
            return Err(CapabilityError::ModeOutOfRange(index).into());
        }
        let changed = index != connector.current_mode_index();
        journal.mode(self.objects, p, index);
        if self.strategy == Strategy::Legacy && changed {
            journal.legacy_modeset(self.objects, p, true);
        }
        Ok(())
    }

    fn stage_overscan(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        overscan: u32,
    ) -> Result<(), CommitError> {
        if overscan > 100 {
            return Err(CapabilityError::OverscanOutOfRange(overscan).into());
        }
        let connector = self.objects.connectors.get(self.objects.pipelines.get(p).connector());
        let props = connector.properties();
        if props.has(ConnectorProperty::Overscan) {
            journal.connector_prop(self.objects, p, ConnectorProperty::Overscan, u64::from(overscan));
            return Ok(());
        }
        let underscan = props
            .get(ConnectorProperty::Underscan)
            .and_then(|u| u.enum_value(if overscan > 0 { "on" } else { "off" }));
        let Some(underscan) = underscan else {
            return if overscan == 0 {
                Ok(())
            } else {
                Err(CapabilityError::NoOverscanProperty.into())
            };
        };
        let size = connector.pending_mode().map_or(Size::ZERO, ConnectorMode::size);
        let hborder = if size.height == 0 {
            0
        } else {
            u64::from(overscan) * u64::from(size.width) / u64::from(size.height)
        };
        journal.connector_prop(self.objects, p, ConnectorProperty::Underscan, underscan);
        journal.connector_prop(self.objects, p, ConnectorProperty::UnderscanHBorder, hborder);
        journal.connector_prop(
            self.objects,
            p,
            ConnectorProperty::UnderscanVBorder,
            u64::from(overscan),
        );
        Ok(())
    }

    fn stage_rgb_range(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        range: RgbRange,
    ) -> Result<(), CommitError> {
        let connector = self.objects.connectors.get(self.objects.pipelines.get(p).connector());
        let prop = connector
            .properties()
            .get(ConnectorProperty::BroadcastRgb)
            .ok_or(CapabilityError::NoRgbRangeProperty)?;
        let value = prop
            .enum_value(range.kernel_name())
            .ok_or(CapabilityError::UnsupportedRgbRange)?;
        journal.connector_prop(self.objects, p, ConnectorProperty::BroadcastRgb, value);
        Ok(())
    }

    fn stage_sync_mode(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        mode: SyncMode,
    ) -> Result<(), CommitError> {
        let adaptive = mode == SyncMode::Adaptive;
        let pipe = self.objects.pipelines.get(p);
        let vrr_capable = self.objects.connectors.get(pipe.connector()).vrr_capable();
        let has_prop = self
            .objects
            .crtcs
            .get(pipe.crtc())
            .properties()
            .has(CrtcProperty::VrrEnabled);
        if self.strategy == Strategy::Legacy || !has_prop {
            return if adaptive {
                Err(CapabilityError::NoVrr.into())
            } else {
                Ok(())
            };
        }
        if adaptive && !vrr_capable {
            return Err(CapabilityError::NoVrr.into());
        }
        journal.crtc_prop(self.objects, p, CrtcProperty::VrrEnabled, u64::from(adaptive));
        Ok(())
    }

    fn stage_gamma(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        ramp: &GammaRamp,
    ) -> Result<(), CommitError> {
        let crtc_h = self.objects.pipelines.get(p).crtc();
        let crtc = self.objects.crtcs.get(crtc_h);
        let expected = crtc.gamma_ramp_size();
        if u32::try_from(ramp.size()).ok() != Some(expected) {
            return Err(CapabilityError::GammaSizeMismatch {
                expected,
                actual: ramp.size(),
            }
            .into());
        }
        match self.strategy {
            Strategy::Legacy => journal.legacy_gamma(self.objects, p, Some(ramp.clone())),
            Strategy::Atomic => {
                if !crtc.properties().has(CrtcProperty::GammaLut) {
                    return Err(CapabilityError::NoGammaLut.into());
                }
                let blob = self
                    .device
                    .create_blob(BlobData::GammaLut(ramp))
                    .map_err(CommitError::Allocation)?;
                self.objects.crtcs.get_mut(crtc_h).owned_blobs.push(blob);
                journal.gamma_blob(self.objects, p, Some(blob));
                journal.crtc_prop(self.objects, p, CrtcProperty::GammaLut, blob.value());
            }
        }
        Ok(())
    }

    fn stage_transformation(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        transformation: PlaneTransformation,
    ) -> Result<(), CommitError> {
        let identity = transformation == PlaneTransformation::ROTATE_0;
        if self.strategy == Strategy::Legacy {
            return if identity {
                Ok(())
            } else {
                Err(CapabilityError::LegacyUnsupported.into())
            };
        }
        let plane_h = self
            .objects
            .pipelines
            .get(p)
            .plane()
            .ok_or(CapabilityError::NoPrimaryPlane)?;
        let plane = self.objects.planes.get(plane_h);
        if !plane.properties().has(PlaneProperty::Rotation) {
            return if identity {
                Ok(())
            } else {
                Err(CapabilityError::UnsupportedTransformation.into())
            };
        }
        if !plane.supported_transformations().contains(transformation) {
            return Err(CapabilityError::UnsupportedTransformation.into());
        }
        journal.plane_prop(self.objects, p, PlaneProperty::Rotation, transformation.value());
        Ok(())
    }

    fn stage_buffer(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        buffer: &Buffer,
    ) -> Result<(), CommitError> {
        let size = pipeline::source_size(self.objects, p);
        let pipe = self.objects.pipelines.get(p);
        if buffer.size() != size || !pipe.formats().accepts(buffer.format(), buffer.modifier()) {
            return Err(CapabilityError::BufferMismatch.into());
        }
        journal.buffer(self.objects, p, Some(buffer.clone()));
        self.objects.pipelines.get_mut(p).flip_requested = true;
        Ok(())
    }

    fn stage_cursor(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        change: &CursorChange,
    ) -> Result<(), CommitError> {
        if *change == CursorChange::default() {
            return Ok(());
        }
        if let Some(Some(buffer)) = &change.buffer
            && !buffer.size().fits_within(self.caps.cursor_size)
        {
            return Err(CapabilityError::CursorTooLarge.into());
        }
        let mode_size = pipeline::mode_size(self.objects, p);
        let old = self.objects.pipelines.get(p).cursor().clone();
        let mut next = old.clone();
        if let Some(buffer) = &change.buffer
            && next.buffer != *buffer
        {
            next.buffer.clone_from(buffer);
            next.dirty_bo = true;
        }
        if let Some(hotspot) = change.hotspot
            && next.hotspot != hotspot
        {
            next.hotspot = hotspot;
            next.dirty_bo = true;
            next.dirty_pos = true;
        }
        if let Some(position) = change.position
            && next.position != position
        {
            next.position = position;
            next.dirty_pos = true;
        }
        if next.is_visible(mode_size) != old.is_visible(mode_size) {
            next.dirty_bo = true;
        }
        journal.cursor(self.objects, p, next);
        Ok(())
    }

    // -- Test buffer --

    /// Makes sure an active pipeline has a buffer the kernel can validate
    /// against: the pending content if it fits, else a reused or freshly
    /// allocated test buffer.
    fn check_test_buffer(&mut self, p: Handle<Pipeline>) -> Result<(), CommitError> {
        let pipe = self.objects.pipelines.get(p);
        if !*pipe.active.pending() {
            return Ok(());
        }
        let size = pipeline::source_size(self.objects, p);
        if size.is_empty() {
            return Ok(());
        }
        let fits = |b: &Buffer| b.size() == size && pipe.formats().accepts(b.format(), b.modifier());
        if pipe.buffer.pending().as_ref().is_some_and(fits) {
            return Ok(());
        }
        let crtc = self.objects.crtcs.get(pipe.crtc());
        let plane = pipe.plane().map(|h| self.objects.planes.get(h));
        let candidate = [
            plane.and_then(|pl| pl.slots().next()),
            plane.and_then(|pl| pl.slots().current()),
            crtc.slots().next(),
            crtc.slots().current(),
            pipe.test_buffer.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|b| fits(b))
        .cloned();
        let buffer = match candidate {
            Some(buffer) => buffer,
            None => buffer::allocate_dumb(self.device, self.releases, size, Fourcc::XRGB8888)
                .map_err(CommitError::Allocation)?,
        };
        let pipe = self.objects.pipelines.get_mut(p);
        if pipe.test_buffer.as_ref() != Some(&buffer) {
            let old = pipe.test_buffer.replace(buffer);
            if old.is_some() {
                pipe.old_test_buffer = old;
            }
        }
        Ok(())
    }

    // -- Test and commit --

    /// Validates the staged state of `pipelines` without applying it.
    pub(crate) fn test(
        &mut self,
        journal: &mut Journal,
        pipelines: &[Handle<Pipeline>],
    ) -> Result<(), CommitError> {
        match self.strategy {
            Strategy::Atomic => self.atomic_test(journal, pipelines).map(drop),
            Strategy::Legacy => {
                for &p in pipelines {
                    self.validate_legacy(p)?;
                }
                Ok(())
            }
        }
    }

    /// Applies the staged state of `pipelines`.
    pub(crate) fn commit(
        &mut self,
        journal: &mut Journal,
        pipelines: &[Handle<Pipeline>],
    ) -> Result<(), CommitError> {
        match self.strategy {
            Strategy::Atomic => self.commit_atomic(journal, pipelines),
            Strategy::Legacy => self.commit_legacy(journal, pipelines),
        }
    }

    /// Reverts everything `journal` recorded.
    pub(crate) fn rollback(&mut self, journal: &mut Journal) {
        let reverted = journal.rollback(self.objects);
        if reverted > 0 {
            self.tracer.rollback(&RollbackEvent {
                sequence: *self.sequence,
                entries: count(reverted),
            });
        }
        self.objects.sweep_gamma_blobs(self.device);
    }

    /// Keeps everything `journal` recorded.
    pub(crate) fn accept(&mut self, journal: &mut Journal) {
        journal.accept();
        self.objects.sweep_gamma_blobs(self.device);
    }

    fn next_sequence(&mut self) -> u64 {
        *self.sequence += 1;
        *self.sequence
    }

    fn submit(
        &mut self,
        built: &Built,
        flags: CommitFlags,
        pipelines: usize,
    ) -> Result<(), DeviceError> {
        let sequence = self.next_sequence();
        #[cfg(feature = "trace-rich")]
        self.tracer.property_writes(sequence, built.request.writes());
        let submitted_at = timestamp();
        let result = self.device.atomic_commit(&built.request, flags);
        let test = flags.contains(CommitFlags::TEST_ONLY);
        let outcome = match (test, result.is_ok()) {
            (true, true) => CommitOutcome::TestPassed,
            (true, false) => CommitOutcome::TestFailed,
            (false, true) => CommitOutcome::Committed,
            (false, false) => CommitOutcome::Failed,
        };
        self.tracer.commit(&CommitEvent {
            sequence,
            strategy: Strategy::Atomic,
            flags,
            pipelines: count(pipelines),
            properties: count(built.request.len()),
            outcome,
            submitted_at,
        });
        result
    }

    fn atomic_test(
        &mut self,
        journal: &mut Journal,
        pipelines: &[Handle<Pipeline>],
    ) -> Result<Built, CommitError> {
        for &p in pipelines {
            self.check_test_buffer(p)?;
            self.prepare_atomic(journal, p)?;
        }
        let built = self.build(pipelines);
        let mut flags = CommitFlags::TEST_ONLY;
        if built.modeset {
            flags |= CommitFlags::ALLOW_MODESET;
        }
        self.submit(&built, flags, pipelines.len())
            .map_err(CommitError::Validation)?;
        Ok(built)
    }

    fn commit_atomic(
        &mut self,
        journal: &mut Journal,
        pipelines: &[Handle<Pipeline>],
    ) -> Result<(), CommitError> {
        let built = self.atomic_test(journal, pipelines)?;
        for &p in pipelines {
            if !*self.objects.pipelines.get(p).active.pending() {
                self.hide_cursor(p);
            }
        }
        let mut flags = CommitFlags::empty();
        if built.modeset {
            flags |= CommitFlags::ALLOW_MODESET;
        }
        if built.flip {
            flags |= CommitFlags::PAGE_FLIP_EVENT | CommitFlags::NONBLOCK;
        }
        if let Err(err) = self.submit(&built, flags, pipelines.len()) {
            error!("atomic commit failed after passing its test: {err}");
            for &p in pipelines {
                pipeline::log_debug_info(self.objects, p);
            }
            return Err(CommitError::Commit(err));
        }
        self.promote(&built, pipelines, flags);
        for &p in pipelines {
            if let Err(err) = self.apply_cursor(p) {
                warn!("failed to update cursor after commit: {err}");
            }
        }
        Ok(())
    }

    /// Writes the full configuration of `p` into pending state.
    fn prepare_atomic(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
    ) -> Result<(), CommitError> {
        let pipe = self.objects.pipelines.get(p);
        let (conn_h, crtc_h) = (pipe.connector(), pipe.crtc());
        if pipe.plane().is_none() {
            return Err(CapabilityError::NoPrimaryPlane.into());
        }
        let crtc_id = u64::from(self.objects.crtcs.get(crtc_h).id().0);
        if !*pipe.active.pending() {
            journal.connector_prop(self.objects, p, ConnectorProperty::CrtcId, 0);
            journal.crtc_prop(self.objects, p, CrtcProperty::Active, 0);
            journal.plane_prop(self.objects, p, PlaneProperty::CrtcId, 0);
            return Ok(());
        }
        let index = self.objects.connectors.get(conn_h).pending_mode_index();
        let mode_blob = self.mode_blob(conn_h, index)?;
        let mode_size = pipeline::mode_size(self.objects, p);
        let Some(fb) = pipeline::scanout_buffer(self.objects, p) else {
            return Err(CapabilityError::BufferMismatch.into());
        };
        let src = fb.size();

        journal.connector_prop(self.objects, p, ConnectorProperty::CrtcId, crtc_id);
        journal.crtc_prop(self.objects, p, CrtcProperty::ModeId, mode_blob.value());
        journal.crtc_prop(self.objects, p, CrtcProperty::Active, 1);
        for (prop, value) in [
            (PlaneProperty::CrtcId, crtc_id),
            (PlaneProperty::FbId, fb.framebuffer().value()),
            (PlaneProperty::SrcX, 0),
            (PlaneProperty::SrcY, 0),
            (PlaneProperty::SrcW, u64::from(src.width) << 16),
            (PlaneProperty::SrcH, u64::from(src.height) << 16),
            (PlaneProperty::CrtcX, 0),
            (PlaneProperty::CrtcY, 0),
            (PlaneProperty::CrtcW, u64::from(mode_size.width)),
            (PlaneProperty::CrtcH, u64::from(mode_size.height)),
        ] {
            journal.plane_prop(self.objects, p, prop, value);
        }
        Ok(())
    }

    /// Returns the `MODE_ID` blob for a connector mode, creating it once.
    fn mode_blob(
        &mut self,
        conn: Handle<Connector>,
        index: usize,
    ) -> Result<BlobId, CommitError> {
        let connector = self.objects.connectors.get(conn);
        let mode = connector
            .modes()
            .get(index)
            .ok_or(CapabilityError::ModeOutOfRange(index))?;
        if let Some(blob) = mode.blob() {
            return Ok(blob);
        }
        let blob = self
            .device
            .create_blob(BlobData::Mode(mode.info()))
            .map_err(CommitError::Allocation)?;
        if let Some(mode) = self.objects.connectors.get_mut(conn).mode_mut(index) {
            mode.set_blob(blob);
        }
        Ok(blob)
    }

    fn build(&self, pipelines: &[Handle<Pipeline>]) -> Built {
        let mut built = Built::default();
        for &p in pipelines {
            let pipe = self.objects.pipelines.get(p);
            let enabled = *pipe.active.pending();

            let conn = self.objects.connectors.get(pipe.connector());
            let conn_h = pipe.connector();
            push_table(
                &mut built,
                conn.id(),
                conn.properties(),
                &[ConnectorProperty::CrtcId],
                &[ConnectorProperty::CrtcId],
                enabled,
                |prop| Pushed::Connector(conn_h, prop),
            );

            let crtc = self.objects.crtcs.get(pipe.crtc());
            let crtc_h = pipe.crtc();
            let crtc_forced: &[CrtcProperty] = if enabled {
                &[CrtcProperty::ModeId, CrtcProperty::Active]
            } else {
                &[CrtcProperty::Active]
            };
            push_table(
                &mut built,
                crtc.id(),
                crtc.properties(),
                crtc_forced,
                &[CrtcProperty::ModeId, CrtcProperty::Active],
                enabled,
                |prop| Pushed::Crtc(crtc_h, prop),
            );

            if let Some(plane_h) = pipe.plane() {
                let plane = self.objects.planes.get(plane_h);
                let plane_forced: &[PlaneProperty] = if enabled {
                    &[PlaneProperty::CrtcId, PlaneProperty::FbId]
                } else {
                    &[PlaneProperty::CrtcId]
                };
                push_table(
                    &mut built,
                    plane.id(),
                    plane.properties(),
                    plane_forced,
                    &[PlaneProperty::CrtcId],
                    enabled,
                    |prop| Pushed::Plane(plane_h, prop),
                );
            }

            if enabled
                && (pipe.buffer.needs_commit() || pipe.flip_requested)
                && pipe.buffer.pending().is_some()
            {
                built.flip = true;
            }
        }
        built
    }

    /// Promotes what an accepted request carried.
    fn promote(&mut self, built: &Built, pipelines: &[Handle<Pipeline>], flags: CommitFlags) {
        for pushed in &built.pushed {
            match *pushed {
                Pushed::Connector(h, prop) => {
                    if let Some(p) = self.objects.connectors.get_mut(h).properties_mut().get_mut(prop)
                    {
                        p.commit_pending();
                    }
                }
                Pushed::Crtc(h, prop) => {
                    if let Some(p) = self.objects.crtcs.get_mut(h).properties_mut().get_mut(prop) {
                        p.commit_pending();
                    }
                }
                Pushed::Plane(h, prop) => {
                    if let Some(p) = self.objects.planes.get_mut(h).properties_mut().get_mut(prop) {
                        p.commit_pending();
                    }
                }
            }
        }
        let event = flags.contains(CommitFlags::PAGE_FLIP_EVENT);
        for &p in pipelines {
            let scanout = pipeline::scanout_buffer(self.objects, p);
            let pipe = self.objects.pipelines.get_mut(p);
            let (conn_h, crtc_h, plane_h) = (pipe.connector(), pipe.crtc(), pipe.plane());
            let enabled = *pipe.active.pending();
            pipe.active.commit_pending();
            pipe.last_flags = flags;
            if !enabled {
                self.objects.crtcs.get_mut(crtc_h).slots.clear();
                if let Some(plane_h) = plane_h {
                    self.objects.planes.get_mut(plane_h).slots.clear();
                }
                continue;
            }
            pipe.buffer.commit_pending();
            if pipe.buffer.current().is_some() {
                pipe.presented = true;
            }
            if event {
                pipe.flip_pending = true;
            }
            self.objects.connectors.get_mut(conn_h).mode.commit_pending();
            let crtc = self.objects.crtcs.get_mut(crtc_h);
            crtc.gamma_blob.commit_pending();
            let mut slots = [Some(&mut crtc.slots), None];
            if let Some(plane_h) = plane_h {
                slots[1] = Some(&mut self.objects.planes.get_mut(plane_h).slots);
            }
            for slot in slots.into_iter().flatten() {
                if event {
                    slot.set_next(scanout.clone());
                } else {
                    slot.set_current(scanout.clone());
                }
            }
        }
    }

    fn validate_legacy(&mut self, p: Handle<Pipeline>) -> Result<(), CommitError> {
        self.check_test_buffer(p)?;
        let pipe = self.objects.pipelines.get(p);
        if !*pipe.active.pending() {
            return Ok(());
        }
        if self
            .objects
            .connectors
            .get(pipe.connector())
            .pending_mode()
            .is_none()
        {
            return Err(CommitError::Validation(DeviceError::InvalidArgument));
        }
        let size = pipeline::source_size(self.objects, p);
        if let Some(buffer) = pipe.buffer.pending()
            && (buffer.size() != size || !pipe.formats().accepts(buffer.format(), buffer.modifier()))
        {
            return Err(CommitError::Validation(DeviceError::InvalidArgument));
        }
        Ok(())
    }

    // -- Legacy --

    fn commit_legacy(
        &mut self,
        journal: &mut Journal,
        pipelines: &[Handle<Pipeline>],
    ) -> Result<(), CommitError> {
        let sequence = self.next_sequence();
        let submitted_at = timestamp();
        let mut first = None;
        for &p in pipelines {
            if let Err(err) = self.commit_legacy_pipeline(journal, p) {
                first.get_or_insert(err);
            }
        }
        self.tracer.commit(&CommitEvent {
            sequence,
            strategy: Strategy::Legacy,
            flags: CommitFlags::empty(),
            pipelines: count(pipelines.len()),
            properties: 0,
            outcome: if first.is_none() {
                CommitOutcome::Committed
            } else {
                CommitOutcome::Failed
            },
            submitted_at,
        });
        first.map_or(Ok(()), Err)
    }

    /// Reports a legacy step; on failure reverts the staged state of `concern`
    /// and later concerns of `p`.
    fn legacy_step(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
        step: LegacyStep,
        concern: Concern,
        result: Result<(), DeviceError>,
    ) -> Result<(), CommitError> {
        let crtc = self.objects.crtcs.get(self.objects.pipelines.get(p).crtc()).id();
        self.tracer.legacy_step(&LegacyStepEvent {
            sequence: *self.sequence,
            crtc,
            step,
            ok: result.is_ok(),
        });
        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!("legacy {} on {crtc:?} failed: {error}", step.name());
                let reverted = journal.rollback_from(self.objects, p, concern);
                if reverted > 0 {
                    self.tracer.rollback(&RollbackEvent {
                        sequence: *self.sequence,
                        entries: count(reverted),
                    });
                }
                Err(CommitError::Legacy { step, error })
            }
        }
    }

    fn commit_legacy_pipeline(
        &mut self,
        journal: &mut Journal,
        p: Handle<Pipeline>,
    ) -> Result<(), CommitError> {
        let pipe = self.objects.pipelines.get(p);
        let (conn_h, crtc_h, plane_h) = (pipe.connector(), pipe.crtc(), pipe.plane());
        let want_active = *pipe.active.pending();
        let conn = self.objects.connectors.get(conn_h);
        let conn_id = conn.id();
        let crtc_id = self.objects.crtcs.get(crtc_h).id();
        let dpms = conn
            .properties()
            .get(ConnectorProperty::Dpms)
            .map(|d| (d.id(), d.current()));

        if !want_active {
            self.hide_cursor(p);
            if let Some((prop, value)) = dpms
                && value != DPMS_OFF
            {
                let result = self.device.set_property(conn_id, prop, DPMS_OFF);
                self.legacy_step(journal, p, LegacyStep::Dpms, Concern::Power, result)?;
                self.set_dpms_current(conn_h, DPMS_OFF);
                journal.settle(p, Concern::Power);
            }
            self.objects.pipelines.get_mut(p).active.commit_pending();
            return Ok(());
        }

        if let Some((prop, value)) = dpms
            && value != DPMS_ON
        {
            let result = self.device.set_property(conn_id, prop, DPMS_ON);
            self.legacy_step(journal, p, LegacyStep::Dpms, Concern::Power, result)?;
            self.set_dpms_current(conn_h, DPMS_ON);
            self.objects.pipelines.get_mut(p).cursor.dirty_bo = true;
            journal.settle(p, Concern::Power);
        }
        self.objects.pipelines.get_mut(p).active.commit_pending();

        // 1. Mode set, only once there is content to show.
        let pipe = self.objects.pipelines.get(p);
        let conn = self.objects.connectors.get(conn_h);
        let needs_modeset = pipe.legacy_needs_modeset || conn.mode.needs_commit();
        if needs_modeset && pipe.buffer.pending().is_some() {
            if let Err(err) = self.check_test_buffer(p) {
                journal.rollback_from(self.objects, p, Concern::Modeset);
                return Err(err);
            }
            let fb = pipeline::scanout_buffer(self.objects, p);
            let mode = self
                .objects
                .connectors
                .get(conn_h)
                .pending_mode()
                .map(|m| m.info().clone());
            let result = match (&fb, &mode) {
                (Some(fb), Some(mode)) => self.device.set_crtc(
                    crtc_id,
                    Some(fb.framebuffer()),
                    Point::ORIGIN,
                    &[conn_id],
                    Some(mode),
                ),
                _ => Err(DeviceError::InvalidArgument),
            };
            self.legacy_step(journal, p, LegacyStep::Modeset, Concern::Modeset, result)?;
            self.objects.pipelines.get_mut(p).legacy_needs_modeset = false;
            self.objects.connectors.get_mut(conn_h).mode.commit_pending();
            self.objects.crtcs.get_mut(crtc_h).slots.set_current(fb.clone());
            if let Some(plane_h) = plane_h {
                self.objects.planes.get_mut(plane_h).slots.set_current(fb);
            }
            journal.settle(p, Concern::Modeset);
        }

        let writes: Vec<_> = self
            .objects
            .connectors
            .get(conn_h)
            .properties()
            .iter()
            .filter(|(name, prop)| {
                prop.needs_commit()
                    && !matches!(name, ConnectorProperty::CrtcId | ConnectorProperty::Dpms)
            })
            .map(|(name, prop)| (name, prop.id(), prop.pending()))
            .collect();
        for (name, prop, value) in writes {
            let result = self.device.set_property(conn_id, prop, value);
            self.legacy_step(journal, p, LegacyStep::Property, Concern::Property, result)?;
            if let Some(prop) = self
                .objects
                .connectors
                .get_mut(conn_h)
                .properties_mut()
                .get_mut(name)
            {
                prop.set_current(value);
            }
            journal.settle_connector_prop(p, name);
        }

        // 2. Gamma.
        let crtc = self.objects.crtcs.get(crtc_h);
        if crtc.legacy_gamma.needs_commit() {
            let ramp = crtc
                .legacy_gamma
                .pending()
                .clone()
                .unwrap_or_else(|| GammaRamp::linear(crtc.gamma_ramp_size() as usize));
            let result = self.device.set_gamma(crtc_id, &ramp);
            self.legacy_step(journal, p, LegacyStep::Gamma, Concern::Gamma, result)?;
            self.objects.crtcs.get_mut(crtc_h).legacy_gamma.commit_pending();
            journal.settle(p, Concern::Gamma);
        }

        // 3. Page flip.
        let pipe = self.objects.pipelines.get(p);
        if (pipe.buffer.needs_commit() || pipe.flip_requested)
            && let Some(buffer) = pipe.buffer.pending().clone()
        {
            let result =
                self.device
                    .page_flip(crtc_id, buffer.framebuffer(), CommitFlags::PAGE_FLIP_EVENT);
            self.legacy_step(journal, p, LegacyStep::PageFlip, Concern::Flip, result)?;
            let pipe = self.objects.pipelines.get_mut(p);
            pipe.buffer.commit_pending();
            pipe.flip_pending = true;
            pipe.presented = true;
            pipe.last_flags = CommitFlags::PAGE_FLIP_EVENT;
            self.objects.crtcs.get_mut(crtc_h).slots.set_next(Some(buffer.clone()));
            if let Some(plane_h) = plane_h {
                self.objects.planes.get_mut(plane_h).slots.set_next(Some(buffer));
            }
            journal.settle(p, Concern::Flip);
        }

        // 4. Cursor.
        if self.objects.pipelines.get(p).cursor().is_dirty() {
            let result = self.apply_cursor(p);
            self.legacy_step(journal, p, LegacyStep::Cursor, Concern::Cursor, result)?;
        }
        Ok(())
    }

    fn set_dpms_current(&mut self, conn: Handle<Connector>, value: u64) {
        if let Some(dpms) = self
            .objects
            .connectors
            .get_mut(conn)
            .properties_mut()
            .get_mut(ConnectorProperty::Dpms)
        {
            dpms.set_current(value);
        }
    }

    // -- Cursor --

    /// Pushes dirty cursor state of a pipeline that is meant to be on.
    pub(crate) fn apply_cursor(&mut self, p: Handle<Pipeline>) -> Result<(), DeviceError> {
        let pipe = self.objects.pipelines.get(p);
        if !*pipe.active.pending() {
            return Ok(());
        }
        let crtc = self.objects.crtcs.get(pipe.crtc()).id();
        let mode_size = pipeline::mode_size(self.objects, p);
        let cursor = pipe.cursor().clone();
        if cursor.dirty_bo {
            let shown = cursor
                .buffer
                .clone()
                .filter(|_| cursor.is_visible(mode_size));
            let image = shown.as_ref().map(Buffer::cursor_image);
            match self.device.set_cursor2(crtc, image, cursor.hotspot) {
                Err(DeviceError::NotSupported) => {
                    warn!("cursor hotspots unsupported on {crtc:?}, falling back");
                    self.device.set_cursor(crtc, image)?;
                }
                result => result?,
            }
            let pipe = self.objects.pipelines.get_mut(p);
            pipe.cursor.dirty_bo = false;
            pipe.cursor_shown = shown;
        }
        if cursor.dirty_pos {
            self.device.move_cursor(crtc, cursor.position)?;
            self.objects.pipelines.get_mut(p).cursor.dirty_pos = false;
        }
        Ok(())
    }

    /// Takes the cursor off the screen so it is re-uploaded on the next
    /// activation.
    fn hide_cursor(&mut self, p: Handle<Pipeline>) {
        let pipe = self.objects.pipelines.get(p);
        if pipe.cursor_shown.is_none() && pipe.cursor().buffer.is_none() {
            return;
        }
        let crtc = self.objects.crtcs.get(pipe.crtc()).id();
        if let Err(err) = self.device.set_cursor(crtc, None) {
            warn!("failed to disable cursor on {crtc:?}: {err}");
        }
        let pipe = self.objects.pipelines.get_mut(p);
        pipe.cursor_shown = None;
        pipe.cursor.dirty_bo = true;
    }

    // -- Completion --

    /// A page flip completed.
    pub(crate) fn page_flipped(&mut self, p: Handle<Pipeline>, vblank: u32, timestamp: HostTime) {
        let pipe = self.objects.pipelines.get_mut(p);
        pipe.flip_pending = false;
        pipe.old_test_buffer = None;
        let (output, crtc_h, plane_h) = (pipe.output(), pipe.crtc(), pipe.plane());
        let crtc = self.objects.crtcs.get_mut(crtc_h);
        crtc.slots.flip();
        let crtc_id = crtc.id();
        if let Some(plane_h) = plane_h {
            self.objects.planes.get_mut(plane_h).slots.flip();
        }
        self.events.push(OutputEvent::PageFlipped { output, timestamp });
        self.tracer.page_flip(&PageFlipEvent {
            output,
            crtc: crtc_id,
            vblank,
            timestamp,
        });
    }

    /// A queued flip will never complete.
    pub(crate) fn flip_aborted(&mut self, p: Handle<Pipeline>) {
        let pipe = self.objects.pipelines.get_mut(p);
        pipe.flip_pending = false;
        let (output, crtc_h, plane_h) = (pipe.output(), pipe.crtc(), pipe.plane());
        let crtc = self.objects.crtcs.get_mut(crtc_h);
        crtc.slots.abort();
        warn!("page flip on {:?} was aborted", crtc.id());
        if let Some(plane_h) = plane_h {
            self.objects.planes.get_mut(plane_h).slots.abort();
        }
        self.present_failed(p, None);
    }

    /// Reports a failed present of a pipeline that presented before.
    pub(crate) fn present_failed(&mut self, p: Handle<Pipeline>, error: Option<CommitError>) {
        let pipe = self.objects.pipelines.get(p);
        if !pipe.presented {
            return;
        }
        let output = pipe.output();
        self.events.push(OutputEvent::PresentFailed { output });
        self.tracer.present_failed(&PresentFailedEvent { output, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PropertyInfo, PropertyKind};
    use crate::id::PropertyId;
    use alloc::string::String;

    fn prop(id: u32, name: &str, value: u64) -> PropertyInfo {
        PropertyInfo {
            id: PropertyId(id),
            name: String::from(name),
            value,
            immutable: false,
            kind: PropertyKind::Range,
            enums: Vec::new(),
        }
    }

    #[test]
    fn push_table_sends_only_forced_when_disabled() {
        let table: PropertyTable<CrtcProperty> = PropertyTable::from_kernel(&[
            prop(1, "ACTIVE", 1),
            prop(2, "MODE_ID", 5),
            prop(3, "VRR_ENABLED", 0),
        ]);
        let mut table = table;
        table.get_mut(CrtcProperty::Active).unwrap().set_pending(0);
        table.get_mut(CrtcProperty::VrrEnabled).unwrap().set_pending(1);
        let mut built = Built::default();
        push_table(
            &mut built,
            ObjectId(10),
            &table,
            &[CrtcProperty::Active],
            &[CrtcProperty::ModeId, CrtcProperty::Active],
            false,
            |p| Pushed::Crtc(Handle::new(0, 0), p),
        );
        assert_eq!(built.request.len(), 1);
        assert_eq!(built.request.value_of(ObjectId(10), PropertyId(1)), Some(0));
        assert!(built.modeset, "ACTIVE changed");
    }

    #[test]
    fn push_table_sends_changes_when_enabled() {
        let mut table: PropertyTable<CrtcProperty> = PropertyTable::from_kernel(&[
            prop(1, "ACTIVE", 1),
            prop(2, "MODE_ID", 5),
            prop(3, "VRR_ENABLED", 0),
        ]);
        table.get_mut(CrtcProperty::VrrEnabled).unwrap().set_pending(1);
        let mut built = Built::default();
        push_table(
            &mut built,
            ObjectId(10),
            &table,
            &[CrtcProperty::ModeId, CrtcProperty::Active],
            &[CrtcProperty::ModeId, CrtcProperty::Active],
            true,
            |p| Pushed::Crtc(Handle::new(0, 0), p),
        );
        assert_eq!(built.request.len(), 3);
        assert!(!built.modeset, "routing unchanged");
    }

    #[test]
    fn immutable_properties_are_never_pushed() {
        let mut info = prop(1, "ACTIVE", 1);
        info.immutable = true;
        let table: PropertyTable<CrtcProperty> = PropertyTable::from_kernel(&[info]);
        let mut built = Built::default();
        push_table(
            &mut built,
            ObjectId(10),
            &table,
            &[CrtcProperty::Active],
            &[],
            true,
            |p| Pushed::Crtc(Handle::new(0, 0), p),
        );
        assert!(built.request.is_empty());
    }

    #[test]
    fn strategy_names() {
        assert_eq!(Strategy::Atomic.name(), "atomic");
        assert_eq!(Strategy::Legacy.name(), "legacy");
    }
}
