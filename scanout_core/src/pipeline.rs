// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pipelines: one connector, one CRTC and an optional primary plane.
//!
//! A [`Pipeline`] is stored in the [`Gpu`]'s arena next to the hardware
//! objects it references by [`Handle`]. Callers reach it through two
//! borrowed views:
//!
//! - [`PipelineRef`] answers queries (`source_size`, `is_active`, cursor
//!   visibility, formats, debug info).
//! - [`PipelineMut`] runs operations. Every operation either succeeds or
//!   leaves pending state exactly as it found it.
//!
//! Configuration operations (`set_overscan`, `set_gamma_ramp`, `modeset`,
//! ...) validate locally, stage the change, test it and keep it pending;
//! the next [`present`](PipelineMut::present) or
//! [`Gpu::apply_pending`] pushes it to the kernel. Power-down and cursor
//! updates reach the hardware immediately.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::buffer::Buffer;
use crate::change::{PipelineChange, RgbRange, SyncMode, Transaction};
use crate::commit::Strategy;
use crate::device::Device;
use crate::error::CommitError;
use crate::format::{FormatTable, Fourcc, Modifier};
use crate::gamma::GammaRamp;
use crate::geometry::{Point, Rect, Size};
use crate::gpu::{Gpu, Run};
use crate::id::{ArenaItem, Handle};
use crate::object::{Connector, ConnectorMode, Crtc, DPMS_ON, Objects, Plane};
use crate::output::OutputId;
use crate::property::{ConnectorProperty, CrtcProperty, PropertyName, PropertyTable, Staged};
use crate::request::CommitFlags;
use crate::time::HostTime;
use crate::transform::PlaneTransformation;

/// Cursor image, hotspot and position with per-concern dirty flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CursorState {
    /// Cursor image, if any.
    pub buffer: Option<Buffer>,
    /// Hotspot within the image.
    pub hotspot: Point,
    /// Top-left corner on the output.
    pub position: Point,
    /// The image (or its visibility) changed since it was last uploaded.
    pub dirty_bo: bool,
    /// The position changed since it was last uploaded.
    pub dirty_pos: bool,
}

impl CursorState {
    /// The cursor rectangle overlaps a mode of `mode_size`.
    #[must_use]
    pub fn is_visible(&self, mode_size: Size) -> bool {
        self.buffer.as_ref().is_some_and(|b| {
            Rect::new(self.position, b.size()).intersects(Rect::from_size(mode_size))
        })
    }

    /// Either dirty flag is set.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty_bo || self.dirty_pos
    }
}

/// Pipeline data. Operations live on [`PipelineMut`].
#[derive(Debug)]
pub struct Pipeline {
    output: OutputId,
    connector: Handle<Connector>,
    crtc: Handle<Crtc>,
    plane: Option<Handle<Plane>>,
    strategy: Strategy,
    formats: FormatTable,
    pub(crate) active: Staged<bool>,
    pub(crate) buffer: Staged<Option<Buffer>>,
    pub(crate) cursor: CursorState,
    pub(crate) cursor_shown: Option<Buffer>,
    pub(crate) test_buffer: Option<Buffer>,
    pub(crate) old_test_buffer: Option<Buffer>,
    pub(crate) legacy_needs_modeset: bool,
    pub(crate) flip_pending: bool,
    /// Set while a present is being committed; the commit flips even when
    /// the buffer is already on screen.
    pub(crate) flip_requested: bool,
    pub(crate) presented: bool,
    pub(crate) last_flags: CommitFlags,
}

impl ArenaItem for Pipeline {
    const KIND: &'static str = "Pipeline";
}

impl Pipeline {
    pub(crate) fn new(
        output: OutputId,
        connector: Handle<Connector>,
        crtc: Handle<Crtc>,
        plane: Option<Handle<Plane>>,
        strategy: Strategy,
        formats: FormatTable,
        lit: bool,
    ) -> Self {
        let mut active = Staged::new(lit);
        active.set_pending(true);
        Self {
            output,
            connector,
            crtc,
            plane,
            strategy,
            formats,
            active,
            buffer: Staged::new(None),
            cursor: CursorState {
                dirty_bo: true,
                dirty_pos: true,
                ..CursorState::default()
            },
            cursor_shown: None,
            test_buffer: None,
            old_test_buffer: None,
            legacy_needs_modeset: true,
            flip_pending: false,
            flip_requested: false,
            presented: false,
            last_flags: CommitFlags::empty(),
        }
    }

    /// Output this pipeline drives.
    #[must_use]
    pub fn output(&self) -> OutputId {
        self.output
    }

    /// Connector handle.
    #[must_use]
    pub fn connector(&self) -> Handle<Connector> {
        self.connector
    }

    /// CRTC handle.
    #[must_use]
    pub fn crtc(&self) -> Handle<Crtc> {
        self.crtc
    }

    /// Primary plane handle; `None` on the legacy path.
    #[must_use]
    pub fn plane(&self) -> Option<Handle<Plane>> {
        self.plane
    }

    /// Strategy of the owning GPU.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Negotiated formats and modifiers.
    #[must_use]
    pub fn formats(&self) -> &FormatTable {
        &self.formats
    }

    /// Cursor sub-state.
    #[must_use]
    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }
}

/// Size of the pending mode.
pub(crate) fn mode_size(objects: &Objects, p: Handle<Pipeline>) -> Size {
    let pipe = objects.pipelines.get(p);
    objects
        .connectors
        .get(pipe.connector)
        .pending_mode()
        .map_or(Size::ZERO, ConnectorMode::size)
}

/// Size a primary buffer must have: the pending mode, transposed under a
/// 90° or 270° rotation.
pub(crate) fn source_size(objects: &Objects, p: Handle<Pipeline>) -> Size {
    let size = mode_size(objects, p);
    let pipe = objects.pipelines.get(p);
    let rotation = pipe
        .plane
        .map_or(PlaneTransformation::ROTATE_0, |h| {
            objects.planes.get(h).pending_transformation()
        });
    if rotation.is_transposing() {
        size.transposed()
    } else {
        size
    }
}

/// The buffer the next commit scans out: pending content if it fits the
/// source size, else the test buffer.
pub(crate) fn scanout_buffer(objects: &Objects, p: Handle<Pipeline>) -> Option<Buffer> {
    let size = source_size(objects, p);
    let pipe = objects.pipelines.get(p);
    pipe.buffer
        .pending()
        .as_ref()
        .filter(|b| b.size() == size)
        .or(pipe.test_buffer.as_ref())
        .cloned()
}

/// Anything staged that the next commit would push.
pub(crate) fn has_pending(objects: &Objects, p: Handle<Pipeline>) -> bool {
    let pipe = objects.pipelines.get(p);
    let conn = objects.connectors.get(pipe.connector);
    let crtc = objects.crtcs.get(pipe.crtc);
    pipe.active.needs_commit()
        || pipe.buffer.needs_commit()
        || pipe.flip_requested && *pipe.active.pending()
        || pipe.cursor.is_dirty() && *pipe.active.pending()
        || conn.mode.needs_commit()
        || conn.properties().needs_commit()
        || crtc.properties().needs_commit()
        || crtc.legacy_gamma.needs_commit()
        || pipe
            .plane
            .is_some_and(|h| objects.planes.get(h).properties().needs_commit())
}

/// An atomic pipeline that was asked to turn on and is still off. Only a
/// present may switch it on.
pub(crate) fn awaits_present(objects: &Objects, p: Handle<Pipeline>) -> bool {
    let pipe = objects.pipelines.get(p);
    pipe.strategy == Strategy::Atomic && !*pipe.active.current() && *pipe.active.pending()
}

fn flag_names(flags: CommitFlags) -> String {
    let names: Vec<&str> = [
        (CommitFlags::PAGE_FLIP_EVENT, "PAGE_FLIP_EVENT"),
        (CommitFlags::ALLOW_MODESET, "ATOMIC_ALLOW_MODESET"),
        (CommitFlags::PAGE_FLIP_ASYNC, "PAGE_FLIP_ASYNC"),
    ]
    .into_iter()
    .filter_map(|(flag, name)| flags.contains(flag).then_some(name))
    .collect();
    if names.is_empty() {
        String::from("none")
    } else {
        names.join(" | ")
    }
}

fn property_lines<P: PropertyName>(out: &mut Vec<String>, title: String, table: &PropertyTable<P>) {
    out.push(title);
    for (_, prop) in table.iter() {
        let shift = if prop.name().starts_with("SRC_") { 16 } else { 0 };
        let (current, pending) = (prop.current() >> shift, prop.pending() >> shift);
        if prop.needs_commit() {
            out.push(format!("\t{}: {current}->{pending}", prop.name()));
        } else {
            out.push(format!("\t{}: {current}", prop.name()));
        }
    }
}

/// Human-readable dump of a pipeline's last flags and every property.
pub(crate) fn debug_lines(objects: &Objects, p: Handle<Pipeline>) -> Vec<String> {
    let pipe = objects.pipelines.get(p);
    let mut out = Vec::new();
    out.push(format!("Flags: {}", flag_names(pipe.last_flags)));
    let conn = objects.connectors.get(pipe.connector);
    property_lines(
        &mut out,
        format!("Connector {}", conn.id().0),
        conn.properties(),
    );
    let crtc = objects.crtcs.get(pipe.crtc);
    property_lines(&mut out, format!("CRTC {}", crtc.id().0), crtc.properties());
    if let Some(plane) = pipe.plane.map(|h| objects.planes.get(h)) {
        property_lines(
            &mut out,
            format!("Primary plane {}", plane.id().0),
            plane.properties(),
        );
    }
    out
}

pub(crate) fn log_debug_info(objects: &Objects, p: Handle<Pipeline>) {
    for line in debug_lines(objects, p) {
        log::warn!("{line}");
    }
}

/// Read-only view of a pipeline.
#[derive(Clone, Copy)]
pub struct PipelineRef<'g> {
    objects: &'g Objects,
    handle: Handle<Pipeline>,
}

impl core::fmt::Debug for PipelineRef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipelineRef")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<'g> PipelineRef<'g> {
    pub(crate) fn new(objects: &'g Objects, handle: Handle<Pipeline>) -> Self {
        objects.pipelines.validate(handle);
        Self { objects, handle }
    }

    fn data(&self) -> &'g Pipeline {
        self.objects.pipelines.get(self.handle)
    }

    /// Pipeline handle.
    #[must_use]
    pub fn handle(&self) -> Handle<Pipeline> {
        self.handle
    }

    /// Output this pipeline drives.
    #[must_use]
    pub fn output(&self) -> OutputId {
        self.data().output
    }

    /// Strategy the pipeline commits with.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.data().strategy
    }

    /// The connector.
    #[must_use]
    pub fn connector(&self) -> &'g Connector {
        self.objects.connectors.get(self.data().connector)
    }

    /// The CRTC.
    #[must_use]
    pub fn crtc(&self) -> &'g Crtc {
        self.objects.crtcs.get(self.data().crtc)
    }

    /// The primary plane, if the pipeline has one.
    #[must_use]
    pub fn plane(&self) -> Option<&'g Plane> {
        self.data().plane.map(|h| self.objects.planes.get(h))
    }

    /// Size a buffer passed to [`PipelineMut::present`] must have.
    #[must_use]
    pub fn source_size(&self) -> Size {
        source_size(self.objects, self.handle)
    }

    /// The CRTC is scanning out, as last confirmed by the kernel.
    ///
    /// On the atomic path this is the CRTC's committed `ACTIVE` property, so
    /// it stays `false` after `set_active(true)` until a present succeeds.
    /// On the legacy path it is the committed DPMS state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let pipe = self.data();
        match pipe.strategy {
            Strategy::Atomic => self.crtc().properties().current(CrtcProperty::Active) == Some(1),
            Strategy::Legacy => match self.connector().properties().current(ConnectorProperty::Dpms)
            {
                Some(dpms) => dpms == DPMS_ON && *pipe.active.current(),
                None => *pipe.active.current(),
            },
        }
    }

    /// The cursor rectangle overlaps the current mode.
    #[must_use]
    pub fn is_cursor_visible(&self) -> bool {
        let size = self
            .connector()
            .current_mode()
            .map_or(Size::ZERO, ConnectorMode::size);
        self.data().cursor.is_visible(size)
    }

    /// Cursor sub-state.
    #[must_use]
    pub fn cursor(&self) -> &'g CursorState {
        &self.data().cursor
    }

    /// The buffer the last commit or flip put on screen, or queued.
    #[must_use]
    pub fn current_buffer(&self) -> Option<&'g Buffer> {
        self.data().buffer.current().as_ref()
    }

    /// The buffer allocated to validate configurations without content.
    #[must_use]
    pub fn test_buffer(&self) -> Option<&'g Buffer> {
        self.data().test_buffer.as_ref()
    }

    /// Modifiers the pipeline accepts for `format`. Empty on the legacy
    /// path.
    #[must_use]
    pub fn supported_modifiers(&self, format: Fourcc) -> &'g [Modifier] {
        self.data().formats.supported_modifiers(format)
    }

    /// The pipeline can scan out `format`.
    #[must_use]
    pub fn is_format_supported(&self, format: Fourcc) -> bool {
        self.data().formats.is_format_supported(format)
    }

    /// Entries per channel a gamma ramp must have.
    #[must_use]
    pub fn gamma_ramp_size(&self) -> u32 {
        self.crtc().gamma_ramp_size()
    }

    /// A page flip was queued and has not completed.
    #[must_use]
    pub fn is_flip_pending(&self) -> bool {
        self.data().flip_pending
    }

    /// Flags of the last successful commit.
    #[must_use]
    pub fn last_flags(&self) -> CommitFlags {
        self.data().last_flags
    }

    /// Lines written by [`print_debug_info`](Self::print_debug_info).
    #[must_use]
    pub fn debug_lines(&self) -> Vec<String> {
        debug_lines(self.objects, self.handle)
    }

    /// Logs the last commit flags and every property at `warn` level.
    pub fn print_debug_info(&self) {
        log_debug_info(self.objects, self.handle);
    }
}

/// Mutable view of a pipeline.
pub struct PipelineMut<'g, D: Device> {
    gpu: &'g mut Gpu<D>,
    handle: Handle<Pipeline>,
}

impl<D: Device> core::fmt::Debug for PipelineMut<'_, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipelineMut")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<'g, D: Device> PipelineMut<'g, D> {
    pub(crate) fn new(gpu: &'g mut Gpu<D>, handle: Handle<Pipeline>) -> Self {
        gpu.objects().pipelines.validate(handle);
        Self { gpu, handle }
    }

    /// Read-only view.
    #[must_use]
    pub fn view(&self) -> PipelineRef<'_> {
        PipelineRef::new(self.gpu.objects(), self.handle)
    }

    fn run(&mut self, change: PipelineChange, run: Run) -> Result<(), CommitError> {
        self.gpu
            .execute(&Transaction::single(self.handle, change), run)
    }

    /// Validates `change` without keeping anything.
    pub fn test(&mut self, change: PipelineChange) -> Result<(), CommitError> {
        self.run(change, Run::Test)
    }

    /// Stages, tests and commits `change` right away.
    pub fn apply(&mut self, change: PipelineChange) -> Result<(), CommitError> {
        self.run(change, Run::Apply)
    }

    /// Schedules `buffer` as the next primary content.
    ///
    /// The first present after creation or `set_active(true)` also turns
    /// the CRTC on. Completion is reported through
    /// [`OutputEvent::PageFlipped`](crate::output::OutputEvent::PageFlipped)
    /// once [`Gpu::dispatch_events`] sees the flip.
    pub fn present(&mut self, buffer: &Buffer) -> Result<(), CommitError> {
        let result = self.gpu.try_apply(&Transaction::single(
            self.handle,
            PipelineChange::new().with_buffer(buffer.clone()),
        ));
        if let Err(err) = result
            && !matches!(err, CommitError::FlipPending | CommitError::Inactive)
        {
            self.gpu.present_failed(self.handle, err);
        }
        result
    }

    /// Requests a power state.
    ///
    /// On the atomic path turning on is deferred to the next present;
    /// turning off (and everything on the legacy path) is applied now.
    /// The cursor is always taken off the screen before the CRTC goes down.
    pub fn set_active(&mut self, active: bool) -> Result<(), CommitError> {
        let change = PipelineChange::new().with_active(active);
        let strategy = self.view().strategy();
        if active && strategy == Strategy::Atomic {
            self.run(change, Run::Stage)
        } else {
            self.run(change, Run::Apply)
        }
    }

    /// Sets (or with `None`, hides) the cursor image.
    pub fn set_cursor(&mut self, buffer: Option<Buffer>, hotspot: Point) -> Result<(), CommitError> {
        self.gpu
            .update_cursor(self.handle, PipelineChange::new().with_cursor(buffer, hotspot))
    }

    /// Moves the cursor.
    pub fn move_cursor(&mut self, position: Point) -> Result<(), CommitError> {
        self.gpu.update_cursor(
            self.handle,
            PipelineChange::new().with_cursor_position(position),
        )
    }

    /// Stages a gamma ramp for the next commit.
    pub fn set_gamma_ramp(&mut self, ramp: GammaRamp) -> Result<(), CommitError> {
        self.run(PipelineChange::new().with_gamma(ramp), Run::Stage)
    }

    /// Stages fixed or adaptive refresh for the next commit.
    pub fn set_sync_mode(&mut self, mode: SyncMode) -> Result<(), CommitError> {
        self.run(PipelineChange::new().with_sync_mode(mode), Run::Stage)
    }

    /// Stages overscan (`0..=100`) for the next commit.
    pub fn set_overscan(&mut self, overscan: u32) -> Result<(), CommitError> {
        self.run(PipelineChange::new().with_overscan(overscan), Run::Stage)
    }

    /// Stages an RGB quantization range for the next commit.
    pub fn set_rgb_range(&mut self, range: RgbRange) -> Result<(), CommitError> {
        self.run(PipelineChange::new().with_rgb_range(range), Run::Stage)
    }

    /// Stages a plane transformation for the next commit.
    pub fn set_transformation(
        &mut self,
        transformation: PlaneTransformation,
    ) -> Result<(), CommitError> {
        self.run(
            PipelineChange::new().with_transformation(transformation),
            Run::Stage,
        )
    }

    /// Stages the connector mode at `index` for the next commit.
    pub fn modeset(&mut self, index: usize) -> Result<(), CommitError> {
        self.run(PipelineChange::new().with_mode(index), Run::Stage)
    }

    /// Completes a page flip observed outside [`Gpu::dispatch_events`].
    pub fn page_flipped(&mut self, timestamp: HostTime) {
        self.gpu.complete_flip(self.handle, 0, timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_without_buffer_is_invisible() {
        let cursor = CursorState::default();
        assert!(!cursor.is_visible(Size::new(1920, 1080)));
        assert!(!cursor.is_dirty());
    }

    #[test]
    fn flag_names_list_set_flags() {
        assert_eq!(flag_names(CommitFlags::empty()), "none");
        assert_eq!(
            flag_names(CommitFlags::PAGE_FLIP_EVENT | CommitFlags::ALLOW_MODESET),
            "PAGE_FLIP_EVENT | ATOMIC_ALLOW_MODESET"
        );
        assert_eq!(flag_names(CommitFlags::TEST_ONLY), "none");
    }

    #[test]
    fn new_pipeline_wants_to_be_on() {
        let pipe = Pipeline::new(
            OutputId(1),
            Handle::new(0, 0),
            Handle::new(0, 0),
            None,
            Strategy::Legacy,
            FormatTable::legacy(),
            false,
        );
        assert!(!*pipe.active.current());
        assert!(*pipe.active.pending());
        assert!(pipe.legacy_needs_modeset);
        assert!(pipe.cursor().dirty_bo && pipe.cursor().dirty_pos);
    }
}
