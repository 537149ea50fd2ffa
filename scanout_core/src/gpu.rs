// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The GPU: object discovery, output detection, transactions and events.
//!
//! A [`Gpu`] owns a [`Device`] and every object discovered on it. The
//! commit strategy is chosen once in [`Gpu::new`]:
//!
//! ```text
//!   force_legacy? ──yes──▶ Legacy
//!        │no
//!   atomic cap enabled? ──no──▶ Legacy
//!        │yes
//!   planes found and every CRTC has a primary plane? ──no──▶ Legacy
//!        │yes
//!      Atomic
//! ```
//!
//! Outputs are detected by [`Gpu::update_outputs`], which is also run once
//! by `new`. Each usable connector (connected, not a VR headset, with at
//! least one mode) gets a pipeline with a free CRTC and, on the atomic path,
//! a free primary plane. Changes are reported through
//! [`Gpu::poll_event`].
//!
//! All methods run on the caller's thread and never wait for the hardware.
//! Page-flip completions are picked up by [`Gpu::dispatch_events`], which
//! the caller runs when the device becomes readable.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, warn};
use understory_dirty::{CycleHandling, DirtyTracker};

use crate::buffer::{self, Buffer, ReleaseQueue};
use crate::change::{PipelineChange, Transaction};
use crate::commit::{Engine, Strategy};
use crate::config::GpuConfig;
use crate::device::{Device, DeviceCaps, DeviceError, DeviceEvent, FramebufferDesc};
use crate::dirty;
use crate::error::{CommitError, LegacyStep};
use crate::format::{FormatTable, Fourcc};
use crate::geometry::Size;
use crate::id::{Handle, ObjectId};
use crate::journal::Journal;
use crate::object::{Connector, Crtc, Objects, Plane};
use crate::output::{BoundedQueue, OutputEvent, OutputId};
use crate::pipeline::{self, Pipeline, PipelineMut, PipelineRef};
use crate::property::{ConnectorProperty, CrtcProperty};
use crate::time::HostTime;
use crate::trace::{TraceSink, Tracer};

/// How far [`Gpu::execute`] takes a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Run {
    /// Stage, validate, then revert.
    Test,
    /// Stage and validate; keep it pending for the next commit.
    Stage,
    /// Stage and commit.
    Apply,
}

/// A kernel mode-setting device with its objects and pipelines.
pub struct Gpu<D: Device> {
    device: D,
    config: GpuConfig,
    caps: DeviceCaps,
    strategy: Strategy,
    objects: Objects,
    dirty: DirtyTracker<u32>,
    events: BoundedQueue<OutputEvent>,
    releases: ReleaseQueue,
    sink: Option<Box<dyn TraceSink>>,
    sequence: u64,
    next_output: u32,
    scratch: Vec<DeviceEvent>,
}

impl<D: Device> core::fmt::Debug for Gpu<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Gpu")
            .field("strategy", &self.strategy)
            .field("connectors", &self.objects.connectors.len())
            .field("crtcs", &self.objects.crtcs.len())
            .field("planes", &self.objects.planes.len())
            .field("pipelines", &self.objects.pipelines.len())
            .finish_non_exhaustive()
    }
}

impl<D: Device> Gpu<D> {
    /// Discovers CRTCs and planes, picks the commit strategy and creates
    /// pipelines for the connected outputs.
    pub fn new(mut device: D, config: GpuConfig) -> Result<Self, DeviceError> {
        let caps = device.capabilities();
        let atomic = !config.force_legacy
            && caps.atomic
            && match device.enable_atomic() {
                Ok(()) => true,
                Err(err) => {
                    debug!("atomic mode-setting unavailable: {err}");
                    false
                }
            };

        let resources = device.resources()?;
        let mut objects = Objects::default();
        for (pipe, &id) in (0_u32..).zip(&resources.crtcs) {
            let info = device.crtc(id)?;
            let props = device.properties(id)?;
            objects.crtcs.insert(Crtc::new(id, pipe, info, &props));
        }
        if atomic {
            for id in device.planes()? {
                let info = device.plane(id)?;
                let props = device.properties(id)?;
                objects.planes.insert(Plane::new(id, info, &props));
            }
        }

        let every_crtc_has_primary = objects.crtcs.iter().all(|(_, crtc)| {
            objects
                .planes
                .iter()
                .any(|(_, plane)| plane.is_primary_for(crtc))
        });
        let strategy = if atomic && !objects.planes.is_empty() && every_crtc_has_primary {
            Strategy::Atomic
        } else {
            Strategy::Legacy
        };
        debug!(
            "using {} mode-setting ({} crtcs, {} planes)",
            strategy.name(),
            objects.crtcs.len(),
            objects.planes.len()
        );

        let mut gpu = Self {
            device,
            config,
            caps,
            strategy,
            objects,
            dirty: DirtyTracker::with_cycle_handling(CycleHandling::Error),
            events: BoundedQueue::with_capacity(config.event_capacity),
            releases: ReleaseQueue::default(),
            sink: None,
            sequence: 0,
            next_output: 1,
            scratch: Vec::new(),
        };
        gpu.update_outputs()?;
        Ok(gpu)
    }

    // -- Accessors --

    /// The commit strategy chosen at creation.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Configuration passed to [`new`](Self::new).
    #[must_use]
    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    /// Device capabilities read at creation.
    #[must_use]
    pub fn caps(&self) -> DeviceCaps {
        self.caps
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably. Changing objects behind the engine's back is
    /// only meaningful before [`update_outputs`](Self::update_outputs).
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub(crate) fn objects(&self) -> &Objects {
        &self.objects
    }

    /// Live pipelines in slot order.
    #[must_use]
    pub fn pipelines(&self) -> Vec<Handle<Pipeline>> {
        self.objects.pipelines.handles()
    }

    /// The pipeline driving `output`.
    #[must_use]
    pub fn pipeline_for_output(&self, output: OutputId) -> Option<Handle<Pipeline>> {
        self.objects
            .pipelines
            .iter()
            .find_map(|(h, p)| (p.output() == output).then_some(h))
    }

    /// Read-only view of a pipeline.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn pipeline(&self, h: Handle<Pipeline>) -> PipelineRef<'_> {
        PipelineRef::new(&self.objects, h)
    }

    /// Mutable view of a pipeline.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    pub fn pipeline_mut(&mut self, h: Handle<Pipeline>) -> PipelineMut<'_, D> {
        PipelineMut::new(self, h)
    }

    /// Connectors.
    pub fn connectors(&self) -> impl Iterator<Item = (Handle<Connector>, &Connector)> + '_ {
        self.objects.connectors.iter()
    }

    /// CRTCs in pipe order.
    pub fn crtcs(&self) -> impl Iterator<Item = (Handle<Crtc>, &Crtc)> + '_ {
        self.objects.crtcs.iter()
    }

    /// Planes. Empty on the legacy path.
    pub fn planes(&self) -> impl Iterator<Item = (Handle<Plane>, &Plane)> + '_ {
        self.objects.planes.iter()
    }

    /// Installs a sink for structured commit diagnostics.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.sink = Some(sink);
    }

    /// Removes and returns the trace sink.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.sink.take()
    }

    /// Pops the oldest output event.
    pub fn poll_event(&mut self) -> Option<OutputEvent> {
        self.events.pop()
    }

    /// Output events waiting in the queue.
    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    /// Output events dropped because the queue was full.
    #[must_use]
    pub fn dropped_event_count(&self) -> u64 {
        self.events.dropped_count()
    }

    // -- Buffers --

    /// Registers memory owned by a renderer as a framebuffer.
    pub fn import_buffer(&mut self, desc: &FramebufferDesc) -> Result<Buffer, DeviceError> {
        buffer::import(&mut self.device, &self.releases, desc)
    }

    /// Allocates a CPU-mappable buffer and registers it as a framebuffer.
    pub fn create_dumb_buffer(&mut self, size: Size, format: Fourcc) -> Result<Buffer, DeviceError> {
        buffer::allocate_dumb(&mut self.device, &self.releases, size, format)
    }

    /// Unregisters framebuffers whose last handle was dropped. Runs
    /// automatically after every operation; returns how many were released.
    pub fn release_buffers(&mut self) -> usize {
        self.releases.drain(&mut self.device)
    }

    // -- Hotplug --

    /// Re-probes connectors, creating and destroying pipelines as displays
    /// come and go.
    pub fn update_outputs(&mut self) -> Result<(), DeviceError> {
        let resources = self.device.resources()?;

        for &id in &resources.connectors {
            let info = self.device.connector(id)?;
            match self.objects.find_connector(id) {
                Some(h) => {
                    let (modes_changed, stale) = self.objects.connectors.get_mut(h).update(info);
                    for blob in stale {
                        if let Err(err) = self.device.destroy_blob(blob) {
                            warn!("failed to destroy mode blob {blob:?}: {err}");
                        }
                    }
                    if modes_changed {
                        debug!("modes of connector {id:?} changed");
                        self.dirty.mark(id.0, dirty::MODES);
                    }
                }
                None => {
                    let props = self.device.properties(id)?;
                    self.objects.connectors.insert(Connector::new(id, info, &props));
                }
            }
        }

        let usable = |c: &Connector| {
            resources.connectors.contains(&c.id())
                && c.is_connected()
                && !c.is_non_desktop()
                && !c.modes().is_empty()
        };

        let doomed: Vec<_> = self
            .objects
            .pipelines
            .iter()
            .filter(|(_, p)| !usable(self.objects.connectors.get(p.connector())))
            .map(|(h, _)| h)
            .collect();
        for h in doomed {
            self.destroy_pipeline(h);
        }

        for h in self.objects.connectors.handles() {
            let connector = self.objects.connectors.get(h);
            if resources.connectors.contains(&connector.id()) {
                continue;
            }
            debug!("connector {:?} went away", connector.id());
            for blob in connector.blobs().collect::<Vec<_>>() {
                if let Err(err) = self.device.destroy_blob(blob) {
                    warn!("failed to destroy mode blob {blob:?}: {err}");
                }
            }
            self.objects.connectors.remove(h);
        }

        for h in self.objects.connectors.handles() {
            let connector = self.objects.connectors.get(h);
            if self.objects.connectors.users(h) > 0 || !usable(connector) {
                continue;
            }
            let id = connector.id();
            if self.create_pipeline(h).is_none() {
                warn!("no free CRTC for connector {id:?}");
            }
        }

        let changed: Vec<u32> = self
            .dirty
            .drain(dirty::MODES)
            .affected()
            .deterministic()
            .run()
            .collect();
        for id in changed {
            let output = self
                .objects
                .find_connector(ObjectId(id))
                .and_then(|c| self.objects.pipelines.iter().find(|(_, p)| p.connector() == c))
                .map(|(_, p)| p.output());
            if let Some(output) = output {
                self.events.push(OutputEvent::ModesChanged { output });
            }
        }

        self.releases.drain(&mut self.device);
        Ok(())
    }

    /// Picks a free CRTC (and on the atomic path a free primary plane) for a
    /// connector. Prefers the CRTC the connector is already routed to.
    fn create_pipeline(&mut self, conn_h: Handle<Connector>) -> Option<Handle<Pipeline>> {
        let objects = &self.objects;
        let connector = objects.connectors.get(conn_h);
        let routed = connector.properties().current(ConnectorProperty::CrtcId);
        let mut crtcs: Vec<Handle<Crtc>> = objects
            .crtcs
            .iter()
            .filter(|&(h, c)| objects.crtcs.users(h) == 0 && c.matches_mask(connector.possible_crtcs()))
            .map(|(h, _)| h)
            .collect();
        crtcs.sort_by_key(|&h| routed != Some(u64::from(objects.crtcs.get(h).id().0)));

        for crtc_h in crtcs {
            let crtc = objects.crtcs.get(crtc_h);
            let plane = match self.strategy {
                Strategy::Legacy => None,
                Strategy::Atomic => {
                    let free = objects.planes.iter().find(|&(h, p)| {
                        objects.planes.users(h) == 0 && p.is_primary_for(crtc)
                    });
                    match free {
                        Some((h, _)) => Some(h),
                        None => continue,
                    }
                }
            };
            return Some(self.insert_pipeline(conn_h, crtc_h, plane));
        }
        None
    }

    fn insert_pipeline(
        &mut self,
        conn_h: Handle<Connector>,
        crtc_h: Handle<Crtc>,
        plane_h: Option<Handle<Plane>>,
    ) -> Handle<Pipeline> {
        let connector = self.objects.connectors.get(conn_h);
        let crtc = self.objects.crtcs.get(crtc_h);
        let crtc_id = u64::from(crtc.id().0);
        let kernel_mode = crtc
            .kernel_mode()
            .and_then(|mode| connector.modes().iter().position(|m| m.info() == mode));
        let (routed, lit) = match self.strategy {
            Strategy::Atomic => {
                let routed =
                    connector.properties().current(ConnectorProperty::CrtcId) == Some(crtc_id);
                let on = crtc.properties().current(CrtcProperty::Active) == Some(1);
                (routed, routed && on)
            }
            Strategy::Legacy => (true, kernel_mode.is_some()),
        };
        let formats = match plane_h {
            Some(h) => self.objects.planes.get(h).formats().clone(),
            None => FormatTable::legacy(),
        };
        if routed && let Some(index) = kernel_mode {
            self.objects.connectors.get_mut(conn_h).mode.reset(index);
        }

        let output = OutputId(self.next_output);
        self.next_output += 1;
        let h = self.objects.pipelines.insert(Pipeline::new(
            output,
            conn_h,
            crtc_h,
            plane_h,
            self.strategy,
            formats,
            lit,
        ));
        self.objects.connectors.acquire(conn_h);
        self.objects.crtcs.acquire(crtc_h);
        if let Some(plane_h) = plane_h {
            self.objects.planes.acquire(plane_h);
        }
        debug!(
            "created {output:?}: connector {:?}, crtc {:?}, plane {:?}",
            self.objects.connectors.get(conn_h).id(),
            self.objects.crtcs.get(crtc_h).id(),
            plane_h.map(|p| self.objects.planes.get(p).id()),
        );
        self.events.push(OutputEvent::Added { output, pipeline: h });
        h
    }

    /// Destroys a pipeline and frees its objects for other outputs.
    ///
    /// Buffers the CRTC or plane still scans out stay referenced until a
    /// later commit replaces them or the GPU is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    pub fn destroy_pipeline(&mut self, h: Handle<Pipeline>) {
        let pipe = self.objects.pipelines.remove(h);
        self.objects.connectors.release(pipe.connector());
        self.objects.crtcs.release(pipe.crtc());
        if let Some(plane) = pipe.plane() {
            self.objects.planes.release(plane);
        }
        self.dirty.remove_key(h.index());
        debug!("destroyed {:?}", pipe.output());
        self.events.push(OutputEvent::Removed {
            output: pipe.output(),
        });
    }

    // -- Transactions --

    fn engine(&mut self) -> Engine<'_, D> {
        Engine {
            device: &mut self.device,
            objects: &mut self.objects,
            events: &mut self.events,
            releases: &self.releases,
            tracer: match self.sink.as_deref_mut() {
                Some(sink) => Tracer::new(sink),
                None => Tracer::none(),
            },
            strategy: self.strategy,
            caps: self.caps,
            sequence: &mut self.sequence,
        }
    }

    /// Validates a transaction without changing anything.
    pub fn test(&mut self, tx: &Transaction) -> Result<(), CommitError> {
        self.execute(tx, Run::Test)
    }

    /// Commits a transaction.
    ///
    /// On the atomic path the kernel applies all pipelines or none. On the
    /// legacy path pipelines are applied one after another; a failed step
    /// stops its pipeline only, and the first error is returned.
    pub fn try_apply(&mut self, tx: &Transaction) -> Result<(), CommitError> {
        for (p, change) in tx.iter() {
            let pipe = self.objects.pipelines.get(p);
            if change.plane.buffer.is_none() {
                continue;
            }
            if pipe.flip_pending {
                return Err(CommitError::FlipPending);
            }
            if !*pipe.active.pending() && change.crtc.active != Some(true) {
                return Err(CommitError::Inactive);
            }
        }
        self.execute(tx, Run::Apply)
    }

    /// Commits configuration that operations left staged.
    ///
    /// Pipelines waiting for a page flip are skipped and stay marked, as are
    /// atomic pipelines switched on but not yet presented to.
    pub fn apply_pending(&mut self) -> Result<(), CommitError> {
        let staged: Vec<u32> = self
            .dirty
            .drain(dirty::STAGED)
            .affected()
            .deterministic()
            .run()
            .collect();
        let mut tx = Transaction::new();
        for h in self.objects.pipelines.handles() {
            if !staged.contains(&h.index()) {
                continue;
            }
            if self.objects.pipelines.get(h).flip_pending
                || pipeline::awaits_present(&self.objects, h)
            {
                self.dirty.mark(h.index(), dirty::STAGED);
            } else if pipeline::has_pending(&self.objects, h) {
                tx.insert(h, PipelineChange::new());
            }
        }
        if tx.is_empty() {
            return Ok(());
        }
        self.execute(&tx, Run::Apply)
    }

    pub(crate) fn execute(&mut self, tx: &Transaction, run: Run) -> Result<(), CommitError> {
        let pipelines: Vec<_> = tx.pipelines().collect();
        for &p in &pipelines {
            self.objects.pipelines.validate(p);
        }
        let strategy = self.strategy;
        let mut journal = Journal::new();
        let mut engine = self.engine();

        let staged = tx
            .iter()
            .try_for_each(|(p, change)| engine.stage(&mut journal, p, change));
        // An atomic CRTC only turns on together with a buffer.
        let deferred: Vec<_> = if run == Run::Apply && staged.is_ok() {
            tx.iter()
                .filter(|(p, change)| {
                    change.plane.buffer.is_none() && pipeline::awaits_present(engine.objects, *p)
                })
                .map(|(p, _)| p)
                .collect()
        } else {
            Vec::new()
        };
        let live: Vec<_> = pipelines
            .iter()
            .copied()
            .filter(|p| !deferred.contains(p))
            .collect();
        let result = match (staged, run) {
            (Err(err), _) => {
                engine.rollback(&mut journal);
                Err(err)
            }
            (Ok(()), Run::Test) => {
                let result = engine.test(&mut journal, &pipelines);
                engine.rollback(&mut journal);
                result
            }
            (Ok(()), Run::Stage) if journal.is_empty() => Ok(()),
            (Ok(()), Run::Stage) => match engine.test(&mut journal, &pipelines) {
                Ok(()) => {
                    engine.accept(&mut journal);
                    Ok(())
                }
                Err(err) => {
                    engine.rollback(&mut journal);
                    Err(err)
                }
            },
            (Ok(()), Run::Apply)
                if journal.is_empty()
                    && !live
                        .iter()
                        .any(|&p| pipeline::has_pending(engine.objects, p)) =>
            {
                Ok(())
            }
            (Ok(()), Run::Apply) if !deferred.is_empty() => {
                let mut result = engine.test(&mut journal, &deferred);
                if result.is_ok() && !live.is_empty() {
                    result = engine.commit(&mut journal, &live);
                }
                if result.is_ok() {
                    engine.accept(&mut journal);
                } else {
                    engine.rollback(&mut journal);
                }
                result
            }
            (Ok(()), Run::Apply) => match engine.commit(&mut journal, &pipelines) {
                Ok(()) => {
                    engine.accept(&mut journal);
                    Ok(())
                }
                // Legacy steps that ran stay applied; the engine already
                // reverted the ones that did not.
                Err(err) if strategy == Strategy::Legacy => {
                    engine.accept(&mut journal);
                    Err(err)
                }
                Err(err) => {
                    engine.rollback(&mut journal);
                    Err(err)
                }
            },
        };
        drop(engine);

        if run == Run::Stage && result.is_ok() {
            for &p in &pipelines {
                self.dirty.mark(p.index(), dirty::STAGED);
            }
        }
        for &p in &deferred {
            if pipeline::awaits_present(&self.objects, p) {
                debug!("{:?} stays off until presented", self.objects.pipelines.get(p).output());
                self.dirty.mark(p.index(), dirty::STAGED);
            }
        }
        for &p in &pipelines {
            self.objects.pipelines.get_mut(p).flip_requested = false;
        }
        self.releases.drain(&mut self.device);
        result
    }

    /// Stages a cursor change and, unless the pipeline is being switched
    /// off, uploads it.
    pub(crate) fn update_cursor(
        &mut self,
        p: Handle<Pipeline>,
        change: PipelineChange,
    ) -> Result<(), CommitError> {
        self.execute(&Transaction::single(p, change), Run::Stage)?;
        if !*self.objects.pipelines.get(p).active.pending() {
            return Ok(());
        }
        if let Err(error) = self.engine().apply_cursor(p) {
            warn!("cursor update failed: {error}");
            let pipe = self.objects.pipelines.get_mut(p);
            pipe.cursor.dirty_bo = true;
            pipe.cursor.dirty_pos = true;
            return Err(CommitError::Legacy {
                step: LegacyStep::Cursor,
                error,
            });
        }
        Ok(())
    }

    pub(crate) fn present_failed(&mut self, p: Handle<Pipeline>, err: CommitError) {
        self.engine().present_failed(p, Some(err));
    }

    // -- Events --

    /// Reads kernel events and completes the page flips they report.
    /// Returns the number of events handled.
    pub fn dispatch_events(&mut self) -> Result<usize, DeviceError> {
        let mut events = core::mem::take(&mut self.scratch);
        events.clear();
        let read = self.device.read_events(&mut events);
        let handled = events.len();
        for event in events.drain(..) {
            match event {
                DeviceEvent::PageFlip {
                    crtc,
                    sequence,
                    timestamp,
                } => match self.objects.pipeline_for_crtc(crtc) {
                    Some(p) => self.complete_flip(p, sequence, timestamp),
                    None => debug!("page flip on unused {crtc:?}"),
                },
                DeviceEvent::FlipAborted { crtc } => match self.objects.pipeline_for_crtc(crtc) {
                    Some(p) => self.engine().flip_aborted(p),
                    None => debug!("flip abort on unused {crtc:?}"),
                },
            }
        }
        self.scratch = events;
        self.releases.drain(&mut self.device);
        read.map(|()| handled)
    }

    pub(crate) fn complete_flip(&mut self, p: Handle<Pipeline>, vblank: u32, timestamp: HostTime) {
        if !self.objects.pipelines.get(p).flip_pending {
            debug!("ignoring unexpected page flip on {:?}", self.objects.pipelines.get(p).output());
            return;
        }
        self.engine().page_flipped(p, vblank, timestamp);
        self.releases.drain(&mut self.device);
    }
}

impl<D: Device> Drop for Gpu<D> {
    fn drop(&mut self) {
        for h in self.objects.pipelines.handles() {
            drop(self.objects.pipelines.remove(h));
        }
        for (_, connector) in self.objects.connectors.iter() {
            for blob in connector.blobs() {
                if let Err(err) = self.device.destroy_blob(blob) {
                    warn!("failed to destroy mode blob {blob:?}: {err}");
                }
            }
        }
        for (_, crtc) in self.objects.crtcs.iter_mut() {
            for blob in crtc.owned_blobs.drain(..) {
                if let Err(err) = self.device.destroy_blob(blob) {
                    warn!("failed to destroy gamma blob {blob:?}: {err}");
                }
            }
            crtc.slots.clear();
        }
        for (_, plane) in self.objects.planes.iter_mut() {
            plane.slots.clear();
        }
        self.releases.drain(&mut self.device);
    }
}
