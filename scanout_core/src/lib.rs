// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel mode-setting pipelines and their commit engine.
//!
//! `scanout_core` drives display outputs through the kernel mode-setting
//! interface. Each output is a [`Pipeline`](pipeline::Pipeline): one
//! connector, one CRTC and (on the atomic path) one primary plane. The crate
//! is `no_std` compatible (with `alloc`); the kernel is reached only through
//! the [`Device`](device::Device) trait.
//!
//! # Architecture
//!
//! ```text
//!   caller ──► PipelineMut op / Gpu::try_apply(Transaction)
//!                      │
//!                      ▼
//!            Engine::stage ──► pending halves of
//!                      │       Connector / Crtc / Plane properties
//!                      │       (old values recorded in the Journal)
//!                      ▼
//!         Atomic: TEST_ONLY request ──► real request
//!         Legacy: DPMS ─► SetCrtc ─► gamma ─► PageFlip ─► cursor
//!                      │
//!          ok: pending ──► current      err: Journal rollback
//!                      │
//!                      ▼
//!   Device::read_events ──► Gpu::dispatch_events ──► OutputEvent
//! ```
//!
//! **[`object`]** and **[`property`]**: hardware objects whose state is a
//! table of double-buffered properties. Only the commit engine promotes
//! pending values to current, and only after the kernel accepted them.
//!
//! **[`pipeline`]**: the operation surface (`present`, `set_active`,
//! cursor, gamma, overscan, VRR, transformation, mode switching).
//!
//! **[`commit`]**: the atomic and legacy strategies.
//!
//! **[`gpu`]**: discovery, strategy selection, hotplug, transactions and
//! page-flip dispatch.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! commit instrumentation, with a zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies,
//!   [`time::now`] and [`GpuConfig::from_env`](config::GpuConfig::from_env).
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-property
//!   write events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod arena;
pub mod buffer;
pub mod change;
pub mod commit;
pub mod config;
pub mod device;
pub mod dirty;
pub mod error;
pub mod format;
pub mod gamma;
pub mod geometry;
pub mod gpu;
pub mod id;
mod journal;
pub mod object;
pub mod output;
pub mod pipeline;
pub mod property;
pub mod request;
pub mod time;
pub mod trace;
pub mod transform;
