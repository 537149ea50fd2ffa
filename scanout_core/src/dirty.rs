// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-tracking channel constants.
//!
//! The [`Gpu`](crate::gpu::Gpu) keeps one [`understory_dirty`] tracker keyed
//! by `u32`. Channels differ in what the key means:
//!
//! - [`STAGED`] is keyed by pipeline slot index. A pipeline is marked when
//!   an operation leaves configuration staged for its next commit, and
//!   [`Gpu::apply_pending`](crate::gpu::Gpu::apply_pending) drains it.
//! - [`MODES`] is keyed by connector object id. Hotplug marks connectors
//!   whose mode list changed; the same pass drains it into
//!   [`OutputEvent::ModesChanged`](crate::output::OutputEvent::ModesChanged).

use understory_dirty::Channel;

/// Pipeline has staged configuration that no commit has pushed yet.
pub const STAGED: Channel = Channel::new(0);

/// Connector mode list changed.
pub const MODES: Channel = Channel::new(1);

