// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Output identification and notifications.
//!
//! [`OutputId`] names the display behind one pipeline. The
//! [`Gpu`](crate::gpu::Gpu) reports hotplug changes and frame completion as
//! [`OutputEvent`]s through a bounded queue; when a consumer falls behind
//! the oldest events are dropped.

use alloc::collections::VecDeque;
use core::fmt;

use crate::id::Handle;
use crate::pipeline::Pipeline;
use crate::time::HostTime;

/// Identifies a display output.
///
/// Assigned by the [`Gpu`](crate::gpu::Gpu) when a pipeline is created and
/// never reused while the GPU lives.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OutputId(pub u32);

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({})", self.0)
    }
}

/// Something the output layer needs to react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputEvent {
    /// A display was connected and a pipeline created for it.
    Added {
        /// The new output.
        output: OutputId,
        /// Pipeline driving it.
        pipeline: Handle<Pipeline>,
    },
    /// A display went away; its pipeline has been destroyed.
    Removed {
        /// The removed output.
        output: OutputId,
    },
    /// The connector's mode list changed.
    ModesChanged {
        /// Affected output.
        output: OutputId,
    },
    /// A presented frame reached the screen.
    PageFlipped {
        /// Affected output.
        output: OutputId,
        /// When scan-out of the frame started.
        timestamp: HostTime,
    },
    /// A present failed after earlier presents had succeeded.
    PresentFailed {
        /// Affected output.
        output: OutputId,
    },
}

/// Bounded FIFO queue with a `drop_oldest` overflow policy.
///
/// Once full, new pushes remove the oldest item before inserting the newest.
#[derive(Debug, Clone)]
pub(crate) struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped_count: u64,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped_count: 0,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            let _ = self.items.pop_front();
            self.dropped_count += 1;
        }
        self.items.push_back(item);
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped_count
    }
}
