// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Atomic property requests and commit flags.

use alloc::vec::Vec;

use crate::id::{ObjectId, PropertyId};

bitflags::bitflags! {
    /// Flags passed with an atomic commit or legacy page flip.
    ///
    /// Values match the kernel's `DRM_MODE_PAGE_FLIP_*` and
    /// `DRM_MODE_ATOMIC_*` constants.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CommitFlags: u32 {
        /// Deliver a page-flip event when the new state is on screen.
        const PAGE_FLIP_EVENT = 0x01;
        /// Flip without waiting for vblank.
        const PAGE_FLIP_ASYNC = 0x02;
        /// Validate only; do not touch hardware.
        const TEST_ONLY = 0x0100;
        /// Return before the commit completes.
        const NONBLOCK = 0x0200;
        /// The request may perform a full mode set.
        const ALLOW_MODESET = 0x0400;
    }
}

/// One `(object, property, value)` triple in an atomic request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyWrite {
    /// Target object.
    pub object: ObjectId,
    /// Target property on that object.
    pub property: PropertyId,
    /// New value.
    pub value: u64,
}

/// A set of property writes evaluated by the kernel as one unit.
///
/// Writes are kept in insertion order; a later write to the same property
/// replaces the earlier value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtomicRequest {
    writes: Vec<PropertyWrite>,
}

impl AtomicRequest {
    /// Creates an empty request.
    #[must_use]
    pub const fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// Adds or replaces a property write.
    pub fn add(&mut self, object: ObjectId, property: PropertyId, value: u64) {
        if let Some(w) = self
            .writes
            .iter_mut()
            .find(|w| w.object == object && w.property == property)
        {
            w.value = value;
        } else {
            self.writes.push(PropertyWrite {
                object,
                property,
                value,
            });
        }
    }

    /// Returns the writes in insertion order.
    #[must_use]
    pub fn writes(&self) -> &[PropertyWrite] {
        &self.writes
    }

    /// Returns the value written to `property` on `object`, if any.
    #[must_use]
    pub fn value_of(&self, object: ObjectId, property: PropertyId) -> Option<u64> {
        self.writes
            .iter()
            .find(|w| w.object == object && w.property == property)
            .map(|w| w.value)
    }

    /// Returns the number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns `true` if the request carries no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_write_replaces_value() {
        let mut req = AtomicRequest::new();
        req.add(ObjectId(10), PropertyId(1), 0);
        req.add(ObjectId(11), PropertyId(1), 5);
        req.add(ObjectId(10), PropertyId(1), 1);
        assert_eq!(req.len(), 2);
        assert_eq!(req.value_of(ObjectId(10), PropertyId(1)), Some(1));
        assert_eq!(req.writes()[0].object, ObjectId(10), "order is preserved");
    }

    #[test]
    fn flag_values_match_kernel_abi() {
        assert_eq!(CommitFlags::PAGE_FLIP_EVENT.bits(), 0x01);
        assert_eq!(CommitFlags::TEST_ONLY.bits(), 0x100);
        assert_eq!(CommitFlags::ALLOW_MODESET.bits(), 0x400);
    }
}
