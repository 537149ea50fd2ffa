// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel identifiers and generational handles.
//!
//! Kernel ids ([`ObjectId`], [`PropertyId`], [`FramebufferId`], [`BlobId`],
//! [`GemHandle`]) are assigned by the mode-setting device and passed through
//! unchanged. [`Handle`] addresses an entry in an [`Arena`](crate::arena::Arena)
//! owned by a [`Gpu`](crate::gpu::Gpu).

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

/// Identifies a kernel mode-setting object (connector, CRTC or plane).
///
/// Kernel object ids are unique across object types on one device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId(pub u32);

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// Identifies a kernel property on some object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PropertyId(pub u32);

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyId({})", self.0)
    }
}

/// A framebuffer registration returned by the kernel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FramebufferId(pub u32);

impl FramebufferId {
    /// Returns the value pushed as a `FB_ID` property.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Debug for FramebufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FramebufferId({})", self.0)
    }
}

/// A kernel property blob (mode info, gamma LUT).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlobId(pub u32);

impl BlobId {
    /// Returns the value pushed as a blob property.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

/// A GEM handle naming a buffer allocation on the device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GemHandle(pub u32);

impl fmt::Debug for GemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GemHandle({})", self.0)
    }
}

/// Names the kind of entry a [`Handle`] points at (for diagnostics).
pub trait ArenaItem {
    /// Short name used in `Debug` output and panic messages.
    const KIND: &'static str;
}

/// A handle to an entry in an [`Arena`](crate::arena::Arena).
///
/// Contains both a slot index and a generation counter so that stale handles
/// can be detected after an entry is removed and the slot is reused.
pub struct Handle<T> {
    pub(crate) idx: u32,
    pub(crate) generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self {
            idx,
            generation,
            _marker: PhantomData,
        }
    }

    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.idx, self.generation).cmp(&(other.idx, other.generation))
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
        self.generation.hash(state);
    }
}

impl<T: ArenaItem> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}@gen{})", T::KIND, self.idx, self.generation)
    }
}
