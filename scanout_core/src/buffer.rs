// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scan-out buffer handles.
//!
//! A [`Buffer`] is a reference-counted handle to a framebuffer registered
//! with the kernel. Clones share the registration. When the last clone is
//! dropped the registration is queued on a [`ReleaseQueue`], and the owning
//! [`Gpu`](crate::gpu::Gpu) unregisters it at the next safe point (after a
//! commit or a page flip). This keeps the drop path infallible and free of
//! device access.
//!
//! CRTCs and planes hold their buffers in [`FlipSlots`]: `next` is the
//! buffer a queued flip will show, `current` the one on screen. A buffer
//! leaves `current` only when the flip that replaces it completes, so the
//! kernel never scans out a released framebuffer.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use crate::device::{CursorImage, Device, DeviceError, FramebufferDesc};
use crate::format::{Fourcc, Modifier};
use crate::geometry::Size;
use crate::id::{FramebufferId, GemHandle};

/// How a buffer's memory was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// A dumb buffer the engine allocated; freed together with the
    /// framebuffer.
    Dumb,
    /// Memory owned by a renderer; only the framebuffer registration is
    /// released.
    Imported,
}

/// A kernel registration waiting to be released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Released {
    pub(crate) framebuffer: FramebufferId,
    pub(crate) dumb: Option<GemHandle>,
}

/// Registrations dropped by their last [`Buffer`] handle.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReleaseQueue(Rc<RefCell<Vec<Released>>>);

impl ReleaseQueue {
    fn push(&self, released: Released) {
        self.0.borrow_mut().push(released);
    }

    /// Takes every queued release.
    pub(crate) fn take(&self) -> Vec<Released> {
        core::mem::take(&mut *self.0.borrow_mut())
    }

    /// Unregisters everything queued, logging failures.
    pub(crate) fn drain<D: Device>(&self, device: &mut D) -> usize {
        let released = self.take();
        for r in &released {
            if let Err(err) = device.remove_framebuffer(r.framebuffer) {
                log::warn!("failed to remove framebuffer {:?}: {err}", r.framebuffer);
            }
            if let Some(handle) = r.dumb
                && let Err(err) = device.destroy_dumb_buffer(handle)
            {
                log::warn!("failed to destroy dumb buffer {handle:?}: {err}");
            }
        }
        released.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

struct BufferInner {
    framebuffer: FramebufferId,
    handle: GemHandle,
    size: Size,
    format: Fourcc,
    modifier: Modifier,
    kind: BufferKind,
    releases: ReleaseQueue,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.releases.push(Released {
            framebuffer: self.framebuffer,
            dumb: (self.kind == BufferKind::Dumb).then_some(self.handle),
        });
    }
}

/// A framebuffer the kernel can scan out.
#[derive(Clone)]
pub struct Buffer {
    inner: Rc<BufferInner>,
}

impl Buffer {
    pub(crate) fn new(
        framebuffer: FramebufferId,
        desc: &FramebufferDesc,
        kind: BufferKind,
        releases: &ReleaseQueue,
    ) -> Self {
        Self {
            inner: Rc::new(BufferInner {
                framebuffer,
                handle: desc.handle,
                size: desc.size,
                format: desc.format,
                modifier: desc.modifier,
                kind,
                releases: releases.clone(),
            }),
        }
    }

    /// Kernel framebuffer id.
    #[must_use]
    pub fn framebuffer(&self) -> FramebufferId {
        self.inner.framebuffer
    }

    /// Allocation handle backing the framebuffer.
    #[must_use]
    pub fn handle(&self) -> GemHandle {
        self.inner.handle
    }

    /// Size in pixels.
    #[must_use]
    pub fn size(&self) -> Size {
        self.inner.size
    }

    /// Pixel format.
    #[must_use]
    pub fn format(&self) -> Fourcc {
        self.inner.format
    }

    /// Layout modifier.
    #[must_use]
    pub fn modifier(&self) -> Modifier {
        self.inner.modifier
    }

    /// How the memory was obtained.
    #[must_use]
    pub fn kind(&self) -> BufferKind {
        self.inner.kind
    }

    /// Number of live handles sharing this registration.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub(crate) fn cursor_image(&self) -> CursorImage {
        CursorImage {
            handle: self.inner.handle,
            size: self.inner.size,
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("framebuffer", &self.inner.framebuffer)
            .field("size", &self.inner.size)
            .field("format", &self.inner.format)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

/// Registers memory owned by a renderer as a framebuffer.
pub(crate) fn import<D: Device>(
    device: &mut D,
    releases: &ReleaseQueue,
    desc: &FramebufferDesc,
) -> Result<Buffer, DeviceError> {
    let fb = device.add_framebuffer(desc)?;
    Ok(Buffer::new(fb, desc, BufferKind::Imported, releases))
}

/// Allocates a dumb buffer and registers it as a framebuffer.
pub(crate) fn allocate_dumb<D: Device>(
    device: &mut D,
    releases: &ReleaseQueue,
    size: Size,
    format: Fourcc,
) -> Result<Buffer, DeviceError> {
    let dumb = device.create_dumb_buffer(size, format)?;
    let desc = FramebufferDesc {
        handle: dumb.handle,
        size: dumb.size,
        format: dumb.format,
        modifier: Modifier::LINEAR,
        pitch: dumb.pitch,
    };
    match device.add_framebuffer(&desc) {
        Ok(fb) => Ok(Buffer::new(fb, &desc, BufferKind::Dumb, releases)),
        Err(err) => {
            if let Err(cleanup) = device.destroy_dumb_buffer(dumb.handle) {
                log::warn!("failed to free dumb buffer after addfb failure: {cleanup}");
            }
            Err(err)
        }
    }
}

/// The buffers a CRTC or plane is showing and about to show.
#[derive(Clone, Debug, Default)]
pub struct FlipSlots {
    current: Option<Buffer>,
    next: Option<Buffer>,
}

impl FlipSlots {
    /// Buffer on screen.
    #[must_use]
    pub fn current(&self) -> Option<&Buffer> {
        self.current.as_ref()
    }

    /// Buffer a queued flip will show.
    #[must_use]
    pub fn next(&self) -> Option<&Buffer> {
        self.next.as_ref()
    }

    pub(crate) fn set_next(&mut self, buffer: Option<Buffer>) {
        self.next = buffer;
    }

    /// Replaces the on-screen buffer directly, for synchronous mode sets.
    pub(crate) fn set_current(&mut self, buffer: Option<Buffer>) {
        self.current = buffer;
    }

    /// The queued flip completed: `next` becomes `current`.
    pub(crate) fn flip(&mut self) {
        if let Some(next) = self.next.take() {
            self.current = Some(next);
        }
    }

    /// The queued flip will never complete.
    pub(crate) fn abort(&mut self) {
        self.next = None;
    }

    pub(crate) fn clear(&mut self) {
        self.current = None;
        self.next = None;
    }
}
