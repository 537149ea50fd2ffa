// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the commit engine.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! engine calls as it tests, commits and completes frames. All method bodies
//! default to no-ops, so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): adds per-property write records
//!   ([`TraceSink::on_property_writes`]).

use crate::commit::Strategy;
use crate::error::{CommitError, LegacyStep};
use crate::id::ObjectId;
use crate::output::OutputId;
#[cfg(feature = "trace-rich")]
use crate::request::PropertyWrite;
use crate::request::CommitFlags;
use crate::time::HostTime;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a commit attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitOutcome {
    /// A test-only request was accepted.
    TestPassed,
    /// A test-only request was rejected.
    TestFailed,
    /// A real request was accepted.
    Committed,
    /// A real request was rejected.
    Failed,
}

impl CommitOutcome {
    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TestPassed => "test-passed",
            Self::TestFailed => "test-failed",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for accepted requests.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::TestPassed | Self::Committed)
    }
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted for every atomic request and every legacy commit pass.
#[derive(Clone, Copy, Debug)]
pub struct CommitEvent {
    /// Per-GPU commit counter.
    pub sequence: u64,
    /// Strategy that ran.
    pub strategy: Strategy,
    /// Flags passed to the kernel (empty for legacy passes).
    pub flags: CommitFlags,
    /// Pipelines in the transaction.
    pub pipelines: u32,
    /// Property writes in the request.
    pub properties: u32,
    /// Result.
    pub outcome: CommitOutcome,
    /// Host time when the request was submitted, if a clock is available.
    pub submitted_at: Option<HostTime>,
}

/// Emitted for each legacy ioctl step.
#[derive(Clone, Copy, Debug)]
pub struct LegacyStepEvent {
    /// Commit counter of the enclosing pass.
    pub sequence: u64,
    /// CRTC the step targeted.
    pub crtc: ObjectId,
    /// Step kind.
    pub step: LegacyStep,
    /// Whether the kernel accepted it.
    pub ok: bool,
}

/// Emitted when a page flip completes.
#[derive(Clone, Copy, Debug)]
pub struct PageFlipEvent {
    /// Output that flipped.
    pub output: OutputId,
    /// CRTC that flipped.
    pub crtc: ObjectId,
    /// Kernel vblank sequence.
    pub vblank: u32,
    /// Scan-out start of the new frame.
    pub timestamp: HostTime,
}

/// Emitted when a present fails, synchronously or asynchronously.
#[derive(Clone, Copy, Debug)]
pub struct PresentFailedEvent {
    /// Affected output.
    pub output: OutputId,
    /// Synchronous error; `None` for an aborted flip.
    pub error: Option<CommitError>,
}

/// Emitted when staged state is discarded.
#[derive(Clone, Copy, Debug)]
pub struct RollbackEvent {
    /// Commit counter at the time of the rollback.
    pub sequence: u64,
    /// Journal entries reverted.
    pub entries: u32,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the commit engine.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called after every atomic request or legacy pass.
    fn on_commit(&mut self, e: &CommitEvent) {
        _ = e;
    }

    /// Called after each legacy step.
    fn on_legacy_step(&mut self, e: &LegacyStepEvent) {
        _ = e;
    }

    /// Called when a page flip completes.
    fn on_page_flip(&mut self, e: &PageFlipEvent) {
        _ = e;
    }

    /// Called when a present fails.
    fn on_present_failed(&mut self, e: &PresentFailedEvent) {
        _ = e;
    }

    /// Called when staged state is rolled back.
    fn on_rollback(&mut self, e: &RollbackEvent) {
        _ = e;
    }

    /// Called with the property writes of an atomic request (requires
    /// `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_property_writes(&mut self, sequence: u64, writes: &[PropertyWrite]) {
        _ = (sequence, writes);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`CommitEvent`].
    #[inline]
    pub fn commit(&mut self, e: &CommitEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_commit(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`LegacyStepEvent`].
    #[inline]
    pub fn legacy_step(&mut self, e: &LegacyStepEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_legacy_step(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PageFlipEvent`].
    #[inline]
    pub fn page_flip(&mut self, e: &PageFlipEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_page_flip(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PresentFailedEvent`].
    #[inline]
    pub fn present_failed(&mut self, e: &PresentFailedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_present_failed(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`RollbackEvent`].
    #[inline]
    pub fn rollback(&mut self, e: &RollbackEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_rollback(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits property writes (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn property_writes(&mut self, sequence: u64, writes: &[PropertyWrite]) {
        if let Some(s) = &mut self.sink {
            s.on_property_writes(sequence, writes);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_commit() -> CommitEvent {
        CommitEvent {
            sequence: 3,
            strategy: Strategy::Atomic,
            flags: CommitFlags::TEST_ONLY | CommitFlags::ALLOW_MODESET,
            pipelines: 1,
            properties: 14,
            outcome: CommitOutcome::TestPassed,
            submitted_at: None,
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_commit(&sample_commit());
        sink.on_rollback(&RollbackEvent {
            sequence: 3,
            entries: 2,
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        tracer.commit(&sample_commit());
        tracer.legacy_step(&LegacyStepEvent {
            sequence: 1,
            crtc: ObjectId(10),
            step: LegacyStep::Gamma,
            ok: true,
        });
    }

    #[test]
    fn outcome_success() {
        assert!(CommitOutcome::TestPassed.is_success());
        assert!(CommitOutcome::Committed.is_success());
        assert!(!CommitOutcome::Failed.is_success());
        assert_eq!(CommitOutcome::TestFailed.name(), "test-failed");
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        use alloc::vec::Vec;

        struct RecordingSink {
            sequences: Vec<u64>,
        }
        impl TraceSink for RecordingSink {
            fn on_commit(&mut self, e: &CommitEvent) {
                self.sequences.push(e.sequence);
            }
        }

        let mut sink = RecordingSink {
            sequences: Vec::new(),
        };
        let mut tracer = Tracer::new(&mut sink);
        tracer.commit(&sample_commit());
        // Access sink after tracer is dropped.
        drop(tracer);
        assert_eq!(sink.sequences, &[3]);
    }
}
