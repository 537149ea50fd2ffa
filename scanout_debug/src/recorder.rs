// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! Property writes are stored as a count, and a synchronous present error
//! only as the kind of [`CommitError`].

use scanout_core::commit::Strategy;
use scanout_core::error::{CommitError, LegacyStep};
use scanout_core::id::ObjectId;
use scanout_core::output::OutputId;
use scanout_core::request::{CommitFlags, PropertyWrite};
use scanout_core::time::HostTime;
use scanout_core::trace::{
    CommitEvent, CommitOutcome, LegacyStepEvent, PageFlipEvent, PresentFailedEvent, RollbackEvent,
    TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_COMMIT: u8 = 1;
const TAG_LEGACY_STEP: u8 = 2;
const TAG_PAGE_FLIP: u8 = 3;
const TAG_PRESENT_FAILED: u8 = 4;
const TAG_ROLLBACK: u8 = 5;
const TAG_PROPERTY_WRITES_COUNT: u8 = 6;

const LEGACY_STEPS: [LegacyStep; 6] = [
    LegacyStep::Dpms,
    LegacyStep::Modeset,
    LegacyStep::Property,
    LegacyStep::Gamma,
    LegacyStep::PageFlip,
    LegacyStep::Cursor,
];

const OUTCOMES: [CommitOutcome; 4] = [
    CommitOutcome::TestPassed,
    CommitOutcome::TestFailed,
    CommitOutcome::Committed,
    CommitOutcome::Failed,
];

/// Kind of a synchronous present failure, as kept in a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentErrorKind {
    /// [`CommitError::Capability`].
    Capability,
    /// [`CommitError::Validation`].
    Validation,
    /// [`CommitError::Commit`].
    Commit,
    /// [`CommitError::Legacy`].
    Legacy,
    /// [`CommitError::FlipPending`].
    FlipPending,
    /// [`CommitError::Inactive`].
    Inactive,
    /// [`CommitError::Allocation`].
    Allocation,
}

impl PresentErrorKind {
    const ALL: [Self; 7] = [
        Self::Capability,
        Self::Validation,
        Self::Commit,
        Self::Legacy,
        Self::FlipPending,
        Self::Inactive,
        Self::Allocation,
    ];

    /// Classifies an error.
    #[must_use]
    pub fn of(err: &CommitError) -> Self {
        match err {
            CommitError::Capability(_) => Self::Capability,
            CommitError::Validation(_) => Self::Validation,
            CommitError::Commit(_) => Self::Commit,
            CommitError::Legacy { .. } => Self::Legacy,
            CommitError::FlipPending => Self::FlipPending,
            CommitError::Inactive => Self::Inactive,
            CommitError::Allocation(_) => Self::Allocation,
        }
    }
}

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_index<T: PartialEq>(&mut self, table: &[T], v: &T) {
        let index = table.iter().position(|t| t == v).unwrap_or(0);
        self.write_u8(u8::try_from(index).unwrap_or(u8::MAX));
    }
}

impl TraceSink for RecorderSink {
    fn on_commit(&mut self, e: &CommitEvent) {
        self.write_u8(TAG_COMMIT);
        self.write_u64(e.sequence);
        self.write_u8(match e.strategy {
            Strategy::Atomic => 0,
            Strategy::Legacy => 1,
        });
        self.write_u32(e.flags.bits());
        self.write_u32(e.pipelines);
        self.write_u32(e.properties);
        self.write_index(&OUTCOMES, &e.outcome);
        self.write_option_u64(e.submitted_at.map(HostTime::ticks));
    }

    fn on_legacy_step(&mut self, e: &LegacyStepEvent) {
        self.write_u8(TAG_LEGACY_STEP);
        self.write_u64(e.sequence);
        self.write_u32(e.crtc.0);
        self.write_index(&LEGACY_STEPS, &e.step);
        self.write_u8(u8::from(e.ok));
    }

    fn on_page_flip(&mut self, e: &PageFlipEvent) {
        self.write_u8(TAG_PAGE_FLIP);
        self.write_u32(e.output.0);
        self.write_u32(e.crtc.0);
        self.write_u32(e.vblank);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_present_failed(&mut self, e: &PresentFailedEvent) {
        self.write_u8(TAG_PRESENT_FAILED);
        self.write_u32(e.output.0);
        match &e.error {
            Some(err) => {
                self.write_u8(1);
                self.write_index(&PresentErrorKind::ALL, &PresentErrorKind::of(err));
            }
            None => {
                self.write_u8(0);
                self.write_u8(0);
            }
        }
    }

    fn on_rollback(&mut self, e: &RollbackEvent) {
        self.write_u8(TAG_ROLLBACK);
        self.write_u64(e.sequence);
        self.write_u32(e.entries);
    }

    fn on_property_writes(&mut self, sequence: u64, writes: &[PropertyWrite]) {
        self.write_u8(TAG_PROPERTY_WRITES_COUNT);
        self.write_u64(sequence);
        self.write_u32(u32::try_from(writes.len()).unwrap_or(u32::MAX));
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`CommitEvent`].
    Commit(CommitEvent),
    /// A [`LegacyStepEvent`].
    LegacyStep(LegacyStepEvent),
    /// A [`PageFlipEvent`].
    PageFlip(PageFlipEvent),
    /// A failed present.
    PresentFailed {
        /// Affected output.
        output: OutputId,
        /// Kind of the synchronous error; `None` for an aborted flip.
        error: Option<PresentErrorKind>,
    },
    /// A [`RollbackEvent`].
    Rollback(RollbackEvent),
    /// Property-write count of an atomic request.
    PropertyWritesCount {
        /// Commit counter.
        sequence: u64,
        /// Number of writes.
        count: u32,
    },
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[v]| v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some(if present != 0 { Some(val) } else { None })
    }

    fn read_index<T: Copy>(&mut self, table: &[T]) -> Option<T> {
        table.get(usize::from(self.read_u8()?)).copied()
    }

    fn decode_commit(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Commit(CommitEvent {
            sequence: self.read_u64()?,
            strategy: match self.read_u8()? {
                0 => Strategy::Atomic,
                _ => Strategy::Legacy,
            },
            flags: CommitFlags::from_bits_truncate(self.read_u32()?),
            pipelines: self.read_u32()?,
            properties: self.read_u32()?,
            outcome: self.read_index(&OUTCOMES)?,
            submitted_at: self.read_option_u64()?.map(HostTime),
        }))
    }

    fn decode_legacy_step(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::LegacyStep(LegacyStepEvent {
            sequence: self.read_u64()?,
            crtc: ObjectId(self.read_u32()?),
            step: self.read_index(&LEGACY_STEPS)?,
            ok: self.read_u8()? != 0,
        }))
    }

    fn decode_page_flip(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PageFlip(PageFlipEvent {
            output: OutputId(self.read_u32()?),
            crtc: ObjectId(self.read_u32()?),
            vblank: self.read_u32()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_present_failed(&mut self) -> Option<RecordedEvent> {
        let output = OutputId(self.read_u32()?);
        let present = self.read_u8()?;
        let kind = self.read_index(&PresentErrorKind::ALL)?;
        Some(RecordedEvent::PresentFailed {
            output,
            error: (present != 0).then_some(kind),
        })
    }

    fn decode_rollback(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Rollback(RollbackEvent {
            sequence: self.read_u64()?,
            entries: self.read_u32()?,
        }))
    }

    fn decode_property_writes_count(&mut self) -> Option<RecordedEvent> {
        let sequence = self.read_u64()?;
        let count = self.read_u32()?;
        Some(RecordedEvent::PropertyWritesCount { sequence, count })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_COMMIT => self.decode_commit(),
            TAG_LEGACY_STEP => self.decode_legacy_step(),
            TAG_PAGE_FLIP => self.decode_page_flip(),
            TAG_PRESENT_FAILED => self.decode_present_failed(),
            TAG_ROLLBACK => self.decode_rollback(),
            TAG_PROPERTY_WRITES_COUNT => self.decode_property_writes_count(),
            _ => None, // unknown tag
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
