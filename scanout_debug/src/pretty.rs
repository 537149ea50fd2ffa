// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Host times
//! are printed in microseconds.

use std::io::Write;

use scanout_core::request::PropertyWrite;
use scanout_core::time::HostTime;
use scanout_core::trace::{
    CommitEvent, LegacyStepEvent, PageFlipEvent, PresentFailedEvent, RollbackEvent, TraceSink,
};

use crate::flag_names;

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the writer.
    #[must_use]
    pub fn into_writer(self) -> W {
        self.writer
    }
}

fn us(t: HostTime) -> f64 {
    t.ticks() as f64 / 1000.0
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_commit(&mut self, e: &CommitEvent) {
        let at = e
            .submitted_at
            .map_or_else(|| String::from("?"), |t| format!("{:.1}µs", us(t)));
        let _ = writeln!(
            self.writer,
            "[commit] seq={} {} flags={} pipelines={} props={} at={at} {}",
            e.sequence,
            e.strategy.name(),
            flag_names(e.flags),
            e.pipelines,
            e.properties,
            e.outcome.name(),
        );
    }

    fn on_legacy_step(&mut self, e: &LegacyStepEvent) {
        let _ = writeln!(
            self.writer,
            "[legacy] seq={} crtc={} {} {}",
            e.sequence,
            e.crtc.0,
            e.step.name(),
            if e.ok { "ok" } else { "FAILED" },
        );
    }

    fn on_page_flip(&mut self, e: &PageFlipEvent) {
        let _ = writeln!(
            self.writer,
            "[flip] output={} crtc={} vblank={} at {:.1}µs",
            e.output.0,
            e.crtc.0,
            e.vblank,
            us(e.timestamp),
        );
    }

    fn on_present_failed(&mut self, e: &PresentFailedEvent) {
        match &e.error {
            Some(err) => {
                let _ = writeln!(self.writer, "[present] output={} FAILED: {err}", e.output.0);
            }
            None => {
                let _ = writeln!(self.writer, "[present] output={} flip aborted", e.output.0);
            }
        }
    }

    fn on_rollback(&mut self, e: &RollbackEvent) {
        let _ = writeln!(
            self.writer,
            "[rollback] seq={} entries={}",
            e.sequence, e.entries,
        );
    }

    fn on_property_writes(&mut self, sequence: u64, writes: &[PropertyWrite]) {
        let _ = writeln!(self.writer, "[writes] seq={sequence} count={}", writes.len());
        for w in writes {
            let _ = writeln!(
                self.writer,
                "\tobject={} prop={} value={}",
                w.object.0, w.property.0, w.value,
            );
        }
    }
}
