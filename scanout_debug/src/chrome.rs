// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Each output gets its own process row; commits, legacy steps and
//! rollbacks without an output land on process 0.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use scanout_core::time::HostTime;

use crate::flag_names;
use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Events without a timestamp of their own (legacy steps, rollbacks,
/// property-write counts) take the time of the last commit before them.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut last_ts = 0.0;

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Commit(e) => {
                if let Some(t) = e.submitted_at {
                    last_ts = us(t);
                }
                events.push(json!({
                    "ph": "i",
                    "name": if e.outcome.is_success() { "Commit" } else { "CommitRejected" },
                    "cat": e.strategy.name(),
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "sequence": e.sequence,
                        "flags": flag_names(e.flags),
                        "pipelines": e.pipelines,
                        "properties": e.properties,
                        "outcome": e.outcome.name(),
                    }
                }));
            }
            RecordedEvent::LegacyStep(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": e.step.name(),
                    "cat": "legacy",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": e.crtc.0,
                    "s": "t",
                    "args": {
                        "sequence": e.sequence,
                        "ok": e.ok,
                    }
                }));
            }
            RecordedEvent::PageFlip(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "PageFlip",
                    "cat": "Output",
                    "ts": us(e.timestamp),
                    "pid": e.output.0,
                    "tid": e.crtc.0,
                    "s": "p",
                    "args": {
                        "vblank": e.vblank,
                    }
                }));
            }
            RecordedEvent::PresentFailed { output, error } => {
                events.push(json!({
                    "ph": "i",
                    "name": "PresentFailed",
                    "cat": "Output",
                    "ts": last_ts,
                    "pid": output.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "error": error.map_or_else(|| String::from("flip aborted"), |k| format!("{k:?}")),
                    }
                }));
            }
            RecordedEvent::Rollback(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Rollback",
                    "cat": "Journal",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "sequence": e.sequence,
                        "entries": e.entries,
                    }
                }));
            }
            RecordedEvent::PropertyWritesCount { sequence, count } => {
                events.push(json!({
                    "ph": "i",
                    "name": "PropertyWrites",
                    "cat": "Rich",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "sequence": sequence,
                        "count": count,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn us(t: HostTime) -> f64 {
    t.ticks() as f64 / 1000.0
}
