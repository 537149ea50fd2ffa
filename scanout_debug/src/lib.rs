// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, Chrome trace export and state dumps for
//! scanout diagnostics.
//!
//! The [`TraceSink`](scanout_core::trace::TraceSink) implementations here
//! are meant for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`] writes one human-readable line per event.
//! - [`recorder::RecorderSink`] keeps a compact binary recording that
//!   [`recorder::decode`] plays back.
//! - [`chrome::export`] turns recorded bytes into Chrome Trace Event Format
//!   JSON.
//!
//! [`state`] dumps the property state of pipelines as JSON, the structured
//! counterpart of
//! [`PipelineRef::print_debug_info`](scanout_core::pipeline::PipelineRef::print_debug_info).

pub mod chrome;
pub mod pretty;
pub mod recorder;
pub mod state;

use scanout_core::request::CommitFlags;

/// Kernel-style names of the set flags joined with `|`, or `none`.
pub(crate) fn flag_names(flags: CommitFlags) -> String {
    let names: Vec<&str> = flags.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        String::from("none")
    } else {
        names.join("|")
    }
}
