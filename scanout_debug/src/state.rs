// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! JSON dumps of pipeline property state.
//!
//! Same content as [`PipelineRef::debug_lines`], as a value that tools can
//! diff: every property of the connector, the CRTC and the primary plane
//! with its acknowledged and pending values. Source rectangle values are
//! shown in whole pixels.

use serde_json::{Map, Value, json};

use scanout_core::device::Device;
use scanout_core::gpu::Gpu;
use scanout_core::pipeline::PipelineRef;
use scanout_core::property::{PropertyName, PropertyTable};

use crate::flag_names;

fn properties<P: PropertyName>(table: &PropertyTable<P>) -> Value {
    let mut map = Map::new();
    for (_, prop) in table.iter() {
        let shift = if prop.name().starts_with("SRC_") { 16 } else { 0 };
        map.insert(
            prop.name().into(),
            json!({
                "current": prop.current() >> shift,
                "pending": prop.pending() >> shift,
            }),
        );
    }
    Value::Object(map)
}

/// Property state of one pipeline.
#[must_use]
pub fn pipeline_state(p: &PipelineRef<'_>) -> Value {
    let connector = p.connector();
    let crtc = p.crtc();
    let source = p.source_size();
    json!({
        "output": p.output().0,
        "strategy": p.strategy().name(),
        "active": p.is_active(),
        "flip_pending": p.is_flip_pending(),
        "flags": flag_names(p.last_flags()),
        "source": [source.width, source.height],
        "connector": {
            "id": connector.id().0,
            "properties": properties(connector.properties()),
        },
        "crtc": {
            "id": crtc.id().0,
            "properties": properties(crtc.properties()),
        },
        "plane": p.plane().map(|plane| json!({
            "id": plane.id().0,
            "properties": properties(plane.properties()),
        })),
    })
}

/// Property state of every pipeline on `gpu`, in pipeline order.
#[must_use]
pub fn gpu_state<D: Device>(gpu: &Gpu<D>) -> Value {
    Value::Array(
        gpu.pipelines()
            .into_iter()
            .map(|h| pipeline_state(&gpu.pipeline(h)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use scanout_core::config::GpuConfig;
    use scanout_core::format::Fourcc;
    use scanout_core::geometry::Size;
    use scanout_mock::{MockDevice, mode};

    use crate::pretty::PrettyPrintSink;

    #[test]
    fn staged_values_show_as_pending() {
        let device = MockDevice::new(1);
        device.add_connector(&[mode(1920, 1080, 60)]);
        let mut gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
        let h = gpu.pipelines()[0];
        gpu.pipeline_mut(h).set_overscan(20).unwrap();

        let state = pipeline_state(&gpu.pipeline(h));
        assert_eq!(state["strategy"], "atomic");
        assert_eq!(state["connector"]["properties"]["overscan"]["current"], 0);
        assert_eq!(state["connector"]["properties"]["overscan"]["pending"], 20);
        assert!(state["plane"].is_object());
    }

    #[test]
    fn source_rectangle_is_in_pixels() {
        let device = MockDevice::new(1);
        device.add_connector(&[mode(1920, 1080, 60)]);
        let mut gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
        let h = gpu.pipelines()[0];
        let buffer = gpu
            .create_dumb_buffer(Size::new(1920, 1080), Fourcc::XRGB8888)
            .unwrap();
        gpu.pipeline_mut(h).present(&buffer).unwrap();

        let all = gpu_state(&gpu);
        assert_eq!(all.as_array().map(Vec::len), Some(1));
        let plane = &all[0]["plane"]["properties"];
        assert_eq!(plane["SRC_W"]["current"], 1920);
        assert_eq!(plane["SRC_H"]["current"], 1080);
        assert_eq!(all[0]["active"], true);
        assert_eq!(all[0]["source"], json!([1920, 1080]));
    }

    #[test]
    fn legacy_pipelines_have_no_plane() {
        let device = MockDevice::new(1);
        device.add_connector(&[mode(1920, 1080, 60)]);
        let gpu = Gpu::new(device.clone(), GpuConfig::legacy()).unwrap();
        let state = gpu_state(&gpu);
        assert_eq!(state[0]["strategy"], "legacy");
        assert!(state[0]["plane"].is_null());
    }

    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn installed_sink_sees_the_test_commit() {
        let device = MockDevice::new(1);
        device.add_connector(&[mode(1920, 1080, 60)]);
        let mut gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
        let out = Shared::default();
        gpu.set_trace_sink(Box::new(PrettyPrintSink::with_writer(out.clone())));
        let h = gpu.pipelines()[0];
        gpu.pipeline_mut(h).set_overscan(20).unwrap();

        let text = String::from_utf8(out.0.borrow().clone()).unwrap();
        assert!(text.contains("[commit] seq="), "got: {text}");
        assert!(text.contains("test-passed"), "got: {text}");
    }
}
