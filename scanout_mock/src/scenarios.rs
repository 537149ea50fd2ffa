// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end scenarios: a [`Gpu`] driving a [`MockDevice`].

use std::cell::RefCell;
use std::rc::Rc;

use scanout_core::buffer::Buffer;
use scanout_core::change::{PipelineChange, RgbRange, SyncMode, Transaction};
use scanout_core::commit::Strategy;
use scanout_core::config::GpuConfig;
use scanout_core::device::DeviceError;
use scanout_core::error::{CapabilityError, CommitError, LegacyStep};
use scanout_core::format::Fourcc;
use scanout_core::gamma::GammaRamp;
use scanout_core::geometry::{Point, Rect, Size};
use scanout_core::gpu::Gpu;
use scanout_core::id::Handle;
use scanout_core::object::PlaneType;
use scanout_core::output::{OutputEvent, OutputId};
use scanout_core::pipeline::Pipeline;
use scanout_core::property::ConnectorProperty;
use scanout_core::trace::{CommitEvent, CommitOutcome, TraceSink};
use scanout_core::transform::PlaneTransformation;

use crate::{LegacyCall, MockDevice, mode};

const FHD: Size = Size::new(1920, 1080);

fn events(gpu: &mut Gpu<MockDevice>) -> Vec<OutputEvent> {
    std::iter::from_fn(|| gpu.poll_event()).collect()
}

fn single_output(device: &MockDevice, config: GpuConfig) -> (Gpu<MockDevice>, Handle<Pipeline>) {
    let gpu = Gpu::new(device.clone(), config).unwrap();
    let pipelines = gpu.pipelines();
    assert_eq!(pipelines.len(), 1);
    let h = pipelines[0];
    (gpu, h)
}

fn dumb(gpu: &mut Gpu<MockDevice>, size: Size) -> Buffer {
    gpu.create_dumb_buffer(size, Fourcc::XRGB8888).unwrap()
}

#[test]
fn strategy_detection() {
    let device = MockDevice::new(0);
    let gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
    assert_eq!(gpu.strategy(), Strategy::Legacy, "no planes");
    drop(gpu);

    device.add_plane(PlaneType::Primary, 0);
    let gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
    assert_eq!(gpu.strategy(), Strategy::Atomic);
    drop(gpu);

    let gpu = Gpu::new(device.clone(), GpuConfig::legacy()).unwrap();
    assert_eq!(gpu.strategy(), Strategy::Legacy, "forced");
    drop(gpu);

    device.set_atomic_supported(false);
    let gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
    assert_eq!(gpu.strategy(), Strategy::Legacy, "no atomic cap");
}

#[test]
fn crtc_without_primary_plane_falls_back_to_legacy() {
    let device = MockDevice::new(1);
    device.remove_plane(device.plane_ids()[0]);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    assert_eq!(gpu.strategy(), Strategy::Legacy);

    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert!(device.legacy_calls().contains(&LegacyCall::PageFlip));
    assert!(device.commits().is_empty());
}

#[test]
fn atomic_pipeline_lifecycle() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    assert_eq!(gpu.strategy(), Strategy::Atomic);
    let crtc = device.crtc_ids()[0];

    assert_eq!(gpu.pipeline(h).source_size(), FHD);
    assert!(!gpu.pipeline(h).is_active());
    gpu.pipeline_mut(h).test(PipelineChange::new()).unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0), "testing applies nothing");

    let cursor = dumb(&mut gpu, Size::new(64, 64));
    gpu.pipeline_mut(h)
        .set_cursor(Some(cursor.clone()), Point::ORIGIN)
        .unwrap();
    assert_eq!(
        device.cursor(crtc).map(|c| c.handle),
        Some(cursor.handle())
    );
    gpu.pipeline_mut(h).move_cursor(Point::new(100, 100)).unwrap();
    assert_eq!(
        device.cursor_rect(crtc),
        Some(Rect::new(Point::new(100, 100), Size::new(64, 64)))
    );

    gpu.pipeline_mut(h).set_active(false).unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0));
    assert_eq!(device.cursor(crtc), None, "cursor goes down with the CRTC");

    gpu.pipeline_mut(h).set_active(true).unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0), "turning on waits for content");

    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(1));
    assert!(gpu.pipeline(h).is_active());
    assert!(gpu.pipeline(h).is_flip_pending());
    assert!(device.cursor(crtc).is_some(), "cursor is restored");
    assert_eq!(
        device.prop(device.plane_ids()[0], "FB_ID"),
        Some(buffer.framebuffer().value())
    );

    drop(buffer);
    drop(cursor);
    drop(gpu);
    assert_eq!(device.framebuffer_count(), 0);
    assert_eq!(device.dumb_buffer_count(), 0);
    assert_eq!(device.blob_count(), 0);
}

#[test]
fn switching_on_waits_for_a_present_even_when_applied() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    let crtc = device.crtc_ids()[0];
    let first = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&first).unwrap();
    gpu.dispatch_events().unwrap();

    gpu.pipeline_mut(h).set_active(false).unwrap();
    gpu.pipeline_mut(h).set_active(true).unwrap();
    gpu.pipeline_mut(h).set_overscan(10).unwrap();
    gpu.apply_pending().unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0));
    assert!(!gpu.pipeline(h).is_active());
    assert_eq!(device.prop(conn, "overscan"), Some(0));

    gpu.try_apply(&Transaction::single(h, PipelineChange::new().with_overscan(15)))
        .unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0), "no buffer in the transaction");
    assert_eq!(
        gpu.pipeline(h)
            .connector()
            .properties()
            .pending(ConnectorProperty::Overscan),
        Some(15),
        "still staged"
    );
    gpu.apply_pending().unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0));

    let second = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&second).unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(1));
    assert_eq!(device.prop(conn, "overscan"), Some(15));
    assert!(gpu.pipeline(h).is_active());
}

#[test]
fn cursor_goes_down_before_the_crtc() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    let crtc = device.crtc_ids()[0];
    let buffer = dumb(&mut gpu, FHD);
    let cursor = dumb(&mut gpu, Size::new(64, 64));
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    gpu.dispatch_events().unwrap();
    gpu.pipeline_mut(h)
        .set_cursor(Some(cursor), Point::new(10, 10))
        .unwrap();

    device.clear_log();
    gpu.pipeline_mut(h).set_active(false).unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0));
    let calls = device.legacy_calls();
    let hide = calls
        .iter()
        .position(|c| *c == LegacyCall::SetCursor)
        .expect("cursor hidden");
    let off = device
        .commits()
        .into_iter()
        .find(|c| !c.is_test())
        .expect("real commit");
    assert!(hide < off.legacy_calls_before, "{calls:?}");
}

#[test]
fn legacy_cursor_goes_down_before_dpms() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::legacy());
    let crtc = device.crtc_ids()[0];
    let buffer = dumb(&mut gpu, FHD);
    let cursor = dumb(&mut gpu, Size::new(64, 64));
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    gpu.dispatch_events().unwrap();
    gpu.pipeline_mut(h)
        .set_cursor(Some(cursor), Point::new(10, 10))
        .unwrap();
    assert!(device.cursor(crtc).is_some());

    device.clear_log();
    gpu.pipeline_mut(h).set_active(false).unwrap();
    assert_eq!(device.prop(conn, "DPMS"), Some(3));
    assert_eq!(device.cursor(crtc), None);
    let calls = device.legacy_calls();
    let hide = calls
        .iter()
        .position(|c| matches!(c, LegacyCall::SetCursor | LegacyCall::SetCursor2));
    let dpms = calls.iter().position(|c| *c == LegacyCall::SetProperty);
    assert!(hide.is_some() && hide < dpms, "{calls:?}");
}

#[test]
fn legacy_pipeline_power_and_present() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::legacy());

    gpu.pipeline_mut(h).set_active(false).unwrap();
    assert_eq!(device.prop(conn, "DPMS"), Some(3));
    assert!(!gpu.pipeline(h).is_active());
    gpu.pipeline_mut(h).set_active(true).unwrap();
    assert_eq!(device.prop(conn, "DPMS"), Some(0));
    assert!(gpu.pipeline(h).is_active());

    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(
        device.prop(device.plane_ids()[0], "FB_ID"),
        Some(buffer.framebuffer().value())
    );
    let calls = device.legacy_calls();
    let set_crtc = calls.iter().position(|c| *c == LegacyCall::SetCrtc);
    let flip = calls.iter().position(|c| *c == LegacyCall::PageFlip);
    assert!(set_crtc.is_some() && set_crtc < flip, "{calls:?}");
}

#[test]
fn output_detection() {
    for config in [GpuConfig::new(), GpuConfig::legacy()] {
        let device = MockDevice::with_gamma_size(1, 1024);
        device.add_connector(&[mode(1920, 1080, 60)]);
        let (mut gpu, h) = single_output(&device, config);
        assert_eq!(gpu.pipeline(h).gamma_ramp_size(), 1024);
        assert_eq!(
            events(&mut gpu),
            [OutputEvent::Added {
                output: OutputId(1),
                pipeline: h,
            }]
        );
    }
}

#[test]
fn headsets_get_no_output() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(2880, 1600, 90)]);
    device.set_property_value(conn, "non-desktop", 1);
    let gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
    assert!(gpu.pipelines().is_empty());
}

#[test]
fn hotplug_adds_and_removes_outputs() {
    let device = MockDevice::new(2);
    let first = device.add_connector(&[mode(1920, 1080, 60)]);
    let mut gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
    events(&mut gpu);

    let second = device.add_connector(&[mode(1280, 720, 60)]);
    gpu.update_outputs().unwrap();
    assert_eq!(gpu.pipelines().len(), 2);
    assert!(matches!(
        events(&mut gpu)[..],
        [OutputEvent::Added {
            output: OutputId(2),
            ..
        }]
    ));

    device.add_mode(second, mode(1024, 768, 60));
    gpu.update_outputs().unwrap();
    assert_eq!(
        events(&mut gpu),
        [OutputEvent::ModesChanged {
            output: OutputId(2)
        }]
    );

    device.set_connected(first, false);
    gpu.update_outputs().unwrap();
    assert_eq!(gpu.pipelines().len(), 1);
    assert_eq!(
        events(&mut gpu),
        [OutputEvent::Removed {
            output: OutputId(1)
        }]
    );
    assert_eq!(gpu.pipeline_for_output(OutputId(1)), None);

    device.remove_connector(second);
    device.set_connected(first, true);
    gpu.update_outputs().unwrap();
    let got = events(&mut gpu);
    assert!(got.contains(&OutputEvent::Removed {
        output: OutputId(2)
    }));
    assert!(
        got.iter()
            .any(|e| matches!(e, OutputEvent::Added { output: OutputId(3), .. }))
    );
}

#[test]
fn overscan_is_validated_and_idempotent() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());

    assert_eq!(
        gpu.pipeline_mut(h).set_overscan(150),
        Err(CommitError::Capability(CapabilityError::OverscanOutOfRange(150)))
    );
    assert!(device.commits().is_empty(), "rejected before the kernel");

    gpu.pipeline_mut(h).set_overscan(50).unwrap();
    let tested = device.commits().len();
    assert_eq!(tested, 1);
    gpu.pipeline_mut(h).set_overscan(50).unwrap();
    assert_eq!(device.commits().len(), tested, "nothing new to test");
    assert_eq!(device.prop(conn, "overscan"), Some(0), "only staged");

    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(device.prop(conn, "overscan"), Some(50));
}

#[test]
fn underscan_stands_in_for_overscan() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60)]);
    device.remove_property(conn, "overscan");
    device.add_enum_property(conn, "underscan", 0, &["off", "on", "auto"]);
    device.add_property(conn, "underscan hborder", 0);
    device.add_property(conn, "underscan vborder", 0);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());

    gpu.pipeline_mut(h).set_overscan(27).unwrap();
    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(device.prop(conn, "underscan"), Some(1));
    assert_eq!(device.prop(conn, "underscan vborder"), Some(27));
    assert_eq!(device.prop(conn, "underscan hborder"), Some(27 * 1920 / 1080));
}

#[test]
fn page_flips_complete_through_dispatch() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    events(&mut gpu);

    let first = dumb(&mut gpu, FHD);
    let second = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&first).unwrap();
    assert_eq!(
        gpu.pipeline_mut(h).present(&second),
        Err(CommitError::FlipPending)
    );
    assert!(events(&mut gpu).is_empty(), "a pending flip is not a failure");

    assert_eq!(gpu.dispatch_events().unwrap(), 1);
    assert!(!gpu.pipeline(h).is_flip_pending());
    assert!(matches!(
        events(&mut gpu)[..],
        [OutputEvent::PageFlipped {
            output: OutputId(1),
            ..
        }]
    ));
    assert_eq!(gpu.pipeline(h).current_buffer(), Some(&first));

    gpu.pipeline_mut(h).present(&second).unwrap();
    gpu.dispatch_events().unwrap();
    drop(first);
    assert_eq!(gpu.release_buffers(), 1, "off screen after the second flip");
    assert_eq!(device.framebuffer_count(), 1);
}

#[test]
fn aborted_flip_reports_a_failed_present() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    events(&mut gpu);

    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    device.queue_flip_abort(device.crtc_ids()[0]);
    gpu.dispatch_events().unwrap();
    assert!(!gpu.pipeline(h).is_flip_pending());
    assert_eq!(
        events(&mut gpu),
        [OutputEvent::PresentFailed {
            output: OutputId(1)
        }]
    );
    gpu.pipeline_mut(h).present(&buffer).unwrap();
}

#[test]
fn presenting_the_same_buffer_flips_again() {
    for config in [GpuConfig::new(), GpuConfig::legacy()] {
        let device = MockDevice::new(1);
        device.add_connector(&[mode(1920, 1080, 60)]);
        let (mut gpu, h) = single_output(&device, config);
        events(&mut gpu);

        let buffer = dumb(&mut gpu, FHD);
        gpu.pipeline_mut(h).present(&buffer).unwrap();
        gpu.dispatch_events().unwrap();
        events(&mut gpu);

        gpu.pipeline_mut(h).present(&buffer).unwrap();
        assert!(gpu.pipeline(h).is_flip_pending());
        assert_eq!(gpu.dispatch_events().unwrap(), 1);
        assert!(matches!(
            events(&mut gpu)[..],
            [OutputEvent::PageFlipped {
                output: OutputId(1),
                ..
            }]
        ));
        assert_eq!(gpu.pipeline(h).current_buffer(), Some(&buffer));
    }
}

#[test]
fn failed_atomic_commit_changes_nothing() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    events(&mut gpu);
    let crtc = device.crtc_ids()[0];

    let buffer = dumb(&mut gpu, FHD);
    device.fail_next_commit(DeviceError::InvalidArgument);
    assert_eq!(
        gpu.pipeline_mut(h).present(&buffer),
        Err(CommitError::Commit(DeviceError::InvalidArgument))
    );
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(0));
    assert!(!gpu.pipeline(h).is_active());
    assert_eq!(gpu.pipeline(h).current_buffer(), None);
    assert!(events(&mut gpu).is_empty(), "never presented before");

    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(device.prop(crtc, "ACTIVE"), Some(1));
}

#[test]
fn rejected_test_reports_validation_error() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());

    device.fail_next_test(DeviceError::InvalidArgument);
    assert_eq!(
        gpu.pipeline_mut(h).set_rgb_range(RgbRange::Full),
        Err(CommitError::Validation(DeviceError::InvalidArgument))
    );
    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(
        device.prop(device.connector_ids()[0], "Broadcast RGB"),
        Some(0),
        "the rejected range was rolled back"
    );
}

#[test]
fn transaction_commits_all_pipelines_at_once() {
    let device = MockDevice::new(2);
    device.add_connector(&[mode(1920, 1080, 60)]);
    device.add_connector(&[mode(1280, 720, 60)]);
    let mut gpu = Gpu::new(device.clone(), GpuConfig::new()).unwrap();
    let handles = gpu.pipelines();
    let a = dumb(&mut gpu, FHD);
    let b = dumb(&mut gpu, Size::new(1280, 720));

    let mut tx = Transaction::new();
    tx.insert(handles[0], PipelineChange::new().with_buffer(a.clone()));
    tx.insert(handles[1], PipelineChange::new().with_buffer(b.clone()));
    gpu.try_apply(&tx).unwrap();
    let commits = device.commits();
    assert_eq!(commits.len(), 2, "one test, one commit");
    assert!(commits[0].is_test() && !commits[1].is_test());
    for crtc in device.crtc_ids() {
        assert_eq!(device.prop(crtc, "ACTIVE"), Some(1));
    }
    assert_eq!(gpu.dispatch_events().unwrap(), 2);

    let planes = device.plane_ids();
    let a2 = dumb(&mut gpu, FHD);
    let b2 = dumb(&mut gpu, Size::new(1280, 720));
    let mut tx = Transaction::new();
    tx.insert(handles[0], PipelineChange::new().with_buffer(a2));
    tx.insert(handles[1], PipelineChange::new().with_buffer(b2));
    device.fail_next_test(DeviceError::InvalidArgument);
    assert_eq!(
        gpu.try_apply(&tx),
        Err(CommitError::Validation(DeviceError::InvalidArgument))
    );
    assert_eq!(device.prop(planes[0], "FB_ID"), Some(a.framebuffer().value()));
    assert_eq!(device.prop(planes[1], "FB_ID"), Some(b.framebuffer().value()));
    assert!(!gpu.pipeline(handles[0]).is_flip_pending());
}

#[test]
fn legacy_failure_keeps_earlier_steps() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::legacy());
    let crtc = device.crtc_ids()[0];

    let buffer = dumb(&mut gpu, FHD);
    device.fail_legacy(LegacyCall::PageFlip, DeviceError::Busy);
    assert_eq!(
        gpu.pipeline_mut(h).present(&buffer),
        Err(CommitError::Legacy {
            step: LegacyStep::PageFlip,
            error: DeviceError::Busy,
        })
    );
    assert!(device.crtc_mode(crtc).is_some(), "the mode set stays");
    assert_eq!(gpu.pipeline(h).current_buffer(), None);

    device.clear_log();
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert!(!device.legacy_calls().contains(&LegacyCall::SetCrtc));
    assert!(gpu.pipeline(h).is_flip_pending());
}

#[test]
fn legacy_property_failure_keeps_the_mode() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60), mode(1280, 720, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::legacy());
    let crtc = device.crtc_ids()[0];
    let hd = Size::new(1280, 720);

    let first = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&first).unwrap();
    gpu.dispatch_events().unwrap();

    let small = dumb(&mut gpu, hd);
    device.fail_legacy(LegacyCall::SetProperty, DeviceError::InvalidArgument);
    let tx = Transaction::single(
        h,
        PipelineChange::new()
            .with_mode(1)
            .with_overscan(20)
            .with_buffer(small.clone()),
    );
    assert_eq!(
        gpu.try_apply(&tx),
        Err(CommitError::Legacy {
            step: LegacyStep::Property,
            error: DeviceError::InvalidArgument,
        })
    );
    assert_eq!(device.crtc_mode(crtc).map(|m| m.size), Some(hd));
    assert_eq!(gpu.pipeline(h).source_size(), hd, "the mode set stays");
    assert_eq!(device.prop(conn, "overscan"), Some(0));
    assert_eq!(
        gpu.pipeline(h)
            .connector()
            .properties()
            .pending(ConnectorProperty::Overscan),
        Some(0),
        "the failed write is rolled back"
    );

    device.clear_log();
    gpu.pipeline_mut(h).present(&small).unwrap();
    let calls = device.legacy_calls();
    assert!(!calls.contains(&LegacyCall::SetCrtc), "{calls:?}");
    assert!(calls.contains(&LegacyCall::PageFlip));
}

#[test]
fn gamma_ramps() {
    for config in [GpuConfig::new(), GpuConfig::legacy()] {
        let device = MockDevice::new(1);
        device.add_connector(&[mode(1920, 1080, 60)]);
        let (mut gpu, h) = single_output(&device, config);
        let crtc = device.crtc_ids()[0];

        assert_eq!(
            gpu.pipeline_mut(h).set_gamma_ramp(GammaRamp::linear(10)),
            Err(CommitError::Capability(CapabilityError::GammaSizeMismatch {
                expected: 256,
                actual: 10,
            }))
        );
        gpu.pipeline_mut(h)
            .set_gamma_ramp(GammaRamp::linear(256))
            .unwrap();
        let buffer = dumb(&mut gpu, FHD);
        gpu.pipeline_mut(h).present(&buffer).unwrap();
        assert_eq!(device.gamma(crtc), Some(GammaRamp::linear(256)));
    }
}

#[test]
fn mode_switch_changes_the_source_size() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60), mode(1280, 720, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    let crtc = device.crtc_ids()[0];

    assert_eq!(
        gpu.pipeline_mut(h).modeset(2),
        Err(CommitError::Capability(CapabilityError::ModeOutOfRange(2)))
    );
    gpu.pipeline_mut(h).modeset(1).unwrap();
    assert_eq!(gpu.pipeline(h).source_size(), Size::new(1280, 720));

    let wrong = dumb(&mut gpu, FHD);
    assert_eq!(
        gpu.pipeline_mut(h).present(&wrong),
        Err(CommitError::Capability(CapabilityError::BufferMismatch))
    );
    let right = dumb(&mut gpu, Size::new(1280, 720));
    gpu.pipeline_mut(h).present(&right).unwrap();
    assert_eq!(
        device.crtc_mode(crtc).map(|m| m.size),
        Some(Size::new(1280, 720))
    );
}

#[test]
fn rotation_transposes_the_source_size() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());

    gpu.pipeline_mut(h)
        .set_transformation(PlaneTransformation::ROTATE_90)
        .unwrap();
    assert_eq!(gpu.pipeline(h).source_size(), Size::new(1080, 1920));
    let buffer = dumb(&mut gpu, Size::new(1080, 1920));
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(
        device.prop(device.plane_ids()[0], "rotation"),
        Some(PlaneTransformation::ROTATE_90.value())
    );

    drop(gpu);

    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    device.restrict_enum(device.plane_ids()[0], "rotation", &["rotate-0"]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    assert_eq!(
        gpu.pipeline_mut(h)
            .set_transformation(PlaneTransformation::ROTATE_90),
        Err(CommitError::Capability(CapabilityError::UnsupportedTransformation))
    );
    drop(gpu);

    let (mut gpu, h) = single_output(&device, GpuConfig::legacy());
    assert_eq!(
        gpu.pipeline_mut(h)
            .set_transformation(PlaneTransformation::ROTATE_180),
        Err(CommitError::Capability(CapabilityError::LegacyUnsupported))
    );
}

#[test]
fn adaptive_sync_needs_a_capable_sink() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    assert_eq!(
        gpu.pipeline_mut(h).set_sync_mode(SyncMode::Adaptive),
        Err(CommitError::Capability(CapabilityError::NoVrr))
    );
    gpu.pipeline_mut(h).set_sync_mode(SyncMode::Fixed).unwrap();
    drop(gpu);

    device.set_property_value(conn, "vrr_capable", 1);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    gpu.pipeline_mut(h).set_sync_mode(SyncMode::Adaptive).unwrap();
    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    assert_eq!(device.prop(device.crtc_ids()[0], "VRR_ENABLED"), Some(1));
}

#[test]
fn cursor_checks_and_fallback() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    device.set_cursor2_supported(false);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    let crtc = device.crtc_ids()[0];

    let big = dumb(&mut gpu, Size::new(128, 128));
    assert_eq!(
        gpu.pipeline_mut(h).set_cursor(Some(big), Point::ORIGIN),
        Err(CommitError::Capability(CapabilityError::CursorTooLarge))
    );

    let cursor = dumb(&mut gpu, Size::new(32, 32));
    gpu.pipeline_mut(h)
        .set_cursor(Some(cursor.clone()), Point::new(4, 4))
        .unwrap();
    assert_eq!(device.cursor(crtc).map(|c| c.size), Some(Size::new(32, 32)));
    let calls = device.legacy_calls();
    assert!(calls.contains(&LegacyCall::SetCursor2));
    assert!(calls.contains(&LegacyCall::SetCursor));

    gpu.pipeline_mut(h).move_cursor(Point::new(5000, 5000)).unwrap();
    assert!(!gpu.pipeline(h).cursor().is_visible(FHD));
    assert_eq!(device.cursor(crtc), None, "off-screen cursor is hidden");

    device.fail_legacy(LegacyCall::MoveCursor, DeviceError::Busy);
    assert_eq!(
        gpu.pipeline_mut(h).move_cursor(Point::new(10, 10)),
        Err(CommitError::Legacy {
            step: LegacyStep::Cursor,
            error: DeviceError::Busy,
        })
    );
    assert!(gpu.pipeline(h).cursor().is_dirty(), "retried on the next commit");
}

struct Outcomes(Rc<RefCell<Vec<CommitOutcome>>>);

impl TraceSink for Outcomes {
    fn on_commit(&mut self, e: &CommitEvent) {
        self.0.borrow_mut().push(e.outcome);
    }
}

#[test]
fn trace_sink_sees_every_request() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    let seen = Rc::new(RefCell::new(Vec::new()));
    gpu.set_trace_sink(Box::new(Outcomes(seen.clone())));

    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    device.fail_next_test(DeviceError::InvalidArgument);
    gpu.pipeline_mut(h).set_overscan(10).unwrap_err();
    assert_eq!(
        *seen.borrow(),
        [
            CommitOutcome::TestPassed,
            CommitOutcome::Committed,
            CommitOutcome::TestFailed,
        ]
    );
    assert!(gpu.take_trace_sink().is_some());
}

#[test]
fn staged_changes_apply_without_a_present() {
    let device = MockDevice::new(1);
    let conn = device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    let buffer = dumb(&mut gpu, FHD);
    gpu.pipeline_mut(h).present(&buffer).unwrap();
    gpu.dispatch_events().unwrap();

    gpu.pipeline_mut(h).set_rgb_range(RgbRange::Limited).unwrap();
    assert_eq!(device.prop(conn, "Broadcast RGB"), Some(0));
    gpu.apply_pending().unwrap();
    assert_eq!(device.prop(conn, "Broadcast RGB"), Some(2));

    let before = device.commits().len();
    gpu.apply_pending().unwrap();
    assert_eq!(device.commits().len(), before, "nothing left to apply");
}

#[test]
fn debug_info_lists_properties() {
    let device = MockDevice::new(1);
    device.add_connector(&[mode(1920, 1080, 60)]);
    let (mut gpu, h) = single_output(&device, GpuConfig::new());
    gpu.pipeline_mut(h).set_overscan(20).unwrap();
    let lines = gpu.pipeline(h).debug_lines();
    assert_eq!(lines[0], "Flags: none");
    assert!(lines.iter().any(|l| l == "\toverscan: 0->20"), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with("Primary plane")));
}
