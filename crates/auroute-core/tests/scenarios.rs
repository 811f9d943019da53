// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end scenario tests (S1-S6) and the boundary behaviors
//! (B1-B4) from spec.md §8, exercised against the mock backend/worker
//! rather than PipeWire. Translated into idiomatic `#[test]`s per
//! scenario rather than transliterated from the original's C unit
//! test harness (`cras/src/tests/iodev_list_unittest.cc`).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use auroute_core::backend::{BackendFailure, RampRequest};
use auroute_core::testing::{MockBackend, MockDevicePlan, MockWorker};
use auroute_core::{
    ClientType, Device, DeviceBackend, Direction, Engine, EngineObserver, Format, Node, NodeType,
    RealtimeWorker, RouterTiming, Stream, StreamEffects, StreamType,
};

/// Delegates `DeviceBackend` to a shared `MockBackend` so tests retain
/// a handle for post-hoc assertions after `Engine` takes ownership of
/// its `Box<dyn DeviceBackend>`.
struct SharedBackend(Rc<RefCell<MockBackend>>);

impl DeviceBackend for SharedBackend {
    fn open(&mut self, dev_idx: u32, cb_threshold: u32, format: Format) -> Result<(), BackendFailure> {
        self.0.borrow_mut().open(dev_idx, cb_threshold, format)
    }
    fn close(&mut self, dev_idx: u32) {
        self.0.borrow_mut().close(dev_idx)
    }
    fn set_volume(&mut self, dev_idx: u32, volume: u32) {
        self.0.borrow_mut().set_volume(dev_idx, volume)
    }
    fn set_mute(&mut self, dev_idx: u32, muted: bool) {
        self.0.borrow_mut().set_mute(dev_idx, muted)
    }
    fn update_active_node(&mut self, dev_idx: u32, node_idx: u32, enabled: bool) {
        self.0.borrow_mut().update_active_node(dev_idx, node_idx, enabled)
    }
    fn set_swap_mode_for_node(&mut self, dev_idx: u32, node_idx: u32, enable: bool) -> Result<(), BackendFailure> {
        self.0.borrow_mut().set_swap_mode_for_node(dev_idx, node_idx, enable)
    }
    fn set_display_rotation_for_node(&mut self, dev_idx: u32, node_idx: u32, rotation: u32) -> Result<(), BackendFailure> {
        self.0.borrow_mut().set_display_rotation_for_node(dev_idx, node_idx, rotation)
    }
    fn get_hotword_models(&self, dev_idx: u32, node_idx: u32) -> String {
        self.0.borrow().get_hotword_models(dev_idx, node_idx)
    }
    fn set_hotword_model(&mut self, dev_idx: u32, node_idx: u32, name: &str) -> Result<(), BackendFailure> {
        self.0.borrow_mut().set_hotword_model(dev_idx, node_idx, name)
    }
    fn should_attach_stream(&self, dev_idx: u32, stream: &Stream) -> bool {
        self.0.borrow().should_attach_stream(dev_idx, stream)
    }
    fn get_dev_group(&self, dev_idx: u32) -> Vec<u32> {
        self.0.borrow().get_dev_group(dev_idx)
    }
    fn is_dsp_aec_use_case(&self, dev_idx: u32, node_idx: u32) -> bool {
        self.0.borrow().is_dsp_aec_use_case(dev_idx, node_idx)
    }
    fn supports_noise_cancellation(&self, dev_idx: u32, node_idx: u32) -> bool {
        self.0.borrow().supports_noise_cancellation(dev_idx, node_idx)
    }
}

struct SharedWorker(Rc<RefCell<MockWorker>>);

impl RealtimeWorker for SharedWorker {
    fn add_open_dev(&mut self, dev_idx: u32) -> Result<(), BackendFailure> {
        self.0.borrow_mut().add_open_dev(dev_idx)
    }
    fn rm_open_dev(&mut self, dev_idx: u32) {
        self.0.borrow_mut().rm_open_dev(dev_idx)
    }
    fn add_stream(&mut self, stream_id: u64, dev_idxs: &[u32]) -> Result<usize, BackendFailure> {
        self.0.borrow_mut().add_stream(stream_id, dev_idxs)
    }
    fn disconnect_stream(&mut self, stream_id: u64, dev_idx: Option<u32>) {
        self.0.borrow_mut().disconnect_stream(stream_id, dev_idx)
    }
    fn drain_stream(&mut self, stream_id: u64) -> u64 {
        self.0.borrow_mut().drain_stream(stream_id)
    }
    fn is_dev_open(&self, dev_idx: u32) -> bool {
        self.0.borrow().is_dev_open(dev_idx)
    }
    fn dev_start_ramp(&mut self, dev_idx: u32, request: RampRequest) {
        self.0.borrow_mut().dev_start_ramp(dev_idx, request)
    }
}

#[derive(Default)]
struct RecordedEvents {
    active_node_changed: u32,
    nodes_changed: u32,
    suspend_changed: Vec<bool>,
}

struct Recorder(Rc<RefCell<RecordedEvents>>);

impl EngineObserver for Recorder {
    fn active_node_changed(&mut self, _direction: Direction, _node_id: u64) {
        self.0.borrow_mut().active_node_changed += 1;
    }
    fn nodes_changed(&mut self) {
        self.0.borrow_mut().nodes_changed += 1;
    }
    fn suspend_changed(&mut self, suspended: bool) {
        self.0.borrow_mut().suspend_changed.push(suspended);
    }
}

fn test_timing() -> RouterTiming {
    RouterTiming {
        idle_grace: Duration::from_secs(10),
        init_retry_delay: Duration::from_millis(1000),
        drain_min: Duration::from_millis(10),
    }
}

struct Harness {
    engine: Engine,
    backend: Rc<RefCell<MockBackend>>,
    worker: Rc<RefCell<MockWorker>>,
    events: Rc<RefCell<RecordedEvents>>,
}

fn harness() -> Harness {
    let backend = Rc::new(RefCell::new(MockBackend::new()));
    let worker = Rc::new(RefCell::new(MockWorker::new()));
    let events = Rc::new(RefCell::new(RecordedEvents::default()));
    let mut engine = Engine::new(
        Box::new(SharedBackend(backend.clone())),
        Box::new(SharedWorker(worker.clone())),
        test_timing(),
    );
    engine.subscribe(Box::new(Recorder(events.clone())));
    Harness { engine, backend, worker, events }
}

/// A device whose active node is DSP-AEC-capable, so scenarios not
/// concerned with the effect evaluator don't incidentally toggle
/// `dsp_input_effects_blocked` just by enabling a speaker (see
/// `s5_dsp_aec_blocked...` for the case that exercises this on purpose).
fn output_device(max_channels: u32) -> Device {
    let mut dev = Device::new(0, Direction::Output, max_channels);
    let mut node = Node::new(1, "Speaker", NodeType::Speaker);
    node.dsp_aec_capable = true;
    dev.nodes.push(node);
    dev
}

fn output_stream(id: u64, channels: u32) -> Stream {
    Stream {
        id,
        direction: Direction::Output,
        format: Format { num_channels: channels, frame_rate: 48_000 },
        effects: StreamEffects::default(),
        is_pinned: false,
        pinned_dev_idx: None,
        client_type: ClientType::Test,
        stream_type: StreamType::Default,
        is_hotword: false,
        is_server_only: false,
        cb_threshold: 480,
        start_ts: Instant::now(),
    }
}

#[test]
fn s1_select_then_attach() {
    let mut h = harness();
    let d1 = h.engine.add_output_device(output_device(6)).unwrap();

    h.engine.select_node(Direction::Output, d1, 1);
    assert_eq!(h.events.borrow().active_node_changed, 1);
    assert_eq!(h.events.borrow().nodes_changed, 1);

    let s1 = h.engine.add_stream(output_stream(1, 2)).unwrap();

    assert_eq!(h.backend.borrow().open_calls, vec![d1]);
    assert!(h.worker.borrow().open_devs.contains(&d1));
    assert_eq!(h.worker.borrow().streams.get(&s1).cloned(), Some(vec![d1]));

    let snap = h.engine.snapshot();
    let dev = snap.devices.iter().find(|d| d.idx == d1).unwrap();
    assert!(dev.is_enabled);
    assert!(dev.is_open);
    assert_eq!(dev.active_node_idx, Some(1));

    // No further active-node/nodes_changed events from the plain attach.
    assert_eq!(h.events.borrow().active_node_changed, 1);
    assert_eq!(h.events.borrow().nodes_changed, 1);
}

#[test]
fn s2_reopen_for_higher_channel_count() {
    let mut h = harness();
    let d1 = h.engine.add_output_device(output_device(6)).unwrap();
    h.engine.select_node(Direction::Output, d1, 1);
    let s1 = h.engine.add_stream(output_stream(1, 2)).unwrap();
    assert_eq!(h.backend.borrow().last_open_format.get(&d1).unwrap().num_channels, 2);

    let s2 = h.engine.add_stream(output_stream(2, 6)).unwrap();

    // Device closed and reopened (two opens total) at the higher width.
    assert_eq!(h.backend.borrow().open_calls.iter().filter(|&&d| d == d1).count(), 2);
    assert_eq!(h.backend.borrow().last_open_format.get(&d1).unwrap().num_channels, 6);

    assert_eq!(h.worker.borrow().streams.get(&s2).cloned(), Some(vec![d1]));
    assert_eq!(h.worker.borrow().streams.get(&s1).cloned(), Some(vec![d1]));

    let snap = h.engine.snapshot();
    let dev = snap.devices.iter().find(|d| d.idx == d1).unwrap();
    assert!(dev.is_open);
}

#[test]
fn s3_init_failure_with_fallback_then_retry_succeeds() {
    let mut h = harness();
    let d2 = h.engine.add_output_device(output_device(2)).unwrap();
    h.backend.borrow_mut().plan(d2, MockDevicePlan { fail_opens_remaining: 1, ..Default::default() });

    h.engine.select_node(Direction::Output, d2, 1);
    let s = h.engine.add_stream(output_stream(1, 2)).unwrap();

    // Fallback absorbed the stream since d2's init failed.
    let snap = h.engine.snapshot();
    let fallback = snap.devices.iter().find(|d| d.direction == Direction::Output && d.idx != d2).unwrap();
    assert!(fallback.is_enabled);
    assert_eq!(h.worker.borrow().streams.get(&s).cloned(), Some(vec![fallback.idx]));

    // Retry fires ~1000ms later; pretend time has passed.
    let later = Instant::now() + Duration::from_millis(1100);
    h.engine.tick(later);

    assert!(h.backend.borrow().open_calls.iter().filter(|&&d| d == d2).count() >= 2);
    let snap = h.engine.snapshot();
    let d2_info = snap.devices.iter().find(|d| d.idx == d2).unwrap();
    assert!(d2_info.is_open);
}

#[test]
fn s4_pinned_stream_suspend_resume() {
    let mut h = harness();
    let d1 = h.engine.add_output_device(output_device(2)).unwrap();
    let d2 = h.engine.add_output_device(output_device(2)).unwrap();
    h.engine.select_node(Direction::Output, d1, 1);

    let mut pinned = output_stream(1, 2);
    pinned.is_pinned = true;
    pinned.pinned_dev_idx = Some(d1);
    h.engine.add_stream(pinned).unwrap();
    assert!(h.worker.borrow().open_devs.contains(&d1));

    h.engine.suspend();
    assert!(!h.worker.borrow().open_devs.contains(&d1));
    assert_eq!(h.events.borrow().suspend_changed, vec![true]);

    h.engine.resume();
    assert_eq!(h.events.borrow().suspend_changed, vec![true, false]);
    assert!(h.worker.borrow().open_devs.contains(&d1));
    assert!(!h.worker.borrow().open_devs.contains(&d2));
}

#[test]
fn s5_dsp_aec_blocked_by_non_dsp_aec_capable_active_output() {
    let mut h = harness();
    let mut speaker = output_device(2);
    speaker.nodes[0].dsp_aec_capable = true;
    let spk = h.engine.add_output_device(speaker).unwrap();
    h.engine.select_node(Direction::Output, spk, 1);
    assert!(!h.engine.snapshot().dsp_input_effects_blocked);

    let before = h.events.borrow().nodes_changed;

    let mut usb = output_device(2);
    usb.nodes[0].node_type = NodeType::Usb;
    usb.nodes[0].dsp_aec_capable = false;
    let usb_idx = h.engine.add_output_device(usb).unwrap();
    h.engine.select_node(Direction::Output, usb_idx, 1);

    assert!(h.engine.snapshot().dsp_input_effects_blocked);
    assert_eq!(h.events.borrow().nodes_changed, before + 2); // active_node_changed's paired nodes_changed + the flag flip
}

#[test]
fn s6_drain_ordering() {
    let mut h = harness();
    let d1 = h.engine.add_output_device(output_device(2)).unwrap();
    h.engine.select_node(Direction::Output, d1, 1);
    let s = h.engine.add_stream(output_stream(1, 2)).unwrap();
    h.worker.borrow_mut().schedule_drain(s, vec![30, 0]);

    h.engine.remove_stream(s).unwrap();
    // Still draining after the first pass.
    assert!(h.engine.snapshot().devices.iter().any(|d| d.idx == d1));

    let later = Instant::now() + Duration::from_millis(40);
    h.engine.tick(later);

    assert!(h.worker.borrow().streams.get(&s).map(|v| v.is_empty()).unwrap_or(true));
}

#[test]
fn b1_volume_out_of_range_rejected_without_event() {
    let mut h = harness();
    let d1 = h.engine.add_output_device(output_device(2)).unwrap();
    let before = h.events.borrow().nodes_changed;
    let err = h.engine.set_node_attr_volume(d1, 1, 101).unwrap_err();
    assert_eq!(err, auroute_core::EngineError::InvalidArg);
    assert_eq!(h.events.borrow().nodes_changed, before);
}

#[test]
fn b3_remove_busy_device_rejected() {
    let mut h = harness();
    let d1 = h.engine.add_output_device(output_device(2)).unwrap();
    h.engine.select_node(Direction::Output, d1, 1);
    h.engine.add_stream(output_stream(1, 2)).unwrap();

    let err = h.engine.remove_device(d1).unwrap_err();
    assert_eq!(err, auroute_core::EngineError::Busy);
    assert!(h.engine.snapshot().devices.iter().any(|d| d.idx == d1));
}

#[test]
fn b4_retry_cancelled_by_removal() {
    let mut h = harness();
    let d1 = h.engine.add_output_device(output_device(2)).unwrap();
    h.backend.borrow_mut().plan(d1, MockDevicePlan { fail_opens_remaining: 100, ..Default::default() });
    h.engine.select_node(Direction::Output, d1, 1);
    h.engine.add_stream(output_stream(1, 2)).unwrap();

    // Fallback now holds the stream; d1 is closed so removal succeeds.
    h.engine.remove_device(d1).unwrap();

    let opens_before = h.backend.borrow().open_calls.len();
    let later = Instant::now() + Duration::from_millis(1500);
    h.engine.tick(later);
    assert_eq!(h.backend.borrow().open_calls.len(), opens_before);
}
