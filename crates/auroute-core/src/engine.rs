// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `Engine`: the facade tying the registry, stream list, router,
//! effect evaluator, snapshot publisher, and observer registry
//! together, and exposing the client-control surface (§6).

use crate::backend::{DeviceBackend, RealtimeWorker, RouterTiming};
use crate::effects::EffectEvaluator;
use crate::errors::{EngineError, RouterError};
use crate::observer::{EngineObserver, ObserverRegistry};
use crate::registry::DeviceRegistry;
use crate::router::{Router, RouterCtx};
use crate::snapshot::SnapshotPublisher;
use crate::stream_list::{StreamList, StreamListCallbacks};
use crate::timer::{TimerService, TimerWheel};
use crate::types::{Device, Direction, FloopParams, Node, Stream, HOTWORD_EMPTY_IDX, NUM_FLOOP_PAIRS_MAX};
use auroute_ipc::Snapshot;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Wraps a `Router` and a `RouterCtx` built from disjoint borrows of
/// `Engine`'s own fields so `self.streams.add(stream, &mut adapter)`
/// type-checks without `Engine` borrowing itself twice.
struct StreamCallbackAdapter<'a> {
    router: &'a mut Router,
    ctx: RouterCtx<'a>,
}

impl StreamListCallbacks for StreamCallbackAdapter<'_> {
    fn on_stream_added(&mut self, stream: &Stream) -> Result<(), RouterError> {
        self.router.on_stream_added(&mut self.ctx, stream)
    }

    fn on_stream_removed(&mut self, stream: &Stream, remaining_non_pinned: usize) -> u64 {
        self.router.on_stream_removed(&mut self.ctx, stream, remaining_non_pinned)
    }

    fn on_list_changed(&mut self, streams: &[Stream]) {
        self.router.recompute_effects_for_streams(&mut self.ctx, streams);
    }
}

pub struct Engine {
    registry: DeviceRegistry,
    streams: StreamList,
    effects: EffectEvaluator,
    router: Router,
    timers: Box<dyn TimerService>,
    backend: Box<dyn DeviceBackend>,
    worker: Box<dyn RealtimeWorker>,
    observers: ObserverRegistry,
    timing: RouterTiming,
    snapshot: SnapshotPublisher,
    next_stream_id: u64,
    dsp_nc_allowed: bool,
    ap_nc_allowed: bool,
    hotword_pause_at_suspend: bool,
    /// Live flexible-loopback requests, keyed by the params that
    /// identify a duplicate request (§6 `request_floop`).
    floop_requests: Vec<(FloopParams, u32)>,
}

impl Engine {
    /// `init()`: builds the reserved fallback/hotword-empty devices and
    /// resets the monotonic idx counter. Per §9, tests must construct
    /// a fresh `Engine` between cases rather than reuse one.
    pub fn new(backend: Box<dyn DeviceBackend>, worker: Box<dyn RealtimeWorker>, timing: RouterTiming) -> Self {
        Self::with_timers(backend, worker, Box::new(TimerWheel::new()), timing)
    }

    pub fn with_timers(
        backend: Box<dyn DeviceBackend>,
        worker: Box<dyn RealtimeWorker>,
        timers: Box<dyn TimerService>,
        timing: RouterTiming,
    ) -> Self {
        let mut registry = DeviceRegistry::new();

        let mut playback_silent = Device::new(crate::types::PLAYBACK_SILENT_IDX, Direction::Output, 8);
        playback_silent.is_fallback = true;
        playback_silent.is_enabled = true;
        playback_silent.nodes.push(Node::new(0, "(silent)", auroute_ipc::NodeType::FallbackNormal));
        playback_silent.active_node_idx = Some(0);
        registry.insert_reserved(playback_silent);

        let mut capture_silent = Device::new(crate::types::CAPTURE_SILENT_IDX, Direction::Input, 8);
        capture_silent.is_fallback = true;
        capture_silent.is_enabled = true;
        capture_silent.nodes.push(Node::new(0, "(silent)", auroute_ipc::NodeType::FallbackNormal));
        capture_silent.active_node_idx = Some(0);
        registry.insert_reserved(capture_silent);

        let mut hotword_empty = Device::new(HOTWORD_EMPTY_IDX, Direction::Input, 1);
        hotword_empty.is_fallback = false;
        registry.insert_reserved(hotword_empty.clone());
        let _ = &mut hotword_empty;

        let mut router = Router::new();
        router.set_hotword_devices(None, Some(HOTWORD_EMPTY_IDX));

        Engine {
            registry,
            streams: StreamList::new(),
            effects: EffectEvaluator::new(),
            router,
            timers,
            backend,
            worker,
            observers: ObserverRegistry::new(),
            timing,
            snapshot: SnapshotPublisher::new(),
            next_stream_id: RESERVED_MAX_STREAM_ID,
            dsp_nc_allowed: true,
            ap_nc_allowed: true,
            hotword_pause_at_suspend: false,
            floop_requests: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn EngineObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn set_hotword_pause_at_suspend(&mut self, enabled: bool) {
        self.hotword_pause_at_suspend = enabled;
    }

    pub fn set_hotword_real_device(&mut self, dev_idx: Option<u32>) {
        self.router.set_hotword_devices(dev_idx, Some(HOTWORD_EMPTY_IDX));
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.current()
    }

    fn ctx(&mut self) -> RouterCtx<'_> {
        RouterCtx {
            registry: &mut self.registry,
            effects: &mut self.effects,
            backend: self.backend.as_mut(),
            worker: self.worker.as_mut(),
            timers: self.timers.as_mut(),
            observers: &mut self.observers,
            timing: self.timing,
        }
    }

    fn refresh(&mut self) {
        self.snapshot.publish(&self.registry, &self.effects, self.dsp_nc_allowed, self.ap_nc_allowed);
    }

    // ---- Device registry surface ----

    pub fn add_output_device(&mut self, device: Device) -> Result<u32, EngineError> {
        let idx = self.registry.add_output(device)?;
        self.refresh();
        Ok(idx)
    }

    pub fn add_input_device(&mut self, device: Device) -> Result<u32, EngineError> {
        let idx = self.registry.add_input(device)?;
        self.refresh();
        Ok(idx)
    }

    pub fn remove_device(&mut self, idx: u32) -> Result<(), EngineError> {
        self.registry.remove(idx)?;
        self.refresh();
        Ok(())
    }

    pub fn enable_device(&mut self, idx: u32, stream_to_seed: Option<u64>) -> Result<(), EngineError> {
        let stream = stream_to_seed.and_then(|id| self.streams.get(id).cloned());
        let mut ctx = self.ctx();
        self.router.enable_device_group(&mut ctx, idx, stream.as_ref())?;
        drop(ctx);
        self.refresh();
        Ok(())
    }

    pub fn disable_device(&mut self, idx: u32, force: bool) {
        let mut ctx = self.ctx();
        self.router.disable_device(&mut ctx, idx, force);
        drop(ctx);
        self.refresh();
    }

    // ---- Stream lifecycle ----

    pub fn add_stream(&mut self, mut stream: Stream) -> Result<u64, EngineError> {
        stream.id = self.next_stream_id;
        self.next_stream_id += 1;
        let id = stream.id;
        let mut adapter = StreamCallbackAdapter {
            router: &mut self.router,
            ctx: RouterCtx {
                registry: &mut self.registry,
                effects: &mut self.effects,
                backend: self.backend.as_mut(),
                worker: self.worker.as_mut(),
                timers: self.timers.as_mut(),
                observers: &mut self.observers,
                timing: self.timing,
            },
        };
        let result = self.streams.add(stream, &mut adapter).map_err(EngineError::from);
        self.refresh();
        result.map(|_| id)
    }

    /// Removes a stream: queues it for drain and runs the first drain
    /// pass immediately. If drain is still pending, arms a timer for
    /// the next pass (driven by `Engine::tick`).
    pub fn remove_stream(&mut self, id: u64) -> Result<(), EngineError> {
        self.streams.remove(id).map_err(EngineError::from)?;
        self.drive_drain();
        Ok(())
    }

    fn drive_drain(&mut self) {
        let drain_min = self.timing.drain_min;
        let mut adapter = StreamCallbackAdapter {
            router: &mut self.router,
            ctx: RouterCtx {
                registry: &mut self.registry,
                effects: &mut self.effects,
                backend: self.backend.as_mut(),
                worker: self.worker.as_mut(),
                timers: self.timers.as_mut(),
                observers: &mut self.observers,
                timing: self.timing,
            },
        };
        let rearm = self.streams.drive_drain(&mut adapter, drain_min);
        if let Some(delay) = rearm {
            debug!(?delay, "rearming drain timer");
            self.timers.create_timer(delay);
        }
        self.refresh();
    }

    pub fn remove_all_for_client(&mut self, ids: &[u64]) {
        self.streams.remove_all_for_client(ids);
        self.drive_drain();
    }

    // ---- Active-node selection ----

    pub fn select_node(&mut self, direction: Direction, dev_idx: u32, node_idx: u32) {
        let mut ctx = self.ctx();
        self.router.select_node(&mut ctx, direction, dev_idx, node_idx);
        drop(ctx);
        self.refresh();
    }

    pub fn add_active_node(&mut self, direction: Direction, dev_idx: u32, node_idx: u32) {
        let mut ctx = self.ctx();
        self.router.add_active_node(&mut ctx, direction, dev_idx, node_idx);
        drop(ctx);
        self.refresh();
    }

    pub fn rm_active_node(&mut self, direction: Direction, dev_idx: u32) {
        let mut ctx = self.ctx();
        self.router.rm_active_node(&mut ctx, direction, dev_idx);
        drop(ctx);
        self.refresh();
    }

    // ---- Node attribute setter (B1) ----

    pub fn set_node_attr_volume(&mut self, dev_idx: u32, node_idx: u32, volume: u32) -> Result<(), EngineError> {
        if volume > 100 {
            return Err(EngineError::InvalidArg);
        }
        let Some(dev) = self.registry.find_by_idx_mut(dev_idx) else {
            return Err(EngineError::NotFound);
        };
        let Some(node) = dev.node_mut(node_idx) else {
            return Err(EngineError::NotFound);
        };
        node.volume = volume;
        self.backend.set_volume(dev_idx, volume);
        // R2: setting to the current value still emits exactly one event.
        let node_id = crate::observer::node_id(dev_idx, node_idx);
        self.observers.notify(|o| o.output_node_volume_changed(node_id, volume as i32));
        self.refresh();
        Ok(())
    }

    pub fn set_node_attr_plugged(&mut self, dev_idx: u32, node_idx: u32, plugged: bool) -> Result<(), EngineError> {
        let Some(dev) = self.registry.find_by_idx_mut(dev_idx) else {
            return Err(EngineError::NotFound);
        };
        let Some(node) = dev.node_mut(node_idx) else {
            return Err(EngineError::NotFound);
        };
        node.plugged = plugged;
        self.observers.notify(|o| o.nodes_changed());
        self.refresh();
        Ok(())
    }

    pub fn set_node_attr_swap_left_right(&mut self, dev_idx: u32, node_idx: u32, swapped: bool) -> Result<(), EngineError> {
        self.backend
            .set_swap_mode_for_node(dev_idx, node_idx, swapped)
            .map_err(|_| EngineError::Unsupported)?;
        let Some(dev) = self.registry.find_by_idx_mut(dev_idx) else {
            return Err(EngineError::NotFound);
        };
        let Some(node) = dev.node_mut(node_idx) else {
            return Err(EngineError::NotFound);
        };
        node.left_right_swapped = swapped;
        let node_id = crate::observer::node_id(dev_idx, node_idx);
        self.observers.notify(|o| o.node_left_right_swapped_changed(node_id, swapped));
        self.refresh();
        Ok(())
    }

    pub fn set_node_attr_capture_gain(&mut self, dev_idx: u32, node_idx: u32, gain: i32) -> Result<(), EngineError> {
        let Some(dev) = self.registry.find_by_idx_mut(dev_idx) else {
            return Err(EngineError::NotFound);
        };
        let Some(node) = dev.node_mut(node_idx) else {
            return Err(EngineError::NotFound);
        };
        node.capture_gain = gain;
        let node_id = crate::observer::node_id(dev_idx, node_idx);
        self.observers.notify(|o| o.input_node_gain_changed(node_id, gain));
        self.refresh();
        Ok(())
    }

    pub fn set_node_attr_display_rotation(&mut self, dev_idx: u32, node_idx: u32, rotation: u32) -> Result<(), EngineError> {
        self.backend
            .set_display_rotation_for_node(dev_idx, node_idx, rotation)
            .map_err(|_| EngineError::Unsupported)?;
        let Some(dev) = self.registry.find_by_idx_mut(dev_idx) else {
            return Err(EngineError::NotFound);
        };
        let Some(node) = dev.node_mut(node_idx) else {
            return Err(EngineError::NotFound);
        };
        node.display_rotation = rotation;
        self.observers.notify(|o| o.nodes_changed());
        self.refresh();
        Ok(())
    }

    // ---- Echo reference (§6 set_aec_ref) ----

    /// Points the output device(s) that `stream_id` is attached to at
    /// `ref_dev` as their AEC echo reference, creating/tearing down the
    /// echo-ref server stream as needed. `ref_dev == None` clears it.
    pub fn set_aec_ref(&mut self, stream_id: u64, ref_dev: Option<u32>) -> Result<(), EngineError> {
        let Some(stream) = self.streams.get(stream_id) else {
            return Err(EngineError::NotFound);
        };
        if stream.direction != Direction::Output {
            return Err(EngineError::InvalidArg);
        }
        if let Some(idx) = ref_dev {
            if self.registry.find_by_idx(idx).is_none() {
                return Err(EngineError::NotFound);
            }
        }
        let dev_idxs = self.router.devices_for_stream(stream_id);
        let mut ctx = self.ctx();
        for dev_idx in dev_idxs {
            self.router.update_echo_reference(&mut ctx, dev_idx, ref_dev);
        }
        drop(ctx);
        self.refresh();
        Ok(())
    }

    // ---- Flexible loopback (§6 request_floop) ----

    /// Returns the dev_idx of the floop input device matching `params`,
    /// creating it if no live request matches yet. Capped at
    /// `NUM_FLOOP_PAIRS_MAX` concurrently live requests.
    pub fn request_floop(&mut self, params: FloopParams) -> Result<u32, EngineError> {
        if let Some(&(_, existing_idx)) = self.floop_requests.iter().find(|(p, _)| *p == params) {
            return Ok(existing_idx);
        }
        if self.floop_requests.len() >= NUM_FLOOP_PAIRS_MAX as usize {
            return Err(EngineError::Transient);
        }
        let mut device = Device::new(0, Direction::Input, 2);
        device.is_floop = true;
        device.is_enabled = true;
        device.nodes.push(Node::new(0, "floop", auroute_ipc::NodeType::Floop));
        device.active_node_idx = Some(0);
        let idx = self.registry.add_input(device)?;
        self.floop_requests.push((params, idx));
        self.refresh();
        Ok(idx)
    }

    // ---- Suspend / resume / hotword ----

    pub fn suspend(&mut self) {
        let streams: Vec<Stream> = self.streams.streams().to_vec();
        let hotword_pause = self.hotword_pause_at_suspend;
        let mut ctx = self.ctx();
        self.router.suspend(&mut ctx, &streams, hotword_pause);
        drop(ctx);
        self.refresh();
        info!("engine suspended");
    }

    pub fn resume(&mut self) {
        let non_hotword: Vec<Stream> = self.streams.streams().iter().filter(|s| !s.is_hotword).cloned().collect();
        let resumed_ids: Vec<u64>;
        {
            let mut ctx = self.ctx();
            resumed_ids = self.router.resume(&mut ctx, &non_hotword);
        }
        for id in resumed_ids {
            if let Some(stream) = self.streams.get(id).cloned() {
                let mut ctx = self.ctx();
                if let Err(e) = self.router.on_stream_added(&mut ctx, &stream) {
                    warn!(?e, stream_id = id, "resume re-attach failed");
                }
            }
        }
        self.refresh();
        info!("engine resumed");
    }

    pub fn suspend_hotword_streams(&mut self) {
        let mut ctx = self.ctx();
        self.router.suspend_hotword_streams(&mut ctx);
        drop(ctx);
        self.refresh();
    }

    pub fn resume_hotword_stream(&mut self) {
        let mut ctx = self.ctx();
        self.router.resume_hotword_stream(&mut ctx);
        drop(ctx);
        self.refresh();
    }

    pub fn suspend_dev(&mut self, dev_idx: u32) {
        self.disable_device(dev_idx, true);
    }

    pub fn resume_dev(&mut self, dev_idx: u32, seed_stream: Option<u64>) -> Result<(), EngineError> {
        self.enable_device(dev_idx, seed_stream)
    }

    pub fn get_hotword_models(&self, dev_idx: u32, node_idx: u32) -> String {
        self.backend.get_hotword_models(dev_idx, node_idx)
    }

    pub fn set_hotword_model(&mut self, dev_idx: u32, node_idx: u32, name: &str) -> Result<(), EngineError> {
        self.backend
            .set_hotword_model(dev_idx, node_idx, name)
            .map_err(|_| EngineError::BackendError("hotword model rejected".into()))
    }

    // ---- Timer-driven main loop step ----

    /// Advances logical time to `now`, firing and dispatching any due
    /// timers (retries, idle sweeps, drain passes). Intended to be
    /// called from the daemon's cooperative main loop.
    pub fn tick(&mut self, now: Instant) {
        let fired = self.timers.poll_due(now);
        if fired.is_empty() {
            return;
        }
        let pending_streams: Vec<Stream> = self.streams.streams().to_vec();
        for handle in fired {
            let mut ctx = self.ctx();
            self.router.handle_timer_fired(&mut ctx, handle, &pending_streams);
        }
        {
            let mut ctx = self.ctx();
            self.router.idle_sweep(&mut ctx, now);
        }
        self.drive_drain();
        self.refresh();
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // ---- Read-only listing ----

    pub fn list_outputs(&self) -> Vec<auroute_ipc::DeviceInfo> {
        self.snapshot().devices.iter().filter(|d| d.direction == Direction::Output).cloned().collect()
    }

    pub fn list_inputs(&self) -> Vec<auroute_ipc::DeviceInfo> {
        self.snapshot().devices.iter().filter(|d| d.direction == Direction::Input).cloned().collect()
    }
}

/// Stream ids are process-local counters distinct from device idx
/// space; starting above zero keeps `0` free as a sentinel "no stream".
const RESERVED_MAX_STREAM_ID: u64 = 1;
