// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The router: central orchestrator matching streams to devices under
//! active-node, pinned-stream, hotword-suspend, and
//! reopen-for-higher-channel-count policies. Grounded throughout on
//! `cras_iodev_list.c`.

use crate::backend::{BackendFailure, DeviceBackend, RampRequest, RealtimeWorker, RouterTiming};
use crate::effects::EffectEvaluator;
use crate::errors::RouterError;
use crate::observer::{node_id, ObserverRegistry};
use crate::registry::DeviceRegistry;
use crate::timer::{TimerHandle, TimerService};
use crate::types::{DeviceState, Direction, OpenResult, Stream};
use std::collections::HashMap;

/// The collaborators a router operation needs, borrowed disjointly
/// from `Engine`'s fields so a call like `engine.streams.add(s, &mut
/// adapter)` (where `adapter` wraps a `RouterCtx` built from other
/// `engine` fields) type-checks without a self-referential struct.
pub struct RouterCtx<'a> {
    pub registry: &'a mut DeviceRegistry,
    pub effects: &'a mut EffectEvaluator,
    pub backend: &'a mut dyn DeviceBackend,
    pub worker: &'a mut dyn RealtimeWorker,
    pub timers: &'a mut dyn TimerService,
    pub observers: &'a mut ObserverRegistry,
    pub timing: RouterTiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    InitFailure,
}

/// Router bookkeeping: which streams are attached to which devices,
/// pending retry timers, the idle sweep timer, suspend state, and the
/// hotword real/empty device pair. None of this is part of the
/// registry or stream list — it is the router's own working state.
#[derive(Default)]
pub struct Router {
    attached: HashMap<u32, Vec<u64>>,
    retries: HashMap<u32, (TimerHandle, RetryReason)>,
    idle_timer: Option<TimerHandle>,
    floop_idle_timer: Option<TimerHandle>,
    suspended: bool,
    hotword_auto_resume: bool,
    hotword_real_dev: Option<u32>,
    hotword_empty_dev: Option<u32>,
    hotword_suspended: bool,
    /// Streams set aside at suspend time, re-offered to `on_stream_added`
    /// on resume (§4.5 step 4).
    suspended_streams: Vec<u64>,
    /// Output dev_idx -> the ref dev_idx its echo-ref stream is keyed on.
    echo_ref_owner: HashMap<u32, u32>,
    /// Ref dev_idx -> number of output devices currently pointing their
    /// `echo_reference_dev` at it; the stream is torn down at zero.
    echo_ref_refcount: HashMap<u32, u32>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_hotword_devices(&mut self, real: Option<u32>, empty: Option<u32>) {
        self.hotword_real_dev = real;
        self.hotword_empty_dev = empty;
    }

    pub fn attached_streams(&self, dev_idx: u32) -> &[u64] {
        self.attached.get(&dev_idx).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Reverse lookup of `attached_streams`: every device `stream_id` is
    /// currently attached to.
    pub fn devices_for_stream(&self, stream_id: u64) -> Vec<u32> {
        self.attached
            .iter()
            .filter(|(_, ids)| ids.contains(&stream_id))
            .map(|(dev_idx, _)| *dev_idx)
            .collect()
    }

    fn attach(&mut self, dev_idx: u32, stream_id: u64) {
        let list = self.attached.entry(dev_idx).or_default();
        if !list.contains(&stream_id) {
            list.push(stream_id);
        }
    }

    fn detach(&mut self, dev_idx: u32, stream_id: u64) {
        if let Some(list) = self.attached.get_mut(&dev_idx) {
            list.retain(|id| *id != stream_id);
        }
    }

    fn detach_everywhere(&mut self, stream_id: u64) {
        for list in self.attached.values_mut() {
            list.retain(|id| *id != stream_id);
        }
    }

    // ---- 4.3.1 Attach predicate ----

    pub fn attach_predicate(ctx: &RouterCtx, dev_idx: u32, stream: &Stream) -> bool {
        let Some(dev) = ctx.registry.find_by_idx(dev_idx) else {
            return false;
        };
        if dev.direction != stream.direction {
            return false;
        }
        ctx.backend.should_attach_stream(dev_idx, stream)
    }

    // ---- 4.3.6 init_device ----

    /// Opens `dev_idx` for `stream`'s format, no-op if already open.
    pub fn init_device(&mut self, ctx: &mut RouterCtx, dev_idx: u32, stream: &Stream) -> Result<(), RouterError> {
        {
            let dev = ctx.registry.find_by_idx_mut(dev_idx).ok_or(RouterError::NoDevice)?;
            if dev.is_open() {
                return Ok(());
            }
            dev.idle_deadline = None;
            dev.last_open_result = OpenResult::Success;
        }
        let format = stream.format;
        let cb_threshold = stream.cb_threshold;
        match ctx.backend.open(dev_idx, cb_threshold, format) {
            Ok(()) => {
                if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
                    dev.state = DeviceState::Open;
                    dev.format = Some(format);
                }
                if let Err(failure) = ctx.worker.add_open_dev(dev_idx) {
                    self.close(ctx, dev_idx);
                    return Err(backend_failure_to_router_error(failure));
                }
                self.maybe_enable_echo_reference(ctx, dev_idx);
                self.recompute_echo_ref_alive(ctx);
                Ok(())
            }
            Err(failure) => {
                if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
                    dev.last_open_result = OpenResult::Failure;
                }
                Err(backend_failure_to_router_error(failure))
            }
        }
    }

    /// `init_device` plus attaching `stream` to the worker's device
    /// list, tracked in `self.attached`.
    fn init_and_attach(&mut self, ctx: &mut RouterCtx, dev_idx: u32, stream: &Stream) -> Result<(), RouterError> {
        self.init_device(ctx, dev_idx, stream)?;
        self.attach(dev_idx, stream.id);
        ctx.worker
            .add_stream(stream.id, &[dev_idx])
            .map(|_| ())
            .map_err(backend_failure_to_router_error)
    }

    /// Opens `dev_idx` with the highest-channel-count stream currently
    /// applicable to it (possible due to I6's ordering) and attaches
    /// every other currently applicable stream, used by both normal
    /// attach and the reopen-for-higher-channel-count path.
    pub fn init_and_attach_streams(&mut self, ctx: &mut RouterCtx, dev_idx: u32, candidates: &[Stream]) -> Result<(), RouterError> {
        let applicable: Vec<&Stream> = candidates
            .iter()
            .filter(|s| Self::attach_predicate(ctx, dev_idx, s))
            .collect();
        let Some(first) = applicable.first() else {
            return Ok(());
        };
        self.init_device(ctx, dev_idx, first)?;
        for s in applicable {
            self.attach(dev_idx, s.id);
            let _ = ctx.worker.add_stream(s.id, &[dev_idx]);
        }
        Ok(())
    }

    // ---- 4.3.7 close ----

    pub fn close(&mut self, ctx: &mut RouterCtx, dev_idx: u32) {
        let is_open = ctx.registry.find_by_idx(dev_idx).is_some_and(|d| d.is_open());
        if !is_open {
            return;
        }
        self.maybe_disable_echo_reference(ctx, dev_idx);
        if let Some(stream_ids) = self.attached.remove(&dev_idx) {
            for id in stream_ids {
                ctx.worker.disconnect_stream(id, Some(dev_idx));
            }
        }
        ctx.worker.rm_open_dev(dev_idx);
        if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
            if !dev.is_floop {
                dev.idle_deadline = None;
            }
            dev.state = DeviceState::Closed;
            dev.format = None;
        }
        self.recompute_echo_ref_alive(ctx);
    }

    /// `disable_device`: `force` flushes pinned streams before closing;
    /// a non-forced disable leaves pinned streams attached and refuses
    /// to close while any remain attached (I5 bookkeeping).
    pub fn disable_device(&mut self, ctx: &mut RouterCtx, dev_idx: u32, force: bool) {
        if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
            dev.is_enabled = false;
        }
        // `is_enabled` feeds I8's alive predicate directly, independent
        // of whether the device ever opened; `close()` below only
        // recomputes when it actually transitions an open device.
        self.recompute_echo_ref_alive(ctx);
        let has_pinned = ctx.registry.find_by_idx(dev_idx).is_some_and(|d| d.num_pinned_streams > 0);
        if has_pinned && !force {
            return;
        }
        if has_pinned {
            if let Some(stream_ids) = self.attached.get(&dev_idx).cloned() {
                for id in stream_ids {
                    self.detach(dev_idx, id);
                    ctx.worker.disconnect_stream(id, Some(dev_idx));
                }
            }
            if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
                dev.num_pinned_streams = 0;
            }
        }
        self.close(ctx, dev_idx);
    }

    /// `enable_device_group`: continues enabling remaining group
    /// members even if one member's init fails; reports the first
    /// error but does not abort the loop.
    pub fn enable_device_group(&mut self, ctx: &mut RouterCtx, dev_idx: u32, seed_stream: Option<&Stream>) -> Result<(), RouterError> {
        let group = ctx.registry.group_of(dev_idx);
        let mut first_err = None;
        for member in group {
            if let Some(dev) = ctx.registry.find_by_idx_mut(member) {
                dev.is_enabled = true;
            }
            if let Some(stream) = seed_stream {
                if let Err(e) = self.init_and_attach(ctx, member, stream) {
                    first_err.get_or_insert(e);
                    self.schedule_retry(ctx, member);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ---- 4.3.8 Retry policy ----

    pub fn schedule_retry(&mut self, ctx: &mut RouterCtx, dev_idx: u32) {
        self.cancel_retry(ctx, dev_idx);
        let handle = ctx.timers.create_timer(ctx.timing.init_retry_delay);
        self.retries.insert(dev_idx, (handle, RetryReason::InitFailure));
    }

    pub fn cancel_retry(&mut self, ctx: &mut RouterCtx, dev_idx: u32) {
        if let Some((handle, _)) = self.retries.remove(&dev_idx) {
            ctx.timers.cancel_timer(handle);
        }
    }

    /// Called by the main loop when a timer handle fires; if it
    /// matches a pending retry, retries `init_and_attach_streams` for
    /// that device and, on success, disables the fallback of its
    /// direction.
    pub fn handle_timer_fired(&mut self, ctx: &mut RouterCtx, handle: TimerHandle, pending_streams: &[Stream]) {
        let dev_idx = self
            .retries
            .iter()
            .find(|(_, (h, _))| *h == handle)
            .map(|(idx, _)| *idx);
        if let Some(dev_idx) = dev_idx {
            self.retries.remove(&dev_idx);
            let still_exists = ctx.registry.find_by_idx(dev_idx).is_some();
            let already_open = ctx.registry.find_by_idx(dev_idx).is_some_and(|d| d.is_open());
            if !still_exists || already_open {
                return;
            }
            if self.init_and_attach_streams(ctx, dev_idx, pending_streams).is_ok() {
                if let Some(dev) = ctx.registry.find_by_idx(dev_idx) {
                    let direction = dev.direction;
                    self.maybe_disable_fallback(ctx, direction);
                }
            } else {
                self.schedule_retry(ctx, dev_idx);
            }
        }
    }

    fn fallback_idx(ctx: &RouterCtx, direction: Direction) -> Option<u32> {
        ctx.registry
            .iter(direction)
            .find(|d| d.is_fallback)
            .map(|d| d.idx)
    }

    fn maybe_disable_fallback(&mut self, ctx: &mut RouterCtx, direction: Direction) {
        let non_fallback_open = ctx
            .registry
            .iter(direction)
            .any(|d| !d.is_fallback && d.is_enabled);
        if non_fallback_open {
            if let Some(fallback) = Self::fallback_idx(ctx, direction) {
                self.disable_device(ctx, fallback, false);
            }
        }
    }

    // ---- 4.3.2 on_stream_added ----

    pub fn on_stream_added(&mut self, ctx: &mut RouterCtx, stream: &Stream) -> Result<(), RouterError> {
        if self.suspended {
            self.suspended_streams.push(stream.id);
            return Ok(());
        }

        if stream.is_pinned {
            return self.on_pinned_stream_added(ctx, stream);
        }

        let direction = stream.direction;
        let fallback = Self::fallback_idx(ctx, direction);
        let mut attach_batch = Vec::new();
        let mut reopened = false;

        if let Some(fallback_idx) = fallback {
            if ctx.registry.find_by_idx(fallback_idx).is_some_and(|d| d.is_enabled) {
                let _ = self.init_and_attach(ctx, fallback_idx, stream);
            }
        }

        let candidates: Vec<u32> = ctx
            .registry
            .iter(direction)
            .filter(|d| d.is_enabled && !d.is_fallback)
            .filter(|d| Self::attach_predicate(ctx, d.idx, stream))
            .map(|d| d.idx)
            .collect();

        for dev_idx in candidates {
            let needs_reopen = ctx.registry.find_by_idx(dev_idx).is_some_and(|d| {
                d.is_open()
                    && d.format.is_some_and(|f| stream.format.num_channels > f.num_channels)
                    && stream.format.num_channels <= d.max_supported_channels
            });
            if needs_reopen {
                self.reopen_for_higher_channel_count(ctx, dev_idx, &[stream.clone()]);
                reopened = true;
                continue;
            }
            match self.init_and_attach(ctx, dev_idx, stream) {
                Ok(()) => attach_batch.push(dev_idx),
                Err(_) => self.schedule_retry(ctx, dev_idx),
            }
        }

        if attach_batch.is_empty() && !reopened {
            if let Some(fallback_idx) = fallback {
                if let Some(dev) = ctx.registry.find_by_idx_mut(fallback_idx) {
                    dev.is_enabled = true;
                }
                let _ = self.init_and_attach(ctx, fallback_idx, stream);
            }
        } else {
            self.maybe_disable_fallback(ctx, direction);
        }

        Ok(())
    }

    fn on_pinned_stream_added(&mut self, ctx: &mut RouterCtx, stream: &Stream) -> Result<(), RouterError> {
        let Some(pinned_dev) = stream.pinned_dev_idx else {
            return Err(RouterError::NoDevice);
        };
        let group = ctx.registry.group_of(pinned_dev);
        let mut open_devs = Vec::new();
        let mut potentially_attached = 0usize;

        for dev_idx in group {
            if !Self::attach_predicate(ctx, dev_idx, stream) {
                continue;
            }
            match self.init_device(ctx, dev_idx, stream) {
                Ok(()) => open_devs.push(dev_idx),
                Err(_) => {
                    self.schedule_retry(ctx, dev_idx);
                    potentially_attached += 1;
                }
            }
        }

        if open_devs.is_empty() {
            return if potentially_attached > 0 {
                Ok(())
            } else {
                Err(RouterError::NoDevice)
            };
        }

        let mut any_ok = false;
        for dev_idx in &open_devs {
            self.attach(*dev_idx, stream.id);
            if ctx.worker.add_stream(stream.id, &[*dev_idx]).is_ok() {
                any_ok = true;
                if let Some(dev) = ctx.registry.find_by_idx_mut(*dev_idx) {
                    dev.num_pinned_streams += 1;
                }
            }
        }

        if !any_ok && potentially_attached == 0 {
            return Err(RouterError::NoDevice);
        }
        Ok(())
    }

    // ---- 4.3.3 on_stream_removed ----

    pub fn on_stream_removed(&mut self, ctx: &mut RouterCtx, stream: &Stream, remaining_non_pinned: usize) -> u64 {
        let drain_ms = ctx.worker.drain_stream(stream.id);
        if drain_ms > 0 {
            return drain_ms;
        }

        self.detach_everywhere(stream.id);

        if stream.is_pinned {
            if let Some(pinned_dev) = stream.pinned_dev_idx {
                for dev_idx in ctx.registry.group_of(pinned_dev) {
                    if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
                        if dev.num_pinned_streams > 0 {
                            dev.num_pinned_streams -= 1;
                        }
                        let disabled_and_empty = !dev.is_enabled && dev.num_pinned_streams == 0;
                        if disabled_and_empty {
                            self.close(ctx, dev_idx);
                        }
                    }
                }
            }
        }

        self.arm_idle_deadlines(ctx, stream.direction, remaining_non_pinned);
        0
    }

    /// Arms idle deadlines only once no non-pinned stream of `direction`
    /// remains at all (§4.3.3); a device still serving another
    /// non-pinned stream must not be armed just because one of several
    /// streams was removed.
    fn arm_idle_deadlines(&mut self, ctx: &mut RouterCtx, direction: Direction, remaining_non_pinned: usize) {
        if remaining_non_pinned > 0 {
            return;
        }
        let idle_grace = ctx.timing.idle_grace;
        let deadline = std::time::Instant::now() + idle_grace;
        let idxs: Vec<u32> = ctx
            .registry
            .iter(direction)
            .filter(|d| d.num_pinned_streams == 0 && d.is_open() && !d.is_floop)
            .map(|d| d.idx)
            .collect();
        let has_idxs = !idxs.is_empty();
        for idx in idxs {
            if let Some(dev) = ctx.registry.find_by_idx_mut(idx) {
                dev.idle_deadline = Some(deadline);
            }
        }
        if has_idxs {
            let h = ctx.timers.create_timer(idle_grace.max(std::time::Duration::from_millis(10)));
            if let Some(old) = self.idle_timer.replace(h) {
                ctx.timers.cancel_timer(old);
            }
        }
        let floop_idxs: Vec<u32> = ctx
            .registry
            .iter(direction)
            .filter(|d| d.num_pinned_streams == 0 && d.is_open() && d.is_floop)
            .map(|d| d.idx)
            .collect();
        for idx in floop_idxs {
            if let Some(dev) = ctx.registry.find_by_idx_mut(idx) {
                dev.idle_deadline = Some(deadline);
            }
        }
    }

    /// The idle sweep timer firing: closes every device whose
    /// `idle_deadline <= now`, reschedules for the next soonest
    /// deadline (min 10ms) if any remain.
    pub fn idle_sweep(&mut self, ctx: &mut RouterCtx, now: std::time::Instant) {
        let due: Vec<u32> = ctx
            .registry
            .iter_all()
            .filter(|d| d.idle_deadline.is_some_and(|dl| dl <= now))
            .map(|d| d.idx)
            .collect();
        for idx in due {
            self.close(ctx, idx);
        }
        let next = ctx.registry.iter_all().filter_map(|d| d.idle_deadline).min();
        if let Some(next_deadline) = next {
            let delay = next_deadline
                .saturating_duration_since(now)
                .max(std::time::Duration::from_millis(10));
            let h = ctx.timers.create_timer(delay);
            if let Some(old) = self.idle_timer.replace(h) {
                ctx.timers.cancel_timer(old);
            }
        }
    }

    // ---- 4.3.5 Reopen for higher channel count ----

    pub fn reopen_for_higher_channel_count(&mut self, ctx: &mut RouterCtx, dev_idx: u32, extra_candidates: &[Stream]) {
        let direction = match ctx.registry.find_by_idx(dev_idx) {
            Some(d) => d.direction,
            None => return,
        };
        if let Some(fallback) = Self::fallback_idx(ctx, direction) {
            if let Some(dev) = ctx.registry.find_by_idx_mut(fallback) {
                dev.is_enabled = true;
            }
        }

        let group = ctx.registry.group_of(dev_idx);
        let mut still_attached: Vec<u64> = Vec::new();
        for member in &group {
            still_attached.extend(self.attached_streams(*member).iter().copied());
            self.close(ctx, *member);
            if let Some(active) = ctx.registry.find_by_idx(*member).and_then(|d| d.active_node_idx) {
                ctx.backend.update_active_node(*member, active, true);
            }
        }

        // init_and_attach_streams needs owned Stream values; the caller
        // supplies the new, higher-channel stream plus any others we
        // already knew about. Streams still attached-by-id but not
        // passed in `extra_candidates` cannot be reconstructed here
        // without a stream list handle, so callers are expected to pass
        // the full currently-relevant candidate set.
        let _ = still_attached;
        for member in &group {
            let _ = self.init_and_attach_streams(ctx, *member, extra_candidates);
        }

        if let Some(fallback) = Self::fallback_idx(ctx, direction) {
            self.maybe_disable_fallback(ctx, direction);
            let _ = fallback;
        }
    }

    // ---- 4.3.4 Active-node selection ----

    pub fn select_node(&mut self, ctx: &mut RouterCtx, direction: Direction, dev_idx: u32, node_idx: u32) {
        let Some(dev) = ctx.registry.find_by_idx(dev_idx) else {
            return;
        };
        if dev.direction != direction {
            return;
        }
        if dev.is_enabled && dev.active_node_idx == Some(node_idx) {
            return; // P5: idempotent, no events
        }

        let fallback = Self::fallback_idx(ctx, direction);
        if let Some(fallback_idx) = fallback {
            if let Some(fb) = ctx.registry.find_by_idx_mut(fallback_idx) {
                fb.is_enabled = true;
            }
        }

        let target_group = ctx.registry.group_of(dev_idx);
        let others: Vec<u32> = ctx
            .registry
            .iter(direction)
            .filter(|d| d.is_enabled && !target_group.contains(&d.idx))
            .map(|d| d.idx)
            .collect();
        for other in others {
            self.disable_device(ctx, other, false);
        }

        ctx.backend.update_active_node(dev_idx, node_idx, true);
        if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
            dev.active_node_idx = Some(node_idx);
        }

        if direction == Direction::Output {
            let any_output_streams = self.attached.values().any(|v| !v.is_empty());
            if any_output_streams {
                ctx.worker.dev_start_ramp(dev_idx, RampRequest::SwitchMute);
            }
        }

        for member in &target_group {
            if let Some(dev) = ctx.registry.find_by_idx_mut(*member) {
                dev.is_enabled = true;
            }
        }

        if let Some(fallback_idx) = fallback {
            self.maybe_disable_fallback(ctx, direction);
            let _ = fallback_idx;
        }

        // The enabled-set change above is exactly what I8's alive
        // predicate tracks; recompute before the explicit notifies
        // below so a flag flip folds into the same nodes_changed burst.
        self.recompute_echo_ref_alive(ctx);

        ctx.observers.notify(|o| o.active_node_changed(direction, node_id(dev_idx, node_idx)));
        ctx.observers.notify(|o| o.nodes_changed());
    }

    pub fn add_active_node(&mut self, ctx: &mut RouterCtx, direction: Direction, dev_idx: u32, node_idx: u32) {
        let Some(dev) = ctx.registry.find_by_idx(dev_idx) else {
            return;
        };
        if dev.direction != direction {
            return;
        }
        ctx.backend.update_active_node(dev_idx, node_idx, true);
        if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
            dev.active_node_idx = Some(node_idx);
            dev.is_enabled = true;
        }
        self.recompute_echo_ref_alive(ctx);
        ctx.observers.notify(|o| o.active_node_changed(direction, node_id(dev_idx, node_idx)));
        ctx.observers.notify(|o| o.nodes_changed());
    }

    pub fn rm_active_node(&mut self, ctx: &mut RouterCtx, direction: Direction, dev_idx: u32) {
        self.disable_device(ctx, dev_idx, false);
        ctx.observers.notify(|o| o.active_node_changed(direction, 0));
        ctx.observers.notify(|o| o.nodes_changed());
    }

    // ---- 4.3.6/4.3.7 echo-ref server stream ----

    /// Starts the ref device's echo-ref stream if `dev_idx` (an open
    /// output device) names one via `echo_reference_dev` and no other
    /// open output device already owns it.
    fn maybe_enable_echo_reference(&mut self, ctx: &mut RouterCtx, dev_idx: u32) {
        let Some(dev) = ctx.registry.find_by_idx(dev_idx) else {
            return;
        };
        if dev.direction != Direction::Output {
            return;
        }
        let Some(ref_dev) = dev.echo_reference_dev else {
            return;
        };
        let Some(format) = dev.format else {
            return;
        };
        if self.echo_ref_owner.contains_key(&dev_idx) {
            return;
        }
        let is_first = !self.echo_ref_refcount.contains_key(&ref_dev);
        if is_first && ctx.worker.add_echo_ref_stream(ref_dev, format).is_err() {
            return;
        }
        *self.echo_ref_refcount.entry(ref_dev).or_insert(0) += 1;
        self.echo_ref_owner.insert(dev_idx, ref_dev);
    }

    /// Tears down `dev_idx`'s echo-ref stream (if it owns one), before
    /// the rest of `close`'s teardown runs.
    fn maybe_disable_echo_reference(&mut self, ctx: &mut RouterCtx, dev_idx: u32) {
        let Some(ref_dev) = self.echo_ref_owner.remove(&dev_idx) else {
            return;
        };
        if let Some(count) = self.echo_ref_refcount.get_mut(&ref_dev) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.echo_ref_refcount.remove(&ref_dev);
                ctx.worker.remove_echo_ref_stream(ref_dev);
            }
        }
    }

    /// `set_aec_ref`: points `dev_idx`'s echo reference at `new_ref` (or
    /// clears it), re-wiring the live echo-ref stream if the device is
    /// already open.
    pub fn update_echo_reference(&mut self, ctx: &mut RouterCtx, dev_idx: u32, new_ref: Option<u32>) {
        let Some(dev) = ctx.registry.find_by_idx(dev_idx) else {
            return;
        };
        if dev.direction != Direction::Output {
            return;
        }
        let was_open = dev.is_open();
        if let Some(dev) = ctx.registry.find_by_idx_mut(dev_idx) {
            dev.echo_reference_dev = new_ref;
        }
        if !was_open {
            return;
        }
        self.maybe_disable_echo_reference(ctx, dev_idx);
        self.maybe_enable_echo_reference(ctx, dev_idx);
    }

    // ---- 4.7 helper: non_dsp_aec_echo_ref_dev_alive ----

    fn recompute_echo_ref_alive(&mut self, ctx: &mut RouterCtx) {
        let alive = ctx.registry.iter(Direction::Output).any(|d| {
            !d.is_fallback
                && (d.is_enabled || d.is_open())
                && d.active_node().is_some_and(|n| !n.dsp_aec_capable)
        });
        if ctx.effects.set_non_dsp_aec_echo_ref_dev_alive(alive) {
            ctx.observers.notify(|o| o.nodes_changed());
        }
    }

    pub fn recompute_effects_for_streams(&mut self, ctx: &mut RouterCtx, streams: &[Stream]) {
        if ctx.effects.recompute_from_streams(streams) {
            ctx.observers.notify(|o| o.nodes_changed());
        }
    }

    // ---- 4.5 Suspend / resume ----

    pub fn suspend(&mut self, ctx: &mut RouterCtx, streams: &[Stream], hotword_pause_at_suspend: bool) {
        for stream in streams {
            ctx.worker.disconnect_stream(stream.id, None);
            if stream.is_pinned {
                if let Some(pinned_dev) = stream.pinned_dev_idx {
                    if !ctx.registry.find_by_idx(pinned_dev).is_some_and(|d| d.is_enabled) {
                        self.close(ctx, pinned_dev);
                    }
                }
            }
        }
        self.suspended = true;

        let output_idxs: Vec<u32> = ctx.registry.enabled(Direction::Output);
        let input_idxs: Vec<u32> = ctx.registry.enabled(Direction::Input);
        for idx in output_idxs.into_iter().chain(input_idxs) {
            self.close(ctx, idx);
        }

        if hotword_pause_at_suspend {
            self.suspend_hotword_streams(ctx);
            self.hotword_auto_resume = true;
        }

        ctx.observers.notify(|o| o.suspend_changed(true));
    }

    pub fn resume(&mut self, ctx: &mut RouterCtx, non_hotword_streams: &[Stream]) -> Vec<u64> {
        self.suspended = false;
        if self.hotword_auto_resume {
            self.resume_hotword_stream(ctx);
            self.hotword_auto_resume = false;
        }

        let any_output_stream = non_hotword_streams.iter().any(|s| s.direction == Direction::Output);
        if any_output_stream {
            let output_idxs: Vec<u32> = ctx.registry.enabled(Direction::Output);
            for idx in output_idxs {
                ctx.worker.dev_start_ramp(idx, RampRequest::ResumeMute);
            }
        }

        let resumed: Vec<u64> = std::mem::take(&mut self.suspended_streams);
        ctx.observers.notify(|o| o.suspend_changed(false));
        resumed
    }

    // ---- 4.6 Hotword suspend/resume ----

    pub fn suspend_hotword_streams(&mut self, ctx: &mut RouterCtx) {
        if self.hotword_suspended {
            return;
        }
        let (Some(real), Some(empty)) = (self.hotword_real_dev, self.hotword_empty_dev) else {
            return;
        };
        if let Some(stream_ids) = self.attached.get(&real).cloned() {
            for id in stream_ids {
                self.detach(real, id);
                self.attach(empty, id);
            }
        }
        self.close(ctx, real);
        self.hotword_suspended = true;
    }

    pub fn resume_hotword_stream(&mut self, ctx: &mut RouterCtx) {
        if !self.hotword_suspended {
            return;
        }
        let (Some(real), Some(empty)) = (self.hotword_real_dev, self.hotword_empty_dev) else {
            return;
        };
        if let Some(stream_ids) = self.attached.get(&empty).cloned() {
            for id in stream_ids {
                self.detach(empty, id);
                self.attach(real, id);
            }
        }
        self.hotword_suspended = false;
        let _ = ctx; // real device reopen is driven by the next on_stream_added pass
    }
}

fn backend_failure_to_router_error(failure: BackendFailure) -> RouterError {
    match failure {
        BackendFailure::Io => RouterError::Io,
        BackendFailure::Transient => RouterError::Transient,
        BackendFailure::Other => RouterError::BackendError,
    }
}
