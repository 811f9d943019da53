// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A fake device backend and realtime worker for exercising the
//! router/registry/state-machine logic without PipeWire, grounded on
//! `test_iodev.h`'s "simulate hardware iodevs when they aren't
//! available" role.

use crate::backend::{BackendFailure, DeviceBackend, RampRequest, RealtimeWorker};
use crate::types::{Format, Stream};
use std::collections::{HashMap, HashSet};

/// Per-device scripted behavior for the mock backend.
#[derive(Debug, Clone, Default)]
pub struct MockDevicePlan {
    /// If set, `open` fails this many times before succeeding.
    pub fail_opens_remaining: u32,
    pub group: Vec<u32>,
    pub dsp_aec_use_case: bool,
    pub supports_nc: bool,
}

#[derive(Default)]
pub struct MockBackend {
    pub plans: HashMap<u32, MockDevicePlan>,
    pub opened: HashSet<u32>,
    pub open_calls: Vec<u32>,
    pub active_node_calls: Vec<(u32, u32, bool)>,
    pub hotword_models: HashMap<(u32, u32), String>,
    /// The format passed to the most recent successful `open()` per
    /// device, kept for assertions that need to see the negotiated
    /// channel count (the router doesn't publish `Format` in the
    /// snapshot DTO, only `max_supported_channels`).
    pub last_open_format: HashMap<u32, Format>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&mut self, dev_idx: u32, plan: MockDevicePlan) {
        self.plans.insert(dev_idx, plan);
    }
}

impl DeviceBackend for MockBackend {
    fn open(&mut self, dev_idx: u32, _cb_threshold: u32, format: Format) -> Result<(), BackendFailure> {
        self.open_calls.push(dev_idx);
        if let Some(plan) = self.plans.get_mut(&dev_idx) {
            if plan.fail_opens_remaining > 0 {
                plan.fail_opens_remaining -= 1;
                return Err(BackendFailure::Other);
            }
        }
        self.opened.insert(dev_idx);
        self.last_open_format.insert(dev_idx, format);
        Ok(())
    }

    fn close(&mut self, dev_idx: u32) {
        self.opened.remove(&dev_idx);
    }

    fn set_volume(&mut self, _dev_idx: u32, _volume: u32) {}
    fn set_mute(&mut self, _dev_idx: u32, _muted: bool) {}

    fn update_active_node(&mut self, dev_idx: u32, node_idx: u32, enabled: bool) {
        self.active_node_calls.push((dev_idx, node_idx, enabled));
    }

    fn set_swap_mode_for_node(&mut self, _dev_idx: u32, _node_idx: u32, _enable: bool) -> Result<(), BackendFailure> {
        Ok(())
    }

    fn set_display_rotation_for_node(&mut self, _dev_idx: u32, _node_idx: u32, _rotation: u32) -> Result<(), BackendFailure> {
        Ok(())
    }

    fn get_hotword_models(&self, dev_idx: u32, node_idx: u32) -> String {
        self.hotword_models.get(&(dev_idx, node_idx)).cloned().unwrap_or_default()
    }

    fn set_hotword_model(&mut self, dev_idx: u32, node_idx: u32, name: &str) -> Result<(), BackendFailure> {
        self.hotword_models.insert((dev_idx, node_idx), name.to_string());
        Ok(())
    }

    fn should_attach_stream(&self, _dev_idx: u32, _stream: &Stream) -> bool {
        true
    }

    fn get_dev_group(&self, dev_idx: u32) -> Vec<u32> {
        self.plans.get(&dev_idx).map(|p| p.group.clone()).unwrap_or_else(|| vec![dev_idx])
    }

    fn is_dsp_aec_use_case(&self, dev_idx: u32, _node_idx: u32) -> bool {
        self.plans.get(&dev_idx).is_some_and(|p| p.dsp_aec_use_case)
    }

    fn supports_noise_cancellation(&self, dev_idx: u32, _node_idx: u32) -> bool {
        self.plans.get(&dev_idx).is_some_and(|p| p.supports_nc)
    }
}

#[derive(Default)]
pub struct MockWorker {
    pub open_devs: HashSet<u32>,
    pub streams: HashMap<u64, Vec<u32>>,
    /// Scripted drain delays, consumed one at a time per call to
    /// `drain_stream`; once exhausted, returns 0.
    pub drain_schedule: HashMap<u64, Vec<u64>>,
    pub ramp_calls: Vec<(u32, RampRequest)>,
    pub echo_ref_streams: HashSet<u32>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_drain(&mut self, stream_id: u64, delays_ms: Vec<u64>) {
        self.drain_schedule.insert(stream_id, delays_ms);
    }
}

impl RealtimeWorker for MockWorker {
    fn add_open_dev(&mut self, dev_idx: u32) -> Result<(), BackendFailure> {
        self.open_devs.insert(dev_idx);
        Ok(())
    }

    fn rm_open_dev(&mut self, dev_idx: u32) {
        self.open_devs.remove(&dev_idx);
    }

    fn add_stream(&mut self, stream_id: u64, dev_idxs: &[u32]) -> Result<usize, BackendFailure> {
        self.streams.entry(stream_id).or_default().extend_from_slice(dev_idxs);
        Ok(dev_idxs.len())
    }

    fn disconnect_stream(&mut self, stream_id: u64, dev_idx: Option<u32>) {
        if let Some(devs) = self.streams.get_mut(&stream_id) {
            match dev_idx {
                Some(idx) => devs.retain(|d| *d != idx),
                None => devs.clear(),
            }
        }
    }

    fn drain_stream(&mut self, stream_id: u64) -> u64 {
        if let Some(queue) = self.drain_schedule.get_mut(&stream_id) {
            if !queue.is_empty() {
                return queue.remove(0);
            }
        }
        0
    }

    fn is_dev_open(&self, dev_idx: u32) -> bool {
        self.open_devs.contains(&dev_idx)
    }

    fn dev_start_ramp(&mut self, dev_idx: u32, request: RampRequest) {
        self.ramp_calls.push((dev_idx, request));
    }

    fn add_echo_ref_stream(&mut self, ref_dev_idx: u32, _format: Format) -> Result<(), BackendFailure> {
        self.echo_ref_streams.insert(ref_dev_idx);
        Ok(())
    }

    fn remove_echo_ref_stream(&mut self, ref_dev_idx: u32) {
        self.echo_ref_streams.remove(&ref_dev_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_backend_fails_then_succeeds_per_plan() {
        let mut backend = MockBackend::new();
        backend.plan(10, MockDevicePlan { fail_opens_remaining: 1, ..Default::default() });
        let fmt = Format { num_channels: 2, frame_rate: 48000 };
        assert!(backend.open(10, 480, fmt).is_err());
        assert!(backend.open(10, 480, fmt).is_ok());
    }

    #[test]
    fn mock_worker_drain_schedule_is_consumed_in_order() {
        let mut worker = MockWorker::new();
        worker.schedule_drain(1, vec![30, 10, 0]);
        assert_eq!(worker.drain_stream(1), 30);
        assert_eq!(worker.drain_stream(1), 10);
        assert_eq!(worker.drain_stream(1), 0);
        assert_eq!(worker.drain_stream(1), 0);
    }
}
