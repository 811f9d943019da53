// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! External collaborator contracts: the realtime worker facade and the
//! device backend. The router calls these; they never call back into
//! router state directly (the worker posts events the engine drains on
//! its own turn — see `auroute_pipewire::PwThread` for the concrete
//! thread-boundary implementation of this split).

use crate::types::{Format, Stream};
use std::time::Duration;

/// Ramp/mute request issued to the realtime worker on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampRequest {
    UpUnmute,
    DownMute,
    UpStartPlayback,
    ResumeMute,
    SwitchMute,
}

/// The realtime audio worker, treated as an opaque collaborator that
/// moves samples. Every call returns immediately; the worker never
/// blocks the caller and never reenters router state synchronously.
pub trait RealtimeWorker {
    fn add_open_dev(&mut self, dev_idx: u32) -> Result<(), BackendFailure>;
    fn rm_open_dev(&mut self, dev_idx: u32);
    fn add_stream(&mut self, stream_id: u64, dev_idxs: &[u32]) -> Result<usize, BackendFailure>;
    fn disconnect_stream(&mut self, stream_id: u64, dev_idx: Option<u32>);
    /// Returns remaining drain time in milliseconds; 0 means fully drained.
    fn drain_stream(&mut self, stream_id: u64) -> u64;
    fn is_dev_open(&self, dev_idx: u32) -> bool;
    fn dev_start_ramp(&mut self, dev_idx: u32, request: RampRequest);
    /// Starts (or no-ops if already active) the always-capturing,
    /// server-owned stream reading from `ref_dev_idx`, used as the echo
    /// reference for an output device's AEC. At most one per ref device.
    fn add_echo_ref_stream(&mut self, ref_dev_idx: u32, format: Format) -> Result<(), BackendFailure>;
    fn remove_echo_ref_stream(&mut self, ref_dev_idx: u32);
}

/// Failure class a backend call can report. Distinct from
/// `RouterError` since it's what the *collaborator* reports, before
/// the router decides how to fold it into its own error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFailure {
    Io,
    /// A known hand-off in progress (e.g. a BT profile switch); the
    /// router treats this as expected and does not warn.
    Transient,
    Other,
}

/// One concrete hardware-or-virtual device backend, implementing the
/// device contract the router treats as opaque.
pub trait DeviceBackend {
    fn open(&mut self, dev_idx: u32, cb_threshold: u32, format: Format) -> Result<(), BackendFailure>;
    fn close(&mut self, dev_idx: u32);
    fn set_volume(&mut self, dev_idx: u32, volume: u32);
    fn set_mute(&mut self, dev_idx: u32, muted: bool);
    fn update_active_node(&mut self, dev_idx: u32, node_idx: u32, enabled: bool);
    fn set_swap_mode_for_node(&mut self, dev_idx: u32, node_idx: u32, enable: bool) -> Result<(), BackendFailure>;
    fn set_display_rotation_for_node(&mut self, dev_idx: u32, node_idx: u32, rotation: u32) -> Result<(), BackendFailure>;
    fn get_hotword_models(&self, dev_idx: u32, node_idx: u32) -> String;
    fn set_hotword_model(&mut self, dev_idx: u32, node_idx: u32, name: &str) -> Result<(), BackendFailure>;
    /// Use-case filtering: whether `stream` should attach to `dev_idx`
    /// at all, beyond direction matching.
    fn should_attach_stream(&self, dev_idx: u32, stream: &Stream) -> bool;
    fn get_dev_group(&self, dev_idx: u32) -> Vec<u32>;
    fn is_dsp_aec_use_case(&self, dev_idx: u32, node_idx: u32) -> bool;
    fn supports_noise_cancellation(&self, dev_idx: u32, node_idx: u32) -> bool;
}

/// Retry and idle timing tunables the router asks the engine for;
/// mirrors the three timeouts SPEC_FULL §5.3 configures.
#[derive(Debug, Clone, Copy)]
pub struct RouterTiming {
    pub idle_grace: Duration,
    pub init_retry_delay: Duration,
    pub drain_min: Duration,
}

impl Default for RouterTiming {
    fn default() -> Self {
        RouterTiming {
            idle_grace: Duration::from_secs(10),
            init_retry_delay: Duration::from_millis(1000),
            drain_min: Duration::from_millis(10),
        }
    }
}
