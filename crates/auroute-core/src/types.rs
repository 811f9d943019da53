// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core data model: devices, nodes, and streams.
//!
//! These are the engine's own working types, distinct from the
//! snapshot DTOs in `auroute_ipc` — they carry relations by index
//! rather than denormalized display fields.

use std::collections::BTreeSet;
use std::time::Instant;

pub use auroute_ipc::{Direction, NcProvider, NodeType};

/// Indices below this value are reserved for fallback and hotword-empty
/// devices (one slot per direction, plus the hotword-empty device).
pub const RESERVED_MAX: u32 = 8;

pub const PLAYBACK_SILENT_IDX: u32 = 0;
pub const CAPTURE_SILENT_IDX: u32 = 1;
pub const HOTWORD_EMPTY_IDX: u32 = 2;

/// Cap on concurrently live flexible-loopback device requests.
pub const NUM_FLOOP_PAIRS_MAX: u32 = 20;

/// Sample format negotiated with an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub num_channels: u32,
    pub frame_rate: u32,
}

/// Device open/close lifecycle, I2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Open,
    NormalRun,
    NoStreamRun,
}

/// Outcome of the most recent open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    Unknown,
    Success,
    Failure,
}

/// A user-visible input/output endpoint on a device.
#[derive(Debug, Clone)]
pub struct Node {
    pub idx: u32,
    pub name: String,
    pub node_type: NodeType,
    pub plugged: bool,
    pub plugged_time_us: u64,
    pub volume: u32,
    pub capture_gain: i32,
    pub ui_gain_scaler: f64,
    pub left_right_swapped: bool,
    pub display_rotation: u32,
    pub nc_providers: BTreeSet<NcProvider>,
    pub desired_nc_provider: Option<NcProvider>,
    pub stable_id: u32,
    pub active_hotword_model: Option<String>,
    pub number_of_volume_steps: u32,
    /// True when the backend can use this node's active state as an echo
    /// reference for DSP-offloaded AEC (a "DSP-AEC-capable speaker").
    pub dsp_aec_capable: bool,
    /// True when the backend reports SCO offload on this node.
    pub sco_offload: bool,
}

impl Node {
    pub fn new(idx: u32, name: impl Into<String>, node_type: NodeType) -> Self {
        Node {
            idx,
            name: name.into(),
            node_type,
            plugged: true,
            plugged_time_us: 0,
            volume: 100,
            capture_gain: 0,
            ui_gain_scaler: 1.0,
            left_right_swapped: false,
            display_rotation: 0,
            nc_providers: BTreeSet::new(),
            desired_nc_provider: None,
            stable_id: idx,
            active_hotword_model: None,
            number_of_volume_steps: 25,
            dsp_aec_capable: false,
            sco_offload: false,
        }
    }
}

/// An addressable audio endpoint direction: nodes, format, lifecycle.
#[derive(Debug, Clone)]
pub struct Device {
    pub idx: u32,
    pub direction: Direction,
    pub nodes: Vec<Node>,
    pub active_node_idx: Option<u32>,
    pub format: Option<Format>,
    pub is_enabled: bool,
    pub state: DeviceState,
    pub idle_deadline: Option<Instant>,
    pub num_pinned_streams: u32,
    pub max_supported_channels: u32,
    pub echo_reference_dev: Option<u32>,
    pub group: Option<u32>,
    pub last_open_result: OpenResult,
    /// True for the reserved playback-silent / capture-silent / hotword
    /// empty devices created at engine init.
    pub is_fallback: bool,
    pub is_floop: bool,
}

impl Device {
    pub fn new(idx: u32, direction: Direction, max_supported_channels: u32) -> Self {
        Device {
            idx,
            direction,
            nodes: Vec::new(),
            active_node_idx: None,
            format: None,
            is_enabled: false,
            state: DeviceState::Closed,
            idle_deadline: None,
            num_pinned_streams: 0,
            max_supported_channels,
            echo_reference_dev: None,
            group: None,
            last_open_result: OpenResult::Unknown,
            is_fallback: false,
            is_floop: false,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, DeviceState::Closed)
    }

    pub fn active_node(&self) -> Option<&Node> {
        let idx = self.active_node_idx?;
        self.nodes.iter().find(|n| n.idx == idx)
    }

    pub fn active_node_mut(&mut self) -> Option<&mut Node> {
        let idx = self.active_node_idx?;
        self.nodes.iter_mut().find(|n| n.idx == idx)
    }

    pub fn node(&self, idx: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.idx == idx)
    }

    pub fn node_mut(&mut self, idx: u32) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.idx == idx)
    }
}

/// `CRAS_STREAM_EFFECT_*`-shaped flags carried by a stream, renamed and
/// stripped of their original numeric values. A hand-rolled bit wrapper
/// rather than the `bitflags` crate: none of the candidate teacher
/// repos pull `bitflags` in directly, and these bits never leave this
/// crate's process boundary (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamEffects(pub u32);

impl StreamEffects {
    pub const NONE: u32 = 0;
    pub const APM_ECHO_CANCELLATION: u32 = 1 << 0;
    pub const DSP_ECHO_CANCELLATION_ALLOWED: u32 = 1 << 1;
    pub const NOISE_CANCELLATION: u32 = 1 << 2;
    pub const GAIN_CONTROL: u32 = 1 << 3;
    pub const DONT_CARE_APM_EFFECTS: u32 = 1 << 4;

    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn with(mut self, bit: u32) -> Self {
        self.0 |= bit;
        self
    }
}

/// Client classification tags. Only `StreamType::Utility` is inspected
/// by the can-use-DSP-AEC predicate (§4.7); the rest are opaque tags
/// carried for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Default,
    VoiceCommunication,
    Utility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Unknown,
    Chrome,
    Arc,
    Crosvm,
    Test,
}

/// A client audio stream.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: u64,
    pub direction: Direction,
    pub format: Format,
    pub effects: StreamEffects,
    pub is_pinned: bool,
    pub pinned_dev_idx: Option<u32>,
    pub client_type: ClientType,
    pub stream_type: StreamType,
    pub is_hotword: bool,
    pub is_server_only: bool,
    pub cb_threshold: u32,
    pub start_ts: Instant,
}

impl Stream {
    pub fn is_utility(&self) -> bool {
        matches!(self.stream_type, StreamType::Utility)
    }
}

/// Identity of a requested flexible-loopback device: a repeated
/// request with matching params returns the existing device idx
/// rather than creating a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloopParams {
    pub client_types: Vec<ClientType>,
}
