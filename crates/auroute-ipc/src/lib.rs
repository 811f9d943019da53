// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared snapshot and DTO types published by the routing engine.
//!
//! These types carry no engine-internal state (no timer handles, no
//! backend references) and are safe to hand to a reader on another
//! thread or serialize across a transport the engine itself does not
//! implement.

use serde::{Deserialize, Serialize};

/// Playback or capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Output,
    Input,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Output => "output",
            Direction::Input => "input",
        }
    }
}

/// Closed vocabulary of node types a client might render differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Speaker,
    Headphone,
    Hdmi,
    Usb,
    Bluetooth,
    Mic,
    Hotword,
    FallbackNormal,
    FallbackAbnormal,
    Floop,
    Unknown,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Speaker => "speaker",
            NodeType::Headphone => "headphone",
            NodeType::Hdmi => "hdmi",
            NodeType::Usb => "usb",
            NodeType::Bluetooth => "bluetooth",
            NodeType::Mic => "mic",
            NodeType::Hotword => "hotword",
            NodeType::FallbackNormal => "fallback_normal",
            NodeType::FallbackAbnormal => "fallback_abnormal",
            NodeType::Floop => "floop",
            NodeType::Unknown => "unknown",
        }
    }
}

/// A potential noise-cancellation provider for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NcProvider {
    Dsp,
    Ap,
    None,
}

/// `audio_effect` bits published on a node's snapshot entry.
///
/// Hand-rolled rather than pulled in via the `bitflags` crate: these
/// four bits are internal-only and never cross an FFI boundary, so a
/// small const-based wrapper keeps the dependency list unchanged from
/// the rest of the workspace. See DESIGN.md for the reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioEffectMask(pub u32);

impl AudioEffectMask {
    pub const NONE: u32 = 0;
    pub const NOISE_CANCELLATION: u32 = 1 << 0;
    pub const ECHO_CANCELLATION: u32 = 1 << 1;
    pub const SR_BT: u32 = 1 << 2;

    pub fn empty() -> Self {
        AudioEffectMask(Self::NONE)
    }

    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// One row of the published device snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub idx: u32,
    pub direction: Direction,
    pub is_enabled: bool,
    pub is_open: bool,
    pub active_node_idx: Option<u32>,
    pub max_supported_channels: u32,
}

/// One row of the published node snapshot, matching the field list the
/// engine fills on every topology or policy change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub iodev_idx: u32,
    pub node_idx: u32,
    pub name: String,
    pub node_type: NodeType,
    pub plugged: bool,
    pub plugged_time_us: u64,
    pub active: bool,
    pub volume: u32,
    pub capture_gain: i32,
    pub ui_gain_scaler: f64,
    pub left_right_swapped: bool,
    pub display_rotation: u32,
    pub stable_id: u32,
    pub active_hotword_model: Option<String>,
    pub number_of_volume_steps: u32,
    pub audio_effect: AudioEffectMask,
}

/// Full published view: capped arrays of devices and nodes, version
/// number bumped on every commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub devices: Vec<DeviceInfo>,
    pub nodes: Vec<NodeInfo>,
    pub dsp_input_effects_blocked: bool,
}

/// Errors the engine's client-control surface can return.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("invalid argument")]
    InvalidArg,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("device is busy")]
    Busy,
    #[error("out of memory")]
    NoMemory,
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("transient condition, retry scheduled")]
    Transient,
    #[error("device backend error: {0}")]
    BackendError(String),
    #[error("operation not supported")]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_effect_mask_set_and_contains() {
        let mut mask = AudioEffectMask::empty();
        assert!(!mask.contains(AudioEffectMask::NOISE_CANCELLATION));
        mask.set(AudioEffectMask::NOISE_CANCELLATION, true);
        assert!(mask.contains(AudioEffectMask::NOISE_CANCELLATION));
        mask.set(AudioEffectMask::NOISE_CANCELLATION, false);
        assert!(!mask.contains(AudioEffectMask::NOISE_CANCELLATION));
    }

    #[test]
    fn direction_as_str_round_trips_intent() {
        assert_eq!(Direction::Output.as_str(), "output");
        assert_eq!(Direction::Input.as_str(), "input");
    }

    #[test]
    fn nc_provider_orders_for_btreeset_use() {
        let mut set = std::collections::BTreeSet::new();
        set.insert(NcProvider::Ap);
        set.insert(NcProvider::Dsp);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![NcProvider::Dsp, NcProvider::Ap]);
    }
}
