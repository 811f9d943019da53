// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Snapshot publisher (§4.8): serializes live devices/nodes into a
//! shared view on every topology or policy change, framed by a
//! prepare/fill/commit sequence so readers on another thread (via
//! `Arc`) never observe a half-written snapshot.

use crate::effects::EffectEvaluator;
use crate::registry::DeviceRegistry;
use auroute_ipc::{AudioEffectMask, DeviceInfo, Direction, NodeInfo, Snapshot};
use std::sync::{Arc, RwLock};

/// Maximum devices/nodes copied into a single snapshot. Matches the
/// "counts capped at a fixed maximum" rule in §6; callers with more
/// live devices than this will see the first `MAX_ENTRIES` in registry
/// order and nothing else.
pub const MAX_ENTRIES: usize = 256;

pub struct SnapshotPublisher {
    current: RwLock<Arc<Snapshot>>,
    version: u64,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        SnapshotPublisher {
            current: RwLock::new(Arc::new(Snapshot::default())),
            version: 0,
        }
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().expect("snapshot lock poisoned").clone()
    }

    /// Builds a fresh snapshot from the registry and effect evaluator
    /// and commits it, bumping `version`. The build happens entirely
    /// against owned, cloned data before the lock is taken, so the
    /// write-lock hold time is just the `Arc` swap.
    pub fn publish(&mut self, registry: &DeviceRegistry, effects: &EffectEvaluator, dsp_allowed: bool, ap_allowed: bool) {
        let mut devices = Vec::new();
        let mut nodes = Vec::new();

        for direction in [Direction::Output, Direction::Input] {
            for dev in registry.iter(direction) {
                if devices.len() >= MAX_ENTRIES {
                    break;
                }
                devices.push(DeviceInfo {
                    idx: dev.idx,
                    direction,
                    is_enabled: dev.is_enabled,
                    is_open: dev.is_open(),
                    active_node_idx: dev.active_node_idx,
                    max_supported_channels: dev.max_supported_channels,
                });

                for node in &dev.nodes {
                    if nodes.len() >= MAX_ENTRIES {
                        break;
                    }
                    let desired = effects.desired_nc_provider(&node.nc_providers, dsp_allowed, ap_allowed);
                    let mut audio_effect = AudioEffectMask::empty();
                    audio_effect.set(
                        AudioEffectMask::NOISE_CANCELLATION,
                        desired.is_some() && !effects.blocked(),
                    );
                    audio_effect.set(AudioEffectMask::ECHO_CANCELLATION, !effects.blocked());

                    nodes.push(NodeInfo {
                        iodev_idx: dev.idx,
                        node_idx: node.idx,
                        name: node.name.clone(),
                        node_type: node.node_type,
                        plugged: node.plugged,
                        plugged_time_us: node.plugged_time_us,
                        active: dev.active_node_idx == Some(node.idx),
                        volume: node.volume,
                        capture_gain: node.capture_gain,
                        ui_gain_scaler: node.ui_gain_scaler,
                        left_right_swapped: node.left_right_swapped,
                        display_rotation: node.display_rotation,
                        stable_id: node.stable_id,
                        active_hotword_model: node.active_hotword_model.clone(),
                        number_of_volume_steps: node.number_of_volume_steps,
                        audio_effect,
                    });
                }
            }
        }

        self.version += 1;
        let snapshot = Arc::new(Snapshot {
            version: self.version,
            devices,
            nodes,
            dsp_input_effects_blocked: effects.blocked(),
        });
        *self.current.write().expect("snapshot lock poisoned") = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Device, Direction as CoreDirection};

    #[test]
    fn publish_bumps_version_each_time() {
        let mut pub_ = SnapshotPublisher::new();
        let registry = DeviceRegistry::new();
        let effects = EffectEvaluator::new();
        pub_.publish(&registry, &effects, true, true);
        let v1 = pub_.current().version;
        pub_.publish(&registry, &effects, true, true);
        let v2 = pub_.current().version;
        assert_eq!(v2, v1 + 1);
    }

    #[test]
    fn devices_and_nodes_survive_a_round_trip() {
        let mut registry = DeviceRegistry::new();
        let mut dev = Device::new(0, CoreDirection::Output, 2);
        dev.is_enabled = true;
        let idx = registry.add_output(dev).unwrap();
        let effects = EffectEvaluator::new();
        let mut publisher = SnapshotPublisher::new();
        publisher.publish(&registry, &effects, true, true);
        let snap = publisher.current();
        assert_eq!(snap.devices.len(), 1);
        assert_eq!(snap.devices[0].idx, idx);
    }
}
