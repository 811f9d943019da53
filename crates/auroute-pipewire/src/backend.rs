// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `DeviceBackend` implemented against the PipeWire thread's command
//! channel. Use-case policy (dsp aec capability, noise cancellation
//! support, device grouping) is read from per-node properties rather
//! than probed, since UCM/jack-monitoring is out of scope here; the
//! daemon is expected to populate these from its own configuration.

use crate::shared::PwShared;
use crate::thread::PwCommand;
use auroute_core::backend::{BackendFailure, DeviceBackend};
use auroute_core::types::{Format, Stream};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::warn;

/// Per-device policy facts the router asks the backend for. Grounded
/// on `sootmix-daemon`'s node property lookups (`media.class`,
/// `node.group`, vendor-specific DSP hints), but sourced here from
/// explicit configuration since this crate does no hardware probing.
#[derive(Debug, Clone, Default)]
pub struct DevicePolicy {
    pub group: Vec<u32>,
    pub dsp_aec_use_case: bool,
    pub supports_nc: bool,
}

pub struct PwDeviceBackend {
    shared: Rc<RefCell<PwShared>>,
    policies: HashMap<u32, DevicePolicy>,
    hotword_models: HashMap<(u32, u32), String>,
}

impl PwDeviceBackend {
    pub fn new(shared: Rc<RefCell<PwShared>>) -> Self {
        PwDeviceBackend {
            shared,
            policies: HashMap::new(),
            hotword_models: HashMap::new(),
        }
    }

    pub fn set_policy(&mut self, dev_idx: u32, policy: DevicePolicy) {
        self.policies.insert(dev_idx, policy);
    }
}

impl DeviceBackend for PwDeviceBackend {
    fn open(&mut self, dev_idx: u32, _cb_threshold: u32, format: Format) -> Result<(), BackendFailure> {
        let mut shared = self.shared.borrow_mut();
        let Some(node_id) = shared.node_for(dev_idx) else {
            warn!(dev_idx, "open requested for device with no bound node");
            return Err(BackendFailure::Other);
        };

        shared
            .send(PwCommand::OpenNode { node_id, channels: format.num_channels, rate: format.frame_rate })
            .map_err(|_| BackendFailure::Io)?;

        match shared.wait_for_open_ack(node_id) {
            Some(true) => Ok(()),
            Some(false) => Err(BackendFailure::Other),
            None => Err(BackendFailure::Transient),
        }
    }

    fn close(&mut self, dev_idx: u32) {
        let shared = self.shared.borrow();
        if let Some(node_id) = shared.node_for(dev_idx) {
            let _ = shared.send(PwCommand::CloseNode { node_id });
        }
    }

    fn set_volume(&mut self, dev_idx: u32, volume: u32) {
        let shared = self.shared.borrow();
        if let Some(node_id) = shared.node_for(dev_idx) {
            let fraction = (volume.min(100) as f32) / 100.0;
            let _ = shared.send(PwCommand::SetVolume { node_id, volume: fraction });
        }
    }

    fn set_mute(&mut self, dev_idx: u32, muted: bool) {
        let shared = self.shared.borrow();
        if let Some(node_id) = shared.node_for(dev_idx) {
            let _ = shared.send(PwCommand::SetMute { node_id, muted });
        }
    }

    fn update_active_node(&mut self, dev_idx: u32, _node_idx: u32, enabled: bool) {
        let shared = self.shared.borrow();
        if let Some(node_id) = shared.node_for(dev_idx) {
            let _ = shared.send(PwCommand::UpdateActiveNode { node_id, enabled });
        }
    }

    fn set_swap_mode_for_node(&mut self, _dev_idx: u32, _node_idx: u32, _enable: bool) -> Result<(), BackendFailure> {
        // Left/right swap is a mixer-side channel remap; nothing in the
        // routing engine's PipeWire thread touches it today.
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
        self.policies.get(&dev_idx).map(|p| p.group.clone()).unwrap_or_else(|| vec![dev_idx])
    }

    fn is_dsp_aec_use_case(&self, dev_idx: u32, _node_idx: u32) -> bool {
        self.policies.get(&dev_idx).is_some_and(|p| p.dsp_aec_use_case)
    }

    fn supports_noise_cancellation(&self, dev_idx: u32, _node_idx: u32) -> bool {
        self.policies.get(&dev_idx).is_some_and(|p| p.supports_nc)
    }
}
