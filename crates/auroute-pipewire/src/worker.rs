// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `RealtimeWorker` implemented over the PipeWire thread's link
//! commands. Real sample mixing is PipeWire's own graph processing
//! thread; this worker's job is only to create/tear down the links
//! that hand a stream's samples to a device's node, which is why
//! `drain_stream` here is a fixed nominal delay rather than a real
//! buffer-fill query (buffer-level introspection is the realtime
//! mixing internals excluded from this engine).

use crate::shared::PwShared;
use crate::thread::PwCommand;
use auroute_core::backend::{BackendFailure, RampRequest, RealtimeWorker};
use auroute_core::Format;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Nominal drain delay reported for a stream with no real buffer to
/// query, matching the reserved-device "already silent" case rather
/// than a hardware ring-buffer depth.
const NOMINAL_DRAIN_MS: u64 = 0;

pub struct PwRealtimeWorker {
    shared: Rc<RefCell<PwShared>>,
    open_devs: HashSet<u32>,
    stream_links: HashMap<u64, Vec<u32>>,
    echo_ref_streams: HashSet<u32>,
}

impl PwRealtimeWorker {
    pub fn new(shared: Rc<RefCell<PwShared>>) -> Self {
        PwRealtimeWorker {
            shared,
            open_devs: HashSet::new(),
            stream_links: HashMap::new(),
            echo_ref_streams: HashSet::new(),
        }
    }
}

impl RealtimeWorker for PwRealtimeWorker {
    fn add_open_dev(&mut self, dev_idx: u32) -> Result<(), BackendFailure> {
        self.open_devs.insert(dev_idx);
        Ok(())
    }

    fn rm_open_dev(&mut self, dev_idx: u32) {
        self.open_devs.remove(&dev_idx);
    }

    fn add_stream(&mut self, stream_id: u64, dev_idxs: &[u32]) -> Result<usize, BackendFailure> {
        let shared = self.shared.borrow();
        let Some(stream_node) = shared.node_for_stream(stream_id) else {
            return Err(BackendFailure::Other);
        };

        let mut attached = 0;
        for &dev_idx in dev_idxs {
            let Some(dev_node) = shared.node_for(dev_idx) else { continue };
            if shared.send(PwCommand::LinkNodes { output_node: stream_node, input_node: dev_node }).is_ok() {
                attached += 1;
            }
        }
        drop(shared);
        self.stream_links.entry(stream_id).or_default().extend(dev_idxs.iter().copied());
        Ok(attached)
    }

    fn disconnect_stream(&mut self, stream_id: u64, dev_idx: Option<u32>) {
        let shared = self.shared.borrow();
        let Some(stream_node) = shared.node_for_stream(stream_id) else { return };

        let targets: Vec<u32> = match dev_idx {
            Some(idx) => vec![idx],
            None => self.stream_links.get(&stream_id).cloned().unwrap_or_default(),
        };
        for dev in &targets {
            if let Some(dev_node) = shared.node_for(*dev) {
                let _ = shared.send(PwCommand::UnlinkNodes { output_node: stream_node, input_node: dev_node });
            }
        }
        drop(shared);

        if let Some(devs) = self.stream_links.get_mut(&stream_id) {
            match dev_idx {
                Some(idx) => devs.retain(|d| *d != idx),
                None => devs.clear(),
            }
        }
    }

    fn drain_stream(&mut self, _stream_id: u64) -> u64 {
        NOMINAL_DRAIN_MS
    }

    fn is_dev_open(&self, dev_idx: u32) -> bool {
        self.open_devs.contains(&dev_idx)
    }

    fn dev_start_ramp(&mut self, dev_idx: u32, request: RampRequest) {
        let shared = self.shared.borrow();
        let Some(node_id) = shared.node_for(dev_idx) else { return };
        match request {
            RampRequest::UpUnmute | RampRequest::ResumeMute => {
                let _ = shared.send(PwCommand::SetMute { node_id, muted: false });
            }
            RampRequest::DownMute | RampRequest::SwitchMute => {
                let _ = shared.send(PwCommand::SetMute { node_id, muted: true });
            }
            RampRequest::UpStartPlayback => {
                let _ = shared.send(PwCommand::UpdateActiveNode { node_id, enabled: true });
            }
        }
    }

    fn add_echo_ref_stream(&mut self, ref_dev_idx: u32, _format: Format) -> Result<(), BackendFailure> {
        // Reading the reference device's own graph output for AEC is the
        // realtime mixing graph's job, not this link-management facade's;
        // bookkeeping here only tracks the at-most-one-per-ref-device rule.
        self.echo_ref_streams.insert(ref_dev_idx);
        Ok(())
    }

    fn remove_echo_ref_stream(&mut self, ref_dev_idx: u32) {
        self.echo_ref_streams.remove(&ref_dev_idx);
    }
}
