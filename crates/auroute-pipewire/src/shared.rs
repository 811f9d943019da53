// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! State shared between `PwDeviceBackend` and `PwRealtimeWorker`: the
//! command channel to the PipeWire thread, the event queue draining
//! it, and the `dev_idx <-> node.id` binding table. Hardware/card
//! probing is out of scope for this crate, so nothing here discovers
//! which node corresponds to which `dev_idx` on its own — the daemon
//! binds them explicitly (typically by matching discovered node names
//! against configured device names) via `bind`.

use crate::thread::{PwCommand, PwError, PwEvent, PwThread};
use std::collections::HashMap;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::warn;

/// How long `PwDeviceBackend::open` waits for `PwEvent::NodeOpened`
/// before giving up and reporting a backend failure. This is a
/// deliberate, disclosed bounded wait on PipeWire control-plane
/// turnaround (proxy binding), not a wait on realtime audio I/O.
pub const OPEN_ACK_TIMEOUT: Duration = Duration::from_millis(250);

pub struct PwShared {
    pub(crate) thread: PwThread,
    pub(crate) event_rx: mpsc::Receiver<PwEvent>,
    pub(crate) dev_to_node: HashMap<u32, u32>,
    pub(crate) node_to_dev: HashMap<u32, u32>,
    pub(crate) stream_to_node: HashMap<u64, u32>,
    pub(crate) links: HashMap<(u64, u32), u32>,
    /// Events that arrived while waiting on a specific ack and didn't
    /// match it; replayed to `poll_events` so nothing is lost.
    pub(crate) backlog: Vec<PwEvent>,
}

impl PwShared {
    pub fn new() -> Result<Self, PwError> {
        let (event_tx, event_rx) = mpsc::channel();
        let thread = PwThread::spawn(event_tx)?;
        Ok(PwShared {
            thread,
            event_rx,
            dev_to_node: HashMap::new(),
            node_to_dev: HashMap::new(),
            stream_to_node: HashMap::new(),
            links: HashMap::new(),
            backlog: Vec::new(),
        })
    }

    /// Binds a stream id (opaque past the client IPC boundary) to the
    /// PipeWire stream node backing it, so `PwRealtimeWorker` can link
    /// it to devices without knowing node ids itself.
    pub fn bind_stream(&mut self, stream_id: u64, node_id: u32) {
        self.stream_to_node.insert(stream_id, node_id);
    }

    pub fn unbind_stream(&mut self, stream_id: u64) {
        self.stream_to_node.remove(&stream_id);
    }

    pub fn node_for_stream(&self, stream_id: u64) -> Option<u32> {
        self.stream_to_node.get(&stream_id).copied()
    }

    /// Binds a router device index to the PipeWire node id that backs
    /// it, replacing any prior binding for either side.
    pub fn bind(&mut self, dev_idx: u32, node_id: u32) {
        if let Some(old_node) = self.dev_to_node.insert(dev_idx, node_id) {
            self.node_to_dev.remove(&old_node);
        }
        self.node_to_dev.insert(node_id, dev_idx);
    }

    pub fn unbind(&mut self, dev_idx: u32) {
        if let Some(node_id) = self.dev_to_node.remove(&dev_idx) {
            self.node_to_dev.remove(&node_id);
        }
    }

    pub fn node_for(&self, dev_idx: u32) -> Option<u32> {
        self.dev_to_node.get(&dev_idx).copied()
    }

    pub fn dev_for_node(&self, node_id: u32) -> Option<u32> {
        self.node_to_dev.get(&node_id).copied()
    }

    pub fn send(&self, cmd: PwCommand) -> Result<(), PwError> {
        self.thread.send(cmd)
    }

    /// Drains every event currently queued, in order, without blocking.
    /// Called by the daemon's main loop to fold `NodeAdded`/`NodeRemoved`
    /// into its own device-discovery bookkeeping.
    pub fn poll_events(&mut self) -> Vec<PwEvent> {
        let mut events: Vec<PwEvent> = self.backlog.drain(..).collect();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Blocks up to `OPEN_ACK_TIMEOUT` for a `NodeOpened` event
    /// matching `node_id`; any other event seen along the way is
    /// stashed in the backlog so `poll_events` still sees it.
    pub(crate) fn wait_for_open_ack(&mut self, node_id: u32) -> Option<bool> {
        let deadline = Instant::now() + OPEN_ACK_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(node_id, "timed out waiting for node open acknowledgment");
                return None;
            }
            match self.event_rx.recv_timeout(remaining) {
                Ok(PwEvent::NodeOpened { node_id: acked, ok }) if acked == node_id => return Some(ok),
                Ok(other) => self.backlog.push(other),
                Err(_) => return None,
            }
        }
    }
}
