// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An `EngineObserver` that just logs; the daemon has no client IPC
//! surface of its own (out of scope), so this is the only consumer of
//! engine notifications until one is wired in.

use auroute_core::observer::EngineObserver;
use auroute_ipc::Direction;
use tracing::info;

pub struct LoggingObserver;

impl EngineObserver for LoggingObserver {
    fn nodes_changed(&mut self) {
        info!("nodes changed");
    }

    fn active_node_changed(&mut self, direction: Direction, node_id: u64) {
        info!(?direction, node_id, "active node changed");
    }

    fn suspend_changed(&mut self, suspended: bool) {
        info!(suspended, "suspend state changed");
    }

    fn hotword_triggered(&mut self, tv_sec: i64, tv_nsec: i64) {
        info!(tv_sec, tv_nsec, "hotword triggered");
    }

    fn underrun(&mut self) {
        tracing::warn!("underrun");
    }

    fn severe_underrun(&mut self) {
        tracing::error!("severe underrun");
    }
}
