// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PipeWire-backed implementations of the engine's `DeviceBackend` and
//! `RealtimeWorker` traits, grounded on `sootmix-daemon::audio`'s
//! dedicated-thread PipeWire integration. Card/jack discovery and
//! mixer-style negotiation stay out of scope here: this crate opens
//! and links nodes the daemon has already identified, it does not
//! find them.

mod backend;
mod shared;
mod thread;
mod types;
mod worker;

pub use backend::{DevicePolicy, PwDeviceBackend};
pub use shared::PwShared;
pub use thread::{PwCommand, PwError, PwEvent, PwThread};
pub use types::{MediaClass, PwNode};
pub use worker::PwRealtimeWorker;

use std::cell::RefCell;
use std::rc::Rc;

/// Constructs the PipeWire thread plus matching `DeviceBackend`/
/// `RealtimeWorker` pair over a single shared command/binding table.
pub fn connect() -> Result<(PwDeviceBackend, PwRealtimeWorker, Rc<RefCell<PwShared>>), PwError> {
    let shared = Rc::new(RefCell::new(PwShared::new()?));
    let backend = PwDeviceBackend::new(shared.clone());
    let worker = PwRealtimeWorker::new(shared.clone());
    Ok((backend, worker, shared))
}
