// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device and stream routing engine core.
//!
//! Owns the live topology of audio I/O devices, the set of client
//! streams, and the policy that decides which streams attach to which
//! devices at any moment. Backend-agnostic: callers provide a
//! [`backend::DeviceBackend`] and a [`backend::RealtimeWorker`]; see
//! `auroute-pipewire` for a concrete implementation, or
//! [`testing::MockBackend`]/[`testing::MockWorker`] for tests.

pub mod backend;
pub mod effects;
pub mod engine;
pub mod errors;
pub mod observer;
pub mod registry;
pub mod router;
pub mod snapshot;
pub mod stream_list;
pub mod testing;
pub mod timer;
pub mod types;

pub use backend::{BackendFailure, DeviceBackend, RampRequest, RealtimeWorker, RouterTiming};
pub use engine::Engine;
pub use errors::EngineError;
pub use observer::EngineObserver;
pub use timer::{TimerHandle, TimerService, TimerWheel};
pub use types::{
    ClientType, Device, DeviceState, Direction, Format, Node, NodeType, OpenResult, Stream,
    StreamEffects, StreamType,
};
