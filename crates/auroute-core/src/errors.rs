// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-concern error enums. Only the client-control surface on `Engine`
//! returns `auroute_ipc::EngineError`; everything below it is narrower
//! and gets folded into that at the boundary (see §5.2 of SPEC_FULL).

use thiserror::Error;

pub use auroute_ipc::EngineError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device already exists")]
    AlreadyExists,
    #[error("device direction does not match registry direction")]
    WrongDirection,
    #[error("device not found")]
    NotFound,
    #[error("device is open")]
    Busy,
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyExists => EngineError::AlreadyExists,
            RegistryError::WrongDirection => EngineError::InvalidArg,
            RegistryError::NotFound => EngineError::NotFound,
            RegistryError::Busy => EngineError::Busy,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("no device is or will be attached")]
    NoDevice,
    #[error("backend reported an I/O failure")]
    Io,
    #[error("known transient hand-off in progress")]
    Transient,
    #[error("device backend open failure")]
    BackendError,
    #[error("operation not supported by this device")]
    Unsupported,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<RouterError> for EngineError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::NoDevice => EngineError::NotFound,
            RouterError::Io => EngineError::IoError("worker attach failed".into()),
            RouterError::Transient => EngineError::Transient,
            RouterError::BackendError => EngineError::BackendError("device open failed".into()),
            RouterError::Unsupported => EngineError::Unsupported,
            RouterError::Registry(r) => r.into(),
        }
    }
}
