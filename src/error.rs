//  Copyright 2024 Foyer Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Error taxonomy (spec §7). Each kind propagates to a specific caller and
//! carries a distinct recovery policy; callers are expected to match on
//! these, not just print them, so variants stay narrow rather than being
//! collapsed into one opaque error type.

use thiserror::Error;

/// Errors produced by the codec (§4.1).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("corrupt node record: {0}")]
    CorruptFormat(String),

    #[error("property value outside the closed tag set: {0}")]
    UnencodableValue(String),
}

/// Errors surfaced by a [`crate::persistence::PersistencePort`] implementation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence port failed for node {id}: {source}")]
    Failed {
        id: crate::model::NodeId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors surfaced to an allocator dereferencing or registering a handle.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("failed to load node {id}: {source}")]
    LoadFailed {
        id: crate::model::NodeId,
        #[source]
        source: CodecOrPersistence,
    },

    #[error("operation attempted after close()")]
    Shutdown,
}

/// Either half of what can go wrong while rehydrating a handle's body.
#[derive(Debug, Error)]
pub enum CodecOrPersistence {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors returned by [`crate::scheduler::EvictionScheduler::apply_backpressure`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackpressureError {
    #[error("backpressure wait was cancelled")]
    Cancelled,

    #[error("backpressure wait exceeded max_backpressure_wait")]
    TimedOut,

    #[error("operation attempted after close()")]
    Shutdown,
}
