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

//! A reference manager and eviction pipeline for an in-memory property
//! graph with disk overflow.
//!
//! Nodes are addressed through a stable [`Handle`](handle::Handle) that
//! survives eviction: dereferencing it lazily rehydrates the node from
//! whatever [`PersistencePort`](persistence::PersistencePort) backs it.
//! Under heap pressure, the [`EvictionScheduler`](scheduler::EvictionScheduler)
//! drains the [`HandleTable`](table::HandleTable), serializes dirty bodies
//! through the [`codec`], and hands them to the persistence port before
//! detaching them from their handles.
//!
//! The graph query layer, the property-graph schema surface, the
//! persistence engine's implementation, and heap-usage sampling are all
//! external collaborators; this crate only implements the core that glues
//! them together.

pub mod codec;
pub mod error;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod scheduler;
pub mod table;

pub use error::{BackpressureError, CodecError, CodecOrPersistence, ManagerError, PersistenceError};
pub use handle::Handle;
pub use manager::ReferenceManager;
pub use metrics::Metrics;
pub use model::{Label, NodeBody, NodeId, RawValue, Value};
pub use persistence::PersistencePort;
pub use scheduler::{EvictionMode, EvictionScheduler, SchedulerConfig};
pub use table::HandleTable;
