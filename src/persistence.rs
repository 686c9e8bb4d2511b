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

//! The persistence port (spec §4.3): the external collaborator this crate
//! writes evicted bodies to and reloads them from. Disk layout, compaction,
//! and device I/O are out of scope here, only the narrow async contract.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{error::PersistenceError, model::NodeId};

/// What the eviction pipeline and the handle's lazy loader need from
/// durable storage. Implementations are expected to be internally
/// concurrent; every method takes `&self`.
///
/// Boxed with `async_trait` rather than a native `async fn` in trait
/// because this core stores the port behind `Arc<dyn PersistencePort>`
/// (manager and scheduler both need to share one without committing to a
/// concrete implementation type), and a trait with a native `async fn`
/// cannot be made into a trait object.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Persist the encoded body for `id`, overwriting any prior value.
    async fn put(&self, id: NodeId, bytes: Vec<u8>) -> Result<(), PersistenceError>;

    /// Fetch the encoded body for `id`, if one has ever been written.
    async fn get(&self, id: NodeId) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Remove any persisted body for `id`. A no-op, not an error, if
    /// nothing was stored.
    async fn delete(&self, id: NodeId) -> Result<(), PersistenceError>;
}

/// An in-memory stand-in for a real `PersistencePort`, for tests. Can be
/// configured to fail `put`/`get` for specific ids so callers can exercise
/// the error-isolation paths in §7/§8 without a real backing store.
#[derive(Default)]
pub struct InMemoryPort {
    state: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    bodies: HashMap<NodeId, Vec<u8>>,
    fail_put: std::collections::HashSet<NodeId>,
    fail_get: std::collections::HashSet<NodeId>,
}

impl InMemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every future `put` for `id` fails until [`Self::clear_failures`].
    pub fn fail_put(&self, id: NodeId) {
        self.state.lock().fail_put.insert(id);
    }

    /// Every future `get` for `id` fails until [`Self::clear_failures`].
    pub fn fail_get(&self, id: NodeId) {
        self.state.lock().fail_get.insert(id);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_put.clear();
        state.fail_get.clear();
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.state.lock().bodies.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn injected_failure(id: NodeId) -> PersistenceError {
    PersistenceError::Failed {
        id,
        source: "injected test failure".into(),
    }
}

#[async_trait]
impl PersistencePort for InMemoryPort {
    async fn put(&self, id: NodeId, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();
        if state.fail_put.contains(&id) {
            return Err(injected_failure(id));
        }
        state.bodies.insert(id, bytes);
        Ok(())
    }

    async fn get(&self, id: NodeId) -> Result<Option<Vec<u8>>, PersistenceError> {
        let state = self.state.lock();
        if state.fail_get.contains(&id) {
            return Err(injected_failure(id));
        }
        Ok(state.bodies.get(&id).cloned())
    }

    async fn delete(&self, id: NodeId) -> Result<(), PersistenceError> {
        self.state.lock().bodies.remove(&id);
        Ok(())
    }
}
