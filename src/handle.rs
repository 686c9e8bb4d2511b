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

//! A node's stable identity (spec §3, §4.5): an id and label that survive
//! eviction, plus an optional materialized body. Adjacency inside a body is
//! kept as raw [`NodeId`]s, not references to other handles, so the handle
//! table and the bodies it holds never form an ownership cycle: a body
//! never owns another handle (spec §9).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::{
    codec,
    error::{CodecOrPersistence, ManagerError},
    manager::ManagerCore,
    model::{Label, NodeBody, NodeId},
};

struct HandleInner {
    body: Option<NodeBody<NodeId>>,
    dirty: bool,
}

/// A node's identity plus whatever materialized state it currently holds.
/// See spec §3 for the invariants this type upholds.
pub struct Handle {
    id: NodeId,
    label: Label,
    storage_key: NodeId,
    inner: Mutex<HandleInner>,
    core: Mutex<Weak<ManagerCore>>,
}

impl Handle {
    /// A handle with no materialized body and no owning manager, useful in
    /// isolation (handle-table tests) or before a handle is attached to a
    /// [`crate::manager::ReferenceManager`].
    pub fn new(id: NodeId, label: impl Into<Label>) -> Self {
        Self {
            id,
            label: label.into(),
            storage_key: id,
            inner: Mutex::new(HandleInner { body: None, dirty: false }),
            core: Mutex::new(Weak::new()),
        }
    }

    /// A freshly materialized, resident handle (the allocator path: body
    /// present, not yet known to be persisted, so it starts dirty).
    pub fn with_body(id: NodeId, label: impl Into<Label>, body: NodeBody<NodeId>) -> Self {
        Self {
            id,
            label: label.into(),
            storage_key: id,
            inner: Mutex::new(HandleInner {
                body: Some(body),
                dirty: true,
            }),
            core: Mutex::new(Weak::new()),
        }
    }

    pub(crate) fn attach_core(&self, core: Weak<ManagerCore>) {
        *self.core.lock() = core;
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn storage_key(&self) -> NodeId {
        self.storage_key
    }

    /// Observe body presence. Racy by design (spec §4.5): only meant for
    /// worker skip-logic, never for correctness-critical decisions.
    pub fn is_set(&self) -> bool {
        self.inner.lock().body.is_some()
    }

    pub fn mark_dirty(&self) {
        self.inner.lock().dirty = true;
    }

    /// Replace the resident body directly, marking the handle dirty. Used
    /// by the allocator to apply a mutation to an already-loaded body.
    pub fn set_body(&self, body: NodeBody<NodeId>) {
        let mut inner = self.inner.lock();
        inner.body = Some(body);
        inner.dirty = true;
    }

    /// Attach a body known to already match what's persisted (a fresh load,
    /// or a handle seeded directly from a known-clean snapshot), leaving
    /// the dirty bit clear.
    pub(crate) fn set_body_clean(&self, body: NodeBody<NodeId>) {
        let mut inner = self.inner.lock();
        inner.body = Some(body);
        inner.dirty = false;
    }

    /// `(body, dirty)` as of this instant, for the scheduler's worker body
    /// to decide whether an encode-and-put is needed. Does not clear
    /// anything; see [`Self::clear`].
    pub(crate) fn snapshot(&self) -> (Option<NodeBody<NodeId>>, bool) {
        let inner = self.inner.lock();
        (inner.body.clone(), inner.dirty)
    }

    /// Detach the body. Called by the scheduler only, after the body has
    /// been persisted (or, in dirty-only mode, was already known clean).
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.body = None;
        inner.dirty = false;
    }

    /// Return the resident body, loading it from the persistence port and
    /// re-registering the handle if it was evicted (spec §4.5).
    pub async fn get_or_load(self: &Arc<Self>) -> Result<NodeBody<NodeId>, ManagerError> {
        if let Some(body) = self.inner.lock().body.clone() {
            return Ok(body);
        }

        let core = self.core.lock().upgrade().ok_or(ManagerError::Shutdown)?;

        let bytes = core
            .persistence
            .get(self.storage_key)
            .await
            .map_err(CodecOrPersistence::from)
            .map_err(|source| ManagerError::LoadFailed { id: self.id, source })?
            .ok_or_else(|| ManagerError::LoadFailed {
                id: self.id,
                source: CodecOrPersistence::from(crate::error::CodecError::CorruptFormat(format!(
                    "no persisted bytes for node {}",
                    self.id
                ))),
            })?;

        let decode_started = std::time::Instant::now();
        let body = codec::decode_raw(&bytes)
            .map_err(CodecOrPersistence::from)
            .map_err(|source| ManagerError::LoadFailed { id: self.id, source })?;
        let decode_elapsed = decode_started.elapsed();

        self.set_body_clean(body.clone());

        core.table.register(Arc::clone(self));
        core.metrics.record_decode();
        core.metrics.record_decode_time(decode_elapsed.as_nanos() as u64);

        Ok(body)
    }
}
