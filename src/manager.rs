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

//! The reference manager: the facade an allocator actually talks to (spec
//! §6's allocator interface), wiring together the handle table, the
//! persistence port, and the eviction scheduler.

use std::{future::Future, sync::Arc};

use crate::{
    codec,
    error::{BackpressureError, CodecOrPersistence, ManagerError},
    handle::Handle,
    metrics::Metrics,
    model::{Label, NodeBody, NodeId},
    persistence::PersistencePort,
    scheduler::{EvictionScheduler, SchedulerConfig},
    table::HandleTable,
};

/// Shared state every handle holds a weak back-reference to, so a loaded
/// handle can re-register itself and reach the persistence port without
/// the manager needing to track every handle it ever created.
pub(crate) struct ManagerCore {
    pub(crate) table: Arc<HandleTable>,
    pub(crate) persistence: Arc<dyn PersistencePort>,
    pub(crate) metrics: Arc<Metrics>,
}

/// Top-level entry point: `register`, `apply_backpressure`, `clear_all`,
/// `close`, plus `rebuild_from_port` for startup (spec §6, SPEC_FULL.md §G).
#[derive(Clone)]
pub struct ReferenceManager {
    core: Arc<ManagerCore>,
    scheduler: EvictionScheduler,
}

impl ReferenceManager {
    pub fn new(persistence: Arc<dyn PersistencePort>, config: SchedulerConfig) -> Self {
        let table = Arc::new(HandleTable::new());
        let metrics = Arc::new(Metrics::new());

        let core = Arc::new(ManagerCore {
            table: table.clone(),
            persistence: persistence.clone(),
            metrics: metrics.clone(),
        });
        let scheduler = EvictionScheduler::new(table, persistence, metrics, config);

        Self { core, scheduler }
    }

    /// Register a freshly materialized node body and return its handle.
    pub fn register(&self, id: NodeId, label: impl Into<Label>, body: NodeBody<NodeId>) -> Arc<Handle> {
        let handle = Arc::new(Handle::with_body(id, label, body));
        handle.attach_core(Arc::downgrade(&self.core));
        self.core.table.register(handle.clone());
        handle
    }

    /// Block (cooperatively) until no eviction round is in flight. See
    /// [`EvictionScheduler::apply_backpressure`].
    pub async fn apply_backpressure(&self, cancel: impl Future<Output = ()>) -> Result<(), BackpressureError> {
        self.scheduler.apply_backpressure(cancel).await
    }

    /// Heap-pressure callback (spec §6's consumed interface).
    pub fn on_heap_above_threshold(&self) {
        self.scheduler.on_heap_above_threshold();
    }

    /// Evict every resident handle, blocking until the table is empty.
    pub async fn clear_all(&self) -> Result<(), BackpressureError> {
        self.scheduler.drain_all().await
    }

    /// Cooperative shutdown.
    pub async fn close(&self) {
        self.scheduler.close().await;
    }

    pub fn metrics(&self) -> &Metrics {
        &self.core.metrics
    }

    pub fn table_size(&self) -> usize {
        self.core.table.len()
    }

    /// Startup rebuild (SPEC_FULL.md §G): for each candidate id the caller
    /// already knows about (the persistence port has no enumeration
    /// operation, per spec §4.3), read only the `(id, label)` prefix via
    /// `decode_ref` and produce an evicted handle; no body is loaded, so
    /// this does not touch the handle table. The caller is expected to
    /// install the returned handles into the owning graph's external
    /// id→handle map.
    pub async fn rebuild_from_port(
        &self,
        ids: impl IntoIterator<Item = NodeId>,
    ) -> Result<Vec<Arc<Handle>>, ManagerError> {
        let mut handles = Vec::new();
        for id in ids {
            let bytes = self
                .core
                .persistence
                .get(id)
                .await
                .map_err(CodecOrPersistence::from)
                .map_err(|source| ManagerError::LoadFailed { id, source })?;

            let Some(bytes) = bytes else {
                continue;
            };

            let (rebuilt_id, label) = codec::decode_ref(&bytes)
                .map_err(CodecOrPersistence::from)
                .map_err(|source| ManagerError::LoadFailed { id, source })?;

            let handle = Arc::new(Handle::new(rebuilt_id, label));
            handle.attach_core(Arc::downgrade(&self.core));
            handles.push(handle);
        }
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPort;

    fn manager(port: Arc<InMemoryPort>) -> ReferenceManager {
        ReferenceManager::new(port, SchedulerConfig::default())
    }

    #[test_log::test(tokio::test)]
    async fn register_then_get_or_load_returns_resident_body() {
        let port = Arc::new(InMemoryPort::new());
        let mgr = manager(port);
        let handle = mgr.register(1, "T", NodeBody::new(1, "T"));
        let body = handle.get_or_load().await.unwrap();
        assert_eq!(body.id, 1);
        mgr.close().await;
    }

    #[test_log::test(tokio::test)]
    async fn reload_after_eviction_round_trips_through_port() {
        let port = Arc::new(InMemoryPort::new());
        let mgr = manager(port.clone());
        let handle = mgr.register(7, "T", NodeBody::new(7, "T"));

        mgr.on_heap_above_threshold();
        mgr.apply_backpressure(std::future::pending::<()>()).await.unwrap();
        assert!(!handle.is_set());
        assert!(port.contains(7));

        let body = handle.get_or_load().await.unwrap();
        assert_eq!(body.id, 7);
        assert!(handle.is_set());
        assert_eq!(mgr.table_size(), 1);
        assert_eq!(mgr.metrics().nodes_decoded(), 1);
        assert!(mgr.metrics().decode_time_ns() > 0);

        mgr.close().await;
    }

    #[test_log::test(tokio::test)]
    async fn rebuild_from_port_reads_prefix_only() {
        let port = Arc::new(InMemoryPort::new());
        let mgr = manager(port.clone());
        let handle = mgr.register(9, "Person", NodeBody::new(9, "Person"));
        mgr.clear_all().await.unwrap();
        let _ = handle;

        let rebuilt = mgr.rebuild_from_port([9, 404]).await.unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].id(), 9);
        assert_eq!(rebuilt[0].label().as_str(), "Person");
        assert!(!rebuilt[0].is_set());

        mgr.close().await;
    }
}
