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

use std::sync::Arc;

use noderef::{
    codec,
    model::{NodeBody, Value},
    persistence::InMemoryPort,
    scheduler::SchedulerConfig,
    ReferenceManager,
};

fn sample_body() -> NodeBody {
    let mut body = NodeBody::new(42, "X");
    body.properties.insert("a".to_string(), Value::Int(7));
    body.properties.insert(
        "b".to_string(),
        Value::List(vec![Value::Str("u".to_string()), Value::Str("v".to_string())]),
    );
    body.edge_offsets = vec![0, 2];
    body.adjacency = vec![Value::NodeRef(43), Value::NodeRef(44)];
    body
}

#[test_log::test]
fn round_trip_is_structurally_equal() {
    let body = sample_body();
    let bytes = codec::encode(&body).unwrap();
    let decoded = codec::decode_raw(&bytes).unwrap();
    assert_eq!(body, decoded);
}

#[test_log::test]
fn decode_ref_yields_exactly_id_and_label() {
    let body = sample_body();
    let bytes = codec::encode(&body).unwrap();
    let (id, label) = codec::decode_ref(&bytes).unwrap();
    assert_eq!((id, label), (body.id, body.label));
}

#[test_log::test(tokio::test)]
async fn pressure_eviction_drains_exactly_one_batch() {
    let port = Arc::new(InMemoryPort::new());
    let config = SchedulerConfig {
        batch_size: 100,
        worker_count: 4,
        ..Default::default()
    };
    let mgr = ReferenceManager::new(port.clone(), config);

    for id in 0..250u64 {
        mgr.register(id, "N", NodeBody::new(id, "N"));
    }

    mgr.on_heap_above_threshold();
    mgr.apply_backpressure(std::future::pending::<()>()).await.unwrap();

    assert_eq!(port.len(), 100);
    assert_eq!(mgr.table_size(), 150);

    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn backpressure_releases_only_after_round_completes() {
    let port = Arc::new(InMemoryPort::new());
    let mgr = ReferenceManager::new(port.clone(), SchedulerConfig::default());

    for id in 0..20u64 {
        mgr.register(id, "N", NodeBody::new(id, "N"));
    }

    mgr.on_heap_above_threshold();

    let waiter = {
        let mgr = mgr.clone();
        tokio::spawn(async move { mgr.apply_backpressure(std::future::pending::<()>()).await })
    };

    waiter.await.unwrap().unwrap();
    assert_eq!(port.len(), 20);

    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn reload_of_an_evicted_handle_restores_the_body() {
    let port = Arc::new(InMemoryPort::new());
    let mgr = ReferenceManager::new(port.clone(), SchedulerConfig::default());

    let handle = mgr.register(7, "N", NodeBody::new(7, "N"));
    mgr.clear_all().await.unwrap();
    assert!(!handle.is_set());

    let body = handle.get_or_load().await.unwrap();
    assert_eq!(body.id, 7);
    assert!(handle.is_set());
    assert_eq!(mgr.table_size(), 1);

    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn drain_all_blocks_until_every_handle_is_persisted() {
    let port = Arc::new(InMemoryPort::new());
    let mgr = ReferenceManager::new(port.clone(), SchedulerConfig::default());

    for id in 0..5u64 {
        mgr.register(id, "N", NodeBody::new(id, "N"));
    }

    mgr.clear_all().await.unwrap();

    assert_eq!(mgr.table_size(), 0);
    assert_eq!(port.len(), 5);

    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn error_isolation_leaves_one_handle_resident_and_dirty() {
    let port = Arc::new(InMemoryPort::new());
    port.fail_put(3);
    let mgr = ReferenceManager::new(port.clone(), SchedulerConfig::default());

    let mut handles = Vec::new();
    for id in 0..10u64 {
        handles.push(mgr.register(id, "N", NodeBody::new(id, "N")));
    }

    mgr.on_heap_above_threshold();
    mgr.apply_backpressure(std::future::pending::<()>()).await.unwrap();

    assert_eq!(port.len(), 9);
    assert_eq!(mgr.table_size(), 1);
    assert!(handles[3].is_set());

    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn heap_pressure_on_empty_table_spawns_no_work() {
    let port = Arc::new(InMemoryPort::new());
    let mgr = ReferenceManager::new(port.clone(), SchedulerConfig::default());

    mgr.on_heap_above_threshold();
    mgr.apply_backpressure(std::future::pending::<()>()).await.unwrap();

    assert_eq!(port.len(), 0);
    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn drain_all_on_empty_table_returns_immediately() {
    let port = Arc::new(InMemoryPort::new());
    let mgr = ReferenceManager::new(port, SchedulerConfig::default());
    mgr.clear_all().await.unwrap();
    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn batch_size_larger_than_table_drains_everything_in_one_round() {
    let port = Arc::new(InMemoryPort::new());
    let config = SchedulerConfig {
        batch_size: 1_000,
        ..Default::default()
    };
    let mgr = ReferenceManager::new(port.clone(), config);

    for id in 0..10u64 {
        mgr.register(id, "N", NodeBody::new(id, "N"));
    }

    mgr.on_heap_above_threshold();
    mgr.apply_backpressure(std::future::pending::<()>()).await.unwrap();

    assert_eq!(mgr.table_size(), 0);
    assert_eq!(port.len(), 10);

    mgr.close().await;
}

#[test_log::test(tokio::test)]
async fn rebuild_from_port_restores_identity_without_bodies() {
    let port = Arc::new(InMemoryPort::new());
    let mgr = ReferenceManager::new(port.clone(), SchedulerConfig::default());

    mgr.register(1, "Person", NodeBody::new(1, "Person"));
    mgr.register(2, "Person", NodeBody::new(2, "Person"));
    mgr.clear_all().await.unwrap();

    let rebuilt = mgr.rebuild_from_port(1..=3).await.unwrap();
    assert_eq!(rebuilt.len(), 2);
    assert!(rebuilt.iter().all(|h| !h.is_set()));

    mgr.close().await;
}
