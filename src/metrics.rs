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

//! The observability surface (spec §6): monotonic counters, readable
//! in-process, and mirrored to the global `metrics` recorder so a deployed
//! instance can be scraped the same way the rest of the pack's crates are.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge, histogram};

const ORDERING: Ordering = Ordering::Relaxed;

/// Counters advisory to the contract (spec §4.1's "Performance note") but
/// useful for tests and operators. All fields are monotonic except
/// `rounds_in_flight`, which tracks `P` for the gauge export.
#[derive(Default)]
pub struct Metrics {
    handles_cleared: AtomicU64,
    nodes_decoded: AtomicU64,
    decode_time_ns: AtomicU64,
    rounds_started: AtomicU64,
    rounds_completed: AtomicU64,
    chunks_dispatched: AtomicU64,
    persistence_failures: AtomicU64,
    unencodable_skips: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_handle_cleared(&self) {
        self.handles_cleared.fetch_add(1, ORDERING);
        counter!("noderef_handles_cleared_total").increment(1);
    }

    pub fn record_decode(&self) {
        self.nodes_decoded.fetch_add(1, ORDERING);
        counter!("noderef_nodes_decoded_total").increment(1);
    }

    pub fn record_decode_time(&self, nanos: u64) {
        self.decode_time_ns.fetch_add(nanos, ORDERING);
        histogram!("noderef_decode_duration_ns").record(nanos as f64);
    }

    pub fn record_round_started(&self, in_flight: usize) {
        self.rounds_started.fetch_add(1, ORDERING);
        gauge!("noderef_rounds_in_flight").set(in_flight as f64);
        counter!("noderef_rounds_started_total").increment(1);
    }

    pub fn record_round_completed(&self, in_flight: usize) {
        self.rounds_completed.fetch_add(1, ORDERING);
        gauge!("noderef_rounds_in_flight").set(in_flight as f64);
        counter!("noderef_rounds_completed_total").increment(1);
    }

    pub fn record_chunk_dispatched(&self) {
        self.chunks_dispatched.fetch_add(1, ORDERING);
        counter!("noderef_chunks_dispatched_total").increment(1);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, ORDERING);
        counter!("noderef_persistence_failures_total").increment(1);
    }

    pub fn record_unencodable_skip(&self) {
        self.unencodable_skips.fetch_add(1, ORDERING);
        counter!("noderef_unencodable_skips_total").increment(1);
    }

    pub fn handles_cleared(&self) -> u64 {
        self.handles_cleared.load(ORDERING)
    }

    pub fn nodes_decoded(&self) -> u64 {
        self.nodes_decoded.load(ORDERING)
    }

    pub fn decode_time_ns(&self) -> u64 {
        self.decode_time_ns.load(ORDERING)
    }

    pub fn rounds_started(&self) -> u64 {
        self.rounds_started.load(ORDERING)
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(ORDERING)
    }

    pub fn chunks_dispatched(&self) -> u64 {
        self.chunks_dispatched.load(ORDERING)
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(ORDERING)
    }

    pub fn unencodable_skips(&self) -> u64 {
        self.unencodable_skips.load(ORDERING)
    }
}
