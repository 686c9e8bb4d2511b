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

//! The handle table (spec §4.2): a FIFO of every live handle, in
//! registration order. Eviction rounds drain candidates from the front;
//! `register` always appends to the back, so a handle's position reflects
//! how long it has been resident, not how recently it was touched.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use crate::handle::Handle;

#[derive(Default)]
pub struct HandleTable {
    queue: Mutex<VecDeque<Arc<Handle>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly-registered handle to the back of the FIFO.
    pub fn register(&self, handle: Arc<Handle>) {
        self.queue.lock().push_back(handle);
    }

    /// Remove and return up to `n` handles from the front, oldest first.
    /// Returns fewer than `n` if the table holds less.
    pub fn drain_up_to(&self, n: usize) -> Vec<Arc<Handle>> {
        let mut queue = self.queue.lock();
        let n = n.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Remove every handle, oldest first (spec §4.4's `drain_all`).
    pub fn drain_all(&self) -> Vec<Arc<Handle>> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
