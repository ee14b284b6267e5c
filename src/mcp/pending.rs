// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Requests awaiting a reply, keyed by id.
///
/// An entry leaves the table when it is completed or cancelled, whichever
/// comes first.
pub struct PendingRequests<T> {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<T>>>,
}

impl<T> PendingRequests<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self) -> (u64, oneshot::Receiver<T>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(id, tx);
        (id, rx)
    }

    /// Deliver a reply. False if nobody is waiting for `id` any more.
    pub fn complete(&self, id: u64, value: T) -> bool {
        let sender = self.waiting.lock().remove(&id);
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, id: u64) -> bool {
        self.waiting.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}
