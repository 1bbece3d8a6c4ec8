//! The keyspace: the entry table plus the expiry heap and the destructor
//! worker pool, with the operations that have to keep all three coherent.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use tracing::debug;

use crate::entry::{Entry, Value};
use crate::hashtable::HMap;
use crate::heap::TtlHeap;
use crate::threadpool::ThreadPool;

/// Sorted sets above this member count are destroyed on the worker pool.
const K_LARGE_CONTAINER_SIZE: usize = 1000;
/// Expired entries reaped per timer tick.
const K_MAX_WORKS: usize = 2000;

const K_NUM_WORKERS: usize = 4;

/// Milliseconds on the monotonic clock, from an arbitrary process-start
/// origin. All deadlines in the server are absolute values of this clock.
pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

#[derive(Debug)]
pub struct Db {
    pub map: HMap,
    pub heap: TtlHeap,
    pool: ThreadPool,
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    pub fn new() -> Self {
        Self {
            map: HMap::new(),
            heap: TtlHeap::new(),
            pool: ThreadPool::new(K_NUM_WORKERS),
        }
    }

    /// Remove a key and tear its entry down. Returns whether it existed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.map.delete(key) {
            Some(entry) => {
                self.dispose(entry);
                true
            }
            None => false,
        }
    }

    /// Destroy an entry that is already out of the keyspace. The TTL is
    /// dropped first so the heap never holds a reference to a dead entry;
    /// a large sorted set is handed to the worker pool, which owns it from
    /// that point on.
    pub fn dispose(&mut self, mut entry: Box<Entry>) {
        if let Some(pos) = entry.heap_pos.get() {
            self.heap.delete(pos);
        }
        let value = std::mem::replace(&mut entry.value, Value::Str(Vec::new()));
        if let Value::ZSet(mut zset) = value {
            if zset.len() > K_LARGE_CONTAINER_SIZE {
                debug!(members = zset.len(), "offloading sorted-set teardown");
                self.pool.submit(move || zset.clear());
            }
        }
    }

    /// Reap entries whose deadline has passed, up to the per-tick cap.
    pub fn process_expired(&mut self, now_ms: u64) {
        let mut nworks = 0;
        while nworks < K_MAX_WORKS {
            let key = match self.heap.peek() {
                Some(top) if top.deadline_ms <= now_ms => Arc::clone(&top.key),
                _ => break,
            };
            debug!(key = %String::from_utf8_lossy(&key), "ttl expired");
            match self.map.delete(&key) {
                // dispose pops the heap top through the entry's own cell
                Some(entry) => self.dispose(entry),
                None => self.heap.delete(0),
            }
            nworks += 1;
        }
    }
}
