//! Chaining hash table with incremental rehash.
//!
//! Two sub-tables coexist while a rehash is in flight: inserts always go to
//! `newer`, lookups check both, and every insert or lookup migrates a
//! bounded number of chain heads from `older` until it drains. No single
//! operation ever pays for the whole table.

use intrusive_collections::LinkedList;

use crate::entry::{Entry, EntryAdapter};

/// Rehash once a sub-table averages this many keys per bucket.
const K_MAX_LOAD_FACTOR: usize = 8;
/// Chain-head moves per operation while a rehash is in flight.
const K_REHASHING_WORK: usize = 128;

const K_INITIAL_BUCKETS: usize = 16;

pub fn str_hash(data: &[u8]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
struct HTab {
    tab: Vec<LinkedList<EntryAdapter>>,
    mask: usize,
    size: usize,
}

impl HTab {
    fn new(n_buckets: usize) -> Self {
        assert!(n_buckets.is_power_of_two());
        let tab = (0..n_buckets)
            .map(|_| LinkedList::new(EntryAdapter::new()))
            .collect();
        Self { tab, mask: n_buckets - 1, size: 0 }
    }

    fn insert(&mut self, entry: Box<Entry>) {
        let pos = (entry.hcode as usize) & self.mask;
        self.tab[pos].push_front(entry);
        self.size += 1;
    }

    fn lookup(&self, hcode: u64, key: &[u8]) -> Option<&Entry> {
        let bucket = &self.tab[(hcode as usize) & self.mask];
        bucket.iter().find(|e| e.hcode == hcode && &e.key[..] == key)
    }

    fn detach(&mut self, hcode: u64, key: &[u8]) -> Option<Box<Entry>> {
        let pos = (hcode as usize) & self.mask;
        let mut cur = self.tab[pos].front_mut();
        while let Some(e) = cur.get() {
            if e.hcode == hcode && &e.key[..] == key {
                let entry = cur.remove();
                self.size -= 1;
                return entry;
            }
            cur.move_next();
        }
        None
    }

    fn take_front(&mut self, slot: usize) -> Option<Box<Entry>> {
        let entry = self.tab[slot].front_mut().remove();
        if entry.is_some() {
            self.size -= 1;
        }
        entry
    }

    fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.tab.iter().flat_map(|bucket| bucket.iter())
    }
}

#[derive(Debug)]
pub struct HMap {
    newer: HTab,
    older: Option<HTab>,
    migrate_pos: usize,
}

impl Default for HMap {
    fn default() -> Self {
        Self::new()
    }
}

impl HMap {
    pub fn new() -> Self {
        Self { newer: HTab::new(K_INITIAL_BUCKETS), older: None, migrate_pos: 0 }
    }

    pub fn lookup(&mut self, key: &[u8]) -> Option<&Entry> {
        self.help_rehashing();
        let hcode = str_hash(key);
        if let Some(e) = self.newer.lookup(hcode, key) {
            return Some(e);
        }
        self.older.as_ref().and_then(|o| o.lookup(hcode, key))
    }

    pub fn insert(&mut self, entry: Box<Entry>) {
        self.newer.insert(entry);
        if self.older.is_none() {
            let threshold = (self.newer.mask + 1) * K_MAX_LOAD_FACTOR;
            if self.newer.size >= threshold {
                self.trigger_rehashing();
            }
        }
        self.help_rehashing();
    }

    pub fn delete(&mut self, key: &[u8]) -> Option<Box<Entry>> {
        let hcode = str_hash(key);
        if let Some(e) = self.newer.detach(hcode, key) {
            return Some(e);
        }
        self.older.as_mut().and_then(|o| o.detach(hcode, key))
    }

    pub fn size(&self) -> usize {
        self.newer.size + self.older.as_ref().map_or(0, |o| o.size)
    }

    /// Every key in both sub-tables; iteration covers every bucket.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.newer
            .iter()
            .chain(self.older.iter().flat_map(|o| o.iter()))
    }

    #[cfg(test)]
    fn is_rehashing(&self) -> bool {
        self.older.is_some()
    }

    fn trigger_rehashing(&mut self) {
        let capacity = (self.newer.mask + 1) * 2;
        self.older = Some(std::mem::replace(&mut self.newer, HTab::new(capacity)));
        self.migrate_pos = 0;
    }

    // Move up to K_REHASHING_WORK chain heads from older to newer, skipping
    // drained slots; release the old table once it empties.
    fn help_rehashing(&mut self) {
        let Some(older) = &mut self.older else {
            return;
        };
        let mut nwork = 0;
        while nwork < K_REHASHING_WORK && older.size > 0 {
            if older.tab[self.migrate_pos].is_empty() {
                self.migrate_pos += 1;
                continue;
            }
            let entry = older
                .take_front(self.migrate_pos)
                .expect("non-empty bucket yields an entry");
            self.newer.insert(entry);
            nwork += 1;
        }
        if older.size == 0 {
            self.older = None;
        }
    }
}
