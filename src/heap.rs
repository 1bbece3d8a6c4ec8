//! Binary min-heap of absolute expiry deadlines.
//!
//! Every item shares a position cell with the entry that owns the TTL;
//! each time an item moves, its new index is written through that cell, so
//! the owner can always find (and remove or reschedule) its own deadline
//! in O(log n). `None` in the cell means the owner has no TTL.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

pub type HeapPos = Rc<Cell<Option<usize>>>;

#[derive(Debug, Clone)]
pub struct HeapItem {
    pub deadline_ms: u64,
    pub key: Arc<[u8]>,
    pos: HeapPos,
}

impl HeapItem {
    pub fn new(deadline_ms: u64, key: Arc<[u8]>, pos: HeapPos) -> Self {
        Self { deadline_ms, key, pos }
    }
}

fn parent(pos: usize) -> usize {
    (pos + 1) / 2 - 1
}

fn left(pos: usize) -> usize {
    pos * 2 + 1
}

fn right(pos: usize) -> usize {
    pos * 2 + 2
}

#[derive(Debug, Default)]
pub struct TtlHeap {
    items: Vec<HeapItem>,
}

impl TtlHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&HeapItem> {
        self.items.first()
    }

    pub fn deadline(&self, pos: usize) -> u64 {
        self.items[pos].deadline_ms
    }

    /// Insert or reschedule. The item's position cell decides: a live
    /// position overwrites in place, anything else appends.
    pub fn upsert(&mut self, item: HeapItem) {
        match item.pos.get() {
            Some(pos) if pos < self.items.len() => {
                self.items[pos] = item;
                self.update(pos);
            }
            _ => {
                let pos = self.items.len();
                item.pos.set(Some(pos));
                self.items.push(item);
                self.update(pos);
            }
        }
    }

    /// Remove the item at `pos`, filling the hole with the last element.
    pub fn delete(&mut self, pos: usize) {
        self.items[pos].pos.set(None);
        let last = self.items.pop().expect("delete from an empty heap");
        if pos < self.items.len() {
            last.pos.set(Some(pos));
            self.items[pos] = last;
            self.update(pos);
        }
    }

    fn update(&mut self, pos: usize) {
        if pos > 0 && self.items[parent(pos)].deadline_ms > self.items[pos].deadline_ms {
            self.up(pos);
        } else {
            self.down(pos);
        }
    }

    fn up(&mut self, mut pos: usize) {
        let item = self.items[pos].clone();
        while pos > 0 && self.items[parent(pos)].deadline_ms > item.deadline_ms {
            self.items[pos] = self.items[parent(pos)].clone();
            self.items[pos].pos.set(Some(pos));
            pos = parent(pos);
        }
        item.pos.set(Some(pos));
        self.items[pos] = item;
    }

    fn down(&mut self, mut pos: usize) {
        let item = self.items[pos].clone();
        let n = self.items.len();
        loop {
            let (l, r) = (left(pos), right(pos));
            let mut min_pos = pos;
            let mut min_val = item.deadline_ms;
            if l < n && self.items[l].deadline_ms < min_val {
                min_val = self.items[l].deadline_ms;
                min_pos = l;
            }
            if r < n && self.items[r].deadline_ms < min_val {
                min_pos = r;
            }
            if min_pos == pos {
                break;
            }
            self.items[pos] = self.items[min_pos].clone();
            self.items[pos].pos.set(Some(pos));
            pos = min_pos;
        }
        item.pos.set(Some(pos));
        self.items[pos] = item;
    }
}
