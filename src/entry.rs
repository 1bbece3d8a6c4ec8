use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use intrusive_collections::{intrusive_adapter, LinkedListLink};

use crate::hashtable::str_hash;
use crate::heap::HeapPos;
use crate::zset::ZSet;

#[derive(Debug)]
pub enum Value {
    Str(Vec<u8>),
    ZSet(ZSet),
}

/// A keyspace record: key bytes, a string or sorted-set value, and the
/// shared TTL position cell. `heap_pos` holds `None` while no TTL is set;
/// otherwise the expiry heap keeps it pointed at the owning item.
#[derive(Debug)]
pub struct Entry {
    pub(crate) link: LinkedListLink,
    pub hcode: u64,
    pub key: Arc<[u8]>,
    pub value: Value,
    pub heap_pos: HeapPos,
}

intrusive_adapter!(pub EntryAdapter = Box<Entry>: Entry { link: LinkedListLink });

impl Entry {
    pub fn new(key: &[u8], value: Value) -> Box<Self> {
        Box::new(Self {
            link: LinkedListLink::new(),
            hcode: str_hash(key),
            key: Arc::from(key),
            value,
            heap_pos: Rc::new(Cell::new(None)),
        })
    }

    pub fn new_str(key: &[u8], value: Vec<u8>) -> Box<Self> {
        Self::new(key, Value::Str(value))
    }

    pub fn new_zset(key: &[u8]) -> Box<Self> {
        Self::new(key, Value::ZSet(ZSet::new()))
    }
}
