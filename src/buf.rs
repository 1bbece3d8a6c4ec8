use std::ops::Deref;

/// Byte buffer that is appended at the back and consumed at the front.
///
/// Consuming only advances `start`; the dead prefix is reclaimed lazily the
/// next time an append would otherwise grow the allocation.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    start: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new(), start: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), start: 0 }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[self.start..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.data.len()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if self.start > 0 && self.data.len() + bytes.len() > self.data.capacity() {
            self.compact();
        }
        self.data.extend_from_slice(bytes);
    }

    /// Remove `n` bytes from the front. O(1).
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consumed past the end of the buffer");
        self.start += n;
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    /// First `n` bytes without consuming them, if that many are buffered.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.data().get(..n)
    }

    fn compact(&mut self) {
        self.data.drain(..self.start);
        self.start = 0;
    }

    pub fn append_u8(&mut self, v: u8) {
        self.append(&[v]);
    }

    pub fn append_u32(&mut self, v: u32) {
        self.append(&v.to_le_bytes());
    }

    pub fn append_i64(&mut self, v: i64) {
        self.append(&v.to_le_bytes());
    }

    pub fn append_f64(&mut self, v: f64) {
        self.append(&v.to_le_bytes());
    }

    /// Overwrite 4 bytes at `pos` (relative to the unconsumed front) with a
    /// little-endian u32. Used to patch reserved length/count headers.
    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        let at = self.start + pos;
        self.data[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn byte_at(&self, pos: usize) -> u8 {
        self.data[self.start + pos]
    }

    /// Drop everything at and after `pos` (relative to the front).
    pub fn truncate(&mut self, pos: usize) {
        self.data.truncate(self.start + pos);
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}
