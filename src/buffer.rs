//! Contiguous message buffer with separate read and write cursors.
//!
//! A [`MessageBuffer`] is the per-connection staging area between the
//! socket and user code. Incoming bytes are appended at the write
//! cursor, user code consumes from the read cursor, and the region in
//! between is the readable span. When the tail runs out, the readable
//! span is compacted to the front of the allocation; only when even
//! compaction cannot make room does the buffer grow.
//!
//! The buffer is owned by exactly one connection and is not
//! synchronized.

/// Default capacity for newly created buffers: 64 KiB.
pub const DEFAULT_CAPACITY: usize = 1 << 16;

/// A growable contiguous byte region with read/write cursors.
///
/// Invariant: `0 <= read_pos <= write_pos <= buf.len()` at all times.
///
/// Spans returned by the `peek_*` methods borrow the buffer, so the
/// borrow checker guarantees they cannot outlive the next mutation.
pub struct MessageBuffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MessageBuffer {
    /// Creates a buffer with the default 64 KiB capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Number of readable bytes between the two cursors.
    pub fn readable_size(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes writable at the tail without moving anything.
    pub fn writable_tail(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// Bytes writable once the readable span is compacted to offset 0.
    pub fn free_after_compact(&self) -> usize {
        self.buf.len() - self.readable_size()
    }

    /// Total capacity of the underlying allocation.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// True when the readable span fills the whole allocation.
    pub fn is_full(&self) -> bool {
        self.readable_size() == self.buf.len()
    }

    /// The full readable span.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// The readable span up to (excluding) the first `terminator`
    /// byte, or `None` if the terminator is not present. Nothing is
    /// committed.
    pub fn peek_until(&self, terminator: u8) -> Option<&[u8]> {
        let span = self.peek();
        span.iter()
            .position(|&b| b == terminator)
            .map(|i| &span[..i])
    }

    /// Exactly `n` readable bytes starting at the read cursor, or
    /// `None` if fewer are available. Nothing is committed.
    pub fn peek_n(&self, n: usize) -> Option<&[u8]> {
        let span = self.peek();
        if span.len() >= n { Some(&span[..n]) } else { None }
    }

    /// Advances the read cursor by `n` consumed bytes.
    pub fn read_commit(&mut self, n: usize) {
        debug_assert!(n <= self.readable_size());
        self.read_pos += n;
    }

    /// Advances the write cursor after `n` bytes were produced
    /// directly into [`tail_mut`](Self::tail_mut).
    pub fn write_commit(&mut self, n: usize) {
        debug_assert!(n <= self.writable_tail());
        self.write_pos += n;
    }

    /// The writable tail, for filling without an intermediate copy
    /// (e.g. a socket read). Commit with [`write_commit`](Self::write_commit).
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_pos..]
    }

    /// Appends `data`, compacting and growing as needed.
    pub fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ensure(data.len());
        self.buf[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Moves the readable span to the front of the allocation and
    /// zeroes the read cursor.
    pub fn compact(&mut self) {
        if self.read_pos > 0 {
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.read_pos = 0;
        }
    }

    /// Ensures `n` bytes of tail space.
    ///
    /// Grows only when compaction alone cannot make room; new
    /// capacity is `old + max(n, old / 2)`.
    pub fn ensure(&mut self, n: usize) {
        if self.free_after_compact() < n {
            self.compact();
            let grow = n.max(self.buf.len() / 2);
            self.buf.resize(self.buf.len() + grow, 0);
        } else if self.writable_tail() < n {
            self.compact();
        }
    }
}
