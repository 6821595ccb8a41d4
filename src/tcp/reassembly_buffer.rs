use crate::tcp::wrap32::Wrap32;
use bytes::{Bytes, BytesMut};

/// One fixed window `[start_seq, start_seq + capacity)` of the receive stream.
///
/// Segments can be written anywhere inside the window in any order. The buffer
/// keeps a high-water mark (`size()`) and an exact record of which bytes below
/// it are present, so a duplicated or overlapping segment is never counted twice.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    start: Wrap32,      // Sequence number of the first byte in the window
    capacity: usize,    // Window size
    reserve: usize,     // Storage allocated up front on (re)initialization
    data: BytesMut,     // Content up to the high-water mark
    filled: Vec<u64>,   // One bit per byte offset in the window
    filled_count: usize,
    push_seen: bool,
}

impl ReassemblyBuffer {
    pub fn new(start: Wrap32, capacity: usize) -> Self {
        Self::with_reserve(start, capacity, capacity)
    }

    /// New buffer that only allocates `min` bytes now and grows up to `capacity` as data arrives
    pub fn with_reserve(start: Wrap32, min: usize, capacity: usize) -> Self {
        let reserve = min.min(capacity);
        ReassemblyBuffer {
            start,
            capacity,
            reserve,
            data: BytesMut::with_capacity(reserve),
            filled: vec![0; bitmap_words(capacity)],
            filled_count: 0,
            push_seen: false,
        }
    }

    /// Write `data` starting at `seq`. Returns how many bytes were taken, which
    /// is 0 when `seq` lies outside the window and less than `data.len()` when the
    /// segment runs past the end of it.
    pub fn insert(&mut self, seq: Wrap32, data: &[u8], push: bool) -> usize {
        let room = self.fits(seq);
        let n = data.len().min(room);
        if n == 0 {
            return 0;
        }

        let from = self.offset_of(seq);
        let to = from + n;

        if to > self.data.len() {
            self.data.resize(to, 0);
        }
        self.data[from..to].copy_from_slice(&data[..n]);
        self.filled_count += self.mark_filled(from, to);

        if push {
            self.push_seen = true;
        }

        n
    }

    /// Room left in the window from `seq` onwards, 0 if `seq` is outside the window
    pub fn fits(&self, seq: Wrap32) -> usize {
        let rel = self.offset_of(seq);
        if rel < self.capacity {
            self.capacity - rel
        } else {
            0
        }
    }

    /// Bytes not yet received below the high-water mark
    pub fn missing(&self) -> usize {
        self.data.len() - self.filled_count
    }

    /// Bytes from the start of the window up to the high-water mark, holes included
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes present from the start of the window up to the first hole
    pub fn contiguous_len(&self) -> usize {
        let mut len = 0;
        for &word in self.filled.iter() {
            len += word.trailing_ones() as usize;
            if word != u64::MAX {
                break;
            }
        }
        len.min(self.size())
    }

    pub fn is_ready(&self) -> bool {
        self.has_unhandled_data() && (self.push_seen || self.at_end())
    }

    pub fn at_end(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// Gap-free content is waiting, whether or not the buffer is ready
    pub fn has_unhandled_data(&self) -> bool {
        self.size() > 0 && self.missing() == 0
    }

    pub fn push_seen(&self) -> bool {
        self.push_seen
    }

    pub fn start_seq(&self) -> Wrap32 {
        self.start
    }

    pub fn end_seq(&self) -> Wrap32 {
        self.start + self.capacity as u32
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hand out the content written so far. The storage behind the returned
    /// handle is never written again; the next `reset` picks up the allocation
    /// only if the handle has been dropped by then.
    ///
    /// Must be followed by `reset` or `reset_with_capacity`.
    pub(crate) fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Move the window to start at `seq`, keeping the capacity
    pub fn reset(&mut self, seq: Wrap32) {
        self.reset_with_capacity(seq, self.capacity);
    }

    /// Move the window to start at `seq` with a new capacity. Storage is reused
    /// when it is not shared and the capacity does not shrink.
    pub fn reset_with_capacity(&mut self, seq: Wrap32, capacity: usize) {
        let reserve = self.reserve.min(capacity);

        if capacity >= self.capacity {
            self.data.clear();
            self.data.reserve(reserve);
        } else {
            self.data = BytesMut::with_capacity(reserve);
        }

        self.filled.clear();
        self.filled.resize(bitmap_words(capacity), 0);
        self.filled_count = 0;
        self.push_seen = false;
        self.start = seq;
        self.capacity = capacity;
    }

    /// Rebase an empty buffer
    pub fn set_start(&mut self, seq: Wrap32) {
        assert_eq!(self.size(), 0, "Cannot change start sequence when there already is data");
        self.start = seq;
    }

    fn offset_of(&self, seq: Wrap32) -> usize {
        self.start.distance_to(seq) as usize
    }

    /// Set the bits for `[from, to)` and count the ones that were not set before
    fn mark_filled(&mut self, from: usize, to: usize) -> usize {
        let mut newly = 0;
        let mut i = from;

        while i < to {
            let word = i / 64;
            let bit = i % 64;
            let span = (64 - bit).min(to - i);
            let mask = if span == 64 { u64::MAX } else { ((1u64 << span) - 1) << bit };

            newly += (mask & !self.filled[word]).count_ones() as usize;
            self.filled[word] |= mask;
            i += span;
        }

        newly
    }
}

fn bitmap_words(capacity: usize) -> usize {
    (capacity + 63) / 64
}
