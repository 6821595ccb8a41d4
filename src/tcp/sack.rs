use crate::tcp::wrap32::Wrap32;
use arrayvec::ArrayVec;
use log::debug;
use std::fmt;

/// 40 bytes of option space hold at most four SACK blocks (RFC 2018 §3)
pub const MAX_SACK_BLOCKS: usize = 4;

/// Bytes taken by the SACK option kind and length fields
const SACK_OPTION_HEADER: usize = 2;
/// Bytes taken by one block on the wire (two sequence numbers)
const SACK_BLOCK_SIZE: usize = 8;

/// A received range `[left_edge, right_edge)` that is not yet cumulatively acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub left_edge: Wrap32,
    pub right_edge: Wrap32,
}

impl SackBlock {
    pub fn new(left_edge: Wrap32, right_edge: Wrap32) -> Self {
        SackBlock { left_edge, right_edge }
    }

    pub fn len(&self) -> usize {
        self.left_edge.distance_to(self.right_edge) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.left_edge == self.right_edge
    }

    /// Overlapping or adjacent
    fn touches(&self, other: &SackBlock) -> bool {
        other.left_edge.is_at_or_before(self.right_edge) && self.left_edge.is_at_or_before(other.right_edge)
    }

    fn union(&self, other: &SackBlock) -> SackBlock {
        SackBlock {
            left_edge: self.left_edge.min_seq(other.left_edge),
            right_edge: self.right_edge.max_seq(other.right_edge),
        }
    }
}

impl From<(u32, u32)> for SackBlock {
    fn from((left, right): (u32, u32)) -> Self {
        SackBlock::new(Wrap32::new(left), Wrap32::new(right))
    }
}

impl fmt::Display for SackBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} => {}]", self.left_edge, self.right_edge)
    }
}

/// Blocks in the order they go on the wire, most recently updated first
pub type Entries<const N: usize> = ArrayVec<SackBlock, N>;

#[derive(Debug, Clone, PartialEq)]
pub struct AckResult<const N: usize> {
    pub entries: Entries<N>,
    pub bytes_freed: usize,
}

/// How many SACK blocks fit in `option_space` free bytes of the TCP header
pub fn blocks_for_option_space(option_space: usize) -> usize {
    (option_space.saturating_sub(SACK_OPTION_HEADER) / SACK_BLOCK_SIZE).min(MAX_SACK_BLOCKS)
}

/// Out-of-order ranges held by the receiver, reported to the sender as SACK blocks.
///
/// Blocks are kept disjoint and non-adjacent: a new range is merged with every
/// block it overlaps or touches. When the table is full and a range does not
/// merge, the least recently updated block is dropped.
#[derive(Debug, Clone)]
pub struct SackTracker<const N: usize = MAX_SACK_BLOCKS> {
    blocks: ArrayVec<SackBlock, N>, // Most recently updated first
    capacity: usize,
}

impl<const N: usize> Default for SackTracker<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SackTracker<N> {
    pub fn new() -> Self {
        Self::with_capacity(N)
    }

    /// Track at most `capacity` blocks, e.g. 3 when timestamps share the option space
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= N, "SACK capacity must be in 1..={}", N);
        SackTracker {
            blocks: ArrayVec::new(),
            capacity,
        }
    }

    /// Register `[seq, seq + len)` as received ahead of a gap
    pub fn recv_out_of_order(&mut self, seq: Wrap32, len: usize) -> Entries<N> {
        if len == 0 {
            return self.blocks.clone();
        }

        debug_assert!(len <= i32::MAX as usize, "SACK range of {len} bytes exceeds the sequence space");
        let mut update = SackBlock::new(seq, seq + len as u32);

        // A merged block can reach neighbours the new range alone did not touch
        let mut i = 0;
        while i < self.blocks.len() {
            if self.blocks[i].touches(&update) {
                let absorbed = self.blocks.remove(i);
                update = update.union(&absorbed);
                i = 0;
            } else {
                i += 1;
            }
        }

        if self.blocks.len() >= self.capacity {
            if let Some(evicted) = self.blocks.pop() {
                debug!("SACK table full, dropping oldest block {evicted}");
            }
        }

        self.blocks.insert(0, update);
        self.blocks.clone()
    }

    /// The cumulative ack moved to `ack`. Every block whose left edge has been
    /// reached is now part of the in-order stream and is removed.
    pub fn new_valid_ack(&mut self, ack: Wrap32) -> AckResult<N> {
        let mut bytes_freed = 0;

        self.blocks.retain(|block| {
            if block.left_edge.is_at_or_before(ack) {
                bytes_freed += block.len();
                false
            } else {
                true
            }
        });

        AckResult {
            entries: self.blocks.clone(),
            bytes_freed,
        }
    }

    pub fn entries(&self) -> &[SackBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}
