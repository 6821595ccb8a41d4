use crate::tcp::config::ReceiveConfig;
use crate::tcp::errors::TcpError;
use crate::tcp::reassembly_buffer::ReassemblyBuffer;
use crate::tcp::wrap32::Wrap32;
use bytes::Bytes;
use log::{debug, trace};
use std::collections::VecDeque;
use std::fmt;

type ReadCallback = Box<dyn FnMut(Bytes)>;

/// An ordered run of `ReassemblyBuffer`s covering the receive window.
///
/// Buffers are contiguous in sequence space, front to back. Only the front
/// buffer is ever delivered, and only once it is ready, so the consumer sees
/// the stream strictly in order. More buffers are appended on demand, up to
/// `buffer_limit`.
pub struct ReassemblyChain {
    buffers: VecDeque<ReassemblyBuffer>,
    buffer_limit: usize,
    min_buffer_size: usize,
    on_read: Option<ReadCallback>,    // Receives completed buffers as they become ready
    complete: VecDeque<Bytes>,        // Completed buffers waiting for `read_next`
}

impl ReassemblyChain {
    /// Chain with a single buffer of `capacity` starting at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_limit` is 0. Use `from_config` to get an error instead.
    pub fn new(start: Wrap32, capacity: usize, buffer_limit: usize) -> Self {
        Self::with_reserve(start, capacity, capacity, buffer_limit)
    }

    pub fn from_config(start: Wrap32, config: &ReceiveConfig) -> Result<Self, TcpError> {
        config.validate()?;
        Ok(Self::with_reserve(
            start,
            config.min_buffer_size(),
            config.buffer_capacity(),
            config.buffer_limit(),
        ))
    }

    fn with_reserve(start: Wrap32, min: usize, capacity: usize, buffer_limit: usize) -> Self {
        assert!(buffer_limit > 0, "A chain needs room for at least one buffer");

        let mut buffers = VecDeque::with_capacity(buffer_limit);
        buffers.push_back(ReassemblyBuffer::with_reserve(start, min, capacity));

        ReassemblyChain {
            buffers,
            buffer_limit,
            min_buffer_size: min,
            on_read: None,
            complete: VecDeque::new(),
        }
    }

    /// Install the delivery callback. Anything completed before it was installed
    /// is passed to it right away, in order.
    pub fn on_read(&mut self, callback: impl FnMut(Bytes) + 'static) {
        let mut callback: ReadCallback = Box::new(callback);
        while let Some(content) = self.complete.pop_front() {
            callback(content);
        }
        self.on_read = Some(callback);
    }

    /// Insert a segment. Returns the number of bytes taken, which never exceeds
    /// `fits(seq)` as it was before the call.
    pub fn insert(&mut self, seq: Wrap32, data: &[u8], push: bool) -> usize {
        let budget = self.fits(seq).min(data.len());
        let data = &data[..budget];

        let mut seq = seq;
        let mut recv = 0;

        while recv < data.len() {
            let Some(idx) = self.buffer_index(seq) else {
                break;
            };

            let read = self.buffers[idx].insert(seq, &data[recv..], push);
            recv += read;
            seq += read as u32;

            self.flush_ready();
        }

        if recv == 0 && !data.is_empty() {
            debug!("segment at {seq} does not fit the receive window, dropping {} bytes", data.len());
        }

        recv
    }

    /// The buffer with room for `seq`, appending a new one if the limit allows it
    pub fn get_buffer(&mut self, seq: Wrap32) -> Option<&mut ReassemblyBuffer> {
        let idx = self.buffer_index(seq)?;
        self.buffers.get_mut(idx)
    }

    fn buffer_index(&mut self, seq: Wrap32) -> Option<usize> {
        if let Some(idx) = self.buffers.iter().position(|buf| buf.fits(seq) > 0) {
            return Some(idx);
        }

        if self.buffers.len() >= self.buffer_limit {
            return None;
        }

        // A new buffer continues where the last one ends. Segments further out
        // than that are not covered until the gap before them is filled.
        let back = self.buffers.back()?;
        let next = ReassemblyBuffer::with_reserve(back.end_seq(), self.min_buffer_size, back.capacity());
        if next.fits(seq) == 0 {
            return None;
        }

        trace!("adding buffer [{}, {})", next.start_seq(), next.end_seq());
        self.buffers.push_back(next);
        Some(self.buffers.len() - 1)
    }

    /// Deliver the front buffer for as long as it is ready
    fn flush_ready(&mut self) {
        while self.buffers.front().is_some_and(ReassemblyBuffer::is_ready) {
            let only_buffer = self.buffers.len() == 1;
            let Some(buf) = self.buffers.front_mut() else {
                break;
            };

            let next_seq = buf.start_seq() + buf.size() as u32;
            let rem = buf.capacity() - buf.size();
            let content = buf.take();

            if only_buffer {
                // Slide the window to the first byte not delivered yet
                buf.reset(next_seq);
            } else if rem != 0 {
                // Pushed before it was full: keep covering the gap up to the next buffer
                buf.reset_with_capacity(next_seq, rem);
            } else {
                self.buffers.pop_front();
            }

            self.deliver(content);

            if only_buffer {
                break;
            }
        }
    }

    fn deliver(&mut self, content: Bytes) {
        trace!("delivering {} bytes", content.len());
        match self.on_read.as_mut() {
            Some(callback) => callback(content),
            None => self.complete.push_back(content),
        }
    }

    /// Room reachable from `seq`, in existing buffers or in ones that can still be added
    pub fn fits(&self, seq: Wrap32) -> usize {
        let Some(back) = self.buffers.back() else {
            return 0;
        };
        let spare = self.buffer_limit.saturating_sub(self.buffers.len());
        let cap = back.capacity();

        if let Some(idx) = self.buffers.iter().position(|buf| buf.fits(seq) > 0) {
            let later: usize = self.buffers.iter().skip(idx + 1).map(ReassemblyBuffer::capacity).sum();
            return self.buffers[idx].fits(seq) + later + spare * cap;
        }

        if spare > 0 {
            let rel = back.end_seq().distance_to(seq) as usize;
            if rel < cap {
                return cap - rel + (spare - 1) * cap;
            }
        }

        0
    }

    /// Bytes held across all buffers, holes included
    pub fn size(&self) -> usize {
        self.buffers.iter().map(ReassemblyBuffer::size).sum()
    }

    /// Bytes still missing before the highest byte received
    pub fn missing(&self) -> usize {
        let Some(last) = self.buffers.iter().rposition(|buf| buf.size() > 0) else {
            return 0;
        };

        let before: usize = self
            .buffers
            .iter()
            .take(last)
            .map(|buf| buf.capacity() - buf.size() + buf.missing())
            .sum();

        before + self.buffers[last].missing()
    }

    /// Rebase an empty chain to start at `seq`
    pub fn set_start(&mut self, seq: Wrap32) {
        let mut seq = seq;
        for buf in self.buffers.iter_mut() {
            assert_eq!(buf.size(), 0, "Cannot change start sequence when there already is data");
            buf.set_start(seq);
            seq += buf.capacity() as u32;
        }
    }

    /// Start over at `seq` with buffers of `capacity`. Gap-free data in the
    /// front buffer is delivered first; everything else is discarded.
    pub fn reset(&mut self, capacity: usize, seq: Wrap32) {
        let Some(front) = self.buffers.front_mut() else {
            return;
        };

        let pending = if front.has_unhandled_data() {
            Some(front.take())
        } else {
            None
        };

        front.reset_with_capacity(seq, capacity);
        self.buffers.truncate(1);
        debug!("receive window reset to [{}, {})", seq, seq + capacity as u32);

        if let Some(content) = pending {
            self.deliver(content);
        }
    }

    /// Next completed buffer, when no callback is installed
    pub fn read_next(&mut self) -> Option<Bytes> {
        self.complete.pop_front()
    }

    /// Size of the next completed buffer, 0 if there is none
    pub fn next_size(&self) -> usize {
        self.complete.front().map_or(0, Bytes::len)
    }

    pub fn has_pending(&self) -> bool {
        !self.complete.is_empty()
    }

    /// First sequence number not yet received without a gap. Everything
    /// before it has been delivered or sits gap-free at the front.
    pub fn contiguous_end(&self) -> Wrap32 {
        let mut end = self.start_seq();
        for buf in self.buffers.iter() {
            let len = buf.contiguous_len();
            end = buf.start_seq() + len as u32;
            if len < buf.capacity() {
                break;
            }
        }
        end
    }

    pub fn start_seq(&self) -> Wrap32 {
        self.buffers.front().map_or(Wrap32::default(), ReassemblyBuffer::start_seq)
    }

    /// Capacity of the front buffer
    pub fn capacity(&self) -> usize {
        self.buffers.front().map_or(0, ReassemblyBuffer::capacity)
    }

    /// Number of buffers currently chained. Unrelated to `is_empty`, which
    /// looks at the bytes held.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }
}

impl fmt::Debug for ReassemblyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReassemblyChain")
            .field("buffers", &self.buffers)
            .field("buffer_limit", &self.buffer_limit)
            .field("min_buffer_size", &self.min_buffer_size)
            .field("on_read", &self.on_read.is_some())
            .field("complete", &self.complete.len())
            .finish()
    }
}
