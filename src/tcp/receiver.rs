use crate::tcp::config::ReceiveConfig;
use crate::tcp::errors::TcpError;
use crate::tcp::reassembly_chain::ReassemblyChain;
use crate::tcp::sack::{Entries, SackBlock, SackTracker, MAX_SACK_BLOCKS};
use crate::tcp::tcp_flags::TcpFlags;
use crate::tcp::wrap32::Wrap32;
use bytes::Bytes;
use log::{debug, trace};

/// What the receiver wants the next outgoing segment to acknowledge
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub ack_no: Wrap32,
    pub window: usize,
    pub sack: Entries<MAX_SACK_BLOCKS>,
}

/// The receiving end of a connection: reassembles the payload stream and
/// keeps the cumulative ack and SACK state in step with it.
#[derive(Debug)]
pub struct TcpReceiver {
    isn: Wrap32,              // Sequence number of the first payload byte
    rcv_nxt: Wrap32,          // Next byte expected in order
    received: u64,            // Absolute offset of `rcv_nxt` in the stream
    chain: ReassemblyChain,   // Holds payload until it can be delivered in order
    sack: SackTracker,        // Ranges received ahead of `rcv_nxt`
    buffer_capacity: usize,   // Configured window of each chained buffer
}

impl TcpReceiver {
    /// `isn` is the first sequence number after the peer's SYN
    pub fn new(isn: Wrap32, config: &ReceiveConfig) -> Result<Self, TcpError> {
        Ok(TcpReceiver {
            isn,
            rcv_nxt: isn,
            received: 0,
            chain: ReassemblyChain::from_config(isn, config)?,
            sack: SackTracker::with_capacity(config.sack_capacity()),
            buffer_capacity: config.buffer_capacity(),
        })
    }

    /// Install the callback that gets the stream in order
    pub fn on_read(&mut self, callback: impl FnMut(Bytes) + 'static) {
        self.chain.on_read(callback);
    }

    /// Take in the payload of one segment and return the acknowledgment to send back
    pub fn segment_received(&mut self, seq: Wrap32, payload: &[u8], flags: TcpFlags) -> Ack {
        // Drop whatever was already acknowledged
        let (seq, payload) = if seq.is_before(self.rcv_nxt) {
            let skip = seq.distance_to(self.rcv_nxt) as usize;
            if skip >= payload.len() {
                trace!("duplicate segment at {seq}, {} bytes", payload.len());
                return self.ack();
            }
            (self.rcv_nxt, &payload[skip..])
        } else {
            (seq, payload)
        };

        if payload.is_empty() {
            return self.ack();
        }

        let consumed = self.chain.insert(seq, payload, flags.is_push());

        if seq == self.rcv_nxt {
            // Data held ahead of the gap may now be contiguous. The chain knows
            // about all of it, including ranges the SACK table had to drop.
            let filled = (self.rcv_nxt + consumed as u32).max_seq(self.chain.contiguous_end());
            self.rcv_nxt = filled;

            let result = self.sack.new_valid_ack(self.rcv_nxt);
            if result.bytes_freed > 0 {
                trace!("gap closed, ack moves to {}", self.rcv_nxt);
            }
            self.received = self.rcv_nxt.unwrap(self.isn, self.received);
        } else if consumed > 0 {
            self.sack.recv_out_of_order(seq, consumed);
        } else {
            debug!("segment at {seq} outside receive window (rcv_nxt {})", self.rcv_nxt);
        }

        self.ack()
    }

    pub fn ack(&self) -> Ack {
        Ack {
            ack_no: self.rcv_nxt,
            window: self.window(),
            sack: self.sack.entries().iter().copied().collect(),
        }
    }

    pub fn ack_no(&self) -> Wrap32 {
        self.rcv_nxt
    }

    /// Receive window to advertise, before any window scaling
    pub fn window(&self) -> usize {
        self.chain.fits(self.rcv_nxt)
    }

    pub fn sack_entries(&self) -> &[SackBlock] {
        self.sack.entries()
    }

    /// Bytes acknowledged since `isn`
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    pub fn read_next(&mut self) -> Option<Bytes> {
        self.chain.read_next()
    }

    pub fn chain(&self) -> &ReassemblyChain {
        &self.chain
    }

    /// Resynchronize on `seq`, e.g. after the connection restarts its receive
    /// sequence. Gap-free data still buffered is delivered first.
    pub fn reset(&mut self, seq: Wrap32) {
        self.chain.reset(self.buffer_capacity, seq);
        self.sack.clear();
        self.isn = seq;
        self.rcv_nxt = seq;
        self.received = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SEG: usize = 500;

    fn create_receiver(isn: u32) -> (TcpReceiver, Rc<RefCell<Vec<u8>>>) {
        let config = ReceiveConfig::default()
            .with_buffer_capacity(4096)
            .with_min_buffer_size(1024)
            .with_buffer_limit(2);
        let mut receiver = TcpReceiver::new(Wrap32::new(isn), &config).unwrap();

        let output = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&output);
        receiver.on_read(move |content| sink.borrow_mut().extend_from_slice(&content));
        (receiver, output)
    }

    fn segment(n: usize) -> Vec<u8> {
        vec![n as u8; SEG]
    }

    fn blocks(pairs: &[(u32, u32)]) -> Vec<SackBlock> {
        pairs.iter().map(|&pair| SackBlock::from(pair)).collect()
    }

    #[test]
    fn test_in_order_segments() {
        let (mut receiver, output) = create_receiver(1000);

        let ack = receiver.segment_received(Wrap32::new(1000), b"Hello", TcpFlags::ACK);
        assert_eq!(ack.ack_no, Wrap32::new(1005));
        assert!(ack.sack.is_empty());
        assert!(output.borrow().is_empty());

        let ack = receiver.segment_received(Wrap32::new(1005), b"World", TcpFlags::ACK | TcpFlags::PSH);
        assert_eq!(ack.ack_no, Wrap32::new(1010));
        assert_eq!(output.borrow().as_slice(), b"HelloWorld");
        assert_eq!(receiver.bytes_received(), 10);
    }

    #[test]
    fn test_rfc2018_alternating_losses() {
        // Segments of 500 bytes from 5000, the 2nd, 4th, 6th and 8th are lost
        let (mut receiver, output) = create_receiver(5000);
        let flags = TcpFlags::ACK | TcpFlags::PSH;

        let ack = receiver.segment_received(Wrap32::new(5000), &segment(0), flags);
        assert_eq!(ack.ack_no, Wrap32::new(5500));
        assert!(ack.sack.is_empty());

        let ack = receiver.segment_received(Wrap32::new(6000), &segment(2), flags);
        assert_eq!(ack.ack_no, Wrap32::new(5500));
        assert_eq!(ack.sack.to_vec(), blocks(&[(6000, 6500)]));

        let ack = receiver.segment_received(Wrap32::new(7000), &segment(4), flags);
        assert_eq!(ack.sack.to_vec(), blocks(&[(7000, 7500), (6000, 6500)]));

        let ack = receiver.segment_received(Wrap32::new(8000), &segment(6), flags);
        assert_eq!(ack.ack_no, Wrap32::new(5500));
        assert_eq!(ack.sack.to_vec(), blocks(&[(8000, 8500), (7000, 7500), (6000, 6500)]));

        // The 4th segment shows up out of order
        let ack = receiver.segment_received(Wrap32::new(6500), &segment(3), flags);
        assert_eq!(ack.ack_no, Wrap32::new(5500));
        assert_eq!(ack.sack.to_vec(), blocks(&[(6000, 7500), (8000, 8500)]));

        // Then the 2nd one is retransmitted
        let ack = receiver.segment_received(Wrap32::new(5500), &segment(1), flags);
        assert_eq!(ack.ack_no, Wrap32::new(7500));
        assert_eq!(ack.sack.to_vec(), blocks(&[(8000, 8500)]));

        // The 6th segment is still missing, so only the first one went out
        assert_eq!(output.borrow().as_slice(), segment(0).as_slice());

        let ack = receiver.segment_received(Wrap32::new(7500), &segment(5), flags);
        assert_eq!(ack.ack_no, Wrap32::new(8500));
        assert!(ack.sack.is_empty());

        let ack = receiver.segment_received(Wrap32::new(8500), &segment(7), flags);
        assert_eq!(ack.ack_no, Wrap32::new(9000));

        let expected: Vec<u8> = (0..8).flat_map(segment).collect();
        assert_eq!(output.borrow().as_slice(), expected.as_slice());
    }

    #[test]
    fn test_duplicate_and_overlapping_segments() {
        let (mut receiver, output) = create_receiver(0);

        receiver.segment_received(Wrap32::new(0), b"abcd", TcpFlags::PSH);
        let ack = receiver.segment_received(Wrap32::new(0), b"abcd", TcpFlags::PSH);
        assert_eq!(ack.ack_no, Wrap32::new(4));

        // Partially old data is trimmed to the new part
        let ack = receiver.segment_received(Wrap32::new(2), b"cdefgh", TcpFlags::PSH);
        assert_eq!(ack.ack_no, Wrap32::new(8));
        assert_eq!(output.borrow().as_slice(), b"abcdefgh");
    }

    #[test]
    fn test_in_order_segment_overlapping_sacked_range() {
        let (mut receiver, output) = create_receiver(0);

        receiver.segment_received(Wrap32::new(6), b"ghij", TcpFlags::PSH);
        assert_eq!(receiver.sack_entries().to_vec(), blocks(&[(6, 10)]));

        // Reaches into the SACKed range without covering all of it
        let ack = receiver.segment_received(Wrap32::new(0), b"abcdefgh", TcpFlags::empty());
        assert_eq!(ack.ack_no, Wrap32::new(10));
        assert!(ack.sack.is_empty());
        assert_eq!(output.borrow().as_slice(), b"abcdefghij");
    }

    #[test]
    fn test_out_of_window_segment_is_not_sacked() {
        let (mut receiver, _) = create_receiver(0);

        let window = receiver.window();
        assert_eq!(window, 2 * 4096);

        let ack = receiver.segment_received(Wrap32::new(window as u32), b"late", TcpFlags::empty());
        assert_eq!(ack.ack_no, Wrap32::new(0));
        assert!(ack.sack.is_empty());
    }

    #[test]
    fn test_sequence_wraparound() {
        let isn = u32::MAX - 5;
        let (mut receiver, output) = create_receiver(isn);

        receiver.segment_received(Wrap32::new(isn) + 6, b"ghijkl", TcpFlags::PSH);
        let ack = receiver.segment_received(Wrap32::new(isn), b"abcdef", TcpFlags::empty());

        assert_eq!(ack.ack_no, Wrap32::new(6));
        assert_eq!(receiver.bytes_received(), 12);
        assert_eq!(output.borrow().as_slice(), b"abcdefghijkl");
    }

    #[test]
    fn test_reset_clears_sack_state() {
        let (mut receiver, output) = create_receiver(0);

        receiver.segment_received(Wrap32::new(0), b"abc", TcpFlags::empty());
        receiver.segment_received(Wrap32::new(10), b"klm", TcpFlags::empty());
        assert_eq!(receiver.sack_entries().len(), 1);

        // The front buffer has a hole, so nothing is delivered
        receiver.reset(Wrap32::new(70000));
        assert!(output.borrow().is_empty());
        assert!(receiver.sack_entries().is_empty());
        assert_eq!(receiver.ack_no(), Wrap32::new(70000));
        assert_eq!(receiver.bytes_received(), 0);

        let ack = receiver.segment_received(Wrap32::new(70000), b"xyz", TcpFlags::PSH);
        assert_eq!(ack.ack_no, Wrap32::new(70003));
    }

    #[test]
    fn test_ack_advances_past_range_dropped_from_full_sack_table() {
        let config = ReceiveConfig::default()
            .with_buffer_capacity(1000)
            .with_min_buffer_size(1000)
            .with_buffer_limit(4)
            .with_sack_capacity(3);
        let mut receiver = TcpReceiver::new(Wrap32::new(0), &config).unwrap();

        let output = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&output);
        receiver.on_read(move |content| sink.borrow_mut().extend_from_slice(&content));

        let data: Vec<u8> = (0..4000).map(|i| (i % 251) as u8).collect();
        let send = |receiver: &mut TcpReceiver, from: usize, to: usize, flags: TcpFlags| {
            receiver.segment_received(Wrap32::new(from as u32), &data[from..to], flags)
        };

        send(&mut receiver, 200, 300, TcpFlags::PSH);
        send(&mut receiver, 1000, 1100, TcpFlags::empty());
        send(&mut receiver, 2000, 2100, TcpFlags::empty());
        let ack = send(&mut receiver, 3000, 3100, TcpFlags::empty());

        // [200, 300) no longer fits in the table but is still buffered
        assert_eq!(ack.ack_no, Wrap32::new(0));
        assert_eq!(ack.sack.to_vec(), blocks(&[(3000, 3100), (2000, 2100), (1000, 1100)]));

        let ack = send(&mut receiver, 0, 200, TcpFlags::empty());
        assert_eq!(output.borrow().len(), 300);
        assert_eq!(ack.ack_no, Wrap32::new(300));
        assert_eq!(ack.window, 700 + 3 * 1000);

        let ack = send(&mut receiver, 300, 1000, TcpFlags::empty());
        assert_eq!(ack.ack_no, Wrap32::new(1100));
        assert_eq!(ack.sack.to_vec(), blocks(&[(3000, 3100), (2000, 2100)]));

        let ack = send(&mut receiver, 1100, 2000, TcpFlags::empty());
        assert_eq!(ack.ack_no, Wrap32::new(2100));

        let ack = send(&mut receiver, 2100, 3000, TcpFlags::empty());
        assert_eq!(ack.ack_no, Wrap32::new(3100));
        assert_eq!(ack.sack.to_vec(), blocks(&[]));

        let ack = send(&mut receiver, 3100, 4000, TcpFlags::PSH);
        assert_eq!(ack.ack_no, Wrap32::new(4000));
        assert_eq!(receiver.bytes_received(), 4000);
        assert_eq!(output.borrow().as_slice(), data.as_slice());
    }

    #[test]
    fn test_reset_restores_configured_capacity() {
        let config = ReceiveConfig::default()
            .with_buffer_capacity(1000)
            .with_min_buffer_size(1000)
            .with_buffer_limit(2);
        let mut receiver = TcpReceiver::new(Wrap32::new(0), &config).unwrap();

        receiver.segment_received(Wrap32::new(1500), &[0; 10], TcpFlags::empty());
        receiver.segment_received(Wrap32::new(0), &[0; 10], TcpFlags::PSH);

        // The push left a shortened front buffer behind
        assert_eq!(receiver.chain().capacity(), 990);

        receiver.reset(Wrap32::new(50000));
        assert_eq!(receiver.chain().capacity(), 1000);
        assert_eq!(receiver.window(), 2 * 1000);
    }

    #[test]
    fn test_pull_reads_without_callback() {
        let config = ReceiveConfig::default().with_buffer_capacity(8).with_min_buffer_size(8);
        let mut receiver = TcpReceiver::new(Wrap32::new(0), &config).unwrap();

        receiver.segment_received(Wrap32::new(0), b"abcdefgh", TcpFlags::empty());
        assert_eq!(receiver.chain().next_size(), 8);
        assert_eq!(&receiver.read_next().unwrap()[..], b"abcdefgh");
        assert!(receiver.read_next().is_none());
    }

    #[test]
    fn test_invalid_config() {
        let config = ReceiveConfig::default().with_buffer_limit(0);
        let result = TcpReceiver::new(Wrap32::new(0), &config);
        assert_eq!(result.unwrap_err(), TcpError::InvalidBufferLimit);
    }
}
