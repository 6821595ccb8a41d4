use bitflags::bitflags;

bitflags! {
    /// Control bits from byte 13 of the TCP header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TcpFlags: u8 {
        const CWR = 1 << 7;
        const ECE = 1 << 6;
        const URG = 1 << 5;
        const ACK = 1 << 4;
        const PSH = 1 << 3;
        const RST = 1 << 2;
        const SYN = 1 << 1;
        const FIN = 1 << 0;
    }
}

impl TcpFlags {
    /// The sender marked the end of a unit the application should see right away
    pub fn is_push(&self) -> bool {
        self.contains(TcpFlags::PSH)
    }
}

impl From<u8> for TcpFlags {
    fn from(byte: u8) -> Self {
        TcpFlags::from_bits_truncate(byte)
    }
}

// -- Unit tests --
