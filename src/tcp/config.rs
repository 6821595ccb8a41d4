use crate::tcp::errors::TcpError;
use crate::tcp::sack::MAX_SACK_BLOCKS;

const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024; // bytes
const DEFAULT_MIN_BUFFER_SIZE: usize = 4 * 1024; // bytes
const DEFAULT_BUFFER_LIMIT: usize = 4;
const DEFAULT_SACK_CAPACITY: usize = 3; // leaves room for the timestamp option

/// Receive side settings, fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveConfig {
    /// Window covered by a single reassembly buffer
    buffer_capacity: usize,

    /// Storage reserved up front for each buffer; grows on demand up to `buffer_capacity`
    min_buffer_size: usize,

    /// Max number of chained buffers
    buffer_limit: usize,

    /// Number of SACK blocks tracked and reported
    sack_capacity: usize,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            min_buffer_size: DEFAULT_MIN_BUFFER_SIZE,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            sack_capacity: DEFAULT_SACK_CAPACITY,
        }
    }
}

impl ReceiveConfig {
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn with_buffer_capacity(mut self, value: usize) -> Self {
        self.buffer_capacity = value;
        self
    }

    pub fn min_buffer_size(&self) -> usize {
        self.min_buffer_size
    }

    pub fn with_min_buffer_size(mut self, value: usize) -> Self {
        self.min_buffer_size = value;
        self
    }

    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }

    pub fn with_buffer_limit(mut self, value: usize) -> Self {
        self.buffer_limit = value;
        self
    }

    pub fn sack_capacity(&self) -> usize {
        self.sack_capacity
    }

    pub fn with_sack_capacity(mut self, value: usize) -> Self {
        self.sack_capacity = value;
        self
    }

    /// Check the settings before any buffer is allocated
    pub fn validate(&self) -> Result<(), TcpError> {
        // Buffer windows are addressed with 32-bit sequence offsets
        if self.buffer_capacity == 0 || self.buffer_capacity > (1 << 30) {
            return Err(TcpError::InvalidCapacity(self.buffer_capacity));
        }
        if self.min_buffer_size > self.buffer_capacity {
            return Err(TcpError::InvalidMinSize {
                min: self.min_buffer_size,
                capacity: self.buffer_capacity,
            });
        }
        if self.buffer_limit == 0 {
            return Err(TcpError::InvalidBufferLimit);
        }
        if self.sack_capacity == 0 || self.sack_capacity > MAX_SACK_BLOCKS {
            return Err(TcpError::InvalidSackCapacity {
                requested: self.sack_capacity,
                max: MAX_SACK_BLOCKS,
            });
        }
        Ok(())
    }
}
