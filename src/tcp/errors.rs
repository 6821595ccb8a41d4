use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TcpError {
    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Minimum buffer size {min} exceeds capacity {capacity}")]
    InvalidMinSize { min: usize, capacity: usize },

    #[error("Buffer limit must allow at least one buffer")]
    InvalidBufferLimit,

    #[error("SACK capacity {requested} out of range 1..={max}")]
    InvalidSackCapacity { requested: usize, max: usize },
}
