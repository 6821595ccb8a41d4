pub mod config;
pub mod errors;
pub mod reassembly_buffer;
pub mod reassembly_chain;
pub mod receiver;
pub mod sack;
pub mod tcp_flags;
pub mod wrap32;

pub use config::ReceiveConfig;
pub use errors::TcpError;
pub use reassembly_buffer::ReassemblyBuffer;
pub use reassembly_chain::ReassemblyChain;
pub use receiver::{Ack, TcpReceiver};
pub use sack::{SackBlock, SackTracker};
pub use tcp_flags::TcpFlags;
pub use wrap32::Wrap32;
