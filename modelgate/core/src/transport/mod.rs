//! Streaming Transport
//!
//! The framed wire between clients and the router:
//!
//! - [`frame`]: length-prefixed CRC32-checked JSON codec and the wire shapes
//! - [`session`]: one connection's request/response loop with TTFT stamping,
//!   write deadlines and cancellation propagation
//! - [`server`]: TCP accept loop with per-IP rate limiting
//! - [`rate_limit`]: the token-bucket limiter itself
//!
//! # Security
//!
//! - Frame sizes are validated before allocation
//! - CRC32 catches corruption in transit
//! - Per-IP token buckets shed abusive traffic before routing

pub mod frame;
pub mod rate_limit;
pub mod server;
pub mod session;

pub use frame::{FrameDecoder, FrameStats, RequestFrame, ResponseFrame, MAX_FRAME_SIZE};
pub use rate_limit::{extract_client_ip, RateLimitConfig, RateLimiter};
pub use server::TransportServer;
pub use session::{Session, SessionConfig};

use thiserror::Error;

/// Transport-layer failures
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Frame could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Payload checksum did not match the header
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the frame header
        expected: u32,
        /// Checksum computed over the received payload
        actual: u32,
    },

    /// Socket-level failure
    #[error("io error: {0}")]
    Io(String),

    /// A frame write exceeded the connection write deadline
    #[error("write deadline exceeded")]
    WriteDeadlineExceeded,

    /// The peer closed the connection
    #[error("connection closed by peer")]
    ConnectionClosed,
}
