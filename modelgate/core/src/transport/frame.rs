//! Frame Protocol
//!
//! Wire format for the streaming transport: length-prefixed JSON with a
//! CRC32 checksum so corruption is caught before parsing.
//!
//! ```text
//! +----------------+----------------+-----------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)           |
//! | big-endian u32 | CRC32          | RequestFrame or ResponseFrame     |
//! +----------------+----------------+-----------------------------------+
//! ```
//!
//! The length covers the payload only. Length is validated against the
//! frame-size ceiling before any buffer is grown, so a hostile peer cannot
//! force a large allocation with a forged header.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::TransportError;
use crate::backend::{GenerateOptions, GenerationStats};
use crate::error::WireError;

/// Maximum frame size (4 MB): prompts are text, not payload blobs
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Length (4) + checksum (4)
const HEADER_SIZE: usize = 8;

const MIN_BUFFER_CAPACITY: usize = 4096;

// ============================================================================
// Wire Messages
// ============================================================================

/// Inbound frame: one generation request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Client-chosen request id, echoed on every response frame
    pub request_id: String,
    /// Model to run
    pub model: String,
    /// The prompt
    pub prompt: String,
    /// Generation parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerateOptions>,
    /// Tokenwise streaming or one-shot
    #[serde(default)]
    pub stream: bool,
    /// Priority keyword: best-effort|low|normal|high|critical|realtime
    #[serde(default)]
    pub priority: String,
    /// Candidate latency ceiling passed through to routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
}

/// Final per-request statistics attached to the terminal frame
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Wall-clock for the whole request
    pub total_time_ms: u64,
    /// Tokens delivered
    pub token_count: u32,
    /// Delivery rate
    pub tokens_per_sec: f64,
    /// Time to first non-empty token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
}

impl From<&GenerationStats> for FrameStats {
    fn from(stats: &GenerationStats) -> Self {
        Self {
            total_time_ms: stats.total_time_ms,
            token_count: stats.tokens_generated,
            tokens_per_sec: stats.tokens_per_second,
            ttft_ms: Some(stats.time_to_first_token_ms),
        }
    }
}

/// Outbound frame: a token increment, terminal marker, or error
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Echoed request id
    pub request_id: String,
    /// Token text; the full response on the non-streaming path
    #[serde(default)]
    pub token: String,
    /// Whether this frame ends the request
    #[serde(default)]
    pub done: bool,
    /// Stats, present on terminal frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FrameStats>,
    /// Error, present on terminal error frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ResponseFrame {
    /// A token increment
    pub fn token(request_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    /// The terminal frame with stats
    pub fn terminal(request_id: impl Into<String>, stats: FrameStats) -> Self {
        Self {
            request_id: request_id.into(),
            done: true,
            stats: Some(stats),
            ..Self::default()
        }
    }

    /// A terminal error frame
    pub fn error(request_id: impl Into<String>, error: WireError) -> Self {
        Self {
            request_id: request_id.into(),
            done: true,
            error: Some(error),
            ..Self::default()
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

#[inline]
fn compute_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode a message into a `[len][crc32][json]` frame
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, TransportError> {
    let json = serde_json::to_vec(msg).map_err(|e| TransportError::Serialization(e.to_string()))?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Serialization(format!(
            "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
            json.len()
        )));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&compute_checksum(&json).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Streaming frame decoder
///
/// Feed bytes with [`push`](Self::push); [`decode`](Self::decode) yields one
/// complete message at a time and `Ok(None)` while more bytes are needed.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next complete frame
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        if self.available() < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected_checksum = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_FRAME_SIZE {
            return Err(TransportError::Serialization(format!(
                "declared frame size {len} exceeds maximum {MAX_FRAME_SIZE}"
            )));
        }

        if self.available() < HEADER_SIZE + len {
            return Ok(None);
        }

        let payload_start = self.read_pos + HEADER_SIZE;
        let payload = &self.buffer[payload_start..payload_start + len];

        let actual_checksum = compute_checksum(payload);
        if actual_checksum != expected_checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            });
        }

        let msg = serde_json::from_slice(payload)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.read_pos = payload_start + len;
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> RequestFrame {
        RequestFrame {
            request_id: "req-1".to_string(),
            model: "llama3:7b".to_string(),
            prompt: "hello".to_string(),
            options: None,
            stream: true,
            priority: "high".to_string(),
            max_latency_ms: Some(500),
        }
    }

    #[test]
    fn test_roundtrip() {
        let encoded = encode(&request()).unwrap();
        assert!(encoded.len() > HEADER_SIZE);

        let mut decoder = FrameDecoder::new();
        decoder.push(&encoded);
        let decoded: RequestFrame = decoder.decode().unwrap().unwrap();
        assert_eq!(decoded, request());
    }

    #[test]
    fn test_partial_frames_need_more_data() {
        let encoded = encode(&request()).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.push(&encoded[..3]);
        let r: Option<RequestFrame> = decoder.decode().unwrap();
        assert!(r.is_none());

        decoder.push(&encoded[3..encoded.len() - 1]);
        let r: Option<RequestFrame> = decoder.decode().unwrap();
        assert!(r.is_none());

        decoder.push(&encoded[encoded.len() - 1..]);
        let r: Option<RequestFrame> = decoder.decode().unwrap();
        assert!(r.is_some());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let a = ResponseFrame::token("r", "hel");
        let b = ResponseFrame::terminal("r", FrameStats::default());

        let mut bytes = encode(&a).unwrap();
        bytes.extend(encode(&b).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);

        let first: ResponseFrame = decoder.decode().unwrap().unwrap();
        let second: ResponseFrame = decoder.decode().unwrap().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        let none: Option<ResponseFrame> = decoder.decode().unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_oversize_frame_rejected_before_buffering() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&((MAX_FRAME_SIZE as u32 + 1).to_be_bytes()));
        decoder.push(&[0u8; 4]);

        let r: Result<Option<RequestFrame>, _> = decoder.decode();
        assert!(matches!(r, Err(TransportError::Serialization(_))));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let payload = br#"{"request_id":"r","token":"x","done":false}"#;
        let mut decoder = FrameDecoder::new();
        decoder.push(&(payload.len() as u32).to_be_bytes());
        decoder.push(&0xDEAD_BEEFu32.to_be_bytes());
        decoder.push(payload);

        let r: Result<Option<ResponseFrame>, _> = decoder.decode();
        assert!(matches!(r, Err(TransportError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_request_frame_defaults() {
        let minimal: RequestFrame =
            serde_json::from_str(r#"{"request_id":"r","model":"m","prompt":"p"}"#).unwrap();
        assert!(!minimal.stream);
        assert!(minimal.priority.is_empty());
        assert!(minimal.max_latency_ms.is_none());
    }

    #[test]
    fn test_response_frame_constructors() {
        let t = ResponseFrame::token("r", "tok");
        assert!(!t.done);
        assert!(t.stats.is_none() && t.error.is_none());

        let done = ResponseFrame::terminal(
            "r",
            FrameStats {
                total_time_ms: 10,
                token_count: 2,
                tokens_per_sec: 200.0,
                ttft_ms: Some(3),
            },
        );
        assert!(done.done);
        assert_eq!(done.stats.unwrap().token_count, 2);

        let err = ResponseFrame::error(
            "r",
            WireError {
                code: 3001,
                message: "bad".to_string(),
                context: None,
            },
        );
        assert!(err.done);
        assert_eq!(err.error.unwrap().code, 3001);
    }

    #[test]
    fn test_frame_stats_from_generation_stats() {
        let stats = GenerationStats {
            time_to_first_token_ms: 42,
            total_time_ms: 1000,
            tokens_generated: 50,
            tokens_per_second: 50.0,
            energy_wh: 0.01,
        };
        let frame: FrameStats = (&stats).into();
        assert_eq!(frame.ttft_ms, Some(42));
        assert_eq!(frame.token_count, 50);
    }
}
