//! HTTP/1.1 echo protocol implementation.
//!
//! Every request is answered with `200 OK` and its own body:
//!
//! ```text
//! Request:  POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello
//! Response: HTTP/1.1 200 OK\r\n
//!           Server: echo-reactor\r\n
//!           Content-Type: text/plain\r\n
//!           Date: Sat, 17 Oct 2026 09:30:00 GMT\r\n
//!           Content-Length: 5\r\n
//!           \r\n
//!           hello
//! ```
//!
//! ## Framing
//!
//! A request body is delimited by, in order of precedence:
//! 1. `Content-Length`
//! 2. chunked `Transfer-Encoding`, ending at the `0\r\n\r\n` terminator
//! 3. nothing: the request ends with its header block
//!
//! ## Pipelining
//!
//! All complete requests buffered on a connection are answered in one batch
//! and one write. A trailing partial request stays buffered until the next
//! readiness event.

pub mod chunked;
pub mod codec;
pub mod handler;
pub mod parser;
pub mod response;

pub use codec::HttpCodec;
pub use handler::on_traffic;
pub use response::{Clock, SystemClock};

use thiserror::Error;

/// Errors for buffered bytes that cannot be a valid request prefix.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("request head of {size} bytes exceeds {max}")]
    HeaderTooLarge { size: usize, max: usize },
    #[error("invalid chunked body ending at offset {end}: {source}")]
    InvalidChunk {
        /// Offset, from the start of the request, just past the first
        /// chunked terminator, or the end of the buffered bytes if none has
        /// arrived. The connection is closed on this error, so the offset
        /// only ends up in logs.
        end: usize,
        source: chunked::ChunkError,
    },
}

impl ParseError {
    /// End of the rejected bytes, when the error can tell.
    pub fn invalid_end(&self) -> Option<usize> {
        match self {
            ParseError::InvalidChunk { end, .. } => Some(*end),
            _ => None,
        }
    }
}
