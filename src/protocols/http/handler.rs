//! Pipelined request handling for one readiness event.

use super::codec::{HttpCodec, ParseResult};
use super::response::{write_response, Clock};
use super::ParseError;
use crate::runtime::{Action, Conn};
use tracing::{debug, trace};

/// Outcome of running the pipeline over one buffer.
#[derive(Debug, Default)]
pub struct Batch {
    /// Input bytes covered by the answered requests.
    pub consumed: usize,
    /// Number of responses appended to the codec output.
    pub responses: usize,
    /// Error that stopped the batch, if any.
    pub error: Option<ParseError>,
}

/// Answer every complete request at the start of `buf`.
///
/// Responses are appended to the codec output. The batch stops at the first
/// incomplete or malformed request; bytes from that point on are not counted
/// as consumed.
pub fn pipeline<C: Clock + ?Sized>(codec: &mut HttpCodec, buf: &[u8], clock: &C) -> Batch {
    let mut batch = Batch::default();
    let mut remaining = buf;

    while !remaining.is_empty() {
        codec.reset_parser();
        let request = match codec.frame(remaining) {
            ParseResult::Complete(request) => request,
            ParseResult::Incomplete => break,
            ParseResult::Error(e) => {
                batch.error = Some(e);
                break;
            }
        };

        write_response(codec.output_mut(), request.body.as_deref(), clock);
        trace!(consumed = request.consumed, "answered request");

        remaining = &remaining[request.consumed..];
        batch.consumed += request.consumed;
        batch.responses += 1;
    }

    batch
}

/// Handle a readable event on an HTTP connection.
///
/// Writes all responses produced from the buffered bytes in a single call
/// and discards exactly the bytes they answered. A malformed request closes
/// the connection once the earlier responses have been flushed.
pub fn on_traffic<C: Clock + ?Sized>(
    codec: &mut HttpCodec,
    conn: &mut dyn Conn,
    clock: &C,
) -> Action {
    let batch = pipeline(codec, conn.peek(None), clock);

    if !codec.output().is_empty() {
        conn.write(codec.output());
    }
    codec.reset();
    conn.discard(batch.consumed);

    match batch.error {
        Some(e) => {
            let invalid_end = e.invalid_end().map(|end| batch.consumed + end);
            debug!(
                error = %e,
                responses = batch.responses,
                invalid_end = ?invalid_end,
                "malformed request"
            );
            Action::Close
        }
        None => Action::Continue,
    }
}
