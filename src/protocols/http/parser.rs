//! HTTP request head tokenizer.
//!
//! Thin wrapper around `httparse` that locates the end of the header block
//! and answers header lookups by name. The header slots are supplied by the
//! caller so a fresh set can be used for every parse attempt.

use super::ParseError;

/// Maximum number of headers accepted in one request.
pub const MAX_HEADERS: usize = 64;

/// Maximum size of a request head (request line plus headers).
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// A fully buffered request head.
#[derive(Debug)]
pub struct HeaderBlock<'h, 'b> {
    end: usize,
    headers: &'h [httparse::Header<'b>],
}

impl<'h, 'b> HeaderBlock<'h, 'b> {
    /// Offset just past the blank line terminating the headers.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Look up a header value by name (case-insensitive).
    ///
    /// Returns the first matching header.
    pub fn header(&self, name: &str) -> Option<&'b [u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
}

/// Tokenize the request head at the start of `buf`.
///
/// Returns `Ok(None)` while the blank line terminating the headers has not
/// arrived yet.
pub fn parse_header_block<'h, 'b>(
    buf: &'b [u8],
    slots: &'h mut [httparse::Header<'b>],
) -> Result<Option<HeaderBlock<'h, 'b>>, ParseError> {
    let mut req = httparse::Request::new(slots);
    match req.parse(buf)? {
        httparse::Status::Complete(end) => {
            if end > MAX_HEADER_BYTES {
                return Err(ParseError::HeaderTooLarge {
                    size: end,
                    max: MAX_HEADER_BYTES,
                });
            }
            Ok(Some(HeaderBlock {
                end,
                headers: req.headers,
            }))
        }
        httparse::Status::Partial => {
            if buf.len() > MAX_HEADER_BYTES {
                return Err(ParseError::HeaderTooLarge {
                    size: buf.len(),
                    max: MAX_HEADER_BYTES,
                });
            }
            Ok(None)
        }
    }
}

/// Check whether a `Transfer-Encoding` value ends with the chunked coding.
///
/// Chunked must be the final coding when present, so `gzip, chunked` is
/// chunked while `chunked, gzip` is not.
pub fn is_chunked(value: &[u8]) -> bool {
    value
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
