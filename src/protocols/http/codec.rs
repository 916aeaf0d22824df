//! Per-connection request framing state.

use super::chunked::{self, LAST_CHUNK};
use super::parser::{self, HeaderBlock, MAX_HEADERS};
use super::ParseError;
use bytes::BytesMut;
use std::borrow::Cow;

const CONTENT_LENGTH: &str = "Content-Length";
const TRANSFER_ENCODING: &str = "Transfer-Encoding";

/// A request framed at the start of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Request<'a> {
    /// Bytes of input making up the request, head and body.
    pub consumed: usize,
    /// Request body; borrowed from the input unless it had to be decoded.
    pub body: Option<Cow<'a, [u8]>>,
}

/// Result of one framing attempt.
#[derive(Debug)]
pub enum ParseResult<'a> {
    /// A complete request was framed.
    Complete(Request<'a>),
    /// Not enough bytes buffered to find the request boundary.
    Incomplete,
    /// The buffered bytes are not a valid request prefix.
    Error(ParseError),
}

/// HTTP codec attached to each connection.
///
/// Holds the content length resolved for the request being parsed and the
/// responses accumulated for the next write.
#[derive(Debug, Default)]
pub struct HttpCodec {
    content_length: Option<usize>,
    out: BytesMut,
}

impl HttpCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the end of the next request in `buf` and extract its body.
    pub fn frame<'a>(&mut self, buf: &'a [u8]) -> ParseResult<'a> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let head = match parser::parse_header_block(buf, &mut slots) {
            Ok(Some(head)) => head,
            Ok(None) => return ParseResult::Incomplete,
            Err(e) => return ParseResult::Error(e),
        };
        let head_end = head.end();

        if let Some(len) = self.content_length(&head) {
            let Some(body_end) = head_end.checked_add(len) else {
                return ParseResult::Incomplete;
            };
            if buf.len() < body_end {
                return ParseResult::Incomplete;
            }
            return ParseResult::Complete(Request {
                consumed: body_end,
                body: Some(Cow::Borrowed(&buf[head_end..body_end])),
            });
        }

        if head.header(TRANSFER_ENCODING).is_some_and(parser::is_chunked) {
            let payload = &buf[head_end..];
            return match chunked::decode(payload) {
                Ok(Some(decoded)) => ParseResult::Complete(Request {
                    consumed: head_end + decoded.consumed,
                    body: Some(Cow::Owned(decoded.body)),
                }),
                Ok(None) => ParseResult::Incomplete,
                Err(source) => {
                    // Bad bytes run up to the first terminator, or to the end
                    // of what is buffered when none has arrived.
                    let end = chunked::find(payload, LAST_CHUNK)
                        .map_or(buf.len(), |idx| head_end + idx + LAST_CHUNK.len());
                    ParseResult::Error(ParseError::InvalidChunk { end, source })
                }
            };
        }

        ParseResult::Complete(Request {
            consumed: head_end,
            body: None,
        })
    }

    /// Content length of the request being parsed, resolved once per request.
    fn content_length(&mut self, head: &HeaderBlock<'_, '_>) -> Option<usize> {
        if self.content_length.is_none() {
            self.content_length = head
                .header(CONTENT_LENGTH)
                .and_then(|value| std::str::from_utf8(value.trim_ascii()).ok())
                .and_then(|value| value.parse().ok());
        }
        self.content_length
    }

    /// Forget the content length of the previous request.
    pub fn reset_parser(&mut self) {
        self.content_length = None;
    }

    /// Reset the parser and drop any accumulated output.
    pub fn reset(&mut self) {
        self.reset_parser();
        self.out.clear();
    }

    /// Responses accumulated since the last reset.
    pub fn output(&self) -> &[u8] {
        &self.out
    }

    pub(crate) fn output_mut(&mut self) -> &mut BytesMut {
        &mut self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(result: ParseResult<'_>) -> Request<'_> {
        match result {
            ParseResult::Complete(request) => request,
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_content_length_body() {
        let head = b"POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\n";
        let mut buf = head.to_vec();
        buf.extend_from_slice(b"hello");
        buf.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(&buf));
        assert_eq!(request.consumed, head.len() + 5);
        assert_eq!(request.body.as_deref(), Some(&b"hello"[..]));
        assert!(matches!(request.body, Some(Cow::Borrowed(_))));
    }

    #[test]
    fn test_content_length_body_incomplete() {
        let mut codec = HttpCodec::new();
        let result = codec.frame(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello");
        assert!(matches!(result, ParseResult::Incomplete));
    }

    #[test]
    fn test_zero_content_length() {
        let buf = b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(buf));
        assert_eq!(request.consumed, buf.len());
        assert_eq!(request.body.as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_bodyless_request() {
        let buf = b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(buf));
        assert_eq!(request.consumed, buf.len());
        assert_eq!(request.body, None);
    }

    #[test]
    fn test_incomplete_head() {
        let mut codec = HttpCodec::new();
        assert!(matches!(
            codec.frame(b"GET / HTTP/1.1\r\nHost: loc"),
            ParseResult::Incomplete
        ));
        assert!(matches!(codec.frame(b""), ParseResult::Incomplete));
    }

    #[test]
    fn test_malformed_head() {
        let mut codec = HttpCodec::new();
        assert!(matches!(
            codec.frame(b"NOT HTTP AT ALL\r\n\r\n"),
            ParseResult::Error(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_content_length_is_ignored() {
        let buf = b"POST / HTTP/1.1\r\nContent-Length: -5\r\n\r\n";
        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(buf));
        assert_eq!(request.consumed, buf.len());
        assert_eq!(request.body, None);
    }

    #[test]
    fn test_chunked_body() {
        let head = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut buf = head.to_vec();
        buf.extend_from_slice(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        let len = buf.len();
        buf.extend_from_slice(b"GET / HTTP/1.1\r\n");

        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(&buf));
        assert_eq!(request.consumed, len);
        assert_eq!(request.body.as_deref(), Some(&b"hello world"[..]));
    }

    #[test]
    fn test_chunked_body_incomplete() {
        let mut codec = HttpCodec::new();
        let result =
            codec.frame(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n");
        assert!(matches!(result, ParseResult::Incomplete));
    }

    #[test]
    fn test_chunked_terminator_inside_data() {
        let mut codec = HttpCodec::new();
        let result = codec.frame(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n9\r\nab0\r\n\r\ncd\r\n",
        );
        assert!(matches!(result, ParseResult::Incomplete));
    }

    #[test]
    fn test_chunked_decode_error_reports_boundary() {
        let head = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut buf = head.to_vec();
        buf.extend_from_slice(b"xyz\r\nhello\r\n0\r\n\r\n");

        let mut codec = HttpCodec::new();
        match codec.frame(&buf) {
            ParseResult::Error(ParseError::InvalidChunk { end, .. }) => {
                assert_eq!(end, buf.len());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_chunked_body_with_trailer() {
        let buf = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    3\r\nabc\r\n0\r\nExpires: never\r\n\r\n";
        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(buf));
        assert_eq!(request.consumed, buf.len());
        assert_eq!(request.body.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_chunked_last_chunk_extension() {
        let buf = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    3\r\nabc\r\n0;x=y\r\n\r\n";
        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(buf));
        assert_eq!(request.consumed, buf.len());
        assert_eq!(request.body.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_chunked_size_overflow_is_an_error() {
        let buf = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    ffffffffffffffec\r\n0\r\n\r\n";
        let mut codec = HttpCodec::new();
        match codec.frame(buf) {
            ParseResult::Error(ParseError::InvalidChunk { end, source }) => {
                assert_eq!(end, buf.len());
                assert_eq!(source, chunked::ChunkError::SizeOverflow);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_chunked_error_without_terminator() {
        let buf = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nxyz\r\nhel";
        let mut codec = HttpCodec::new();
        match codec.frame(buf) {
            ParseResult::Error(ParseError::InvalidChunk { end, .. }) => {
                assert_eq!(end, buf.len());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_content_length_wins_over_chunked() {
        let buf = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\nabc";
        let mut codec = HttpCodec::new();
        let request = complete(codec.frame(buf));
        assert_eq!(request.consumed, buf.len());
        assert_eq!(request.body.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_cached_length_is_cleared_by_reset() {
        let first = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let second = b"GET / HTTP/1.1\r\n\r\n";

        let mut codec = HttpCodec::new();
        assert_eq!(complete(codec.frame(first)).consumed, first.len());

        codec.reset_parser();
        let request = complete(codec.frame(second));
        assert_eq!(request.consumed, second.len());
        assert_eq!(request.body, None);
    }
}
