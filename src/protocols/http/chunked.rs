//! Chunked transfer-coding decoder.
//!
//! Walks a fully buffered chunked body:
//!
//! ```text
//! <hex size>[;ext]\r\n<data>\r\n ... 0[;ext]\r\n[trailer\r\n]*\r\n
//! ```
//!
//! and concatenates the chunk payloads.

use thiserror::Error;

/// Terminating zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Errors in a chunked body whose extent is already known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("invalid chunk size line")]
    InvalidSize,
    #[error("chunk size overflows")]
    SizeOverflow,
    #[error("chunk data not followed by CRLF")]
    MissingCrlf,
}

/// A decoded chunked body.
#[derive(Debug, PartialEq, Eq)]
pub struct Decoded {
    /// Concatenated chunk payloads.
    pub body: Vec<u8>,
    /// Bytes of encoded input consumed, including the final CRLF.
    pub consumed: usize,
}

/// Decode the chunked body at the start of `input`.
///
/// Returns `Ok(None)` if the body has not been fully buffered.
pub fn decode(input: &[u8]) -> Result<Option<Decoded>, ChunkError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let Some(line_end) = find_crlf(&input[pos..]) else {
            return Ok(None);
        };
        let size = parse_size(&input[pos..pos + line_end])?;
        pos += line_end + 2;

        if size == 0 {
            break;
        }

        let data_end = pos.checked_add(size).ok_or(ChunkError::SizeOverflow)?;
        let chunk_end = data_end.checked_add(2).ok_or(ChunkError::SizeOverflow)?;
        if input.len() < chunk_end {
            return Ok(None);
        }
        if &input[data_end..chunk_end] != b"\r\n" {
            return Err(ChunkError::MissingCrlf);
        }

        body.extend_from_slice(&input[pos..data_end]);
        pos = chunk_end;
    }

    // Trailer section, terminated by an empty line.
    loop {
        let Some(line_end) = find_crlf(&input[pos..]) else {
            return Ok(None);
        };
        pos += line_end + 2;
        if line_end == 0 {
            return Ok(Some(Decoded {
                body,
                consumed: pos,
            }));
        }
    }
}

/// Find the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_size(line: &[u8]) -> Result<usize, ChunkError> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(ext) => &line[..ext],
        None => line,
    }
    .trim_ascii();

    if digits.is_empty() {
        return Err(ChunkError::InvalidSize);
    }

    digits.iter().try_fold(0usize, |size, &b| {
        let digit = (b as char).to_digit(16).ok_or(ChunkError::InvalidSize)?;
        size.checked_mul(16)
            .and_then(|size| size.checked_add(digit as usize))
            .ok_or(ChunkError::SizeOverflow)
    })
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    find(buffer, b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_chunk() {
        let decoded = decode(b"5\r\nhello\r\n0\r\n\r\n").unwrap().unwrap();
        assert_eq!(decoded.body, b"hello");
        assert_eq!(decoded.consumed, 15);
    }

    #[test]
    fn test_decode_multiple_chunks() {
        let input = b"4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\nGET";
        let decoded = decode(input).unwrap().unwrap();
        assert_eq!(decoded.body, b"Wikipedia in\r\n\r\nchunks.");
        assert_eq!(decoded.consumed, input.len() - 3);
    }

    #[test]
    fn test_decode_extensions_and_trailers() {
        let input = b"3;name=value\r\nabc\r\n0\r\nExpires: never\r\n\r\n";
        let decoded = decode(input).unwrap().unwrap();
        assert_eq!(decoded.body, b"abc");
        assert_eq!(decoded.consumed, input.len());
    }

    #[test]
    fn test_decode_empty_body() {
        let decoded = decode(LAST_CHUNK).unwrap().unwrap();
        assert!(decoded.body.is_empty());
        assert_eq!(decoded.consumed, LAST_CHUNK.len());
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(b"5\r\nhel"), Ok(None));
        assert_eq!(decode(b"5\r\nhello\r\n"), Ok(None));
        assert_eq!(decode(b"5\r\nhello\r\n0\r\n"), Ok(None));
        assert_eq!(decode(b"a"), Ok(None));
    }

    #[test]
    fn test_decode_invalid_size() {
        assert_eq!(decode(b"zz\r\nhello\r\n0\r\n\r\n"), Err(ChunkError::InvalidSize));
        assert_eq!(decode(b"\r\n0\r\n\r\n"), Err(ChunkError::InvalidSize));
    }

    #[test]
    fn test_decode_size_overflow() {
        assert_eq!(
            decode(b"fffffffffffffffffffff\r\n0\r\n\r\n"),
            Err(ChunkError::SizeOverflow)
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_decode_size_at_end_of_address_space() {
        // Size plus offset fits in usize, the trailing CRLF does not.
        assert_eq!(
            decode(b"ffffffffffffffec\r\n0\r\n\r\n"),
            Err(ChunkError::SizeOverflow)
        );
        assert_eq!(
            decode(b"ffffffffffffffed\r\n0\r\n\r\n"),
            Err(ChunkError::SizeOverflow)
        );
    }

    #[test]
    fn test_decode_missing_crlf() {
        assert_eq!(decode(b"3\r\nhello\r\n0\r\n\r\n"), Err(ChunkError::MissingCrlf));
    }

    #[test]
    fn test_find() {
        assert_eq!(find(b"abc0\r\n\r\n", LAST_CHUNK), Some(3));
        assert_eq!(find(b"0\r\n\r", LAST_CHUNK), None);
    }
}
