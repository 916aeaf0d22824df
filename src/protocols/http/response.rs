//! Fixed-shape response writer.

use bytes::BytesMut;
use chrono::{DateTime, Utc};

/// Value of the `Server` header.
pub const SERVER_NAME: &str = "echo-reactor";

/// RFC 1123 date format used by the `Date` header.
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Source of the current time for the `Date` header.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc>,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// Append a `200 OK` response echoing `body` to `out`.
///
/// A missing body is sent as `Content-Length: 0`.
pub fn write_response<C: Clock + ?Sized>(out: &mut BytesMut, body: Option<&[u8]>, clock: &C) {
    let body = body.unwrap_or_default();
    let date = clock.now().format(DATE_FORMAT).to_string();
    let length = body.len().to_string();

    out.reserve(128 + body.len());
    out.extend_from_slice(b"HTTP/1.1 200 OK\r\nServer: ");
    out.extend_from_slice(SERVER_NAME.as_bytes());
    out.extend_from_slice(b"\r\nContent-Type: text/plain\r\nDate: ");
    out.extend_from_slice(date.as_bytes());
    out.extend_from_slice(b"\r\nContent-Length: ");
    out.extend_from_slice(length.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(body);
}
