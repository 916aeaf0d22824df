//! Connection buffers and per-connection protocol state.
//!
//! The reactor reads everything a socket has to offer into the inbound
//! buffer, hands the connection to its protocol handler through the [`Conn`]
//! interface, then flushes whatever the handler queued in the outbound buffer.

use crate::protocols::echo;
use crate::protocols::http::{self, Clock, HttpCodec};
use crate::runtime::Protocol;
use bytes::{Buf, BytesMut};

/// What the reactor should do with a connection after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep the connection open.
    Continue,
    /// Flush pending output, then close the connection.
    Close,
}

/// Buffered view of a connection, as seen by protocol handlers.
pub trait Conn {
    /// Look at up to `limit` buffered inbound bytes without consuming them.
    /// `None` returns everything buffered.
    fn peek(&self, limit: Option<usize>) -> &[u8];

    /// Queue bytes to be sent.
    fn write(&mut self, data: &[u8]);

    /// Drop up to `n` bytes from the front of the inbound buffer.
    ///
    /// Returns the number of bytes dropped.
    fn discard(&mut self, n: usize) -> usize;
}

/// Inbound and outbound byte queues of one connection.
#[derive(Debug, Default)]
pub struct ConnBuffers {
    pub inbound: BytesMut,
    pub outbound: BytesMut,
}

impl ConnBuffers {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inbound: BytesMut::with_capacity(capacity),
            outbound: BytesMut::with_capacity(capacity),
        }
    }
}

impl Conn for ConnBuffers {
    fn peek(&self, limit: Option<usize>) -> &[u8] {
        match limit {
            Some(n) => &self.inbound[..n.min(self.inbound.len())],
            None => &self.inbound,
        }
    }

    fn write(&mut self, data: &[u8]) {
        self.outbound.extend_from_slice(data);
    }

    fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.inbound.len());
        self.inbound.advance(n);
        n
    }
}

/// Protocol state attached to a connection when it is opened.
#[derive(Debug)]
pub enum Session {
    Http(HttpCodec),
    Echo,
}

impl Session {
    pub fn open(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Http => Session::Http(HttpCodec::new()),
            Protocol::Echo => Session::Echo,
        }
    }

    /// Run the protocol handler over the buffered inbound bytes.
    pub fn on_traffic<C: Clock + ?Sized>(&mut self, conn: &mut dyn Conn, clock: &C) -> Action {
        match self {
            Session::Http(codec) => http::on_traffic(codec, conn, clock),
            Session::Echo => echo::on_traffic(conn),
        }
    }
}
