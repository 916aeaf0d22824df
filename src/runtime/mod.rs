//! Custom runtime for the echo services.
//!
//! Readiness-based I/O on mio (epoll on Linux, kqueue on macOS). Each worker
//! thread runs its own event loop and exclusively owns the connections it
//! accepted, so connection state needs no locking.
//!
//! - `stream`: TCP and Unix-domain stream sockets, one protocol session per
//!   connection
//! - `datagram`: UDP sockets echoing datagrams

pub mod connection;
pub mod datagram;
pub mod stream;

pub use connection::{Action, Conn, ConnBuffers, Session};

use crate::config::{Config, Transport};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread::JoinHandle;

/// Protocol spoken on stream connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Echo,
}

/// Run the server variant selected by `config` until its workers exit.
pub fn run(config: Config) -> io::Result<()> {
    match config.transport {
        Transport::Http => stream::serve_http(&config),
        Transport::Unix => stream::serve_unix(&config),
        Transport::Udp => datagram::serve(&config),
    }
}

/// Resolve the configured host and port to a socket address.
pub(crate) fn resolve_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address for {host}:{port}"),
        )
    })
}

/// Wait for all workers.
pub(crate) fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.join();
    }
}
