//! mio event loop for stream sockets.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//!
//! A readable connection is drained into its inbound buffer until the socket
//! would block, the session handler answers what it can, and the queued
//! output is written straight away. Output the socket cannot take yet parks
//! the connection on `WRITABLE` until it drains, which also stops reading
//! from it in the meantime.

use crate::config::Config;
use crate::protocols::http::SystemClock;
use crate::runtime::{join_workers, resolve_addr, Action, ConnBuffers, Protocol, Session};
use bytes::Buf;
use mio::event::{Event, Source};
use mio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Listening socket a worker accepts connections from.
pub trait Listener: Source + Send + 'static {
    type Stream: Read + Write + Source;

    /// Accept one pending connection, returning it with a printable peer.
    fn accept_conn(&self) -> io::Result<(Self::Stream, String)>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept_conn(&self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = self.accept()?;
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }
}

impl Listener for UnixListener {
    type Stream = UnixStream;

    fn accept_conn(&self) -> io::Result<(UnixStream, String)> {
        let (stream, peer) = self.accept()?;
        Ok((stream, format!("{peer:?}")))
    }
}

/// Limits applied by each worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub buffer_size: usize,
    pub max_request_size: usize,
    pub max_connections: usize,
    pub batch_size: usize,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            buffer_size: config.buffer_size,
            max_request_size: config.max_request_size,
            max_connections: config.max_connections,
            batch_size: config.batch_size,
        }
    }
}

/// Outcome of draining a socket into the inbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStatus {
    /// Everything available has been read.
    Drained,
    /// Peer closed its write side.
    Eof,
    /// Inbound buffer reached the request size limit.
    Full,
}

/// Per-worker connection state.
struct StreamConnection<S> {
    stream: S,
    buffers: ConnBuffers,
    session: Session,
    interest: Interest,
    /// Close once pending output is flushed.
    closing: bool,
}

impl<S: Read + Write + Source> StreamConnection<S> {
    fn fill_inbound(&mut self, chunk: usize, limit: usize) -> io::Result<ReadStatus> {
        loop {
            let inbound = &mut self.buffers.inbound;
            if inbound.len() >= limit {
                return Ok(ReadStatus::Full);
            }

            let start = inbound.len();
            inbound.resize(start + chunk, 0);
            let result = self.stream.read(&mut inbound[start..]);
            match result {
                Ok(0) => {
                    inbound.truncate(start);
                    return Ok(ReadStatus::Eof);
                }
                Ok(n) => inbound.truncate(start + n),
                Err(e) => {
                    inbound.truncate(start);
                    match e.kind() {
                        io::ErrorKind::WouldBlock => return Ok(ReadStatus::Drained),
                        io::ErrorKind::Interrupted => continue,
                        _ => return Err(e),
                    }
                }
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let outbound = &mut self.buffers.outbound;
        while !outbound.is_empty() {
            match self.stream.write(&outbound[..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Wait for writability while output is pending, readability otherwise.
    fn update_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let interest = if self.buffers.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::WRITABLE
        };
        if interest != self.interest {
            registry.reregister(&mut self.stream, token, interest)?;
            self.interest = interest;
        }
        Ok(())
    }
}

/// Run the HTTP echo server on TCP.
pub fn serve_http(config: &Config) -> io::Result<()> {
    let workers = config.workers();
    let addr = resolve_addr(&config.host, config.port)?;
    let listeners = bind_tcp(addr, workers)?;

    info!(
        workers,
        addr = %addr,
        multicore = config.multicore,
        "HTTP echo server listening"
    );

    let handles = spawn_workers(listeners, Protocol::Http, WorkerSettings::from(config))?;
    join_workers(handles);
    Ok(())
}

/// Run the byte echo server on a Unix-domain socket.
pub fn serve_unix(config: &Config) -> io::Result<()> {
    let workers = config.workers();
    let listeners = bind_unix(&config.sock, workers)?;

    info!(
        workers,
        sock = %config.sock.display(),
        multicore = config.multicore,
        "Unix echo server listening"
    );

    let handles = spawn_workers(listeners, Protocol::Echo, WorkerSettings::from(config))?;
    join_workers(handles);
    Ok(())
}

/// Bind one SO_REUSEPORT listener per worker on the same address.
///
/// With port 0 the port picked for the first listener is reused for the rest.
pub fn bind_tcp(addr: SocketAddr, workers: usize) -> io::Result<Vec<TcpListener>> {
    let first = create_listener_with_reuseport(addr)?;
    let addr = first.local_addr()?;

    let mut listeners = Vec::with_capacity(workers);
    listeners.push(TcpListener::from_std(first));
    for _ in 1..workers {
        listeners.push(TcpListener::from_std(create_listener_with_reuseport(addr)?));
    }
    Ok(listeners)
}

/// Bind a Unix listener and hand a clone of it to every worker.
///
/// A socket file left behind by a previous run is removed first.
pub fn bind_unix(path: &Path, workers: usize) -> io::Result<Vec<UnixListener>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %path.display(), "Removing stale socket file");
            std::fs::remove_file(path)?;
        }
        _ => {}
    }

    let listener = std::os::unix::net::UnixListener::bind(path)?;
    listener.set_nonblocking(true)?;

    let mut listeners = Vec::with_capacity(workers);
    for _ in 1..workers {
        listeners.push(UnixListener::from_std(listener.try_clone()?));
    }
    listeners.push(UnixListener::from_std(listener));
    Ok(listeners)
}

/// Start one worker thread per listener.
pub fn spawn_workers<L: Listener>(
    listeners: Vec<L>,
    protocol: Protocol,
    settings: WorkerSettings,
) -> io::Result<Vec<JoinHandle<()>>> {
    listeners
        .into_iter()
        .enumerate()
        .map(|(worker_id, listener)| {
            thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    if let Err(e) = worker_loop(worker_id, listener, protocol, settings) {
                        error!(worker = worker_id, error = %e, "Worker failed");
                    }
                })
        })
        .collect()
}

fn worker_loop<L: Listener>(
    worker_id: usize,
    mut listener: L,
    protocol: Protocol,
    settings: WorkerSettings,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(settings.batch_size);

    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections: Slab<StreamConnection<L::Stream>> =
        Slab::with_capacity(settings.max_connections);

    info!(worker = worker_id, protocol = ?protocol, "Worker started");

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(
                        &listener,
                        poll.registry(),
                        &mut connections,
                        &settings,
                        worker_id,
                        protocol,
                    )?;
                }
                Token(conn_id) => {
                    match handle_connection_event(
                        conn_id,
                        event,
                        poll.registry(),
                        &mut connections,
                        &settings,
                    ) {
                        Ok(Action::Continue) => {}
                        Ok(Action::Close) => {
                            close_connection(poll.registry(), &mut connections, conn_id);
                        }
                        Err(e) => {
                            debug!(conn_id, error = %e, "Connection error");
                            close_connection(poll.registry(), &mut connections, conn_id);
                        }
                    }
                }
            }
        }
    }
}

fn accept_connections<L: Listener>(
    listener: &L,
    registry: &Registry,
    connections: &mut Slab<StreamConnection<L::Stream>>,
    settings: &WorkerSettings,
    worker_id: usize,
    protocol: Protocol,
) -> io::Result<()> {
    loop {
        match listener.accept_conn() {
            Ok((stream, peer)) => {
                if connections.len() >= settings.max_connections {
                    warn!("Connection limit reached");
                    continue;
                }

                let entry = connections.vacant_entry();
                let conn_id = entry.key();
                let conn = entry.insert(StreamConnection {
                    stream,
                    buffers: ConnBuffers::with_capacity(settings.buffer_size),
                    session: Session::open(protocol),
                    interest: Interest::READABLE,
                    closing: false,
                });

                registry.register(&mut conn.stream, Token(conn_id), Interest::READABLE)?;

                debug!(worker = worker_id, conn_id, peer = %peer, "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Accept error: {}", e);
                break;
            }
        }
    }
    Ok(())
}

fn handle_connection_event<S: Read + Write + Source>(
    conn_id: usize,
    event: &Event,
    registry: &Registry,
    connections: &mut Slab<StreamConnection<S>>,
    settings: &WorkerSettings,
) -> io::Result<Action> {
    let Some(conn) = connections.get_mut(conn_id) else {
        return Ok(Action::Continue);
    };

    if (event.is_readable() || event.is_read_closed()) && !conn.closing {
        loop {
            let buffered = conn.buffers.inbound.len();
            let status = conn.fill_inbound(settings.buffer_size, settings.max_request_size)?;

            if conn.buffers.inbound.len() > buffered
                && conn.session.on_traffic(&mut conn.buffers, &SystemClock) == Action::Close
            {
                conn.closing = true;
            }
            if conn.buffers.inbound.len() >= settings.max_request_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request exceeds max_request_size",
                ));
            }
            conn.flush()?;

            match status {
                ReadStatus::Drained => break,
                ReadStatus::Eof => {
                    conn.closing = true;
                    break;
                }
                // More may be waiting; stop early if output is backing up.
                ReadStatus::Full => {
                    if conn.closing || !conn.buffers.outbound.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    if event.is_writable() {
        conn.flush()?;
    }

    if conn.closing && conn.buffers.outbound.is_empty() {
        return Ok(Action::Close);
    }

    conn.update_interest(registry, Token(conn_id))?;
    Ok(Action::Continue)
}

fn close_connection<S: Source>(
    registry: &Registry,
    connections: &mut Slab<StreamConnection<S>>,
    conn_id: usize,
) {
    if let Some(mut conn) = connections.try_remove(conn_id) {
        let _ = registry.deregister(&mut conn.stream);
        debug!(conn_id, "Connection closed");
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
