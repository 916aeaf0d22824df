//! mio event loop for UDP echo.
//!
//! Each datagram is sent back to its sender as soon as it is received.
//! A reply the socket cannot take right away is dropped, as UDP allows.

use crate::config::Config;
use crate::runtime::{join_workers, resolve_addr};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

const SOCKET_TOKEN: Token = Token(0);

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Run the UDP echo server.
pub fn serve(config: &Config) -> io::Result<()> {
    let workers = config.workers();
    let addr = resolve_addr(&config.host, config.port)?;
    let sockets = bind(addr, workers, config.reuseport)?;

    info!(
        workers,
        addr = %addr,
        multicore = config.multicore,
        reuseport = config.reuseport,
        "UDP echo server listening"
    );

    let handles = spawn_workers(sockets, config.batch_size)?;
    join_workers(handles);
    Ok(())
}

/// Bind the sockets the workers read from.
///
/// With `reuseport` every worker gets its own SO_REUSEPORT socket and the
/// kernel spreads datagrams between them. Otherwise one socket is bound and
/// shared by all workers.
pub fn bind(addr: SocketAddr, workers: usize, reuseport: bool) -> io::Result<Vec<UdpSocket>> {
    let first = create_socket(addr, reuseport)?;
    let addr = first.local_addr()?;

    let mut sockets = Vec::with_capacity(workers);
    for _ in 1..workers {
        let socket = if reuseport {
            create_socket(addr, true)?
        } else {
            first.try_clone()?
        };
        sockets.push(UdpSocket::from_std(socket));
    }
    sockets.insert(0, UdpSocket::from_std(first));
    Ok(sockets)
}

/// Start one worker thread per socket.
pub fn spawn_workers(sockets: Vec<UdpSocket>, batch_size: usize) -> io::Result<Vec<JoinHandle<()>>> {
    sockets
        .into_iter()
        .enumerate()
        .map(|(worker_id, socket)| {
            thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    if let Err(e) = worker_loop(worker_id, socket, batch_size) {
                        error!(worker = worker_id, error = %e, "Worker failed");
                    }
                })
        })
        .collect()
}

fn worker_loop(worker_id: usize, mut socket: UdpSocket, batch_size: usize) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(batch_size);
    poll.registry()
        .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

    let mut buf = vec![0u8; MAX_DATAGRAM];

    info!(worker = worker_id, "Worker started");

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            if event.token() == SOCKET_TOKEN {
                echo_datagrams(&socket, &mut buf);
            }
        }
    }
}

/// Echo datagrams until the socket has none left.
fn echo_datagrams(socket: &UdpSocket, buf: &mut [u8]) {
    loop {
        let (n, peer) = match socket.recv_from(buf) {
            Ok(received) => received,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "Receive error");
                return;
            }
        };

        match socket.send_to(&buf[..n], peer) {
            Ok(_) => trace!(bytes = n, peer = %peer, "echoed datagram"),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(bytes = n, peer = %peer, "dropped reply");
            }
            Err(e) => debug!(peer = %peer, error = %e, "Send error"),
        }
    }
}

/// Create a non-blocking UDP socket bound to `addr`.
fn create_socket(addr: SocketAddr, reuseport: bool) -> io::Result<std::net::UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    if reuseport {
        socket.set_reuse_port(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> std::net::UdpSocket {
        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
    }

    #[test]
    fn test_bind_shared_socket() {
        let sockets = bind("127.0.0.1:0".parse().unwrap(), 3, false).unwrap();
        let addr = sockets[0].local_addr().unwrap();
        assert_eq!(sockets.len(), 3);
        assert!(sockets.iter().all(|s| s.local_addr().unwrap() == addr));
    }

    #[test]
    fn test_bind_reuseport_sockets() {
        let sockets = bind("127.0.0.1:0".parse().unwrap(), 2, true).unwrap();
        let port = sockets[0].local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(sockets[1].local_addr().unwrap().port(), port);
    }

    #[test]
    fn test_udp_echo() {
        let sockets = bind("127.0.0.1:0".parse().unwrap(), 1, false).unwrap();
        let addr = sockets[0].local_addr().unwrap();
        spawn_workers(sockets, 64).unwrap();

        let client = client();
        let mut buf = [0u8; 64];
        for payload in [&b"first datagram"[..], &b"second"[..]] {
            client.send_to(payload, addr).unwrap();
            let (n, from) = client.recv_from(&mut buf).unwrap();
            assert_eq!(from, addr);
            assert_eq!(&buf[..n], payload);
        }
    }
}
