//! Raw byte echo protocol.
//!
//! Every byte received on a connection is written back unchanged:
//!
//! ```text
//! Request:  hello
//! Response: hello
//! ```
//!
//! Served on Unix-domain stream sockets. The UDP variant echoes whole
//! datagrams and lives in the datagram runtime.

pub mod handler;

pub use handler::on_traffic;
