//! Protocol implementations.
//!
//! Each protocol exposes an `on_traffic` callback that the stream runtime
//! invokes with the buffered bytes of one connection.
//!
//! - `http`: HTTP/1.1 request framing with pipelined echo responses
//! - `echo`: raw byte echo
//!
//! UDP echo has no framing and lives entirely in `runtime::datagram`.

pub mod echo;
pub mod http;
