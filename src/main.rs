//! echo-reactor: pipelined echo servers on a mio reactor
//!
//! Three service variants share one runtime:
//! - HTTP/1.1 over TCP: each request body is echoed back in a 200 response,
//!   with any number of requests pipelined on one connection
//! - UDP: each datagram is returned to its sender
//! - Unix-domain stream socket: bytes are written back as they arrive
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod protocols;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        transport = ?config.transport,
        host = %config.host,
        port = config.port,
        sock = %config.sock.display(),
        multicore = config.multicore,
        "Starting echo-reactor"
    );

    runtime::run(config)?;
    Ok(())
}
