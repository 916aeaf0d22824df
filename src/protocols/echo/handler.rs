//! Echo protocol handler.

use crate::runtime::{Action, Conn};
use tracing::trace;

/// Write back everything buffered on the connection and consume it.
pub fn on_traffic(conn: &mut dyn Conn) -> Action {
    let data = conn.peek(None).to_vec();
    if data.is_empty() {
        return Action::Continue;
    }

    conn.write(&data);
    let consumed = conn.discard(data.len());
    trace!(bytes = consumed, "echoed");

    Action::Continue
}
