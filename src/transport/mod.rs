//! Transport module - server addressing and TCP connections.
//!
//! Provides:
//! - `ServerAddr`/`ServerList` parsing of `host[:port]` strings
//! - `Connection` with connect-retry, framed send and buffered receive
//! - `wait_any_readable` readiness multiplexing over many connections

mod connection;
mod server;

pub use connection::{wait_any_readable, Connection};
pub use server::{ServerAddr, ServerList, DEFAULT_PORT};
