//! Centralized configuration for procall.
//!
//! Limits and timeouts for the wire format, the server loop and the client
//! stub. These are process-wide constants; nothing here is read at runtime.

use std::time::Duration;

/// Wire format limits.
pub struct WireConfig;

impl WireConfig {
    /// Largest frame payload accepted from a peer.
    pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024; // 64MB
    /// Largest argument or result count in one message.
    pub const MAX_VALUES_PER_MESSAGE: usize = 65_536;
}

/// Server loop limits.
pub struct ServerConfig;

impl ServerConfig {
    pub const MAX_CONNECTIONS: usize = 32;
    /// Dispatches that may be running for one connection before the reader
    /// stops pulling new requests off the transport.
    pub const MAX_IN_FLIGHT_PER_CONNECTION: usize = 64;
}

/// Client stub limits and timeouts.
pub struct ClientConfig;

impl ClientConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_PENDING_CALLS: usize = 1024;
    /// Encoded frames queued for the writer task.
    pub const WRITE_QUEUE_DEPTH: usize = 256;
}
