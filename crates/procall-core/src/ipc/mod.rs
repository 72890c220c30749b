//! Local IPC between a host process and its clients.
//!
//! Calls travel as length-prefixed binary frames (see [`crate::wire`]) over a
//! loopback TCP connection or a Unix domain socket.
//!
//! # Architecture
//!
//! - **Server**: Runs in the host, accepts connections, dispatches calls to the registry
//! - **Client**: Connects to a host, correlates responses with concurrent calls
//! - **Transport**: Endpoint parsing and the listening/connecting sockets

pub mod client;
pub mod server;
pub mod transport;

pub use client::IpcClient;
pub use server::{IpcServer, IpcServerHandle};
pub use transport::Endpoint;
