//! Procall Core - typed cross-process calls between a host and its clients.
//!
//! A host process exposes named *collections* of functions. Clients in other
//! processes call them with positional, typed [`Value`] arguments and get
//! typed results back. Engine objects never cross the boundary; the host
//! hands out opaque [`Handle`]s instead.
//!
//! # Example
//!
//! ```rust,ignore
//! use procall_core::{Collection, Endpoint, IpcClient, IpcServer, Registry, Value, ValueType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> procall_core::Result<()> {
//!     let registry = Registry::builder()
//!         .with_collection(
//!             Collection::new("Properties")
//!                 .with_function("Clicked", &[ValueType::UInt64, ValueType::String], clicked)?,
//!         )?
//!         .with_system()
//!         .seal()?;
//!
//!     let server = IpcServer::start(&Endpoint::tcp_ephemeral(), Arc::new(registry)).await?;
//!
//!     let client = IpcClient::connect(server.endpoint()).await?;
//!     let pong = client.call_default("System", "Ping", vec![]).await?;
//!     assert_eq!(pong, vec![Value::from("pong")]);
//!     Ok(())
//! }
//! ```

pub mod builtin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handles;
pub mod ipc;
pub mod registry;
pub mod status;
pub mod value;
pub mod wire;

// Re-export commonly used types
pub use builtin::SYSTEM_COLLECTION;
pub use dispatch::{Dispatcher, Outcome};
pub use error::{ProcallError, Result};
pub use handles::{Handle, HandleError, HandleGuard, HandleTable};
pub use ipc::{Endpoint, IpcClient, IpcServer, IpcServerHandle};
pub use registry::{
    blocking, CallContext, Collection, CollectionSummary, DispatchHook, FunctionDescriptor,
    FunctionSummary, Handler, HandlerError, HandlerResult, Registry, RegistryBuilder,
};
pub use status::StatusCode;
pub use value::{Value, ValueType};
pub use wire::{CallRequest, CallResponse, Message};
