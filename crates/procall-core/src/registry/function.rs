//! Function descriptors and the handler interface.

use crate::handles::HandleError;
use crate::status::StatusCode;
use crate::value::{Value, ValueType};
use crate::{ProcallError, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Who is calling and what they called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Server-assigned id of the client connection; `0` for local calls.
    pub connection_id: u64,
    pub request_id: u64,
    pub collection: String,
    pub function: String,
}

/// Failure reported by a handler.
///
/// Every variant except `Invariant` becomes an ordinary response status. An
/// `Invariant` failure means the server itself is in a state it should never
/// reach; the dispatcher logs it and closes the connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArguments(String),

    #[error("status {code}")]
    Status { code: StatusCode, results: Vec<Value> },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

impl From<HandleError> for HandlerError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::NotFound(handle) => {
                HandlerError::NotFound(format!("invalid reference {}", handle))
            }
            HandleError::Exhausted => HandlerError::Failed(err.to_string()),
        }
    }
}

pub type HandlerResult = std::result::Result<Vec<Value>, HandlerError>;

/// Server-side implementation of one function.
///
/// Arguments are validated against the descriptor's signature before the
/// handler runs, so positional access by type is safe.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> HandlerResult {
        (self)(ctx, args).await
    }
}

/// Handler for a synchronous engine call, run on tokio's blocking pool.
pub struct BlockingHandler<F> {
    f: Arc<F>,
}

/// Wrap a synchronous function so it does not stall the connection task.
pub fn blocking<F>(f: F) -> BlockingHandler<F>
where
    F: Fn(CallContext, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
{
    BlockingHandler { f: Arc::new(f) }
}

#[async_trait]
impl<F> Handler for BlockingHandler<F>
where
    F: Fn(CallContext, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
{
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> HandlerResult {
        let f = self.f.clone();
        match tokio::task::spawn_blocking(move || f(ctx, args)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::Invariant(
                "blocking handler panicked".to_string(),
            )),
            Err(e) => Err(HandlerError::Failed(format!("blocking handler cancelled: {}", e))),
        }
    }
}

/// One callable function: name, positional signature and handler.
pub struct FunctionDescriptor {
    name: String,
    params: Vec<ValueType>,
    handler: Arc<dyn Handler>,
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        params: &[ValueType],
        handler: impl Handler,
    ) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
            handler: Arc::new(handler),
        }
    }

    /// Build a descriptor from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, params: &[ValueType], f: F) -> Self
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(name, params, f)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Check argument count and per-position type tags against the signature.
    pub fn validate(&self, args: &[Value]) -> Result<()> {
        if args.len() != self.params.len() {
            return Err(ProcallError::InvalidArguments {
                message: format!(
                    "{} expects {} arguments, got {}",
                    self.name,
                    self.params.len(),
                    args.len()
                ),
            });
        }
        for (position, (arg, expected)) in args.iter().zip(&self.params).enumerate() {
            if arg.value_type() != *expected {
                return Err(ProcallError::InvalidArguments {
                    message: format!(
                        "{} argument {}: expected {}, got {}",
                        self.name,
                        position,
                        expected,
                        arg.value_type()
                    ),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
