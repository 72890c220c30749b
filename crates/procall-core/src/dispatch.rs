//! Call dispatcher.
//!
//! Turns one decoded [`CallRequest`] into exactly one [`CallResponse`]:
//! resolve the target, validate the arguments against its signature, run the
//! collection hook, then run the handler and map its outcome to a status.
//! Nothing here touches the transport; the server loop owns that.

use crate::registry::{CallContext, HandlerError, Registry};
use crate::status::StatusCode;
use crate::value::Value;
use crate::wire::{CallRequest, CallResponse};
use crate::ProcallError;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Result of dispatching one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this response and keep serving.
    Reply(CallResponse),
    /// The handler hit a state that should be unreachable. The connection is
    /// closed without a reply; the server keeps running.
    Fatal { request_id: u64, reason: String },
}

/// Shared, cheaply cloneable front end to a sealed [`Registry`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Dispatch a request received on connection `connection_id`.
    pub async fn invoke(&self, connection_id: u64, request: CallRequest) -> Outcome {
        let CallRequest {
            request_id,
            collection,
            function,
            args,
        } = request;
        debug!(
            "Dispatching {}.{} (conn {}, request {})",
            collection, function, connection_id, request_id
        );

        let (found, descriptor) = match self.registry.lookup(&collection, &function) {
            Ok(found) => found,
            Err(e) => return Outcome::Reply(rejected(request_id, e)),
        };
        if let Err(e) = descriptor.validate(&args) {
            return Outcome::Reply(rejected(request_id, e));
        }

        let ctx = CallContext {
            connection_id,
            request_id,
            collection,
            function,
        };

        if let Some(hook) = found.hook() {
            if let Err(e) = hook.before_call(&ctx, &args) {
                return finish(&ctx, Err(e));
            }
        }

        let handler = descriptor.handler().clone();
        let call_ctx = ctx.clone();
        match AssertUnwindSafe(handler.call(call_ctx, args))
            .catch_unwind()
            .await
        {
            Ok(result) => finish(&ctx, result),
            Err(panic) => fatal(&ctx, format!("handler panicked: {}", panic_message(&*panic))),
        }
    }

    /// Invoke a function in-process, without a transport.
    ///
    /// A fatal outcome is reported as `Error`.
    pub async fn call_local(
        &self,
        collection: &str,
        function: &str,
        args: Vec<Value>,
    ) -> (StatusCode, Vec<Value>) {
        let request = CallRequest::new(0, collection, function, args);
        match self.invoke(0, request).await {
            Outcome::Reply(response) => (response.status, response.results),
            Outcome::Fatal { reason, .. } => (StatusCode::Error, vec![Value::String(reason)]),
        }
    }
}

/// A request refused before its handler ran.
fn rejected(request_id: u64, err: ProcallError) -> CallResponse {
    debug!("Request {} rejected: {}", request_id, err);
    let status = err.status_code();
    let message = match err {
        ProcallError::NotFound { message } | ProcallError::InvalidArguments { message } => message,
        other => other.to_string(),
    };
    CallResponse::error(request_id, status, message)
}

fn finish(ctx: &CallContext, result: Result<Vec<Value>, HandlerError>) -> Outcome {
    let request_id = ctx.request_id;
    let response = match result {
        Ok(results) => CallResponse::ok(request_id, results),
        Err(HandlerError::Failed(message)) => {
            CallResponse::error(request_id, StatusCode::Error, message)
        }
        Err(HandlerError::NotFound(message)) => {
            CallResponse::error(request_id, StatusCode::NotFound, message)
        }
        Err(HandlerError::InvalidArguments(message)) => {
            CallResponse::error(request_id, StatusCode::InvalidArguments, message)
        }
        Err(HandlerError::Status {
            code: StatusCode::Custom(code),
            ..
        }) if code < StatusCode::CUSTOM_BASE => {
            warn!(
                "{}.{} returned reserved custom status {:#x}",
                ctx.collection, ctx.function, code
            );
            CallResponse::error(
                request_id,
                StatusCode::Error,
                format!("handler returned reserved status {:#x}", code),
            )
        }
        Err(HandlerError::Status { code, results }) => CallResponse {
            request_id,
            status: code,
            results,
        },
        Err(HandlerError::Invariant(reason)) => return fatal(ctx, reason),
    };
    debug!(
        "{}.{} (request {}) -> {}",
        ctx.collection, ctx.function, request_id, response.status
    );
    Outcome::Reply(response)
}

fn fatal(ctx: &CallContext, reason: String) -> Outcome {
    error!(
        "Fatal error in {}.{} (conn {}, request {}): {}",
        ctx.collection, ctx.function, ctx.connection_id, ctx.request_id, reason
    );
    Outcome::Fatal {
        request_id: ctx.request_id,
        reason,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{Handle, HandleTable};
    use crate::registry::{params, Collection, HandlerResult};
    use crate::value::ValueType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher(collection: Collection) -> Dispatcher {
        let registry = Registry::builder()
            .with_collection(collection)
            .unwrap()
            .seal()
            .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    fn request(function: &str, args: Vec<Value>) -> CallRequest {
        CallRequest::new(7, "Properties", function, args)
    }

    fn reply(outcome: Outcome) -> CallResponse {
        match outcome {
            Outcome::Reply(response) => response,
            other => panic!("Expected Reply, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_found() {
        let d = dispatcher(Collection::new("Properties"));

        let response = reply(d.invoke(1, request("Clicked", vec![])).await);
        assert_eq!(response.request_id, 7);
        assert_eq!(response.status, StatusCode::NotFound);
        assert_eq!(response.results, vec![Value::from("Unknown function: Properties.Clicked")]);

        let other = CallRequest::new(8, "Transition", "Start", vec![]);
        let response = reply(d.invoke(1, other).await);
        assert_eq!(response.status, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn test_invalid_arguments_skip_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let d = dispatcher(
            Collection::new("Properties")
                .with_function(
                    "Clicked",
                    &[ValueType::UInt64, ValueType::String],
                    move |_ctx, _args| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { Ok(vec![]) }
                    },
                )
                .unwrap(),
        );

        let wrong_tag = request("Clicked", vec![Value::from("42"), Value::from("volume")]);
        let response = reply(d.invoke(1, wrong_tag).await);
        assert_eq!(response.status, StatusCode::InvalidArguments);

        let wrong_arity = request("Clicked", vec![Value::UInt64(42)]);
        let response = reply(d.invoke(1, wrong_arity).await);
        assert_eq!(response.status, StatusCode::InvalidArguments);

        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let good = request("Clicked", vec![Value::UInt64(42), Value::from("volume")]);
        let response = reply(d.invoke(1, good).await);
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn modified(sources: Arc<HandleTable<String>>, args: Vec<Value>) -> HandlerResult {
        let handle = params::require_handle(&args, 0)?;
        let _source = sources.resolve(handle).await?;
        Ok(vec![])
    }

    #[tokio::test]
    async fn test_modified_on_unknown_handle_is_not_found() {
        let sources: Arc<HandleTable<String>> = Arc::new(HandleTable::new("source"));
        let d = dispatcher(
            Collection::new("Properties")
                .with_function(
                    "Modified",
                    &[ValueType::UInt64, ValueType::String, ValueType::String],
                    move |_ctx, args| modified(sources.clone(), args),
                )
                .unwrap(),
        );

        let args = vec![
            Value::UInt64(42),
            Value::from("volume"),
            Value::from("{\"enabled\":true}"),
        ];
        let response = reply(d.invoke(1, request("Modified", args)).await);
        assert_eq!(response.status, StatusCode::NotFound);
        assert_eq!(
            response.results,
            vec![Value::from(format!("invalid reference {}", Handle::from_raw(42)))]
        );
    }

    #[tokio::test]
    async fn test_handler_errors_map_to_statuses() {
        let d = dispatcher(
            Collection::new("Properties")
                .with_function("Failed", &[], |_ctx, _args| async {
                    Err(HandlerError::failed("engine refused"))
                })
                .unwrap()
                .with_function("Custom", &[], |_ctx, _args| async {
                    Err(HandlerError::Status {
                        code: StatusCode::Custom(0x101),
                        results: vec![Value::Int32(-1)],
                    })
                })
                .unwrap(),
        );

        let response = reply(d.invoke(1, request("Failed", vec![])).await);
        assert_eq!(response.status, StatusCode::Error);
        assert_eq!(response.results, vec![Value::from("engine refused")]);

        let response = reply(d.invoke(1, request("Custom", vec![])).await);
        assert_eq!(response.status, StatusCode::Custom(0x101));
        assert_eq!(response.results, vec![Value::Int32(-1)]);
    }

    #[tokio::test]
    async fn test_reserved_custom_status_becomes_error() {
        let d = dispatcher(Collection::new("Properties").with_function(
            "Reserved",
            &[],
            |_ctx, _args| async {
                Err(HandlerError::Status {
                    code: StatusCode::Custom(2),
                    results: vec![],
                })
            },
        )
        .unwrap());

        let response = reply(d.invoke(1, request("Reserved", vec![])).await);
        assert_eq!(response.status, StatusCode::Error);
        assert_eq!(
            response.results,
            vec![Value::from("handler returned reserved status 0x2")]
        );

        // What goes on the wire decodes back to the same status
        let decoded = StatusCode::from_u32(response.status.as_u32());
        assert_eq!(decoded, response.status);
    }

    #[tokio::test]
    async fn test_invariant_and_panic_are_fatal() {
        async fn broken(_ctx: CallContext, _args: Vec<Value>) -> HandlerResult {
            Err(HandlerError::Invariant("scene graph cycle".into()))
        }
        async fn panicking(_ctx: CallContext, _args: Vec<Value>) -> HandlerResult {
            panic!("index out of range")
        }

        let d = dispatcher(
            Collection::new("Properties")
                .with_function("Broken", &[], broken)
                .unwrap()
                .with_function("Panics", &[], panicking)
                .unwrap(),
        );

        assert_eq!(
            d.invoke(1, request("Broken", vec![])).await,
            Outcome::Fatal {
                request_id: 7,
                reason: "scene graph cycle".into()
            }
        );
        match d.invoke(1, request("Panics", vec![])).await {
            Outcome::Fatal { reason, .. } => assert!(reason.contains("index out of range")),
            other => panic!("Expected Fatal, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hook_vetoes_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let d = dispatcher(
            Collection::new("Properties")
                .with_function("Clicked", &[ValueType::UInt64], move |_ctx, _args| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(vec![]) }
                })
                .unwrap()
                .with_hook(|_ctx: &CallContext, args: &[Value]| {
                    if args[0].as_u64() == Some(0) {
                        Err(HandlerError::NotFound("null handle".into()))
                    } else {
                        Ok(())
                    }
                }),
        );

        let response = reply(d.invoke(1, request("Clicked", vec![Value::UInt64(0)])).await);
        assert_eq!(response.status, StatusCode::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let response = reply(d.invoke(1, request("Clicked", vec![Value::UInt64(3)])).await);
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_local() {
        let d = dispatcher(
            Collection::new("Properties")
                .with_function("Echo", &[ValueType::String], |_ctx, args| async move { Ok(args) })
                .unwrap(),
        );
        let (status, results) = d
            .call_local("Properties", "Echo", vec![Value::from("hi")])
            .await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(results, vec![Value::from("hi")]);
    }
}
