//! IPC client stub for calling into a host process.
//!
//! One connection carries any number of concurrent calls. Each call takes a
//! fresh request id, registers a pending slot under it, queues its frame for
//! the writer task and waits on the slot. A reader task matches every
//! response to its slot by id, so calls may complete in any order and a slow
//! call never blocks the others.
//!
//! # Thread Safety
//!
//! All methods take `&self`; share the client behind an `Arc` to call it from
//! several tasks. The pending table sits behind a short std mutex that is
//! never held across an await.

use super::transport::Endpoint;
use crate::config::ClientConfig;
use crate::value::Value;
use crate::wire::{read_frame, write_frame, CallRequest, CallResponse, Message};
use crate::{ProcallError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

/// IPC client connected to one host.
pub struct IpcClient {
    shared: Arc<Shared>,
    outgoing: mpsc::Sender<Bytes>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl IpcClient {
    /// Connect to a host's IPC server.
    ///
    /// Uses the configured connection timeout from `ClientConfig`.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let client = tokio::time::timeout(ClientConfig::CONNECT_TIMEOUT, Self::open(endpoint))
            .await
            .map_err(|_| ProcallError::Timeout(ClientConfig::CONNECT_TIMEOUT))??;

        debug!("IPC client connected to {}", endpoint);
        Ok(client)
    }

    async fn open(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok(Self::from_stream(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::from_stream(UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(ProcallError::Config {
                message: format!(
                    "Unix domain sockets are not supported on this platform ({})",
                    path.display()
                ),
            }),
        }
    }

    /// Run the client over an already connected byte stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(Shared::new());
        let (outgoing, outgoing_rx) = mpsc::channel(ClientConfig::WRITE_QUEUE_DEPTH);

        let reader_task = tokio::spawn(read_loop(reader, shared.clone()));
        let writer_task = tokio::spawn(write_loop(writer, outgoing_rx, shared.clone()));

        Self {
            shared,
            outgoing,
            reader_task,
            writer_task,
        }
    }

    /// Call `collection.function` and return the raw response.
    ///
    /// Only a missing response is an error here: a response with a failure
    /// status is returned as is. Nothing is retried; after a timeout the
    /// request may still run on the host, and its late response is dropped.
    pub async fn call_raw(
        &self,
        collection: &str,
        function: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<CallResponse> {
        let slot = self.shared.register()?;
        let request_id = slot.request_id;
        let payload =
            Message::from(CallRequest::new(request_id, collection, function, args)).encode()?;

        debug!("IPC call {}.{} (request {})", collection, function, request_id);

        let exchange = async {
            self.outgoing
                .send(payload)
                .await
                .map_err(|_| ProcallError::Disconnected)?;
            slot.wait().await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    "IPC call {}.{} (request {}) timed out after {:?}",
                    collection, function, request_id, timeout
                );
                Err(ProcallError::Timeout(timeout))
            }
        }
    }

    /// Call `collection.function` and return its result values.
    ///
    /// A non-Ok status becomes the matching structured error.
    pub async fn call(
        &self,
        collection: &str,
        function: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        self.call_raw(collection, function, args, timeout)
            .await?
            .into_result()
    }

    /// [`call`](Self::call) with `ClientConfig::DEFAULT_CALL_TIMEOUT`.
    pub async fn call_default(
        &self,
        collection: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.call(collection, function, args, ClientConfig::DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// Calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().slots.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Close the connection. Pending calls fail with `Disconnected`.
    pub fn close(&self) {
        self.shared.close();
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for IpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcClient")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// State shared between callers and the reader task.
struct Shared {
    next_id: AtomicU64,
    pending: Mutex<PendingTable>,
}

struct PendingTable {
    slots: HashMap<u64, oneshot::Sender<CallResponse>>,
    closed: bool,
}

impl Shared {
    fn new() -> Self {
        Self {
            // 0 is never sent
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingTable {
                slots: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(self: &Arc<Self>) -> Result<PendingSlot> {
        let mut table = self.lock();
        if table.closed {
            return Err(ProcallError::Disconnected);
        }
        if table.slots.len() >= ClientConfig::MAX_PENDING_CALLS {
            return Err(ProcallError::TooManyPending {
                pending: table.slots.len(),
                max: ClientConfig::MAX_PENDING_CALLS,
            });
        }

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.slots.insert(request_id, tx);

        Ok(PendingSlot {
            shared: self.clone(),
            request_id,
            rx: Some(rx),
        })
    }

    /// Hand a response to the call waiting for it.
    fn complete(&self, response: CallResponse) {
        let request_id = response.request_id;
        let slot = self.lock().slots.remove(&request_id);
        match slot {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!("Caller for request {} went away before its response", request_id);
                }
            }
            None if request_id != 0 && request_id < self.next_id.load(Ordering::Relaxed) => {
                warn!("Discarding late response for request {}", request_id);
            }
            None => {
                warn!("Discarding response for unknown request {}", request_id);
            }
        }
    }

    fn cancel(&self, request_id: u64) {
        self.lock().slots.remove(&request_id);
    }

    /// Fail every pending call and refuse new ones.
    fn close(&self) {
        let mut table = self.lock();
        if !table.closed {
            table.closed = true;
            if !table.slots.is_empty() {
                debug!("Failing {} pending calls on disconnect", table.slots.len());
            }
            // Dropping the senders wakes every waiter with `Disconnected`.
            table.slots.clear();
        }
    }
}

/// A registered call. Dropping it (timeout, cancelled caller) frees the slot.
struct PendingSlot {
    shared: Arc<Shared>,
    request_id: u64,
    rx: Option<oneshot::Receiver<CallResponse>>,
}

impl PendingSlot {
    async fn wait(mut self) -> Result<CallResponse> {
        let rx = self.rx.take().ok_or(ProcallError::Disconnected)?;
        rx.await.map_err(|_| ProcallError::Disconnected)
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.shared.cancel(self.request_id);
    }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => match Message::decode(&frame) {
                Ok(Message::Response(response)) => shared.complete(response),
                Ok(Message::Request(request)) => {
                    error!(
                        "Host sent a request (request {}); closing connection",
                        request.request_id
                    );
                    break;
                }
                Err(e) => {
                    error!("Malformed frame from host: {}", e);
                    break;
                }
            },
            Ok(None) => {
                debug!("Host closed the IPC connection");
                break;
            }
            Err(e) => {
                warn!("IPC client read failed: {}", e);
                break;
            }
        }
    }
    shared.close();
}

async fn write_loop<W>(mut writer: W, mut outgoing: mpsc::Receiver<Bytes>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!("IPC client write failed: {}", e);
            break;
        }
    }
    shared.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;
    use futures::future::join_all;
    use tokio::io::DuplexStream;

    fn connected() -> (IpcClient, DuplexStream) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        (IpcClient::from_stream(client_end), server_end)
    }

    async fn next_request(server: &mut DuplexStream) -> CallRequest {
        let frame = read_frame(server).await.unwrap().unwrap();
        match Message::decode(&frame).unwrap() {
            Message::Request(request) => request,
            other => panic!("Expected Request, got: {:?}", other),
        }
    }

    async fn reply(server: &mut DuplexStream, response: CallResponse) {
        let payload = Message::from(response).encode().unwrap();
        write_frame(server, &payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_ids_start_at_one() {
        let (client, mut server) = connected();

        let host = async {
            for expected in 1..=3u64 {
                let request = next_request(&mut server).await;
                assert_eq!(request.request_id, expected);
                reply(
                    &mut server,
                    CallResponse::ok(request.request_id, vec![Value::UInt64(expected)]),
                )
                .await;
            }
        };
        let calls = async {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(client.call_default("System", "Ping", vec![]).await.unwrap());
            }
            out
        };

        let ((), out) = tokio::join!(host, calls);
        assert_eq!(
            out,
            vec![
                vec![Value::UInt64(1)],
                vec![Value::UInt64(2)],
                vec![Value::UInt64(3)]
            ]
        );
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_responses_matched_out_of_order() {
        let (client, mut server) = connected();

        let host = async {
            let mut requests = Vec::new();
            for _ in 0..3 {
                requests.push(next_request(&mut server).await);
            }
            // Answer in reverse order, echoing the first argument
            for request in requests.into_iter().rev() {
                reply(
                    &mut server,
                    CallResponse::ok(request.request_id, request.args),
                )
                .await;
            }
        };
        let calls = join_all((0..3).map(|i| {
            client.call_default("Test", "Echo", vec![Value::Int32(i)])
        }));

        let ((), results) = tokio::join!(host, calls);
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), vec![Value::Int32(i as i32)]);
        }
    }

    #[tokio::test]
    async fn test_error_status_becomes_structured_error() {
        let (client, mut server) = connected();

        let host = async {
            let request = next_request(&mut server).await;
            reply(
                &mut server,
                CallResponse::error(request.request_id, StatusCode::NotFound, "invalid reference 0x2a"),
            )
            .await;
        };
        let (_, result) = tokio::join!(host, client.call_default("Properties", "Clicked", vec![]));
        match result {
            Err(ProcallError::NotFound { message }) => assert_eq!(message, "invalid reference 0x2a"),
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let (client, mut server) = connected();

        let result = client
            .call("Test", "Slow", vec![], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ProcallError::Timeout(_))));
        assert_eq!(client.pending_count(), 0);

        // The host answers the timed-out request, then the next one
        let host = async {
            let late = next_request(&mut server).await;
            assert_eq!(late.request_id, 1);
            reply(&mut server, CallResponse::ok(1, vec![Value::from("late")])).await;

            let fresh = next_request(&mut server).await;
            assert_eq!(fresh.request_id, 2);
            reply(&mut server, CallResponse::ok(2, vec![Value::from("fresh")])).await;
        };
        let (_, result) = tokio::join!(host, client.call_default("Test", "Fast", vec![]));
        assert_eq!(result.unwrap(), vec![Value::from("fresh")]);
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_calls() {
        let (client, mut server) = connected();

        let host = async move {
            for _ in 0..3 {
                next_request(&mut server).await;
            }
            drop(server);
        };
        let calls = join_all((0..3).map(|_| client.call_default("Test", "Hang", vec![])));

        let ((), results) = tokio::join!(host, calls);
        for result in results {
            assert!(matches!(result, Err(ProcallError::Disconnected)));
        }
        assert!(client.is_closed());
        assert_eq!(client.pending_count(), 0);

        let after = client.call_default("Test", "Hang", vec![]).await;
        assert!(matches!(after, Err(ProcallError::Disconnected)));
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (client, _server) = connected();

        let calls = join_all((0..3).map(|_| client.call_default("Test", "Hang", vec![])));
        let closer = async {
            while client.pending_count() < 3 {
                tokio::task::yield_now().await;
            }
            client.close();
        };

        let (results, ()) = tokio::join!(calls, closer);
        for result in results {
            assert!(matches!(result, Err(ProcallError::Disconnected)));
        }
    }

    #[test]
    fn test_pending_limit() {
        let shared = Arc::new(Shared::new());
        let slots: Vec<PendingSlot> = (0..ClientConfig::MAX_PENDING_CALLS)
            .map(|_| shared.register().unwrap())
            .collect();
        assert!(matches!(
            shared.register(),
            Err(ProcallError::TooManyPending { .. })
        ));

        // Freeing one slot makes room again
        drop(slots);
        assert!(shared.register().is_ok());
    }
}
