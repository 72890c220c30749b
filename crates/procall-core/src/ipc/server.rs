//! IPC server loop for a host process.
//!
//! Listens on a local endpoint, accepts connections from client processes,
//! and dispatches call requests to the sealed registry.
//!
//! # Connections
//!
//! Each connection runs in its own spawned task and is split in two:
//!
//! - the reader pulls frames off the transport, decodes them and spawns one
//!   dispatch task per request, queuing its join handle;
//! - the writer awaits the queued handles in order and writes each response.
//!
//! Handlers of one connection may therefore overlap, but responses leave in
//! the order their requests arrived. The queue is bounded, so a client that
//! floods requests stops being read until the writer catches up.
//!
//! A connection closes on EOF, transport error, malformed input, a fatal
//! dispatch outcome or server shutdown. None of these stop the server.
//! Once the peer is gone nobody can receive a reply, so handlers still in
//! flight for that connection are aborted.

use super::transport::{Accepted, Endpoint, Listener};
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, Outcome};
use crate::registry::Registry;
use crate::status::StatusCode;
use crate::wire::{read_frame, write_frame, CallResponse, Message};
use crate::{ProcallError, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Handle to a running IPC server. Dropping shuts down the server.
pub struct IpcServerHandle {
    endpoint: Endpoint,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<()>>,
}

impl IpcServerHandle {
    /// The endpoint the server is bound to, with any OS-assigned port filled in.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Shut down the server gracefully.
    ///
    /// Stops accepting new connections and signals all active connection
    /// handlers to close.
    pub fn shutdown(&mut self) {
        // Signal accept loop to stop
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Signal all connection handlers to close
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// IPC server that listens for client connections.
pub struct IpcServer;

impl IpcServer {
    /// Bind `endpoint` and start serving `registry`.
    ///
    /// The server runs in background tokio tasks.
    pub async fn start(endpoint: &Endpoint, registry: Arc<Registry>) -> Result<IpcServerHandle> {
        let (listener, bound) = Listener::bind(endpoint).await?;

        info!(
            "IPC server listening on {} ({} collections)",
            bound,
            registry.len()
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            Dispatcher::new(registry),
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(IpcServerHandle {
            endpoint: bound,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: Listener,
        dispatcher: Dispatcher,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));
        // 0 is reserved for in-process calls
        let next_connection_id = AtomicU64::new(1);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("IPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ServerConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting IPC connection from {}: at max capacity ({})",
                                    peer,
                                    ServerConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            let connection_id = next_connection_id.fetch_add(1, Ordering::Relaxed);
                            debug!("IPC connection {} from {}", connection_id, peer);
                            active_connections.fetch_add(1, Ordering::Relaxed);

                            let context = ConnectionContext {
                                dispatcher: dispatcher.clone(),
                                connection_id,
                                shutdown: conn_shutdown_rx.clone(),
                                active: active_connections.clone(),
                            };
                            match stream {
                                Accepted::Tcp(stream) => context.spawn(stream),
                                #[cfg(unix)]
                                Accepted::Unix(stream) => context.spawn(stream),
                            }
                        }
                        Err(e) => {
                            error!("IPC accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Serve one connection over any byte stream until it closes.
    ///
    /// Returns `Ok(())` when the peer disconnects or `shutdown` fires, and the
    /// reason otherwise.
    pub async fn serve_stream<S>(
        stream: S,
        dispatcher: Dispatcher,
        connection_id: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let (queue_tx, queue_rx) =
            mpsc::channel::<Dispatch>(ServerConfig::MAX_IN_FLIGHT_PER_CONNECTION);
        let writer_task = tokio::spawn(Self::write_loop(writer, queue_rx, connection_id));

        let stop = loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break Stop::PeerClosed,
                    Err(e) => break Stop::Failed(e),
                },
                _ = shutdown.changed() => break Stop::Shutdown,
                _ = queue_tx.closed() => break Stop::WriterDone,
            };

            let request = match Message::decode(&frame) {
                Ok(Message::Request(request)) => request,
                Ok(Message::Response(response)) => {
                    break Stop::Failed(ProcallError::malformed(format!(
                        "client sent a response (request {})",
                        response.request_id
                    )))
                }
                Err(e) => break Stop::Failed(e),
            };

            let dispatcher = dispatcher.clone();
            let dispatch = Dispatch(tokio::spawn(async move {
                dispatcher.invoke(connection_id, request).await
            }));
            // A full queue must not hide a shutdown
            let queued = tokio::select! {
                result = queue_tx.send(dispatch) => result.is_ok(),
                _ = shutdown.changed() => break Stop::Shutdown,
            };
            if !queued {
                break Stop::WriterDone;
            }
        };
        drop(queue_tx);

        match stop {
            Stop::WriterDone => joined(writer_task.await),
            // Aborting the writer drops the queued dispatches, which aborts them.
            Stop::PeerClosed | Stop::Shutdown => {
                writer_task.abort();
                Ok(())
            }
            Stop::Failed(e) => {
                writer_task.abort();
                Err(e)
            }
        }
    }

    async fn write_loop<W>(
        mut writer: W,
        mut queue: mpsc::Receiver<Dispatch>,
        connection_id: u64,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(mut dispatch) = queue.recv().await {
            let response = match (&mut dispatch.0).await {
                Ok(Outcome::Reply(response)) => response,
                Ok(Outcome::Fatal { request_id, reason }) => {
                    return Err(ProcallError::InvariantViolation {
                        message: format!("request {}: {}", request_id, reason),
                    });
                }
                Err(e) => {
                    return Err(ProcallError::InvariantViolation {
                        message: format!("dispatch task failed: {}", e),
                    });
                }
            };

            let request_id = response.request_id;
            let payload = match Message::from(response).encode() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        "Response to request {} on connection {} not encodable: {}",
                        request_id, connection_id, e
                    );
                    Message::from(CallResponse::error(
                        request_id,
                        StatusCode::Error,
                        e.to_string(),
                    ))
                    .encode()?
                }
            };
            write_frame(&mut writer, &payload).await?;
        }
        writer.shutdown().await?;
        Ok(())
    }
}

/// A queued dispatch task. Dropping it before completion aborts the handler.
struct Dispatch(JoinHandle<Outcome>);

impl Drop for Dispatch {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Why a connection's read loop stopped.
enum Stop {
    PeerClosed,
    Shutdown,
    WriterDone,
    Failed(ProcallError),
}

fn joined(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.unwrap_or_else(|e| {
        Err(ProcallError::InvariantViolation {
            message: format!("connection writer failed: {}", e),
        })
    })
}

/// What a spawned connection task needs from the accept loop.
struct ConnectionContext {
    dispatcher: Dispatcher,
    connection_id: u64,
    shutdown: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
}

impl ConnectionContext {
    fn spawn<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tokio::spawn(async move {
            let id = self.connection_id;
            match IpcServer::serve_stream(stream, self.dispatcher, id, self.shutdown).await {
                Ok(()) => debug!("IPC connection {} closed", id),
                Err(e @ ProcallError::Malformed { .. }) => {
                    error!("IPC connection {} closed on malformed input: {}", id, e)
                }
                Err(e @ ProcallError::InvariantViolation { .. }) => {
                    error!("IPC connection {} terminated: {}", id, e)
                }
                Err(e) => debug!("IPC connection {} ended: {}", id, e),
            }
            self.active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
