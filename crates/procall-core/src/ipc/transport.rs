//! Local transport endpoints.
//!
//! The call layer only runs between processes on one machine, so an endpoint
//! is either a loopback TCP address or a Unix domain socket path:
//!
//! ```text
//! tcp://127.0.0.1:4710
//! unix:///run/user/1000/procall.sock
//! ```

use crate::{ProcallError, Result};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Where a server listens and a client connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Loopback TCP. Port `0` asks the OS for a free port when binding.
    Tcp(SocketAddr),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Loopback TCP on an OS-assigned port.
    pub fn tcp_ephemeral() -> Self {
        Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}

impl FromStr for Endpoint {
    type Err = ProcallError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let addr: SocketAddr = addr.parse().map_err(|e| ProcallError::Config {
                message: format!("Invalid TCP endpoint {}: {}", s, e),
            })?;
            if !addr.ip().is_loopback() {
                return Err(ProcallError::Config {
                    message: format!("TCP endpoint must be a loopback address, got {}", addr),
                });
            }
            Ok(Endpoint::Tcp(addr))
        } else if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(ProcallError::Config {
                    message: "Unix endpoint has an empty path".to_string(),
                });
            }
            Ok(Endpoint::Unix(PathBuf::from(path)))
        } else {
            Err(ProcallError::Config {
                message: format!("Unsupported endpoint {} (expected tcp:// or unix://)", s),
            })
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A freshly accepted connection.
pub(crate) enum Accepted {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Bound listening socket. A Unix socket file is removed when this drops.
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind `endpoint` and return the listener with the endpoint it actually
    /// bound (the OS-assigned port for `tcp://...:0`).
    pub(crate) async fn bind(endpoint: &Endpoint) -> Result<(Listener, Endpoint)> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                if !addr.ip().is_loopback() {
                    return Err(ProcallError::Config {
                        message: format!("Refusing to listen on non-loopback address {}", addr),
                    });
                }
                let listener = TcpListener::bind(addr).await?;
                let bound = Endpoint::Tcp(listener.local_addr()?);
                Ok((Listener::Tcp(listener), bound))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                remove_stale_socket(path).await?;
                let listener = UnixListener::bind(path)?;
                Ok((
                    Listener::Unix {
                        listener,
                        path: path.clone(),
                    },
                    endpoint.clone(),
                ))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(ProcallError::Config {
                message: format!(
                    "Unix domain sockets are not supported on this platform ({})",
                    path.display()
                ),
            }),
        }
    }

    /// Accept one connection and describe the peer for log lines.
    pub(crate) async fn accept(&self) -> std::io::Result<(Accepted, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                // Requests are small; don't let Nagle hold them back.
                stream.set_nodelay(true)?;
                Ok((Accepted::Tcp(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Accepted::Unix(stream), path.display().to_string()))
            }
        }
    }

    fn socket_path(&self) -> Option<&Path> {
        match self {
            #[cfg(unix)]
            Listener::Unix { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = self.socket_path() {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("Failed to remove socket file {}: {}", path.display(), e);
            }
        }
    }
}

/// Remove a socket file left behind by a process that did not shut down.
/// A socket with a live server behind it is left alone.
#[cfg(unix)]
async fn remove_stale_socket(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if UnixStream::connect(path).await.is_ok() {
        return Err(ProcallError::Config {
            message: format!("Endpoint unix://{} is already in use", path.display()),
        });
    }
    warn!("Removing stale socket file {}", path.display());
    std::fs::remove_file(path)?;
    Ok(())
}
