//! Integration tests for the procall-host binary.
//!
//! These start the real binary, read the endpoint it prints, and drive it
//! through `IpcClient`.

use procall_core::{Endpoint, IpcClient, ProcallError, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

struct HostHandle {
    child: tokio::process::Child,
    endpoint: Endpoint,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl HostHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the host binary and wait for its `IPC_ENDPOINT=` line.
async fn start_host(extra_args: &[&str]) -> Result<HostHandle, String> {
    let binary = PathBuf::from(env!("CARGO_BIN_EXE_procall-host"));

    let mut child = tokio::process::Command::new(&binary)
        .args(extra_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {e}", binary.display()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "host stdout not captured".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut endpoint = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("IPC_ENDPOINT=") {
                    let parsed = value
                        .parse::<Endpoint>()
                        .map_err(|e| format!("invalid IPC_ENDPOINT value '{value}': {e}"))?;
                    endpoint = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => return Err("host exited before printing its endpoint".to_string()),
            Ok(Err(e)) => return Err(format!("failed to read host stdout: {e}")),
            Err(_) => continue,
        }
    }
    let endpoint =
        endpoint.ok_or_else(|| "IPC_ENDPOINT line not emitted by procall-host".to_string())?;

    // Keep the pipe drained so the host never blocks on stdout
    let stdout_drain =
        Some(tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} }));

    Ok(HostHandle {
        child,
        endpoint,
        stdout_drain,
    })
}

#[tokio::test]
async fn test_host_answers_system_calls() {
    let host = start_host(&["--endpoint", "tcp://127.0.0.1:0"])
        .await
        .expect("host should start");
    let client = IpcClient::connect(&host.endpoint).await.unwrap();

    let pong = client.call_default("System", "Ping", vec![]).await.unwrap();
    assert_eq!(pong, vec![Value::from("pong")]);

    let version = client.call_default("System", "Version", vec![]).await.unwrap();
    assert_eq!(version, vec![Value::from(env!("CARGO_PKG_VERSION"))]);

    host.stop().await;
}

#[tokio::test]
async fn test_host_object_lifecycle() {
    let host = start_host(&["--endpoint", "tcp://127.0.0.1:0"])
        .await
        .expect("host should start");
    let client = IpcClient::connect(&host.endpoint).await.unwrap();

    let created = client
        .call_default("Objects", "Create", vec![Value::from("source")])
        .await
        .unwrap();
    let handle = created[0].clone();

    client
        .call_default("Objects", "Set", vec![handle.clone(), Value::from("renamed")])
        .await
        .unwrap();
    let got = client
        .call_default("Objects", "Get", vec![handle.clone()])
        .await
        .unwrap();
    assert_eq!(got, vec![Value::from("renamed")]);

    client
        .call_default("Objects", "Release", vec![handle.clone()])
        .await
        .unwrap();
    let err = client
        .call_default("Objects", "Get", vec![handle])
        .await
        .unwrap_err();
    assert!(matches!(err, ProcallError::NotFound { .. }));

    let count = client.call_default("Objects", "Count", vec![]).await.unwrap();
    assert_eq!(count, vec![Value::UInt64(0)]);

    host.stop().await;
}

#[tokio::test]
async fn test_host_without_system_collection() {
    let host = start_host(&["--endpoint", "tcp://127.0.0.1:0", "--no-system"])
        .await
        .expect("host should start");
    let client = IpcClient::connect(&host.endpoint).await.unwrap();

    let err = client
        .call_default("System", "Ping", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ProcallError::NotFound { .. }));

    host.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_host_on_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host.sock");
    let endpoint_arg = format!("unix://{}", path.display());

    let host = start_host(&["--endpoint", &endpoint_arg])
        .await
        .expect("host should start");
    assert_eq!(host.endpoint, Endpoint::Unix(path));

    let client = IpcClient::connect(&host.endpoint).await.unwrap();
    assert!(client.call_default("System", "Ping", vec![]).await.is_ok());

    host.stop().await;
}

#[tokio::test]
async fn test_host_rejects_remote_endpoint() {
    let binary = PathBuf::from(env!("CARGO_BIN_EXE_procall-host"));
    let status = tokio::process::Command::new(&binary)
        .args(["--endpoint", "tcp://0.0.0.0:0"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .unwrap();
    assert!(!status.success());
}
