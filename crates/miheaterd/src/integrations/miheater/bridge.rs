//! Device client backed by python-miio.
//!
//! The miIO protocol lives in python-miio. We run a small bridge script as a child process
//! and talk to it with newline-delimited JSON over its stdio:
//! - requests carry an `id` and are either `info` or `send`
//! - every request is answered by exactly one `result` or `error` with the same `id`
//! - the bridge announces itself with `ready` (or `fatal` if python-miio is missing)

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tracing::debug;
use tracing::info;

use super::MiHeaterConfig;
use super::client::DeviceClient;
use super::client::DeviceError;
use super::client::DeviceInfo;

const BRIDGE_SCRIPT: &str = include_str!("../../../python/miio_bridge.py");

/// Requests sent from Rust to the bridge
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    Info {
        id: u64,
    },
    Send {
        id: u64,
        method: String,
        params: Vec<Value>,
    },
}

impl Request {
    fn method(&self) -> &str {
        match self {
            Request::Info { .. } => "info",
            Request::Send { method, .. } => method,
        }
    }
}

/// Replies sent from the bridge to Rust
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    Ready,
    Fatal { message: String },
    Result { id: u64, result: Value },
    Error { id: u64, message: String },
}

struct BridgeProcess {
    #[allow(dead_code)] // held so the child is killed when the process is dropped
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl BridgeProcess {
    async fn read_reply(&mut self) -> Result<Reply, DeviceError> {
        let line = self
            .stdout
            .next_line()
            .await?
            .ok_or(DeviceError::BridgeClosed)?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn write_request(&mut self, request: &Request) -> Result<(), DeviceError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

/// Real device client that runs python-miio in a child process
///
/// The child is spawned lazily on the first request and respawned after it dies.
pub struct MiioBridgeClient {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    process: Option<BridgeProcess>,
    next_id: u64,
}

impl fmt::Debug for MiioBridgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // envs carries the device token
        f.debug_struct("MiioBridgeClient")
            .field("program", &self.program)
            .field("running", &self.process.is_some())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl MiioBridgeClient {
    /// Create a client for the heater described by `config`
    pub fn new(config: &MiHeaterConfig) -> Self {
        Self::from_command(config.python_path.clone(), ["-c", BRIDGE_SCRIPT])
            .env("MIHEATER_HOST", &config.host)
            .env("MIHEATER_TOKEN", &config.token)
    }

    /// Create a client that runs an arbitrary bridge command
    pub fn from_command<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            process: None,
            next_id: 1,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    async fn spawn(&self) -> Result<BridgeProcess, DeviceError> {
        info!("Starting miio bridge: {}", self.program.display());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(DeviceError::BridgeClosed)?;
        let stdout = child.stdout.take().ok_or(DeviceError::BridgeClosed)?;
        let mut process = BridgeProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        match process.read_reply().await? {
            Reply::Ready => Ok(process),
            Reply::Fatal { message } => Err(DeviceError::Device { message }),
            other => Err(DeviceError::UnexpectedResponse {
                method: "ready".to_string(),
                detail: format!("{:?}", other),
            }),
        }
    }

    async fn request(&mut self, request: Request) -> Result<Value, DeviceError> {
        let result = self.exchange(&request).await;

        // Anything other than a device-reported error leaves the bridge in an unknown state
        if matches!(
            result,
            Err(DeviceError::BridgeClosed
                | DeviceError::Io(_)
                | DeviceError::Protocol(_)
                | DeviceError::UnexpectedResponse { .. })
        ) {
            debug!("Discarding miio bridge after {} failed", request.method());
            self.process = None;
        }

        result
    }

    async fn exchange(&mut self, request: &Request) -> Result<Value, DeviceError> {
        if self.process.is_none() {
            self.process = Some(self.spawn().await?);
        }
        let process = self.process.as_mut().ok_or(DeviceError::BridgeClosed)?;

        process.write_request(request).await?;

        let expected = match request {
            Request::Info { id } | Request::Send { id, .. } => *id,
        };
        match process.read_reply().await? {
            Reply::Result { id, result } if id == expected => Ok(result),
            Reply::Error { id, message } if id == expected => Err(DeviceError::Device { message }),
            Reply::Fatal { .. } => Err(DeviceError::BridgeClosed),
            other => Err(DeviceError::UnexpectedResponse {
                method: request.method().to_string(),
                detail: format!("expected reply to request {}, got {:?}", expected, other),
            }),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[async_trait]
impl DeviceClient for MiioBridgeClient {
    async fn info(&mut self) -> Result<DeviceInfo, DeviceError> {
        let id = self.next_id();
        let result = self.request(Request::Info { id }).await?;
        serde_json::from_value(result).map_err(|e| DeviceError::UnexpectedResponse {
            method: "info".to_string(),
            detail: e.to_string(),
        })
    }

    async fn send(&mut self, method: &str, params: Vec<Value>) -> Result<Value, DeviceError> {
        let id = self.next_id();
        debug!("miio request {}: {} {:?}", id, method, params);
        self.request(Request::Send {
            id,
            method: method.to_string(),
            params,
        })
        .await
    }
}
