//! Stdio transport: a child process speaking newline-delimited JSON-RPC.
//!
//! stdout carries the message channel, one JSON document per line. stderr is
//! read separately and surfaced as [`TransportEvent::Stderr`] so diagnostic
//! output never corrupts the message stream.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::{CloseFlag, EventHub, Transport, TransportEvent};
use crate::config::DEFAULT_CLOSE_TIMEOUT;
use crate::error::TransportError;
use crate::protocol::JsonRpcMessage;

/// Fully resolved launch parameters for a child process.
#[derive(Debug, Clone)]
pub struct StdioParams {
    /// Resolved executable.
    pub program: PathBuf,
    /// Arguments, including any wrapper prefix.
    pub args: Vec<String>,
    /// Complete environment for the child (not merged with ours).
    pub env: BTreeMap<String, String>,
    /// How long `close()` waits for the child to exit.
    pub close_timeout: Duration,
}

impl StdioParams {
    /// Launch `program` with `args` and exactly `env`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Set the close timeout.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

/// Channel to a spawned child process.
pub struct StdioTransport {
    params: StdioParams,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pid: parking_lot::Mutex<Option<u32>>,
    events: Arc<EventHub>,
    started: CloseFlag,
    closing: CloseFlag,
}

impl StdioTransport {
    /// Create an unstarted transport.
    pub fn new(params: StdioParams) -> Self {
        Self {
            params,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pid: parking_lot::Mutex::new(None),
            events: Arc::new(EventHub::new()),
            started: CloseFlag::default(),
            closing: CloseFlag::default(),
        }
    }

    /// Process id of the running child.
    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    /// Launch parameters.
    pub fn params(&self) -> &StdioParams {
        &self.params
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if !self.started.begin() {
            return Err(TransportError::AlreadyStarted);
        }

        let program = self.params.program.display().to_string();
        let mut cmd = Command::new(&self.params.program);
        cmd.args(&self.params.args)
            .env_clear()
            .envs(&self.params.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TransportError::SpawnFailed {
            command: program.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TransportError::SpawnFailed {
            command: program.clone(),
            reason: "failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::SpawnFailed {
            command: program.clone(),
            reason: "failed to capture stdout".to_string(),
        })?;
        let stderr = child.stderr.take();

        *self.pid.lock() = child.id();
        debug!(command = %program, pid = ?child.id(), "spawned stdio backend");

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        trace!(json = %line, "received stdio message");
                        match JsonRpcMessage::parse_str(&line) {
                            Ok(message) => events.emit(TransportEvent::Message(message)),
                            Err(e) => events.emit(TransportEvent::Error(format!(
                                "invalid message on stdout: {e}"
                            ))),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        events.emit(TransportEvent::Error(format!("stdout read failed: {e}")));
                        break;
                    }
                }
            }
            debug!("stdio backend stdout closed");
            events.emit_closed();
        });

        if let Some(stderr) = stderr {
            let events = self.events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(line = %line, "stdio backend stderr");
                    events.emit(TransportEvent::Stderr(line));
                }
            });
        }

        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        if self.closing.is_set() || self.events.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut json = message.to_json()?;
        json.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = match guard.as_mut() {
            Some(stdin) => stdin,
            None if self.started.is_set() => return Err(TransportError::Closed),
            None => return Err(TransportError::NotStarted),
        };
        stdin.write_all(json.as_bytes()).await?;
        stdin.flush().await?;
        trace!(json = %json.trim_end(), "sent stdio message");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closing.begin() {
            return Ok(());
        }

        // Dropping stdin signals EOF to well-behaved servers.
        drop(self.stdin.lock().await.take());

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(?status, "stdio backend already exited");
                }
                _ => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill stdio backend");
                    }
                    match tokio::time::timeout(self.params.close_timeout, child.wait()).await {
                        Ok(Ok(status)) => debug!(?status, "stdio backend exited"),
                        Ok(Err(e)) => warn!(error = %e, "failed to reap stdio backend"),
                        Err(_) => warn!(
                            timeout = ?self.params.close_timeout,
                            "stdio backend did not exit in time"
                        ),
                    }
                }
            }
        }

        self.events.emit_closed();
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.events
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; let subscribers know the channel is gone.
        self.events.emit_closed();
    }
}
