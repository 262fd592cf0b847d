use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    Backend, BackendError, ChannelConfig, ChannelId, ChannelTraces, SaveReceipt,
    SaveRequest, StreamRequest, TimeAxis,
};

/// Backend that runs the instrument bridge as a child process and exchanges
/// JSON lines with it over stdio.
///
/// Requests look like `{"id": 7, "op": "stream_pull", "params": {}}` and the
/// bridge answers with `{"id": 7, "result": true}` or
/// `{"id": 7, "error": "Not currently streaming!"}`. Lines that are not a
/// response to the pending request are skipped.
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[derive(Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    fn spawn(&self) -> Result<Connection, BackendError> {
        debug!(
            program = %self.program.display(),
            args = ?self.args,
            "Spawning backend process"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Protocol("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Protocol("stdout not captured".to_string()))?;

        // Forward the bridge's own diagnostics into our log
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "backend stderr");
                }
            });
        }

        Ok(Connection {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &'static str,
        params: Value,
    ) -> Result<T, BackendError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }

        let result = match guard.as_mut() {
            Some(conn) => self.exchange(conn, op, params).await,
            None => Err(BackendError::Disconnected),
        };

        // A broken pipe means the next call has to respawn
        if matches!(
            result,
            Err(BackendError::Disconnected) | Err(BackendError::SpawnFailed(_))
        ) {
            *guard = None;
        }

        let value = result?;
        serde_json::from_value(value)
            .map_err(|e| BackendError::Protocol(format!("Bad result for '{}': {}", op, e)))
    }

    async fn exchange(
        &self,
        conn: &mut Connection,
        op: &'static str,
        params: Value,
    ) -> Result<Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({ "id": id, "op": op, "params": params });

        trace!(id, op, "backend request");
        let mut line = request.to_string();
        line.push('\n');
        if let Err(e) = conn.stdin.write_all(line.as_bytes()).await {
            warn!(error = %e, op, "Failed to write to backend");
            return Err(BackendError::Disconnected);
        }
        if conn.stdin.flush().await.is_err() {
            return Err(BackendError::Disconnected);
        }

        loop {
            let line = match conn.stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(BackendError::Disconnected),
                Err(e) => {
                    warn!(error = %e, op, "Failed to read from backend");
                    return Err(BackendError::Disconnected);
                }
            };

            let response: Response = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(_) => {
                    trace!(line = %line, "Skipping non-protocol line");
                    continue;
                }
            };

            if response.id != id {
                trace!(expected = id, got = response.id, "Skipping stale response");
                continue;
            }

            return match response.error {
                Some(message) => Err(BackendError::Remote { op, message }),
                None => Ok(response.result),
            };
        }
    }

    /// True if the child process has exited (or was never started)
    async fn is_dead(&self) -> bool {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(conn) => !matches!(conn.child.try_wait(), Ok(None)),
            None => true,
        }
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    fn name(&self) -> &str {
        "Process bridge"
    }

    async fn set_channel(
        &self,
        id: ChannelId,
        config: &ChannelConfig,
    ) -> Result<(), BackendError> {
        let params = json!({
            "channel": id,
            "enabled": config.enabled,
            "range": config.range,
            "coupling": config.coupling,
        });
        self.call::<Value>("set_channel", params).await.map(|_| ())
    }

    async fn stream_setup(&self, request: &StreamRequest) -> Result<f64, BackendError> {
        let params = serde_json::to_value(request)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        self.call("stream_setup", params).await
    }

    async fn stream_pull(&self) -> Result<bool, BackendError> {
        self.call("stream_pull", json!({})).await
    }

    async fn stream_is_active(&self) -> Result<bool, BackendError> {
        self.call("stream_is_active", json!({})).await
    }

    async fn stream_stop(&self) -> Result<(), BackendError> {
        self.call::<Value>("stream_stop", json!({})).await.map(|_| ())
    }

    async fn reconnect(&self) -> Result<(), BackendError> {
        if self.is_dead().await {
            debug!("Backend process is gone, respawning before reconnect");
            *self.conn.lock().await = None;
        }
        self.call::<Value>("reconnect", json!({})).await.map(|_| ())
    }

    async fn save_buffer(&self, request: &SaveRequest) -> Result<SaveReceipt, BackendError> {
        let params = serde_json::to_value(request)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        self.call("save_buffer", params).await
    }

    async fn directory_listing(&self) -> Result<Vec<String>, BackendError> {
        self.call("directory_listing", json!({})).await
    }

    async fn time_axis(&self, bin_size: u32) -> Result<TimeAxis, BackendError> {
        self.call("time_axis", json!({ "bin_size": bin_size })).await
    }

    async fn time_series(&self, bin_size: u32) -> Result<ChannelTraces, BackendError> {
        self.call("time_series", json!({ "bin_size": bin_size }))
            .await
    }

    async fn spectrum(&self, bin_size: u32) -> Result<ChannelTraces, BackendError> {
        self.call("spectrum", json!({ "bin_size": bin_size })).await
    }

    async fn band_power(
        &self,
        f_lo: f64,
        f_hi: f64,
    ) -> Result<BTreeMap<ChannelId, Option<f64>>, BackendError> {
        self.call("band_power", json!({ "f_lo": f_lo, "f_hi": f_hi }))
            .await
    }
}
