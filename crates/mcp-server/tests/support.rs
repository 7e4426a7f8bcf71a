#![allow(dead_code)]

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

pub fn locate_taskwing_mcp_bin() -> Result<PathBuf> {
    if let Some(path) = option_env!("CARGO_BIN_EXE_taskwing-mcp") {
        return Ok(PathBuf::from(path));
    }

    // Resolve from the current test executable location.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(target_profile_dir) = exe.parent().and_then(|p| p.parent()) {
            let candidate = target_profile_dir.join("taskwing-mcp");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    anyhow::bail!("failed to locate taskwing-mcp binary; build with: cargo build -p taskwing-mcp")
}

/// One spawned server with piped stdio.
pub struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl Session {
    pub fn spawn(root: &Path) -> Result<Self> {
        Self::spawn_with_args(&[std::ffi::OsStr::new("--root"), root.as_os_str()])
    }

    pub fn spawn_with_args(args: &[&std::ffi::OsStr]) -> Result<Self> {
        let mut cmd = Command::new(locate_taskwing_mcp_bin()?);
        cmd.args(args);
        cmd.env("RUST_LOG", "warn");
        cmd.env_remove("TASKWING_DEBUG");
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().context("spawn taskwing-mcp")?;
        let stdin = child.stdin.take().context("stdin")?;
        let stdout = BufReader::new(child.stdout.take().context("stdout")?);
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
            next_id: 1,
        })
    }

    pub async fn send(&mut self, message: &Value) -> Result<()> {
        let stdin = self.stdin.as_mut().context("stdin already closed")?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, raw: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().context("stdin already closed")?;
        stdin.write_all(raw.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(Duration::from_secs(10), self.stdout.read_line(&mut line))
                .await
                .context("timeout reading json line")??;
            if n == 0 {
                anyhow::bail!("EOF while reading json line");
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(&line)?);
        }
    }

    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await?;
        let reply = self.recv().await?;
        anyhow::ensure!(reply["id"] == json!(id), "reply id mismatch: {reply}");
        Ok(reply)
    }

    pub async fn initialize(&mut self) -> Result<Value> {
        let reply = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": { "name": "taskwing-tests", "version": "0.1" }
                }),
            )
            .await?;
        self.send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await?;
        Ok(reply)
    }

    /// `tools/call` returning the `result` object.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
        let reply = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        reply
            .get("result")
            .cloned()
            .with_context(|| format!("no result for {name}: {reply}"))
    }

    /// Closes stdin and waits for the process to exit.
    pub async fn finish(mut self) -> Result<ExitStatus> {
        drop(self.stdin.take());
        let status = tokio::time::timeout(Duration::from_secs(10), self.child.wait())
            .await
            .context("timeout waiting for exit")??;
        Ok(status)
    }
}
