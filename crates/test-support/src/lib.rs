//! Integration-test helpers for the bridge workspace.

use anyhow::Context as _;
use serde_json::{Value, json};
use std::net::TcpListener;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Kills the child process when dropped so failed tests don't leak bridges.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.start_kill();
    }
}

/// Pick an unused TCP port on localhost.
///
/// Note: the port is not reserved; another process can still bind it before
/// the caller does.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll an HTTP URL until it returns a success status.
///
/// # Errors
///
/// Returns an error if the timeout elapses first.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

/// A line-framed JSON-RPC session against a spawned child process's stdio.
pub struct StdioSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
}

impl StdioSession {
    /// Spawn `program` with `args` and attach to its stdio.
    ///
    /// Stderr is inherited so diagnostics show up in test output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or its pipes are
    /// missing.
    pub fn spawn(program: &str, args: &[&str]) -> anyhow::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn {program}"))?;

        let stdin = child.stdin.take().context("child stdin")?;
        let stdout = child.stdout.take().context("child stdout")?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Write one raw line to the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if stdin is already closed.
    pub async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        let stdin = self.stdin.as_mut().context("stdin already closed")?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a JSON-RPC request frame.
    ///
    /// # Errors
    ///
    /// Returns an error if stdin is already closed.
    pub async fn send_request(
        &mut self,
        id: i64,
        method: &str,
        params: Value,
    ) -> anyhow::Result<()> {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_line(&frame.to_string()).await
    }

    /// Read the next frame from the child's stdout.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, closed stdout, or a non-JSON line
    /// (which would mean diagnostics leaked onto the protocol stream).
    pub async fn recv_frame(&mut self, timeout_dur: Duration) -> anyhow::Result<Value> {
        let line = tokio::time::timeout(timeout_dur, self.lines.next_line())
            .await
            .context("timed out waiting for a frame")?
            .context("read stdout")?
            .context("stdout closed")?;
        serde_json::from_str(&line).with_context(|| format!("non-JSON frame on stdout: {line}"))
    }

    /// Close the child's stdin, signalling end-of-input.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Close stdin and wait for the child to exit, returning its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the child does not exit within `timeout_dur`.
    pub async fn shutdown(
        mut self,
        timeout_dur: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        self.close_stdin();
        let status = tokio::time::timeout(timeout_dur, self.child.wait())
            .await
            .context("timed out waiting for child exit")??;
        Ok(status)
    }

    /// Assert that stdout produces nothing further until it closes.
    ///
    /// # Errors
    ///
    /// Returns an error naming the unexpected frame if one arrives.
    pub async fn expect_no_more_frames(&mut self, timeout_dur: Duration) -> anyhow::Result<()> {
        match tokio::time::timeout(timeout_dur, self.lines.next_line()).await {
            Err(_) | Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(line))) => anyhow::bail!("unexpected frame after shutdown: {line}"),
            Ok(Err(e)) => Err(e).context("read stdout"),
        }
    }
}
