//! The `shell` job variant: spawns a command, optionally through a
//! platform shell, under a timeout.
//!
//! Grounded on the teacher's `src/tools/shell.rs` (`tokio::process::Command`,
//! piped stdout/stderr) and on `original_source/scheduler/job/shellJob.go`
//! for the `useShell` branch (bash -c / cmd.exe /C vs. direct exec) and the
//! "write exactly one of output/errOutput" contract. Unlike the teacher's
//! synchronous `cmd.output().await`, this needs to race the child against a
//! timeout, so the child is spawned, its pipes are drained by dedicated
//! reader tasks, and `child.wait()`/`child.kill()` are raced via
//! `tokio::select!`.

use super::Job;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt as _;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct ShellJobPayload {
    command: String,
    arguments: Vec<String>,
    use_shell: bool,
    timeout_secs: u64,
    work_dir: PathBuf,
    owner_name: String,
}

/// A shell-executed unit of work.
pub struct ShellJob {
    command: String,
    arguments: Vec<String>,
    use_shell: bool,
    timeout: Duration,
    work_dir: PathBuf,
    owner_name: String,

    output_tx: mpsc::Sender<String>,
    output_rx: Mutex<mpsc::Receiver<String>>,
    err_output_tx: mpsc::Sender<String>,
    err_output_rx: Mutex<mpsc::Receiver<String>>,
}

impl ShellJob {
    pub fn new(
        use_shell: bool,
        timeout: Duration,
        work_dir: PathBuf,
        owner_name: String,
        command: String,
        arguments: Vec<String>,
    ) -> Self {
        let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (err_output_tx, err_output_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            command,
            arguments,
            use_shell,
            timeout,
            work_dir,
            owner_name,
            output_tx,
            output_rx: Mutex::new(output_rx),
            err_output_tx,
            err_output_rx: Mutex::new(err_output_rx),
        }
    }

    /// Reconstructs a [`ShellJob`] from its serialized payload, with fresh
    /// output channels (never reused across processes, per the data model's
    /// Job invariant).
    pub fn from_payload(payload: &str) -> Result<std::sync::Arc<dyn Job>> {
        let decoded: ShellJobPayload =
            serde_json::from_str(payload).map_err(|e| Error::Other(e.into()))?;
        Ok(std::sync::Arc::new(Self::new(
            decoded.use_shell,
            Duration::from_secs(decoded.timeout_secs),
            decoded.work_dir,
            decoded.owner_name,
            decoded.command,
            decoded.arguments,
        )))
    }

    fn build_command(&self, effective_dir: &std::path::Path) -> Command {
        let mut cmd = if self.use_shell {
            let full_command = if self.arguments.is_empty() {
                self.command.clone()
            } else {
                format!("{} {}", self.command, self.arguments.join(" "))
            };
            let mut c = if cfg!(target_os = "windows") {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(&full_command);
                c
            } else {
                let mut c = Command::new("/bin/bash");
                c.arg("-c").arg(&full_command);
                c
            };
            c.current_dir(effective_dir);
            c
        } else {
            let mut c = Command::new(&self.command);
            c.args(&self.arguments);
            c.current_dir(effective_dir);
            c
        };
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    async fn run_inner(&self, cancel: CancellationToken) -> std::result::Result<String, String> {
        if self.work_dir.as_os_str().is_empty() || self.owner_name.is_empty() {
            return Err("workDir and ownerName must both be set".to_string());
        }

        let effective_dir = self.work_dir.join(&self.owner_name);
        tokio::fs::create_dir_all(&effective_dir)
            .await
            .map_err(|e| format!("command error: failed to create work dir: {e}"))?;

        let mut child = self
            .build_command(&effective_dir)
            .spawn()
            .map_err(|e| format!("command error: {e}\n"))?;

        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err("command error: cancelled\nscheduler shutdown or job removed".to_string())
            }
            _ = tokio::time::sleep(self.timeout) => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err("command error: timed out\nkilled after exceeding timeout".to_string())
            }
            status = child.wait() => {
                let status = status.map_err(|e| format!("command error: {e}\n"))?;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                if status.success() {
                    Ok(stdout)
                } else {
                    let stderr = if stderr.is_empty() {
                        format!("exit status {status}")
                    } else {
                        stderr
                    };
                    Err(format!("command error: {status}\n{stderr}"))
                }
            }
        }
    }
}

#[async_trait]
impl Job for ShellJob {
    fn job_type(&self) -> &'static str {
        super::SHELL_JOB_TYPE
    }

    fn serialize(&self) -> Result<String> {
        let payload = ShellJobPayload {
            command: self.command.clone(),
            arguments: self.arguments.clone(),
            use_shell: self.use_shell,
            timeout_secs: self.timeout.as_secs(),
            work_dir: self.work_dir.clone(),
            owner_name: self.owner_name.clone(),
        };
        serde_json::to_string(&payload).map_err(|e| Error::Other(e.into()))
    }

    fn describe(&self) -> String {
        format!(
            "shell job: [command:{}, args:{:?}, useShell:{}, timeout:{:?}]",
            self.command, self.arguments, self.use_shell, self.timeout
        )
    }

    async fn run(&self, cancel: CancellationToken) {
        match self.run_inner(cancel).await {
            Ok(stdout) => {
                let _ = self.output_tx.try_send(stdout);
            }
            Err(message) => {
                let _ = self.err_output_tx.try_send(message);
            }
        }
    }

    fn drain_output(&self) -> Vec<String> {
        drain(&self.output_rx)
    }

    fn drain_err_output(&self) -> Vec<String> {
        drain(&self.err_output_rx)
    }

    fn push_err_output(&self, message: String) {
        let _ = self.err_output_tx.try_send(message);
    }
}

fn drain(rx: &Mutex<mpsc::Receiver<String>>) -> Vec<String> {
    let mut guard = rx.lock().expect("output receiver mutex poisoned");
    let mut out = Vec::new();
    while let Ok(message) = guard.try_recv() {
        out.push(message);
    }
    out
}
