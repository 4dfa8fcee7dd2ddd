//! External-process implementation of the `AgentSpawner` port.
//!
//! The agent is an opaque command. It receives the context payload on stdin
//! as JSON and reports progress as JSON lines on stdout:
//!
//! ```json
//! {"event": "turn", "turns": 3, "fingerprint": "edit src/lib.rs"}
//! {"event": "result", "outcome": "implemented the parser", "artifacts": ["src/parser.rs"]}
//! {"event": "error", "message": "build kept failing"}
//! ```
//!
//! Cancellation sends SIGTERM, waits out a grace period, then kills the
//! child unconditionally.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ports::{AgentSpawner, SpawnOutcome, SpawnProgress, SpawnRequest};

/// How long a SIGTERM'd child gets before SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(10);

pub struct CommandSpawner {
    term_grace: Duration,
}

impl CommandSpawner {
    pub fn new() -> Self {
        Self {
            term_grace: TERM_GRACE,
        }
    }

    pub fn with_term_grace(mut self, grace: Duration) -> Self {
        self.term_grace = grace;
        self
    }
}

impl Default for CommandSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentSpawner for CommandSpawner {
    async fn run(
        &self,
        request: SpawnRequest,
        progress: mpsc::Sender<SpawnProgress>,
        mut cancel: broadcast::Receiver<()>,
    ) -> CoreResult<SpawnOutcome> {
        let cfg = &request.spawner_config;
        let mut cmd = Command::new(&cfg.command);
        cmd.args(&cfg.args)
            .env("CAW_WORKFLOW_ID", request.workflow_id.as_str())
            .env("CAW_TASK_ID", request.task_id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &cfg.env {
            cmd.env(key, value);
        }
        if let Some(path) = &request.workspace_path {
            cmd.current_dir(path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::Storage(format!("failed to spawn {}: {e}", cfg.command)))?;
        let pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&request.context)?;
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| CoreError::Storage(format!("failed to write agent stdin: {e}")))?;
            drop(stdin);
        }

        let stdout = child.stdout.take().map(BufReader::new);
        let mut last_output = String::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "caw::agent", "{line}");
                }
            });
        }

        let mut result: Option<SpawnOutcome> = None;
        let mut canceled = false;
        let mut lines = stdout.map(|r| r.lines());

        loop {
            tokio::select! {
                line = async {
                    match lines.as_mut() {
                        Some(lines) => lines.next_line().await,
                        None => Ok(None),
                    }
                } => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(event) = parse_event(&line) {
                                match event {
                                    AgentEvent::Turn { turns, fingerprint } => {
                                        let _ = progress
                                            .send(SpawnProgress { turns, fingerprint })
                                            .await;
                                    }
                                    AgentEvent::Result { outcome, artifacts } => {
                                        result = Some(SpawnOutcome::Completed { outcome, artifacts });
                                    }
                                    AgentEvent::Error { message } => {
                                        result = Some(SpawnOutcome::Failed { error: message });
                                    }
                                }
                            } else {
                                // Non-protocol output is kept as a fallback detail.
                                last_output = line;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "agent stdout read failed");
                            break;
                        }
                    }
                }
                _ = cancel.recv() => {
                    canceled = true;
                    if let Some(pid) = pid {
                        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                    }
                    let grace = tokio::time::timeout(self.term_grace, child.wait()).await;
                    if grace.is_err() {
                        let _ = child.kill().await;
                    }
                    break;
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| CoreError::Storage(format!("failed to reap agent: {e}")))?;

        if canceled {
            return Ok(SpawnOutcome::Failed {
                error: "canceled".to_string(),
            });
        }
        if let Some(result) = result {
            return Ok(result);
        }
        if status.success() {
            Ok(SpawnOutcome::Completed {
                outcome: if last_output.is_empty() {
                    "agent exited without a result event".to_string()
                } else {
                    last_output
                },
                artifacts: Vec::new(),
            })
        } else {
            Ok(SpawnOutcome::Failed {
                error: format!("agent exited with {status}: {last_output}"),
            })
        }
    }
}

enum AgentEvent {
    Turn { turns: u32, fingerprint: String },
    Result { outcome: String, artifacts: Vec<String> },
    Error { message: String },
}

fn parse_event(line: &str) -> Option<AgentEvent> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    match value.get("event")?.as_str()? {
        "turn" => Some(AgentEvent::Turn {
            turns: value.get("turns")?.as_u64()? as u32,
            fingerprint: value
                .get("fingerprint")
                .and_then(|f| f.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "result" => Some(AgentEvent::Result {
            outcome: value.get("outcome")?.as_str()?.to_string(),
            artifacts: value
                .get("artifacts")
                .and_then(|a| a.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        }),
        "error" => Some(AgentEvent::Error {
            message: value.get("message")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{TaskId, WorkflowId};
    use crate::domain::ports::SpawnerConfig;

    fn request(command: &str, args: &[&str]) -> SpawnRequest {
        SpawnRequest {
            workflow_id: WorkflowId::new(),
            task_id: TaskId::new(),
            workspace_path: None,
            context: serde_json::json!({}),
            spawner_config: SpawnerConfig {
                command: command.to_string(),
                args: args.iter().map(|s| (*s).to_string()).collect(),
                env: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_result_event_wins() {
        let spawner = CommandSpawner::new();
        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);

        let req = request(
            "sh",
            &[
                "-c",
                r#"cat > /dev/null; echo '{"event":"turn","turns":1,"fingerprint":"a"}'; echo '{"event":"result","outcome":"done","artifacts":["x"]}'"#,
            ],
        );
        let outcome = spawner.run(req, tx, cancel_rx).await.unwrap();
        assert_eq!(
            outcome,
            SpawnOutcome::Completed {
                outcome: "done".to_string(),
                artifacts: vec!["x".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_progress_events_are_forwarded() {
        let spawner = CommandSpawner::new();
        let (tx, mut rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);

        let req = request(
            "sh",
            &[
                "-c",
                r#"cat > /dev/null; echo '{"event":"turn","turns":1,"fingerprint":"f1"}'; echo '{"event":"turn","turns":2,"fingerprint":"f2"}'; echo '{"event":"result","outcome":"ok"}'"#,
            ],
        );
        spawner.run(req, tx, cancel_rx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.turns, 1);
        assert_eq!(first.fingerprint, "f1");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.turns, 2);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let spawner = CommandSpawner::new();
        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);

        let req = request("sh", &["-c", "cat > /dev/null; exit 3"]);
        let outcome = spawner.run(req, tx, cancel_rx).await.unwrap();
        assert!(matches!(outcome, SpawnOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_cancel_terminates_child() {
        let spawner = CommandSpawner::new().with_term_grace(Duration::from_millis(200));
        let (tx, _rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);

        let req = request("sh", &["-c", "cat > /dev/null; sleep 30"]);
        let run = tokio::spawn(async move {
            spawner.run(req, tx, cancel_rx).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_tx.send(()).unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            SpawnOutcome::Failed {
                error: "canceled".to_string()
            }
        );
    }
}
