//! Agent runner backed by an external process.
//!
//! The request is written to the child's stdin as one JSON document. The child
//! streams its transcript on stdout as JSON lines:
//!
//! ```text
//! {"event": "message", "data": {"role": "assistant", "content": "..."}}
//! {"event": "result", "n_turns": 3, "n_tool_calls": 5, "usage": {...}, "finished": true}
//! ```
//!
//! Lines that are not JSON are logged and skipped. When no `result` event
//! arrives, counters are derived from the messages seen.
//!
//! The agent leads its own process group. The group is killed once the agent
//! exits or its budget runs out, so nothing it started keeps touching the
//! sandbox while the outcome is captured.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{count_turns_and_tool_calls, AgentRequest, AgentRunner};
use crate::error::AgentError;
use crate::runner::command::{exit_code, kill_process_group, own_process_group};
use crate::runner::result::{truncate, TokenUsage, Trajectory};

const STDERR_GRACE: Duration = Duration::from_secs(5);

/// Runs any command-line agent speaking the JSON-lines transcript protocol.
#[derive(Debug, Clone)]
pub struct ProcessAgentRunner {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl ProcessAgentRunner {
    /// Creates a runner for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Builds a runner from an argv; `None` when it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).with_args(args.to_vec()))
    }

    /// Sets the arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl AgentRunner for ProcessAgentRunner {
    async fn run(&self, request: &AgentRequest) -> Result<Trajectory, AgentError> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + request.timeout();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&request.sandbox_root)
            .env("EVAL_SANDBOX_ROOT", &request.sandbox_root)
            .env("EVAL_MODEL", &request.model)
            .env("EVAL_MAX_TURNS", request.max_turns.to_string())
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);

        info!(
            "Starting agent: {} in {}",
            self.program,
            request.sandbox_root.display()
        );

        let payload = serde_json::to_vec(request)
            .map_err(|e| AgentError::Protocol(format!("failed to encode request: {}", e)))?;

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {}", self.program, e)))?;
        let pid = child.id();

        // Written alongside the read loop so an agent that never reads its
        // input cannot stall us past the deadline.
        let stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                // An agent that exits without reading its input is not our failure.
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!("Agent closed stdin early: {}", e);
                }
                stdin.shutdown().await.ok();
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Protocol("agent stdout not captured".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                stderr.read_to_string(&mut buf).await.ok();
                buf
            })
        });

        let mut transcript = TranscriptBuilder::default();
        let mut lines = BufReader::new(stdout).lines();
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, lines.next_line()).await {
                Ok(Ok(Some(line))) => transcript.push_line(&line),
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!("Failed to read agent output: {}", e);
                    break;
                }
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(
                "Agent exceeded {:.1}s budget, killing it",
                request.timeout_sec
            );
            kill_process_group(pid);
            child.start_kill().ok();
        }

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => Some(status),
            Err(_) => {
                timed_out = true;
                kill_process_group(pid);
                child.start_kill().ok();
                child.wait().await.ok().map(Ok)
            }
        };
        // Whatever the agent left running in the background goes with it.
        kill_process_group(pid);
        if let Some(task) = stdin_task {
            task.abort();
        }
        let status = status.transpose()?;

        // Grandchildren may still hold the pipe open after a kill.
        let stderr = match stderr_task {
            Some(task) if timed_out => {
                task.abort();
                String::new()
            }
            Some(task) => tokio::time::timeout(STDERR_GRACE, task)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => String::new(),
        };

        let latency_sec = start.elapsed().as_secs_f64();
        let mut trajectory = transcript.finish(latency_sec);

        if timed_out {
            trajectory.finished = false;
            trajectory.error = Some(format!(
                "agent timed out after {:.1}s",
                request.timeout_sec
            ));
        } else if let Some(status) = status.filter(|s| !s.success()) {
            let code = exit_code(&status);
            trajectory.finished = false;
            trajectory.error = Some(format!(
                "agent exited with code {}: {}",
                code,
                truncate(stderr.trim(), 2_000)
            ));
        }

        debug!(
            n_turns = trajectory.n_turns,
            n_tool_calls = trajectory.n_tool_calls,
            finished = trajectory.finished,
            "Agent run complete"
        );
        Ok(trajectory)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TranscriptEvent {
    Message {
        data: Value,
    },
    Result {
        #[serde(default)]
        n_turns: Option<u32>,
        #[serde(default)]
        n_tool_calls: Option<u32>,
        #[serde(default)]
        usage: TokenUsage,
        #[serde(default)]
        finished: bool,
    },
}

#[derive(Debug, Default)]
struct ResultEvent {
    n_turns: Option<u32>,
    n_tool_calls: Option<u32>,
    usage: TokenUsage,
    finished: bool,
}

/// Accumulates a streamed transcript.
#[derive(Debug, Default)]
struct TranscriptBuilder {
    messages: Vec<Value>,
    result: Option<ResultEvent>,
}

impl TranscriptBuilder {
    fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<TranscriptEvent>(line) {
            Ok(TranscriptEvent::Message { data }) => self.messages.push(data),
            Ok(TranscriptEvent::Result {
                n_turns,
                n_tool_calls,
                usage,
                finished,
            }) => {
                self.result = Some(ResultEvent {
                    n_turns,
                    n_tool_calls,
                    usage,
                    finished,
                })
            }
            Err(_) => debug!("Ignoring agent output line: {}", truncate(line, 200)),
        }
    }

    fn finish(self, latency_sec: f64) -> Trajectory {
        let (derived_turns, derived_calls) = count_turns_and_tool_calls(&self.messages);
        let result = self.result.unwrap_or_default();
        Trajectory {
            messages: self.messages,
            n_turns: result.n_turns.unwrap_or(derived_turns),
            n_tool_calls: result.n_tool_calls.unwrap_or(derived_calls),
            usage: result.usage,
            latency_sec,
            finished: result.finished,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(root: PathBuf, timeout_sec: f64) -> AgentRequest {
        AgentRequest {
            instruction: "add a todo".into(),
            sandbox_root: root,
            system_prompt: "be good".into(),
            model: "test-model".into(),
            max_turns: 5,
            timeout_sec,
        }
    }

    fn shell(script: &str) -> ProcessAgentRunner {
        ProcessAgentRunner::new("sh").with_args(vec!["-c".into(), script.into()])
    }

    #[test]
    fn test_transcript_builder_uses_result_event() {
        let mut builder = TranscriptBuilder::default();
        builder.push_line(r#"{"event":"message","data":{"role":"assistant","tool_calls":[{}]}}"#);
        builder.push_line("not json at all");
        builder.push_line(
            r#"{"event":"result","n_turns":4,"n_tool_calls":9,"usage":{"total_tokens":120},"finished":true}"#,
        );
        let t = builder.finish(1.0);
        assert_eq!(t.messages.len(), 1);
        assert_eq!(t.n_turns, 4);
        assert_eq!(t.n_tool_calls, 9);
        assert_eq!(t.usage.total(), 120);
        assert!(t.finished);
    }

    #[test]
    fn test_transcript_builder_derives_counters() {
        let mut builder = TranscriptBuilder::default();
        builder.push_line(r#"{"event":"message","data":{"role":"user","content":"hi"}}"#);
        builder.push_line(r#"{"event":"message","data":{"role":"assistant","tool_calls":[{},{}]}}"#);
        builder.push_line(r#"{"event":"message","data":{"role":"assistant","content":"done"}}"#);
        let t = builder.finish(0.5);
        assert_eq!(t.n_turns, 2);
        assert_eq!(t.n_tool_calls, 2);
        assert!(!t.finished);
    }

    #[tokio::test]
    async fn test_process_runner_reads_transcript_and_request() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = shell(
            r#"cat > request.json
echo '{"event":"message","data":{"role":"assistant","content":"done"}}'
echo '{"event":"result","n_turns":1,"n_tool_calls":0,"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15},"finished":true}'"#,
        );

        let t = runner
            .run(&request(dir.path().to_path_buf(), 10.0))
            .await
            .unwrap();
        assert!(t.finished);
        assert_eq!(t.n_turns, 1);
        assert_eq!(t.usage.total_tokens, 15);
        assert!(t.error.is_none());

        let sent: AgentRequest =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("request.json")).unwrap())
                .unwrap();
        assert_eq!(sent.instruction, "add a todo");
        assert_eq!(sent.max_turns, 5);
    }

    #[tokio::test]
    async fn test_process_runner_timeout_keeps_partial_transcript() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = shell(
            r#"echo '{"event":"message","data":{"role":"assistant","tool_calls":[{}]}}'
sleep 30"#,
        );

        let started = Instant::now();
        let t = runner
            .run(&request(dir.path().to_path_buf(), 0.5))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!t.finished);
        assert_eq!(t.messages.len(), 1);
        assert_eq!(t.n_tool_calls, 1);
        assert!(t.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_process_runner_timeout_with_unread_large_request() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = shell("sleep 20");
        let mut req = request(dir.path().to_path_buf(), 0.5);
        req.instruction = "x".repeat(1 << 20);

        let started = Instant::now();
        let t = tokio::time::timeout(Duration::from_secs(8), runner.run(&req))
            .await
            .expect("runner ignored its deadline")
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!t.finished);
        assert!(t.error.unwrap().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_timeout_kills_background_children() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = shell("(sleep 1; touch late.txt) & sleep 30");

        let t = runner
            .run(&request(dir.path().to_path_buf(), 0.3))
            .await
            .unwrap();
        assert!(!t.finished);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_reaps_background_children_on_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = shell("(sleep 1; touch late.txt) >/dev/null 2>&1 &\necho '{\"event\":\"result\",\"finished\":true}'");

        let t = runner
            .run(&request(dir.path().to_path_buf(), 10.0))
            .await
            .unwrap();
        assert!(t.finished);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[tokio::test]
    async fn test_process_runner_nonzero_exit_is_unfinished() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = shell("echo boom >&2; exit 2");
        let t = runner
            .run(&request(dir.path().to_path_buf(), 10.0))
            .await
            .unwrap();
        assert!(!t.finished);
        assert!(t.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_process_runner_spawn_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = ProcessAgentRunner::new("definitely-not-a-real-agent-xyz");
        let err = runner
            .run(&request(dir.path().to_path_buf(), 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Spawn(_)));
    }
}
