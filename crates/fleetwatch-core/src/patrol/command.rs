//! Collaborators backed by an external terminal-automation command.
//!
//! The command speaks JSON on stdout:
//!
//! - session listing: `{"ok": true, "sessions": [{"agent_id", "agent_name",
//!   "session_id"}]}`
//! - bulk output read: `{"ok": true, "results": [{"agent_id", "output",
//!   "error"}]}`, with the session list written to its stdin as a JSON array
//!
//! Either answer may instead be `{"ok": false, "error": "..."}`.
//!
//! Stdout and stderr are drained on their own threads while the parent waits,
//! so a chatty child cannot block on a full pipe. A child that outlives its
//! timeout is killed and reaped.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use wait_timeout::ChildExt;

use super::collaborators::{
    AgentOutput, CollaboratorError, OutputReader, SessionDirectory, SessionRef,
};

/// Default time a collaborator command may run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_STDOUT_BYTES: u64 = 8 * 1024 * 1024;
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Program, arguments and timeout of a collaborator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable to run.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Kill the command after this long.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Spec with no arguments and the default timeout.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Builds a spec from an argv list; `None` when `argv` is empty.
    #[must_use]
    pub fn from_argv(argv: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the command, feeding `stdin`, and parses its stdout as `T`.
    fn run_json<T: DeserializeOwned>(&self, stdin: Option<Vec<u8>>) -> Result<T, CollaboratorError> {
        let stdout = self.run(stdin)?;
        serde_json::from_slice(&stdout).map_err(|source| CollaboratorError::Parse {
            program: self.program.clone(),
            source,
        })
    }

    fn run(&self, stdin: Option<Vec<u8>>) -> Result<Vec<u8>, CollaboratorError> {
        debug!(program = %self.program, args = ?self.args, "running collaborator command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CollaboratorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let writer = match (child.stdin.take(), stdin) {
            // The pipe is dropped, closing the child's stdin, when the thread ends.
            (Some(mut pipe), Some(bytes)) => {
                Some(std::thread::spawn(move || pipe.write_all(&bytes)))
            },
            _ => None,
        };
        let stdout_reader = child.stdout.take().map(|pipe| drain(pipe, MAX_STDOUT_BYTES));
        let stderr_reader = child.stderr.take().map(|pipe| drain(pipe, MAX_STDERR_BYTES));

        let waited = child.wait_timeout(self.timeout);
        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CollaboratorError::Timeout {
                    program: self.program.clone(),
                    timeout_ms: self.timeout.as_millis(),
                });
            },
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.io_error(source));
            },
        };

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {},
                // A child that exits without reading its input closes the pipe.
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {},
                Ok(Err(err)) => return Err(self.io_error(err)),
                Err(_) => return Err(self.io_error(thread_panicked())),
            }
        }
        let stdout = self.collect(stdout_reader)?;
        let stderr = self.collect(stderr_reader)?;

        if !status.success() {
            return Err(CollaboratorError::Exit {
                program: self.program.clone(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }

    fn collect(
        &self,
        reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    ) -> Result<Vec<u8>, CollaboratorError> {
        let Some(reader) = reader else {
            return Ok(Vec::new());
        };
        match reader.join() {
            Ok(result) => result.map_err(|err| self.io_error(err)),
            Err(_) => Err(self.io_error(thread_panicked())),
        }
    }

    fn io_error(&self, source: std::io::Error) -> CollaboratorError {
        CollaboratorError::Io {
            program: self.program.clone(),
            source,
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: R, limit: u64) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.take(limit).read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn thread_panicked() -> std::io::Error {
    std::io::Error::other("pipe thread panicked")
}

#[derive(Debug, Deserialize)]
struct SessionsAnswer {
    ok: bool,
    #[serde(default)]
    sessions: Vec<SessionRef>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultsAnswer {
    ok: bool,
    #[serde(default)]
    results: Vec<AgentOutput>,
    #[serde(default)]
    error: Option<String>,
}

fn reported(program: &str, error: Option<String>) -> CollaboratorError {
    CollaboratorError::Reported(
        error
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("{program} reported failure")),
    )
}

/// Session directory that asks an external command.
#[derive(Debug, Clone)]
pub struct CommandSessionDirectory {
    spec: CommandSpec,
}

impl CommandSessionDirectory {
    /// Directory backed by `spec`.
    #[must_use]
    pub const fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl SessionDirectory for CommandSessionDirectory {
    fn list_sessions(&self) -> Result<Vec<SessionRef>, CollaboratorError> {
        let answer: SessionsAnswer = self.spec.run_json(None)?;
        if !answer.ok {
            return Err(reported(&self.spec.program, answer.error));
        }
        Ok(answer.sessions)
    }
}

/// Output reader that asks an external command.
#[derive(Debug, Clone)]
pub struct CommandOutputReader {
    spec: CommandSpec,
}

impl CommandOutputReader {
    /// Reader backed by `spec`.
    #[must_use]
    pub const fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl OutputReader for CommandOutputReader {
    fn read_outputs(&self, sessions: &[SessionRef]) -> Result<Vec<AgentOutput>, CollaboratorError> {
        let input = serde_json::to_vec(sessions).map_err(|source| CollaboratorError::Parse {
            program: self.spec.program.clone(),
            source,
        })?;
        let answer: ResultsAnswer = self.spec.run_json(Some(input))?;
        if !answer.ok {
            return Err(reported(&self.spec.program, answer.error));
        }
        Ok(answer.results)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[test]
    fn test_directory_parses_sessions() {
        let directory = CommandSessionDirectory::new(sh(
            r#"echo '{"ok":true,"sessions":[{"agent_id":"a1","agent_name":"one","session_id":"%1"},{"agent_id":"a2"}]}'"#,
        ));
        let sessions = directory.list_sessions().expect("sessions");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0], SessionRef::new("a1", "one", "%1"));
        assert!(!sessions[1].has_session());
    }

    #[test]
    fn test_reported_failure_carries_message() {
        let directory =
            CommandSessionDirectory::new(sh(r#"echo '{"ok":false,"error":"no server"}'"#));
        let err = directory.list_sessions().expect_err("should fail");
        assert!(matches!(err, CollaboratorError::Reported(ref m) if m == "no server"));
    }

    #[test]
    fn test_reader_receives_sessions_on_stdin() {
        // Answers only when the session list arrived on stdin.
        let reader = CommandOutputReader::new(sh(
            r#"input=$(cat); case "$input" in *'"a1"'*) echo '{"ok":true,"results":[{"agent_id":"a1","output":"$"}]}';; *) echo '{"ok":false,"error":"missing"}';; esac"#,
        ));
        let outputs = reader
            .read_outputs(&[SessionRef::new("a1", "one", "%1")])
            .expect("outputs");
        assert_eq!(outputs, vec![AgentOutput::lines("a1", ["$"])]);
    }

    #[test]
    fn test_nonzero_exit_and_garbage_are_errors() {
        let err = CommandSessionDirectory::new(sh("echo boom >&2; exit 3"))
            .list_sessions()
            .expect_err("exit");
        match err {
            CollaboratorError::Exit { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }

        let err = CommandSessionDirectory::new(sh("echo not-json"))
            .list_sessions()
            .expect_err("parse");
        assert!(matches!(err, CollaboratorError::Parse { .. }));
    }

    #[test]
    fn test_timeout_kills_command() {
        let spec = sh("sleep 5").timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = CommandSessionDirectory::new(spec)
            .list_sessions()
            .expect_err("timeout");
        assert!(matches!(err, CollaboratorError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = CommandSessionDirectory::new(CommandSpec::new("/nonexistent/fleetwatch-driver"))
            .list_sessions()
            .expect_err("spawn");
        assert!(matches!(err, CollaboratorError::Spawn { .. }));
    }
}
