use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::ToolRunner;
use crate::config::ToolsConfig;
use crate::error::{Result, SandboxError};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs git and the build tool as child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    git: PathBuf,
    build: PathBuf,
    build_args: Vec<String>,
    timeout: Option<Duration>,
}

#[derive(Clone, Copy)]
enum ToolKind {
    Git,
    Build,
}

impl ProcessRunner {
    /// Resolve executables once. An unresolved name is kept as-is so the
    /// failure surfaces on first use with the right error kind.
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            git: resolve(&tools.git),
            build: resolve(&tools.build),
            build_args: tools.build_args.clone(),
            timeout: tools.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, kind: ToolKind, program: &Path, args: &[&str], cwd: &Path) -> Result<String> {
        let command = format!("{} {}", program.display(), args.join(" "));
        debug!(command = %command, cwd = %cwd.display(), "running command");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd).stdin(Stdio::null());

        match self.execute(&mut cmd) {
            Ok(stdout) => Ok(stdout),
            Err(Failure { message, stderr }) => {
                error!(command = %command, cwd = %cwd.display(), "{}: {}", message, stderr);
                let cwd = cwd.to_path_buf();
                Err(match kind {
                    ToolKind::Git => SandboxError::VersionControl {
                        message,
                        command,
                        cwd,
                        stderr,
                    },
                    ToolKind::Build => SandboxError::Build {
                        message,
                        command,
                        cwd,
                        stderr,
                    },
                })
            }
        }
    }

    fn execute(&self, command: &mut Command) -> std::result::Result<String, Failure> {
        let output = match self.timeout {
            None => command.output().map_err(Failure::spawn)?,
            Some(limit) => output_with_timeout(command, limit)?,
        };

        if !output.status.success() {
            return Err(Failure {
                message: format!("Command exited with {}", output.status),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into())
    }
}

impl ToolRunner for ProcessRunner {
    fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        self.run(ToolKind::Git, &self.git, args, cwd)
    }

    fn run_build(&self, cwd: &Path) -> Result<String> {
        let args: Vec<&str> = self.build_args.iter().map(String::as_str).collect();
        self.run(ToolKind::Build, &self.build, &args, cwd)
    }
}

struct Failure {
    message: String,
    stderr: String,
}

impl Failure {
    fn timed_out(limit: Duration, stderr: String) -> Self {
        Self {
            message: format!("Command timed out after {}s", limit.as_secs_f64()),
            stderr,
        }
    }

    fn spawn(err: std::io::Error) -> Self {
        let message = if err.kind() == ErrorKind::NotFound {
            "Command not found".to_string()
        } else {
            "Failed to start command".to_string()
        };
        Self {
            message,
            stderr: err.to_string(),
        }
    }
}

fn resolve(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}

/// Wait for the child up to `limit`, killing and reaping it on expiry.
///
/// The deadline also covers collecting output: a background process that
/// inherited the pipes and outlives the child counts as a timeout.
fn output_with_timeout(
    command: &mut Command,
    limit: Duration,
) -> std::result::Result<Output, Failure> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(Failure::spawn)?;

    // Pipes are drained on their own threads so a chatty child cannot block.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + limit;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Failure::timed_out(limit, String::new()));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                return Err(Failure {
                    message: "Failed to wait for command".to_string(),
                    stderr: err.to_string(),
                });
            }
        }
    };

    let remaining = || deadline.saturating_duration_since(Instant::now());
    let stdout = stdout.recv_timeout(remaining());
    let stderr = stderr.recv_timeout(remaining());
    match (stdout, stderr) {
        (Ok(stdout), Ok(stderr)) => Ok(Output {
            status,
            stdout,
            stderr,
        }),
        _ => Err(Failure::timed_out(
            limit,
            "output still held open by a background process".to_string(),
        )),
    }
}

/// Read `pipe` to the end on a separate thread. The receiver gets the bytes
/// once the last writer has closed it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}
