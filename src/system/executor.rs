// src/system/executor.rs

use crate::core::probe::ProbeFault;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A finished process with its captured output.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// The process exited normally with status zero.
    pub fn succeeded(&self) -> bool {
        self.status.success()
    }

    /// The process was killed by a signal instead of exiting.
    pub fn terminated_by_signal(&self) -> bool {
        self.status.code().is_none()
    }
}

/// Splits a command line such as `"gcc -m64"` into program and arguments.
pub fn split_command(command_line: &str) -> Result<Vec<String>, ProbeFault> {
    let parts = shlex::split(command_line.trim())
        .ok_or_else(|| ProbeFault::CommandParse(command_line.to_string()))?;
    if parts.is_empty() {
        return Err(ProbeFault::CommandParse(command_line.to_string()));
    }
    Ok(parts)
}

/// Runs `argv` in `cwd`, capturing stdout and stderr, and kills it if it has
/// not finished after `timeout`.
pub fn execute_captured(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<CapturedOutput, ProbeFault> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ProbeFault::CommandParse(String::new()));
    };
    let display = argv.join(" ");
    log::trace!("Executing: {}", display);

    let mut child = StdCommand::new(program)
        .args(args)
        .current_dir(dunce::simplified(cwd))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProbeFault::Spawn {
            command: display.clone(),
            source,
        })?;

    // Pipes are drained on their own threads so a chatty process cannot block
    // on a full pipe while we poll it.
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let status = wait_with_timeout(&mut child, timeout, &display)?;
    Ok(CapturedOutput {
        status,
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration, display: &str) -> Result<ExitStatus, ProbeFault> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if started.elapsed() >= timeout {
                    log::debug!(
                        "Timeout reached, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    return Err(ProbeFault::TimedOut {
                        command: display.to_string(),
                        seconds: timeout.as_secs(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(ProbeFault::Io(e)),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            String::from_utf8_lossy(&bytes).into_owned()
        })
    })
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
