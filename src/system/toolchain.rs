// src/system/toolchain.rs

//! A [`ProbeExecutor`] that drives the real compilers.
//!
//! Every probe writes its source, object and executable under the run's
//! scratch directory with a name unique to the probe, and removes them again
//! however the probe ends.

use crate::constants::DEFAULT_PROBE_TIMEOUT_SECS;
use crate::core::probe::{ProbeExecutor, ProbeFault, ProbeOutput, ProbeRequest};
use crate::system::executor::{CapturedOutput, execute_captured, split_command};
use log::{debug, trace};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Runs probes by invoking the toolchain described in each request.
#[derive(Debug)]
pub struct CommandProbeExecutor {
    timeout: Duration,
    counter: AtomicU64,
}

impl Default for CommandProbeExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS))
    }
}

/// Scratch file names of one probe.
struct ProbeFiles {
    source: PathBuf,
    object: PathBuf,
    executable: PathBuf,
}

impl ProbeFiles {
    fn all(&self) -> [PathBuf; 3] {
        [
            self.source.clone(),
            self.object.clone(),
            self.executable.clone(),
        ]
    }
}

impl CommandProbeExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            counter: AtomicU64::new(0),
        }
    }

    fn files_for(&self, request: &ProbeRequest) -> ProbeFiles {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let stem = format!("conftest-{}-{}", request.tag, n);
        let dir = &request.work_dir;
        ProbeFiles {
            source: dir.join(format!("{}.{}", stem, request.language.source_extension())),
            object: dir.join(format!("{}.o", stem)),
            executable: dir.join(format!("{}{}", stem, std::env::consts::EXE_SUFFIX)),
        }
    }

    fn run_tool(&self, argv: &[String], cwd: &Path) -> Result<CapturedOutput, ProbeFault> {
        let output = execute_captured(argv, cwd, self.timeout)?;
        if output.terminated_by_signal() {
            return Err(ProbeFault::Crashed {
                command: argv.join(" "),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Compiles the request's source into `files.object`.
    fn compile_into(&self, request: &ProbeRequest, files: &ProbeFiles) -> Result<ProbeOutput, ProbeFault> {
        fs::write(&files.source, request.source())?;
        let mut argv = split_command(&request.toolchain.compiler)?;
        argv.extend(request.toolchain.flags.iter().cloned());
        argv.push("-c".to_string());
        argv.push(files.source.to_string_lossy().into_owned());
        argv.push("-o".to_string());
        argv.push(files.object.to_string_lossy().into_owned());
        let output = self.run_tool(&argv, &request.work_dir)?;
        Ok(to_probe_output(output))
    }

    /// Compiles and links the request into `files.executable`.
    fn link_into(&self, request: &ProbeRequest, files: &ProbeFiles) -> Result<ProbeOutput, ProbeFault> {
        let compiled = self.compile_into(request, files)?;
        if !compiled.success {
            return Ok(compiled);
        }
        let mut argv = split_command(&request.toolchain.linker)?;
        argv.extend(request.toolchain.linker_flags.iter().cloned());
        argv.push("-o".to_string());
        argv.push(files.executable.to_string_lossy().into_owned());
        argv.push(files.object.to_string_lossy().into_owned());
        argv.extend(request.extra_libs.iter().cloned());
        argv.extend(request.toolchain.libs.iter().cloned());
        let output = self.run_tool(&argv, &request.work_dir)?;
        Ok(to_probe_output(output))
    }

    fn with_files<T>(
        &self,
        request: &ProbeRequest,
        f: impl FnOnce(&ProbeFiles) -> Result<T, ProbeFault>,
    ) -> Result<T, ProbeFault> {
        let files = self.files_for(request);
        let _cleanup = scopeguard::guard(files.all(), |paths| {
            for path in paths {
                if path.exists() {
                    if let Err(e) = fs::remove_file(&path) {
                        debug!("Could not remove probe file '{}': {}", path.display(), e);
                    }
                }
            }
        });
        trace!("Probe source for '{}':\n{}", request.tag, request.source());
        f(&files)
    }
}

fn to_probe_output(output: CapturedOutput) -> ProbeOutput {
    ProbeOutput {
        success: output.succeeded(),
        stdout: output.stdout,
        stderr: output.stderr,
    }
}

impl ProbeExecutor for CommandProbeExecutor {
    fn compile(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.with_files(request, |files| self.compile_into(request, files))
    }

    fn link(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.with_files(request, |files| self.link_into(request, files))
    }

    fn run(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.with_files(request, |files| {
            let linked = self.link_into(request, files)?;
            if !linked.success {
                return Ok(linked);
            }
            let argv = vec![files.executable.to_string_lossy().into_owned()];
            // A test program that crashes answers "no"; only the toolchain
            // itself crashing is a fault.
            let output = execute_captured(&argv, &request.work_dir, self.timeout)?;
            Ok(to_probe_output(output))
        })
    }
}
