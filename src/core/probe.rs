// src/core/probe.rs

//! # Probe Executor Interface
//!
//! The boundary between the configure engine and the target toolchain. A probe
//! is a tiny program assembled from include lines and a body; the executor
//! compiles, links or runs it and reports pass/fail with the captured output.
//! A failing compile is a normal negative answer; a [`ProbeFault`] means the
//! probe machinery itself misbehaved.

use crate::models::{Language, LanguageConfig};
use std::path::PathBuf;
use thiserror::Error;

/// The probe process itself misbehaved, as opposed to answering "no".
#[derive(Error, Debug)]
pub enum ProbeFault {
    /// The compiler, linker or test program could not be started.
    #[error("Could not execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The invocation exceeded the executor's timeout and was killed.
    #[error("'{command}' did not finish within {seconds} seconds and was killed")]
    TimedOut { command: String, seconds: u64 },
    /// The toolchain process died from a signal instead of exiting.
    #[error("'{command}' terminated abnormally")]
    Crashed {
        command: String,
        stdout: String,
        stderr: String,
    },
    /// A compiler command line could not be split into arguments.
    #[error("Could not parse command line '{0}'")]
    CommandParse(String),
    #[error("I/O error while preparing a probe: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeFault {
    /// Raw process output kept for the run log, if any.
    pub fn raw_output(&self) -> Option<String> {
        match self {
            Self::Crashed { stdout, stderr, .. } => {
                Some(format!("stdout:\n{}\nstderr:\n{}", stdout, stderr))
            }
            _ => None,
        }
    }
}

/// One compile, link or run test.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub language: Language,
    pub toolchain: LanguageConfig,
    /// Text placed before `main` (includes, declarations).
    pub includes: String,
    /// Statements placed inside `main`.
    pub body: String,
    /// Extra linker arguments for this probe only (`-lm`, `/opt/lib/libz.a`).
    pub extra_libs: Vec<String>,
    /// Directory for the probe's scratch files; shared by concurrent probes.
    pub work_dir: PathBuf,
    /// Name fragment making this probe's scratch files unique (usually the module name).
    pub tag: String,
}

impl ProbeRequest {
    /// The complete translation unit handed to the compiler.
    pub fn source(&self) -> String {
        match self.language {
            Language::Fortran => format!(
                "      program main\n{}\n{}\n      end\n",
                self.includes, self.body
            ),
            Language::C | Language::Cxx | Language::Cuda => format!(
                "{}\nint main(void) {{\n{}\n  return 0;\n}}\n",
                self.includes, self.body
            ),
        }
    }
}

/// The observable result of a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProbeOutput {
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

/// Compiles, links and runs probes against the target toolchain.
///
/// Implementations must be shareable between worker threads and must enforce
/// their own per-invocation timeout; the engine never cancels a probe.
pub trait ProbeExecutor: Send + Sync {
    fn compile(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault>;
    fn link(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault>;
    fn run(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault>;
}
