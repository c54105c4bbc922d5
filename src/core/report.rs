// src/core/report.rs

//! The banner shown when a configure run fails.

use crate::core::framework::FrameworkError;
use crate::core::module::ModuleError;
use std::fmt::Write;

const BANNER_WIDTH: usize = 79;

/// The heading for a failure, by error class.
pub fn failure_heading(err: &FrameworkError) -> &'static str {
    match err {
        FrameworkError::ModuleFailed { source, .. } => match source {
            ModuleError::Unsatisfied { .. } => t!("report.heading.unsatisfied"),
            ModuleError::InvalidOption { .. } => t!("report.heading.invalid_option"),
            ModuleError::Probe(_) => t!("report.heading.probe_fault"),
            ModuleError::Internal(_) => t!("report.heading.crash"),
        },
        FrameworkError::Cycle { .. } => t!("report.heading.cycle"),
        FrameworkError::UnknownModule { .. } | FrameworkError::InvalidWorkerCount => {
            t!("report.heading.invalid_option")
        }
        FrameworkError::WorkerPool(_)
        | FrameworkError::Cache(_)
        | FrameworkError::Io(_)
        | FrameworkError::Artifact(_)
        | FrameworkError::Internal(_) => t!("report.heading.crash"),
    }
}

/// Renders the failure banner: heading, module, test, message, remediation.
pub fn render_failure(err: &FrameworkError) -> String {
    let stars = "*".repeat(BANNER_WIDTH);
    let dashes = "-".repeat(BANNER_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{}", stars);
    let _ = writeln!(out, "{:^width$}", failure_heading(err), width = BANNER_WIDTH);
    let _ = writeln!(out, "{:^width$}", t!("report.see_log"), width = BANNER_WIDTH);
    let _ = writeln!(out, "{}", dashes);

    match err {
        FrameworkError::ModuleFailed { module, test, source } => {
            let _ = writeln!(out, "{} {}", t!("report.label.module"), module);
            if let Some(test) = test {
                let _ = writeln!(out, "{} {}", t!("report.label.test"), test);
            }
            let _ = writeln!(out, "{}", source);
            match source {
                ModuleError::Unsatisfied {
                    remediation: Some(remediation),
                    ..
                } => {
                    let _ = writeln!(out, "{} {}", t!("report.label.remediation"), remediation);
                }
                ModuleError::Probe(fault) => {
                    if let Some(raw) = fault.raw_output() {
                        let _ = writeln!(out, "{}", raw.trim_end());
                    }
                }
                _ => {}
            }
        }
        FrameworkError::UnknownModule { name, known } => {
            let _ = writeln!(out, "{}", err);
            let _ = writeln!(out, "{} {} ({})", t!("report.label.known_modules"), known.join(", "), name);
        }
        other => {
            let _ = writeln!(out, "{}", other);
        }
    }
    let _ = writeln!(out, "{}", stars);
    out
}
