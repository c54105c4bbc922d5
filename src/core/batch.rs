// src/core/batch.rs

//! # Batch Plan
//!
//! On machines where test programs cannot run at configure time (cross
//! compilation, queued clusters), run tests are deferred: every module adds a
//! fragment to the plan, and after the run a single C program is emitted. Run on
//! the target, it writes `reconfigure-<arch>.toml`, whose `[options]` table is
//! fed back with `--options-file` to finish the configuration.

use crate::core::options::Options;

/// A piece of deferred work contributed by one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFragment {
    pub module: String,
    /// `#include` lines or declarations placed before `main`.
    pub includes: Vec<String>,
    /// Statements executed before any body.
    pub setup: Option<String>,
    /// Statements inside `main`; they write options with `fprintf(output, ...)`.
    pub body: String,
    /// Statements executed after every body.
    pub cleanup: Option<String>,
    /// Extra link arguments the program needs.
    pub libs: Vec<String>,
}

impl BatchFragment {
    pub fn new(module: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn include(mut self, line: impl Into<String>) -> Self {
        self.includes.push(line.into());
        self
    }

    pub fn lib(mut self, lib: impl Into<String>) -> Self {
        self.libs.push(lib.into());
        self
    }
}

/// Deferred work collected during a run.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    arch: String,
    fragments: Vec<BatchFragment>,
}

/// The rendered batch program, ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgram {
    /// File name for the C source (`conftest-<arch>.c`).
    pub file_name: String,
    /// File the program produces when run (`reconfigure-<arch>.toml`).
    pub output_name: String,
    pub source: String,
    /// Link arguments, deduplicated in first-seen order.
    pub libs: Vec<String>,
}

impl BatchPlan {
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            fragments: Vec::new(),
        }
    }

    pub fn add(&mut self, fragment: BatchFragment) {
        log::debug!("Deferring batch work for '{}'", fragment.module);
        self.fragments.push(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Modules that contributed work, in contribution order.
    pub fn modules(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for fragment in &self.fragments {
            if !seen.contains(&fragment.module.as_str()) {
                seen.push(fragment.module.as_str());
            }
        }
        seen
    }

    /// Renders the program. The current `options` are echoed into the output
    /// file so the resumed run sees the same configuration.
    pub fn render(&self, options: &Options) -> BatchProgram {
        let output_name = format!("reconfigure-{}.toml", self.arch);
        let mut includes: Vec<&str> = vec!["#include <stdio.h>"];
        let mut libs: Vec<String> = Vec::new();
        for fragment in &self.fragments {
            for line in &fragment.includes {
                if !includes.contains(&line.as_str()) {
                    includes.push(line);
                }
            }
            for lib in &fragment.libs {
                if !libs.contains(lib) {
                    libs.push(lib.clone());
                }
            }
        }

        let mut source = includes.join("\n");
        source.push_str("\n\nint main(int argc, char **argv) {\n");
        source.push_str(&format!(
            "  FILE *output = fopen(\"{}\", \"w\");\n  if (!output) return 1;\n",
            c_escape(&output_name)
        ));
        source.push_str("  fprintf(output, \"# Written by the confgraph batch program\\n\");\n");
        source.push_str("  fprintf(output, \"[options]\\n\");\n");
        for (key, value) in options.iter() {
            let line = format!("\"{}\" = {}\n", key, toml::Value::String(value.to_string()));
            source.push_str(&format!("  fprintf(output, \"{}\");\n", c_escape(&line)));
        }
        for setup in self.fragments.iter().filter_map(|f| f.setup.as_deref()) {
            source.push_str(setup);
            source.push('\n');
        }
        for fragment in &self.fragments {
            source.push_str(&format!("  /* {} */\n", fragment.module));
            source.push_str("  {\n");
            source.push_str(&fragment.body);
            source.push_str("\n  }\n");
        }
        for cleanup in self.fragments.iter().filter_map(|f| f.cleanup.as_deref()) {
            source.push_str(cleanup);
            source.push('\n');
        }
        source.push_str("  fclose(output);\n  return 0;\n}\n");

        BatchProgram {
            file_name: format!("conftest-{}.c", self.arch),
            output_name,
            source,
            libs,
        }
    }
}

/// Escapes text for a C string literal used as a `printf` format.
pub fn c_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '%' => out.push_str("%%"),
            _ => out.push(c),
        }
    }
    out
}
