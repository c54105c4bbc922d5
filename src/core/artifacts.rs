// src/core/artifacts.rs

//! Rendering of the aggregated facts of a successful run.
//!
//! Everything is rendered in memory first; files are only touched once every
//! rendering step has succeeded, and each file is replaced atomically.

use crate::constants::{
    CONF_SUBDIR, FACTS_DUMP_FILENAME, HEADER_SUFFIX, MAKE_MACROS_FILENAME, MAKE_RULES_FILENAME,
};
use crate::core::batch::BatchProgram;
use crate::models::{Facts, MakeRule, SubstitutionFile};
use anyhow::{Context, Result, anyhow, bail};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

lazy_static! {
    // `@NAME@` placeholders in substitution templates.
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"@(\w+)@").unwrap();
}

/// The facts of one module, as they go into the artifacts.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ModuleArtifacts {
    pub name: String,
    /// Prefix for the module's define names (`PETSC`), or empty.
    pub define_prefix: String,
    pub facts: Facts,
}

impl ModuleArtifacts {
    /// `PETSC_HAVE_MEMCMP` for prefix `PETSC` and define `HAVE_MEMCMP`.
    pub fn full_define_name(&self, name: &str) -> String {
        if self.define_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.define_prefix, name)
        }
    }
}

/// Everything a successful run produced, in dependency order.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub arch: String,
    /// Names the header file (`<prefix>conf.h`, lowercased).
    pub header_prefix: String,
    pub modules: Vec<ModuleArtifacts>,
    #[serde(skip)]
    pub substitution_files: Vec<SubstitutionFile>,
}

impl Artifacts {
    pub fn header_name(&self) -> String {
        format!("{}{}", self.header_prefix.to_lowercase(), HEADER_SUFFIX)
    }

    /// All defines under their full names; later modules win on collision.
    pub fn defines(&self) -> BTreeMap<String, String> {
        let mut defines = BTreeMap::new();
        for module in &self.modules {
            for (name, value) in &module.facts.defines {
                defines.insert(module.full_define_name(name), value.clone());
            }
        }
        defines
    }

    pub fn make_macros(&self) -> BTreeMap<&str, &str> {
        let mut macros = BTreeMap::new();
        for module in &self.modules {
            for (name, value) in &module.facts.make_macros {
                macros.insert(name.as_str(), value.as_str());
            }
        }
        macros
    }

    pub fn make_rules(&self) -> BTreeMap<&str, &MakeRule> {
        let mut rules = BTreeMap::new();
        for module in &self.modules {
            for (target, rule) in &module.facts.make_rules {
                rules.insert(target.as_str(), rule);
            }
        }
        rules
    }

    pub fn substitutions(&self) -> BTreeMap<&str, &str> {
        let mut substitutions = BTreeMap::new();
        for module in &self.modules {
            for (name, value) in &module.facts.substitutions {
                substitutions.insert(name.as_str(), value.as_str());
            }
        }
        substitutions
    }

    /// The configuration header. Each define is guarded with `#ifndef` so the
    /// user can override it; empty values become `/* #undef NAME */`.
    pub fn render_header(&self) -> String {
        let guard = format!(
            "INCLUDED_{}",
            self.header_name().to_uppercase().replace(['.', '-'], "_")
        );
        let mut out = String::new();
        let _ = writeln!(out, "#if !defined({})", guard);
        let _ = writeln!(out, "#define {}\n", guard);
        for module in &self.modules {
            if module.facts.defines.is_empty() {
                continue;
            }
            let _ = writeln!(out, "/* {} */", module.name);
            for (name, value) in &module.facts.defines {
                let full_name = module.full_define_name(name);
                if let Some(help) = module.facts.help.get(name) {
                    let _ = writeln!(out, "/* {} */", help);
                }
                let _ = writeln!(out, "#ifndef {}", full_name);
                if value.is_empty() {
                    let _ = writeln!(out, "/* #undef {} */", full_name);
                } else {
                    let _ = writeln!(out, "#define {} {}", full_name, value);
                }
                let _ = writeln!(out, "#endif\n");
            }
        }
        let _ = writeln!(out, "#endif");
        out
    }

    /// `NAME = value` lines for the Makefile macro file.
    pub fn render_make_macros(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.make_macros() {
            let _ = writeln!(out, "{} = {}", name, value);
        }
        out
    }

    pub fn render_make_rules(&self) -> String {
        let mut out = String::new();
        for (target, rule) in self.make_rules() {
            let _ = writeln!(out, "{}: {}", target, rule.dependencies);
            for command in &rule.commands {
                let _ = writeln!(out, "\t{}", command);
            }
            out.push('\n');
        }
        out
    }

    /// Replaces every `@NAME@` whose name is a known substitution.
    /// Unknown placeholders are left untouched.
    pub fn substitute(&self, template: &str) -> String {
        let substitutions = self.substitutions();
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures<'_>| {
                let name = caps.get(1).map_or("", |m| m.as_str());
                match substitutions.get(name) {
                    Some(value) => (*value).to_string(),
                    None => {
                        warn!("No substitution for placeholder '@{}@'", name);
                        caps.get(0).map_or(String::new(), |m| m.as_str().to_string())
                    }
                }
            })
            .into_owned()
    }
}

/// Writes the results of a run.
pub trait ArtifactWriter {
    /// Writes the final artifacts. Called only after every module succeeded.
    fn write(&self, artifacts: &Artifacts) -> Result<()>;

    /// Writes the batch program and returns where it was written.
    fn write_batch_program(&self, program: &BatchProgram) -> Result<PathBuf>;
}

/// Writes the artifacts below an output directory.
#[derive(Debug, Clone)]
pub struct FileArtifactWriter {
    output_dir: PathBuf,
}

impl FileArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn substitution_output(file: &SubstitutionFile) -> Result<PathBuf> {
        if let Some(output) = &file.output {
            return Ok(output.clone());
        }
        let input = file.input.to_string_lossy();
        match input.strip_suffix(".in") {
            Some(stripped) if !stripped.is_empty() => Ok(PathBuf::from(stripped)),
            _ => bail!(
                "Substitution template '{}' does not end in '.in'; give an explicit output path",
                file.input.display()
            ),
        }
    }
}

impl ArtifactWriter for FileArtifactWriter {
    fn write(&self, artifacts: &Artifacts) -> Result<()> {
        let conf_dir = self.output_dir.join(CONF_SUBDIR);
        let mut rendered: Vec<(PathBuf, String)> = vec![
            (self.output_dir.join(artifacts.header_name()), artifacts.render_header()),
            (conf_dir.join(MAKE_MACROS_FILENAME), artifacts.render_make_macros()),
            (conf_dir.join(MAKE_RULES_FILENAME), artifacts.render_make_rules()),
            (
                conf_dir.join(FACTS_DUMP_FILENAME),
                serde_json::to_string_pretty(artifacts).context("Failed to serialize facts")?,
            ),
        ];
        for file in &artifacts.substitution_files {
            let template = fs::read_to_string(&file.input).with_context(|| {
                format!("Failed to read substitution template '{}'", file.input.display())
            })?;
            rendered.push((Self::substitution_output(file)?, artifacts.substitute(&template)));
        }

        for (path, contents) in &rendered {
            write_atomically(path, contents)?;
            debug!("Wrote '{}'", path.display());
        }
        info!("Wrote {} configuration files", rendered.len());
        Ok(())
    }

    fn write_batch_program(&self, program: &BatchProgram) -> Result<PathBuf> {
        let path = self.output_dir.join(&program.file_name);
        write_atomically(&path, &program.source)?;
        info!("Wrote batch program '{}'", path.display());
        Ok(path)
    }
}

/// Replaces `path` with `contents` through a temporary file in the same directory.
fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
    let mut temp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create a temporary file in '{}'", parent.display()))?;
    temp.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write '{}'", path.display()))?;
    temp.persist(path)
        .map_err(|e| anyhow!("Failed to replace '{}': {}", path.display(), e.error))?;
    Ok(())
}
