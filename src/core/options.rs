// src/core/options.rs

//! # Option Database
//!
//! The configure options of a run (`--with-cc=gcc`, `--with-precision=single`),
//! together with the registry in which modules declare the options they read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("Option '--{key}' expects a boolean (0/1, yes/no, true/false) but got '{value}'")]
    InvalidBool { key: String, value: String },
    #[error("Option '--{key}' has a value type that cannot be used from a configuration file")]
    UnsupportedValue { key: String },
    #[error("Unexpected argument '{0}': configure options must look like --name=value")]
    Positional(String),
    #[error("Empty option name in '{0}'")]
    EmptyName(String),
}

/// All configure options of a run, keyed without leading dashes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: BTreeMap<String, String>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Interprets an option as a boolean. `Ok(None)` when unset.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, OptionError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" | "on" => Ok(Some(true)),
            "0" | "no" | "false" | "off" => Ok(Some(false)),
            _ => Err(OptionError::InvalidBool {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// A boolean option that is considered false when unset or malformed.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get_bool(key), Ok(Some(true)))
    }

    /// Splits a comma separated option (`--with-headers=[stdlib.h,math.h]`).
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlays `other` on top of `self`; values from `other` win.
    pub fn merge(&mut self, other: Self) {
        self.values.extend(other.values);
    }

    /// Converts a TOML `[options]` table into options.
    pub fn from_toml_table(table: &BTreeMap<String, toml::Value>) -> Result<Self, OptionError> {
        let mut options = Self::new();
        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
                toml::Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        toml::Value::String(s) => Ok(s.clone()),
                        toml::Value::Integer(i) => Ok(i.to_string()),
                        _ => Err(OptionError::UnsupportedValue { key: key.clone() }),
                    })
                    .collect::<Result<Vec<_>, _>>()?
                    .join(","),
                _ => return Err(OptionError::UnsupportedValue { key: key.clone() }),
            };
            options.set(key.clone(), rendered);
        }
        Ok(options)
    }

    /// The options as a command line, quoting values with spaces or brackets.
    pub fn options_string(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| {
                if v.contains(' ') || v.contains('[') {
                    format!("--{}=\"{}\"", k, v)
                } else {
                    format!("--{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One option a module reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    /// Help section, usually the module's display name.
    pub section: String,
    pub name: String,
    pub default: Option<String>,
    pub help: String,
}

/// Collects the options declared by every module of the run.
#[derive(Debug, Default)]
pub struct OptionRegistry {
    specs: BTreeMap<String, OptionSpec>,
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an option. The first declaration of a name wins.
    pub fn add(
        &mut self,
        section: &str,
        name: &str,
        default: Option<&str>,
        help: &str,
    ) {
        self.specs
            .entry(name.to_string())
            .or_insert_with(|| OptionSpec {
                section: section.to_string(),
                name: name.to_string(),
                default: default.map(str::to_string),
                help: help.to_string(),
            });
    }

    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Fills in the default of every declared option the user did not set.
    pub fn apply_defaults(&self, options: &mut Options) {
        for spec in self.specs.values() {
            if let Some(default) = &spec.default {
                if !options.contains(&spec.name) {
                    options.set(spec.name.clone(), default.clone());
                }
            }
        }
    }

    /// `with-*` options given by the user that no module declared.
    pub fn unknown_options<'a>(&self, options: &'a Options) -> Vec<&'a str> {
        options
            .iter()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with("with-") && !self.specs.contains_key(*k))
            .collect()
    }

    /// Renders the registry grouped by section, for `--help-options`.
    pub fn render_help(&self) -> String {
        let mut sections: BTreeMap<&str, Vec<&OptionSpec>> = BTreeMap::new();
        for spec in self.specs.values() {
            sections.entry(spec.section.as_str()).or_default().push(spec);
        }
        let mut out = String::new();
        for (section, specs) in sections {
            let _ = writeln!(out, "{}:", section);
            for spec in specs {
                let default = spec
                    .default
                    .as_deref()
                    .map(|d| format!(" (default: {})", d))
                    .unwrap_or_default();
                let _ = writeln!(out, "  --{:<28} {}{}", spec.name, spec.help, default);
            }
        }
        out
    }
}
