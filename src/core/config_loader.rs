// src/core/config_loader.rs

//! # Config Loader
//!
//! Resolves everything a configure run needs from its three sources, in
//! increasing priority:
//!
//! 1. the project's `confgraph.toml` (or the file given with `--config`),
//! 2. an options file such as the `reconfigure-<arch>.toml` written by a batch
//!    program (`--options-file`),
//! 3. the command line: flags and trailing `--key=value` configure arguments.
use crate::constants::DEFAULT_ARCH;
use crate::core::arg_parser::parse_configure_args;
use crate::core::engine::Strategy;
use crate::core::framework::FrameworkSettings;
use crate::core::options::{OptionError, Options};
use crate::core::paths;
use crate::models::{ConfigureFile, SubstitutionFile};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The option that turns on batch mode, as in `--with-batch`.
const BATCH_OPTION: &str = "with-batch";

#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Option(#[from] OptionError),
    #[error("Invalid path setting: {0}")]
    Path(String),
}

impl ConfigFileError {
    /// The file that could not be loaded, if the error is about one.
    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Option(_) | Self::Path(_) => None,
        }
    }
}

/// The values given on the command line. `None` and empty fields defer to
/// the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub config: Option<PathBuf>,
    pub modules: Vec<String>,
    pub jobs: Option<usize>,
    pub batch: bool,
    pub arch: Option<String>,
    pub output_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub no_cache: bool,
    pub options_file: Option<PathBuf>,
    /// Configure arguments (`--with-cc=gcc`, `--without-fc`, ...).
    pub args: Vec<String>,
}

/// A fully resolved run.
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub modules: Vec<String>,
    pub options: Options,
    pub settings: FrameworkSettings,
    pub output_dir: PathBuf,
    /// `None` when caching is disabled.
    pub cache_dir: Option<PathBuf>,
    pub substitution_files: Vec<SubstitutionFile>,
}

/// An options file: just an `[options]` table.
#[derive(Deserialize, Debug, Default)]
struct OptionsFile {
    #[serde(default)]
    options: BTreeMap<String, toml::Value>,
}

fn read_to_string(path: &Path) -> Result<String, ConfigFileError> {
    fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and validates a `confgraph.toml`.
pub fn load_configure_file(path: &Path) -> Result<ConfigureFile, ConfigFileError> {
    let content = read_to_string(path)?;
    toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads the `[options]` table of an options file.
pub fn load_options_file(path: &Path) -> Result<Options, ConfigFileError> {
    let content = read_to_string(path)?;
    let file: OptionsFile = toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Options::from_toml_table(&file.options)?)
}

/// Merges the configuration file, the options file and `overrides`.
pub fn resolve_run(project_root: &Path, overrides: &RunOverrides) -> Result<ResolvedRun, ConfigFileError> {
    let file = match &overrides.config {
        Some(path) => load_configure_file(path)?,
        None => match paths::find_configure_file(project_root) {
            Some(path) => {
                log::debug!("Using configuration file '{}'", path.display());
                load_configure_file(&path)?
            }
            None => ConfigureFile::default(),
        },
    };

    let mut options = Options::from_toml_table(&file.options)?;
    if let Some(path) = &overrides.options_file {
        log::info!("Reading options from '{}'", path.display());
        options.merge(load_options_file(path)?);
    }
    options.merge(parse_configure_args(&overrides.args)?);

    let arch = overrides
        .arch
        .clone()
        .or(file.arch)
        .unwrap_or_else(|| DEFAULT_ARCH.to_string());
    let jobs = overrides.jobs.or(file.jobs).unwrap_or(1);
    let batch = overrides.batch || file.batch.unwrap_or(false) || options.flag(BATCH_OPTION);

    let output_dir = paths::resolve_output_dir(
        overrides.output_dir.as_deref().or(file.output_dir.as_deref()),
        &arch,
        project_root,
    )
    .map_err(|e| ConfigFileError::Path(format!("{:#}", e)))?;
    let cache_dir = if overrides.no_cache {
        None
    } else {
        let dir = paths::resolve_cache_dir(
            overrides.cache_dir.as_deref().or(file.cache_dir.as_deref()),
            &arch,
            project_root,
        )
        .map_err(|e| ConfigFileError::Path(format!("{:#}", e)))?;
        Some(dir)
    };

    let substitution_files = file
        .substitute
        .into_iter()
        .map(|entry| SubstitutionFile {
            input: project_root.join(&entry.input),
            output: entry.output.map(|output| project_root.join(output)),
        })
        .collect();

    let modules = if overrides.modules.is_empty() {
        file.modules
    } else {
        overrides.modules.clone()
    };

    let mut settings = FrameworkSettings {
        strategy: Strategy::from_jobs(jobs),
        batch,
        arch,
        ..Default::default()
    };
    if let Some(prefix) = file.header_prefix {
        settings.header_prefix = prefix;
    }

    Ok(ResolvedRun {
        modules,
        options,
        settings,
        output_dir,
        cache_dir,
        substitution_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CONFIGURE_FILENAME;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_a_file() {
        let dir = tempdir().unwrap();
        let run = resolve_run(
            dir.path(),
            &RunOverrides {
                no_cache: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(run.modules.is_empty());
        assert!(run.options.is_empty());
        assert_eq!(run.settings.arch, DEFAULT_ARCH);
        assert_eq!(run.settings.strategy, Strategy::Serial);
        assert_eq!(run.output_dir, dir.path().join(DEFAULT_ARCH));
        assert!(run.cache_dir.is_none());
    }

    #[test]
    fn test_command_line_overrides_the_file() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            CONFIGURE_FILENAME,
            r#"
                modules = ["config.functions"]
                arch = "arch-file"
                jobs = 2
                header_prefix = "PETSC"
                cache_dir = "cache/<arch>"
                [options]
                with-cc = "gcc"
                with-debugging = true
                [[substitute]]
                input = "petscvariables.in"
            "#,
        );
        let overrides = RunOverrides {
            arch: Some("arch-cli".to_string()),
            jobs: Some(8),
            args: vec!["--with-cc=clang".to_string(), "--without-fc".to_string()],
            ..Default::default()
        };
        let run = resolve_run(dir.path(), &overrides).unwrap();

        assert_eq!(run.modules, vec!["config.functions"]);
        assert_eq!(run.settings.arch, "arch-cli");
        assert_eq!(run.settings.strategy, Strategy::Parallel { workers: 8 });
        assert_eq!(run.settings.header_prefix, "PETSC");
        assert_eq!(run.options.get("with-cc"), Some("clang"));
        assert_eq!(run.options.get("with-fc"), Some("0"));
        assert!(run.options.flag("with-debugging"));
        assert_eq!(run.cache_dir, Some(dir.path().join("cache/arch-cli")));
        assert_eq!(
            run.substitution_files[0].input,
            dir.path().join("petscvariables.in")
        );
    }

    #[test]
    fn test_options_file_sits_between_file_and_command_line() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            CONFIGURE_FILENAME,
            "[options]\nknown-memcmp-ok = \"0\"\nwith-precision = \"single\"\n",
        );
        let resume = write(
            dir.path(),
            "reconfigure-arch.toml",
            "[options]\n\"known-memcmp-ok\" = \"1\"\n\"with-precision\" = \"double\"\n",
        );
        let overrides = RunOverrides {
            options_file: Some(resume),
            args: vec!["--with-precision=__float128".to_string()],
            no_cache: true,
            ..Default::default()
        };
        let run = resolve_run(dir.path(), &overrides).unwrap();
        assert_eq!(run.options.get("known-memcmp-ok"), Some("1"));
        assert_eq!(run.options.get("with-precision"), Some("__float128"));
    }

    #[test]
    fn test_batch_can_come_from_an_option() {
        let dir = tempdir().unwrap();
        let overrides = RunOverrides {
            args: vec!["--with-batch".to_string()],
            no_cache: true,
            ..Default::default()
        };
        assert!(resolve_run(dir.path(), &overrides).unwrap().settings.batch);
    }

    #[test]
    fn test_errors_name_the_file() {
        let dir = tempdir().unwrap();
        let bad = write(dir.path(), "bad.toml", "jobs = \"many\"\n");
        let err = resolve_run(
            dir.path(),
            &RunOverrides {
                config: Some(bad),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConfigFileError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));

        let missing = resolve_run(
            dir.path(),
            &RunOverrides {
                config: Some(dir.path().join("nope.toml")),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(missing, ConfigFileError::Read { .. }));

        let positional = resolve_run(
            dir.path(),
            &RunOverrides {
                args: vec!["stray".to_string()],
                no_cache: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(positional, ConfigFileError::Option(_)));
    }
}
