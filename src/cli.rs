// src/cli.rs

use crate::core::config_loader::RunOverrides;
use clap::Parser;
use std::path::PathBuf;

/// confgraph: a dependency-graph configure engine.
///
/// Runs the named configuration modules (and every module they depend on),
/// probing the toolchain, and writes a configuration header plus Makefile
/// fragments for the architecture.
///
/// Configure options follow the flags, exactly as a classic configure script
/// takes them:
///
/// - `confgraph --modules config.functions -- --with-cc=gcc --without-fc`
/// - `confgraph -j 8 --with-precision=single`
///
/// Results are cached per architecture; a second run with the same options
/// reuses them without probing again.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The configuration file to use instead of `./confgraph.toml`.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Modules to configure, comma separated (e.g. `config.functions,PETSc.options.scalarTypes`).
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub modules: Vec<String>,

    /// Number of modules probed concurrently; 1 runs them serially.
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Defer run tests to a program executed on the target machine.
    #[arg(long)]
    pub batch: bool,

    /// The architecture name; keys the cache and names the output directory.
    #[arg(long, value_name = "NAME")]
    pub arch: Option<String>,

    /// Where the header and Makefile fragments are written (default: `./<arch>`).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Where results are cached; `~`, `$VAR` and `<arch>` are expanded.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<String>,

    /// Ignore and do not write the result cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Read options from a file, such as the `reconfigure-<arch>.toml` written
    /// by a batch program.
    #[arg(long, value_name = "FILE")]
    pub options_file: Option<PathBuf>,

    /// List the options read by the selected modules and exit.
    #[arg(long)]
    pub help_options: bool,

    /// List the available modules and exit.
    #[arg(long)]
    pub list_modules: bool,

    /// Configure options (`--with-cc=gcc`, `--with-fc=0`, `--no-debugging`, ...).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// The command line part of the run configuration.
    pub fn overrides(&self) -> RunOverrides {
        RunOverrides {
            config: self.config.clone(),
            modules: self
                .modules
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            jobs: self.jobs,
            batch: self.batch,
            arch: self.arch.clone(),
            output_dir: self.output_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            no_cache: self.no_cache,
            options_file: self.options_file.clone(),
            args: self.args.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_trailing_configure_arguments() {
        let cli = Cli::try_parse_from([
            "confgraph",
            "--modules",
            "config.functions, PETSc.options.scalarTypes",
            "-j",
            "4",
            "--no-cache",
            "--with-cc=gcc",
            "--without-fc",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(
            overrides.modules,
            vec!["config.functions", "PETSc.options.scalarTypes"]
        );
        assert_eq!(overrides.jobs, Some(4));
        assert!(overrides.no_cache);
        assert_eq!(overrides.args, vec!["--with-cc=gcc", "--without-fc"]);
    }

    #[test]
    fn test_arguments_after_a_separator_are_configure_options() {
        let cli = Cli::try_parse_from(["confgraph", "--batch", "--", "--with-precision=single"]).unwrap();
        assert!(cli.batch);
        assert_eq!(cli.args, vec!["--with-precision=single"]);
    }
}
