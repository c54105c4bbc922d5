// src/bin/confgraph.rs

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use confgraph::{
    cli::Cli,
    core::{
        artifacts::FileArtifactWriter,
        cache::ResultCache,
        config_loader::{self, ResolvedRun},
        framework::{ConfigureOutcome, Framework, FrameworkError},
        report,
    },
    modules::{BUILTIN_MODULES, builtin_catalog},
    system::toolchain::CommandProbeExecutor,
    t,
};
use std::env;
use std::time::Instant;

/// The main entry point of `confgraph`.
/// It sets up logging, parses arguments, runs the configuration and reports
/// failures.
fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        // Module failures get the full banner; everything else a one-liner.
        if let Some(failure) = e.downcast_ref::<FrameworkError>() {
            eprintln!("{}", report::render_failure(failure).red());
            log::debug!("{:?}", e);
        } else {
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        }
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    if cli.list_modules {
        println!("{}", t!("cli.info.modules_header").bold());
        for definition in BUILTIN_MODULES {
            println!("  {:<28} {}", definition.name.cyan(), definition.about);
        }
        return Ok(());
    }

    let project_root = env::current_dir().context("Failed to read the current directory")?;
    let run = config_loader::resolve_run(&project_root, &cli.overrides()).map_err(|e| {
        let file = e.file().map(|path| path.display().to_string());
        match file {
            Some(path) => anyhow::Error::new(e).context(format!(t!("cli.error.config_file"), path = path)),
            None => anyhow::Error::new(e),
        }
    })?;

    if run.modules.is_empty() {
        anyhow::bail!(t!("cli.error.no_modules"));
    }

    let mut framework = build_framework(&run);
    framework.create_children(&run.modules)?;

    if cli.help_options {
        print!("{}", framework.help().render_help());
        return Ok(());
    }

    configure(framework, &run)
}

fn build_framework(run: &ResolvedRun) -> Framework {
    let mut framework = Framework::new(builtin_catalog(), run.options.clone(), run.settings.clone());
    if let Some(dir) = &run.cache_dir {
        log::debug!("Result cache directory: {}", dir.display());
        framework = framework.with_cache(ResultCache::open(dir, &run.settings.arch));
    }
    for file in &run.substitution_files {
        framework.add_substitution_file(file.clone());
    }
    framework
}

fn configure(mut framework: Framework, run: &ResolvedRun) -> Result<()> {
    println!(
        "{}",
        format!(t!("cli.info.configuring"), arch = run.settings.arch).bold()
    );
    let started = Instant::now();
    let executor = CommandProbeExecutor::default();
    let writer = FileArtifactWriter::new(&run.output_dir);

    match framework.configure(&executor, &writer)? {
        ConfigureOutcome::Completed(report) => {
            let summary = framework.print_summary();
            if !summary.is_empty() {
                println!("\n{}", t!("cli.info.summary_header").bold());
                println!("{}", summary);
            }
            println!(
                "\n{}",
                format!(
                    t!("cli.success.done"),
                    seconds = started.elapsed().as_secs_f64(),
                    executed = report.executed.len(),
                    reused = report.reused.len()
                )
                .green()
            );
            println!(
                "{}",
                format!(t!("cli.success.artifacts"), path = run.output_dir.display())
            );
        }
        ConfigureOutcome::BatchPending { path, output_name } => {
            println!(
                "{}",
                format!(t!("cli.info.batch_pending"), path = path.display()).yellow()
            );
            println!("{}", format!(t!("cli.info.batch_resume"), output = output_name));
        }
    }
    Ok(())
}
