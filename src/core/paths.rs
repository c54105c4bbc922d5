// src/core/paths.rs

use crate::constants::{CONFIGURE_FILENAME, STATE_DIR};
use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};

const ARCH_TOKEN: &str = "<arch>";
const PROJECT_HASH_LENGTH: usize = 8;

/// Expands a path template, resolving the home directory, environment
/// variables and the `<arch>` token.
///
/// # Errors
/// Returns an error if the template contains any other `<...>` token, or if an
/// environment variable cannot be resolved.
pub fn expand_path_template(template: &str, arch: &str) -> Result<PathBuf> {
    let with_tokens = template.replace(ARCH_TOKEN, arch);
    if with_tokens.split('<').skip(1).any(|rest| rest.contains('>')) {
        return Err(anyhow!(
            "Unsupported token in path template '{}'; only {} is recognised",
            template,
            ARCH_TOKEN
        ));
    }

    // `shellexpand::full` handles both `~` and `$VAR` / `${VAR}`.
    let expanded = shellexpand::full(&with_tokens)
        .map_err(|e| anyhow!("Failed to expand path template '{}': {}", template, e))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// A short stable identifier for a project directory.
fn project_hash(project_root: &Path) -> String {
    let canonical = dunce::canonicalize(project_root).unwrap_or_else(|_| project_root.to_path_buf());
    let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
    hex::encode(hash.as_bytes().iter().take(PROJECT_HASH_LENGTH).copied().collect::<Vec<u8>>())
}

/// Determines where the result cache of `arch` lives.
///
/// An explicit template wins. Otherwise the platform cache directory is used
/// (`~/.cache/confgraph/<project-hash>/<arch>` on Linux), falling back to
/// `<project>/.confgraph/cache/<arch>` when the platform has none.
pub fn resolve_cache_dir(template: Option<&str>, arch: &str, project_root: &Path) -> Result<PathBuf> {
    if let Some(template) = template {
        let expanded = expand_path_template(template, arch)?;
        return Ok(if expanded.is_absolute() {
            expanded
        } else {
            project_root.join(expanded)
        });
    }
    Ok(match dirs::cache_dir() {
        Some(cache_root) => cache_root
            .join("confgraph")
            .join(project_hash(project_root))
            .join(arch),
        None => project_root.join(STATE_DIR).join("cache").join(arch),
    })
}

/// Determines the output directory; defaults to `<project>/<arch>`.
pub fn resolve_output_dir(template: Option<&str>, arch: &str, project_root: &Path) -> Result<PathBuf> {
    let dir = match template {
        Some(template) => expand_path_template(template, arch)?,
        None => PathBuf::from(arch),
    };
    Ok(if dir.is_absolute() {
        dir
    } else {
        project_root.join(dir)
    })
}

/// Returns the `confgraph.toml` of `project_root`, if there is one.
pub fn find_configure_file(project_root: &Path) -> Option<PathBuf> {
    let candidate = project_root.join(CONFIGURE_FILENAME);
    candidate.is_file().then_some(candidate)
}
