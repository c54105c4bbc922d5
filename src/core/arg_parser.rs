// src/core/arg_parser.rs

use crate::core::options::{OptionError, Options};

/// Parses raw configure arguments into an [`Options`] database.
///
/// # Logic:
/// - `--name=value` and `-name=value` set `name` to `value`.
/// - `--name` alone sets `name` to `1`.
/// - `--without-name` is shorthand for `--with-name=0`.
/// - `--no-name` alone sets `name` to `0`.
/// - Later occurrences override earlier ones.
/// - Anything not starting with `-` is rejected.
pub fn parse_configure_args(args: &[String]) -> Result<Options, OptionError> {
    let mut options = Options::new();
    for arg in args {
        let trimmed = arg.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(stripped) = trimmed
            .strip_prefix("--")
            .or_else(|| trimmed.strip_prefix('-'))
        else {
            return Err(OptionError::Positional(trimmed.to_string()));
        };

        let (name, value) = match stripped.split_once('=') {
            Some((name, value)) => (name.trim(), unquote(value.trim())),
            None => (stripped.trim(), "1"),
        };
        if name.is_empty() {
            return Err(OptionError::EmptyName(trimmed.to_string()));
        }

        if !stripped.contains('=') {
            if let Some(feature) = name.strip_prefix("without-") {
                options.set(format!("with-{}", feature), "0");
                continue;
            }
            if let Some(feature) = name.strip_prefix("no-") {
                options.set(feature, "0");
                continue;
            }
        }
        options.set(name, value);
    }
    Ok(options)
}

/// Removes one level of matching single or double quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
