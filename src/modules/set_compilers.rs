// src/modules/set_compilers.rs

//! `config.setCompilers`: finds a working compiler for each language.
//!
//! An explicit `--with-<lang>=<command>` is the only candidate tried for its
//! language; otherwise the usual compiler names are tried in order. A C
//! compiler is mandatory. C++ and Fortran are optional unless requested
//! explicitly, and `--with-cxx=0` / `--with-fc=0` skip them altogether.

use crate::core::module::{Attempt, ConfigModule, ModuleError, ProbeContext, search};
use crate::core::options::{OptionRegistry, Options};
use crate::core::probe::ProbeFault;
use crate::models::{Facts, Language, LanguageConfig};
use log::{debug, info};

pub const NAME: &str = "config.setCompilers";

const SECTION: &str = "Compilers";
const LINKER_FLAGS_OPTION: &str = "LDFLAGS";
const LIBS_OPTION: &str = "LIBS";

/// Languages detected by this module, in detection order.
const DETECTED: [Language; 3] = [Language::C, Language::Cxx, Language::Fortran];

pub fn create() -> Box<dyn ConfigModule> {
    Box::new(SetCompilers::default())
}

#[derive(Debug, Default)]
pub struct SetCompilers {
    facts: Facts,
}

/// What the user asked for one language.
enum Request<'a> {
    Disabled,
    Explicit(&'a str),
    Search,
}

fn request_for(options: &Options, language: Language) -> Request<'_> {
    match options.get(language.option_name()).map(str::trim) {
        None | Some("") => Request::Search,
        Some("0") => Request::Disabled,
        Some(command) => Request::Explicit(command),
    }
}

/// Splits a flags option into words, honouring shell quoting.
fn option_words(options: &Options, key: &str) -> Result<Vec<String>, ModuleError> {
    let Some(raw) = options.get(key) else {
        return Ok(Vec::new());
    };
    shlex::split(raw).ok_or_else(|| ModuleError::invalid_option(key, "unbalanced quotes"))
}

impl SetCompilers {
    fn detect(&mut self, ctx: &ProbeContext<'_>, language: Language) -> Result<(), ModuleError> {
        let options = ctx.options();
        let candidates: Vec<String> = match request_for(options, language) {
            Request::Disabled if language == Language::C => {
                return Err(ModuleError::invalid_option(
                    language.option_name(),
                    "a C compiler is required",
                ));
            }
            Request::Disabled => {
                info!("{} compiler disabled by --{}=0", language, language.option_name());
                return Ok(());
            }
            Request::Explicit(command) => vec![command.to_string()],
            Request::Search => language
                .default_candidates()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        };

        let template = LanguageConfig {
            flags: option_words(options, language.flags_var())?,
            linker_flags: option_words(options, LINKER_FLAGS_OPTION)?,
            libs: option_words(options, LIBS_OPTION)?,
            ..Default::default()
        };

        let result = search(candidates, |compiler| {
            let toolchain = LanguageConfig {
                compiler: compiler.clone(),
                linker: compiler.clone(),
                ..template.clone()
            };
            let request = ctx.request(language, &toolchain, "", "");
            match ctx.executor().link(&request) {
                Ok(output) if output.success => Attempt::Found(toolchain),
                Ok(output) => Attempt::Miss(format!(
                    "'{}' cannot build a {} program: {}",
                    compiler,
                    language,
                    output.stderr.trim()
                )),
                Err(ProbeFault::Spawn { source, .. }) => {
                    Attempt::Miss(format!("'{}' could not be executed: {}", compiler, source))
                }
                Err(fault) => Attempt::Fatal(fault.into()),
            }
        })?;

        match result.found {
            Some(toolchain) => {
                info!("{} compiler: {}", language, toolchain.compiler);
                self.record(language, &toolchain);
                Ok(())
            }
            None => self.not_found(options, language, &result.misses),
        }
    }

    fn record(&mut self, language: Language, toolchain: &LanguageConfig) {
        toolchain.record(language, &mut self.facts);
        self.facts
            .add_make_macro(language.compiler_var(), &toolchain.compiler);
        self.facts
            .add_make_macro(language.flags_var(), toolchain.flags.join(" "));
        match language {
            Language::Cxx => self.facts.add_define("HAVE_CXX", 1),
            Language::Fortran => self.facts.add_define("HAVE_FORTRAN", 1),
            Language::C | Language::Cuda => {}
        }
    }

    fn not_found(
        &self,
        options: &Options,
        language: Language,
        misses: &[String],
    ) -> Result<(), ModuleError> {
        let tried = misses.join("\n  ");
        match request_for(options, language) {
            Request::Explicit(command) => Err(ModuleError::unsatisfied_with(
                format!("The {} compiler '{}' does not work", language, command),
                format!(
                    "{}\nCheck the command or pick another one with --{}=<compiler>",
                    tried,
                    language.option_name()
                ),
            )),
            _ if language == Language::C => Err(ModuleError::unsatisfied_with(
                "Could not find a working C compiler",
                format!(
                    "Tried:\n  {}\nSpecify one with --{}=<compiler>",
                    tried,
                    language.option_name()
                ),
            )),
            _ => {
                debug!("No {} compiler found:\n  {}", language, tried);
                info!("No {} compiler found; continuing without it", language);
                Ok(())
            }
        }
    }
}

impl ConfigModule for SetCompilers {
    fn name(&self) -> &str {
        NAME
    }

    fn setup_help(&self, help: &mut OptionRegistry) {
        for language in DETECTED {
            help.add(
                SECTION,
                language.option_name(),
                None,
                &format!("The {} compiler command, or 0 to disable {}", language, language),
            );
            help.add(
                SECTION,
                language.flags_var(),
                None,
                &format!("Flags passed to the {} compiler", language),
            );
        }
        help.add(SECTION, LINKER_FLAGS_OPTION, None, "Flags passed to the linker");
        help.add(SECTION, LIBS_OPTION, None, "Libraries appended to every link line");
    }

    fn run_probes(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError> {
        ctx.execute_test("checkCCompiler", || self.detect(ctx, Language::C))?;
        ctx.execute_test("checkCxxCompiler", || self.detect(ctx, Language::Cxx))?;
        ctx.execute_test("checkFortranCompiler", || {
            self.detect(ctx, Language::Fortran)
        })?;
        Ok(())
    }

    fn facts(&self) -> &Facts {
        &self.facts
    }

    fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }

    fn fingerprint_inputs(&self, options: &Options) -> Vec<(String, String)> {
        let mut keys: Vec<&str> = Vec::new();
        for language in DETECTED {
            keys.push(language.option_name());
            keys.push(language.flags_var());
        }
        keys.push(LINKER_FLAGS_OPTION);
        keys.push(LIBS_OPTION);
        keys.into_iter()
            .map(|k| (k.to_string(), options.get(k).unwrap_or_default().to_string()))
            .collect()
    }

    fn summary(&self) -> Option<String> {
        let found: Vec<String> = DETECTED
            .iter()
            .filter_map(|&language| {
                self.facts
                    .substitution(language.compiler_var())
                    .map(|compiler| format!("  {}: {}", language, compiler))
            })
            .collect();
        if found.is_empty() {
            return None;
        }
        Some(format!("Compilers:\n{}", found.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::framework::FrameworkError;
    use crate::core::probe::{ProbeOutput, ProbeRequest};
    use crate::core::testing::ScriptedExecutor;
    use crate::modules::test_support::configure;

    fn not_installed(request: &ProbeRequest) -> ProbeFault {
        ProbeFault::Spawn {
            command: request.toolchain.compiler.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        }
    }

    /// Only the listed commands exist.
    fn installed(commands: &'static [&'static str]) -> ScriptedExecutor {
        ScriptedExecutor::new(move |_, request| {
            if commands.contains(&request.toolchain.compiler.as_str()) {
                Ok(ProbeOutput::passed())
            } else {
                Err(not_installed(request))
            }
        })
    }

    #[test]
    fn test_default_candidates_are_searched_in_order() {
        let executor = installed(&["gcc", "g++"]);
        let (framework, _) = configure(&[NAME], Options::new(), &executor).unwrap();
        let facts = framework.facts(NAME).unwrap();

        assert_eq!(facts.substitution("CC"), Some("gcc"));
        assert_eq!(facts.substitution("CXX"), Some("g++"));
        assert_eq!(facts.substitution("FC"), None);
        assert_eq!(facts.make_macros.get("CC").map(String::as_str), Some("gcc"));
        assert!(facts.has_define("HAVE_CXX"));
        assert!(!facts.has_define("HAVE_FORTRAN"));

        let tried: Vec<String> = executor
            .requests()
            .into_iter()
            .filter(|(_, r)| r.language == Language::C)
            .map(|(_, r)| r.toolchain.compiler)
            .collect();
        assert_eq!(tried, vec!["cc", "gcc"]);

        let summary = framework.print_summary();
        assert!(summary.contains("C: gcc"));
        assert!(summary.contains("C++: g++"));
    }

    #[test]
    fn test_flags_options_reach_the_toolchain() {
        let executor = installed(&["cc"]);
        let mut options = Options::new();
        options.set("CFLAGS", "-O2  -g");
        options.set("with-cxx", "0");
        options.set("with-fc", "0");
        let (framework, _) = configure(&[NAME], options, &executor).unwrap();

        let facts = framework.facts(NAME).unwrap();
        let toolchain = LanguageConfig::from_facts(Language::C, facts).unwrap();
        assert_eq!(toolchain.flags, vec!["-O2", "-g"]);
        // Disabled languages are never probed.
        assert!(executor
            .requests()
            .iter()
            .all(|(_, r)| r.language == Language::C));
    }

    #[test]
    fn test_missing_c_compiler_is_unsatisfied() {
        let executor = installed(&[]);
        let err = configure(&[NAME], Options::new(), &executor).unwrap_err();
        match err {
            FrameworkError::ModuleFailed { module, test, source } => {
                assert_eq!(module, NAME);
                assert_eq!(test.as_deref(), Some("checkCCompiler"));
                assert!(matches!(
                    source,
                    ModuleError::Unsatisfied { remediation: Some(ref r), .. } if r.contains("--with-cc")
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_broken_explicit_compiler_is_not_replaced() {
        let executor = ScriptedExecutor::new(|_, request| match request.toolchain.compiler.as_str() {
            "mycc" => Ok(ProbeOutput::failed("mycc: unknown option")),
            _ => Ok(ProbeOutput::passed()),
        });
        let mut options = Options::new();
        options.set("with-cc", "mycc");
        let err = configure(&[NAME], options, &executor).unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::ModuleFailed { source: ModuleError::Unsatisfied { ref requirement, .. }, .. }
                if requirement.contains("mycc")
        ));
        assert_eq!(executor.requests().len(), 1);
    }

    #[test]
    fn test_disabling_the_c_compiler_is_an_invalid_option() {
        let executor = installed(&["cc"]);
        let mut options = Options::new();
        options.set("with-cc", "0");
        let err = configure(&[NAME], options, &executor).unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::ModuleFailed { source: ModuleError::InvalidOption { .. }, .. }
        ));
    }

    #[test]
    fn test_crashing_compiler_aborts_the_search() {
        let executor = ScriptedExecutor::new(|_, request| {
            Err(ProbeFault::Crashed {
                command: request.toolchain.compiler.clone(),
                stdout: String::new(),
                stderr: "segmentation fault".to_string(),
            })
        });
        let err = configure(&[NAME], Options::new(), &executor).unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::ModuleFailed { source: ModuleError::Probe(ProbeFault::Crashed { .. }), .. }
        ));
        assert_eq!(executor.requests().len(), 1);
    }
}
