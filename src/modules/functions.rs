// src/modules/functions.rs

//! `config.functions`: defines `HAVE_<FUNC>` for every function that links,
//! and makes sure `memcmp()` is 8-bit clean.

use crate::core::batch::BatchFragment;
use crate::core::framework::FrameworkError;
use crate::core::module::{ConfigModule, Dependencies, ModuleError, ModuleId, ProbeContext};
use crate::core::options::{OptionRegistry, Options};
use crate::models::{Facts, Language, LanguageConfig};
use crate::modules::{declared, define_name, headers, libraries, set_compilers};
use log::{debug, info};

pub const NAME: &str = "config.functions";

const SECTION: &str = "Functions";
const FUNCTIONS_OPTION: &str = "with-functions";
const KNOWN_MEMCMP_OPTION: &str = "known-memcmp-ok";

/// Functions checked on every run.
const DEFAULT_FUNCTIONS: &[&str] = &[
    "gettimeofday",
    "getpagesize",
    "getcwd",
    "realpath",
    "sleep",
    "usleep",
    "strcasecmp",
    "snprintf",
    "popen",
    "sysconf",
];

/// `assert.h` only, so the `__stub_` macros of glibc are visible without
/// pulling in prototypes that would clash with `char <func>();`.
const STUB_INCLUDES: &str = "/* System header to define __stub macros and hopefully no other prototypes. */
#include <assert.h>
/* Override any gcc2 internal prototype to avoid an error. */
#ifdef __cplusplus
extern \"C\" {
#endif
";

const MEMCMP_INCLUDES: &str = "#include <string.h>\n";

const MEMCMP_BODY: &str = "  char c0 = 0x40;
  char c1 = (char) 0x80;
  char c2 = (char) 0x81;
  return (memcmp(&c0, &c2, 1) < 0 && memcmp(&c1, &c2, 1) < 0) ? 0 : 1;";

const MEMCMP_BATCH_BODY: &str = r#"    char c0 = 0x40;
    char c1 = (char) 0x80;
    char c2 = (char) 0x81;
    if (memcmp(&c0, &c2, 1) < 0 && memcmp(&c1, &c2, 1) < 0) {
      fprintf(output, "\"known-memcmp-ok\" = \"1\"\n");
    } else {
      fprintf(output, "\"known-memcmp-ok\" = \"0\"\n");
    }"#;

pub fn create() -> Box<dyn ConfigModule> {
    Box::new(Functions::default())
}

#[derive(Debug, Default)]
pub struct Functions {
    facts: Facts,
    compilers: Option<ModuleId>,
    libraries: Option<ModuleId>,
}

/// The define recorded for `function` (`memcmp` -> `HAVE_MEMCMP`).
pub fn function_define(function: &str) -> String {
    define_name("HAVE_", function)
}

fn function_includes(function: &str) -> String {
    format!(
        "{}char {}();\n#ifdef __cplusplus\n}}\n#endif\n",
        STUB_INCLUDES, function
    )
}

/// Calls the function unless glibc marks it as a stub failing with ENOSYS.
fn function_body(function: &str) -> String {
    format!(
        "#if defined (__stub_{f}) || defined (__stub___{f})\n{f}_will_always_fail_with_ENOSYS();\n#else\n{f}();\n#endif\n",
        f = function
    )
}

fn requested_functions(options: &Options) -> Vec<String> {
    let mut functions: Vec<String> = DEFAULT_FUNCTIONS.iter().map(|f| f.to_string()).collect();
    for extra in options.get_list(FUNCTIONS_OPTION) {
        if !functions.contains(&extra) {
            functions.push(extra);
        }
    }
    functions
}

impl Functions {
    fn check(
        &mut self,
        ctx: &ProbeContext<'_>,
        toolchain: &LanguageConfig,
        function: &str,
    ) -> Result<bool, ModuleError> {
        let request = ctx.request(
            Language::C,
            toolchain,
            &function_includes(function),
            &function_body(function),
        );
        let found = ctx.check_link(&request)?;
        if found {
            self.facts.add_define(function_define(function), 1);
        } else {
            debug!("Function {}() not found", function);
        }
        Ok(found)
    }

    fn check_memcmp(&mut self, ctx: &ProbeContext<'_>, toolchain: &LanguageConfig) -> Result<(), ModuleError> {
        match ctx.options().get_bool(KNOWN_MEMCMP_OPTION)? {
            Some(false) => Err(ModuleError::unsatisfied(
                "No 8-bit clean memcmp() exists. Cannot proceed.",
            )),
            Some(true) => Ok(()),
            None if ctx.batch_mode() => {
                info!("Deferring the memcmp() test to the batch program");
                ctx.add_batch(BatchFragment::new(NAME, MEMCMP_BATCH_BODY).include("#include <string.h>"));
                Ok(())
            }
            None => {
                debug!("Making executable to test memcmp()");
                let request = ctx.request(Language::C, toolchain, MEMCMP_INCLUDES, MEMCMP_BODY);
                if ctx.check_run(&request)?.success {
                    Ok(())
                } else {
                    Err(ModuleError::unsatisfied_with(
                        "Failed to find 8-bit clean memcmp(). Cannot proceed.",
                        format!(
                            "If this is a cross compiler, run with --{}=1 once memcmp() is known to work",
                            KNOWN_MEMCMP_OPTION
                        ),
                    ))
                }
            }
        }
    }
}

impl ConfigModule for Functions {
    fn name(&self) -> &str {
        NAME
    }

    fn setup_help(&self, help: &mut OptionRegistry) {
        help.add(
            SECTION,
            FUNCTIONS_OPTION,
            None,
            "Additional functions to check for, as [f,g]",
        );
        help.add(
            SECTION,
            KNOWN_MEMCMP_OPTION,
            None,
            "Does memcmp() work correctly? Skips the run test",
        );
    }

    fn declare_dependencies(&mut self, deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        self.compilers = Some(deps.require(set_compilers::NAME)?);
        self.libraries = Some(deps.require(libraries::NAME)?);
        deps.require(headers::NAME)?;
        Ok(())
    }

    fn run_probes(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError> {
        let compilers = declared(self.compilers, set_compilers::NAME)?;
        let libraries_id = declared(self.libraries, libraries::NAME)?;
        let toolchain = libraries::linking_toolchain(
            ctx.toolchain(compilers, Language::C)?,
            &*ctx.facts_of(libraries_id)?,
        );

        ctx.execute_test("checkFunctions", || {
            for function in requested_functions(ctx.options()) {
                self.check(ctx, &toolchain, &function)?;
            }
            Ok(())
        })?;
        ctx.execute_test("checkMemcmp", || self.check_memcmp(ctx, &toolchain))
    }

    fn facts(&self) -> &Facts {
        &self.facts
    }

    fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }

    fn fingerprint_inputs(&self, options: &Options) -> Vec<(String, String)> {
        [FUNCTIONS_OPTION, KNOWN_MEMCMP_OPTION]
            .iter()
            .map(|k| (k.to_string(), options.get(k).unwrap_or_default().to_string()))
            .collect()
    }
}
