// src/modules/headers.rs

//! `config.headers`: defines `HAVE_<HEADER>` for every header that compiles.

use crate::core::framework::FrameworkError;
use crate::core::module::{ConfigModule, Dependencies, ModuleError, ModuleId, ProbeContext};
use crate::core::options::{OptionRegistry, Options};
use crate::models::{Facts, Language, LanguageConfig};
use crate::modules::{declared, define_name, set_compilers};
use log::debug;

pub const NAME: &str = "config.headers";

const HEADERS_OPTION: &str = "with-headers";

/// Headers checked on every run.
const DEFAULT_HEADERS: &[&str] = &[
    "stdlib.h",
    "string.h",
    "strings.h",
    "unistd.h",
    "sys/time.h",
    "sys/types.h",
    "sys/stat.h",
    "math.h",
    "float.h",
    "time.h",
    "fcntl.h",
    "dlfcn.h",
];

const STDC_INCLUDES: &str = "#include <stdlib.h>\n#include <stdarg.h>\n#include <string.h>\n#include <float.h>\n";

pub fn create() -> Box<dyn ConfigModule> {
    Box::new(Headers::default())
}

#[derive(Debug, Default)]
pub struct Headers {
    facts: Facts,
    compilers: Option<ModuleId>,
}

/// The define recorded for `header` (`sys/time.h` -> `HAVE_SYS_TIME_H`).
pub fn header_define(header: &str) -> String {
    define_name("HAVE_", header)
}

fn requested_headers(options: &Options) -> Vec<String> {
    let mut headers: Vec<String> = DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect();
    for extra in options.get_list(HEADERS_OPTION) {
        if !headers.contains(&extra) {
            headers.push(extra);
        }
    }
    headers
}

impl Headers {
    fn check(
        &mut self,
        ctx: &ProbeContext<'_>,
        toolchain: &LanguageConfig,
        header: &str,
    ) -> Result<bool, ModuleError> {
        let request = ctx.request(
            Language::C,
            toolchain,
            &format!("#include <{}>\n", header),
            "",
        );
        let found = ctx.check_compile(&request)?;
        if found {
            self.facts.add_define(header_define(header), 1);
        } else {
            debug!("Header <{}> not found", header);
        }
        Ok(found)
    }

    fn check_stdc(&mut self, ctx: &ProbeContext<'_>, toolchain: &LanguageConfig) -> Result<(), ModuleError> {
        let request = ctx.request(Language::C, toolchain, STDC_INCLUDES, "");
        if ctx.check_compile(&request)? {
            self.facts.add_define("STDC_HEADERS", 1);
        }
        Ok(())
    }
}

impl ConfigModule for Headers {
    fn name(&self) -> &str {
        NAME
    }

    fn setup_help(&self, help: &mut OptionRegistry) {
        help.add(
            "Headers",
            HEADERS_OPTION,
            None,
            "Additional headers to check for, as [a.h,b.h]",
        );
    }

    fn declare_dependencies(&mut self, deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        self.compilers = Some(deps.require(set_compilers::NAME)?);
        Ok(())
    }

    fn run_probes(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError> {
        let compilers = declared(self.compilers, set_compilers::NAME)?;
        let toolchain = ctx.toolchain(compilers, Language::C)?;
        ctx.execute_test("checkStdC", || self.check_stdc(ctx, &toolchain))?;
        ctx.execute_test("checkHeaders", || {
            for header in requested_headers(ctx.options()) {
                self.check(ctx, &toolchain, &header)?;
            }
            Ok(())
        })
    }

    fn facts(&self) -> &Facts {
        &self.facts
    }

    fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }

    fn fingerprint_inputs(&self, options: &Options) -> Vec<(String, String)> {
        vec![(
            HEADERS_OPTION.to_string(),
            options.get(HEADERS_OPTION).unwrap_or_default().to_string(),
        )]
    }
}
