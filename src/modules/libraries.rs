// src/modules/libraries.rs

//! `config.libraries`: checks libraries for symbols and builds the `LIBS`
//! link line.
//!
//! Every library found is defined as `HAVE_LIB<NAME>` and placed in front of
//! the libraries already on the link line, since a new library may depend on
//! the system ones. Modules that depend on this one and extend the link line
//! re-record `LIBS`; the last module in dependency order wins.

use crate::core::framework::FrameworkError;
use crate::core::module::{ConfigModule, Dependencies, ModuleError, ModuleId, ProbeContext};
use crate::core::options::{OptionRegistry, Options};
use crate::models::{Facts, Language, LanguageConfig};
use crate::modules::{declared, define_name, headers, set_compilers};
use log::{info, warn};
use std::fmt::Write;
use std::path::Path;

pub const NAME: &str = "config.libraries";

/// Substitution holding the complete link line.
pub const LIBS_SUBSTITUTION: &str = "LIBS";

const SECTION: &str = "Libraries";
const LIBRARIES_OPTION: &str = "with-libraries";
const DYNAMIC_LOADING_OPTION: &str = "with-dynamic-loading";

pub fn create() -> Box<dyn ConfigModule> {
    Box::new(Libraries::default())
}

// --- LINK LINE HELPERS ---

/// The name a library is known by: `/opt/lib/libfoo.so` -> `foo`.
pub fn lib_name(library: &str) -> String {
    let path = Path::new(library);
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if base.starts_with("lib") {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        return stem.strip_prefix("lib").unwrap_or(&stem).to_string();
    }
    library.to_string()
}

/// The short name of a link argument: `-lfoo`, `libfoo.a` and `foo` all give
/// `foo`; other flags give an empty string.
pub fn short_lib_name(lib: &str) -> String {
    if let Some(name) = lib.strip_prefix("-l") {
        return name.to_string();
    }
    if lib.starts_with('-') {
        return String::new();
    }
    if [".a", ".so", ".lib"].iter().any(|ext| lib.ends_with(ext)) {
        return lib_name(lib);
    }
    lib.to_string()
}

/// `HAVE_LIB<NAME>` for a library (`quadmath` -> `HAVE_LIBQUADMATH`).
pub fn library_define(library: &str) -> String {
    define_name("HAVE_LIB", &lib_name(library))
}

/// Linker arguments for one library.
///
/// Flags and `.lib`/`.so` files pass through unchanged. `lib<name>` files
/// become `-l<name>`, with a `-L<dir>` when given as an absolute path. Any
/// other absolute path passes through; a bare name becomes `-l<name>`.
pub fn lib_argument_list(library: &str) -> Vec<String> {
    let trimmed = library.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('-') || trimmed.ends_with(".lib") {
        return vec![trimmed.to_string()];
    }
    let path = Path::new(trimmed);
    let is_lib_file = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with("lib"));
    if is_lib_file {
        let name = lib_name(trimmed);
        return match path.parent().filter(|_| path.is_absolute()) {
            Some(dir) => vec![format!("-L{}", dir.display()), format!("-l{}", name)],
            None => vec![format!("-l{}", name)],
        };
    }
    if path.extension().is_some_and(|ext| ext == "so") || path.is_absolute() {
        return vec![trimmed.to_string()];
    }
    vec![format!("-l{}", trimmed)]
}

/// Linker arguments for a list of libraries. `-framework <name>` pairs are
/// kept together.
pub fn to_link_line<S: AsRef<str>>(libraries: &[S]) -> Vec<String> {
    let mut args = Vec::new();
    let mut framework_name = false;
    for lib in libraries {
        let lib = lib.as_ref();
        if framework_name {
            args.push(lib.to_string());
            framework_name = false;
        } else if lib == "-framework" {
            args.push(lib.to_string());
            framework_name = true;
        } else {
            args.extend(lib_argument_list(lib));
        }
    }
    args
}

/// `toolchain` with its libraries replaced by the `LIBS` recorded in `facts`.
pub fn linking_toolchain(mut toolchain: LanguageConfig, facts: &Facts) -> LanguageConfig {
    if let Some(libs) = facts.substitution(LIBS_SUBSTITUTION) {
        toolchain.libs = libs.split_whitespace().map(str::to_string).collect();
    }
    toolchain
}

// --- LIBRARY CHECKS ---

/// A function to look for, with an optional prototype and call.
#[derive(Debug, Clone, Default)]
pub struct LibraryFunction {
    pub name: String,
    /// Declarations placed before the call; defaults to `char <name>();`.
    pub prototype: Option<String>,
    /// The statements exercising the function; defaults to `<name>();`.
    pub call: Option<String>,
}

/// Links a program calling `functions` against `libraries`.
#[derive(Debug, Clone, Default)]
pub struct LibraryCheck {
    pub libraries: Vec<String>,
    pub functions: Vec<LibraryFunction>,
    /// Libraries the checked ones need, placed after them.
    pub other_libs: Vec<String>,
}

impl LibraryCheck {
    /// No libraries means checking what the toolchain links by default.
    pub fn new(libraries: &[&str]) -> Self {
        Self {
            libraries: libraries.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn function(mut self, name: &str) -> Self {
        self.functions.push(LibraryFunction {
            name: name.to_string(),
            ..Default::default()
        });
        self
    }

    pub fn function_with(mut self, name: &str, prototype: &str, call: &str) -> Self {
        self.functions.push(LibraryFunction {
            name: name.to_string(),
            prototype: Some(prototype.to_string()),
            call: Some(call.to_string()),
        });
        self
    }

    pub fn other_lib(mut self, lib: &str) -> Self {
        self.other_libs.push(lib.to_string());
        self
    }

    /// Prototypes, each call wrapped in its own static function so local
    /// variables of different calls cannot clash.
    fn includes(&self) -> String {
        let mut includes = String::from("/* Override any gcc2 internal prototype to avoid an error. */\n");
        for function in &self.functions {
            match &function.prototype {
                Some(prototype) => includes.push_str(prototype),
                None => {
                    let _ = write!(includes, "char {}();", function.name);
                }
            }
            let call = function
                .call
                .clone()
                .unwrap_or_else(|| format!("{}();", function.name));
            let _ = writeln!(
                includes,
                "\nstatic void _check_{}(void) {{ {} }}",
                function.name, call
            );
        }
        includes
    }

    fn body(&self) -> String {
        self.functions
            .iter()
            .map(|f| format!("  _check_{}();", f.name))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn link_args(&self) -> Vec<String> {
        let mut libs = self.libraries.clone();
        libs.extend(self.other_libs.iter().cloned());
        to_link_line(&libs)
    }
}

/// Runs `check` with `toolchain`. The checked libraries are placed before the
/// toolchain's own libraries.
pub fn check_library(
    ctx: &ProbeContext<'_>,
    toolchain: &LanguageConfig,
    check: &LibraryCheck,
) -> Result<bool, ModuleError> {
    let names: Vec<&str> = check.functions.iter().map(|f| f.name.as_str()).collect();
    log::debug!(
        "Checking for functions [{}] in library {:?} {:?}",
        names.join(" "),
        check.libraries,
        check.other_libs
    );
    let mut request = ctx.request(Language::C, toolchain, &check.includes(), &check.body());
    request.extra_libs = check.link_args();
    ctx.check_link(&request)
}

// --- THE MODULE ---

#[derive(Debug, Default)]
pub struct Libraries {
    facts: Facts,
    compilers: Option<ModuleId>,
    /// Link arguments of every library added, most recent first.
    libs: Vec<String>,
    math: Option<Vec<String>>,
}

/// A `--with-libraries` entry: `name` or `name:function`.
fn parse_requested(entry: &str) -> (String, Option<String>) {
    match entry.split_once(':') {
        Some((lib, function)) if !function.trim().is_empty() => {
            (lib.trim().to_string(), Some(function.trim().to_string()))
        }
        Some((lib, _)) => (lib.trim().to_string(), None),
        None => (entry.trim().to_string(), None),
    }
}

impl Libraries {
    /// The toolchain with every library added so far on its link line.
    fn current_toolchain(&self, base: &LanguageConfig) -> LanguageConfig {
        let mut toolchain = base.clone();
        let mut libs = self.libs.clone();
        libs.extend(base.libs.iter().cloned());
        toolchain.libs = libs;
        toolchain
    }

    /// Checks `check`; on success defines `HAVE_LIB<NAME>` for each library
    /// and returns `true`.
    fn check(
        &mut self,
        ctx: &ProbeContext<'_>,
        base: &LanguageConfig,
        check: &LibraryCheck,
    ) -> Result<bool, ModuleError> {
        let found = check_library(ctx, &self.current_toolchain(base), check)?;
        if found {
            for lib in &check.libraries {
                let short = short_lib_name(lib);
                if !short.is_empty() {
                    self.facts.add_define(library_define(&short), 1);
                }
            }
        }
        Ok(found)
    }

    /// `check`, and puts the libraries on the link line when found.
    fn add(
        &mut self,
        ctx: &ProbeContext<'_>,
        base: &LanguageConfig,
        check: &LibraryCheck,
    ) -> Result<bool, ModuleError> {
        if !self.check(ctx, base, check)? {
            return Ok(false);
        }
        let mut args = to_link_line(&check.libraries);
        args.retain(|arg| !self.libs.contains(arg));
        if !args.is_empty() {
            info!("Adding {} to LIBS", args.join(" "));
            args.extend(std::mem::take(&mut self.libs));
            self.libs = args;
        }
        Ok(true)
    }

    fn check_requested(&mut self, ctx: &ProbeContext<'_>, base: &LanguageConfig) -> Result<(), ModuleError> {
        for entry in ctx.options().get_list(LIBRARIES_OPTION) {
            let (lib, function) = parse_requested(&entry);
            let mut check = LibraryCheck::new(&[lib.as_str()]);
            if let Some(function) = &function {
                check = check.function(function);
            }
            if !self.add(ctx, base, &check)? {
                let what = match &function {
                    Some(function) => format!("Library '{}' does not provide {}()", lib, function),
                    None => format!("Library '{}' cannot be linked", lib),
                };
                return Err(ModuleError::unsatisfied_with(
                    what,
                    format!("Check the name or remove it from --{}", LIBRARIES_OPTION),
                ));
            }
        }
        Ok(())
    }

    fn check_math(&mut self, ctx: &ProbeContext<'_>, base: &LanguageConfig) -> Result<(), ModuleError> {
        let functions = |libs: &[&str]| {
            LibraryCheck::new(libs)
                .function_with("sin", "double sin(double);", "double x = 0,y; y = sin(x);")
                .function_with("floor", "double floor(double);", "double x = 0,y; y = floor(x);")
                .function_with("log10", "double log10(double);", "double x = 0,y; y = log10(x);")
                .function_with("pow", "double pow(double, double);", "double x = 0,y; y = pow(x, x);")
        };
        if self.check(ctx, base, &functions(&[]))? {
            info!("Math functions are linked in by default");
            self.math = Some(Vec::new());
        } else if self.add(ctx, base, &functions(&["m"]))? {
            info!("Using libm for the math library");
            self.math = Some(vec!["m".to_string()]);
        } else {
            warn!("No math library found");
        }
        Ok(())
    }

    fn check_math_erf(&mut self, ctx: &ProbeContext<'_>, base: &LanguageConfig) -> Result<(), ModuleError> {
        let Some(math) = self.math.clone() else {
            return Ok(());
        };
        let libs: Vec<&str> = math.iter().map(String::as_str).collect();
        let check = LibraryCheck::new(&libs).function_with(
            "erf",
            "double erf(double);",
            "double x = 0,y; y = erf(x);",
        );
        if self.check(ctx, base, &check)? {
            self.facts.add_define("HAVE_ERF", 1);
        } else {
            info!("erf() not found");
        }
        Ok(())
    }

    fn check_realtime(&mut self, ctx: &ProbeContext<'_>, base: &LanguageConfig) -> Result<(), ModuleError> {
        let clock = |libs: &[&str]| {
            LibraryCheck::new(libs).function_with(
                "clock_gettime",
                "#include <time.h>",
                "struct timespec tp; clock_gettime(CLOCK_REALTIME,&tp);",
            )
        };
        if self.check(ctx, base, &clock(&[]))? {
            info!("Realtime functions are linked in by default");
        } else if self.add(ctx, base, &clock(&["rt"]))? {
            info!("Using librt for the realtime library");
        } else {
            info!("No realtime library found");
        }
        Ok(())
    }

    fn check_dynamic(&mut self, ctx: &ProbeContext<'_>, base: &LanguageConfig) -> Result<(), ModuleError> {
        if ctx.options().get_bool(DYNAMIC_LOADING_OPTION)? == Some(false) {
            return Ok(());
        }
        self.add(ctx, base, &LibraryCheck::new(&["dl"]).function("dlopen"))?;
        Ok(())
    }
}

impl ConfigModule for Libraries {
    fn name(&self) -> &str {
        NAME
    }

    fn setup_help(&self, help: &mut OptionRegistry) {
        help.add(
            SECTION,
            LIBRARIES_OPTION,
            None,
            "Libraries that must link, as [name,name:function,...]",
        );
        help.add(
            SECTION,
            DYNAMIC_LOADING_OPTION,
            None,
            "Look for the dynamic loading library (0 to skip)",
        );
    }

    fn declare_dependencies(&mut self, deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        self.compilers = Some(deps.require(set_compilers::NAME)?);
        deps.require(headers::NAME)?;
        Ok(())
    }

    fn run_probes(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError> {
        let compilers = declared(self.compilers, set_compilers::NAME)?;
        let base = ctx.toolchain(compilers, Language::C)?;

        ctx.execute_test("checkRequested", || self.check_requested(ctx, &base))?;
        ctx.execute_test("checkMath", || self.check_math(ctx, &base))?;
        ctx.execute_test("checkMathErf", || self.check_math_erf(ctx, &base))?;
        ctx.execute_test("checkRealtime", || self.check_realtime(ctx, &base))?;
        ctx.execute_test("checkDynamic", || self.check_dynamic(ctx, &base))?;

        let link_line = self.current_toolchain(&base).libs.join(" ");
        self.facts.add_substitution(LIBS_SUBSTITUTION, &link_line);
        self.facts.add_make_macro(LIBS_SUBSTITUTION, &link_line);
        Ok(())
    }

    fn facts(&self) -> &Facts {
        &self.facts
    }

    fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }

    fn fingerprint_inputs(&self, options: &Options) -> Vec<(String, String)> {
        [LIBRARIES_OPTION, DYNAMIC_LOADING_OPTION]
            .iter()
            .map(|k| (k.to_string(), options.get(k).unwrap_or_default().to_string()))
            .collect()
    }

    fn summary(&self) -> Option<String> {
        self.facts
            .substitution(LIBS_SUBSTITUTION)
            .filter(|libs| !libs.trim().is_empty())
            .map(|libs| format!("Libraries: {}", libs))
    }
}
