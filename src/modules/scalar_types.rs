// src/modules/scalar_types.rs

//! `PETSc.options.scalarTypes`: the scalar type (real or complex) and the
//! floating point precision.

use crate::core::framework::FrameworkError;
use crate::core::module::{ConfigModule, Dependencies, ModuleError, ModuleId, ProbeContext};
use crate::core::options::{OptionRegistry, Options};
use crate::models::{Facts, Language, LanguageConfig};
use crate::modules::libraries::{self, LIBS_SUBSTITUTION, LibraryCheck};
use crate::modules::{declared, set_compilers};
use log::info;
use std::fmt;

pub const NAME: &str = "PETSc.options.scalarTypes";

const SECTION: &str = "PETSc";
const SCALAR_TYPE_OPTION: &str = "with-scalar-type";
const PRECISION_OPTION: &str = "with-precision";
const SCALAR_SIZE_MACRO: &str = "PETSC_SCALAR_SIZE";

pub fn create() -> Box<dyn ConfigModule> {
    Box::new(ScalarTypes::default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Real,
    Complex,
}

impl ScalarType {
    const ALL: [Self; 2] = [Self::Real, Self::Complex];

    fn parse(raw: &str) -> Result<Self, ModuleError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "real" => Ok(Self::Real),
            "complex" => Ok(Self::Complex),
            other => Err(ModuleError::invalid_option(
                SCALAR_TYPE_OPTION,
                format!("must be real or complex, not '{}'", other),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Complex => "complex",
        }
    }

    /// `USE_SCALAR_REAL` / `USE_SCALAR_COMPLEX`.
    pub fn define(self) -> String {
        format!("USE_SCALAR_{}", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
    Float128,
}

impl Precision {
    const ALL: [Self; 3] = [Self::Single, Self::Double, Self::Float128];

    fn parse(raw: &str) -> Result<Self, ModuleError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "double" => Ok(Self::Double),
            "__float128" => Ok(Self::Float128),
            other => Err(ModuleError::invalid_option(
                PRECISION_OPTION,
                format!("must be single, double or __float128, not '{}'", other),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
            Self::Float128 => "__float128",
        }
    }

    /// `USE_REAL_SINGLE`, `USE_REAL_DOUBLE` or `USE_REAL___FLOAT128`.
    pub fn define(self) -> String {
        format!("USE_REAL_{}", self.as_str().to_ascii_uppercase())
    }

    /// Bits per real number.
    pub fn bits(self) -> u32 {
        match self {
            Self::Single => 32,
            Self::Double => 64,
            Self::Float128 => 128,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification functions recorded as `HAVE_<NAME>`: (header, function).
const CLASSIFIERS: &[(&str, &str)] = &[
    ("math.h", "isnormal"),
    ("math.h", "isnan"),
    ("math.h", "isinf"),
    ("float.h", "_isnan"),
    ("float.h", "_finite"),
];

#[derive(Debug, Default)]
pub struct ScalarTypes {
    facts: Facts,
    compilers: Option<ModuleId>,
    libraries: Option<ModuleId>,
}

impl ScalarTypes {
    fn configure_scalar_type(
        &mut self,
        ctx: &ProbeContext<'_>,
        toolchain: &LanguageConfig,
    ) -> Result<(), ModuleError> {
        let scalar_type = ScalarType::parse(ctx.options().get(SCALAR_TYPE_OPTION).unwrap_or("real"))?;
        if scalar_type == ScalarType::Complex {
            self.facts.add_define("USE_COMPLEX", 1);
            let request = ctx.request(
                Language::C,
                toolchain,
                "#include <complex.h>\n",
                "  double _Complex x = 1.0;\n  (void)x;",
            );
            if !ctx.check_compile(&request)? {
                return Err(ModuleError::unsatisfied_with(
                    "C compiler provided does not support C99 complex",
                    format!("Use a C99 compiler or --{}=real", SCALAR_TYPE_OPTION),
                ));
            }
        }
        self.facts.add_define(scalar_type.define(), 1);
        info!("Scalar type is {}", scalar_type);

        for (header, function) in CLASSIFIERS {
            let request = ctx.request(
                Language::C,
                toolchain,
                &format!("#include <{}>\n", header),
                &format!("  double b = 2.0;\n  int a = {}(b);\n  (void)a;", function),
            );
            if ctx.check_link(&request)? {
                self.facts
                    .add_define(format!("HAVE_{}", function.to_ascii_uppercase()), 1);
            }
        }
        Ok(())
    }

    fn configure_precision(
        &mut self,
        ctx: &ProbeContext<'_>,
        toolchain: &LanguageConfig,
        link_line: &str,
    ) -> Result<(), ModuleError> {
        let precision = Precision::parse(ctx.options().get(PRECISION_OPTION).unwrap_or("double"))?;
        match precision {
            Precision::Single | Precision::Double => {}
            Precision::Float128 => {
                let check = LibraryCheck::new(&["quadmath"]).function_with(
                    "logq",
                    "#include <quadmath.h>",
                    "__float128 f = 1; logq(f);",
                );
                if !libraries::check_library(ctx, toolchain, &check)? {
                    return Err(ModuleError::unsatisfied_with(
                        "quadmath support not found",
                        format!(
                            "--{}=__float128 works with gcc-4.6 and newer compilers",
                            PRECISION_OPTION
                        ),
                    ));
                }
                self.facts.add_define(libraries::library_define("quadmath"), 1);
                let mut libs = libraries::to_link_line(&["quadmath"]);
                libs.extend(link_line.split_whitespace().map(str::to_string));
                self.facts.add_substitution(LIBS_SUBSTITUTION, libs.join(" "));
                self.facts.add_make_macro(LIBS_SUBSTITUTION, libs.join(" "));
            }
        }
        self.facts.add_define(precision.define(), 1);
        self.facts
            .add_make_macro(SCALAR_SIZE_MACRO, precision.bits());
        info!("Precision is {}", precision);
        Ok(())
    }
}

impl ConfigModule for ScalarTypes {
    fn name(&self) -> &str {
        NAME
    }

    fn setup_help(&self, help: &mut OptionRegistry) {
        help.add(
            SECTION,
            PRECISION_OPTION,
            Some("double"),
            "Specify numerical precision: single, double or __float128",
        );
        help.add(
            SECTION,
            SCALAR_TYPE_OPTION,
            Some("real"),
            "Specify real or complex numbers",
        );
    }

    fn declare_dependencies(&mut self, deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        self.compilers = Some(deps.require(set_compilers::NAME)?);
        self.libraries = Some(deps.require(libraries::NAME)?);
        Ok(())
    }

    fn run_probes(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError> {
        let compilers = declared(self.compilers, set_compilers::NAME)?;
        let libraries_id = declared(self.libraries, libraries::NAME)?;
        let library_facts = ctx.facts_of(libraries_id)?;
        let toolchain = libraries::linking_toolchain(
            ctx.toolchain(compilers, Language::C)?,
            &library_facts,
        );
        let link_line = library_facts
            .substitution(LIBS_SUBSTITUTION)
            .unwrap_or_default()
            .to_string();

        ctx.execute_test("configureScalarType", || {
            self.configure_scalar_type(ctx, &toolchain)
        })?;
        ctx.execute_test("configurePrecision", || {
            self.configure_precision(ctx, &toolchain, &link_line)
        })
    }

    fn facts(&self) -> &Facts {
        &self.facts
    }

    fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }

    fn fingerprint_inputs(&self, options: &Options) -> Vec<(String, String)> {
        [SCALAR_TYPE_OPTION, PRECISION_OPTION]
            .iter()
            .map(|k| (k.to_string(), options.get(k).unwrap_or_default().to_string()))
            .collect()
    }

    fn summary(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Some(scalar_type) = ScalarType::ALL
            .into_iter()
            .find(|t| self.facts.has_define(&t.define()))
        {
            lines.push(format!("  Scalar type: {}", scalar_type));
        }
        if let Some(precision) = Precision::ALL
            .into_iter()
            .find(|p| self.facts.has_define(&p.define()))
        {
            lines.push(format!("  Precision: {}", precision));
        }
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}
