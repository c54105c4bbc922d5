// src/modules/mod.rs

//! # Built-in Configuration Modules
//!
//! The modules shipped with confgraph. Each one is registered by name in
//! [`BUILTIN_MODULES`]; a run instantiates only the modules it names and
//! whatever they transitively require.
//!
//! ## Modules
//!
//! - **`set_compilers`** (`config.setCompilers`): finds a working compiler
//!   for every enabled language.
//! - **`headers`** (`config.headers`): `HAVE_<HEADER>` for each usable header.
//! - **`libraries`** (`config.libraries`): `HAVE_LIB<NAME>` and the `LIBS`
//!   link line.
//! - **`functions`** (`config.functions`): `HAVE_<FUNC>` and the 8-bit clean
//!   `memcmp` check.
//! - **`scalar_types`** (`PETSc.options.scalarTypes`): scalar type and
//!   floating point precision.

use crate::core::module::{ModuleCatalog, ModuleDefinition, ModuleError, ModuleId};

pub mod functions;
pub mod headers;
pub mod libraries;
pub mod scalar_types;
pub mod set_compilers;

/// Every module the binary knows about.
pub static BUILTIN_MODULES: &[ModuleDefinition] = &[
    ModuleDefinition {
        name: set_compilers::NAME,
        about: "Detects the C, C++ and Fortran compilers",
        factory: set_compilers::create,
    },
    ModuleDefinition {
        name: headers::NAME,
        about: "Checks for system headers",
        factory: headers::create,
    },
    ModuleDefinition {
        name: libraries::NAME,
        about: "Checks libraries and assembles the link line",
        factory: libraries::create,
    },
    ModuleDefinition {
        name: functions::NAME,
        about: "Checks for library functions",
        factory: functions::create,
    },
    ModuleDefinition {
        name: scalar_types::NAME,
        about: "Selects the scalar type and floating point precision",
        factory: scalar_types::create,
    },
];

/// A catalog holding every built-in module.
pub fn builtin_catalog() -> ModuleCatalog {
    ModuleCatalog::from_definitions(BUILTIN_MODULES)
}

/// `HAVE_` style define name: upper case, with anything that is not
/// alphanumeric replaced by `_`.
pub(crate) fn define_name(prefix: &str, name: &str) -> String {
    let mangled: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", prefix, mangled)
}

/// The id recorded by `declare_dependencies`.
pub(crate) fn declared(id: Option<ModuleId>, dependency: &str) -> Result<ModuleId, ModuleError> {
    id.ok_or_else(|| {
        ModuleError::Internal(anyhow::anyhow!(
            "dependency '{}' was never declared",
            dependency
        ))
    })
}
