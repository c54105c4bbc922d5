// src/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// --- FACTS ---
// The configuration truth recorded by a module. Ordered maps keep rendering and
// cache comparisons deterministic.

/// A single Makefile rule recorded by a module.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MakeRule {
    /// The prerequisites line (everything after `target:`).
    pub dependencies: String,
    /// Recipe lines, emitted tab-indented.
    pub commands: Vec<String>,
}

/// Everything a module discovered during its probe sequence.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts {
    /// Symbolic name -> value, emitted as guarded `#define`s.
    pub defines: BTreeMap<String, String>,
    /// Name -> value, emitted as `NAME = value` Makefile macros.
    pub make_macros: BTreeMap<String, String>,
    /// Target -> rule, emitted into the Makefile rule file.
    pub make_rules: BTreeMap<String, MakeRule>,
    /// Name -> value, used for `@NAME@` template substitution.
    pub substitutions: BTreeMap<String, String>,
    /// Define name -> comment printed above the define.
    pub help: BTreeMap<String, String>,
}

impl Facts {
    /// Records a define. An empty value is emitted as `/* #undef NAME */`.
    pub fn add_define(&mut self, name: impl Into<String>, value: impl ToString) {
        self.defines.insert(name.into(), value.to_string());
    }

    /// Records a define together with a comment for the header.
    pub fn add_define_with_help(
        &mut self,
        name: impl Into<String>,
        value: impl ToString,
        help: impl Into<String>,
    ) {
        let name = name.into();
        self.help.insert(name.clone(), help.into());
        self.add_define(name, value);
    }

    pub fn add_make_macro(&mut self, name: impl Into<String>, value: impl ToString) {
        self.make_macros.insert(name.into(), value.to_string());
    }

    pub fn add_make_rule(
        &mut self,
        target: impl Into<String>,
        dependencies: impl Into<String>,
        commands: Vec<String>,
    ) {
        self.make_rules.insert(
            target.into(),
            MakeRule {
                dependencies: dependencies.into(),
                commands,
            },
        );
    }

    pub fn add_substitution(&mut self, name: impl Into<String>, value: impl ToString) {
        self.substitutions.insert(name.into(), value.to_string());
    }

    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    pub fn has_define(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    pub fn substitution(&self, name: &str) -> Option<&str> {
        self.substitutions.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
            && self.make_macros.is_empty()
            && self.make_rules.is_empty()
            && self.substitutions.is_empty()
    }

    /// Removes every recorded fact. Used before a module re-runs its probes.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// --- TOOLCHAIN MODELS ---

/// A source language a probe can be written in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    C,
    Cxx,
    Fortran,
    Cuda,
}

impl Language {
    /// All languages, in the order compilers are detected.
    pub const ALL: [Self; 4] = [Self::C, Self::Cxx, Self::Fortran, Self::Cuda];

    /// The substitution prefix used for this language's toolchain (`CC`, `CXX`, ...).
    pub fn compiler_var(self) -> &'static str {
        match self {
            Self::C => "CC",
            Self::Cxx => "CXX",
            Self::Fortran => "FC",
            Self::Cuda => "CUDAC",
        }
    }

    pub fn flags_var(self) -> &'static str {
        match self {
            Self::C => "CFLAGS",
            Self::Cxx => "CXXFLAGS",
            Self::Fortran => "FFLAGS",
            Self::Cuda => "CUDAFLAGS",
        }
    }

    pub fn source_extension(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cxx => "cxx",
            Self::Fortran => "F90",
            Self::Cuda => "cu",
        }
    }

    /// The `--with-<x>` option naming an explicit compiler for this language.
    pub fn option_name(self) -> &'static str {
        match self {
            Self::C => "with-cc",
            Self::Cxx => "with-cxx",
            Self::Fortran => "with-fc",
            Self::Cuda => "with-cudac",
        }
    }

    /// Compilers tried, in order, when no explicit compiler was given.
    pub fn default_candidates(self) -> &'static [&'static str] {
        match self {
            Self::C => &["cc", "gcc", "clang", "icc"],
            Self::Cxx => &["c++", "g++", "clang++", "icpc"],
            Self::Fortran => &["gfortran", "ifort", "flang", "f90"],
            Self::Cuda => &["nvcc"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::C => "C",
            Self::Cxx => "C++",
            Self::Fortran => "Fortran",
            Self::Cuda => "CUDA",
        };
        f.write_str(name)
    }
}

/// The explicit toolchain description for one language.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageConfig {
    /// Compiler command, possibly with embedded arguments (`"gcc -m64"`).
    pub compiler: String,
    pub flags: Vec<String>,
    /// Linker command; usually the compiler itself.
    pub linker: String,
    pub linker_flags: Vec<String>,
    /// Libraries appended to every link line.
    pub libs: Vec<String>,
}

impl LanguageConfig {
    /// A toolchain that compiles and links with the same command.
    pub fn new(compiler: impl Into<String>) -> Self {
        let compiler = compiler.into();
        Self {
            linker: compiler.clone(),
            compiler,
            ..Default::default()
        }
    }

    /// Records this toolchain as substitutions (`CC`, `CFLAGS`, `CC_LINKER`, ...).
    pub fn record(&self, language: Language, facts: &mut Facts) {
        let var = language.compiler_var();
        facts.add_substitution(var, &self.compiler);
        facts.add_substitution(language.flags_var(), self.flags.join(" "));
        facts.add_substitution(format!("{}_LINKER", var), &self.linker);
        facts.add_substitution(format!("{}_LINKER_FLAGS", var), self.linker_flags.join(" "));
        facts.add_substitution(format!("{}_LIBS", var), self.libs.join(" "));
    }

    /// Rebuilds a toolchain from the substitutions written by [`LanguageConfig::record`].
    pub fn from_facts(language: Language, facts: &Facts) -> Option<Self> {
        let var = language.compiler_var();
        let compiler = facts.substitution(var)?.to_string();
        let split = |key: &str| -> Vec<String> {
            facts
                .substitution(key)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };
        let linker = facts
            .substitution(&format!("{}_LINKER", var))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| compiler.clone());
        Some(Self {
            compiler,
            flags: split(language.flags_var()),
            linker,
            linker_flags: split(&format!("{}_LINKER_FLAGS", var)),
            libs: split(&format!("{}_LIBS", var)),
        })
    }
}

// --- CONFIGURATION FILE MODELS (`confgraph.toml`) ---

/// A template file whose `@NAME@` placeholders are replaced after a successful run.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubstitutionFile {
    pub input: std::path::PathBuf,
    /// Defaults to the input path without its `.in` suffix.
    pub output: Option<std::path::PathBuf>,
}

/// The deserialized structure of a `confgraph.toml` file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigureFile {
    #[serde(default)]
    pub modules: Vec<String>,
    pub arch: Option<String>,
    pub jobs: Option<usize>,
    pub batch: Option<bool>,
    pub output_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub header_prefix: Option<String>,
    /// Configure options, exactly as if given as `--key=value`.
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub substitute: Vec<SubstitutionFile>,
}
