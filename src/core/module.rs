// src/core/module.rs

//! # Configuration Modules
//!
//! A [`ConfigModule`] is one named unit of configuration logic: it declares the
//! modules it depends on, runs an ordered sequence of tests against the
//! toolchain and records what it found as [`Facts`].
//!
//! Modules never see each other directly. Dependencies are requested by name
//! through [`Dependencies`] and their results are read back, once they have
//! run, through [`ProbeContext::facts_of`].

use crate::core::batch::{BatchFragment, BatchPlan};
use crate::core::framework::{Framework, FrameworkError};
use crate::core::options::{OptionError, OptionRegistry, Options};
use crate::core::probe::{ProbeExecutor, ProbeFault, ProbeOutput, ProbeRequest};
use crate::models::{Facts, Language, LanguageConfig};
use log::{debug, error};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Index of a module inside one [`Framework`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// --- ERRORS ---

/// Why a module could not finish its probe sequence. Every variant is fatal
/// for the run.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// A mandatory feature is missing or the user's request cannot be met.
    #[error("{requirement}")]
    Unsatisfied {
        requirement: String,
        remediation: Option<String>,
    },
    /// A configure option has a value the module cannot use.
    #[error("Invalid value for --{option}: {reason}")]
    InvalidOption { option: String, reason: String },
    #[error(transparent)]
    Probe(#[from] ProbeFault),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ModuleError {
    pub fn unsatisfied(requirement: impl Into<String>) -> Self {
        Self::Unsatisfied {
            requirement: requirement.into(),
            remediation: None,
        }
    }

    pub fn unsatisfied_with(requirement: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self::Unsatisfied {
            requirement: requirement.into(),
            remediation: Some(remediation.into()),
        }
    }

    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

impl From<OptionError> for ModuleError {
    fn from(err: OptionError) -> Self {
        let option = match &err {
            OptionError::InvalidBool { key, .. } | OptionError::UnsupportedValue { key } => {
                key.clone()
            }
            OptionError::Positional(arg) | OptionError::EmptyName(arg) => arg.clone(),
        };
        Self::InvalidOption {
            option,
            reason: err.to_string(),
        }
    }
}

// --- CANDIDATE SEARCH ---

/// The outcome of trying one candidate (a compiler, a library path, ...).
#[derive(Debug)]
pub enum Attempt<T> {
    /// The candidate works; stop searching.
    Found(T),
    /// The candidate does not work; the reason is kept for diagnostics.
    Miss(String),
    /// Searching further is pointless; abort the module.
    Fatal(ModuleError),
}

/// Result of [`search`]: the first hit, or the reasons every candidate missed.
#[derive(Debug)]
pub struct Search<T> {
    pub found: Option<T>,
    pub misses: Vec<String>,
}

/// Tries `candidates` in order until one is [`Attempt::Found`].
pub fn search<C, T>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: impl FnMut(C) -> Attempt<T>,
) -> Result<Search<T>, ModuleError> {
    let mut misses = Vec::new();
    for candidate in candidates {
        match attempt(candidate) {
            Attempt::Found(value) => {
                return Ok(Search {
                    found: Some(value),
                    misses,
                });
            }
            Attempt::Miss(reason) => {
                debug!("Candidate rejected: {}", reason);
                misses.push(reason);
            }
            Attempt::Fatal(err) => return Err(err),
        }
    }
    Ok(Search {
        found: None,
        misses,
    })
}

// --- THE MODULE TRAIT ---

/// One node of the configuration graph.
///
/// The framework creates each module once per run, calls
/// [`declare_dependencies`](ConfigModule::declare_dependencies) exactly once
/// right after creation, and later calls [`run_probes`](ConfigModule::run_probes)
/// at most once, after every declared dependency has been configured.
pub trait ConfigModule: Send {
    /// The registry name, e.g. `config.functions`.
    fn name(&self) -> &str;

    /// Declares the options this module reads.
    fn setup_help(&self, _help: &mut OptionRegistry) {}

    /// Requests the modules this one depends on.
    fn declare_dependencies(&mut self, _deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        Ok(())
    }

    /// Called before execution; may request additional modules once every
    /// module of the run is known.
    fn refresh_dependencies(&mut self, _deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        Ok(())
    }

    /// Runs the module's tests in order and records the results in its facts.
    fn run_probes(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError>;

    fn facts(&self) -> &Facts;

    fn facts_mut(&mut self) -> &mut Facts;

    /// The option values the module's results depend on. Cached results are
    /// reused only while these (and the fingerprints of every dependency) are
    /// unchanged.
    fn fingerprint_inputs(&self, options: &Options) -> Vec<(String, String)> {
        options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// One line for the end-of-run summary.
    fn summary(&self) -> Option<String> {
        None
    }

    /// Prefix for this module's define names; `None` uses the run's prefix.
    fn header_prefix(&self) -> Option<&str> {
        None
    }
}

/// Handed to the declaration hooks; records edges from the declaring module.
pub struct Dependencies<'a> {
    pub(crate) framework: &'a mut Framework,
    pub(crate) requester: ModuleId,
}

impl Dependencies<'_> {
    /// Returns the module called `name`, creating it on first use, and records
    /// that the declaring module must run after it.
    pub fn require(&mut self, name: &str) -> Result<ModuleId, FrameworkError> {
        self.framework.require(name, Some(self.requester))
    }

    pub fn options(&self) -> &Options {
        self.framework.options()
    }

    /// The id of the module whose hook is running.
    pub fn requester(&self) -> ModuleId {
        self.requester
    }
}

// --- CATALOG ---

pub type ModuleFactory = fn() -> Box<dyn ConfigModule>;

/// A module that can be created by name.
pub struct ModuleDefinition {
    pub name: &'static str,
    pub about: &'static str,
    pub factory: ModuleFactory,
}

type BoxedFactory = Box<dyn Fn() -> Box<dyn ConfigModule> + Send + Sync>;

/// Maps module names to constructors.
#[derive(Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, BoxedFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: &[ModuleDefinition]) -> Self {
        let mut catalog = Self::new();
        for definition in definitions {
            let factory = definition.factory;
            catalog.register(definition.name, move || factory());
        }
        catalog
    }

    /// Registers (or replaces) the constructor for `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn ConfigModule> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn ConfigModule>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

// --- RUN-TIME CONTEXT ---

/// Facts of every module that finished, readable from all workers.
#[derive(Debug, Default)]
pub struct FactStore {
    published: RwLock<HashMap<ModuleId, Arc<Facts>>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, id: ModuleId, facts: Facts) {
        let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
        published.insert(id, Arc::new(facts));
    }

    pub fn get(&self, id: ModuleId) -> Option<Arc<Facts>> {
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        published.get(&id).cloned()
    }
}

/// Everything the workers of one run share.
pub struct RunResources<'a> {
    pub executor: &'a dyn ProbeExecutor,
    pub options: &'a Options,
    pub facts: &'a FactStore,
    pub batch: &'a Mutex<BatchPlan>,
    pub batch_mode: bool,
    pub work_dir: &'a Path,
    pub names: &'a [String],
}

/// What a module sees while its tests run.
pub struct ProbeContext<'a> {
    id: ModuleId,
    resources: &'a RunResources<'a>,
    failed_test: RefCell<Option<String>>,
}

impl<'a> ProbeContext<'a> {
    pub fn new(id: ModuleId, resources: &'a RunResources<'a>) -> Self {
        Self {
            id,
            resources,
            failed_test: RefCell::new(None),
        }
    }

    pub fn module_name(&self) -> &str {
        self.resources
            .names
            .get(self.id.index())
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn options(&self) -> &Options {
        self.resources.options
    }

    pub fn executor(&self) -> &dyn ProbeExecutor {
        self.resources.executor
    }

    /// Scratch directory shared by every probe of the run.
    pub fn work_dir(&self) -> &Path {
        self.resources.work_dir
    }

    pub fn batch_mode(&self) -> bool {
        self.resources.batch_mode
    }

    /// Runs one named test method. The name is logged, and reported with the
    /// error if the test fails.
    pub fn execute_test<T>(
        &self,
        test: &str,
        f: impl FnOnce() -> Result<T, ModuleError>,
    ) -> Result<T, ModuleError> {
        debug!("[{}] running {}", self.module_name(), test);
        let result = f();
        if let Err(err) = &result {
            error!("[{}] {} failed: {}", self.module_name(), test, err);
            self.failed_test.replace(Some(test.to_string()));
        }
        result
    }

    /// The test that raised the module's error, if any.
    pub fn failed_test(&self) -> Option<String> {
        self.failed_test.borrow().clone()
    }

    /// Facts of a dependency that has already been configured.
    pub fn facts_of(&self, id: ModuleId) -> Result<Arc<Facts>, ModuleError> {
        self.resources.facts.get(id).ok_or_else(|| {
            let name = self
                .resources
                .names
                .get(id.index())
                .map(String::as_str)
                .unwrap_or("<unknown>");
            ModuleError::Internal(anyhow::anyhow!(
                "'{}' read the facts of '{}' before it was configured; is the dependency declared?",
                self.module_name(),
                name
            ))
        })
    }

    /// The toolchain for `language` recorded by the compiler module `compilers`.
    pub fn toolchain(
        &self,
        compilers: ModuleId,
        language: Language,
    ) -> Result<LanguageConfig, ModuleError> {
        let facts = self.facts_of(compilers)?;
        LanguageConfig::from_facts(language, &facts).ok_or_else(|| {
            ModuleError::unsatisfied_with(
                format!("No {} compiler is available", language),
                format!("Specify one with --{}=<compiler>", language.option_name()),
            )
        })
    }

    /// A probe of `body` in `language`, with scratch files under the run directory.
    pub fn request(
        &self,
        language: Language,
        toolchain: &LanguageConfig,
        includes: &str,
        body: &str,
    ) -> ProbeRequest {
        ProbeRequest {
            language,
            toolchain: toolchain.clone(),
            includes: includes.to_string(),
            body: body.to_string(),
            extra_libs: Vec::new(),
            work_dir: self.resources.work_dir.to_path_buf(),
            tag: self.module_name().replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
        }
    }

    pub fn check_compile(&self, request: &ProbeRequest) -> Result<bool, ModuleError> {
        Ok(self.resources.executor.compile(request)?.success)
    }

    pub fn check_link(&self, request: &ProbeRequest) -> Result<bool, ModuleError> {
        Ok(self.resources.executor.link(request)?.success)
    }

    /// Builds and runs the probe; the output carries the program's stdout.
    pub fn check_run(&self, request: &ProbeRequest) -> Result<ProbeOutput, ModuleError> {
        Ok(self.resources.executor.run(request)?)
    }

    /// Defers work to the batch program.
    pub fn add_batch(&self, fragment: BatchFragment) {
        let mut plan = self
            .resources
            .batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        plan.add(fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::CountingExecutor;

    #[test]
    fn test_search_returns_first_found_and_collects_misses() {
        let result = search(["icc", "gcc", "clang"], |cc| match cc {
            "gcc" | "clang" => Attempt::Found(cc.to_string()),
            other => Attempt::Miss(format!("{} not found", other)),
        })
        .unwrap();
        assert_eq!(result.found.as_deref(), Some("gcc"));
        assert_eq!(result.misses, vec!["icc not found"]);
    }

    #[test]
    fn test_search_stops_on_fatal() {
        let mut tried = Vec::new();
        let result: Result<Search<()>, _> = search([1, 2, 3], |n| {
            tried.push(n);
            if n == 2 {
                Attempt::Fatal(ModuleError::unsatisfied("broken"))
            } else {
                Attempt::Miss(String::new())
            }
        });
        assert!(matches!(result, Err(ModuleError::Unsatisfied { .. })));
        assert_eq!(tried, vec![1, 2]);
    }

    #[test]
    fn test_option_error_converts_to_invalid_option() {
        let err: ModuleError = OptionError::InvalidBool {
            key: "with-debugging".to_string(),
            value: "maybe".to_string(),
        }
        .into();
        assert!(matches!(err, ModuleError::InvalidOption { ref option, .. } if option == "with-debugging"));
    }

    #[test]
    fn test_probe_context_reports_failed_test_and_missing_facts() {
        let executor = CountingExecutor::passing();
        let options = Options::new();
        let facts = FactStore::new();
        let batch = Mutex::new(BatchPlan::new("arch"));
        let names = vec!["config.a".to_string(), "config.b".to_string()];
        let dir = tempfile::tempdir().unwrap();
        let resources = RunResources {
            executor: &executor,
            options: &options,
            facts: &facts,
            batch: &batch,
            batch_mode: false,
            work_dir: dir.path(),
            names: &names,
        };
        let ctx = ProbeContext::new(ModuleId(1), &resources);

        assert_eq!(ctx.module_name(), "config.b");
        assert!(ctx.facts_of(ModuleId(0)).is_err());
        facts.publish(ModuleId(0), Facts::default());
        assert!(ctx.facts_of(ModuleId(0)).is_ok());

        let ok: Result<(), ModuleError> = ctx.execute_test("checkFine", || Ok(()));
        assert!(ok.is_ok());
        assert_eq!(ctx.failed_test(), None);
        let failed: Result<(), ModuleError> =
            ctx.execute_test("checkBroken", || Err(ModuleError::unsatisfied("nope")));
        assert!(failed.is_err());
        assert_eq!(ctx.failed_test().as_deref(), Some("checkBroken"));

        ctx.add_batch(BatchFragment::new("config.b", "  ;"));
        assert_eq!(batch.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_toolchain_missing_is_unsatisfied() {
        let executor = CountingExecutor::passing();
        let options = Options::new();
        let facts = FactStore::new();
        facts.publish(ModuleId(0), Facts::default());
        let batch = Mutex::new(BatchPlan::new("arch"));
        let names = vec!["config.setCompilers".to_string(), "config.headers".to_string()];
        let dir = tempfile::tempdir().unwrap();
        let resources = RunResources {
            executor: &executor,
            options: &options,
            facts: &facts,
            batch: &batch,
            batch_mode: false,
            work_dir: dir.path(),
            names: &names,
        };
        let ctx = ProbeContext::new(ModuleId(1), &resources);
        let err = ctx.toolchain(ModuleId(0), Language::Fortran).unwrap_err();
        assert!(matches!(err, ModuleError::Unsatisfied { remediation: Some(_), .. }));
    }
}
