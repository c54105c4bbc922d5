// src/core/framework.rs

//! # Framework
//!
//! Owns every module of a configure run and drives it: resolves `require`
//! edges into the dependency graph, restores what it can from the result
//! cache, executes the rest and hands the aggregated facts to an
//! [`ArtifactWriter`].

use crate::constants::DEFAULT_ARCH;
use crate::core::artifacts::{ArtifactWriter, Artifacts, ModuleArtifacts};
use crate::core::batch::BatchPlan;
use crate::core::cache::{self, CacheError, Lookup, ResultCache};
use crate::core::engine::{self, RunReport, Strategy};
use crate::core::graph::DependencyGraph;
use crate::core::module::{
    ConfigModule, Dependencies, FactStore, ModuleCatalog, ModuleError, ModuleId, RunResources,
};
use crate::core::options::{OptionRegistry, Options};
use crate::core::probe::ProbeExecutor;
use crate::models::{Facts, SubstitutionFile};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameworkError {
    #[error("Unknown configuration module '{name}'")]
    UnknownModule { name: String, known: Vec<String> },
    #[error("Circular dependency between modules: {}", .modules.join(" -> "))]
    Cycle { modules: Vec<String> },
    #[error("Module '{module}' failed: {source}")]
    ModuleFailed {
        module: String,
        /// The test method that raised the error, if known.
        test: Option<String>,
        #[source]
        source: ModuleError,
    },
    #[error("The number of parallel workers must be at least 1")]
    InvalidWorkerCount,
    #[error("Could not start the worker pool: {0}")]
    WorkerPool(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write configuration artifacts: {0:#}")]
    Artifact(anyhow::Error),
    #[error("Internal framework error: {0}")]
    Internal(String),
}

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct FrameworkSettings {
    pub strategy: Strategy,
    /// Defer run tests to a batch program instead of running them.
    pub batch: bool,
    /// The configuration identity; names the cache and batch files.
    pub arch: String,
    /// Default prefix for define names and the header file.
    pub header_prefix: String,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Serial,
            batch: false,
            arch: DEFAULT_ARCH.to_string(),
            header_prefix: String::new(),
        }
    }
}

/// How a configure run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// Artifacts were written.
    Completed(RunReport),
    /// Run tests were deferred; run the program at `path` on the target and
    /// resume with the options file it writes.
    BatchPending { path: PathBuf, output_name: String },
}

/// One realized module and its bookkeeping.
pub(crate) struct ModuleSlot {
    pub(crate) name: String,
    /// `None` only while the module is being declared or is running.
    pub(crate) module: Option<Box<dyn ConfigModule>>,
    pub(crate) configured: bool,
    /// Facts came from the result cache.
    pub(crate) restored: bool,
    pub(crate) fingerprint: Option<String>,
}

/// The configure framework of one invocation.
pub struct Framework {
    catalog: ModuleCatalog,
    names: HashMap<String, ModuleId>,
    slots: Vec<ModuleSlot>,
    graph: DependencyGraph<ModuleId>,
    options: Options,
    help: OptionRegistry,
    settings: FrameworkSettings,
    cache: Option<ResultCache>,
    substitution_files: Vec<SubstitutionFile>,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("modules", &self.module_names())
            .field("settings", &self.settings)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Framework {
    pub fn new(catalog: ModuleCatalog, options: Options, settings: FrameworkSettings) -> Self {
        let mut help = OptionRegistry::new();
        help.add(
            "Framework",
            "with-batch",
            None,
            "Defer run tests to a program executed on the target machine",
        );
        Self {
            catalog,
            names: HashMap::new(),
            slots: Vec::new(),
            graph: DependencyGraph::new(),
            options,
            help,
            settings,
            cache: None,
            substitution_files: Vec::new(),
        }
    }

    /// Enables result caching for this run.
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn add_substitution_file(&mut self, file: SubstitutionFile) {
        self.substitution_files.push(file);
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn settings(&self) -> &FrameworkSettings {
        &self.settings
    }

    pub fn help(&self) -> &OptionRegistry {
        &self.help
    }

    pub fn graph(&self) -> &DependencyGraph<ModuleId> {
        &self.graph
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    pub fn id_of(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    /// Names of every realized module, in creation order.
    pub fn module_names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.name.as_str()).collect()
    }

    pub fn module(&self, name: &str) -> Option<&dyn ConfigModule> {
        let id = self.id_of(name)?;
        self.slots.get(id.index())?.module.as_deref()
    }

    pub fn facts(&self, name: &str) -> Option<&Facts> {
        self.module(name).map(|module| module.facts())
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.id_of(name)
            .and_then(|id| self.slots.get(id.index()))
            .is_some_and(|slot| slot.configured)
    }

    pub fn is_restored(&self, name: &str) -> bool {
        self.id_of(name)
            .and_then(|id| self.slots.get(id.index()))
            .is_some_and(|slot| slot.restored)
    }

    // --- GRAPH CONSTRUCTION ---

    /// Returns the module called `name`, creating it on first use. When
    /// `requester` is given (and is a different module), records that the
    /// requester must run after it.
    pub fn require(
        &mut self,
        name: &str,
        requester: Option<ModuleId>,
    ) -> Result<ModuleId, FrameworkError> {
        let id = match self.names.get(name) {
            Some(&id) => id,
            None => self.instantiate(name)?,
        };
        if let Some(requester) = requester {
            if requester != id {
                self.graph.add_edges(requester, &[id]);
            }
        }
        Ok(id)
    }

    /// `require` without recording an edge.
    pub fn get_child(&mut self, name: &str) -> Result<ModuleId, FrameworkError> {
        self.require(name, None)
    }

    /// Creates the top-level modules of the run.
    pub fn create_children<S: AsRef<str>>(
        &mut self,
        names: &[S],
    ) -> Result<Vec<ModuleId>, FrameworkError> {
        names.iter().map(|name| self.get_child(name.as_ref())).collect()
    }

    fn instantiate(&mut self, name: &str) -> Result<ModuleId, FrameworkError> {
        let mut module = self
            .catalog
            .create(name)
            .ok_or_else(|| FrameworkError::UnknownModule {
                name: name.to_string(),
                known: self.catalog.names(),
            })?;
        let id = ModuleId(self.slots.len());
        debug!("Creating module '{}' ({})", name, id);

        module.setup_help(&mut self.help);
        self.help.apply_defaults(&mut self.options);

        // Registered before its hook runs so that a request cycle during
        // declaration resolves to this instance instead of recursing.
        self.names.insert(name.to_string(), id);
        self.graph.add_vertex(id);
        self.slots.push(ModuleSlot {
            name: name.to_string(),
            module: None,
            configured: false,
            restored: false,
            fingerprint: None,
        });

        let declared = module.declare_dependencies(&mut Dependencies {
            framework: self,
            requester: id,
        });
        self.slot_mut(id)?.module = Some(module);
        declared?;
        Ok(id)
    }

    /// Calls every module's `refresh_dependencies` hook, including modules
    /// created by earlier hooks.
    pub fn update_dependencies(&mut self) -> Result<(), FrameworkError> {
        let mut index = 0;
        while index < self.slots.len() {
            let id = ModuleId(index);
            let slot = self.slot_mut(id)?;
            let Some(mut module) = slot.module.take() else {
                index += 1;
                continue;
            };
            let refreshed = module.refresh_dependencies(&mut Dependencies {
                framework: self,
                requester: id,
            });
            self.slot_mut(id)?.module = Some(module);
            refreshed?;
            index += 1;
        }
        Ok(())
    }

    // --- EXECUTION ---

    /// Runs the configuration and writes its artifacts.
    pub fn configure(
        &mut self,
        executor: &dyn ProbeExecutor,
        writer: &dyn ArtifactWriter,
    ) -> Result<ConfigureOutcome, FrameworkError> {
        // 1. Setup
        self.help.apply_defaults(&mut self.options);
        for unknown in self.help.unknown_options(&self.options) {
            warn!("Option '--{}' is not read by any module", unknown);
        }
        let temp_dir = tempfile::Builder::new().prefix("confgraph-").tempdir()?;
        info!("{}", "=".repeat(79));
        info!("Configuring '{}' with {} modules", self.settings.arch, self.slots.len());
        info!("Options: {}", self.options.options_string());
        info!("Scratch directory: {}", temp_dir.path().display());
        info!("{}", "=".repeat(79));

        // 2. Late dependencies
        self.update_dependencies()?;

        // 3. Cache restore
        self.restore_from_cache()?;

        // 4. Execution
        let facts = FactStore::new();
        let batch = Mutex::new(BatchPlan::new(self.settings.arch.clone()));
        let names: Vec<String> = self.slots.iter().map(|slot| slot.name.clone()).collect();
        let resources = RunResources {
            executor,
            options: &self.options,
            facts: &facts,
            batch: &batch,
            batch_mode: self.settings.batch,
            work_dir: temp_dir.path(),
            names: &names,
        };
        let report = engine::execute(self.settings.strategy, &self.graph, &mut self.slots, &resources)?;
        info!(
            "Configured {} modules ({} from cache)",
            report.executed.len() + report.reused.len(),
            report.reused.len()
        );

        // 5. Batch mode
        let plan = batch.into_inner().unwrap_or_else(PoisonError::into_inner);
        if self.settings.batch && !plan.is_empty() {
            let program = plan.render(&self.options);
            info!("Deferred work from: {}", plan.modules().join(", "));
            let path = writer
                .write_batch_program(&program)
                .map_err(FrameworkError::Artifact)?;
            return Ok(ConfigureOutcome::BatchPending {
                path,
                output_name: program.output_name,
            });
        }

        // 6. Aggregation and output
        let artifacts = self.aggregate()?;
        writer.write(&artifacts).map_err(FrameworkError::Artifact)?;
        self.store_in_cache();

        // 7. `temp_dir` is removed when dropped, on this and every error path.
        Ok(ConfigureOutcome::Completed(report))
    }

    /// Computes fingerprints in dependency order, restores modules whose
    /// cached entry matches and drops the subtrees of stale entries.
    fn restore_from_cache(&mut self) -> Result<(), FrameworkError> {
        let order = self.topological_order()?;

        for &id in &order {
            let upstream: Vec<(String, String)> = self
                .graph
                .in_edges(id)
                .iter()
                .filter_map(|dep| self.slots.get(dep.index()))
                .map(|slot| (slot.name.clone(), slot.fingerprint.clone().unwrap_or_default()))
                .collect();
            let upstream: Vec<(&str, &str)> = upstream
                .iter()
                .map(|(name, print)| (name.as_str(), print.as_str()))
                .collect();
            let Some(slot) = self.slots.get_mut(id.index()) else { continue };
            let inputs = slot
                .module
                .as_ref()
                .map(|module| module.fingerprint_inputs(&self.options))
                .unwrap_or_default();
            slot.fingerprint = Some(cache::fingerprint(&slot.name, &inputs, &upstream));
        }

        let Some(cache) = self.cache.as_mut() else {
            return Ok(());
        };

        let mut stale = Vec::new();
        for &id in &order {
            let dependencies_restored = self.graph.in_edges(id).iter().all(|dep| {
                self.slots
                    .get(dep.index())
                    .is_some_and(|slot| slot.configured)
            });
            let Some(slot) = self.slots.get_mut(id.index()) else { continue };
            if slot.configured {
                continue;
            }
            let fingerprint = slot.fingerprint.clone().unwrap_or_default();
            match cache.lookup(&slot.name, &fingerprint) {
                Lookup::Hit(cached) if dependencies_restored => {
                    if let Some(module) = slot.module.as_mut() {
                        *module.facts_mut() = cached.clone();
                        slot.configured = true;
                        slot.restored = true;
                        debug!("Restored '{}' from the result cache", slot.name);
                    }
                }
                Lookup::Hit(_) | Lookup::Stale => {
                    info!("Cached result of '{}' is out of date", slot.name);
                    stale.push(id);
                }
                Lookup::Miss => debug!("No cached result for '{}'", slot.name),
            }
        }

        for root in stale {
            let slots = &self.slots;
            let affected = cache.invalidate_subtree(&self.graph, root, |id| {
                slots
                    .get(id.index())
                    .map(|slot| slot.name.clone())
                    .unwrap_or_default()
            });
            for id in affected {
                if let Some(slot) = self.slots.get_mut(id.index()) {
                    if slot.restored {
                        slot.configured = false;
                        slot.restored = false;
                        if let Some(module) = slot.module.as_mut() {
                            module.facts_mut().clear();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn store_in_cache(&mut self) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        for slot in &self.slots {
            if !slot.configured || slot.restored {
                continue;
            }
            if let (Some(module), Some(fingerprint)) = (&slot.module, &slot.fingerprint) {
                cache.store(&slot.name, fingerprint, module.facts());
            }
        }
        if let Err(e) = cache.save() {
            warn!("{}", e);
        }
    }

    /// Collects the facts of every module, in dependency order.
    pub fn aggregate(&self) -> Result<Artifacts, FrameworkError> {
        let mut modules = Vec::with_capacity(self.slots.len());
        for id in self.topological_order()? {
            let Some(slot) = self.slots.get(id.index()) else { continue };
            let Some(module) = slot.module.as_deref() else { continue };
            modules.push(ModuleArtifacts {
                name: slot.name.clone(),
                define_prefix: module
                    .header_prefix()
                    .unwrap_or(self.settings.header_prefix.as_str())
                    .to_string(),
                facts: module.facts().clone(),
            });
        }
        Ok(Artifacts {
            arch: self.settings.arch.clone(),
            header_prefix: self.settings.header_prefix.clone(),
            modules,
            substitution_files: self.substitution_files.clone(),
        })
    }

    /// The summary lines of every configured module, in dependency order.
    pub fn print_summary(&self) -> String {
        let Ok(order) = self.topological_order() else {
            return String::new();
        };
        order
            .iter()
            .filter_map(|id| self.slots.get(id.index()))
            .filter(|slot| slot.configured)
            .filter_map(|slot| slot.module.as_ref()?.summary())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn topological_order(&self) -> Result<Vec<ModuleId>, FrameworkError> {
        self.graph.topological_sort().map_err(|cycle| FrameworkError::Cycle {
            modules: cycle
                .members
                .iter()
                .filter_map(|id| self.slots.get(id.index()))
                .map(|slot| slot.name.clone())
                .collect(),
        })
    }

    fn slot_mut(&mut self, id: ModuleId) -> Result<&mut ModuleSlot, FrameworkError> {
        self.slots
            .get_mut(id.index())
            .ok_or_else(|| FrameworkError::Internal(format!("no module with id {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{
        CountingExecutor, Journal, Outcome, RecordingWriter, ModuleScript, scripted_catalog,
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn framework(scripts: &[ModuleScript], journal: &Arc<Journal>, strategy: Strategy) -> Framework {
        Framework::new(
            scripted_catalog(scripts, journal),
            Options::new(),
            FrameworkSettings {
                strategy,
                header_prefix: "PETSC".to_string(),
                ..Default::default()
            },
        )
    }

    /// compilers <- headers <- functions, compilers <- functions
    fn chain() -> Vec<ModuleScript> {
        vec![
            ModuleScript::new("config.compilers").define("HAVE_CC", "1").probes(2),
            ModuleScript::new("config.headers")
                .depends_on("config.compilers")
                .define("HAVE_STDLIB_H", "1")
                .probes(1),
            ModuleScript::new("config.functions")
                .depends_on("config.compilers")
                .depends_on("config.headers")
                .define("HAVE_MEMCMP", "1")
                .probes(3),
        ]
    }

    #[test]
    fn test_require_is_idempotent_and_declares_once() {
        let journal = Journal::new();
        let mut fw = framework(&chain(), &journal, Strategy::Serial);

        let first = fw.get_child("config.functions").unwrap();
        let second = fw.require("config.functions", None).unwrap();
        let headers = fw.require("config.headers", Some(first)).unwrap();

        assert_eq!(first, second);
        assert_eq!(fw.module_names().len(), 3);
        assert_eq!(journal.declarations("config.functions"), 1);
        assert_eq!(journal.declarations("config.compilers"), 1);
        assert_eq!(fw.graph().in_edges(first).len(), 2);
        assert!(fw.graph().in_edges(first).contains(&headers));
    }

    #[test]
    fn test_require_self_adds_no_edge() {
        let journal = Journal::new();
        let mut fw = framework(&chain(), &journal, Strategy::Serial);
        let id = fw.get_child("config.compilers").unwrap();
        fw.require("config.compilers", Some(id)).unwrap();
        assert!(fw.graph().in_edges(id).is_empty());
    }

    #[test]
    fn test_unknown_module_is_reported() {
        let journal = Journal::new();
        let mut fw = framework(&chain(), &journal, Strategy::Serial);
        let err = fw.get_child("config.nonexistent").unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownModule { ref name, .. } if name == "config.nonexistent"));
    }

    #[test]
    fn test_serial_run_executes_in_dependency_order_and_writes_artifacts() {
        let journal = Journal::new();
        let mut fw = framework(&chain(), &journal, Strategy::Serial);
        fw.get_child("config.functions").unwrap();
        let executor = CountingExecutor::passing();
        let writer = RecordingWriter::default();

        let outcome = fw.configure(&executor, &writer).unwrap();

        let ConfigureOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(
            report.executed,
            vec!["config.compilers", "config.headers", "config.functions"]
        );
        assert_eq!(journal.started(), report.executed);
        assert_eq!(executor.calls(), 6);
        let written = writer.artifacts();
        assert_eq!(written.len(), 1);
        let defines = written[0].defines();
        assert_eq!(defines.get("PETSC_HAVE_MEMCMP").map(String::as_str), Some("1"));
        assert_eq!(defines.len(), 3);
    }

    #[test]
    fn test_dependency_facts_are_visible_to_dependents() {
        let scripts = vec![
            ModuleScript::new("config.compilers").define("CC_WORKS", "1"),
            ModuleScript::new("config.headers")
                .depends_on("config.compilers")
                .copy_upstream(),
        ];
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Parallel { workers: 2 });
        fw.get_child("config.headers").unwrap();
        fw.configure(&CountingExecutor::passing(), &RecordingWriter::default())
            .unwrap();
        assert_eq!(
            fw.facts("config.headers").and_then(|f| f.define("UPSTREAM_CC_WORKS")),
            Some("1")
        );
    }

    #[test]
    fn test_second_run_reuses_cache_with_zero_probes() {
        let cache_dir = tempdir().unwrap();
        let journal = Journal::new();

        let mut first = framework(&chain(), &journal, Strategy::Serial)
            .with_cache(ResultCache::open(cache_dir.path(), DEFAULT_ARCH));
        first.get_child("config.functions").unwrap();
        let first_writer = RecordingWriter::default();
        first.configure(&CountingExecutor::passing(), &first_writer).unwrap();

        let mut second = framework(&chain(), &journal, Strategy::Serial)
            .with_cache(ResultCache::open(cache_dir.path(), DEFAULT_ARCH));
        second.get_child("config.functions").unwrap();
        let executor = CountingExecutor::passing();
        let second_writer = RecordingWriter::default();
        let outcome = second.configure(&executor, &second_writer).unwrap();

        assert_eq!(executor.calls(), 0);
        let ConfigureOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert!(report.executed.is_empty());
        assert_eq!(report.reused.len(), 3);
        assert!(second.is_restored("config.headers"));
        assert_eq!(first_writer.artifacts(), second_writer.artifacts());
    }

    #[test]
    fn test_changed_option_invalidates_the_dependent_subtree() {
        let cache_dir = tempdir().unwrap();
        let journal = Journal::new();
        let scripts = || {
            vec![
                ModuleScript::new("config.compilers").reads_no_options().probes(1),
                ModuleScript::new("config.headers")
                    .depends_on("config.compilers")
                    .reads_option("with-headers")
                    .probes(1),
                ModuleScript::new("config.functions")
                    .depends_on("config.headers")
                    .reads_option("with-functions")
                    .probes(1),
            ]
        };

        let mut first = framework(&scripts(), &journal, Strategy::Serial)
            .with_cache(ResultCache::open(cache_dir.path(), DEFAULT_ARCH));
        first.get_child("config.functions").unwrap();
        first
            .configure(&CountingExecutor::passing(), &RecordingWriter::default())
            .unwrap();

        let mut options = Options::new();
        options.set("with-headers", "stdlib.h");
        let mut second = Framework::new(
            scripted_catalog(&scripts(), &journal),
            options,
            FrameworkSettings::default(),
        )
        .with_cache(ResultCache::open(cache_dir.path(), DEFAULT_ARCH));
        second.get_child("config.functions").unwrap();
        let executor = CountingExecutor::passing();
        let outcome = second
            .configure(&executor, &RecordingWriter::default())
            .unwrap();

        let ConfigureOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.reused, vec!["config.compilers"]);
        assert_eq!(report.executed, vec!["config.headers", "config.functions"]);
        assert_eq!(executor.calls(), 2);
    }

    #[test]
    fn test_fatal_error_stops_the_run_and_writes_nothing() {
        let scripts = vec![
            ModuleScript::new("config.compilers"),
            ModuleScript::new("config.mpi")
                .depends_on("config.compilers")
                .outcome(Outcome::Unsatisfied),
            ModuleScript::new("config.packages").depends_on("config.mpi"),
        ];
        let cache_dir = tempdir().unwrap();
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Serial)
            .with_cache(ResultCache::open(cache_dir.path(), DEFAULT_ARCH));
        fw.get_child("config.packages").unwrap();
        let writer = RecordingWriter::default();

        let err = fw.configure(&CountingExecutor::passing(), &writer).unwrap_err();

        match err {
            FrameworkError::ModuleFailed { module, test, source } => {
                assert_eq!(module, "config.mpi");
                assert_eq!(test.as_deref(), Some("checkOutcome"));
                assert!(matches!(source, ModuleError::Unsatisfied { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(writer.artifacts().is_empty());
        assert!(!journal.started().contains(&"config.packages".to_string()));
        assert!(!fw.is_configured("config.packages"));
        assert!(ResultCache::open(cache_dir.path(), DEFAULT_ARCH).is_empty());
    }

    #[test]
    fn test_panicking_module_becomes_internal_error() {
        let scripts = vec![ModuleScript::new("config.broken").outcome(Outcome::Panic)];
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Parallel { workers: 2 });
        fw.get_child("config.broken").unwrap();
        let err = fw
            .configure(&CountingExecutor::passing(), &RecordingWriter::default())
            .unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::ModuleFailed { source: ModuleError::Internal(_), .. }
        ));
    }

    #[test]
    fn test_cycle_is_reported_with_its_modules() {
        let scripts = vec![
            ModuleScript::new("config.a").depends_on("config.b"),
            ModuleScript::new("config.b").depends_on("config.c"),
            ModuleScript::new("config.c").depends_on("config.a"),
        ];
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Serial);
        fw.get_child("config.a").unwrap();
        let writer = RecordingWriter::default();
        let err = fw.configure(&CountingExecutor::passing(), &writer).unwrap_err();
        let FrameworkError::Cycle { mut modules } = err else {
            panic!("expected a cycle");
        };
        modules.sort();
        assert_eq!(modules, vec!["config.a", "config.b", "config.c"]);
        assert!(writer.artifacts().is_empty());
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let journal = Journal::new();
        let mut fw = framework(&chain(), &journal, Strategy::Parallel { workers: 0 });
        fw.get_child("config.functions").unwrap();
        let err = fw
            .configure(&CountingExecutor::passing(), &RecordingWriter::default())
            .unwrap_err();
        assert!(matches!(err, FrameworkError::InvalidWorkerCount));
    }

    #[test]
    fn test_serial_and_parallel_runs_produce_the_same_facts() {
        // A wide diamond: root <- {w0..w7} <- sink
        let mut scripts = vec![ModuleScript::new("root").define("ROOT", "1")];
        let mut sink = ModuleScript::new("sink").copy_upstream();
        for i in 0..8 {
            let name = format!("w{}", i);
            scripts.push(
                ModuleScript::new(&name)
                    .depends_on("root")
                    .define(&format!("W{}", i), &i.to_string())
                    .probes(1)
                    .sleep_ms(5),
            );
            sink = sink.depends_on(&name);
        }
        scripts.push(sink);

        let run = |strategy: Strategy| {
            let journal = Journal::new();
            let mut fw = framework(&scripts, &journal, strategy);
            fw.get_child("sink").unwrap();
            let writer = RecordingWriter::default();
            fw.configure(&CountingExecutor::passing(), &writer).unwrap();
            (writer.artifacts(), journal)
        };

        let (serial, _) = run(Strategy::Serial);
        let (parallel, journal) = run(Strategy::Parallel { workers: 4 });
        assert_eq!(serial, parallel);
        assert!(journal.max_concurrency() <= 4);
        let started = journal.started();
        assert_eq!(started.first().map(String::as_str), Some("root"));
        assert_eq!(started.last().map(String::as_str), Some("sink"));
    }

    #[test]
    fn test_parallel_failure_drains_in_flight_siblings() {
        let scripts = vec![
            ModuleScript::new("root"),
            ModuleScript::new("slow").depends_on("root").sleep_ms(50),
            ModuleScript::new("bad").depends_on("root").outcome(Outcome::Unsatisfied),
            ModuleScript::new("after-slow").depends_on("slow"),
            ModuleScript::new("top").depends_on("after-slow").depends_on("bad"),
        ];
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Parallel { workers: 2 });
        fw.get_child("top").unwrap();
        let writer = RecordingWriter::default();

        let err = fw.configure(&CountingExecutor::passing(), &writer).unwrap_err();

        assert!(matches!(err, FrameworkError::ModuleFailed { ref module, .. } if module == "bad"));
        assert!(journal.finished().contains(&"slow".to_string()));
        assert!(!journal.started().contains(&"after-slow".to_string()));
        assert!(!journal.started().contains(&"top".to_string()));
        assert!(writer.artifacts().is_empty());
    }

    #[test]
    fn test_batch_mode_defers_and_skips_artifacts() {
        let scripts = vec![ModuleScript::new("config.functions").defers_to_batch()];
        let journal = Journal::new();
        let mut fw = Framework::new(
            scripted_catalog(&scripts, &journal),
            Options::new(),
            FrameworkSettings {
                batch: true,
                arch: "arch-cross".to_string(),
                ..Default::default()
            },
        );
        fw.get_child("config.functions").unwrap();
        let writer = RecordingWriter::default();

        let outcome = fw.configure(&CountingExecutor::passing(), &writer).unwrap();

        assert_eq!(
            outcome,
            ConfigureOutcome::BatchPending {
                path: PathBuf::from("conftest-arch-cross.c"),
                output_name: "reconfigure-arch-cross.toml".to_string(),
            }
        );
        assert!(writer.artifacts().is_empty());
        assert_eq!(writer.batch_programs().len(), 1);
    }

    #[test]
    fn test_summary_lists_configured_modules() {
        let scripts = vec![
            ModuleScript::new("config.compilers").summary("C Compiler: gcc"),
            ModuleScript::new("config.headers").depends_on("config.compilers"),
        ];
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Serial);
        fw.get_child("config.headers").unwrap();
        assert_eq!(fw.print_summary(), "");
        fw.configure(&CountingExecutor::passing(), &RecordingWriter::default())
            .unwrap();
        assert_eq!(fw.print_summary(), "C Compiler: gcc");
    }

    #[test]
    fn test_update_dependencies_adds_late_requirements() {
        let scripts = vec![
            ModuleScript::new("config.compilers"),
            ModuleScript::new("config.libraries").late_depends_on("config.compilers"),
        ];
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Serial);
        let libraries = fw.get_child("config.libraries").unwrap();
        assert_eq!(fw.module_names().len(), 1);

        fw.update_dependencies().unwrap();

        let compilers = fw.id_of("config.compilers").unwrap();
        assert_eq!(fw.graph().in_edges(libraries), &[compilers]);
    }

    #[test]
    fn test_module_header_prefix_overrides_the_run_prefix() {
        let scripts = vec![
            ModuleScript::new("config.compilers").define("HAVE_CC", "1"),
            ModuleScript::new("config.packages.mpi")
                .depends_on("config.compilers")
                .header_prefix("MPI")
                .define("HAVE_MPI_INIT", "1"),
        ];
        let journal = Journal::new();
        let mut fw = framework(&scripts, &journal, Strategy::Serial);
        fw.get_child("config.packages.mpi").unwrap();
        let writer = RecordingWriter::default();
        fw.configure(&CountingExecutor::passing(), &writer).unwrap();

        let artifacts = fw.aggregate().unwrap();
        let mpi = artifacts
            .modules
            .iter()
            .find(|m| m.name == "config.packages.mpi")
            .unwrap();
        assert_eq!(mpi.define_prefix, "MPI");
        let defines = writer.artifacts()[0].defines();
        assert!(defines.contains_key("PETSC_HAVE_CC"));
        assert!(defines.contains_key("MPI_HAVE_MPI_INIT"));
        assert!(!defines.contains_key("PETSC_HAVE_MPI_INIT"));
    }

    #[test]
    fn test_parallel_rerun_executes_only_the_invalidated_module() {
        let scripts = || {
            vec![
                ModuleScript::new("cc").reads_no_options().probes(1),
                ModuleScript::new("zlib")
                    .depends_on("cc")
                    .reads_no_options()
                    .probes(1),
                ModuleScript::new("math")
                    .depends_on("cc")
                    .reads_option("with-math")
                    .probes(1),
            ]
        };
        let run = |options: Options, strategy: Strategy, cache_dir: &std::path::Path| {
            let journal = Journal::new();
            let mut fw = Framework::new(
                scripted_catalog(&scripts(), &journal),
                options,
                FrameworkSettings {
                    strategy,
                    ..Default::default()
                },
            )
            .with_cache(ResultCache::open(cache_dir, DEFAULT_ARCH));
            fw.get_child("zlib").unwrap();
            fw.get_child("math").unwrap();
            let executor = CountingExecutor::passing();
            let outcome = fw
                .configure(&executor, &RecordingWriter::default())
                .unwrap();
            let ConfigureOutcome::Completed(report) = outcome else {
                panic!("expected a completed run");
            };
            (report, executor.calls(), journal.started())
        };

        for workers in [1, 4] {
            let cache_dir = tempdir().unwrap();
            let (_, calls, _) = run(Options::new(), Strategy::Serial, cache_dir.path());
            assert_eq!(calls, 3);

            let mut options = Options::new();
            options.set("with-math", "m");
            let (report, calls, started) =
                run(options, Strategy::Parallel { workers }, cache_dir.path());

            let mut reused = report.reused.clone();
            reused.sort();
            assert_eq!(reused, vec!["cc", "zlib"], "workers = {}", workers);
            assert_eq!(report.executed, vec!["math"], "workers = {}", workers);
            assert_eq!(started, vec!["math"], "workers = {}", workers);
            assert_eq!(calls, 1, "workers = {}", workers);
        }
    }
}
