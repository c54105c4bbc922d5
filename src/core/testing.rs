// src/core/testing.rs

//! Test doubles: scripted modules, a counting probe executor and a recording
//! artifact writer.

use crate::core::artifacts::{ArtifactWriter, Artifacts};
use crate::core::batch::{BatchFragment, BatchProgram};
use crate::core::framework::FrameworkError;
use crate::core::module::{
    ConfigModule, Dependencies, ModuleCatalog, ModuleError, ModuleId, ProbeContext,
};
use crate::core::options::Options;
use crate::core::probe::{ProbeExecutor, ProbeFault, ProbeOutput, ProbeRequest};
use crate::models::{Facts, Language, LanguageConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// --- EXECUTOR ---

/// Answers every probe with a fixed result and counts the calls.
#[derive(Debug)]
pub struct CountingExecutor {
    calls: AtomicUsize,
    success: bool,
    stdout: String,
}

impl CountingExecutor {
    pub fn passing() -> Self {
        Self::with_stdout(true, "")
    }

    pub fn failing() -> Self {
        Self::with_stdout(false, "")
    }

    pub fn with_stdout(success: bool, stdout: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            success,
            stdout: stdout.to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<ProbeOutput, ProbeFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeOutput {
            success: self.success,
            stdout: self.stdout.clone(),
            stderr: String::new(),
        })
    }
}

impl ProbeExecutor for CountingExecutor {
    fn compile(&self, _request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.answer()
    }

    fn link(&self, _request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.answer()
    }

    fn run(&self, _request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.answer()
    }
}

/// Decides each probe with a closure over the request and records the calls.
pub struct ScriptedExecutor {
    decide: Box<dyn Fn(&str, &ProbeRequest) -> Result<ProbeOutput, ProbeFault> + Send + Sync>,
    log: Mutex<Vec<(String, ProbeRequest)>>,
}

impl ScriptedExecutor {
    /// `decide` receives the operation (`compile`, `link` or `run`) and the request.
    pub fn new(
        decide: impl Fn(&str, &ProbeRequest) -> Result<ProbeOutput, ProbeFault> + Send + Sync + 'static,
    ) -> Self {
        Self {
            decide: Box::new(decide),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, ProbeRequest)> {
        self.log.lock().unwrap().clone()
    }

    fn call(&self, operation: &str, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.log
            .lock()
            .unwrap()
            .push((operation.to_string(), request.clone()));
        (self.decide)(operation, request)
    }
}

impl ProbeExecutor for ScriptedExecutor {
    fn compile(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.call("compile", request)
    }

    fn link(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.call("link", request)
    }

    fn run(&self, request: &ProbeRequest) -> Result<ProbeOutput, ProbeFault> {
        self.call("run", request)
    }
}

// --- WRITER ---

/// Keeps everything it is asked to write.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    artifacts: Mutex<Vec<Artifacts>>,
    batch_programs: Mutex<Vec<BatchProgram>>,
}

impl RecordingWriter {
    pub fn artifacts(&self) -> Vec<Artifacts> {
        self.artifacts.lock().unwrap().clone()
    }

    pub fn batch_programs(&self) -> Vec<BatchProgram> {
        self.batch_programs.lock().unwrap().clone()
    }
}

impl ArtifactWriter for RecordingWriter {
    fn write(&self, artifacts: &Artifacts) -> anyhow::Result<()> {
        self.artifacts.lock().unwrap().push(artifacts.clone());
        Ok(())
    }

    fn write_batch_program(&self, program: &BatchProgram) -> anyhow::Result<PathBuf> {
        self.batch_programs.lock().unwrap().push(program.clone());
        Ok(PathBuf::from(&program.file_name))
    }
}

// --- SCRIPTED MODULES ---

/// Shared record of what scripted modules did.
#[derive(Debug, Default)]
pub struct Journal {
    declarations: Mutex<HashMap<String, usize>>,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn declarations(&self, name: &str) -> usize {
        self.declarations.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn start(&self, name: &str) {
        self.started.lock().unwrap().push(name.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
    }

    fn finish(&self, name: &str) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(name.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Succeed,
    Unsatisfied,
    Panic,
}

/// Describes a scripted module.
#[derive(Debug, Clone, Default)]
pub struct ModuleScript {
    name: String,
    dependencies: Vec<String>,
    late_dependencies: Vec<String>,
    defines: Vec<(String, String)>,
    /// `None` fingerprints every option.
    inputs: Option<Vec<String>>,
    probes: usize,
    sleep: Duration,
    outcome: Outcome,
    copy_upstream: bool,
    batch: bool,
    summary: Option<String>,
    header_prefix: Option<String>,
}

impl ModuleScript {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    /// Requested from `refresh_dependencies` instead of the declaration hook.
    pub fn late_depends_on(mut self, name: &str) -> Self {
        self.late_dependencies.push(name.to_string());
        self
    }

    pub fn define(mut self, name: &str, value: &str) -> Self {
        self.defines.push((name.to_string(), value.to_string()));
        self
    }

    pub fn reads_option(mut self, option: &str) -> Self {
        self.inputs.get_or_insert_with(Vec::new).push(option.to_string());
        self
    }

    pub fn reads_no_options(mut self) -> Self {
        self.inputs = Some(Vec::new());
        self
    }

    /// Number of compile probes issued.
    pub fn probes(mut self, count: usize) -> Self {
        self.probes = count;
        self
    }

    pub fn sleep_ms(mut self, millis: u64) -> Self {
        self.sleep = Duration::from_millis(millis);
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Copies every dependency define `X` as `UPSTREAM_X`.
    pub fn copy_upstream(mut self) -> Self {
        self.copy_upstream = true;
        self
    }

    /// Adds a batch fragment when the run is in batch mode.
    pub fn defers_to_batch(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn summary(mut self, line: &str) -> Self {
        self.summary = Some(line.to_string());
        self
    }

    /// Overrides the run's define prefix for this module.
    pub fn header_prefix(mut self, prefix: &str) -> Self {
        self.header_prefix = Some(prefix.to_string());
        self
    }
}

struct ScriptedModule {
    script: ModuleScript,
    journal: Arc<Journal>,
    dependency_ids: Vec<ModuleId>,
    facts: Facts,
}

impl ConfigModule for ScriptedModule {
    fn name(&self) -> &str {
        &self.script.name
    }

    fn declare_dependencies(&mut self, deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        *self
            .journal
            .declarations
            .lock()
            .unwrap()
            .entry(self.script.name.clone())
            .or_default() += 1;
        for name in &self.script.dependencies {
            self.dependency_ids.push(deps.require(name)?);
        }
        Ok(())
    }

    fn refresh_dependencies(&mut self, deps: &mut Dependencies<'_>) -> Result<(), FrameworkError> {
        for name in &self.script.late_dependencies {
            let id = deps.require(name)?;
            if !self.dependency_ids.contains(&id) {
                self.dependency_ids.push(id);
            }
        }
        Ok(())
    }

    fn run_probes(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError> {
        self.journal.start(&self.script.name);
        let result = self.probe_sequence(ctx);
        self.journal.finish(&self.script.name);
        result
    }

    fn facts(&self) -> &Facts {
        &self.facts
    }

    fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }

    fn fingerprint_inputs(&self, options: &Options) -> Vec<(String, String)> {
        match &self.script.inputs {
            None => options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Some(keys) => keys
                .iter()
                .map(|k| (k.clone(), options.get(k).unwrap_or_default().to_string()))
                .collect(),
        }
    }

    fn summary(&self) -> Option<String> {
        self.script.summary.clone()
    }

    fn header_prefix(&self) -> Option<&str> {
        self.script.header_prefix.as_deref()
    }
}

impl ScriptedModule {
    fn probe_sequence(&mut self, ctx: &ProbeContext<'_>) -> Result<(), ModuleError> {
        for id in &self.dependency_ids {
            let upstream = ctx.facts_of(*id)?;
            if self.script.copy_upstream {
                for (name, value) in &upstream.defines {
                    self.facts.add_define(format!("UPSTREAM_{}", name), value);
                }
            }
        }
        for i in 0..self.script.probes {
            ctx.execute_test(&format!("probe{}", i), || {
                let request = ctx.request(Language::C, &LanguageConfig::new("cc"), "", "");
                ctx.check_compile(&request)?;
                Ok(())
            })?;
        }
        if !self.script.sleep.is_zero() {
            std::thread::sleep(self.script.sleep);
        }
        if self.script.batch && ctx.batch_mode() {
            ctx.add_batch(BatchFragment::new(&self.script.name, "  ;"));
        }
        ctx.execute_test("checkOutcome", || match self.script.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Unsatisfied => Err(ModuleError::unsatisfied_with(
                format!("{} is not available", self.script.name),
                "Install it",
            )),
            Outcome::Panic => panic!("scripted panic in {}", self.script.name),
        })?;
        for (name, value) in &self.script.defines {
            self.facts.add_define(name.clone(), value);
        }
        Ok(())
    }
}

/// A catalog creating one scripted module per script.
pub fn scripted_catalog(scripts: &[ModuleScript], journal: &Arc<Journal>) -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    for script in scripts {
        let script = script.clone();
        let journal = Arc::clone(journal);
        catalog.register(script.name.clone(), move || {
            Box::new(ScriptedModule {
                script: script.clone(),
                journal: Arc::clone(&journal),
                dependency_ids: Vec::new(),
                facts: Facts::default(),
            }) as Box<dyn ConfigModule>
        });
    }
    catalog
}
