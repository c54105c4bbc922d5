// src/core/engine.rs

//! # Execution Engine
//!
//! Runs every unconfigured module once, never before all of its dependencies
//! have been configured. Two strategies share that guarantee: a serial walk of
//! the topological order, and a bounded worker pool fed by a coordinator.

use crate::core::framework::{FrameworkError, ModuleSlot};
use crate::core::graph::DependencyGraph;
use crate::core::module::{ConfigModule, ModuleError, ModuleId, ProbeContext, RunResources};
use log::{debug, error, info};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

/// How modules are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One module at a time, in topological order.
    #[default]
    Serial,
    /// At most `workers` modules at a time.
    Parallel { workers: usize },
}

impl Strategy {
    /// `jobs <= 1` runs serially.
    pub fn from_jobs(jobs: usize) -> Self {
        if jobs <= 1 {
            Self::Serial
        } else {
            Self::Parallel { workers: jobs }
        }
    }
}

/// What happened to each module during execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Modules whose probes ran, in completion order.
    pub executed: Vec<String>,
    /// Modules that were already configured (restored from the cache).
    pub reused: Vec<String>,
}

/// A module that finished on a worker, travelling back to the coordinator.
struct Done {
    id: ModuleId,
    module: Box<dyn ConfigModule>,
    result: Result<(), FrameworkError>,
}

pub(crate) fn execute(
    strategy: Strategy,
    graph: &DependencyGraph<ModuleId>,
    slots: &mut [ModuleSlot],
    resources: &RunResources<'_>,
) -> Result<RunReport, FrameworkError> {
    let order = graph.topological_sort().map_err(|cycle| FrameworkError::Cycle {
        modules: cycle
            .members
            .iter()
            .map(|&id| slot_name(slots, id))
            .collect(),
    })?;

    // Facts of modules restored from the cache are visible from the start.
    for slot_id in &order {
        let Some(slot) = slots.get(slot_id.index()) else { continue };
        if slot.configured {
            if let Some(module) = &slot.module {
                resources.facts.publish(*slot_id, module.facts().clone());
            }
        }
    }

    match strategy {
        Strategy::Serial => execute_serial(&order, slots, resources),
        Strategy::Parallel { workers: 0 } => Err(FrameworkError::InvalidWorkerCount),
        Strategy::Parallel { workers } => execute_parallel(workers, graph, &order, slots, resources),
    }
}

fn execute_serial(
    order: &[ModuleId],
    slots: &mut [ModuleSlot],
    resources: &RunResources<'_>,
) -> Result<RunReport, FrameworkError> {
    let mut report = RunReport::default();
    for &id in order {
        let slot = slot_mut(slots, id)?;
        if slot.configured {
            debug!("Skipping '{}': already configured", slot.name);
            report.reused.push(slot.name.clone());
            continue;
        }
        let mut module = take_module(slot)?;
        let result = run_module(id, module.as_mut(), resources);
        if result.is_ok() {
            resources.facts.publish(id, module.facts().clone());
            slot.configured = true;
            report.executed.push(slot.name.clone());
        }
        slot.module = Some(module);
        result?;
    }
    Ok(report)
}

fn execute_parallel(
    workers: usize,
    graph: &DependencyGraph<ModuleId>,
    order: &[ModuleId],
    slots: &mut [ModuleSlot],
    resources: &RunResources<'_>,
) -> Result<RunReport, FrameworkError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("confgraph-worker-{}", i))
        .build()
        .map_err(|e| FrameworkError::WorkerPool(e.to_string()))?;
    info!("Configuring with {} workers", workers);

    let (done_tx, done_rx) = crossbeam::channel::unbounded::<Done>();
    let mut report = RunReport::default();
    let mut failure: Option<FrameworkError> = None;

    // Number of dependencies of each module that have not completed yet.
    let mut waiting_on: HashMap<ModuleId, usize> = order
        .iter()
        .map(|&id| (id, graph.in_edges(id).len()))
        .collect();
    let mut ready: VecDeque<ModuleId> = order
        .iter()
        .copied()
        .filter(|id| waiting_on.get(id) == Some(&0))
        .collect();
    let mut in_flight = 0usize;

    pool.in_place_scope(|scope| {
        loop {
            // Dispatch everything that is ready, unless the run is failing.
            while failure.is_none() {
                let Some(id) = ready.pop_front() else { break };
                let slot = match slot_mut(slots, id) {
                    Ok(slot) => slot,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                if slot.configured {
                    debug!("Skipping '{}': already configured", slot.name);
                    report.reused.push(slot.name.clone());
                    release_dependents(graph, id, &mut waiting_on, &mut ready);
                    continue;
                }
                let mut module = match take_module(slot) {
                    Ok(module) => module,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                let tx = done_tx.clone();
                in_flight += 1;
                scope.spawn(move |_| {
                    let result = run_module(id, module.as_mut(), resources);
                    // The coordinator outlives every worker; a send can only fail
                    // if it is already unwinding.
                    let _ = tx.send(Done { id, module, result });
                });
            }

            if in_flight == 0 {
                break;
            }
            let Ok(done) = done_rx.recv() else { break };
            in_flight -= 1;

            let Ok(slot) = slot_mut(slots, done.id) else { continue };
            match done.result {
                Ok(()) => {
                    resources.facts.publish(done.id, done.module.facts().clone());
                    slot.configured = true;
                    report.executed.push(slot.name.clone());
                    release_dependents(graph, done.id, &mut waiting_on, &mut ready);
                }
                Err(e) => {
                    if failure.is_none() {
                        error!("'{}' failed; waiting for {} running module(s)", slot.name, in_flight);
                        failure = Some(e);
                    } else {
                        error!("'{}' also failed after the run was aborted: {}", slot.name, e);
                    }
                }
            }
            slot.module = Some(done.module);
        }
    });

    if let Some(e) = failure {
        return Err(e);
    }
    let unfinished: Vec<String> = order
        .iter()
        .filter_map(|id| slots.get(id.index()))
        .filter(|slot| !slot.configured)
        .map(|slot| slot.name.clone())
        .collect();
    if !unfinished.is_empty() {
        return Err(FrameworkError::Internal(format!(
            "modules never became ready: {}",
            unfinished.join(", ")
        )));
    }
    Ok(report)
}

/// Marks `id` as complete for each of its dependents and queues those whose
/// dependencies are now all complete.
fn release_dependents(
    graph: &DependencyGraph<ModuleId>,
    id: ModuleId,
    waiting_on: &mut HashMap<ModuleId, usize>,
    ready: &mut VecDeque<ModuleId>,
) {
    for &dependent in graph.out_edges(id) {
        if let Some(count) = waiting_on.get_mut(&dependent) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                ready.push_back(dependent);
            }
        }
    }
}

fn slot_name(slots: &[ModuleSlot], id: ModuleId) -> String {
    slots
        .get(id.index())
        .map(|slot| slot.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn slot_mut(slots: &mut [ModuleSlot], id: ModuleId) -> Result<&mut ModuleSlot, FrameworkError> {
    slots
        .get_mut(id.index())
        .ok_or_else(|| FrameworkError::Internal(format!("no module with id {}", id)))
}

fn take_module(slot: &mut ModuleSlot) -> Result<Box<dyn ConfigModule>, FrameworkError> {
    slot.module.take().ok_or_else(|| {
        FrameworkError::Internal(format!("module '{}' is already running", slot.name))
    })
}

/// Runs one module's probe sequence, turning a panic into an internal error.
fn run_module(
    id: ModuleId,
    module: &mut dyn ConfigModule,
    resources: &RunResources<'_>,
) -> Result<(), FrameworkError> {
    let ctx = ProbeContext::new(id, resources);
    info!("Configuring '{}'", ctx.module_name());
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| module.run_probes(&ctx)))
        .unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(ModuleError::Internal(anyhow::anyhow!("module panicked: {}", message)))
        });
    outcome.map_err(|source| {
        if let ModuleError::Internal(e) = &source {
            error!("Internal error in '{}': {:?}", ctx.module_name(), e);
        }
        FrameworkError::ModuleFailed {
            module: ctx.module_name().to_string(),
            test: ctx.failed_test(),
            source,
        }
    })
}
