//! Canned workloads used by the `retainer` binary and the integration tests.
//!
//! [`run_scenario`] walks through the basic defer-then-sweep sequence on one
//! thread. [`run_stress`] drives randomized retain, release and deferred
//! release traffic from several threads against a shared set of objects and
//! checks afterwards that no object was finalized early or twice.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use retainer_core::{LifetimeError, ObjectRef, Registry, RegistryStats};
use retainer_pool::{DeferredRelease, PoolHandle, ThreadContext};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span};

/// Result type alias for simulations.
pub type SimulationResult<T> = Result<T, SimulationError>;

/// Failures detected while running a simulation.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// A lifetime operation reported a violation.
    #[error("Lifetime violation: {0}")]
    Lifetime(#[from] LifetimeError),

    /// The workload finished but an expected invariant does not hold.
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    /// A worker thread panicked.
    #[error("Worker thread {0} panicked")]
    WorkerPanicked(usize),
}

impl SimulationError {
    fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolated(message.into())
    }
}

/// Observations from [`run_scenario`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Count right after creation.
    pub count_after_create: usize,
    /// Count after the deferred release, before the sweep.
    pub count_after_defer: usize,
    /// Whether the payload was still readable after deferral.
    pub usable_after_defer: bool,
    /// Hook invocations observed after the pool was destroyed.
    pub hook_invocations: usize,
    /// Count after the sweep.
    pub count_after_sweep: usize,
}

/// Creates an object, defers its release into a fresh pool, and destroys the pool.
pub fn run_scenario(registry: &Registry) -> SimulationResult<ScenarioReport> {
    let _span = info_span!("scenario").entered();
    let mut context = ThreadContext::new(registry);

    let fired = Arc::new(AtomicUsize::new(0));
    let hook_fired = Arc::clone(&fired);
    let object = registry.create_with_hook(String::from("O"), move |name| {
        info!(object = %name, "release hook fired");
        hook_fired.fetch_add(1, Ordering::SeqCst);
    });
    let count_after_create = object.retain_count();
    info!(id = %object.id(), count = count_after_create, "created");

    let pool = context.push_pool();
    info!(pool = %pool, "pushed pool");

    object.release_deferred(&mut context)?;
    let count_after_defer = object.retain_count();
    let usable_after_defer = object.payload().map(|name| name == "O").unwrap_or(false);
    info!(count = count_after_defer, usable = usable_after_defer, "deferred release");

    let report = context.destroy_pool(pool)?;
    info!(
        pools = report.pools_destroyed(),
        finalized = report.objects_finalized(),
        "destroyed pool"
    );

    Ok(ScenarioReport {
        count_after_create,
        count_after_defer,
        usable_after_defer,
        hook_invocations: fired.load(Ordering::SeqCst),
        count_after_sweep: object.retain_count(),
    })
}

/// Parameters for [`run_stress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressOptions {
    /// Worker threads, each with its own context.
    pub threads: usize,
    /// Operations per worker.
    pub iterations: usize,
    /// Shared objects the workers operate on.
    pub objects: usize,
    /// Base seed; worker `i` uses `seed + i`, wrapping.
    pub seed: u64,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 10_000,
            objects: 8,
            seed: 0,
        }
    }
}

/// Outcome of [`run_stress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressReport {
    /// Options the run used.
    pub options: StressOptions,
    /// Immediate retains issued.
    pub retains: usize,
    /// Immediate releases issued.
    pub releases: usize,
    /// Deferred releases issued.
    pub deferred: usize,
    /// Pools pushed, including each worker's base pool.
    pub pools_pushed: usize,
    /// Registry counters once every object was released.
    pub stats: RegistryStats,
}

#[derive(Debug, Default)]
struct WorkerTally {
    retains: usize,
    releases: usize,
    deferred: usize,
    pools_pushed: usize,
}

/// Runs randomized concurrent traffic and verifies the lifetime invariants.
pub fn run_stress(registry: &Registry, options: StressOptions) -> SimulationResult<StressReport> {
    let _span = info_span!(
        "stress",
        threads = options.threads,
        iterations = options.iterations
    )
    .entered();

    let hooks: Vec<Arc<AtomicUsize>> = (0..options.objects)
        .map(|_| Arc::new(AtomicUsize::new(0)))
        .collect();
    let objects: Vec<ObjectRef<usize>> = hooks
        .iter()
        .enumerate()
        .map(|(index, fired)| {
            let fired = Arc::clone(fired);
            registry.create_with_hook(index, move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let tallies = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..options.threads)
            .map(|worker| {
                let objects = &objects;
                let seed = options.seed.wrapping_add(worker as u64);
                scope.spawn(move || stress_worker(registry, objects, options.iterations, seed))
            })
            .collect();

        workers
            .into_iter()
            .enumerate()
            .map(|(worker, handle)| {
                handle
                    .join()
                    .map_err(|_| SimulationError::WorkerPanicked(worker))?
            })
            .collect::<SimulationResult<Vec<WorkerTally>>>()
    })?;

    for (object, fired) in objects.iter().zip(&hooks) {
        if object.retain_count() != 1 || fired.load(Ordering::SeqCst) != 0 {
            return Err(SimulationError::invariant(format!(
                "{} ended with count {} and {} hook call(s) before its final release",
                object.id(),
                object.retain_count(),
                fired.load(Ordering::SeqCst)
            )));
        }
        object.release()?;
    }

    if let Some((object, _)) = objects
        .iter()
        .zip(&hooks)
        .find(|(_, fired)| fired.load(Ordering::SeqCst) != 1)
    {
        return Err(SimulationError::invariant(format!(
            "{} was not finalized exactly once",
            object.id()
        )));
    }

    let mut report = StressReport {
        options,
        retains: 0,
        releases: 0,
        deferred: 0,
        pools_pushed: 0,
        stats: registry.stats(),
    };
    for tally in tallies {
        report.retains += tally.retains;
        report.releases += tally.releases;
        report.deferred += tally.deferred;
        report.pools_pushed += tally.pools_pushed;
    }
    info!(
        retains = report.retains,
        releases = report.releases,
        deferred = report.deferred,
        "stress run complete"
    );
    Ok(report)
}

fn stress_worker(
    registry: &Registry,
    objects: &[ObjectRef<usize>],
    iterations: usize,
    seed: u64,
) -> SimulationResult<WorkerTally> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut context = ThreadContext::new(registry);
    let mut tally = WorkerTally::default();
    let mut held = vec![0usize; objects.len()];
    let mut nested: Vec<PoolHandle> = Vec::new();

    let base = context.push_pool();
    tally.pools_pushed += 1;

    if objects.is_empty() {
        context.destroy_pool(base)?;
        return Ok(tally);
    }

    for _ in 0..iterations {
        let index = rng.gen_range(0..objects.len());
        let object = &objects[index];
        match rng.gen_range(0..10) {
            0..=3 => {
                object.retain()?;
                held[index] += 1;
                tally.retains += 1;
            }
            4..=6 if held[index] > 0 => {
                object.release()?;
                held[index] -= 1;
                tally.releases += 1;
            }
            4..=6 => {
                object.retain()?.release_deferred(&mut context)?;
                tally.retains += 1;
                tally.deferred += 1;
            }
            7 if held[index] > 0 => {
                object.release_deferred(&mut context)?;
                held[index] -= 1;
                tally.deferred += 1;
            }
            7 | 8 => {
                nested.push(context.push_pool());
                tally.pools_pushed += 1;
            }
            _ => {
                // Occasionally drop a pool that is not on top, cascading over the rest.
                if !nested.is_empty() {
                    let at = rng.gen_range(0..nested.len());
                    let pool = nested[at];
                    nested.truncate(at);
                    let report = context.destroy_pool(pool)?;
                    debug!(pools = report.pools_destroyed(), "cascaded destroy");
                }
            }
        }
    }

    for (object, count) in objects.iter().zip(&held) {
        for _ in 0..*count {
            object.release()?;
        }
    }
    while let Some(pool) = nested.pop() {
        context.destroy_pool(pool)?;
    }
    context.destroy_pool(base)?;

    if !context.stack().is_empty() {
        return Err(SimulationError::invariant("pool stack not empty after destroying base pool"));
    }
    Ok(tally)
}
