use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;
use threadpool::ThreadPool;

use crate::engine::{ensure_image, EngineClient, WaitOutcome};
use crate::plan::{Op, Plan};
use crate::report::Report;
use crate::structs::{ContainerState, ImageName};
use crate::{ErrorKind, Result, ResultExt};

/// How a plan should be executed
pub struct RunOptions {
    /// Predict outcomes without mutating the engine
    pub dry_run: bool,
    /// Bounded fan-out for image pulls
    pub pull_workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            dry_run: false,
            pull_workers: 4,
        }
    }
}

/// Execute a plan against the engine
///
/// Images are ensured up front with bounded parallelism (pulls of the same
/// reference are de-duplicated); everything else runs sequentially in plan
/// order. Errors abort at the failing action with no rollback; re-running
/// converges from wherever this run stopped. The cancellation flag is
/// honored between actions and surfaces as `Canceled`.
pub fn execute(
    engine: Arc<dyn EngineClient>,
    plan: &Plan,
    manifest_hash: &str,
    opts: &RunOptions,
    cancel: &AtomicBool,
) -> Result<Report> {
    let pulled = if opts.dry_run {
        predict_pulls(&*engine, plan)?
    } else {
        prefetch_images(engine.clone(), plan, opts.pull_workers, cancel)?
    };

    let mut report = Report::default();
    // ids of containers created in this run, for the wait windows
    let mut created: BTreeMap<String, String> = BTreeMap::new();

    for action in &plan.actions {
        if cancel.load(Ordering::SeqCst) {
            warn!("Cancellation requested, aborting plan");
            bail!(ErrorKind::Canceled);
        }
        let changed = match &action.op {
            Op::NoAction => {
                debug!("{}", action);
                false
            }
            Op::EnsureImage(image) => pulled[&image.canonical()],
            Op::Remove { id, kill_timeout } => {
                info!("Removing {} ({})", action.target, action.reason);
                if !opts.dry_run {
                    engine
                        .remove(id, *kill_timeout)
                        .chain_err(|| ErrorKind::EngineOperationFailed("remove".into(), action.target.clone()))?;
                }
                true
            }
            Op::Stop { id, kill_timeout } => {
                info!("Stopping {}", action.target);
                if !opts.dry_run {
                    engine
                        .stop(id, *kill_timeout)
                        .chain_err(|| ErrorKind::EngineOperationFailed("stop".into(), action.target.clone()))?;
                }
                true
            }
            Op::Start { id } => {
                info!("Starting {}", action.target);
                if !opts.dry_run {
                    engine
                        .restart(id)
                        .chain_err(|| ErrorKind::EngineOperationFailed("start".into(), action.target.clone()))?;
                }
                true
            }
            Op::Create(c) => {
                info!("Creating {} ({})", action.target, action.reason);
                if !opts.dry_run {
                    let id = engine
                        .create(c, manifest_hash)
                        .chain_err(|| ErrorKind::EngineOperationFailed("create".into(), action.target.clone()))?;
                    if c.state == ContainerState::Running {
                        engine
                            .start(&id, c)
                            .chain_err(|| ErrorKind::EngineOperationFailed("start".into(), action.target.clone()))?;
                    }
                    created.insert(action.target.clone(), id);
                }
                true
            }
            Op::WaitFor { window } => {
                if !opts.dry_run {
                    // only containers created by this very run are observed
                    if let Some(id) = created.get(&action.target) {
                        observe(&*engine, id, &action.target, *window)?;
                    }
                }
                false
            }
        };
        report.push(action, changed);
    }

    if plan.is_converged() {
        info!("Converged, nothing to do");
    } else if opts.dry_run {
        info!("Dry run: {} changes planned", report.changed());
    } else {
        info!("Applied {} changes", report.changed());
    }
    Ok(report)
}

// Ensure every image the plan needs, in parallel, before any create runs.
// In-flight de-duplication is keyed on the full image reference.
fn prefetch_images(
    engine: Arc<dyn EngineClient>,
    plan: &Plan,
    workers: usize,
    cancel: &AtomicBool,
) -> Result<BTreeMap<String, bool>> {
    let mut images: BTreeMap<String, ImageName> = BTreeMap::new();
    for action in &plan.actions {
        if let Op::EnsureImage(image) = &action.op {
            images.entry(image.canonical()).or_insert_with(|| image.clone());
        }
    }
    let mut pulled = BTreeMap::new();
    if images.is_empty() {
        return Ok(pulled);
    }
    if cancel.load(Ordering::SeqCst) {
        bail!(ErrorKind::Canceled);
    }

    let n_jobs = images.len();
    let pool = ThreadPool::new(workers.max(1).min(n_jobs));
    debug!("Ensuring {} images using {} workers", n_jobs, pool.max_count());

    let (tx, rx) = channel();
    for (key, image) in images {
        let tx = tx.clone();
        let engine = engine.clone();
        pool.execute(move || {
            let res = ensure_image(&*engine, &image);
            tx.send((key, image, res))
                .expect("channel will be there waiting for the pool");
        });
    }

    let mut failures: BTreeMap<String, crate::Error> = BTreeMap::new();
    for (key, image, res) in rx.iter().take(n_jobs) {
        match res {
            Ok(changed) => {
                pulled.insert(key, changed);
            }
            Err(e) => {
                error!("Failed to pull {}: {}", image, e);
                failures.insert(key, e);
            }
        }
    }

    // surface the earliest failure in plan order
    for action in &plan.actions {
        if let Op::EnsureImage(image) = &action.op {
            if let Some(e) = failures.remove(&image.canonical()) {
                return Err(e).chain_err(|| ErrorKind::ImagePullFailed(image.to_string()));
            }
        }
    }
    Ok(pulled)
}

// Dry-run prediction: a pull would happen iff the image is absent
fn predict_pulls(engine: &dyn EngineClient, plan: &Plan) -> Result<BTreeMap<String, bool>> {
    let mut pulled = BTreeMap::new();
    for action in &plan.actions {
        if let Op::EnsureImage(image) = &action.op {
            if !pulled.contains_key(&image.canonical()) {
                pulled.insert(image.canonical(), !engine.has_image(image)?);
            }
        }
    }
    Ok(pulled)
}

fn observe(engine: &dyn EngineClient, id: &str, target: &str, window: Duration) -> Result<()> {
    debug!("Observing {} for {:?}", target, window);
    match engine.wait(id, window)? {
        WaitOutcome::Alive => Ok(()),
        WaitOutcome::Exited(0) => {
            debug!("{} exited cleanly within the wait window", target);
            Ok(())
        }
        WaitOutcome::Exited(code) => bail!(ErrorKind::WaitExitNonZero(target.to_string(), code)),
    }
}
