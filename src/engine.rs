use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::structs::{Container, ContainerName, ImageName, RestartPolicy};
use crate::Result;

/// Labels persisted on every container this tool creates
///
/// They are the ground truth for ownership, equality and recovery; a
/// manifest is never consulted to interpret them.
pub mod labels {
    pub const NAMESPACE: &str = "pod.namespace";
    pub const NAME: &str = "pod.name";
    pub const HASH: &str = "pod.hash";
    pub const MANIFEST_HASH: &str = "pod.manifest-hash";
}

/// Engine-side view of a container
///
/// Lives only for the duration of a single diff/apply cycle.
#[derive(Clone, Debug, Default)]
pub struct ObservedContainer {
    pub id: String,
    pub name: ContainerName,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Restart policy the container was created with
    pub restart: RestartPolicy,
}

impl ObservedContainer {
    /// The identity digest stamped at create time, if we created it
    pub fn identity_digest(&self) -> Option<&String> {
        self.labels.get(labels::HASH)
    }
}

/// Outcome of observing a container for a bounded window
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Exited within the window with this code
    Exited(i64),
    /// Still running when the window closed
    Alive,
}

/// The capability the core needs from a container engine
///
/// Every method is blocking remote I/O and must be safe for concurrent
/// use; the concrete driver is wired at the boundary (see `docker`), and
/// tests substitute an in-memory fake.
pub trait EngineClient: Send + Sync {
    /// Observed containers whose name begins with `namespace.`
    fn list(&self, namespace: &str) -> Result<Vec<ObservedContainer>>;

    /// All containers carrying a `pod.namespace` label, any namespace
    fn list_all(&self) -> Result<Vec<ObservedContainer>>;

    /// Create without starting; returns the engine id
    ///
    /// The driver stamps the ownership labels: namespace, name, identity
    /// digest and the digest of the rendered manifest.
    fn create(&self, c: &Container, manifest_hash: &str) -> Result<String>;

    /// Start a freshly created container
    fn start(&self, id: &str, c: &Container) -> Result<()>;

    /// Start an existing container with its retained configuration
    fn restart(&self, id: &str) -> Result<()>;

    /// SIGTERM, wait up to the timeout, then SIGKILL
    fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Stop if running, then remove the container and anonymous volumes
    fn remove(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Observe for `window`; exit code if it exited, `Alive` otherwise
    fn wait(&self, id: &str, window: Duration) -> Result<WaitOutcome>;

    /// Idempotent pull, streaming progress
    fn pull_image(&self, image: &ImageName) -> Result<()>;

    fn has_image(&self, image: &ImageName) -> Result<bool>;

    /// Locally present tags for a repository
    fn list_tags(&self, registry: Option<&str>, repository: &str) -> Result<Vec<String>>;

    fn remove_image(&self, image: &ImageName) -> Result<()>;

    fn inspect(&self, id: &str) -> Result<ObservedContainer>;

    /// Gateway address of the engine bridge network
    fn bridge_ip(&self) -> Result<String>;
}

/// Pull an image unless it is already present locally
///
/// Returns whether a pull actually happened.
pub fn ensure_image(engine: &dyn EngineClient, image: &ImageName) -> Result<bool> {
    if engine.has_image(image)? {
        debug!("{} already present", image);
        return Ok(false);
    }
    info!("Pulling {}", image);
    engine.pull_image(image)?;
    Ok(true)
}

/// Start previously managed containers after a host or engine restart
///
/// Scans for the ownership label and starts stopped containers whose
/// persisted restart policy would restart them. Containers declared with
/// `restart: no` stay down; a `run` resurrects them if wanted.
pub fn recover(engine: &dyn EngineClient) -> Result<Vec<ContainerName>> {
    let mut started = vec![];
    let mut all = engine.list_all()?;
    all.sort_by(|a, b| a.name.cmp(&b.name));
    for c in all {
        if !c.labels.contains_key(labels::NAMESPACE) {
            continue;
        }
        if c.running {
            trace!("{} already running", c.name);
            continue;
        }
        if c.restart == RestartPolicy::No {
            debug!("{} stopped but not restartable, leaving", c.name);
            continue;
        }
        info!("Recovering {}", c.name);
        engine.restart(&c.id)?;
        started.push(c.name);
    }
    Ok(started)
}
