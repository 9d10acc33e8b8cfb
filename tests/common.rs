extern crate podcat;

use podcat::engine::{labels, EngineClient, ObservedContainer, WaitOutcome};
use podcat::manifest::Manifest;
use podcat::report::Report;
use podcat::runner::{self, RunOptions};
use podcat::structs::{Container, ContainerName, ImageName, RestartPolicy};
use podcat::{diff, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory engine for exercising the differ and runner end to end
#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<FakeState>,
}

#[derive(Default)]
pub struct FakeState {
    pub containers: BTreeMap<String, ObservedContainer>,
    /// canonical references present locally
    pub images: BTreeSet<String>,
    /// local tags per registry-qualified repository
    pub tags: BTreeMap<String, Vec<String>>,
    /// canonical references whose pulls should fail
    pub fail_pulls: BTreeSet<String>,
    /// exit codes reported by `wait`, keyed by full container name
    pub exit_codes: BTreeMap<String, i64>,
    /// every mutating call in order, for ordering assertions
    pub ops: Vec<String>,
    next_id: u64,
}

impl FakeEngine {
    pub fn shared() -> Arc<FakeEngine> {
        Arc::new(FakeEngine::default())
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        let st = self.state.lock().unwrap();
        st.containers.values().map(|c| c.name.to_string()).collect()
    }

    pub fn running(&self, name: &str) -> bool {
        let st = self.state.lock().unwrap();
        st.containers
            .values()
            .any(|c| c.name.to_string() == name && c.running)
    }

    pub fn seed_image(&self, reference: &str) {
        let img = ImageName::parse(reference).unwrap();
        let mut st = self.state.lock().unwrap();
        st.images.insert(img.canonical());
        st.tags
            .entry(img.repo())
            .or_insert_with(Vec::new)
            .push(img.tag_or_latest());
    }

    pub fn seed_container(&self, ns: &str, name: &str, running: bool, restart: RestartPolicy) {
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = format!("id-{}", st.next_id);
        let mut lbls = BTreeMap::new();
        lbls.insert(labels::NAMESPACE.to_string(), ns.to_string());
        lbls.insert(labels::NAME.to_string(), name.to_string());
        st.containers.insert(
            id.clone(),
            ObservedContainer {
                id,
                name: ContainerName::new(ns, name),
                image: "busybox:latest".into(),
                labels: lbls,
                running,
                exit_code: if running { None } else { Some(0) },
                started_at: None,
                finished_at: None,
                restart,
            },
        );
    }
}

impl EngineClient for FakeEngine {
    fn list(&self, namespace: &str) -> Result<Vec<ObservedContainer>> {
        let st = self.state.lock().unwrap();
        let mut found: Vec<ObservedContainer> = st
            .containers
            .values()
            .filter(|c| c.labels.get(labels::NAMESPACE).map(String::as_str) == Some(namespace))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    fn list_all(&self) -> Result<Vec<ObservedContainer>> {
        let st = self.state.lock().unwrap();
        let mut found: Vec<ObservedContainer> = st
            .containers
            .values()
            .filter(|c| c.labels.contains_key(labels::NAMESPACE))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    fn create(&self, c: &Container, manifest_hash: &str) -> Result<String> {
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = format!("id-{}", st.next_id);
        let mut lbls = c.labels.clone();
        lbls.insert(labels::NAMESPACE.to_string(), c.name.namespace.clone());
        lbls.insert(labels::NAME.to_string(), c.name.name.clone());
        lbls.insert(labels::HASH.to_string(), c.identity_digest());
        lbls.insert(labels::MANIFEST_HASH.to_string(), manifest_hash.to_string());
        st.containers.insert(
            id.clone(),
            ObservedContainer {
                id: id.clone(),
                name: c.name.clone(),
                image: c.image().canonical(),
                labels: lbls,
                running: false,
                exit_code: None,
                started_at: None,
                finished_at: None,
                restart: c.restart.clone(),
            },
        );
        st.ops.push(format!("create {}", c.name));
        Ok(id)
    }

    fn start(&self, id: &str, c: &Container) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        match st.containers.get_mut(id) {
            Some(o) => o.running = true,
            None => panic!("start of unknown id {}", id),
        }
        st.ops.push(format!("start {}", c.name));
        Ok(())
    }

    fn restart(&self, id: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let name = match st.containers.get_mut(id) {
            Some(o) => {
                o.running = true;
                o.name.to_string()
            }
            None => panic!("restart of unknown id {}", id),
        };
        st.ops.push(format!("restart {}", name));
        Ok(())
    }

    fn stop(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let name = match st.containers.get_mut(id) {
            Some(o) => {
                o.running = false;
                o.exit_code = Some(0);
                o.name.to_string()
            }
            None => panic!("stop of unknown id {}", id),
        };
        st.ops.push(format!("stop {}", name));
        Ok(())
    }

    fn remove(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let gone = st.containers.remove(id).unwrap_or_else(|| panic!("remove of unknown id {}", id));
        st.ops.push(format!("remove {}", gone.name));
        Ok(())
    }

    fn wait(&self, id: &str, _window: Duration) -> Result<WaitOutcome> {
        let mut st = self.state.lock().unwrap();
        let name = st.containers[id].name.to_string();
        match st.exit_codes.get(&name).cloned() {
            Some(code) => {
                if let Some(o) = st.containers.get_mut(id) {
                    o.running = false;
                    o.exit_code = Some(code);
                }
                Ok(WaitOutcome::Exited(code))
            }
            None => Ok(WaitOutcome::Alive),
        }
    }

    fn pull_image(&self, image: &ImageName) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_pulls.contains(&image.canonical()) {
            return Err(format!("registry refused {}", image).into());
        }
        st.images.insert(image.canonical());
        st.tags
            .entry(image.repo())
            .or_insert_with(Vec::new)
            .push(image.tag_or_latest());
        st.ops.push(format!("pull {}", image.canonical()));
        Ok(())
    }

    fn has_image(&self, image: &ImageName) -> Result<bool> {
        Ok(self.state.lock().unwrap().images.contains(&image.canonical()))
    }

    fn list_tags(&self, registry: Option<&str>, repository: &str) -> Result<Vec<String>> {
        let repo = match registry {
            Some(r) => format!("{}/{}", r, repository),
            None => repository.to_string(),
        };
        let st = self.state.lock().unwrap();
        Ok(st.tags.get(&repo).cloned().unwrap_or_default())
    }

    fn remove_image(&self, image: &ImageName) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.images.remove(&image.canonical());
        let tag = image.tag_or_latest();
        if let Some(tags) = st.tags.get_mut(&image.repo()) {
            tags.retain(|t| *t != tag);
        }
        st.ops.push(format!("rmi {}", image.canonical()));
        Ok(())
    }

    fn inspect(&self, id: &str) -> Result<ObservedContainer> {
        Ok(self.state.lock().unwrap().containers[id].clone())
    }

    fn bridge_ip(&self) -> Result<String> {
        Ok("172.17.0.1".into())
    }
}

/// Load a manifest fixture through the full pipeline
pub fn manifest(yml: &str) -> Manifest {
    Manifest::from_raw(yml, &BTreeMap::new(), None).unwrap()
}

/// Plan against the engine's current state and execute, serially
pub fn converge(engine: &Arc<FakeEngine>, mf: &Manifest) -> Result<Report> {
    converge_with(engine, mf, Duration::from_secs(0), false)
}

pub fn converge_with(
    engine: &Arc<FakeEngine>,
    mf: &Manifest,
    wait: Duration,
    dry_run: bool,
) -> Result<Report> {
    let observed = engine.list(&mf.namespace)?;
    let plan = diff::diff(&mf.members(), &observed, wait)?;
    let opts = RunOptions {
        dry_run,
        pull_workers: 2,
    };
    let cancel = AtomicBool::new(false);
    runner::execute(
        engine.clone() as Arc<dyn EngineClient>,
        &plan,
        &mf.manifest_digest(),
        &opts,
        &cancel,
    )
}
