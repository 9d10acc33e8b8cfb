use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Template rendering for manifests
pub mod template;

use crate::deserializers::RelaxedString;
use crate::engine::EngineClient;
use crate::graph::PodGraph;
use crate::structs::{Container, ContainerName, ImageName, NetworkMode};
use crate::{ErrorKind, Result, ResultExt};

/// Variables available to the template stage
///
/// Collected from `--var` flags, `--vars` files and release artifacts, in
/// that order of increasing precedence.
pub type VariableBag = BTreeMap<String, String>;

/// Parse a `KEY=VALUE` command line variable
pub fn parse_var(s: &str) -> Result<(String, String)> {
    match s.find('=') {
        Some(ix) if ix > 0 => Ok((s[..ix].to_string(), s[ix + 1..].to_string())),
        _ => bail!("variable '{}' is not KEY=VALUE", s),
    }
}

/// Read a yaml mapping of variables from a file
pub fn load_vars_file(path: &Path) -> Result<VariableBag> {
    let mut data = String::new();
    File::open(path)
        .chain_err(|| format!("could not open vars file {}", path.display()))?
        .read_to_string(&mut data)?;
    parse_vars_doc(&data).chain_err(|| format!("bad vars file {}", path.display()))
}

/// Parse a yaml mapping of scalars into a variable bag
pub fn parse_vars_doc(data: &str) -> Result<VariableBag> {
    let raw: BTreeMap<String, RelaxedString> = serde_yaml::from_str(data)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.to_string())).collect())
}

/// A pod: a named group of containers declared together
///
/// The namespace is the pod's identity on the host; observed containers
/// belong to the pod iff their name carries the `namespace.` prefix.
///
/// ```yaml
/// namespace: web
/// containers:
///   nginx:
///     image: nginx:1.17
///     ports:
///     - 80:80
///     volumes_from:
///     - assets
///   assets:
///     image: registry.example.com/assets:2.1
///     state: created
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Namespace all containers of this pod live under
    pub namespace: String,

    /// The declared containers, keyed by short name
    #[serde(default)]
    pub containers: BTreeMap<String, Container>,

    /// The rendered manifest text this pod was parsed from
    ///
    /// Kept for informational output and for the manifest digest label.
    #[serde(skip)]
    pub rendered: String,
}

impl Manifest {
    /// Full pipeline: render, parse, normalize, validate
    pub fn from_raw(
        raw: &str,
        vars: &VariableBag,
        engine: Option<Arc<dyn EngineClient>>,
    ) -> Result<Manifest> {
        let rendered = template::render(raw, vars, engine)?;
        let mut mf = Manifest::parse(&rendered)?;
        mf.normalize()?;
        mf.validate()?;
        Ok(mf)
    }

    /// Load from a manifest file, or stdin when the path is `-`
    pub fn load(
        path: &Path,
        vars: &VariableBag,
        engine: Option<Arc<dyn EngineClient>>,
    ) -> Result<Manifest> {
        let mut raw = String::new();
        if path == Path::new("-") {
            std::io::stdin().read_to_string(&mut raw)?;
        } else {
            File::open(path)
                .chain_err(|| format!("could not open manifest {}", path.display()))?
                .read_to_string(&mut raw)?;
        }
        debug!("Loaded {} bytes of manifest", raw.len());
        Manifest::from_raw(&raw, vars, engine)
    }

    /// Decode rendered yaml; unknown keys are rejected
    pub fn parse(rendered: &str) -> Result<Manifest> {
        let mut mf: Manifest = serde_yaml::from_str(rendered)
            .map_err(|e| ErrorKind::ManifestParse(e.to_string()))?;
        mf.rendered = rendered.to_string();
        Ok(mf)
    }

    // Fill in names and default namespaces on every reference.
    fn normalize(&mut self) -> Result<()> {
        let ns = self.namespace.clone();
        for (key, c) in &mut self.containers {
            c.name = ContainerName::new(&ns, key);
            for v in &mut c.volumes_from {
                if v.namespace.is_empty() {
                    v.namespace = ns.clone();
                }
            }
            for l in &mut c.links {
                if l.target.namespace.is_empty() {
                    l.target.namespace = ns.clone();
                }
            }
            if let Some(NetworkMode::Container(ref mut n)) = c.net {
                if n.namespace.is_empty() {
                    n.namespace = ns.clone();
                }
            }
        }
        Ok(())
    }

    /// Enforce the structural invariants of a pod
    ///
    /// All violations are collected and reported together, each with a
    /// path into the document. Cyclic dependencies are reported as their
    /// own error kind once the structure is otherwise sound.
    pub fn validate(&self) -> Result<()> {
        let mut problems = vec![];
        // dns-ish sanity for the namespace; container keys likewise
        let re = Regex::new(r"^[0-9a-z][0-9a-z\-_]{0,29}$").unwrap();
        if !re.is_match(&self.namespace) {
            problems.push(format!(
                "namespace: '{}' must be short, lower case alphanumeric",
                self.namespace
            ));
        }
        if self.containers.is_empty() {
            problems.push("containers: at least one container is required".into());
        }

        let mut bindings: BTreeMap<(String, u16, crate::structs::Protocol), String> = BTreeMap::new();
        for (key, c) in &self.containers {
            let at = format!("containers.{}", key);
            if !re.is_match(key) {
                problems.push(format!("{}: name must be short, lower case alphanumeric", at));
            }
            if c.image.is_none() {
                problems.push(format!("{}.image: an image reference is required", at));
            }
            if let Err(e) = c.memory_bytes() {
                problems.push(format!("{}.memory: {}", at, e));
            }

            for (ix, v) in c.volumes_from.iter().enumerate() {
                self.check_member(v, &format!("{}.volumes_from[{}]", at, ix), &mut problems);
            }
            for (ix, l) in c.links.iter().enumerate() {
                self.check_member(&l.target, &format!("{}.links[{}]", at, ix), &mut problems);
            }

            if let Some(NetworkMode::Container(ref n)) = c.net {
                self.check_member(n, &format!("{}.net", at), &mut problems);
                // a shared network namespace leaves nothing to configure
                if !c.ports.is_empty() || !c.expose.is_empty() {
                    problems.push(format!("{}.ports: cannot publish ports with net: container:", at));
                }
                if !c.links.is_empty() {
                    problems.push(format!("{}.links: cannot link with net: container:", at));
                }
                if c.hostname.is_some() || c.domainname.is_some() {
                    problems.push(format!("{}.hostname: cannot set with net: container:", at));
                }
                if !c.dns.is_empty() {
                    problems.push(format!("{}.dns: cannot set with net: container:", at));
                }
            }

            for (ix, p) in c.ports.iter().enumerate() {
                if let Some(other) = bindings.insert(p.binding(), key.clone()) {
                    problems.push(format!(
                        "{}.ports[{}]: host port {} already published by {}",
                        at, ix, p.host_port, other
                    ));
                }
            }
        }

        if !problems.is_empty() {
            warn!("{} validation problems in pod {}", problems.len(), self.namespace);
            return Err(ErrorKind::ManifestValidation(problems.join("\n")).into());
        }

        // structure is sound, now reject reference cycles
        let members = self.members();
        let graph = PodGraph::build(&members)?;
        graph.verify_acyclic()?;
        Ok(())
    }

    fn check_member(&self, n: &ContainerName, at: &str, problems: &mut Vec<String>) {
        if n.namespace != self.namespace || !self.containers.contains_key(&n.name) {
            problems.push(format!("{}: {} is not a member of this pod", at, n));
        }
    }

    /// The declared containers in name order
    pub fn members(&self) -> Vec<Container> {
        self.containers.values().cloned().collect()
    }

    /// Distinct images referenced by the pod, in first-use order
    pub fn images(&self) -> Vec<ImageName> {
        let mut seen = std::collections::BTreeSet::new();
        let mut images = vec![];
        for c in self.containers.values() {
            if let Some(ref img) = c.image {
                if seen.insert(img.canonical()) {
                    images.push(img.clone());
                }
            }
        }
        images
    }

    /// Digest over the full rendered manifest, persisted as a label
    pub fn manifest_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.rendered.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Print the normalized pod to stdout
    pub fn print(&self) -> Result<()> {
        println!("{}", serde_yaml::to_string(self)?);
        Ok(())
    }
}
