use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::{ContainerName, EnvVars, ExposedPort, ImageName, LinkRef, PortMapping, RestartPolicy, VolumeMount};
use crate::deserializers;
use super::Result;

/// Desired lifecycle state of a container
///
/// ```yaml
/// state: created
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Created,
}

impl Default for ContainerState {
    fn default() -> Self {
        ContainerState::Running
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Created => write!(f, "created"),
        }
    }
}

/// Networking mode for a container
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkMode {
    Bridge,
    Host,
    None,
    /// Share the network namespace of another container in the pod
    Container(ContainerName),
}

impl Default for NetworkMode {
    fn default() -> Self {
        NetworkMode::Bridge
    }
}

impl NetworkMode {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "bridge" => NetworkMode::Bridge,
            "host" => NetworkMode::Host,
            "none" => NetworkMode::None,
            other => {
                if let Some(rest) = other.strip_prefix("container:") {
                    NetworkMode::Container(ContainerName::parse(rest, "")?)
                } else {
                    bail!("unknown net mode '{}'", s)
                }
            }
        })
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Bridge => write!(f, "bridge"),
            NetworkMode::Host => write!(f, "host"),
            NetworkMode::None => write!(f, "none"),
            NetworkMode::Container(n) => write!(f, "container:{}", n),
        }
    }
}

impl Serialize for NetworkMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NetworkMode {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<NetworkMode, D::Error> {
        let s = String::deserialize(deserializer)?;
        NetworkMode::parse(&s).map_err(D::Error::custom)
    }
}

/// A declared container within a pod
///
/// All fields mirror the manifest syntax; shorthand forms are coerced at
/// deserialization time and namespaces are defaulted during normalization.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Container {
    /// Full name of the container, filled in from the containers map key
    #[serde(skip)]
    pub name: ContainerName,

    /// Image reference to run
    ///
    /// ```yaml
    /// image: registry.example.com:5000/team/app:1.2.3
    /// ```
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageName>,

    /// Command to run in the image
    ///
    /// A bare string is split on whitespace.
    ///
    /// ```yaml
    /// cmd: ["bundle", "exec", "rake", "jobs:work"]
    /// ```
    #[serde(deserialize_with = "deserializers::string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    /// Entrypoint override
    #[serde(deserialize_with = "deserializers::string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    /// Environment variables, map or `KEY=VALUE` list form
    #[serde(skip_serializing_if = "EnvVars::is_empty")]
    pub env: EnvVars,

    /// Free-form labels applied to the container
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Ports published on the host
    ///
    /// ```yaml
    /// ports:
    /// - 8080:80
    /// - 127.0.0.1:5300:53/udp
    /// ```
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,

    /// Ports exposed to linked containers without publishing
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<ExposedPort>,

    /// Volumes to mount
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,

    /// Mount all volumes of other pod members
    ///
    /// ```yaml
    /// volumes_from:
    /// - data
    /// ```
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<ContainerName>,

    /// Links to other pod members, with optional aliases
    ///
    /// ```yaml
    /// links:
    /// - db
    /// - statsd:metrics
    /// ```
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkRef>,

    /// Network mode: `bridge` (default), `host`, `none` or `container:<ref>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<NetworkMode>,

    /// Engine restart policy
    pub restart: RestartPolicy,

    /// Desired state, `running` unless declared otherwise
    pub state: ContainerState,

    /// Grace period between SIGTERM and SIGKILL on removal
    ///
    /// ```yaml
    /// kill_timeout: 30s
    /// ```
    #[serde(deserialize_with = "deserializers::relaxed_duration_opt", skip_serializing)]
    pub kill_timeout: Option<Duration>,

    /// Relative CPU weight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,

    /// Memory limit, docker units (`512m`, `1g`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// User to run as
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Working directory inside the container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    /// DNS servers for the container
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domainname: Option<String>,

    /// Keep ANSI colors when streaming container output
    pub keep_colors: bool,
}

impl Container {
    /// Image reference, guaranteed present after validation
    pub fn image(&self) -> &ImageName {
        self.image.as_ref().expect("validated container has an image")
    }

    /// Grace period for stop, defaulting to 10s
    pub fn kill_timeout(&self) -> Duration {
        self.kill_timeout.unwrap_or_else(|| Duration::from_secs(10))
    }

    /// Memory limit in bytes
    pub fn memory_bytes(&self) -> Result<Option<u64>> {
        match &self.memory {
            Some(m) => Ok(Some(deserializers::parse_size(m)?)),
            None => Ok(None),
        }
    }

    /// Pod members this container must be scheduled after
    pub fn dependencies(&self) -> Vec<ContainerName> {
        let mut deps = vec![];
        for v in &self.volumes_from {
            deps.push(v.clone());
        }
        for l in &self.links {
            deps.push(l.target.clone());
        }
        if let Some(NetworkMode::Container(ref n)) = self.net {
            deps.push(n.clone());
        }
        deps
    }

    /// Content digest over the fields that force a recreate when changed
    ///
    /// Engine-synthesized data (ids, timestamps) and purely runtime knobs
    /// (kill_timeout, wait windows) do not participate. The digest is
    /// persisted as a label at create time so later runs can compare
    /// without re-inspecting every field.
    pub fn identity_digest(&self) -> String {
        let identity = json!({
            "image": self.image.as_ref().map(|i| i.canonical()),
            "cmd": self.cmd,
            "entrypoint": self.entrypoint,
            "env": &*self.env,
            "labels": self.labels,
            "ports": self.ports.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            "expose": self.expose.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            "volumes": self.volumes.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
            "volumes_from": self.volumes_from.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
            "links": self.links.iter().map(|l| l.to_string()).collect::<Vec<_>>(),
            "net": self.net.clone().unwrap_or_default().to_string(),
            "restart": self.restart.to_string(),
            "user": self.user,
            "workdir": self.workdir,
            "dns": self.dns,
            "hostname": self.hostname,
            "domainname": self.domainname,
            "cpu_shares": self.cpu_shares,
            "memory": self.memory,
        });
        let mut hasher = Sha256::new();
        hasher.update(identity.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
