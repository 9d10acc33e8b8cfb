use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::{labels, EngineClient, ObservedContainer, WaitOutcome};
use crate::structs::{Container, ContainerName, ImageName, NetworkMode, RestartPolicy};
use crate::{ErrorKind, Result};

/// Engine driver shelling out to the `docker` CLI
///
/// The wire protocol to the engine stays the CLI's problem; this driver
/// only translates between declared/observed specs and docker arguments.
pub struct DockerCli;

impl DockerCli {
    /// Probe the engine before handing out a client
    pub fn connect() -> Result<DockerCli> {
        match Command::new("docker").args(&["version", "--format", "{{.Server.Version}}"]).output() {
            Ok(out) if out.status.success() => {
                let v = String::from_utf8_lossy(&out.stdout).trim().to_string();
                debug!("Connected to docker engine {}", v);
                Ok(DockerCli)
            }
            Ok(out) => {
                let err = String::from_utf8_lossy(&out.stderr).trim().to_string();
                Err(ErrorKind::EngineUnavailable(err).into())
            }
            Err(e) => Err(ErrorKind::EngineUnavailable(format!("docker not runnable: {}", e)).into()),
        }
    }
}

fn dout(args: Vec<String>) -> Result<String> {
    debug!("docker {}", args.join(" "));
    let s = Command::new("docker").args(&args).output()?;
    let out: String = String::from_utf8_lossy(&s.stdout).into();
    let err: String = String::from_utf8_lossy(&s.stderr).trim().to_string();
    if !s.status.success() {
        bail!("docker {}: {}", args.join(" "), err);
    }
    if !err.is_empty() {
        warn!("docker {} stderr: {}", args.join(" "), err);
    }
    Ok(out)
}

// status-only variant with inherited stdio, used where progress streams
fn dexec(args: Vec<String>) -> Result<()> {
    debug!("docker {}", args.join(" "));
    let s = Command::new("docker").args(&args).status()?;
    if !s.success() {
        bail!("Subprocess failure from docker: {}", s.code().unwrap_or(1001))
    }
    Ok(())
}

impl EngineClient for DockerCli {
    fn list(&self, namespace: &str) -> Result<Vec<ObservedContainer>> {
        let ids = dout(vec![
            "ps".into(),
            "-a".into(),
            "-q".into(),
            "--no-trunc".into(),
            "--filter".into(),
            format!("label={}={}", labels::NAMESPACE, namespace),
        ])?;
        self.inspect_many(ids.split_whitespace().collect())
    }

    fn list_all(&self) -> Result<Vec<ObservedContainer>> {
        let ids = dout(vec![
            "ps".into(),
            "-a".into(),
            "-q".into(),
            "--no-trunc".into(),
            "--filter".into(),
            format!("label={}", labels::NAMESPACE),
        ])?;
        self.inspect_many(ids.split_whitespace().collect())
    }

    fn create(&self, c: &Container, manifest_hash: &str) -> Result<String> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), c.name.to_string()];
        args.push("--label".into());
        args.push(format!("{}={}", labels::NAMESPACE, c.name.namespace));
        args.push("--label".into());
        args.push(format!("{}={}", labels::NAME, c.name.name));
        args.push("--label".into());
        args.push(format!("{}={}", labels::HASH, c.identity_digest()));
        args.push("--label".into());
        args.push(format!("{}={}", labels::MANIFEST_HASH, manifest_hash));
        for (k, v) in &c.labels {
            args.push("--label".into());
            args.push(format!("{}={}", k, v));
        }
        for (k, v) in &c.env {
            args.push("-e".into());
            args.push(format!("{}={}", k, v));
        }
        for p in &c.ports {
            args.push("-p".into());
            args.push(p.to_string());
        }
        for e in &c.expose {
            args.push("--expose".into());
            args.push(e.to_string());
        }
        for v in &c.volumes {
            args.push("-v".into());
            args.push(v.to_string());
        }
        for v in &c.volumes_from {
            args.push("--volumes-from".into());
            args.push(v.to_string());
        }
        for l in &c.links {
            args.push("--link".into());
            args.push(format!("{}:{}", l.target, l.alias()));
        }
        if let Some(ref net) = c.net {
            args.push("--net".into());
            args.push(match net {
                // engine names are stable, so the target resolves by name
                NetworkMode::Container(n) => format!("container:{}", n),
                other => other.to_string(),
            });
        }
        if c.restart != RestartPolicy::No {
            args.push("--restart".into());
            args.push(c.restart.to_string());
        }
        if let Some(shares) = c.cpu_shares {
            args.push("--cpu-shares".into());
            args.push(shares.to_string());
        }
        if let Some(ref mem) = c.memory {
            args.push("--memory".into());
            args.push(mem.clone());
        }
        if let Some(ref user) = c.user {
            args.push("--user".into());
            args.push(user.clone());
        }
        if let Some(ref wd) = c.workdir {
            args.push("--workdir".into());
            args.push(wd.clone());
        }
        for d in &c.dns {
            args.push("--dns".into());
            args.push(d.clone());
        }
        if let Some(ref h) = c.hostname {
            args.push("--hostname".into());
            args.push(h.clone());
        }
        if let Some(ref d) = c.domainname {
            args.push("--domainname".into());
            args.push(d.clone());
        }
        // the CLI takes a single entrypoint binary; extra words lead the cmd
        let mut cmd = vec![];
        if let Some((head, rest)) = c.entrypoint.split_first() {
            args.push("--entrypoint".into());
            args.push(head.clone());
            cmd.extend_from_slice(rest);
        }
        cmd.extend_from_slice(&c.cmd);

        args.push(c.image().to_string());
        args.extend(cmd);

        let id = dout(args)?.trim().to_string();
        if id.is_empty() {
            bail!("docker create returned no id for {}", c.name);
        }
        Ok(id)
    }

    fn start(&self, id: &str, c: &Container) -> Result<()> {
        debug!("Starting {} ({})", c.name, id);
        dout(vec!["start".into(), id.into()]).map(|_| ())
    }

    fn restart(&self, id: &str) -> Result<()> {
        dout(vec!["start".into(), id.into()]).map(|_| ())
    }

    fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        dout(vec![
            "stop".into(),
            "-t".into(),
            timeout.as_secs().to_string(),
            id.into(),
        ])
        .map(|_| ())
    }

    fn remove(&self, id: &str, timeout: Duration) -> Result<()> {
        self.stop(id, timeout)?;
        // -v drops anonymous volumes with the container
        dout(vec!["rm".into(), "-v".into(), id.into()]).map(|_| ())
    }

    fn wait(&self, id: &str, window: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now() + window;
        loop {
            let o = self.inspect(id)?;
            if !o.running {
                return Ok(WaitOutcome::Exited(o.exit_code.unwrap_or(0)));
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome::Alive);
            }
            thread::sleep(Duration::from_millis(500));
        }
    }

    fn pull_image(&self, image: &ImageName) -> Result<()> {
        // inherited stdio streams the progress bars through
        dexec(vec!["pull".into(), image.to_string()])
    }

    fn has_image(&self, image: &ImageName) -> Result<bool> {
        let s = Command::new("docker")
            .args(&["image", "inspect", &image.canonical()])
            .output()?;
        Ok(s.status.success())
    }

    fn list_tags(&self, registry: Option<&str>, repository: &str) -> Result<Vec<String>> {
        let repo = match registry {
            Some(r) => format!("{}/{}", r, repository),
            None => repository.to_string(),
        };
        let out = dout(vec![
            "images".into(),
            repo,
            "--format".into(),
            "{{.Tag}}".into(),
        ])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "<none>")
            .map(String::from)
            .collect())
    }

    fn remove_image(&self, image: &ImageName) -> Result<()> {
        dout(vec!["rmi".into(), image.to_string()]).map(|_| ())
    }

    fn inspect(&self, id: &str) -> Result<ObservedContainer> {
        let mut found = self.inspect_many(vec![id])?;
        match found.pop() {
            Some(o) => Ok(o),
            None => bail!("no such container {}", id),
        }
    }

    fn bridge_ip(&self) -> Result<String> {
        let out = dout(vec![
            "network".into(),
            "inspect".into(),
            "bridge".into(),
            "--format".into(),
            "{{(index .IPAM.Config 0).Gateway}}".into(),
        ])?;
        Ok(out.trim().to_string())
    }
}

impl DockerCli {
    fn inspect_many(&self, ids: Vec<&str>) -> Result<Vec<ObservedContainer>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut args: Vec<String> = vec!["inspect".into()];
        args.extend(ids.iter().map(|s| s.to_string()));
        let out = dout(args)?;
        let parsed: Vec<Value> = serde_json::from_str(&out)?;
        let mut res = vec![];
        for v in parsed {
            res.push(observed_from_inspect(&v)?);
        }
        res.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(res)
    }
}

// Translate one `docker inspect` document into observed state.
// Labels win over the engine name when we stamped them at create time.
fn observed_from_inspect(v: &Value) -> Result<ObservedContainer> {
    let id = v["Id"].as_str().unwrap_or_default().to_string();
    let labels: BTreeMap<String, String> = v["Config"]["Labels"]
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, val)| val.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let name = match (labels.get(labels::NAMESPACE), labels.get(labels::NAME)) {
        (Some(ns), Some(n)) => ContainerName::new(ns, n),
        _ => {
            let raw = v["Name"].as_str().unwrap_or_default().trim_start_matches('/');
            ContainerName::parse(raw, "")?
        }
    };

    let running = v["State"]["Running"].as_bool().unwrap_or(false);
    let exit_code = if running {
        None
    } else {
        v["State"]["ExitCode"].as_i64()
    };
    let restart = match v["HostConfig"]["RestartPolicy"]["Name"].as_str() {
        Some("always") => RestartPolicy::Always,
        Some("on-failure") => RestartPolicy::OnFailure(
            v["HostConfig"]["RestartPolicy"]["MaximumRetryCount"]
                .as_u64()
                .unwrap_or(0) as u32,
        ),
        _ => RestartPolicy::No,
    };

    Ok(ObservedContainer {
        id,
        name,
        image: v["Config"]["Image"].as_str().unwrap_or_default().to_string(),
        labels,
        running,
        exit_code,
        started_at: parse_engine_time(v["State"]["StartedAt"].as_str()),
        finished_at: parse_engine_time(v["State"]["FinishedAt"].as_str()),
        restart,
    })
}

// docker reports the year-one zero time for "never"
fn parse_engine_time(s: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s?;
    if s.starts_with("0001-") {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::observed_from_inspect;
    use crate::structs::RestartPolicy;

    #[test]
    fn inspect_translation() {
        let doc = json!({
            "Id": "deadbeef",
            "Name": "/web.app",
            "Config": {
                "Image": "nginx:1.17",
                "Labels": {
                    "pod.namespace": "web",
                    "pod.name": "app",
                    "pod.hash": "abc123"
                }
            },
            "State": {
                "Running": false,
                "ExitCode": 137,
                "StartedAt": "2019-06-01T10:00:00Z",
                "FinishedAt": "0001-01-01T00:00:00Z"
            },
            "HostConfig": {
                "RestartPolicy": {"Name": "on-failure", "MaximumRetryCount": 3}
            }
        });
        let o = observed_from_inspect(&doc).unwrap();
        assert_eq!(o.id, "deadbeef");
        assert_eq!(o.name.to_string(), "web.app");
        assert_eq!(o.image, "nginx:1.17");
        assert!(!o.running);
        assert_eq!(o.exit_code, Some(137));
        assert_eq!(o.restart, RestartPolicy::OnFailure(3));
        assert!(o.started_at.is_some());
        assert!(o.finished_at.is_none());
        assert_eq!(o.identity_digest(), Some(&"abc123".to_string()));
    }
}
