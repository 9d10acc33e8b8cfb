use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::structs::{Container, ContainerName, NetworkMode};
use crate::{ErrorKind, Result};

/// Why one container must wait for another
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    VolumesFrom,
    Link,
    Net,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::VolumesFrom => write!(f, "volumes_from"),
            EdgeKind::Link => write!(f, "link"),
            EdgeKind::Net => write!(f, "net"),
        }
    }
}

/// Dependency graph over the containers of one pod
///
/// An edge `c -> d` means `c` references `d` (via `volumes_from`, `links`
/// or `net: container:<d>`): `d` must be created before `c` and removed
/// after it. Built once per diff/apply cycle from normalized specs.
pub struct PodGraph {
    graph: DiGraph<ContainerName, EdgeKind>,
    indices: BTreeMap<ContainerName, NodeIndex>,
}

impl PodGraph {
    pub fn build(containers: &[Container]) -> Result<PodGraph> {
        let mut graph = DiGraph::new();
        let mut indices = BTreeMap::new();
        for c in containers {
            let idx = graph.add_node(c.name.clone());
            indices.insert(c.name.clone(), idx);
        }
        for c in containers {
            let from = indices[&c.name];
            for v in &c.volumes_from {
                let to = lookup(&indices, v, &c.name, "volumes_from")?;
                graph.update_edge(from, to, EdgeKind::VolumesFrom);
            }
            for l in &c.links {
                let to = lookup(&indices, &l.target, &c.name, "links")?;
                graph.update_edge(from, to, EdgeKind::Link);
            }
            if let Some(NetworkMode::Container(ref n)) = c.net {
                let to = lookup(&indices, n, &c.name, "net")?;
                graph.update_edge(from, to, EdgeKind::Net);
            }
        }
        Ok(PodGraph { graph, indices })
    }

    /// Reject cyclic reference chains, listing every offending edge
    pub fn verify_acyclic(&self) -> Result<()> {
        let mut offending = vec![];
        for comp in tarjan_scc(&self.graph) {
            let in_cycle: BTreeSet<NodeIndex> = comp.iter().cloned().collect();
            let cyclic = comp.len() > 1
                || comp
                    .iter()
                    .any(|&n| self.graph.find_edge(n, n).is_some());
            if !cyclic {
                continue;
            }
            for &n in &comp {
                for m in self.graph.neighbors_directed(n, Direction::Outgoing) {
                    if in_cycle.contains(&m) {
                        let e = self.graph.find_edge(n, m).unwrap();
                        offending.push(format!(
                            "{} -> {} ({})",
                            self.graph[n], self.graph[m], self.graph[e]
                        ));
                    }
                }
            }
        }
        if !offending.is_empty() {
            offending.sort();
            return Err(ErrorKind::ManifestCycle(offending.join(", ")).into());
        }
        Ok(())
    }

    /// Direct dependencies of a container
    pub fn dependencies_of(&self, name: &ContainerName) -> Vec<ContainerName> {
        match self.indices.get(name) {
            Some(&ix) => {
                let mut deps: Vec<ContainerName> = self
                    .graph
                    .neighbors_directed(ix, Direction::Outgoing)
                    .map(|n| self.graph[n].clone())
                    .collect();
                deps.sort();
                deps
            }
            None => vec![],
        }
    }

    /// Dependencies-first order over `subset`, ties broken by name
    ///
    /// Only constraints between members of the subset apply; names unknown
    /// to the graph are unconstrained. Assumes `verify_acyclic` passed.
    pub fn creation_order(&self, subset: &BTreeSet<ContainerName>) -> Vec<ContainerName> {
        self.kahn(subset, Direction::Outgoing)
    }

    /// Dependents-first order over `subset`, ties broken by name
    pub fn removal_order(&self, subset: &BTreeSet<ContainerName>) -> Vec<ContainerName> {
        self.kahn(subset, Direction::Incoming)
    }

    // Kahn's algorithm with a BTreeSet ready-queue for determinism.
    // `blocking` is the direction of edges that must be satisfied first:
    // Outgoing = my dependencies before me, Incoming = my dependents before me.
    fn kahn(&self, subset: &BTreeSet<ContainerName>, blocking: Direction) -> Vec<ContainerName> {
        let mut pending: BTreeMap<ContainerName, usize> = BTreeMap::new();
        for name in subset {
            let blockers = match self.indices.get(name) {
                Some(&ix) => self
                    .graph
                    .neighbors_directed(ix, blocking)
                    .filter(|&n| subset.contains(&self.graph[n]))
                    .count(),
                None => 0,
            };
            pending.insert(name.clone(), blockers);
        }

        let mut ready: BTreeSet<ContainerName> = pending
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(k, _)| k.clone())
            .collect();
        let mut order = vec![];
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(&next);
            pending.remove(&next);
            order.push(next.clone());
            if let Some(&ix) = self.indices.get(&next) {
                // unblock the nodes waiting on this one
                for n in self.graph.neighbors_directed(ix, blocking.opposite()) {
                    let name = &self.graph[n];
                    if let Some(count) = pending.get_mut(name) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(name.clone());
                        }
                    }
                }
            }
        }
        debug_assert!(pending.is_empty(), "cycle slipped through verify_acyclic");
        order
    }
}

fn lookup(
    indices: &BTreeMap<ContainerName, NodeIndex>,
    target: &ContainerName,
    from: &ContainerName,
    field: &str,
) -> Result<NodeIndex> {
    match indices.get(target) {
        Some(&ix) => Ok(ix),
        None => bail!("{} references unknown container {} via {}", from, target, field),
    }
}
