use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::engine::ObservedContainer;
use crate::graph::PodGraph;
use crate::plan::{Action, Op, Plan};
use crate::structs::{Container, ContainerName, ContainerState};
use crate::Result;

/// Compare declared and observed containers and emit an ordered plan
///
/// The plan converges the engine onto the declared set with the minimum
/// set of operations: equivalent containers (digest and state both match)
/// become `NoAction`, state-only drift becomes `Start`/`Stop`, everything
/// else is a `Remove` and/or `Create`. Ordering honors the dependency
/// graph: dependents are removed first, dependencies created first, with
/// lexicographic tie-breaks so identical inputs yield identical plans.
///
/// A non-zero `wait` appends a `WaitFor` per created container after the
/// last create.
pub fn diff(declared: &[Container], observed: &[ObservedContainer], wait: Duration) -> Result<Plan> {
    let graph = PodGraph::build(declared)?;
    graph.verify_acyclic()?;

    let declared_by_name: BTreeMap<&ContainerName, &Container> =
        declared.iter().map(|c| (&c.name, c)).collect();
    let observed_by_name: BTreeMap<&ContainerName, &ObservedContainer> =
        observed.iter().map(|c| (&c.name, c)).collect();

    let mut to_create: BTreeMap<ContainerName, String> = BTreeMap::new();
    let mut to_remove: BTreeMap<ContainerName, String> = BTreeMap::new();
    let mut to_start: BTreeSet<ContainerName> = BTreeSet::new();
    let mut to_stop: BTreeSet<ContainerName> = BTreeSet::new();
    let mut unchanged: BTreeMap<ContainerName, String> = BTreeMap::new();

    for c in declared {
        match observed_by_name.get(&c.name) {
            None => {
                to_create.insert(c.name.clone(), "not present".into());
            }
            Some(o) => {
                if o.identity_digest() != Some(&c.identity_digest()) {
                    to_remove.insert(c.name.clone(), "configuration changed".into());
                    to_create.insert(c.name.clone(), "recreating with new configuration".into());
                } else if state_matches(c, o) {
                    unchanged.insert(c.name.clone(), observed_state(o));
                } else if c.state == ContainerState::Running {
                    to_start.insert(c.name.clone());
                } else {
                    to_stop.insert(c.name.clone());
                }
            }
        }
    }
    for o in observed {
        if !declared_by_name.contains_key(&o.name) {
            to_remove.insert(o.name.clone(), "not in the manifest".into());
        }
    }

    let mut plan = Plan::default();

    // removes, dependents first
    let remove_set: BTreeSet<ContainerName> = to_remove.keys().cloned().collect();
    for name in graph.removal_order(&remove_set) {
        let o = observed_by_name[&name];
        let kill_timeout = declared_by_name
            .get(&name)
            .map(|c| c.kill_timeout())
            .unwrap_or_else(|| Duration::from_secs(10));
        plan.actions.push(Action::new(
            Op::Remove {
                id: o.id.clone(),
                kill_timeout,
            },
            &name.to_string(),
            &to_remove[&name],
        ));
    }

    // state-only drift resolved without recreation
    for name in &to_stop {
        let o = observed_by_name[name];
        let c = declared_by_name[name];
        plan.actions.push(Action::new(
            Op::Stop {
                id: o.id.clone(),
                kill_timeout: c.kill_timeout(),
            },
            &name.to_string(),
            "running but declared created",
        ));
    }

    // creates, dependencies first, each image ensured before its first use
    let create_set: BTreeSet<ContainerName> = to_create.keys().cloned().collect();
    let create_order = graph.creation_order(&create_set);
    let mut ensured: BTreeSet<String> = BTreeSet::new();
    for name in &create_order {
        let c = declared_by_name[name];
        let image = c.image();
        if ensured.insert(image.canonical()) {
            plan.actions.push(Action::new(
                Op::EnsureImage(image.clone()),
                &image.to_string(),
                &format!("required by {}", name),
            ));
        }
        plan.actions.push(Action::new(
            Op::Create(Box::new(c.clone())),
            &name.to_string(),
            &to_create[name],
        ));
    }

    for name in &to_start {
        let o = observed_by_name[name];
        plan.actions.push(Action::new(
            Op::Start { id: o.id.clone() },
            &name.to_string(),
            "stopped but declared running",
        ));
    }

    // observation windows go after the last create
    if wait > Duration::from_secs(0) {
        for name in &create_order {
            let c = declared_by_name[name];
            if c.state == ContainerState::Running {
                plan.actions.push(Action::new(
                    Op::WaitFor { window: wait },
                    &name.to_string(),
                    "observe startup",
                ));
            }
        }
    }

    for (name, state) in &unchanged {
        plan.actions.push(Action::new(
            Op::NoAction,
            &name.to_string(),
            &format!("up to date ({})", state),
        ));
    }

    debug!(
        "Planned {} changes for {} declared / {} observed containers",
        plan.changes(),
        declared.len(),
        observed.len()
    );
    Ok(plan)
}

/// Plan the teardown of a whole pod: every observed container goes,
/// dependents first per the declared graph
pub fn removal_plan(declared: &[Container], observed: &[ObservedContainer]) -> Result<Plan> {
    let graph = PodGraph::build(declared)?;
    graph.verify_acyclic()?;
    let declared_by_name: BTreeMap<&ContainerName, &Container> =
        declared.iter().map(|c| (&c.name, c)).collect();
    let observed_by_name: BTreeMap<&ContainerName, &ObservedContainer> =
        observed.iter().map(|c| (&c.name, c)).collect();

    let mut plan = Plan::default();
    let remove_set: BTreeSet<ContainerName> = observed_by_name.keys().cloned().cloned().collect();
    for name in graph.removal_order(&remove_set) {
        let o = observed_by_name[&name];
        let kill_timeout = declared_by_name
            .get(&name)
            .map(|c| c.kill_timeout())
            .unwrap_or_else(|| Duration::from_secs(10));
        plan.actions.push(Action::new(
            Op::Remove {
                id: o.id.clone(),
                kill_timeout,
            },
            &name.to_string(),
            "pod teardown",
        ));
    }
    Ok(plan)
}

// Desired state against what the engine reports
fn state_matches(c: &Container, o: &ObservedContainer) -> bool {
    match c.state {
        ContainerState::Running => o.running,
        ContainerState::Created => !o.running,
    }
}

fn observed_state(o: &ObservedContainer) -> String {
    if o.running {
        "running".into()
    } else {
        match o.exit_code {
            Some(code) => format!("exited {}", code),
            None => "created".into(),
        }
    }
}
