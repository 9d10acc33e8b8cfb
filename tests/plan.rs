extern crate podcat;

mod common;

use common::{converge, converge_with, manifest, FakeEngine};
use podcat::engine::{self, EngineClient};
use podcat::plan::{Op, Plan};
use podcat::structs::RestartPolicy;
use podcat::{diff, retention, runner, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn shape(plan: &Plan) -> Vec<(String, String)> {
    plan.actions
        .iter()
        .map(|a| (a.op.kind().to_string(), a.target.clone()))
        .collect()
}

fn pairs(xs: &[(&str, &str)]) -> Vec<(String, String)> {
    xs.iter()
        .map(|(k, t)| (k.to_string(), t.to_string()))
        .collect()
}

const THREE_TIER: &str = "
namespace: pod
containers:
  a:
    image: img/a:1
  b:
    image: img/b:1
    links:
    - a
  c:
    image: img/c:1
    volumes_from:
    - a
";

#[test]
fn create_all_orders_dependencies_first() {
    // empty engine, three containers where b and c depend on a
    let engine = FakeEngine::shared();
    let mf = manifest(THREE_TIER);
    let observed = engine.list("pod").unwrap();
    let plan = diff::diff(&mf.members(), &observed, Duration::from_secs(0)).unwrap();
    assert_eq!(
        shape(&plan),
        pairs(&[
            ("ensure_image", "img/a:1"),
            ("create", "pod.a"),
            ("ensure_image", "img/b:1"),
            ("create", "pod.b"),
            ("ensure_image", "img/c:1"),
            ("create", "pod.c"),
        ])
    );

    converge(&engine, &mf).unwrap();
    // dependency a is created and started before its dependents
    let ops: Vec<String> = engine
        .ops()
        .into_iter()
        .filter(|o| !o.starts_with("pull"))
        .collect();
    assert_eq!(
        ops,
        vec![
            "create pod.a",
            "start pod.a",
            "create pod.b",
            "start pod.b",
            "create pod.c",
            "start pod.c",
        ]
    );
    assert!(engine.running("pod.a"));
    assert!(engine.running("pod.b"));
    assert!(engine.running("pod.c"));
}

#[test]
fn convergence_is_a_fixed_point() {
    // a second diff after converging yields only no-ops
    let engine = FakeEngine::shared();
    let mf = manifest(THREE_TIER);
    converge(&engine, &mf).unwrap();

    let observed = engine.list("pod").unwrap();
    let plan = diff::diff(&mf.members(), &observed, Duration::from_secs(0)).unwrap();
    assert!(plan.is_converged());
    assert_eq!(plan.actions.len(), 3);
    for a in &plan.actions {
        assert_eq!(a.op.kind(), "no_action");
    }
}

#[test]
fn changed_container_is_recreated() {
    // b's image changes; only b is removed and recreated
    let engine = FakeEngine::shared();
    converge(&engine, &manifest("
namespace: pod
containers:
  a:
    image: img/a:1
  b:
    image: img/b:1
    links:
    - a
")).unwrap();

    let mf2 = manifest("
namespace: pod
containers:
  a:
    image: img/a:1
  b:
    image: img/b:2
    links:
    - a
");
    let observed = engine.list("pod").unwrap();
    let plan = diff::diff(&mf2.members(), &observed, Duration::from_secs(0)).unwrap();
    assert_eq!(
        shape(&plan),
        pairs(&[
            ("remove", "pod.b"),
            ("ensure_image", "img/b:2"),
            ("create", "pod.b"),
            ("no_action", "pod.a"),
        ])
    );

    converge(&engine, &mf2).unwrap();
    let plan = diff::diff(&mf2.members(), &engine.list("pod").unwrap(), Duration::from_secs(0)).unwrap();
    assert!(plan.is_converged());
}

#[test]
fn orphans_are_removed() {
    // x exists on the host but is no longer declared
    let engine = FakeEngine::shared();
    converge(&engine, &manifest("
namespace: pod
containers:
  a:
    image: img/a:1
  x:
    image: img/x:1
")).unwrap();

    let mf = manifest("
namespace: pod
containers:
  a:
    image: img/a:1
");
    let observed = engine.list("pod").unwrap();
    let plan = diff::diff(&mf.members(), &observed, Duration::from_secs(0)).unwrap();
    assert_eq!(
        shape(&plan),
        pairs(&[("remove", "pod.x"), ("no_action", "pod.a")])
    );

    converge(&engine, &mf).unwrap();
    assert_eq!(engine.container_names(), vec!["pod.a"]);
}

#[test]
fn cycles_are_rejected() {
    // a and b reference each other
    let err = podcat::Manifest::from_raw("
namespace: pod
containers:
  a:
    image: img/a:1
    volumes_from:
    - b
  b:
    image: img/b:1
    links:
    - a
", &Default::default(), None).unwrap_err();
    match err.kind() {
        ErrorKind::ManifestCycle(edges) => {
            assert!(edges.contains("pod.a -> pod.b"));
            assert!(edges.contains("pod.b -> pod.a"));
        }
        other => panic!("expected cycle error, got {}", other),
    }
}

#[test]
fn retention_keeps_newest_tags() {
    // six numeric tags, keep three, none in use
    let engine = FakeEngine::shared();
    for tag in &["1.0", "1.1", "1.2", "1.3", "1.4", "1.5"] {
        engine.seed_image(&format!("repo:{}", tag));
    }
    let mf = manifest("
namespace: pod
containers:
  app:
    image: repo:1.5
");
    let removed = retention::clean(&*engine, &mf, 3, false).unwrap();
    let removed: Vec<String> = removed.iter().map(|i| i.to_string()).collect();
    assert_eq!(removed, vec!["repo:1.2", "repo:1.1", "repo:1.0"]);

    let left = engine.list_tags(None, "repo").unwrap();
    assert_eq!(left, vec!["1.3", "1.4", "1.5"]);
}

#[test]
fn retention_spares_tags_in_use() {
    let engine = FakeEngine::shared();
    for tag in &["1.0", "1.1", "1.2", "1.3", "1.4", "1.5"] {
        engine.seed_image(&format!("repo:{}", tag));
    }
    // a running container still pins 1.0
    converge(&engine, &manifest("
namespace: pod
containers:
  app:
    image: repo:1.0
")).unwrap();

    let removed = retention::clean(&*engine, &manifest("
namespace: pod
containers:
  app:
    image: repo:1.5
"), 3, false).unwrap();
    let removed: Vec<String> = removed.iter().map(|i| i.to_string()).collect();
    assert_eq!(removed, vec!["repo:1.2", "repo:1.1"]);
}

#[test]
fn state_drift_starts_without_recreate() {
    let engine = FakeEngine::shared();
    let mf = manifest("
namespace: pod
containers:
  app:
    image: img/app:1
");
    converge(&engine, &mf).unwrap();

    // simulate a crash
    {
        let mut st = engine.state.lock().unwrap();
        for c in st.containers.values_mut() {
            c.running = false;
            c.exit_code = Some(137);
        }
    }
    let plan = diff::diff(&mf.members(), &engine.list("pod").unwrap(), Duration::from_secs(0)).unwrap();
    assert_eq!(shape(&plan), pairs(&[("start", "pod.app")]));

    converge(&engine, &mf).unwrap();
    assert!(engine.running("pod.app"));
}

#[test]
fn state_drift_stops_without_recreate() {
    let engine = FakeEngine::shared();
    converge(&engine, &manifest("
namespace: pod
containers:
  app:
    image: img/app:1
")).unwrap();

    let parked = manifest("
namespace: pod
containers:
  app:
    image: img/app:1
    state: created
");
    let plan = diff::diff(&parked.members(), &engine.list("pod").unwrap(), Duration::from_secs(0)).unwrap();
    assert_eq!(shape(&plan), pairs(&[("stop", "pod.app")]));

    converge(&engine, &parked).unwrap();
    assert!(!engine.running("pod.app"));
}

#[test]
fn wait_window_fails_on_nonzero_exit() {
    let engine = FakeEngine::shared();
    let mf = manifest("
namespace: pod
containers:
  app:
    image: img/app:1
");
    engine.state.lock().unwrap().exit_codes.insert("pod.app".into(), 3);

    let err = converge_with(&engine, &mf, Duration::from_secs(5), false).unwrap_err();
    match err.kind() {
        ErrorKind::WaitExitNonZero(name, code) => {
            assert_eq!(name, "pod.app");
            assert_eq!(*code, 3);
        }
        other => panic!("expected wait failure, got {}", other),
    }
}

#[test]
fn wait_window_passes_while_alive() {
    let engine = FakeEngine::shared();
    let mf = manifest("
namespace: pod
containers:
  app:
    image: img/app:1
");
    let report = converge_with(&engine, &mf, Duration::from_secs(5), false).unwrap();
    assert!(report.actions.iter().any(|a| a.kind == "wait_for"));
}

#[test]
fn dry_run_mutates_nothing() {
    let engine = FakeEngine::shared();
    let mf = manifest(THREE_TIER);
    let report = converge_with(&engine, &mf, Duration::from_secs(0), true).unwrap();
    assert!(engine.ops().is_empty());
    assert!(engine.container_names().is_empty());
    // but the report predicts the work
    assert_eq!(report.changed(), 6);
}

#[test]
fn ensure_image_reports_unchanged_when_present() {
    let engine = FakeEngine::shared();
    engine.seed_image("img/a:1");
    let mf = manifest("
namespace: pod
containers:
  a:
    image: img/a:1
");
    let report = converge(&engine, &mf).unwrap();
    let ensure = report.actions.iter().find(|a| a.kind == "ensure_image").unwrap();
    assert!(!ensure.changed);
    let create = report.actions.iter().find(|a| a.kind == "create").unwrap();
    assert!(create.changed);
}

#[test]
fn failed_pull_aborts_before_creates() {
    let engine = FakeEngine::shared();
    engine.state.lock().unwrap().fail_pulls.insert("img/a:1".into());
    let mf = manifest("
namespace: pod
containers:
  a:
    image: img/a:1
");
    let err = converge(&engine, &mf).unwrap_err();
    match err.kind() {
        ErrorKind::ImagePullFailed(image) => assert_eq!(image, "img/a:1"),
        other => panic!("expected pull failure, got {}", other),
    }
    assert!(engine.container_names().is_empty());
}

#[test]
fn cancellation_aborts_the_plan() {
    let engine = FakeEngine::shared();
    let mf = manifest(THREE_TIER);
    let observed = engine.list("pod").unwrap();
    let plan = diff::diff(&mf.members(), &observed, Duration::from_secs(0)).unwrap();
    let cancel = AtomicBool::new(true);
    let err = runner::execute(
        engine.clone() as Arc<dyn EngineClient>,
        &plan,
        "hash",
        &Default::default(),
        &cancel,
    )
    .unwrap_err();
    match err.kind() {
        ErrorKind::Canceled => {}
        other => panic!("expected cancellation, got {}", other),
    }
    assert!(engine.container_names().is_empty());
    // dropping the flag lets the same plan run
    cancel.store(false, Ordering::SeqCst);
    runner::execute(
        engine.clone() as Arc<dyn EngineClient>,
        &plan,
        "hash",
        &Default::default(),
        &cancel,
    )
    .unwrap();
    assert_eq!(engine.container_names().len(), 3);
}

#[test]
fn teardown_removes_dependents_first() {
    let engine = FakeEngine::shared();
    let mf = manifest(THREE_TIER);
    converge(&engine, &mf).unwrap();

    let plan = diff::removal_plan(&mf.members(), &engine.list("pod").unwrap()).unwrap();
    let order: Vec<String> = plan
        .actions
        .iter()
        .filter(|a| match &a.op {
            Op::Remove { .. } => true,
            _ => false,
        })
        .map(|a| a.target.clone())
        .collect();
    assert_eq!(order, vec!["pod.b", "pod.c", "pod.a"]);
}

#[test]
fn recovery_starts_restartable_containers_only() {
    let engine = FakeEngine::shared();
    engine.seed_container("pod", "a", false, RestartPolicy::Always);
    engine.seed_container("pod", "b", false, RestartPolicy::No);
    engine.seed_container("pod", "c", true, RestartPolicy::Always);
    engine.seed_container("other", "d", false, RestartPolicy::OnFailure(2));

    let started = engine::recover(&*engine).unwrap();
    let started: Vec<String> = started.iter().map(|n| n.to_string()).collect();
    assert_eq!(started, vec!["other.d", "pod.a"]);
    assert!(engine.running("pod.a"));
    assert!(!engine.running("pod.b"));
}

#[test]
fn shared_images_are_ensured_once() {
    let engine = FakeEngine::shared();
    let mf = manifest("
namespace: pod
containers:
  a:
    image: shared/img:1
  b:
    image: shared/img:1
");
    let plan = diff::diff(&mf.members(), &[], Duration::from_secs(0)).unwrap();
    assert_eq!(
        shape(&plan),
        pairs(&[
            ("ensure_image", "shared/img:1"),
            ("create", "pod.a"),
            ("create", "pod.b"),
        ])
    );
    converge(&engine, &mf).unwrap();
    let pulls: Vec<String> = engine
        .ops()
        .into_iter()
        .filter(|o| o.starts_with("pull"))
        .collect();
    assert_eq!(pulls, vec!["pull shared/img:1"]);
}
