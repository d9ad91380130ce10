// src/tests/test_checkpoint.rs

use super::fixtures::{FakeAdapter, Op, SAMPLE_POLICY};
use crate::enforcement::{
    AgentState, CheckpointId, CheckpointStore, EnforcementApplier, EnforcementState,
};
use crate::platform::PlatformKind;
use crate::policy::compiler::CompileTarget;
use crate::policy::parser::parse;
use std::fs;
use std::sync::Arc;

fn applied_state() -> AgentState {
    let artifact = parse(SAMPLE_POLICY.as_bytes()).compile(&CompileTarget {
        platform: PlatformKind::Linux,
        upstream_dns: "9.9.9.9".to_string(),
    });
    AgentState {
        state: EnforcementState::Enforcing,
        firewall_active: true,
        applied: Some(artifact),
        ..Default::default()
    }
}

#[test]
fn test_ids_follow_creation_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    assert_eq!(store.latest().unwrap(), None);

    let first = store.save("pre-update", &AgentState::default()).unwrap();
    let second = store.save("pre-update", &applied_state()).unwrap();
    let third = store.save("manual", &applied_state()).unwrap();

    assert!(first < second && second < third);
    assert_eq!(store.list().unwrap(), vec![first, second, third]);
    assert_eq!(store.latest().unwrap(), Some(third));
    assert_eq!(store.load(third).unwrap().label, "manual");
}

#[test]
fn test_partial_writes_are_invisible() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = dir.path().join("checkpoints");
    let store = CheckpointStore::new(checkpoints.clone());
    let saved = store.save("pre-update", &applied_state()).unwrap();

    fs::write(
        checkpoints.join("00000000000000000009-pre-update.json.tmp.1234.99"),
        b"{\"id\":",
    )
    .unwrap();

    assert_eq!(store.latest().unwrap(), Some(saved));
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn test_prune_keeps_newest() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().to_path_buf());
    for _ in 0..5 {
        store.save("pre-update", &applied_state()).unwrap();
    }

    assert_eq!(store.prune(2).unwrap(), 3);
    assert_eq!(store.list().unwrap(), vec![CheckpointId(4), CheckpointId(5)]);
    assert_eq!(store.prune(2).unwrap(), 0);
}

#[test]
fn test_restore_reapplies_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().to_path_buf());
    let id = store.save("pre-update", &applied_state()).unwrap();
    let adapter = Arc::new(FakeAdapter::default());
    let applier = EnforcementApplier::new(adapter.clone(), "google.com");

    assert!(store.restore(id, &applier).unwrap());
    let ops = adapter.ops();
    assert!(ops.contains(&Op::WriteDns));
    assert!(ops.contains(&Op::ActivateFirewall));
    assert!(ops.contains(&Op::WriteBrowser));
    assert!(!ops.contains(&Op::CloseBrowsers));
}

#[test]
fn test_restore_reports_unverified_resolver() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().to_path_buf());
    let id = store.save("pre-update", &applied_state()).unwrap();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set(|b| b.resolving = false);
    let applier = EnforcementApplier::new(adapter.clone(), "google.com");

    assert!(!store.restore(id, &applier).unwrap());
    assert!(!adapter.ops().contains(&Op::ActivateFirewall));
}

#[test]
fn test_restore_without_artifacts_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().to_path_buf());
    let id = store.save("boot", &AgentState::default()).unwrap();
    let applier = EnforcementApplier::new(Arc::new(FakeAdapter::default()), "google.com");

    assert!(store.restore(id, &applier).is_err());
    assert!(store.restore(CheckpointId(42), &applier).is_err());
}
