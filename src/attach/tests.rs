//! Orchestrator scenarios against the in-memory fakes.

use super::*;
use crate::core::Stage;
use crate::testing::{FakeDirectory, FakeHost};

const PROFILER_ID: &str = "{805A308B-061C-47F3-9B30-F785C3186E82}";
const CLR4: &str = "v4.0.30319";

#[derive(Default)]
struct Recorder {
    transitions: Vec<(AttachState, AttachState)>,
    inventories: Vec<RuntimeInventory>,
}

impl AttachObserver for Recorder {
    fn transition(&mut self, from: AttachState, to: AttachState) {
        self.transitions.push((from, to));
    }

    fn runtimes_discovered(&mut self, inventory: &RuntimeInventory) {
        self.inventories.push(inventory.clone());
    }
}

impl Recorder {
    fn states(&self) -> Vec<AttachState> {
        self.transitions.iter().map(|(_, to)| *to).collect()
    }
}

fn directory() -> FakeDirectory {
    FakeDirectory::new()
        .with_process(4, "System")
        .with_denied(88, "lsass.exe")
        .with_process(512, "Worker.exe")
        .with_process(900, "explorer.exe")
}

fn clr4_host() -> FakeHost {
    FakeHost::new()
        .with_loaded(CLR4)
        .with_installed("v2.0.50727", true)
        .with_installed(CLR4, true)
        .with_runtime(CLR4, true, true)
        .with_default_version(CLR4)
}

fn plan(target: &str) -> AttachPlan {
    AttachPlan {
        target: target.parse().unwrap(),
        runtime_version: Some(CLR4.to_string()),
        profiler: ProfilerDescriptor::parse(PROFILER_ID, r"C:\profilers\Profiler.dll", vec![1, 2, 3])
            .unwrap(),
        timeout: AttachTimeout::from_millis(10_000).unwrap(),
    }
}

#[test]
fn test_attach_by_name_reaches_attached() {
    let dir = directory();
    let host = clr4_host();
    let mut recorder = Recorder::default();

    let attached = Orchestrator::new(&dir, &host)
        .run_with(&plan("Worker.exe"), &mut recorder)
        .unwrap();

    assert_eq!(attached.process_id, 512);
    assert_eq!(attached.executable_name, "Worker.exe");
    assert_eq!(attached.runtime_version, CLR4);
    assert_eq!(
        recorder.states(),
        vec![
            AttachState::ProcessResolved,
            AttachState::RuntimeSelected,
            AttachState::RuntimeValidated,
            AttachState::CapabilityAcquired,
            AttachState::AttachIssued,
            AttachState::Attached,
        ]
    );

    let attaches = host.calls().attaches.borrow();
    assert_eq!(attaches.len(), 1);
    assert_eq!(attaches[0].process_id, 512);
    assert_eq!(attaches[0].timeout_ms, 10_000);
    assert_eq!(
        attaches[0].component_id,
        uuid::Uuid::parse_str(PROFILER_ID).unwrap()
    );
    assert_eq!(attaches[0].image_path, r"C:\profilers\Profiler.dll");
    assert_eq!(attaches[0].init_payload, vec![1, 2, 3]);

    // The target handle is released once the run ends
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_attach_by_id_uses_handle_pid() {
    let dir = directory();
    let host = clr4_host();

    let attached = Orchestrator::new(&dir, &host).run(&plan("900")).unwrap();

    assert_eq!(attached.process_id, 900);
    assert_eq!(host.calls().attaches.borrow()[0].process_id, 900);
    assert_eq!(dir.list_calls(), 0);
}

#[test]
fn test_not_loadable_never_requests_capability() {
    let dir = directory();
    let host = FakeHost::new().with_runtime(CLR4, false, true);
    let mut recorder = Recorder::default();

    let err = Orchestrator::new(&dir, &host)
        .with_discovery(false)
        .run_with(&plan("Worker.exe"), &mut recorder)
        .unwrap_err();

    assert!(matches!(err, AttachError::RuntimeNotLoadable { ref version } if version == CLR4));
    assert_eq!(err.stage(), Stage::RuntimeValidation);
    assert_eq!(host.calls().capability_requests.get(), 0);
    assert!(host.calls().attaches.borrow().is_empty());
    assert_eq!(
        recorder.transitions.last(),
        Some(&(AttachState::RuntimeSelected, AttachState::Failed))
    );
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_missing_process_skips_discovery() {
    let dir = directory();
    let host = clr4_host();

    let err = Orchestrator::new(&dir, &host)
        .run(&plan("Ghost.exe"))
        .unwrap_err();

    assert!(matches!(err, AttachError::NotFound { .. }));
    assert_eq!(err.stage(), Stage::ProcessResolution);
    assert_eq!(dir.list_calls(), 1);
    assert_eq!(host.calls().discovery.get(), 0);
    assert_eq!(host.calls().lookups.get(), 0);
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_deferred_facility_not_built_for_missing_process() {
    let dir = directory();
    let connects = std::cell::Cell::new(0);

    let err = Orchestrator::deferred(&dir, || -> Result<FakeHost, AttachError> {
        connects.set(connects.get() + 1);
        Err(AttachError::DiscoveryUnavailable {
            reason: "mscoree.dll not found".into(),
        })
    })
    .run(&plan("Ghost.exe"))
    .unwrap_err();

    assert!(matches!(err, AttachError::NotFound { .. }));
    assert_eq!(connects.get(), 0);
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_deferred_facility_built_once_after_resolution() {
    let dir = directory();
    let connects = std::cell::Cell::new(0);
    let mut recorder = Recorder::default();

    let attached = Orchestrator::deferred(&dir, || {
        connects.set(connects.get() + 1);
        Ok(clr4_host())
    })
    .run_with(&plan("Worker.exe"), &mut recorder)
    .unwrap();

    assert_eq!(attached.process_id, 512);
    assert_eq!(connects.get(), 1);
    assert_eq!(recorder.inventories.len(), 1);
}

#[test]
fn test_deferred_facility_failure_is_discovery_stage() {
    let dir = directory();
    let mut recorder = Recorder::default();

    let err = Orchestrator::deferred(&dir, || -> Result<FakeHost, AttachError> {
        Err(AttachError::DiscoveryUnavailable {
            reason: "mscoree.dll not found".into(),
        })
    })
    .run_with(&plan("Worker.exe"), &mut recorder)
    .unwrap_err();

    assert_eq!(err.stage(), Stage::RuntimeDiscovery);
    assert_eq!(
        recorder.transitions.last(),
        Some(&(AttachState::ProcessResolved, AttachState::Failed))
    );
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_missing_capability_is_terminal() {
    let dir = directory();
    let host = FakeHost::new().with_runtime("v2.0.50727", true, false);
    let mut plan = plan("Worker.exe");
    plan.runtime_version = Some("v2.0.50727".into());

    let err = Orchestrator::new(&dir, &host)
        .with_discovery(false)
        .run(&plan)
        .unwrap_err();

    assert!(matches!(err, AttachError::InterfaceUnavailable { .. }));
    assert_eq!(host.calls().capability_requests.get(), 1);
    assert!(host.calls().attaches.borrow().is_empty());
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_rejected_attach_keeps_status() {
    let dir = directory();
    let rejected = HResult(0x8013_136A_u32 as i32);
    let host = clr4_host().with_attach_status(rejected);

    let err = Orchestrator::new(&dir, &host)
        .run(&plan("Worker.exe"))
        .unwrap_err();

    match err {
        AttachError::AttachRejected { pid, status } => {
            assert_eq!(pid, 512);
            assert_eq!(status, rejected);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Issued once, never retried
    assert_eq!(host.calls().attaches.borrow().len(), 1);
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_discovery_is_reported_but_does_not_pick_version() {
    let dir = directory();
    // Nothing loaded in the target; attaching a not-yet-loaded runtime is allowed
    let host = FakeHost::new()
        .with_installed(CLR4, true)
        .with_runtime(CLR4, true, true);
    let mut recorder = Recorder::default();

    let attached = Orchestrator::new(&dir, &host)
        .run_with(&plan("Worker.exe"), &mut recorder)
        .unwrap();

    assert_eq!(attached.runtime_version, CLR4);
    assert_eq!(recorder.inventories.len(), 1);
    assert!(recorder.inventories[0].loaded.is_empty());
    assert_eq!(recorder.inventories[0].installed.len(), 1);
}

#[test]
fn test_unavailable_facility_aborts_after_resolution() {
    let dir = directory();
    let host = clr4_host().unavailable();

    let err = Orchestrator::new(&dir, &host)
        .run(&plan("Worker.exe"))
        .unwrap_err();

    assert!(matches!(err, AttachError::DiscoveryUnavailable { .. }));
    assert_eq!(host.calls().lookups.get(), 0);
    assert_eq!(dir.open_handles(), 0);
}

#[test]
fn test_default_version_used_when_unspecified() {
    let dir = directory();
    let host = clr4_host();
    let mut plan = plan("Worker.exe");
    plan.runtime_version = None;

    let attached = Orchestrator::new(&dir, &host).run(&plan).unwrap();
    assert_eq!(attached.runtime_version, CLR4);

    let host = FakeHost::new().with_runtime(CLR4, true, true);
    let err = Orchestrator::new(&dir, &host)
        .with_discovery(false)
        .run(&plan)
        .unwrap_err();
    assert!(matches!(err, AttachError::InvalidConfiguration { .. }));
    assert_eq!(host.calls().lookups.get(), 0);
}
