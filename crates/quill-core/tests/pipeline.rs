//! End-to-end pipeline scenarios over a scripted oracle pair

use quill_core::{
    ArtifactPass, CancelHandle, PassReport, PipelineError, ProgressChannel, ProgressEvent,
    Session, SessionConfig, SessionRegistry, Stage, StageController,
};
use quill_state::CapabilityValue;
use quill_store::{IncrementFile, IncrementStore};
use quill_test_utils::{
    empty_delta_json, fixture_contract, init_tracing, prose, violation_delta_json, ScriptedOracle,
    Step,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn fast_config() -> SessionConfig {
    SessionConfig {
        retry_base_delay: Duration::from_millis(1),
        heartbeat_interval: Duration::from_secs(60),
        ..SessionConfig::default()
    }
}

fn chunk(label: &str, words: u64) -> String {
    format!("{label} {}", prose(words - 1))
}

fn drain(receiver: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn three_increments_reach_target_and_assemble() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());

    let generation = ScriptedOracle::new()
        .with_step(Step::reply(chunk("one", 2000)))
        .with_step(Step::reply(chunk("two", 2000)))
        .with_step(Step::reply(chunk("three", 2000)));
    let extraction = ScriptedOracle::new()
        .with_step(Step::reply(empty_delta_json()))
        .with_step(Step::reply(violation_delta_json("no_mirrors")))
        .with_step(Step::reply(empty_delta_json()));

    let registry = Arc::new(SessionRegistry::new());
    let (channel, mut receiver) = ProgressChannel::new();
    let controller = StageController::new(
        generation.clone(),
        extraction,
        store.clone(),
        fast_config(),
        Arc::clone(&registry),
        channel,
    );

    let session = Session::new(6000, fixture_contract());
    let id = session.id;
    let outcome = controller.run(session, "write a haunting").await.unwrap();

    assert_eq!(outcome.increments, 3);
    assert_eq!(outcome.total_size, 6000);

    // Manifest and artifact agree with what was generated, in order.
    let manifest = store.load_manifest(&id.to_string()).await.unwrap();
    assert_eq!(manifest.total_increments, 3);
    assert_eq!(manifest.total_size, 6000);
    let artifact = store.load_artifact(&id.to_string()).await.unwrap();
    assert!(artifact.starts_with("one "));
    assert!(artifact.contains("\n\ntwo "));
    assert!(artifact.contains("\n\nthree "));

    // The violation recorded at increment 2 reached durable state and its
    // immediate consequence fired.
    let state = store.load_state(&id.to_string()).await.unwrap();
    let slot = state.slot(&"no_mirrors".into()).unwrap();
    assert!(slot.violated);
    assert_eq!(slot.violation_count, 1);
    assert_eq!(
        state.capabilities.get("sees_the_other_side"),
        Some(&CapabilityValue::Bool(true))
    );

    // Increment 3 was generated against the post-violation state.
    let requests = generation.requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[1].system.contains("already violated"));
    assert!(requests[2].system.contains("already violated"));
    // Only the last increment may conclude.
    assert!(requests[1].system.contains("do not conclude"));
    assert!(requests[2].system.contains("final increment: bring"));

    assert_eq!(registry.get(&id).map(|s| s.stage), Some(Stage::Complete));

    let events = drain(&mut receiver);
    let names: Vec<&str> = events.iter().map(|e| e.kind.name()).collect();
    assert_eq!(names.first(), Some(&"job_created"));
    assert_eq!(names.last(), Some(&"complete"));
    assert_eq!(names.iter().filter(|n| **n == "increment_complete").count(), 3);
    assert!(names.contains(&"stage_start"));
}

#[tokio::test]
async fn generation_failure_after_retries_preserves_first_increment() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());

    let generation = ScriptedOracle::new()
        .with_step(Step::reply(chunk("one", 2000)))
        .with_step(Step::fail("model unavailable"))
        .with_step(Step::fail("model unavailable"))
        .with_step(Step::fail("model unavailable"));
    let extraction = ScriptedOracle::new().with_step(Step::reply(empty_delta_json()));

    let registry = Arc::new(SessionRegistry::new());
    let (channel, mut receiver) = ProgressChannel::new();
    let config = SessionConfig {
        max_generation_retries: 2,
        ..fast_config()
    };
    let controller = StageController::new(
        generation.clone(),
        extraction,
        store.clone(),
        config,
        Arc::clone(&registry),
        channel,
    );

    let session = Session::new(6000, fixture_contract());
    let id = session.id;
    let error = controller.run(session, "write a haunting").await.unwrap_err();
    assert!(matches!(
        error,
        PipelineError::GenerationFailed { attempts: 3, .. }
    ));

    // All three attempts hit the oracle, plus the successful first call.
    assert_eq!(generation.calls(), 4);

    // Increment 1 survived the failure.
    let increments = store.load_all(&id.to_string()).await.unwrap();
    assert_eq!(increments.len(), 1);
    assert!(increments[0].text.starts_with("one "));
    let manifest = store.load_manifest(&id.to_string()).await.unwrap();
    assert_eq!(manifest.total_increments, 1);

    let report = store.load_failure_report(&id.to_string()).await.unwrap();
    assert_eq!(report.failed_stage, "draft_generation");
    assert_eq!(report.error_class, "infrastructure");
    assert_eq!(report.increments_completed, 1);
    assert_eq!(report.artifacts, vec!["increment_0001.txt".to_string()]);

    assert_eq!(registry.get(&id).map(|s| s.stage), Some(Stage::Failed));
    let events = drain(&mut receiver);
    assert_eq!(events.last().map(|e| e.kind.name()), Some("error"));
}

#[tokio::test]
async fn premature_conclusion_fails_the_gate_and_stops() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());

    let concluding = format!("{}\n\nThe end.", chunk("one", 1995));
    let generation = ScriptedOracle::new().with_step(Step::reply(concluding));
    let extraction = ScriptedOracle::new().with_step(Step::reply(empty_delta_json()));

    let registry = Arc::new(SessionRegistry::new());
    let (channel, _receiver) = ProgressChannel::new();
    let controller = StageController::new(
        generation,
        extraction,
        store.clone(),
        fast_config(),
        registry,
        channel,
    );

    let session = Session::new(6000, fixture_contract());
    let id = session.id;
    let error = controller.run(session, "write a haunting").await.unwrap_err();
    match error {
        PipelineError::GateFailure { sequence, failures } => {
            assert_eq!(sequence, 1);
            assert!(!failures.is_empty());
        }
        other => panic!("expected gate failure, got {other}"),
    }

    // The verdict was persisted as an audit artifact and the failure report
    // carries the content class.
    let sid = id.to_string();
    let gate_path = store.session_dir(&sid).join("gate_0001.json");
    assert!(tokio::fs::try_exists(&gate_path).await.unwrap());
    let report = store.load_failure_report(&sid).await.unwrap();
    assert_eq!(report.error_class, "content");
}

#[tokio::test]
async fn cancellation_before_first_increment_is_clean() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());

    let (handle, cancel) = CancelHandle::new();
    handle.cancel();

    let registry = Arc::new(SessionRegistry::new());
    let (channel, _receiver) = ProgressChannel::new();
    let controller = StageController::new(
        ScriptedOracle::new(),
        ScriptedOracle::new(),
        store.clone(),
        fast_config(),
        registry,
        channel,
    )
    .with_cancel(cancel);

    let session = Session::new(6000, fixture_contract());
    let id = session.id;
    let error = controller.run(session, "write a haunting").await.unwrap_err();
    assert!(matches!(error, PipelineError::Cancelled));

    // Nothing generated, but the session directory is inspectable.
    let increments = store.load_all(&id.to_string()).await.unwrap();
    assert!(increments.is_empty());
    assert!(store.load_state(&id.to_string()).await.is_ok());
    let report = store.load_failure_report(&id.to_string()).await.unwrap();
    assert_eq!(report.error_class, "infrastructure");
}

#[tokio::test]
async fn stage_budget_overrun_times_out() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());

    let generation =
        ScriptedOracle::new().with_step(Step::Stall(Duration::from_secs(30)));
    let registry = Arc::new(SessionRegistry::new());
    let (channel, _receiver) = ProgressChannel::new();
    let config = SessionConfig {
        stage_budget: Duration::from_millis(100),
        max_generation_retries: 0,
        ..fast_config()
    };
    let controller = StageController::new(
        generation,
        ScriptedOracle::new(),
        store.clone(),
        config,
        registry,
        channel,
    );

    let session = Session::new(6000, fixture_contract());
    let id = session.id;
    let error = controller.run(session, "write a haunting").await.unwrap_err();
    assert!(matches!(
        error,
        PipelineError::StageTimeout {
            stage: Stage::DraftGeneration,
            ..
        }
    ));
    assert!(error.is_retryable());

    let report = store.load_failure_report(&id.to_string()).await.unwrap();
    assert_eq!(report.failed_stage, "draft_generation");
}

#[tokio::test]
async fn resume_recovers_durable_increments_and_finishes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());
    let registry = Arc::new(SessionRegistry::new());

    // First run: one durable increment, then the oracle dies.
    let generation = ScriptedOracle::new()
        .with_step(Step::reply(chunk("one", 2000)))
        .with_step(Step::fail("model unavailable"));
    let extraction = ScriptedOracle::new()
        .with_step(Step::reply(violation_delta_json("no_mirrors")));
    let (channel, _receiver) = ProgressChannel::new();
    let config = SessionConfig {
        max_generation_retries: 0,
        ..fast_config()
    };
    let controller = StageController::new(
        generation,
        extraction,
        store.clone(),
        config.clone(),
        Arc::clone(&registry),
        channel,
    );
    let session = Session::new(6000, fixture_contract());
    let id = session.id;
    controller.run(session, "write a haunting").await.unwrap_err();

    // Second run resumes from disk. Extraction replays increment 1 (same
    // verdict, extraction being idempotent) before the new increments.
    let generation = ScriptedOracle::new()
        .with_step(Step::reply(chunk("two", 2000)))
        .with_step(Step::reply(chunk("three", 2000)));
    let extraction = ScriptedOracle::new()
        .with_step(Step::reply(violation_delta_json("no_mirrors")))
        .with_replies(&empty_delta_json(), 2);
    let (channel, _receiver) = ProgressChannel::new();
    let controller = StageController::new(
        generation.clone(),
        extraction,
        store.clone(),
        config,
        registry,
        channel,
    );

    let mut resumed = Session::new(6000, fixture_contract());
    resumed.id = id;
    let outcome = controller.resume(resumed, "write a haunting").await.unwrap();
    assert_eq!(outcome.increments, 3);
    assert_eq!(outcome.total_size, 6000);

    // Only two fresh generations; increment 1 came from disk.
    assert_eq!(generation.calls(), 2);
    // The recovered violation constrains the resumed generations.
    assert!(generation.requests()[0].system.contains("already violated"));

    let artifact = store.load_artifact(&id.to_string()).await.unwrap();
    assert!(artifact.starts_with("one "));
    assert!(artifact.contains("\n\ntwo "));
    assert!(artifact.contains("\n\nthree "));
}

#[tokio::test]
async fn assembly_ignores_increments_the_manifest_never_recorded() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());

    let session = Session::new(2000, fixture_contract());
    let id = session.id;

    // A leftover from an earlier aborted run: intact on disk, never indexed
    // by this session's manifest.
    let stray = IncrementFile::new(id.to_string(), 9, "stray leftover prose", 3);
    let session_dir = store.session_dir(&id.to_string());
    tokio::fs::create_dir_all(&session_dir).await.unwrap();
    tokio::fs::write(
        session_dir.join(IncrementFile::filename(9)),
        stray.render(),
    )
    .await
    .unwrap();

    let generation = ScriptedOracle::new().with_step(Step::reply(chunk("only", 2000)));
    let extraction = ScriptedOracle::new().with_step(Step::reply(empty_delta_json()));
    let registry = Arc::new(SessionRegistry::new());
    let (channel, _receiver) = ProgressChannel::new();
    let controller = StageController::new(
        generation,
        extraction,
        store.clone(),
        fast_config(),
        registry,
        channel,
    );

    let outcome = controller.run(session, "write a haunting").await.unwrap();
    assert_eq!(outcome.increments, 1);

    let artifact = store.load_artifact(&id.to_string()).await.unwrap();
    assert!(artifact.starts_with("only "));
    assert!(!artifact.contains("stray leftover prose"));
}

#[tokio::test]
async fn refinement_pass_rewrites_the_artifact() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = IncrementStore::new(dir.path());

    struct CodaPass;

    #[async_trait::async_trait]
    impl ArtifactPass for CodaPass {
        fn name(&self) -> &'static str {
            "refinement"
        }

        async fn run(
            &self,
            artifact: String,
            _prior: Option<&PassReport>,
        ) -> Result<(String, PassReport), PipelineError> {
            let refined = format!("{artifact}\n\n[refined]");
            Ok((refined, PassReport::clean("refinement").modified()))
        }
    }

    let generation = ScriptedOracle::new().with_step(Step::reply(chunk("only", 2000)));
    let extraction = ScriptedOracle::new().with_step(Step::reply(empty_delta_json()));
    let registry = Arc::new(SessionRegistry::new());
    let (channel, _receiver) = ProgressChannel::new();
    let controller = StageController::new(
        generation,
        extraction,
        store.clone(),
        fast_config(),
        registry,
        channel,
    )
    .with_refinement_pass(Box::new(CodaPass));

    let session = Session::new(2000, fixture_contract());
    let id = session.id;
    controller.run(session, "write a haunting").await.unwrap();

    let artifact = store.load_artifact(&id.to_string()).await.unwrap();
    assert!(artifact.ends_with("[refined]"));
    let pass_path = store.session_dir(&id.to_string()).join("pass_refinement.json");
    assert!(tokio::fs::try_exists(&pass_path).await.unwrap());
}
