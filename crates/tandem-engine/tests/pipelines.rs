mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{ApprovalFactory, TestEngine, engine, engine_with, fail, log, step, workflow};
use serde_json::json;
use tandem_barrier::ENDURE_MESSAGE;
use tandem_config::{PipelineDef, PipelineStageDef, StateDef, StateType, TransitionDef};
use tandem_engine::{ChannelNotifier, EngineError, ExecutionArgs, ExecutionEvent};
use tandem_store::{BarrierState, ExecutionStatus, OutputScope, Store};
use tandem_waiter::ResponseData;

fn stage(element_id: &str, workflow_id: &str, parallel_with_previous: bool) -> PipelineStageDef {
  PipelineStageDef {
    element_id: element_id.to_string(),
    name: element_id.to_string(),
    workflow_id: workflow_id.to_string(),
    parallel_with_previous,
    variables: HashMap::new(),
  }
}

fn gated(workflow_id: &str, before: StateDef) -> tandem_config::WorkflowDef {
  let first = before.name.clone();
  workflow(
    workflow_id,
    vec![
      before,
      StateDef::new(
        "gate",
        StateType::Barrier {
          identifier: "deploy-gate".to_string(),
        },
      ),
      log("deploy"),
    ],
    vec![
      TransitionDef::on_success(first, "gate"),
      TransitionDef::on_success("gate", "deploy"),
    ],
  )
}

fn rollout(test: &TestEngine, c_prepare: StateDef) {
  test.engine.load(gated("wf-a", log("prepare"))).unwrap();
  test.engine.load(gated("wf-b", log("prepare"))).unwrap();
  test.engine.load(gated("wf-c", c_prepare)).unwrap();
  test.engine.load(workflow("verify", vec![log("check")], vec![])).unwrap();
  test
    .engine
    .load_pipeline(PipelineDef {
      pipeline_id: "rollout".to_string(),
      name: "Rollout".to_string(),
      stages: vec![
        stage("stage-a", "wf-a", false),
        stage("stage-b", "wf-b", true),
        stage("stage-c", "wf-c", true),
        stage("verify", "verify", false),
      ],
    })
    .unwrap();
}

#[tokio::test]
async fn test_parallel_stages_meet_at_barrier() {
  let test = engine();
  rollout(&test, log("prepare"));

  let run = test
    .engine
    .run_pipeline("rollout", ExecutionArgs::default())
    .await
    .unwrap();
  assert_eq!(run.status, ExecutionStatus::Success);
  assert_eq!(run.stages.len(), 4);
  assert!(run.stages.iter().all(|s| s.status == ExecutionStatus::Success));

  let barriers = test
    .store
    .list_barriers(&run.pipeline_execution_id)
    .await
    .unwrap();
  assert_eq!(barriers.len(), 1);
  assert_eq!(barriers[0].state, BarrierState::Down);
  assert_eq!(barriers[0].participants.len(), 3);
}

#[tokio::test]
async fn test_failed_participant_endures_barrier() {
  let test = engine();
  rollout(&test, fail("prepare", "image missing"));

  let run = test
    .engine
    .run_pipeline("rollout", ExecutionArgs::default())
    .await
    .unwrap();
  assert_eq!(run.status, ExecutionStatus::Failed);

  let c = run.stage("stage-c").unwrap();
  assert_eq!(c.status, ExecutionStatus::Failed);
  assert_eq!(c.error_message.as_deref(), Some("image missing"));
  for peer in ["stage-a", "stage-b"] {
    let result = run.stage(peer).unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed, "{peer}");
    assert_eq!(result.error_message.as_deref(), Some(ENDURE_MESSAGE), "{peer}");
  }

  let verify = run.stage("verify").unwrap();
  assert_eq!(verify.status, ExecutionStatus::Skipped);
  assert!(verify.workflow_execution_id.is_none());

  let barriers = test
    .store
    .list_barriers(&run.pipeline_execution_id)
    .await
    .unwrap();
  assert_eq!(barriers[0].state, BarrierState::Endure);
}

fn release(test: &TestEngine, publish: StateDef) {
  test
    .engine
    .load(workflow("build", vec![publish], vec![]))
    .unwrap();
  test
    .engine
    .load(workflow(
      "ship",
      vec![step(
        "announce",
        "log",
        json!({"message": "shipping {{ outputs.artifact }}", "output": "shipped"}),
      )],
      vec![],
    ))
    .unwrap();
  test
    .engine
    .load_pipeline(PipelineDef {
      pipeline_id: "release".to_string(),
      name: "Release".to_string(),
      stages: vec![stage("build", "build", false), stage("ship", "ship", false)],
    })
    .unwrap();
}

#[tokio::test]
async fn test_outputs_flow_between_stages() {
  let test = engine();
  release(
    &test,
    step("publish", "log", json!({"message": "app-v7", "output": "artifact"})),
  );

  let run = test
    .engine
    .run_pipeline("release", ExecutionArgs::default())
    .await
    .unwrap();
  assert_eq!(run.status, ExecutionStatus::Success);

  let shipped = test
    .store
    .find_output(OutputScope::Pipeline, &run.pipeline_execution_id, "shipped")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(shipped.value, json!("shipping app-v7"));
}

#[tokio::test]
async fn test_resume_replays_earlier_stages() {
  let test = engine();
  release(
    &test,
    step("publish", "log", json!({"message": "app-v7", "output": "artifact"})),
  );
  let first = test
    .engine
    .run_pipeline("release", ExecutionArgs::default())
    .await
    .unwrap();

  let resumed = test
    .engine
    .resume_pipeline("release", &first.pipeline_execution_id, "ship", ExecutionArgs::default())
    .await
    .unwrap();
  assert_eq!(resumed.status, ExecutionStatus::Success);
  assert_ne!(resumed.pipeline_execution_id, first.pipeline_execution_id);

  let build = resumed.stage("build").unwrap();
  assert!(build.workflow_id.starts_with("build::resume::"));
  assert_eq!(build.status, ExecutionStatus::Success);

  // Nothing re-published the artifact; it was carried over.
  let shipped = test
    .store
    .find_output(OutputScope::Pipeline, &resumed.pipeline_execution_id, "shipped")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(shipped.value, json!("shipping app-v7"));

  let executions = test
    .store
    .list_executions(&resumed.pipeline_execution_id)
    .await
    .unwrap();
  assert_eq!(executions.len(), 2);
}

#[tokio::test]
async fn test_resume_reproduces_prior_failure() {
  let test = engine();
  release(&test, fail("publish", "registry down"));
  let first = test
    .engine
    .run_pipeline("release", ExecutionArgs::default())
    .await
    .unwrap();
  assert_eq!(first.status, ExecutionStatus::Failed);
  assert_eq!(first.stage("ship").unwrap().status, ExecutionStatus::Skipped);

  let resumed = test
    .engine
    .resume_pipeline("release", &first.pipeline_execution_id, "ship", ExecutionArgs::default())
    .await
    .unwrap();
  let build = resumed.stage("build").unwrap();
  assert_eq!(build.status, ExecutionStatus::Failed);
  assert_eq!(build.error_message.as_deref(), Some("registry down"));
  assert_eq!(resumed.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_resume_from_unknown_stage() {
  let test = engine();
  release(&test, log("publish"));
  let err = test
    .engine
    .resume_pipeline("release", "pipe-0", "deploy", ExecutionArgs::default())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::UnknownStage { stage, .. } if stage == "deploy"));
}

#[tokio::test]
async fn test_abort_pipeline_stops_running_stages() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let test = engine_with(Arc::new(notifier));
  test
    .engine
    .load(workflow(
      "slow",
      vec![StateDef::new("pause", StateType::Wait { duration_secs: 600 })],
      vec![],
    ))
    .unwrap();
  test
    .engine
    .load_pipeline(PipelineDef {
      pipeline_id: "slow".to_string(),
      name: "Slow".to_string(),
      stages: vec![stage("one", "slow", false), stage("two", "slow", true)],
    })
    .unwrap();

  let engine = test.engine.clone();
  let run =
    tokio::spawn(async move { engine.run_pipeline("slow", ExecutionArgs::default()).await });

  let mut pipeline_execution_id = None;
  let mut waiting = 0;
  while waiting < 2 {
    match events.recv().await.unwrap() {
      ExecutionEvent::PipelineStarted {
        pipeline_execution_id: id,
        ..
      } => pipeline_execution_id = Some(id),
      ExecutionEvent::StateWaiting { .. } => waiting += 1,
      _ => {}
    }
  }

  let aborted = test
    .engine
    .abort_pipeline(&pipeline_execution_id.unwrap())
    .await
    .unwrap();
  assert_eq!(aborted, 2);
  let run = run.await.unwrap().unwrap();
  assert_eq!(run.status, ExecutionStatus::Aborted);
  assert!(run.stages.iter().all(|s| s.status == ExecutionStatus::Aborted));
}

#[tokio::test]
async fn test_participant_aborted_at_barrier_endures_it() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let test = engine_with(Arc::new(notifier));
  test.engine.register_step(Arc::new(ApprovalFactory));
  test.engine.load(gated("wf-a", log("prepare"))).unwrap();
  test
    .engine
    .load(gated("wf-b", step("prepare", "approval", json!({}))))
    .unwrap();
  test
    .engine
    .load_pipeline(PipelineDef {
      pipeline_id: "guarded".to_string(),
      name: "Guarded".to_string(),
      stages: vec![stage("stage-a", "wf-a", false), stage("stage-b", "wf-b", true)],
    })
    .unwrap();

  let engine = test.engine.clone();
  let run =
    tokio::spawn(async move { engine.run_pipeline("guarded", ExecutionArgs::default()).await });

  // stage-a waits at the gate while stage-b waits on its approval.
  let (mut at_gate, mut approving) = (None, None);
  while at_gate.is_none() || approving.is_none() {
    if let ExecutionEvent::StateWaiting {
      execution_id,
      state,
      ..
    } = events.recv().await.unwrap()
    {
      match state.as_str() {
        "gate" => at_gate = Some(execution_id),
        "prepare" => approving = Some(execution_id),
        _ => {}
      }
    }
  }

  let at_gate = at_gate.unwrap();
  assert_eq!(test.engine.abort_workflow(&at_gate).await.unwrap(), 1);
  test.engine.post_response(
    &format!("approval:{}", approving.unwrap()),
    ResponseData::success(),
  );

  let run = run.await.unwrap().unwrap();
  assert_eq!(run.stage("stage-a").unwrap().status, ExecutionStatus::Aborted);
  let b = run.stage("stage-b").unwrap();
  assert_eq!(b.status, ExecutionStatus::Failed);
  assert_eq!(b.error_message.as_deref(), Some(ENDURE_MESSAGE));
  assert_eq!(run.status, ExecutionStatus::Failed);

  let barriers = test
    .store
    .list_barriers(&run.pipeline_execution_id)
    .await
    .unwrap();
  assert_eq!(barriers[0].state, BarrierState::Endure);
}
