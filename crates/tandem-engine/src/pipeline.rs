//! Pipeline runs: ordered groups of workflow stages sharing barriers and
//! outputs, and resumption of a previous run from a given stage.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::future::join_all;
use serde::Serialize;
use tandem_config::{PipelineDef, StateDef, StateType};
use tandem_store::{BarrierPlan, ExecutionStatus, PlannedBarrier, WorkflowExecution};
use tandem_workflow::StateMachine;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::engine::{Engine, ExecutionArgs, StageArgs};
use crate::error::EngineError;
use crate::events::ExecutionEvent;

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
  pub element_id: String,
  /// The workflow that actually ran; a synthesized resume workflow for
  /// stages replayed from a previous run.
  pub workflow_id: String,
  /// `None` when the stage never started.
  pub workflow_execution_id: Option<String>,
  pub status: ExecutionStatus,
  pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
  pub pipeline_execution_id: String,
  pub pipeline_id: String,
  pub status: ExecutionStatus,
  /// In declaration order.
  pub stages: Vec<StageResult>,
}

impl PipelineRun {
  pub fn stage(&self, element_id: &str) -> Option<&StageResult> {
    self.stages.iter().find(|s| s.element_id == element_id)
  }
}

/// Identifiers of every barrier state in any graph of the machine.
fn barrier_identifiers(machine: &StateMachine) -> BTreeSet<String> {
  machine
    .graphs()
    .flat_map(|graph| graph.states())
    .filter_map(|state| match &state.state_type {
      StateType::Barrier { identifier } => Some(identifier.clone()),
      _ => None,
    })
    .collect()
}

impl Engine {
  /// Run a pipeline to completion.
  ///
  /// Parallel groups run in order; the stages of a group run concurrently.
  /// A group with any stage that did not succeed stops the run, and the
  /// remaining stages are reported as SKIPPED.
  pub async fn run_pipeline(
    &self,
    pipeline_id: &str,
    args: ExecutionArgs,
  ) -> Result<PipelineRun, EngineError> {
    let pipeline = self.pipeline(pipeline_id)?;
    let workflows = pipeline
      .stages
      .iter()
      .map(|s| (s.element_id.clone(), s.workflow_id.clone()))
      .collect();
    self
      .run_stages(&pipeline, Uuid::new_v4().to_string(), workflows, args)
      .await
  }

  /// Re-run a pipeline starting at the parallel group containing
  /// `resume_from`.
  ///
  /// Stages of earlier groups are not re-executed: each runs a single
  /// `env_resume` state replaying its final state from the previous run,
  /// and the previous run's pipeline outputs are carried over.
  #[instrument(skip(self, args))]
  pub async fn resume_pipeline(
    &self,
    pipeline_id: &str,
    prev_pipeline_execution_id: &str,
    resume_from: &str,
    args: ExecutionArgs,
  ) -> Result<PipelineRun, EngineError> {
    let pipeline = self.pipeline(pipeline_id)?;
    let unknown = || EngineError::UnknownStage {
      pipeline: pipeline_id.to_string(),
      stage: resume_from.to_string(),
    };
    let resume_stage = pipeline.stage(resume_from).ok_or_else(unknown)?;
    let groups = pipeline.parallel_groups();
    let resume_index = groups
      .iter()
      .find(|(_, stages)| stages.iter().any(|s| std::ptr::eq(*s, resume_stage)))
      .map(|(index, _)| *index)
      .ok_or_else(unknown)?;

    let previous: HashMap<String, WorkflowExecution> = self
      .store()
      .list_executions(prev_pipeline_execution_id)
      .await?
      .into_iter()
      .filter_map(|e| Some((e.pipeline_stage_element_id.clone()?, e)))
      .collect();

    let pipeline_execution_id = Uuid::new_v4().to_string();
    let mut workflows = HashMap::new();
    for (index, stages) in &groups {
      for stage in stages {
        if *index >= resume_index {
          workflows.insert(stage.element_id.clone(), stage.workflow_id.clone());
          continue;
        }

        let prev_state_execution_id = previous
          .get(&stage.element_id)
          .and_then(|e| e.final_instance_id.clone());
        if prev_state_execution_id.is_none() {
          warn!(element_id = %stage.element_id, "no previous final state to resume");
        }
        let workflow_id = format!(
          "{}::resume::{}::{}",
          stage.workflow_id, stage.element_id, pipeline_execution_id
        );
        let machine = StateMachine::single_state(
          workflow_id.clone(),
          format!("Resume {}", stage.name),
          StateDef::new(
            "resume",
            StateType::EnvResume {
              prev_pipeline_execution_id: Some(prev_pipeline_execution_id.to_string()),
              prev_state_execution_id,
            },
          ),
        )?;
        self.install(machine)?;
        workflows.insert(stage.element_id.clone(), workflow_id);
      }
    }

    info!(
      pipeline_execution_id = %pipeline_execution_id,
      resume_index,
      "pipeline_resuming"
    );
    self
      .run_stages(&pipeline, pipeline_execution_id, workflows, args)
      .await
  }

  fn stage_workflow<'a>(
    pipeline: &PipelineDef,
    workflows: &'a HashMap<String, String>,
    element_id: &str,
  ) -> Result<&'a str, EngineError> {
    workflows
      .get(element_id)
      .map(String::as_str)
      .ok_or_else(|| EngineError::UnknownStage {
        pipeline: pipeline.pipeline_id.clone(),
        stage: element_id.to_string(),
      })
  }

  async fn plan_barriers(
    &self,
    pipeline: &PipelineDef,
    pipeline_execution_id: &str,
    workflows: &HashMap<String, String>,
  ) -> Result<usize, EngineError> {
    let mut barriers = Vec::new();
    for (index, stages) in pipeline.parallel_groups() {
      let mut participants: BTreeMap<String, Vec<String>> = BTreeMap::new();
      for stage in stages {
        let workflow_id = Self::stage_workflow(pipeline, workflows, &stage.element_id)?;
        let loaded = self.machine(workflow_id)?;
        for identifier in barrier_identifiers(&loaded.machine) {
          participants
            .entry(identifier)
            .or_default()
            .push(stage.element_id.clone());
        }
      }
      barriers.extend(
        participants
          .into_iter()
          .map(|(identifier, participants)| PlannedBarrier {
            identifier,
            parallel_index: index,
            participants,
          }),
      );
    }

    let planned = barriers.len();
    self
      .services()
      .barriers
      .register_plan(&BarrierPlan {
        pipeline_execution_id: pipeline_execution_id.to_string(),
        barriers,
      })
      .await?;
    Ok(planned)
  }

  #[instrument(
    name = "pipeline",
    skip_all,
    fields(pipeline_id = %pipeline.pipeline_id, pipeline_execution_id = %pipeline_execution_id)
  )]
  async fn run_stages(
    &self,
    pipeline: &PipelineDef,
    pipeline_execution_id: String,
    workflows: HashMap<String, String>,
    args: ExecutionArgs,
  ) -> Result<PipelineRun, EngineError> {
    let barriers = self
      .plan_barriers(pipeline, &pipeline_execution_id, &workflows)
      .await?;
    info!(stages = pipeline.stages.len(), barriers, "pipeline_started");
    self.notify(ExecutionEvent::PipelineStarted {
      pipeline_execution_id: pipeline_execution_id.clone(),
      pipeline_id: pipeline.pipeline_id.clone(),
    });

    let mut results = Vec::with_capacity(pipeline.stages.len());
    let mut halted = false;
    for (index, stages) in pipeline.parallel_groups() {
      if halted {
        for stage in stages {
          results.push(StageResult {
            element_id: stage.element_id.clone(),
            workflow_id: Self::stage_workflow(pipeline, &workflows, &stage.element_id)?.to_string(),
            workflow_execution_id: None,
            status: ExecutionStatus::Skipped,
            error_message: Some("not started: an earlier stage did not succeed".to_string()),
          });
        }
        continue;
      }

      let mut started = Vec::with_capacity(stages.len());
      for stage in &stages {
        let workflow_id = Self::stage_workflow(pipeline, &workflows, &stage.element_id)?;
        let mut variables = args.variables.clone();
        variables.extend(stage.variables.clone());
        let stage_args = ExecutionArgs {
          variables,
          context_elements: args.context_elements.clone(),
          stage: Some(StageArgs {
            pipeline_execution_id: pipeline_execution_id.clone(),
            element_id: stage.element_id.clone(),
            parallel_index: index,
          }),
        };
        let execution_id = self.start(workflow_id, stage_args).await?;
        started.push((stage.element_id.clone(), workflow_id.to_string(), execution_id));
      }

      let outcomes = join_all(started.iter().map(|(_, _, id)| self.wait_for(id))).await;
      for ((element_id, workflow_id, _), outcome) in started.into_iter().zip(outcomes) {
        let execution = outcome?;
        if !execution.status.is_positive() {
          halted = true;
        }
        results.push(StageResult {
          element_id,
          workflow_id,
          workflow_execution_id: Some(execution.execution_id),
          status: execution.status,
          error_message: execution.error_message,
        });
      }
    }

    // Worst status among stages that ran.
    let status = results
      .iter()
      .filter(|r| r.workflow_execution_id.is_some())
      .map(|r| r.status)
      .filter(|s| !s.is_positive())
      .max_by_key(|s| s.severity())
      .unwrap_or(ExecutionStatus::Success);

    if status.is_positive() {
      info!(status = %status, "pipeline_completed");
    } else {
      warn!(status = %status, "pipeline_completed");
    }
    self.notify(ExecutionEvent::PipelineCompleted {
      pipeline_execution_id: pipeline_execution_id.clone(),
      status,
    });

    Ok(PipelineRun {
      pipeline_execution_id,
      pipeline_id: pipeline.pipeline_id.clone(),
      status,
      stages: results,
    })
  }
}
