//! Dispatch, transitions, resumption and abort of state instances.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use tandem_barrier::BarrierScope;
use tandem_config::{Definitions, PipelineDef, WorkflowDef};
use tandem_state::{
  ExecutionContext, ExecutionResponse, Services, State, StateError, StateRegistry, StepFactory,
};
use tandem_store::{
  ContextElement, ExecutionIdentity, ExecutionStatus, StateExecutionInstance, Store, StoreError,
  WorkflowExecution,
};
use tandem_waiter::{Coordinator, ResponseData, Resumption};
use tandem_workflow::{StateMachine, WorkflowError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::runner::ResumeRunner;

/// Arguments for starting a workflow execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionArgs {
  /// Merged over the workflow's own variables.
  pub variables: HashMap<String, Value>,
  /// Seed context for the first state.
  pub context_elements: Vec<ContextElement>,
  /// Set when the execution runs as a pipeline stage.
  pub stage: Option<StageArgs>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageArgs {
  pub pipeline_execution_id: String,
  pub element_id: String,
  pub parallel_index: u32,
}

/// A locked machine with every state instantiated, keyed by (graph, name).
pub(crate) struct LoadedMachine {
  pub(crate) machine: Arc<StateMachine>,
  states: HashMap<(Option<String>, String), Arc<dyn State>>,
}

impl LoadedMachine {
  fn state(&self, graph: Option<&str>, name: &str) -> Option<Arc<dyn State>> {
    self
      .states
      .get(&(graph.map(str::to_string), name.to_string()))
      .cloned()
  }
}

struct EngineInner {
  config: EngineConfig,
  services: Arc<Services>,
  registry: RwLock<StateRegistry>,
  notifier: Arc<dyn ExecutionNotifier>,
  machines: RwLock<HashMap<String, Arc<LoadedMachine>>>,
  pipelines: RwLock<HashMap<String, PipelineDef>>,
  /// execution id -> final status signal, for `wait_for`
  completions: Mutex<HashMap<String, watch::Sender<ExecutionStatus>>>,
  /// Serializes read-modify-write of workflow execution records, and
  /// suspension decisions against pause/resume.
  execution_lock: tokio::sync::Mutex<()>,
  resumptions: Mutex<Option<mpsc::UnboundedReceiver<Resumption>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deadline for a wait; `None` when unbounded or beyond what a timestamp
/// can hold.
fn expiry(timeout: Option<Duration>) -> Option<DateTime<Utc>> {
  let timeout = chrono::Duration::from_std(timeout?).ok()?;
  Utc::now().checked_add_signed(timeout)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
  if let Some(message) = panic.downcast_ref::<&str>() {
    *message
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.as_str()
  } else {
    "unknown panic"
  }
}

/// Run a state callback, turning errors and panics into ERROR responses.
async fn guarded<F>(callback: F) -> ExecutionResponse
where
  F: Future<Output = Result<ExecutionResponse, StateError>>,
{
  match AssertUnwindSafe(callback).catch_unwind().await {
    Ok(Ok(response)) => response,
    Ok(Err(e)) => {
      warn!(error = %e, "state_errored");
      ExecutionResponse::error(e.to_string())
    }
    Err(panic) => {
      let message = panic_message(&*panic);
      error!(panic = %message, "state_panicked");
      ExecutionResponse::error(format!("state panicked: {message}"))
    }
  }
}

/// The state-machine engine.
///
/// Cloning is cheap; clones share all state. Call [`Engine::run`] once to
/// start consuming resumptions before starting executions that suspend.
#[derive(Clone)]
pub struct Engine {
  inner: Arc<EngineInner>,
}

impl Engine {
  /// Create an engine with the built-in steps and no-op notifications.
  pub fn new(config: EngineConfig, store: Arc<dyn Store>) -> Self {
    Self::with_notifier(config, store, Arc::new(NoopNotifier))
  }

  /// Create an engine with a custom notifier.
  pub fn with_notifier(
    config: EngineConfig,
    store: Arc<dyn Store>,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    let (coordinator, resumptions) = Coordinator::new(config.response_retention());
    let services = Arc::new(Services::new(store, coordinator, config.timeouts()));
    Self {
      inner: Arc::new(EngineInner {
        config,
        services,
        registry: RwLock::new(StateRegistry::with_builtin_steps()),
        notifier,
        machines: RwLock::new(HashMap::new()),
        pipelines: RwLock::new(HashMap::new()),
        completions: Mutex::new(HashMap::new()),
        execution_lock: tokio::sync::Mutex::new(()),
        resumptions: Mutex::new(Some(resumptions)),
      }),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  pub fn services(&self) -> &Arc<Services> {
    &self.inner.services
  }

  pub fn store(&self) -> &dyn Store {
    self.inner.services.store.as_ref()
  }

  pub fn coordinator(&self) -> &Coordinator {
    &self.inner.services.coordinator
  }

  pub(crate) fn notify(&self, event: ExecutionEvent) {
    self.inner.notifier.notify(event);
  }

  /// Make a step type available to workflows loaded afterwards.
  pub fn register_step(&self, factory: Arc<dyn StepFactory>) {
    self
      .inner
      .registry
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .register(factory);
  }

  /// Start consuming resumptions and sweeping stale responses until
  /// `cancel` fires.
  pub fn run(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, EngineError> {
    let receiver = lock(&self.inner.resumptions)
      .take()
      .ok_or(EngineError::AlreadyRunning)?;
    self
      .coordinator()
      .spawn_sweeper(self.inner.config.sweep_interval(), cancel.child_token());
    let runner = ResumeRunner::new(self.clone(), receiver);
    Ok(tokio::spawn(runner.start(cancel)))
  }

  /// Validate, lock and instantiate a workflow.
  pub fn load(&self, def: WorkflowDef) -> Result<(), EngineError> {
    let machine = StateMachine::lock(def)?;
    self.install(machine)?;
    Ok(())
  }

  pub(crate) fn install(&self, machine: StateMachine) -> Result<String, EngineError> {
    let mut states = HashMap::new();
    {
      let registry = self
        .inner
        .registry
        .read()
        .unwrap_or_else(PoisonError::into_inner);
      for graph in machine.graphs() {
        for def in graph.states() {
          states.insert(
            (graph.graph_id().map(str::to_string), def.name.clone()),
            registry.build(def)?,
          );
        }
      }
    }

    let workflow_id = machine.workflow_id.clone();
    info!(workflow_id = %workflow_id, states = states.len(), "workflow_loaded");
    self
      .inner
      .machines
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(
        workflow_id.clone(),
        Arc::new(LoadedMachine {
          machine: Arc::new(machine),
          states,
        }),
      );
    Ok(workflow_id)
  }

  /// Register a pipeline. Every stage's workflow must already be loaded.
  pub fn load_pipeline(&self, def: PipelineDef) -> Result<(), EngineError> {
    for stage in &def.stages {
      self.machine(&stage.workflow_id)?;
    }
    info!(pipeline_id = %def.pipeline_id, stages = def.stages.len(), "pipeline_loaded");
    self
      .inner
      .pipelines
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(def.pipeline_id.clone(), def);
    Ok(())
  }

  /// Load every workflow, then every pipeline, of a definitions bundle.
  pub fn load_definitions(&self, defs: Definitions) -> Result<(), EngineError> {
    for workflow in defs.workflows {
      self.load(workflow)?;
    }
    for pipeline in defs.pipelines {
      self.load_pipeline(pipeline)?;
    }
    Ok(())
  }

  pub fn workflows(&self) -> Vec<String> {
    let machines = self
      .inner
      .machines
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    let mut ids: Vec<String> = machines.keys().cloned().collect();
    ids.sort();
    ids
  }

  pub fn pipelines(&self) -> Vec<String> {
    let pipelines = self
      .inner
      .pipelines
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    let mut ids: Vec<String> = pipelines.keys().cloned().collect();
    ids.sort();
    ids
  }

  pub(crate) fn pipeline(&self, pipeline_id: &str) -> Result<PipelineDef, EngineError> {
    self
      .inner
      .pipelines
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(pipeline_id)
      .cloned()
      .ok_or_else(|| EngineError::UnknownPipeline(pipeline_id.to_string()))
  }

  pub(crate) fn machine(&self, workflow_id: &str) -> Result<Arc<LoadedMachine>, EngineError> {
    self
      .inner
      .machines
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.to_string()))
  }

  /// Post an external completion for a correlation id.
  pub fn post_response(&self, correlation_id: &str, data: ResponseData) -> bool {
    self.coordinator().post_response(correlation_id, data)
  }

  /// Start a workflow execution and return its id. Execution proceeds in
  /// the background; use [`wait_for`](Self::wait_for) to await the outcome.
  pub async fn start(&self, workflow_id: &str, args: ExecutionArgs) -> Result<String, EngineError> {
    let loaded = self.machine(workflow_id)?;
    let root = loaded.machine.root();
    let initial = root
      .state(root.initial_state())
      .ok_or_else(|| WorkflowError::StateNotFound(root.initial_state().to_string()))?;

    let execution_id = Uuid::new_v4().to_string();
    let stage = args.stage.clone();
    let execution = WorkflowExecution {
      execution_id: execution_id.clone(),
      workflow_id: workflow_id.to_string(),
      pipeline_execution_id: stage.as_ref().map(|s| s.pipeline_execution_id.clone()),
      pipeline_stage_element_id: stage.as_ref().map(|s| s.element_id.clone()),
      pipeline_stage_parallel_index: stage.as_ref().map_or(0, |s| s.parallel_index),
      status: ExecutionStatus::Running,
      started_at: Utc::now(),
      completed_at: None,
      error_message: None,
      final_instance_id: None,
    };
    self.store().create_execution(&execution).await?;
    lock(&self.inner.completions).insert(
      execution_id.clone(),
      watch::channel(ExecutionStatus::Running).0,
    );

    info!(
      execution_id = %execution_id,
      workflow_id = %workflow_id,
      pipeline_execution_id = ?execution.pipeline_execution_id,
      "workflow_started"
    );
    self.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution_id.clone(),
      workflow_id: workflow_id.to_string(),
    });

    let identity = ExecutionIdentity {
      app_id: self.inner.config.app_id.clone(),
      account_id: self.inner.config.account_id.clone(),
      workflow_id: workflow_id.to_string(),
      workflow_execution_id: execution_id.clone(),
      pipeline_execution_id: execution.pipeline_execution_id,
      pipeline_stage_element_id: execution.pipeline_stage_element_id,
      pipeline_stage_parallel_index: execution.pipeline_stage_parallel_index,
    };
    let mut variables = loaded.machine.variables.clone();
    variables.extend(args.variables);
    let mut instance = StateExecutionInstance::root(initial, identity).with_variables(variables);
    instance.context_elements = args.context_elements;

    self.spawn_dispatch(loaded.clone(), instance);
    Ok(execution_id)
  }

  /// Wait until an execution reaches a final status and return its record.
  pub async fn wait_for(&self, execution_id: &str) -> Result<WorkflowExecution, EngineError> {
    let receiver = lock(&self.inner.completions)
      .get(execution_id)
      .map(|tx| tx.subscribe());
    let tracked = receiver.is_some();
    if let Some(mut receiver) = receiver {
      // Errs only once the sender is gone, which happens after completion.
      let _ = receiver.wait_for(|status| status.is_final()).await;
    }

    let execution = self.store().get_execution(execution_id).await?;
    if !tracked && !execution.status.is_final() {
      return Err(EngineError::NotTracked(execution_id.to_string()));
    }
    Ok(execution)
  }

  /// Run `work` in the background; an error fails the whole execution.
  fn spawn_guarded<F>(&self, execution_id: String, work: F)
  where
    F: Future<Output = Result<(), EngineError>> + Send + 'static,
  {
    let engine = self.clone();
    tokio::spawn(async move {
      if let Err(e) = work.await {
        error!(execution_id = %execution_id, error = %e, "dispatch_failed");
        engine.fail_execution(&execution_id, e.to_string()).await;
      }
    });
  }

  /// Persist a fresh instance and run it.
  fn spawn_dispatch(&self, loaded: Arc<LoadedMachine>, instance: StateExecutionInstance) {
    let engine = self.clone();
    let execution_id = instance.identity.workflow_execution_id.clone();
    self.spawn_guarded(execution_id, async move { engine.dispatch(loaded, instance).await });
  }

  /// Run an instance that is already persisted as NEW.
  fn spawn_run(&self, loaded: Arc<LoadedMachine>, instance: StateExecutionInstance) {
    let engine = self.clone();
    let execution_id = instance.identity.workflow_execution_id.clone();
    self.spawn_guarded(execution_id, async move { engine.run_instance(loaded, instance).await });
  }

  async fn fail_execution(&self, execution_id: &str, message: String) {
    if let Err(e) = self
      .complete_execution(execution_id, ExecutionStatus::Error, Some(message), None)
      .await
    {
      error!(execution_id = %execution_id, error = %e, "failed to record execution failure");
    }
  }

  async fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus, EngineError> {
    Ok(self.store().get_execution(execution_id).await?.status)
  }

  fn context(&self, loaded: &LoadedMachine, instance: StateExecutionInstance) -> ExecutionContext {
    ExecutionContext::new(
      instance,
      loaded.machine.clone(),
      self.inner.services.clone(),
    )
  }

  #[instrument(
    name = "dispatch",
    skip_all,
    fields(
      execution_id = %instance.identity.workflow_execution_id,
      instance_id = %instance.id,
      state = %instance.state_name,
    )
  )]
  async fn dispatch(
    &self,
    loaded: Arc<LoadedMachine>,
    mut instance: StateExecutionInstance,
  ) -> Result<(), EngineError> {
    {
      let _guard = self.inner.execution_lock.lock().await;
      let status = self
        .execution_status(&instance.identity.workflow_execution_id)
        .await?;
      if status.is_final() {
        debug!("execution already finished, not dispatching");
        return Ok(());
      }
      if status == ExecutionStatus::Paused {
        // Held until the execution is resumed.
        instance.status = ExecutionStatus::Paused;
        self.store().create_instance(&instance).await?;
        info!("state_paused");
        return Ok(());
      }
      self.store().create_instance(&instance).await?;
    }
    self.run_instance(loaded, instance).await
  }

  async fn run_instance(
    &self,
    loaded: Arc<LoadedMachine>,
    mut instance: StateExecutionInstance,
  ) -> Result<(), EngineError> {
    let graph = instance.child_state_machine_id.clone();
    let Some(state) = loaded.state(graph.as_deref(), &instance.state_name) else {
      // Nested graph absent: nothing to run.
      info!(graph = ?graph, "no runnable state, completing immediately");
      instance.status = ExecutionStatus::Success;
      instance.end_ts = Some(Utc::now());
      if self
        .store()
        .update_instance(&instance, &[ExecutionStatus::New])
        .await?
      {
        self.end_transition(&instance).await?;
      }
      return Ok(());
    };

    instance.status = ExecutionStatus::Running;
    instance.start_ts = Some(Utc::now());
    if !self
      .store()
      .update_instance(&instance, &[ExecutionStatus::New])
      .await?
    {
      debug!("instance already claimed");
      return Ok(());
    }

    info!(kind = %state.kind(), "state_started");
    self.notify(ExecutionEvent::StateStarted {
      execution_id: instance.identity.workflow_execution_id.clone(),
      instance_id: instance.id.clone(),
      state: instance.state_name.clone(),
    });

    let ctx = self.context(&loaded, instance.clone());
    let response = guarded(state.execute(&ctx)).await;
    self.handle_response(loaded, state, instance, response).await
  }

  /// Resume an instance whose correlation ids all have responses.
  #[instrument(name = "resume", skip_all, fields(instance_id = %resumption.instance_id))]
  pub(crate) async fn resume(&self, resumption: Resumption) {
    let instance = match self.store().get_instance(&resumption.instance_id).await {
      Ok(instance) => instance,
      Err(StoreError::NotFound(_)) => {
        warn!("resumed instance not found");
        return;
      }
      Err(e) => {
        error!(error = %e, "failed to load resumed instance");
        return;
      }
    };

    let execution_id = instance.identity.workflow_execution_id.clone();
    if let Err(e) = self.resume_instance(instance, resumption.responses).await {
      error!(execution_id = %execution_id, error = %e, "resume_failed");
      self.fail_execution(&execution_id, e.to_string()).await;
    }
  }

  async fn resume_instance(
    &self,
    mut instance: StateExecutionInstance,
    responses: HashMap<String, ResponseData>,
  ) -> Result<(), EngineError> {
    if instance.status != ExecutionStatus::Waiting {
      debug!(status = %instance.status, "instance no longer waiting");
      return Ok(());
    }

    let loaded = self.machine(&instance.identity.workflow_id)?;
    let state = loaded
      .state(
        instance.child_state_machine_id.as_deref(),
        &instance.state_name,
      )
      .ok_or_else(|| WorkflowError::StateNotFound(instance.state_name.clone()))?;

    // Only WAITING -> RUNNING: an instance aborted meanwhile stays aborted.
    instance.status = ExecutionStatus::Running;
    if !self
      .store()
      .update_instance(&instance, &[ExecutionStatus::Waiting])
      .await?
    {
      debug!("instance changed while waiting, dropping resumption");
      return Ok(());
    }

    info!(state = %instance.state_name, responses = responses.len(), "state_resumed");
    let ctx = self.context(&loaded, instance.clone());
    let response = guarded(state.handle_async_response(&ctx, &responses)).await;
    self.handle_response(loaded, state, instance, response).await
  }

  async fn handle_response(
    &self,
    loaded: Arc<LoadedMachine>,
    state: Arc<dyn State>,
    mut instance: StateExecutionInstance,
    response: ExecutionResponse,
  ) -> Result<(), EngineError> {
    let ExecutionResponse {
      is_async,
      correlation_ids,
      status,
      error_message,
      execution_data,
      context_elements,
      notify_elements,
      state_execution_instances,
    } = response;

    instance.merge_context_elements(&context_elements);
    if execution_data.is_some() {
      instance.execution_data = execution_data;
    }
    if !notify_elements.is_empty() {
      instance.notify_elements = notify_elements;
    }

    if !is_async {
      return self.finish(loaded, instance, status, error_message).await;
    }
    if correlation_ids.is_empty() {
      return self
        .finish(
          loaded,
          instance,
          ExecutionStatus::Error,
          Some("asynchronous response without correlation ids".to_string()),
        )
        .await;
    }

    let timeout = state.timeout(&self.inner.services.timeouts);
    {
      let _guard = self.inner.execution_lock.lock().await;
      let paused = self
        .execution_status(&instance.identity.workflow_execution_id)
        .await?
        == ExecutionStatus::Paused;
      if paused {
        instance.status = ExecutionStatus::Paused;
        instance.expiry_ts = None;
      } else {
        instance.status = ExecutionStatus::Waiting;
        instance.expiry_ts = expiry(timeout);
      }
      if !self
        .store()
        .update_instance(&instance, &[ExecutionStatus::Running])
        .await?
      {
        debug!("instance changed while running, not suspending");
        return Ok(());
      }

      info!(
        correlation_ids = correlation_ids.len(),
        children = state_execution_instances.len(),
        timeout_ms = timeout.map(|t| t.as_millis() as u64),
        paused,
        "state_waiting"
      );
      self.notify(ExecutionEvent::StateWaiting {
        execution_id: instance.identity.workflow_execution_id.clone(),
        instance_id: instance.id.clone(),
        state: instance.state_name.clone(),
        correlation_ids: correlation_ids.clone(),
      });

      if paused {
        self
          .coordinator()
          .register_suspended(&instance.id, correlation_ids)?;
      } else {
        self
          .coordinator()
          .register_wait(&instance.id, correlation_ids, timeout)?;
      }
    }
    for child in state_execution_instances {
      self.spawn_dispatch(loaded.clone(), child);
    }
    Ok(())
  }

  /// Persist a final status and follow the matching transition.
  async fn finish(
    &self,
    loaded: Arc<LoadedMachine>,
    mut instance: StateExecutionInstance,
    status: ExecutionStatus,
    error_message: Option<String>,
  ) -> Result<(), EngineError> {
    let (status, error_message) = if status.is_final() {
      (status, error_message)
    } else {
      (
        ExecutionStatus::Error,
        Some(format!("state returned non-final status {status}")),
      )
    };
    instance.status = status;
    instance.error_message = error_message;
    instance.end_ts = Some(Utc::now());
    if !self
      .store()
      .update_instance(&instance, &[ExecutionStatus::Running])
      .await?
    {
      debug!("instance changed while running, dropping result");
      return Ok(());
    }

    if status.is_positive() {
      info!(status = %status, "state_completed");
    } else {
      warn!(status = %status, error = ?instance.error_message, "state_completed");
    }
    self.notify(ExecutionEvent::StateCompleted {
      execution_id: instance.identity.workflow_execution_id.clone(),
      instance_id: instance.id.clone(),
      state: instance.state_name.clone(),
      status,
      error: instance.error_message.clone(),
    });

    let graph = instance.child_state_machine_id.as_deref();
    let next = if status.is_positive() {
      loaded.machine.success_transition(graph, &instance.state_name)
    } else if status.is_broken() {
      loaded.machine.failure_transition(graph, &instance.state_name)
    } else {
      None
    };

    match next.map(|def| instance.next(def)) {
      Some(next) => {
        self.spawn_dispatch(loaded.clone(), next);
        Ok(())
      }
      None => self.end_transition(&instance).await,
    }
  }

  /// The chain ending at `instance` is done: notify its parent, or complete
  /// the workflow execution when it has none.
  async fn end_transition(&self, instance: &StateExecutionInstance) -> Result<(), EngineError> {
    match &instance.notify_id {
      Some(notify_id) => {
        debug!(notify_id = %notify_id, status = %instance.status, "notifying parent");
        self.coordinator().post_response(
          notify_id,
          ResponseData::Element {
            status: instance.status,
            error_message: instance.error_message.clone(),
            context_elements: instance.notify_elements.clone(),
          },
        );
        Ok(())
      }
      None => {
        self
          .complete_execution(
            &instance.identity.workflow_execution_id,
            instance.status,
            instance.error_message.clone(),
            Some(instance.id.clone()),
          )
          .await
      }
    }
  }

  async fn complete_execution(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    error_message: Option<String>,
    final_instance_id: Option<String>,
  ) -> Result<(), EngineError> {
    let execution = {
      let _guard = self.inner.execution_lock.lock().await;
      let mut execution = self.store().get_execution(execution_id).await?;
      if execution.status.is_final() {
        return Ok(());
      }
      execution.status = status;
      execution.completed_at = Some(Utc::now());
      execution.error_message = error_message.clone();
      if final_instance_id.is_some() {
        execution.final_instance_id = final_instance_id;
      }
      self.store().update_execution(&execution).await?;
      execution
    };

    if status.is_positive() {
      info!(execution_id = %execution_id, status = %status, "workflow_completed");
    } else {
      warn!(
        execution_id = %execution_id,
        status = %status,
        error = ?error_message,
        "workflow_completed"
      );
      self.release_barriers(&execution).await;
    }
    self.notify(ExecutionEvent::WorkflowCompleted {
      execution_id: execution_id.to_string(),
      status,
      error: error_message,
    });

    if let Some(sender) = lock(&self.inner.completions).remove(execution_id) {
      sender.send_replace(status);
    }
    Ok(())
  }

  /// Record a stage that ended without success as failed on its standing
  /// barriers, so peers waiting there are released.
  async fn release_barriers(&self, execution: &WorkflowExecution) {
    let (Some(pipeline_execution_id), Some(element_id)) = (
      &execution.pipeline_execution_id,
      &execution.pipeline_stage_element_id,
    ) else {
      return;
    };
    let scope = BarrierScope {
      pipeline_execution_id: pipeline_execution_id.clone(),
      parallel_index: execution.pipeline_stage_parallel_index,
      pipeline_stage_element_id: element_id.clone(),
      workflow_execution_id: execution.execution_id.clone(),
    };
    match self.inner.services.barriers.fail_participant(&scope).await {
      Ok(0) => {}
      Ok(released) => {
        info!(execution_id = %execution.execution_id, released, "released barriers")
      }
      Err(e) => {
        warn!(execution_id = %execution.execution_id, error = %e, "failed to release barriers")
      }
    }
  }

  /// Abort every non-final instance of a workflow execution.
  ///
  /// Waits are cancelled, abort hooks fire in the background, and the
  /// execution completes as ABORTED. Returns the number of instances aborted.
  #[instrument(skip(self))]
  pub async fn abort_workflow(&self, execution_id: &str) -> Result<usize, EngineError> {
    let mut aborted = 0;
    for mut instance in self.store().list_instances(execution_id).await? {
      if instance.status.is_final() {
        continue;
      }
      instance.status = ExecutionStatus::Aborted;
      instance.end_ts = Some(Utc::now());
      instance.error_message = Some("aborted".to_string());
      if !self
        .store()
        .update_instance(&instance, &ExecutionStatus::ACTIVE)
        .await?
      {
        continue;
      }
      aborted += 1;
      self.coordinator().cancel(&instance.id);
      self.notify(ExecutionEvent::StateCompleted {
        execution_id: execution_id.to_string(),
        instance_id: instance.id.clone(),
        state: instance.state_name.clone(),
        status: ExecutionStatus::Aborted,
        error: instance.error_message.clone(),
      });

      if let Ok(loaded) = self.machine(&instance.identity.workflow_id) {
        let graph = instance.child_state_machine_id.clone();
        if let Some(state) = loaded.state(graph.as_deref(), &instance.state_name) {
          let ctx = self.context(&loaded, instance);
          tokio::spawn(async move {
            state.handle_abort_event(&ctx).await;
          });
        }
      }
    }

    info!(execution_id = %execution_id, aborted, "workflow_aborted");
    self
      .complete_execution(
        execution_id,
        ExecutionStatus::Aborted,
        Some("aborted".to_string()),
        None,
      )
      .await?;
    Ok(aborted)
  }

  /// Pause a running workflow execution.
  ///
  /// Waiting instances move to PAUSED with their timeouts lifted; responses
  /// that arrive meanwhile are kept for when the execution resumes. Instances
  /// not yet started are held as PAUSED too, and so is every successor of a
  /// state that was mid-execution. Returns the number of instances paused.
  #[instrument(skip(self))]
  pub async fn pause_workflow(&self, execution_id: &str) -> Result<usize, EngineError> {
    let _guard = self.inner.execution_lock.lock().await;
    let mut execution = self.store().get_execution(execution_id).await?;
    if execution.status != ExecutionStatus::Running {
      debug!(status = %execution.status, "execution not running, nothing to pause");
      return Ok(0);
    }
    execution.status = ExecutionStatus::Paused;
    self.store().update_execution(&execution).await?;

    let mut paused = 0;
    for mut instance in self.store().list_instances(execution_id).await? {
      let from = instance.status;
      match from {
        ExecutionStatus::New => {}
        // A wait already delivered is left to finish its resumption.
        ExecutionStatus::Waiting if self.coordinator().suspend(&instance.id) => {}
        _ => continue,
      }
      instance.status = ExecutionStatus::Paused;
      instance.expiry_ts = None;
      if self.store().update_instance(&instance, &[from]).await? {
        paused += 1;
      } else if from == ExecutionStatus::Waiting {
        // Aborted meanwhile.
        self.coordinator().cancel(&instance.id);
      }
    }

    info!(execution_id = %execution_id, paused, "workflow_paused");
    self.notify(ExecutionEvent::WorkflowPaused {
      execution_id: execution_id.to_string(),
    });
    Ok(paused)
  }

  /// Resume a paused workflow execution.
  ///
  /// Paused waits return to WAITING with a fresh timeout, and are resumed
  /// straight away when every response arrived during the pause. Instances
  /// held before they started run now. Returns the number of instances
  /// resumed.
  #[instrument(skip(self))]
  pub async fn resume_workflow(&self, execution_id: &str) -> Result<usize, EngineError> {
    let _guard = self.inner.execution_lock.lock().await;
    let mut execution = self.store().get_execution(execution_id).await?;
    if execution.status != ExecutionStatus::Paused {
      debug!(status = %execution.status, "execution not paused, nothing to resume");
      return Ok(0);
    }
    execution.status = ExecutionStatus::Running;
    self.store().update_execution(&execution).await?;

    let loaded = self.machine(&execution.workflow_id)?;
    let mut resumed = 0;
    for mut instance in self.store().list_instances(execution_id).await? {
      if instance.status != ExecutionStatus::Paused {
        continue;
      }

      if self.coordinator().is_waiting(&instance.id) {
        let timeout = loaded
          .state(
            instance.child_state_machine_id.as_deref(),
            &instance.state_name,
          )
          .and_then(|state| state.timeout(&self.inner.services.timeouts));
        instance.status = ExecutionStatus::Waiting;
        instance.expiry_ts = expiry(timeout);
        if self
          .store()
          .update_instance(&instance, &[ExecutionStatus::Paused])
          .await?
        {
          self.coordinator().release(&instance.id, timeout);
          resumed += 1;
        }
      } else {
        instance.status = ExecutionStatus::New;
        if self
          .store()
          .update_instance(&instance, &[ExecutionStatus::Paused])
          .await?
        {
          self.spawn_run(loaded.clone(), instance);
          resumed += 1;
        }
      }
    }

    info!(execution_id = %execution_id, resumed, "workflow_resumed");
    self.notify(ExecutionEvent::WorkflowResumed {
      execution_id: execution_id.to_string(),
    });
    Ok(resumed)
  }

  /// Abort every running workflow execution of a pipeline execution.
  pub async fn abort_pipeline(&self, pipeline_execution_id: &str) -> Result<usize, EngineError> {
    let mut aborted = 0;
    for execution in self.store().list_executions(pipeline_execution_id).await? {
      if execution.status.is_final() {
        continue;
      }
      aborted += self.abort_workflow(&execution.execution_id).await?;
    }
    Ok(aborted)
  }
}
