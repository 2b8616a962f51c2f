//! Tandem Store
//!
//! This crate provides the execution records and the storage trait the
//! engine persists through. The [`Store`] trait is the persistence boundary;
//! [`InMemoryStore`] is the reference implementation used by the CLI and
//! tests.
//!
//! The [`Store`] trait defines operations for:
//! - Creating, fetching and conditionally updating state execution instances
//! - Workflow execution records
//! - Barrier records with compare-and-set on a version
//! - Sweeping outputs scoped to workflow or pipeline executions

mod barrier;
mod instance;
mod memory;
mod types;

pub use barrier::{
  BarrierInstance, BarrierKey, BarrierParticipant, BarrierPlan, BarrierState, ParticipantStatus,
  PlannedBarrier,
};
pub use instance::{ChildSpec, ExecutionIdentity, StateExecutionInstance};
pub use memory::InMemoryStore;
pub use types::{ContextElement, ExecutionStatus, OutputScope, SweepingOutput, WorkflowExecution};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same id already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),
}

/// Storage trait for execution state.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a new state execution instance.
  async fn create_instance(&self, instance: &StateExecutionInstance) -> Result<(), StoreError>;

  /// Get a state execution instance by ID.
  async fn get_instance(&self, instance_id: &str) -> Result<StateExecutionInstance, StoreError>;

  /// Replace an instance only if its stored status is one of `expected`.
  /// Returns `false` when the stored status did not match.
  async fn update_instance(
    &self,
    instance: &StateExecutionInstance,
    expected: &[ExecutionStatus],
  ) -> Result<bool, StoreError>;

  /// Children of an instance, in creation order.
  async fn list_children(
    &self,
    parent_instance_id: &str,
  ) -> Result<Vec<StateExecutionInstance>, StoreError>;

  /// All instances of a workflow execution, in creation order.
  async fn list_instances(
    &self,
    workflow_execution_id: &str,
  ) -> Result<Vec<StateExecutionInstance>, StoreError>;

  /// Create a new workflow execution.
  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

  /// Get a workflow execution by ID.
  async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution, StoreError>;

  /// Update a workflow execution.
  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

  /// List the workflow executions of a pipeline execution.
  async fn list_executions(
    &self,
    pipeline_execution_id: &str,
  ) -> Result<Vec<WorkflowExecution>, StoreError>;

  /// Register the barrier plan of a pipeline execution.
  async fn save_barrier_plan(&self, plan: &BarrierPlan) -> Result<(), StoreError>;

  async fn get_barrier_plan(
    &self,
    pipeline_execution_id: &str,
  ) -> Result<Option<BarrierPlan>, StoreError>;

  async fn get_barrier(&self, key: &BarrierKey) -> Result<Option<BarrierInstance>, StoreError>;

  /// Insert `barrier` unless one with the same key exists; returns the stored record.
  async fn create_barrier_if_absent(
    &self,
    barrier: &BarrierInstance,
  ) -> Result<BarrierInstance, StoreError>;

  /// Replace the barrier if its stored version still equals `barrier.version`.
  /// On success the stored version is incremented and `true` returned.
  async fn compare_and_set_barrier(&self, barrier: &BarrierInstance) -> Result<bool, StoreError>;

  /// Barriers of a pipeline execution.
  async fn list_barriers(
    &self,
    pipeline_execution_id: &str,
  ) -> Result<Vec<BarrierInstance>, StoreError>;

  /// Save a sweeping output, replacing one with the same scope and name.
  async fn save_output(&self, output: &SweepingOutput) -> Result<(), StoreError>;

  async fn find_output(
    &self,
    scope: OutputScope,
    scope_id: &str,
    name: &str,
  ) -> Result<Option<SweepingOutput>, StoreError>;

  async fn list_outputs(
    &self,
    scope: OutputScope,
    scope_id: &str,
  ) -> Result<Vec<SweepingOutput>, StoreError>;

  /// Copy pipeline-scoped outputs from one pipeline execution to another.
  /// Outputs already present in the target are kept. Returns the number copied.
  async fn copy_pipeline_outputs(
    &self,
    from_pipeline_execution_id: &str,
    to_pipeline_execution_id: &str,
  ) -> Result<usize, StoreError>;
}
