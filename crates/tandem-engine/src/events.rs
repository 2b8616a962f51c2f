//! Execution events and notifiers for observability.
//!
//! Events are emitted during execution to allow consumers to observe
//! progress, stream to UIs, etc.

use serde::{Deserialize, Serialize};
use tandem_store::ExecutionStatus;
use tokio::sync::mpsc;

/// Events emitted during workflow and pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  /// A state instance moved to RUNNING.
  StateStarted {
    execution_id: String,
    instance_id: String,
    state: String,
  },

  /// A state instance suspended on correlation ids.
  StateWaiting {
    execution_id: String,
    instance_id: String,
    state: String,
    correlation_ids: Vec<String>,
  },

  /// A state instance reached a final status.
  StateCompleted {
    execution_id: String,
    instance_id: String,
    state: String,
    status: ExecutionStatus,
    error: Option<String>,
  },

  /// The execution was paused; no state runs until it is resumed.
  WorkflowPaused {
    execution_id: String,
  },

  WorkflowResumed {
    execution_id: String,
  },

  WorkflowCompleted {
    execution_id: String,
    status: ExecutionStatus,
    error: Option<String>,
  },

  PipelineStarted {
    pipeline_execution_id: String,
    pipeline_id: String,
  },

  PipelineCompleted {
    pipeline_execution_id: String,
    status: ExecutionStatus,
  },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls dispatch.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// A notifier and the receiver its events arrive on.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
