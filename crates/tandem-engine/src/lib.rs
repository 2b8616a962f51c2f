//! Tandem Engine
//!
//! Runs locked state machines: dispatches state instances, follows
//! transitions, suspends instances on correlation ids and resumes them when
//! the coordinator reports every id answered. Pipelines run workflow stages
//! group by group, wiring barriers between the stages of a group.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - load(def) locks a workflow and builds its states         │
//! │  - start / wait_for / pause / resume / abort                │
//! │  - run_pipeline / resume_pipeline                           │
//! └─────────────────────────────────────────────────────────────┘
//!            │ dispatch                          ▲ resume
//!            ▼                                   │
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │   State (tandem-state)   │      │       ResumeRunner       │
//! │  execute → sync or async │      │  select! over cancel and │
//! │  handle_async_response   │      │  coordinator resumptions │
//! └──────────────────────────┘      └──────────────────────────┘
//!            │ register_wait                     ▲
//!            ▼                                   │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Coordinator (tandem-waiter)                 │
//! │  correlation ids → responses, timeouts, first write wins    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tandem_engine::{Engine, EngineConfig, ExecutionArgs};
//! use tandem_store::InMemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = Engine::new(EngineConfig::default(), Arc::new(InMemoryStore::new()));
//! engine.load(workflow)?;
//!
//! let cancel = CancellationToken::new();
//! engine.run(cancel.clone())?;
//!
//! let id = engine.start("deploy", ExecutionArgs::default()).await?;
//! let execution = engine.wait_for(&id).await?;
//! ```

mod config;
mod engine;
mod error;
mod events;
mod pipeline;
mod runner;

pub use config::EngineConfig;
pub use engine::{Engine, ExecutionArgs, StageArgs};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use pipeline::{PipelineRun, StageResult};
