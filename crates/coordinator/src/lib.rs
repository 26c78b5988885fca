//! Workflow engine for scanue.
//!
//! The engine sequences a delegator, a parallel specialist fan-out and an
//! integrator, optionally pausing at a human checkpoint before the answer
//! is final. Every transition is persisted before control returns.
//!
//! # Architecture
//!
//! ```text
//!  submit(task)
//!      │
//!      ▼
//! ┌────────────┐   ≥1 subtask   ┌──────────────────┐
//! │ delegation │ ─────────────▶ │ specialist_fanout│
//! └────────────┘                └────────┬─────────┘
//!      ▲  │ 0 subtasks                   │ fan-in barrier
//!      │  └──────────────┐               ▼
//!      │                 └──────▶ ┌─────────────┐  confident  ┌──────┐
//!      │ modify / reject          │ integration │ ──────────▶ │ done │
//!      │                          └──────┬──────┘             └──────┘
//!      │                                 │ review needed          ▲
//!      │                                 ▼                        │
//!      │                       ┌──────────────────┐   approve     │
//!      └────────────────────── │ human_checkpoint │ ──────────────┘
//!                              └──────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod executor;
pub mod gate;
pub mod retry;
pub mod routing;
pub mod store;

pub use config::{CoordinatorConfig, EngineConfig, StoreBackend, StoreConfig};
pub use engine::{Recovery, RunOutcome, RunReport, WorkflowEngine};
pub use executor::{StageExecutor, NOT_DISPATCHED};
pub use gate::{CheckpointPolicy, GateState, HumanCheckpointGate, Resolution};
pub use retry::{invoke_with_retry, RetryPolicy};
pub use routing::{ReviewPolicy, Router, StageOutcome};
pub use store::{
    decode_snapshot, encode_snapshot, CheckpointStore, FileCheckpointStore,
    InMemoryCheckpointStore, SCHEMA_VERSION,
};
