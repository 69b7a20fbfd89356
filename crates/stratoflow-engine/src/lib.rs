//! StratoFlow reconciliation engine
//!
//! Drives remotely managed resources toward a declared configuration. The
//! engine is generic over the remote API and the state store; everything a
//! resource type needs is described by a [`ResourceDefinition`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  strato CLI                     │
//! │            (plan / apply / destroy)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               stratoflow-engine                 │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │             Orchestrator                 │   │
//! │  │  refresh → diff → create/update/delete   │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌────────┐ ┌────────┐ ┌────────┐ ┌─────────┐   │
//! │  │ schema │ │  diff  │ │ mapper │ │ retry / │   │
//! │  │        │ │        │ │        │ │  poll   │   │
//! │  └────────┘ └────────┘ └────────┘ └─────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │   RemoteApi   │ │  StateStore   │
//! │  (HTTP, fake) │ │ (file, memory)│
//! └───────────────┘ └───────────────┘
//! ```

pub mod definition;
pub mod diff;
pub mod error;
pub mod mapper;
pub mod orchestrator;
pub mod plan;
pub mod poll;
pub mod remote;
pub mod retry;
pub mod schema;
pub mod state;
pub mod value;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use definition::{
    DeleteStep, DeleteWait, ResourceDefinition, StatusAttribute, Timeouts, UpdateAction,
    UpdateStyle,
};
pub use diff::{AttributeChange, AttributePath, ChangeSet, Drift, MapDelta, detect_drift, diff, diff_map};
pub use error::{EngineError, ErrorClass, Phase, RemoteError, Result};
pub use mapper::{attributes_to_json, from_response, parse_config, to_request};
pub use orchestrator::{Orchestrator, ReconcileOutcome, Warning};
pub use plan::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use poll::{PollDecision, Poller, StatusWait};
pub use remote::{RemoteApi, RemoteCall, RequestPayload, ResponsePayload};
pub use retry::{BackoffPolicy, RetryExecutor};
pub use schema::{
    Attribute, AttributeKind, CollectionOrder, ListSpec, Mutability, ResourceSchema, ScalarKind,
};
pub use state::{
    FileStateStore, Lifecycle, MemoryStateStore, ObservedState, ResourceAddress, StateLock,
    StateStore,
};
pub use value::{Attributes, DesiredConfig, Value, attributes};
