//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services own the in-memory state and drive the snapshot store and the
//! spawn providers.

pub mod classifier;
pub mod lifecycle;
pub mod notifier;
pub mod orchestrator;
pub mod registry;

// Re-export for convenience
pub use lifecycle::{LifecycleController, LifecycleError, LifecycleEvent, WorkCounter};
pub use notifier::WebhookNotifier;
pub use orchestrator::{
    CallbackOutcome, OrchestratorError, PipelineEvent, PipelineOrchestrator, SYNTHETIC_COMMIT_REF,
};
