//! `engine` crate: workflow definitions, graph validation, condition
//! evaluation, the step runner and the orchestrator.

pub mod approval;
pub mod conditions;
pub mod config;
pub mod dag;
pub mod error;
pub mod events;
pub mod execution;
pub mod models;
pub mod orchestrator;
pub mod step_runner;

pub use approval::ApprovalDecision;
pub use conditions::{ConditionLogic, ConditionOperator, WorkflowCondition};
pub use config::EngineConfig;
pub use dag::validate_graph;
pub use error::EngineError;
pub use events::{DomainEvent, EventPublisher, InMemoryEventBus, TracingEventPublisher};
pub use execution::{ExecutionStatus, StepExecution, StepStatus, WorkflowExecution};
pub use models::{StepKind, Workflow, WorkflowStep, WorkflowTrigger};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};

#[cfg(test)]
mod orchestrator_tests;
