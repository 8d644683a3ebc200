//! Repository contracts: one async method per persistence operation.
//!
//! Every method returns a `Result<T, StoreError>`.
//! No business logic, no domain types: rows in, rows out.

pub mod executions;
pub mod workflows;

pub use executions::ExecutionRepository;
pub use workflows::WorkflowRepository;
