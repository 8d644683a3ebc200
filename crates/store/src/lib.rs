//! `store` crate: persistence contracts for the workflow engine.
//!
//! Provides typed row structs, the async repository traits the engine
//! depends on, and an in-memory implementation used by tests and the CLI.
//! No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use repository::{ExecutionRepository, WorkflowRepository};
