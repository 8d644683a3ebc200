//! `actions` crate: the `ActionHandler` trait, the action dispatcher and
//! the built-in action implementations.
//!
//! Every action kind a workflow can reference is executed through an
//! [`ActionHandler`] registered with the [`ActionDispatcher`]. Side effects
//! leave the crate only through the collaborator ports in [`ports`].

pub mod action;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod mock;
pub mod ports;
pub mod traits;
pub mod variables;

pub use action::{ActionKind, WorkflowAction};
pub use dispatcher::{ActionDispatcher, Collaborators};
pub use error::{ActionError, PortError, VariableError};
pub use traits::{ActionContext, ActionHandler};
pub use variables::Variables;
