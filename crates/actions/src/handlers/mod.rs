//! Built-in action handlers, one module per family of action kinds.

pub mod approval;
pub mod delay;
pub mod http;
pub mod notify;
pub mod script;
pub mod task;

pub use approval::ApprovalActionHandler;
pub use delay::DelayActionHandler;
pub use http::{HttpActionHandler, ReqwestTransport};
pub use notify::{EmailActionHandler, NotificationActionHandler};
pub use script::ScriptActionHandler;
pub use task::TaskActionHandler;
