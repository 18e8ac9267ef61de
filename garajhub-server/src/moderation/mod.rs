//! Startup moderation: the lifecycle state machine, join requests, and the
//! coordinator that orders state changes before notifications.

pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod membership;
pub mod types;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{ModerationError, Result};
pub use membership::RejoinPolicy;
