// herald/src/broker/mod.rs

//! The event broker and the types handlers and registrations are built from.

pub mod dispatch;
pub mod handler;
pub mod invocation;
pub mod registration;

pub use dispatch::{EventBroker, EventBrokerBuilder, InvocationOutcome};
pub use handler::{Event, EventHandler};
pub use invocation::Invocation;
pub use registration::Registration;
