//! Bounded execution contexts for delegated sub-tasks.
//!
//! An agent owns its own conversation, a tool allow-list and an optional
//! model override; the executor manages the set of live agents and runs
//! them through the same turn loop the top-level session uses.
pub mod agent;
pub mod executor;

pub use agent::{Agent, AgentConfig, AgentKind};
pub use executor::AgentExecutor;
