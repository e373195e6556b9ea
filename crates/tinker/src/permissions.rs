//! The allow/ask/deny boundary around side-effecting tools.
//!
//! Rules are declarative and evaluated in a fixed priority order (deny
//! first, then ask, then allow); the policy layers session state and the
//! permission mode on top and leaves actually asking the user to an
//! injected handler.
pub mod policy;
pub mod rules;

pub use policy::{
    describe_invocation, Decision, PermissionHandler, PermissionMode, PermissionPolicy,
    SessionApprovals,
};
pub use rules::{Action, Rule, RuleSet};
