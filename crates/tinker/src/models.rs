//! The data types passed between the orchestration loop, the backends and
//! the tools.
//!
//! A backend consumes a conversation of role-tagged messages, each carrying
//! a sequence of content blocks. Tool-use blocks emitted by the assistant
//! are paired, one to one and in order, with tool-result blocks in the
//! immediately following user message. Everything here serializes with
//! serde so hosts can persist conversations however they like.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
