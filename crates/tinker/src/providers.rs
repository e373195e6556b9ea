pub mod anthropic;
pub mod base;
pub mod mock;

pub use base::{CompletionRequest, EventStream, Provider, StreamEvent};
