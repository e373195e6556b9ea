pub mod agents;
pub mod errors;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod permissions;
pub mod providers;
pub mod tools;
