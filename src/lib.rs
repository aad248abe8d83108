//! Agent Coord — coordination core for collaborating career agents.
//!
//! - [`bus`] — pub/sub between agents with request/response correlation
//! - [`knowledge`] — per-run knowledge plus a shared company cache
//! - [`run`] — per-turn execution context, tool-result cache, run registry
//! - [`coordinator`] — the process-wide instance tying them together

pub mod agent;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod knowledge;
pub mod run;

pub use agent::AgentType;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
