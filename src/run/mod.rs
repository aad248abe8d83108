//! Run scope — per-turn execution context, tool-result cache, and the
//! registry of live runs.

pub mod cache;
pub mod context;
pub mod registry;

pub use cache::{ToolCacheEntry, canonical_json, tool_cache_key};
pub use context::{AgentExecution, AgentPublisher, RunContext, RunContextData, RunSummary};
pub use registry::{RunRegistry, spawn_sweeper};
