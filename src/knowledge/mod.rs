//! Shared knowledge — what the agents of a run have learned, plus a
//! process-wide company cache reused across runs.

pub mod model;
pub mod store;
pub mod summary;

pub use model::{
    CompanyKnowledge, CompanySignal, CompanyUpdate, Confidence, ContextUpdate, NewsItem,
    Recommendation, RunContextBag, RunKnowledge, UserInsight, normalize_company_name,
};
pub use store::KnowledgeStore;
