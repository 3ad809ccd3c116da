//! Agents of the company research pipeline.
//!
//! The Supervisor receives a `research_company` request, hands the company
//! name to the Researcher, passes the normalised research to the Document
//! Creator, and returns the written report path to the caller.

pub mod agent;
pub mod document_creator;
pub mod researcher;
pub mod supervisor;
pub mod workflow;

pub use agent::HandoffAgent;
pub use document_creator::{
    enforce_rendering_rules, DocumentCreatorAgent, EnforcedReport, FORBIDDEN_PHRASE,
    NO_SOURCES_SENTENCE,
};
pub use researcher::{CompanyResearch, ResearcherAgent, Section, SCHEMA_KEYS};
pub use supervisor::SupervisorAgent;
pub use workflow::Pipeline;
