//! # TaskWing Agents
//!
//! Analyzer agents that turn repository content into verified findings.
//!
//! ## Pipeline
//!
//! ```text
//! Input (bootstrap | watch + changed files)
//!     │
//!     ├──> ContextGatherer (markdown, manifests, entry points, git, imports)
//!     │
//!     ├──> Agent (single-shot prompt, or tool-calling loop over AgentTools)
//!     │      └─> ChatModel → fenced JSON → Finding[]
//!     │
//!     ├──> Orchestrator (parallel, total, ordered outputs)
//!     │
//!     └──> Verifier (re-reads cited evidence, adjusts confidence)
//! ```
//!
//! Every stage reports progress on a [`StreamBus`].

pub mod agent;
pub mod context;
mod error;
pub mod finding;
pub mod metadata;
pub mod model;
pub mod orchestrator;
pub mod parse;
pub mod process;
pub mod registry;
pub mod stream;
pub mod tools;
pub mod verifier;

pub use agent::{Agent, AgentConfig, Input, Mode, Output};
pub use error::{AgentError, Result};
pub use finding::{
    Confidence, Evidence, EvidenceType, Finding, FindingType, VerificationResult,
    VerificationStatus,
};
pub use model::{ChatModel, ScriptedModel, SharedModel};
pub use orchestrator::Orchestrator;
pub use registry::AgentRegistry;
pub use stream::{StreamBus, StreamEvent, StreamEventType};
pub use verifier::Verifier;
