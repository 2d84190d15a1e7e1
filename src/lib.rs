//! Learning orchestrator for the Atelier AI marketplace.
//!
//! Coordinates the learning cadence of a set of registered AI agents:
//! collecting marketplace events, running daily / weekly / incremental
//! learning cycles under an exclusive lock, redistributing fresh insights
//! across agents, and triggering maintenance learning for agents whose
//! health drops below threshold.

pub mod agents;
pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod exchange;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

pub use agents::{AgentRegistration, AgentRegistry};
pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use orchestrator::{CycleKind, Orchestrator, TriggerOutcome};
pub use store::OrchestratorStore;
