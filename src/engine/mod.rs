//! Workflow execution: node contract, registry, credential resolution,
//! readiness checks and the run orchestrator.

pub mod credentials;
pub mod executor;
pub mod integrations;
pub mod node;
pub mod nodes;
pub mod readiness;
pub mod registry;
pub mod templating;

pub use executor::{Executor, ExecutorError};
pub use registry::NodeRegistry;
