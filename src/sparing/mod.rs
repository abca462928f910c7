//! Sparing Module
//!
//! Drive swap jobs and their components: validation, spare selection, the
//! topology gateway with its confirmation waits, the swap operations that
//! rewire virtual drives, and the event log writer.

pub mod config;
pub mod engine;
pub mod event_log;
pub mod gateway;
pub mod job;
pub mod metrics;
pub mod selection;
pub mod swap;
pub mod taxonomy;
pub mod tier;
pub mod validation;
pub mod wait;

pub use config::*;
pub use engine::*;
pub use event_log::*;
pub use gateway::*;
pub use job::*;
pub use metrics::*;
pub use selection::*;
pub use swap::*;
pub use taxonomy::*;
pub use tier::*;
pub use validation::*;
pub use wait::*;
