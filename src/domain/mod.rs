//! Domain layer - Shared types and port definitions
//!
//! This module defines the records exchanged with the array and the traits
//! (ports) that adapters implement, following hexagonal architecture
//! principles.

pub mod ports;
pub mod types;

pub use ports::*;
pub use types::*;
