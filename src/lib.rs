//! Drive Sparing Engine
//!
//! Replaces failed drives with hot spares and runs drive-to-drive copies
//! underneath a redundancy ("virtual drive") object, as transactional jobs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Sparing Engine                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Job Runner: Validate -> Select -> UpdateInMemory -> Persist -> Commit│
//! │                                 \______________________/-> Rollback  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────────┐  │
//! │  │ Validator  │  │  Spare     │  │  Swap      │  │  Event Log     │  │
//! │  │            │  │  Selector  │  │  Operations│  │  Writer        │  │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  └───────┬────────┘  │
//! │        └───────────────┴───────┬───────┴─────────────────┘           │
//! │                    ┌───────────┴───────────┐                         │
//! │                    │  Topology Gateway     │                         │
//! │                    │  + confirmation waits │                         │
//! │                    └───────────────────────┘                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Ports: config database, topology, virtual drive, peer, event log,   │
//! │         notifications, clock                                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`sparing`]: Engine, jobs and their components
//! - [`domain`]: Shared types and port traits
//! - [`memory`]: In-memory array implementing every port
//! - [`error`]: Error types and handling

pub mod domain;
pub mod error;
pub mod memory;
pub mod sparing;

// Re-export commonly used types
pub use domain::ports::{
    Clock, ClockRef, ConfigDatabase, EventLog, NotificationBus, PeerMonitor, TopologyService,
    VirtualDriveService,
};

pub use domain::types::{
    CandidateDriveProfile, DesiredSpareProfile, DriveType, JobPhase, JobStatus, ObjectId,
    SwapCommand, SwapRequest, VdConfigMode,
};

pub use error::{Error, ErrorAction, Result};

pub use memory::InMemoryArray;

pub use sparing::{
    ArrayPorts, ConfigUpdateRequest, EventCode, InternalError, JobError, JobReport, ManualClock,
    SparingConfig, SparingEngine, SparingMetrics, TokioClock,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
