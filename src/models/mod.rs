//! # Data Models
//!
//! SeaORM entities persisted by the orchestrator.

pub mod checkpoint_entry;
pub mod job;

pub use checkpoint_entry::{Entity as CheckpointEntry, Model as CheckpointEntryModel};
pub use job::{Entity as Job, JobKind, JobStatus, Model as JobModel};
