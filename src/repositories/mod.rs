//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! Job Store and the durable checkpoint store.

pub mod checkpoint;
pub mod job;

pub use checkpoint::CheckpointRepository;
pub use job::{JobCounts, JobFilter, JobRepository, JobStore, TransitionGuard};
