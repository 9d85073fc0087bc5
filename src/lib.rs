//! # Job Orchestrator Library
//!
//! Asynchronous job orchestration for scrape and backfill work: lifecycle
//! state machine, retry policy, checkpoints, dependency release, queue and
//! worker monitors, SLA tracking and scaling advice.

pub mod broker;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod db;
pub mod dependency;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod monitor;
pub mod repositories;
pub mod retry;
pub mod scaling;
pub mod service;
pub mod sla;
pub mod telemetry;
pub use migration;
