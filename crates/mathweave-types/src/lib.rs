//! # mathweave-types
//!
//! Core types for the mathweave problem-solving pipeline.
//!
//! This crate holds the data model shared by the pipeline stages, the
//! orchestrator and the CLI: problems, plans, traces, verdicts, escalation
//! records, audit trails, configuration, and the error taxonomy. It has no
//! dependency on the reasoning backend or the runtime.

pub mod config;
pub mod error;
pub mod escalation;
pub mod execution;
pub mod explanation;
pub mod feedback;
pub mod knowledge;
pub mod plan;
pub mod problem;
pub mod reasoner;
pub mod run;
pub mod verification;

pub use error::{ErrorClass, PipelineError, ReasonerError, Result, StoreError};
