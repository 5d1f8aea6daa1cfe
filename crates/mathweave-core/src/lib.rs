//! # mathweave-core
//!
//! Engine for the mathweave problem-solving pipeline.
//!
//! Contains the orchestration state machine, the solving stages, the
//! reasoner client and its OpenAI-compatible adapter, the knowledge store,
//! human-in-the-loop escalation, and run/audit persistence.

pub mod config;
pub mod completion_json;
pub mod reasoner;
pub mod replay;
pub mod llm_adapter;
pub mod prompts;
pub mod expression;
pub mod calculator;
pub mod pipeline;
pub mod knowledge;
pub mod hitl;
pub mod learning;
pub mod audit;
pub mod run_store;
pub mod orchestrator;

pub use orchestrator::{FeedbackOutcome, HumanOperator, Orchestrator, RunFailure, RunOutcome};
pub use pipeline::Pipeline;
