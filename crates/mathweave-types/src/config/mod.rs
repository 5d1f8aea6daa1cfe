//! Configuration schema.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Fields accept both `snake_case` and `camelCase` names, and unknown fields
//! are ignored for forward compatibility.
//!
//! # Module Structure
//!
//! - [`guardrail`] -- the guardrail rule catalog, expressed as data

pub mod guardrail;

pub use guardrail::*;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::problem::Category;

/// Shared default function: returns `true`.
pub(crate) fn default_true() -> bool {
    true
}

// ── Root config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub planning: PlanningConfig,

    #[serde(default)]
    pub guardrail: GuardrailConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub reasoner: ReasonerConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

impl PipelineConfig {
    /// Reject settings the orchestrator cannot honour.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let v = &self.verification;
        if v.ensemble_size == 0 || v.ensemble_size % 2 == 0 {
            return Err(invalid(format!(
                "verification.ensemble_size must be odd and positive, got {}",
                v.ensemble_size
            )));
        }
        if !(v.consensus_threshold > 0.0 && v.consensus_threshold <= 1.0) {
            return Err(invalid(format!(
                "verification.consensus_threshold must be in (0, 1], got {}",
                v.consensus_threshold
            )));
        }
        if v.framings.is_empty() {
            return Err(invalid("verification.framings must not be empty".into()));
        }
        if self.escalation.max_escalations == 0 {
            return Err(invalid("escalation.max_escalations must be at least 1".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(invalid("retrieval.top_k must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.routing.confidence_threshold) {
            return Err(invalid(format!(
                "routing.confidence_threshold must be in [0, 1], got {}",
                self.routing.confidence_threshold
            )));
        }
        if self.knowledge.embedding_dimension == 0 {
            return Err(invalid("knowledge.embedding_dimension must be positive".into()));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> PipelineError {
    PipelineError::ConfigInvalid { reason }
}

// ── Parser ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Shortest statement accepted, in characters.
    #[serde(default = "default_min_length", alias = "minLength")]
    pub min_length: usize,

    /// Minimum share of characters that are alphanumeric, whitespace or
    /// mathematical notation.
    #[serde(default = "default_min_clean_ratio", alias = "minCleanRatio")]
    pub min_clean_ratio: f64,

    /// Substrings that mark a garbled OCR/ASR capture.
    #[serde(default = "default_corruption_markers", alias = "corruptionMarkers")]
    pub corruption_markers: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            min_clean_ratio: default_min_clean_ratio(),
            corruption_markers: default_corruption_markers(),
        }
    }
}

fn default_min_length() -> usize {
    3
}
fn default_min_clean_ratio() -> f64 {
    0.5
}
fn default_corruption_markers() -> Vec<String> {
    ["ERROR", "~", "?=", "&", "sec8", "tane", "α1", "β1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ── Routing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Below this confidence the fallback category is used.
    #[serde(default = "default_confidence_threshold", alias = "confidenceThreshold")]
    pub confidence_threshold: f32,

    /// Fallback when the keyword classifier has nothing better.
    #[serde(default = "default_fallback_category", alias = "defaultFallback")]
    pub default_fallback: Category,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            default_fallback: default_fallback_category(),
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.6
}
fn default_fallback_category() -> Category {
    Category::Other
}

// ── Retrieval ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k", alias = "topK")]
    pub top_k: usize,

    /// Deadline for a single store query.
    #[serde(default = "default_retrieval_timeout_ms", alias = "timeoutMs")]
    pub timeout_ms: u64,

    /// Store queries attempted before falling back to an empty context.
    #[serde(default = "default_retrieval_attempts", alias = "maxAttempts")]
    pub max_attempts: u32,

    /// Cap on retrieved text handed to the planner.
    #[serde(default = "default_max_context_chars", alias = "maxContextChars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            timeout_ms: default_retrieval_timeout_ms(),
            max_attempts: default_retrieval_attempts(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_retrieval_timeout_ms() -> u64 {
    2_000
}
fn default_retrieval_attempts() -> u32 {
    2
}
fn default_max_context_chars() -> usize {
    1_500
}

// ── Planning ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Re-plans allowed after guardrail rejections or execution failures.
    #[serde(default = "default_max_replans", alias = "maxReplanAttempts")]
    pub max_replan_attempts: u32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_replan_attempts: default_max_replans(),
        }
    }
}

fn default_max_replans() -> u32 {
    2
}

// ── Verification ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Number of independent verifiers. Must be odd.
    #[serde(default = "default_ensemble_size", alias = "ensembleSize")]
    pub ensemble_size: usize,

    #[serde(default = "default_consensus_threshold", alias = "consensusThreshold")]
    pub consensus_threshold: f64,

    /// Per-verifier deadline. A verifier that misses it abstains.
    #[serde(default = "default_verifier_timeout_ms", alias = "verifierTimeoutMs")]
    pub verifier_timeout_ms: u64,

    #[serde(default = "default_max_reexecutions", alias = "maxReexecutionCycles")]
    pub max_reexecution_cycles: u32,

    /// Prompt framings handed out round-robin to the verifiers.
    #[serde(default = "default_framings")]
    pub framings: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            ensemble_size: default_ensemble_size(),
            consensus_threshold: default_consensus_threshold(),
            verifier_timeout_ms: default_verifier_timeout_ms(),
            max_reexecution_cycles: default_max_reexecutions(),
            framings: default_framings(),
        }
    }
}

fn default_ensemble_size() -> usize {
    3
}
fn default_consensus_threshold() -> f64 {
    2.0 / 3.0
}
fn default_verifier_timeout_ms() -> u64 {
    30_000
}
fn default_max_reexecutions() -> u32 {
    1
}
fn default_framings() -> Vec<String> {
    ["independent-resolve", "back-substitution", "step-audit"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ── Escalation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Escalations allowed per run, across all stages.
    #[serde(default = "default_max_escalations", alias = "maxEscalations")]
    pub max_escalations: u32,

    /// How long a suspended run waits for a human.
    #[serde(default = "default_response_timeout_ms", alias = "responseTimeoutMs")]
    pub response_timeout_ms: u64,

    /// Clarification rounds allowed before ambiguity becomes terminal.
    #[serde(default = "default_max_ambiguity", alias = "maxAmbiguityEscalations")]
    pub max_ambiguity_escalations: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_escalations: default_max_escalations(),
            response_timeout_ms: default_response_timeout_ms(),
            max_ambiguity_escalations: default_max_ambiguity(),
        }
    }
}

fn default_max_escalations() -> u32 {
    5
}
fn default_response_timeout_ms() -> u64 {
    60 * 60 * 1000
}
fn default_max_ambiguity() -> u32 {
    2
}

// ── Reasoner ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// `provider/model` string.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_call_timeout_ms", alias = "callTimeoutMs")]
    pub call_timeout_ms: u64,

    /// Retries after the first attempt, for transient failures only.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms", alias = "baseDelayMs")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms", alias = "maxDelayMs")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter", alias = "jitterFraction")]
    pub jitter_fraction: f64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            call_timeout_ms: default_call_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: default_jitter(),
        }
    }
}

fn default_model() -> String {
    "groq/llama-3.3-70b-versatile".into()
}
fn default_temperature() -> f64 {
    0.0
}
fn default_call_timeout_ms() -> u64 {
    60_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    4_000
}
fn default_jitter() -> f64 {
    0.25
}

// ── Knowledge ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_embedding_dimension", alias = "embeddingDimension")]
    pub embedding_dimension: usize,

    /// Confidence assigned to curated entries.
    #[serde(default = "default_seeded_confidence", alias = "seededConfidence")]
    pub seeded_confidence: f32,

    /// Confidence assigned to entries learned from confirmed runs.
    #[serde(default = "default_learned_confidence", alias = "learnedConfidence")]
    pub learned_confidence: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: default_embedding_dimension(),
            seeded_confidence: default_seeded_confidence(),
            learned_confidence: default_learned_confidence(),
        }
    }
}

fn default_embedding_dimension() -> usize {
    256
}
fn default_seeded_confidence() -> f32 {
    0.8
}
fn default_learned_confidence() -> f32 {
    0.9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.verification.ensemble_size, 3);
        assert!((cfg.verification.consensus_threshold - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(cfg.escalation.max_escalations, 5);
        assert_eq!(cfg.escalation.max_ambiguity_escalations, 2);
        assert_eq!(cfg.planning.max_replan_attempts, 2);
        assert_eq!(cfg.verification.max_reexecution_cycles, 1);
        assert!((cfg.routing.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert!(!cfg.guardrail.rules.is_empty());
        cfg.validate().unwrap();
    }

    #[test]
    fn camel_case_aliases() {
        let json = r#"{
            "retrieval": {"topK": 8, "timeoutMs": 100},
            "verification": {"ensembleSize": 5},
            "escalation": {"maxEscalations": 3}
        }"#;
        let cfg: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.retrieval.top_k, 8);
        assert_eq!(cfg.retrieval.timeout_ms, 100);
        assert_eq!(cfg.verification.ensemble_size, 5);
        assert_eq!(cfg.escalation.max_escalations, 3);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"routing": {"confidence_threshold": 0.7, "mystery": true}, "extra": 1}"#;
        let cfg: PipelineConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.routing.confidence_threshold - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn toml_document_parses() {
        let doc = r#"
            [verification]
            ensemble_size = 5
            consensus_threshold = 0.6

            [reasoner]
            model = "openai/gpt-4o"
        "#;
        let cfg: PipelineConfig = toml::from_str(doc).unwrap();
        assert_eq!(cfg.verification.ensemble_size, 5);
        assert_eq!(cfg.reasoner.model, "openai/gpt-4o");
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_even_ensemble() {
        let mut cfg = PipelineConfig::default();
        cfg.verification.ensemble_size = 4;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("ensemble_size"));
    }

    #[test]
    fn validate_rejects_bad_threshold_and_cap() {
        let mut cfg = PipelineConfig::default();
        cfg.verification.consensus_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.escalation.max_escalations = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.retrieval.top_k = 0;
        assert!(cfg.validate().is_err());
    }
}
