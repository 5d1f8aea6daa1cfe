//! Write-back of confirmed solutions into the knowledge store.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use mathweave_types::PipelineError;
use mathweave_types::config::KnowledgeConfig;
use mathweave_types::feedback::{FeedbackRecord, UserJudgment};
use mathweave_types::knowledge::{KnowledgeEntry, Provenance};
use mathweave_types::problem::Category;
use mathweave_types::run::FinalOutput;

use crate::knowledge::{AppendOutcome, KnowledgeStore, entry_key};
use crate::pipeline::consensus::canonical_answer;

/// What a write-back did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Learned {
    pub entry_id: String,
    pub outcome: AppendOutcome,
}

/// Only ever writes from an accepted run the user confirmed; incorrect
/// feedback never reaches the store from here.
pub struct SelfLearningStore {
    store: Arc<dyn KnowledgeStore>,
    confidence: f32,
}

impl SelfLearningStore {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: &KnowledgeConfig) -> Self {
        Self {
            store,
            confidence: config.learned_confidence,
        }
    }

    /// Build the entry a confirmed output would be stored as.
    pub fn entry_for(&self, output: &FinalOutput) -> KnowledgeEntry {
        let statement = output.problem.normalized_statement().to_string();
        // A human-selected answer can differ from what the trace derived;
        // the stored solution concludes with the answer the user confirmed.
        let solution = output.trace.render_concluding(&output.final_answer);
        let category = match output.route.effective_category() {
            Category::Other => None,
            c => Some(c),
        };
        KnowledgeEntry {
            id: entry_key(&statement, &solution),
            statement,
            canonical_solution: solution,
            category,
            provenance: Provenance::Learned,
            confidence: self.confidence,
            created_at: Utc::now(),
        }
    }

    /// Store a confirmed-correct output. Submitting the same confirmation
    /// again is a no-op reported as [`AppendOutcome::Duplicate`].
    pub async fn learn(&self, output: &FinalOutput, feedback: &FeedbackRecord) -> Result<Learned, PipelineError> {
        if feedback.user_judgment != UserJudgment::Correct {
            return Err(PipelineError::InvalidFeedback {
                reason: "only confirmed-correct answers are written to the knowledge store".into(),
            });
        }
        if canonical_answer(&feedback.final_answer) != canonical_answer(&output.final_answer) {
            return Err(PipelineError::InvalidFeedback {
                reason: format!(
                    "feedback confirms '{}' but the run answered '{}'",
                    feedback.final_answer, output.final_answer
                ),
            });
        }

        let entry = self.entry_for(output);
        let entry_id = entry.id.clone();
        let outcome = self.store.append(entry).await?;
        info!(run_id = %output.run_id, entry_id = %entry_id, outcome = ?outcome, "knowledge write-back");
        Ok(Learned { entry_id, outcome })
    }
}
