//! User feedback on a final answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserJudgment {
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub final_answer: String,
    pub user_judgment: UserJudgment,
    #[serde(default)]
    pub correction: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn correct(final_answer: impl Into<String>) -> Self {
        Self {
            final_answer: final_answer.into(),
            user_judgment: UserJudgment::Correct,
            correction: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn incorrect(final_answer: impl Into<String>, correction: Option<String>) -> Self {
        Self {
            final_answer: final_answer.into(),
            user_judgment: UserJudgment::Incorrect,
            correction: correction.filter(|c| !c.trim().is_empty()),
            submitted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_correction_is_dropped() {
        let fb = FeedbackRecord::incorrect("7", Some("   ".into()));
        assert!(fb.correction.is_none());
        let fb = FeedbackRecord::incorrect("7", Some("the answer is 9".into()));
        assert_eq!(fb.correction.as_deref(), Some("the answer is 9"));
    }
}
