//! Retrieval augmentation: related knowledge for the planner.
//!
//! Store failures never fail a run. After the configured number of attempts
//! the planner gets an empty context flagged as degraded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use mathweave_types::StoreError;
use mathweave_types::config::RetrievalConfig;
use mathweave_types::knowledge::{KnowledgeQuery, RetrievalContext};
use mathweave_types::problem::{Category, Problem};

use crate::knowledge::KnowledgeStore;

pub struct RetrievalAugmentor {
    store: Arc<dyn KnowledgeStore>,
    config: RetrievalConfig,
}

impl RetrievalAugmentor {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    pub fn max_context_chars(&self) -> usize {
        self.config.max_context_chars
    }

    /// Context for `problem` under `category`, and the reason it was
    /// degraded if the store could not be queried.
    pub async fn retrieve(&self, problem: &Problem, category: Category) -> (RetrievalContext, Option<String>) {
        let query = KnowledgeQuery {
            text: problem.normalized_statement().to_string(),
            category: (category != Category::Other).then_some(category),
            k: self.config.top_k,
        };
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let attempts = self.config.max_attempts.max(1);

        let mut last_error = StoreError::Timeout;
        for attempt in 0..attempts {
            let result = tokio::time::timeout(timeout, self.store.search(&query))
                .await
                .unwrap_or(Err(StoreError::Timeout));
            match result {
                Ok(entries) => {
                    debug!(category = %category, hits = entries.len(), attempt, "retrieved knowledge");
                    return (
                        RetrievalContext {
                            entries,
                            degraded: false,
                        },
                        None,
                    );
                }
                Err(err) => {
                    warn!(attempt, error = %err, "knowledge search failed");
                    last_error = err;
                }
            }
        }

        (
            RetrievalContext::empty_degraded(),
            Some(format!("retrieval failed after {attempts} attempt(s): {last_error}")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use mathweave_types::config::KnowledgeConfig;
    use mathweave_types::knowledge::{KnowledgeEntry, ScoredEntry};

    use crate::knowledge::seeds::seed_store;
    use crate::knowledge::{AppendOutcome, InMemoryKnowledgeStore};

    /// Fails the first `failures` searches, then answers empty.
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
        hang: bool,
    }

    #[async_trait]
    impl KnowledgeStore for FlakyStore {
        async fn search(&self, _query: &KnowledgeQuery) -> Result<Vec<ScoredEntry>, StoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            if n < self.failures {
                Err(StoreError::Io(std::io::Error::other("disk on fire")))
            } else {
                Ok(Vec::new())
            }
        }

        async fn append(&self, _entry: KnowledgeEntry) -> Result<AppendOutcome, StoreError> {
            Ok(AppendOutcome::Inserted)
        }

        async fn len(&self) -> usize {
            0
        }

        async fn entries(&self) -> Vec<KnowledgeEntry> {
            Vec::new()
        }
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            timeout_ms: 20,
            max_attempts: 2,
            ..RetrievalConfig::default()
        }
    }

    fn problem(text: &str) -> Problem {
        Problem::new(text, text, vec![])
    }

    #[tokio::test]
    async fn returns_ranked_entries() {
        let store = Arc::new(InMemoryKnowledgeStore::with_dimension(256));
        seed_store(store.as_ref(), &KnowledgeConfig::default()).await.unwrap();
        let augmentor = RetrievalAugmentor::new(store, config());
        let (context, degraded) = augmentor
            .retrieve(&problem("Find the roots of the quadratic equation x^2 - 5x + 6 = 0"), Category::Algebra)
            .await;
        assert!(degraded.is_none());
        assert!(!context.degraded);
        assert!(!context.is_empty());
        assert!(context.entries.len() <= 5);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let store = Arc::new(FlakyStore {
            failures: 1,
            calls: AtomicU32::new(0),
            hang: false,
        });
        let augmentor = RetrievalAugmentor::new(store.clone(), config());
        let (context, degraded) = augmentor.retrieve(&problem("x + 1 = 2"), Category::Algebra).await;
        assert!(degraded.is_none());
        assert!(!context.degraded);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_failure_degrades_to_empty() {
        let store = Arc::new(FlakyStore {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            hang: false,
        });
        let augmentor = RetrievalAugmentor::new(store, config());
        let (context, degraded) = augmentor.retrieve(&problem("x + 1 = 2"), Category::Algebra).await;
        assert!(context.degraded);
        assert!(context.is_empty());
        assert!(degraded.unwrap().contains("disk on fire"));
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let store = Arc::new(FlakyStore {
            failures: 0,
            calls: AtomicU32::new(0),
            hang: true,
        });
        let augmentor = RetrievalAugmentor::new(store, config());
        let (context, degraded) = augmentor.retrieve(&problem("x + 1 = 2"), Category::Algebra).await;
        assert!(context.degraded);
        assert!(degraded.is_some());
    }
}
