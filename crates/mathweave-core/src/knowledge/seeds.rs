//! Curated reference material loaded into an empty store.

use chrono::Utc;
use tracing::info;

use mathweave_types::StoreError;
use mathweave_types::config::KnowledgeConfig;
use mathweave_types::knowledge::{KnowledgeEntry, Provenance};
use mathweave_types::problem::Category;

use super::{AppendOutcome, KnowledgeStore, entry_key};

struct Seed {
    statement: &'static str,
    solution: &'static str,
    /// `None` for pitfalls, which apply everywhere.
    category: Option<Category>,
}

const SEEDS: &[Seed] = &[
    Seed {
        statement: "Quadratic equations: roots of ax^2 + bx + c = 0",
        solution: "x = (-b ± sqrt(b^2 - 4ac)) / 2a. Discriminant D = b^2 - 4ac: D > 0 distinct real roots, D = 0 equal real roots, D < 0 complex roots. Sum of roots = -b/a, product = c/a.",
        category: Some(Category::Algebra),
    },
    Seed {
        statement: "Vieta's formulas for a cubic ax^3 + bx^2 + cx + d = 0",
        solution: "Sum of roots = -b/a. Sum of pairwise products = c/a. Product of roots = -d/a.",
        category: Some(Category::Algebra),
    },
    Seed {
        statement: "Arithmetic progression: nth term and sum",
        solution: "a_n = a + (n - 1)d. S_n = n/2 * (2a + (n - 1)d).",
        category: Some(Category::Algebra),
    },
    Seed {
        statement: "Geometric progression: nth term and sum",
        solution: "a_n = a * r^(n - 1). S_n = a(r^n - 1)/(r - 1) for r != 1. Infinite sum a/(1 - r) when |r| < 1.",
        category: Some(Category::Algebra),
    },
    Seed {
        statement: "Trigonometric identities",
        solution: "sin^2 + cos^2 = 1. 1 + tan^2 = sec^2. 1 + cot^2 = csc^2. sin(2A) = 2 sinA cosA. cos(2A) = cos^2 A - sin^2 A.",
        category: Some(Category::Trigonometry),
    },
    Seed {
        statement: "General solutions of trigonometric equations",
        solution: "sin x = sin a gives x = n*pi + (-1)^n * a. cos x = cos a gives x = 2n*pi ± a. tan x = tan a gives x = n*pi + a.",
        category: Some(Category::Trigonometry),
    },
    Seed {
        statement: "Standard limits as x approaches 0",
        solution: "lim sin(x)/x = 1. lim (e^x - 1)/x = 1. lim ln(1 + x)/x = 1.",
        category: Some(Category::Calculus),
    },
    Seed {
        statement: "Derivative rules",
        solution: "d/dx sin x = cos x. d/dx cos x = -sin x. d/dx ln x = 1/x. Chain rule: d/dx f(g(x)) = f'(g(x)) * g'(x).",
        category: Some(Category::Calculus),
    },
    Seed {
        statement: "Maxima and minima of y = f(x)",
        solution: "Critical points where dy/dx = 0. If d^2y/dx^2 > 0 the point is a minimum, if < 0 a maximum.",
        category: Some(Category::Calculus),
    },
    Seed {
        statement: "Standard integrals",
        solution: "int x^n dx = x^(n+1)/(n+1) + C for n != -1. int 1/x dx = ln|x| + C. int e^x dx = e^x + C.",
        category: Some(Category::Calculus),
    },
    Seed {
        statement: "Straight lines: slope, point-slope form, parallel and perpendicular lines",
        solution: "m = (y2 - y1)/(x2 - x1). y - y1 = m(x - x1). Parallel: m1 = m2. Perpendicular: m1 * m2 = -1.",
        category: Some(Category::Geometry),
    },
    Seed {
        statement: "Circles: standard and general equation",
        solution: "(x - h)^2 + (y - k)^2 = r^2. General form x^2 + y^2 + 2gx + 2fy + c = 0 has center (-g, -f) and radius sqrt(g^2 + f^2 - c).",
        category: Some(Category::Geometry),
    },
    Seed {
        statement: "Vector dot and cross products",
        solution: "a.b = |a||b|cos(theta). |a x b| = |a||b|sin(theta). Projection of a on b = (a.b)/|b|.",
        category: Some(Category::LinearAlgebra),
    },
    Seed {
        statement: "Probability basics: union and conditional probability",
        solution: "P(A) = favorable/total. P(A or B) = P(A) + P(B) - P(A and B). P(A|B) = P(A and B)/P(B).",
        category: Some(Category::Probability),
    },
    Seed {
        statement: "Pitfall: division by zero when cancelling",
        solution: "Never cancel a variable factor without first establishing it is nonzero. x/x = 1 only if x != 0; the case x = 0 must be checked separately.",
        category: None,
    },
    Seed {
        statement: "Pitfall: squaring both sides of an equation",
        solution: "Squaring can introduce extraneous roots. Substitute every candidate back into the original equation.",
        category: None,
    },
    Seed {
        statement: "Pitfall: domain of logarithms",
        solution: "log_b(a) requires a > 0, b > 0 and b != 1.",
        category: None,
    },
];

/// Curated entries, stamped with the configured seeded confidence.
pub fn seed_entries(config: &KnowledgeConfig) -> Vec<KnowledgeEntry> {
    let now = Utc::now();
    SEEDS
        .iter()
        .map(|s| KnowledgeEntry {
            id: entry_key(s.statement, s.solution),
            statement: s.statement.to_string(),
            canonical_solution: s.solution.to_string(),
            category: s.category,
            provenance: Provenance::Seeded,
            confidence: config.seeded_confidence,
            created_at: now,
        })
        .collect()
}

/// Append every curated entry. Entries already present are skipped, so
/// seeding a populated store is harmless. Returns how many were inserted.
pub async fn seed_store(store: &dyn KnowledgeStore, config: &KnowledgeConfig) -> Result<usize, StoreError> {
    let mut inserted = 0;
    for entry in seed_entries(config) {
        if store.append(entry).await? == AppendOutcome::Inserted {
            inserted += 1;
        }
    }
    info!(inserted, "seeded knowledge store");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathweave_types::knowledge::KnowledgeQuery;

    use crate::knowledge::InMemoryKnowledgeStore;

    #[test]
    fn seed_ids_are_unique() {
        let entries = seed_entries(&KnowledgeConfig::default());
        let mut ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), SEEDS.len());
        assert!(entries.iter().all(|e| e.provenance == Provenance::Seeded));
    }

    #[tokio::test]
    async fn seeding_twice_inserts_once() {
        let store = InMemoryKnowledgeStore::with_dimension(256);
        let config = KnowledgeConfig::default();
        assert_eq!(seed_store(&store, &config).await.unwrap(), SEEDS.len());
        assert_eq!(seed_store(&store, &config).await.unwrap(), 0);
        assert_eq!(store.len().await, SEEDS.len());
    }

    #[tokio::test]
    async fn pitfalls_reach_every_category() {
        let store = InMemoryKnowledgeStore::with_dimension(256);
        seed_store(&store, &KnowledgeConfig::default()).await.unwrap();
        let hits = store
            .search(&KnowledgeQuery {
                text: "cancel x division by zero nonzero".into(),
                category: Some(Category::Algebra),
                k: 5,
            })
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.entry.statement.contains("division by zero")));
    }
}
