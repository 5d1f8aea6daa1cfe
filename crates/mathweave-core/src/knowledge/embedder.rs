//! SimHash-based local embedder.
//!
//! Produces deterministic, fixed-dimension embeddings by hashing each token
//! with [`std::hash::DefaultHasher`] and spreading the hash bits across a
//! float vector, normalised to unit length. No model files, no network.
//! Embeddings are recomputed when a store is loaded, never persisted, so the
//! hasher only needs to be stable within a process.

use std::hash::{DefaultHasher, Hash, Hasher};

/// Text to vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn dimension(&self) -> usize;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "for", "and", "or", "is", "are", "to", "in", "on", "at", "by", "with",
    "find", "what", "if", "then", "that", "this", "be",
];

pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

/// Lowercased tokens with punctuation stripped. Operators and exponents stay
/// attached (`x^2`), which keeps formula shape in the signal.
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || ",.;:?!\"'".contains(c))
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let words = tokens(text);
        if words.is_empty() {
            return vector;
        }

        for word in &words {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let hash = hasher.finish();

            for (i, val) in vector.iter_mut().enumerate() {
                let mixed = hash ^ (i as u64);
                if (mixed >> (i % 64)) & 1 == 1 {
                    *val += 1.0;
                } else {
                    *val -= 1.0;
                }
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut vector {
                *val /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity of two vectors; zero when either is all zeros or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
