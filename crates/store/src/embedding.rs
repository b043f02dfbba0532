//! Deterministic local embedding model.
//!
//! Bag-of-words hashing: each lowercase token seeds a pseudo-random vector
//! from its SHA-256 digest, token vectors are summed and the result is
//! L2-normalized. Texts sharing words land close together, and the same text
//! always produces the same vector, across processes and platforms.

use crew_core::EmbeddingModel;
use sha2::{Digest, Sha256};

pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn token_vector(&self, token: &str, out: &mut [f32]) {
        let digest = Sha256::digest(token.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        let mut state = u64::from_le_bytes(seed);
        for slot in out.iter_mut() {
            state = splitmix64(state);
            // top 24 bits → [-1, 1)
            let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
            *slot += unit * 2.0 - 1.0;
        }
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl EmbeddingModel for HashEmbedding {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            self.token_vector(&token, &mut vector);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    fn name(&self) -> &str {
        "hash"
    }
}

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodic::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let model = HashEmbedding::new(64);
        let a = model.embed("Gather ten iron ore");
        let b = model.embed("gather TEN iron ore");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let model = HashEmbedding::default();
        let query = model.embed("gather iron");
        let related = model.embed("finished gather of iron near the river");
        let unrelated = model.embed("placed stone wall");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let model = HashEmbedding::new(8);
        assert!(model.embed("  ...  ").iter().all(|v| *v == 0.0));
    }
}
