//! Deterministic local embedder: feature hashing over tokens and bigrams,
//! L2-normalized so the output lies on the unit sphere (consistent with the
//! L2-distance-to-similarity mapping the retrieval engine assumes).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::Embedder;
use crate::error::Result;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    fn hash_token(token: &str, dimensions: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % dimensions
    }

    fn hash_sign(token: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{}_sign", token).hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return Ok(embedding);
        }

        let mut tf: HashMap<String, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let tf_score = (1.0 + count / doc_len).ln();
            let idf_score = 1.0 + (token.len() as f32 * 0.1);
            let weight = tf_score * idf_score;
            let idx = Self::hash_token(&token, self.dimensions);
            let sign = Self::hash_sign(&token);
            embedding[idx] += weight * sign;
        }

        for window in tokens.windows(2) {
            let bigram = format!("{}_{}", window[0], window[1]);
            let idx = Self::hash_token(&bigram, self.dimensions);
            let sign = Self::hash_sign(&bigram);
            embedding[idx] += 0.5 * sign;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_yields_same_vector() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.embed("dark mode please").unwrap(), e.embed("dark mode please").unwrap());
    }

    #[test]
    fn output_is_unit_normalized() {
        let e = HashingEmbedder::new(64);
        let v = e.embed("some reasonably long sentence about preferences").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[test]
    fn empty_text_yields_zero_vector_of_right_length() {
        let e = HashingEmbedder::new(32);
        let v = e.embed("   ").unwrap();
        assert_eq!(v.len(), 32);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
