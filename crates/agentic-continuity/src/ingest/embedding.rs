//! Embedding providers.

use crate::error::{ContinuityError, Result};

/// External embedding service: one vector per input text, in order.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercased token is hashed with BLAKE3 into a bucket and a sign;
/// the resulting vector is L2-normalized. Useful offline and in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(ContinuityError::validation(
                "embedding dimension must be positive",
            ));
        }
        Ok(Self { dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let h = u64::from_le_bytes(word);
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Embed `texts` by splitting them into at most `workers` contiguous chunks
/// and calling the provider for each chunk on its own scoped thread.
///
/// Output order matches input order.
pub fn embed_parallel(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    workers: usize,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, texts.len());
    let chunk_size = texts.len().div_ceil(workers);

    let results: Vec<Result<Vec<Vec<f32>>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = texts
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || provider.embed(chunk)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(ContinuityError::Execution(
                        "embedding worker panicked".into(),
                    ))
                })
            })
            .collect()
    });

    let mut out = Vec::with_capacity(texts.len());
    for chunk in results {
        out.extend(chunk?);
    }
    if out.len() != texts.len() {
        return Err(ContinuityError::Execution(format!(
            "embedding provider returned {} vectors for {} texts",
            out.len(),
            texts.len()
        )));
    }
    Ok(out)
}
