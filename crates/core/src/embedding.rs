use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use futures::future::{self, BoxFuture};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Source of text embeddings. Implementations may call out to a remote service.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;
}

/// Cache key: document identity plus a content hash of the embedded text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingKey {
    pub doc_id: String,
    pub text_hash: String,
}

impl EmbeddingKey {
    pub fn new(doc_id: &str, text: &str) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            text_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
        }
    }
}

/// Injected embedding store. Shared between runs, so implementations use interior mutability.
pub trait EmbeddingCache: Send + Sync {
    fn get(&self, key: &EmbeddingKey) -> Option<Vec<f32>>;
    fn put(&self, key: EmbeddingKey, value: Vec<f32>);
}

#[derive(Debug, Default)]
pub struct InMemoryEmbeddingCache {
    entries: RwLock<FxHashMap<EmbeddingKey, Vec<f32>>>,
}

impl InMemoryEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl EmbeddingCache for InMemoryEmbeddingCache {
    fn get(&self, key: &EmbeddingKey) -> Option<Vec<f32>> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: EmbeddingKey, value: Vec<f32>) {
        self.entries.write().insert(key, value);
    }
}

/// Cache that stores nothing; every lookup goes to the provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmbeddingCache;

impl EmbeddingCache for NoopEmbeddingCache {
    fn get(&self, _key: &EmbeddingKey) -> Option<Vec<f32>> {
        None
    }

    fn put(&self, _key: EmbeddingKey, _value: Vec<f32>) {}
}

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 256,
            seed: 1337,
        }
    }
}

/// Deterministic bag-of-tokens embedder; useful offline and in tests.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.is_empty() {
                continue;
            }
            vector[self.bucket_for(token)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.to_lowercase().hash(&mut hasher);
        (hasher.finish() as usize) % self.config.dimensions.max(1)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(future::ready(Ok(self.embed_text(text))))
    }
}

/// Cosine similarity clamped to `[0, 1]`; `None` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a * norm_b)).clamp(0.0, 1.0))
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
