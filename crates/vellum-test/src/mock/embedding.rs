//! Mock embedding generator for testing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};
use vellum_vector::{BoxError, EmbeddingGenerator};

use crate::TRACING_TARGET;

/// Configuration for the mock embedding generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct MockEmbeddingConfig {
    /// Number of components of every generated embedding.
    #[cfg_attr(
        feature = "config",
        arg(long = "mock-embedding-dimensions", env = "MOCK_EMBEDDING_DIMENSIONS", default_value_t = 3)
    )]
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for MockEmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
        }
    }
}

fn default_dimensions() -> usize {
    3
}

/// Mock embedding generator for testing.
///
/// Each text is embedded by folding its bytes into buckets and normalizing
/// the result to unit length. Clones share the call counter.
#[derive(Clone, Debug, Default)]
pub struct MockEmbeddingGenerator {
    config: MockEmbeddingConfig,
    calls: Arc<AtomicUsize>,
}

impl MockEmbeddingGenerator {
    /// Creates a new mock embedding generator with the given configuration.
    pub fn new(config: MockEmbeddingConfig) -> Self {
        Self {
            config,
            calls: Arc::default(),
        }
    }

    /// Creates a generator producing vectors of `dimensions` components.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self::new(MockEmbeddingConfig { dimensions })
    }

    /// Returns the number of components of generated embeddings.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Returns how many times the generator was called.
    #[inline]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Embeds one text without counting a call.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let dimensions = self.config.dimensions;
        let mut vector = vec![0.0f32; dimensions];
        if dimensions == 0 {
            return vector;
        }

        for (position, byte) in text.bytes().enumerate() {
            vector[(byte as usize + position) % dimensions] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
        } else {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    async fn generate_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            target: TRACING_TARGET,
            inputs = inputs.len(),
            dimensions = self.config.dimensions,
            "Mock embeddings generated"
        );
        Ok(inputs.iter().map(|input| self.embed(input)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_are_deterministic_and_normalized() {
        let generator = MockEmbeddingGenerator::with_dimensions(8);
        let first = generator.embed("Republic");
        let second = generator.embed("Republic");

        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
        let norm: f32 = first.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_embeds_to_unit_vector() {
        let generator = MockEmbeddingGenerator::default();
        assert_eq!(generator.embed(""), [1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_calls_are_counted_across_clones() {
        let generator = MockEmbeddingGenerator::with_dimensions(4);
        let clone = generator.clone();

        let inputs = vec!["a".to_owned(), "b".to_owned()];
        let embeddings = clone.generate_embeddings(&inputs).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[1], generator.embed("b"));
        assert_eq!(generator.call_count(), 1);
    }
}
