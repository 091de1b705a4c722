//! Embedding generation capability.

use std::sync::Arc;

use async_trait::async_trait;

use crate::TRACING_TARGET_EMBEDDING;
use crate::error::{BoxError, VectorError, VectorResult};

/// Turns texts into vectors.
///
/// Implementations wrap an external embedding service; collections call it
/// for every `embedded_text` field on write and for text searches.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Generates one embedding per input, in input order.
    async fn generate_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BoxError>;
}

/// Shared embedding generator.
pub type SharedEmbeddingGenerator = Arc<dyn EmbeddingGenerator>;

/// Calls the generator and checks the shape of its output.
pub(crate) async fn generate_checked(
    generator: &dyn EmbeddingGenerator,
    inputs: &[String],
    dimensions: &[usize],
) -> VectorResult<Vec<Vec<f32>>> {
    debug_assert_eq!(inputs.len(), dimensions.len());
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    tracing::debug!(
        target: TRACING_TARGET_EMBEDDING,
        count = inputs.len(),
        "Generating embeddings"
    );

    let embeddings = generator
        .generate_embeddings(inputs)
        .await
        .map_err(VectorError::Embedding)?;

    if embeddings.len() != inputs.len() {
        return Err(VectorError::embedding(format!(
            "expected {} embeddings, generator returned {}",
            inputs.len(),
            embeddings.len()
        )));
    }

    for (embedding, expected) in embeddings.iter().zip(dimensions) {
        if embedding.len() != *expected {
            return Err(VectorError::embedding(format!(
                "expected embedding of {expected} dimensions, generator returned {}",
                embedding.len()
            )));
        }
    }

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Vec<f32>>);

    #[async_trait]
    impl EmbeddingGenerator for Fixed {
        async fn generate_embeddings(&self, _: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_rejects_wrong_count() {
        let generator = Fixed(vec![vec![1.0, 0.0]]);
        let inputs = vec!["a".to_string(), "b".to_string()];

        let err = generate_checked(&generator, &inputs, &[2, 2]).await.unwrap_err();
        assert!(matches!(err, VectorError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimensions() {
        let generator = Fixed(vec![vec![1.0, 0.0, 0.0]]);
        let inputs = vec!["a".to_string()];

        let err = generate_checked(&generator, &inputs, &[2]).await.unwrap_err();
        assert!(err.to_string().contains("2 dimensions"));
    }

    #[tokio::test]
    async fn test_empty_input_skips_generator() {
        let generator = Fixed(vec![vec![1.0]]);
        let embeddings = generate_checked(&generator, &[], &[]).await.unwrap();
        assert!(embeddings.is_empty());
    }
}
