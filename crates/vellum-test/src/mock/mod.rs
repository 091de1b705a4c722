//! Mock implementations of external capabilities.
//!
//! The embedding generator stands in for an embedding service: it is
//! deterministic and needs no network access.

mod embedding;

pub use embedding::{MockEmbeddingConfig, MockEmbeddingGenerator};
use vellum_vector::SharedEmbeddingGenerator;

/// Creates a shared mock generator producing vectors of `dimensions` components.
pub fn create_mock_generator(dimensions: usize) -> SharedEmbeddingGenerator {
    std::sync::Arc::new(MockEmbeddingGenerator::with_dimensions(dimensions))
}

#[cfg(test)]
mod tests {
    use vellum_vector::EmbeddingGenerator;

    use super::*;

    #[tokio::test]
    async fn test_shared_generator_uses_requested_dimensions() {
        let generator = create_mock_generator(5);
        let embeddings = generator
            .generate_embeddings(&["Republic".to_owned()])
            .await
            .unwrap();
        assert_eq!(embeddings[0].len(), 5);
    }
}
