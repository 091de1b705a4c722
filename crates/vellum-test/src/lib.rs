#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod database;
mod mock;

pub use database::TestDatabase;
pub use mock::{MockEmbeddingConfig, MockEmbeddingGenerator, create_mock_generator};

/// Tracing target for test support.
pub const TRACING_TARGET: &str = "vellum_test";
