//! Access to a real PostgreSQL database for integration tests.

use vellum_postgres::{PgClient, PgConfig, PgResult};

use crate::TRACING_TARGET;

/// Environment variable holding the test database URL.
const DATABASE_URL_VAR: &str = "POSTGRES_URL";

/// A PostgreSQL database with the pgvector extension available.
///
/// ```rust,no_run
/// use vellum_test::TestDatabase;
///
/// let Some(database) = TestDatabase::from_env() else {
///     return;
/// };
/// let client = database.client().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct TestDatabase {
    config: PgConfig,
}

impl TestDatabase {
    /// Reads `POSTGRES_URL`, loading a `.env` file first if one exists.
    ///
    /// Returns `None` when the variable is unset, so tests can be skipped.
    pub fn from_env() -> Option<Self> {
        let _ = dotenvy::dotenv();

        match std::env::var(DATABASE_URL_VAR) {
            Ok(url) if !url.is_empty() => Some(Self {
                config: PgConfig::new(url).with_max_connections(4),
            }),
            _ => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    "{DATABASE_URL_VAR} is not set, skipping database test"
                );
                None
            }
        }
    }

    /// Returns the connection configuration.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Creates a new pool for the database.
    pub fn client(&self) -> PgResult<PgClient> {
        self.config.clone().build()
    }

    /// Returns a collection name that no other test uses.
    pub fn unique_name(prefix: &str) -> String {
        format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
    }
}
