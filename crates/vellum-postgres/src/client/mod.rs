//! PostgreSQL data source with connection pooling and shared ownership.
//!
//! [`PgClient`] is the physical resource (a deadpool pool of async diesel
//! connections). [`ConnectionHandle`] is a counted reference to one client that
//! decides when the pool is actually closed.

pub(crate) mod custom_hooks;
mod handle;
mod pg_client;
mod pg_config;

use deadpool::managed::{Object, Pool};
use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
pub use handle::ConnectionHandle;
pub use pg_client::{PgClient, PgConn, PgPoolStatus};
pub use pg_config::PgConfig;

/// Type alias for the connection pool used throughout the workspace.
pub type ConnectionPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Type alias for a connection object from the pool.
pub type PooledConnection = Object<AsyncDieselConnectionManager<AsyncPgConnection>>;
