//! Shared-ownership handle over one physical [`PgClient`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{PgClient, PgConn, PgError, PgResult, TRACING_TARGET_HANDLE};

/// State shared by every handle of one lineage.
struct SharedResource {
    client: PgClient,
    owns_resource: bool,
    share_count: AtomicUsize,
}

/// A counted reference to one physical data source.
///
/// A lineage starts with [`ConnectionHandle::acquire`] and grows with
/// [`ConnectionHandle::retain`]. Each handle is one logical reference and is
/// released exactly once, either explicitly with [`ConnectionHandle::release`]
/// or when dropped. When the last reference of an owning lineage is released
/// the pool is closed; a non-owning lineage never closes it and only keeps the
/// count for diagnostics.
///
/// ```rust,no_run
/// use vellum_postgres::{ConnectionHandle, PgConfig};
///
/// let client = PgConfig::new("postgresql://localhost/db").build()?;
/// let handle = ConnectionHandle::acquire(client, true);
/// let shared = handle.retain()?;
/// assert_eq!(handle.share_count(), 2);
/// # Ok::<(), vellum_postgres::PgError>(())
/// ```
pub struct ConnectionHandle {
    shared: Arc<SharedResource>,
    released: AtomicBool,
}

impl ConnectionHandle {
    /// Wraps a data source in a new lineage with a share count of one.
    pub fn acquire(client: PgClient, owns_resource: bool) -> Self {
        tracing::debug!(
            target: TRACING_TARGET_HANDLE,
            owns_resource,
            "Acquired connection handle"
        );

        Self {
            shared: Arc::new(SharedResource {
                client,
                owns_resource,
                share_count: AtomicUsize::new(1),
            }),
            released: AtomicBool::new(false),
        }
    }

    /// Returns a new logical reference to the same data source.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Released`] if this reference was already released.
    pub fn retain(&self) -> PgResult<Self> {
        if self.released.load(Ordering::Acquire) {
            return Err(PgError::Released);
        }

        // This reference is still live, so the count cannot reach zero concurrently.
        let count = self.shared.share_count.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(
            target: TRACING_TARGET_HANDLE,
            share_count = count,
            "Retained connection handle"
        );

        Ok(Self {
            shared: Arc::clone(&self.shared),
            released: AtomicBool::new(false),
        })
    }

    /// Releases this reference. Subsequent calls are no-ops.
    ///
    /// Closes the pool when this was the last reference of an owning lineage.
    /// Never fails.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let remaining = self.shared.share_count.fetch_sub(1, Ordering::AcqRel) - 1;
        tracing::debug!(
            target: TRACING_TARGET_HANDLE,
            share_count = remaining,
            owns_resource = self.shared.owns_resource,
            "Released connection handle"
        );

        if remaining == 0 && self.shared.owns_resource {
            self.shared.client.close();
            tracing::info!(
                target: TRACING_TARGET_HANDLE,
                "Last owning reference released, data source closed"
            );
        }
    }

    /// Gets a pooled connection through this reference.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Released`] once this reference has been released.
    pub async fn get_connection(&self) -> PgResult<PgConn> {
        if self.is_released() {
            return Err(PgError::Released);
        }
        self.shared.client.get_connection().await
    }

    /// Returns whether this reference has been released.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns whether the lineage closes the data source on last release.
    #[inline]
    pub fn owns_resource(&self) -> bool {
        self.shared.owns_resource
    }

    /// Returns the number of live references in this lineage.
    #[inline]
    pub fn share_count(&self) -> usize {
        self.shared.share_count.load(Ordering::Acquire)
    }

    /// Returns the wrapped data source.
    #[inline]
    pub fn client(&self) -> &PgClient {
        &self.shared.client
    }

    /// Returns whether two handles belong to the same lineage.
    #[inline]
    pub fn same_lineage(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("owns_resource", &self.shared.owns_resource)
            .field("share_count", &self.share_count())
            .field("released", &self.is_released())
            .finish()
    }
}
