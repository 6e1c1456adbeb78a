//! Store-facing traits consumed by the search pipeline.

use async_trait::async_trait;

use crate::error::StorageError;

/// Read access to the store's stored-procedure catalog.
///
/// The search pipeline keeps a process-wide cache of `CustomQuery_<hash>`
/// procedure names; this trait is the refresh source for that cache.
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait ProcedureCatalog: Send + Sync {
    /// Lists the names of all custom-query procedures currently in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues; an empty catalog is
    /// an empty list, not an error.
    async fn list_custom_queries(&self) -> Result<Vec<String>, StorageError>;
}
