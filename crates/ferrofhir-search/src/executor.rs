//! The search execution delegate seam.
//!
//! The compiler layer performs no I/O; executing a compiled search is
//! delegated through this trait. Cancellation and timeout semantics
//! belong to the implementation — the compiler propagates cancellation
//! the async way, by dropping the returned future.

use async_trait::async_trait;

use ferrofhir_storage::{SearchExecutionResult, StorageError};

use crate::options::SearchOptions;

/// Executes one compiled search against the store.
///
/// The pipeline calls this once for the primary query and, through the
/// granular-scope includes service, up to once more for includes.
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    /// Run the search described by `options` and return rows plus
    /// continuation state.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` for infrastructure failures; transient
    /// retry policy is the implementation's concern, not the caller's.
    async fn execute(&self, options: &SearchOptions) -> Result<SearchExecutionResult, StorageError>;
}
