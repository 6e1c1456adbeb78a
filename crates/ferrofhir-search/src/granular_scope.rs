//! Two-query include resolution under granular access scopes.
//!
//! When per-resource scope restrictions cannot be folded into a single
//! joined predicate, the search runs in two phases: the primary query
//! returns the matched row keys, then this service fetches the included
//! resources with a second query whose expression is
//! `AND(TrustedResourceIdList(matches), OR(includes))`. The trusted id
//! list carries keys that already passed scope evaluation, so the
//! traversal from them is privileged; the clone keeps scope and
//! compartment restrictions so they still govern the included resources'
//! own visibility.

use std::sync::Arc;

use tracing::debug;

use ferrofhir_core::PrimaryKey;
use ferrofhir_storage::{SearchExecutionResult, StorageError};

use crate::executor::SearchExecutor;
use crate::expression::{Expression, MultiaryOperator, collect_includes};
use crate::options::SearchOptions;

/// Resolves includes for searches restricted by granular scopes.
pub struct GranularScopeIncludesService {
    executor: Arc<dyn SearchExecutor>,
}

impl GranularScopeIncludesService {
    pub fn new(executor: Arc<dyn SearchExecutor>) -> Self {
        Self { executor }
    }

    /// Fetch the includes belonging to an already-executed match phase.
    ///
    /// Short-circuits to an empty result without invoking the delegate
    /// when there is nothing to traverse from or no include directives.
    pub async fn search_includes(
        &self,
        options: &SearchOptions,
        matches: &[PrimaryKey],
    ) -> Result<SearchExecutionResult, StorageError> {
        let includes = options
            .expression
            .as_ref()
            .map(collect_includes)
            .unwrap_or_default();
        if matches.is_empty() || includes.is_empty() {
            return Ok(SearchExecutionResult::empty());
        }

        let include_children: Vec<Expression> =
            includes.into_iter().map(Expression::Include).collect();
        let Some(include_group) = Expression::or(include_children) else {
            return Ok(SearchExecutionResult::empty());
        };

        // The trusted id list is always the top-level AND operand.
        let composite = Expression::Multiary {
            op: MultiaryOperator::And,
            children: vec![
                Expression::TrustedResourceIdList(matches.to_vec()),
                include_group,
            ],
        };

        let mut includes_options = options.clone_for_includes();
        includes_options.expression = Some(composite);

        debug!(
            match_count = matches.len(),
            "Running includes query over trusted match keys"
        );
        self.executor.execute(&includes_options).await
    }
}
