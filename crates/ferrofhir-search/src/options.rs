//! Search options: the single-pass configuration object carried through
//! compilation and execution.

use ferrofhir_core::ResourceTypeId;

use crate::continuation::{ContinuationToken, IncludesContinuationToken};
use crate::expression::Expression;
use crate::sort::SortEntry;

/// Everything one search invocation needs: the compiled expression, both
/// continuation tokens, the sort spec, and query hints.
///
/// A clone used for an includes sub-query is made through
/// [`SearchOptions::clone_for_includes`], which resets the continuation
/// state and disables the two-query strategy on the clone.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// The primary resource type being searched.
    pub resource_type_id: ResourceTypeId,
    /// The compiled filter/include expression tree.
    pub expression: Option<Expression>,
    /// Access-scope restriction ANDed into every query this search issues.
    pub scope_expression: Option<Expression>,
    /// Resume state for the match stream.
    pub continuation_token: Option<ContinuationToken>,
    /// Resume state for the includes stream.
    pub includes_continuation_token: Option<IncludesContinuationToken>,
    /// Ordered sort specification.
    pub sort: Vec<SortEntry>,
    /// Requested page size for the match stream.
    pub max_item_count: usize,
    /// Row cap for the includes stream.
    pub include_count: usize,
    /// Project only row keys, not resource bodies.
    pub only_ids: bool,
    /// Store-level hints threaded verbatim into the plan-cache hash.
    pub query_hints: Vec<(String, String)>,
    /// Whether per-resource scope restrictions require the two-query flow.
    pub granular_scope_includes: bool,
    /// Whether this invocation is the includes phase of a search.
    pub is_includes_operation: bool,
    /// Whether a nullable-field sort is executing its second sub-scan.
    pub sort_second_phase: bool,
}

impl SearchOptions {
    pub fn new(resource_type_id: ResourceTypeId) -> Self {
        Self {
            resource_type_id,
            expression: None,
            scope_expression: None,
            continuation_token: None,
            includes_continuation_token: None,
            sort: Vec::new(),
            max_item_count: 10,
            include_count: 1000,
            only_ids: false,
            query_hints: Vec::new(),
            granular_scope_includes: false,
            is_includes_operation: false,
            sort_second_phase: false,
        }
    }

    /// Set the compiled expression.
    #[must_use]
    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Set the access-scope restriction.
    #[must_use]
    pub fn with_scope_expression(mut self, expression: Expression) -> Self {
        self.scope_expression = Some(expression);
        self
    }

    /// Set the match-stream page size.
    #[must_use]
    pub fn with_max_item_count(mut self, count: usize) -> Self {
        self.max_item_count = count;
        self
    }

    /// Set the sort specification.
    #[must_use]
    pub fn with_sort(mut self, sort: Vec<SortEntry>) -> Self {
        self.sort = sort;
        self
    }

    /// Add a store-level query hint.
    #[must_use]
    pub fn with_query_hint(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_hints.push((name.into(), value.into()));
        self
    }

    /// Clone this options object for the includes sub-query of the
    /// two-query flow.
    ///
    /// The clone resets its own continuation state, keeps scope and
    /// compartment restrictions so they still apply to the included
    /// resources' visibility, and disables the two-query strategy so the
    /// includes query cannot recurse into it.
    #[must_use]
    pub fn clone_for_includes(&self) -> Self {
        let mut clone = self.clone();
        clone.continuation_token = None;
        clone.includes_continuation_token = None;
        clone.granular_scope_includes = false;
        clone.is_includes_operation = true;
        clone
    }
}
