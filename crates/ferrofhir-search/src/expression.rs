//! Search expression AST.
//!
//! A compiled search query is an immutable tree of predicate nodes. The
//! tree is pure data; SQL emission happens in the generator via one visit
//! method per node kind. Include and chained nodes are directives rather
//! than filters and are partitioned out of the tree before emission.

use ferrofhir_core::{PrimaryKey, ResourceTypeId};

use crate::field_resolver::FieldRole;

/// Relational comparison operators for leaf predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl BinaryOperator {
    /// Get the SQL operator string.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
        }
    }

    /// Whether this is a lower-bound comparison (`>` or `>=`).
    pub fn is_lower_bound(self) -> bool {
        matches!(self, Self::GreaterThan | Self::GreaterThanOrEqual)
    }

    /// Whether this is an upper-bound comparison (`<` or `<=`).
    pub fn is_upper_bound(self) -> bool {
        matches!(self, Self::LessThan | Self::LessThanOrEqual)
    }
}

/// String matching operators, including negated forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    NotEquals,
    NotContains,
    NotStartsWith,
    NotEndsWith,
}

impl StringOperator {
    /// Whether this is one of the negated forms.
    pub fn is_negated(self) -> bool {
        matches!(
            self,
            Self::NotEquals | Self::NotContains | Self::NotStartsWith | Self::NotEndsWith
        )
    }

    /// The positive form of this operator.
    ///
    /// Negated operators emit a `NOT` prefix and then share the positive
    /// operator's escaping and binding path.
    pub fn positive(self) -> Self {
        match self {
            Self::NotEquals => Self::Equals,
            Self::NotContains => Self::Contains,
            Self::NotStartsWith => Self::StartsWith,
            Self::NotEndsWith => Self::EndsWith,
            other => other,
        }
    }
}

/// Boolean combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiaryOperator {
    And,
    Or,
}

/// A typed literal bound into the generated SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    /// RFC 3339 text; lexicographic order matches temporal order.
    Timestamp(String),
}

impl SearchValue {
    /// Get the value as a string for display/debugging.
    pub fn as_display_str(&self) -> String {
        match self {
            Self::Text(s) | Self::Timestamp(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => d.to_string(),
            Self::Boolean(b) => b.to_string(),
        }
    }

    /// Compare two values of the same variant.
    ///
    /// Returns `None` across variants; the optimizer bails out rather than
    /// guessing a coercion.
    pub fn partial_cmp_same_type(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Decimal(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// A named search parameter with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParamRef {
    /// The store-assigned parameter id, used in index predicates and CTE keys.
    pub id: i16,
    /// The parameter name as it appears in queries (e.g., "code", "_lastUpdated").
    pub name: String,
}

impl SearchParamRef {
    pub fn new(id: i16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// An include or reverse-include directive.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeExpression {
    /// The reference search parameter being followed.
    pub param: SearchParamRef,
    /// The resource type the reference rows belong to.
    pub source_type: ResourceTypeId,
    /// Optional restriction on the referenced type.
    pub target_type: Option<ResourceTypeId>,
    /// Reverse direction: fetch resources referencing the matches.
    pub reversed: bool,
    /// Follow chains of references from previously included resources.
    pub iterate: bool,
}

/// One node of the search expression tree.
///
/// The type is closed; generators match exhaustively and declare an
/// explicit unsupported arm only where they are deliberately partial.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A relational comparison on a resolved field.
    Binary {
        field: FieldRole,
        op: BinaryOperator,
        value: SearchValue,
    },

    /// A string match on a resolved field.
    StringMatch {
        field: FieldRole,
        op: StringOperator,
        value: String,
        ignore_case: bool,
    },

    /// Boolean combination of child expressions. Never empty after normalization.
    Multiary {
        op: MultiaryOperator,
        children: Vec<Expression>,
    },

    /// A named parameter's sub-expression; supplies field-resolution context.
    SearchParameter {
        param: SearchParamRef,
        child: Box<Expression>,
    },

    /// The field has no value on the resource.
    MissingField { field: FieldRole },

    /// The parameter has no index rows for the resource.
    MissingSearchParameter { param: SearchParamRef },

    /// A reference traversal into another resource type's predicate.
    Chained {
        param: SearchParamRef,
        source_type: ResourceTypeId,
        target_type: ResourceTypeId,
        reversed: bool,
        child: Box<Expression>,
    },

    /// Membership in an owner resource's compartment.
    Compartment {
        compartment_type: ResourceTypeId,
        compartment_id: String,
    },

    /// Directive to fetch related resources; not a filter.
    Include(IncludeExpression),

    /// A pre-authorized set of row keys that bypasses scope filtering.
    TrustedResourceIdList(Vec<PrimaryKey>),
}

impl Expression {
    /// Combine with AND, collapsing empty and singleton lists.
    pub fn and(children: Vec<Expression>) -> Option<Expression> {
        Self::multiary(MultiaryOperator::And, children)
    }

    /// Combine with OR, collapsing empty and singleton lists.
    pub fn or(children: Vec<Expression>) -> Option<Expression> {
        Self::multiary(MultiaryOperator::Or, children)
    }

    fn multiary(op: MultiaryOperator, mut children: Vec<Expression>) -> Option<Expression> {
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(Expression::Multiary { op, children }),
        }
    }

    /// Name of this node kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Binary { .. } => "Binary",
            Self::StringMatch { .. } => "StringMatch",
            Self::Multiary { .. } => "Multiary",
            Self::SearchParameter { .. } => "SearchParameter",
            Self::MissingField { .. } => "MissingField",
            Self::MissingSearchParameter { .. } => "MissingSearchParameter",
            Self::Chained { .. } => "Chained",
            Self::Compartment { .. } => "Compartment",
            Self::Include(_) => "Include",
            Self::TrustedResourceIdList(_) => "TrustedResourceIdList",
        }
    }
}

/// The disjoint sub-trees of a query after partitioning.
///
/// Include and chained nodes never appear inside an emitted predicate;
/// they are lowered separately at the statement level.
#[derive(Debug, Clone, Default)]
pub struct PartitionedExpression {
    /// The pure filter predicate, if any.
    pub filter: Option<Expression>,
    /// Include and reverse-include directives.
    pub includes: Vec<IncludeExpression>,
    /// Chained traversals lowered as correlated sub-queries.
    pub chained: Vec<Expression>,
}

/// Split a query expression into filter, include, and chained groups.
///
/// Directives are extracted from the top-level AND spine only; nested
/// boolean structure is left intact as filter content.
pub fn partition(expr: Expression) -> PartitionedExpression {
    let mut parts = PartitionedExpression::default();
    let mut filter_children = Vec::new();
    collect(expr, &mut parts, &mut filter_children);
    parts.filter = Expression::and(filter_children);
    parts
}

fn collect(expr: Expression, parts: &mut PartitionedExpression, filter: &mut Vec<Expression>) {
    match expr {
        Expression::Include(include) => parts.includes.push(include),
        chained @ Expression::Chained { .. } => parts.chained.push(chained),
        Expression::Multiary {
            op: MultiaryOperator::And,
            children,
        } => {
            for child in children {
                collect(child, parts, filter);
            }
        }
        // an OR of include directives is itself a directive group
        Expression::Multiary {
            op: MultiaryOperator::Or,
            children,
        } if children
            .iter()
            .all(|c| matches!(c, Expression::Include(_))) =>
        {
            for child in children {
                if let Expression::Include(include) = child {
                    parts.includes.push(include);
                }
            }
        }
        other => filter.push(other),
    }
}

/// Collect include directives from an expression without consuming it.
pub fn collect_includes(expr: &Expression) -> Vec<IncludeExpression> {
    let mut includes = Vec::new();
    collect_includes_into(expr, &mut includes);
    includes
}

fn collect_includes_into(expr: &Expression, out: &mut Vec<IncludeExpression>) {
    match expr {
        Expression::Include(include) => out.push(include.clone()),
        Expression::Multiary { children, .. } => {
            for child in children {
                collect_includes_into(child, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrofhir_core::SurrogateId;

    fn string_match(value: &str) -> Expression {
        Expression::StringMatch {
            field: FieldRole::StringText,
            op: StringOperator::StartsWith,
            value: value.to_string(),
            ignore_case: true,
        }
    }

    fn include(param_id: i16, reversed: bool) -> Expression {
        Expression::Include(IncludeExpression {
            param: SearchParamRef::new(param_id, "subject"),
            source_type: ResourceTypeId(2),
            target_type: Some(ResourceTypeId(1)),
            reversed,
            iterate: false,
        })
    }

    #[test]
    fn test_and_collapses_empty_and_singleton() {
        assert!(Expression::and(vec![]).is_none());

        let single = Expression::and(vec![string_match("a")]).unwrap();
        assert!(matches!(single, Expression::StringMatch { .. }));

        let pair = Expression::and(vec![string_match("a"), string_match("b")]).unwrap();
        assert!(matches!(
            pair,
            Expression::Multiary {
                op: MultiaryOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn test_partition_extracts_directives_from_and_spine() {
        let expr = Expression::and(vec![
            string_match("smith"),
            include(10, false),
            include(11, true),
            Expression::Chained {
                param: SearchParamRef::new(12, "subject"),
                source_type: ResourceTypeId(2),
                target_type: ResourceTypeId(1),
                reversed: false,
                child: Box::new(string_match("jones")),
            },
        ])
        .unwrap();

        let parts = partition(expr);
        assert_eq!(parts.includes.len(), 2);
        assert!(parts.includes[1].reversed);
        assert_eq!(parts.chained.len(), 1);
        assert!(matches!(parts.filter, Some(Expression::StringMatch { .. })));
    }

    #[test]
    fn test_partition_pure_directives_leaves_no_filter() {
        let parts = partition(include(10, false));
        assert!(parts.filter.is_none());
        assert_eq!(parts.includes.len(), 1);
    }

    #[test]
    fn test_collect_includes_is_non_consuming() {
        let expr = Expression::and(vec![string_match("x"), include(10, false)]).unwrap();
        let includes = collect_includes(&expr);
        assert_eq!(includes.len(), 1);
        // expr still usable
        assert_eq!(expr.kind(), "Multiary");
    }

    #[test]
    fn test_string_operator_positive_mapping() {
        assert_eq!(StringOperator::NotContains.positive(), StringOperator::Contains);
        assert_eq!(StringOperator::NotEquals.positive(), StringOperator::Equals);
        assert_eq!(StringOperator::StartsWith.positive(), StringOperator::StartsWith);
        assert!(StringOperator::NotEndsWith.is_negated());
        assert!(!StringOperator::EndsWith.is_negated());
    }

    #[test]
    fn test_value_cross_type_comparison_is_none() {
        let a = SearchValue::Integer(1);
        let b = SearchValue::Text("1".to_string());
        assert!(a.partial_cmp_same_type(&b).is_none());
        assert_eq!(
            SearchValue::Integer(2).partial_cmp_same_type(&SearchValue::Integer(3)),
            Some(std::cmp::Ordering::Less)
        );
    }

    #[test]
    fn test_trusted_id_list_kind() {
        let expr = Expression::TrustedResourceIdList(vec![PrimaryKey::new(
            ResourceTypeId(1),
            SurrogateId::new(5).unwrap(),
        )]);
        assert_eq!(expr.kind(), "TrustedResourceIdList");
    }
}
