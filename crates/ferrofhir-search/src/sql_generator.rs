//! SQL generation from search expressions.
//!
//! Emission is visitor-shaped: one method per AST node kind on
//! [`SqlExpressionVisitor`], whose default bodies fail fast so a
//! deliberately partial generator cannot silently emit incorrect SQL.
//! [`PredicateGenerator`] lowers the pure filter tree to a WHERE fragment;
//! [`SqlSearchQueryBuilder`] assembles the full statement: base predicate
//! CTEs, iterative-include CTEs, final projection with ORDER BY from the
//! sort spec, and the row-limit clause.

use thiserror::Error;

use ferrofhir_core::{PrimaryKey, ResourceTypeId};

use crate::continuation::ContinuationToken;
use crate::expression::{
    BinaryOperator, Expression, IncludeExpression, MultiaryOperator, SearchParamRef, SearchValue,
    StringOperator, partition,
};
use crate::field_resolver::{self, FieldRole, SURROGATE_ID_PARAMETER};
use crate::options::SearchOptions;
use crate::param_hasher::HashingParameterManager;

/// Errors raised during SQL generation.
///
/// Every variant signals a compiler or schema defect introduced upstream,
/// not a user input problem; callers surface them as generic internal
/// errors and never as partially built SQL.
#[derive(Debug, Error)]
pub enum SqlGenError {
    #[error("{kind} expressions are not supported by the {generator} generator")]
    UnsupportedExpression {
        generator: &'static str,
        kind: &'static str,
    },

    #[error("Field role {role:?} is not valid for parameter '{param}'")]
    InvalidFieldRole { param: String, role: FieldRole },
}

impl SqlGenError {
    /// All generation errors are internal (5xx category).
    pub fn is_internal(&self) -> bool {
        true
    }
}

/// Visitor over the expression AST, one method per node kind.
///
/// Default method bodies fail fast with `UnsupportedExpression`; a
/// generator overrides exactly the kinds it can lower, so an AST shape
/// reaching a generator that cannot handle it is surfaced as a coverage
/// defect instead of wrong SQL.
pub trait SqlExpressionVisitor {
    /// The generator's name for diagnostics.
    fn generator_name(&self) -> &'static str;

    /// Dispatch on the node kind.
    fn visit(&mut self, expr: &Expression) -> Result<(), SqlGenError> {
        match expr {
            Expression::Binary { field, op, value } => self.visit_binary(*field, *op, value),
            Expression::StringMatch {
                field,
                op,
                value,
                ignore_case,
            } => self.visit_string_match(*field, *op, value, *ignore_case),
            Expression::Multiary { op, children } => self.visit_multiary(*op, children),
            Expression::SearchParameter { param, child } => {
                self.visit_search_parameter(param, child)
            }
            Expression::MissingField { field } => self.visit_missing_field(*field),
            Expression::MissingSearchParameter { param } => {
                self.visit_missing_search_parameter(param)
            }
            Expression::Chained {
                param,
                source_type,
                target_type,
                reversed,
                child,
            } => self.visit_chained(param, *source_type, *target_type, *reversed, child),
            Expression::Compartment {
                compartment_type,
                compartment_id,
            } => self.visit_compartment(*compartment_type, compartment_id),
            Expression::Include(include) => self.visit_include(include),
            Expression::TrustedResourceIdList(keys) => self.visit_trusted_id_list(keys),
        }
    }

    fn visit_binary(
        &mut self,
        _field: FieldRole,
        _op: BinaryOperator,
        _value: &SearchValue,
    ) -> Result<(), SqlGenError> {
        Err(self.unsupported("Binary"))
    }

    fn visit_string_match(
        &mut self,
        _field: FieldRole,
        _op: StringOperator,
        _value: &str,
        _ignore_case: bool,
    ) -> Result<(), SqlGenError> {
        Err(self.unsupported("StringMatch"))
    }

    fn visit_multiary(
        &mut self,
        _op: MultiaryOperator,
        _children: &[Expression],
    ) -> Result<(), SqlGenError> {
        Err(self.unsupported("Multiary"))
    }

    fn visit_search_parameter(
        &mut self,
        _param: &SearchParamRef,
        _child: &Expression,
    ) -> Result<(), SqlGenError> {
        Err(self.unsupported("SearchParameter"))
    }

    fn visit_missing_field(&mut self, _field: FieldRole) -> Result<(), SqlGenError> {
        Err(self.unsupported("MissingField"))
    }

    fn visit_missing_search_parameter(
        &mut self,
        _param: &SearchParamRef,
    ) -> Result<(), SqlGenError> {
        Err(self.unsupported("MissingSearchParameter"))
    }

    fn visit_chained(
        &mut self,
        _param: &SearchParamRef,
        _source_type: ResourceTypeId,
        _target_type: ResourceTypeId,
        _reversed: bool,
        _child: &Expression,
    ) -> Result<(), SqlGenError> {
        Err(self.unsupported("Chained"))
    }

    fn visit_compartment(
        &mut self,
        _compartment_type: ResourceTypeId,
        _compartment_id: &str,
    ) -> Result<(), SqlGenError> {
        Err(self.unsupported("Compartment"))
    }

    fn visit_include(&mut self, _include: &IncludeExpression) -> Result<(), SqlGenError> {
        Err(self.unsupported("Include"))
    }

    fn visit_trusted_id_list(&mut self, _keys: &[PrimaryKey]) -> Result<(), SqlGenError> {
        Err(self.unsupported("TrustedResourceIdList"))
    }

    fn unsupported(&self, kind: &'static str) -> SqlGenError {
        SqlGenError::UnsupportedExpression {
            generator: self.generator_name(),
            kind,
        }
    }
}

/// Escape LIKE metacharacters in a literal before pattern substitution.
pub fn escape_like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Whether a parameter name is a framework-level parameter resolved
/// against the resource table rather than the search index.
fn is_framework_param(name: &str) -> bool {
    name.starts_with('_')
}

/// Lowers a pure filter tree to a WHERE fragment.
///
/// Include nodes are not filters and fail fast here; the statement
/// builder partitions them out before this generator runs.
pub struct PredicateGenerator<'a> {
    sql: String,
    params: &'a mut HashingParameterManager,
    param_context: Vec<SearchParamRef>,
    resource_alias: String,
    index_alias: String,
    depth: usize,
}

impl<'a> PredicateGenerator<'a> {
    pub fn new(params: &'a mut HashingParameterManager) -> Self {
        Self {
            sql: String::new(),
            params,
            param_context: Vec::new(),
            resource_alias: field_resolver::RESOURCE_ALIAS.to_string(),
            index_alias: field_resolver::INDEX_ALIAS.to_string(),
            depth: 0,
        }
    }

    /// Lower an expression, consuming the generator.
    pub fn generate(mut self, expr: &Expression) -> Result<String, SqlGenError> {
        self.visit(expr)?;
        Ok(self.sql)
    }

    fn current_param_name(&self) -> &str {
        self.param_context
            .last()
            .map(|p| p.name.as_str())
            .unwrap_or("")
    }

    fn column(&self, role: FieldRole) -> Result<String, SqlGenError> {
        let column = field_resolver::resolve(self.current_param_name(), role)?;
        Ok(self.retarget(column))
    }

    /// Redirect the resolver's fixed aliases at the aliases of the scope
    /// currently being emitted (correlated sub-queries get fresh ones).
    fn retarget(&self, column: String) -> String {
        if let Some(rest) = column.strip_prefix("r.") {
            format!("{}.{rest}", self.resource_alias)
        } else if let Some(rest) = column.strip_prefix("p.") {
            format!("{}.{rest}", self.index_alias)
        } else {
            column
        }
    }
}

impl SqlExpressionVisitor for PredicateGenerator<'_> {
    fn generator_name(&self) -> &'static str {
        "predicate"
    }

    fn visit_binary(
        &mut self,
        field: FieldRole,
        op: BinaryOperator,
        value: &SearchValue,
    ) -> Result<(), SqlGenError> {
        let column = self.column(field)?;
        // Range bounds change selectivity; they opt into the plan-cache hash.
        let in_hash = matches!(field, FieldRole::RangeStart | FieldRole::RangeEnd);
        let placeholder = self.params.add(&column, value.clone(), in_hash);
        self.sql
            .push_str(&format!("{column} {} ${placeholder}", op.as_sql()));
        Ok(())
    }

    fn visit_string_match(
        &mut self,
        field: FieldRole,
        op: StringOperator,
        value: &str,
        ignore_case: bool,
    ) -> Result<(), SqlGenError> {
        let column = self.column(field)?;
        let negated = op.is_negated();
        if negated {
            self.sql.push_str("NOT (");
        }

        // Negated forms fall through to the positive operator's emission;
        // escaping and binding are never duplicated.
        let like = if ignore_case { "ILIKE" } else { "LIKE" };
        match op.positive() {
            StringOperator::Equals => {
                let placeholder =
                    self.params
                        .add(&column, SearchValue::Text(value.to_string()), false);
                if ignore_case {
                    self.sql
                        .push_str(&format!("LOWER({column}) = LOWER(${placeholder})"));
                } else {
                    self.sql.push_str(&format!("{column} = ${placeholder}"));
                }
            }
            StringOperator::Contains => {
                let pattern = format!("%{}%", escape_like_pattern(value));
                let placeholder = self.params.add(&column, SearchValue::Text(pattern), false);
                self.sql
                    .push_str(&format!("{column} {like} ${placeholder} ESCAPE '\\'"));
            }
            StringOperator::StartsWith => {
                let pattern = format!("{}%", escape_like_pattern(value));
                let placeholder = self.params.add(&column, SearchValue::Text(pattern), false);
                self.sql
                    .push_str(&format!("{column} {like} ${placeholder} ESCAPE '\\'"));
            }
            StringOperator::EndsWith => {
                let pattern = format!("%{}", escape_like_pattern(value));
                let placeholder = self.params.add(&column, SearchValue::Text(pattern), false);
                self.sql
                    .push_str(&format!("{column} {like} ${placeholder} ESCAPE '\\'"));
            }
            // positive() never returns a negated form
            negated_op => {
                return Err(SqlGenError::UnsupportedExpression {
                    generator: self.generator_name(),
                    kind: match negated_op {
                        StringOperator::NotEquals => "NotEquals",
                        StringOperator::NotContains => "NotContains",
                        StringOperator::NotStartsWith => "NotStartsWith",
                        _ => "NotEndsWith",
                    },
                });
            }
        }

        if negated {
            self.sql.push(')');
        }
        Ok(())
    }

    fn visit_multiary(
        &mut self,
        op: MultiaryOperator,
        children: &[Expression],
    ) -> Result<(), SqlGenError> {
        let (wrap, separator) = match op {
            MultiaryOperator::And => (false, " AND "),
            MultiaryOperator::Or => (true, " OR "),
        };
        if wrap {
            self.sql.push('(');
        }
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(separator);
            }
            self.visit(child)?;
        }
        if wrap {
            self.sql.push(')');
        }
        Ok(())
    }

    fn visit_search_parameter(
        &mut self,
        param: &SearchParamRef,
        child: &Expression,
    ) -> Result<(), SqlGenError> {
        if is_framework_param(&param.name) {
            // Framework parameters resolve against the resource table
            // directly; no index correlation is needed.
            self.param_context.push(param.clone());
            let result = self.visit(child);
            self.param_context.pop();
            return result;
        }

        self.depth += 1;
        let alias = format!("p{}", self.depth);
        let outer = self.resource_alias.clone();
        self.sql.push_str(&format!(
            "EXISTS (SELECT 1 FROM resource_search_index {alias} \
             WHERE {alias}.resource_type_id = {outer}.resource_type_id \
             AND {alias}.resource_surrogate_id = {outer}.resource_surrogate_id \
             AND {alias}.search_param_id = {} AND ",
            param.id
        ));
        let saved = std::mem::replace(&mut self.index_alias, alias);
        self.param_context.push(param.clone());
        let result = self.visit(child);
        self.param_context.pop();
        self.index_alias = saved;
        result?;
        self.sql.push(')');
        Ok(())
    }

    fn visit_missing_field(&mut self, field: FieldRole) -> Result<(), SqlGenError> {
        let column = self.column(field)?;
        self.sql.push_str(&format!("{column} IS NULL"));
        Ok(())
    }

    fn visit_missing_search_parameter(
        &mut self,
        param: &SearchParamRef,
    ) -> Result<(), SqlGenError> {
        self.depth += 1;
        let alias = format!("p{}", self.depth);
        let outer = &self.resource_alias;
        self.sql.push_str(&format!(
            "NOT EXISTS (SELECT 1 FROM resource_search_index {alias} \
             WHERE {alias}.resource_type_id = {outer}.resource_type_id \
             AND {alias}.resource_surrogate_id = {outer}.resource_surrogate_id \
             AND {alias}.search_param_id = {})",
            param.id
        ));
        Ok(())
    }

    fn visit_chained(
        &mut self,
        param: &SearchParamRef,
        source_type: ResourceTypeId,
        target_type: ResourceTypeId,
        reversed: bool,
        child: &Expression,
    ) -> Result<(), SqlGenError> {
        self.depth += 1;
        let refs = format!("ref{}", self.depth);
        let joined = format!("r{}", self.depth);
        let outer = self.resource_alias.clone();

        if reversed {
            // The joined rows are the referencing resources; the outer row
            // is the one being referenced.
            self.sql.push_str(&format!(
                "EXISTS (SELECT 1 FROM resource_reference {refs} \
                 JOIN resource {joined} ON {joined}.resource_type_id = {refs}.resource_type_id \
                 AND {joined}.resource_surrogate_id = {refs}.resource_surrogate_id \
                 WHERE {refs}.referenced_resource_type_id = {outer}.resource_type_id \
                 AND {refs}.referenced_resource_surrogate_id = {outer}.resource_surrogate_id \
                 AND {refs}.search_param_id = {} AND {refs}.resource_type_id = {} AND ",
                param.id, source_type.0
            ));
        } else {
            self.sql.push_str(&format!(
                "EXISTS (SELECT 1 FROM resource_reference {refs} \
                 JOIN resource {joined} ON {joined}.resource_type_id = {refs}.referenced_resource_type_id \
                 AND {joined}.resource_surrogate_id = {refs}.referenced_resource_surrogate_id \
                 WHERE {refs}.resource_type_id = {outer}.resource_type_id \
                 AND {refs}.resource_surrogate_id = {outer}.resource_surrogate_id \
                 AND {refs}.search_param_id = {} AND {joined}.resource_type_id = {} AND ",
                param.id, target_type.0
            ));
        }

        let saved = std::mem::replace(&mut self.resource_alias, joined);
        let result = self.visit(child);
        self.resource_alias = saved;
        result?;
        self.sql.push(')');
        Ok(())
    }

    fn visit_compartment(
        &mut self,
        compartment_type: ResourceTypeId,
        compartment_id: &str,
    ) -> Result<(), SqlGenError> {
        self.depth += 1;
        let alias = format!("c{}", self.depth);
        let outer = self.resource_alias.clone();
        let placeholder = self.params.add(
            &format!("{alias}.compartment_id"),
            SearchValue::Text(compartment_id.to_string()),
            false,
        );
        self.sql.push_str(&format!(
            "EXISTS (SELECT 1 FROM compartment_assignment {alias} \
             WHERE {alias}.resource_type_id = {outer}.resource_type_id \
             AND {alias}.resource_surrogate_id = {outer}.resource_surrogate_id \
             AND {alias}.compartment_type_id = {} AND {alias}.compartment_id = ${placeholder})",
            compartment_type.0
        ));
        Ok(())
    }

    fn visit_trusted_id_list(&mut self, keys: &[PrimaryKey]) -> Result<(), SqlGenError> {
        let outer = self.resource_alias.clone();
        if keys.is_empty() {
            // An empty pre-authorized set matches nothing.
            self.sql.push_str("1 = 0");
            return Ok(());
        }
        self.sql.push_str(&format!(
            "({outer}.resource_type_id, {outer}.resource_surrogate_id) IN ("
        ));
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            let type_placeholder = self.params.add(
                &format!("{outer}.resource_type_id"),
                SearchValue::Integer(i64::from(key.resource_type_id.0)),
                false,
            );
            let sid_placeholder = self.params.add(
                &format!("{outer}.resource_surrogate_id"),
                SearchValue::Integer(key.resource_surrogate_id.as_i64()),
                false,
            );
            self.sql
                .push_str(&format!("(${type_placeholder}, ${sid_placeholder})"));
        }
        self.sql.push(')');
        Ok(())
    }
}

// ============================================================================
// Include CTE formatting (shared with the optimizer pass)
// ============================================================================

/// The structural identity of one include CTE line.
///
/// The builder formats specs into single-line CTEs with a trailing marker
/// comment; the optimizer parses markers back into specs, merges sources,
/// and re-formats through the same function so merged lines stay
/// textually consistent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IncludeCteSpec {
    pub iterate: bool,
    pub reversed: bool,
    pub param_id: i16,
    pub source_type_id: i16,
    pub target_type_id: Option<i16>,
    pub sources: Vec<String>,
}

impl IncludeCteSpec {
    /// The collapsing key: same-key CTEs with different sources are
    /// candidates for merging.
    pub fn key(&self) -> (bool, i16, i16, Option<i16>) {
        (self.reversed, self.param_id, self.source_type_id, self.target_type_id)
    }
}

pub(crate) fn format_include_cte(name: &str, spec: &IncludeCteSpec) -> String {
    let (projection, correlate_type, correlate_sid) = if spec.reversed {
        (
            "refs.resource_type_id AS t, refs.resource_surrogate_id AS sid",
            "refs.referenced_resource_type_id",
            "refs.referenced_resource_surrogate_id",
        )
    } else {
        (
            "refs.referenced_resource_type_id AS t, refs.referenced_resource_surrogate_id AS sid",
            "refs.resource_type_id",
            "refs.resource_surrogate_id",
        )
    };

    let target_filter = match (spec.reversed, spec.target_type_id) {
        (false, Some(target)) => format!(" AND refs.referenced_resource_type_id = {target}"),
        _ => String::new(),
    };

    let source_set = if spec.sources.len() == 1 {
        format!("{} s", spec.sources[0])
    } else {
        let union = spec
            .sources
            .iter()
            .map(|source| format!("SELECT t, sid FROM {source}"))
            .collect::<Vec<_>>()
            .join(" UNION ");
        format!("({union}) s")
    };

    let kind = if spec.iterate { "iterate" } else { "include" };
    let direction = if spec.reversed { "rev" } else { "fwd" };
    let target_segment = spec
        .target_type_id
        .map(|target| target.to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        ",{name} AS (SELECT {projection} FROM resource_reference refs \
         WHERE refs.search_param_id = {param} AND refs.resource_type_id = {source_type}{target_filter} \
         AND EXISTS (SELECT 1 FROM {source_set} WHERE s.t = {correlate_type} AND s.sid = {correlate_sid})) \
         /* {kind}:{direction}:{param}:{source_type}:{target_segment}:{sources} */",
        param = spec.param_id,
        source_type = spec.source_type_id,
        sources = spec.sources.join(","),
    )
}

// ============================================================================
// Statement assembly
// ============================================================================

/// A generated statement with its bound parameters.
#[derive(Debug)]
pub struct GeneratedQuery {
    pub sql: String,
    pub params: HashingParameterManager,
}

/// Assembles the full search statement from partitioned sub-trees.
pub struct SqlSearchQueryBuilder<'a> {
    options: &'a SearchOptions,
}

impl<'a> SqlSearchQueryBuilder<'a> {
    pub fn new(options: &'a SearchOptions) -> Self {
        Self { options }
    }

    /// Build the statement text and parameter set.
    ///
    /// Assembly order: match-set CTE (base predicates, continuation
    /// predicate, sort plan) → include CTEs, one per include step per
    /// distinct predecessor → union of included keys → final projection
    /// joined back to the resource table.
    pub fn build(&self) -> Result<GeneratedQuery, SqlGenError> {
        let mut params = HashingParameterManager::new();
        for (name, value) in &self.options.query_hints {
            params.hash_query_hint(name, value);
        }

        let parts = match &self.options.expression {
            Some(expression) => partition(expression.clone()),
            None => Default::default(),
        };

        let mut predicates: Vec<String> = vec![
            format!("r.resource_type_id = {}", self.options.resource_type_id.0),
            "r.is_history = FALSE".to_string(),
            "r.is_deleted = FALSE".to_string(),
        ];

        if let Some(filter) = &parts.filter {
            predicates.push(PredicateGenerator::new(&mut params).generate(filter)?);
        }
        for chained in &parts.chained {
            predicates.push(PredicateGenerator::new(&mut params).generate(chained)?);
        }
        if let Some(scope) = &self.options.scope_expression {
            predicates.push(PredicateGenerator::new(&mut params).generate(scope)?);
        }
        if let Some(token) = &self.options.continuation_token {
            predicates.push(continuation_predicate(token, &mut params));
        }
        if self.options.is_includes_operation
            && let Some(token) = &self.options.includes_continuation_token
        {
            let min = params.add(
                "r.resource_surrogate_id",
                SearchValue::Integer(token.match_resource_surrogate_id_min.as_i64()),
                false,
            );
            let max = params.add(
                "r.resource_surrogate_id",
                SearchValue::Integer(token.match_resource_surrogate_id_max.as_i64()),
                false,
            );
            predicates.push(format!("r.resource_surrogate_id BETWEEN ${min} AND ${max}"));
        }

        let (from_suffix, sort_predicate, order_by) = self.sort_plan();
        if let Some(predicate) = sort_predicate {
            predicates.push(predicate);
        }

        let where_clause = predicates.join(" AND ");
        let limit = self.options.max_item_count;
        let projection = if self.options.only_ids {
            "r.resource_type_id, r.resource_surrogate_id, r.resource_id"
        } else {
            "r.resource_type_id, r.resource_surrogate_id, r.resource_id, r.version_id, r.raw_resource"
        };

        if parts.includes.is_empty() {
            let sql = format!(
                "SELECT {projection} FROM resource r{from_suffix} WHERE {where_clause} \
                 ORDER BY {order_by} LIMIT {limit}"
            );
            return Ok(GeneratedQuery { sql, params });
        }

        let mut lines = vec![format!(
            "WITH cte0 AS (SELECT r.resource_type_id AS t, r.resource_surrogate_id AS sid \
             FROM resource r{from_suffix} WHERE {where_clause} ORDER BY {order_by} LIMIT {limit})"
        )];

        let mut cte_index = 1;
        let mut include_names: Vec<String> = Vec::new();
        for include in &parts.includes {
            let specs = include_cte_specs(include, &include_names);
            for spec in specs {
                let name = format!("cte{cte_index}");
                cte_index += 1;
                lines.push(format_include_cte(&name, &spec));
                include_names.push(name);
            }
        }

        let union = include_names
            .iter()
            .map(|name| format!("SELECT t, sid FROM {name}"))
            .collect::<Vec<_>>()
            .join(" UNION ");
        lines.push(format!(",included AS ({union})"));

        if self.options.is_includes_operation {
            let resume = match (
                self.options
                    .includes_continuation_token
                    .as_ref()
                    .and_then(|t| t.include_resource_type_id),
                self.options
                    .includes_continuation_token
                    .as_ref()
                    .and_then(|t| t.include_resource_surrogate_id),
            ) {
                (Some(type_id), Some(sid)) => {
                    let t = params.add(
                        "k.t",
                        SearchValue::Integer(i64::from(type_id.0)),
                        false,
                    );
                    let s = params.add("k.sid", SearchValue::Integer(sid.as_i64()), false);
                    format!(" WHERE (k.t, k.sid) > (${t}, ${s})")
                }
                _ => String::new(),
            };
            lines.push(format!(
                "SELECT {projection}, FALSE AS is_match FROM included k \
                 JOIN resource r ON r.resource_type_id = k.t AND r.resource_surrogate_id = k.sid{resume} \
                 ORDER BY r.resource_type_id ASC, r.resource_surrogate_id ASC LIMIT {}",
                self.options.include_count
            ));
        } else {
            lines.push(format!(
                "SELECT {projection}, k.is_match FROM \
                 (SELECT t, sid, TRUE AS is_match FROM cte0 \
                 UNION ALL SELECT t, sid, FALSE AS is_match FROM included) k \
                 JOIN resource r ON r.resource_type_id = k.t AND r.resource_surrogate_id = k.sid \
                 ORDER BY k.is_match DESC, r.resource_type_id ASC, r.resource_surrogate_id ASC LIMIT {}",
                limit + self.options.include_count
            ));
        }

        Ok(GeneratedQuery {
            sql: lines.join("\n"),
            params,
        })
    }

    /// Derive the FROM suffix, extra predicate, and ORDER BY clause from
    /// the sort spec.
    ///
    /// Sorting by an index-backed parameter needs two sub-scans: rows
    /// carrying the sort value (first phase, ordered by it) and rows
    /// without one (second phase, surrogate order).
    fn sort_plan(&self) -> (String, Option<String>, String) {
        let Some(entry) = self.options.sort.first() else {
            return (
                String::new(),
                None,
                "r.resource_surrogate_id ASC".to_string(),
            );
        };
        match entry.param.name.as_str() {
            "_lastUpdated" => (
                String::new(),
                None,
                format!(
                    "r.last_updated {}, r.resource_surrogate_id ASC",
                    entry.order.as_sql()
                ),
            ),
            SURROGATE_ID_PARAMETER => (
                String::new(),
                None,
                format!("r.resource_surrogate_id {}", entry.order.as_sql()),
            ),
            _ => {
                let from = format!(
                    " LEFT JOIN resource_search_index srt \
                     ON srt.resource_type_id = r.resource_type_id \
                     AND srt.resource_surrogate_id = r.resource_surrogate_id \
                     AND srt.search_param_id = {}",
                    entry.param.id
                );
                if self.options.sort_second_phase {
                    (
                        from,
                        Some("srt.text_value IS NULL".to_string()),
                        "r.resource_surrogate_id ASC".to_string(),
                    )
                } else {
                    (
                        from,
                        Some("srt.text_value IS NOT NULL".to_string()),
                        format!(
                            "srt.text_value {}, r.resource_surrogate_id ASC",
                            entry.order.as_sql()
                        ),
                    )
                }
            }
        }
    }
}

/// Expand one include directive into CTE specs.
///
/// A non-iterating include reads from the match set. An iterating include
/// conservatively expands to one CTE per distinct predecessor include CTE;
/// the optimizer collapses the provably redundant ones afterwards.
fn include_cte_specs(include: &IncludeExpression, predecessors: &[String]) -> Vec<IncludeCteSpec> {
    let base = IncludeCteSpec {
        iterate: include.iterate,
        reversed: include.reversed,
        param_id: include.param.id,
        source_type_id: include.source_type.0,
        target_type_id: include.target_type.map(|t| t.0),
        sources: Vec::new(),
    };

    if include.iterate && !predecessors.is_empty() {
        predecessors
            .iter()
            .map(|source| {
                let mut spec = base.clone();
                spec.sources = vec![source.clone()];
                spec
            })
            .collect()
    } else {
        let mut spec = base;
        spec.sources = vec!["cte0".to_string()];
        vec![spec]
    }
}

/// Emit the match-stream resume predicate from a decoded token.
fn continuation_predicate(token: &ContinuationToken, params: &mut HashingParameterManager) -> String {
    match token {
        ContinuationToken::Simple(sid) => {
            let placeholder = params.add(
                "r.resource_surrogate_id",
                SearchValue::Integer(sid.as_i64()),
                false,
            );
            format!("r.resource_surrogate_id > ${placeholder}")
        }
        ContinuationToken::Composite(range) => {
            let type_placeholder = params.add(
                "r.resource_type_id",
                SearchValue::Integer(i64::from(range.current.resource_type_id.0)),
                false,
            );
            let sid_placeholder = params.add(
                "r.resource_surrogate_id",
                SearchValue::Integer(range.current.resource_surrogate_id.as_i64()),
                false,
            );
            let mut sql = format!(
                "((r.resource_type_id = ${type_placeholder} \
                 AND r.resource_surrogate_id > ${sid_placeholder})"
            );
            if !range.next_type_ids.is_empty() {
                let ids = range
                    .next_type_ids
                    .iter()
                    .map(|id| id.0.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" OR r.resource_type_id IN ({ids})"));
            }
            sql.push(')');
            sql
        }
    }
}

/// Compile options into an executable statement: generate, run the
/// post-generation optimizer passes, then append the plan-cache hash.
pub fn compile(options: &SearchOptions) -> Result<GeneratedQuery, SqlGenError> {
    let mut query = SqlSearchQueryBuilder::new(options).build()?;
    query.sql = crate::optimizer::collapse_duplicate_include_ctes(&query.sql);
    query.sql = crate::optimizer::remove_redundant_comparisons(&query.sql, &query.params);
    query.params.append_hash(&mut query.sql);
    Ok(query)
}
