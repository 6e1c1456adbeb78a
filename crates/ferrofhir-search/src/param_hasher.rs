//! Parameter binding with an opt-in plan-cache hash.
//!
//! Every literal in a generated query is bound as a numbered parameter so
//! the store can reuse one compiled plan across structurally identical
//! queries. Some parameter values change which plan is actually good (a
//! date bound changes selectivity); those opt into a running digest that
//! is appended to the query text and becomes part of the store's
//! plan-cache key. Queries that differ only in non-hashed literals share
//! one plan; queries whose hashed values differ do not.
//!
//! The hash input encoding is type-stable: a one-byte tag per value,
//! fixed-width encoding for fixed-size types, and a length prefix for
//! text, so distinct value sequences cannot collide by concatenation.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use crate::expression::SearchValue;

/// A parameter bound into the generated SQL.
#[derive(Debug, Clone)]
pub struct BoundParameter {
    /// The column the parameter compares against, for diagnostics.
    pub column: String,
    /// The bound value.
    pub value: SearchValue,
    /// Whether the value participates in the plan-cache hash.
    pub in_hash: bool,
}

/// Accumulates bound parameters and the plan-cache digest for one query.
#[derive(Debug, Default)]
pub struct HashingParameterManager {
    params: Vec<BoundParameter>,
    hash_input: Vec<u8>,
    hashed_count: usize,
}

impl HashingParameterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a parameter and return its 1-based placeholder number.
    ///
    /// When `include_in_hash` is set the typed value is appended to the
    /// digest input; insertion order is significant and must be stable
    /// across logically identical queries.
    pub fn add(&mut self, column: &str, value: SearchValue, include_in_hash: bool) -> usize {
        if include_in_hash {
            self.encode_value(&value);
            self.hashed_count += 1;
        }
        self.params.push(BoundParameter {
            column: column.to_string(),
            value,
            in_hash: include_in_hash,
        });
        self.params.len()
    }

    /// Fold a query hint into the digest verbatim.
    pub fn hash_query_hint(&mut self, name: &str, value: &str) {
        self.encode_text(0x10, name);
        self.encode_text(0x11, value);
        self.hashed_count += 1;
    }

    /// Whether any value opted into the hash.
    pub fn has_hashed_parameters(&self) -> bool {
        self.hashed_count > 0
    }

    /// The finalized digest, if any value opted in.
    ///
    /// `DefaultHasher` is fixed-key SipHash: deterministic across processes,
    /// which the plan-cache key requires.
    pub fn hash(&self) -> Option<u64> {
        if !self.has_hashed_parameters() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        hasher.write(&self.hash_input);
        Some(hasher.finish())
    }

    /// Append the digest to the query text as a trailing comment.
    ///
    /// The comment is semantically inert but makes the query text itself
    /// distinct, so the store's plan cache keys on it.
    pub fn append_hash(&self, sql: &mut String) {
        if let Some(hash) = self.hash() {
            sql.push_str(&format!("\n/* HASH {hash:016x} */"));
        }
    }

    /// All bound parameters, in placeholder order.
    pub fn params(&self) -> &[BoundParameter] {
        &self.params
    }

    /// The value bound at a 1-based placeholder number.
    pub fn value(&self, placeholder: usize) -> Option<&SearchValue> {
        self.params.get(placeholder.checked_sub(1)?).map(|p| &p.value)
    }

    fn encode_value(&mut self, value: &SearchValue) {
        match value {
            SearchValue::Integer(i) => {
                self.hash_input.push(0x01);
                self.hash_input.extend_from_slice(&i.to_le_bytes());
            }
            SearchValue::Decimal(d) => {
                self.hash_input.push(0x02);
                self.hash_input.extend_from_slice(&d.to_bits().to_le_bytes());
            }
            SearchValue::Boolean(b) => {
                self.hash_input.push(0x03);
                self.hash_input.push(u8::from(*b));
            }
            SearchValue::Text(s) => self.encode_text(0x04, s),
            SearchValue::Timestamp(s) => self.encode_text(0x05, s),
        }
    }

    fn encode_text(&mut self, tag: u8, s: &str) {
        self.hash_input.push(tag);
        self.hash_input
            .extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.hash_input.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_numbering_is_one_based() {
        let mut mgr = HashingParameterManager::new();
        assert_eq!(mgr.add("p.code", SearchValue::Text("a".into()), false), 1);
        assert_eq!(mgr.add("p.code", SearchValue::Text("b".into()), false), 2);
        assert_eq!(mgr.value(1), Some(&SearchValue::Text("a".into())));
        assert_eq!(mgr.value(0), None);
        assert_eq!(mgr.value(3), None);
    }

    #[test]
    fn test_hash_absent_without_opt_in() {
        let mut mgr = HashingParameterManager::new();
        mgr.add("p.code", SearchValue::Text("a".into()), false);
        assert!(!mgr.has_hashed_parameters());
        assert!(mgr.hash().is_none());

        let mut sql = "SELECT 1".to_string();
        mgr.append_hash(&mut sql);
        assert_eq!(sql, "SELECT 1");
    }

    #[test]
    fn test_hash_is_deterministic() {
        let build = || {
            let mut mgr = HashingParameterManager::new();
            mgr.add("r.last_updated", SearchValue::Timestamp("2024-01-01".into()), true);
            mgr.add("p.number_value", SearchValue::Integer(42), true);
            mgr.hash().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_different_values_hash_differently() {
        let hash_of = |v: i64| {
            let mut mgr = HashingParameterManager::new();
            mgr.add("p.number_value", SearchValue::Integer(v), true);
            mgr.hash().unwrap()
        };
        assert_ne!(hash_of(1), hash_of(2));
    }

    #[test]
    fn test_text_boundaries_cannot_collide() {
        let hash_of = |a: &str, b: &str| {
            let mut mgr = HashingParameterManager::new();
            mgr.add("p.text_value", SearchValue::Text(a.into()), true);
            mgr.add("p.text_value", SearchValue::Text(b.into()), true);
            mgr.hash().unwrap()
        };
        assert_ne!(hash_of("ab", "c"), hash_of("a", "bc"));
    }

    #[test]
    fn test_insertion_order_is_significant() {
        let hash_of = |first: i64, second: i64| {
            let mut mgr = HashingParameterManager::new();
            mgr.add("a", SearchValue::Integer(first), true);
            mgr.add("b", SearchValue::Integer(second), true);
            mgr.hash().unwrap()
        };
        assert_ne!(hash_of(1, 2), hash_of(2, 1));
    }

    #[test]
    fn test_query_hints_fold_into_hash() {
        let mut with_hint = HashingParameterManager::new();
        with_hint.hash_query_hint("optimizeConcurrency", "true");
        assert!(with_hint.has_hashed_parameters());

        let mut other_hint = HashingParameterManager::new();
        other_hint.hash_query_hint("optimizeConcurrency", "false");
        assert_ne!(with_hint.hash(), other_hint.hash());
    }

    #[test]
    fn test_append_hash_trailing_comment() {
        let mut mgr = HashingParameterManager::new();
        mgr.add("r.last_updated", SearchValue::Timestamp("2024-01-01".into()), true);

        let mut sql = "SELECT 1".to_string();
        mgr.append_hash(&mut sql);
        assert!(sql.starts_with("SELECT 1\n/* HASH "));
        assert!(sql.ends_with(" */"));
    }
}
