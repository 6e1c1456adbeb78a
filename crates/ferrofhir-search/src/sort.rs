//! Sort specification helpers.

use crate::expression::SearchParamRef;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One entry of an ordered sort specification.
#[derive(Debug, Clone, PartialEq)]
pub struct SortEntry {
    pub param: SearchParamRef,
    pub order: SortOrder,
}

impl SortEntry {
    pub fn new(param: SearchParamRef, order: SortOrder) -> Self {
        Self { param, order }
    }
}

/// Resolve the direction for a named sort parameter.
///
/// Defaults to ascending when the parameter is not in the sort spec.
pub fn sort_order_for(sort: &[SortEntry], param_name: &str) -> SortOrder {
    sort.iter()
        .find(|entry| entry.param.name == param_name)
        .map(|entry| entry.order)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_order_defaults_to_ascending() {
        assert_eq!(sort_order_for(&[], "name"), SortOrder::Asc);
    }

    #[test]
    fn test_sort_order_resolves_named_entry() {
        let sort = vec![
            SortEntry::new(SearchParamRef::new(1, "_lastUpdated"), SortOrder::Desc),
            SortEntry::new(SearchParamRef::new(2, "name"), SortOrder::Asc),
        ];
        assert_eq!(sort_order_for(&sort, "_lastUpdated"), SortOrder::Desc);
        assert_eq!(sort_order_for(&sort, "name"), SortOrder::Asc);
        assert_eq!(sort_order_for(&sort, "other"), SortOrder::Asc);
    }

    #[test]
    fn test_as_sql() {
        assert_eq!(SortOrder::Asc.as_sql(), "ASC");
        assert_eq!(SortOrder::Desc.as_sql(), "DESC");
    }
}
