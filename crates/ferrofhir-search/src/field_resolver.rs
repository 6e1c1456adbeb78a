//! Search-parameter field resolution.
//!
//! Maps a named search parameter and an abstract field role to the
//! physical column it reads in the store schema. The handful of
//! framework-level names (`_id`, `_lastUpdated`, `_type`, and the internal
//! surrogate-id pseudo-parameter) resolve directly against the resource
//! table and bypass the generic role table.

use crate::sql_generator::SqlGenError;

/// The logical role a predicate plays against a parameter's index rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    /// Start of a range (e.g., a period's low bound).
    RangeStart,
    /// End of a range.
    RangeEnd,
    /// Coded value.
    TokenCode,
    /// Coding system of a coded value.
    TokenSystem,
    /// Numeric value.
    Number,
    /// Normalized string text.
    StringText,
    /// Referenced resource's type id.
    ReferenceTypeId,
    /// Referenced resource's logical id.
    ReferenceId,
    /// Base URI of a canonical reference.
    BaseUri,
    /// The row's surrogate id.
    SurrogateId,
    /// The row's resource type id.
    TypeId,
}

/// Alias of the resource table in generated SQL.
pub const RESOURCE_ALIAS: &str = "r";

/// Alias of the search-index table in generated SQL.
pub const INDEX_ALIAS: &str = "p";

/// Internal pseudo-parameter used for pagination predicates.
pub const SURROGATE_ID_PARAMETER: &str = "_surrogateId";

/// Resolve a (parameter, role) pair to a physical column reference.
///
/// # Errors
///
/// An unknown role for the given parameter is a programming error upstream
/// (an AST/schema mismatch) and surfaces as the fatal
/// `SqlGenError::InvalidFieldRole` variant, never as a user-facing message.
pub fn resolve(param_name: &str, role: FieldRole) -> Result<String, SqlGenError> {
    match param_name {
        "_id" => match role {
            FieldRole::StringText | FieldRole::ReferenceId => {
                Ok(format!("{RESOURCE_ALIAS}.resource_id"))
            }
            _ => Err(invalid(param_name, role)),
        },
        "_lastUpdated" => match role {
            FieldRole::RangeStart | FieldRole::RangeEnd => {
                Ok(format!("{RESOURCE_ALIAS}.last_updated"))
            }
            _ => Err(invalid(param_name, role)),
        },
        "_type" => match role {
            FieldRole::TypeId => Ok(format!("{RESOURCE_ALIAS}.resource_type_id")),
            _ => Err(invalid(param_name, role)),
        },
        SURROGATE_ID_PARAMETER => match role {
            FieldRole::SurrogateId => Ok(format!("{RESOURCE_ALIAS}.resource_surrogate_id")),
            _ => Err(invalid(param_name, role)),
        },
        _ => Ok(generic_column(role).to_string()),
    }
}

/// The generic role table applied to ordinary (index-backed) parameters.
fn generic_column(role: FieldRole) -> &'static str {
    match role {
        FieldRole::RangeStart => "p.range_start_value",
        FieldRole::RangeEnd => "p.range_end_value",
        FieldRole::TokenCode => "p.code",
        FieldRole::TokenSystem => "p.system_id",
        FieldRole::Number => "p.number_value",
        FieldRole::StringText => "p.text_value",
        FieldRole::ReferenceTypeId => "p.referenced_resource_type_id",
        FieldRole::ReferenceId => "p.referenced_resource_id",
        FieldRole::BaseUri => "p.base_uri",
        FieldRole::SurrogateId => "r.resource_surrogate_id",
        FieldRole::TypeId => "r.resource_type_id",
    }
}

fn invalid(param_name: &str, role: FieldRole) -> SqlGenError {
    SqlGenError::InvalidFieldRole {
        param: param_name.to_string(),
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_names_bypass_role_table() {
        assert_eq!(resolve("_id", FieldRole::StringText).unwrap(), "r.resource_id");
        assert_eq!(
            resolve("_lastUpdated", FieldRole::RangeStart).unwrap(),
            "r.last_updated"
        );
        assert_eq!(resolve("_type", FieldRole::TypeId).unwrap(), "r.resource_type_id");
        assert_eq!(
            resolve(SURROGATE_ID_PARAMETER, FieldRole::SurrogateId).unwrap(),
            "r.resource_surrogate_id"
        );
    }

    #[test]
    fn test_generic_parameter_uses_role_table() {
        assert_eq!(resolve("code", FieldRole::TokenCode).unwrap(), "p.code");
        assert_eq!(resolve("name", FieldRole::StringText).unwrap(), "p.text_value");
        assert_eq!(
            resolve("subject", FieldRole::ReferenceId).unwrap(),
            "p.referenced_resource_id"
        );
    }

    #[test]
    fn test_invalid_role_for_special_name_is_fatal() {
        let err = resolve("_id", FieldRole::Number).unwrap_err();
        assert!(matches!(err, SqlGenError::InvalidFieldRole { .. }));
        assert!(err.is_internal());
    }
}
