//! Numeric resource-type identity.
//!
//! The record store addresses resource types by a small integer id rather
//! than by name. The id space is assigned by the store schema; this module
//! carries the id newtype plus the name table for the types the schema
//! ships with.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The physical id of a resource type in the store schema.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ResourceTypeId(pub i16);

impl ResourceTypeId {
    /// Raw id accessor.
    pub fn as_i16(self) -> i16 {
        self.0
    }
}

impl std::fmt::Display for ResourceTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name table for the resource types known to the store schema.
///
/// Ids are stable once assigned; new types append at the end.
const RESOURCE_TYPE_NAMES: &[(i16, &str)] = &[
    (1, "Patient"),
    (2, "Observation"),
    (3, "Encounter"),
    (4, "Condition"),
    (5, "Practitioner"),
    (6, "Organization"),
    (7, "MedicationRequest"),
    (8, "DiagnosticReport"),
    (9, "Procedure"),
    (10, "AllergyIntolerance"),
    (11, "Immunization"),
    (12, "CarePlan"),
    (13, "Device"),
    (14, "Location"),
    (15, "ServiceRequest"),
];

/// Look up the id for a resource type name.
pub fn resource_type_id(name: &str) -> Result<ResourceTypeId, CoreError> {
    RESOURCE_TYPE_NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(id, _)| ResourceTypeId(*id))
        .ok_or_else(|| CoreError::unknown_resource_type(name))
}

/// Look up the name for a resource type id.
pub fn resource_type_name(id: ResourceTypeId) -> Result<&'static str, CoreError> {
    RESOURCE_TYPE_NAMES
        .iter()
        .find(|(i, _)| *i == id.0)
        .map(|(_, n)| *n)
        .ok_or(CoreError::UnknownResourceTypeId(id.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_round_trip() {
        let id = resource_type_id("Patient").unwrap();
        assert_eq!(id, ResourceTypeId(1));
        assert_eq!(resource_type_name(id).unwrap(), "Patient");
    }

    #[test]
    fn test_unknown_name() {
        let err = resource_type_id("NotAType").unwrap_err();
        assert!(matches!(err, CoreError::UnknownResourceType(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_unknown_id() {
        let err = resource_type_name(ResourceTypeId(999)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownResourceTypeId(999)));
    }
}
