use thiserror::Error;

/// Core error types for FerroFHIR primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Unknown resource type id: {0}")]
    UnknownResourceTypeId(i16),

    #[error("Invalid surrogate id: {0}")]
    InvalidSurrogateId(i64),

    #[error("Surrogate id sequence out of range: {0}")]
    SequenceOutOfRange(u32),

    #[error("Timestamp out of range for surrogate id derivation: {0}")]
    TimestampOutOfRange(i64),
}

impl CoreError {
    /// Create a new UnknownResourceType error
    pub fn unknown_resource_type(resource_type: impl Into<String>) -> Self {
        Self::UnknownResourceType(resource_type.into())
    }

    /// Check if this error indicates bad input from a caller (4xx category)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownResourceType(_))
    }

    /// Check if this error indicates an internal defect (5xx category)
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}
