//! Core primitives shared across the FerroFHIR server crates.
//!
//! This crate defines the physical identity model of the record store:
//! numeric resource-type ids, time-derived surrogate ids, and the
//! primary-key types the search pipeline paginates over.

pub mod error;
pub mod keys;
pub mod resource_type;
pub mod surrogate_id;

pub use error::CoreError;
pub use keys::{PrimaryKey, PrimaryKeyRange, TypeIdBitset};
pub use resource_type::ResourceTypeId;
pub use surrogate_id::SurrogateId;
