//! Error types for database row-to-domain-model conversions.

use std::error::Error;
use std::fmt;

/// Error converting a SQLite row into a domain model.
#[derive(Debug)]
pub struct ConversionError {
    field: String,
    details: String,
}

impl ConversionError {
    /// Create a new conversion error.
    pub fn new(field: impl Into<String>, details: impl Into<String>) -> Self {
        ConversionError {
            field: field.into(),
            details: details.into(),
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conversion error for field '{}': {}",
            self.field, self.details
        )
    }
}

impl Error for ConversionError {}

/// Helper trait for converting a SQLite row model to a domain model.
pub trait IntoDomainModel<T> {
    /// Convert this row to its domain model, surfacing parse failures.
    fn into_domain_model(self) -> Result<T, ConversionError>;
}
