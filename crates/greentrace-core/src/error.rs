//! # Error Types
//!
//! Validation failures raised while constructing or mutating core records.
//! Registry loading has its own error type ([`crate::RegistryError`]) because
//! it only ever fails at startup.

use thiserror::Error;

/// Error raised by core record constructors and parsers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A wallet address was empty, too long, or contained whitespace.
    #[error("invalid wallet address: {0}")]
    InvalidWallet(String),

    /// A required field was missing or blank.
    #[error("{field} must not be empty")]
    MissingField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A field exceeded its maximum length.
    #[error("{field} must not exceed {max} characters")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Maximum permitted length.
        max: usize,
    },

    /// A role name did not match any known role.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// A field group name did not match any known group.
    #[error("unknown field group: {0}")]
    UnknownFieldGroup(String),

    /// A certification name did not match any known certification.
    #[error("unknown certification: {0}")]
    UnknownCertification(String),
}

/// Check that `value` is non-blank and at most `max` characters.
pub(crate) fn require_text(value: &str, field: &'static str, max: usize) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::MissingField { field });
    }
    check_len(value, field, max)
}

/// Check that `value` is at most `max` characters (blank allowed).
pub(crate) fn check_len(value: &str, field: &'static str, max: usize) -> Result<(), CoreError> {
    if value.chars().count() > max {
        return Err(CoreError::FieldTooLong { field, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_text_rejects_blank() {
        assert_eq!(
            require_text("   ", "name", 10),
            Err(CoreError::MissingField { field: "name" })
        );
    }

    #[test]
    fn require_text_rejects_long() {
        assert_eq!(
            require_text("abcdef", "name", 5),
            Err(CoreError::FieldTooLong { field: "name", max: 5 })
        );
    }

    #[test]
    fn check_len_counts_chars_not_bytes() {
        assert!(check_len("ééééé", "location", 5).is_ok());
    }

    #[test]
    fn display_messages() {
        let err = CoreError::MissingField { field: "batch_id" };
        assert_eq!(err.to_string(), "batch_id must not be empty");
        assert!(CoreError::UnknownRole("root".into()).to_string().contains("root"));
    }
}
