use thiserror::Error;

/// Error kind reported for row mapping failures
pub const KIND_MAPPING: &str = "MappingError";
/// Error kind reported when a one-or-none call sees a second row in strict mode
pub const KIND_TOO_MANY_ROWS: &str = "TooManyRowsError";
/// Error kind reported for invalid shape/collaborator/statement setups
pub const KIND_CONFIGURATION: &str = "ConfigurationError";
/// Error kind reported when a named parameter has no bound value
pub const KIND_PROGRAMMING: &str = "ProgrammingError";
/// Error kind recorded for calls dropped while in flight
pub const KIND_CANCELLED: &str = "cancelled";
/// Error kind recorded for calls that panicked while in flight
pub const KIND_PANIC: &str = "panic";

/// Main error type for the sqlfn runtime
#[derive(Error, Debug)]
pub enum SqlFnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot map field '{field}' from value {value}: {reason}")]
    Mapping {
        field: String,
        value: String,
        reason: String,
    },
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Too many rows returned for {0}: expected at most one")]
    TooManyRows(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Query not found: {0}")]
    QueryNotFound(String),
    #[error("No SQL statement provided for {0}")]
    MissingStatement(String),
    #[error("Parameter not provided: {0}")]
    ParameterNotProvided(String),
    #[error("{kind}: {message}")]
    Driver { kind: String, message: String },
}

impl SqlFnError {
    pub fn new_mapping(
        field: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        SqlFnError::Mapping {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn new_missing_field(field: impl Into<String>) -> Self {
        SqlFnError::MissingField(field.into())
    }

    pub fn new_too_many_rows(func_name: impl Into<String>) -> Self {
        SqlFnError::TooManyRows(func_name.into())
    }

    pub fn new_configuration(message: impl Into<String>) -> Self {
        SqlFnError::Configuration(message.into())
    }

    pub fn new_query_not_found(name: impl Into<String>) -> Self {
        SqlFnError::QueryNotFound(name.into())
    }

    pub fn new_missing_statement(func_name: impl Into<String>) -> Self {
        SqlFnError::MissingStatement(func_name.into())
    }

    pub fn new_parameter_not_provided(name: impl Into<String>) -> Self {
        SqlFnError::ParameterNotProvided(name.into())
    }

    pub fn new_driver(kind: impl Into<String>, message: impl Into<String>) -> Self {
        SqlFnError::Driver {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The identifier this error is counted under in `fails_by_error`
    pub fn error_kind(&self) -> &str {
        match self {
            SqlFnError::Io(_) => "IoError",
            SqlFnError::Json(_) => "JsonError",
            SqlFnError::Mapping { .. } | SqlFnError::MissingField(_) => KIND_MAPPING,
            SqlFnError::TooManyRows(_) => KIND_TOO_MANY_ROWS,
            SqlFnError::Configuration(_)
            | SqlFnError::QueryNotFound(_)
            | SqlFnError::MissingStatement(_) => KIND_CONFIGURATION,
            SqlFnError::ParameterNotProvided(_) => KIND_PROGRAMMING,
            SqlFnError::Driver { kind, .. } => kind,
        }
    }

    /// Attach the field name to a mapping error raised for an anonymous value
    pub(crate) fn with_field(self, field: &str) -> Self {
        match self {
            SqlFnError::Mapping { value, reason, .. } => SqlFnError::Mapping {
                field: field.to_string(),
                value,
                reason,
            },
            other => other,
        }
    }
}

/// Type alias for Results using SqlFnError
pub type Result<T> = std::result::Result<T, SqlFnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SqlFnError::new_mapping("price", "abc", "not a decimal").error_kind(),
            "MappingError"
        );
        assert_eq!(
            SqlFnError::new_missing_field("id").error_kind(),
            "MappingError"
        );
        assert_eq!(
            SqlFnError::new_too_many_rows("users::get").error_kind(),
            "TooManyRowsError"
        );
        assert_eq!(
            SqlFnError::new_missing_statement("users::get").error_kind(),
            "ConfigurationError"
        );
        assert_eq!(
            SqlFnError::new_driver("IntegrityError", "UNIQUE constraint failed").error_kind(),
            "IntegrityError"
        );
    }

    #[test]
    fn test_error_display() {
        let err = SqlFnError::new_mapping("salary", "\"12,5\"", "invalid decimal");
        assert_eq!(
            err.to_string(),
            "Cannot map field 'salary' from value \"12,5\": invalid decimal"
        );
        let err = SqlFnError::new_driver("IntegrityError", "UNIQUE constraint failed");
        assert_eq!(err.to_string(), "IntegrityError: UNIQUE constraint failed");
    }

    #[test]
    fn test_with_field_only_touches_mapping_errors() {
        let err = SqlFnError::new_mapping("", "x", "bad").with_field("amount");
        match err {
            SqlFnError::Mapping { field, .. } => assert_eq!(field, "amount"),
            other => panic!("Expected Mapping error, got {other:?}"),
        }
        let err = SqlFnError::new_missing_field("id").with_field("amount");
        assert!(matches!(err, SqlFnError::MissingField(name) if name == "id"));
    }
}
