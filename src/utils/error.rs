use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing context value '{key}'")]
    MissingContextError { key: String },

    #[error("Construct '{id}' already exists in stack '{stack}'")]
    DuplicateConstructError { stack: String, id: String },

    #[error("Stack '{id}' is already defined in this app")]
    DuplicateStackError { id: String },

    #[error("Priority {priority} of rule '{rule}' is already used by '{existing}' on listener '{listener}'")]
    DuplicatePriorityError {
        listener: String,
        priority: u32,
        rule: String,
        existing: String,
    },

    #[error("Stack '{consumer}' references '{logical_id}' from stack '{producer}', which is not defined before it")]
    UnresolvedReferenceError {
        consumer: String,
        producer: String,
        logical_id: String,
    },

    #[error("Stack '{consumer}' ({consumer_env}) cannot reference '{logical_id}' from stack '{producer}' ({producer_env})")]
    CrossEnvironmentReferenceError {
        consumer: String,
        consumer_env: String,
        producer: String,
        producer_env: String,
        logical_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Reference,
    Io,
    Serialization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SynthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SynthError::IoError(_) => ErrorCategory::Io,
            SynthError::SerializationError(_) => ErrorCategory::Serialization,
            SynthError::UnresolvedReferenceError { .. }
            | SynthError::CrossEnvironmentReferenceError { .. }
            | SynthError::MissingContextError { .. } => ErrorCategory::Reference,
            _ => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 寫檔失敗通常是暫時性的，重跑即可
            SynthError::IoError(_) => ErrorSeverity::Medium,
            SynthError::SerializationError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            SynthError::IoError(_) => {
                "Check that the output directory is writable and retry".to_string()
            }
            SynthError::SerializationError(_) => {
                "A template could not be rendered as JSON; please report this".to_string()
            }
            SynthError::ConfigError { .. } | SynthError::ConfigValidationError { .. } => {
                "Check the TOML configuration file syntax and field names".to_string()
            }
            SynthError::MissingConfigError { field } => {
                format!("Add '{}' to the configuration file", field)
            }
            SynthError::InvalidConfigValueError { field, .. } => {
                format!("Fix the value of '{}' in the configuration file", field)
            }
            SynthError::MissingContextError { key } => format!(
                "Pass it on the command line with `-c {}=<value>` or set it in the [edge] section",
                key
            ),
            SynthError::DuplicateConstructError { .. } => {
                "Give every service a unique name".to_string()
            }
            SynthError::DuplicateStackError { .. } => {
                "Give the compute and edge stacks different names".to_string()
            }
            SynthError::DuplicatePriorityError { .. } => {
                "Assign a distinct priority to every service on the listener".to_string()
            }
            SynthError::UnresolvedReferenceError { producer, .. } => format!(
                "Add stack '{}' to the app before the stacks that consume its outputs",
                producer
            ),
            SynthError::CrossEnvironmentReferenceError { .. } => {
                "Use the 'edge-only' topology and pass the VPC link id and listener ARN as plain identifiers"
                    .to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Invalid deployment configuration: {}", self),
            ErrorCategory::Reference => format!("Cross-stack wiring failed: {}", self),
            ErrorCategory::Io => format!("Could not write the cloud assembly: {}", self),
            ErrorCategory::Serialization => format!("Template rendering failed: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, SynthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_errors_are_categorized() {
        let err = SynthError::UnresolvedReferenceError {
            consumer: "HttpApiStack".to_string(),
            producer: "FargateVpclinkStack".to_string(),
            logical_id: "HttpVpcLink".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Reference);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.recovery_suggestion().contains("FargateVpclinkStack"));
    }

    #[test]
    fn test_io_error_is_retryable_severity() {
        let err = SynthError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(err.category(), ErrorCategory::Io);
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert!(err.user_friendly_message().starts_with("Could not write"));
    }
}
