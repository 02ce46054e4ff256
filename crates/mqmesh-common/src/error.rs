//! Error types for mqmesh

use thiserror::Error;

/// Configuration errors, raised before any graph construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No regions configured
    #[error("at least one region is required")]
    NoRegions,

    /// More regions than the address plan can hold
    #[error("{requested} regions requested, address plan holds at most {max}")]
    TooManyRegions {
        /// Requested region count
        requested: usize,
        /// Largest supported region count
        max: usize,
    },

    /// Same location tag listed twice
    #[error("duplicate region: {0}")]
    DuplicateRegion(String),

    /// Blank location tag
    #[error("region {0} has an empty location tag")]
    EmptyRegion(usize),

    /// Required setting missing or blank
    #[error("missing setting: {0}")]
    MissingSetting(&'static str),

    /// Two settings would give distinct resources the same id
    #[error("name collision: {0}")]
    NameCollision(String),

    /// Config file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

/// mqmesh error type
#[derive(Error, Debug)]
pub enum TopologyError {
    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Synthesis produced an inconsistent graph. Always a bug, never retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A resource finished without reporting an attribute a dependent reads
    #[error("{resource} did not report output `{attribute}`")]
    MissingOutput {
        /// Resource that was created
        resource: String,
        /// Attribute that was expected
        attribute: String,
    },

    /// A resource reported an attribute a dependent cannot decode
    #[error("{resource} reported output `{attribute}` in an unexpected shape")]
    MalformedOutput {
        /// Resource that was created
        resource: String,
        /// Attribute with the unexpected value
        attribute: String,
    },

    /// The provisioning collaborator failed to create a resource
    #[error("provisioning {resource} failed: {message}")]
    Provisioning {
        /// Resource being created
        resource: String,
        /// Collaborator's error, flattened
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TopologyError {
    /// Shorthand for an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Whether the error indicates a synthesis bug rather than bad input
    /// or a collaborator failure
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Result type for mqmesh
pub type TopologyResult<T> = Result<T, TopologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: TopologyError = ConfigError::DuplicateRegion("eastus".into()).into();
        assert!(matches!(err, TopologyError::Config(ConfigError::DuplicateRegion(_))));
        assert_eq!(err.to_string(), "config error: duplicate region: eastus");
        assert!(!err.is_invariant());
    }

    #[test]
    fn test_invariant_shorthand() {
        let err = TopologyError::invariant("blocks overlap");
        assert!(err.is_invariant());
        assert_eq!(err.to_string(), "invariant violation: blocks overlap");
    }
}
