use thiserror::Error;

/// Configuration and initialization failures of schedule rules.
///
/// Failing to apply a rule to a particular block is not an error: rules
/// report that by returning no variants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid tiling structure `{structure}`: {reason}")]
    InvalidStructure { structure: String, reason: String },
    #[error("thread extent must be positive, got {0}")]
    InvalidThreadExtent(i64),
    #[error("unknown vector ISA variant `{0}`")]
    UnknownIsa(String),
    #[error("unknown target family `{0}`")]
    UnknownTargetFamily(String),
    #[error("invalid reuse configuration: {0}")]
    InvalidReuse(String),
    #[error("invalid rule configuration: {0}")]
    InvalidConfig(String),
    #[error("rule {0} requires a target in the tune context")]
    MissingTarget(String),
    #[error("target `{target}` does not define `{attr}`")]
    MissingTargetAttr { target: String, attr: String },
    #[error("rule {0} is already initialized")]
    AlreadyInitialized(String),
}

impl RuleError {
    pub fn invalid_structure(structure: &str, reason: impl Into<String>) -> Self {
        RuleError::InvalidStructure {
            structure: structure.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing_attr(target: &str, attr: &str) -> Self {
        RuleError::MissingTargetAttr {
            target: target.to_string(),
            attr: attr.to_string(),
        }
    }
}

pub type RuleResult<T> = Result<T, RuleError>;
