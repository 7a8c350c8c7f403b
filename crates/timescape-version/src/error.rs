//! Errors for identifier, selector and descriptor parsing

/// Errors raised while parsing or validating version data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// TSV did not match `tsv:<epochMillis>-<name>-<seq>`
    #[error("invalid version id `{input}`: {reason}")]
    InvalidVersionId {
        /// Offending input
        input: String,
        /// What was wrong
        reason: &'static str,
    },

    /// Selector looked like a timestamp or id but did not parse
    #[error("invalid selector `{input}`: {reason}")]
    InvalidSelector {
        /// Offending input
        input: String,
        /// What was wrong
        reason: String,
    },

    /// Registration descriptor failed validation
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Lifecycle transition not defined by the state machine
    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: crate::Lifecycle,
        /// Requested state
        to: crate::Lifecycle,
    },
}
