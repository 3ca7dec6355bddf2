//! Error taxonomy for the VeilQL anonymization engine.
//!
//! Every fallible operation in the workspace returns [`Result`]. All errors
//! abort the embedding query: the engine never substitutes a fabricated value
//! for a failed computation. Populations that are merely too small for
//! anonymization are not errors; they surface as safe floor values or SQL
//! NULL through the aggregator results.

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, VeilError>;

/// All failure kinds the engine can report to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VeilError {
    /// A configuration parameter is out of range or a cross-parameter
    /// constraint is unsatisfied. Raised at context construction.
    #[error("invalid configuration for `{key}`: {reason}")]
    ConfigInvalid {
        key: &'static str,
        reason: String,
    },

    /// An AID or summand argument has a type the engine cannot aggregate.
    /// Raised when an aggregator state is created.
    #[error("unsupported {role} type `{type_name}`")]
    ArgTypeUnsupported {
        role: &'static str,
        type_name: &'static str,
    },

    /// An anonymizing aggregator was declared without any AID argument.
    #[error("anonymizing aggregate requires at least one AID argument")]
    AidMissing,

    /// The outlier/top flattening intervals cannot absorb the required
    /// adjustment. Implies a misconfigured caller; raised during finalize.
    #[error("impossible interval compacting: adjustment {adjustment} exceeds slack {slack}")]
    IntervalCompactingImpossible {
        adjustment: i64,
        slack: i64,
    },

    /// Structural misuse of an aggregator state: merging states with
    /// mismatched configurations, finalizing twice, or malformed arguments.
    #[error("aggregate misuse: {0}")]
    AggregateMisuse(String),

    /// The host's cancel probe fired between buckets.
    #[error("query cancelled by host")]
    Cancelled,
}

impl VeilError {
    /// Shorthand for [`VeilError::AggregateMisuse`].
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::AggregateMisuse(message.into())
    }

    /// Shorthand for [`VeilError::ConfigInvalid`].
    pub fn config(key: &'static str, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            key,
            reason: reason.into(),
        }
    }
}
