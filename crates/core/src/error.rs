//! Error types shared by the core data model.

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Configuration and lifecycle errors.
///
/// These are recoverable: the state they were raised against is left as it
/// was, so a corrected request can be retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A `"Type/Name[:invert]"` token could not be parsed
    #[error("malformed member token '{token}': {reason}")]
    MalformedToken {
        /// The offending token
        token: String,
        /// What is wrong with it
        reason: String,
    },

    /// The factory has no constructor for this type
    #[error("unknown unit type: {0}")]
    UnknownType(String),

    /// No unit with this name is registered
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    /// A unit with this name is already registered
    #[error("unit '{0}' is already registered")]
    DuplicateUnit(String),

    /// A name lookup matched a unit of a different type
    #[error("unit '{name}' exists with type '{actual}', requested '{requested}'")]
    TypeMismatch {
        /// Unit name
        name: String,
        /// Type of the registered unit
        actual: String,
        /// Type that was asked for
        requested: String,
    },

    /// A lifecycle transition that the state machine does not allow
    #[error("unit '{unit}' cannot {action} while {state}")]
    InvalidTransition {
        /// Unit name
        unit: String,
        /// Attempted transition
        action: &'static str,
        /// Current state
        state: String,
    },

    /// A unit's own lifecycle hook failed
    #[error("unit '{unit}' failed to {action}: {reason}")]
    Lifecycle {
        /// Unit name
        unit: String,
        /// Lifecycle step that failed
        action: &'static str,
        /// Reason reported by the unit
        reason: String,
    },
}

/// A hard execution failure reported by a unit's run step.
///
/// This is not a filter-fail: a unit that merely rejects an event returns
/// [`Outcome::failed`](crate::Outcome::failed) instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    /// The unit failed while executing
    #[error("unit '{unit}' failed: {reason}")]
    Failed {
        /// Unit name
        unit: String,
        /// Failure reason
        reason: String,
    },

    /// The unit needed a data key that was not present in the event store
    #[error("unit '{unit}' is missing input '{key}'")]
    MissingInput {
        /// Unit name
        unit: String,
        /// The missing key
        key: String,
    },
}

impl UnitError {
    /// Build a [`UnitError::Failed`].
    pub fn failed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            unit: unit.into(),
            reason: reason.into(),
        }
    }
}
