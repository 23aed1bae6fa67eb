//! Error types for the model layer
//!
//! - [`ModelError`]: model registration and introspection failures
//! - [`SelectionError`]: dependency-injection table and stack violations
//! - [`PolicyError`]: irreconcilable connection policies

/// Model registration and lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// No model registered under this name
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A model with this name is already registered
    #[error("model already registered: {0}")]
    DuplicateModel(String),

    /// Two concrete component models without a common ancestry line
    #[error("incompatible models: {left} and {right} do not share an ancestry line")]
    IncompatibleModels {
        /// Model already present
        left: String,
        /// Model being added
        right: String,
    },

    /// Dynamic port pattern failed to compile
    #[error("invalid dynamic port pattern `{pattern}`: {reason}")]
    InvalidPortPattern {
        /// Offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// Selected service name is not bound on the component
    #[error("component {component} has no service named {service}")]
    UnknownService {
        /// Component model
        component: String,
        /// Requested service name
        service: String,
    },

    /// The component does not provide a required ability
    #[error("component {component} does not provide {ability}")]
    MissingService {
        /// Component model
        component: String,
        /// Required ability
        ability: String,
    },

    /// More than one bound service provides the required ability
    #[error("ambiguous service selection on {component} for {ability}: candidates {candidates:?}")]
    AmbiguousService {
        /// Component model
        component: String,
        /// Required ability
        ability: String,
        /// Names of the matching bound services
        candidates: Vec<String>,
    },

    /// Composition refers to a role it does not declare
    #[error("composition {composition} has no child role {role}")]
    UnknownChild {
        /// Composition model
        composition: String,
        /// Role name
        role: String,
    },

    /// Port not found on the model and not dynamically instantiable
    #[error("model {model} has no port {port}")]
    UnknownPort {
        /// Model name
        model: String,
        /// Port name
        port: String,
    },
}

impl ModelError {
    /// Whether this error comes from an underdetermined choice
    #[inline]
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::AmbiguousService { .. })
    }
}

/// Dependency-injection errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    /// Two different selections for the same key in one table
    #[error("conflicting selections for {key}: {existing} vs {new}")]
    Conflict {
        /// Key being assigned
        key: String,
        /// Selection already in the table
        existing: String,
        /// Selection that was rejected
        new: String,
    },

    /// Requirement override registered twice with different targets
    #[error("conflicting overrides for {requirements}: {existing} vs {new}")]
    OverrideConflict {
        /// Overridden descriptor
        requirements: String,
        /// Override already present
        existing: String,
        /// Override that was rejected
        new: String,
    },

    /// Pop with a handle that is not the top of the stack
    #[error("scope handle at depth {handle} does not match stack depth {depth}")]
    ScopeMismatch {
        /// Depth recorded in the handle
        handle: usize,
        /// Current stack depth
        depth: usize,
    },

    /// Model selections form a loop
    #[error("selection loop through {0}")]
    SelectionLoop(String),
}

/// Connection policy reconciliation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Two policies disagree on a field that cannot be reconciled
    #[error("incompatible connection policies on `{field}`: {left} != {right}")]
    Incompatible {
        /// Name of the differing field
        field: &'static str,
        /// Value on the left-hand policy
        left: String,
        /// Value on the right-hand policy
        right: String,
    },
}

impl PolicyError {
    /// Name of the field that could not be reconciled
    #[inline]
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::Incompatible { field, .. } => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_service_is_ambiguous() {
        let err = ModelError::AmbiguousService {
            component: "DualCamera".to_string(),
            ability: "ImageSource".to_string(),
            candidates: vec!["left".to_string(), "right".to_string()],
        };
        assert!(err.is_ambiguous());
        assert!(err.to_string().contains("left"));
        assert!(err.to_string().contains("right"));
    }

    #[test]
    fn policy_error_names_field() {
        let err = PolicyError::Incompatible {
            field: "lock",
            left: "locked".to_string(),
            right: "lock_free".to_string(),
        };
        assert_eq!(err.field(), "lock");
        assert!(err.to_string().contains("locked != lock_free"));
    }
}
