//! Error types for the kernel
//!
//! - [`DataflowError`]: dataflow graph operations and the concrete cache
//! - [`PlanError`]: plan bookkeeping (tasks, ports, replacement)
//! - [`ResolutionError`]: everything that can abort an instantiation batch
//!
//! Declined merges are not errors; see [`crate::merge::Mergeability`].

use crate::merge::MergeRejection;
use netsynth_model::{ModelError, PolicyError, PortDirection, SelectionError, TaskId};

/// Coarse classification of resolution failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// More than one equally valid candidate
    AmbiguousSelection,
    /// A selection does not satisfy its slot
    InvalidSelection,
    /// Two connection policies cannot be reconciled
    IncompatiblePolicy,
    /// Missing port, role or model
    StructuralError,
    /// Broken bookkeeping inside the kernel
    Internal,
}

/// Dataflow graph errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataflowError {
    /// Task is not a vertex of the graph
    #[error("task {0} is not in the dataflow graph")]
    UnknownTask(TaskId),

    /// Edge info without any port mapping
    #[error("edge {source_task} -> {sink} would have no port mapping")]
    EmptyEdge {
        /// Source task
        source_task: TaskId,
        /// Sink task
        sink: TaskId,
    },

    /// Policies on the same port pair disagree
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Authoritative concrete cache built before the last mutation
    #[error("concrete connection cache is stale: built at generation {built}, graph is at {current}")]
    StaleConcreteCache {
        /// Generation the cache was computed for
        built: u64,
        /// Current graph generation
        current: u64,
    },

    /// Invariant violation found by the checker
    #[error("dataflow invariant violated: {0}")]
    Invariant(String),
}

/// Plan bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// No task with this id in the plan
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// Port neither declared nor dynamically instantiable
    #[error("{task} ({model}) has no port {port}")]
    UnknownPort {
        /// Task
        task: TaskId,
        /// Task model
        model: String,
        /// Port name
        port: String,
    },

    /// Port used against its direction
    #[error("port {port} of {task} is not an {expected} port")]
    PortDirection {
        /// Task
        task: TaskId,
        /// Port name
        port: String,
        /// Direction the use requires
        expected: PortDirection,
    },

    /// A task cannot replace itself or a missing task
    #[error("invalid replacement of {old} by {new}")]
    InvalidReplacement {
        /// Task being replaced
        old: TaskId,
        /// Replacement
        new: TaskId,
    },

    /// A role is recorded twice on the same parent
    #[error("{parent} already has a child for role {role}")]
    ChildConflict {
        /// Parent task
        parent: TaskId,
        /// Role name
        role: String,
    },

    /// Dataflow failure
    #[error(transparent)]
    Dataflow(#[from] DataflowError),

    /// Model failure
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// Narrowing or selection is underdetermined
    #[error("ambiguous selection for {subject}: candidates {candidates:?}")]
    Ambiguous {
        /// What was being decided
        subject: String,
        /// Equally valid candidates
        candidates: Vec<String>,
    },

    /// Selection does not fulfill what the slot requires
    #[error("invalid selection {selected} for {role}: {reason}")]
    InvalidSelection {
        /// Slot name
        role: String,
        /// Offending selection
        selected: String,
        /// What is missing
        reason: String,
    },

    /// Explicit child selection does not match the role's declared type
    #[error("selection {selected} for child {role} is incompatible with required {required}")]
    IncompatibleChildSelection {
        /// Role name
        role: String,
        /// Offending selection
        selected: String,
        /// Declared requirements of the role
        required: String,
    },

    /// Composite nesting deeper than allowed
    #[error("instantiation of {model} exceeds maximum depth {depth}")]
    RecursionLimit {
        /// Limit that was hit
        depth: usize,
        /// Model being instantiated
        model: String,
    },

    /// A merge was forced on tasks that cannot be merged
    #[error("cannot fold {replaced} into {kept}: {reason}")]
    Unmergeable {
        /// Task that would have been kept
        kept: TaskId,
        /// Task that would have been removed
        replaced: TaskId,
        /// Why the merge is refused
        reason: MergeRejection,
    },

    /// Model failure
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Dependency-injection failure
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Policy failure outside of the dataflow graph
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Dataflow failure
    #[error(transparent)]
    Dataflow(#[from] DataflowError),

    /// Plan failure
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl ResolutionError {
    /// Coarse classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ambiguous { .. } => ErrorKind::AmbiguousSelection,
            Self::InvalidSelection { .. } | Self::IncompatibleChildSelection { .. } => {
                ErrorKind::InvalidSelection
            }
            Self::Model(e) => model_kind(e),
            Self::Selection(SelectionError::Conflict { .. } | SelectionError::OverrideConflict { .. }) => {
                ErrorKind::InvalidSelection
            }
            Self::Selection(_) | Self::RecursionLimit { .. } => ErrorKind::StructuralError,
            Self::Policy(_) | Self::Dataflow(DataflowError::Policy(_)) => ErrorKind::IncompatiblePolicy,
            Self::Dataflow(_) => ErrorKind::Internal,
            Self::Plan(e) => plan_kind(e),
            Self::Unmergeable { reason, .. } => match reason {
                MergeRejection::AmbiguousProvider { .. } => ErrorKind::AmbiguousSelection,
                MergeRejection::PolicyConflict { .. } => ErrorKind::IncompatiblePolicy,
                _ => ErrorKind::InvalidSelection,
            },
        }
    }

    /// Whether the caller could fix the failure by adding a selection
    #[inline]
    #[must_use]
    pub fn is_ambiguity(&self) -> bool {
        self.kind() == ErrorKind::AmbiguousSelection
    }

    /// Whether the failure points at kernel bookkeeping rather than input
    #[inline]
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

fn model_kind(error: &ModelError) -> ErrorKind {
    match error {
        ModelError::AmbiguousService { .. } => ErrorKind::AmbiguousSelection,
        ModelError::MissingService { .. }
        | ModelError::UnknownService { .. }
        | ModelError::IncompatibleModels { .. } => ErrorKind::InvalidSelection,
        _ => ErrorKind::StructuralError,
    }
}

fn plan_kind(error: &PlanError) -> ErrorKind {
    match error {
        PlanError::UnknownPort { .. } | PlanError::PortDirection { .. } => {
            ErrorKind::StructuralError
        }
        PlanError::Model(e) => model_kind(e),
        PlanError::Dataflow(DataflowError::Policy(_)) => ErrorKind::IncompatiblePolicy,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_service_classifies_as_ambiguity() {
        let err: ResolutionError = ModelError::AmbiguousService {
            component: "DualCamera".to_string(),
            ability: "ImageSource".to_string(),
            candidates: vec!["left".to_string(), "right".to_string()],
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::AmbiguousSelection);
        assert!(err.is_ambiguity());
    }

    #[test]
    fn policy_errors_classify_through_wrappers() {
        let policy = PolicyError::Incompatible {
            field: "type",
            left: "Data".to_string(),
            right: "Buffer".to_string(),
        };
        let nested: ResolutionError = PlanError::from(DataflowError::from(policy.clone())).into();
        assert_eq!(nested.kind(), ErrorKind::IncompatiblePolicy);
        let direct: ResolutionError = policy.into();
        assert_eq!(direct.kind(), ErrorKind::IncompatiblePolicy);
    }

    #[test]
    fn missing_port_is_structural() {
        let err: ResolutionError = PlanError::UnknownPort {
            task: TaskId(3),
            model: "Producer".to_string(),
            port: "nope".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::StructuralError);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn unknown_task_is_internal() {
        let err: ResolutionError = PlanError::UnknownTask(TaskId(9)).into();
        assert!(err.is_internal());
    }
}
