//! Shared identifiers and small value types

use serde::{Deserialize, Serialize};

/// Stable identifier of a task instance inside a plan
///
/// Allocated sequentially by the plan that owns the task, so ordering
/// follows creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Raw numeric value
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Data flows into the component
    Input,

    /// Data flows out of the component
    Output,
}

impl PortDirection {
    /// The opposite direction
    #[inline]
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_display() {
        assert_eq!(TaskId(7).to_string(), "task#7");
    }

    #[test]
    fn task_ids_order_by_creation() {
        assert!(TaskId(1) < TaskId(2));
    }

    #[test]
    fn direction_reverse() {
        assert_eq!(PortDirection::Input.reverse(), PortDirection::Output);
        assert_eq!(PortDirection::Output.reverse(), PortDirection::Input);
    }
}
