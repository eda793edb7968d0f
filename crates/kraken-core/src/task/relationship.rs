//! Declared orderings between tasks.

use crate::identifier::TaskId;
use std::fmt::{Debug, Formatter};

/// A reference to another task, either resolved or as a selector string
/// that resolves lazily at graph-build time relative to the task's project.
#[derive(Clone, PartialEq, Eq)]
pub enum TaskRef {
    Task(TaskId),
    Selector(String),
}

impl Debug for TaskRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRef::Task(id) => write!(f, "{:?}", id),
            TaskRef::Selector(sel) => write!(f, "selector {:?}", sel),
        }
    }
}

impl From<TaskId> for TaskRef {
    fn from(id: TaskId) -> Self {
        TaskRef::Task(id)
    }
}

impl From<&TaskId> for TaskRef {
    fn from(id: &TaskId) -> Self {
        TaskRef::Task(id.clone())
    }
}

impl From<&str> for TaskRef {
    fn from(selector: &str) -> Self {
        TaskRef::Selector(selector.to_string())
    }
}

impl From<String> for TaskRef {
    fn from(selector: String) -> Self {
        TaskRef::Selector(selector)
    }
}

/// A relationship as declared on a task, stored verbatim.
///
/// `strict` imposes a hard dependency; a non-strict relationship only orders
/// the two tasks and keeps them from running in parallel when both are
/// scheduled. `inverse` flips the direction: the other task runs after this
/// one instead of before it.
#[derive(Debug, Clone)]
pub struct TaskRelationship {
    pub other: TaskRef,
    pub strict: bool,
    pub inverse: bool,
}

impl TaskRelationship {
    pub fn new(other: impl Into<TaskRef>, strict: bool, inverse: bool) -> Self {
        Self {
            other: other.into(),
            strict,
            inverse,
        }
    }

    /// The other task must run before this one.
    pub fn depends_on(other: impl Into<TaskRef>) -> Self {
        Self::new(other, true, false)
    }

    /// If both are scheduled, the other task runs first.
    pub fn runs_after(other: impl Into<TaskRef>) -> Self {
        Self::new(other, false, false)
    }
}

/// A relationship after selector resolution and lineage analysis, as used
/// by the graph builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelationship {
    pub other: TaskId,
    pub strict: bool,
    pub inverse: bool,
    /// Whether the relationship was inferred from property lineage rather
    /// than declared explicitly.
    pub implicit: bool,
}
