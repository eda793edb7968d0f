//! Task statuses and the transitions between them.

use std::fmt::{Display, Formatter};

/// The type of a [`TaskStatus`].
///
/// `Pending` is the implicit status of every task that has no recorded
/// status yet. `Started` is reserved for background tasks that began their
/// work without blocking a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatusType {
    Pending,
    Running,
    Started,
    Succeeded,
    Failed,
    Skipped,
    UpToDate,
}

impl TaskStatusType {
    /// Whether the status will never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatusType::Succeeded
                | TaskStatusType::Failed
                | TaskStatusType::Skipped
                | TaskStatusType::UpToDate
        )
    }

    /// Whether a strict dependant of a task with this status may run.
    /// A started background task unpins its dependants.
    pub fn is_satisfied(self) -> bool {
        matches!(
            self,
            TaskStatusType::Succeeded
                | TaskStatusType::Skipped
                | TaskStatusType::UpToDate
                | TaskStatusType::Started
        )
    }

    pub fn is_failure(self) -> bool {
        self == TaskStatusType::Failed
    }

    /// The valid transitions of the status state machine.
    pub fn can_transition_to(self, next: TaskStatusType) -> bool {
        match self {
            TaskStatusType::Pending => matches!(
                next,
                TaskStatusType::Running
                    | TaskStatusType::Started
                    | TaskStatusType::Skipped
                    | TaskStatusType::UpToDate
                    | TaskStatusType::Failed
            ),
            TaskStatusType::Running | TaskStatusType::Started => matches!(
                next,
                TaskStatusType::Succeeded
                    | TaskStatusType::Failed
                    | TaskStatusType::Skipped
                    | TaskStatusType::UpToDate
            ),
            _ => false,
        }
    }
}

impl Display for TaskStatusType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let repr = match self {
            TaskStatusType::Pending => "PENDING",
            TaskStatusType::Running => "RUNNING",
            TaskStatusType::Started => "STARTED",
            TaskStatusType::Succeeded => "SUCCEEDED",
            TaskStatusType::Failed => "FAILED",
            TaskStatusType::Skipped => "SKIPPED",
            TaskStatusType::UpToDate => "UP-TO-DATE",
        };
        write!(f, "{}", repr)
    }
}

/// The status of a task, with an optional human readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    ty: TaskStatusType,
    message: Option<String>,
}

impl TaskStatus {
    pub fn new(ty: TaskStatusType, message: impl Into<Option<String>>) -> Self {
        Self {
            ty,
            message: message.into(),
        }
    }

    pub fn pending() -> Self {
        Self::new(TaskStatusType::Pending, None)
    }

    pub fn running() -> Self {
        Self::new(TaskStatusType::Running, None)
    }

    pub fn started() -> Self {
        Self::new(TaskStatusType::Started, None)
    }

    pub fn succeeded() -> Self {
        Self::new(TaskStatusType::Succeeded, None)
    }

    pub fn failed(message: impl ToString) -> Self {
        Self::new(TaskStatusType::Failed, Some(message.to_string()))
    }

    pub fn skipped(message: impl ToString) -> Self {
        Self::new(TaskStatusType::Skipped, Some(message.to_string()))
    }

    pub fn up_to_date() -> Self {
        Self::new(TaskStatusType::UpToDate, None)
    }

    pub fn ty(&self) -> TaskStatusType {
        self.ty
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.ty.is_terminal()
    }

    pub fn is_satisfied(&self) -> bool {
        self.ty.is_satisfied()
    }

    pub fn is_failure(&self) -> bool {
        self.ty.is_failure()
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", self.ty, message),
            None => write!(f, "{}", self.ty),
        }
    }
}
