//! Identifiers for tasks, projects, and properties.
//!
//! An identifier acts like a path rooted at the root project. The root
//! project itself is the empty identifier and renders as `":"`; every other
//! identifier renders as `":"`-joined segments, like `":sub:task"`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

/// The separator between parts of an identifier
pub const ID_SEPARATOR: char = ':';

/// A validated, `:`-separated path.
#[derive(Default, Clone, Eq, PartialEq, Hash)]
pub struct Id {
    segments: Vec<String>,
}

impl Id {
    /// The empty identifier, used by the root project.
    pub fn root() -> Self {
        Self { segments: vec![] }
    }

    /// Parse an identifier. A leading separator is accepted and repeated
    /// separators collapse, so `":a:b"`, `"a:b"`, and `"a::b"` are the same
    /// identifier.
    ///
    /// # Error
    /// Errors if any segment is not a valid identifier part.
    pub fn new<S: AsRef<str>>(val: S) -> Result<Self, InvalidId> {
        Self::from_segments(val.as_ref().split(ID_SEPARATOR).filter(|s| !s.is_empty()))
    }

    /// Build an identifier from individual segments.
    pub fn from_segments<S: AsRef<str>>(
        iter: impl IntoIterator<Item = S>,
    ) -> Result<Self, InvalidId> {
        let segments = iter
            .into_iter()
            .map(|s| {
                let s = s.as_ref();
                is_valid_segment(s).map(|_| s.to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Joins a single segment to the end of this identifier.
    pub fn join<S: AsRef<str>>(&self, next: S) -> Result<Self, InvalidId> {
        let next = next.as_ref();
        is_valid_segment(next)?;
        let mut segments = self.segments.clone();
        segments.push(next.to_string());
        Ok(Self { segments })
    }

    /// The final segment, or `None` for the root identifier.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// The identifier with the final segment removed, or `None` for the root.
    pub fn parent(&self) -> Option<Id> {
        if self.segments.is_empty() {
            None
        } else {
            Some(Id {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.as_str())
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `other` is this identifier or one of its ancestors.
    pub fn starts_with(&self, other: &Id) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            write!(f, "{}", ID_SEPARATOR)
        } else {
            for segment in &self.segments {
                write!(f, "{}{}", ID_SEPARATOR, segment)?;
            }
            Ok(())
        }
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How tasks are referenced throughout a build.
///
/// Every task has an associated `TaskId`, which is never empty. A task
/// registered directly in the root project has the id `":name"`.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TaskId(Id);

impl TaskId {
    /// Parse a task id. Task ids must have at least one segment.
    pub fn new<S: AsRef<str>>(s: S) -> Result<TaskId, InvalidId> {
        let id = Id::new(s.as_ref())?;
        if id.is_root() {
            return Err(InvalidId::new(s.as_ref()));
        }
        Ok(TaskId(id))
    }

    /// The name of the task, without the project path.
    pub fn name(&self) -> &str {
        self.0.name().unwrap_or_default()
    }

    /// The id of the project the task lives in.
    pub fn project(&self) -> ProjectId {
        ProjectId(self.0.parent().unwrap_or_default())
    }
}

impl Deref for TaskId {
    type Target = Id;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<TaskId> for Id {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// How projects are referenced. The root project is the empty id.
#[derive(Default, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ProjectId(Id);

impl ProjectId {
    pub fn root() -> Self {
        Self(Id::root())
    }

    pub fn new<S: AsRef<str>>(s: S) -> Result<ProjectId, InvalidId> {
        Id::new(s).map(Self)
    }

    /// Create the id of a direct subproject.
    pub fn subproject<S: AsRef<str>>(&self, name: S) -> Result<ProjectId, InvalidId> {
        self.0.join(name).map(Self)
    }

    /// Create the id of a task registered directly in this project.
    pub fn task<S: AsRef<str>>(&self, name: S) -> Result<TaskId, InvalidId> {
        self.0.join(name).map(TaskId)
    }
}

impl Deref for ProjectId {
    type Target = Id;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<ProjectId> for Id {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

macro_rules! deref_to_id {
    ($ty:ty) => {
        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.deref())
            }
        }

        impl Debug for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:?}", self.deref())
            }
        }

        impl FromStr for $ty {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = InvalidId;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

deref_to_id!(TaskId);
deref_to_id!(ProjectId);

/// An identifier failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidId(pub String);

impl InvalidId {
    pub fn new(string: impl AsRef<str>) -> Self {
        Self(string.as_ref().to_string())
    }
}

impl Display for InvalidId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid identifier {:?}", self.0)
    }
}

impl Error for InvalidId {}

/// Checks a single identifier segment against `[A-Za-z_][A-Za-z0-9_-]*`.
pub fn is_valid_segment(segment: &str) -> Result<(), InvalidId> {
    static VALID_SEGMENT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("invalid pattern"));

    if VALID_SEGMENT.is_match(segment) {
        Ok(())
    } else {
        Err(InvalidId::new(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let id = Id::new("project:task").unwrap();
        assert_eq!(id.to_string(), ":project:task");

        let id = Id::new(":project::task").unwrap();
        assert_eq!(id.to_string(), ":project:task");

        assert_eq!(Id::root().to_string(), ":");
    }

    #[test]
    fn rejects_invalid_segments() {
        assert!(Id::new("&task").is_err());
        assert!(Id::new("2132").is_err());
        assert!(Id::new("a:3b").is_err());
        assert!(Id::new("_ok:also-ok").is_ok());
    }

    #[test]
    fn task_ids_are_never_empty() {
        assert!(TaskId::new(":").is_err());
        assert!(TaskId::new("").is_err());
        let id = TaskId::new(":sub:task").unwrap();
        assert_eq!(id.name(), "task");
        assert_eq!(id.project().to_string(), ":sub");
    }

    #[test]
    fn root_level_task_path() {
        let task = ProjectId::root().task("build").unwrap();
        assert_eq!(task.to_string(), ":build");
        assert_eq!(task.project(), ProjectId::root());
    }

    #[test]
    fn ordering_is_segment_wise() {
        let a = Id::new("a:b").unwrap();
        let b = Id::new("ab").unwrap();
        assert!(a < b);
    }

    #[test]
    fn starts_with() {
        let id = Id::new("root:child:task").unwrap();
        assert!(id.starts_with(&Id::new("root:child").unwrap()));
        assert!(id.starts_with(&Id::root()));
        assert!(!id.starts_with(&Id::new("child").unwrap()));
    }
}
