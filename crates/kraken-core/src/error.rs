//! The engine error type. Returned by configuration and graph APIs.

use crate::context::{BuildError, ProjectLoaderError};
use crate::graph::CycleError;
use crate::identifier::{InvalidId, ProjectId, TaskId};
use crate::property::PropertyError;
use crate::task::status::TaskStatusType;
use std::fmt::Display;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("no project named {name:?} below {project} (selector {selector:?})")]
    NoSuchProject {
        selector: String,
        name: String,
        project: ProjectId,
    },
    #[error("no task matched selector {selector:?} in {project}")]
    NoSuchTask {
        selector: String,
        project: ProjectId,
    },
    #[error("{project} already has a member named {name:?}")]
    DuplicateMember { project: ProjectId, name: String },
    #[error("task {0} is not a group")]
    NotAGroup(TaskId),
    #[error("no task with id {0}")]
    UnknownTask(TaskId),
    #[error("task {task} has no property named {name:?}")]
    UnknownProperty { task: TaskId, name: String },
    #[error("the context is finalized and can no longer change")]
    AlreadyFinalized,
    #[error("invalid status transition for {task}: {from} -> {to}")]
    InvalidStatusTransition {
        task: TaskId,
        from: TaskStatusType,
        to: TaskStatusType,
    },
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Loader(#[from] ProjectLoaderError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Custom(String),
}

impl ProjectError {
    pub fn custom<E: Display>(error: E) -> Self {
        Self::Custom(error.to_string())
    }
}

pub type ProjectResult<T = ()> = Result<T, ProjectError>;
