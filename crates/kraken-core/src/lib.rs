//! # `kraken-core`
//!
//! A general-purpose task-orchestration engine used as the substrate of a
//! build system.
//!
//! Projects form a tree rooted at one directory, each contributing named
//! tasks and groups. The engine finalizes configuration, assembles a global
//! dependency graph from explicit relationships and from the wiring between
//! task properties, trims the graph to a target set, and executes it with
//! the maximal parallelism admissible under the declared ordering and
//! exclusivity constraints.

#![deny(rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate static_assertions;

#[macro_use]
extern crate log;

pub mod context;
pub mod error;
pub mod exception;
pub mod executor;
pub mod graph;
pub mod identifier;
pub mod project;
pub mod property;
pub mod supplier;
pub mod task;

// Re-exports
pub use context::{BuildError, Context, SharedContext};
pub use error::{ProjectError, ProjectResult};
pub use exception::{BuildException, BuildResult};
pub use project::SharedProject;
pub use supplier::Supplier;
pub use task::{Task, TaskHandle, TaskSpec, TaskStatus};

pub mod prelude {
    //! The types most builds touch.

    pub use crate::context::{
        ContextEvent, ContextEventType, ProjectLoader, ProjectLoaderError, SharedContext,
    };
    pub use crate::error::{ProjectError, ProjectResult};
    pub use crate::exception::{BuildException, BuildResult};
    pub use crate::executor::{GraphExecutor, GraphExecutorObserver};
    pub use crate::graph::TaskGraph;
    pub use crate::identifier::{ProjectId, TaskId};
    pub use crate::project::SharedProject;
    pub use crate::property::{Property, PropertyKind};
    pub use crate::supplier::Supplier;
    pub use crate::task::{
        Task, TaskHandle, TaskSpec, TaskStatus, TaskStatusType,
    };
}
