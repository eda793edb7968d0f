//! The build context: root of the project tree, event bus, and execution
//! entry point.
//!
//! Life cycle: create a context, populate the project tree through one or
//! more [`load_project`](SharedContext::load_project) calls, freeze
//! everything with [`finalize`](SharedContext::finalize), then
//! [`execute`](SharedContext::execute) a target set once.

use crate::error::{ProjectError, ProjectResult};
use crate::executor::{GraphExecutor, GraphExecutorObserver, LoggingObserver};
use crate::graph::TaskGraph;
use crate::identifier::{ProjectId, TaskId};
use crate::project::SharedProject;
use crate::task::TaskHandle;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::error::Error;
use std::ffi::OsStr;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

assert_impl_all!(SharedContext: Send, Sync, Clone);
assert_obj_safe!(ProjectLoader);

/// The kinds of events fired during configuration. `Any` listeners receive
/// every event, before the type-specific listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextEventType {
    Any,
    ProjectInit,
    ProjectLoaded,
    ProjectBeginFinalize,
    ProjectFinalized,
    ContextBeginFinalize,
    ContextFinalized,
}

/// An event fired by the context during configuration.
#[derive(Debug, Clone)]
pub enum ContextEvent {
    ProjectInit(SharedProject),
    ProjectLoaded(SharedProject),
    ProjectBeginFinalize(SharedProject),
    ProjectFinalized(SharedProject),
    ContextBeginFinalize,
    ContextFinalized,
}

impl ContextEvent {
    pub fn event_type(&self) -> ContextEventType {
        match self {
            ContextEvent::ProjectInit(_) => ContextEventType::ProjectInit,
            ContextEvent::ProjectLoaded(_) => ContextEventType::ProjectLoaded,
            ContextEvent::ProjectBeginFinalize(_) => ContextEventType::ProjectBeginFinalize,
            ContextEvent::ProjectFinalized(_) => ContextEventType::ProjectFinalized,
            ContextEvent::ContextBeginFinalize => ContextEventType::ContextBeginFinalize,
            ContextEvent::ContextFinalized => ContextEventType::ContextFinalized,
        }
    }
}

/// A script runner: given a freshly created project, populates it by
/// calling the engine's public API. While the loader runs,
/// [`SharedProject::current`] and [`SharedContext::current`] refer to the
/// project and context being loaded.
pub trait ProjectLoader {
    fn load_project(&self, project: &SharedProject) -> Result<(), ProjectLoaderError>;
}

impl<F> ProjectLoader for F
where
    F: Fn(&SharedProject) -> Result<(), ProjectLoaderError>,
{
    fn load_project(&self, project: &SharedProject) -> Result<(), ProjectLoaderError> {
        (self)(project)
    }
}

/// A build script failed to load. The partially populated project is
/// unregistered from the tree.
#[derive(Debug, thiserror::Error)]
#[error("project loader failed: {message}")]
pub struct ProjectLoaderError {
    message: String,
}

impl ProjectLoaderError {
    pub fn new<M: Display>(message: M) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// One or more tasks failed during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    failed: BTreeSet<TaskId>,
}

impl BuildError {
    pub fn new(failed: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            failed: failed.into_iter().collect(),
        }
    }

    /// The paths of the failed tasks, sorted.
    pub fn failed(&self) -> &BTreeSet<TaskId> {
        &self.failed
    }
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rendered = self.failed.iter().map(|id| format!("\"{}\"", id)).join(", ");
        if self.failed.len() == 1 {
            write!(f, "task {} failed", rendered)
        } else {
            write!(f, "tasks {} failed", rendered)
        }
    }
}

impl Error for BuildError {}

type ListenerFn = Box<dyn FnMut(&ContextEvent) -> ProjectResult + Send>;

struct ListenerEntry {
    ty: ContextEventType,
    callback: Arc<Mutex<ListenerFn>>,
}

pub struct Context {
    build_directory: PathBuf,
    root_project: Option<SharedProject>,
    finalized: bool,
    executor: GraphExecutor,
    observer: Option<Box<dyn GraphExecutorObserver + Send + Sync>>,
    listeners: Vec<ListenerEntry>,
}

impl Context {
    /// The directory build artifacts land in.
    pub fn build_directory(&self) -> &PathBuf {
        &self.build_directory
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn root_project(&self) -> Option<&SharedProject> {
        self.root_project.as_ref()
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }
}

thread_local! {
    static CURRENT_CONTEXT: RefCell<Vec<SharedContext>> = RefCell::new(vec![]);
}

/// Pops the context pushed by [`SharedContext::make_current`] when dropped,
/// on every exit path.
pub(crate) struct CurrentContextGuard {
    _private: (),
}

impl Drop for CurrentContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// A shared handle to a [`Context`].
#[derive(Clone)]
pub struct SharedContext(Arc<RwLock<Context>>);

impl SharedContext {
    pub fn new(build_directory: impl AsRef<Path>) -> SharedContext {
        SharedContext(Arc::new(RwLock::new(Context {
            build_directory: build_directory.as_ref().to_path_buf(),
            root_project: None,
            finalized: false,
            executor: GraphExecutor::default(),
            observer: None,
            listeners: vec![],
        })))
    }

    /// The context scope most recently entered on this thread, if any.
    pub fn current() -> Option<SharedContext> {
        CURRENT_CONTEXT.with(|stack| stack.borrow().last().cloned())
    }

    pub(crate) fn make_current(&self) -> CurrentContextGuard {
        CURRENT_CONTEXT.with(|stack| stack.borrow_mut().push(self.clone()));
        CurrentContextGuard { _private: () }
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Arc::downgrade(&self.0))
    }

    pub fn build_directory(&self) -> PathBuf {
        self.0.read().build_directory.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.0.read().finalized
    }

    pub fn root_project(&self) -> Option<SharedProject> {
        self.0.read().root_project.clone()
    }

    /// The number of workers the executor will use.
    pub fn set_workers(&self, workers: std::num::NonZeroUsize) {
        self.0.write().executor = GraphExecutor::new(workers);
    }

    /// Replace the executor observer used by [`execute`](Self::execute).
    pub fn set_observer(&self, observer: Box<dyn GraphExecutorObserver + Send + Sync>) {
        self.0.write().observer = Some(observer);
    }

    /// Register a listener for an event type. Listener errors propagate to
    /// whoever fired the event; a listener is part of the build.
    pub fn listen<F>(&self, ty: ContextEventType, callback: F)
    where
        F: FnMut(&ContextEvent) -> ProjectResult + Send + 'static,
    {
        self.0.write().listeners.push(ListenerEntry {
            ty,
            callback: Arc::new(Mutex::new(Box::new(callback))),
        });
    }

    /// Fire an event: `Any` listeners first, then type-specific listeners,
    /// each set in registration order.
    pub fn trigger(&self, event: &ContextEvent) -> ProjectResult {
        let ty = event.event_type();
        let snapshot: Vec<Arc<Mutex<ListenerFn>>> = {
            let inner = self.0.read();
            let any = inner
                .listeners
                .iter()
                .filter(|entry| entry.ty == ContextEventType::Any);
            let typed = inner
                .listeners
                .iter()
                .filter(|entry| entry.ty == ty && entry.ty != ContextEventType::Any);
            any.chain(typed).map(|entry| entry.callback.clone()).collect()
        };
        trace!("firing {:?} for {} listener(s)", ty, snapshot.len());
        for callback in snapshot {
            (callback.lock())(event)?;
        }
        Ok(())
    }

    /// Load a project from a directory using the given loader.
    ///
    /// The first call creates the root project; later calls create a
    /// subproject of the root named after the directory. When the loader
    /// fails the partially populated project is unregistered.
    pub fn load_project(
        &self,
        directory: impl AsRef<Path>,
        loader: &dyn ProjectLoader,
    ) -> ProjectResult<SharedProject> {
        if self.is_finalized() {
            return Err(ProjectError::AlreadyFinalized);
        }
        let directory = directory.as_ref().to_path_buf();
        let name = directory
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("root")
            .to_string();

        let (project, is_root) = match self.root_project() {
            None => {
                let project = SharedProject::new_root(&name, directory, self.downgrade())?;
                self.0.write().root_project = Some(project.clone());
                self.trigger(&ContextEvent::ProjectInit(project.clone()))?;
                (project, true)
            }
            Some(root) => (root.subproject(&name)?, false),
        };

        info!("loading project {}", project.path());
        let loaded = {
            let _context_scope = self.make_current();
            let _project_scope = project.make_current();
            loader.load_project(&project)
        };
        match loaded {
            Ok(()) => {
                self.trigger(&ContextEvent::ProjectLoaded(project.clone()))?;
                Ok(project)
            }
            Err(error) => {
                warn!(
                    "unregistering partially loaded project {}: {}",
                    project.path(),
                    error
                );
                if is_root {
                    self.0.write().root_project = None;
                } else if let Some(parent) = project.parent() {
                    parent.remove_member(&project.name());
                }
                Err(ProjectError::Loader(error))
            }
        }
    }

    /// Navigate to a project by id.
    pub fn project(&self, id: &ProjectId) -> ProjectResult<SharedProject> {
        let mut project = self
            .root_project()
            .ok_or_else(|| ProjectError::custom("no project has been loaded"))?;
        for segment in id.segments().collect::<Vec<_>>() {
            project = project.subproject_named(segment).ok_or_else(|| {
                ProjectError::NoSuchProject {
                    selector: id.to_string(),
                    name: segment.to_string(),
                    project: project.id().clone(),
                }
            })?;
        }
        Ok(project)
    }

    /// Look up a registered task by id.
    pub fn find_task(&self, id: &TaskId) -> ProjectResult<TaskHandle> {
        let project = self.project(&id.project())?;
        project
            .task_named(id.name())
            .ok_or_else(|| ProjectError::UnknownTask(id.clone()))
    }

    /// Freeze the context: fires the finalize events, finalizes every task
    /// project by project in pre-order, and marks the tree immutable.
    /// Idempotent.
    pub fn finalize(&self) -> ProjectResult {
        if self.is_finalized() {
            debug!("context is already finalized");
            return Ok(());
        }
        self.trigger(&ContextEvent::ContextBeginFinalize)?;
        if let Some(root) = self.root_project() {
            for project in root.subtree() {
                self.trigger(&ContextEvent::ProjectBeginFinalize(project.clone()))?;
                for task in project.tasks() {
                    task.finalize();
                }
                project.mark_finalized();
                self.trigger(&ContextEvent::ProjectFinalized(project))?;
            }
        }
        self.0.write().finalized = true;
        self.trigger(&ContextEvent::ContextFinalized)?;
        Ok(())
    }

    /// Resolve a target set. `None` selects every `default` task
    /// context-wide; selectors resolve relative to the root project.
    pub fn resolve_tasks<S: AsRef<str>>(
        &self,
        targets: Option<&[S]>,
    ) -> ProjectResult<Vec<TaskHandle>> {
        let root = match self.root_project() {
            Some(root) => root,
            None => return Ok(vec![]),
        };
        match targets {
            None => Ok(root.default_tasks()),
            Some(selectors) => root.resolve_all(selectors),
        }
    }

    /// Resolve targets, build the task graph, and run it to completion.
    /// Finalizes the context first when that has not happened yet.
    pub fn execute<S: AsRef<str>>(&self, targets: Option<&[S]>) -> ProjectResult<()> {
        if !self.is_finalized() {
            self.finalize()?;
        }
        let targets = self.resolve_tasks(targets)?;
        if targets.is_empty() {
            info!("no tasks were selected");
            return Ok(());
        }
        if let Some(root) = self.root_project() {
            for task in root.all_tasks() {
                task.set_selected(false);
            }
        }
        for target in &targets {
            target.set_selected(true);
        }
        let graph = TaskGraph::build(self, &targets)?;
        self.execute_graph(graph)
    }

    /// Run a pre-built task graph to completion. Returns a
    /// [`BuildError`] when any task failed.
    pub fn execute_graph(&self, mut graph: TaskGraph) -> ProjectResult<()> {
        let (executor, observer) = {
            let mut inner = self.0.write();
            (inner.executor.clone(), inner.observer.take())
        };
        let mut observer: Box<dyn GraphExecutorObserver + Send + Sync> =
            observer.unwrap_or_else(|| Box::new(LoggingObserver));
        let result = executor.execute(&mut graph, observer.as_mut());
        {
            let mut inner = self.0.write();
            if inner.observer.is_none() {
                inner.observer = Some(observer);
            }
        }
        result?;

        let failed = graph.failed_tasks();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ProjectError::Build(BuildError::new(failed)))
        }
    }
}

impl Debug for SharedContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.read();
        f.debug_struct("Context")
            .field("build_directory", &inner.build_directory)
            .field("finalized", &inner.finalized)
            .finish()
    }
}

/// A non-owning handle to a context, used for backpointers from projects.
#[derive(Clone)]
pub(crate) struct WeakContext(Weak<RwLock<Context>>);

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<SharedContext> {
        self.0.upgrade().map(SharedContext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::TaskId;

    fn id(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    #[test]
    fn build_error_rendering() {
        let single = BuildError::new([id(":b")]);
        assert_eq!(single.to_string(), "task \":b\" failed");

        let multiple = BuildError::new([id(":b"), id(":a")]);
        assert_eq!(multiple.to_string(), "tasks \":a\", \":b\" failed");
    }
}
