//! Projects: named namespaces of tasks and subprojects, rooted at a
//! directory.
//!
//! Tasks and subprojects share a single namespace; registering either under
//! an already-used name is an error. Every project is seeded with the
//! canonical chain of default groups on construction.

use crate::context::{ContextEvent, SharedContext, WeakContext};
use crate::error::{ProjectError, ProjectResult};
use crate::identifier::ProjectId;
use crate::task::{Task, TaskHandle, TaskKind, TaskSpec};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

pub mod selector;

pub use selector::TaskSelector;

/// A member of a project's namespace.
#[derive(Clone)]
pub enum ProjectMember {
    Task(TaskHandle),
    Subproject(SharedProject),
}

pub struct Project {
    id: ProjectId,
    name: String,
    directory: PathBuf,
    parent: Option<WeakProject>,
    context: WeakContext,
    members: IndexMap<String, ProjectMember>,
    finalized: bool,
}

impl Project {
    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &PathBuf {
        &self.directory
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl Debug for Project {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

thread_local! {
    static CURRENT_PROJECT: RefCell<Vec<SharedProject>> = RefCell::new(vec![]);
}

/// Pops the project pushed by [`SharedProject::make_current`] when dropped,
/// on every exit path.
pub(crate) struct CurrentProjectGuard {
    _private: (),
}

impl Drop for CurrentProjectGuard {
    fn drop(&mut self) {
        CURRENT_PROJECT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// A shared handle to a project. Clones share state; the id is cached
/// outside the lock.
#[derive(Clone)]
pub struct SharedProject {
    id: ProjectId,
    inner: Arc<RwLock<Project>>,
}

impl SharedProject {
    fn new(
        id: ProjectId,
        name: &str,
        directory: PathBuf,
        parent: Option<WeakProject>,
        context: WeakContext,
    ) -> Self {
        Self {
            id: id.clone(),
            inner: Arc::new(RwLock::new(Project {
                id,
                name: name.to_string(),
                directory,
                parent,
                context,
                members: IndexMap::new(),
                finalized: false,
            })),
        }
    }

    /// Create a root project with the default groups seeded.
    pub(crate) fn new_root(
        name: &str,
        directory: PathBuf,
        context: WeakContext,
    ) -> ProjectResult<SharedProject> {
        let project = Self::new(ProjectId::root(), name, directory, None, context);
        project.seed_default_groups()?;
        Ok(project)
    }

    /// The project scope most recently entered on this thread, if any.
    pub fn current() -> Option<SharedProject> {
        CURRENT_PROJECT.with(|stack| stack.borrow().last().cloned())
    }

    pub(crate) fn make_current(&self) -> CurrentProjectGuard {
        CURRENT_PROJECT.with(|stack| stack.borrow_mut().push(self.clone()));
        CurrentProjectGuard { _private: () }
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    /// The full path of the project, `":"` for the root.
    pub fn path(&self) -> String {
        self.id.to_string()
    }

    pub fn name(&self) -> String {
        self.with(|p| p.name.clone())
    }

    pub fn directory(&self) -> PathBuf {
        self.with(|p| p.directory.clone())
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    pub fn with<R>(&self, func: impl FnOnce(&Project) -> R) -> R {
        func(&self.inner.read())
    }

    pub fn with_mut<R>(&self, func: impl FnOnce(&mut Project) -> R) -> R {
        func(&mut self.inner.write())
    }

    pub(crate) fn downgrade(&self) -> WeakProject {
        WeakProject {
            id: self.id.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The context this project belongs to, if it is still alive.
    pub fn context(&self) -> Option<SharedContext> {
        self.with(|p| p.context.clone()).upgrade()
    }

    pub fn parent(&self) -> Option<SharedProject> {
        self.with(|p| p.parent.clone()).and_then(|weak| weak.upgrade())
    }

    /// The root of the project tree this project belongs to.
    pub fn root(&self) -> SharedProject {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Create and register a task from a spec.
    pub fn do_task(&self, name: &str, spec: TaskSpec) -> ProjectResult<TaskHandle> {
        let id = self.id.task(name)?;
        let (task, group) = spec.build(id, self.id.clone())?;
        let handle = TaskHandle::new(task);
        {
            let mut inner = self.inner.write();
            if inner.finalized {
                return Err(ProjectError::AlreadyFinalized);
            }
            if inner.members.contains_key(name) {
                return Err(ProjectError::DuplicateMember {
                    project: self.id.clone(),
                    name: name.to_string(),
                });
            }
            inner
                .members
                .insert(name.to_string(), ProjectMember::Task(handle.clone()));
        }
        if let Some(group) = group {
            self.group(&group)?.add_member(&handle)?;
        }
        debug!("registered task {}", handle.id());
        Ok(handle)
    }

    /// Get or create the group task with the given name.
    pub fn group(&self, name: &str) -> ProjectResult<TaskHandle> {
        let mut inner = self.inner.write();
        match inner.members.get(name) {
            Some(ProjectMember::Task(handle)) => {
                if handle.with(|t| t.is_group()) {
                    Ok(handle.clone())
                } else {
                    Err(ProjectError::NotAGroup(handle.id().clone()))
                }
            }
            Some(ProjectMember::Subproject(_)) => Err(ProjectError::DuplicateMember {
                project: self.id.clone(),
                name: name.to_string(),
            }),
            None => {
                if inner.finalized {
                    return Err(ProjectError::AlreadyFinalized);
                }
                let id = self.id.task(name)?;
                let task = Task::new(id, self.id.clone(), TaskKind::Group { members: vec![] });
                let handle = TaskHandle::new(task);
                inner
                    .members
                    .insert(name.to_string(), ProjectMember::Task(handle.clone()));
                Ok(handle)
            }
        }
    }

    /// Get or create a group and optionally overwrite its `default` flag
    /// and description.
    pub fn group_with(
        &self,
        name: &str,
        default: impl Into<Option<bool>>,
        description: impl Into<Option<String>>,
    ) -> ProjectResult<TaskHandle> {
        let group = self.group(name)?;
        if let Some(default) = default.into() {
            group.set_default(default);
        }
        if let Some(description) = description.into() {
            group.set_description(description);
        }
        Ok(group)
    }

    /// Create a subproject. Its directory is a subdirectory of this
    /// project's directory with the same name.
    pub fn subproject(&self, name: &str) -> ProjectResult<SharedProject> {
        let child = {
            let mut inner = self.inner.write();
            if inner.finalized {
                return Err(ProjectError::AlreadyFinalized);
            }
            if inner.members.contains_key(name) {
                return Err(ProjectError::DuplicateMember {
                    project: self.id.clone(),
                    name: name.to_string(),
                });
            }
            let id = self.id.subproject(name)?;
            let directory = inner.directory.join(name);
            let child = SharedProject::new(
                id,
                name,
                directory,
                Some(self.downgrade()),
                inner.context.clone(),
            );
            inner
                .members
                .insert(name.to_string(), ProjectMember::Subproject(child.clone()));
            child
        };
        child.seed_default_groups()?;
        if let Some(context) = self.context() {
            context.trigger(&ContextEvent::ProjectInit(child.clone()))?;
        }
        debug!("created subproject {}", child.path());
        Ok(child)
    }

    pub(crate) fn remove_member(&self, name: &str) {
        self.inner.write().members.shift_remove(name);
    }

    /// Every project receives the same canonical chain of groups.
    fn seed_default_groups(&self) -> ProjectResult<()> {
        let apply = self.group("apply")?;
        apply.set_description("Applies pending changes to the project");

        let fmt = self.group("fmt")?;
        fmt.set_description("Formats source files");
        fmt.add_relationship(&apply, true, false);

        let check = self.group("check")?;
        check.set_description("Runs sanity checks on the project");
        check.set_default(true);

        let lint = self.group("lint")?;
        lint.set_description("Runs linters");
        lint.set_default(true);
        lint.add_relationship(&check, true, false);

        let build = self.group("build")?;
        build.set_description("Produces build artifacts");
        build.add_relationship(&lint, false, false);

        let test = self.group("test")?;
        test.set_description("Runs unit tests");
        test.set_default(true);
        test.add_relationship(&build, false, false);

        let integration_test = self.group("integrationTest")?;
        integration_test.set_description("Runs integration tests");
        integration_test.add_relationship(&test, false, false);

        let publish = self.group("publish")?;
        publish.set_description("Publishes build artifacts");
        publish.add_relationship(&integration_test, false, false);

        let deploy = self.group("deploy")?;
        deploy.set_description("Deploys published artifacts");
        deploy.add_relationship(&publish, false, false);

        Ok(())
    }

    /// The task registered directly in this project under `name`.
    pub fn task_named(&self, name: &str) -> Option<TaskHandle> {
        self.with(|p| match p.members.get(name) {
            Some(ProjectMember::Task(handle)) => Some(handle.clone()),
            _ => None,
        })
    }

    /// The direct subproject named `name`.
    pub fn subproject_named(&self, name: &str) -> Option<SharedProject> {
        self.with(|p| match p.members.get(name) {
            Some(ProjectMember::Subproject(project)) => Some(project.clone()),
            _ => None,
        })
    }

    /// The tasks registered directly in this project, in registration
    /// order.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.with(|p| {
            p.members
                .values()
                .filter_map(|member| match member {
                    ProjectMember::Task(handle) => Some(handle.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// The direct subprojects of this project, in registration order.
    pub fn subprojects(&self) -> Vec<SharedProject> {
        self.with(|p| {
            p.members
                .values()
                .filter_map(|member| match member {
                    ProjectMember::Subproject(project) => Some(project.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// This project and every project below it, in pre-order.
    pub fn subtree(&self) -> Vec<SharedProject> {
        let mut out = vec![self.clone()];
        for subproject in self.subprojects() {
            out.extend(subproject.subtree());
        }
        out
    }

    /// Every task in this project's subtree, in pre-order.
    pub fn all_tasks(&self) -> Vec<TaskHandle> {
        self.subtree()
            .into_iter()
            .flat_map(|project| project.tasks())
            .collect()
    }

    /// Every task named `name` in this project's subtree.
    pub fn find_tasks_named(&self, name: &str) -> Vec<TaskHandle> {
        self.subtree()
            .into_iter()
            .filter_map(|project| project.task_named(name))
            .collect()
    }

    /// Every `default` task in this project's subtree.
    pub fn default_tasks(&self) -> Vec<TaskHandle> {
        self.all_tasks()
            .into_iter()
            .filter(|task| task.default())
            .collect()
    }

    /// Resolve a single selector relative to this project.
    pub fn resolve_tasks(&self, selector: &str) -> ProjectResult<Vec<TaskHandle>> {
        let parsed = TaskSelector::parse(selector)?;
        let base = if parsed.is_absolute() {
            self.root()
        } else {
            self.clone()
        };
        base.resolve_parsed(&parsed)
    }

    fn resolve_parsed(&self, selector: &TaskSelector) -> ProjectResult<Vec<TaskHandle>> {
        // a bare relative name matches the whole subtree
        if !selector.is_absolute() && selector.project_path().is_empty() {
            let found = self.find_tasks_named(selector.name());
            if found.is_empty() && !selector.is_optional() {
                return Err(ProjectError::NoSuchTask {
                    selector: selector.raw().to_string(),
                    project: self.id.clone(),
                });
            }
            return Ok(found);
        }

        let mut project = self.clone();
        for part in selector.project_path() {
            project = match project.subproject_named(part) {
                Some(next) => next,
                None if selector.is_optional() => return Ok(vec![]),
                None => {
                    return Err(ProjectError::NoSuchProject {
                        selector: selector.raw().to_string(),
                        name: part.clone(),
                        project: project.id.clone(),
                    })
                }
            };
        }
        match project.task_named(selector.name()) {
            Some(task) => Ok(vec![task]),
            None if selector.is_optional() => Ok(vec![]),
            None => Err(ProjectError::NoSuchTask {
                selector: selector.raw().to_string(),
                project: project.id.clone(),
            }),
        }
    }

    /// Resolve a list of selectors relative to this project, deduplicated
    /// in selector order.
    pub fn resolve_all<S: AsRef<str>>(&self, selectors: &[S]) -> ProjectResult<Vec<TaskHandle>> {
        let mut out: Vec<TaskHandle> = vec![];
        for selector in selectors {
            for task in self.resolve_tasks(selector.as_ref())? {
                if !out.contains(&task) {
                    out.push(task);
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn mark_finalized(&self) {
        self.inner.write().finalized = true;
    }
}

impl PartialEq for SharedProject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SharedProject {}

impl Debug for SharedProject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Project {}", self.id)
    }
}

impl Display for SharedProject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Project {}", self.id)
    }
}

/// A non-owning handle to a project, used for parent backpointers.
#[derive(Clone)]
pub(crate) struct WeakProject {
    id: ProjectId,
    inner: Weak<RwLock<Project>>,
}

impl WeakProject {
    pub(crate) fn upgrade(&self) -> Option<SharedProject> {
        self.inner.upgrade().map(|inner| SharedProject {
            id: self.id.clone(),
            inner,
        })
    }
}
