//! Tasks: configured units of work owned by projects.

use crate::context::SharedContext;
use crate::error::{ProjectError, ProjectResult};
use crate::exception::{BuildException, BuildResult};
use crate::identifier::{ProjectId, TaskId};
use crate::property::{AnyProperty, Property, PropertyKind};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub mod relationship;
pub mod spec;
pub mod status;

pub use relationship::{ResolvedRelationship, TaskRef, TaskRelationship};
pub use spec::TaskSpec;
pub use status::{TaskStatus, TaskStatusType};

/// The work an ordinary task performs.
///
/// Actions read the task's input properties and publish results through its
/// output properties, which stay writable during execution.
pub trait TaskAction: Send + Sync {
    fn execute(&self, task: &Task) -> BuildResult<TaskStatus>;
}

assert_obj_safe!(TaskAction);

impl<F> TaskAction for F
where
    F: Fn(&Task) -> BuildResult<TaskStatus> + Send + Sync,
{
    fn execute(&self, task: &Task) -> BuildResult<TaskStatus> {
        (self)(task)
    }
}

/// The work of a background task. `start` returns without blocking;
/// `teardown` runs before the overall build completes, in reverse start
/// order.
pub trait BackgroundAction: Send + Sync {
    fn start(&self, task: &Task) -> BuildResult<()>;
    fn teardown(&self, task: &Task) -> BuildResult<()>;
}

assert_obj_safe!(BackgroundAction);

/// The flavor of a task.
#[derive(Clone)]
pub enum TaskKind {
    /// An ordinary task running a [`TaskAction`].
    Action(Arc<dyn TaskAction>),
    /// An aggregate of member tasks. Performs no work of its own and is
    /// always up to date; members contribute strict member-before-group
    /// edges.
    Group { members: Vec<TaskRef> },
    /// A no-op that is always skippable.
    Void,
    /// A task that starts asynchronous work and is torn down at the end of
    /// the build.
    Background(Arc<dyn BackgroundAction>),
}

impl Debug for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Action(_) => write!(f, "Action"),
            TaskKind::Group { members } => write!(f, "Group({} members)", members.len()),
            TaskKind::Void => write!(f, "Void"),
            TaskKind::Background(_) => write!(f, "Background"),
        }
    }
}

/// A configured unit of work.
pub struct Task {
    id: TaskId,
    project: ProjectId,
    kind: TaskKind,
    description: Option<String>,
    default: bool,
    selected: bool,
    finalized: bool,
    properties: IndexMap<String, AnyProperty>,
    relationships: Vec<TaskRelationship>,
}

impl Task {
    pub(crate) fn new(id: TaskId, project: ProjectId, kind: TaskKind) -> Self {
        Self {
            id,
            project,
            kind,
            description: None,
            default: false,
            selected: false,
            finalized: false,
            properties: IndexMap::new(),
            relationships: vec![],
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// The name of the task within its project.
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// The full path of the task, e.g. `":sub:build"`.
    pub fn path(&self) -> String {
        self.id.to_string()
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, TaskKind::Group { .. })
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    /// Whether this task participates in the "all defaults" selection.
    pub fn default(&self) -> bool {
        self.default
    }

    pub fn set_default(&mut self, default: bool) {
        self.default = default;
    }

    /// Whether the task was explicitly named in the current target set.
    /// Maintained by the caller after target resolution.
    pub fn selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Declare a relationship to another task or selector, stored verbatim.
    pub fn add_relationship(&mut self, other: impl Into<TaskRef>, strict: bool, inverse: bool) {
        self.relationships
            .push(TaskRelationship::new(other, strict, inverse));
    }

    /// Declare the same relationship to several tasks or selectors at once.
    pub fn add_relationships<R: Into<TaskRef>>(
        &mut self,
        others: impl IntoIterator<Item = R>,
        strict: bool,
        inverse: bool,
    ) {
        for other in others {
            self.add_relationship(other, strict, inverse);
        }
    }

    /// The other task must run before this one.
    pub fn depends_on(&mut self, other: impl Into<TaskRef>) {
        self.relationships.push(TaskRelationship::depends_on(other));
    }

    /// If both are scheduled, the other task runs first; neither runs while
    /// the other is running.
    pub fn runs_after(&mut self, other: impl Into<TaskRef>) {
        self.relationships.push(TaskRelationship::runs_after(other));
    }

    /// The relationships as declared, before resolution.
    pub fn declared_relationships(&self) -> &[TaskRelationship] {
        &self.relationships
    }

    /// Add a member to a group task.
    pub fn add_member(&mut self, member: impl Into<TaskRef>) -> ProjectResult<()> {
        match &mut self.kind {
            TaskKind::Group { members } => {
                members.push(member.into());
                Ok(())
            }
            _ => Err(ProjectError::NotAGroup(self.id.clone())),
        }
    }

    pub fn members(&self) -> Option<&[TaskRef]> {
        match &self.kind {
            TaskKind::Group { members } => Some(members),
            _ => None,
        }
    }

    pub(crate) fn insert_property(&mut self, property: AnyProperty) {
        self.properties.insert(property.name(), property);
    }

    /// Get a typed property of the task.
    pub fn property<T: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> ProjectResult<Property<T>> {
        let property = self
            .properties
            .get(name)
            .ok_or_else(|| ProjectError::UnknownProperty {
                task: self.id.clone(),
                name: name.to_string(),
            })?;
        property.as_typed::<T>().map_err(Into::into)
    }

    pub fn properties(&self) -> impl Iterator<Item = &AnyProperty> {
        self.properties.values()
    }

    /// Finalize the task: renders every non-output property immutable.
    /// Idempotent; called exactly once per build by the context.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        for property in self.properties.values() {
            if property.kind() != PropertyKind::Output {
                property.finalize();
            }
        }
        self.finalized = true;
    }

    /// Optional up-to-date hint. `None` when the task kind cannot tell.
    pub fn is_up_to_date(&self) -> Option<bool> {
        match self.kind {
            TaskKind::Group { .. } | TaskKind::Void => Some(true),
            _ => None,
        }
    }

    /// Optional skippable hint. `None` when the task kind cannot tell.
    pub fn is_skippable(&self) -> Option<bool> {
        match self.kind {
            TaskKind::Void => Some(true),
            _ => None,
        }
    }

    /// The relationships implied by property lineage: one strict edge from
    /// every task whose property is transitively read by a property of this
    /// task.
    pub fn lineage_relationships(&self) -> Vec<ResolvedRelationship> {
        let mut seen = HashSet::new();
        let mut out = vec![];
        for property in self.properties.values() {
            for node in property.lineage() {
                if let Some(owner) = node.owner() {
                    if owner.task != self.id && seen.insert(owner.task.clone()) {
                        out.push(ResolvedRelationship {
                            other: owner.task,
                            strict: true,
                            inverse: false,
                            implicit: true,
                        });
                    }
                }
            }
        }
        out
    }

    /// The union of lineage-derived relationships, explicit relationships
    /// after selector resolution, and group membership edges.
    pub fn relationships(&self, context: &SharedContext) -> ProjectResult<Vec<ResolvedRelationship>> {
        let mut out = self.lineage_relationships();
        for relationship in &self.relationships {
            self.resolve_ref(
                context,
                &relationship.other,
                relationship.strict,
                relationship.inverse,
                &mut out,
            )?;
        }
        if let TaskKind::Group { members } = &self.kind {
            for member in members {
                self.resolve_ref(context, member, true, false, &mut out)?;
            }
        }
        Ok(out)
    }

    fn resolve_ref(
        &self,
        context: &SharedContext,
        other: &TaskRef,
        strict: bool,
        inverse: bool,
        out: &mut Vec<ResolvedRelationship>,
    ) -> ProjectResult<()> {
        match other {
            TaskRef::Task(id) => out.push(ResolvedRelationship {
                other: id.clone(),
                strict,
                inverse,
                implicit: false,
            }),
            TaskRef::Selector(selector) => {
                let project = context.project(&self.project)?;
                for handle in project.resolve_tasks(selector)? {
                    if handle.id() == &self.id {
                        continue;
                    }
                    out.push(ResolvedRelationship {
                        other: handle.id().clone(),
                        strict,
                        inverse,
                        implicit: false,
                    });
                }
            }
        }
        Ok(())
    }

    /// Run the task. Dispatches on the task kind; must not be called before
    /// [`finalize`](Self::finalize).
    pub fn execute(&self) -> BuildResult<TaskStatus> {
        if !self.finalized {
            return Err(BuildException::new(format!(
                "task {} executed before it was finalized",
                self.id
            )));
        }
        match &self.kind {
            TaskKind::Action(action) => action.execute(self),
            TaskKind::Group { .. } => Ok(TaskStatus::up_to_date()),
            TaskKind::Void => Ok(TaskStatus::skipped("task has nothing to do")),
            TaskKind::Background(background) => {
                background.start(self)?;
                Ok(TaskStatus::started())
            }
        }
    }

    /// Tear down a background task. A no-op for every other kind.
    pub fn teardown(&self) -> BuildResult<()> {
        match &self.kind {
            TaskKind::Background(background) => background.teardown(self),
            _ => Ok(()),
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .finish()
    }
}

/// A shared handle to a registered task.
///
/// The id is cached outside the lock, so identity checks never block.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    inner: Arc<RwLock<Task>>,
}

impl TaskHandle {
    pub(crate) fn new(task: Task) -> Self {
        Self {
            id: task.id.clone(),
            inner: Arc::new(RwLock::new(task)),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn path(&self) -> String {
        self.id.to_string()
    }

    pub fn with<R>(&self, func: impl FnOnce(&Task) -> R) -> R {
        func(&self.inner.read())
    }

    pub fn with_mut<R>(&self, func: impl FnOnce(&mut Task) -> R) -> R {
        func(&mut self.inner.write())
    }

    pub fn depends_on(&self, other: impl Into<TaskRef>) {
        self.with_mut(|t| t.depends_on(other))
    }

    pub fn runs_after(&self, other: impl Into<TaskRef>) {
        self.with_mut(|t| t.runs_after(other))
    }

    pub fn add_relationship(&self, other: impl Into<TaskRef>, strict: bool, inverse: bool) {
        self.with_mut(|t| t.add_relationship(other, strict, inverse))
    }

    pub fn add_member(&self, member: impl Into<TaskRef>) -> ProjectResult<()> {
        self.with_mut(|t| t.add_member(member))
    }

    pub fn property<T: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> ProjectResult<Property<T>> {
        self.with(|t| t.property(name))
    }

    pub fn default(&self) -> bool {
        self.with(|t| t.default())
    }

    pub fn set_default(&self, default: bool) {
        self.with_mut(|t| t.set_default(default))
    }

    pub fn selected(&self) -> bool {
        self.with(|t| t.selected())
    }

    pub fn set_selected(&self, selected: bool) {
        self.with_mut(|t| t.set_selected(selected))
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.with_mut(|t| t.set_description(description))
    }

    pub fn finalize(&self) {
        self.with_mut(|t| t.finalize())
    }
}

impl From<&TaskHandle> for TaskRef {
    fn from(handle: &TaskHandle) -> Self {
        TaskRef::Task(handle.id.clone())
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskHandle {}

impl Hash for TaskHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl Debug for TaskHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task {}", self.id)
    }
}

impl Display for TaskHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task {}", self.id)
    }
}
