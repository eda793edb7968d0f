//! Task specifications: the "type" handed to [`Project::do_task`].
//!
//! A spec declares the property schema of a task, its kind of work, and any
//! property assignments to apply on creation.
//!
//! [`Project::do_task`]: crate::project::SharedProject::do_task

use crate::identifier::{ProjectId, TaskId};
use crate::property::{AnyProperty, Property, PropertyError, PropertyKind};
use crate::supplier::Supplier;
use crate::task::{BackgroundAction, Task, TaskAction, TaskKind};
use std::sync::Arc;

struct PropertyDecl {
    name: String,
    build: Box<dyn Fn(&TaskId) -> AnyProperty + Send>,
}

struct Assignment {
    key: String,
    apply: Box<dyn FnOnce(&AnyProperty) -> Result<(), PropertyError> + Send>,
}

/// Describes a task to create: schema, work, and initial configuration.
pub struct TaskSpec {
    kind: TaskKind,
    schema: Vec<PropertyDecl>,
    assignments: Vec<Assignment>,
    description: Option<String>,
    default: bool,
    group: Option<String>,
}

impl TaskSpec {
    fn with_kind(kind: TaskKind) -> Self {
        Self {
            kind,
            schema: vec![],
            assignments: vec![],
            description: None,
            default: false,
            group: None,
        }
    }

    /// An ordinary task performing the given action.
    pub fn action(action: impl TaskAction + 'static) -> Self {
        Self::with_kind(TaskKind::Action(Arc::new(action)))
    }

    /// A no-op task.
    pub fn void() -> Self {
        Self::with_kind(TaskKind::Void)
    }

    /// A background task.
    pub fn background(background: impl BackgroundAction + 'static) -> Self {
        Self::with_kind(TaskKind::Background(Arc::new(background)))
    }

    /// Declare an input property.
    pub fn input<T: Clone + Send + Sync + 'static>(mut self, name: &str) -> Self {
        let prop_name = name.to_string();
        self.schema.push(PropertyDecl {
            name: prop_name.clone(),
            build: Box::new(move |owner| {
                Property::<T>::new(owner.clone(), &prop_name, PropertyKind::Input).into()
            }),
        });
        self
    }

    /// Declare an output property.
    pub fn output<T: Clone + Send + Sync + 'static>(mut self, name: &str) -> Self {
        let prop_name = name.to_string();
        self.schema.push(PropertyDecl {
            name: prop_name.clone(),
            build: Box::new(move |owner| {
                Property::<T>::new(owner.clone(), &prop_name, PropertyKind::Output).into()
            }),
        });
        self
    }

    /// Assign a concrete value to a declared property. Assignments to
    /// unknown keys are reported as a warning and dropped.
    pub fn assign<T: Clone + Send + Sync + 'static>(mut self, key: &str, value: T) -> Self {
        self.assignments.push(Assignment {
            key: key.to_string(),
            apply: Box::new(move |prop| prop.as_typed::<T>()?.set(value)),
        });
        self
    }

    /// Pipe a declared property from a supplier.
    pub fn assign_supplier<T: Clone + Send + Sync + 'static>(
        mut self,
        key: &str,
        supplier: Supplier<T>,
    ) -> Self {
        self.assignments.push(Assignment {
            key: key.to_string(),
            apply: Box::new(move |prop| prop.as_typed::<T>()?.bind(supplier)),
        });
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the task as part of the "all defaults" selection.
    pub fn default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Add the created task to the named group of its project.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Instantiate the spec. Returns the task and the group it should be
    /// added to, if any.
    pub(crate) fn build(
        self,
        id: TaskId,
        project: ProjectId,
    ) -> Result<(Task, Option<String>), PropertyError> {
        let mut task = Task::new(id.clone(), project, self.kind);
        if let Some(description) = self.description {
            task.set_description(description);
        }
        task.set_default(self.default);
        for decl in self.schema {
            task.insert_property((decl.build)(&id));
        }
        for assignment in self.assignments {
            match task.properties().find(|p| p.name() == assignment.key) {
                Some(property) => {
                    let property = property.clone();
                    (assignment.apply)(&property)?;
                }
                None => {
                    warn!(
                        "ignoring assignment to unknown property {:?} of task {}",
                        assignment.key, id
                    );
                }
            }
        }
        Ok((task, self.group))
    }
}
