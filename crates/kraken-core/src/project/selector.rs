//! Task selector parsing.
//!
//! Grammar: `[':' project-path] [':' name] ['?']`. A leading `:` makes the
//! selector absolute (relative to the root project), repeated separators
//! collapse, and a trailing `?` marks the selector optional. A bare name
//! with no project path matches every task of that name in the subtree of
//! the project the selector is resolved against.

use crate::identifier::{is_valid_segment, InvalidId, ID_SEPARATOR};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSelector {
    raw: String,
    absolute: bool,
    project_path: Vec<String>,
    name: String,
    optional: bool,
}

impl TaskSelector {
    pub fn parse(selector: &str) -> Result<TaskSelector, InvalidId> {
        let raw = selector.to_string();
        let mut rest = selector;
        let optional = rest.ends_with('?');
        if optional {
            rest = &rest[..rest.len() - 1];
        }
        let absolute = rest.starts_with(ID_SEPARATOR);
        let mut parts = rest
            .split(ID_SEPARATOR)
            .filter(|part| !part.is_empty())
            .map(|part| is_valid_segment(part).map(|_| part.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        let name = parts.pop().ok_or_else(|| InvalidId::new(selector))?;
        Ok(TaskSelector {
            raw,
            absolute,
            project_path: parts,
            name,
            optional,
        })
    }

    /// The task name the selector matches.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The project path segments before the name, possibly empty.
    pub fn project_path(&self) -> &[String] {
        &self.project_path
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl Display for TaskSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
