//! Failures raised from inside task actions.
//!
//! Actions return a [`BuildResult`]; the executor converts any error into a
//! `FAILED` task status with the captured message, so no action error ever
//! escapes a worker.

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// An arbitrary failure inside a task action.
pub struct BuildException {
    message: String,
}

impl BuildException {
    pub fn new<M: Display>(message: M) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// Deliberately not `Error`, so the blanket conversion below stays coherent.
impl<E: 'static + Error + Send + Sync> From<E> for BuildException {
    fn from(e: E) -> Self {
        Self::new(e)
    }
}

impl Debug for BuildException {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildException")
            .field("message", &self.message)
            .finish()
    }
}

impl Display for BuildException {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type BuildResult<T = ()> = Result<T, BuildException>;
