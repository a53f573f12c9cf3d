//! Error types.
//!
//! [`RenderError`] is raised by the template engine and the lazy variable
//! machinery. [`Error`] is the crate-level error returned by configuration
//! loading, sheet reading and job execution; each variant maps to one failure
//! kind so callers can tell a bad config apart from a single failing row.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing or evaluating a template.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("'{0}' is undefined")]
    Undefined(String),

    /// A lazy variable was read while its own template was still rendering.
    #[error("cyclic reference: variable '{0}' refers back to itself")]
    CyclicReference(String),

    #[error("no filter named '{0}'")]
    UnknownFilter(String),

    #[error("no test named '{0}'")]
    UnknownTest(String),

    #[error("{0}")]
    Invalid(String),

    #[error("while resolving variable '{name}': {source}")]
    InVariable {
        name: String,
        #[source]
        source: Box<RenderError>,
    },
}

impl RenderError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        RenderError::Invalid(message.into())
    }

    /// Walks through [`RenderError::InVariable`] wrappers to the original failure.
    pub fn root_cause(&self) -> &RenderError {
        match self {
            RenderError::InVariable { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Which side of the render a hook runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Pre,
    Post,
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookKind::Pre => f.write_str("pre"),
            HookKind::Post => f.write_str("post"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("input error: {0}")]
    Input(String),

    #[error("failed to render {what}: {source}")]
    Render {
        what: String,
        #[source]
        source: RenderError,
    },

    #[error("output error: {0}")]
    Output(String),

    #[error("failed to run {kind} hook for '{}': {message}", .output.display())]
    Hook {
        kind: HookKind,
        output: PathBuf,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn render(what: impl Into<String>, source: RenderError) -> Self {
        Error::Render {
            what: what.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_variables() {
        let err = RenderError::InVariable {
            name: "a".into(),
            source: Box::new(RenderError::InVariable {
                name: "b".into(),
                source: Box::new(RenderError::CyclicReference("a".into())),
            }),
        };
        assert!(matches!(err.root_cause(), RenderError::CyclicReference(n) if n == "a"));
        assert_eq!(
            err.to_string(),
            "while resolving variable 'a': while resolving variable 'b': cyclic reference: variable 'a' refers back to itself"
        );
    }

    #[test]
    fn hook_error_names_the_output() {
        let err = Error::Hook {
            kind: HookKind::Post,
            output: PathBuf::from("out/a.txt"),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "failed to run post hook for 'out/a.txt': boom");
    }
}
