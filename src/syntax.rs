//! Delimiter configuration and the template classifier.

pub const BLOCK_START: &str = "{%";
pub const BLOCK_END: &str = "%}";
pub const VARIABLE_START: &str = "{{";
pub const VARIABLE_END: &str = "}}";
pub const COMMENT_START: &str = "{#";
pub const COMMENT_END: &str = "#}";

/// The delimiter strings the lexer looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub block_start: String,
    pub block_end: String,
    pub variable_start: String,
    pub variable_end: String,
    pub comment_start: String,
    pub comment_end: String,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            block_start: BLOCK_START.to_string(),
            block_end: BLOCK_END.to_string(),
            variable_start: VARIABLE_START.to_string(),
            variable_end: VARIABLE_END.to_string(),
            comment_start: COMMENT_START.to_string(),
            comment_end: COMMENT_END.to_string(),
        }
    }
}

impl Syntax {
    /// Cheap pre-filter: does `s` contain any start marker?
    ///
    /// This is a substring check, not a parse. A string that merely happens to
    /// contain a marker is reported as a template and will fail later at render
    /// time, but nothing the lexer would interpret is ever reported as plain.
    pub fn is_possible_template(&self, s: &str) -> bool {
        [&self.block_start, &self.variable_start, &self.comment_start]
            .iter()
            .any(|marker| s.contains(marker.as_str()))
    }
}

/// [`Syntax::is_possible_template`] for the default delimiters.
pub fn is_possible_template(s: &str) -> bool {
    [BLOCK_START, VARIABLE_START, COMMENT_START]
        .iter()
        .any(|marker| s.contains(marker))
}
