use crate::ast::Template;
use crate::error::RenderError;
use crate::eval::{Evaluator, NameResolver};
use crate::filters;
use crate::lexer::LexOptions;
use crate::parser::Parser;
use crate::syntax::Syntax;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Keyword arguments passed to a filter, e.g. `default('x', boolean=true)`.
pub type Kwargs = BTreeMap<String, Value>;

pub type FilterFn = dyn Fn(Value, &[Value], &Kwargs) -> Result<Value, RenderError>;
pub type TestFn = dyn Fn(&Value, &[Value]) -> Result<bool, RenderError>;

/// Delimiters, whitespace options, filters, tests and globals shared by every
/// render of a batch.
///
/// Configure it mutably, then share it behind an `Rc`; rendering only needs
/// `&self`.
pub struct Environment {
    syntax: Syntax,
    trim_blocks: bool,
    lstrip_blocks: bool,
    keep_trailing_newline: bool,
    filters: HashMap<String, Box<FilterFn>>,
    tests: HashMap<String, Box<TestFn>>,
    globals: BTreeMap<String, Value>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut filters: Vec<_> = self.filters.keys().collect();
        filters.sort();
        f.debug_struct("Environment")
            .field("syntax", &self.syntax)
            .field("trim_blocks", &self.trim_blocks)
            .field("lstrip_blocks", &self.lstrip_blocks)
            .field("keep_trailing_newline", &self.keep_trailing_newline)
            .field("filters", &filters)
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Environment {
    /// Default delimiters, `trim_blocks` and `lstrip_blocks` on, and every
    /// builtin and regex filter registered.
    pub fn new() -> Self {
        let mut env = Self {
            syntax: Syntax::default(),
            trim_blocks: true,
            lstrip_blocks: true,
            keep_trailing_newline: false,
            filters: HashMap::new(),
            tests: HashMap::new(),
            globals: BTreeMap::new(),
        };
        filters::register_builtins(&mut env);
        env
    }

    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn set_trim_blocks(&mut self, yes: bool) {
        self.trim_blocks = yes;
    }

    pub fn set_lstrip_blocks(&mut self, yes: bool) {
        self.lstrip_blocks = yes;
    }

    pub fn set_keep_trailing_newline(&mut self, yes: bool) {
        self.keep_trailing_newline = yes;
    }

    pub fn add_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &[Value], &Kwargs) -> Result<Value, RenderError> + 'static,
    {
        self.filters.insert(name.into(), Box::new(f));
    }

    pub fn add_test<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &[Value]) -> Result<bool, RenderError> + 'static,
    {
        self.tests.insert(name.into(), Box::new(f));
    }

    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    /// Whether `s` would be treated as a template by this environment.
    pub fn is_possible_template(&self, s: &str) -> bool {
        self.syntax.is_possible_template(s)
    }

    pub(crate) fn filter(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name).map(|f| f.as_ref())
    }

    pub(crate) fn test(&self, name: &str) -> Option<&TestFn> {
        self.tests.get(name).map(|t| t.as_ref())
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn parse(&self, source: &str) -> Result<Template, RenderError> {
        let source = if self.keep_trailing_newline {
            source
        } else {
            source
                .strip_suffix("\r\n")
                .or_else(|| source.strip_suffix('\n'))
                .unwrap_or(source)
        };
        let options = LexOptions {
            trim_blocks: self.trim_blocks,
            lstrip_blocks: self.lstrip_blocks,
        };
        Parser::new(source, &self.syntax, options).parse_template()
    }

    pub fn render_template(
        &self,
        template: &Template,
        resolver: &dyn NameResolver,
    ) -> Result<String, RenderError> {
        Evaluator::new(self, resolver).render(template)
    }

    /// Parses and renders `source` in one go.
    pub fn render_str(&self, source: &str, resolver: &dyn NameResolver) -> Result<String, RenderError> {
        let template = self.parse(source)?;
        self.render_template(&template, resolver)
    }
}
