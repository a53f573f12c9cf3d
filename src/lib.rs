//! rowjinja: render a Jinja-like template once per spreadsheet row.
//!
//! Every row of every input file (CSV, ODS, XLSX) becomes one job. The row's
//! columns, the configured extra variables and some job metadata form the
//! job's variables. The output path, the hooks and the skip rule are
//! themselves templates over those variables.
//!
//! Variables whose value looks like a template are rendered lazily, the first
//! time something reads them, against the same context. Variables may refer
//! to each other in any order. A rendered value is coerced back into a typed
//! value when it reads as a literal (`3`, `[1, 2]`, `yes`) and cached for the
//! rest of the job. A variable that needs itself is reported as a cycle.
//!
//! The engine supports a Jinja subset:
//! - `{{ expr }}` with filters, tests, arithmetic, comparisons and
//!   conditional expressions.
//! - `{% for %}` (with `loop.*`, tuple unpacking and `else`), `{% if %}` /
//!   `{% elif %}` / `{% else %}`, and `{% set %}`.
//! - `{# comments #}` and `-` whitespace control.
//! - Undefined names are errors.
//!
//! Newline semantics follow Jinja with `trim_blocks` and `lstrip_blocks` on:
//! a newline directly after a block tag is dropped, and whitespace before a
//! block tag on its own line is stripped. A single trailing newline of the
//! template is dropped unless `keep_trailing_newline` is set.

pub mod ast;
pub mod batch;
pub mod coerce;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod eval;
pub mod filters;
pub mod hook;
pub mod job;
pub mod lazy;
pub mod lexer;
pub mod parser;
pub mod sheet;
pub mod syntax;
pub mod value;

pub use batch::{BatchReport, Runner};
pub use coerce::coerce;
pub use config::{Config, EnvSource, Overrides};
pub use context::RenderContext;
pub use environment::Environment;
pub use error::{Error, HookKind, RenderError, Result};
pub use eval::NameResolver;
pub use job::{Job, JobOutcome};
pub use lazy::LazyVars;
pub use syntax::{is_possible_template, Syntax};
pub use value::{Object, Value};
