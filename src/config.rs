//! Layered configuration.
//!
//! Every option is taken from the first source that sets it: explicit
//! [`Overrides`] (command line or API), `ROWJINJA_*` environment variables,
//! the YAML config file, then the built-in default.

use crate::coerce::parse_bool;
use crate::error::{Error, Result};
use crate::sheet::SheetOptions;
use crate::syntax::Syntax;
use crate::value::Value;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_PREFIX: &str = "ROWJINJA_";

const ENV_KEYS: &[&str] = &[
    "INPUT",
    "TEMPLATE",
    "OUTPUT",
    "FORCE",
    "DELETE",
    "PRE_HOOK",
    "POST_HOOK",
    "SKIP",
    "CSV_DELIMITER",
    "HEADER_ROW_COLUMN",
    "VARS",
    "CONTINUE_ON_ERROR",
];

/// Options set explicitly by the caller. `None` (or empty) means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub input: Vec<PathBuf>,
    pub template: Option<String>,
    pub output: Option<String>,
    pub force: Option<bool>,
    pub delete: Option<bool>,
    pub pre_hook: Option<String>,
    pub post_hook: Option<String>,
    pub skip: Option<String>,
    pub csv_delimiter: Option<String>,
    /// `"row,col"`, `"row"` or `"row,"`.
    pub header_row_column: Option<String>,
    /// Overlaid onto the `vars` of the lower-priority sources.
    pub vars: BTreeMap<String, Value>,
    pub continue_on_error: Option<bool>,
    /// Delimiters that mark a string as a template.
    pub syntax: Syntax,
}

/// `ROWJINJA_*` variables, keyed by their lowercase option name.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    values: BTreeMap<String, String>,
}

impl EnvSource {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut values = BTreeMap::new();
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if ENV_KEYS.contains(&key) {
                values.insert(key.to_ascii_lowercase(), value);
            } else {
                warn!(variable = %name, "ignoring unknown environment variable");
            }
        }
        Self { values }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowColumn {
    Text(String),
    Row(i64),
    Pair(Vec<i64>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    input: Option<OneOrMany>,
    template: Option<String>,
    output: Option<String>,
    force: Option<bool>,
    delete: Option<bool>,
    pre_hook: Option<String>,
    post_hook: Option<String>,
    skip: Option<String>,
    csv_delimiter: Option<String>,
    header_row_column: Option<RowColumn>,
    vars: Option<BTreeMap<String, serde_yaml::Value>>,
    continue_on_error: Option<bool>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file '{}': {}", path.display(), e))
        })?;
        Self::parse(&content).map_err(|e| {
            Error::Config(format!("invalid config file '{}': {}", path.display(), e))
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Option<Self> = serde_yaml::from_str(content)?;
        let file = file.unwrap_or_default();
        for key in file.unknown.keys() {
            warn!(option = %key, "unknown option in configuration file");
        }
        Ok(file)
    }
}

/// Fully resolved and validated configuration for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub inputs: Vec<PathBuf>,
    /// Template path; may itself be a template.
    pub template: String,
    /// Output path; may itself be a template.
    pub output: String,
    pub force: bool,
    pub delete: bool,
    pub pre_hook: Option<String>,
    pub post_hook: Option<String>,
    pub skip: Option<String>,
    pub csv_delimiter: u8,
    pub header_row: usize,
    pub header_column: usize,
    pub vars: BTreeMap<String, Value>,
    pub continue_on_error: bool,
    /// The config file's directory, else the process working directory.
    /// Hooks run here and relative template and output paths start here.
    pub cwd: PathBuf,
    pub syntax: Syntax,
}

impl Config {
    pub fn load(overrides: Overrides, env: &EnvSource) -> Result<Self> {
        let file = match &overrides.config_path {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let cwd = match &overrides.config_path {
            Some(path) => match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => std::env::current_dir()?,
            },
            None => std::env::current_dir()?,
        };
        let config = Builder::default().build(overrides, env, file, cwd)?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn sheet_options(&self) -> SheetOptions {
        SheetOptions {
            delimiter: self.csv_delimiter,
            header_row: self.header_row,
            header_column: self.header_column,
        }
    }
}

/// Collects every problem instead of stopping at the first one.
#[derive(Default)]
struct Builder {
    problems: Vec<String>,
}

impl Builder {
    fn build(mut self, cli: Overrides, env: &EnvSource, file: FileConfig, cwd: PathBuf) -> Result<Config> {
        let inputs = if !cli.input.is_empty() {
            cli.input
        } else if let Some(s) = env.get("input") {
            split_paths(s)
        } else {
            match file.input {
                Some(OneOrMany::One(s)) => split_paths(&s),
                Some(OneOrMany::Many(list)) => list.into_iter().map(PathBuf::from).collect(),
                None => Vec::new(),
            }
        };
        if inputs.is_empty() {
            self.problem("input", "at least one input file is required");
        }
        let inputs: Vec<PathBuf> = inputs.into_iter().map(|input| cwd.join(input)).collect();

        let template = self.required("template", pick(cli.template, env.get("template"), file.template));
        let output = self.required("output", pick(cli.output, env.get("output"), file.output));

        let force = self.flag("force", cli.force, env.get("force"), file.force);
        let delete = self.flag("delete", cli.delete, env.get("delete"), file.delete);
        let continue_on_error = self.flag(
            "continue_on_error",
            cli.continue_on_error,
            env.get("continue_on_error"),
            file.continue_on_error,
        );

        let pre_hook = pick(cli.pre_hook, env.get("pre_hook"), file.pre_hook).filter(|s| !s.trim().is_empty());
        let post_hook = pick(cli.post_hook, env.get("post_hook"), file.post_hook).filter(|s| !s.trim().is_empty());

        let skip = pick(cli.skip, env.get("skip"), file.skip);
        if let Some(rule) = &skip {
            if !cli.syntax.is_possible_template(rule) {
                self.problem("skip", format!("'{}' is not a template expression", rule));
            }
        }

        let delimiter = pick(cli.csv_delimiter, env.get("csv_delimiter"), file.csv_delimiter)
            .unwrap_or_else(|| ",".to_string());
        let csv_delimiter = match delimiter.as_bytes() {
            [b] if b.is_ascii() => *b,
            _ => {
                self.problem("csv_delimiter", format!("'{}' is not a single ASCII character", delimiter));
                b','
            }
        };

        let row_column = cli
            .header_row_column
            .or_else(|| env.get("header_row_column").map(str::to_string));
        let (header_row, header_column) = match (row_column, file.header_row_column) {
            (Some(text), _) | (None, Some(RowColumn::Text(text))) => self.row_column(&text),
            (None, Some(RowColumn::Row(row))) => self.row_column(&row.to_string()),
            (None, Some(RowColumn::Pair(pair))) => {
                let text = pair.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
                if pair.len() > 2 {
                    self.problem("header_row_column", "expected at most two numbers");
                }
                self.row_column(&text)
            }
            (None, None) => (0, 0),
        };

        let mut vars = BTreeMap::new();
        if let Some(file_vars) = file.vars {
            merge_vars(&mut vars, file_vars.into_iter().map(|(k, v)| (k, Value::from(v))).collect());
        }
        if let Some(text) = env.get("vars") {
            match serde_yaml::from_str::<BTreeMap<String, serde_yaml::Value>>(text) {
                Ok(env_vars) => merge_vars(&mut vars, env_vars.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
                Err(e) => self.problem("vars", format!("{}{} is not a YAML mapping: {}", ENV_PREFIX, "VARS", e)),
            }
        }
        merge_vars(&mut vars, cli.vars);

        if !self.problems.is_empty() {
            for problem in &self.problems {
                tracing::error!("{}", problem);
            }
            return Err(Error::Config(self.problems.join("; ")));
        }

        Ok(Config {
            inputs,
            template: template.unwrap_or_default(),
            output: output.unwrap_or_default(),
            force,
            delete,
            pre_hook,
            post_hook,
            skip,
            csv_delimiter,
            header_row,
            header_column,
            vars,
            continue_on_error,
            cwd,
            syntax: cli.syntax,
        })
    }

    fn problem(&mut self, key: &str, message: impl std::fmt::Display) {
        self.problems.push(format!("option '{}': {}", key, message));
    }

    fn required(&mut self, key: &str, value: Option<String>) -> Option<String> {
        match value {
            Some(v) if !v.trim().is_empty() => Some(v),
            _ => {
                self.problem(key, "a value is required");
                None
            }
        }
    }

    fn flag(&mut self, key: &str, cli: Option<bool>, env: Option<&str>, file: Option<bool>) -> bool {
        if let Some(b) = cli {
            return b;
        }
        if let Some(text) = env {
            return match parse_bool(text.trim()) {
                Some(b) => b,
                None => {
                    self.problem(key, format!("'{}' is not a boolean", text));
                    false
                }
            };
        }
        file.unwrap_or(false)
    }

    /// Parses `"row,col"`; missing or empty parts are 0.
    fn row_column(&mut self, text: &str) -> (usize, usize) {
        let mut parts = text.split(',').map(str::trim);
        let mut next = |builder: &mut Self| match parts.next() {
            None | Some("") => 0,
            Some(n) => n.parse::<usize>().unwrap_or_else(|_| {
                builder.problem("header_row_column", format!("'{}' is not a non-negative integer", n));
                0
            }),
        };
        let row = next(self);
        let column = next(self);
        if parts.next().is_some() {
            self.problem("header_row_column", format!("'{}' has more than two parts", text));
        }
        (row, column)
    }
}

fn pick(cli: Option<String>, env: Option<&str>, file: Option<String>) -> Option<String> {
    cli.or_else(|| env.map(str::to_string)).or(file)
}

/// Splits a `:`-separated list of paths.
fn split_paths(s: &str) -> Vec<PathBuf> {
    s.split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Recursively merges `overlay` into `base`; overlay wins except where both
/// sides hold mappings, which are merged key by key.
pub fn merge_vars(base: &mut BTreeMap<String, Value>, overlay: BTreeMap<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => merge_vars(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Parses a `key=value` pair from the command line. The value is read as
/// YAML, so `n=3` gives an integer and `tags=[a, b]` a list. Values that are
/// templates under `syntax` are kept as strings.
pub fn parse_extra_var(pair: &str, syntax: &Syntax) -> std::result::Result<(String, Value), String> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in '{}'", pair));
    }
    let value = if raw.trim().is_empty() || syntax.is_possible_template(raw) {
        Value::from(raw)
    } else {
        match serde_yaml::from_str::<serde_yaml::Value>(raw) {
            Ok(serde_yaml::Value::String(_)) | Err(_) => Value::from(raw),
            Ok(yaml) => Value::from(yaml),
        }
    };
    Ok((key.to_string(), value))
}
