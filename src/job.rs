//! One row of one input file, rendered to one output file.

use crate::coerce::parse_bool;
use crate::config::{merge_vars, Config};
use crate::context::RenderContext;
use crate::environment::Environment;
use crate::error::{Error, HookKind, RenderError, Result};
use crate::hook::run_hook;
use crate::sheet::read_text;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The output was written (and removed again if `delete` is set).
    Done(PathBuf),
    Skipped,
}

#[derive(Debug)]
pub struct Job {
    input: PathBuf,
    row: usize,
    context: Rc<RenderContext>,
}

/// Names every template can use besides the row's own columns.
fn metadata(config: &Config, input: &Path, row: usize) -> BTreeMap<String, Value> {
    let mut vars = BTreeMap::new();
    let mut alias = |names: &[&str], value: Value| {
        for name in names {
            vars.insert(name.to_string(), value.clone());
        }
    };
    let input = input.display().to_string();
    alias(&["__cwd"], Value::from(config.cwd.display().to_string()));
    alias(&["input", "__input", "src", "__src"], Value::from(input));
    alias(&["row", "__row"], Value::from(row));
    alias(&["row_number", "__row_number"], Value::from(row + 1));
    alias(
        &["output", "__output", "destination", "__destination", "dest", "__dest"],
        Value::from(config.output.as_str()),
    );
    alias(&["template", "__template"], Value::from(config.template.as_str()));
    alias(&["__pre_hook"], Value::from(config.pre_hook.clone()));
    alias(&["__post_hook"], Value::from(config.post_hook.clone()));
    alias(&["__skip"], Value::from(config.skip.clone()));
    alias(&["__force"], Value::Bool(config.force));
    alias(&["__delete"], Value::Bool(config.delete));
    vars
}

impl Job {
    /// Builds the job's render context. Row values win over the configured
    /// extra variables, which win over job metadata.
    pub fn new(
        env: Rc<Environment>,
        config: &Config,
        input: &Path,
        row: usize,
        row_vars: BTreeMap<String, Value>,
    ) -> Self {
        let mut vars = metadata(config, input, row);
        merge_vars(&mut vars, config.vars.clone());
        merge_vars(&mut vars, row_vars);
        Job {
            input: input.to_path_buf(),
            row,
            context: RenderContext::new(env, vars),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Zero-based data row index within the input file.
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    fn resolve(&self, name: &str, what: &str) -> Result<Value> {
        self.context
            .get(name)
            .and_then(Value::defined)
            .map_err(|e| Error::render(what, e))
    }

    fn resolve_path(&self, name: &str, what: &str) -> Result<PathBuf> {
        let value = self.resolve(name, what)?;
        let path = value.to_output().map_err(|e| Error::render(what, e))?;
        Ok(PathBuf::from(path))
    }

    /// A hook command, `None` when unset or empty.
    fn resolve_command(&self, name: &str, what: &str) -> Result<Option<String>> {
        match self.resolve(name, what)? {
            Value::Null => Ok(None),
            value => {
                let command = value.to_output().map_err(|e| Error::render(what, e))?;
                Ok(Some(command).filter(|c| !c.trim().is_empty()))
            }
        }
    }

    fn should_skip(&self) -> Result<bool> {
        match self.resolve("__skip", "skip rule")? {
            // `{% if x %}yes{% endif %}` renders nothing when `x` is false
            Value::String(s) if s.trim().is_empty() => Ok(false),
            Value::String(s) => parse_bool(s.trim()).ok_or_else(|| {
                Error::render(
                    "skip rule",
                    RenderError::invalid(format!("'{}' is not a boolean", s)),
                )
            }),
            value => Ok(value.is_truthy()),
        }
    }

    pub fn run(&self) -> Result<JobOutcome> {
        let dataset = self.row + 1;
        if self.should_skip()? {
            info!(row = dataset, input = %self.input.display(), "skipping dataset");
            return Ok(JobOutcome::Skipped);
        }
        info!(row = dataset, input = %self.input.display(), "processing dataset");

        let cwd = self.resolve_path("__cwd", "working directory")?;
        let output = cwd.join(self.resolve_path("__output", "output path")?);
        let force = self.resolve("__force", "force flag")?.is_truthy();
        let delete = self.resolve("__delete", "delete flag")?.is_truthy();

        if let Some(command) = self.resolve_command("__pre_hook", "pre hook")? {
            run_hook(HookKind::Pre, &command, &cwd, &output)?;
        }

        let template = cwd.join(self.resolve_path("__template", "template path")?);
        let source = read_text(&template)?;
        let rendered = self
            .context
            .render(&source)
            .map_err(|e| Error::render(format!("template '{}'", template.display()), e))?;

        write_output(&output, &rendered, force)?;
        debug!(output = %output.display(), bytes = rendered.len(), "wrote output");

        if let Some(command) = self.resolve_command("__post_hook", "post hook")? {
            run_hook(HookKind::Post, &command, &cwd, &output)?;
        }

        if delete {
            fs::remove_file(&output).map_err(|e| {
                Error::Output(format!("cannot delete '{}': {}", output.display(), e))
            })?;
            debug!(output = %output.display(), "deleted output");
        }
        Ok(JobOutcome::Done(output))
    }
}

/// Writes `content` to `path`, creating parent directories. An existing file
/// is only replaced when `force` is set.
pub fn write_output(path: &Path, content: &str, force: bool) -> Result<()> {
    if path.exists() {
        if !path.is_file() {
            return Err(Error::Output(format!(
                "'{}' exists and is not a file",
                path.display()
            )));
        }
        if !force {
            return Err(Error::Output(format!(
                "'{}' already exists, use force to overwrite it",
                path.display()
            )));
        }
    }
    let failed = |e: std::io::Error| Error::Output(format!("cannot write '{}': {}", path.display(), e));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(failed)?;
    }
    fs::write(path, content).map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Syntax;

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
    }

    fn fixture(template: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("page.tpl");
        fs::write(&template_path, template).unwrap();
        let config = Config {
            inputs: vec![dir.path().join("data.csv")],
            template: template_path.display().to_string(),
            output: format!("{}/out/{{{{ name }}}}.txt", dir.path().display()),
            force: false,
            delete: false,
            pre_hook: None,
            post_hook: None,
            skip: None,
            csv_delimiter: b',',
            header_row: 0,
            header_column: 0,
            vars: BTreeMap::new(),
            continue_on_error: false,
            cwd: dir.path().to_path_buf(),
            syntax: Syntax::default(),
        };
        Fixture { dir, config }
    }

    fn row(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn job(f: &Fixture, index: usize, vars: BTreeMap<String, Value>) -> Job {
        Job::new(Rc::new(Environment::new()), &f.config, &f.config.inputs[0], index, vars)
    }

    #[test]
    fn renders_to_the_templated_output_path() {
        let f = fixture("Hello {{ name }}, row {{ row_number }} of {{ src | path }}");
        let outcome = job(&f, 0, row(&[("name", Value::from("alice"))])).run().unwrap();
        let expected = f.dir.path().join("out/alice.txt");
        assert_eq!(outcome, JobOutcome::Done(expected.clone()));
        let text = fs::read_to_string(expected).unwrap();
        assert!(text.starts_with("Hello alice, row 1 of "), "{}", text);
    }

    #[test]
    fn row_values_win_over_extra_vars_and_metadata() {
        let mut f = fixture("{{ greeting }} {{ row }}");
        f.config.vars.insert("greeting".into(), Value::from("extra"));
        let j = job(&f, 4, row(&[("name", Value::from("x")), ("row", Value::from("mine"))]));
        assert_eq!(j.context().get("row").unwrap(), Value::from("mine"));
        assert_eq!(j.context().get("__row").unwrap(), Value::Int(4));
        assert_eq!(j.context().get("greeting").unwrap(), Value::from("extra"));
    }

    #[test]
    fn skip_rule_short_circuits() {
        let mut f = fixture("never rendered");
        f.config.skip = Some("{{ __row > 3 }}".into());
        f.config.pre_hook = Some("exit 1".into());
        assert_eq!(job(&f, 5, row(&[("name", Value::from("a"))])).run().unwrap(), JobOutcome::Skipped);
        assert!(!f.dir.path().join("out/a.txt").exists());

        f.config.pre_hook = None;
        let outcome = job(&f, 2, row(&[("name", Value::from("b"))])).run().unwrap();
        assert!(matches!(outcome, JobOutcome::Done(_)));
    }

    #[test]
    fn skip_rule_must_be_boolean() {
        let mut f = fixture("x");
        f.config.skip = Some("{{ name }}".into());
        let err = job(&f, 0, row(&[("name", Value::from("perhaps"))])).run().unwrap_err();
        assert!(matches!(err, Error::Render { .. }), "{}", err);
    }

    #[test]
    fn empty_skip_rule_means_keep() {
        let mut f = fixture("{{ name }}");
        f.config.skip = Some("{% if flag %}yes{% endif %}".into());
        let kept = job(&f, 0, row(&[("name", Value::from("a")), ("flag", Value::from(""))]));
        assert!(matches!(kept.run().unwrap(), JobOutcome::Done(_)));
        assert_eq!(fs::read_to_string(f.dir.path().join("out/a.txt")).unwrap(), "a");

        let skipped = job(&f, 1, row(&[("name", Value::from("b")), ("flag", Value::from("x"))]));
        assert_eq!(skipped.run().unwrap(), JobOutcome::Skipped);
        assert!(!f.dir.path().join("out/b.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn relative_paths_resolve_against_the_working_directory() {
        let mut f = fixture("body of {{ name }}");
        f.config.template = "page.tpl".into();
        f.config.output = "rel/{{ name }}.txt".into();
        f.config.post_hook = Some("test -f {{ __output | quote }}".into());
        let outcome = job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap();
        let expected = f.dir.path().join("rel/a.txt");
        assert_eq!(outcome, JobOutcome::Done(expected.clone()));
        assert_eq!(fs::read_to_string(expected).unwrap(), "body of a");
    }

    #[test]
    fn existing_output_needs_force() {
        let mut f = fixture("new");
        let out = f.dir.path().join("out/a.txt");
        fs::create_dir_all(out.parent().unwrap()).unwrap();
        fs::write(&out, "old").unwrap();

        let err = job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap_err();
        assert!(matches!(err, Error::Output(ref m) if m.contains("already exists")));
        assert_eq!(fs::read_to_string(&out).unwrap(), "old");

        f.config.force = true;
        job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "new");
    }

    #[test]
    fn output_that_is_a_directory_is_rejected() {
        let mut f = fixture("x");
        f.config.force = true;
        fs::create_dir_all(f.dir.path().join("out/a.txt")).unwrap();
        let err = job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap_err();
        assert!(matches!(err, Error::Output(ref m) if m.contains("not a file")));
    }

    #[test]
    fn delete_removes_the_output() {
        let mut f = fixture("x");
        f.config.delete = true;
        job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap();
        assert!(!f.dir.path().join("out/a.txt").exists());
    }

    #[test]
    fn undefined_template_variable_fails_the_job() {
        let f = fixture("{{ missing }}");
        let err = job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap_err();
        match err {
            Error::Render { source, .. } => assert!(matches!(source, RenderError::Undefined(n) if n == "missing")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn hooks_see_rendered_commands_and_run_in_cwd() {
        let mut f = fixture("body");
        f.config.pre_hook = Some("echo pre-{{ name }} >> hooks.log".into());
        f.config.post_hook = Some("test -f {{ __output | quote }} && echo post >> hooks.log".into());
        job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap();
        let log = fs::read_to_string(f.dir.path().join("hooks.log")).unwrap();
        assert_eq!(log, "pre-a\npost\n");
    }

    #[cfg(unix)]
    #[test]
    fn failing_hook_aborts_before_writing() {
        let mut f = fixture("body");
        f.config.pre_hook = Some("echo nope >&2; exit 2".into());
        let err = job(&f, 0, row(&[("name", Value::from("a"))])).run().unwrap_err();
        assert!(matches!(err, Error::Hook { kind: HookKind::Pre, .. }));
        assert!(!f.dir.path().join("out/a.txt").exists());
    }
}
