use crate::ast::Template;
use crate::environment::Environment;
use crate::error::RenderError;
use crate::eval::NameResolver;
use crate::lazy::LazyVars;
use crate::value::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Name resolution for one job.
///
/// A name not bound by the template itself is looked up in the parent scope,
/// then in the environment's globals, then in the lazy mapping. The same
/// context renders the job's templates and every variable they pull in, so
/// all of them share one memoization table.
#[derive(Debug)]
pub struct RenderContext {
    env: Rc<Environment>,
    parent: BTreeMap<String, Value>,
    vars: LazyVars,
}

impl RenderContext {
    pub fn new(env: Rc<Environment>, vars: BTreeMap<String, Value>) -> Rc<Self> {
        Self::with_parent(env, BTreeMap::new(), vars)
    }

    /// Like [`RenderContext::new`], with `parent` values taking precedence
    /// over the lazy mapping. Parent values are used as-is, never rendered.
    pub fn with_parent(
        env: Rc<Environment>,
        parent: BTreeMap<String, Value>,
        vars: BTreeMap<String, Value>,
    ) -> Rc<Self> {
        let lazy = LazyVars::new(env.clone(), vars);
        Self::adopt(env, parent, lazy)
    }

    /// Takes ownership of an existing mapping and attaches it to the new context.
    pub fn adopt(env: Rc<Environment>, parent: BTreeMap<String, Value>, vars: LazyVars) -> Rc<Self> {
        Rc::new_cyclic(|me| {
            vars.attach(me);
            RenderContext {
                env,
                parent,
                vars,
            }
        })
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn vars(&self) -> &LazyVars {
        &self.vars
    }

    /// Resolves `name` the way a template would, `Undefined` when unbound.
    pub fn get(&self, name: &str) -> Result<Value, RenderError> {
        Ok(self
            .resolve(name)?
            .unwrap_or_else(|| Value::Undefined(name.to_string())))
    }

    pub fn render(&self, source: &str) -> Result<String, RenderError> {
        self.env.render_str(source, self)
    }

    pub fn render_template(&self, template: &Template) -> Result<String, RenderError> {
        self.env.render_template(template, self)
    }
}

impl NameResolver for RenderContext {
    fn resolve(&self, name: &str) -> Result<Option<Value>, RenderError> {
        if let Some(value) = self.parent.get(name).or_else(|| self.env.global(name)) {
            return Ok(Some(value.clone()));
        }
        if self.vars.contains(name) {
            return self.vars.get(name).map(Some);
        }
        Ok(None)
    }
}
