//! The lazy variable mapping.
//!
//! Values that look like templates are stored unrendered and only rendered
//! the first time they are read, through the render context that owns the
//! mapping. Rendering a value may read other entries of the same mapping,
//! so every access goes through short `RefCell` borrows that are never held
//! across a render.

use crate::coerce::coerce;
use crate::context::RenderContext;
use crate::environment::Environment;
use crate::error::RenderError;
use crate::value::{Object, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

#[derive(Debug)]
enum Entry {
    Literal(Value),
    Unresolved(String),
    /// Placeholder while the entry's own template renders.
    Resolving,
    Resolved(Value),
    Nested(Rc<LazyVars>),
}

impl Entry {
    fn value(&self) -> Option<Value> {
        match self {
            Entry::Literal(v) | Entry::Resolved(v) => Some(v.clone()),
            Entry::Nested(child) => Some(Value::Object(child.clone())),
            Entry::Unresolved(_) | Entry::Resolving => None,
        }
    }
}

pub struct LazyVars {
    env: Rc<Environment>,
    entries: RefCell<BTreeMap<String, Entry>>,
    context: RefCell<Weak<RenderContext>>,
}

impl fmt::Debug for LazyVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.borrow().iter()).finish()
    }
}

impl LazyVars {
    /// Builds a mapping that is not yet attached to a render context.
    ///
    /// Literal entries can be read right away; template entries fail to
    /// resolve until [`RenderContext`] adopts the mapping.
    pub fn new(env: Rc<Environment>, vars: BTreeMap<String, Value>) -> Self {
        Self::with_context(env, vars, Weak::new())
    }

    fn with_context(
        env: Rc<Environment>,
        vars: BTreeMap<String, Value>,
        context: Weak<RenderContext>,
    ) -> Self {
        let lazy = LazyVars {
            env,
            entries: RefCell::new(BTreeMap::new()),
            context: RefCell::new(context),
        };
        lazy.update(vars);
        lazy
    }

    /// Points this mapping and every nested one at `context`.
    pub(crate) fn attach(&self, context: &Weak<RenderContext>) {
        *self.context.borrow_mut() = context.clone();
        for entry in self.entries.borrow().values() {
            if let Entry::Nested(child) = entry {
                child.attach(context);
            }
        }
    }

    fn classify(&self, value: Value) -> Entry {
        match value {
            Value::Map(map) => Entry::Nested(Rc::new(LazyVars::with_context(
                self.env.clone(),
                map,
                self.context.borrow().clone(),
            ))),
            Value::String(s) if self.env.is_possible_template(&s) => Entry::Unresolved(s),
            other => Entry::Literal(other),
        }
    }

    /// Replaces the entry for `key`. Entries already resolved from the old
    /// value keep their result.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let entry = self.classify(value);
        self.entries.borrow_mut().insert(key.into(), entry);
    }

    pub fn update(&self, vars: BTreeMap<String, Value>) {
        for (key, value) in vars {
            self.set(key, value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// True once `key` holds a final value and reading it won't render.
    pub fn is_resolved(&self, key: &str) -> bool {
        matches!(
            self.entries.borrow().get(key),
            Some(Entry::Literal(_) | Entry::Resolved(_) | Entry::Nested(_))
        )
    }

    /// Reads `key`, rendering and memoizing it on first access.
    ///
    /// A missing key yields [`Value::Undefined`]. Reading a key whose
    /// template is already being rendered further up the stack fails with
    /// [`RenderError::CyclicReference`].
    pub fn get(&self, key: &str) -> Result<Value, RenderError> {
        let source = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(key) else {
                return Ok(Value::Undefined(key.to_string()));
            };
            match std::mem::replace(entry, Entry::Resolving) {
                Entry::Unresolved(source) => source,
                Entry::Resolving => return Err(RenderError::CyclicReference(key.to_string())),
                done => {
                    let value = done.value().unwrap_or(Value::Null);
                    *entry = done;
                    return Ok(value);
                }
            }
        };

        trace!(variable = key, "resolving");
        let rendered = self.render(&source);

        let mut entries = self.entries.borrow_mut();
        match rendered {
            Ok(rendered) => {
                let value = coerce(&source, rendered);
                entries.insert(key.to_string(), Entry::Resolved(value.clone()));
                Ok(value)
            }
            Err(e) => {
                entries.insert(key.to_string(), Entry::Unresolved(source));
                Err(RenderError::InVariable {
                    name: key.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn render(&self, source: &str) -> Result<String, RenderError> {
        let context = self.context.borrow().upgrade().ok_or_else(|| {
            RenderError::invalid("variable mapping is not attached to a render context")
        })?;
        context.render(source)
    }
}

impl Object for LazyVars {
    fn get(&self, key: &str) -> Result<Value, RenderError> {
        LazyVars::get(self, key)
    }

    fn keys(&self) -> Vec<String> {
        LazyVars::keys(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn literals_resolve_without_a_context() {
        let env = Rc::new(Environment::new());
        let lazy = LazyVars::new(env, vars(&[("n", Value::Int(3)), ("s", Value::from("plain"))]));
        assert_eq!(lazy.get("n").unwrap(), Value::Int(3));
        assert_eq!(lazy.get("s").unwrap(), Value::from("plain"));
        assert!(lazy.get("missing").unwrap().is_undefined());
        assert_eq!(lazy.len(), 2);
    }

    #[test]
    fn detached_templates_fail_and_stay_unresolved() {
        let env = Rc::new(Environment::new());
        let lazy = LazyVars::new(env, vars(&[("t", Value::from("{{ 1 }}"))]));
        assert!(matches!(lazy.get("t"), Err(RenderError::InVariable { .. })));
        assert!(!lazy.is_resolved("t"));
    }

    #[test]
    fn maps_become_nested_mappings() {
        let env = Rc::new(Environment::new());
        let inner = vars(&[("x", Value::Int(1))]);
        let lazy = LazyVars::new(env, vars(&[("m", Value::Map(inner))]));
        match lazy.get("m").unwrap() {
            Value::Object(obj) => {
                assert_eq!(obj.keys(), vec!["x".to_string()]);
                assert_eq!(obj.get("x").unwrap(), Value::Int(1));
            }
            other => panic!("expected a nested mapping, got {:?}", other),
        }
    }
}
