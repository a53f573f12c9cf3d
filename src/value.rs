use crate::error::RenderError;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A mapping-like value whose entries are produced on demand.
///
/// The evaluator only ever talks to objects through this trait, so an
/// implementation is free to compute (and cache) an entry the first time it
/// is asked for.
pub trait Object: fmt::Debug {
    /// Looks up `key`; a missing key yields [`Value::Undefined`].
    fn get(&self, key: &str) -> Result<Value, RenderError>;

    fn keys(&self) -> Vec<String>;
}

#[derive(Clone, Debug)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Null,
    /// A name that resolved to nothing. Falsy, but any other use is an error.
    Undefined(String),
    Object(Rc<dyn Object>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Object(o) => !o.keys().is_empty(),
            Value::Null | Value::Undefined(_) => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Array(_) => "list",
            Value::Map(_) | Value::Object(_) => "mapping",
            Value::Null => "none",
            Value::Undefined(_) => "undefined",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Fails with [`RenderError::Undefined`] for an undefined value, passes
    /// everything else through.
    pub fn defined(self) -> Result<Value, RenderError> {
        match self {
            Value::Undefined(name) => Err(RenderError::Undefined(name)),
            other => Ok(other),
        }
    }

    /// Turns objects into plain maps, recursively, resolving every entry.
    pub fn materialize(&self) -> Result<Value, RenderError> {
        match self {
            Value::Undefined(name) => Err(RenderError::Undefined(name.clone())),
            Value::Object(obj) => {
                let mut map = BTreeMap::new();
                for key in obj.keys() {
                    let value = obj.get(&key)?.materialize()?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(Value::materialize)
                    .collect::<Result<_, _>>()?,
            )),
            Value::Map(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.materialize()?);
                }
                Ok(Value::Map(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Strict stringification used for template output and concatenation.
    pub fn to_output(&self) -> Result<String, RenderError> {
        match self {
            Value::Undefined(name) => Err(RenderError::Undefined(name.clone())),
            Value::Object(_) | Value::Array(_) | Value::Map(_) => {
                Ok(self.materialize()?.to_string())
            }
            other => Ok(other.to_string()),
        }
    }

    /// Python-style representation, used for items nested in containers.
    pub fn repr(&self) -> String {
        match self {
            Value::String(s) => repr_str(s),
            other => other.to_string(),
        }
    }

    /// Iteration items: list elements, mapping keys or string characters.
    pub fn iter_items(&self) -> Result<Vec<Value>, RenderError> {
        match self {
            Value::Array(items) => Ok(items.clone()),
            Value::Map(map) => Ok(map.keys().cloned().map(Value::String).collect()),
            Value::Object(obj) => Ok(obj.keys().into_iter().map(Value::String).collect()),
            Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
            Value::Undefined(name) => Err(RenderError::Undefined(name.clone())),
            other => Err(RenderError::invalid(format!(
                "{} object is not iterable",
                other.kind()
            ))),
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.len()),
            Value::Map(m) => Some(m.len()),
            Value::Object(o) => Some(o.keys().len()),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Ordering for `<`, `>` and friends. `None` when the kinds don't compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Undefined(a), Value::Undefined(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn fmt_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        let s = if f > 0.0 { "inf" } else { "-inf" };
        s.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => f.write_str(&fmt_float(*x)),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Null => f.write_str("None"),
            Value::Undefined(_) => Ok(()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", repr_str(k), v.repr())?;
                }
                f.write_str("}")
            }
            Value::Object(_) => match self.materialize() {
                Ok(map) => fmt::Display::fmt(&map, f),
                Err(_) => f.write_str("{...}"),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(yaml: serde_yaml::Value) -> Self {
        match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_yaml::Value::String(s) => Value::String(s),
            serde_yaml::Value::Sequence(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (Value::from(k).to_string(), Value::from(v)))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Value::from(tagged.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_style_stringification() {
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Null.to_string(), "None");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        let list = Value::Array(vec![Value::from("it's"), Value::Int(1)]);
        assert_eq!(list.to_string(), "[\"it's\", 1]");
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), Value::from("v"));
        assert_eq!(Value::Map(map).to_string(), "{'k': 'v'}");
    }

    #[test]
    fn undefined_is_falsy_but_not_printable() {
        let undefined = Value::Undefined("missing".into());
        assert!(!undefined.is_truthy());
        assert!(matches!(
            undefined.to_output(),
            Err(RenderError::Undefined(name)) if name == "missing"
        ));
    }

    #[test]
    fn numbers_compare_across_kinds() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn yaml_values_convert() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("{a: 1, b: [x, 2.5], c: ~}").unwrap();
        let value = Value::from(yaml);
        assert_eq!(value.to_string(), "{'a': 1, 'b': ['x', 2.5], 'c': None}");
    }
}
