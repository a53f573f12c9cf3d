//! Builtin filters and tests, plus the regex, `bool`, `path` and `quote`
//! filters used by row templates.

use crate::coerce::parse_bool;
use crate::environment::{Environment, Kwargs};
use crate::error::RenderError;
use crate::value::Value;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::path::PathBuf;

pub fn register_builtins(env: &mut Environment) {
    env.add_filter("upper", |v, _, _| Ok(text(&v)?.to_uppercase().into()));
    env.add_filter("lower", |v, _, _| Ok(text(&v)?.to_lowercase().into()));
    env.add_filter("title", |v, _, _| Ok(title(&text(&v)?).into()));
    env.add_filter("capitalize", |v, _, _| Ok(capitalize(&text(&v)?).into()));
    env.add_filter("trim", |v, _, _| Ok(text(&v)?.trim().into()));
    env.add_filter("string", |v, _, _| Ok(text(&v)?.into()));
    env.add_filter("length", length);
    env.add_filter("count", length);
    env.add_filter("default", default);
    env.add_filter("d", default);
    env.add_filter("join", join);
    env.add_filter("int", int);
    env.add_filter("float", float);
    env.add_filter("replace", replace);
    env.add_filter("first", |v, _, _| first_or_last(v, true));
    env.add_filter("last", |v, _, _| first_or_last(v, false));
    env.add_filter("abs", abs);
    env.add_filter("round", round);
    env.add_filter("list", |v, _, _| Ok(Value::Array(v.iter_items()?)));
    env.add_filter("sort", sort);
    env.add_filter("reverse", reverse);
    env.add_filter("unique", unique);
    env.add_filter("keys", |v, _, _| Ok(Value::Array(mapping(&v)?.iter_items()?)));
    env.add_filter("values", |v, _, _| values(v, false));
    env.add_filter("items", |v, _, _| values(v, true));
    env.add_filter("min", |v, _, _| extreme(v, Ordering::Less));
    env.add_filter("max", |v, _, _| extreme(v, Ordering::Greater));
    env.add_filter("sum", sum);

    env.add_filter("regex_escape", |v, _, _| Ok(regex::escape(&text(&v)?).into()));
    env.add_filter("regex_findall", regex_findall);
    env.add_filter("regex_replace", regex_replace);
    env.add_filter("regex_search", regex_search);
    env.add_filter("regex_contains", regex_contains);
    env.add_filter("bool", to_bool);
    env.add_filter("path", |v, _, _| Ok(normalize_path(&text(&v)?).into()));
    env.add_filter("quote", |v, _, _| Ok(shell_quote(&text(&v)?).into()));

    env.add_test("defined", |v, _| Ok(!v.is_undefined()));
    env.add_test("undefined", |v, _| Ok(v.is_undefined()));
    env.add_test("none", |v, _| Ok(matches!(v, Value::Null)));
    env.add_test("boolean", |v, _| Ok(matches!(v, Value::Bool(_))));
    env.add_test("true", |v, _| Ok(matches!(v, Value::Bool(true))));
    env.add_test("false", |v, _| Ok(matches!(v, Value::Bool(false))));
    env.add_test("number", |v, _| Ok(v.is_number()));
    env.add_test("integer", |v, _| Ok(matches!(v, Value::Int(_))));
    env.add_test("float", |v, _| Ok(matches!(v, Value::Float(_))));
    env.add_test("string", |v, _| Ok(matches!(v, Value::String(_))));
    env.add_test("mapping", |v, _| Ok(matches!(v, Value::Map(_) | Value::Object(_))));
    env.add_test("sequence", |v, _| {
        Ok(matches!(v, Value::Array(_) | Value::String(_) | Value::Map(_) | Value::Object(_)))
    });
    env.add_test("iterable", |v, _| {
        Ok(matches!(v, Value::Array(_) | Value::String(_) | Value::Map(_) | Value::Object(_)))
    });
    env.add_test("even", |v, _| Ok(integer(v)? % 2 == 0));
    env.add_test("odd", |v, _| Ok(integer(v)? % 2 != 0));
    env.add_test("divisibleby", |v, args| {
        let n = integer(arg(args, 0, "divisibleby")?)?;
        if n == 0 {
            return Err(RenderError::invalid("divisibleby: division by zero"));
        }
        Ok(integer(v)?.wrapping_rem(n) == 0)
    });
    env.add_test("eq", |v, args| Ok(v.materialize()? == arg(args, 0, "eq")?.materialize()?));
    env.add_test("in", |v, args| {
        let container = arg(args, 0, "in")?;
        Ok(container.clone().defined()?.iter_items()?.contains(v))
    });
}

fn text(v: &Value) -> Result<String, RenderError> {
    v.to_output()
}

fn integer(v: &Value) -> Result<i64, RenderError> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Undefined(name) => Err(RenderError::Undefined(name.clone())),
        other => Err(RenderError::invalid(format!("expected an integer, got {}", other.kind()))),
    }
}

fn arg<'v>(args: &'v [Value], i: usize, name: &str) -> Result<&'v Value, RenderError> {
    args.get(i)
        .ok_or_else(|| RenderError::invalid(format!("{}: missing argument {}", name, i + 1)))
}

/// Positional argument `i`, else keyword `key`.
fn param<'v>(args: &'v [Value], kwargs: &'v Kwargs, i: usize, key: &str) -> Option<&'v Value> {
    args.get(i).or_else(|| kwargs.get(key))
}

fn flag(args: &[Value], kwargs: &Kwargs, i: usize, key: &str) -> bool {
    param(args, kwargs, i, key).is_some_and(Value::is_truthy)
}

fn mapping(v: &Value) -> Result<&Value, RenderError> {
    match v {
        Value::Map(_) | Value::Object(_) => Ok(v),
        Value::Undefined(name) => Err(RenderError::Undefined(name.clone())),
        other => Err(RenderError::invalid(format!("expected a mapping, got {}", other.kind()))),
    }
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphanumeric();
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}

fn length(v: Value, _: &[Value], _: &Kwargs) -> Result<Value, RenderError> {
    let v = v.defined()?;
    v.len()
        .map(Value::from)
        .ok_or_else(|| RenderError::invalid(format!("object of type {} has no length", v.kind())))
}

fn default(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let boolean = flag(args, kwargs, 1, "boolean");
    if v.is_undefined() || (boolean && !v.is_truthy()) {
        Ok(param(args, kwargs, 0, "default_value")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())))
    } else {
        Ok(v)
    }
}

fn join(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let sep = match param(args, kwargs, 0, "d") {
        Some(sep) => sep.to_output()?,
        None => String::new(),
    };
    let parts = v
        .iter_items()?
        .iter()
        .map(Value::to_output)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(&sep).into())
}

fn int(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let fallback = || param(args, kwargs, 0, "default").cloned().unwrap_or(Value::Int(0));
    Ok(match v.defined()? {
        Value::Int(i) => Value::Int(i),
        Value::Float(f) => Value::Int(f.trunc() as i64),
        Value::Bool(b) => Value::Int(i64::from(b)),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => match s.parse::<f64>() {
                    Ok(f) if f.is_finite() => Value::Int(f.trunc() as i64),
                    _ => fallback(),
                },
            }
        }
        _ => fallback(),
    })
}

fn float(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let fallback = || param(args, kwargs, 0, "default").cloned().unwrap_or(Value::Float(0.0));
    Ok(match v.defined()? {
        Value::Int(i) => Value::Float(i as f64),
        Value::Float(f) => Value::Float(f),
        Value::Bool(b) => Value::Float(if b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().map(Value::Float).unwrap_or_else(|_| fallback()),
        _ => fallback(),
    })
}

fn replace(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let s = text(&v)?;
    let old = arg(args, 0, "replace")?.to_output()?;
    let new = arg(args, 1, "replace")?.to_output()?;
    Ok(match param(args, kwargs, 2, "count") {
        Some(count) => s.replacen(&old, &new, integer(count)?.max(0) as usize),
        None => s.replace(&old, &new),
    }
    .into())
}

fn first_or_last(v: Value, first: bool) -> Result<Value, RenderError> {
    let items = v.defined()?.iter_items()?;
    let item = if first { items.first() } else { items.last() };
    Ok(item
        .cloned()
        .unwrap_or_else(|| Value::Undefined(if first { "first" } else { "last" }.to_string())))
}

fn abs(v: Value, _: &[Value], _: &Kwargs) -> Result<Value, RenderError> {
    match v.defined()? {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| RenderError::invalid("integer overflow")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(RenderError::invalid(format!("bad operand type for abs(): {}", other.kind()))),
    }
}

fn round(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let x = v
        .defined()?
        .as_f64()
        .ok_or_else(|| RenderError::invalid("round: expected a number"))?;
    let precision = match param(args, kwargs, 0, "precision") {
        Some(p) => integer(p)?,
        None => 0,
    };
    let method = match param(args, kwargs, 1, "method") {
        Some(m) => m.to_output()?,
        None => "common".to_string(),
    };
    let scale = 10f64.powi(precision as i32);
    let scaled = x * scale;
    let rounded = match method.as_str() {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        other => return Err(RenderError::invalid(format!("round: unknown method '{}'", other))),
    };
    Ok(Value::Float(rounded / scale))
}

fn sorted(mut items: Vec<Value>) -> Result<Vec<Value>, RenderError> {
    let mut failed = None;
    items.sort_by(|a, b| {
        a.compare(b).unwrap_or_else(|| {
            failed.get_or_insert_with(|| format!("cannot compare {} with {}", a.kind(), b.kind()));
            Ordering::Equal
        })
    });
    match failed {
        Some(message) => Err(RenderError::invalid(message)),
        None => Ok(items),
    }
}

fn sort(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let mut items = sorted(v.iter_items()?)?;
    if flag(args, kwargs, 0, "reverse") {
        items.reverse();
    }
    Ok(Value::Array(items))
}

fn reverse(v: Value, _: &[Value], _: &Kwargs) -> Result<Value, RenderError> {
    match v {
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        other => {
            let mut items = other.iter_items()?;
            items.reverse();
            Ok(Value::Array(items))
        }
    }
}

fn unique(v: Value, _: &[Value], _: &Kwargs) -> Result<Value, RenderError> {
    let mut seen: Vec<Value> = Vec::new();
    for item in v.iter_items()? {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    Ok(Value::Array(seen))
}

fn values(v: Value, with_keys: bool) -> Result<Value, RenderError> {
    let map = mapping(&v)?;
    let mut out = Vec::new();
    for key in map.iter_items()? {
        let name = key.to_output()?;
        let value = match map {
            Value::Map(m) => m.get(&name).cloned().unwrap_or(Value::Null),
            Value::Object(obj) => obj.get(&name)?,
            _ => Value::Null,
        };
        out.push(if with_keys { Value::Array(vec![key, value]) } else { value });
    }
    Ok(Value::Array(out))
}

fn extreme(v: Value, wanted: Ordering) -> Result<Value, RenderError> {
    let items = sorted(v.iter_items()?)?;
    let item = if wanted == Ordering::Less { items.first() } else { items.last() };
    Ok(item.cloned().unwrap_or_else(|| Value::Undefined("empty sequence".to_string())))
}

fn sum(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let mut total = param(args, kwargs, 0, "start").cloned().unwrap_or(Value::Int(0));
    for item in v.iter_items()? {
        total = match (&total, &item) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| RenderError::invalid("integer overflow"))?,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => Value::Float(a + b),
                _ => return Err(RenderError::invalid(format!("sum: cannot add {}", item.kind()))),
            },
        };
    }
    Ok(total)
}

fn compile(v: &Value, pattern: &Value, args: &[Value], kwargs: &Kwargs, at: usize) -> Result<(String, Regex), RenderError> {
    let subject = text(v)?;
    let pattern = pattern.to_output()?;
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(flag(args, kwargs, at, "ignorecase"))
        .multi_line(flag(args, kwargs, at + 1, "multiline"))
        .build()
        .map_err(|e| RenderError::invalid(format!("invalid regular expression '{}': {}", pattern, e)))?;
    Ok((subject, regex))
}

fn regex_findall(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let (subject, re) = compile(&v, arg(args, 0, "regex_findall")?, args, kwargs, 1)?;
    let groups = re.captures_len() - 1;
    let found = re
        .captures_iter(&subject)
        .map(|caps| {
            let group = |i: usize| Value::from(caps.get(i).map_or("", |m| m.as_str()));
            match groups {
                0 => group(0),
                1 => group(1),
                n => Value::Array((1..=n).map(group).collect()),
            }
        })
        .collect();
    Ok(Value::Array(found))
}

/// Turns `\1` and `\g<name>` group references into the `${1}`/`${name}` form,
/// escaping any literal `$`.
fn replacement(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        group.push(*d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('g') => {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.next() == Some('<') {
                        let name: String = lookahead.by_ref().take_while(|c| *c != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                        chars = lookahead;
                    } else {
                        out.push('\\');
                    }
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

fn regex_replace(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let with = match param(args, kwargs, 1, "replacement") {
        Some(r) => r.to_output()?,
        None => String::new(),
    };
    let (subject, re) = compile(&v, arg(args, 0, "regex_replace")?, args, kwargs, 2)?;
    Ok(re.replace_all(&subject, replacement(&with).as_str()).into_owned().into())
}

/// `regex_search('(?P<x>a)(b)', '\\g<x>', '\\2')` returns the named and
/// numbered groups as a list; without group arguments it returns the match.
fn regex_search(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let (subject, re) = compile(&v, arg(args, 0, "regex_search")?, &[], kwargs, usize::MAX - 1)?;
    let Some(caps) = re.captures(&subject) else {
        return Ok(Value::Null);
    };
    let selectors = &args[1..];
    if selectors.is_empty() {
        return Ok(caps.get(0).map_or("", |m| m.as_str()).into());
    }
    let group_ref = Regex::new(r"^\\(?:(\d+)|g<(\w+)>)$").map_err(|e| RenderError::invalid(e.to_string()))?;
    let mut out = Vec::new();
    for selector in selectors {
        let selector = selector.to_output()?;
        let m = group_ref
            .captures(&selector)
            .ok_or_else(|| RenderError::invalid(format!("regex_search: unknown argument '{}'", selector)))?;
        let group = match (m.get(1), m.get(2)) {
            (Some(n), _) => n.as_str().parse::<usize>().ok().and_then(|n| caps.get(n)),
            (_, Some(name)) => caps.name(name.as_str()),
            _ => None,
        };
        out.push(group.map_or(Value::Null, |g| g.as_str().into()));
    }
    Ok(Value::Array(out))
}

fn regex_contains(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    let (subject, re) = compile(&v, arg(args, 0, "regex_contains")?, args, kwargs, 1)?;
    Ok(Value::Bool(re.is_match(&subject)))
}

fn to_bool(v: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, RenderError> {
    match v.defined()? {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Null => Ok(Value::Bool(false)),
        n if n.is_number() => Ok(Value::Bool(n.is_truthy())),
        other => {
            let s = other.to_output()?;
            match parse_bool(s.trim()) {
                Some(b) => Ok(Value::Bool(b)),
                None => param(args, kwargs, 0, "default")
                    .cloned()
                    .ok_or_else(|| RenderError::invalid(format!("invalid truth value '{}'", s))),
            }
        }
    }
}

/// Lexical path cleanup: collapses repeated separators, drops `.` segments
/// and trailing slashes.
pub fn normalize_path(s: &str) -> String {
    if s.is_empty() {
        return ".".to_string();
    }
    let path: PathBuf = PathBuf::from(s).components().collect();
    match path.to_str() {
        Some("") => ".".to_string(),
        Some(p) => p.to_string(),
        None => path.to_string_lossy().into_owned(),
    }
}

/// Quotes `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if s.chars().all(safe) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r#"'"'"'"#))
    }
}
