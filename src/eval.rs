use crate::ast::*;
use crate::environment::{Environment, Kwargs};
use crate::error::RenderError;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Supplies values for names that are not bound inside the template itself.
///
/// The evaluator asks the resolver only after loop variables and `set`
/// targets have been checked. An implementation may do arbitrary work here,
/// including rendering other templates with the same environment.
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Result<Option<Value>, RenderError>;
}

impl NameResolver for HashMap<String, Value> {
    fn resolve(&self, name: &str) -> Result<Option<Value>, RenderError> {
        Ok(self.get(name).cloned())
    }
}

impl NameResolver for BTreeMap<String, Value> {
    fn resolve(&self, name: &str) -> Result<Option<Value>, RenderError> {
        Ok(self.get(name).cloned())
    }
}

pub struct Evaluator<'a> {
    env: &'a Environment,
    resolver: &'a dyn NameResolver,
    // innermost scope last; holds loop variables and `set` targets
    scopes: Vec<HashMap<String, Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(env: &'a Environment, resolver: &'a dyn NameResolver) -> Self {
        Self {
            env,
            resolver,
            scopes: vec![HashMap::new()],
        }
    }

    fn get_var(&self, name: &str) -> Result<Value, RenderError> {
        for scope in self.scopes.iter().rev() {
            if let Some(val) = scope.get(name) {
                return Ok(val.clone());
            }
        }
        Ok(self
            .resolver
            .resolve(name)?
            .unwrap_or_else(|| Value::Undefined(name.to_string())))
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn set_local(&mut self, name: String, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        }
    }

    pub fn render(&mut self, template: &Template) -> Result<String, RenderError> {
        let mut output = String::new();
        for node in template {
            match node {
                Node::Text(s) => output.push_str(s),
                Node::Var(expr) => {
                    let val = self.eval_expr(expr)?;
                    output.push_str(&val.to_output()?);
                }
                Node::For {
                    targets,
                    iterable,
                    body,
                    else_body,
                } => {
                    let iter_val = self.eval_expr(iterable)?;
                    let items = match iter_val {
                        Value::Null => Vec::new(), // iterating none renders nothing
                        Value::Map(_) | Value::Object(_) if targets.len() == 2 => {
                            key_value_pairs(&iter_val)?
                        }
                        other => other.iter_items()?,
                    };
                    if items.is_empty() {
                        if let Some(body) = else_body {
                            output.push_str(&self.render(body)?);
                        }
                        continue;
                    }
                    let len = items.len();
                    for (i, item) in items.into_iter().enumerate() {
                        self.push_scope();
                        self.bind_targets(targets, item)?;

                        let mut loop_map = BTreeMap::new();
                        loop_map.insert("index".to_string(), Value::from(i + 1));
                        loop_map.insert("index0".to_string(), Value::from(i));
                        loop_map.insert("revindex".to_string(), Value::from(len - i));
                        loop_map.insert("revindex0".to_string(), Value::from(len - i - 1));
                        loop_map.insert("first".to_string(), Value::Bool(i == 0));
                        loop_map.insert("last".to_string(), Value::Bool(i == len - 1));
                        loop_map.insert("length".to_string(), Value::from(len));
                        self.set_local("loop".to_string(), Value::Map(loop_map));

                        let rendered = self.render(body);
                        self.pop_scope();
                        output.push_str(&rendered?);
                    }
                }
                Node::If { cases, else_body } => {
                    let mut matched = false;
                    for (cond, body) in cases {
                        let val = self.eval_expr(cond)?;
                        if val.is_truthy() {
                            output.push_str(&self.render(body)?);
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        if let Some(body) = else_body {
                            output.push_str(&self.render(body)?);
                        }
                    }
                }
                Node::Set { target, value } => {
                    let val = self.eval_expr(value)?;
                    self.set_local(target.clone(), val);
                }
            }
        }
        Ok(output)
    }

    fn bind_targets(&mut self, targets: &[String], item: Value) -> Result<(), RenderError> {
        if let [single] = targets {
            self.set_local(single.clone(), item);
            return Ok(());
        }
        let parts = match item {
            Value::Array(parts) if parts.len() == targets.len() => parts,
            other => {
                return Err(RenderError::invalid(format!(
                    "cannot unpack {} into {} loop variables",
                    other.kind(),
                    targets.len()
                )))
            }
        };
        for (name, part) in targets.iter().zip(parts) {
            self.set_local(name.clone(), part);
        }
        Ok(())
    }

    pub fn eval_expr(&self, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::StringLit(s) => Ok(Value::String(s.clone())),
            Expr::IntLit(i) => Ok(Value::Int(*i)),
            Expr::FloatLit(f) => Ok(Value::Float(*f)),
            Expr::BoolLit(b) => Ok(Value::Bool(*b)),
            Expr::NoneLit => Ok(Value::Null),
            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval_expr(item)?.defined())
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Dict(pairs) => {
                let mut map = BTreeMap::new();
                for (key, value) in pairs {
                    let key = match self.eval_expr(key)? {
                        Value::String(s) => s,
                        other => other.to_output()?,
                    };
                    map.insert(key, self.eval_expr(value)?.defined()?);
                }
                Ok(Value::Map(map))
            }
            Expr::Var(name) => self.get_var(name),
            Expr::Attribute(obj, attr) => {
                let val = self.eval_expr(obj)?.defined()?;
                lookup(&val, attr)
            }
            Expr::Index(obj, idx) => {
                let val = self.eval_expr(obj)?.defined()?;
                let idx_val = self.eval_expr(idx)?.defined()?;
                match (&val, idx_val) {
                    (Value::Map(_) | Value::Object(_), Value::String(s)) => lookup(&val, &s),
                    (Value::Array(a), Value::Int(i)) => Ok(index_of(a.len(), i)
                        .map(|i| a[i].clone())
                        .unwrap_or_else(|| Value::Undefined(format!("[{}]", i)))),
                    (Value::Array(a), Value::String(s)) => {
                        // Maybe integer parse?
                        if let Ok(i) = s.parse::<usize>() {
                            a.get(i)
                                .cloned()
                                .ok_or_else(|| RenderError::invalid(format!("index {} out of bounds", i)))
                        } else {
                            Err(RenderError::invalid(format!("index must be integer, got {}", s)))
                        }
                    }
                    (Value::String(s), Value::Int(i)) => {
                        let chars: Vec<char> = s.chars().collect();
                        Ok(index_of(chars.len(), i)
                            .map(|i| Value::String(chars[i].to_string()))
                            .unwrap_or_else(|| Value::Undefined(format!("[{}]", i))))
                    }
                    (val, idx) => Err(RenderError::invalid(format!(
                        "cannot index {} with {}",
                        val.kind(),
                        idx.kind()
                    ))),
                }
            }
            Expr::BinOp(lhs, BinOp::And, rhs) => {
                let l = self.eval_expr(lhs)?;
                if l.is_truthy() {
                    self.eval_expr(rhs)
                } else {
                    Ok(l)
                }
            }
            Expr::BinOp(lhs, BinOp::Or, rhs) => {
                let l = self.eval_expr(lhs)?;
                if l.is_truthy() {
                    Ok(l)
                } else {
                    self.eval_expr(rhs)
                }
            }
            Expr::BinOp(curr_lhs, op, curr_rhs) => {
                let l = self.eval_expr(curr_lhs)?.defined()?;
                let r = self.eval_expr(curr_rhs)?.defined()?;
                binary(*op, l, r)
            }
            Expr::UnaryOp(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!self.eval_expr(operand)?.is_truthy()))
            }
            Expr::UnaryOp(op, operand) => match (op, self.eval_expr(operand)?.defined()?) {
                (UnaryOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| RenderError::invalid("integer overflow")),
                (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (UnaryOp::Pos, v) if v.is_number() => Ok(v),
                (_, v) => Err(RenderError::invalid(format!(
                    "bad operand type for unary operator: {}",
                    v.kind()
                ))),
            },
            Expr::Filter(value, call) => {
                let filter = self
                    .env
                    .filter(&call.name)
                    .ok_or_else(|| RenderError::UnknownFilter(call.name.clone()))?;
                let value = self.eval_expr(value)?;
                let (args, kwargs) = self.eval_call(call)?;
                filter(value, &args, &kwargs)
            }
            Expr::Test(value, call, negated) => {
                let test = self
                    .env
                    .test(&call.name)
                    .ok_or_else(|| RenderError::UnknownTest(call.name.clone()))?;
                let value = self.eval_expr(value)?;
                let (args, _) = self.eval_call(call)?;
                Ok(Value::Bool(test(&value, &args)? != *negated))
            }
            Expr::Cond {
                then,
                cond,
                otherwise,
            } => {
                if self.eval_expr(cond)?.is_truthy() {
                    self.eval_expr(then)
                } else {
                    match otherwise {
                        Some(expr) => self.eval_expr(expr),
                        None => Ok(Value::Undefined("<conditional expression>".to_string())),
                    }
                }
            }
        }
    }

    fn eval_call(&self, call: &Call) -> Result<(Vec<Value>, Kwargs), RenderError> {
        let args = call
            .args
            .iter()
            .map(|arg| self.eval_expr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut kwargs = Kwargs::new();
        for (name, expr) in &call.kwargs {
            kwargs.insert(name.clone(), self.eval_expr(expr)?);
        }
        Ok((args, kwargs))
    }
}

/// Attribute or key access; a missing key is undefined rather than an error.
fn lookup(val: &Value, key: &str) -> Result<Value, RenderError> {
    match val {
        Value::Map(m) => Ok(m
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Undefined(key.to_string()))),
        Value::Object(obj) => obj.get(key),
        _ => Ok(Value::Undefined(key.to_string())),
    }
}

fn index_of(len: usize, i: i64) -> Option<usize> {
    let idx = if i < 0 { len as i64 + i } else { i };
    (0..len as i64).contains(&idx).then_some(idx as usize)
}

fn key_value_pairs(val: &Value) -> Result<Vec<Value>, RenderError> {
    let mut pairs = Vec::new();
    for key in val.iter_items()? {
        let k = key.to_output()?;
        let v = lookup(val, &k)?;
        pairs.push(Value::Array(vec![key, v]));
    }
    Ok(pairs)
}

fn unsupported(op: &str, l: &Value, r: &Value) -> RenderError {
    RenderError::invalid(format!(
        "unsupported operand types for {}: {} and {}",
        op,
        l.kind(),
        r.kind()
    ))
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, RenderError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(l.materialize()? == r.materialize()?)),
        BinOp::Ne => Ok(Value::Bool(l.materialize()? != r.materialize()?)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = l.compare(&r).ok_or_else(|| unsupported("comparison", &l, &r))?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinOp::In => contains(&r, &l).map(Value::Bool),
        BinOp::NotIn => contains(&r, &l).map(|found| Value::Bool(!found)),
        BinOp::Concat => Ok(Value::String(l.to_output()? + &r.to_output()?)),
        BinOp::Add => match (l, r) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| RenderError::invalid("integer overflow")),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (l, r) => float_op("+", &l, &r, |a, b| a + b),
        },
        BinOp::Sub => match (l, r) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(b)
                .map(Value::Int)
                .ok_or_else(|| RenderError::invalid("integer overflow")),
            (l, r) => float_op("-", &l, &r, |a, b| a - b),
        },
        BinOp::Mul => match (l, r) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(b)
                .map(Value::Int)
                .ok_or_else(|| RenderError::invalid("integer overflow")),
            (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
                Ok(Value::String(s.repeat(n.max(0) as usize)))
            }
            (l, r) => float_op("*", &l, &r, |a, b| a * b),
        },
        BinOp::Div => {
            if r.as_f64() == Some(0.0) {
                return Err(RenderError::invalid("division by zero"));
            }
            float_op("/", &l, &r, |a, b| a / b)
        }
        BinOp::FloorDiv => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(RenderError::invalid("division by zero")),
            (Value::Int(a), Value::Int(b)) => {
                let q = a
                    .checked_div(b)
                    .ok_or_else(|| RenderError::invalid("integer overflow"))?;
                Ok(Value::Int(if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) { q - 1 } else { q }))
            }
            (l, r) => {
                if r.as_f64() == Some(0.0) {
                    return Err(RenderError::invalid("division by zero"));
                }
                float_op("//", &l, &r, |a, b| (a / b).floor())
            }
        },
        BinOp::Mod => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(RenderError::invalid("modulo by zero")),
            (Value::Int(a), Value::Int(b)) => {
                // only i64::MIN % -1 wraps, and its remainder is 0
                let r = a.wrapping_rem(b);
                Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
            }
            (l, r) => {
                if r.as_f64() == Some(0.0) {
                    return Err(RenderError::invalid("modulo by zero"));
                }
                float_op("%", &l, &r, |a, b| {
                    let r = a % b;
                    if r != 0.0 && (r < 0.0) != (b < 0.0) {
                        r + b
                    } else {
                        r
                    }
                })
            }
        },
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators are evaluated lazily"),
    }
}

fn float_op(
    name: &str,
    l: &Value,
    r: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, RenderError> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(unsupported(name, l, r)),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, RenderError> {
    match (container, item) {
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Array(items), item) => Ok(items.contains(item)),
        (Value::Map(map), Value::String(key)) => Ok(map.contains_key(key)),
        (Value::Object(obj), Value::String(key)) => Ok(obj.keys().contains(key)),
        (container, item) => Err(RenderError::invalid(format!(
            "cannot test membership of {} in {}",
            item.kind(),
            container.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(src: &str, vars: &[(&str, Value)]) -> Result<String, RenderError> {
        let env = Environment::new();
        let ctx: HashMap<String, Value> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        env.render_str(src, &ctx)
    }

    #[test]
    fn arithmetic_follows_python() {
        assert_eq!(render("{{ 7 // 2 }} {{ -7 // 2 }} {{ 7 / 2 }} {{ -7 % 3 }}", &[]).unwrap(), "3 -4 3.5 2");
        assert_eq!(render("{{ 1 + 2.0 }}", &[]).unwrap(), "3.0");
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let vars = [("min", Value::Int(i64::MIN)), ("max", Value::Int(i64::MAX))];
        for src in ["{{ max + 1 }}", "{{ -min }}", "{{ min // -1 }}", "{{ min * -1 }}"] {
            match render(src, &vars) {
                Err(RenderError::Invalid(m)) => assert_eq!(m, "integer overflow", "{}", src),
                other => panic!("{}: {:?}", src, other),
            }
        }
        assert_eq!(render("{{ min % -1 }} {{ -max }}", &vars).unwrap(), "0 -9223372036854775807");
    }

    #[test]
    fn and_or_return_operands() {
        assert_eq!(render("{{ missing or 'fallback' }}", &[]).unwrap(), "fallback");
        assert_eq!(render("{{ 0 and 'x' }}", &[]).unwrap(), "0");
    }

    #[test]
    fn undefined_errors_on_output_and_comparison() {
        assert!(matches!(render("{{ nope }}", &[]), Err(RenderError::Undefined(n)) if n == "nope"));
        assert!(matches!(render("{{ nope == 1 }}", &[]), Err(RenderError::Undefined(_))));
        assert!(matches!(render("{{ nope.attr }}", &[]), Err(RenderError::Undefined(_))));
        assert_eq!(render("{% if nope %}y{% else %}n{% endif %}", &[]).unwrap(), "n");
    }

    #[test]
    fn missing_attribute_is_undefined() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let vars = [("m", Value::Map(map))];
        assert_eq!(render("{{ m.a }}", &vars).unwrap(), "1");
        assert!(matches!(render("{{ m.b }}", &vars), Err(RenderError::Undefined(n)) if n == "b"));
        assert_eq!(render("{{ m.b is defined }}", &vars).unwrap(), "False");
    }

    #[test]
    fn loop_variables_and_unpacking() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), Value::Int(1));
        map.insert("y".to_string(), Value::Int(2));
        let vars = [("m", Value::Map(map))];
        assert_eq!(
            render("{% for k, v in m %}{{ loop.index }}{{ k }}={{ v }};{% endfor %}", &vars).unwrap(),
            "1x=1;2y=2;"
        );
        assert_eq!(render("{% for x in [] %}a{% else %}empty{% endfor %}", &[]).unwrap(), "empty");
    }

    #[test]
    fn set_is_scoped_to_the_loop() {
        assert_eq!(
            render("{% set x = 1 %}{% for i in [1, 2] %}{% set x = i %}{% endfor %}{{ x }}", &[]).unwrap(),
            "1"
        );
    }

    #[test]
    fn membership_and_conditional_expression() {
        assert_eq!(render("{{ 'b' in 'abc' }} {{ 3 not in [1, 2] }}", &[]).unwrap(), "True True");
        assert_eq!(render("{{ 'y' if 2 > 1 else 'n' }}", &[]).unwrap(), "y");
    }

    #[test]
    fn negative_indexing() {
        let vars = [("xs", Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))];
        assert_eq!(render("{{ xs[-1] }}{{ xs.0 }}", &vars).unwrap(), "31");
    }
}
