//! Turning rendered strings back into typed values.
//!
//! A rendered variable is first read as a literal (numbers, quoted strings,
//! lists, tuples, dicts, `True`/`False`/`None`), then as a truth token, and
//! otherwise stays a string.

use crate::value::Value;
use std::collections::BTreeMap;

/// Converts the output of rendering `original` into a value.
///
/// If rendering changed nothing the original string is returned untouched, so
/// a string that only looked like a template is never reinterpreted.
pub fn coerce(original: &str, rendered: String) -> Value {
    if rendered == original {
        return Value::String(rendered);
    }
    let trimmed = rendered.trim();
    if let Some(value) = parse_literal(trimmed) {
        return value;
    }
    match parse_bool(trimmed) {
        Some(b) => Value::Bool(b),
        None => Value::String(rendered),
    }
}

/// Truth tokens, case-insensitive: `y yes t true on 1` and `n no f false off 0`.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parses a complete literal; trailing garbage makes the whole parse fail.
pub fn parse_literal(s: &str) -> Option<Value> {
    let mut parser = LiteralParser {
        chars: s.chars().collect(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    (parser.pos == parser.chars.len()).then_some(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '\'' | '"' => self.string().map(Value::String),
            '[' => {
                self.bump();
                self.sequence(']').map(Value::Array)
            }
            '(' => {
                self.bump();
                self.tuple()
            }
            '{' => {
                self.bump();
                self.dict()
            }
            '+' | '-' => {
                let negative = self.bump()? == '-';
                match self.value()? {
                    Value::Int(i) if negative => i.checked_neg().map(Value::Int),
                    Value::Float(f) if negative => Some(Value::Float(-f)),
                    n @ (Value::Int(_) | Value::Float(_)) => Some(n),
                    _ => None,
                }
            }
            c if c.is_ascii_digit() || c == '.' => self.number(),
            c if c.is_alphabetic() || c == '_' => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                    self.pos += 1;
                }
                match self.chars[start..self.pos].iter().collect::<String>().as_str() {
                    "True" => Some(Value::Bool(true)),
                    "False" => Some(Value::Bool(false)),
                    "None" => Some(Value::Null),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Comma-separated values up to `close`; a trailing comma is allowed.
    fn sequence(&mut self, close: char) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Some(items);
            }
            items.push(self.value()?);
            if !self.eat(',') {
                return self.eat(close).then_some(items);
            }
        }
    }

    fn tuple(&mut self) -> Option<Value> {
        if self.eat(')') {
            return Some(Value::Array(Vec::new()));
        }
        let first = self.value()?;
        if self.eat(')') {
            // parenthesized expression, not a tuple
            return Some(first);
        }
        if !self.eat(',') {
            return None;
        }
        let mut items = vec![first];
        items.extend(self.sequence(')')?);
        Some(Value::Array(items))
    }

    fn dict(&mut self) -> Option<Value> {
        let mut map = BTreeMap::new();
        loop {
            if self.eat('}') {
                return Some(Value::Map(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Array(_) | Value::Map(_) => return None,
                other => other.to_string(),
            };
            if !self.eat(':') {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            if !self.eat(',') {
                return self.eat('}').then_some(Value::Map(map));
            }
        }
    }

    fn digits(&mut self, radix: u32) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_digit(radix) {
                out.push(c);
            } else if c == '_' && !out.is_empty() && self.chars.get(self.pos + 1).is_some_and(|d| d.is_digit(radix)) {
                // `1_000`
            } else {
                break;
            }
            self.pos += 1;
        }
        out
    }

    fn number(&mut self) -> Option<Value> {
        if self.peek() == Some('0') {
            let radix = match self.chars.get(self.pos + 1).map(char::to_ascii_lowercase) {
                Some('x') => 16,
                Some('o') => 8,
                Some('b') => 2,
                _ => 10,
            };
            if radix != 10 {
                self.pos += 2;
                let digits = self.digits(radix);
                return i64::from_str_radix(&digits, radix).ok().map(Value::Int);
            }
        }

        let int_part = self.digits(10);
        let mut is_float = false;
        let mut text = int_part.clone();
        if self.peek() == Some('.') {
            self.pos += 1;
            is_float = true;
            text.push('.');
            text.push_str(&self.digits(10));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let save = self.pos;
            self.pos += 1;
            let mut exp = String::from("e");
            if let Some(sign @ ('+' | '-')) = self.peek() {
                exp.push(sign);
                self.pos += 1;
            }
            let digits = self.digits(10);
            if digits.is_empty() {
                self.pos = save;
                return None;
            }
            exp.push_str(&digits);
            text.push_str(&exp);
            is_float = true;
        }
        if text == "." || text.is_empty() {
            return None;
        }
        if is_float {
            return text.parse::<f64>().ok().map(Value::Float);
        }
        // `007` is not a valid literal, `000` is
        if int_part.len() > 1 && int_part.starts_with('0') && int_part.chars().any(|c| c != '0') {
            return None;
        }
        int_part.parse::<i64>().ok().map(Value::Int)
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\n' => {}
                    c @ ('\\' | '\'' | '"') => out.push(c),
                    c => {
                        out.push('\\');
                        out.push(c);
                    }
                },
                '\n' => return None,
                c => out.push(c),
            }
        }
    }
}
