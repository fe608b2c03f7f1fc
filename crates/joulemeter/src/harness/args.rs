//! Typed coercion of textual arguments.
//!
//! Each argument arrives as a string. Coercion tries, in order:
//!
//! 1. a name bound in the context (`df_0`)
//! 2. `True`/`False`/`None` (lower-case and `null` accepted too)
//! 3. an integer, then a float
//! 4. a single- or double-quoted string
//! 5. a bracketed list (or parenthesised tuple) whose items all coerce
//!
//! Anything else, including a list containing an unknown bare word, is kept
//! as the raw string. Nothing is ever executed.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::context::Bindings;
use crate::data::Dataset;

use super::operation::OperationError;

/// A coerced argument value.
#[derive(Debug, Clone)]
pub enum Value {
    /// `None`.
    None,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// String (quoted literal or raw fallback).
    Str(String),
    /// List of values.
    List(Vec<Value>),
    /// A dataset from the bindings.
    Dataset(Arc<Dataset>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dataset(a), Value::Dataset(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dataset(_) => "dataset",
        }
    }

    /// String content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric content, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// List content.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Dataset content.
    pub fn as_dataset(&self) -> Option<&Arc<Dataset>> {
        match self {
            Value::Dataset(ds) => Some(ds),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "{s:?}")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
            Value::Dataset(ds) => write!(f, "<dataset {}x{}>", ds.n_rows(), ds.n_cols()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::None => s.serialize_none(),
            Value::Bool(b) => s.serialize_bool(*b),
            Value::Int(i) => s.serialize_i64(*i),
            Value::Float(x) => s.serialize_f64(*x),
            Value::Str(v) => s.serialize_str(v),
            Value::List(items) => items.serialize(s),
            Value::Dataset(_) => s.collect_str(self),
        }
    }
}

/// Coerced arguments of one invocation, in the order given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<(String, Value)>,
}

impl Arguments {
    /// Empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append (or replace) `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    /// Value of `name`, if supplied.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Value of `name`, or an error naming the missing argument.
    pub fn require(&self, name: &str) -> Result<&Value, OperationError> {
        self.get(name).ok_or_else(|| OperationError::missing_argument(name))
    }

    /// Dataset argument `name`.
    pub fn dataset(&self, name: &str) -> Result<&Arc<Dataset>, OperationError> {
        let value = self.require(name)?;
        value
            .as_dataset()
            .ok_or_else(|| OperationError::wrong_type(name, "dataset", value))
    }

    /// String argument `name`.
    pub fn str(&self, name: &str) -> Result<&str, OperationError> {
        let value = self.require(name)?;
        value
            .as_str()
            .ok_or_else(|| OperationError::wrong_type(name, "str", value))
    }

    /// Numeric argument `name`.
    pub fn f64(&self, name: &str) -> Result<f64, OperationError> {
        let value = self.require(name)?;
        value
            .as_f64()
            .ok_or_else(|| OperationError::wrong_type(name, "number", value))
    }

    /// Integer argument `name`.
    pub fn i64(&self, name: &str) -> Result<i64, OperationError> {
        let value = self.require(name)?;
        value
            .as_i64()
            .ok_or_else(|| OperationError::wrong_type(name, "int", value))
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Coerce one raw argument.
pub fn coerce(raw: &str, bindings: &Bindings) -> Value {
    parse_literal(raw, bindings).unwrap_or_else(|| Value::Str(raw.to_string()))
}

/// Coerce every `(name, raw)` pair.
pub fn coerce_all<'a, I>(raw: I, bindings: &Bindings) -> Arguments
where
    I: IntoIterator<Item = &'a (String, String)>,
{
    let mut args = Arguments::new();
    for (name, value) in raw {
        args.insert(name.clone(), coerce(value, bindings));
    }
    args
}

fn parse_literal(raw: &str, bindings: &Bindings) -> Option<Value> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(bound) = bindings.get(s) {
        return Some(bound.clone());
    }

    match s {
        "True" | "true" => return Some(Value::Bool(true)),
        "False" | "false" => return Some(Value::Bool(false)),
        "None" | "null" => return Some(Value::None),
        _ => {}
    }

    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Int(i));
    }
    let lower = s.to_ascii_lowercase();
    let numeric_start = s.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if numeric_start && !lower.contains("inf") && !lower.contains("nan") {
        if let Ok(x) = s.parse::<f64>() {
            return Some(Value::Float(x));
        }
    }

    if let Some(inner) = quoted(s) {
        return unescape(inner).map(Value::Str);
    }

    let list_body = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .or_else(|| s.strip_prefix('(').and_then(|rest| rest.strip_suffix(')')));
    if let Some(body) = list_body {
        let items = split_top_level(body)?
            .into_iter()
            .map(|item| parse_literal(item, bindings))
            .collect::<Option<Vec<_>>>()?;
        return Some(Value::List(items));
    }

    None
}

fn quoted(s: &str) -> Option<&str> {
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    if s.len() < 2 || !s.ends_with(quote) {
        return None;
    }
    Some(&s[1..s.len() - 1])
}

fn unescape(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }
    Some(out)
}

/// Split on commas outside quotes and brackets. `None` if unbalanced.
fn split_top_level(body: &str) -> Option<Vec<&str>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                items.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return None;
    }

    // A trailing comma leaves an empty last segment.
    let last = &body[start..];
    if !last.trim().is_empty() {
        items.push(last);
    }

    if items.iter().any(|item| item.trim().is_empty()) {
        return None;
    }
    Some(items)
}
