//! Parameter storage, inline-parameter separation and placeholder expansion.
//!
//! Conditions are written with placeholders embedded in free text:
//!
//! - `:name` / `?name` / `?1` are *named* placeholders, bound through [`Parameters`];
//! - a bare `?` is *positional*, its value travels with the fragment it appears in.
//!
//! [`separate_parameters`] walks a mixed argument list and hands every value to
//! the placeholder it belongs to. [`Parameters::expand`] finally rewrites named
//! placeholders into the platform's positional syntax right before execution.

use crate::builder::DqlBuilder;
use crate::error::{DbError, DbResult};
use crate::platform::Platform;
use crate::value::{ParamType, Value};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// A single named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Name without the leading `:` (numbered placeholders use their number).
    pub name: String,
    pub value: Value,
    pub param_type: Option<ParamType>,
}

/// Named parameters of a statement, in binding order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    items: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name`, inferring its type. Rebinding replaces the value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        let param_type = value.inferred_type();
        self.set_typed(name, value, param_type);
    }

    /// Bind `value` under `name` with an explicit type.
    pub fn set_typed(
        &mut self,
        name: impl Into<String>,
        value: Value,
        param_type: Option<ParamType>,
    ) {
        let name = name.into();
        let name = name.trim_start_matches(':').to_string();
        let param = Parameter {
            name,
            value,
            param_type,
        };
        match self.items.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.items.push(param),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        let name = name.trim_start_matches(':');
        self.items.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.iter()
    }

    /// Merge `other` into this collection (later bindings win).
    pub fn extend(&mut self, other: &Parameters) {
        for p in &other.items {
            self.set_typed(p.name.clone(), p.value.clone(), p.param_type);
        }
    }

    /// Rewrite named placeholders in `text` into `platform` positional
    /// placeholders and return the values in binding order.
    ///
    /// List values expand to one placeholder per element; an empty list
    /// renders as `NULL`. Placeholders inside quoted literals are untouched.
    pub fn expand(&self, text: &str, platform: Platform) -> DbResult<(String, Vec<Value>)> {
        let mut sql = String::with_capacity(text.len());
        let mut values = Vec::new();
        let mut last = 0;

        for ph in scan_placeholders(text) {
            sql.push_str(&text[last..ph.start]);
            last = ph.end;

            let name = match ph.kind {
                PlaceholderKind::Named(name) => name,
                PlaceholderKind::Bare => {
                    return Err(DbError::invalid_argument(format!(
                        "unnamed `?` placeholder at offset {} cannot be bound by name",
                        ph.start
                    )));
                }
            };
            let param = self.get(&name).ok_or_else(|| {
                DbError::invalid_argument(format!("parameter :{name} is not bound"))
            })?;

            match &param.value {
                Value::List(items) if items.is_empty() => sql.push_str("NULL"),
                Value::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            sql.push_str(", ");
                        }
                        values.push(item.clone());
                        sql.push_str(&platform.placeholder(values.len()));
                    }
                }
                value => {
                    values.push(value.clone());
                    sql.push_str(&platform.placeholder(values.len()));
                }
            }
        }
        sql.push_str(&text[last..]);
        Ok((sql, values))
    }
}

// ==================== Arguments ====================

/// One element of a loosely typed condition argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Condition text, possibly containing placeholders.
    Fragment(String),
    /// A candidate bound value.
    Value(Value),
    /// DQL of a nested query, used as an `IN (...)` operand.
    Subquery(String),
    /// A nested query that failed to build; reported when separated.
    Invalid(String),
}

impl Arg {
    pub fn fragment(text: impl Into<String>) -> Self {
        Arg::Fragment(text.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Arg::Value(value.into())
    }

    /// Nested query operand. Its parameters stay the caller's responsibility.
    pub fn subquery(query: &DqlBuilder) -> Self {
        match query.get_dql() {
            Ok(dql) => Arg::Subquery(dql.to_string()),
            Err(e) => Arg::Invalid(e.to_string()),
        }
    }
}

/// Conversion into a condition argument, used by [`args!`](crate::args).
pub trait IntoArg {
    fn into_arg(self) -> Arg;
}

impl IntoArg for Arg {
    fn into_arg(self) -> Arg {
        self
    }
}

impl IntoArg for &DqlBuilder {
    fn into_arg(self) -> Arg {
        Arg::subquery(self)
    }
}

macro_rules! impl_into_arg_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoArg for $t {
                fn into_arg(self) -> Arg {
                    Arg::Value(Value::from(self))
                }
            }
        )*
    };
}

impl_into_arg_value!(
    Value,
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    &str,
    String,
    NaiveDateTime,
    DateTime<Utc>,
    Uuid,
    serde_json::Value,
);

impl<T: Into<Value>> IntoArg for Vec<T> {
    fn into_arg(self) -> Arg {
        Arg::Value(Value::from(self))
    }
}

impl<T: Into<Value>> IntoArg for Option<T> {
    fn into_arg(self) -> Arg {
        Arg::Value(Value::from(self))
    }
}

/// Build a `Vec<Arg>` of condition values.
///
/// ```ignore
/// builder.where_("e.name = ? AND e.age > :age", args!["alice", 18]);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::params::Arg>::new() };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::params::IntoArg::into_arg($value)),+]
    };
}

/// Output element of [`separate_parameters`].
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Condition text with the values of its bare `?` placeholders, in order.
    Fragment { text: String, values: Vec<Value> },
    /// A value no placeholder asked for.
    Value(Value),
    Subquery(String),
}

#[derive(Debug)]
enum Pending {
    Named(String),
    Positional(usize),
}

/// Hand every value in `args` to the placeholder that asked for it.
///
/// Each fragment registers its placeholders in order; following values are
/// consumed first-come first-served. A named placeholder consumes one value
/// only, however often it repeats. Consumed named values are bound into
/// `params` with an inferred type, bare `?` values are attached to their
/// fragment. Values nobody asked for stay in the output.
///
/// A bare `?` left without a value is an error. Named placeholders may stay
/// unbound, to be supplied later through [`Parameters::set`].
pub fn separate_parameters(args: Vec<Arg>, params: &mut Parameters) -> DbResult<Vec<Segment>> {
    let mut out: Vec<Segment> = Vec::with_capacity(args.len());
    let mut pending: VecDeque<Pending> = VecDeque::new();
    let mut seen: HashSet<String> = HashSet::new();

    for arg in args {
        match arg {
            Arg::Fragment(text) => {
                let idx = out.len();
                for ph in scan_placeholders(&text) {
                    match ph.kind {
                        PlaceholderKind::Named(name) => {
                            if seen.insert(name.clone()) {
                                pending.push_back(Pending::Named(name));
                            }
                        }
                        PlaceholderKind::Bare => pending.push_back(Pending::Positional(idx)),
                    }
                }
                out.push(Segment::Fragment {
                    text,
                    values: Vec::new(),
                });
            }
            Arg::Value(value) => match pending.pop_front() {
                Some(Pending::Named(name)) => params.set(name, value),
                Some(Pending::Positional(idx)) => {
                    if let Some(Segment::Fragment { values, .. }) = out.get_mut(idx) {
                        values.push(value);
                    }
                }
                None => out.push(Segment::Value(value)),
            },
            Arg::Subquery(dql) => out.push(Segment::Subquery(dql)),
            Arg::Invalid(message) => {
                return Err(DbError::invalid_argument(format!("invalid subquery: {message}")));
            }
        }
    }

    if let Some(Pending::Positional(idx)) = pending
        .iter()
        .find(|p| matches!(p, Pending::Positional(_)))
    {
        let text = match &out[*idx] {
            Segment::Fragment { text, .. } => text.as_str(),
            _ => "",
        };
        return Err(DbError::invalid_argument(format!(
            "not enough values for the `?` placeholders in \"{text}\""
        )));
    }

    Ok(out)
}

// ==================== Placeholder scanning ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaceholderKind {
    Named(String),
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placeholder {
    pub start: usize,
    pub end: usize,
    pub kind: PlaceholderKind,
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Index just past the quoted literal opening at `start`. A doubled quote
/// escapes itself; an unterminated literal runs to the end.
pub(crate) fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let q = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == q {
            if bytes.get(i + 1) == Some(&q) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Find placeholders outside quoted literals.
///
/// `:name` must start with a letter or underscore, `?` may be followed by any
/// identifier characters. The match always extends over every following
/// identifier character. `::` (Postgres casts) is not a placeholder.
pub(crate) fn scan_placeholders(text: &str) -> Vec<Placeholder> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i),
            b':' => {
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }
                let starts_name = bytes
                    .get(i + 1)
                    .is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_');
                let after_ident = i > 0 && (is_ident_char(bytes[i - 1]) || bytes[i - 1] == b':');
                if !starts_name || after_ident {
                    i += 1;
                    continue;
                }
                let start = i;
                i += 1;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                found.push(Placeholder {
                    start,
                    end: i,
                    kind: PlaceholderKind::Named(text[start + 1..i].to_string()),
                });
            }
            b'?' => {
                let start = i;
                i += 1;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                let kind = if i == start + 1 {
                    PlaceholderKind::Bare
                } else {
                    PlaceholderKind::Named(text[start + 1..i].to_string())
                };
                found.push(Placeholder {
                    start,
                    end: i,
                    kind,
                });
            }
            _ => i += 1,
        }
    }

    found
}
