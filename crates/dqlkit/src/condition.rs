//! AND/OR condition builder for WHERE, HAVING and join conditions.
//!
//! Conditions are accumulated as a flat list of fragments under the current
//! combination mode. Switching the mode folds what was accumulated so far into
//! one group, so
//!
//! ```ignore
//! cond.add_and("a", args![])?.add_and("b", args![])?.add_or("c", args![])?;
//! ```
//!
//! renders `(a AND b) OR c`. The fragments form an [`Expr`] tree, parentheses
//! come from the tree shape.

use crate::alias::prefix_aliases;
use crate::error::{DbError, DbResult};
use crate::params::{
    Arg, IntoArg, Parameters, PlaceholderKind, Segment, scan_placeholders, separate_parameters,
    skip_quoted,
};
use crate::value::Value;
use sha2::{Digest, Sha256};

/// How sibling fragments are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    And,
    Or,
}

impl Mode {
    pub fn operator(self) -> &'static str {
        match self {
            Mode::And => " AND ",
            Mode::Or => " OR ",
        }
    }
}

/// Condition expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Free-text condition. `text` is subject to alias prefixing and may
    /// contain bare `?` placeholders bound to `values` in order; `opaque` is
    /// appended verbatim (nested query DQL).
    Leaf {
        text: String,
        values: Vec<Value>,
        opaque: Option<String>,
    },
    /// Fragments combined with one operator.
    Group { mode: Mode, items: Vec<Expr> },
}

impl Expr {
    pub fn leaf(text: impl Into<String>) -> Self {
        Expr::Leaf {
            text: text.into(),
            values: Vec::new(),
            opaque: None,
        }
    }

    fn render(&self, ctx: &RenderCtx<'_>, joined: bool, out: &mut String, values: &mut Vec<Value>) {
        match self {
            Expr::Leaf {
                text,
                values: leaf_values,
                opaque,
            } => {
                let mut sql = match ctx.alias {
                    Some(alias) => prefix_aliases(text, alias, ctx.known_aliases),
                    None => text.clone(),
                };
                if let Some(opaque) = opaque {
                    sql.push_str(opaque);
                }
                if joined && has_top_level_logic(&sql) {
                    out.push('(');
                    out.push_str(&sql);
                    out.push(')');
                } else {
                    out.push_str(&sql);
                }
                values.extend(leaf_values.iter().cloned());
            }
            Expr::Group { mode, items } => match items.as_slice() {
                [only] => only.render(ctx, joined, out, values),
                _ => {
                    if joined {
                        out.push('(');
                    }
                    render_list(items, *mode, ctx, out, values);
                    if joined {
                        out.push(')');
                    }
                }
            },
        }
    }
}

struct RenderCtx<'a> {
    alias: Option<&'a str>,
    known_aliases: &'a [&'a str],
}

fn render_list(
    items: &[Expr],
    mode: Mode,
    ctx: &RenderCtx<'_>,
    out: &mut String,
    values: &mut Vec<Value>,
) {
    let joined = items.len() > 1;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(mode.operator());
        }
        item.render(ctx, joined, out, values);
    }
}

/// Whether `sql` has an `AND`/`OR` keyword outside parentheses and quotes.
fn has_top_level_logic(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = skip_quoted(bytes, i);
                continue;
            }
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            c if depth == 0 && c.is_ascii_alphabetic() => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &sql[start..i];
                let before_ok = start == 0 || !matches!(bytes[start - 1], b'.' | b':' | b'?');
                if before_ok && (word.eq_ignore_ascii_case("AND") || word.eq_ignore_ascii_case("OR")) {
                    return true;
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// Accumulates condition fragments under AND/OR with fold-on-switch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionBuilder {
    mode: Option<Mode>,
    fragments: Vec<Expr>,
    params: Parameters,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Mode of the last call, if any.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Named parameters collected from the conditions so far.
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// AND a free-text condition with trailing values.
    ///
    /// - text with placeholders: values bind to them in order;
    /// - bare column + `NULL`: `col IS NULL`;
    /// - bare column + list: `col IN (?)` bound to the whole list;
    /// - bare column + nested query: `col IN (<dql>)`;
    /// - bare column + scalar: `col = ?`;
    /// - no values: the text is a complete boolean expression.
    pub fn add_and(&mut self, condition: &str, args: Vec<Arg>) -> DbResult<&mut Self> {
        self.add(Mode::And, condition, args)
    }

    /// OR a free-text condition with trailing values. See [`Self::add_and`].
    pub fn add_or(&mut self, condition: &str, args: Vec<Arg>) -> DbResult<&mut Self> {
        self.add(Mode::Or, condition, args)
    }

    /// AND every `column => value` pair.
    pub fn add_and_all<K, V, I>(&mut self, pairs: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoArg,
    {
        self.add_all(Mode::And, pairs)
    }

    /// OR every `column => value` pair.
    pub fn add_or_all<K, V, I>(&mut self, pairs: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoArg,
    {
        self.add_all(Mode::Or, pairs)
    }

    /// Add another builder's conditions as one nested group.
    pub fn add_group(&mut self, mode: Mode, other: ConditionBuilder) -> &mut Self {
        let ConditionBuilder {
            mode: other_mode,
            fragments,
            params,
        } = other;
        if fragments.is_empty() {
            return self;
        }
        self.params.extend(&params);
        let group = Expr::Group {
            mode: other_mode.unwrap_or(Mode::And),
            items: fragments,
        };
        self.push(mode, vec![group]);
        self
    }

    /// Add a raw argument list: fragments followed by their values.
    pub fn add_args(&mut self, mode: Mode, args: Vec<Arg>) -> DbResult<&mut Self> {
        let leaves = self.leaves_from(args)?;
        self.push(mode, leaves);
        Ok(self)
    }

    fn add(&mut self, mode: Mode, condition: &str, args: Vec<Arg>) -> DbResult<&mut Self> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(Arg::fragment(condition));
        all.extend(args);
        self.add_args(mode, all)
    }

    fn add_all<K, V, I>(&mut self, mode: Mode, pairs: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoArg,
    {
        let mut leaves = Vec::new();
        for (column, value) in pairs {
            let args = vec![Arg::Fragment(column.into()), value.into_arg()];
            leaves.extend(self.leaves_from(args)?);
        }
        if !leaves.is_empty() {
            self.push(mode, leaves);
        }
        Ok(self)
    }

    fn leaves_from(&mut self, args: Vec<Arg>) -> DbResult<Vec<Expr>> {
        let segments = separate_parameters(args, &mut self.params)?;

        let mut pending: Vec<(String, Vec<Value>, Vec<Segment>)> = Vec::new();
        for segment in segments {
            match segment {
                Segment::Fragment { text, values } => pending.push((text, values, Vec::new())),
                operand => match pending.last_mut() {
                    Some((_, _, operands)) => operands.push(operand),
                    None => {
                        return Err(DbError::invalid_argument(
                            "condition value given without a condition",
                        ));
                    }
                },
            }
        }

        pending
            .into_iter()
            .map(|(text, values, operands)| normalize(text, values, operands))
            .collect()
    }

    fn push(&mut self, mode: Mode, leaves: Vec<Expr>) {
        if let Some(prev) = self.mode {
            if prev != mode && self.fragments.len() > 1 {
                let items = std::mem::take(&mut self.fragments);
                self.fragments.push(Expr::Group { mode: prev, items });
            }
        }
        self.fragments.extend(leaves);
        self.mode = Some(mode);
    }

    /// Render to text with bare `?` placeholders and their values in order.
    pub fn render(&self, alias: Option<&str>, known_aliases: &[&str]) -> (String, Vec<Value>) {
        let ctx = RenderCtx {
            alias,
            known_aliases,
        };
        let mut out = String::new();
        let mut values = Vec::new();
        render_list(
            &self.fragments,
            self.mode.unwrap_or(Mode::And),
            &ctx,
            &mut out,
            &mut values,
        );
        (out, values)
    }

    /// Serialize to a DQL fragment, replacing every bare `?` with a unique
    /// named placeholder bound into `sink`, together with the named
    /// parameters collected by this builder.
    ///
    /// Names derive from a hash of the rendered text plus a sequence number,
    /// skipping names already present in `sink`, so several builders can feed
    /// one statement. Returns `None` when no condition was added.
    pub fn build(
        &self,
        alias: Option<&str>,
        known_aliases: &[&str],
        sink: &mut Parameters,
    ) -> DbResult<Option<String>> {
        if self.fragments.is_empty() {
            return Ok(None);
        }

        let (text, values) = self.render(alias, known_aliases);
        sink.extend(&self.params);

        let bare: Vec<_> = scan_placeholders(&text)
            .into_iter()
            .filter(|p| p.kind == PlaceholderKind::Bare)
            .collect();
        if bare.len() != values.len() {
            return Err(DbError::invalid_argument(format!(
                "condition \"{text}\" has {} `?` placeholders but {} values",
                bare.len(),
                values.len()
            )));
        }
        if bare.is_empty() {
            return Ok(Some(text));
        }

        let hash = short_hash(&text);
        let mut seq = sink.len();
        let mut sql = String::with_capacity(text.len() + bare.len() * 16);
        let mut last = 0;
        for (ph, value) in bare.into_iter().zip(values) {
            let name = loop {
                seq += 1;
                let candidate = format!("param_{hash}_{seq}");
                if !sink.contains(&candidate) {
                    break candidate;
                }
            };
            sql.push_str(&text[last..ph.start]);
            sql.push(':');
            sql.push_str(&name);
            last = ph.end;
            sink.set(name, value);
        }
        sql.push_str(&text[last..]);

        Ok(Some(sql))
    }
}

fn normalize(text: String, values: Vec<Value>, mut operands: Vec<Segment>) -> DbResult<Expr> {
    let has_placeholders = !scan_placeholders(&text).is_empty();

    if has_placeholders || operands.is_empty() {
        if !operands.is_empty() {
            return Err(DbError::invalid_argument(format!(
                "too many values for condition \"{text}\""
            )));
        }
        return Ok(Expr::Leaf {
            text,
            values,
            opaque: None,
        });
    }

    if operands.len() > 1 {
        return Err(DbError::invalid_argument(format!(
            "condition \"{text}\" takes one value, {} given",
            operands.len()
        )));
    }

    let column = text.trim().to_string();
    match operands.remove(0) {
        Segment::Subquery(dql) => Ok(Expr::Leaf {
            text: column,
            values: Vec::new(),
            opaque: Some(format!(" IN ({dql})")),
        }),
        Segment::Value(Value::Null) => Ok(Expr::leaf(format!("{column} IS NULL"))),
        Segment::Value(Value::List(items)) if items.is_empty() => Err(DbError::invalid_argument(
            format!("empty IN list for \"{column}\""),
        )),
        Segment::Value(list @ Value::List(_)) => Ok(Expr::Leaf {
            text: format!("{column} IN (?)"),
            values: vec![list],
            opaque: None,
        }),
        Segment::Value(value) => Ok(Expr::Leaf {
            text: format!("{column} = ?"),
            values: vec![value],
            opaque: None,
        }),
        Segment::Fragment { .. } => Err(DbError::invalid_argument(format!(
            "unexpected fragment after \"{column}\""
        ))),
    }
}

fn short_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests;
