//! DQL clause assembler.
//!
//! [`DqlBuilder`] keeps every clause as structured data and composes
//! SELECT, UPDATE and DELETE statements on demand. Bare columns in
//! conditions, grouping and ordering are prefixed with the root alias (the
//! first FROM alias) when the statement is rendered, so `from()` may be
//! called after `where_()`.
//!
//! ```ignore
//! use dqlkit::{args, DqlBuilder};
//!
//! let qb = DqlBuilder::new()
//!     .from("App\\User", "u")
//!     .left_join("u.team", "t")
//!     .with("t.active = ?", args![true])
//!     .where_("name", args!["alice"])
//!     .order("created DESC");
//! assert_eq!(
//!     qb.get_dql()?,
//!     "SELECT u FROM App\\User u LEFT JOIN u.team t WITH t.active = :param_..._1 \
//!      WHERE u.name = :param_..._2 ORDER BY u.created DESC"
//! );
//! ```

use crate::alias::prefix_aliases;
use crate::condition::{ConditionBuilder, Mode};
use crate::error::{DbError, DbResult};
use crate::params::{Arg, IntoArg, Parameters};
use crate::value::Value;
use regex::Regex;
use std::cell::OnceCell;
use std::fmt;
use std::sync::OnceLock;

/// Sort direction for [`DqlBuilder::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Keyword introducing a join condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinCondition {
    /// Replaces the mapped join condition.
    On,
    /// Adds to the mapped join condition.
    With,
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    source: String,
    alias: String,
    condition_type: JoinCondition,
    condition: ConditionBuilder,
}

/// A rendered statement with everything needed to execute it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub dql: String,
    pub parameters: Parameters,
    pub first_result: Option<u64>,
    pub max_results: Option<u64>,
}

/// Fluent DQL builder.
///
/// Mutating calls consume and return the builder. Errors (bad condition
/// arguments, `on()` without a join) are recorded and reported by the build
/// methods. The SELECT rendering is memoized until the next mutation.
#[derive(Debug, Clone, Default)]
pub struct DqlBuilder {
    select: Vec<String>,
    from: Vec<(String, String)>,
    joins: Vec<Join>,
    set: Vec<(String, Value)>,
    where_cond: ConditionBuilder,
    group_by: Option<String>,
    having: ConditionBuilder,
    order: Vec<String>,
    parameters: Parameters,
    first_result: Option<u64>,
    max_results: Option<u64>,
    build_error: Option<String>,
    cache: OnceCell<BuiltQuery>,
}

impl DqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== SELECT / FROM ====================

    /// Replace the SELECT list. Defaults to the root alias.
    pub fn select(mut self, select: &str) -> Self {
        self.touch();
        self.select = vec![select.to_string()];
        self
    }

    /// Append to the SELECT list.
    pub fn add_select(mut self, select: &str) -> Self {
        self.touch();
        self.select.push(select.to_string());
        self
    }

    /// Add an entity to FROM. The first alias becomes the root alias.
    pub fn from(mut self, entity: &str, alias: &str) -> Self {
        self.touch();
        if self.from.iter().any(|(_, a)| a == alias) {
            self.fail(DbError::invalid_argument(format!(
                "alias '{alias}' is already used in FROM"
            )));
        } else {
            self.from.push((entity.to_string(), alias.to_string()));
        }
        self
    }

    /// The root alias, if FROM is set.
    pub fn root_alias(&self) -> Option<&str> {
        self.from.first().map(|(_, alias)| alias.as_str())
    }

    // ==================== JOIN ====================

    /// Add an inner join. Follow with [`on`](Self::on) or [`with`](Self::with)
    /// to give it a condition.
    pub fn join(self, source: &str, alias: &str) -> Self {
        self.add_join(JoinKind::Inner, source, alias)
    }

    /// Add a left join.
    pub fn left_join(self, source: &str, alias: &str) -> Self {
        self.add_join(JoinKind::Left, source, alias)
    }

    /// AND an `ON` condition to the last join.
    pub fn on(self, condition: &str, args: Vec<Arg>) -> Self {
        self.join_condition(JoinCondition::On, Mode::And, condition, args)
    }

    /// OR an `ON` condition to the last join.
    pub fn or_on(self, condition: &str, args: Vec<Arg>) -> Self {
        self.join_condition(JoinCondition::On, Mode::Or, condition, args)
    }

    /// AND a `WITH` condition to the last join.
    pub fn with(self, condition: &str, args: Vec<Arg>) -> Self {
        self.join_condition(JoinCondition::With, Mode::And, condition, args)
    }

    /// OR a `WITH` condition to the last join.
    pub fn or_with(self, condition: &str, args: Vec<Arg>) -> Self {
        self.join_condition(JoinCondition::With, Mode::Or, condition, args)
    }

    fn add_join(mut self, kind: JoinKind, source: &str, alias: &str) -> Self {
        self.touch();
        if self.joins.iter().any(|j| j.alias == alias) || self.from.iter().any(|(_, a)| a == alias)
        {
            self.fail(DbError::invalid_argument(format!(
                "alias '{alias}' is already in use"
            )));
            return self;
        }
        self.joins.push(Join {
            kind,
            source: source.to_string(),
            alias: alias.to_string(),
            condition_type: JoinCondition::With,
            condition: ConditionBuilder::new(),
        });
        self
    }

    fn join_condition(
        mut self,
        condition_type: JoinCondition,
        mode: Mode,
        condition: &str,
        args: Vec<Arg>,
    ) -> Self {
        self.touch();
        let Some(join) = self.joins.last_mut() else {
            self.fail(DbError::invalid_state(format!(
                "{condition_type:?} condition \"{condition}\" given without a join"
            )));
            return self;
        };
        join.condition_type = condition_type;
        let result = match mode {
            Mode::And => join.condition.add_and(condition, args).map(|_| ()),
            Mode::Or => join.condition.add_or(condition, args).map(|_| ()),
        };
        if let Err(e) = result {
            self.fail(e);
        }
        self
    }

    // ==================== WHERE / HAVING ====================

    /// AND a WHERE condition. See [`ConditionBuilder::add_and`].
    pub fn where_(mut self, condition: &str, args: Vec<Arg>) -> Self {
        self.touch();
        if let Err(e) = self.where_cond.add_and(condition, args) {
            self.fail(e);
        }
        self
    }

    /// OR a WHERE condition.
    pub fn or_where(mut self, condition: &str, args: Vec<Arg>) -> Self {
        self.touch();
        if let Err(e) = self.where_cond.add_or(condition, args) {
            self.fail(e);
        }
        self
    }

    /// AND every `column => value` pair to WHERE.
    pub fn where_all<K, V, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoArg,
    {
        self.touch();
        if let Err(e) = self.where_cond.add_and_all(pairs) {
            self.fail(e);
        }
        self
    }

    /// OR every `column => value` pair to WHERE.
    pub fn or_where_all<K, V, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoArg,
    {
        self.touch();
        if let Err(e) = self.where_cond.add_or_all(pairs) {
            self.fail(e);
        }
        self
    }

    /// Add a separately built condition group to WHERE.
    pub fn where_group(mut self, mode: Mode, group: ConditionBuilder) -> Self {
        self.touch();
        self.where_cond.add_group(mode, group);
        self
    }

    /// AND a HAVING condition.
    pub fn having(mut self, condition: &str, args: Vec<Arg>) -> Self {
        self.touch();
        if let Err(e) = self.having.add_and(condition, args) {
            self.fail(e);
        }
        self
    }

    /// OR a HAVING condition.
    pub fn or_having(mut self, condition: &str, args: Vec<Arg>) -> Self {
        self.touch();
        if let Err(e) = self.having.add_or(condition, args) {
            self.fail(e);
        }
        self
    }

    // ==================== GROUP / ORDER / LIMIT ====================

    /// Set the GROUP BY expression.
    pub fn group(mut self, by: &str) -> Self {
        self.touch();
        self.group_by = Some(by.to_string());
        self
    }

    /// Append ORDER BY items, e.g. `"name DESC, id"`.
    pub fn order(mut self, order: &str) -> Self {
        self.touch();
        self.order.extend(
            order
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.touch();
        self.order.push(format!("{column} {direction}"));
        self
    }

    /// Set max results and the offset of the first result.
    pub fn limit(mut self, max_results: u64, first_result: u64) -> Self {
        self.touch();
        self.max_results = Some(max_results);
        self.first_result = (first_result > 0).then_some(first_result);
        self
    }

    // ==================== UPDATE SET / parameters ====================

    /// Assign `column` in an UPDATE statement.
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.touch();
        let value = value.into();
        match self.set.iter_mut().find(|(c, _)| c == column) {
            Some(existing) => existing.1 = value,
            None => self.set.push((column.to_string(), value)),
        }
        self
    }

    /// Bind a named parameter used in a condition.
    pub fn set_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.touch();
        self.parameters.set(name, value);
        self
    }

    /// Parameters bound explicitly or collected from conditions so far.
    /// Explicit bindings win over values given with a condition.
    /// Placeholder names minted for `?` are only known after a build.
    pub fn parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.extend(self.where_cond.parameters());
        params.extend(self.having.parameters());
        for join in &self.joins {
            params.extend(join.condition.parameters());
        }
        params.extend(&self.parameters);
        params
    }

    // ==================== Build ====================

    /// The SELECT DQL, rendered once and reused until the next mutation.
    pub fn get_dql(&self) -> DbResult<&str> {
        Ok(&self.select_query()?.dql)
    }

    /// The memoized SELECT statement with its parameters.
    pub fn select_query(&self) -> DbResult<&BuiltQuery> {
        if let Some(built) = self.cache.get() {
            return Ok(built);
        }
        let built = self.build_select()?;
        Ok(self.cache.get_or_init(|| built))
    }

    /// Render `SELECT .. FROM .. [JOIN ..] [WHERE ..] [GROUP BY ..]
    /// [HAVING ..] [ORDER BY ..]`.
    pub fn build_select(&self) -> DbResult<BuiltQuery> {
        self.validate()?;
        let root = self.require_root()?;
        let known = self.known_aliases();
        let known: Vec<&str> = known.iter().map(String::as_str).collect();
        let mut params = self.parameters.clone();

        let select = if self.select.is_empty() {
            root.to_string()
        } else {
            self.select.join(", ")
        };
        let from = self
            .from
            .iter()
            .map(|(entity, alias)| format!("{entity} {alias}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut dql = format!("SELECT {select} FROM {from}");

        for join in &self.joins {
            dql.push(' ');
            dql.push_str(&self.render_join(join, root, &known, &mut params)?);
        }
        if let Some(cond) = self.where_cond.build(Some(root), &known, &mut params)? {
            dql.push_str(" WHERE ");
            dql.push_str(&cond);
        }
        if let Some(group) = &self.group_by {
            dql.push_str(" GROUP BY ");
            dql.push_str(&prefix_aliases(group, root, &known));
        }
        if let Some(cond) = self.having.build(Some(root), &known, &mut params)? {
            dql.push_str(" HAVING ");
            dql.push_str(&cond);
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| prefix_aliases(o, root, &known))
                .collect();
            dql.push_str(" ORDER BY ");
            dql.push_str(&order.join(", "));
        }

        Ok(self.finish(dql, params))
    }

    /// Render `UPDATE <entity> <alias> SET .. [WHERE ..]` over the root entity.
    pub fn build_update(&self) -> DbResult<BuiltQuery> {
        self.validate()?;
        let root = self.require_root()?;
        if self.set.is_empty() {
            return Err(DbError::invalid_state("UPDATE needs at least one SET column"));
        }
        let known = self.known_aliases();
        let known: Vec<&str> = known.iter().map(String::as_str).collect();
        let mut params = self.parameters.clone();

        let mut assignments = Vec::with_capacity(self.set.len());
        for (column, value) in &self.set {
            let name = unique_name(&params, &format!("set_{}", sanitize(column)));
            assignments.push(format!(
                "{} = :{name}",
                prefix_aliases(column, root, &known)
            ));
            params.set(name, value.clone());
        }

        let (entity, _) = &self.from[0];
        let mut dql = format!("UPDATE {entity} {root} SET {}", assignments.join(", "));
        if let Some(cond) = self.where_cond.build(Some(root), &known, &mut params)? {
            dql.push_str(" WHERE ");
            dql.push_str(&cond);
        }
        Ok(self.finish(dql, params))
    }

    /// Render `DELETE FROM <entity> <alias> [WHERE ..]` over the root entity.
    pub fn build_delete(&self) -> DbResult<BuiltQuery> {
        self.validate()?;
        let root = self.require_root()?;
        let known = self.known_aliases();
        let known: Vec<&str> = known.iter().map(String::as_str).collect();
        let mut params = self.parameters.clone();

        let (entity, _) = &self.from[0];
        let mut dql = format!("DELETE FROM {entity} {root}");
        if let Some(cond) = self.where_cond.build(Some(root), &known, &mut params)? {
            dql.push_str(" WHERE ");
            dql.push_str(&cond);
        }
        Ok(self.finish(dql, params))
    }

    fn render_join(
        &self,
        join: &Join,
        root: &str,
        known: &[&str],
        params: &mut Parameters,
    ) -> DbResult<String> {
        let keyword = match join.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        let mut out = format!("{keyword} {} {}", qualify_join_source(&join.source, root), join.alias);
        if let Some(cond) = join.condition.build(Some(root), known, params)? {
            let condition_type = match join.condition_type {
                JoinCondition::On => "ON",
                JoinCondition::With => "WITH",
            };
            out.push(' ');
            out.push_str(condition_type);
            out.push(' ');
            out.push_str(&cond);
        }
        Ok(out)
    }

    fn finish(&self, dql: String, mut parameters: Parameters) -> BuiltQuery {
        parameters.extend(&self.parameters);
        tracing::trace!(target: "dqlkit.sql", dql = %dql, params = parameters.len(), "built DQL");
        BuiltQuery {
            dql,
            parameters,
            first_result: self.first_result,
            max_results: self.max_results,
        }
    }

    /// Aliases that must never be prefixed: every FROM and JOIN alias plus
    /// result variables declared with `AS` in the SELECT list.
    fn known_aliases(&self) -> Vec<String> {
        let mut known: Vec<String> = self.from.iter().map(|(_, a)| a.clone()).collect();
        known.extend(self.joins.iter().map(|j| j.alias.clone()));
        for select in &self.select {
            known.extend(
                result_alias_regex()
                    .captures_iter(select)
                    .map(|c| c[1].to_string()),
            );
        }
        known
    }

    fn require_root(&self) -> DbResult<&str> {
        self.root_alias()
            .ok_or_else(|| DbError::invalid_state("no FROM clause given, call from() first"))
    }

    fn validate(&self) -> DbResult<()> {
        if let Some(ref err) = self.build_error {
            return Err(DbError::InvalidArgument(err.clone()));
        }
        Ok(())
    }

    fn fail(&mut self, err: DbError) {
        if self.build_error.is_none() {
            self.build_error = Some(err.to_string());
        }
    }

    fn touch(&mut self) {
        self.cache = OnceCell::new();
    }
}

fn result_alias_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bAS\s+(?:HIDDEN\s+)?([A-Za-z_][A-Za-z0-9_]*)")
            .expect("invalid built-in result alias regex")
    })
}

/// `author` → `e.author`; paths and entity class names are kept as given.
fn qualify_join_source(source: &str, root: &str) -> String {
    let bare = !source.contains('.')
        && !source.contains('\\')
        && source.starts_with(|c: char| c.is_ascii_lowercase());
    if bare {
        format!("{root}.{source}")
    } else {
        source.to_string()
    }
}

fn sanitize(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn unique_name(params: &Parameters, base: &str) -> String {
    if !params.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !params.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests;
