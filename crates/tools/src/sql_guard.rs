//! Query Guard
//!
//! Validates and repairs generated SQL before it reaches the warehouse.
//!
//! Repairs applied in place:
//! - markdown fences and trailing semicolons are stripped
//! - registry tables are referenced as `` `project.dataset.table` ``
//! - every aggregate in a select list gets an explicit alias
//! - raw division `a / b` becomes `SAFE_DIVIDE(a, b)`
//!
//! Rejections (returned as [`GuardViolation`]):
//! - empty query text
//! - forbidden metrics anywhere in the query
//! - a second registry table in a single-table query
//! - a table outside the correlation pair in a multi-table query
//! - a multi-table join on anything but the period column, including
//!   column equalities in WHERE
//! - comma and CROSS joins in a multi-table query
//! - a period literal that is neither the current nor the prior period, in
//!   comparisons, IN lists and BETWEEN ranges, single or double quoted
//! - a range on the period column whose bound is not a literal

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use insight_cascade_core::{
    bare_table_name, CoreError, CoreResult, DatasetProfile, PeriodPair, SchemaRegistry,
    TableTarget,
};

// ============================================================================
// Types
// ============================================================================

/// Project and dataset every registry table lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQualifier {
    pub project: String,
    pub dataset: String,
}

impl TableQualifier {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
        }
    }

    /// `` `project.dataset.table` ``
    pub fn qualify(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, table)
    }
}

/// A constraint the query breaks and that cannot be repaired locally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardViolation {
    #[error("query text is empty")]
    Empty,

    #[error("forbidden metric '{0}' referenced")]
    ForbiddenMetric(String),

    #[error("single-table query references other tables: {}", .0.join(", "))]
    CrossTable(Vec<String>),

    #[error("table {0} is not part of the correlation pair")]
    UnpairedTable(String),

    #[error("join on '{column}' is not allowed; correlation joins may only use {period_column}")]
    IllegalJoinKey {
        column: String,
        period_column: String,
    },

    #[error("implicit join between the correlation tables; use JOIN ... ON {period_column}")]
    ImplicitJoin { period_column: String },

    #[error("period literal '{literal}' is neither the current ({current}) nor the prior ({prior}) period")]
    ForeignPeriod {
        literal: String,
        current: String,
        prior: String,
    },

    #[error("range '{predicate}' on the period column must be bounded by the current ({current}) or prior ({prior}) period literal")]
    PeriodRange {
        predicate: String,
        current: String,
        prior: String,
    },

    #[error("division near '{0}' cannot be rewritten to SAFE_DIVIDE")]
    UnsafeDivision(String),
}

/// Keywords that end a select list.
const SELECT_TERMINATORS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "QUALIFY", "WINDOW", "ORDER", "LIMIT", "UNION", "EXCEPT",
    "INTERSECT",
];

/// Keywords that end a join condition.
const JOIN_TERMINATORS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "JOIN", "LEFT", "RIGHT", "INNER", "FULL", "CROSS",
    "WINDOW", "QUALIFY", "HAVING", "UNION", "SELECT", "FROM",
];

/// Keywords that end a FROM list.
const FROM_TERMINATORS: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "QUALIFY", "WINDOW", "ORDER", "LIMIT", "UNION", "EXCEPT",
    "INTERSECT", "SELECT",
];

/// Keywords that end a WHERE clause.
const WHERE_TERMINATORS: &[&str] = &[
    "GROUP", "HAVING", "QUALIFY", "WINDOW", "ORDER", "LIMIT", "UNION", "EXCEPT", "INTERSECT",
];

/// Comparison operators, longest first.
const COMPARISONS: &[&str] = &["!=", "<>", "<=", ">=", "=", "<", ">"];

/// Prefixes allowed in front of a period literal.
const TYPED_LITERAL_PREFIXES: &[&str] = &["DATE", "TIMESTAMP", "DATETIME"];

/// Words inside expressions that are never column names.
const NON_COLUMN_WORDS: &[&str] = &[
    "AND", "OR", "NOT", "AS", "IS", "NULL", "IN", "IF", "TRUE", "FALSE", "BETWEEN", "DISTINCT",
    "CASE", "WHEN", "THEN", "ELSE", "END", "DATE", "TIMESTAMP", "DATETIME", "STRING", "INT64",
    "FLOAT64", "NUMERIC", "BIGNUMERIC", "OVER", "PARTITION", "BY", "ORDER", "ASC", "DESC",
];

/// Enforces query constraints for one dataset.
#[derive(Debug, Clone)]
pub struct QueryGuard {
    qualifier: Option<TableQualifier>,
    known_tables: Vec<String>,
    period_column: String,
    table_pattern: Option<Regex>,
    forbidden_pattern: Option<Regex>,
    period_reference: Regex,
}

// ============================================================================
// QueryGuard
// ============================================================================

impl QueryGuard {
    pub fn new(
        registry: &SchemaRegistry,
        profile: &DatasetProfile,
        qualifier: Option<TableQualifier>,
    ) -> CoreResult<Self> {
        let known_tables: Vec<String> = registry
            .get_tables()
            .iter()
            .map(|t| t.to_string())
            .collect();

        let table_pattern = alternation(&known_tables, false)?;
        let forbidden_pattern = alternation(&profile.forbidden_metrics, true)?;

        let col = regex::escape(&profile.period_column);
        let period_reference = compile(&format!(
            r"(?i)(?:(?:`[^`]+`|[A-Za-z_]\w*)\.)?`?\b{col}\b`?"
        ))?;

        Ok(Self {
            qualifier,
            known_tables,
            period_column: profile.period_column.clone(),
            table_pattern,
            forbidden_pattern,
            period_reference,
        })
    }

    /// Validate `raw` for `target` and return the repaired query text.
    pub fn prepare(
        &self,
        raw: &str,
        target: &TableTarget,
        periods: &PeriodPair,
    ) -> Result<String, GuardViolation> {
        let sql = strip_fences(raw);
        if sql.is_empty() {
            return Err(GuardViolation::Empty);
        }

        let masked = mask_literals(&sql);
        self.check_forbidden(&masked)?;
        self.check_tables(&masked, target)?;
        if target.is_multi_table() {
            self.check_join_keys(&masked)?;
        }
        self.check_period_literals(&sql, &masked, periods)?;

        let sql = self.qualify_tables(&sql);
        let sql = alias_aggregates(&sql);
        rewrite_divisions(&sql)
    }

    /// Fully qualified reference for a registry table, if a qualifier is set.
    pub fn qualified_table(&self, table: &str) -> String {
        match &self.qualifier {
            Some(q) => q.qualify(bare_table_name(table)),
            None => format!("`{}`", bare_table_name(table)),
        }
    }

    fn check_forbidden(&self, masked: &str) -> Result<(), GuardViolation> {
        if let Some(pattern) = &self.forbidden_pattern {
            if let Some(m) = pattern.find(masked) {
                return Err(GuardViolation::ForbiddenMetric(m.as_str().to_string()));
            }
        }
        Ok(())
    }

    fn check_tables(&self, masked: &str, target: &TableTarget) -> Result<(), GuardViolation> {
        let Some(pattern) = &self.table_pattern else {
            return Ok(());
        };
        let referenced: BTreeSet<&str> = pattern.find_iter(masked).map(|m| m.as_str()).collect();

        match target {
            TableTarget::Single { table } => {
                let own = bare_table_name(table);
                let others: Vec<String> = referenced
                    .into_iter()
                    .filter(|t| *t != own)
                    .map(str::to_string)
                    .collect();
                if others.is_empty() {
                    Ok(())
                } else {
                    Err(GuardViolation::CrossTable(others))
                }
            }
            TableTarget::MultiTable { sources } => {
                for table in referenced {
                    if !sources.iter().any(|s| bare_table_name(s) == table) {
                        return Err(GuardViolation::UnpairedTable(table.to_string()));
                    }
                }
                Ok(())
            }
        }
    }

    fn check_join_keys(&self, masked: &str) -> Result<(), GuardViolation> {
        let depths = paren_depths(masked);
        self.check_implicit_joins(masked, &depths)?;
        for m in on_keyword().find_iter(masked) {
            let end = clause_end(masked, &depths, m.end(), depths[m.start()], JOIN_TERMINATORS);
            for column in condition_columns(&masked[m.end()..end]) {
                self.require_period_key(&column)?;
            }
        }
        for caps in using_clause().captures_iter(masked) {
            if let Some(list) = caps.get(1) {
                for column in list.as_str().split(',') {
                    let column = column.trim().trim_matches('`');
                    if !column.is_empty() {
                        self.require_period_key(column)?;
                    }
                }
            }
        }
        self.check_where_equalities(masked, &depths)
    }

    /// Comma and CROSS joins keep their condition out of ON and USING.
    fn check_implicit_joins(&self, masked: &str, depths: &[usize]) -> Result<(), GuardViolation> {
        let implicit = || GuardViolation::ImplicitJoin {
            period_column: self.period_column.clone(),
        };
        if cross_join().is_match(masked) {
            return Err(implicit());
        }
        let bytes = masked.as_bytes();
        for m in from_keyword().find_iter(masked) {
            let depth = depths[m.start()];
            let end = clause_end(masked, depths, m.end(), depth, FROM_TERMINATORS);
            if (m.end()..end).any(|i| bytes[i] == b',' && depths[i] == depth) {
                return Err(implicit());
            }
        }
        Ok(())
    }

    /// Equalities between columns of two different relations in WHERE act
    /// as join conditions.
    fn check_where_equalities(&self, masked: &str, depths: &[usize]) -> Result<(), GuardViolation> {
        for m in where_keyword().find_iter(masked) {
            let end = clause_end(masked, depths, m.end(), depths[m.start()], WHERE_TERMINATORS);
            for caps in column_equality().captures_iter(&masked[m.end()..end]) {
                let (Some(left), Some(right)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                let (Some((left_rel, left_col)), Some((right_rel, right_col))) =
                    (split_qualified(left.as_str()), split_qualified(right.as_str()))
                else {
                    continue;
                };
                if left_rel.eq_ignore_ascii_case(right_rel) {
                    continue;
                }
                self.require_period_key(left_col)?;
                self.require_period_key(right_col)?;
            }
        }
        Ok(())
    }

    fn require_period_key(&self, column: &str) -> Result<(), GuardViolation> {
        if column.eq_ignore_ascii_case(&self.period_column) {
            Ok(())
        } else {
            Err(GuardViolation::IllegalJoinKey {
                column: column.to_string(),
                period_column: self.period_column.clone(),
            })
        }
    }

    fn check_period_literals(
        &self,
        sql: &str,
        masked: &str,
        periods: &PeriodPair,
    ) -> Result<(), GuardViolation> {
        let range = |predicate: String| GuardViolation::PeriodRange {
            predicate,
            current: periods.current.clone(),
            prior: periods.prior.clone(),
        };
        let mut literals: Vec<&str> = Vec::new();

        for m in self.period_reference.find_iter(masked) {
            let column = m.as_str().trim();
            if let Some(literal) = literal_before(sql, masked, m.start()) {
                literals.push(literal);
            }

            let mut pos = skip_whitespace(masked, m.end());
            let negated = keyword_at(masked, pos, "NOT");
            if let Some(after) = negated {
                pos = skip_whitespace(masked, after);
            }

            if let Some(after) = keyword_at(masked, pos, "IN") {
                in_list_literals(sql, masked, after, &mut literals);
            } else if let Some(after) = keyword_at(masked, pos, "BETWEEN") {
                let predicate = || range(format!("{} BETWEEN", column));
                let (low, after_low) = quoted_literal(sql, masked, after).ok_or_else(predicate)?;
                let after_and = keyword_at(masked, after_low, "AND").ok_or_else(predicate)?;
                let (high, _) = quoted_literal(sql, masked, after_and).ok_or_else(predicate)?;
                literals.push(low);
                literals.push(high);
            } else if negated.is_none() {
                let Some((op, after)) = comparison_at(masked, pos) else {
                    continue;
                };
                match quoted_literal(sql, masked, after) {
                    Some((literal, _)) => literals.push(literal),
                    None if op != "=" && op != "!=" && op != "<>" => {
                        return Err(range(format!("{} {}", column, op)));
                    }
                    None => {}
                }
            }
        }

        for literal in literals {
            if !period_matches(periods, literal) {
                return Err(GuardViolation::ForeignPeriod {
                    literal: literal.to_string(),
                    current: periods.current.clone(),
                    prior: periods.prior.clone(),
                });
            }
        }
        Ok(())
    }

    fn qualify_tables(&self, sql: &str) -> String {
        let Some(qualifier) = &self.qualifier else {
            return sql.to_string();
        };
        let masked = mask_literals(sql);
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        for caps in from_join_reference().captures_iter(&masked) {
            let Some(reference) = caps.get(1) else {
                continue;
            };
            let bare = bare_table_name(reference.as_str());
            if self.known_tables.iter().any(|t| t == bare) {
                let qualified = qualifier.qualify(bare);
                if reference.as_str() != qualified {
                    edits.push((reference.start(), reference.end(), qualified));
                }
            }
        }
        edits.sort_by(|a, b| b.0.cmp(&a.0));
        let mut out = sql.to_string();
        for (start, end, text) in edits {
            out.replace_range(start..end, &text);
        }
        out
    }
}

// ============================================================================
// Repairs
// ============================================================================

/// Strip markdown fences, surrounding prose, and trailing semicolons.
pub fn strip_fences(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = match after.find('\n') {
            Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &after[nl + 1..]
            }
            _ => after,
        };
        text = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
    }
    let mut sql = text.trim();
    while let Some(stripped) = sql.strip_suffix(';') {
        sql = stripped.trim_end();
    }
    sql.to_string()
}

/// Append `AS <alias>` to every select-list item that aggregates without
/// naming its result.
pub fn alias_aggregates(sql: &str) -> String {
    let masked = mask_literals(sql);
    let depths = paren_depths(&masked);
    let mut inserts: Vec<(usize, String)> = Vec::new();

    for m in select_keyword().find_iter(&masked) {
        let depth = depths[m.start()];
        let mut start = m.end();
        loop {
            let pos = skip_whitespace(&masked, start);
            match word_at(&masked, pos) {
                Some(w) if w.eq_ignore_ascii_case("DISTINCT") || w.eq_ignore_ascii_case("ALL") => {
                    start = pos + w.len();
                }
                _ => break,
            }
        }
        let end = clause_end(&masked, &depths, start, depth, SELECT_TERMINATORS);

        let mut used: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<(usize, String)> = Vec::new();
        for (item_start, item_end) in split_top_level(&masked, &depths, start, end, depth) {
            let item = &masked[item_start..item_end];
            if let Some(alias) = explicit_alias(item) {
                used.insert(alias.to_lowercase());
                continue;
            }
            if has_implicit_alias(item) {
                continue;
            }
            if let Some(base) = generated_alias(item) {
                pending.push((item_end, base));
            }
        }
        for (pos, base) in pending {
            let alias = unique_alias(&base, &mut used);
            inserts.push((pos, format!(" AS {}", alias)));
        }
    }

    inserts.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = sql.to_string();
    for (pos, text) in inserts {
        out.insert_str(pos, &text);
    }
    out
}

/// Rewrite every `a / b` to `SAFE_DIVIDE(a, b)`, left to right.
pub fn rewrite_divisions(sql: &str) -> Result<String, GuardViolation> {
    let mut current = sql.to_string();
    let limit = sql.matches('/').count() + 1;
    for _ in 0..limit {
        let masked = mask_literals(&current);
        let Some(slash) = masked.find('/') else {
            return Ok(current);
        };
        let bytes = masked.as_bytes();
        let near = || {
            let from = slash.saturating_sub(20);
            let to = (slash + 20).min(bytes.len());
            String::from_utf8_lossy(&bytes[from..to]).trim().to_string()
        };
        let (left_start, left_end) =
            left_operand(bytes, slash).ok_or_else(|| GuardViolation::UnsafeDivision(near()))?;
        let (right_start, right_end) =
            right_operand(bytes, slash).ok_or_else(|| GuardViolation::UnsafeDivision(near()))?;

        current = format!(
            "{}SAFE_DIVIDE({}, {}){}",
            &current[..left_start],
            current[left_start..left_end].trim(),
            current[right_start..right_end].trim(),
            &current[right_end..]
        );
    }
    let masked = mask_literals(&current);
    if masked.contains('/') {
        return Err(GuardViolation::UnsafeDivision(current));
    }
    Ok(current)
}

// ============================================================================
// Lexical helpers
// ============================================================================

/// Replace string literal contents and comments with spaces, keeping byte
/// offsets and quote characters.
fn mask_literals(sql: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Single,
        Double,
        LineComment,
        BlockComment,
    }

    let bytes = sql.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut state = State::Code;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => match b {
                b'\'' => {
                    out.push(b);
                    state = State::Single;
                }
                b'"' => {
                    out.push(b);
                    state = State::Double;
                }
                b'-' if next == Some(b'-') => {
                    out.extend_from_slice(b"  ");
                    i += 1;
                    state = State::LineComment;
                }
                b'#' => {
                    out.push(b' ');
                    state = State::LineComment;
                }
                b'/' if next == Some(b'*') => {
                    out.extend_from_slice(b"  ");
                    i += 1;
                    state = State::BlockComment;
                }
                _ => out.push(b),
            },
            State::Single | State::Double => {
                let quote = if state == State::Single { b'\'' } else { b'"' };
                if b == b'\\' && next.is_some() {
                    out.extend_from_slice(b"  ");
                    i += 1;
                } else if b == quote {
                    out.push(b);
                    state = State::Code;
                } else {
                    out.push(b' ');
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    out.push(b);
                    state = State::Code;
                } else {
                    out.push(b' ');
                }
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    out.extend_from_slice(b"  ");
                    i += 1;
                    state = State::Code;
                } else {
                    out.push(if b == b'\n' { b'\n' } else { b' ' });
                }
            }
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `depths[i]` is the number of unclosed parentheses before byte `i`.
fn paren_depths(masked: &str) -> Vec<usize> {
    let mut depths = Vec::with_capacity(masked.len() + 1);
    let mut depth = 0usize;
    for b in masked.bytes() {
        depths.push(depth);
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depths.push(depth);
    depths
}

fn find_matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn find_matching_open(bytes: &[u8], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_operand_byte(b: u8) -> bool {
    is_ident_byte(b) || matches!(b, b'.' | b'`' | b'%')
}

fn skip_whitespace(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// The identifier starting exactly at `pos`, if `pos` begins a word.
fn word_at(s: &str, pos: usize) -> Option<&str> {
    let bytes = s.as_bytes();
    if pos >= bytes.len() || (pos > 0 && is_ident_byte(bytes[pos - 1])) {
        return None;
    }
    if !(bytes[pos].is_ascii_alphabetic() || bytes[pos] == b'_') {
        return None;
    }
    let mut end = pos;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    Some(&s[pos..end])
}

/// End of a clause that starts at `from` inside parenthesis depth `depth`.
fn clause_end(
    masked: &str,
    depths: &[usize],
    from: usize,
    depth: usize,
    terminators: &[&str],
) -> usize {
    let bytes = masked.as_bytes();
    for i in from..bytes.len() {
        if depths[i] != depth {
            continue;
        }
        if bytes[i] == b')' {
            return i;
        }
        if let Some(word) = word_at(masked, i) {
            if terminators.iter().any(|t| word.eq_ignore_ascii_case(t)) {
                return i;
            }
        }
    }
    bytes.len()
}

/// Comma-separated items of `masked[start..end]` at `depth`, trimmed.
fn split_top_level(
    masked: &str,
    depths: &[usize],
    start: usize,
    end: usize,
    depth: usize,
) -> Vec<(usize, usize)> {
    let bytes = masked.as_bytes();
    let mut items = Vec::new();
    let mut segment_start = start;
    for i in start..=end {
        if i == end || (bytes[i] == b',' && depths[i] == depth) {
            let raw = &masked[segment_start..i];
            let leading = raw.len() - raw.trim_start().len();
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                let s = segment_start + leading;
                items.push((s, s + trimmed.len()));
            }
            segment_start = i + 1;
        }
    }
    items
}

/// Column names referenced in a join condition.
fn condition_columns(condition: &str) -> Vec<String> {
    let mut columns = Vec::new();
    for m in identifier_chain().find_iter(condition) {
        if condition[m.end()..].trim_start().starts_with('(') {
            continue;
        }
        let last = m.as_str().rsplit('.').next().unwrap_or(m.as_str());
        let last = last.trim_matches('`');
        if NON_COLUMN_WORDS.iter().any(|k| k.eq_ignore_ascii_case(last)) {
            continue;
        }
        columns.push(last.to_string());
    }
    columns
}

fn explicit_alias(item: &str) -> Option<String> {
    explicit_alias_pattern()
        .captures(item)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_matches('`').to_string())
}

fn has_implicit_alias(item: &str) -> bool {
    implicit_alias_pattern()
        .captures(item)
        .and_then(|c| c.get(1))
        .is_some_and(|m| {
            let word = m.as_str().trim_matches('`');
            !["END", "ASC", "DESC"]
                .iter()
                .any(|k| k.eq_ignore_ascii_case(word))
        })
}

/// `<function>_<first column>` for the first aggregate in `item`.
fn generated_alias(item: &str) -> Option<String> {
    let caps = aggregate_call().captures(item)?;
    let function = caps.get(1)?.as_str().to_lowercase();
    let open = caps.get(0)?.end() - 1;
    let close = find_matching_close(item.as_bytes(), open).unwrap_or(item.len());
    let inner = &item[(open + 1).min(close)..close];

    let column = identifier_chain()
        .find_iter(inner)
        .filter(|m| !inner[m.end()..].trim_start().starts_with('('))
        .map(|m| {
            let last = m.as_str().rsplit('.').next().unwrap_or(m.as_str());
            last.trim_matches('`').to_string()
        })
        .find(|word| !NON_COLUMN_WORDS.iter().any(|k| k.eq_ignore_ascii_case(word)));

    let suffix = match column {
        Some(col) => {
            let cleaned: String = col
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            let cleaned = cleaned.trim_matches('_').to_string();
            if cleaned.is_empty() {
                "value".to_string()
            } else {
                cleaned
            }
        }
        None => "all".to_string(),
    };
    Some(format!("{}_{}", function, suffix))
}

fn unique_alias(base: &str, used: &mut BTreeSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while used.contains(&candidate.to_lowercase()) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

fn left_operand(bytes: &[u8], slash: usize) -> Option<(usize, usize)> {
    let mut end = slash;
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    if end == 0 {
        return None;
    }
    if ends_with_word(bytes, end, b"END") {
        return case_expression_start(bytes, end).map(|start| (start, end));
    }
    let mut start = end;
    if bytes[end - 1] == b')' {
        start = find_matching_open(bytes, end - 1)?;
    }
    while start > 0 && is_operand_byte(bytes[start - 1]) {
        start -= 1;
    }
    (start < end).then_some((start, end))
}

fn right_operand(bytes: &[u8], slash: usize) -> Option<(usize, usize)> {
    let mut start = slash + 1;
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    if start >= bytes.len() {
        return None;
    }
    if bytes[start] == b'(' {
        return find_matching_close(bytes, start).map(|close| (start, close + 1));
    }
    if starts_with_word(bytes, start, b"CASE") {
        return case_expression_end(bytes, start).map(|end| (start, end));
    }
    let mut end = start;
    if bytes[end] == b'-' {
        end += 1;
    }
    let body_start = end;
    while end < bytes.len() && is_operand_byte(bytes[end]) {
        end += 1;
    }
    if end == body_start {
        return None;
    }
    if end < bytes.len() && bytes[end] == b'(' {
        end = find_matching_close(bytes, end)? + 1;
    }
    Some((start, end))
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    end
}

fn ends_with_word(bytes: &[u8], end: usize, word: &[u8]) -> bool {
    end >= word.len()
        && bytes[end - word.len()..end].eq_ignore_ascii_case(word)
        && (end == word.len() || !is_ident_byte(bytes[end - word.len() - 1]))
}

fn starts_with_word(bytes: &[u8], start: usize, word: &[u8]) -> bool {
    let end = start + word.len();
    end <= bytes.len()
        && bytes[start..end].eq_ignore_ascii_case(word)
        && (end == bytes.len() || !is_ident_byte(bytes[end]))
}

/// Start of the `CASE ... END` expression whose `END` finishes at `end`.
fn case_expression_start(bytes: &[u8], end: usize) -> Option<usize> {
    let mut open_ends = 0usize;
    let mut depth = 0usize;
    let mut i = end;
    while i > 0 {
        i -= 1;
        match bytes[i] {
            b')' => depth += 1,
            b'(' => depth = depth.checked_sub(1)?,
            b if depth == 0 && is_ident_byte(b) && (i == 0 || !is_ident_byte(bytes[i - 1])) => {
                let word = &bytes[i..ident_end(bytes, i)];
                if word.eq_ignore_ascii_case(b"END") {
                    open_ends += 1;
                } else if word.eq_ignore_ascii_case(b"CASE") {
                    open_ends = open_ends.checked_sub(1)?;
                    if open_ends == 0 {
                        return Some(i);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// End of the `CASE ... END` expression that starts at `start`.
fn case_expression_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut open_cases = 0usize;
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.checked_sub(1)?,
            b if is_ident_byte(b) => {
                let word_end = ident_end(bytes, i);
                let word = &bytes[i..word_end];
                if depth == 0 && word.eq_ignore_ascii_case(b"CASE") {
                    open_cases += 1;
                } else if depth == 0 && word.eq_ignore_ascii_case(b"END") {
                    open_cases = open_cases.checked_sub(1)?;
                    if open_cases == 0 {
                        return Some(word_end);
                    }
                }
                i = word_end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// The keyword `keyword` at `pos` (after whitespace); returns the offset
/// just past it.
fn keyword_at(masked: &str, pos: usize, keyword: &str) -> Option<usize> {
    let pos = skip_whitespace(masked, pos);
    word_at(masked, pos)
        .filter(|w| w.eq_ignore_ascii_case(keyword))
        .map(|w| pos + w.len())
}

/// Comparison operator at `pos` (after whitespace).
fn comparison_at(masked: &str, pos: usize) -> Option<(&'static str, usize)> {
    let pos = skip_whitespace(masked, pos);
    let rest = masked.get(pos..)?;
    COMPARISONS
        .iter()
        .find(|op| rest.starts_with(**op))
        .map(|op| (*op, pos + op.len()))
}

/// Quoted literal at `pos`, optionally typed (`DATE '...'`, `DATE("...")`).
/// Returns the literal text and the offset just past the expression.
fn quoted_literal<'a>(sql: &'a str, masked: &str, pos: usize) -> Option<(&'a str, usize)> {
    let bytes = masked.as_bytes();
    let mut pos = skip_whitespace(masked, pos);
    if let Some(word) = word_at(masked, pos) {
        if TYPED_LITERAL_PREFIXES
            .iter()
            .any(|p| word.eq_ignore_ascii_case(p))
        {
            pos = skip_whitespace(masked, pos + word.len());
        }
    }
    let parenthesized = bytes.get(pos) == Some(&b'(');
    if parenthesized {
        pos = skip_whitespace(masked, pos + 1);
    }

    let quote = *bytes.get(pos)?;
    if quote != b'\'' && quote != b'"' {
        return None;
    }
    let len = masked[pos + 1..].find(quote as char)?;
    let literal = &sql[pos + 1..pos + 1 + len];
    let mut end = pos + len + 2;
    if parenthesized {
        end = skip_whitespace(masked, end);
        if bytes.get(end) != Some(&b')') {
            return None;
        }
        end += 1;
    }
    Some((literal, end))
}

/// Literal on the left of a comparison that ends at `column_start`.
fn literal_before<'a>(sql: &'a str, masked: &str, column_start: usize) -> Option<&'a str> {
    let before = masked[..column_start].trim_end();
    let op = COMPARISONS.iter().find(|op| before.ends_with(**op))?;
    let before = before[..before.len() - op.len()].trim_end();
    let close = before.len().checked_sub(1)?;
    let quote = before.as_bytes()[close];
    if quote != b'\'' && quote != b'"' {
        return None;
    }
    let open = before[..close].rfind(quote as char)?;
    Some(&sql[open + 1..close])
}

/// Literals of an `IN (...)` list starting at `pos`. Subqueries are skipped;
/// their own period references are checked where they appear.
fn in_list_literals<'a>(sql: &'a str, masked: &str, pos: usize, out: &mut Vec<&'a str>) {
    let bytes = masked.as_bytes();
    let open = skip_whitespace(masked, pos);
    if bytes.get(open) != Some(&b'(') || keyword_at(masked, open + 1, "SELECT").is_some() {
        return;
    }
    let Some(close) = find_matching_close(bytes, open) else {
        return;
    };
    let mut cursor = open + 1;
    while cursor < close {
        let quote = bytes[cursor];
        if quote == b'\'' || quote == b'"' {
            let Some(len) = masked[cursor + 1..close].find(quote as char) else {
                break;
            };
            out.push(&sql[cursor + 1..cursor + 1 + len]);
            cursor += len + 2;
        } else {
            cursor += 1;
        }
    }
}

/// `(relation, column)` of a qualified reference, backticks removed.
fn split_qualified(reference: &str) -> Option<(&str, &str)> {
    let (relation, column) = reference.rsplit_once('.')?;
    Some((relation.trim_matches('`'), column.trim_matches('`')))
}

/// Compare on the date part so `2026-01-01` matches `2026-01-01 00:00:00`.
fn period_matches(periods: &PeriodPair, literal: &str) -> bool {
    let date_part = |s: &str| -> String {
        s.trim()
            .split(['T', ' '])
            .next()
            .unwrap_or("")
            .to_string()
    };
    let literal = date_part(literal);
    literal == date_part(&periods.current) || literal == date_part(&periods.prior)
}

// ============================================================================
// Patterns
// ============================================================================

fn compile(pattern: &str) -> CoreResult<Regex> {
    Regex::new(pattern).map_err(|e| CoreError::internal(format!("invalid guard pattern: {e}")))
}

/// `\b(a|b|c)\b` over escaped names, or `None` when the list is empty.
fn alternation(names: &[String], case_insensitive: bool) -> CoreResult<Option<Regex>> {
    if names.is_empty() {
        return Ok(None);
    }
    let escaped: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
    let flags = if case_insensitive { "(?i)" } else { "" };
    compile(&format!(r"{}\b(?:{})\b", flags, escaped.join("|"))).map(Some)
}

fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static guard pattern"))
}

fn select_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?i)\bSELECT\b")
}

fn on_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?i)\bON\b")
}

fn from_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?i)\bFROM\b")
}

fn where_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?i)\bWHERE\b")
}

fn cross_join() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?i)\bCROSS\s+JOIN\b")
}

/// `a.x = b.y` between two qualified references.
fn column_equality() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &RE,
        r"((?:`[^`]+`|[A-Za-z_]\w*)(?:\.(?:`[^`]+`|[A-Za-z_]\w*))+)\s*=\s*((?:`[^`]+`|[A-Za-z_]\w*)(?:\.(?:`[^`]+`|[A-Za-z_]\w*))+)",
    )
}

fn using_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?i)\bUSING\s*\(([^)]*)\)")
}

fn from_join_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &RE,
        r"(?i)\b(?:FROM|JOIN)\s+((?:`[^`]+`|[A-Za-z_][\w\-]*)(?:\.(?:`[^`]+`|[A-Za-z_][\w\-]*))*)",
    )
}

fn identifier_chain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &RE,
        r"(?:`[^`]+`|[A-Za-z_][A-Za-z0-9_%]*)(?:\.(?:`[^`]+`|[A-Za-z_][A-Za-z0-9_%]*))*",
    )
}

fn explicit_alias_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?i)\bAS\s+(`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)\s*$")
}

fn implicit_alias_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"\)\s+(`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)\s*$")
}

fn aggregate_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &RE,
        r"(?i)\b(AVG|SUM|COUNT|COUNTIF|MIN|MAX|CORR|STDDEV|STDDEV_POP|STDDEV_SAMP|VARIANCE|VAR_POP|VAR_SAMP|COVAR_POP|COVAR_SAMP|APPROX_COUNT_DISTINCT|ANY_VALUE|ARRAY_AGG|STRING_AGG|LOGICAL_AND|LOGICAL_OR)\s*\(",
    )
}
