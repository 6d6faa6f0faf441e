// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Compiled filter tree.
//!
//! A [`Predicate`] is what the compiler produces and what the storage
//! backends consume: [`SqlStore`](crate::storage::sql::SqlStore) renders it
//! to SQL, [`MemoryStore`](crate::storage::memory::MemoryStore) evaluates it
//! with [`Predicate::matches`].
//!
//! A [`Predicate::Chain`] is flat, like a chained `where`/`orWhere` builder:
//! `a AND b OR c` evaluates as `(a AND b) OR c`. Use [`Predicate::Group`]
//! (or [`Predicate::and`] / [`Predicate::or`], which group their operands)
//! for structural precedence.
//!
//! ```
//! use modelbase::filter::Predicate;
//! use modelbase::{Row, Value};
//!
//! let rich_or_named = Predicate::Compare {
//!     column: "balance".into(),
//!     op: modelbase::filter::CompareOp::Gt,
//!     value: Value::Int(100),
//! }
//! .or(Predicate::eq("first_name", "Ann"));
//!
//! assert!(rich_or_named.matches(&Row::new().with("first_name", "Ann").with("balance", 0)));
//! assert!(!rich_or_named.matches(&Row::new().with("first_name", "Bob").with("balance", 0)));
//! ```

use std::cmp::Ordering;

use crate::schema::unqualified;
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Full-text search flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Natural,
    Boolean,
    QueryExpansion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    Like {
        column: String,
        pattern: String,
        negated: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Match {
        column: String,
        query: String,
        mode: MatchMode,
    },
    /// Parenthesized sub-expression.
    Group(Box<Predicate>),
    /// Left-to-right chain; the first entry's join is ignored.
    Chain(Vec<(Join, Predicate)>),
}

impl Predicate {
    /// `column = value`, or `column IS NULL` when `value` is NULL.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// Comparison with NULL mapped onto `IS [NOT] NULL` for `=` and `<>`.
    #[must_use]
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match (op, value.is_null()) {
            (CompareOp::Eq, true) => Predicate::IsNull { column, negated: false },
            (CompareOp::Ne, true) => Predicate::IsNull { column, negated: true },
            (op, _) => Predicate::Compare { column, op, value },
        }
    }

    #[must_use]
    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    #[must_use]
    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In {
            column: column.into(),
            values,
            negated: false,
        }
    }

    /// Append to a flat chain without grouping.
    #[must_use]
    pub fn join(self, join: Join, other: Predicate) -> Self {
        match self {
            Predicate::Chain(mut entries) => {
                let join = if entries.is_empty() { Join::And } else { join };
                entries.push((join, other));
                Predicate::Chain(entries)
            }
            first => Predicate::Chain(vec![(Join::And, first), (join, other)]),
        }
    }

    /// `(self) AND (other)`.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        Predicate::Chain(vec![(Join::And, self.grouped()), (Join::And, other.grouped())])
    }

    /// `(self) OR (other)`.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Chain(vec![(Join::And, self.grouped()), (Join::Or, other.grouped())])
    }

    /// Conjunction of all parts; `None` when there are none.
    #[must_use]
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Option<Self> {
        parts.into_iter().reduce(Predicate::and)
    }

    fn grouped(self) -> Self {
        match self {
            Predicate::Chain(mut entries) if entries.len() == 1 => entries.remove(0).1,
            Predicate::Chain(entries) => Predicate::Group(Box::new(Predicate::Chain(entries))),
            other => other,
        }
    }

    /// Evaluate against a row. Missing columns read as NULL and any
    /// comparison involving NULL is false.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        let read = |column: &str| row.get(unqualified(column)).cloned().unwrap_or(Value::Null);

        match self {
            Predicate::Compare { column, op, value } => read(column)
                .compare(value)
                .is_some_and(|ordering| op.holds(ordering)),
            Predicate::IsNull { column, negated } => read(column).is_null() != *negated,
            Predicate::Like {
                column,
                pattern,
                negated,
            } => read(column)
                .as_text()
                .is_some_and(|text| like(&text, pattern) != *negated),
            Predicate::Between {
                column,
                low,
                high,
                negated,
            } => {
                let value = read(column);
                match (value.compare(low), value.compare(high)) {
                    (Some(lo), Some(hi)) => {
                        let inside = lo != Ordering::Less && hi != Ordering::Greater;
                        inside != *negated
                    }
                    _ => false,
                }
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                let value = read(column);
                if value.is_null() {
                    return false;
                }
                let found = values
                    .iter()
                    .any(|v| value.compare(v) == Some(Ordering::Equal));
                found != *negated
            }
            Predicate::Match { column, query, mode } => read(column)
                .as_text()
                .is_some_and(|text| full_text(&text, query, *mode)),
            Predicate::Group(inner) => inner.matches(row),
            Predicate::Chain(entries) => {
                // AND binds tighter than OR.
                let mut any = false;
                let mut run = true;
                for (i, (join, predicate)) in entries.iter().enumerate() {
                    if i > 0 && *join == Join::Or {
                        any |= run;
                        run = true;
                    }
                    run = run && predicate.matches(row);
                }
                any || run
            }
        }
    }
}

/// SQL `LIKE` with `%`, `_` and backslash escapes, ASCII case-insensitive.
fn like(text: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy)]
    enum Token {
        Any,
        One,
        Char(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Char(chars.next().unwrap_or('\\')),
            c => Token::Char(c),
        });
    }

    let text: Vec<char> = text.chars().collect();
    // reachable[j]: pattern prefix matches text prefix of length j
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;

    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            }
            Token::One => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j];
                }
            }
            Token::Char(p) => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j] && text[j].eq_ignore_ascii_case(&p);
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

/// Words of a full-text query with punctuation stripped. `+` and `-`
/// operators only count in boolean mode; otherwise every word is optional.
#[derive(Debug, Default)]
pub(crate) struct FullTextTerms<'q> {
    pub required: Vec<&'q str>,
    pub excluded: Vec<&'q str>,
    pub optional: Vec<&'q str>,
}

impl<'q> FullTextTerms<'q> {
    pub(crate) fn parse(query: &'q str, mode: MatchMode) -> Self {
        let mut terms = Self::default();
        for word in query.split_whitespace() {
            let clean = word.trim_matches(|c: char| !c.is_alphanumeric());
            if clean.is_empty() {
                continue;
            }
            match mode {
                MatchMode::Boolean if word.starts_with('-') => terms.excluded.push(clean),
                MatchMode::Boolean if word.starts_with('+') => terms.required.push(clean),
                _ => terms.optional.push(clean),
            }
        }
        terms
    }
}

/// Word-level approximation of MySQL full-text search. The SQLite fallback
/// renders the same terms as LIKE clauses.
fn full_text(text: &str, query: &str, mode: MatchMode) -> bool {
    let haystack = text.to_lowercase();
    let contains = |term: &&str| haystack.contains(&term.to_lowercase());
    let terms = FullTextTerms::parse(query, mode);

    if terms.excluded.iter().any(contains) {
        return false;
    }
    if !terms.required.is_empty() {
        return terms.required.iter().all(contains);
    }
    if terms.optional.is_empty() {
        mode == MatchMode::Boolean
    } else {
        terms.optional.iter().any(contains)
    }
}
