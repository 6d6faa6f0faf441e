// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;

/// Filter operators accepted in `{operator, value}` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    Between,
    NotBetween,
    In,
    NotIn,
    /// Natural-language full-text match.
    Match,
    /// Boolean-mode full-text match (`+term -term`).
    MatchBool,
    /// Full-text match with query expansion.
    MatchQuery,
}

impl Operator {
    /// Case-insensitive lookup. Unknown operators yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        let op = match normalized.as_str() {
            "=" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "LIKE" => Operator::Like,
            "NOT LIKE" => Operator::NotLike,
            "BETWEEN" => Operator::Between,
            "NOT BETWEEN" => Operator::NotBetween,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            "MATCH" => Operator::Match,
            "MATCH_BOOL" => Operator::MatchBool,
            "MATCH_QUERY" => Operator::MatchQuery,
            _ => return None,
        };
        Some(op)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Match => "MATCH",
            Operator::MatchBool => "MATCH_BOOL",
            Operator::MatchQuery => "MATCH_QUERY",
        }
    }

    /// `IN` / `NOT IN`.
    #[must_use]
    pub fn is_membership(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// `BETWEEN` / `NOT BETWEEN`.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(self, Operator::Between | Operator::NotBetween)
    }

    #[must_use]
    pub fn is_full_text(self) -> bool {
        matches!(self, Operator::Match | Operator::MatchBool | Operator::MatchQuery)
    }

    /// Operators whose string value is a comma-separated list.
    #[must_use]
    pub fn takes_list(self) -> bool {
        self.is_membership() || self.is_range()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
