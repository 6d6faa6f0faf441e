// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL Translator
//!
//! Renders predicates and row statements to parameterized SQL for the MySQL
//! and SQLite dialects. Both use `?` placeholders.
//!
//! # SQL Syntax Generated
//!
//! ```sql
//! `users`.`balance` BETWEEN ? AND ?                          -- Range
//! `users`.`email` IN (?, ?)                                  -- Membership
//! MATCH (`posts`.`body`) AGAINST (? IN BOOLEAN MODE)         -- Full text (MySQL)
//! "posts"."body" LIKE ? ESCAPE '\'                           -- Full text (SQLite)
//! INSERT INTO `users` (`id`, `email`) VALUES (?, ?), (?, ?)
//!   ON DUPLICATE KEY UPDATE `email` = VALUES(`email`)        -- Upsert (MySQL)
//! INSERT INTO "users" ("id", "email") VALUES (?, ?)
//!   ON CONFLICT ("id") DO UPDATE SET "email" = excluded."email" -- Upsert (SQLite)
//! ```

use super::predicate::{FullTextTerms, Join, MatchMode, Predicate};
use crate::schema::TableSchema;
use crate::storage::traits::{SelectQuery, SortOrder, Upsert};
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite:") {
            Dialect::Sqlite
        } else {
            Dialect::MySql
        }
    }

    /// Quote an identifier, part by part for dotted names.
    #[must_use]
    pub fn quote(self, identifier: &str) -> String {
        let q = match self {
            Dialect::MySql => '`',
            Dialect::Sqlite => '"',
        };
        identifier
            .split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    let escaped = part.replace(q, &format!("{q}{q}"));
                    format!("{q}{escaped}{q}")
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// SQL statement with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct SqlTranslator {
    dialect: Dialect,
}

impl SqlTranslator {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// WHERE clause body (without the keyword).
    #[must_use]
    pub fn predicate(&self, predicate: &Predicate) -> SqlQuery {
        let mut params = Vec::new();
        let sql = self.node(predicate, &mut params);
        SqlQuery { sql, params }
    }

    #[must_use]
    pub fn select(&self, schema: &TableSchema, query: &SelectQuery) -> SqlQuery {
        let columns = if query.columns.is_empty() {
            "*".to_string()
        } else {
            self.column_list(query.columns.iter().map(String::as_str))
        };
        let mut sql = format!("SELECT {} FROM {}", columns, self.dialect.quote(schema.table()));
        let mut params = Vec::new();

        if let Some(filter) = &query.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.node(filter, &mut params));
        }

        if !query.order.is_empty() {
            let order = query
                .order
                .iter()
                .map(|(column, order)| {
                    let dir = match order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    format!("{} {}", self.dialect.quote(column), dir)
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => {
                let unbounded = match self.dialect {
                    Dialect::MySql => "18446744073709551615",
                    Dialect::Sqlite => "-1",
                };
                sql.push_str(&format!(" LIMIT {} OFFSET {}", unbounded, offset));
            }
            (None, None) => {}
        }

        SqlQuery { sql, params }
    }

    #[must_use]
    pub fn count(&self, schema: &TableSchema, filter: Option<&Predicate>) -> SqlQuery {
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.dialect.quote(schema.table()));
        let mut params = Vec::new();
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.node(filter, &mut params));
        }
        SqlQuery { sql, params }
    }

    #[must_use]
    pub fn insert(&self, schema: &TableSchema, row: &Row) -> SqlQuery {
        let table = self.dialect.quote(schema.table());
        if row.is_empty() {
            let sql = match self.dialect {
                Dialect::MySql => format!("INSERT INTO {} () VALUES ()", table),
                Dialect::Sqlite => format!("INSERT INTO {} DEFAULT VALUES", table),
            };
            return SqlQuery { sql, params: Vec::new() };
        }
        self.insert_rows(schema, std::slice::from_ref(row))
    }

    /// Multi-row insert. Rows should set the same columns (see
    /// [`group_by_columns`]); a column one row lacks is bound as NULL.
    #[must_use]
    pub fn insert_rows(&self, schema: &TableSchema, rows: &[Row]) -> SqlQuery {
        let columns = ordered_columns(schema, rows);
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        let (sql, params) = self.values_clause(schema, &columns, values);
        SqlQuery { sql, params }
    }

    #[must_use]
    pub fn update(&self, schema: &TableSchema, filter: &Predicate, changes: &Row) -> SqlQuery {
        let mut params = Vec::new();
        let set = ordered_columns(schema, std::slice::from_ref(changes))
            .iter()
            .map(|column| {
                params.push(changes.get(column).cloned().unwrap_or(Value::Null));
                format!("{} = ?", self.dialect.quote(column))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let clause = self.node(filter, &mut params);
        SqlQuery {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                self.dialect.quote(schema.table()),
                set,
                clause
            ),
            params,
        }
    }

    #[must_use]
    pub fn delete(&self, schema: &TableSchema, filter: Option<&Predicate>) -> SqlQuery {
        let mut sql = format!("DELETE FROM {}", self.dialect.quote(schema.table()));
        let mut params = Vec::new();
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.node(filter, &mut params));
        }
        SqlQuery { sql, params }
    }

    /// Multi-row insert whose conflict clause rewrites `update_columns`.
    #[must_use]
    pub fn upsert(&self, schema: &TableSchema, upsert: &Upsert) -> SqlQuery {
        let (insert, params) = self.values_clause(schema, &upsert.columns, upsert.rows.clone());

        let sql = match (self.dialect, upsert.update_columns.is_empty()) {
            (Dialect::MySql, true) => insert.replacen("INSERT INTO", "INSERT IGNORE INTO", 1),
            (Dialect::MySql, false) => {
                let set = upsert
                    .update_columns
                    .iter()
                    .map(|c| {
                        let c = self.dialect.quote(c);
                        format!("{c} = VALUES({c})")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} ON DUPLICATE KEY UPDATE {}", insert, set)
            }
            (Dialect::Sqlite, empty) => {
                let target = self.column_list(upsert.conflict_columns.iter().map(String::as_str));
                if empty {
                    format!("{} ON CONFLICT ({}) DO NOTHING", insert, target)
                } else {
                    let set = upsert
                        .update_columns
                        .iter()
                        .map(|c| {
                            let c = self.dialect.quote(c);
                            format!("{c} = excluded.{c}")
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("{} ON CONFLICT ({}) DO UPDATE SET {}", insert, target, set)
                }
            }
        };
        SqlQuery { sql, params }
    }

    /// Statement with values inlined.
    ///
    /// Warning: Only use for debugging, not for actual queries (SQL injection risk)
    #[must_use]
    pub fn inline(&self, query: &SqlQuery) -> String {
        let mut params = query.params.iter();
        let mut out = String::with_capacity(query.sql.len());
        let mut in_string = false;
        for c in query.sql.chars() {
            match c {
                '\'' => {
                    in_string = !in_string;
                    out.push(c);
                }
                '?' if !in_string => match params.next() {
                    Some(value) => out.push_str(&self.literal(value)),
                    None => out.push(c),
                },
                c => out.push(c),
            }
        }
        out
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match (self.dialect, b) {
                (Dialect::MySql, true) => "TRUE".to_string(),
                (Dialect::MySql, false) => "FALSE".to_string(),
                (Dialect::Sqlite, b) => i64::from(*b).to_string(),
            },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => format!("X'{}'", hex::encode(b)),
        }
    }

    fn column_list<'a>(&self, columns: impl Iterator<Item = &'a str>) -> String {
        columns
            .map(|c| self.dialect.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn values_clause(
        &self,
        schema: &TableSchema,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> (String, Vec<Value>) {
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let groups = vec![placeholders; rows.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.dialect.quote(schema.table()),
            self.column_list(columns.iter().map(String::as_str)),
            groups
        );
        (sql, rows.into_iter().flatten().collect())
    }

    fn node(&self, predicate: &Predicate, params: &mut Vec<Value>) -> String {
        let q = |c: &str| self.dialect.quote(c);
        match predicate {
            Predicate::Compare { column, op, value } => {
                params.push(value.clone());
                format!("{} {} ?", q(column), op.as_sql())
            }
            Predicate::IsNull { column, negated } => {
                format!("{} IS {}NULL", q(column), if *negated { "NOT " } else { "" })
            }
            Predicate::Like {
                column,
                pattern,
                negated,
            } => {
                params.push(Value::Text(pattern.clone()));
                format!(
                    "{} {}LIKE ?{}",
                    q(column),
                    if *negated { "NOT " } else { "" },
                    self.escape_clause()
                )
            }
            Predicate::Between {
                column,
                low,
                high,
                negated,
            } => {
                params.push(low.clone());
                params.push(high.clone());
                format!(
                    "{} {}BETWEEN ? AND ?",
                    q(column),
                    if *negated { "NOT " } else { "" }
                )
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                params.extend(values.iter().cloned());
                format!(
                    "{} {}IN ({})",
                    q(column),
                    if *negated { "NOT " } else { "" },
                    vec!["?"; values.len()].join(", ")
                )
            }
            Predicate::Match { column, query, mode } => match self.dialect {
                Dialect::MySql => {
                    params.push(Value::Text(query.clone()));
                    let modifier = match mode {
                        MatchMode::Natural => "",
                        MatchMode::Boolean => " IN BOOLEAN MODE",
                        MatchMode::QueryExpansion => " WITH QUERY EXPANSION",
                    };
                    format!("MATCH ({}) AGAINST (?{})", q(column), modifier)
                }
                Dialect::Sqlite => self.like_terms(&q(column), query, *mode, params),
            },
            Predicate::Group(inner) => format!("({})", self.node(inner, params)),
            Predicate::Chain(entries) => {
                if entries.is_empty() {
                    return "1 = 1".to_string();
                }
                let mut sql = String::new();
                for (i, (join, entry)) in entries.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(match join {
                            Join::And => " AND ",
                            Join::Or => " OR ",
                        });
                    }
                    let part = self.node(entry, params);
                    match entry {
                        Predicate::Chain(inner) if inner.len() > 1 => {
                            sql.push('(');
                            sql.push_str(&part);
                            sql.push(')');
                        }
                        _ => sql.push_str(&part),
                    }
                }
                sql
            }
        }
    }

    /// Full-text fallback: one LIKE per query word. Excluded words must be
    /// absent, required words present, otherwise any optional word matches.
    fn like_terms(&self, column: &str, query: &str, mode: MatchMode, params: &mut Vec<Value>) -> String {
        let terms = FullTextTerms::parse(query, mode);
        let escape = self.escape_clause();
        let mut like = |term: &str, negated: bool| {
            params.push(Value::Text(format!("%{}%", escape_like(term))));
            format!("{} {}LIKE ?{}", column, if negated { "NOT " } else { "" }, escape)
        };

        let mut clauses: Vec<String> = terms.excluded.iter().map(|t| like(t, true)).collect();
        if terms.required.is_empty() {
            let optional: Vec<String> = terms.optional.iter().map(|t| like(t, false)).collect();
            match optional.len() {
                0 if mode != MatchMode::Boolean => clauses.push("1 = 0".to_string()),
                0 => {}
                1 => clauses.extend(optional),
                _ => clauses.push(format!("({})", optional.join(" OR "))),
            }
        } else {
            clauses.extend(terms.required.iter().map(|t| like(t, false)));
        }

        match clauses.len() {
            0 => "1 = 1".to_string(),
            1 => clauses.remove(0),
            _ => format!("({})", clauses.join(" AND ")),
        }
    }

    fn escape_clause(&self) -> &'static str {
        match self.dialect {
            // MySQL escapes with backslash by default
            Dialect::MySql => "",
            Dialect::Sqlite => " ESCAPE '\\'",
        }
    }
}

/// Escape LIKE wildcards so `term` matches literally.
#[must_use]
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Splits `rows` into groups that set the same columns, in first-seen
/// order. A multi-row statement per group leaves omitted columns to their
/// DEFAULT on insert and untouched on upsert.
pub fn group_by_columns(rows: &[Row]) -> Vec<Vec<&Row>> {
    let mut groups: Vec<(Vec<&str>, Vec<&Row>)> = Vec::new();
    for row in rows {
        let key: Vec<&str> = row.columns().collect();
        match groups.iter_mut().find(|(columns, _)| *columns == key) {
            Some((_, group)) => group.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// Columns of `rows` in schema order, then any unknown columns sorted.
fn ordered_columns(schema: &TableSchema, rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = schema
        .columns()
        .iter()
        .filter(|c| rows.iter().any(|r| r.contains(&c.name)))
        .map(|c| c.name.clone())
        .collect();
    for row in rows {
        for column in row.columns() {
            if !schema.has_column(column) && !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CompareOp;
    use crate::schema::ColumnType;

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column("id", ColumnType::Integer)
            .column("email", ColumnType::Text)
            .column("balance", ColumnType::Integer)
    }

    fn mysql() -> SqlTranslator {
        SqlTranslator::new(Dialect::MySql)
    }

    fn sqlite() -> SqlTranslator {
        SqlTranslator::new(Dialect::Sqlite)
    }

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::MySql.quote("users.email"), "`users`.`email`");
        assert_eq!(Dialect::Sqlite.quote("users.email"), "\"users\".\"email\"");
        assert_eq!(Dialect::MySql.quote("we`ird"), "`we``ird`");
        assert_eq!(Dialect::from_url("sqlite::memory:"), Dialect::Sqlite);
        assert_eq!(Dialect::from_url("mysql://localhost/db"), Dialect::MySql);
    }

    #[test]
    fn test_comparison() {
        let sql = mysql().predicate(&Predicate::compare("users.balance", CompareOp::Gte, 10));
        assert_eq!(sql.sql, "`users`.`balance` >= ?");
        assert_eq!(sql.params, vec![Value::Int(10)]);
    }

    #[test]
    fn test_flat_chain_and_groups() {
        let p = Predicate::eq("a", 1)
            .join(Join::And, Predicate::eq("b", 2))
            .join(
                Join::Or,
                Predicate::Group(Box::new(
                    Predicate::eq("c", 3).join(Join::And, Predicate::is_null("d")),
                )),
            );
        let sql = sqlite().predicate(&p);
        assert_eq!(sql.sql, "\"a\" = ? AND \"b\" = ? OR (\"c\" = ? AND \"d\" IS NULL)");
        assert_eq!(sql.params, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_membership_and_range() {
        let p = Predicate::In {
            column: "id".into(),
            values: vec![Value::Int(1), Value::Int(2)],
            negated: true,
        };
        assert_eq!(mysql().predicate(&p).sql, "`id` NOT IN (?, ?)");
        assert_eq!(mysql().predicate(&Predicate::in_list("id", vec![])).sql, "1 = 0");

        let p = Predicate::Between {
            column: "balance".into(),
            low: Value::Int(50),
            high: Value::Int(150),
            negated: false,
        };
        assert_eq!(mysql().predicate(&p).sql, "`balance` BETWEEN ? AND ?");
    }

    #[test]
    fn test_full_text() {
        let p = Predicate::Match {
            column: "body".into(),
            query: "+rust -go".into(),
            mode: MatchMode::Boolean,
        };
        assert_eq!(mysql().predicate(&p).sql, "MATCH (`body`) AGAINST (? IN BOOLEAN MODE)");

        let fallback = sqlite().predicate(&p);
        assert_eq!(
            fallback.sql,
            "(\"body\" NOT LIKE ? ESCAPE '\\' AND \"body\" LIKE ? ESCAPE '\\')"
        );
        assert_eq!(
            fallback.params,
            vec![Value::Text("%go%".into()), Value::Text("%rust%".into())]
        );

        let words = sqlite().predicate(&Predicate::Match {
            column: "body".into(),
            query: "slow fox".into(),
            mode: MatchMode::Natural,
        });
        assert_eq!(
            words.sql,
            "(\"body\" LIKE ? ESCAPE '\\' OR \"body\" LIKE ? ESCAPE '\\')"
        );
        assert_eq!(words.params, vec![Value::Text("%slow%".into()), Value::Text("%fox%".into())]);
    }

    #[test]
    fn test_select_with_paging() {
        let query = SelectQuery {
            columns: vec!["id".into(), "email".into()],
            filter: Some(Predicate::eq("users.balance", 0)),
            order: vec![("id".into(), SortOrder::Desc)],
            limit: Some(10),
            offset: Some(20),
        };
        let sql = mysql().select(&users(), &query);
        assert_eq!(
            sql.sql,
            "SELECT `id`, `email` FROM `users` WHERE `users`.`balance` = ? ORDER BY `id` DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_insert_follows_schema_order() {
        let row = Row::new().with("email", "a@x.com").with("balance", 1).with("id", 7);
        let sql = sqlite().insert(&users(), &row);
        assert_eq!(sql.sql, "INSERT INTO \"users\" (\"id\", \"email\", \"balance\") VALUES (?, ?, ?)");
        assert_eq!(sql.params, vec![Value::Int(7), Value::Text("a@x.com".into()), Value::Int(1)]);

        assert_eq!(mysql().insert(&users(), &Row::new()).sql, "INSERT INTO `users` () VALUES ()");
        assert_eq!(sqlite().insert(&users(), &Row::new()).sql, "INSERT INTO \"users\" DEFAULT VALUES");
    }

    #[test]
    fn test_group_by_columns_keeps_first_seen_order() {
        let rows = vec![
            Row::new().with("email", "a@x.com").with("balance", 1),
            Row::new().with("email", "b@x.com"),
            Row::new().with("balance", 3).with("email", "c@x.com"),
            Row::new(),
        ];
        let groups = group_by_columns(&rows);

        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
        assert_eq!(groups[0][1].get("email"), Some(&Value::from("c@x.com")));
        assert!(groups[2][0].is_empty());

        let sql = sqlite().insert_rows(&users(), &[rows[0].clone(), rows[2].clone()]);
        assert_eq!(sql.sql, "INSERT INTO \"users\" (\"email\", \"balance\") VALUES (?, ?), (?, ?)");
    }

    #[test]
    fn test_update_and_delete() {
        let changes = Row::new().with("balance", 5);
        let sql = mysql().update(&users(), &Predicate::eq("users.id", 1), &changes);
        assert_eq!(sql.sql, "UPDATE `users` SET `balance` = ? WHERE `users`.`id` = ?");
        assert_eq!(sql.params, vec![Value::Int(5), Value::Int(1)]);

        assert_eq!(mysql().delete(&users(), None).sql, "DELETE FROM `users`");
    }

    #[test]
    fn test_upsert_per_dialect() {
        let upsert = Upsert {
            columns: vec!["id".into(), "email".into(), "balance".into()],
            rows: vec![
                vec![Value::Int(1), Value::Text("a".into()), Value::Int(1)],
                vec![Value::Int(2), Value::Text("b".into()), Value::Int(2)],
            ],
            conflict_columns: vec!["id".into()],
            update_columns: vec!["email".into(), "balance".into()],
        };

        let sql = mysql().upsert(&users(), &upsert);
        assert_eq!(
            sql.sql,
            "INSERT INTO `users` (`id`, `email`, `balance`) VALUES (?, ?, ?), (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `email` = VALUES(`email`), `balance` = VALUES(`balance`)"
        );
        assert_eq!(sql.params.len(), 6);

        let sql = sqlite().upsert(&users(), &upsert);
        assert_eq!(
            sql.sql,
            "INSERT INTO \"users\" (\"id\", \"email\", \"balance\") VALUES (?, ?, ?), (?, ?, ?) \
             ON CONFLICT (\"id\") DO UPDATE SET \"email\" = excluded.\"email\", \"balance\" = excluded.\"balance\""
        );
    }

    #[test]
    fn test_inline_skips_string_literals() {
        let query = SqlQuery {
            sql: "SELECT '?' FROM t WHERE a = ? AND b = ?".into(),
            params: vec![Value::Text("it's".into()), Value::Bytes(vec![0xab])],
        };
        assert_eq!(
            mysql().inline(&query),
            "SELECT '?' FROM t WHERE a = 'it''s' AND b = X'ab'"
        );
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_a\\"), "50\\%\\_a\\\\");
    }
}
