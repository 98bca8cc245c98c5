// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! SQL expressions.
//!
//! [`SqlExpr`] is the output of translation: a small SQL expression tree that
//! renders to text for one dialect family with [`SqlExpr::to_sql`].
//! Rendering is deterministic. Compound expressions are always
//! parenthesized, so the tree never depends on the precedence rules of the
//! target database.

use std::fmt::Write;

use dl_ore::stack::maybe_grow;
use dl_repr::{DialectName, Value};
use itertools::Itertools;

/// A SQL expression.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlExpr {
    /// A column, optionally qualified by a table or subquery alias.
    Column { table: Option<String>, name: String },
    /// A literal, optionally wrapped in a type-defining cast.
    Literal {
        value: Value,
        cast: Option<&'static str>,
    },
    /// `*`, as in `COUNT(*)`.
    Star,
    /// A function call. `distinct` renders `NAME(DISTINCT args)`.
    Call {
        name: String,
        args: Vec<SqlExpr>,
        distinct: bool,
    },
    /// `(left op right)`.
    Binary {
        op: &'static str,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    /// `(op expr)`.
    Prefix { op: &'static str, expr: Box<SqlExpr> },
    /// `(expr op)`.
    Postfix { expr: Box<SqlExpr>, op: &'static str },
    /// `CASE [operand] WHEN .. THEN .. [ELSE ..] END`.
    Case {
        operand: Option<Box<SqlExpr>>,
        whens: Vec<(SqlExpr, SqlExpr)>,
        else_expr: Option<Box<SqlExpr>>,
    },
    /// `CAST(expr AS ty)`.
    Cast { expr: Box<SqlExpr>, ty: &'static str },
    /// `(expr [NOT] IN (list))`.
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
    /// `(expr [NOT] BETWEEN low AND high)`.
    Between {
        expr: Box<SqlExpr>,
        low: Box<SqlExpr>,
        high: Box<SqlExpr>,
        negated: bool,
    },
    /// `EXTRACT(field FROM expr)`.
    Extract { field: &'static str, expr: Box<SqlExpr> },
    /// A time interval of `amount` units.
    Interval { amount: Box<SqlExpr>, unit: String },
    /// The first `length` elements of an array.
    ArraySlice { expr: Box<SqlExpr>, length: usize },
    /// An array constructor.
    Array(Vec<SqlExpr>),
    /// An element of an array, 1-based.
    ArrayElement {
        array: Box<SqlExpr>,
        index: Box<SqlExpr>,
    },
    /// `func OVER (PARTITION BY .. ORDER BY .. frame)`.
    Window {
        func: Box<SqlExpr>,
        partition_by: Vec<SqlExpr>,
        order_by: Vec<SqlExpr>,
        frame: Option<&'static str>,
    },
    /// A descending sort key. Only meaningful in `ORDER BY` lists.
    Desc(Box<SqlExpr>),
}

impl SqlExpr {
    pub fn column(table: Option<&str>, name: &str) -> SqlExpr {
        SqlExpr::Column {
            table: table.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn literal(value: Value) -> SqlExpr {
        SqlExpr::Literal { value, cast: None }
    }

    pub fn null() -> SqlExpr {
        SqlExpr::literal(Value::Null)
    }

    pub fn call(name: &str, args: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::Call {
            name: name.to_string(),
            args,
            distinct: false,
        }
    }

    pub fn binary(op: &'static str, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn prefix(op: &'static str, expr: SqlExpr) -> SqlExpr {
        SqlExpr::Prefix {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn postfix(expr: SqlExpr, op: &'static str) -> SqlExpr {
        SqlExpr::Postfix {
            expr: Box::new(expr),
            op,
        }
    }

    pub fn cast(expr: SqlExpr, ty: &'static str) -> SqlExpr {
        SqlExpr::Cast {
            expr: Box::new(expr),
            ty,
        }
    }

    /// The descending form of this sort key.
    ///
    /// Idempotent: the descending form of a descending key is the key itself.
    pub fn desc(self) -> SqlExpr {
        match self {
            SqlExpr::Desc(_) => self,
            other => SqlExpr::Desc(Box::new(other)),
        }
    }

    /// Strips a descending marker, if any.
    pub fn asc(self) -> SqlExpr {
        match self {
            SqlExpr::Desc(inner) => *inner,
            other => other,
        }
    }

    /// Reports whether this is a literal, possibly cast.
    pub fn is_literal(&self) -> bool {
        matches!(self, SqlExpr::Literal { .. })
    }

    /// Renders the expression as SQL text for the given dialect family.
    pub fn to_sql(&self, dialect: DialectName) -> String {
        let mut out = String::new();
        self.write_sql(dialect, &mut out);
        out
    }

    fn write_sql(&self, dialect: DialectName, out: &mut String) {
        maybe_grow(|| self.write_sql_node(dialect, out))
    }

    fn write_sql_node(&self, dialect: DialectName, out: &mut String) {
        let list = |exprs: &[SqlExpr], out: &mut String| {
            for (i, expr) in exprs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                expr.write_sql(dialect, out);
            }
        };
        match self {
            SqlExpr::Column { table, name } => {
                if let Some(table) = table {
                    out.push_str(&quote_ident(table, dialect));
                    out.push('.');
                }
                out.push_str(&quote_ident(name, dialect));
            }
            SqlExpr::Literal { value, cast: None } => write_literal(value, dialect, out),
            SqlExpr::Literal {
                value,
                cast: Some(ty),
            } => {
                out.push_str("CAST(");
                write_literal(value, dialect, out);
                let _ = write!(out, " AS {})", ty);
            }
            SqlExpr::Star => out.push('*'),
            SqlExpr::Call {
                name,
                args,
                distinct,
            } => {
                out.push_str(name);
                out.push('(');
                if *distinct {
                    out.push_str("DISTINCT ");
                }
                list(args, out);
                out.push(')');
            }
            SqlExpr::Binary { op, left, right } => {
                out.push('(');
                left.write_sql(dialect, out);
                let _ = write!(out, " {} ", op);
                right.write_sql(dialect, out);
                out.push(')');
            }
            SqlExpr::Prefix { op, expr } => {
                let _ = write!(out, "({} ", op);
                expr.write_sql(dialect, out);
                out.push(')');
            }
            SqlExpr::Postfix { expr, op } => {
                out.push('(');
                expr.write_sql(dialect, out);
                let _ = write!(out, " {})", op);
            }
            SqlExpr::Case {
                operand,
                whens,
                else_expr,
            } => {
                out.push_str("CASE");
                if let Some(operand) = operand {
                    out.push(' ');
                    operand.write_sql(dialect, out);
                }
                for (cond, result) in whens {
                    out.push_str(" WHEN ");
                    cond.write_sql(dialect, out);
                    out.push_str(" THEN ");
                    result.write_sql(dialect, out);
                }
                if let Some(else_expr) = else_expr {
                    out.push_str(" ELSE ");
                    else_expr.write_sql(dialect, out);
                }
                out.push_str(" END");
            }
            SqlExpr::Cast { expr, ty } => {
                out.push_str("CAST(");
                expr.write_sql(dialect, out);
                let _ = write!(out, " AS {})", ty);
            }
            SqlExpr::InList {
                expr,
                list: items,
                negated,
            } => {
                out.push('(');
                expr.write_sql(dialect, out);
                out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                list(items, out);
                out.push_str("))");
            }
            SqlExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                out.push('(');
                expr.write_sql(dialect, out);
                out.push_str(if *negated {
                    " NOT BETWEEN "
                } else {
                    " BETWEEN "
                });
                low.write_sql(dialect, out);
                out.push_str(" AND ");
                high.write_sql(dialect, out);
                out.push(')');
            }
            SqlExpr::Extract { field, expr } => {
                let _ = write!(out, "EXTRACT({} FROM ", field);
                expr.write_sql(dialect, out);
                out.push(')');
            }
            SqlExpr::Interval { amount, unit } => match dialect {
                DialectName::Mysql => {
                    out.push_str("INTERVAL ");
                    amount.write_sql(dialect, out);
                    let _ = write!(out, " {}", unit.to_uppercase());
                }
                DialectName::Clickhouse => {
                    let _ = write!(out, "toInterval{}(", capitalize(unit));
                    amount.write_sql(dialect, out);
                    out.push(')');
                }
                DialectName::Postgresql | DialectName::Compeng | DialectName::Sqlite => {
                    out.push('(');
                    amount.write_sql(dialect, out);
                    let _ = write!(out, " * INTERVAL '1 {}')", unit.to_lowercase());
                }
            },
            SqlExpr::ArraySlice { expr, length } => match dialect {
                DialectName::Clickhouse => {
                    out.push_str("arraySlice(");
                    expr.write_sql(dialect, out);
                    let _ = write!(out, ", 1, {})", length);
                }
                _ => {
                    out.push('(');
                    expr.write_sql(dialect, out);
                    let _ = write!(out, ")[1:{}]", length);
                }
            },
            SqlExpr::Array(items) => {
                match dialect {
                    DialectName::Clickhouse => out.push('['),
                    _ => out.push_str("ARRAY["),
                }
                list(items, out);
                out.push(']');
            }
            SqlExpr::ArrayElement { array, index } => match dialect {
                DialectName::Clickhouse => {
                    out.push_str("arrayElement(");
                    array.write_sql(dialect, out);
                    out.push_str(", ");
                    index.write_sql(dialect, out);
                    out.push(')');
                }
                _ => {
                    out.push('(');
                    array.write_sql(dialect, out);
                    out.push_str(")[");
                    index.write_sql(dialect, out);
                    out.push(']');
                }
            },
            SqlExpr::Window {
                func,
                partition_by,
                order_by,
                frame,
            } => {
                func.write_sql(dialect, out);
                out.push_str(" OVER (");
                let mut clauses = vec![];
                if !partition_by.is_empty() {
                    let mut clause = String::from("PARTITION BY ");
                    list(partition_by, &mut clause);
                    clauses.push(clause);
                }
                if !order_by.is_empty() {
                    let mut clause = String::from("ORDER BY ");
                    list(order_by, &mut clause);
                    clauses.push(clause);
                }
                if let Some(frame) = frame {
                    clauses.push(frame.to_string());
                }
                out.push_str(&clauses.join(" "));
                out.push(')');
            }
            SqlExpr::Desc(inner) => {
                inner.write_sql(dialect, out);
                out.push_str(" DESC");
            }
        }
    }
}

/// Quotes an identifier for the given dialect family, doubling any quote
/// characters inside it.
pub fn quote_ident(name: &str, dialect: DialectName) -> String {
    let quote = dialect.ident_quote();
    let mut out = String::with_capacity(name.len() + 2);
    out.push(quote);
    for c in name.chars() {
        if c == quote {
            out.push(quote);
        }
        out.push(c);
    }
    out.push(quote);
    out
}

fn quote_string(s: &str, dialect: DialectName) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if matches!(dialect, DialectName::Mysql | DialectName::Clickhouse) => {
                out.push_str("\\\\")
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn write_literal(value: &Value, dialect: DialectName, out: &mut String) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(b) => match dialect {
            DialectName::Sqlite => out.push_str(if *b { "1" } else { "0" }),
            _ => out.push_str(if *b { "TRUE" } else { "FALSE" }),
        },
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) => {
            let _ = write!(out, "{}", Value::Float(*f));
        }
        Value::String(s) => out.push_str(&quote_string(s, dialect)),
        Value::Date(d) => {
            let text = quote_string(&d.format("%Y-%m-%d").to_string(), dialect);
            match dialect {
                DialectName::Clickhouse => {
                    let _ = write!(out, "toDate({})", text);
                }
                DialectName::Sqlite => out.push_str(&text),
                _ => {
                    let _ = write!(out, "DATE {}", text);
                }
            }
        }
        Value::Datetime(dt) => {
            let text = quote_string(&dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(), dialect);
            match dialect {
                DialectName::Clickhouse => {
                    let _ = write!(out, "toDateTime({})", text);
                }
                DialectName::Sqlite => out.push_str(&text),
                _ => {
                    let _ = write!(out, "TIMESTAMP {}", text);
                }
            }
        }
        Value::Array(items) => {
            let items = items.iter().map(|item| {
                let mut s = String::new();
                write_literal(item, dialect, &mut s);
                s
            });
            match dialect {
                DialectName::Clickhouse => {
                    let _ = write!(out, "[{}]", items.format(", "));
                }
                _ => {
                    let _ = write!(out, "ARRAY[{}]", items.format(", "));
                }
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn desc_is_idempotent() {
        let col = SqlExpr::column(None, "a");
        let once = col.clone().desc();
        let twice = once.clone().desc();
        assert_eq!(once, twice);
        assert_eq!(twice.to_sql(DialectName::Postgresql), "\"a\" DESC");
        assert_eq!(once.asc(), col);
    }

    #[test]
    fn literals_per_dialect() {
        let date = SqlExpr::literal(Value::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()));
        assert_eq!(date.to_sql(DialectName::Postgresql), "DATE '2020-01-02'");
        assert_eq!(date.to_sql(DialectName::Clickhouse), "toDate('2020-01-02')");
        assert_eq!(date.to_sql(DialectName::Sqlite), "'2020-01-02'");
        let s = SqlExpr::literal(Value::String("it's \\".into()));
        assert_eq!(s.to_sql(DialectName::Postgresql), "'it''s \\'");
        assert_eq!(s.to_sql(DialectName::Mysql), "'it''s \\\\'");
        let b = SqlExpr::literal(Value::Bool(true));
        assert_eq!(b.to_sql(DialectName::Sqlite), "1");
        let cast = SqlExpr::Literal {
            value: Value::Int(1),
            cast: Some("SMALLINT"),
        };
        assert_eq!(cast.to_sql(DialectName::Compeng), "CAST(1 AS SMALLINT)");
    }

    #[test]
    fn identifiers() {
        let col = SqlExpr::column(Some("t"), "we\"ird");
        assert_eq!(col.to_sql(DialectName::Postgresql), "\"t\".\"we\"\"ird\"");
        assert_eq!(col.to_sql(DialectName::Mysql), "`t`.`we\"ird`");
    }

    #[test]
    fn window() {
        let expr = SqlExpr::Window {
            func: Box::new(SqlExpr::call("SUM", vec![SqlExpr::column(None, "x")])),
            partition_by: vec![SqlExpr::column(None, "city")],
            order_by: vec![SqlExpr::column(None, "d").desc()],
            frame: Some("ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW"),
        };
        assert_eq!(
            expr.to_sql(DialectName::Postgresql),
            "SUM(\"x\") OVER (PARTITION BY \"city\" ORDER BY \"d\" DESC \
             ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW)"
        );
        let total = SqlExpr::Window {
            func: Box::new(SqlExpr::call("COUNT", vec![SqlExpr::Star])),
            partition_by: vec![],
            order_by: vec![],
            frame: None,
        };
        assert_eq!(total.to_sql(DialectName::Clickhouse), "COUNT(*) OVER ()");
    }

    #[test]
    fn intervals_and_arrays() {
        let interval = SqlExpr::Interval {
            amount: Box::new(SqlExpr::literal(Value::Int(3))),
            unit: "day".into(),
        };
        assert_eq!(interval.to_sql(DialectName::Postgresql), "(3 * INTERVAL '1 day')");
        assert_eq!(interval.to_sql(DialectName::Mysql), "INTERVAL 3 DAY");
        assert_eq!(interval.to_sql(DialectName::Clickhouse), "toIntervalDay(3)");
        let slice = SqlExpr::ArraySlice {
            expr: Box::new(SqlExpr::column(None, "path")),
            length: 2,
        };
        assert_eq!(slice.to_sql(DialectName::Postgresql), "(\"path\")[1:2]");
        assert_eq!(slice.to_sql(DialectName::Clickhouse), "arraySlice(`path`, 1, 2)");
    }
}
