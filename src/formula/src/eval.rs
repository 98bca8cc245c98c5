// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Compile-time evaluation of calls with constant arguments.
//!
//! [`eval`] returns `None` whenever the result would depend on the target
//! database: division by zero, integer overflow, `NULL` handling that
//! differs between dialects, and anything that depends on string collation
//! or locale (ordering of strings, substring search, case mapping outside
//! ASCII). Such calls are left for the database to compute.

use std::cmp::Ordering;

use chrono::{Datelike, Duration, NaiveDateTime};
use dl_repr::Value;
use md5::{Digest, Md5};

/// Evaluates the function `name` on constant arguments.
pub fn eval(name: &str, args: &[Value]) -> Option<Value> {
    use Value::*;

    match (name, args) {
        ("+", [Int(a), Int(b)]) => a.checked_add(*b).map(Int),
        ("-", [Int(a), Int(b)]) => a.checked_sub(*b).map(Int),
        ("*", [Int(a), Int(b)]) => a.checked_mul(*b).map(Int),
        ("%", [Int(a), Int(b)]) => a.checked_rem(*b).map(Int),
        ("+", [String(a), String(b)]) => Some(String(format!("{}{}", a, b))),
        ("+" | "-" | "*", [a, b]) => {
            let (a, b) = (a.as_f64()?, b.as_f64()?);
            let out = match name {
                "+" => a + b,
                "-" => a - b,
                _ => a * b,
            };
            finite(out)
        }
        ("/", [a, b]) => {
            let (a, b) = (a.as_f64()?, b.as_f64()?);
            if b == 0.0 {
                return None;
            }
            finite(a / b)
        }
        ("^" | "power", [a, b]) => finite(a.as_f64()?.powf(b.as_f64()?)),
        ("neg", [Int(a)]) => a.checked_neg().map(Int),
        ("neg", [Float(a)]) => Some(Float(-a)),
        ("abs", [Int(a)]) => a.checked_abs().map(Int),
        ("abs", [Float(a)]) => Some(Float(a.abs())),
        ("floor", [Int(a)]) | ("ceiling", [Int(a)]) => Some(Int(*a)),
        ("floor", [Float(a)]) => Some(Float(a.floor())),
        ("ceiling", [Float(a)]) => Some(Float(a.ceil())),
        ("sqrt", [a]) => {
            let a = a.as_f64()?;
            if a < 0.0 {
                return None;
            }
            Some(Float(a.sqrt()))
        }

        ("==" | "!=" | "<" | "<=" | ">" | ">=", [a, b]) => {
            if a.is_null() || b.is_null() {
                return Some(Null);
            }
            let ord = match name {
                "==" | "!=" => compare(a, b)?,
                _ => compare_ordered(a, b)?,
            };
            let out = match name {
                "==" => ord == Ordering::Equal,
                "!=" => ord != Ordering::Equal,
                "<" => ord == Ordering::Less,
                "<=" => ord != Ordering::Greater,
                ">" => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Some(Bool(out))
        }
        ("and", [a, b]) => match (truth(a)?, truth(b)?) {
            (Some(false), _) | (_, Some(false)) => Some(Bool(false)),
            (Some(true), Some(true)) => Some(Bool(true)),
            _ => Some(Null),
        },
        ("or", [a, b]) => match (truth(a)?, truth(b)?) {
            (Some(true), _) | (_, Some(true)) => Some(Bool(true)),
            (Some(false), Some(false)) => Some(Bool(false)),
            _ => Some(Null),
        },
        ("not", [a]) => Some(truth(a)?.map(|b| Bool(!b)).unwrap_or(Null)),
        ("isnull", [a]) => Some(Bool(a.is_null())),
        ("istrue", [a]) => Some(Bool(truth(a)? == Some(true))),
        ("isfalse", [a]) => Some(Bool(truth(a)? == Some(false))),
        ("in" | "notin", [needle, list @ ..]) => {
            if needle.is_null() {
                return Some(Null);
            }
            let mut saw_null = false;
            for item in list {
                if item.is_null() {
                    saw_null = true;
                } else if compare(needle, item)? == Ordering::Equal {
                    return Some(Bool(name == "in"));
                }
            }
            if saw_null {
                Some(Null)
            } else {
                Some(Bool(name == "notin"))
            }
        }
        ("between" | "notbetween", [x, low, high]) => {
            if x.is_null() || low.is_null() || high.is_null() {
                return Some(Null);
            }
            let inside = compare_ordered(x, low)? != Ordering::Less
                && compare_ordered(x, high)? != Ordering::Greater;
            Some(Bool(inside == (name == "between")))
        }

        ("concat", args) => {
            let mut out = std::string::String::new();
            for arg in args {
                match arg {
                    String(s) => out.push_str(s),
                    Int(i) => out.push_str(&i.to_string()),
                    _ => return None,
                }
            }
            Some(String(out))
        }
        ("upper", [String(s)]) if s.is_ascii() => Some(String(s.to_ascii_uppercase())),
        ("lower", [String(s)]) if s.is_ascii() => Some(String(s.to_ascii_lowercase())),
        ("len", [String(s)]) => Some(Int(i64::try_from(s.chars().count()).ok()?)),
        ("len", [Array(items)]) => Some(Int(i64::try_from(items.len()).ok()?)),
        ("left", [String(s), Int(n)]) if *n >= 0 => {
            Some(String(s.chars().take(usize::try_from(*n).ok()?).collect()))
        }
        ("right", [String(s), Int(n)]) if *n > 0 => {
            let n = usize::try_from(*n).ok()?;
            let len = s.chars().count();
            Some(String(s.chars().skip(len.saturating_sub(n)).collect()))
        }
        ("substr", [String(s), Int(start), rest @ ..]) if *start >= 1 => {
            let skip = usize::try_from(start - 1).ok()?;
            let chars = s.chars().skip(skip);
            match rest {
                [] => Some(String(chars.collect())),
                [Int(len)] if *len >= 0 => {
                    Some(String(chars.take(usize::try_from(*len).ok()?).collect()))
                }
                _ => None,
            }
        }
        ("replace", [String(s), String(from), String(to)]) if !from.is_empty() => {
            Some(String(s.replace(from.as_str(), to)))
        }
        ("trim", [String(s)]) => Some(String(s.trim_matches(' ').to_string())),
        ("md5", [String(s)]) => Some(String(md5_upper_hex(s))),

        ("year", [Date(d)]) => Some(Int(i64::from(d.year()))),
        ("year", [Datetime(dt)]) => Some(Int(i64::from(dt.year()))),
        ("month", [Date(d)]) => Some(Int(i64::from(d.month()))),
        ("month", [Datetime(dt)]) => Some(Int(i64::from(dt.month()))),
        ("day", [Date(d)]) => Some(Int(i64::from(d.day()))),
        ("day", [Datetime(dt)]) => Some(Int(i64::from(dt.day()))),
        ("dateadd", [date, Int(n)]) => add_days(date, *n),
        ("dateadd", [date, String(unit), Int(n)]) => match unit.to_lowercase().as_str() {
            "day" => add_days(date, *n),
            "week" => add_days(date, n.checked_mul(7)?),
            "second" | "minute" | "hour" => {
                let Datetime(dt) = date else {
                    return None;
                };
                let delta = match unit.to_lowercase().as_str() {
                    "second" => Duration::try_seconds(*n)?,
                    "minute" => Duration::try_minutes(*n)?,
                    _ => Duration::try_hours(*n)?,
                };
                dt.checked_add_signed(delta).map(Datetime)
            }
            _ => None,
        },

        ("int", [Int(i)]) => Some(Int(*i)),
        ("int", [Bool(b)]) => Some(Int(i64::from(*b))),
        ("float", [Int(i)]) => Some(Float(*i as f64)),
        ("float", [Float(f)]) => Some(Float(*f)),
        ("str", [String(s)]) => Some(String(s.clone())),
        ("str", [Int(i)]) => Some(String(i.to_string())),
        ("bool", [Bool(b)]) => Some(Bool(*b)),
        ("bool", [Int(i)]) => Some(Bool(*i != 0)),

        ("bold", [String(s)]) => Some(String(markup_node("b", &[s]))),
        ("italic", [String(s)]) => Some(String(markup_node("i", &[s]))),
        ("url", [String(addr)]) => Some(String(markup_node("a", &[addr, addr]))),
        ("url", [String(addr), String(text)]) => {
            Some(String(markup_node("a", &[addr, text])))
        }

        ("arr_str" | "arr_int", items) => Some(Array(items.to_vec())),
        ("get_item", [Array(items), Int(i)]) if *i >= 1 => {
            items.get(usize::try_from(i - 1).ok()?).cloned()
        }
        _ => None,
    }
}

fn finite(f: f64) -> Option<Value> {
    f.is_finite().then_some(Value::Float(f))
}

/// The truth value of a boolean, `None` for `NULL`, failing for
/// non-booleans.
fn truth(v: &Value) -> Option<Option<bool>> {
    match v {
        Value::Bool(b) => Some(Some(*b)),
        Value::Null => Some(None),
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Datetime(a), Value::Datetime(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Datetime(b)) => Some(midnight(a).cmp(b)),
        (Value::Datetime(a), Value::Date(b)) => Some(a.cmp(&midnight(b))),
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Like [`compare`], but strings do not order: their order is the
/// database's collation.
fn compare_ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => None,
        (a, b) => compare(a, b),
    }
}

fn midnight(d: &chrono::NaiveDate) -> NaiveDateTime {
    d.and_time(chrono::NaiveTime::MIN)
}

fn add_days(date: &Value, n: i64) -> Option<Value> {
    let delta = Duration::try_days(n)?;
    match date {
        Value::Date(d) => d.checked_add_signed(delta).map(Value::Date),
        Value::Datetime(dt) => dt.checked_add_signed(delta).map(Value::Datetime),
        _ => None,
    }
}

/// The uppercase hexadecimal MD5 digest of a string.
pub fn md5_upper_hex(s: &str) -> String {
    let digest = Md5::digest(s.as_bytes());
    digest.iter().map(|b| format!("{:02X}", b)).collect()
}

fn markup_node(node: &str, args: &[&String]) -> String {
    let mut out = format!("({}", node);
    for arg in args {
        out.push_str(" \"");
        out.push_str(&arg.replace('"', "\"\""));
        out.push('"');
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn md5_digest() {
        assert_eq!(
            eval("md5", &[Value::String("DataLens".into())]),
            Some(Value::String("C1FD5D9E4189FB89C1021A72F7E06C00".into()))
        );
    }

    #[test]
    fn arithmetic() {
        use Value::*;
        let cases = [
            ("+", vec![Int(1), Int(2)], Some(Int(3))),
            ("+", vec![Int(1), Float(0.5)], Some(Float(1.5))),
            ("/", vec![Int(1), Int(2)], Some(Float(0.5))),
            ("/", vec![Int(1), Int(0)], None),
            ("+", vec![Int(i64::MAX), Int(1)], None),
            ("%", vec![Int(7), Int(0)], None),
            ("neg", vec![Int(5)], Some(Int(-5))),
            ("sqrt", vec![Int(-1)], None),
        ];
        for (name, args, expected) in cases {
            assert_eq!(eval(name, &args), expected, "{}({:?})", name, args);
        }
    }

    #[test]
    fn three_valued_logic() {
        use Value::*;
        assert_eq!(eval("and", &[Null, Bool(false)]), Some(Bool(false)));
        assert_eq!(eval("and", &[Null, Bool(true)]), Some(Null));
        assert_eq!(eval("or", &[Null, Bool(true)]), Some(Bool(true)));
        assert_eq!(eval("not", &[Null]), Some(Null));
        assert_eq!(eval("in", &[Int(1), Int(2), Null]), Some(Null));
        assert_eq!(eval("in", &[Int(2), Int(2), Null]), Some(Bool(true)));
        assert_eq!(eval("notin", &[Int(3), Int(2)]), Some(Bool(true)));
        assert_eq!(eval("==", &[Int(1), Null]), Some(Null));
        assert_eq!(eval("and", &[Int(1), Bool(true)]), None);
    }

    #[test]
    fn strings_and_dates() {
        use Value::*;
        let s = |s: &str| String(s.into());
        assert_eq!(eval("left", &[s("héllo"), Int(2)]), Some(s("hé")));
        assert_eq!(eval("right", &[s("héllo"), Int(3)]), Some(s("llo")));
        assert_eq!(eval("substr", &[s("hello"), Int(2), Int(3)]), Some(s("ell")));
        assert_eq!(eval("concat", &[s("a"), Int(1)]), Some(s("a1")));
        assert_eq!(eval("concat", &[s("a"), Null]), None);
        assert_eq!(eval("bold", &[s("say \"hi\"")]), Some(s("(b \"say \"\"hi\"\"\")")));
        let d = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        assert_eq!(eval("year", &[Date(d)]), Some(Int(2024)));
        assert_eq!(
            eval("dateadd", &[Date(d), s("week"), Int(1)]),
            Some(Date(NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()))
        );
        assert_eq!(eval("dateadd", &[Date(d), s("month"), Int(1)]), None);
    }

    #[test]
    fn collation_is_left_to_the_database() {
        use Value::*;
        let s = |s: &str| String(s.into());
        assert_eq!(eval("<", &[s("a"), s("B")]), None);
        assert_eq!(eval(">=", &[s("a"), s("a")]), None);
        assert_eq!(eval("between", &[s("b"), s("a"), s("c")]), None);
        assert_eq!(eval("contains", &[s("ABC"), s("b")]), None);
        assert_eq!(eval("startswith", &[s("ABC"), s("a")]), None);
        assert_eq!(eval("upper", &[s("straße")]), None);
        assert_eq!(eval("lower", &[s("ÀB")]), None);

        assert_eq!(eval("upper", &[s("abc")]), Some(s("ABC")));
        assert_eq!(eval("==", &[s("a"), s("a")]), Some(Bool(true)));
        assert_eq!(eval("<", &[Int(1), Float(1.5)]), Some(Bool(true)));
        assert_eq!(eval("in", &[s("a"), s("b"), s("a")]), Some(Bool(true)));
    }
}
