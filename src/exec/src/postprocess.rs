// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Conversion of result rows into their wire form.

use chrono::{NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;
use dl_repr::{DataType, DataTypeParams, Row, Value};
use serde_json::Value as JsonValue;

use crate::error::ExecutionError;
use crate::markup;

/// The type of a result column, as declared by the field it selects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnTypeInfo {
    pub data_type: DataType,
    pub params: DataTypeParams,
}

impl ColumnTypeInfo {
    pub fn new(data_type: DataType) -> ColumnTypeInfo {
        ColumnTypeInfo {
            data_type,
            params: DataTypeParams::default(),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Converts every cell of `rows` into the wire form of its column's type.
///
/// Rows keep their order, and `NULL` stays `null` whatever the type.
pub fn postprocess(
    rows: Vec<Row>,
    columns: &[ColumnTypeInfo],
) -> Result<Vec<Vec<JsonValue>>, ExecutionError> {
    let converters = columns
        .iter()
        .enumerate()
        .map(|(i, c)| Converter::new(i, c))
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|row| {
            if row.len() != converters.len() {
                return Err(ExecutionError::Internal(format!(
                    "row has {} cells but the result has {} columns",
                    row.len(),
                    converters.len()
                )));
            }
            row.into_iter()
                .zip(&converters)
                .map(|(value, converter)| converter.convert(value))
                .collect()
        })
        .collect()
}

struct Converter {
    column: usize,
    data_type: DataType,
    timezone: Option<Tz>,
}

impl Converter {
    fn new(column: usize, info: &ColumnTypeInfo) -> Result<Converter, ExecutionError> {
        let data_type = info.data_type.non_const();
        let timezone = match (&data_type, &info.params.timezone) {
            (DataType::DatetimeTz, Some(name)) => Some(name.parse::<Tz>().map_err(|_| {
                ExecutionError::Postprocess {
                    column,
                    message: format!("unknown timezone {}", name),
                }
            })?),
            _ => None,
        };
        Ok(Converter {
            column,
            data_type,
            timezone,
        })
    }

    fn error(&self, message: impl Into<String>) -> ExecutionError {
        ExecutionError::Postprocess {
            column: self.column,
            message: message.into(),
        }
    }

    fn convert(&self, value: Value) -> Result<JsonValue, ExecutionError> {
        if value.is_null() {
            return Ok(JsonValue::Null);
        }
        match self.data_type {
            DataType::Date => match value {
                Value::Date(d) => Ok(d.format("%Y-%m-%d").to_string().into()),
                Value::Datetime(dt) => Ok(dt.date().format("%Y-%m-%d").to_string().into()),
                other => Ok(other.to_string().into()),
            },
            DataType::Datetime | DataType::GenericDatetime => {
                Ok(iso_format(&self.datetime(value)?).into())
            }
            DataType::DatetimeTz => {
                let dt = self.datetime(value)?;
                let formatted = match self.timezone {
                    Some(tz) => {
                        let local = tz.from_utc_datetime(&dt);
                        format!("{}{}", iso_format(&local.naive_local()), local.format("%:z"))
                    }
                    None => format!("{}+00:00", iso_format(&dt)),
                };
                Ok(formatted.into())
            }
            DataType::Geopoint | DataType::Geopolygon => match value {
                Value::String(s) => match serde_json::from_str(&s) {
                    Ok(json @ JsonValue::Array(_)) => Ok(json),
                    _ => Err(self.error(format!("{} is not a coordinate array", s))),
                },
                Value::Array(items) => Ok(JsonValue::Array(items.iter().map(plain_json).collect())),
                other => Err(self.error(format!("{} is not a coordinate array", other))),
            },
            DataType::Markup => match value {
                Value::String(s) => {
                    markup::parse_and_verbalize(&s).map_err(|e| self.error(e.to_string()))
                }
                other => Err(self.error(format!("{} is not serialized markup", other))),
            },
            DataType::ArrayInt | DataType::ArrayFloat | DataType::ArrayStr | DataType::TreeStr => {
                match value {
                    // Already JSON text.
                    Value::String(s) => Ok(s.into()),
                    other => Ok(plain_json(&other).to_string().into()),
                }
            }
            _ => Ok(value.to_string().into()),
        }
    }

    fn datetime(&self, value: Value) -> Result<NaiveDateTime, ExecutionError> {
        match value {
            Value::Datetime(dt) => Ok(dt),
            Value::Date(d) => Ok(d.and_time(Default::default())),
            Value::String(s) => DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(&s, f).ok())
                .ok_or_else(|| self.error(format!("{} is not a datetime", s))),
            other => Err(self.error(format!("{} is not a datetime", other))),
        }
    }
}

/// `YYYY-MM-DDTHH:MM:SS`, with microseconds only when they are not zero.
fn iso_format(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn plain_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        Value::String(s) => s.clone().into(),
        Value::Date(_) | Value::Datetime(_) => value.to_string().into(),
        Value::Array(items) => JsonValue::Array(items.iter().map(plain_json).collect()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn dt(h: u32, micros: u32) -> Value {
        Value::Datetime(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_micro_opt(h, 30, 0, micros)
                .unwrap(),
        )
    }

    #[test]
    fn temporal() {
        let moscow = ColumnTypeInfo {
            data_type: DataType::DatetimeTz,
            params: DataTypeParams {
                timezone: Some("Europe/Moscow".into()),
            },
        };
        let columns = [
            ColumnTypeInfo::new(DataType::Datetime),
            ColumnTypeInfo::new(DataType::ConstGenericDatetime),
            ColumnTypeInfo::new(DataType::Date),
            moscow,
            ColumnTypeInfo::new(DataType::DatetimeTz),
        ];
        let rows = vec![vec![
            dt(10, 0),
            dt(10, 1500),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            Value::String("2024-03-01 21:30:00".into()),
            dt(10, 0),
        ]];
        assert_eq!(
            postprocess(rows, &columns).unwrap(),
            vec![vec![
                json!("2024-03-01T10:30:00"),
                json!("2024-03-01T10:30:00.001500"),
                json!("2024-03-01"),
                json!("2024-03-02T00:30:00+03:00"),
                json!("2024-03-01T10:30:00+00:00"),
            ]]
        );
    }

    #[test]
    fn structured() {
        let columns = [
            ColumnTypeInfo::new(DataType::Geopoint),
            ColumnTypeInfo::new(DataType::Geopoint),
            ColumnTypeInfo::new(DataType::Markup),
            ColumnTypeInfo::new(DataType::ArrayStr),
            ColumnTypeInfo::new(DataType::TreeStr),
        ];
        let rows = vec![
            vec![
                Value::String("[55.75, 37.61]".into()),
                Value::Array(vec![Value::Float(59.93), Value::Float(30.31)]),
                Value::String(r#"(b "Москва")"#.into()),
                Value::Array(vec![Value::String("Ёж".into()), Value::Null]),
                Value::String(r#"["a","b"]"#.into()),
            ],
            vec![Value::Null, Value::Null, Value::Null, Value::Null, Value::Null],
        ];
        let rows = postprocess(rows, &columns).unwrap();
        assert_eq!(
            rows[0],
            vec![
                json!([55.75, 37.61]),
                json!([59.93, 30.31]),
                json!({"type": "bold", "content": {"type": "text", "content": "Москва"}}),
                json!(r#"["Ёж",null]"#),
                json!(r#"["a","b"]"#),
            ]
        );
        assert!(rows[1].iter().all(|v| v.is_null()));
    }

    #[test]
    fn plain() {
        let columns = [
            ColumnTypeInfo::new(DataType::Integer),
            ColumnTypeInfo::new(DataType::Float),
            ColumnTypeInfo::new(DataType::Boolean),
            ColumnTypeInfo::new(DataType::String),
        ];
        let rows = vec![vec![
            Value::Int(7),
            Value::Float(2.0),
            Value::Bool(true),
            Value::String("x".into()),
        ]];
        assert_eq!(
            postprocess(rows, &columns).unwrap(),
            vec![vec![json!("7"), json!("2.0"), json!("true"), json!("x")]]
        );
    }

    #[test]
    fn failures() {
        let err = postprocess(
            vec![vec![Value::String(r#"(blink "x")"#.into())]],
            &[ColumnTypeInfo::new(DataType::Markup)],
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Postprocess { column: 0, .. }), "{:?}", err);

        let err = postprocess(
            vec![vec![Value::Int(1), Value::String("oops".into())]],
            &[
                ColumnTypeInfo::new(DataType::Integer),
                ColumnTypeInfo::new(DataType::Datetime),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Postprocess { column: 1, .. }), "{:?}", err);

        let bad_tz = ColumnTypeInfo {
            data_type: DataType::DatetimeTz,
            params: DataTypeParams {
                timezone: Some("Mars/Olympus".into()),
            },
        };
        assert!(postprocess(vec![], &[bad_tz]).is_err());
    }
}
