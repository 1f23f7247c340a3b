//! Conversion between PostgreSQL values and `UniversalValue`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sync_core::UniversalValue;
use sync_store::{StoreError, StoreResult};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;
use tracing::warn;

/// Boxed statement parameter.
pub type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Quote an identifier for use in generated SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Convert the value at `index` of a row to a `UniversalValue`.
pub fn convert_postgres_value(row: &Row, index: usize) -> StoreResult<UniversalValue> {
    let column = &row.columns()[index];
    let name = column.name();
    let pg_type = column.type_();
    let read_err = |e: tokio_postgres::Error| StoreError::conversion(name, e);

    let value: UniversalValue = match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(index)
            .map_err(read_err)?
            .into(),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map_err(read_err)?
            .map(i64::from)
            .into(),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map_err(read_err)?
            .map(i64::from)
            .into(),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(index)
            .map_err(read_err)?
            .into(),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .map_err(read_err)?
            .map(f64::from)
            .into(),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(index)
            .map_err(read_err)?
            .into(),
        Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(index).map_err(read_err)? {
            Some(decimal) => decimal_to_value(name, decimal)?,
            None => UniversalValue::Null,
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(index)
            .map_err(read_err)?
            .into(),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map_err(read_err)?
            .map(|ts| DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc))
            .into(),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map_err(read_err)?
            .into(),
        Type::DATE => match row.try_get::<_, Option<NaiveDate>>(index).map_err(read_err)? {
            Some(date) => {
                let midnight = date
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| StoreError::conversion(name, "invalid date"))?;
                UniversalValue::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(
                    midnight, Utc,
                ))
            }
            None => UniversalValue::Null,
        },
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(index)
            .map_err(read_err)?
            .map(|t| t.to_string())
            .into(),
        Type::JSON | Type::JSONB => {
            match row
                .try_get::<_, Option<serde_json::Value>>(index)
                .map_err(read_err)?
            {
                Some(json) => UniversalValue::from_json(json),
                None => UniversalValue::Null,
            }
        }
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(index)
            .map_err(read_err)?
            .map(|u| u.to_string())
            .into(),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(index)
            .map_err(read_err)?
            .into(),
        _ => match row.try_get::<_, Option<String>>(index) {
            Ok(text) => text.into(),
            Err(e) => {
                warn!("Column '{name}' has unsupported type {pg_type}, reading it as null: {e}");
                UniversalValue::Null
            }
        },
    };
    Ok(value)
}

/// Convert every column of a row.
pub(crate) fn convert_row(row: &Row) -> StoreResult<sync_core::Row> {
    let mut converted = sync_core::Row::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        converted.insert(column.name().to_string(), convert_postgres_value(row, i)?);
    }
    Ok(converted)
}

fn decimal_to_value(column: &str, decimal: Decimal) -> StoreResult<UniversalValue> {
    if decimal.scale() == 0 {
        if let Some(i) = decimal.to_i64() {
            return Ok(UniversalValue::Int(i));
        }
    }
    decimal
        .to_f64()
        .map(UniversalValue::Float)
        .ok_or_else(|| StoreError::conversion(column, format!("NUMERIC {decimal} out of range")))
}

/// Convert a value into a statement parameter of the given PostgreSQL type.
///
/// Nulls become a typed `None` so the server accepts them for any column.
pub fn to_sql_param(column: &str, value: &UniversalValue, ty: &Type) -> StoreResult<SqlParam> {
    let mismatch = || {
        StoreError::conversion(
            column,
            format!("cannot write {} value as {ty}", value.kind()),
        )
    };

    let param: SqlParam = match *ty {
        Type::BOOL => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(other.as_bool().ok_or_else(mismatch)?),
        }),
        Type::INT2 => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(
                other
                    .as_i64()
                    .and_then(|i| i16::try_from(i).ok())
                    .ok_or_else(mismatch)?,
            ),
        }),
        Type::INT4 => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(
                other
                    .as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .ok_or_else(mismatch)?,
            ),
        }),
        Type::INT8 => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(other.as_i64().ok_or_else(mismatch)?),
        }),
        Type::FLOAT4 => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(other.as_f64().ok_or_else(mismatch)? as f32),
        }),
        Type::FLOAT8 => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(other.as_f64().ok_or_else(mismatch)?),
        }),
        Type::NUMERIC => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Int(i) => Some(Decimal::from(*i)),
            UniversalValue::Float(f) => Some(Decimal::try_from(*f).map_err(|_| mismatch())?),
            UniversalValue::String(s) => Some(s.parse::<Decimal>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::String(s) => Some(s.clone()),
            UniversalValue::Bytes(b) => {
                Some(String::from_utf8(b.clone()).map_err(|_| mismatch())?)
            }
            other => Some(other.to_string()),
        }),
        Type::TIMESTAMPTZ => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(timestamp_of(other).ok_or_else(mismatch)?),
        }),
        Type::TIMESTAMP => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(timestamp_of(other).ok_or_else(mismatch)?.naive_utc()),
        }),
        Type::DATE => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::String(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(_) => Some(timestamp_of(value).ok_or_else(mismatch)?.date_naive()),
            },
            other => Some(timestamp_of(other).ok_or_else(mismatch)?.date_naive()),
        }),
        Type::JSON | Type::JSONB => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(other.to_json()),
        }),
        Type::UUID => Box::new(match value {
            UniversalValue::Null => None,
            other => Some(
                other
                    .as_str()
                    .and_then(|s| uuid::Uuid::parse_str(s).ok())
                    .ok_or_else(mismatch)?,
            ),
        }),
        Type::BYTEA => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Bytes(b) => Some(b.clone()),
            UniversalValue::String(s) => Some(s.as_bytes().to_vec()),
            _ => return Err(mismatch()),
        }),
        _ => {
            return Err(StoreError::conversion(
                column,
                format!("unsupported PostgreSQL type: {ty}"),
            ))
        }
    };
    Ok(param)
}

fn timestamp_of(value: &UniversalValue) -> Option<DateTime<Utc>> {
    match value {
        UniversalValue::Timestamp(ts) => Some(*ts),
        UniversalValue::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("film"), "\"film\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_param_accepts_matching_kinds() {
        assert!(to_sql_param("c", &UniversalValue::Int(7), &Type::INT4).is_ok());
        assert!(to_sql_param("c", &UniversalValue::Float(7.0), &Type::INT8).is_ok());
        assert!(to_sql_param("c", &UniversalValue::Int(7), &Type::TEXT).is_ok());
        assert!(to_sql_param("c", &UniversalValue::from("1.25"), &Type::NUMERIC).is_ok());
        assert!(
            to_sql_param("c", &UniversalValue::from("2024-01-02"), &Type::DATE).is_ok()
        );
        assert!(to_sql_param(
            "c",
            &UniversalValue::from("2024-01-02T03:04:05Z"),
            &Type::TIMESTAMPTZ
        )
        .is_ok());
    }

    #[test]
    fn test_null_param_for_any_type() {
        for ty in [Type::BOOL, Type::INT4, Type::TEXT, Type::UUID, Type::BYTEA] {
            assert!(to_sql_param("c", &UniversalValue::Null, &ty).is_ok());
        }
    }

    #[test]
    fn test_param_rejects_mismatch() {
        let err = to_sql_param("year", &UniversalValue::from("abc"), &Type::INT4)
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "cannot convert value of column 'year': cannot write string value as int4"
        );
        assert!(to_sql_param("c", &UniversalValue::Int(70_000), &Type::INT2).is_err());
        assert!(to_sql_param("c", &UniversalValue::from("nope"), &Type::UUID).is_err());
    }

    #[test]
    fn test_decimal_to_value() {
        assert_eq!(
            decimal_to_value("c", Decimal::from(42)).unwrap(),
            UniversalValue::Int(42)
        );
        assert_eq!(
            decimal_to_value("c", Decimal::new(125, 2)).unwrap(),
            UniversalValue::Float(1.25)
        );
    }
}
