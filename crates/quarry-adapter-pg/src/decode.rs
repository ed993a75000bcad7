//! Row decoding, directed by each column's Postgres type.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use quarry_core::{QuarryError, Result};
use quarry_runtime::Row;
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgRow, PgTypeKind, PgValueFormat, PgValueRef};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::{Column, Decode, Postgres, Row as _, TypeInfo, ValueRef};

type DecodeResult = std::result::Result<Value, sqlx::Error>;

pub(crate) fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let value = row
            .try_get_raw(column.ordinal())
            .and_then(decode_value)
            .map_err(|e| {
                QuarryError::execution(format!("cannot decode column {}: {}", column.name(), e))
            })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_value(raw: PgValueRef<'_>) -> DecodeResult {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if matches!(raw.format(), PgValueFormat::Text) {
        return as_text(raw);
    }
    let type_info = raw.type_info().into_owned();
    match type_info.kind() {
        // Domains travel in their base type's format.
        PgTypeKind::Domain(base) => decode_typed(raw, base.name()),
        // The binary form of an enum label is its text.
        PgTypeKind::Enum(_) => as_text(raw),
        _ => decode_typed(raw, type_info.name()),
    }
}

fn decode_typed(raw: PgValueRef<'_>, type_name: &str) -> DecodeResult {
    let value = match type_name {
        "BOOL" => Value::Bool(decode::<bool>(raw)?),
        "INT2" => json!(decode::<i16>(raw)?),
        "INT4" => json!(decode::<i32>(raw)?),
        "INT8" => json!(decode::<i64>(raw)?),
        "OID" => json!(decode::<sqlx::postgres::types::Oid>(raw)?.0),
        "FLOAT4" => json!(decode::<f32>(raw)?),
        "FLOAT8" => json!(decode::<f64>(raw)?),
        // Kept as text so no precision is lost.
        "NUMERIC" => numeric(decode(raw)?),
        "MONEY" => money(decode(raw)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => Value::String(decode(raw)?),
        "JSON" | "JSONB" => decode::<Value>(raw)?,
        "UUID" => Value::String(decode::<uuid::Uuid>(raw)?.to_string()),
        "TIMESTAMPTZ" => Value::String(decode::<DateTime<Utc>>(raw)?.to_rfc3339()),
        "TIMESTAMP" => timestamp(decode(raw)?),
        "DATE" => Value::String(decode::<NaiveDate>(raw)?.to_string()),
        "TIME" => Value::String(decode::<NaiveTime>(raw)?.to_string()),
        "INTERVAL" => interval(decode(raw)?),
        "BYTEA" => bytea(decode(raw)?),
        "INET" => inet(decode(raw)?),
        "CIDR" => Value::String(decode::<IpNetwork>(raw)?.to_string()),
        "TSVECTOR" => Value::String(tsvector(raw)?),
        "VOID" => Value::Null,
        "BOOL[]" => array::<bool>(raw)?,
        "INT2[]" => array::<i16>(raw)?,
        "INT4[]" => array::<i32>(raw)?,
        "INT8[]" => array::<i64>(raw)?,
        "FLOAT4[]" => array::<f32>(raw)?,
        "FLOAT8[]" => array::<f64>(raw)?,
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => array::<String>(raw)?,
        "UUID[]" => array::<uuid::Uuid>(raw)?,
        "JSONB[]" => array::<Value>(raw)?,
        "TIMESTAMPTZ[]" => array::<DateTime<Utc>>(raw)?,
        "TIMESTAMP[]" => array_map(raw, timestamp)?,
        "DATE[]" => array::<NaiveDate>(raw)?,
        "TIME[]" => array::<NaiveTime>(raw)?,
        "NUMERIC[]" => array_map(raw, numeric)?,
        "MONEY[]" => array_map(raw, money)?,
        "INTERVAL[]" => array_map(raw, interval)?,
        "BYTEA[]" => array_map(raw, bytea)?,
        "INET[]" => array_map(raw, inet)?,
        "CIDR[]" => array_map(raw, |net: IpNetwork| Value::String(net.to_string()))?,
        other => {
            return Err(sqlx::Error::Decode(
                format!("unsupported column type {}", other).into(),
            ));
        }
    };
    Ok(value)
}

fn decode<'r, T>(raw: PgValueRef<'r>) -> std::result::Result<T, sqlx::Error>
where
    T: Decode<'r, Postgres>,
{
    T::decode(raw).map_err(sqlx::Error::Decode)
}

fn array<T>(raw: PgValueRef<'_>) -> DecodeResult
where
    T: Serialize,
    Vec<Option<T>>: for<'r> Decode<'r, Postgres>,
{
    let items: Vec<Option<T>> = decode(raw)?;
    serde_json::to_value(items).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn array_map<T>(raw: PgValueRef<'_>, render: impl Fn(T) -> Value) -> DecodeResult
where
    Vec<Option<T>>: for<'r> Decode<'r, Postgres>,
{
    let items: Vec<Option<T>> = decode(raw)?;
    Ok(Value::Array(
        items
            .into_iter()
            .map(|item| item.map_or(Value::Null, &render))
            .collect(),
    ))
}

fn numeric(value: BigDecimal) -> Value {
    Value::String(value.to_string())
}

/// Assumes the two fractional digits of the usual `lc_monetary` locales.
fn money(value: PgMoney) -> Value {
    Value::String(value.to_bigdecimal(2).to_string())
}

fn timestamp(value: NaiveDateTime) -> Value {
    Value::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

/// Hex form, as Postgres prints `bytea` by default.
fn bytea(bytes: Vec<u8>) -> Value {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    Value::String(out)
}

/// Host addresses print without their full-length prefix, like Postgres does.
fn inet(net: IpNetwork) -> Value {
    let full = if net.is_ipv4() { 32 } else { 128 };
    if net.prefix() == full {
        Value::String(net.ip().to_string())
    } else {
        Value::String(net.to_string())
    }
}

/// ISO 8601 duration (`P1Y2M3DT4H5M6.5S`).
fn interval(value: PgInterval) -> Value {
    let mut out = String::from("P");
    let (years, months) = (value.months / 12, value.months % 12);
    if years != 0 {
        out.push_str(&format!("{}Y", years));
    }
    if months != 0 {
        out.push_str(&format!("{}M", months));
    }
    if value.days != 0 {
        out.push_str(&format!("{}D", value.days));
    }

    let micros = value.microseconds;
    if micros != 0 {
        out.push('T');
        let hours = micros / 3_600_000_000;
        let minutes = micros % 3_600_000_000 / 60_000_000;
        let rest = micros % 60_000_000;
        if hours != 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes != 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if rest != 0 {
            let sign = if rest < 0 { "-" } else { "" };
            let abs = rest.unsigned_abs();
            let (secs, frac) = (abs / 1_000_000, abs % 1_000_000);
            if frac == 0 {
                out.push_str(&format!("{}{}S", sign, secs));
            } else {
                let frac = format!("{:06}", frac);
                out.push_str(&format!("{}{}.{}S", sign, secs, frac.trim_end_matches('0')));
            }
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    Value::String(out)
}

/// Binary `tsvector`: a lexeme count, then per lexeme a NUL-terminated
/// string, a position count and 16-bit positions (weight in the top two
/// bits). Rendered in the text form `'fox':2A 'quick':1`.
fn tsvector(raw: PgValueRef<'_>) -> std::result::Result<String, sqlx::Error> {
    let bytes = raw.as_bytes().map_err(sqlx::Error::Decode)?;
    let mut cursor = bytes;

    let count = i32::from_be_bytes(take(&mut cursor)?);
    let mut lexemes = Vec::new();
    for _ in 0..count {
        let end = cursor
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(malformed_tsvector)?;
        let word =
            std::str::from_utf8(&cursor[..end]).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        cursor = &cursor[end + 1..];
        let mut lexeme = format!("'{}'", word.replace('\\', "\\\\").replace('\'', "''"));

        let positions = u16::from_be_bytes(take(&mut cursor)?);
        for i in 0..positions {
            let entry = u16::from_be_bytes(take(&mut cursor)?);
            lexeme.push(if i == 0 { ':' } else { ',' });
            lexeme.push_str(&(entry & 0x3fff).to_string());
            match entry >> 14 {
                3 => lexeme.push('A'),
                2 => lexeme.push('B'),
                1 => lexeme.push('C'),
                _ => {}
            }
        }
        lexemes.push(lexeme);
    }
    Ok(lexemes.join(" "))
}

fn take<'a, const N: usize>(cursor: &mut &'a [u8]) -> std::result::Result<[u8; N], sqlx::Error> {
    let slice: &'a [u8] = *cursor;
    if slice.len() < N {
        return Err(malformed_tsvector());
    }
    let (head, tail) = slice.split_at(N);
    *cursor = tail;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn malformed_tsvector() -> sqlx::Error {
    sqlx::Error::Decode("malformed tsvector".into())
}

/// Text-format values and enum labels.
fn as_text(raw: PgValueRef<'_>) -> DecodeResult {
    let text = <&str as Decode<Postgres>>::decode(raw).map_err(|e| {
        tracing::trace!(error = %e, "Column is not valid text");
        sqlx::Error::Decode(e)
    })?;
    Ok(Value::String(text.to_string()))
}
