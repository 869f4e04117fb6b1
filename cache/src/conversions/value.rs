use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::bail;
use crate::conversions::bool::parse_bool;
use crate::conversions::hex::decode_hex;
use crate::conversions::text::{parse_date, parse_time, parse_timestamp, parse_timestamptz};
use crate::conversions::{Cell, RawValue};
use crate::error::{EngineResult, ErrorKind};
use crate::types::DestType;

/// Converts a value read from a source cursor into a cell of the destination column type.
///
/// Nulls stay nulls whatever the column type. Integers that do not fit the destination width and
/// text that does not parse fail with [`ErrorKind::ConversionError`].
pub fn convert_value(raw: RawValue, dest: &DestType) -> EngineResult<Cell> {
    if raw.is_null() {
        return Ok(Cell::Null);
    }

    let cell = match dest {
        DestType::Boolean => Cell::Bool(to_bool(raw)?),
        DestType::TinyInt => Cell::I8(i8::try_from(to_i64(raw)?)?),
        DestType::SmallInt => Cell::I16(i16::try_from(to_i64(raw)?)?),
        DestType::Integer => Cell::I32(i32::try_from(to_i64(raw)?)?),
        DestType::BigInt => Cell::I64(to_i64(raw)?),
        DestType::Float => Cell::F32(to_f64(raw)? as f32),
        DestType::Double => Cell::F64(to_f64(raw)?),
        DestType::Decimal { .. } => Cell::Decimal(to_decimal(raw)?),
        DestType::Varchar => Cell::String(to_text(raw)),
        DestType::Date => Cell::Date(parse_date(&expect_text(raw, dest)?)?),
        DestType::Time => Cell::Time(parse_time(&expect_text(raw, dest)?)?),
        DestType::Timestamp => Cell::TimeStamp(parse_timestamp(&expect_text(raw, dest)?)?),
        DestType::TimestampTz => Cell::TimeStampTz(parse_timestamptz(&expect_text(raw, dest)?)?),
        DestType::Blob => match raw {
            RawValue::Bytes(bytes) => Cell::Bytes(bytes),
            RawValue::Text(text) => Cell::Bytes(decode_hex(&text)?),
            other => bail!(
                ErrorKind::ConversionError,
                "Value cannot be stored in a BLOB column",
                format!("{other:?}")
            ),
        },
    };

    Ok(cell)
}

fn to_bool(raw: RawValue) -> EngineResult<bool> {
    match raw {
        RawValue::Bool(value) => Ok(value),
        RawValue::Int(value) => Ok(value != 0),
        RawValue::Float(value) => Ok(value != 0.0),
        // Integer renderings of bit columns count any non zero value as true.
        RawValue::Text(text) => match text.trim().parse::<i64>() {
            Ok(value) => Ok(value != 0),
            Err(_) => parse_bool(&text),
        },
        other => bail!(
            ErrorKind::ConversionError,
            "Value cannot be stored in a BOOLEAN column",
            format!("{other:?}")
        ),
    }
}

fn to_i64(raw: RawValue) -> EngineResult<i64> {
    match raw {
        RawValue::Int(value) => Ok(value),
        RawValue::Bool(value) => Ok(i64::from(value)),
        RawValue::Float(value) => float_to_i64(value),
        RawValue::Text(text) => {
            let text = text.trim();
            match text.parse::<i64>() {
                Ok(value) => Ok(value),
                // Some drivers render integral numerics with a fraction, e.g. `12.0`.
                Err(err) => match text.parse::<f64>() {
                    Ok(value) => float_to_i64(value),
                    Err(_) => Err(err.into()),
                },
            }
        }
        other => bail!(
            ErrorKind::ConversionError,
            "Value cannot be stored in an integer column",
            format!("{other:?}")
        ),
    }
}

fn float_to_i64(value: f64) -> EngineResult<i64> {
    if value.fract() != 0.0 || value < i64::MIN as f64 || value > i64::MAX as f64 {
        bail!(
            ErrorKind::ConversionError,
            "Value cannot be stored in an integer column",
            format!("{value} is not an integer in range")
        );
    }

    Ok(value as i64)
}

fn to_f64(raw: RawValue) -> EngineResult<f64> {
    match raw {
        RawValue::Float(value) => Ok(value),
        RawValue::Int(value) => Ok(value as f64),
        RawValue::Bool(value) => Ok(if value { 1.0 } else { 0.0 }),
        RawValue::Text(text) => Ok(text.trim().parse::<f64>()?),
        other => bail!(
            ErrorKind::ConversionError,
            "Value cannot be stored in a floating point column",
            format!("{other:?}")
        ),
    }
}

fn to_decimal(raw: RawValue) -> EngineResult<BigDecimal> {
    match raw {
        RawValue::Int(value) => Ok(BigDecimal::from(value)),
        RawValue::Float(value) => Ok(BigDecimal::from_str(&value.to_string())?),
        RawValue::Text(text) => Ok(BigDecimal::from_str(text.trim())?),
        other => bail!(
            ErrorKind::ConversionError,
            "Value cannot be stored in a DECIMAL column",
            format!("{other:?}")
        ),
    }
}

fn to_text(raw: RawValue) -> String {
    match raw {
        RawValue::Text(text) => text,
        RawValue::Int(value) => value.to_string(),
        RawValue::Float(value) => value.to_string(),
        RawValue::Bool(value) => value.to_string(),
        RawValue::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        RawValue::Null => String::new(),
    }
}

fn expect_text(raw: RawValue, dest: &DestType) -> EngineResult<String> {
    match raw {
        RawValue::Text(text) => Ok(text),
        other => bail!(
            ErrorKind::ConversionError,
            "Temporal columns expect a text rendering",
            format!("{other:?} cannot be stored in a {} column", dest.sql_name())
        ),
    }
}
