//! Conversion between [`Value`] and PostgreSQL wire types.
//!
//! Parameters are converted by the type PostgreSQL inferred for the
//! placeholder (`Statement::params`), so a `Value::Int` bound to an `int4`
//! column is sent as `i32` and a null is sent as a null of the column's type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sync_core::Value;
use sync_storage::StorageError;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;

pub(crate) type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn mismatch(value: &Value, ty: &Type) -> StorageError {
    StorageError::Conversion(format!("cannot bind {value} to a column of type {ty}"))
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn typed_null(ty: &Type) -> Result<BoxedParam, StorageError> {
    let param: BoxedParam = match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::FLOAT4 => Box::new(None::<f32>),
        Type::FLOAT8 => Box::new(None::<f64>),
        Type::DATE => Box::new(None::<NaiveDate>),
        Type::TIMESTAMP => Box::new(None::<NaiveDateTime>),
        Type::TIMESTAMPTZ => Box::new(None::<DateTime<Utc>>),
        ref t if is_text(t) => Box::new(None::<String>),
        ref t => {
            return Err(StorageError::Conversion(format!(
                "unsupported column type {t}"
            )))
        }
    };
    Ok(param)
}

/// Convert a value to a parameter of the given PostgreSQL type.
pub(crate) fn to_param(value: &Value, ty: &Type) -> Result<BoxedParam, StorageError> {
    let param: BoxedParam = match value {
        Value::Null => return typed_null(ty),
        Value::Bool(b) if *ty == Type::BOOL => Box::new(*b),
        Value::Int(i) => match *ty {
            Type::INT2 => Box::new(i16::try_from(*i).map_err(|_| mismatch(value, ty))?),
            Type::INT4 => Box::new(i32::try_from(*i).map_err(|_| mismatch(value, ty))?),
            Type::INT8 => Box::new(*i),
            Type::FLOAT4 => Box::new(*i as f32),
            Type::FLOAT8 => Box::new(*i as f64),
            ref t if is_text(t) => Box::new(i.to_string()),
            _ => return Err(mismatch(value, ty)),
        },
        Value::Float(f) => match *ty {
            Type::FLOAT4 => Box::new(*f as f32),
            Type::FLOAT8 => Box::new(*f),
            _ => return Err(mismatch(value, ty)),
        },
        Value::Timestamp(ts) => match *ty {
            Type::TIMESTAMPTZ => Box::new(*ts),
            Type::TIMESTAMP => Box::new(ts.naive_utc()),
            Type::DATE => Box::new(ts.date_naive()),
            _ => return Err(mismatch(value, ty)),
        },
        Value::Text(s) if is_text(ty) => Box::new(s.clone()),
        _ => return Err(mismatch(value, ty)),
    };
    Ok(param)
}

/// Convert `values` to parameters matching the statement's parameter types.
pub(crate) fn bind(values: &[Value], types: &[Type]) -> Result<Vec<BoxedParam>, StorageError> {
    if values.len() != types.len() {
        return Err(StorageError::Conversion(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            values.len()
        )));
    }
    values
        .iter()
        .zip(types)
        .map(|(value, ty)| to_param(value, ty))
        .collect()
}

/// Convert to references for execution.
pub(crate) fn param_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, StorageError>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        StorageError::Conversion(format!(
            "column {}: {e}",
            row.columns()[idx].name()
        ))
    })
}

/// Read column `idx` of a row as a [`Value`].
pub(crate) fn from_row(row: &Row, idx: usize) -> Result<Value, StorageError> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::DATE => get::<NaiveDate>(row, idx)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Value::Timestamp(dt.and_utc())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(|dt| Value::Timestamp(dt.and_utc())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(Value::Timestamp),
        ref t if is_text(t) => get::<String>(row, idx)?.map(Value::Text),
        other => {
            return Err(StorageError::Conversion(format!(
                "column {} has unsupported type {other}",
                row.columns()[idx].name()
            )))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Read columns `start..start + len` as values.
pub(crate) fn values_from_row(
    row: &Row,
    start: usize,
    len: usize,
) -> Result<Vec<Value>, StorageError> {
    (start..start + len).map(|idx| from_row(row, idx)).collect()
}

/// Read a nullable timestamp column.
pub(crate) fn optional_timestamp(row: &Row, idx: usize) -> Result<Option<DateTime<Utc>>, StorageError> {
    match from_row(row, idx)? {
        Value::Null => Ok(None),
        Value::Timestamp(ts) => Ok(Some(ts)),
        other => Err(StorageError::Conversion(format!(
            "column {} holds {other}, expected a timestamp",
            row.columns()[idx].name()
        ))),
    }
}

/// Read a non-null timestamp column.
pub(crate) fn timestamp(row: &Row, idx: usize) -> Result<DateTime<Utc>, StorageError> {
    optional_timestamp(row, idx)?.ok_or_else(|| {
        StorageError::Conversion(format!(
            "column {} is null, expected a timestamp",
            row.columns()[idx].name()
        ))
    })
}
