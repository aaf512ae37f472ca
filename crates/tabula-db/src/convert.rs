// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use rusqlite::types::{Value as SqlValue, ValueRef};
use tabula_app::{DateFilter, RecordKey, SearchFilter, Value, format_date, format_datetime};

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => {
            if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
                SqlValue::Integer(*number as i64)
            } else {
                SqlValue::Real(*number)
            }
        }
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::DateTime(instant) => SqlValue::Text(format_datetime(*instant)),
    }
}

/// Shape-level decode; column types are applied later by the engine.
pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::Number(number as f64),
        ValueRef::Real(number) => Value::Number(number),
        ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<{} bytes>", bytes.len())),
    }
}

/// Integer-looking keys bind as integers so they match INTEGER primary keys.
pub(crate) fn key_param(key: &RecordKey) -> SqlValue {
    key.as_str()
        .parse::<i64>()
        .map_or_else(|_| SqlValue::Text(key.as_str().to_owned()), SqlValue::Integer)
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// WHERE clause plus its parameters. Identifiers are validated by the caller.
pub(crate) fn where_clause(
    search: Option<&SearchFilter>,
    date: Option<&DateFilter>,
) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(search) = search {
        clauses.push(format!(
            "lower(CAST({} AS TEXT)) LIKE lower(?) ESCAPE '\\'",
            search.column
        ));
        params.push(SqlValue::Text(format!("%{}%", escape_like(&search.term))));
    }
    if let Some(filter) = date {
        clauses.push(format!("date({}) BETWEEN ? AND ?", filter.column));
        params.push(SqlValue::Text(format_date(filter.range.from())));
        params.push(SqlValue::Text(format_date(filter.range.to())));
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
