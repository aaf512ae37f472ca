// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::ids::RecordKey;

pub const DEFAULT_PRIMARY_KEY: &str = "id";
pub const DEFAULT_CREATED_AT: &str = "created_at";
pub const DEFAULT_TENANT: &str = "user_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Boolean,
    Number,
    Date,
    Text,
}

impl SemanticType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::Date => "date",
            Self::Text => "text",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "boolean" => Some(Self::Boolean),
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    DateTime(OffsetDateTime),
    Null,
}

impl Value {
    pub fn date(date: Date) -> Self {
        Self::DateTime(date.midnight().assume_utc())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String form used for display, equality in diffs, and key extraction.
    pub fn canonical(&self) -> String {
        match self {
            Self::Bool(true) => "true".to_owned(),
            Self::Bool(false) => "false".to_owned(),
            Self::Number(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::DateTime(value) => format_datetime(*value),
            Self::Null => String::new(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(value) => Self::Bool(*value),
            serde_json::Value::Number(value) => value.as_f64().map_or(Self::Null, Self::Number),
            serde_json::Value::String(value) => Self::Text(value.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
                    serde_json::Value::from(*value as i64)
                } else {
                    serde_json::Number::from_f64(*value)
                        .map_or(serde_json::Value::Null, serde_json::Value::Number)
                }
            }
            Self::Text(value) => serde_json::Value::String(value.clone()),
            Self::DateTime(value) => serde_json::Value::String(format_datetime(*value)),
        }
    }

    /// Reinterprets a shape-decoded value under its column's semantic type.
    /// Values that do not fit the type are kept as decoded.
    pub fn coerce(self, semantic_type: SemanticType) -> Self {
        match (semantic_type, self) {
            (SemanticType::Boolean, Self::Number(value)) if value == 0.0 || value == 1.0 => {
                Self::Bool(value == 1.0)
            }
            (SemanticType::Boolean, Self::Text(value)) => {
                match value.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" => Self::Bool(true),
                    "false" | "f" | "0" => Self::Bool(false),
                    _ => Self::Text(value),
                }
            }
            (SemanticType::Number, Self::Text(value)) => match value.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => Self::Number(number),
                _ => Self::Text(value),
            },
            (SemanticType::Date, Self::Text(value)) => {
                parse_datetime(&value).map_or(Self::Text(value), Self::DateTime)
            }
            (_, other) => other,
        }
    }
}

/// A loosely shaped row: field name to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn key(&self, primary_key: &str) -> Option<RecordKey> {
        self.get(primary_key).and_then(RecordKey::from_value)
    }

    /// Overlays `fields` onto this record.
    pub fn merge(&mut self, fields: &Record) {
        for (field, value) in fields.iter() {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let object = json.as_object()?;
        Some(
            object
                .iter()
                .map(|(field, value)| (field.clone(), Value::from_json(value)))
                .collect(),
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .fields
            .iter()
            .map(|(field, value)| (field.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(object)
    }

    pub fn coerce(self, types: &ColumnTypes) -> Self {
        self.fields
            .into_iter()
            .map(|(field, value)| {
                let coerced = match types.get(&field) {
                    Some(semantic_type) => value.coerce(semantic_type),
                    None => value,
                };
                (field, coerced)
            })
            .collect()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Resolved semantic type per field of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnTypes(BTreeMap<String, SemanticType>);

impl ColumnTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<SemanticType> {
        self.0.get(field).copied()
    }

    pub fn insert(&mut self, field: impl Into<String>, semantic_type: SemanticType) {
        self.0.insert(field.into(), semantic_type);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SemanticType)> {
        self.0.iter().map(|(field, ty)| (field.as_str(), *ty))
    }
}

impl FromIterator<(String, SemanticType)> for ColumnTypes {
    fn from_iter<T: IntoIterator<Item = (String, SemanticType)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Derived column value: the product of the named numeric fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedExpr {
    factors: Vec<String>,
}

impl ComputedExpr {
    pub fn parse(raw: &str) -> Result<Self> {
        let factors = raw
            .split('*')
            .map(|part| part.trim().to_owned())
            .collect::<Vec<_>>();
        if factors.len() < 2 {
            bail!("computed expression {raw:?} must multiply at least two fields, e.g. \"quantity * price\"");
        }
        if let Some(bad) = factors.iter().find(|factor| !is_plain_identifier(factor)) {
            bail!("computed expression {raw:?} has invalid field name {bad:?}");
        }
        Ok(Self { factors })
    }

    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    pub fn evaluate(&self, record: &Record) -> Value {
        let mut product = 1.0;
        for factor in &self.factors {
            match record.get(factor).and_then(Value::as_f64) {
                Some(value) => product *= value,
                None => return Value::Null,
            }
        }
        Value::Number(product)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub field: String,
    pub title: Option<String>,
    pub semantic_type: Option<SemanticType>,
    pub show_in_table: bool,
    pub show_in_add: bool,
    pub show_in_edit: bool,
    pub computed: Option<ComputedExpr>,
}

impl ColumnDescriptor {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            title: None,
            semantic_type: None,
            show_in_table: true,
            show_in_add: true,
            show_in_edit: true,
            computed: None,
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn typed(mut self, semantic_type: SemanticType) -> Self {
        self.semantic_type = Some(semantic_type);
        self
    }

    pub fn computed(mut self, expr: ComputedExpr) -> Self {
        self.computed = Some(expr);
        self.show_in_add = false;
        self.show_in_edit = false;
        self
    }

    pub fn table_only(mut self) -> Self {
        self.show_in_add = false;
        self.show_in_edit = false;
        self
    }

    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.field)
    }

    pub const fn is_computed(&self) -> bool {
        self.computed.is_some()
    }
}

/// Everything the engine knows about one collection ahead of any request.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub collection: String,
    pub title: Option<String>,
    pub primary_key: String,
    pub created_at: Option<String>,
    pub tenant: Option<String>,
    pub date_filter_column: Option<String>,
    pub search_column: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            title: None,
            primary_key: DEFAULT_PRIMARY_KEY.to_owned(),
            created_at: Some(DEFAULT_CREATED_AT.to_owned()),
            tenant: Some(DEFAULT_TENANT.to_owned()),
            date_filter_column: None,
            search_column: None,
            columns: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.columns = columns;
        self
    }

    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.collection)
    }

    pub fn column(&self, field: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.field == field)
    }

    /// Primary key, creation timestamp, and tenant never change after insert.
    pub fn is_immutable(&self, field: &str) -> bool {
        field == self.primary_key
            || self.created_at.as_deref() == Some(field)
            || self.tenant.as_deref() == Some(field)
    }

    pub fn is_computed(&self, field: &str) -> bool {
        self.column(field).is_some_and(ColumnDescriptor::is_computed)
    }

    /// Explicit descriptor type wins, then the resolved type, then text.
    pub fn semantic_type(&self, field: &str, types: &ColumnTypes) -> SemanticType {
        self.column(field)
            .and_then(|column| column.semantic_type)
            .or_else(|| types.get(field))
            .unwrap_or(SemanticType::Text)
    }

    pub fn effective_types(&self, resolved: &ColumnTypes) -> ColumnTypes {
        let mut types = resolved.clone();
        for column in &self.columns {
            if let Some(semantic_type) = column.semantic_type {
                types.insert(column.field.clone(), semantic_type);
            }
        }
        types
    }

    pub fn cell(&self, record: &Record, column: &ColumnDescriptor) -> Value {
        match &column.computed {
            Some(expr) => expr.evaluate(record),
            None => record.get(&column.field).cloned().unwrap_or(Value::Null),
        }
    }

    /// Fills in descriptors when none were configured. Immutable fields stay
    /// out of the forms.
    pub fn derive_columns<'a>(&mut self, fields: impl IntoIterator<Item = &'a str>) -> bool {
        if !self.columns.is_empty() {
            return false;
        }
        for field in fields {
            let mut column = ColumnDescriptor::new(field);
            if self.is_immutable(field) {
                column = column.table_only();
            }
            self.columns.push(column);
        }
        !self.columns.is_empty()
    }

    pub fn default_search_column(&self, types: &ColumnTypes) -> Option<String> {
        if let Some(column) = &self.search_column {
            return Some(column.clone());
        }
        self.columns
            .iter()
            .filter(|column| column.show_in_table && !column.is_computed())
            .filter(|column| !self.is_immutable(&column.field))
            .find(|column| self.semantic_type(&column.field, types) == SemanticType::Text)
            .map(|column| column.field.clone())
    }
}

pub fn is_plain_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}

pub fn format_date(value: Date) -> String {
    value
        .format(&format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "1970-01-01".to_owned())
}

pub fn format_datetime(value: OffsetDateTime) -> String {
    if value.offset() == UtcOffset::UTC && value.time() == Time::MIDNIGHT {
        return format_date(value.date());
    }
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.to_string())
}

pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), &format_description!("[year]-[month]-[day]")).ok()
}

pub fn parse_datetime(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }

    if let Ok(value) = OffsetDateTime::parse(
        raw,
        &format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
        ),
    ) {
        return Some(value);
    }

    if let Ok(value) = OffsetDateTime::parse(
        raw,
        &format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
        ),
    ) {
        return Some(value);
    }

    for format in [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ] {
        if let Ok(value) = PrimitiveDateTime::parse(raw, &format) {
            return Some(value.assume_utc());
        }
    }

    parse_date(raw).map(|date| date.midnight().assume_utc())
}
