// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::fmt;

use thiserror::Error;

use crate::{DateRange, Record, RecordKey, is_plain_identifier};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchFilter {
    pub column: String,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateFilter {
    pub column: String,
    pub range: DateRange,
}

/// One page request. Doubles as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageQuery {
    pub collection: String,
    pub page: usize,
    pub page_size: usize,
    pub search: Option<SearchFilter>,
    pub date: Option<DateFilter>,
}

pub type PageKey = PageQuery;

impl PageQuery {
    pub fn new(collection: impl Into<String>, page: usize, page_size: usize) -> Self {
        Self {
            collection: collection.into(),
            page,
            page_size,
            search: None,
            date: None,
        }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) * self.page_size
    }

    /// Zero-based inclusive row window.
    pub fn window(&self) -> (usize, usize) {
        let start = self.offset();
        (start, start + self.page_size.saturating_sub(1))
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.page == 0 {
            return Err(RemoteError::read("page must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(RemoteError::read("page size must be at least 1"));
        }
        validate_identifier(OperationKind::Read, "collection", &self.collection)?;
        if let Some(search) = &self.search {
            validate_identifier(OperationKind::Read, "search column", &search.column)?;
        }
        if let Some(date) = &self.date {
            validate_identifier(OperationKind::Read, "date column", &date.column)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Insert,
    Delete,
    Update,
    Introspect,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Update => "update",
            Self::Introspect => "introspect",
        }
    }

    pub const fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Delete | Self::Update)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single gateway call. Never retried by the gateway itself.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{operation} failed: {message}")]
pub struct RemoteError {
    pub operation: OperationKind,
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(operation: OperationKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            payload: None,
        }
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self::new(OperationKind::Read, message)
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn payload_text(&self) -> Option<String> {
        self.payload.as_ref().map(serde_json::Value::to_string)
    }
}

pub fn validate_identifier(
    operation: OperationKind,
    what: &str,
    identifier: &str,
) -> Result<(), RemoteError> {
    if is_plain_identifier(identifier) {
        Ok(())
    } else {
        Err(RemoteError::new(
            operation,
            format!("{what} {identifier:?} must contain only letters, digits, or underscores"),
        ))
    }
}

pub trait TableGateway: Send + Sync {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, RemoteError>;

    /// `record` must not carry the primary key.
    fn insert(&self, collection: &str, record: &Record) -> Result<Vec<Record>, RemoteError>;

    /// Empty `keys` succeed without touching the store.
    fn delete_by_keys(
        &self,
        collection: &str,
        primary_key: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<Record>, RemoteError>;

    fn update(
        &self,
        collection: &str,
        primary_key: &str,
        key: &RecordKey,
        fields: &Record,
    ) -> Result<Vec<Record>, RemoteError>;
}

/// Column-level introspection result, one row per column.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
}

pub trait SchemaSource: Send + Sync {
    fn table_columns(&self, collection: &str) -> Result<Vec<ColumnInfo>, RemoteError>;
}

/// A store that can both serve rows and describe them.
pub trait Backend: TableGateway + SchemaSource {}

impl<T: TableGateway + SchemaSource> Backend for T {}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Insert(Record),
    Delete(Vec<RecordKey>),
    Update { key: RecordKey, fields: Record },
}

impl WriteRequest {
    pub const fn operation(&self) -> OperationKind {
        match self {
            Self::Insert(_) => OperationKind::Insert,
            Self::Delete(_) => OperationKind::Delete,
            Self::Update { .. } => OperationKind::Update,
        }
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        match self {
            Self::Insert(_) => Vec::new(),
            Self::Delete(keys) => keys.clone(),
            Self::Update { key, .. } => vec![key.clone()],
        }
    }

    pub fn payload(&self, primary_key: &str) -> serde_json::Value {
        match self {
            Self::Insert(record) => record.to_json(),
            Self::Delete(keys) => serde_json::Value::Array(
                keys.iter()
                    .map(|key| serde_json::Value::String(key.to_string()))
                    .collect(),
            ),
            Self::Update { key, fields } => serde_json::json!({
                "updateData": fields.to_json(),
                primary_key: key.as_str(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationResult {
    Inserted(Vec<Record>),
    Deleted(Vec<RecordKey>),
    Updated { key: RecordKey, applied: Record },
}

/// Runs one write against the gateway. Failures carry the attempted payload.
pub fn execute_write<G: TableGateway + ?Sized>(
    gateway: &G,
    collection: &str,
    primary_key: &str,
    request: &WriteRequest,
) -> Result<MutationResult, RemoteError> {
    let attach = |error: RemoteError| match error.payload {
        Some(_) => error,
        None => error.with_payload(request.payload(primary_key)),
    };
    match request {
        WriteRequest::Insert(record) => {
            let rows = gateway.insert(collection, record).map_err(attach)?;
            Ok(MutationResult::Inserted(rows))
        }
        WriteRequest::Delete(keys) => {
            if keys.is_empty() {
                return Ok(MutationResult::Deleted(Vec::new()));
            }
            gateway
                .delete_by_keys(collection, primary_key, keys)
                .map_err(attach)?;
            Ok(MutationResult::Deleted(keys.clone()))
        }
        WriteRequest::Update { key, fields } => {
            let rows = gateway
                .update(collection, primary_key, key, fields)
                .map_err(attach)?;
            let applied = rows
                .into_iter()
                .find(|row| row.key(primary_key).as_ref() == Some(key))
                .unwrap_or_else(|| fields.clone());
            Ok(MutationResult::Updated {
                key: key.clone(),
                applied,
            })
        }
    }
}
