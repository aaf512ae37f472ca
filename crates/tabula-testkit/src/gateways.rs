// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tabula_app::{
    Backend, ColumnInfo, OperationKind, Page, PageQuery, Record, RecordKey, RemoteError,
    SchemaSource, TableGateway, Value, parse_datetime,
};
use time::OffsetDateTime;

use crate::{PURCHASE_TABLE, PurchaseFaker, purchase_columns};

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<Record>>,
    columns: BTreeMap<String, Vec<ColumnInfo>>,
    next_id: i64,
}

/// In-process store with the same filter semantics as the real gateways.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` seeded purchases with ids `1..=count`.
    pub fn purchases(count: usize, seed: u64) -> Self {
        let rows = PurchaseFaker::new(seed)
            .purchases(count)
            .iter()
            .zip(1_i64..)
            .map(|(purchase, id)| purchase.to_record(id))
            .collect();
        let gateway = Self::new();
        gateway.put_table(PURCHASE_TABLE, purchase_columns(), rows);
        gateway
    }

    pub fn put_table(&self, collection: &str, columns: Vec<ColumnInfo>, rows: Vec<Record>) {
        let mut state = self.lock();
        let max_id = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_f64))
            .fold(0.0_f64, f64::max) as i64;
        state.next_id = state.next_id.max(max_id);
        state.tables.insert(collection.to_owned(), rows);
        state.columns.insert(collection.to_owned(), columns);
    }

    pub fn rows(&self, collection: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row(&self, collection: &str, key: &RecordKey) -> Option<Record> {
        self.rows(collection)
            .into_iter()
            .find(|row| row.key("id").as_ref() == Some(key))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn matches_query(row: &Record, query: &PageQuery) -> bool {
    if let Some(search) = &query.search {
        let haystack = row
            .get(&search.column)
            .map(Value::canonical)
            .unwrap_or_default()
            .to_lowercase();
        if !haystack.contains(&search.term.to_lowercase()) {
            return false;
        }
    }
    if let Some(filter) = &query.date {
        let day = match row.get(&filter.column) {
            Some(Value::DateTime(value)) => Some(value.date()),
            Some(Value::Text(raw)) => parse_datetime(raw).map(|value| value.date()),
            _ => None,
        };
        if !day.is_some_and(|day| filter.range.contains(day)) {
            return false;
        }
    }
    true
}

impl TableGateway for MemoryGateway {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, RemoteError> {
        query.validate()?;
        let state = self.lock();
        let Some(rows) = state.tables.get(&query.collection) else {
            return Err(RemoteError::read(format!(
                "relation {:?} does not exist",
                query.collection
            )));
        };
        let matching: Vec<&Record> = rows.iter().filter(|row| matches_query(row, query)).collect();
        let records = matching
            .iter()
            .skip(query.offset())
            .take(query.page_size)
            .map(|row| (*row).clone())
            .collect();
        Ok(Page {
            records,
            total: matching.len(),
        })
    }

    fn insert(&self, collection: &str, record: &Record) -> Result<Vec<Record>, RemoteError> {
        if record.contains("id") {
            return Err(RemoteError::new(
                OperationKind::Insert,
                "id is assigned by the store",
            ));
        }
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        let mut row = record.clone().with("id", Value::Number(id as f64));
        if !row.contains("created_at") {
            row.set("created_at", Value::DateTime(OffsetDateTime::now_utc()));
        }
        state
            .tables
            .entry(collection.to_owned())
            .or_default()
            .push(row.clone());
        Ok(vec![row])
    }

    fn delete_by_keys(
        &self,
        collection: &str,
        primary_key: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<Record>, RemoteError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.lock();
        let Some(rows) = state.tables.get_mut(collection) else {
            return Ok(Vec::new());
        };
        let (deleted, kept): (Vec<Record>, Vec<Record>) = rows
            .drain(..)
            .partition(|row| row.key(primary_key).is_some_and(|key| keys.contains(&key)));
        *rows = kept;
        Ok(deleted)
    }

    fn update(
        &self,
        collection: &str,
        primary_key: &str,
        key: &RecordKey,
        fields: &Record,
    ) -> Result<Vec<Record>, RemoteError> {
        let mut state = self.lock();
        let Some(rows) = state.tables.get_mut(collection) else {
            return Ok(Vec::new());
        };
        let mut updated = Vec::new();
        for row in rows
            .iter_mut()
            .filter(|row| row.key(primary_key).as_ref() == Some(key))
        {
            row.merge(fields);
            updated.push(row.clone());
        }
        Ok(updated)
    }
}

impl SchemaSource for MemoryGateway {
    fn table_columns(&self, collection: &str) -> Result<Vec<ColumnInfo>, RemoteError> {
        self.lock().columns.get(collection).cloned().ok_or_else(|| {
            RemoteError::new(
                OperationKind::Introspect,
                format!("no columns known for {collection}"),
            )
        })
    }
}

/// Counts every call that reaches the wrapped store.
#[derive(Debug)]
pub struct CountingGateway<G> {
    inner: G,
    reads: AtomicUsize,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
    updates: AtomicUsize,
    introspections: AtomicUsize,
}

impl<G> CountingGateway<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            introspections: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn calls(&self, operation: OperationKind) -> usize {
        self.counter(operation).load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.calls(OperationKind::Insert)
            + self.calls(OperationKind::Delete)
            + self.calls(OperationKind::Update)
    }

    pub fn total_calls(&self) -> usize {
        self.write_calls() + self.calls(OperationKind::Read) + self.calls(OperationKind::Introspect)
    }

    fn counter(&self, operation: OperationKind) -> &AtomicUsize {
        match operation {
            OperationKind::Read => &self.reads,
            OperationKind::Insert => &self.inserts,
            OperationKind::Delete => &self.deletes,
            OperationKind::Update => &self.updates,
            OperationKind::Introspect => &self.introspections,
        }
    }

    fn bump(&self, operation: OperationKind) {
        self.counter(operation).fetch_add(1, Ordering::SeqCst);
    }
}

impl<G: Backend> TableGateway for CountingGateway<G> {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, RemoteError> {
        self.bump(OperationKind::Read);
        self.inner.fetch_page(query)
    }

    fn insert(&self, collection: &str, record: &Record) -> Result<Vec<Record>, RemoteError> {
        self.bump(OperationKind::Insert);
        self.inner.insert(collection, record)
    }

    fn delete_by_keys(
        &self,
        collection: &str,
        primary_key: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<Record>, RemoteError> {
        self.bump(OperationKind::Delete);
        self.inner.delete_by_keys(collection, primary_key, keys)
    }

    fn update(
        &self,
        collection: &str,
        primary_key: &str,
        key: &RecordKey,
        fields: &Record,
    ) -> Result<Vec<Record>, RemoteError> {
        self.bump(OperationKind::Update);
        self.inner.update(collection, primary_key, key, fields)
    }
}

impl<G: Backend> SchemaSource for CountingGateway<G> {
    fn table_columns(&self, collection: &str) -> Result<Vec<ColumnInfo>, RemoteError> {
        self.bump(OperationKind::Introspect);
        self.inner.table_columns(collection)
    }
}

/// Fails selected operations with a fixed message until healed.
#[derive(Debug)]
pub struct FailingGateway<G> {
    inner: G,
    failures: Mutex<Vec<(OperationKind, String)>>,
}

impl<G> FailingGateway<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(self, operation: OperationKind, message: &str) -> Self {
        self.fail(operation, message);
        self
    }

    pub fn fail(&self, operation: OperationKind, message: &str) {
        self.lock().push((operation, message.to_owned()));
    }

    pub fn heal(&self, operation: OperationKind) {
        self.lock().retain(|(failing, _)| *failing != operation);
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    fn check(&self, operation: OperationKind) -> Result<(), RemoteError> {
        match self.lock().iter().find(|(failing, _)| *failing == operation) {
            Some((_, message)) => Err(RemoteError::new(operation, message.clone())),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(OperationKind, String)>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<G: Backend> TableGateway for FailingGateway<G> {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, RemoteError> {
        self.check(OperationKind::Read)?;
        self.inner.fetch_page(query)
    }

    fn insert(&self, collection: &str, record: &Record) -> Result<Vec<Record>, RemoteError> {
        self.check(OperationKind::Insert)?;
        self.inner.insert(collection, record)
    }

    fn delete_by_keys(
        &self,
        collection: &str,
        primary_key: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<Record>, RemoteError> {
        self.check(OperationKind::Delete)?;
        self.inner.delete_by_keys(collection, primary_key, keys)
    }

    fn update(
        &self,
        collection: &str,
        primary_key: &str,
        key: &RecordKey,
        fields: &Record,
    ) -> Result<Vec<Record>, RemoteError> {
        self.check(OperationKind::Update)?;
        self.inner.update(collection, primary_key, key, fields)
    }
}

impl<G: Backend> SchemaSource for FailingGateway<G> {
    fn table_columns(&self, collection: &str) -> Result<Vec<ColumnInfo>, RemoteError> {
        self.check(OperationKind::Introspect)?;
        self.inner.table_columns(collection)
    }
}
