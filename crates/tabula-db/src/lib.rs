// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod convert;

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tabula_app::{
    ColumnInfo, OperationKind, Page, PageQuery, Record, RecordKey, RemoteError, SchemaSource,
    TableGateway, is_plain_identifier, validate_identifier,
};

use convert::{from_sql, key_param, placeholders, to_sql, where_clause};

pub const APP_NAME: &str = "tabula";
pub const DEMO_TABLE: &str = "material_purchase";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaColumn {
    pub cid: i32,
    pub name: String,
    pub column_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: i32,
}

/// SQLite-backed gateway. The connection sits behind a mutex so worker
/// threads can share one store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn raw_connection(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the `material_purchase` table used by `--demo`.
    pub fn bootstrap_demo(&self) -> Result<()> {
        self.raw_connection()
            .execute_batch(include_str!("sql/demo.sql"))
            .context("create demo schema")
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.raw_connection();
        let mut stmt = conn
            .prepare(
                "
                SELECT name
                FROM sqlite_master
                WHERE type = 'table'
                  AND name NOT LIKE 'sqlite_%'
                ORDER BY name ASC
                ",
            )
            .context("prepare table names query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query table names")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect table names")
    }

    pub fn pragma_columns(&self, table: &str) -> Result<Vec<PragmaColumn>> {
        pragma_columns(&self.raw_connection(), table)
    }
}

fn pragma_columns(conn: &Connection, table: &str) -> Result<Vec<PragmaColumn>> {
    if !is_plain_identifier(table) {
        bail!("invalid table name: {table:?}");
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| {
            let not_null: i32 = row.get(3)?;
            Ok(PragmaColumn {
                cid: row.get(0)?,
                name: row.get(1)?,
                column_type: row.get(2)?,
                not_null: not_null != 0,
                default_value: row.get(4)?,
                primary_key: row.get(5)?,
            })
        })
        .with_context(|| format!("query column info for {table}"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("collect columns for {table}"))
}

/// Declared primary key, or `rowid` for tables without one.
fn order_column(conn: &Connection, table: &str) -> Result<String> {
    let columns = pragma_columns(conn, table)?;
    Ok(columns
        .into_iter()
        .filter(|column| column.primary_key > 0)
        .min_by_key(|column| column.primary_key)
        .map_or_else(|| "rowid".to_owned(), |column| column.name))
}

fn store_error(operation: OperationKind, what: &str, error: impl std::fmt::Display) -> RemoteError {
    RemoteError::new(operation, format!("{what}: {error}"))
}

fn query_records(
    conn: &Connection,
    operation: OperationKind,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<Record>, RemoteError> {
    tracing::debug!(%operation, sql, "sqlite statement");
    let mut stmt = conn
        .prepare(sql)
        .map_err(|error| store_error(operation, "prepare statement", error))?;
    let names = stmt
        .column_names()
        .iter()
        .map(|name| (*name).to_owned())
        .collect::<Vec<_>>();
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut record = Record::new();
            for (index, name) in names.iter().enumerate() {
                record.set(name.clone(), from_sql(row.get_ref(index)?));
            }
            Ok(record)
        })
        .map_err(|error| store_error(operation, "run statement", error))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|error| store_error(operation, "read rows", error))
}

impl TableGateway for Store {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, RemoteError> {
        query.validate()?;
        let conn = self.raw_connection();
        let table = &query.collection;
        let order = order_column(&conn, table)
            .map_err(|error| store_error(OperationKind::Read, "inspect table", error))?;
        let (where_sql, mut params) = where_clause(query.search.as_ref(), query.date.as_ref());

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table}{where_sql}"),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )
            .map_err(|error| store_error(OperationKind::Read, "count rows", error))?;

        params.push(SqlValue::Integer(query.page_size as i64));
        params.push(SqlValue::Integer(query.offset() as i64));
        let records = query_records(
            &conn,
            OperationKind::Read,
            &format!("SELECT * FROM {table}{where_sql} ORDER BY {order} ASC LIMIT ? OFFSET ?"),
            &params,
        )?;
        Ok(Page {
            records,
            total: usize::try_from(total).unwrap_or(0),
        })
    }

    fn insert(&self, collection: &str, record: &Record) -> Result<Vec<Record>, RemoteError> {
        validate_identifier(OperationKind::Insert, "collection", collection)?;
        let conn = self.raw_connection();
        let key_column = order_column(&conn, collection)
            .map_err(|error| store_error(OperationKind::Insert, "inspect table", error))?;
        if record.contains(&key_column) {
            return Err(RemoteError::new(
                OperationKind::Insert,
                format!("{key_column} is assigned by the store"),
            ));
        }

        let mut fields = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len());
        for (field, value) in record.iter() {
            validate_identifier(OperationKind::Insert, "column", field)?;
            fields.push(field.as_str());
            params.push(to_sql(value));
        }
        let sql = if fields.is_empty() {
            format!("INSERT INTO {collection} DEFAULT VALUES RETURNING *")
        } else {
            format!(
                "INSERT INTO {collection} ({}) VALUES ({}) RETURNING *",
                fields.join(", "),
                placeholders(fields.len())
            )
        };
        query_records(&conn, OperationKind::Insert, &sql, &params)
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
        validate_identifier(OperationKind::Delete, "collection", collection)?;
        validate_identifier(OperationKind::Delete, "primary key", primary_key)?;
        let params = keys.iter().map(key_param).collect::<Vec<_>>();
        let sql = format!(
            "DELETE FROM {collection} WHERE {primary_key} IN ({}) RETURNING *",
            placeholders(keys.len())
        );
        query_records(&self.raw_connection(), OperationKind::Delete, &sql, &params)
    }

    fn update(
        &self,
        collection: &str,
        primary_key: &str,
        key: &RecordKey,
        fields: &Record,
    ) -> Result<Vec<Record>, RemoteError> {
        validate_identifier(OperationKind::Update, "collection", collection)?;
        validate_identifier(OperationKind::Update, "primary key", primary_key)?;
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let mut assignments = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len() + 1);
        for (field, value) in fields.iter() {
            validate_identifier(OperationKind::Update, "column", field)?;
            assignments.push(format!("{field} = ?"));
            params.push(to_sql(value));
        }
        params.push(key_param(key));
        let sql = format!(
            "UPDATE {collection} SET {} WHERE {primary_key} = ? RETURNING *",
            assignments.join(", ")
        );
        query_records(&self.raw_connection(), OperationKind::Update, &sql, &params)
    }
}

impl SchemaSource for Store {
    fn table_columns(&self, collection: &str) -> Result<Vec<ColumnInfo>, RemoteError> {
        validate_identifier(OperationKind::Introspect, "collection", collection)?;
        let columns = self
            .pragma_columns(collection)
            .map_err(|error| store_error(OperationKind::Introspect, "inspect table", error))?;
        Ok(columns
            .into_iter()
            .map(|column| ColumnInfo {
                column_name: column.name,
                data_type: column.column_type,
            })
            .collect())
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("TABULA_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set TABULA_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("tabula.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}
