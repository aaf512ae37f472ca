// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use tabula_app::{
    Backend, SyncDriver, TableCommand, TableController, TableEvent, TableGateway, TableSchema,
};
use tabula_db::{DEMO_TABLE, Store};
use tabula_testkit::{PurchaseFaker, purchase_schema};

use crate::config::{BackendTarget, Config};

pub const DEMO_ROWS: usize = 25;
const DEMO_SEED: u64 = 7;

/// A connected backend plus the tables to show, one tab each.
pub struct Session {
    pub backend: Arc<dyn Backend>,
    pub schemas: Vec<TableSchema>,
    pub source: String,
}

pub fn open_session(config: &Config, demo: bool) -> Result<Session> {
    let configured = config.to_schemas()?;
    if demo {
        let store = demo_store()?;
        let schemas = if configured.is_empty() {
            vec![purchase_schema()]
        } else {
            configured
        };
        return Ok(Session {
            backend: Arc::new(store),
            schemas,
            source: "in-memory demo".to_owned(),
        });
    }

    match config.backend()? {
        BackendTarget::Sqlite(path) => {
            let store = Store::open(&path).with_context(|| {
                format!(
                    "open database {} -- if this path is wrong, set [storage].db_path or TABULA_DB_PATH",
                    path.display()
                )
            })?;
            let schemas = if configured.is_empty() {
                discover_tables(&store, &path)?
            } else {
                configured
            };
            Ok(Session {
                backend: Arc::new(store),
                schemas,
                source: path.display().to_string(),
            })
        }
        BackendTarget::Remote {
            base_url,
            api_key,
            timeout,
        } => {
            if configured.is_empty() {
                bail!(
                    "no [[tables]] configured for {base_url}; add at least one table to the config (see --print-example-config)"
                );
            }
            let client = tabula_remote::Client::new(&base_url, api_key.as_deref(), timeout)
                .context("invalid [remote] config; fix base_url/api_key/timeout values")?;
            Ok(Session {
                backend: Arc::new(client),
                schemas: configured,
                source: base_url,
            })
        }
    }
}

/// In-memory store with the demo table and a deterministic set of rows.
pub fn demo_store() -> Result<Store> {
    let store = Store::open_memory()?;
    store.bootstrap_demo()?;
    for purchase in PurchaseFaker::new(DEMO_SEED).purchases(DEMO_ROWS) {
        store
            .insert(DEMO_TABLE, &purchase.to_new_record())
            .context("seed demo rows")?;
    }
    Ok(store)
}

/// One tab per table in the file, keyed on each table's declared primary key.
fn discover_tables(store: &Store, path: &Path) -> Result<Vec<TableSchema>> {
    let names = store.table_names()?;
    if names.is_empty() {
        bail!(
            "database {} has no tables; add [[tables]] to the config or run with --demo",
            path.display()
        );
    }
    names
        .into_iter()
        .map(|name| -> Result<TableSchema> {
            let mut schema = TableSchema::new(&name);
            if let Some(column) = store
                .pragma_columns(&name)?
                .into_iter()
                .filter(|column| column.primary_key > 0)
                .min_by_key(|column| column.primary_key)
            {
                schema.primary_key = column.name;
            }
            Ok(schema)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCheck {
    pub collection: String,
    pub label: String,
    pub rows: usize,
    pub columns: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl TableCheck {
    pub fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!("FAIL {} ({}): {error}", self.label, self.collection),
            None => format!(
                "ok   {} ({}): {} rows, {} columns",
                self.label, self.collection, self.rows, self.columns
            ),
        }
    }
}

/// Mounts each table once against `backend`, the same way the UI would.
pub fn check_tables<B: Backend + ?Sized>(
    backend: &B,
    schemas: &[TableSchema],
    page_size: usize,
    cache_pages: usize,
) -> Vec<TableCheck> {
    let mut driver = SyncDriver::new(backend);
    schemas
        .iter()
        .map(|schema| {
            let mut controller =
                TableController::with_options(schema.clone(), page_size, cache_pages);
            let events = driver.dispatch(&mut controller, TableCommand::Mount);
            let warnings = events
                .into_iter()
                .filter_map(|event| match event {
                    TableEvent::SchemaDegraded(message) => Some(message),
                    _ => None,
                })
                .collect();
            TableCheck {
                collection: schema.collection.clone(),
                label: schema.label().to_owned(),
                rows: controller.total(),
                columns: controller.schema().columns.len(),
                warnings,
                error: controller.read_error().map(str::to_owned),
            }
        })
        .collect()
}
