// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabula_app::{
    ColumnDescriptor, ComputedExpr, DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE, PAGE_SIZES,
    SemanticType, TableSchema, is_allowed_page_size, is_plain_identifier,
};
use tracing::Level;

const CONFIG_VERSION: i64 = 1;
const DEFAULT_TIMEOUT: &str = "10s";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub remote: Remote,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub ui: Ui,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            remote: Remote::default(),
            storage: Storage::default(),
            ui: Ui::default(),
            log: Log::default(),
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Remote {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ui {
    pub default_page_size: Option<usize>,
    pub cache_pages: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Log {
    pub level: Option<String>,
    pub path: Option<String>,
}

/// One `[[tables]]` entry: a collection shown as its own tab.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub title: Option<String>,
    pub primary_key: Option<String>,
    pub created_at: Option<String>,
    pub tenant: Option<String>,
    pub date_filter_column: Option<String>,
    pub search_column: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub field: String,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub semantic_type: Option<String>,
    pub computed: Option<String>,
    pub show_in_table: Option<bool>,
    pub show_in_add: Option<bool>,
    pub show_in_edit: Option<bool>,
}

/// Where table data lives, in priority order: `[storage].db_path`, then
/// `[remote].base_url`, then the default local database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
    Sqlite(PathBuf),
    Remote {
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
    },
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("TABULA_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set TABULA_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(tabula_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} has no version; add `version = 1` at the top",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.version != CONFIG_VERSION {
            bail!(
                "config {} has version {}; expected 1",
                path.display(),
                self.version
            );
        }

        if let Some(db_path) = &self.storage.db_path {
            tabula_db::validate_db_path(db_path)?;
        }

        if let Some(timeout) = &self.remote.timeout {
            let parsed = parse_duration(timeout)?;
            if parsed <= Duration::ZERO {
                bail!(
                    "remote.timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        if let Some(size) = self.ui.default_page_size
            && !is_allowed_page_size(size)
        {
            bail!(
                "ui.default_page_size in {} must be one of {:?}, got {}",
                path.display(),
                PAGE_SIZES,
                size
            );
        }

        if self.ui.cache_pages == Some(0) {
            bail!("ui.cache_pages in {} must be positive", path.display());
        }

        if let Some(level) = &self.log.level {
            parse_level(level)
                .with_context(|| format!("invalid log.level in {}", path.display()))?;
        }

        let mut seen = BTreeSet::new();
        for table in &self.tables {
            table
                .validate()
                .with_context(|| format!("invalid [[tables]] entry in {}", path.display()))?;
            if !seen.insert(table.name.as_str()) {
                bail!(
                    "table {:?} is configured twice in {}",
                    table.name,
                    path.display()
                );
            }
        }

        Ok(())
    }

    pub fn backend(&self) -> Result<BackendTarget> {
        if let Some(path) = &self.storage.db_path {
            return Ok(BackendTarget::Sqlite(PathBuf::from(path)));
        }
        if let Some(base_url) = &self.remote.base_url {
            return Ok(BackendTarget::Remote {
                base_url: base_url.trim_end_matches('/').to_owned(),
                api_key: self.remote.api_key.clone(),
                timeout: self.remote_timeout()?,
            });
        }
        Ok(BackendTarget::Sqlite(tabula_db::default_db_path()?))
    }

    pub fn remote_timeout(&self) -> Result<Duration> {
        parse_duration(self.remote.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT))
    }

    pub fn page_size(&self) -> usize {
        self.ui.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn cache_pages(&self) -> usize {
        self.ui.cache_pages.unwrap_or(DEFAULT_CACHE_PAGES)
    }

    pub fn log_level(&self) -> Result<Level> {
        parse_level(self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))
    }

    pub fn log_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.log.path {
            return Ok(PathBuf::from(path));
        }
        let data_root = dirs::data_local_dir().ok_or_else(|| {
            anyhow!("cannot resolve data directory; set [log].path to a writable file")
        })?;
        Ok(data_root.join(tabula_db::APP_NAME).join("tabula.log"))
    }

    pub fn to_schemas(&self) -> Result<Vec<TableSchema>> {
        self.tables.iter().map(TableConfig::to_schema).collect()
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# tabula config\n# Place this file at: {}\n\nversion = 1\n\n[remote]\nbase_url = \"https://project.supabase.co\"\n# api_key = \"...\"\ntimeout = \"{}\"\n\n[storage]\n# Set to browse a local SQLite file instead of the REST API.\n# db_path = \"/absolute/path/to/tabula.db\"\n\n[ui]\ndefault_page_size = {}\ncache_pages = {}\n\n[log]\nlevel = \"{}\"\n# path = \"/absolute/path/to/tabula.log\"\n\n[[tables]]\nname = \"material_purchase\"\ntitle = \"Material purchase\"\nprimary_key = \"id\"\ndate_filter_column = \"created_at\"\nsearch_column = \"material\"\n\n[[tables.columns]]\nfield = \"material\"\ntitle = \"Material\"\n\n[[tables.columns]]\nfield = \"price\"\ntitle = \"Price\"\ntype = \"number\"\n\n[[tables.columns]]\nfield = \"quantity\"\ntitle = \"Quantity\"\ntype = \"number\"\n\n[[tables.columns]]\nfield = \"amount\"\ntitle = \"Amount\"\ncomputed = \"quantity * price\"\n",
            path.display(),
            DEFAULT_TIMEOUT,
            DEFAULT_PAGE_SIZE,
            DEFAULT_CACHE_PAGES,
            DEFAULT_LOG_LEVEL,
        )
    }
}

impl TableConfig {
    fn validate(&self) -> Result<()> {
        ensure_identifier("table name", &self.name)?;
        let optional = [
            ("primary_key", &self.primary_key),
            ("created_at", &self.created_at),
            ("tenant", &self.tenant),
            ("date_filter_column", &self.date_filter_column),
            ("search_column", &self.search_column),
        ];
        for (what, value) in optional {
            if let Some(value) = value {
                ensure_identifier(&format!("{}.{what}", self.name), value)?;
            }
        }
        for column in &self.columns {
            column
                .to_descriptor()
                .with_context(|| format!("column {:?} of table {:?}", column.field, self.name))?;
        }
        Ok(())
    }

    fn to_schema(&self) -> Result<TableSchema> {
        let mut schema = TableSchema::new(&self.name);
        schema.title = self.title.clone();
        if let Some(primary_key) = &self.primary_key {
            schema.primary_key = primary_key.clone();
        }
        if self.created_at.is_some() {
            schema.created_at = self.created_at.clone();
        }
        if self.tenant.is_some() {
            schema.tenant = self.tenant.clone();
        }
        schema.date_filter_column = self.date_filter_column.clone();
        schema.search_column = self.search_column.clone();
        schema.columns = self
            .columns
            .iter()
            .map(ColumnConfig::to_descriptor)
            .collect::<Result<_>>()?;
        Ok(schema)
    }
}

impl ColumnConfig {
    fn to_descriptor(&self) -> Result<ColumnDescriptor> {
        ensure_identifier("column field", &self.field)?;
        let mut column = ColumnDescriptor::new(&self.field);
        if let Some(title) = &self.title {
            column = column.titled(title);
        }
        if let Some(raw) = &self.semantic_type {
            let semantic_type = SemanticType::parse(raw).ok_or_else(|| {
                anyhow!("unknown column type {raw:?}; use boolean, number, date, or text")
            })?;
            column = column.typed(semantic_type);
        }
        if let Some(raw) = &self.computed {
            column = column.computed(ComputedExpr::parse(raw)?);
        }
        if let Some(show) = self.show_in_table {
            column.show_in_table = show;
        }
        if !column.is_computed() {
            if let Some(show) = self.show_in_add {
                column.show_in_add = show;
            }
            if let Some(show) = self.show_in_edit {
                column.show_in_edit = show;
            }
        }
        Ok(column)
    }
}

fn ensure_identifier(what: &str, value: &str) -> Result<()> {
    if !is_plain_identifier(value) {
        bail!("{what} {value:?} must contain only letters, digits, and underscores");
    }
    Ok(())
}

fn parse_level(raw: &str) -> Result<Level> {
    raw.trim().parse::<Level>().map_err(|_| {
        anyhow!("unknown log level {raw:?}; use one of: trace, debug, info, warn, error")
    })
}

pub fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 10s)")
}
