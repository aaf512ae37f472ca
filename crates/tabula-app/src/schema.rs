// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::HashMap;

use thiserror::Error;

use crate::{ColumnInfo, ColumnTypes, RemoteError, SchemaSource, SemanticType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaResolutionError {
    #[error("schema lookup for {collection} failed: {source}")]
    Remote {
        collection: String,
        #[source]
        source: RemoteError,
    },
    #[error("schema lookup for {collection} returned no columns")]
    Empty { collection: String },
}

/// Maps a store type tag onto one of the four semantic types.
pub fn classify(data_type: &str) -> SemanticType {
    match data_type.trim().to_ascii_lowercase().as_str() {
        "boolean" | "bool" => SemanticType::Boolean,
        "integer" | "int" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "numeric"
        | "decimal" | "real" | "double precision" | "float4" | "float8" => SemanticType::Number,
        "date" | "timestamp" | "timestamptz" | "timestamp with time zone"
        | "timestamp without time zone" | "datetime" => SemanticType::Date,
        _ => SemanticType::Text,
    }
}

pub fn classify_columns(columns: &[ColumnInfo]) -> ColumnTypes {
    columns
        .iter()
        .map(|column| (column.column_name.clone(), classify(&column.data_type)))
        .collect()
}

/// Per-collection type cache. Only successful lookups are remembered.
#[derive(Debug, Default)]
pub struct ColumnTypeResolver {
    resolved: HashMap<String, ResolvedColumns>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedColumns {
    pub types: ColumnTypes,
    pub order: Vec<String>,
}

impl ColumnTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, collection: &str) -> Option<&ResolvedColumns> {
        self.resolved.get(collection)
    }

    pub fn remember(&mut self, collection: &str, columns: &[ColumnInfo]) -> ResolvedColumns {
        let resolved = ResolvedColumns {
            types: classify_columns(columns),
            order: columns
                .iter()
                .map(|column| column.column_name.clone())
                .collect(),
        };
        self.resolved
            .insert(collection.to_owned(), resolved.clone());
        resolved
    }

    pub fn resolve<S: SchemaSource + ?Sized>(
        &mut self,
        source: &S,
        collection: &str,
    ) -> Result<ResolvedColumns, SchemaResolutionError> {
        if let Some(resolved) = self.resolved.get(collection) {
            return Ok(resolved.clone());
        }
        let columns = lookup(source, collection)?;
        Ok(self.remember(collection, &columns))
    }

    pub fn forget(&mut self, collection: &str) {
        self.resolved.remove(collection);
    }
}

/// Single introspection call, uncached.
pub fn lookup<S: SchemaSource + ?Sized>(
    source: &S,
    collection: &str,
) -> Result<Vec<ColumnInfo>, SchemaResolutionError> {
    let columns = source
        .table_columns(collection)
        .map_err(|source| SchemaResolutionError::Remote {
            collection: collection.to_owned(),
            source,
        })?;
    if columns.is_empty() {
        return Err(SchemaResolutionError::Empty {
            collection: collection.to_owned(),
        });
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::{ColumnTypeResolver, SchemaResolutionError, classify};
    use crate::{ColumnInfo, OperationKind, RemoteError, SchemaSource, SemanticType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl SchemaSource for StubSource {
        fn table_columns(&self, _collection: &str) -> Result<Vec<ColumnInfo>, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RemoteError::new(OperationKind::Introspect, "boom"));
            }
            Ok(vec![
                ColumnInfo {
                    column_name: "paid".to_owned(),
                    data_type: "boolean".to_owned(),
                },
                ColumnInfo {
                    column_name: "price".to_owned(),
                    data_type: "numeric".to_owned(),
                },
            ])
        }
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify("boolean"), SemanticType::Boolean);
        assert_eq!(classify("integer"), SemanticType::Number);
        assert_eq!(classify("bigint"), SemanticType::Number);
        assert_eq!(classify(" NUMERIC "), SemanticType::Number);
        assert_eq!(classify("date"), SemanticType::Date);
        assert_eq!(classify("timestamp with time zone"), SemanticType::Date);
        assert_eq!(classify("uuid"), SemanticType::Text);
        assert_eq!(classify("character varying"), SemanticType::Text);
    }

    #[test]
    fn resolution_is_cached_per_collection() {
        let source = StubSource {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let mut resolver = ColumnTypeResolver::new();
        let first = resolver.resolve(&source, "material_purchase").expect("resolves");
        let second = resolver.resolve(&source, "material_purchase").expect("resolves");
        assert_eq!(first, second);
        assert_eq!(first.types.get("paid"), Some(SemanticType::Boolean));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        resolver.resolve(&source, "other").expect("resolves");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let source = StubSource {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let mut resolver = ColumnTypeResolver::new();
        let error = resolver.resolve(&source, "t").expect_err("fails");
        assert!(matches!(error, SchemaResolutionError::Remote { .. }));
        assert!(resolver.cached("t").is_none());
        resolver.resolve(&source, "t").expect_err("fails again");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
