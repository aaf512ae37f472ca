// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod gateways;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tabula_app::{
    ColumnDescriptor, ColumnInfo, ComputedExpr, Record, SemanticType, TableSchema, Value,
};
use time::{Date, Duration, Month, OffsetDateTime};

pub use gateways::{CountingGateway, FailingGateway, MemoryGateway};

pub const PURCHASE_TABLE: &str = "material_purchase";
pub const DEMO_TENANT: &str = "demo-user";

const MATERIALS: [&str; 14] = [
    "Maize",
    "Cement",
    "Sand",
    "Gravel",
    "Timber",
    "Roofing sheets",
    "Nails",
    "Steel rods",
    "Paint",
    "Bricks",
    "Wheat",
    "Sorghum",
    "Fertilizer",
    "Wire mesh",
];

const SUPPLIER_NAMES: [&str; 10] = [
    "Hartley", "Summit", "Greenleaf", "Harbor", "Valley", "Northside", "Apex", "Heritage",
    "Eagle", "Bright",
];
const SUPPLIER_SUFFIXES: [&str; 5] = ["Supply", "Traders", "Depot", "Co-op", "Materials"];

const REFERENCE_YEAR: i32 = 2026;

#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub material: String,
    pub supplier: String,
    pub paid: bool,
    pub price: f64,
    pub quantity: i64,
    pub created_at: OffsetDateTime,
}

impl Purchase {
    /// Row as the store would hand it back, with `id` assigned.
    pub fn to_record(&self, id: i64) -> Record {
        self.to_new_record().with("id", Value::Number(id as f64))
    }

    /// Row ready for insert: no primary key.
    pub fn to_new_record(&self) -> Record {
        Record::new()
            .with("material", Value::text(&self.material))
            .with("supplier", Value::text(&self.supplier))
            .with("paid", Value::Bool(self.paid))
            .with("price", Value::Number(self.price))
            .with("quantity", Value::Number(self.quantity as f64))
            .with("created_at", Value::DateTime(self.created_at))
            .with("user_id", Value::text(DEMO_TENANT))
    }
}

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }
}

/// Seeded generator of `material_purchase` rows.
#[derive(Debug, Clone)]
pub struct PurchaseFaker {
    rng: DeterministicRng,
}

impl PurchaseFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn purchase(&mut self) -> Purchase {
        let material = self.pick(&MATERIALS).to_owned();
        let supplier = format!(
            "{} {}",
            self.pick(&SUPPLIER_NAMES),
            self.pick(&SUPPLIER_SUFFIXES)
        );
        let day = self.int_range(0, 364);
        let minute = self.int_range(0, 1439);
        let created_at = reference_start() + Duration::days(day) + Duration::minutes(minute);
        Purchase {
            material,
            supplier,
            paid: self.int_range(1, 10) <= 6,
            price: self.int_range(5, 500) as f64,
            quantity: self.int_range(1, 50),
            created_at,
        }
    }

    pub fn purchases(&mut self, count: usize) -> Vec<Purchase> {
        (0..count).map(|_| self.purchase()).collect()
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }

    fn int_range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = max - min + 1;
        min + (self.rng.next_u64() % (span as u64)) as i64
    }
}

/// The demo table as the engine sees it: typed columns plus a computed amount.
pub fn purchase_schema() -> TableSchema {
    let mut columns = vec![
        ColumnDescriptor::new("id").titled("ID").table_only(),
        ColumnDescriptor::new("material").titled("Material"),
        ColumnDescriptor::new("supplier").titled("Supplier"),
        ColumnDescriptor::new("paid").titled("Paid"),
        ColumnDescriptor::new("price").titled("Price"),
        ColumnDescriptor::new("quantity").titled("Quantity"),
    ];
    if let Ok(amount) = ComputedExpr::parse("quantity * price") {
        columns.push(
            ColumnDescriptor::new("amount")
                .titled("Amount")
                .typed(SemanticType::Number)
                .computed(amount),
        );
    }
    columns.push(ColumnDescriptor::new("created_at").titled("Created").table_only());

    let mut schema = TableSchema::new(PURCHASE_TABLE).with_columns(columns);
    schema.title = Some("Material purchase".to_owned());
    schema.date_filter_column = Some("created_at".to_owned());
    schema.search_column = Some("material".to_owned());
    schema
}

/// Introspection rows matching the demo table, Postgres spelling.
pub fn purchase_columns() -> Vec<ColumnInfo> {
    [
        ("id", "bigint"),
        ("material", "text"),
        ("supplier", "character varying"),
        ("paid", "boolean"),
        ("price", "numeric"),
        ("quantity", "integer"),
        ("created_at", "timestamp with time zone"),
        ("user_id", "uuid"),
    ]
    .into_iter()
    .map(|(name, data_type)| ColumnInfo {
        column_name: name.to_owned(),
        data_type: data_type.to_owned(),
    })
    .collect()
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("tabula.db");
    Ok((dir, db_path))
}

pub fn fixture_date() -> Date {
    reference_start().date() + Duration::days(120)
}

fn reference_start() -> OffsetDateTime {
    Date::from_calendar_date(REFERENCE_YEAR, Month::January, 1)
        .map(|date| date.midnight().assume_utc())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
