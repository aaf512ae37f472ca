// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{Record, TableSchema, Value};

/// Minimal update payload: edited fields that are writable, non-null, and
/// whose canonical form differs from the snapshot. Dates leave as ISO text.
pub fn diff(schema: &TableSchema, original: &Record, edited: &Record) -> Record {
    edited
        .iter()
        .filter(|(field, _)| !schema.is_computed(field) && !schema.is_immutable(field))
        .filter(|(_, value)| !value.is_null())
        .filter(|(field, value)| {
            original
                .get(field)
                .is_none_or(|before| before.canonical() != value.canonical())
        })
        .map(|(field, value)| (field.clone(), normalize(value)))
        .collect()
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::DateTime(_) => Value::Text(value.canonical()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::diff;
    use crate::{ColumnDescriptor, ComputedExpr, Record, TableSchema, Value};
    use time::macros::{date, datetime};

    fn schema() -> TableSchema {
        TableSchema::new("material_purchase").with_columns(vec![
            ColumnDescriptor::new("material"),
            ColumnDescriptor::new("price"),
            ColumnDescriptor::new("amount").computed(
                ComputedExpr::parse("quantity * price").expect("valid expression"),
            ),
        ])
    }

    #[test]
    fn only_changed_price_is_sent() {
        let original = Record::new()
            .with("id", Value::Number(1.0))
            .with("material", Value::text("Maize"))
            .with("price", Value::Number(100.0));
        let edited = Record::new()
            .with("material", Value::text("Maize"))
            .with("price", Value::Number(120.0));

        let changes = diff(&schema(), &original, &edited);
        assert_eq!(changes, Record::new().with("price", Value::Number(120.0)));
    }

    #[test]
    fn immutable_and_computed_fields_are_excluded() {
        let original = Record::new()
            .with("id", Value::Number(1.0))
            .with("created_at", Value::date(date!(2026 - 01 - 01)))
            .with("user_id", Value::text("a"))
            .with("amount", Value::Number(10.0));
        let edited = Record::new()
            .with("id", Value::Number(2.0))
            .with("created_at", Value::date(date!(2026 - 02 - 01)))
            .with("user_id", Value::text("b"))
            .with("amount", Value::Number(99.0));

        assert!(diff(&schema(), &original, &edited).is_empty());
    }

    #[test]
    fn string_equal_values_produce_no_changes() {
        let original = Record::new()
            .with("price", Value::Number(100.0))
            .with("material", Value::text("Maize"));
        let edited = Record::new()
            .with("price", Value::text("100"))
            .with("material", Value::text("Maize"))
            .with("note", Value::Null);

        assert!(diff(&schema(), &original, &edited).is_empty());
    }

    #[test]
    fn dates_are_normalized_to_iso_text() {
        let original = Record::new().with("delivered_at", Value::date(date!(2026 - 01 - 01)));
        let edited = Record::new().with(
            "delivered_at",
            Value::DateTime(datetime!(2026-01-03 12:00:00 UTC)),
        );

        let changes = diff(&schema(), &original, &edited);
        assert_eq!(
            changes.get("delivered_at"),
            Some(&Value::text("2026-01-03T12:00:00Z"))
        );
    }
}
