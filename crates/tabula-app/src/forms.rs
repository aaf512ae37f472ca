// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

use thiserror::Error;
use time::Date;

use crate::{
    ColumnDescriptor, ColumnTypes, Record, SemanticType, TableSchema, Value, format_date,
    parse_datetime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Add,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Toggle,
    Date,
    Numeric,
    Text,
}

impl InputKind {
    pub const fn for_type(semantic_type: SemanticType) -> Self {
        match semantic_type {
            SemanticType::Boolean => Self::Toggle,
            SemanticType::Date => Self::Date,
            SemanticType::Number => Self::Numeric,
            SemanticType::Text => Self::Text,
        }
    }

    pub const fn hint(self) -> &'static str {
        match self {
            Self::Toggle => "space to toggle",
            Self::Date => "YYYY-MM-DD",
            Self::Numeric => "number",
            Self::Text => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Bool(bool),
    Text(String),
}

impl FormValue {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Bool(_) => false,
            Self::Text(text) => text.trim().is_empty(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Bool(true) => "[x]".to_owned(),
            Self::Bool(false) => "[ ]".to_owned(),
            Self::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct FormError {
    pub field: String,
    pub reason: String,
}

impl FormError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Live values of an open add or edit dialog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormState {
    values: BTreeMap<String, FormValue>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the form from a record snapshot.
    pub fn from_record(schema: &TableSchema, types: &ColumnTypes, record: &Record) -> Self {
        let mut form = Self::new();
        for column in &schema.columns {
            let Some(value) = record.get(&column.field) else {
                continue;
            };
            // A boolean column holding anything but a bool or null stays
            // untouched unless the user toggles it.
            let seeded = match (schema.semantic_type(&column.field, types), value) {
                (SemanticType::Boolean, Value::Bool(flag)) => FormValue::Bool(*flag),
                (SemanticType::Boolean, Value::Null) => FormValue::Bool(false),
                (SemanticType::Boolean, _) => continue,
                (_, other) => FormValue::Text(other.canonical()),
            };
            form.values.insert(column.field.clone(), seeded);
        }
        form
    }

    pub fn get(&self, field: &str) -> Option<&FormValue> {
        self.values.get(field)
    }

    pub fn text(&self, field: &str) -> &str {
        match self.values.get(field) {
            Some(FormValue::Text(text)) => text,
            _ => "",
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: FormValue) {
        self.values.insert(field.into(), value);
    }

    /// Replaces a text value. Numeric inputs refuse anything that is not a
    /// partial number.
    pub fn set_text(&mut self, field: &str, kind: InputKind, text: &str) -> bool {
        if kind == InputKind::Numeric && !is_partial_number(text) {
            return false;
        }
        self.values
            .insert(field.to_owned(), FormValue::Text(text.to_owned()));
        true
    }

    pub fn push_char(&mut self, field: &str, kind: InputKind, ch: char) -> bool {
        let mut next = self.text(field).to_owned();
        next.push(ch);
        self.set_text(field, kind, &next)
    }

    pub fn pop_char(&mut self, field: &str) {
        if let Some(FormValue::Text(text)) = self.values.get_mut(field) {
            text.pop();
        }
    }

    pub fn toggle(&mut self, field: &str) {
        let current = matches!(self.values.get(field), Some(FormValue::Bool(true)));
        self.values.insert(field.to_owned(), FormValue::Bool(!current));
    }

    pub fn is_blank(&self, field: &str) -> bool {
        self.values.get(field).is_none_or(FormValue::is_blank)
    }
}

fn is_partial_number(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let mut dots = 0;
    for ch in digits.chars() {
        match ch {
            '0'..='9' => {}
            '.' => dots += 1,
            _ => return false,
        }
    }
    dots <= 1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundInput {
    pub field: String,
    pub label: String,
    pub kind: InputKind,
    pub value: FormValue,
}

/// Primary key, creation timestamp, and computed columns never appear in a
/// form. Otherwise the mode's visibility flag decides.
pub fn is_form_field(schema: &TableSchema, column: &ColumnDescriptor, mode: FormMode) -> bool {
    if column.field == schema.primary_key
        || schema.created_at.as_deref() == Some(column.field.as_str())
        || column.is_computed()
    {
        return false;
    }
    match mode {
        FormMode::Add => column.show_in_add,
        FormMode::Edit => column.show_in_edit,
    }
}

pub fn render(
    schema: &TableSchema,
    types: &ColumnTypes,
    column: &ColumnDescriptor,
    form: &mut FormState,
    mode: FormMode,
    today: Date,
) -> Option<BoundInput> {
    if !is_form_field(schema, column, mode) {
        return None;
    }
    let kind = InputKind::for_type(schema.semantic_type(&column.field, types));
    if mode == FormMode::Add && kind == InputKind::Date && form.is_blank(&column.field) {
        form.set(column.field.clone(), FormValue::Text(format_date(today)));
    }
    let value = match (kind, form.get(&column.field)) {
        (_, Some(value)) => value.clone(),
        (InputKind::Toggle, None) => FormValue::Bool(false),
        (_, None) => FormValue::Text(String::new()),
    };
    Some(BoundInput {
        field: column.field.clone(),
        label: column.label().to_owned(),
        kind,
        value,
    })
}

pub fn render_form(
    schema: &TableSchema,
    types: &ColumnTypes,
    form: &mut FormState,
    mode: FormMode,
    today: Date,
) -> Vec<BoundInput> {
    schema
        .columns
        .iter()
        .filter_map(|column| render(schema, types, column, form, mode, today))
        .collect()
}

/// Converts the rendered fields of a form into a typed record.
pub fn form_to_record(
    schema: &TableSchema,
    types: &ColumnTypes,
    form: &FormState,
    mode: FormMode,
    today: Date,
) -> Result<Record, FormError> {
    let mut record = Record::new();
    for column in &schema.columns {
        if !is_form_field(schema, column, mode) {
            continue;
        }
        let field = column.field.as_str();
        let kind = InputKind::for_type(schema.semantic_type(field, types));
        let value = match kind {
            InputKind::Toggle => match (form.get(field), mode) {
                (None, FormMode::Edit) => continue,
                (current, _) => Value::Bool(matches!(current, Some(FormValue::Bool(true)))),
            },
            InputKind::Numeric => {
                let raw = form.text(field).trim();
                if raw.is_empty() {
                    Value::Null
                } else {
                    match raw.parse::<f64>() {
                        Ok(number) if number.is_finite() => Value::Number(number),
                        _ => return Err(FormError::new(field, format!("{raw:?} is not a number"))),
                    }
                }
            }
            InputKind::Date => {
                let raw = form.text(field).trim();
                if raw.is_empty() {
                    match mode {
                        FormMode::Add => Value::date(today),
                        FormMode::Edit => Value::Null,
                    }
                } else {
                    match parse_datetime(raw) {
                        Some(value) => Value::DateTime(value),
                        None => {
                            return Err(FormError::new(
                                field,
                                format!("{raw:?} is not a date, use YYYY-MM-DD"),
                            ));
                        }
                    }
                }
            }
            InputKind::Text => Value::Text(form.text(field).to_owned()),
        };
        record.set(field, value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::{
        FormMode, FormState, FormValue, InputKind, form_to_record, is_form_field, render_form,
    };
    use crate::{
        ColumnDescriptor, ColumnTypes, ComputedExpr, Record, SemanticType, TableSchema, Value,
        diff,
    };
    use time::macros::date;

    fn schema() -> TableSchema {
        TableSchema::new("material_purchase").with_columns(vec![
            ColumnDescriptor::new("id").table_only(),
            ColumnDescriptor::new("material").titled("Material"),
            ColumnDescriptor::new("paid"),
            ColumnDescriptor::new("price"),
            ColumnDescriptor::new("quantity"),
            ColumnDescriptor::new("purchased_on"),
            ColumnDescriptor::new("created_at"),
            ColumnDescriptor::new("amount").computed(
                ComputedExpr::parse("quantity * price").expect("valid expression"),
            ),
        ])
    }

    fn types() -> ColumnTypes {
        [
            ("id", SemanticType::Number),
            ("paid", SemanticType::Boolean),
            ("price", SemanticType::Number),
            ("quantity", SemanticType::Number),
            ("purchased_on", SemanticType::Date),
            ("created_at", SemanticType::Date),
        ]
        .into_iter()
        .map(|(field, ty)| (field.to_owned(), ty))
        .collect()
    }

    #[test]
    fn key_creation_and_computed_columns_never_render() {
        let schema = schema();
        let mut forced = ColumnDescriptor::new("id");
        forced.show_in_edit = true;
        assert!(!is_form_field(&schema, &forced, FormMode::Edit));

        let mut form = FormState::new();
        let inputs = render_form(&schema, &types(), &mut form, FormMode::Add, date!(2026 - 05 - 01));
        let fields: Vec<&str> = inputs.iter().map(|input| input.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["material", "paid", "price", "quantity", "purchased_on"]
        );
        assert_eq!(inputs[0].label, "Material");
        assert_eq!(inputs[1].kind, InputKind::Toggle);
        assert_eq!(inputs[2].kind, InputKind::Numeric);
        assert_eq!(inputs[4].kind, InputKind::Date);
    }

    #[test]
    fn add_mode_prefills_blank_dates_with_today() {
        let mut form = FormState::new();
        let inputs = render_form(&schema(), &types(), &mut form, FormMode::Add, date!(2026 - 05 - 01));
        let date_input = inputs
            .iter()
            .find(|input| input.field == "purchased_on")
            .expect("date input");
        assert_eq!(date_input.value, FormValue::Text("2026-05-01".to_owned()));
    }

    #[test]
    fn numeric_binding_rejects_letters() {
        let mut form = FormState::new();
        assert!(form.push_char("price", InputKind::Numeric, '-'));
        assert!(form.push_char("price", InputKind::Numeric, '1'));
        assert!(form.push_char("price", InputKind::Numeric, '.'));
        assert!(!form.push_char("price", InputKind::Numeric, '.'));
        assert!(!form.push_char("price", InputKind::Numeric, 'x'));
        assert!(form.push_char("price", InputKind::Numeric, '5'));
        assert_eq!(form.text("price"), "-1.5");
        assert!(form.push_char("material", InputKind::Text, 'x'));
    }

    #[test]
    fn blank_add_date_becomes_today_on_submit() {
        let mut form = FormState::new();
        form.set("material", FormValue::Text("Maize".to_owned()));
        let record = form_to_record(&schema(), &types(), &form, FormMode::Add, date!(2026 - 05 - 01))
            .expect("valid form");
        assert_eq!(
            record.get("purchased_on"),
            Some(&Value::date(date!(2026 - 05 - 01)))
        );
        assert_eq!(record.get("paid"), Some(&Value::Bool(false)));
        assert_eq!(record.get("price"), Some(&Value::Null));
        assert!(!record.contains("amount"));
        assert!(!record.contains("id"));
    }

    #[test]
    fn invalid_date_names_the_field() {
        let mut form = FormState::new();
        form.set("purchased_on", FormValue::Text("soon".to_owned()));
        let error = form_to_record(&schema(), &types(), &form, FormMode::Edit, date!(2026 - 05 - 01))
            .expect_err("invalid date");
        assert_eq!(error.field, "purchased_on");
    }

    #[test]
    fn edit_form_seeds_from_snapshot() {
        let snapshot = Record::new()
            .with("id", Value::Number(4.0))
            .with("material", Value::text("Maize"))
            .with("paid", Value::Bool(true))
            .with("price", Value::Number(100.0));
        let form = FormState::from_record(&schema(), &types(), &snapshot);
        assert_eq!(form.text("price"), "100");
        assert_eq!(form.get("paid"), Some(&FormValue::Bool(true)));
        assert_eq!(form.text("material"), "Maize");
    }

    #[test]
    fn unreadable_boolean_is_left_out_of_the_edit() {
        let schema = schema();
        let types = types();
        let today = date!(2026 - 05 - 01);
        let snapshot = Record::new()
            .with("id", Value::Number(4.0))
            .with("material", Value::text("Maize"))
            .with("paid", Value::text("yes"));

        let form = FormState::from_record(&schema, &types, &snapshot);
        assert_eq!(form.get("paid"), None);
        let edited = form_to_record(&schema, &types, &form, FormMode::Edit, today)
            .expect("valid form");
        assert!(!edited.contains("paid"));
        assert!(diff(&schema, &snapshot, &edited).is_empty());

        let mut form = form;
        form.toggle("paid");
        let edited = form_to_record(&schema, &types, &form, FormMode::Edit, today)
            .expect("valid form");
        assert_eq!(
            diff(&schema, &snapshot, &edited).get("paid"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn null_boolean_opens_unchecked() {
        let snapshot = Record::new().with("paid", Value::Null);
        let form = FormState::from_record(&schema(), &types(), &snapshot);
        assert_eq!(form.get("paid"), Some(&FormValue::Bool(false)));
    }
}
