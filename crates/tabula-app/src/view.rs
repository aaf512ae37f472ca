// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::cmp::Ordering;
use std::collections::BTreeSet;

use time::Date;

use crate::{Record, RecordKey, Value};

pub const PAGE_SIZES: [usize; 5] = [10, 20, 30, 40, 50];
pub const DEFAULT_PAGE_SIZE: usize = 10;

pub fn is_allowed_page_size(size: usize) -> bool {
    PAGE_SIZES.contains(&size)
}

/// Inclusive calendar-day range. Bounds are kept in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    from: Date,
    to: Date,
}

impl DateRange {
    pub fn new(from: Date, to: Date) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    /// The whole calendar month containing `day`.
    pub fn month_of(day: Date) -> Self {
        let first = day.replace_day(1).unwrap_or(day);
        let last = first
            .replace_day(day.month().length(day.year()))
            .unwrap_or(first);
        Self::new(first, last)
    }

    pub const fn from(&self) -> Date {
        self.from
    }

    pub const fn to(&self) -> Date {
        self.to
    }

    pub fn contains(&self, day: Date) -> bool {
        self.from <= day && day <= self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Per-collection grid state. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub page: usize,
    pub page_size: usize,
    pub search: String,
    pub search_column: Option<String>,
    pub date_range: Option<DateRange>,
    pub sort: Option<SortSpec>,
    pub hidden_columns: BTreeSet<String>,
    pub selected: BTreeSet<RecordKey>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl ViewState {
    pub fn with_page_size(page_size: usize) -> Self {
        let page_size = if is_allowed_page_size(page_size) {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };
        Self {
            page: 1,
            page_size,
            search: String::new(),
            search_column: None,
            date_range: None,
            sort: None,
            hidden_columns: BTreeSet::new(),
            selected: BTreeSet::new(),
        }
    }

    /// asc, then desc, then unsorted.
    pub fn cycle_sort(&mut self, field: &str) {
        self.sort = match self.sort.take() {
            Some(spec) if spec.field == field => match spec.direction {
                SortDirection::Asc => Some(SortSpec {
                    field: spec.field,
                    direction: SortDirection::Desc,
                }),
                SortDirection::Desc => None,
            },
            _ => Some(SortSpec {
                field: field.to_owned(),
                direction: SortDirection::Asc,
            }),
        };
    }
}

pub fn total_pages(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

pub fn has_next_page(page: usize, total: usize, page_size: usize) -> bool {
    page < total_pages(total, page_size)
}

pub const fn has_previous_page(page: usize) -> bool {
    page > 1
}

/// Stable client-side ordering of the rendered page. `key` yields the value
/// shown in the sorted column; nulls lead in either direction.
pub fn sort_records<F>(records: &mut [Record], direction: SortDirection, key: F)
where
    F: Fn(&Record) -> Value,
{
    records.sort_by(|left, right| {
        let (left, right) = (key(left), key(right));
        match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                let ordering = compare_values(&left, &right);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        }
    });
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
        _ => left
            .canonical()
            .to_lowercase()
            .cmp(&right.canonical().to_lowercase()),
    }
}
