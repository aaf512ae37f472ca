// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use tabula_app::{DateFilter, RecordKey, SearchFilter, format_date};

/// `column=ilike.*term*`, a case-insensitive literal substring match.
pub(crate) fn search_pair(search: &SearchFilter) -> (String, String) {
    (
        search.column.clone(),
        format!("ilike.*{}*", escape_pattern(&search.term)),
    )
}

// LIKE wildcards are backslash-escaped. PostgREST rewrites every `*` to `%`
// and offers no escape for it, so `*` is dropped from the term.
fn escape_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        match ch {
            '*' => {}
            '%' | '_' | '\\' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Inclusive calendar-day bounds. The upper bound is the exclusive start of
/// the following day so timestamps late on `to` still match.
pub(crate) fn date_pairs(filter: &DateFilter) -> Vec<(String, String)> {
    let mut pairs = vec![(
        filter.column.clone(),
        format!("gte.{}", format_date(filter.range.from())),
    )];
    if let Some(next) = filter.range.to().next_day() {
        pairs.push((filter.column.clone(), format!("lt.{}", format_date(next))));
    }
    pairs
}

pub(crate) fn eq_value(key: &RecordKey) -> String {
    format!("eq.{}", quote(key.as_str()))
}

pub(crate) fn in_list(keys: &[RecordKey]) -> String {
    let values = keys
        .iter()
        .map(|key| quote(key.as_str()))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({values})")
}

// Values with filter syntax characters are double-quoted.
fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'));
    if plain {
        return value.to_owned();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Total row count from `Content-Range: 0-9/25` or `*/0`. An unknown total
/// (`0-9/*`) yields `None`.
pub(crate) fn parse_content_range(raw: &str) -> Option<usize> {
    let (_, total) = raw.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{date_pairs, eq_value, in_list, parse_content_range, search_pair};
    use tabula_app::{DateFilter, DateRange, RecordKey, SearchFilter};
    use time::macros::date;

    #[test]
    fn content_range_forms() {
        assert_eq!(parse_content_range("0-9/25"), Some(25));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-9/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn date_range_is_inclusive_of_last_day() {
        let filter = DateFilter {
            column: "created_at".to_owned(),
            range: DateRange::new(date!(2026 - 03 - 01), date!(2026 - 03 - 31)),
        };
        assert_eq!(
            date_pairs(&filter),
            vec![
                ("created_at".to_owned(), "gte.2026-03-01".to_owned()),
                ("created_at".to_owned(), "lt.2026-04-01".to_owned()),
            ]
        );
    }

    #[test]
    fn keys_are_quoted_only_when_needed() {
        let keys = [RecordKey::from(3), RecordKey::from("a,b"), RecordKey::from("say \"hi\"")];
        assert_eq!(in_list(&keys), r#"in.(3,"a,b","say \"hi\"")"#);
        assert_eq!(
            eq_value(&RecordKey::from("5f1c-22")),
            "eq.5f1c-22"
        );
    }

    #[test]
    fn search_wraps_term_in_wildcards() {
        let search = SearchFilter {
            column: "material".to_owned(),
            term: "mai".to_owned(),
        };
        assert_eq!(
            search_pair(&search),
            ("material".to_owned(), "ilike.*mai*".to_owned())
        );
    }

    #[test]
    fn search_term_wildcards_are_literal() {
        let search = SearchFilter {
            column: "material".to_owned(),
            term: "50%_off\\*".to_owned(),
        };
        assert_eq!(
            search_pair(&search).1,
            r"ilike.*50\%\_off\\*"
        );
    }
}
