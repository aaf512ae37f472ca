// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod filters;

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tabula_app::{
    ColumnInfo, OperationKind, Page, PageQuery, Record, RecordKey, RemoteError, SchemaSource,
    TableGateway, validate_identifier,
};
use url::Url;

use filters::{date_pairs, eq_value, in_list, parse_content_range, search_pair};

const REST_PREFIX: &str = "rest/v1";
const COLUMNS_RPC: &str = "pg_table_columns";

/// PostgREST-style gateway: one HTTP request per operation, no retries.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            bail!("remote.base_url must not be empty");
        }
        Url::parse(&base_url)
            .with_context(|| format!("remote.base_url {base_url:?} is not a valid URL"))?;

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_owned),
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, operation: OperationKind, path: &str) -> Result<Url, RemoteError> {
        let raw = format!("{}/{REST_PREFIX}/{path}", self.base_url);
        Url::parse(&raw)
            .map_err(|error| RemoteError::new(operation, format!("invalid URL {raw:?}: {error}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        tracing::debug!(%method, url = %url, "remote request");
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder
                .header("apikey", key)
                .header(AUTHORIZATION, format!("Bearer {key}")),
            None => builder,
        }
    }

    fn send(&self, operation: OperationKind, builder: RequestBuilder) -> Result<Response, RemoteError> {
        builder
            .send()
            .map_err(|error| connection_error(operation, &self.base_url, self.timeout, &error))
    }

    /// Sends a request whose successful body is a JSON array of rows.
    fn rows(&self, operation: OperationKind, builder: RequestBuilder) -> Result<Vec<Record>, RemoteError> {
        let response = self.send(operation, builder)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(operation, status, &body));
        }
        decode_rows(operation, response)
    }
}

impl TableGateway for Client {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, RemoteError> {
        query.validate()?;
        let mut url = self.endpoint(OperationKind::Read, &query.collection)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            if let Some(search) = &query.search {
                let (column, value) = search_pair(search);
                pairs.append_pair(&column, &value);
            }
            if let Some(date) = &query.date {
                for (column, value) in date_pairs(date) {
                    pairs.append_pair(&column, &value);
                }
            }
        }

        let (start, end) = query.window();
        let builder = self
            .request(Method::GET, url)
            .header("Range-Unit", "items")
            .header("Range", format!("{start}-{end}"))
            .header("Prefer", "count=exact");
        let response = self.send(OperationKind::Read, builder)?;
        let status = response.status();
        let total = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range);

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Page {
                records: Vec::new(),
                total: total.unwrap_or(0),
            });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(OperationKind::Read, status, &body));
        }

        let records = decode_rows(OperationKind::Read, response)?;
        let total = total.unwrap_or(start + records.len());
        Ok(Page { records, total })
    }

    fn insert(&self, collection: &str, record: &Record) -> Result<Vec<Record>, RemoteError> {
        validate_identifier(OperationKind::Insert, "collection", collection)?;
        let url = self.endpoint(OperationKind::Insert, collection)?;
        let builder = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&record.to_json());
        self.rows(OperationKind::Insert, builder)
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
        let mut url = self.endpoint(OperationKind::Delete, collection)?;
        url.query_pairs_mut().append_pair(primary_key, &in_list(keys));
        let builder = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation");
        self.rows(OperationKind::Delete, builder)
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
        let mut url = self.endpoint(OperationKind::Update, collection)?;
        url.query_pairs_mut().append_pair(primary_key, &eq_value(key));
        let builder = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&fields.to_json());
        self.rows(OperationKind::Update, builder)
    }
}

impl SchemaSource for Client {
    fn table_columns(&self, collection: &str) -> Result<Vec<ColumnInfo>, RemoteError> {
        validate_identifier(OperationKind::Introspect, "collection", collection)?;
        let url = self.endpoint(OperationKind::Introspect, &format!("rpc/{COLUMNS_RPC}"))?;
        let builder = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "tablename": collection }));
        let response = self.send(OperationKind::Introspect, builder)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(OperationKind::Introspect, status, &body));
        }
        response.json().map_err(|error| {
            RemoteError::new(
                OperationKind::Introspect,
                format!("decode column list: {error}"),
            )
        })
    }
}

fn decode_rows(operation: OperationKind, response: Response) -> Result<Vec<Record>, RemoteError> {
    let body: serde_json::Value = response
        .json()
        .map_err(|error| RemoteError::new(operation, format!("decode response body: {error}")))?;
    match body {
        serde_json::Value::Array(rows) => Ok(rows.iter().filter_map(Record::from_json).collect()),
        serde_json::Value::Object(_) => Ok(Record::from_json(&body).into_iter().collect()),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(RemoteError::new(
            operation,
            format!("expected a JSON array of rows, got {other}"),
        )),
    }
}

fn connection_error(
    operation: OperationKind,
    base_url: &str,
    timeout: Duration,
    error: &reqwest::Error,
) -> RemoteError {
    let message = if error.is_timeout() {
        format!(
            "{base_url} did not answer within {}s -- raise remote.timeout or check the server",
            timeout.as_secs()
        )
    } else {
        format!("cannot reach {base_url} -- check remote.base_url and your network ({error})")
    };
    RemoteError::new(operation, message)
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn clean_error_response(operation: OperationKind, status: StatusCode, body: &str) -> RemoteError {
    if let Ok(parsed) = serde_json::from_str::<PostgrestError>(body) {
        let parts = [parsed.message, parsed.details, parsed.hint]
            .into_iter()
            .flatten()
            .map(|part| part.trim().to_owned())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        if !parts.is_empty() {
            return RemoteError::new(operation, parts.join(" -- "));
        }
    }

    let body = body.trim();
    if !body.is_empty() && body.len() < 100 && !body.contains('{') {
        return RemoteError::new(
            operation,
            format!("server error ({}): {body}", status.as_u16()),
        );
    }

    let reason = status.canonical_reason().unwrap_or("unknown status");
    RemoteError::new(
        operation,
        format!("server returned {} {reason}", status.as_u16()),
    )
}
