//! BigQuery Query Engine
//!
//! Runs synchronous queries through the `jobs.query` REST endpoint, follows
//! `pageToken` through `jobs.getQueryResults` until every row is in, and
//! decodes the `{f: [{v: ...}]}` row format into typed records using the
//! response schema.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use insight_cascade_core::Record;
use insight_cascade_llm::build_http_client;

use crate::engine::{QueryEngine, QueryError};

/// Default BigQuery REST base
const BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2/";

/// Upper bound on result pages fetched for one query
const MAX_RESULT_PAGES: usize = 100;

/// Connection settings for one project.
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub location: Option<String>,
    pub access_token: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub proxy: Option<String>,
}

/// `jobs.query` client.
pub struct BigQueryEngine {
    config: BigQueryConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    schema: Option<TableFieldSchemaList>,
    #[serde(default)]
    rows: Option<Vec<Row>>,
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    errors: Option<Vec<ErrorProto>>,
    #[serde(default)]
    page_token: Option<String>,
    /// uint64 sent as a string
    #[serde(default)]
    total_rows: Option<Value>,
    #[serde(default)]
    job_reference: Option<JobReference>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

/// One page of a `jobs.query` or `jobs.getQueryResults` answer.
#[derive(Debug)]
struct ResultPage {
    fields: Vec<FieldSchema>,
    rows: Vec<Vec<Value>>,
    page_token: Option<String>,
    total_rows: Option<u64>,
    job_reference: Option<JobReference>,
}

#[derive(Debug, Deserialize)]
struct TableFieldSchemaList {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

/// One column of the response schema.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

impl BigQueryEngine {
    pub fn new(config: BigQueryConfig) -> Result<Self, QueryError> {
        let client = build_http_client(
            config.proxy.as_deref(),
            Some(Duration::from_secs(config.timeout_secs)),
        )
        .map_err(|e| QueryError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> Result<url::Url, QueryError> {
        let base = self.config.base_url.as_deref().unwrap_or(BIGQUERY_API_URL);
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        url::Url::parse(&base)
            .and_then(|u| u.join(&format!("projects/{}/queries", self.config.project_id)))
            .map_err(|e| QueryError::Transport(format!("Invalid BigQuery endpoint: {}", e)))
    }

    /// `jobs.getQueryResults` URL for the page after `page_token`.
    fn results_endpoint(&self, job: &JobReference, page_token: &str) -> Result<url::Url, QueryError> {
        let mut url = self
            .endpoint()?
            .join(&format!("queries/{}", job.job_id))
            .map_err(|e| QueryError::Transport(format!("Invalid BigQuery endpoint: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageToken", page_token);
            query.append_pair(
                "timeoutMs",
                &self.config.timeout_secs.saturating_mul(1000).to_string(),
            );
            if let Some(location) = job.location.as_ref().or(self.config.location.as_ref()) {
                query.append_pair("location", location);
            }
        }
        Ok(url)
    }

    fn build_request_body(&self, query: &str) -> Value {
        let mut body = serde_json::json!({
            "query": query,
            "useLegacySql": false,
            "timeoutMs": self.config.timeout_secs.saturating_mul(1000),
            "requestId": uuid::Uuid::new_v4().to_string(),
        });
        if let Some(location) = &self.config.location {
            body["location"] = Value::String(location.clone());
        }
        body
    }

    /// Decode one successful result page.
    fn parse_response(body: &str) -> Result<ResultPage, QueryError> {
        let response: QueryResponse = serde_json::from_str(body)
            .map_err(|e| QueryError::Malformed(format!("Failed to parse response: {}", e)))?;

        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(QueryError::Rejected(message));
        }
        if response.job_complete == Some(false) {
            return Err(QueryError::Incomplete(
                "job still running after the request timeout".to_string(),
            ));
        }

        let total_rows = match response.total_rows {
            Some(Value::String(s)) => s.parse::<u64>().ok(),
            Some(Value::Number(n)) => n.as_u64(),
            _ => None,
        };
        Ok(ResultPage {
            fields: response.schema.map(|s| s.fields).unwrap_or_default(),
            rows: response
                .rows
                .unwrap_or_default()
                .into_iter()
                .map(|row| row.f.into_iter().map(|cell| cell.v).collect())
                .collect(),
            page_token: response.page_token.filter(|t| !t.is_empty()),
            total_rows,
            job_reference: response.job_reference,
        })
    }

    /// Decode the collected rows, refusing a result shorter than `totalRows`.
    fn finish(
        fields: &[FieldSchema],
        rows: Vec<Vec<Value>>,
        total_rows: Option<u64>,
    ) -> Result<Vec<Record>, QueryError> {
        if let Some(total) = total_rows {
            if (rows.len() as u64) < total {
                return Err(QueryError::Incomplete(format!(
                    "received {} of {} rows",
                    rows.len(),
                    total
                )));
            }
        }
        Ok(decode_rows(fields, rows))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, QueryError> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::parse_http_error(status, &body));
        }
        Ok(body)
    }

    fn parse_http_error(status: reqwest::StatusCode, body: &str) -> QueryError {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.chars().take(500).collect());
        match status.as_u16() {
            401 | 403 => QueryError::Auth(message),
            400 | 404 => QueryError::Rejected(message),
            _ => QueryError::Transport(format!("HTTP {}: {}", status.as_u16(), message)),
        }
    }
}

#[async_trait]
impl QueryEngine for BigQueryEngine {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    async fn execute(&self, query: &str) -> Result<Vec<Record>, QueryError> {
        if self.config.access_token.is_empty() {
            return Err(QueryError::Auth("no BigQuery access token configured".to_string()));
        }

        let body = self
            .send(
                self.client
                    .post(self.endpoint()?)
                    .json(&self.build_request_body(query)),
            )
            .await?;
        let first = Self::parse_response(&body)?;
        let total_rows = first.total_rows;
        let job = first.job_reference;
        let mut rows = first.rows;
        let mut page_token = first.page_token;
        let mut pages = 1;

        while let Some(token) = page_token.take() {
            let Some(job) = &job else {
                return Err(QueryError::Malformed(
                    "page token without a job reference".to_string(),
                ));
            };
            if pages >= MAX_RESULT_PAGES {
                return Err(QueryError::Incomplete(format!(
                    "result spans more than {} pages",
                    MAX_RESULT_PAGES
                )));
            }
            let body = self
                .send(self.client.get(self.results_endpoint(job, &token)?))
                .await?;
            let page = Self::parse_response(&body)?;
            rows.extend(page.rows);
            page_token = page.page_token;
            pages += 1;
        }

        let records = Self::finish(&first.fields, rows, total_rows)?;
        tracing::debug!(rows = records.len(), pages, "[BigQuery] query returned");
        Ok(records)
    }
}

// ============================================================================
// Row decoding
// ============================================================================

/// Convert raw `f/v` rows into records keyed by field name, in schema order.
pub fn decode_rows(fields: &[FieldSchema], rows: Vec<Vec<Value>>) -> Vec<Record> {
    rows.into_iter()
        .map(|cells| {
            let mut record = Record::new();
            for (field, raw) in fields.iter().zip(cells.into_iter()) {
                record.insert(field.name.clone(), decode_cell(field, raw));
            }
            record
        })
        .collect()
}

fn decode_cell(field: &FieldSchema, raw: Value) -> Value {
    let repeated = field.mode.as_deref() == Some("REPEATED");
    let text = match &raw {
        Value::Null => return Value::Null,
        Value::String(s) if !repeated => s.clone(),
        other => return Value::String(other.to_string()),
    };

    match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => match text.parse::<f64>() {
            Ok(n) if n.is_finite() => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::String(text)),
            _ => Value::String(text),
        },
        "BOOLEAN" | "BOOL" => match text.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        "TIMESTAMP" => timestamp_to_rfc3339(&text)
            .map(Value::String)
            .unwrap_or(Value::String(text)),
        "RECORD" | "STRUCT" => Value::String(raw.to_string()),
        _ => Value::String(text),
    }
}

/// BigQuery returns timestamps as fractional epoch seconds.
fn timestamp_to_rfc3339(text: &str) -> Option<String> {
    let seconds: f64 = text.parse().ok()?;
    let micros = (seconds * 1_000_000.0).round() as i64;
    chrono::DateTime::from_timestamp_micros(micros).map(|dt| dt.to_rfc3339())
}
