//! BigQuery REST 后端（jobs.query 同步接口）

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{QueryParameter, Row, Warehouse, WarehouseQuery};
use crate::config::WarehouseConfig;
use crate::error::DataAccessError;

pub struct BigQueryWarehouse {
    client: reqwest::Client,
    api_base_url: String,
    access_token: String,
    timeout_seconds: u64,
    max_rows: usize,
}

impl BigQueryWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self> {
        if config.access_token.trim().is_empty() {
            anyhow::bail!(
                "BigQuery access token is missing, set warehouse.access_token or KPI_ENGINE_BQ_ACCESS_TOKEN"
            );
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            timeout_seconds: config.timeout_seconds,
            max_rows: config.max_rows,
        })
    }

    fn request_body(&self, query: &WarehouseQuery) -> Value {
        let mut body = json!({
            "query": query.sql,
            "useLegacySql": false,
            "maxResults": self.max_rows,
            "timeoutMs": self.timeout_seconds * 1000,
        });
        if !query.parameters.is_empty() {
            body["parameterMode"] = json!("NAMED");
            body["queryParameters"] = Value::Array(
                query.parameters.iter().map(parameter_json).collect(),
            );
        }
        body
    }
}

fn parameter_json(parameter: &QueryParameter) -> Value {
    json!({
        "name": parameter.name,
        "parameterType": { "type": parameter.kind },
        "parameterValue": { "value": parameter.value },
    })
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn execute(&self, query: &WarehouseQuery) -> Result<Vec<Row>, DataAccessError> {
        let url = format!(
            "{}/projects/{}/queries",
            self.api_base_url, query.location.project_id
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&self.request_body(query))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DataAccessError::Timeout(self.timeout_seconds)
                } else {
                    DataAccessError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), error_message(&detail));
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                DataAccessError::Unavailable(message)
            } else {
                DataAccessError::Rejected(message)
            });
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| DataAccessError::Decode(e.to_string()))?;
        decode_rows(body)
    }
}

/// BigQuery 错误体形如 `{"error": {"message": "..."}}`
fn error_message(detail: &str) -> String {
    serde_json::from_str::<Value>(detail)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| detail.chars().take(300).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

/// 按schema把 `rows[].f[].v` 的字符串值还原成JSON类型
pub(crate) fn decode_rows(response: QueryResponse) -> Result<Vec<Row>, DataAccessError> {
    if !response.job_complete {
        return Err(DataAccessError::Unavailable(
            "query job did not complete within the request timeout".to_string(),
        ));
    }
    let fields = response.schema.map(|s| s.fields).unwrap_or_default();

    response
        .rows
        .into_iter()
        .map(|row| {
            if row.f.len() != fields.len() {
                return Err(DataAccessError::Decode(format!(
                    "row has {} cells but schema has {} fields",
                    row.f.len(),
                    fields.len()
                )));
            }
            Ok(fields
                .iter()
                .zip(row.f)
                .map(|(field, cell)| (field.name.clone(), convert_cell(&field.kind, cell.v)))
                .collect())
        })
        .collect()
}

fn convert_cell(kind: &str, value: Value) -> Value {
    let Value::String(raw) = value else {
        return value;
    };
    match kind {
        "INTEGER" | "INT64" => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(raw)),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(raw)),
        "BOOLEAN" | "BOOL" => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw),
        },
        _ => Value::String(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_typed_rows() {
        let response: QueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "schema": { "fields": [
                { "name": "segment", "type": "STRING" },
                { "name": "cost", "type": "FLOAT" },
                { "name": "clicks", "type": "INTEGER" },
                { "name": "roas", "type": "FLOAT" }
            ]},
            "rows": [
                { "f": [ { "v": "c-1" }, { "v": "120.5" }, { "v": "42" }, { "v": null } ] }
            ]
        }))
        .unwrap();

        let rows = decode_rows(response).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["segment"], json!("c-1"));
        assert_eq!(rows[0]["cost"], json!(120.5));
        assert_eq!(rows[0]["clicks"], json!(42));
        assert_eq!(rows[0]["roas"], Value::Null);
    }

    #[test]
    fn test_empty_result_is_zero_rows() {
        let response: QueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "schema": { "fields": [ { "name": "cost", "type": "FLOAT" } ] }
        }))
        .unwrap();
        assert!(decode_rows(response).unwrap().is_empty());
    }

    #[test]
    fn test_incomplete_job_is_transient() {
        let response: QueryResponse =
            serde_json::from_value(json!({ "jobComplete": false })).unwrap();
        let err = decode_rows(response).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_message_extraction() {
        let detail = r#"{"error": {"code": 400, "message": "Syntax error"}}"#;
        assert_eq!(error_message(detail), "Syntax error");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let config = WarehouseConfig {
            access_token: String::new(),
            ..WarehouseConfig::default()
        };
        assert!(BigQueryWarehouse::new(&config).is_err());
    }
}
