//! HTTP client for the statement parsing service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use stmtflow_core::models::ParseResults;
use stmtflow_core::{ParsingService, ServiceError};

use super::{check_status, http_client, network};

const FILE_CLASS: &str = "bank_statement";

pub struct HttpParsingService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpParsingService {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
    }

    fn post(&self, path: &str, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("x-api-key", &self.api_key)
            .json(body)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ServiceError> {
        let response = self.get(path).send().await.map_err(network)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ParsingService for HttpParsingService {
    async fn ensure_user(&self, user_key: &str, display_name: &str) -> Result<String, ServiceError> {
        let response = self
            .get(&format!("end_users/{user_key}"))
            .send()
            .await
            .map_err(network)?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response).await?;
            debug!("Remote user {} exists", user_key);
            return Ok(user_key.to_string());
        }

        let body = json!({ "end_user": { "end_user_id": user_key, "name": display_name } });
        let response = self.post("end_users", &body).send().await.map_err(network)?;
        check_status(response).await?;
        info!("Created remote user {} ({})", user_key, display_name);
        Ok(user_key.to_string())
    }

    async fn upload_document(&self, user_id: &str, path: &Path) -> Result<String, ServiceError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "statement.pdf".to_string());
        let body = upload_body(&bytes, &filename, chrono::Utc::now().timestamp());

        let response = self
            .post(&format!("end_users/{user_id}/files"), &body)
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;
        let reply: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        remote_file_id(&reply)
            .ok_or_else(|| ServiceError::InvalidResponse(format!("upload reply without heron_id: {reply}")))
    }

    async fn trigger_parse(&self, user_id: &str) -> Result<(), ServiceError> {
        let response = self
            .post(&format!("end_users/{user_id}/pdfs/parse"), &json!({}))
            .send()
            .await
            .map_err(network)?;
        check_status(response).await?;
        Ok(())
    }

    async fn file_statuses(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        let files = self.get_json(&format!("end_users/{user_id}/files")).await?;
        Ok(statuses_from_files(&files))
    }

    async fn get_results(&self, user_id: &str) -> Result<Option<ParseResults>, ServiceError> {
        let reply = self.get_json(&format!("end_users/{user_id}/transactions")).await?;
        Ok(results_from_reply(reply))
    }
}

fn upload_body(bytes: &[u8], filename: &str, unix_secs: i64) -> Value {
    json!({
        "file_base64": STANDARD.encode(bytes),
        "file_class": FILE_CLASS,
        "filename": filename,
        "reference_id": format!("file_{unix_secs}"),
    })
}

fn remote_file_id(reply: &Value) -> Option<String> {
    match reply.get("heron_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Status string of every file in a `files` listing.
fn statuses_from_files(files: &Value) -> Vec<String> {
    let items: &[Value] = match files {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("files")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    items
        .iter()
        .filter_map(|f| f.get(FILE_CLASS)?.get("status")?.as_str())
        .map(str::to_string)
        .collect()
}

fn results_from_reply(reply: Value) -> Option<ParseResults> {
    let results = ParseResults::from_reply(&reply);
    if results.is_none() {
        warn!("Transactions reply without a transactions_enriched list");
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_statuses_from_file_listing() {
        let files = json!([
            {"heron_id": "f1", "bank_statement": {"status": "processed"}},
            {"heron_id": "f2", "bank_statement": {"status": "new"}},
            {"heron_id": "f3"}
        ]);
        assert_eq!(statuses_from_files(&files), vec!["processed", "new"]);

        let wrapped = json!({"files": [{"bank_statement": {"status": "failed"}}]});
        assert_eq!(statuses_from_files(&wrapped), vec!["failed"]);
        assert!(statuses_from_files(&json!("nope")).is_empty());
    }

    #[test]
    fn test_upload_body_encodes_file() {
        let body = upload_body(b"%PDF-1.4", "jan.pdf", 1_705_312_800);
        assert_eq!(body["file_base64"], "JVBERi0xLjQ=");
        assert_eq!(body["file_class"], "bank_statement");
        assert_eq!(body["reference_id"], "file_1705312800");
    }

    #[test]
    fn test_remote_file_id() {
        assert_eq!(remote_file_id(&json!({"heron_id": "abc"})), Some("abc".to_string()));
        assert_eq!(remote_file_id(&json!({"heron_id": 42})), Some("42".to_string()));
        assert_eq!(remote_file_id(&json!({})), None);
    }

    #[test]
    fn test_results_are_read_tolerantly() {
        let reply = json!({"transactions_enriched": [
            {"id": "t1", "date": "2024-01-02", "description": "Coffee", "amount": "-3.50"},
            {"description": "Salary"}
        ]});
        let results = results_from_reply(reply).unwrap();
        assert_eq!(results.transaction_count(), 2);
        assert_eq!(results.transactions_enriched[0].description.as_deref(), Some("Coffee"));

        let numeric = results_from_reply(json!({"transactions_enriched": [{"id": 17}]})).unwrap();
        assert_eq!(numeric.transactions_enriched[0].id.as_deref(), Some("17"));

        assert_eq!(results_from_reply(json!({"error": "pending"})), None);
        assert_eq!(results_from_reply(json!({"transactions_enriched": "bad"})), None);
    }
}
