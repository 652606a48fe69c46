//! Field extraction through an OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use stmtflow_core::models::CompanyFields;
use stmtflow_core::resolver::parse_fields_reply;
use stmtflow_core::{FieldExtractor, ServiceError};

use super::{check_status, http_client, network};

const SYSTEM_PROMPT: &str = "You are an AI that extracts structured data only.";
const EXTRACTION_PROMPT: &str = "Extract: Company or Person name (owner of the bank statement), \
Bank Name, Address. Return JSON {owner, bank_name, address}";

pub struct ChatFieldExtractor {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatFieldExtractor {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl FieldExtractor for ChatFieldExtractor {
    async fn extract(&self, document_text: &str) -> Result<Option<CompanyFields>, ServiceError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&chat_request_body(&self.model, document_text))
            .send()
            .await
            .map_err(network)?;
        let reply: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        let content = reply_content(&reply)
            .ok_or_else(|| ServiceError::InvalidResponse("completion without message content".to_string()))?;
        debug!("Extractor replied with {} chars", content.len());
        Ok(parse_fields_reply(content))
    }
}

fn chat_request_body(model: &str, text: &str) -> Value {
    json!({
        "model": model,
        "temperature": 0.0,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": format!("{EXTRACTION_PROMPT}\n\nPDF First Page:\n{text}") },
        ],
    })
}

fn reply_content(reply: &Value) -> Option<&str> {
    reply
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_body_carries_page_text() {
        let body = chat_request_body("gpt-4o-mini", "ACME CORP\nStatement");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][0]["role"], "system");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("Extract: Company or Person name"));
        assert!(user.ends_with("PDF First Page:\nACME CORP\nStatement"));
    }

    #[test]
    fn test_reply_content_is_read_from_first_choice() {
        let reply = json!({"choices": [{"message": {"role": "assistant", "content": "{\"owner\": \"Acme\"}"}}]});
        let content = reply_content(&reply).unwrap();
        assert_eq!(parse_fields_reply(content).and_then(|f| f.owner), Some("Acme".to_string()));

        assert_eq!(reply_content(&json!({"choices": []})), None);
        assert_eq!(reply_content(&json!({"error": {"message": "quota"}})), None);
    }
}
