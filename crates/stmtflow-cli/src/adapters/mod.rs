//! Collaborator implementations wired up by the `run` command.

mod chat_extractor;
mod eml_inbox;
mod http_parser;
mod local_store;

pub use chat_extractor::ChatFieldExtractor;
pub use eml_inbox::{EmlInbox, RelevanceFilter};
pub use http_parser::HttpParsingService;
pub use local_store::LocalDocumentStore;

use std::time::Duration;

use stmtflow_core::ServiceError;

/// Shared HTTP client settings for the remote collaborators.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .user_agent(format!("stmtflow/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| ServiceError::Network(e.to_string()))
}

/// Turn a non-success response into [`ServiceError::Http`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Http {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn network(e: reqwest::Error) -> ServiceError {
    ServiceError::Network(e.to_string())
}
