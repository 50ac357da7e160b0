use crate::error::ClientError;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Body of `POST {server}/research`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    pub query: String,
    pub connection_id: String,
}

/// The decoded success body. Its shape is server-defined; only the answer
/// lookup is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchResponse(pub Value);

impl ResearchResponse {
    /// First non-empty string among `content`, `result`, `response`, else the
    /// whole body pretty-printed.
    pub fn answer(&self) -> String {
        for key in ["content", "result", "response"] {
            if let Some(text) = self.0.get(key).and_then(Value::as_str) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ResearchClient {
    client: Client,
}

impl Default for ResearchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearchClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub async fn research(
        &self,
        server_url: &str,
        request: &ResearchRequest,
    ) -> Result<ResearchResponse, ClientError> {
        let endpoint = research_endpoint(server_url);
        debug!(event = "research_request", endpoint = %endpoint, query_len = request.query.len());
        let response = self.client.post(&endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_u16().to_string());
            return Err(ClientError::RequestFailed {
                status: status.as_u16(),
                reason,
            });
        }

        let body = response.text().await?;
        let value: Value =
            serde_json::from_str(&body).map_err(|err| ClientError::Decode(err.to_string()))?;
        info!(event = "research_complete", status = status.as_u16());
        Ok(ResearchResponse(value))
    }
}

fn research_endpoint(server_url: &str) -> String {
    format!("{}/research", server_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_follows_field_precedence() {
        let body = ResearchResponse(json!({ "result": "r", "content": "c", "response": "x" }));
        assert_eq!(body.answer(), "c");

        let body = ResearchResponse(json!({ "content": "", "result": "r", "response": "x" }));
        assert_eq!(body.answer(), "r");

        let body = ResearchResponse(json!({ "response": "only response" }));
        assert_eq!(body.answer(), "only response");
    }

    #[test]
    fn answer_falls_back_to_pretty_json() {
        let body = ResearchResponse(json!({ "datasets": [1, 2] }));
        assert_eq!(body.answer(), "{\n  \"datasets\": [\n    1,\n    2\n  ]\n}");
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = ResearchRequest {
            query: "air quality".to_string(),
            connection_id: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            json!({ "query": "air quality", "connectionId": "abc" })
        );
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(research_endpoint("http://host:8000/"), "http://host:8000/research");
        assert_eq!(research_endpoint("http://host:8000"), "http://host:8000/research");
    }
}
