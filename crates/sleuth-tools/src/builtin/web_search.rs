use futures::future::BoxFuture;
use serde_json::json;

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::Tool;
use sleuth_core::types::ToolResult;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Web search backed by the Tavily API.
pub struct WebSearchTool {
    api_key: String,
    default_max_results: u64,
    endpoint: String,
    http: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: &str, default_max_results: u64) -> Self {
        Self {
            api_key: api_key.to_string(),
            default_max_results,
            endpoint: TAVILY_SEARCH_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn failure(message: impl ToString) -> SleuthError {
        SleuthError::ToolExecution {
            tool: "web_search".into(),
            message: message.to_string(),
        }
    }
}

/// Render a Tavily response body as model-readable text.
fn format_results(body: &serde_json::Value) -> String {
    let Some(results) = body["results"].as_array().filter(|arr| !arr.is_empty()) else {
        return "No results found.".into();
    };
    results
        .iter()
        .map(|r| {
            format!(
                "**{}**\n{}\nURL: {}",
                r["title"].as_str().unwrap_or(""),
                r["content"].as_str().unwrap_or(""),
                r["url"].as_str().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns relevant results with snippets."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let query = input["query"]
                .as_str()
                .ok_or_else(|| SleuthError::ToolValidation("'query' must be a string".into()))?;
            let max = input["max_results"]
                .as_u64()
                .unwrap_or(self.default_max_results);

            let resp = self
                .http
                .post(&self.endpoint)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": max,
                }))
                .send()
                .await
                .map_err(Self::failure)?;

            if !resp.status().is_success() {
                // The model can rephrase and retry; report instead of failing the task
                return Ok(ToolResult::error(format!(
                    "Search failed with HTTP {}",
                    resp.status()
                )));
            }

            let body: serde_json::Value = resp.json().await.map_err(Self::failure)?;
            Ok(ToolResult::success(format_results(&body)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_results() {
        let body = json!({
            "results": [
                {"title": "Paris", "content": "Capital of France", "url": "https://a"},
                {"title": "Lyon", "content": "Third city", "url": "https://b"}
            ]
        });
        let text = format_results(&body);
        assert!(text.starts_with("**Paris**\nCapital of France\nURL: https://a"));
        assert_eq!(text.matches("---").count(), 1);
    }

    #[test]
    fn test_format_empty_results() {
        assert_eq!(format_results(&json!({"results": []})), "No results found.");
        assert_eq!(format_results(&json!({})), "No results found.");
    }

    #[tokio::test]
    async fn test_query_required() {
        let tool = WebSearchTool::new("tvly-test", 5);
        let err = tool.execute(json!({"max_results": 3})).await.unwrap_err();
        assert!(matches!(err, SleuthError::ToolValidation(_)));
    }
}
