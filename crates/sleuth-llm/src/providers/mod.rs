pub mod anthropic;
pub mod openai;
pub mod presets;

use std::time::Duration;

use futures::stream::BoxStream;
use reqwest::{Client, RequestBuilder};
use tracing::warn;

use sleuth_core::config::ModelConfig;
use sleuth_core::error::{Result, SleuthError};

use crate::streaming::{sse_events, SseEvent};

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client shared by the provider clients. The overall reply deadline
/// lives in `ChatModel`; only connection setup is bounded here.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

/// Apply configured headers, send, and open the event stream. A non-2xx
/// status becomes `LlmRequest` carrying the response body.
pub(crate) async fn open_stream(
    mut req: RequestBuilder,
    config: &ModelConfig,
) -> Result<BoxStream<'static, Result<SseEvent>>> {
    for (name, value) in &config.extra_headers {
        req = req.header(name.as_str(), value.as_str());
    }
    let response = req
        .send()
        .await
        .map_err(|e| SleuthError::LlmRequest(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SleuthError::LlmRequest(format!(
            "{} returned HTTP {}: {}",
            config.model_string(),
            status,
            body
        )));
    }
    Ok(sse_events(response.bytes_stream()))
}
