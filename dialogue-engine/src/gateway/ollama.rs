//! Ollama chat gateway
//!
//! Talks to an Ollama server's `/api/chat` endpoint with streaming disabled.
//! One gateway instance per participant binding; model and temperature come
//! in per request.

use std::time::Duration;

use serde::Deserialize;

use super::{GatewayError, GenerateOutput, LlmGateway, PromptContext};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OllamaGateway {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OllamaGateway {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::ProviderUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait::async_trait]
impl LlmGateway for OllamaGateway {
    async fn generate(&self, context: &PromptContext) -> Result<GenerateOutput, GatewayError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &context.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": context.prompt}));

        let body = serde_json::json!({
            "model": context.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": context.temperature },
        });

        let response = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    GatewayError::ProviderUnavailable(e.to_string())
                } else {
                    GatewayError::InvalidResponse(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited(format!(
                "{} from {}",
                status,
                self.base_url
            )));
        }
        if status.is_server_error() {
            return Err(GatewayError::ProviderUnavailable(format!(
                "{} from {}",
                status,
                self.base_url
            )));
        }
        if !status.is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "unexpected status {} from {}",
                status, self.base_url
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let text = parsed.message.content.trim().to_string();
        if text.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "provider returned empty content".to_string(),
            ));
        }

        Ok(GenerateOutput {
            text,
            tokens_generated: parsed.eval_count.map(|c| c as u32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn context() -> PromptContext {
        PromptContext {
            model: "llama2".to_string(),
            temperature: 0.7,
            system: Some("you are terse".to_string()),
            prompt: "hello".to_string(),
        }
    }

    /// Serve exactly one canned HTTP response on an ephemeral port.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            r#"{"message":{"role":"assistant","content":"  a fine reply  "},"eval_count":17,"done":true}"#,
        )
        .await;

        let gateway = OllamaGateway::new(&url).unwrap();
        let output = gateway.generate(&context()).await.unwrap();
        assert_eq!(output.text, "a fine reply");
        assert_eq!(output.tokens_generated, Some(17));
    }

    #[tokio::test]
    async fn test_connection_refused_is_provider_unavailable() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gateway = OllamaGateway::new(&format!("http://{addr}")).unwrap();
        let err = gateway.generate(&context()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let url = one_shot_server("HTTP/1.1 429 Too Many Requests", "{}").await;
        let gateway = OllamaGateway::new(&url).unwrap();
        let err = gateway.generate(&context()).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_provider_unavailable() {
        let url = one_shot_server("HTTP/1.1 500 Internal Server Error", "{}").await;
        let gateway = OllamaGateway::new(&url).unwrap();
        let err = gateway.generate(&context()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_content_is_invalid_response() {
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            r#"{"message":{"role":"assistant","content":"   "},"done":true}"#,
        )
        .await;
        let gateway = OllamaGateway::new(&url).unwrap();
        let err = gateway.generate(&context()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_response() {
        let url = one_shot_server("HTTP/1.1 200 OK", "not json at all").await;
        let gateway = OllamaGateway::new(&url).unwrap();
        let err = gateway.generate(&context()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }
}
