//! 传输层
//!
//! [`GenerativeTransport`] 是调度引擎与外部 API 之间唯一的接缝：给定模型、密钥与
//! 提示词，返回模型输出的文字，或是带状态码、消息与结构化细节的 [`ApiFailure`]。
//! [`GeminiTransport`] 以 reqwest 实现 Gemini `generateContent` 端点。

use crate::error::Result;
use crate::types::{ApiFailure, TranslationConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// 单次生成请求
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub secret: &'a str,
    pub prompt: &'a str,
    /// `application/json` 用于翻译，`text/plain` 用于诊断
    pub response_mime_type: &'a str,
}

impl std::fmt::Display for GenerateRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} prompt chars)", self.model, self.prompt.chars().count())
    }
}

#[async_trait]
pub trait GenerativeTransport: Send + Sync {
    async fn generate(&self, request: GenerateRequest<'_>) -> std::result::Result<String, ApiFailure>;
}

/// 关闭四个有害类别的拦截，字幕内容经常触发误判
fn safety_settings() -> Value {
    json!([
        {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"}
    ])
}

/// Gemini REST 传输
#[derive(Clone)]
pub struct GeminiTransport {
    client: Client,
    base_url: String,
}

impl GeminiTransport {
    /// 依配置创建 HTTP 客户端，超时即为单次调用的上限
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("resilient-translator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

/// 解析错误响应 `{"error": {"code", "message", "status", "details"}}`
fn parse_error_body(status: u16, body: &str) -> ApiFailure {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let Some(error) = error else {
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            body.trim().to_string()
        };
        return ApiFailure::new(Some(status), message);
    };

    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no error message");
    let message = match error.get("status").and_then(Value::as_str) {
        Some(code) => format!("{} ({})", message, code),
        None => message.to_string(),
    };
    let details = error
        .get("details")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    ApiFailure::new(Some(status), message).with_details(details)
}

/// 从成功响应中取出文字；被安全过滤拦下的响应视为失败
fn parse_success_body(body: &Value) -> std::result::Result<String, ApiFailure> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(ApiFailure::new(None, format!("Prompt blocked: {}", reason)));
    }

    let candidate = body.pointer("/candidates/0");
    let text: String = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let finish = candidate
            .and_then(|c| c.get("finishReason"))
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        if finish == "SAFETY" {
            return Err(ApiFailure::new(None, "Response blocked: SAFETY"));
        }
        return Err(ApiFailure::new(
            None,
            format!("empty response (finishReason: {})", finish),
        ));
    }

    Ok(text)
}

#[async_trait]
impl GenerativeTransport for GeminiTransport {
    async fn generate(&self, request: GenerateRequest<'_>) -> std::result::Result<String, ApiFailure> {
        debug!(request = %request, "sending generateContent");

        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {"responseMimeType": request.response_mime_type},
            "safetySettings": safety_settings(),
        });

        let response = self
            .client
            .post(self.endpoint(request.model))
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", request.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timeout" } else { "network error" };
                ApiFailure::new(e.status().map(|s| s.as_u16()), format!("{}: {}", kind, e.without_url()))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiFailure::new(Some(status.as_u16()), format!("failed to read body: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(parse_error_body(status.as_u16(), &text));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ApiFailure::new(Some(status.as_u16()), format!("invalid JSON response: {}", e)))?;
        parse_success_body(&value)
    }
}
