//! 可编排的传输层，供测试与离线演练使用
//!
//! 依 `(密钥本体, 模型)` 排入预先写好的响应，没有排入的组合使用默认响应。
//! 每次调用都会被记录下来，方便断言「试了哪些组合、顺序为何」。

use crate::transport::{GenerateRequest, GenerativeTransport};
use crate::types::ApiFailure;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// 预先写好的响应
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// 原样返回这段文字
    Text(String),
    /// 返回失败
    Fail(ApiFailure),
    /// 把提示词最后一行 JSON 数组逐项加上 `_tr` 后缀返回
    Echo,
}

/// 一次被记录的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub secret: String,
    pub model: String,
    pub response_mime_type: String,
}

#[derive(Debug)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<(String, String), VecDeque<ScriptedReply>>>,
    fallback: ScriptedReply,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(fallback: ScriptedReply) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 为某组合排入一个响应，可重复调用以排入多个
    pub fn on(self, secret: &str, model: &str, reply: ScriptedReply) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((secret.to_string(), model.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_reply(&self, secret: &str, model: &str) -> ScriptedReply {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&(secret.to_string(), model.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn echo(prompt: &str) -> Result<String, ApiFailure> {
    let input = prompt
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('['))
        .ok_or_else(|| ApiFailure::new(Some(500), "echo: no JSON array in prompt"))?;
    let texts: Vec<String> = serde_json::from_str(input.trim())
        .map_err(|e| ApiFailure::new(Some(500), format!("echo: {}", e)))?;
    let translated: Vec<String> = texts.into_iter().map(|t| format!("{}_tr", t)).collect();
    serde_json::to_string(&translated).map_err(|e| ApiFailure::new(Some(500), e.to_string()))
}

#[async_trait]
impl GenerativeTransport for ScriptedTransport {
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, ApiFailure> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                secret: request.secret.to_string(),
                model: request.model.to_string(),
                response_mime_type: request.response_mime_type.to_string(),
            });

        match self.next_reply(request.secret, request.model) {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(failure) => Err(failure),
            ScriptedReply::Echo => echo(request.prompt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(secret: &'a str, model: &'a str, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model,
            secret,
            prompt,
            response_mime_type: "application/json",
        }
    }

    #[tokio::test]
    async fn scripted_replies_are_consumed_in_order() {
        let transport = ScriptedTransport::new(ScriptedReply::Text("fallback".into()))
            .on("s1", "m", ScriptedReply::Text("one".into()))
            .on("s1", "m", ScriptedReply::Fail(ApiFailure::new(Some(503), "down")));

        assert_eq!(transport.generate(request("s1", "m", "")).await.unwrap(), "one");
        assert!(transport.generate(request("s1", "m", "")).await.is_err());
        assert_eq!(transport.generate(request("s1", "m", "")).await.unwrap(), "fallback");
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn echo_translates_last_array_line() {
        let transport = ScriptedTransport::new(ScriptedReply::Echo);
        let prompt = "Example: [\"x\"]\n\n[\"a\",\"b\"]";
        let out = transport.generate(request("s", "m", prompt)).await.unwrap();
        assert_eq!(out, r#"["a_tr","b_tr"]"#);
    }
}
