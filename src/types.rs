//! 类型定义模块
//!
//! 定义翻译库中使用的所有数据结构和配置类型：密钥、批次请求/响应、
//! 单次调用失败、判读结果 (verdict)、日志条目以及用户设置。

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 翻译配置
///
/// 进程级别的配置选项（API地址、诊断用模型、超时、存储目录等）。
/// 用户可见的设置（模型偏好顺序、各语言的自定义提示词）放在键值存储里，
/// 见 [`UserSettings`]。
///
/// # 字段说明
///
/// * `api_base_url` - 生成式语言 API 的基础地址
/// * `reference_model` - 密钥诊断时使用的固定模型
/// * `request_timeout_secs` - 单次调用的超时时间（秒）
/// * `target_lang` - 目标语言代码
/// * `audit_log_capacity` - 审计日志保留的最大条目数
/// * `data_dir` - 命令行工具存放键值存储文件的目录
/// * `log_filter` - 默认的 tracing 过滤规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// API基础地址
    pub api_base_url: String,
    /// 诊断用模型
    pub reference_model: String,
    /// 单次调用超时（秒）
    pub request_timeout_secs: u64,
    /// 目标语言代码
    pub target_lang: String,
    /// 审计日志容量
    pub audit_log_capacity: usize,
    /// 数据目录
    pub data_dir: String,
    /// 日志过滤规则
    pub log_filter: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            reference_model: "gemini-2.5-flash".to_string(),
            request_timeout_secs: 30,
            target_lang: "zh-Hant".to_string(),
            audit_log_capacity: 20,
            data_dir: ".translator-data".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

/// API 密钥
///
/// 由持久化配置存储拥有，引擎只读取。`Debug` 输出会遮蔽 `secret`。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// 不透明的唯一标识
    pub id: String,
    /// 密钥本体
    #[serde(rename = "key")]
    pub secret: String,
    /// 显示名称
    #[serde(rename = "name", default = "default_display_name")]
    pub display_name: String,
}

fn default_display_name() -> String {
    "unnamed key".to_string()
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// 日志严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// 失败类别（判读器的「罪名」）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    /// 每日/每小时/每周配额耗尽
    RpdLimit,
    /// 每分钟速率限制
    RpmLimit,
    /// 密钥不可用
    Fatal,
    /// 内容或形状问题，不是密钥/模型的错
    BatchFailure,
    /// 无法归类的暂时性错误
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::RpdLimit => "RPD_LIMIT",
            FailureCategory::RpmLimit => "RPM_LIMIT",
            FailureCategory::Fatal => "FATAL",
            FailureCategory::BatchFailure => "BATCH_FAILURE",
            FailureCategory::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 判读结果
///
/// 一次失败调用的结构化「判决」：类别、冷却刑期、日志等级与给用户的建议。
/// 只在单次失败内产生并消费，仅通过审计日志持久化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub category: FailureCategory,
    pub penalty_ms: u64,
    pub severity: Severity,
    pub human_message: String,
    pub remediation: Option<String>,
    /// 状态码与原始消息的组合，只用于审计与调试，不参与流程控制
    pub raw_context: String,
}

/// 传输层返回的失败
///
/// `details` 保留服务端给出的结构化细节（配额违规、重试建议等）原样的 JSON，
/// 判读器以尽力而为的方式解析。
#[derive(Debug, Clone, PartialEq)]
pub struct ApiFailure {
    pub status: Option<u16>,
    pub message: String,
    pub details: Vec<serde_json::Value>,
}

impl ApiFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Status: {}] {}", self.status.unwrap_or(0), self.message)
    }
}

impl std::error::Error for ApiFailure {}

/// 单次调用（密钥 × 模型）的失败
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptError {
    /// 传输层或 API 返回的错误
    #[error(transparent)]
    Api(#[from] ApiFailure),
    /// 返回的译文数量与输入不符
    #[error("batch length mismatch: expected {expected}, got {actual}")]
    Shape { expected: usize, actual: usize },
    /// 模型输出中找不到可用的 JSON 字符串数组
    #[error("unparseable model output: {0}")]
    Unparseable(String),
}

/// 批次翻译请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub texts: Vec<String>,
    #[serde(alias = "source_lang")]
    pub source_language: String,
    #[serde(default, alias = "models_preference")]
    pub models_by_preference: Vec<String>,
    #[serde(default, alias = "overridePrompt")]
    pub prompt_override: Option<String>,
}

/// 返回给调用方的失败种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    PermanentFailure,
    TemporaryFailure,
    BatchFailure,
}

/// 汇总后的调度失败
///
/// 调用方只看到这一份汇总结果，看不到是哪一组密钥/模型失败。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchFailure {
    #[serde(rename = "error")]
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_seconds: Option<u64>,
}

impl DispatchFailure {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::PermanentFailure,
            message: Some(message.into()),
            retry_delay_seconds: None,
        }
    }

    pub fn temporary(retry_delay_seconds: u64) -> Self {
        Self {
            kind: FailureKind::TemporaryFailure,
            message: None,
            retry_delay_seconds: Some(retry_delay_seconds),
        }
    }

    pub fn batch(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::BatchFailure,
            message: Some(message.into()),
            retry_delay_seconds: None,
        }
    }

    /// 附上给用户的说明或补救建议
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        if let Some(delay) = self.retry_delay_seconds {
            write!(f, " (retry in {}s)", delay)?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchFailure {}

/// 批次翻译响应（线上格式）
///
/// 成功：`{ "data": [...] }`；失败：`{ "error": "...", "message"?, "retryDelaySeconds"? }`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchResponse {
    Success { data: Vec<String> },
    Failure(DispatchFailure),
}

impl From<std::result::Result<Vec<String>, DispatchFailure>> for BatchResponse {
    fn from(result: std::result::Result<Vec<String>, DispatchFailure>) -> Self {
        match result {
            Ok(data) => BatchResponse::Success { data },
            Err(failure) => BatchResponse::Failure(failure),
        }
    }
}

/// 审计日志条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// 毫秒级 Unix 时间戳
    pub timestamp: i64,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticStatus {
    Valid,
    Invalid,
}

/// 单一密钥的诊断结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub name: String,
    pub status: DiagnosticStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 单一来源语言的设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageProfile {
    pub lang_code: String,
    pub name: String,
    #[serde(default)]
    pub custom_prompt: String,
}

/// 用户可见的设置，保存在键值存储中
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserSettings {
    pub is_enabled: bool,
    pub models_preference: Vec<String>,
    pub auto_translate_priority_list: Vec<LanguageProfile>,
}

const DEFAULT_STYLE_GUIDE: &str = "**Style guide:**\n\
- Sound natural and conversational for native readers, keep the speaker's tone.\n\n\
**Glossary (highest priority):**\n\
Whenever the left-hand term or its reading appears, translate it exactly as the right-hand term.\n";

impl Default for UserSettings {
    fn default() -> Self {
        let profile = |code: &str, name: &str| LanguageProfile {
            lang_code: code.to_string(),
            name: name.to_string(),
            custom_prompt: DEFAULT_STYLE_GUIDE.to_string(),
        };
        Self {
            is_enabled: true,
            models_preference: vec![
                "gemini-3-flash-preview".to_string(),
                "gemini-2.5-flash".to_string(),
                "gemini-2.5-flash-lite".to_string(),
            ],
            auto_translate_priority_list: vec![
                profile("ja", "Japanese"),
                profile("ko", "Korean"),
                profile("en", "English"),
            ],
        }
    }
}

impl UserSettings {
    /// 取得某语言的自定义提示词，没有设置时返回空字符串
    pub fn custom_prompt_for(&self, lang_code: &str) -> &str {
        self.auto_translate_priority_list
            .iter()
            .find(|p| p.lang_code == lang_code)
            .map(|p| p.custom_prompt.as_str())
            .unwrap_or("")
    }
}
