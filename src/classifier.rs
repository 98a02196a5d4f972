//! 错误判读器（判刑）
//!
//! 把一次失败调用转成 [`Verdict`]：类别、冷却刑期、日志等级与补救建议。
//!
//! 判读顺序固定，先命中者为准：
//!
//! 1. 长窗口配额耗尽（每日/每小时/每周）→ `RPD_LIMIT`，24 小时
//! 2. 每分钟速率限制 → `RPM_LIMIT`，服务端建议的延迟 + 5 秒（无建议时 60 + 5 秒）
//! 3. 密钥无效或无权限 → `FATAL`，一年
//! 4. 内容被安全过滤 → `BATCH_FAILURE`，不冷却
//! 5. 其他 → `UNKNOWN`，10 秒
//!
//! 每一层先看结构化细节（`details` 里的 violations / retryDelay），
//! 文字比对只是后备，对上游措辞变动很敏感。解析永远不会失败，
//! 缺字段或形状不对就当作没有这项信息。

use crate::types::{ApiFailure, AttemptError, FailureCategory, Severity, Verdict};
use serde_json::Value;

pub const RPD_PENALTY_MS: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_RPM_RETRY_MS: u64 = 60 * 1000;
pub const RPM_SAFETY_BUFFER_MS: u64 = 5 * 1000;
pub const FATAL_PENALTY_MS: u64 = 365 * 24 * 60 * 60 * 1000;
pub const UNKNOWN_PENALTY_MS: u64 = 10 * 1000;

const LONG_WINDOW_QUOTA_MARKERS: &[&str] = &["perday", "perhour", "perweek"];
const LONG_WINDOW_MESSAGE_MARKERS: &[&str] = &[
    "perday", "per day", "perhour", "per hour", "perweek", "per week",
];
const RATE_LIMIT_MESSAGE_MARKERS: &[&str] = &["429", "exhausted", "too many requests"];
const INVALID_KEY_MESSAGE_MARKERS: &[&str] = &["api_key_invalid", "api key not valid"];

/// 从结构化细节里读出的信息
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct StructuredHints {
    long_window: bool,
    per_minute: bool,
    retry_delay_ms: Option<u64>,
}

fn scan_details(details: &[Value]) -> StructuredHints {
    let mut hints = StructuredHints::default();

    for detail in details {
        if let Some(violations) = detail.get("violations").and_then(Value::as_array) {
            for violation in violations {
                let Some(quota_id) = violation.get("quotaId").and_then(Value::as_str) else {
                    continue;
                };
                let quota_id = quota_id.to_ascii_lowercase();
                if LONG_WINDOW_QUOTA_MARKERS.iter().any(|m| quota_id.contains(m)) {
                    hints.long_window = true;
                }
                if quota_id.contains("perminute") {
                    hints.per_minute = true;
                }
            }
        }

        if let Some(delay) = detail
            .get("retryDelay")
            .and_then(Value::as_str)
            .and_then(parse_retry_delay)
        {
            hints.retry_delay_ms = Some(delay);
        }
    }

    hints
}

/// 解析 `"37s"` / `"1.5s"` 形式的延迟，返回毫秒
pub fn parse_retry_delay(raw: &str) -> Option<u64> {
    let seconds: f64 = raw.trim().strip_suffix('s')?.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// 判读一次失败调用
///
/// `credential_name` 与 `model` 只用于组成消息，绝不传入密钥本体。
pub fn classify(error: &AttemptError, credential_name: &str, model: &str) -> Verdict {
    let prefix = format!("Key '{}' @ {} failed", credential_name, model);

    match error {
        AttemptError::Api(failure) => classify_api_failure(failure, prefix),
        AttemptError::Shape { .. } | AttemptError::Unparseable(_) => Verdict {
            category: FailureCategory::BatchFailure,
            penalty_ms: 0,
            severity: Severity::Warn,
            human_message: format!("{} (response did not match the batch)", prefix),
            remediation: Some(
                "The model could not return one translation per line for this batch; retry manually or use a smaller batch."
                    .to_string(),
            ),
            raw_context: format!("[Status: 0] {}", error),
        },
    }
}

fn classify_api_failure(failure: &ApiFailure, prefix: String) -> Verdict {
    let hints = scan_details(&failure.details);
    let message = failure.message.to_ascii_lowercase();
    let status = failure.status.unwrap_or(0);
    let raw_context = failure.to_string();

    if hints.long_window || contains_any(&message, LONG_WINDOW_MESSAGE_MARKERS) {
        return Verdict {
            category: FailureCategory::RpdLimit,
            penalty_ms: RPD_PENALTY_MS,
            severity: Severity::Error,
            human_message: format!("{} (daily quota exhausted)", prefix),
            remediation: Some(
                "This key has used up its quota; it will be skipped for 24 hours. Wait, or add more API keys."
                    .to_string(),
            ),
            raw_context,
        };
    }

    if hints.per_minute || status == 429 || contains_any(&message, RATE_LIMIT_MESSAGE_MARKERS) {
        let penalty_ms = hints
            .retry_delay_ms
            .unwrap_or(DEFAULT_RPM_RETRY_MS)
            .saturating_add(RPM_SAFETY_BUFFER_MS);
        return Verdict {
            category: FailureCategory::RpmLimit,
            penalty_ms,
            severity: Severity::Warn,
            human_message: format!("{} (rate limited)", prefix),
            remediation: Some(format!(
                "Per-minute rate limit hit; this key/model pair will be retried automatically in {} seconds.",
                penalty_ms.div_ceil(1000)
            )),
            raw_context,
        };
    }

    if matches!(status, 400 | 401 | 403) || contains_any(&message, INVALID_KEY_MESSAGE_MARKERS) {
        return Verdict {
            category: FailureCategory::Fatal,
            penalty_ms: FATAL_PENALTY_MS,
            severity: Severity::Error,
            human_message: format!("{} (key unusable)", prefix),
            remediation: Some(
                "Check that the API key is correct, billing is enabled and the key has access to this model."
                    .to_string(),
            ),
            raw_context,
        };
    }

    if failure.message.contains("SAFETY") || message.contains("blocked") {
        return Verdict {
            category: FailureCategory::BatchFailure,
            penalty_ms: 0,
            severity: Severity::Warn,
            human_message: format!("{} (blocked by content safety filter)", prefix),
            remediation: Some(
                "This batch was blocked by the safety filter; retry it manually.".to_string(),
            ),
            raw_context,
        };
    }

    Verdict {
        category: FailureCategory::Unknown,
        penalty_ms: UNKNOWN_PENALTY_MS,
        severity: Severity::Warn,
        human_message: prefix,
        remediation: Some("The system will switch to another key and retry.".to_string()),
        raw_context,
    }
}
