//! 翻译服务核心模块
//!
//! 批次翻译的容错调度：外层依偏好顺序走模型，内层依粘着性调整后的顺序走密钥，
//! 跳过冷却中的组合，每个组合最多试一次；第一个通过检查的结果立即返回。
//! 失败交给判读器判刑，视刑期开启断路器并写入审计日志，然后换下一个组合。

use crate::audit::AuditLog;
use crate::breaker::CooldownRegistry;
use crate::classifier::classify;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::prompt::{build_prompt, extract_translations};
use crate::stickiness::StickinessTracker;
use crate::storage::{get_or_default, set_json, KeyValueStore, CREDENTIALS_KEY, SETTINGS_KEY};
use crate::transport::{GenerateRequest, GenerativeTransport};
use crate::types::{
    AttemptError, BatchRequest, BatchResponse, Credential, DiagnosticResult, DiagnosticStatus,
    DispatchFailure, FailureCategory, LogEntry, Severity, TranslationConfig, UserSettings, Verdict,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 所有组合都在冷却中时建议的重试延迟（秒）
pub const SYSTEMIC_RETRY_DELAY_SECS: u64 = 3600;
/// 有尝试但都失败时建议的重试延迟（秒）
pub const TRANSIENT_RETRY_DELAY_SECS: u64 = 10;

const ALL_COOLING_HINT: &str =
    "All API keys are cooling down for these models; wait for the retry delay or add more API keys.";

const TRANSLATION_MIME: &str = "application/json";
const DIAGNOSTIC_MIME: &str = "text/plain";
const DIAGNOSTIC_PROMPT: &str = "test";

/// 翻译服务主类
///
/// 持有传输层、两个存储（local: 密钥与设置；session: 冷却、粘着性与日志）
/// 以及由 session 存储加载的冷却登记表与审计日志。克隆体共享同一份状态，
/// 多个并行请求之间采「最后写入者为准」。
///
/// # 示例
///
/// ```ignore
/// use resilient_translator::{BatchRequest, GeminiTransport, MemoryStore, TranslationConfig, TranslationService};
/// use std::sync::Arc;
///
/// let config = TranslationConfig::default();
/// let transport = Arc::new(GeminiTransport::new(&config)?);
/// let service = TranslationService::new(
///     config,
///     Arc::new(MemoryStore::new()),
///     Arc::new(MemoryStore::new()),
///     transport,
/// )
/// .await;
///
/// let response = service.handle(&BatchRequest {
///     texts: vec!["こんにちは".into()],
///     source_language: "ja".into(),
///     ..Default::default()
/// }).await;
/// ```
#[derive(Clone)]
pub struct TranslationService {
    transport: Arc<dyn GenerativeTransport>,
    local: Arc<dyn KeyValueStore>,
    cooldowns: CooldownRegistry,
    stickiness: StickinessTracker,
    audit: AuditLog,
    config: TranslationConfig,
}

impl TranslationService {
    /// 创建新的翻译服务实例，使用系统时钟
    pub async fn new(
        config: TranslationConfig,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        transport: Arc<dyn GenerativeTransport>,
    ) -> Self {
        Self::with_clock(config, local, session, transport, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        config: TranslationConfig,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        transport: Arc<dyn GenerativeTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cooldowns = CooldownRegistry::load(Arc::clone(&session), Arc::clone(&clock)).await;
        let audit = AuditLog::load(Arc::clone(&session), clock, config.audit_log_capacity).await;

        Self {
            transport,
            local,
            cooldowns,
            stickiness: StickinessTracker::new(session),
            audit,
            config,
        }
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    pub fn stickiness(&self) -> &StickinessTracker {
        &self.stickiness
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    /// 批次翻译，返回线上格式的响应
    pub async fn handle(&self, request: &BatchRequest) -> BatchResponse {
        self.translate_batch(request).await.into()
    }

    /// 批次翻译
    ///
    /// 成功时译文数量与 `request.texts` 完全相同；失败时只返回汇总后的类别与重试建议。
    pub async fn translate_batch(
        &self,
        request: &BatchRequest,
    ) -> std::result::Result<Vec<String>, DispatchFailure> {
        if request.texts.is_empty() {
            return Ok(Vec::new());
        }

        let credentials = match self.credentials().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "failed to read credential pool");
                self.audit.append(
                    Severity::Error,
                    "Translation failed: API keys could not be read from storage",
                    Some(e.to_string()),
                    Some("Check that the data directory is readable; the request can be retried.".to_string()),
                );
                return Err(DispatchFailure::temporary(TRANSIENT_RETRY_DELAY_SECS)
                    .with_message("API keys could not be read from storage"));
            }
        };
        if credentials.is_empty() {
            self.audit.append(
                Severity::Error,
                "Translation failed: no API key configured",
                None,
                Some("Add at least one API key in the settings.".to_string()),
            );
            return Err(DispatchFailure::permanent("No API key configured"));
        }

        let settings = self.settings().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read settings, using defaults");
            UserSettings::default()
        });
        let models = if request.models_by_preference.is_empty() {
            settings.models_preference.clone()
        } else {
            request.models_by_preference.clone()
        };
        if models.is_empty() {
            self.audit.append(
                Severity::Error,
                "Translation failed: no model configured",
                None,
                Some("Select at least one model in the settings.".to_string()),
            );
            return Err(DispatchFailure::permanent("No model configured"));
        }

        let credentials = self.stickiness.reorder(credentials).await;
        let prompt = build_prompt(
            &request.texts,
            &request.source_language,
            &self.config.target_lang,
            settings.custom_prompt_for(&request.source_language),
            request.prompt_override.as_deref(),
        );

        let mut attempted = 0usize;
        let mut last_verdict: Option<Verdict> = None;

        let pairs = models
            .iter()
            .flat_map(|model| credentials.iter().map(move |credential| (model, credential)));

        for (model, credential) in pairs {
            let breaker = self.cooldowns.is_open(&credential.id, model);
            if breaker.open {
                debug!(
                    model = %model,
                    credential = %credential.display_name,
                    remaining_seconds = breaker.remaining_seconds,
                    "pair cooling down, skipped"
                );
                continue;
            }

            attempted += 1;
            match self.attempt(model, credential, &prompt, request.texts.len()).await {
                Ok(translations) => {
                    self.stickiness.record_success(&credential.id).await;
                    info!(
                        model = %model,
                        credential = %credential.display_name,
                        attempts = attempted,
                        lines = translations.len(),
                        "batch translated"
                    );
                    return Ok(translations);
                }
                Err(error) => {
                    let verdict = classify(&error, &credential.display_name, model);
                    debug!(
                        model = %model,
                        credential = %credential.display_name,
                        category = %verdict.category,
                        penalty_ms = verdict.penalty_ms,
                        "attempt failed"
                    );
                    if verdict.penalty_ms > 0 {
                        self.cooldowns.trip(&credential.id, model, verdict.penalty_ms);
                    }
                    self.audit.append(
                        verdict.severity,
                        verdict.human_message.clone(),
                        Some(verdict.raw_context.clone()),
                        verdict.remediation.clone(),
                    );
                    last_verdict = Some(verdict);
                }
            }
        }

        // 所有组合此刻都在冷却中时，取最快解除的那一个作为重试建议
        let all_open_remaining = models
            .iter()
            .flat_map(|model| credentials.iter().map(move |credential| (model, credential)))
            .try_fold(u64::MAX, |soonest, (model, credential)| {
                let breaker = self.cooldowns.is_open(&credential.id, model);
                breaker.open.then(|| soonest.min(breaker.remaining_seconds))
            });

        let failure = exhaustion_outcome(attempted, last_verdict.as_ref(), all_open_remaining);
        warn!(attempts = attempted, outcome = %failure, "all key/model pairs exhausted");
        Err(failure)
    }

    async fn attempt(
        &self,
        model: &str,
        credential: &Credential,
        prompt: &str,
        expected: usize,
    ) -> std::result::Result<Vec<String>, AttemptError> {
        let raw = self
            .transport
            .generate(GenerateRequest {
                model,
                secret: &credential.secret,
                prompt,
                response_mime_type: TRANSLATION_MIME,
            })
            .await?;
        extract_translations(&raw, expected)
    }

    /// 逐一诊断密钥池中的密钥
    ///
    /// 对固定的参考模型发一个轻量请求；不查询也不改动冷却登记表。
    pub async fn diagnose_credentials(&self) -> Vec<DiagnosticResult> {
        let credentials = self.credentials().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read credential pool");
            Vec::new()
        });

        if credentials.is_empty() {
            self.audit.append(
                Severity::Warn,
                "Diagnostics failed: no API key configured",
                None,
                Some("Add an API key before running diagnostics.".to_string()),
            );
            return Vec::new();
        }

        let mut results = Vec::with_capacity(credentials.len());
        for credential in &credentials {
            let outcome = self
                .transport
                .generate(GenerateRequest {
                    model: &self.config.reference_model,
                    secret: &credential.secret,
                    prompt: DIAGNOSTIC_PROMPT,
                    response_mime_type: DIAGNOSTIC_MIME,
                })
                .await;

            match outcome {
                Ok(_) => {
                    self.audit.append(
                        Severity::Info,
                        format!("Key '{}' is valid.", credential.display_name),
                        None,
                        None,
                    );
                    results.push(DiagnosticResult {
                        name: credential.display_name.clone(),
                        status: DiagnosticStatus::Valid,
                        error: None,
                    });
                }
                Err(failure) => {
                    let error = format!("HTTP {}: {}", failure.status.unwrap_or(0), failure.message);
                    self.audit.append(
                        Severity::Error,
                        format!("Key '{}' is invalid.", credential.display_name),
                        Some(error.clone()),
                        Some(
                            "Check that the key was copied correctly, is enabled, and has not reached its usage limit."
                                .to_string(),
                        ),
                    );
                    results.push(DiagnosticResult {
                        name: credential.display_name.clone(),
                        status: DiagnosticStatus::Invalid,
                        error: Some(error),
                    });
                }
            }
        }

        results
    }

    /// 密钥池
    pub async fn credentials(&self) -> Result<Vec<Credential>> {
        get_or_default(self.local.as_ref(), CREDENTIALS_KEY, Vec::new()).await
    }

    /// 新增密钥；id 相同者直接取代
    pub async fn add_credential(&self, credential: Credential) -> Result<()> {
        let mut pool = self.credentials().await?;
        match pool.iter_mut().find(|c| c.id == credential.id) {
            Some(existing) => *existing = credential,
            None => pool.push(credential),
        }
        set_json(self.local.as_ref(), CREDENTIALS_KEY, &pool).await
    }

    /// 移除密钥，返回是否真的有移除
    pub async fn remove_credential(&self, credential_id: &str) -> Result<bool> {
        let mut pool = self.credentials().await?;
        let before = pool.len();
        pool.retain(|c| c.id != credential_id);
        if pool.len() == before {
            return Ok(false);
        }
        set_json(self.local.as_ref(), CREDENTIALS_KEY, &pool).await?;
        Ok(true)
    }

    /// 用户设置，不存在时返回默认值
    pub async fn settings(&self) -> Result<UserSettings> {
        get_or_default(self.local.as_ref(), SETTINGS_KEY, UserSettings::default()).await
    }

    pub async fn update_settings(&self, settings: &UserSettings) -> Result<()> {
        set_json(self.local.as_ref(), SETTINGS_KEY, settings).await
    }

    /// 切换总开关，返回新的状态
    pub async fn toggle_enabled(&self) -> Result<bool> {
        let mut settings = self.settings().await?;
        settings.is_enabled = !settings.is_enabled;
        self.update_settings(&settings).await?;
        Ok(settings.is_enabled)
    }

    /// 审计日志，最新的在前
    pub fn logs(&self) -> Vec<LogEntry> {
        self.audit.read_all()
    }

    /// 记录外部（例如页面端）回报的错误
    pub fn report_error(&self, message: impl Into<String>) {
        self.audit.append(Severity::Error, message, None, None);
    }

    pub fn clear_logs(&self) {
        self.audit.clear();
    }

    /// 等待冷却状态与审计日志都写入 session 存储
    pub async fn flush(&self) {
        self.cooldowns.flush().await;
        self.audit.flush().await;
    }
}

/// 所有组合都走完后的汇总结果
///
/// * 一次都没试（全部在冷却中）：容量耗尽，建议一小时后再试
/// * 最后一次是内容/形状问题：如实回报 `BATCH_FAILURE`
/// * 试过而且现在所有组合都在冷却中：以最快解除的冷却为准（介于 10 秒与一小时之间）
/// * 其余：暂时性失败，短延迟
pub fn exhaustion_outcome(
    attempted: usize,
    last_verdict: Option<&Verdict>,
    all_open_remaining_secs: Option<u64>,
) -> DispatchFailure {
    if attempted == 0 {
        return DispatchFailure::temporary(SYSTEMIC_RETRY_DELAY_SECS).with_message(ALL_COOLING_HINT);
    }
    if matches!(last_verdict, Some(v) if v.category == FailureCategory::BatchFailure) {
        return DispatchFailure::batch("The model could not process this batch");
    }
    match all_open_remaining_secs {
        Some(remaining) => DispatchFailure::temporary(
            remaining.clamp(TRANSIENT_RETRY_DELAY_SECS, SYSTEMIC_RETRY_DELAY_SECS),
        )
        .with_message(ALL_COOLING_HINT),
        None => DispatchFailure::temporary(TRANSIENT_RETRY_DELAY_SECS)
            .with_message("Translation attempts failed; retry shortly."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;

    fn verdict(category: FailureCategory) -> Verdict {
        Verdict {
            category,
            penalty_ms: 0,
            severity: Severity::Warn,
            human_message: String::new(),
            remediation: None,
            raw_context: String::new(),
        }
    }

    #[test]
    fn nothing_attempted_is_systemic() {
        let outcome = exhaustion_outcome(0, None, Some(5));
        assert_eq!(outcome.kind, FailureKind::TemporaryFailure);
        assert_eq!(outcome.retry_delay_seconds, Some(SYSTEMIC_RETRY_DELAY_SECS));
        assert!(outcome.message.unwrap().contains("add more API keys"));
    }

    #[test]
    fn last_batch_failure_is_surfaced() {
        let outcome = exhaustion_outcome(2, Some(&verdict(FailureCategory::BatchFailure)), None);
        assert_eq!(outcome.kind, FailureKind::BatchFailure);
        assert!(outcome.message.is_some());
    }

    #[test]
    fn other_failures_are_transient() {
        for category in [
            FailureCategory::RpdLimit,
            FailureCategory::RpmLimit,
            FailureCategory::Fatal,
            FailureCategory::Unknown,
        ] {
            let outcome = exhaustion_outcome(1, Some(&verdict(category)), None);
            assert_eq!(outcome.kind, FailureKind::TemporaryFailure);
            assert_eq!(outcome.retry_delay_seconds, Some(TRANSIENT_RETRY_DELAY_SECS));
            assert!(outcome.message.is_some());
        }
    }

    #[test]
    fn fully_cooled_capacity_uses_soonest_expiry() {
        let rpm = verdict(FailureCategory::RpmLimit);
        let outcome = exhaustion_outcome(2, Some(&rpm), Some(65));
        assert_eq!(outcome.retry_delay_seconds, Some(65));
        assert_eq!(outcome.message.as_deref(), Some(ALL_COOLING_HINT));
        assert_eq!(
            exhaustion_outcome(2, Some(&rpm), Some(86_400)).retry_delay_seconds,
            Some(SYSTEMIC_RETRY_DELAY_SECS)
        );
        assert_eq!(
            exhaustion_outcome(2, Some(&rpm), Some(1)).retry_delay_seconds,
            Some(TRANSIENT_RETRY_DELAY_SECS)
        );
    }
}
