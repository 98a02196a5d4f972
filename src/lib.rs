//! # Resilient Translator
//!
//! 通过生成式语言 API 批次翻译字幕短句的 Rust 库。真正的难点不在翻译调用本身，
//! 而在于如何在有速率限制、多租户的外部 API 上存活：下一步该试哪一组
//! （密钥, 模型）、记住哪些组合暂时不能用、把失败归到正确的刑期，
//! 并尽快收敛到可用的组合。
//!
//! ## 主要组件
//!
//! - **冷却登记表** ([`CooldownRegistry`]): 以（密钥, 模型）为单位的断路器，镜像到 session 存储
//! - **密钥粘着性** ([`StickinessTracker`]): 上一次成功的密钥优先
//! - **错误判读器** ([`classify`]): 失败 → 类别、冷却时间、日志等级与补救建议
//! - **调度循环** ([`TranslationService::translate_batch`]): 模型 × 密钥的容错循环
//! - **审计日志** ([`AuditLog`]): 最近 20 条判读结果，最新在前
//!
//! ## 快速开始
//!
//! ```ignore
//! use resilient_translator::{
//!     BatchRequest, Credential, GeminiTransport, MemoryStore, TranslationLibConfig, TranslationService,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TranslationLibConfig::load_from_default_locations().translation;
//!     let transport = Arc::new(GeminiTransport::new(&config)?);
//!     let service = TranslationService::new(
//!         config,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryStore::new()),
//!         transport,
//!     )
//!     .await;
//!
//!     service.add_credential(Credential::new("k1", "AIza...", "Main key")).await?;
//!
//!     let request = BatchRequest {
//!         texts: vec!["こんにちは世界".into(), "お元気ですか？".into()],
//!         source_language: "ja".into(),
//!         ..Default::default()
//!     };
//!     match service.translate_batch(&request).await {
//!         Ok(lines) => println!("{:?}", lines),
//!         Err(failure) => eprintln!("{}", failure),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## 配置文件支持
//!
//! ```toml
//! [translation]
//! api_base_url = "https://generativelanguage.googleapis.com/v1beta"
//! reference_model = "gemini-2.5-flash"
//! request_timeout_secs = 30
//! target_lang = "zh-Hant"
//! ```

pub mod audit;
pub mod breaker;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod mock;
pub mod prompt;
pub mod stickiness;
pub mod storage;
pub mod translator;
pub mod transport;
pub mod types;

pub use audit::AuditLog;
pub use breaker::{BreakerStatus, CooldownRegistry};
pub use classifier::classify;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TranslationLibConfig;
pub use error::{Result, TranslationError};
pub use mock::{ScriptedReply, ScriptedTransport};
pub use stickiness::StickinessTracker;
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use translator::TranslationService;
pub use transport::{GeminiTransport, GenerateRequest, GenerativeTransport};
pub use types::{
    ApiFailure, AttemptError, BatchRequest, BatchResponse, Credential, DiagnosticResult,
    DiagnosticStatus, DispatchFailure, FailureCategory, FailureKind, LanguageProfile, LogEntry,
    Severity, TranslationConfig, UserSettings, Verdict,
};
