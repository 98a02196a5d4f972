//! 错误处理模块
//!
//! 定义翻译库中使用的错误类型。注意：单次调用（某个密钥 × 某个模型）的失败
//! 不走这里，而是以 [`crate::types::AttemptError`] 值的形式交给错误判读器；
//! 这里只承载存储、配置、序列化等「管线」层面的错误。

use thiserror::Error;

/// 翻译库错误类型
///
/// # 变体说明
///
/// * `Http` - HTTP客户端构建或请求错误
/// * `Storage` - 键值存储读写失败
/// * `Serialization` - JSON 序列化/反序列化失败
/// * `Config` - 配置文件错误
/// * `Io` - 文件系统错误
/// * `Custom` - 自定义错误消息
#[derive(Debug, Error)]
pub enum TranslationError {
    /// HTTP请求错误
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// 存储错误
    #[error("Storage error: {0}")]
    Storage(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
    /// 文件系统错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 自定义错误消息
    #[error("{0}")]
    Custom(String),
}

impl From<String> for TranslationError {
    fn from(error: String) -> Self {
        TranslationError::Custom(error)
    }
}

impl From<&str> for TranslationError {
    fn from(error: &str) -> Self {
        TranslationError::Custom(error.to_string())
    }
}

impl From<toml::de::Error> for TranslationError {
    fn from(error: toml::de::Error) -> Self {
        TranslationError::Config(error.to_string())
    }
}

impl From<toml::ser::Error> for TranslationError {
    fn from(error: toml::ser::Error) -> Self {
        TranslationError::Config(error.to_string())
    }
}

/// 翻译结果类型别名
///
/// 简化返回类型，使用 `TranslationError` 作为错误类型。
pub type Result<T> = std::result::Result<T, TranslationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversions_become_custom() {
        let from_str: TranslationError = "boom".into();
        let from_string: TranslationError = String::from("bang").into();
        assert_eq!(from_str.to_string(), "boom");
        assert!(matches!(from_string, TranslationError::Custom(ref m) if m == "bang"));
    }

    #[test]
    fn toml_errors_map_to_config() {
        let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let converted: TranslationError = err.into();
        assert!(matches!(converted, TranslationError::Config(_)));
    }
}
