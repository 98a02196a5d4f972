//! 配置管理模块
//!
//! 提供TOML配置文件的读取、写入和自动发现功能。

use crate::error::Result;
use crate::types::TranslationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 自动发现时依次尝试的文件
pub const DEFAULT_CONFIG_LOCATIONS: [&str; 3] = [
    "translation-config.toml",
    "config.toml",
    ".translation-config.toml",
];

/// 翻译库配置结构
///
/// 包含所有进程级别的配置选项，支持从TOML文件加载和保存。
///
/// ```toml
/// [translation]
/// api_base_url = "https://generativelanguage.googleapis.com/v1beta"
/// reference_model = "gemini-2.5-flash"
/// request_timeout_secs = 30
/// target_lang = "zh-Hant"
/// audit_log_capacity = 20
/// data_dir = ".translator-data"
/// log_filter = "info"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationLibConfig {
    /// 翻译配置
    #[serde(default)]
    pub translation: TranslationConfig,
}

impl TranslationLibConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: TranslationLibConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from multiple possible locations
    pub fn load_from_default_locations() -> Self {
        Self::load_from_locations(DEFAULT_CONFIG_LOCATIONS.iter().map(PathBuf::from))
    }

    /// 依次尝试每个路径，第一个能成功解析的为准；都没有就用默认值
    pub fn load_from_locations<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        for path in paths {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load configuration");
                }
            }
        }

        info!("no configuration file found, using defaults");
        Self::default()
    }

    /// Generate example configuration file
    pub fn generate_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
        Self::default().save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: TranslationLibConfig = toml::from_str(
            r#"
            [translation]
            reference_model = "gemini-2.5-flash-lite"
            request_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.translation.reference_model, "gemini-2.5-flash-lite");
        assert_eq!(config.translation.request_timeout_secs, 5);
        assert_eq!(config.translation.audit_log_capacity, 20);
        assert_eq!(config.translation.target_lang, "zh-Hant");
    }

    #[test]
    fn example_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("translation-config.toml");
        TranslationLibConfig::generate_example_config(&path).unwrap();

        let loaded = TranslationLibConfig::from_file(&path).unwrap();
        let defaults = TranslationConfig::default();
        assert_eq!(loaded.translation.api_base_url, defaults.api_base_url);
        assert_eq!(loaded.translation.data_dir, defaults.data_dir);
    }

    #[test]
    fn discovery_skips_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        let good = dir.path().join("good.toml");
        fs::write(&broken, "[translation\n").unwrap();
        fs::write(&good, "[translation]\ntarget_lang = \"ja\"\n").unwrap();

        let config = TranslationLibConfig::load_from_locations(vec![
            dir.path().join("missing.toml"),
            broken,
            good,
        ]);
        assert_eq!(config.translation.target_lang, "ja");
    }
}
