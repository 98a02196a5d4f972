//! 提示词组装与模型输出解析

use crate::types::AttemptError;
use regex::Regex;
use std::sync::OnceLock;

/// 默认核心模板
///
/// `{source_lang}`、`{target_lang}` 与 `{json_input_text}` 会被替换。
pub const DEFAULT_CORE_PROMPT_TEMPLATE: &str = r#"You are a professional subtitle translator and {source_lang} proofreader.
The {source_lang} source lines come from automatic speech recognition and may contain misheard words or wrong proper nouns.

Your task:
Use the surrounding lines as context, understand what the speaker actually meant, and translate each line into natural, conversational {target_lang}. Do not label speakers.

Example:
- Input: ["こんにちは世界", "お元気ですか？"]
- Output: ["哈囉世界", "你好嗎？"]

Instructions:
Follow every guideline and glossary above. Translate the JSON array below **line by line** and return the result as a JSON array with **the same order and the same number of elements**.

{json_input_text}"#;

const INPUT_PLACEHOLDER: &str = "{json_input_text}";

/// 语言代码 → 显示名称
pub fn language_display_name(code: &str) -> &'static str {
    match code {
        "ja" => "Japanese",
        "ko" => "Korean",
        "en" => "English",
        "zh-Hant" => "Traditional Chinese",
        "zh-Hans" => "Simplified Chinese",
        _ => "source language",
    }
}

/// 组装完整提示词
///
/// 有 `prompt_override` 时只替换其中的 `{json_input_text}`；
/// 否则把该语言的自定义提示词放在核心模板之前。
pub fn build_prompt(
    texts: &[String],
    source_lang: &str,
    target_lang: &str,
    custom_prompt: &str,
    prompt_override: Option<&str>,
) -> String {
    // Vec<String> 的序列化不会失败
    let json_input = serde_json::to_string(texts).unwrap_or_default();

    if let Some(template) = prompt_override {
        return template.replace(INPUT_PLACEHOLDER, &json_input);
    }

    let target_name = match language_display_name(target_lang) {
        "source language" => target_lang,
        name => name,
    };
    let core = DEFAULT_CORE_PROMPT_TEMPLATE
        .replace("{source_lang}", language_display_name(source_lang))
        .replace("{target_lang}", target_name)
        .replace(INPUT_PLACEHOLDER, &json_input);

    format!("{}\n\n{}", custom_prompt, core)
}

fn json_array_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("static regex is valid"))
}

/// 从模型输出中取出译文数组，并检查数量与输入一致
pub fn extract_translations(raw: &str, expected: usize) -> Result<Vec<String>, AttemptError> {
    let Some(found) = json_array_pattern().find(raw) else {
        return Err(AttemptError::Unparseable("no JSON array in response".to_string()));
    };

    let translations: Vec<String> = serde_json::from_str(found.as_str())
        .map_err(|e| AttemptError::Unparseable(format!("invalid JSON array: {}", e)))?;

    if translations.len() != expected {
        return Err(AttemptError::Shape {
            expected,
            actual: translations.len(),
        });
    }

    Ok(translations)
}
