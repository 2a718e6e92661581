//! 语言脚本分类器
//!
//! 基于 Unicode 脚本范围的启发式检测，按固定优先级逐项匹配，
//! 首个命中即返回。仅用于跳过冗余的翻译请求，不作为正确性判断：
//! 误判只会导致多一次或少一次翻译调用。

use regex::Regex;

use crate::translation::config::{constants, normalize_lang};

/// 单条脚本规则
struct ScriptRule {
    /// 命中时返回的语言代码
    lang: &'static str,
    /// 脚本字符匹配
    pattern: Regex,
    /// 占比阈值；假名等强指示脚本使用更低阈值
    threshold: f32,
}

/// 语言脚本分类器
pub struct LanguageClassifier {
    rules: Vec<ScriptRule>,
}

impl LanguageClassifier {
    /// 构建分类器，规则按优先级排列
    ///
    /// 假名在汉字之前检测，避免日文被误判为中文。
    pub fn new() -> Self {
        let table: &[(&'static str, &str, f32)] = &[
            ("ko", r"\p{Hangul}", constants::SCRIPT_RATIO_THRESHOLD),
            ("ja", r"[\p{Hiragana}\p{Katakana}]", 0.2),
            ("zh", r"\p{Han}", constants::SCRIPT_RATIO_THRESHOLD),
            ("ru", r"\p{Cyrillic}", constants::SCRIPT_RATIO_THRESHOLD),
            ("ar", r"\p{Arabic}", constants::SCRIPT_RATIO_THRESHOLD),
            ("th", r"\p{Thai}", constants::SCRIPT_RATIO_THRESHOLD),
            ("he", r"\p{Hebrew}", constants::SCRIPT_RATIO_THRESHOLD),
            ("el", r"\p{Greek}", constants::SCRIPT_RATIO_THRESHOLD),
            ("hi", r"\p{Devanagari}", constants::SCRIPT_RATIO_THRESHOLD),
        ];

        let rules = table
            .iter()
            .filter_map(|(lang, pattern, threshold)| {
                Regex::new(pattern).ok().map(|re| ScriptRule {
                    lang,
                    pattern: re,
                    threshold: *threshold,
                })
            })
            .collect();

        Self { rules }
    }

    /// 对文本进行分类；无法判定时返回 `None`（调用方按拉丁/英文处理）
    pub fn classify(&self, text: &str) -> Option<&'static str> {
        let total = text.chars().filter(|c| !c.is_whitespace()).count();
        if total == 0 {
            return None;
        }

        for rule in &self.rules {
            let matched: usize = rule
                .pattern
                .find_iter(text)
                .map(|m| m.as_str().chars().count())
                .sum();

            if matched as f32 / total as f32 > rule.threshold {
                return Some(rule.lang);
            }
        }

        None
    }

    /// 判断文本是否已经是目标语言
    ///
    /// 目标为英文时，无法判定脚本的文本视为英文。
    pub fn matches_target(&self, text: &str, target_lang: &str) -> bool {
        let target = normalize_lang(target_lang);

        match self.classify(text) {
            Some(lang) => lang == target,
            None => target == "en",
        }
    }
}

impl Default for LanguageClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_chinese() {
        let classifier = LanguageClassifier::new();
        assert_eq!(classifier.classify("你好"), Some("zh"));
        assert_eq!(classifier.classify("你好，世界！"), Some("zh"));
    }

    #[test]
    fn test_classify_japanese_before_chinese() {
        let classifier = LanguageClassifier::new();
        // 日文混合汉字与假名，假名优先判定
        assert_eq!(classifier.classify("こんにちは"), Some("ja"));
        assert_eq!(classifier.classify("日本語のテキストです"), Some("ja"));
    }

    #[test]
    fn test_classify_other_scripts() {
        let classifier = LanguageClassifier::new();
        assert_eq!(classifier.classify("안녕하세요"), Some("ko"));
        assert_eq!(classifier.classify("Привет мир"), Some("ru"));
        assert_eq!(classifier.classify("مرحبا بالعالم"), Some("ar"));
        assert_eq!(classifier.classify("สวัสดี"), Some("th"));
    }

    #[test]
    fn test_classify_latin_returns_none() {
        let classifier = LanguageClassifier::new();
        assert_eq!(classifier.classify("Hello World"), None);
        assert_eq!(classifier.classify(""), None);
        assert_eq!(classifier.classify("123"), None);
    }

    #[test]
    fn test_matches_target() {
        let classifier = LanguageClassifier::new();
        assert!(classifier.matches_target("你好", "zh"));
        assert!(classifier.matches_target("你好", "zh-CN"));
        assert!(!classifier.matches_target("Hello", "zh"));
        assert!(classifier.matches_target("Hello", "en"));
    }

    #[test]
    fn test_mixed_script_below_threshold_not_classified() {
        let classifier = LanguageClassifier::new();
        // 少量汉字混在英文句子里，占比不足，不判定为中文
        assert_eq!(classifier.classify("Click the 保存 button to continue"), None);
    }
}
