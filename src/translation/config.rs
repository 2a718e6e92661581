//! 翻译配置管理模块
//!
//! 提供配置常量、配置结构体以及从配置文件/环境变量加载配置的能力。

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::translation::error::{TranslationError, TranslationResult};

/// 翻译配置常量
pub mod constants {
    /// 单次请求默认超时（秒）
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
    /// 缓存默认过期时间：24 小时
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
    /// 缓存容量上限（条目数）
    pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
    /// 超出容量时一次性腾出的余量
    pub const CACHE_EVICTION_HEADROOM: usize = 100;
    /// 每 N 次写入触发一次过期清理（约 10% 的写入）
    pub const CACHE_CLEANUP_INTERVAL: u64 = 10;
    /// 优化批次的分组大小
    pub const DEFAULT_CHUNK_SIZE: usize = 30;
    /// 单组内的最大并发请求数
    pub const DEFAULT_MAX_CONCURRENT: usize = 5;
    /// 分组整体超时（秒）
    pub const DEFAULT_GROUP_TIMEOUT_SECS: u64 = 30;
    /// 单个翻译单元的最大字符数
    pub const MAX_UNIT_CHARS: usize = 500;
    /// 参与翻译的最小文本长度（字符）
    pub const MIN_TEXT_LENGTH: usize = 2;
    /// 字母占比低于该阈值视为符号主导文本，跳过
    pub const MIN_LETTER_RATIO: f32 = 0.34;
    /// 脚本字符占比超过该阈值即判定为该语言
    pub const SCRIPT_RATIO_THRESHOLD: f32 = 0.5;
    /// 去重键使用的文本前缀长度（字符）
    pub const DEDUP_PREFIX_CHARS: usize = 50;
    /// 默认翻译 API 地址（本地 DeepLX 服务）
    pub const DEFAULT_API_URL: &str = "http://localhost:1188/translate";
    /// 默认的持久化存储文件
    pub const DEFAULT_STORE_PATH: &str = "webfanyi-store.redb";

    /// 已翻译标记属性
    pub const TRANSLATED_ATTR: &str = "data-ai-translated";
    /// 原文持久化属性（节点自身为权威副本）
    pub const ORIGINAL_TEXT_ATTR: &str = "data-original-text";
    /// 显式加入翻译的标记属性
    pub const OPT_IN_ATTR: &str = "data-translate";
    /// 还原提示控件的标记属性
    pub const RESTORE_NOTICE_ATTR: &str = "data-webfanyi-restore";
    /// 活动 AI 语言的持久化键
    pub const ACTIVE_LANGUAGE_KEY: &str = "active_ai_language";

    /// 结构性选择器：命中这些标签的元素视为候选
    pub const SELECTOR_TAGS: &[&str] = &[
        "title", "h1", "h2", "h3", "h4", "h5", "h6", "button", "a", "label", "li", "th",
        "legend", "summary", "figcaption",
    ];

    /// 整棵子树跳过的元素
    pub const SKIP_ELEMENTS: &[&str] = &[
        "script", "style", "code", "pre", "noscript", "meta", "link", "svg", "math",
        "canvas", "video", "audio", "embed", "object", "iframe", "template",
    ];

    /// 表单控件元素：不翻译其内容
    pub const FORM_CONTROL_ELEMENTS: &[&str] = &["input", "textarea", "select", "option"];

    /// 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "webfanyi.toml",
        "translation-config.toml",
        ".webfanyi.toml",
    ];
}

/// 翻译配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// 后端名称："openai"、"anthropic"、"deeplx"、"deepl"
    pub provider: String,

    /// API 密钥（deeplx 本地服务可为空）
    pub api_key: String,

    /// 聊天类后端使用的模型名
    pub model: String,

    /// API 地址覆盖；为空时使用各后端的默认地址
    pub api_url: Option<String>,

    /// 源语言代码，"auto" 表示自动
    pub source_lang: String,

    /// 目标语言代码
    pub target_lang: String,

    /// 应用原生支持的语言（切换这些语言不走翻译管道）
    pub native_languages: Vec<String>,

    /// 单次请求超时
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// 可重试错误的单项重试次数（0 表示不重试）
    pub max_retries: usize,

    /// 缓存配置
    pub cache: CacheSettings,

    /// 批次配置
    pub batch: BatchSettings,
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// 启用缓存
    pub enabled: bool,

    /// 容量上限（条目数）
    pub capacity: usize,

    /// 缓存过期时间
    #[serde(with = "duration_serde")]
    pub ttl: Duration,

    /// 持久化存储路径；为 None 时使用默认路径
    pub store_path: Option<PathBuf>,

    /// 构造时用回退词典预热缓存
    pub prewarm: bool,
}

/// 批次配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSettings {
    /// 分组大小
    pub chunk_size: usize,

    /// 组内最大并发
    pub max_concurrent: usize,

    /// 分组整体超时
    #[serde(with = "duration_serde")]
    pub group_timeout: Duration,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: "deeplx".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            api_url: None,
            source_lang: "auto".to_string(),
            target_lang: "zh".to_string(),
            native_languages: vec!["en".to_string(), "zh".to_string()],
            timeout: Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
            max_retries: 0,
            cache: CacheSettings::default(),
            batch: BatchSettings::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: constants::DEFAULT_CACHE_CAPACITY,
            ttl: Duration::from_secs(constants::DEFAULT_CACHE_TTL_SECS),
            store_path: None,
            prewarm: false,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            max_concurrent: constants::DEFAULT_MAX_CONCURRENT,
            group_timeout: Duration::from_secs(constants::DEFAULT_GROUP_TIMEOUT_SECS),
        }
    }
}

impl TranslationConfig {
    /// 从配置文件与环境变量加载配置
    ///
    /// 依次尝试 `constants::CONFIG_PATHS` 中的文件，再叠加 `WEBFANYI_` 前缀的
    /// 环境变量覆盖；均不存在时返回默认配置。
    pub fn load() -> TranslationResult<Self> {
        // 先加载 .env 文件（存在时）
        dotenv::dotenv().ok();

        let mut builder = Config::builder();
        for path in constants::CONFIG_PATHS {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("WEBFANYI").separator("__"));

        let config = builder.build()?.try_deserialize::<TranslationConfig>()?;
        Ok(config)
    }

    /// 校验配置；任何翻译尝试前调用
    pub fn validate(&self) -> TranslationResult<()> {
        if self.provider.trim().is_empty() {
            return Err(TranslationError::Config("未配置翻译后端".to_string()));
        }
        if self.target_lang.trim().is_empty() {
            return Err(TranslationError::Config("未配置目标语言".to_string()));
        }
        if self.batch.chunk_size == 0 {
            return Err(TranslationError::Config("分组大小不能为 0".to_string()));
        }
        Ok(())
    }

    /// 判断语言是否为原生支持语言
    pub fn is_native_language(&self, lang: &str) -> bool {
        let normalized = normalize_lang(lang);
        self.native_languages
            .iter()
            .any(|native| normalize_lang(native) == normalized)
    }
}

/// 语言代码归一化："zh-CN" -> "zh"
pub fn normalize_lang(lang: &str) -> String {
    lang.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Duration 的秒级序列化/反序列化
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TranslationConfig::default();
        assert_eq!(config.provider, "deeplx");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.cache.ttl, Duration::from_secs(86_400));
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.batch.chunk_size, 30);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_provider() {
        let config = TranslationConfig {
            provider: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_native_language_normalization() {
        let config = TranslationConfig::default();
        assert!(config.is_native_language("zh-CN"));
        assert!(config.is_native_language("EN"));
        assert!(!config.is_native_language("ja"));
    }

    #[test]
    fn test_normalize_lang() {
        assert_eq!(normalize_lang("zh-CN"), "zh");
        assert_eq!(normalize_lang("pt_BR"), "pt");
        assert_eq!(normalize_lang(" EN "), "en");
    }
}
