//! 翻译后端适配器模块
//!
//! 以统一的 [`Provider`] 接口封装四种外部翻译后端：OpenAI 聊天补全、
//! Anthropic 消息接口、DeepLX 风格的通用 REST 翻译服务以及 DeepL。
//! 每个适配器负责构造各自的请求载荷、解析各自的响应结构，并把
//! 非 2xx 状态与空译文映射为统一错误。超时通过 HTTP 客户端强制执行，
//! 到期时底层连接一并中止，而不是仅在上层放弃等待。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::translation::config::{constants, TranslationConfig};
use crate::translation::error::{TranslationError, TranslationResult};

/// 翻译请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    /// 待翻译文本（非空，单元不超过约 500 字符）
    pub text: String,
    /// 源语言代码，"auto" 表示自动检测
    pub source_lang: String,
    /// 目标语言代码
    pub target_lang: String,
    /// 可选的上下文提示，参与缓存键
    pub context: Option<String>,
}

impl TranslationRequest {
    /// 创建新的翻译请求
    pub fn new(text: impl Into<String>, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            context: None,
        }
    }

    /// 附加上下文提示
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// 校验请求
    pub fn validate(&self) -> TranslationResult<()> {
        if self.text.trim().is_empty() {
            return Err(TranslationError::Invalid("待翻译文本为空".to_string()));
        }
        if self.text.chars().count() > constants::MAX_UNIT_CHARS {
            return Err(TranslationError::Invalid(format!(
                "单元文本超过 {} 字符上限",
                constants::MAX_UNIT_CHARS
            )));
        }
        if self.target_lang.trim().is_empty() {
            return Err(TranslationError::Invalid("目标语言为空".to_string()));
        }
        Ok(())
    }

    /// 归一化文本：去首尾空白并压缩连续空白
    pub fn normalized_text(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// 计算缓存键：归一化文本 + 语言对 + 上下文的 blake3 摘要
    pub fn cache_key(&self) -> String {
        let material = format!(
            "{}|{}|{}|{}",
            self.source_lang,
            self.target_lang,
            self.context.as_deref().unwrap_or(""),
            self.normalized_text()
        );
        blake3::hash(material.as_bytes()).to_hex().to_string()
    }

    /// 以原文构造回退结果
    pub fn fallback_translation(&self) -> Translation {
        Translation {
            translated_text: self.text.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
        }
    }
}

/// 翻译结果
///
/// 不变式：`translated_text` 永不为空；不可恢复的失败回退为原文，
/// 下游总能渲染出内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    /// 译文
    pub translated_text: String,
    /// 源语言
    pub source_lang: String,
    /// 目标语言
    pub target_lang: String,
}

/// 翻译后端统一接口
#[async_trait]
pub trait Provider: Send + Sync {
    /// 后端名称
    fn name(&self) -> &'static str;

    /// 翻译单个请求
    async fn translate(&self, request: &TranslationRequest) -> TranslationResult<Translation>;
}

/// 根据配置选择并构造后端
///
/// 纯粹依据 `provider` 名称分发；未知或未配置的后端在任何网络调用
/// 之前即报配置错误。
pub fn create_provider(config: &TranslationConfig) -> TranslationResult<Box<dyn Provider>> {
    config.validate()?;

    let client = build_client(config.timeout)?;

    match config.provider.to_ascii_lowercase().as_str() {
        "openai" | "gpt" => {
            require_api_key(config, "openai")?;
            Ok(Box::new(OpenAiProvider {
                client,
                api_key: config.api_key.clone(),
                model: config.model.clone(),
                api_url: config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            }))
        }
        "anthropic" | "claude" => {
            require_api_key(config, "anthropic")?;
            Ok(Box::new(AnthropicProvider {
                client,
                api_key: config.api_key.clone(),
                model: config.model.clone(),
                api_url: config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            }))
        }
        "deeplx" | "rest" => Ok(Box::new(DeepLxProvider {
            client,
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| constants::DEFAULT_API_URL.to_string()),
        })),
        "deepl" => {
            require_api_key(config, "deepl")?;
            Ok(Box::new(DeepLProvider {
                client,
                api_key: config.api_key.clone(),
                api_url: config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| "https://api-free.deepl.com/v2/translate".to_string()),
            }))
        }
        other => Err(TranslationError::Config(format!(
            "未知的翻译后端: {}",
            other
        ))),
    }
}

/// 构造带超时的 HTTP 客户端；超时到期时中止底层连接
fn build_client(timeout: Duration) -> TranslationResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TranslationError::Internal(format!("HTTP 客户端初始化失败: {}", e)))
}

fn require_api_key(config: &TranslationConfig, provider: &str) -> TranslationResult<()> {
    if config.api_key.trim().is_empty() {
        return Err(TranslationError::Config(format!(
            "后端 {} 需要 API 密钥",
            provider
        )));
    }
    Ok(())
}

/// 把非 2xx 响应映射为 HTTP 错误
async fn check_status(response: reqwest::Response) -> TranslationResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = if body.chars().count() > 200 {
        body.chars().take(200).collect()
    } else {
        body
    };

    Err(TranslationError::Http {
        status: status.as_u16(),
        body,
    })
}

/// 聊天类后端共用的系统提示词
fn chat_system_prompt(request: &TranslationRequest) -> String {
    let mut prompt = format!(
        "你是专业的翻译引擎。把用户提供的文本从 {} 翻译为 {}，只输出译文本身，不要任何解释。",
        if request.source_lang == "auto" {
            "源语言（自动检测）".to_string()
        } else {
            request.source_lang.clone()
        },
        request.target_lang
    );

    if let Some(ref context) = request.context {
        prompt.push_str(&format!("上下文提示：{}。", context));
    }

    prompt
}

// ============================================================================
// OpenAI 聊天补全后端
// ============================================================================

/// GPT 风格的聊天补全后端
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    api_url: String,
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn translate(&self, request: &TranslationRequest) -> TranslationResult<Translation> {
        #[derive(Serialize)]
        struct ChatRequest {
            model: String,
            messages: Vec<ChatMessage>,
            temperature: f32,
        }

        #[derive(Serialize)]
        struct ChatMessage {
            role: String,
            content: String,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
        }

        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatResponseMessage,
        }

        #[derive(Deserialize)]
        struct ChatResponseMessage {
            content: Option<String>,
        }

        let payload = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: chat_system_prompt(request),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.text.clone(),
                },
            ],
            temperature: 0.3,
        };

        let url = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        let parsed: ChatResponse = check_status(response).await?.json().await?;

        let translated = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if translated.is_empty() {
            return Err(TranslationError::EmptyTranslation);
        }

        Ok(Translation {
            translated_text: translated,
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
        })
    }
}

// ============================================================================
// Anthropic 消息后端
// ============================================================================

/// Claude 风格的消息后端
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    api_url: String,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn translate(&self, request: &TranslationRequest) -> TranslationResult<Translation> {
        #[derive(Serialize)]
        struct MessagesRequest {
            model: String,
            max_tokens: u32,
            system: String,
            messages: Vec<Message>,
        }

        #[derive(Serialize)]
        struct Message {
            role: String,
            content: String,
        }

        #[derive(Deserialize)]
        struct MessagesResponse {
            content: Vec<ContentBlock>,
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }

        let payload = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 1024,
            system: chat_system_prompt(request),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.text.clone(),
            }],
        };

        let url = format!("{}/v1/messages", self.api_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await?;

        let parsed: MessagesResponse = check_status(response).await?.json().await?;

        let translated = parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .map(|text| text.trim().to_string())
            .unwrap_or_default();

        if translated.is_empty() {
            return Err(TranslationError::EmptyTranslation);
        }

        Ok(Translation {
            translated_text: translated,
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
        })
    }
}

// ============================================================================
// DeepLX 风格的通用 REST 后端
// ============================================================================

/// 通用 REST 翻译后端（DeepLX 载荷形状，默认本地服务，无需密钥）
pub struct DeepLxProvider {
    client: Client,
    api_url: String,
}

#[async_trait]
impl Provider for DeepLxProvider {
    fn name(&self) -> &'static str {
        "deeplx"
    }

    async fn translate(&self, request: &TranslationRequest) -> TranslationResult<Translation> {
        #[derive(Serialize)]
        struct RestRequest {
            text: String,
            source_lang: String,
            target_lang: String,
        }

        #[derive(Deserialize)]
        struct RestResponse {
            data: Option<String>,
        }

        let payload = RestRequest {
            text: request.text.clone(),
            source_lang: request.source_lang.to_ascii_uppercase(),
            target_lang: request.target_lang.to_ascii_uppercase(),
        };

        let response = self.client.post(&self.api_url).json(&payload).send().await?;
        let parsed: RestResponse = check_status(response).await?.json().await?;

        let translated = parsed
            .data
            .map(|data| data.trim().to_string())
            .unwrap_or_default();

        if translated.is_empty() {
            return Err(TranslationError::EmptyTranslation);
        }

        Ok(Translation {
            translated_text: translated,
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
        })
    }
}

// ============================================================================
// DeepL 官方后端
// ============================================================================

/// DeepL 风格后端
pub struct DeepLProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

#[async_trait]
impl Provider for DeepLProvider {
    fn name(&self) -> &'static str {
        "deepl"
    }

    async fn translate(&self, request: &TranslationRequest) -> TranslationResult<Translation> {
        #[derive(Serialize)]
        struct DeepLRequest {
            text: Vec<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            source_lang: Option<String>,
            target_lang: String,
        }

        #[derive(Deserialize)]
        struct DeepLResponse {
            translations: Vec<DeepLTranslation>,
        }

        #[derive(Deserialize)]
        struct DeepLTranslation {
            text: String,
        }

        let payload = DeepLRequest {
            text: vec![request.text.clone()],
            source_lang: if request.source_lang == "auto" {
                None
            } else {
                Some(request.source_lang.to_ascii_uppercase())
            },
            target_lang: request.target_lang.to_ascii_uppercase(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        let parsed: DeepLResponse = check_status(response).await?.json().await?;

        let translated = parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text.trim().to_string())
            .unwrap_or_default();

        if translated.is_empty() {
            return Err(TranslationError::EmptyTranslation);
        }

        Ok(Translation {
            translated_text: translated,
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_normalization() {
        let a = TranslationRequest::new("  Hello   World  ", "en", "zh");
        let b = TranslationRequest::new("Hello World", "en", "zh");
        assert_eq!(a.cache_key(), b.cache_key());

        // 上下文参与缓存键
        let c = TranslationRequest::new("Hello World", "en", "zh").with_context("按钮");
        assert_ne!(b.cache_key(), c.cache_key());

        // 语言对参与缓存键
        let d = TranslationRequest::new("Hello World", "en", "ja");
        assert_ne!(b.cache_key(), d.cache_key());
    }

    #[test]
    fn test_request_validation() {
        assert!(TranslationRequest::new("", "en", "zh").validate().is_err());
        assert!(TranslationRequest::new("   ", "en", "zh").validate().is_err());
        assert!(TranslationRequest::new("Hello", "en", "").validate().is_err());
        assert!(TranslationRequest::new("x".repeat(501), "en", "zh")
            .validate()
            .is_err());
        assert!(TranslationRequest::new("Hello", "en", "zh").validate().is_ok());
    }

    #[test]
    fn test_create_provider_dispatch() {
        let config = TranslationConfig {
            provider: "deeplx".to_string(),
            ..Default::default()
        };
        assert_eq!(create_provider(&config).unwrap().name(), "deeplx");

        let config = TranslationConfig {
            provider: "openai".to_string(),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        assert_eq!(create_provider(&config).unwrap().name(), "openai");

        let config = TranslationConfig {
            provider: "claude".to_string(),
            api_key: "sk-ant".to_string(),
            ..Default::default()
        };
        assert_eq!(create_provider(&config).unwrap().name(), "anthropic");
    }

    #[test]
    fn test_create_provider_unknown_is_config_error() {
        let config = TranslationConfig {
            provider: "babelfish".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(TranslationError::Config(_))
        ));
    }

    #[test]
    fn test_create_provider_requires_api_key() {
        let config = TranslationConfig {
            provider: "openai".to_string(),
            api_key: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(TranslationError::Config(_))
        ));
    }

    #[test]
    fn test_fallback_translation_keeps_original() {
        let request = TranslationRequest::new("Save", "en", "zh");
        let fallback = request.fallback_translation();
        assert_eq!(fallback.translated_text, "Save");
        assert_eq!(fallback.target_lang, "zh");
    }
}
