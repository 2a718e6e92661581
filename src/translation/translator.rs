//! 翻译门面
//!
//! 组合后端适配器、缓存与语言分类器，对外提供单条、批量与
//! 优化批量三种调用方式。单条调用错误原样传播；批量调用
//! 保持输出顺序，单项失败回退为原文，永不整体失败。

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::translation::cache::TranslationCache;
use crate::translation::config::TranslationConfig;
use crate::translation::error::{log_error, TranslationResult};
use crate::translation::language::LanguageClassifier;
use crate::translation::provider::{create_provider, Provider, Translation, TranslationRequest};

/// 取消句柄：发起端持有
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// 发出取消信号；幂等
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// 取消令牌：执行端持有
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// 构造一个永不触发的令牌
    pub fn never() -> Self {
        cancel_pair().1
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// 等待取消信号
    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // 发送端已全部丢弃，视为不再会取消
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// 创建一对取消句柄与令牌
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle {
            sender: Arc::new(sender),
        },
        CancelToken { receiver },
    )
}

/// 翻译门面
pub struct Translator {
    provider: Box<dyn Provider>,
    cache: Arc<TranslationCache>,
    classifier: LanguageClassifier,
    config: TranslationConfig,
}

impl Translator {
    /// 按配置构造翻译器
    ///
    /// 后端选择错误（未知后端、缺失密钥）在此处即返回，不会发起任何网络调用。
    pub fn new(config: TranslationConfig) -> TranslationResult<Self> {
        let provider = create_provider(&config)?;

        let cache = if config.cache.enabled {
            Arc::new(TranslationCache::open(&config.cache))
        } else {
            Arc::new(TranslationCache::in_memory(&config.cache))
        };

        info!("翻译器就绪: 后端={} 目标语言={}", provider.name(), config.target_lang);

        let translator = Self {
            provider,
            cache,
            classifier: LanguageClassifier::new(),
            config,
        };

        if translator.config.cache.prewarm {
            translator.prewarm_fallback_dictionary();
        }

        Ok(translator)
    }

    /// 注入自定义后端与缓存（测试用）
    pub fn with_provider(
        config: TranslationConfig,
        provider: Box<dyn Provider>,
        cache: Arc<TranslationCache>,
    ) -> Self {
        Self {
            provider,
            cache,
            classifier: LanguageClassifier::new(),
            config,
        }
    }

    /// 当前配置
    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    /// 更新目标语言
    ///
    /// 后端凭据与地址不变，目标语言随每个请求下发，无需重建后端。
    pub fn set_target_lang(&mut self, lang: &str) {
        self.config.target_lang = lang.to_string();

        if self.config.cache.prewarm {
            self.prewarm_fallback_dictionary();
        }
    }

    /// 把回退词典写入缓存预热；返回写入的条目数
    ///
    /// 对每个词典条目以小写原形与逐词首字母大写两种书写变体入缓存，
    /// 使页面上常见的标题式写法也能直接命中。
    pub fn prewarm_fallback_dictionary(&self) -> usize {
        let target = &self.config.target_lang;
        let mut warmed = 0;

        for (term, translated) in fallback_dictionary(target) {
            for variant in term_variants(term) {
                let request = TranslationRequest::new(
                    variant,
                    self.config.source_lang.clone(),
                    target.clone(),
                );
                let translation = Translation {
                    translated_text: translated.to_string(),
                    source_lang: self.config.source_lang.clone(),
                    target_lang: target.clone(),
                };
                self.cache.set(&request.cache_key(), &translation);
                warmed += 1;
            }
        }

        if warmed > 0 {
            info!("回退词典预热完成: 语言={} 条目={}", target, warmed);
        }

        warmed
    }

    /// 共享缓存
    pub fn cache(&self) -> Arc<TranslationCache> {
        Arc::clone(&self.cache)
    }

    /// 翻译单条文本；所有错误原样传播
    pub async fn translate(&self, text: &str) -> TranslationResult<Translation> {
        let request = TranslationRequest::new(
            text,
            self.config.source_lang.clone(),
            self.config.target_lang.clone(),
        );
        self.translate_request(&request).await
    }

    /// 翻译单个请求：缓存优先，未命中时调用后端并写回缓存
    pub async fn translate_request(
        &self,
        request: &TranslationRequest,
    ) -> TranslationResult<Translation> {
        request.validate()?;

        let key = request.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            debug!("缓存命中: {}", truncate_for_log(&request.text));
            return Ok(hit);
        }

        let mut attempt = 0;
        loop {
            match self.provider.translate(request).await {
                Ok(translation) => {
                    self.cache.set(&key, &translation);
                    return Ok(translation);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(
                        "翻译失败，第 {} 次重试: {}",
                        attempt,
                        truncate_for_log(&request.text)
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64))
                        .await;
                }
                Err(e) => return log_error(e),
            }
        }
    }

    /// 批量翻译
    ///
    /// 输出与输入一一对应且顺序一致；单项失败回退为该项原文。
    pub async fn translate_batch(&self, texts: &[String]) -> Vec<Translation> {
        let semaphore = Arc::new(Semaphore::new(self.config.batch.max_concurrent.max(1)));

        let futures = texts.iter().map(|text| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let request = TranslationRequest::new(
                    text.clone(),
                    self.config.source_lang.clone(),
                    self.config.target_lang.clone(),
                );

                let Ok(_permit) = semaphore.acquire().await else {
                    return request.fallback_translation();
                };

                match self.translate_request(&request).await {
                    Ok(translation) => translation,
                    Err(e) => {
                        warn!("批量单项失败，回退原文: {}", e);
                        request.fallback_translation()
                    }
                }
            }
        });

        join_all(futures).await
    }

    /// 优化批量翻译
    ///
    /// 在批量语义之上叠加三层优化：
    /// 1. 已是目标语言的文本直接跳过，不发起请求；
    /// 2. 其余文本按固定大小分组，组内并发、组间串行；
    /// 3. 每组受整体超时约束，超时组内未完成项先查回退词典、再回退原文。
    /// 收到取消信号后，剩余各项一律保持原文。
    pub async fn translate_batch_optimized(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Vec<Translation> {
        self.translate_batch_optimized_with_progress(texts, cancel, |_, _| {})
            .await
    }

    /// 带进度回调的优化批量翻译
    ///
    /// 回调参数为（已解决单元数, 总单元数），在分类器跳过阶段之后
    /// 与每个分组完成之后各调用一次。
    pub async fn translate_batch_optimized_with_progress(
        &self,
        texts: &[String],
        cancel: &CancelToken,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Vec<Translation> {
        let target = &self.config.target_lang;
        let fallback = fallback_dictionary(target);
        let total = texts.len();

        let mut results: Vec<Option<Translation>> = vec![None; texts.len()];
        let mut pending: Vec<usize> = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            if self.classifier.matches_target(text, target) {
                debug!("已是目标语言，跳过: {}", truncate_for_log(text));
                results[index] = Some(Translation {
                    translated_text: text.clone(),
                    source_lang: target.clone(),
                    target_lang: target.clone(),
                });
            } else {
                pending.push(index);
            }
        }

        let mut done = total - pending.len();
        if done > 0 {
            on_progress(done, total);
        }

        let chunk_size = self.config.batch.chunk_size.max(1);

        for chunk in pending.chunks(chunk_size) {
            if cancel.is_cancelled() {
                debug!("批量翻译被取消，剩余 {} 项保持原文", chunk.len());
                break;
            }

            let chunk_texts: Vec<String> =
                chunk.iter().map(|&index| texts[index].clone()).collect();

            let mut token = cancel.clone();
            let group = tokio::time::timeout(
                self.config.batch.group_timeout,
                self.translate_batch(&chunk_texts),
            );

            let outcome = tokio::select! {
                result = group => result.ok(),
                _ = token.cancelled() => None,
            };

            match outcome {
                Some(translations) => {
                    for (&index, translation) in chunk.iter().zip(translations) {
                        results[index] = Some(translation);
                    }
                    done += chunk.len();
                    on_progress(done, total);
                }
                None => {
                    // 组超时或取消：查词典，查不到保持原文
                    warn!("分组未在时限内完成，{} 项走回退路径", chunk.len());
                    for &index in chunk {
                        let original = &texts[index];
                        let translated = fallback
                            .get(original.trim().to_ascii_lowercase().as_str())
                            .map(|hit| (*hit).to_string())
                            .unwrap_or_else(|| original.clone());

                        results[index] = Some(Translation {
                            translated_text: translated,
                            source_lang: self.config.source_lang.clone(),
                            target_lang: target.clone(),
                        });
                    }

                    done += chunk.len();
                    on_progress(done, total);

                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }

        // 未处理到的分组（取消提前退出）一律保持原文
        results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| Translation {
                    translated_text: texts[index].clone(),
                    source_lang: self.config.source_lang.clone(),
                    target_lang: target.clone(),
                })
            })
            .collect()
    }
}

/// 常见界面词的回退词典
///
/// 覆盖登录、导航、表单、管理后台等高频界面短语，供分组超时后的
/// 降级展示与缓存预热使用；键为小写归一形式。
pub fn fallback_dictionary(target_lang: &str) -> HashMap<&'static str, &'static str> {
    let mut dict = HashMap::new();

    if crate::translation::config::normalize_lang(target_lang) == "zh" {
        // 通用操作
        dict.insert("save", "保存");
        dict.insert("cancel", "取消");
        dict.insert("ok", "确定");
        dict.insert("confirm", "确认");
        dict.insert("delete", "删除");
        dict.insert("edit", "编辑");
        dict.insert("close", "关闭");
        dict.insert("back", "返回");
        dict.insert("continue", "继续");
        dict.insert("next", "下一步");
        dict.insert("previous", "上一步");
        dict.insert("search", "搜索");
        dict.insert("submit", "提交");
        dict.insert("loading", "加载中");
        dict.insert("loading...", "加载中...");
        dict.insert("error", "错误");
        dict.insert("success", "成功");
        dict.insert("welcome", "欢迎");
        dict.insert("help", "帮助");
        dict.insert("more", "更多");
        dict.insert("actions", "操作");
        dict.insert("title", "标题");
        dict.insert("description", "描述");
        // 导航
        dict.insert("home", "首页");
        dict.insert("settings", "设置");
        dict.insert("menu", "菜单");
        dict.insert("dashboard", "仪表板");
        dict.insert("items", "项目");
        dict.insert("admin", "管理员");
        dict.insert("user settings", "用户设置");
        dict.insert("my profile", "我的资料");
        dict.insert("appearance", "外观");
        dict.insert("theme", "主题");
        dict.insert("language", "语言");
        // 认证
        dict.insert("login", "登录");
        dict.insert("log in", "登录");
        dict.insert("logout", "退出登录");
        dict.insert("log out", "退出登录");
        dict.insert("sign up", "注册");
        dict.insert("username", "用户名");
        dict.insert("password", "密码");
        dict.insert("email", "邮箱");
        dict.insert("full name", "姓名");
        dict.insert("confirm password", "确认密码");
        dict.insert("change password", "修改密码");
        dict.insert("forgot password?", "忘记密码？");
    }

    dict
}

/// 词典条目的常见书写变体：原形与逐词首字母大写形式
fn term_variants(term: &str) -> Vec<String> {
    let title_case: String = term
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if title_case == term {
        vec![term.to_string()]
    } else {
        vec![term.to_string(), title_case]
    }
}

fn truncate_for_log(text: &str) -> String {
    if text.chars().count() > 40 {
        let prefix: String = text.chars().take(40).collect();
        format!("{}…", prefix)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::config::BatchSettings;
    use crate::translation::error::TranslationError;

    struct NeverProvider;

    #[async_trait::async_trait]
    impl Provider for NeverProvider {
        fn name(&self) -> &'static str {
            "never"
        }

        async fn translate(
            &self,
            _request: &TranslationRequest,
        ) -> TranslationResult<Translation> {
            Err(TranslationError::Internal("不应被调用".to_string()))
        }
    }
    use crate::translation::config::CacheSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn translate(&self, request: &TranslationRequest) -> TranslationResult<Translation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Translation {
                translated_text: format!("译:{}", request.text),
                source_lang: request.source_lang.clone(),
                target_lang: request.target_lang.clone(),
            })
        }
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn translate(&self, _: &TranslationRequest) -> TranslationResult<Translation> {
            Err(TranslationError::Http {
                status: 404,
                body: "not found".to_string(),
            })
        }
    }

    fn test_translator(provider: Box<dyn Provider>) -> Translator {
        let cache = Arc::new(TranslationCache::in_memory(&CacheSettings::default()));
        Translator::with_provider(TranslationConfig::default(), provider, cache)
    }

    #[tokio::test]
    async fn test_translate_uses_cache_on_second_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let translator = test_translator(Box::new(EchoProvider {
            calls: Arc::clone(&calls),
        }));

        let first = translator.translate("Hello").await.unwrap();
        let second = translator.translate("Hello").await.unwrap();

        assert_eq!(first.translated_text, "译:Hello");
        assert_eq!(second.translated_text, "译:Hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_translate_propagates_errors() {
        let translator = test_translator(Box::new(FailingProvider));
        let result = translator.translate("Hello").await;
        assert!(matches!(result, Err(TranslationError::Http { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_falls_back() {
        let translator = test_translator(Box::new(FailingProvider));
        let texts = vec!["One".to_string(), "Two".to_string(), "Three".to_string()];

        let results = translator.translate_batch(&texts).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].translated_text, "One");
        assert_eq!(results[1].translated_text, "Two");
        assert_eq!(results[2].translated_text, "Three");
    }

    #[tokio::test]
    async fn test_optimized_batch_skips_target_language_text() {
        let calls = Arc::new(AtomicUsize::new(0));
        let translator = test_translator(Box::new(EchoProvider {
            calls: Arc::clone(&calls),
        }));

        let texts = vec!["已经是中文".to_string(), "Hello".to_string()];
        let results = translator
            .translate_batch_optimized(&texts, &CancelToken::never())
            .await;

        assert_eq!(results[0].translated_text, "已经是中文");
        assert_eq!(results[1].translated_text, "译:Hello");
        // 仅非目标语言的项发起了请求
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_optimized_batch_cancelled_keeps_originals() {
        let translator = test_translator(Box::new(NeverProvider));
        let (handle, token) = cancel_pair();
        handle.cancel();

        let texts = vec!["Hello".to_string(), "World".to_string()];
        let results = translator.translate_batch_optimized(&texts, &token).await;

        assert_eq!(results[0].translated_text, "Hello");
        assert_eq!(results[1].translated_text, "World");
    }

    #[tokio::test]
    async fn test_retry_on_retryable_error() {
        struct FlakyProvider {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl Provider for FlakyProvider {
            fn name(&self) -> &'static str {
                "flaky"
            }

            async fn translate(
                &self,
                request: &TranslationRequest,
            ) -> TranslationResult<Translation> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TranslationError::Http {
                        status: 503,
                        body: String::new(),
                    })
                } else {
                    Ok(Translation {
                        translated_text: format!("译:{}", request.text),
                        source_lang: request.source_lang.clone(),
                        target_lang: request.target_lang.clone(),
                    })
                }
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(TranslationCache::in_memory(&CacheSettings::default()));
        let config = TranslationConfig {
            max_retries: 1,
            ..Default::default()
        };
        let translator = Translator::with_provider(
            config,
            Box::new(FlakyProvider {
                calls: Arc::clone(&calls),
            }),
            cache,
        );

        let result = translator.translate("Hello").await.unwrap();
        assert_eq!(result.translated_text, "译:Hello");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fallback_dictionary_has_common_terms() {
        let dict = fallback_dictionary("zh-CN");
        assert_eq!(dict.get("save"), Some(&"保存"));
        assert_eq!(dict.get("cancel"), Some(&"取消"));
        assert_eq!(dict.get("dashboard"), Some(&"仪表板"));
        assert_eq!(dict.get("continue"), Some(&"继续"));
        assert_eq!(dict.get("success"), Some(&"成功"));
        assert!(fallback_dictionary("fr").is_empty());
    }

    #[test]
    fn test_term_variants_cover_title_case() {
        assert_eq!(term_variants("save"), vec!["save", "Save"]);
        assert_eq!(term_variants("log in"), vec!["log in", "Log In"]);
        assert_eq!(
            term_variants("forgot password?"),
            vec!["forgot password?", "Forgot Password?"]
        );
    }

    #[tokio::test]
    async fn test_optimized_batch_reports_progress_per_group() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(TranslationCache::in_memory(&CacheSettings::default()));
        let config = TranslationConfig {
            batch: BatchSettings {
                chunk_size: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let translator =
            Translator::with_provider(config, Box::new(EchoProvider { calls }), cache);

        let texts = vec![
            "你好".to_string(),
            "Alpha one".to_string(),
            "Beta two".to_string(),
        ];
        let mut progress = Vec::new();
        let results = translator
            .translate_batch_optimized_with_progress(&texts, &CancelToken::never(), |done, total| {
                progress.push((done, total));
            })
            .await;

        // 分类器跳过一次推进，之后每个分组推进一次
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_prewarmed_dictionary_hits_cache() {
        let translator = test_translator(Box::new(NeverProvider));
        let warmed = translator.prewarm_fallback_dictionary();
        assert!(warmed > 0);

        // 小写原形与标题式写法都直接命中缓存，不触达后端
        assert_eq!(translator.translate("Save").await.unwrap().translated_text, "保存");
        assert_eq!(translator.translate("log in").await.unwrap().translated_text, "登录");
        assert_eq!(
            translator
                .translate("Forgot Password?")
                .await
                .unwrap()
                .translated_text,
            "忘记密码？"
        );
    }

    #[test]
    fn test_prewarm_flag_runs_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let config = TranslationConfig {
            cache: CacheSettings {
                prewarm: true,
                store_path: Some(dir.path().join("store.redb")),
                ..Default::default()
            },
            ..Default::default()
        };

        let translator = Translator::new(config).unwrap();
        let key = TranslationRequest::new("Save", "auto", "zh").cache_key();
        assert_eq!(
            translator.cache().get(&key).unwrap().translated_text,
            "保存"
        );
    }
}
