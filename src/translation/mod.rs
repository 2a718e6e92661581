//! 页面动态翻译子系统
//!
//! 从 HTML 文档中发现可翻译文本，经带缓存的翻译后端批量翻译后
//! 写回文档，并支持完整还原与语言切换。各组件可独立使用：
//!
//! - [`language`]：脚本范围启发式语言分类
//! - [`cache`]：内存 + redb 双层持久缓存
//! - [`provider`]：多后端翻译适配
//! - [`translator`]：带批量与取消语义的翻译门面
//! - [`scanner`]：确定性的页面文本发现
//! - [`transformer`]：译文应用与还原
//! - [`pipeline`]：整页翻译编排

pub mod cache;
pub mod config;
pub mod error;
pub mod language;
pub mod pipeline;
pub mod provider;
pub mod scanner;
pub mod transformer;
pub mod translator;

pub use cache::{CacheStats, TranslationCache};
pub use config::{constants, BatchSettings, CacheSettings, TranslationConfig};
pub use error::{ErrorSeverity, TranslationError, TranslationResult};
pub use language::LanguageClassifier;
pub use pipeline::{PagePipeline, PageReport, SwitchOutcome};
pub use provider::{create_provider, Provider, Translation, TranslationRequest};
pub use scanner::{PageScanner, TranslatableText};
pub use transformer::{PageTransformer, PipelineState};
pub use translator::{cancel_pair, CancelHandle, CancelToken, Translator};

use crate::html::{html_to_dom, serialize_document};

/// 翻译一段 HTML 并返回翻译后的字节与报告
pub async fn translate_html(
    html: &[u8],
    target_lang: &str,
    config: TranslationConfig,
) -> TranslationResult<(Vec<u8>, PageReport)> {
    let dom = html_to_dom(html, "utf-8");
    let mut pipeline = PagePipeline::new(config)?;
    let report = pipeline.translate_page(&dom, target_lang).await?;
    Ok((serialize_document(&dom, "utf-8"), report))
}

/// 还原一段已翻译的 HTML
pub fn restore_html(html: &[u8]) -> (Vec<u8>, usize) {
    let dom = html_to_dom(html, "utf-8");
    let restored = PageTransformer::new().restore_all(&dom);
    (serialize_document(&dom, "utf-8"), restored)
}
