//! webfanyi — HTML 页面动态翻译管道
//!
//! 扫描 HTML 文档中的结构性文本（标题、按钮、链接、列表项等），
//! 通过可插拔的翻译后端批量翻译并写回文档；原文持久化在元素
//! 属性上，任何时候都可以无损还原。译文经由内存 + redb 双层
//! 缓存，活动语言跨会话持久化并在下次加载时自动重放。
//!
//! ```no_run
//! use webfanyi::translation::{translate_html, TranslationConfig};
//!
//! # async fn demo() -> webfanyi::translation::TranslationResult<()> {
//! let html = b"<html><body><h1>Hello</h1></body></html>";
//! let (translated, report) = translate_html(html, "zh", TranslationConfig::default()).await?;
//! println!("翻译了 {} 个单元", report.translated);
//! # Ok(())
//! # }
//! ```

pub mod html;
pub mod translation;

pub use translation::{
    PagePipeline, PageReport, PageScanner, PageTransformer, PipelineState, SwitchOutcome,
    Translation, TranslationConfig, TranslationError, TranslationResult, Translator,
};
