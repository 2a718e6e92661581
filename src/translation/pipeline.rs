//! 页面翻译管道
//!
//! 串联扫描、翻译、应用与持久化四个阶段，并维护页面状态机。
//! 活动 AI 语言持久化在缓存的设置表中，下次加载同一存储时
//! 通过 [`PagePipeline::resume_if_persisted`] 自动重放翻译。
//! 语言切换区分原生语言（同步还原，不发起网络请求）与 AI 语言
//! （完整翻译管道）；工作进行期间的切换请求被忽略并返回
//! [`SwitchOutcome::Busy`]。

use markup5ever_rcdom::RcDom;
use serde::Serialize;
use tracing::{debug, info};

use crate::translation::config::{normalize_lang, TranslationConfig};
use crate::translation::error::TranslationResult;
use crate::translation::scanner::PageScanner;
use crate::translation::transformer::{PageTransformer, PipelineState};
use crate::translation::translator::{cancel_pair, CancelHandle, CancelToken, Translator};

/// 一次页面翻译的汇总报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageReport {
    /// 扫描到的可翻译单元数
    pub scanned: usize,
    /// 实际替换为译文的单元数
    pub translated: usize,
    /// 由缓存直接提供的译文数
    pub from_cache: usize,
    /// 保持原文的单元数（失败回退、超时回退或已是目标语言）
    pub failed: usize,
}

/// 语言切换的结果
#[derive(Debug)]
pub enum SwitchOutcome {
    /// 管道正忙，本次切换被忽略
    Busy,
    /// 切换到原生语言：页面已还原，未发起翻译
    Native(String),
    /// 切换到 AI 语言：完整翻译已执行
    Translated { lang: String, report: PageReport },
}

/// 页面翻译管道
pub struct PagePipeline {
    translator: Translator,
    scanner: PageScanner,
    transformer: PageTransformer,
    state: PipelineState,
    cancel: CancelHandle,
    cancel_token: CancelToken,
}

impl PagePipeline {
    /// 按配置构造管道
    pub fn new(config: TranslationConfig) -> TranslationResult<Self> {
        Ok(Self::with_translator(Translator::new(config)?))
    }

    /// 使用现成的翻译器构造管道（测试用）
    pub fn with_translator(translator: Translator) -> Self {
        let (cancel, cancel_token) = cancel_pair();
        Self {
            translator,
            scanner: PageScanner::new(),
            transformer: PageTransformer::new(),
            state: PipelineState::Idle,
            cancel,
            cancel_token,
        }
    }

    /// 当前状态
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// 当前翻译周期的取消句柄
    ///
    /// 句柄可克隆后交给外部触发方（如界面上的还原按钮），在翻译
    /// 进行中发出信号即可让剩余分组保持原文。每次还原或取消后
    /// 管道会换用新的信号对，旧句柄随之失效。
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// 持久化的活动 AI 语言
    pub fn persisted_language(&self) -> Option<String> {
        self.translator.cache().active_language()
    }

    /// 翻译整个页面到指定语言
    ///
    /// 扫描 → 优化批量翻译 → 应用 → 持久化活动语言。翻译进度通过
    /// [`PipelineState::Translating`] 按分组推进；通过
    /// [`PagePipeline::cancel_handle`] 预先取得的句柄可在翻译进行中
    /// 发出取消，剩余分组保持原文。
    pub async fn translate_page(
        &mut self,
        dom: &RcDom,
        lang: &str,
    ) -> TranslationResult<PageReport> {
        self.retarget(lang);

        self.state = PipelineState::Scanning;
        let units = self.scanner.scan(dom);

        if units.is_empty() {
            debug!("页面没有可翻译单元");
            self.state = PipelineState::Translated(lang.to_string());
            self.persist_language(Some(lang))?;
            return Ok(PageReport::default());
        }

        self.state = PipelineState::Translating {
            done: 0,
            total: units.len(),
        };

        let token = self.cancel_token.clone();
        let texts: Vec<String> = units.iter().map(|unit| unit.text.clone()).collect();

        let hits_before = self.translator.cache().stats().hits;
        let translations = {
            let translator = &self.translator;
            let state = &mut self.state;
            translator
                .translate_batch_optimized_with_progress(&texts, &token, |done, total| {
                    *state = PipelineState::Translating { done, total };
                })
                .await
        };
        let from_cache = (self.translator.cache().stats().hits - hits_before) as usize;

        // 被取消的信号对不可复用，换新的供下一个周期使用
        if token.is_cancelled() {
            let (cancel, cancel_token) = cancel_pair();
            self.cancel = cancel;
            self.cancel_token = cancel_token;
        }

        let translated = self.transformer.apply_all(&units, &translations, lang);
        self.transformer.insert_restore_notice(dom, lang);

        self.persist_language(Some(lang))?;
        self.state = PipelineState::Translated(lang.to_string());

        let report = PageReport {
            scanned: units.len(),
            translated,
            from_cache,
            failed: units.len() - translated,
        };

        info!(
            "页面翻译完成: 语言={} 扫描={} 翻译={} 缓存命中={} 保持原文={}",
            lang, report.scanned, report.translated, report.from_cache, report.failed
        );

        Ok(report)
    }

    /// 若存在持久化的活动语言则重放翻译
    pub async fn resume_if_persisted(
        &mut self,
        dom: &RcDom,
    ) -> TranslationResult<Option<PageReport>> {
        let Some(lang) = self.persisted_language() else {
            return Ok(None);
        };

        info!("检测到持久化语言 {}，重放翻译", lang);
        let report = self.translate_page(dom, &lang).await?;
        Ok(Some(report))
    }

    /// 切换页面语言
    ///
    /// 原生语言只做还原；AI 语言先还原再走完整翻译管道，
    /// 使切换前的译文不会被当作原文二次翻译。
    pub async fn switch_language(
        &mut self,
        dom: &RcDom,
        lang: &str,
    ) -> TranslationResult<SwitchOutcome> {
        if self.state.is_busy() {
            debug!("管道忙，忽略语言切换: {}", lang);
            return Ok(SwitchOutcome::Busy);
        }

        if self.translator.config().is_native_language(lang) {
            self.restore(dom)?;
            info!("切换到原生语言: {}", lang);
            return Ok(SwitchOutcome::Native(normalize_lang(lang)));
        }

        self.restore(dom)?;
        let report = self.translate_page(dom, lang).await?;

        Ok(SwitchOutcome::Translated {
            lang: lang.to_string(),
            report,
        })
    }

    /// 还原页面并清除持久化语言；返回还原的元素数
    ///
    /// 先对当前信号对发出取消，使在途翻译的剩余分组保持原文，
    /// 再换用新的信号对供下一个周期使用。
    pub fn restore(&mut self, dom: &RcDom) -> TranslationResult<usize> {
        self.cancel.cancel();
        let (cancel, cancel_token) = cancel_pair();
        self.cancel = cancel;
        self.cancel_token = cancel_token;

        let restored = self.transformer.restore_all(dom);
        self.persist_language(None)?;
        self.state = PipelineState::Idle;

        Ok(restored)
    }

    fn persist_language(&self, lang: Option<&str>) -> TranslationResult<()> {
        self.translator.cache().set_active_language(lang)
    }

    fn retarget(&mut self, lang: &str) {
        if self.translator.config().target_lang != lang {
            self.translator.set_target_lang(lang);
        }
    }
}
