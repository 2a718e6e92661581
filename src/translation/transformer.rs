//! 页面变换器
//!
//! 把翻译结果写回 DOM，并支持完整还原。应用译文时只替换承载文本的
//! 文本节点，元素的其余子结构原样保留；原文持久化在元素自身的
//! `data-original-text` 属性上，节点即权威副本，还原不依赖任何
//! 进程内状态。

use std::rc::Rc;

use markup5ever_rcdom::{Handle, RcDom};
use tracing::{debug, info, warn};

use crate::html::{
    create_element_with_attrs, find_nodes_by_name, find_text_node, get_node_attr,
    set_node_attr, set_text_node_contents,
};
use crate::translation::config::constants;
use crate::translation::provider::Translation;
use crate::translation::scanner::TranslatableText;

/// 管道状态机
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// 空闲，页面为原始状态
    Idle,
    /// 正在扫描页面
    Scanning,
    /// 正在翻译
    Translating {
        /// 已完成单元数
        done: usize,
        /// 总单元数
        total: usize,
    },
    /// 翻译完成，页面处于某个 AI 语言
    Translated(String),
}

impl PipelineState {
    /// 是否处于不可打断的工作阶段
    pub fn is_busy(&self) -> bool {
        matches!(self, PipelineState::Scanning | PipelineState::Translating { .. })
    }

    /// 当前生效的 AI 语言
    pub fn active_language(&self) -> Option<&str> {
        match self {
            PipelineState::Translated(lang) => Some(lang),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "空闲"),
            PipelineState::Scanning => write!(f, "扫描中"),
            PipelineState::Translating { done, total } => {
                write!(f, "翻译中 {}/{}", done, total)
            }
            PipelineState::Translated(lang) => write!(f, "已翻译({})", lang),
        }
    }
}

/// 页面变换器
#[derive(Debug, Default)]
pub struct PageTransformer;

impl PageTransformer {
    pub fn new() -> Self {
        Self
    }

    /// 将一条译文应用到单元；返回是否实际发生了替换
    ///
    /// 译文为空或与原文相同的单元不做标记，后续周期仍可重试。
    /// 原文属性只在首次变换时写入，重复应用不会覆盖权威副本。
    pub fn apply(&self, unit: &TranslatableText, translated: &str, lang: &str) -> bool {
        let translated = translated.trim();
        if translated.is_empty() || translated == unit.text {
            return false;
        }

        if get_node_attr(&unit.element, constants::ORIGINAL_TEXT_ATTR).is_none() {
            set_node_attr(
                &unit.element,
                constants::ORIGINAL_TEXT_ATTR,
                Some(unit.text.clone()),
            );
        }

        set_text_node_contents(&unit.text_node, translated);
        set_node_attr(
            &unit.element,
            constants::TRANSLATED_ATTR,
            Some(lang.to_string()),
        );

        true
    }

    /// 批量应用译文；单元与译文按序一一对应，返回实际替换的数量
    pub fn apply_all(
        &self,
        units: &[TranslatableText],
        translations: &[Translation],
        lang: &str,
    ) -> usize {
        if units.len() != translations.len() {
            warn!(
                "单元数与译文数不一致: {} != {}",
                units.len(),
                translations.len()
            );
        }

        let applied = units
            .iter()
            .zip(translations)
            .filter(|(unit, translation)| self.apply(unit, &translation.translated_text, lang))
            .count();

        info!("应用译文: {}/{} 个单元", applied, units.len());
        applied
    }

    /// 还原整个文档到原文状态；幂等，返回还原的元素数
    ///
    /// 依据元素上的原文属性定位并回写，同时清除翻译标记与还原提示控件。
    /// 在未翻译的文档上调用是无害的空操作。
    pub fn restore_all(&self, dom: &RcDom) -> usize {
        let marked = collect_elements_with_attr(&dom.document, constants::ORIGINAL_TEXT_ATTR);
        let mut restored = 0;

        for element in marked {
            let Some(original) = get_node_attr(&element, constants::ORIGINAL_TEXT_ATTR) else {
                continue;
            };

            match find_text_node(&element) {
                Some(text_node) => {
                    set_text_node_contents(&text_node, &original);
                    restored += 1;
                }
                None => {
                    // 文本节点已被外部移除，仅清理标记
                    debug!("还原时未找到文本节点，跳过回写");
                }
            }

            set_node_attr(&element, constants::ORIGINAL_TEXT_ATTR, None);
            set_node_attr(&element, constants::TRANSLATED_ATTR, None);
        }

        let removed = self.remove_restore_notice(dom);
        if restored > 0 || removed > 0 {
            info!("页面已还原: {} 个元素, {} 个提示控件", restored, removed);
        }

        restored
    }

    /// 在 `<body>` 末尾插入还原提示控件
    pub fn insert_restore_notice(&self, dom: &RcDom, lang: &str) {
        // 已存在时不重复插入
        if !collect_elements_with_attr(&dom.document, constants::RESTORE_NOTICE_ATTR).is_empty() {
            return;
        }

        let Some(body) = find_nodes_by_name(&dom.document, "body").into_iter().next() else {
            debug!("文档没有 body，跳过提示控件");
            return;
        };

        let notice = create_element_with_attrs(
            dom,
            "div",
            vec![(constants::RESTORE_NOTICE_ATTR, lang)],
        );
        crate::html::append_text_node(&notice, &format!("页面已翻译为 {}，点击还原原文", lang));

        notice.parent.set(Some(Rc::downgrade(&body)));
        body.children.borrow_mut().push(notice);
    }

    /// 移除所有还原提示控件；控件不存在或已被外部摘除时安静跳过
    pub fn remove_restore_notice(&self, dom: &RcDom) -> usize {
        let notices = collect_elements_with_attr(&dom.document, constants::RESTORE_NOTICE_ATTR);
        let mut removed = 0;

        for notice in notices {
            let Some(weak_parent) = notice.parent.take() else {
                continue;
            };
            let Some(parent) = weak_parent.upgrade() else {
                continue;
            };

            let mut children = parent.children.borrow_mut();
            let before = children.len();
            children.retain(|child| !Rc::ptr_eq(child, &notice));
            removed += before - children.len();
        }

        removed
    }
}

/// 收集带指定属性的全部元素，文档顺序
fn collect_elements_with_attr(node: &Handle, attr_name: &str) -> Vec<Handle> {
    let mut found = Vec::new();

    if get_node_attr(node, attr_name).is_some() {
        found.push(node.clone());
    }

    for child in node.children.borrow().iter() {
        found.append(&mut collect_elements_with_attr(child, attr_name));
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::{html_to_dom, serialize_document, text_node_contents};
    use crate::translation::scanner::PageScanner;

    fn scan(dom: &RcDom) -> Vec<TranslatableText> {
        PageScanner::new().scan(dom)
    }

    #[test]
    fn test_apply_replaces_only_text_node() {
        let dom = html_to_dom(
            b"<html><body><button><span>icon</span>Save</button></body></html>",
            "utf-8",
        );
        let units = scan(&dom);
        let transformer = PageTransformer::new();

        assert!(transformer.apply(&units[0], "\u{4fdd}\u{5b58}", "zh"));

        let html = String::from_utf8(serialize_document(&dom, "utf-8")).unwrap();
        assert!(html.contains("保存"));
        // 兄弟子结构原样保留
        assert!(html.contains("<span>icon</span>"));
        assert!(html.contains("data-original-text=\"Save\""));
        assert!(html.contains("data-ai-translated=\"zh\""));
    }

    #[test]
    fn test_apply_skips_identical_and_empty() {
        let dom = html_to_dom(b"<html><body><h1>Hello</h1></body></html>", "utf-8");
        let units = scan(&dom);
        let transformer = PageTransformer::new();

        assert!(!transformer.apply(&units[0], "Hello", "zh"));
        assert!(!transformer.apply(&units[0], "   ", "zh"));
        // 未发生替换时不打标记
        assert!(get_node_attr(&units[0].element, constants::TRANSLATED_ATTR).is_none());
    }

    #[test]
    fn test_restore_roundtrip_is_idempotent() {
        let dom = html_to_dom(
            b"<html><body><h1>Hello</h1><li>World</li></body></html>",
            "utf-8",
        );
        let units = scan(&dom);
        let transformer = PageTransformer::new();

        transformer.apply(&units[0], "你好", "zh");
        transformer.apply(&units[1], "世界", "zh");

        assert_eq!(transformer.restore_all(&dom), 2);

        let h1 = crate::html::find_nodes_by_name(&dom.document, "h1").pop().unwrap();
        let text = find_text_node(&h1).unwrap();
        assert_eq!(text_node_contents(&text).unwrap(), "Hello");
        assert!(get_node_attr(&h1, constants::ORIGINAL_TEXT_ATTR).is_none());

        // 第二次还原是无害的空操作
        assert_eq!(transformer.restore_all(&dom), 0);
    }

    #[test]
    fn test_second_apply_keeps_first_original() {
        let dom = html_to_dom(b"<html><body><h1>Hello</h1></body></html>", "utf-8");
        let transformer = PageTransformer::new();

        let units = scan(&dom);
        transformer.apply(&units[0], "你好", "zh");

        // 在已翻译的文本上再次应用（如切换语言），原文属性保持首次副本
        let retranslate = TranslatableText {
            text: "你好".to_string(),
            ..units[0].clone()
        };
        transformer.apply(&retranslate, "こんにちは", "ja");

        assert_eq!(
            get_node_attr(&units[0].element, constants::ORIGINAL_TEXT_ATTR).as_deref(),
            Some("Hello")
        );

        transformer.restore_all(&dom);
        let text = find_text_node(&units[0].element).unwrap();
        assert_eq!(text_node_contents(&text).unwrap(), "Hello");
    }

    #[test]
    fn test_restore_notice_insert_and_remove() {
        let dom = html_to_dom(b"<html><body><h1>Hello</h1></body></html>", "utf-8");
        let transformer = PageTransformer::new();

        transformer.insert_restore_notice(&dom, "zh");
        // 重复插入只保留一个
        transformer.insert_restore_notice(&dom, "zh");

        let notices =
            collect_elements_with_attr(&dom.document, constants::RESTORE_NOTICE_ATTR);
        assert_eq!(notices.len(), 1);

        assert_eq!(transformer.remove_restore_notice(&dom), 1);
        // 控件不存在时移除是安静的空操作
        assert_eq!(transformer.remove_restore_notice(&dom), 0);
    }

    #[test]
    fn test_pipeline_state_helpers() {
        assert!(!PipelineState::Idle.is_busy());
        assert!(PipelineState::Scanning.is_busy());
        assert!(PipelineState::Translating { done: 1, total: 5 }.is_busy());

        let state = PipelineState::Translated("zh".to_string());
        assert!(!state.is_busy());
        assert_eq!(state.active_language(), Some("zh"));
    }
}
