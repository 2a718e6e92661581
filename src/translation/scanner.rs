//! 页面扫描器
//!
//! 按固定的结构性选择器收集页面中可翻译的文本单元。
//! 同一文档上的扫描是确定性的：遍历顺序、序号分配与过滤规则
//! 都不依赖任何外部状态，两次扫描产出完全一致的单元列表。

use std::collections::{HashMap, HashSet};

use markup5ever_rcdom::{Handle, RcDom};
use tracing::debug;

use crate::html::{find_text_node, get_node_attr, get_node_name, text_node_contents};
use crate::translation::config::constants;

/// 扫描得到的可翻译文本单元
#[derive(Debug, Clone)]
pub struct TranslatableText {
    /// 命中的选择器（标签名或 `[data-translate]`）
    pub selector: String,
    /// 该选择器下的出现序号，从 0 起
    pub index: usize,
    /// 去除首尾空白后的原文
    pub text: String,
    /// 承载单元的元素节点
    pub element: Handle,
    /// 实际持有文本的文本节点
    pub text_node: Handle,
}

impl TranslatableText {
    /// 去重键：选择器 + 序号 + 文本前缀
    pub fn dedup_key(&self) -> String {
        let prefix: String = self.text.chars().take(constants::DEDUP_PREFIX_CHARS).collect();
        format!("{}#{}#{}", self.selector, self.index, prefix)
    }
}

/// 页面扫描器
#[derive(Debug, Default)]
pub struct PageScanner;

impl PageScanner {
    pub fn new() -> Self {
        Self
    }

    /// 扫描文档，返回按文档顺序排列的可翻译单元
    pub fn scan(&self, dom: &RcDom) -> Vec<TranslatableText> {
        let mut units = Vec::new();
        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut claimed_nodes: Vec<Handle> = Vec::new();

        self.walk(
            &dom.document,
            &mut counters,
            &mut seen_keys,
            &mut claimed_nodes,
            &mut units,
        );

        debug!("扫描完成: {} 个可翻译单元", units.len());
        units
    }

    fn walk(
        &self,
        node: &Handle,
        counters: &mut HashMap<&'static str, usize>,
        seen_keys: &mut HashSet<String>,
        claimed_nodes: &mut Vec<Handle>,
        units: &mut Vec<TranslatableText>,
    ) {
        if let Some(name) = get_node_name(node) {
            // 整棵子树排除的元素
            if constants::SKIP_ELEMENTS.contains(&name)
                || constants::FORM_CONTROL_ELEMENTS.contains(&name)
            {
                return;
            }

            let selector = constants::SELECTOR_TAGS
                .iter()
                .find(|tag| **tag == name)
                .copied()
                .or_else(|| {
                    get_node_attr(node, constants::OPT_IN_ATTR)
                        .is_some()
                        .then_some("[data-translate]")
                });

            if let Some(selector) = selector {
                // 序号对每个命中的元素都递增，过滤不影响编号，保证两次扫描一致
                let counter = counters.entry(selector).or_insert(0);
                let index = *counter;
                *counter += 1;

                self.try_collect(node, selector, index, seen_keys, claimed_nodes, units);
            }
        }

        for child in node.children.borrow().iter() {
            self.walk(child, counters, seen_keys, claimed_nodes, units);
        }
    }

    fn try_collect(
        &self,
        element: &Handle,
        selector: &'static str,
        index: usize,
        seen_keys: &mut HashSet<String>,
        claimed_nodes: &mut Vec<Handle>,
        units: &mut Vec<TranslatableText>,
    ) {
        // 已翻译的元素不再收集
        if get_node_attr(element, constants::TRANSLATED_ATTR).is_some() {
            return;
        }

        let Some(text_node) = find_text_node(element) else {
            return;
        };

        let Some(raw) = text_node_contents(&text_node) else {
            return;
        };
        let text = raw.trim().to_string();

        if !is_translatable(&text) {
            return;
        }

        // 同一文本节点只认领一次，避免嵌套选择器（如 li > a）重复收集
        if claimed_nodes
            .iter()
            .any(|claimed| std::rc::Rc::ptr_eq(claimed, &text_node))
        {
            return;
        }

        let unit = TranslatableText {
            selector: selector.to_string(),
            index,
            text,
            element: element.clone(),
            text_node: text_node.clone(),
        };

        if !seen_keys.insert(unit.dedup_key()) {
            return;
        }

        claimed_nodes.push(text_node);
        units.push(unit);
    }
}

/// 文本内容过滤：过短或符号主导的文本不参与翻译
fn is_translatable(text: &str) -> bool {
    if text.chars().count() < constants::MIN_TEXT_LENGTH {
        return false;
    }

    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return false;
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    letters as f32 / total as f32 >= constants::MIN_LETTER_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::html_to_dom;

    fn scan_html(html: &str) -> Vec<TranslatableText> {
        let dom = html_to_dom(html.as_bytes(), "utf-8");
        PageScanner::new().scan(&dom)
    }

    #[test]
    fn test_scan_collects_selector_tags() {
        let units = scan_html(
            "<html><head><title>My Page</title></head>\
             <body><h1>Welcome</h1><button>Save</button></body></html>",
        );

        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["My Page", "Welcome", "Save"]);
        assert_eq!(units[0].selector, "title");
        assert_eq!(units[1].selector, "h1");
        assert_eq!(units[2].index, 0);
    }

    #[test]
    fn test_scan_is_deterministic() {
        let html = "<html><body><h1>Title</h1><ul><li><a href=\"/\">Home</a></li>\
                    <li>About us</li></ul></body></html>";
        let dom = html_to_dom(html.as_bytes(), "utf-8");
        let scanner = PageScanner::new();

        let first: Vec<String> = scanner.scan(&dom).iter().map(|u| u.dedup_key()).collect();
        let second: Vec<String> = scanner.scan(&dom).iter().map(|u| u.dedup_key()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_nested_li_anchor_claimed_once() {
        let units = scan_html(
            "<html><body><ul><li><a href=\"/\">Home</a></li></ul></body></html>",
        );

        // li 与 a 指向同一个文本节点，只收集一次
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Home");
        assert_eq!(units[0].selector, "li");
    }

    #[test]
    fn test_skip_elements_excluded() {
        let units = scan_html(
            "<html><body><script>var a = \"Hello\";</script>\
             <pre><a href=\"/\">Raw link</a></pre>\
             <h1>Visible</h1></body></html>",
        );

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Visible");
    }

    #[test]
    fn test_form_controls_excluded() {
        let units = scan_html(
            "<html><body><select><option>Pick me</option></select>\
             <label>Name</label></body></html>",
        );

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Name");
    }

    #[test]
    fn test_translated_elements_skipped() {
        let units = scan_html(
            "<html><body><h1 data-ai-translated=\"true\">已翻译</h1>\
             <h2>Fresh</h2></body></html>",
        );

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Fresh");
    }

    #[test]
    fn test_short_and_symbolic_text_skipped() {
        let units = scan_html(
            "<html><body><button>x</button><li>123 - 456</li>\
             <li>&gt;&gt;&gt;</li><h1>Real heading</h1></body></html>",
        );

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Real heading");
    }

    #[test]
    fn test_opt_in_attribute_collected() {
        let units = scan_html(
            "<html><body><p data-translate>Custom paragraph</p></body></html>",
        );

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].selector, "[data-translate]");
        assert_eq!(units[0].text, "Custom paragraph");
    }
}
