//! HTML DOM 工具模块
//!
//! 提供文档解析、序列化以及节点属性与文本节点的读写工具，
//! 供扫描器与页面变换器共用。

use std::cell::RefCell;

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, QualName};
use html5ever::parse_document;
use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::create_element;
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> RcDom {
    let s: String;

    if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
        let (string, _, _) = encoding.decode(data);
        s = string.to_string();
    } else {
        s = String::from_utf8_lossy(data).to_string();
    }

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .unwrap_or_default()
}

/// 序列化文档为字节
pub fn serialize_document(dom: &RcDom, document_encoding: &str) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();

    let serializable: SerializableHandle = dom.document.clone().into();
    if serialize(&mut buf, &serializable, SerializeOpts::default()).is_err() {
        return buf;
    }

    if !document_encoding.is_empty() {
        if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
            let s: &str = &String::from_utf8_lossy(&buf);
            let (data, _, _) = encoding.encode(s);
            buf = data.to_vec();
        }
    }

    buf
}

/// 查找指定标签的所有节点
pub fn find_nodes_by_name(node: &Handle, node_name: &str) -> Vec<Handle> {
    let mut found_nodes = Vec::new();

    if let NodeData::Element { ref name, .. } = node.data {
        if &*name.local == node_name {
            found_nodes.push(node.clone());
        }
    }

    for child_node in node.children.borrow().iter() {
        found_nodes.append(&mut find_nodes_by_name(child_node, node_name));
    }

    found_nodes
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            for attr in attrs.borrow().iter() {
                if &*attr.name.local == attr_name {
                    return Some(attr.value.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 设置节点属性；`attr_value` 为 `None` 时删除该属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    use html5ever::tendril::format_tendril;

    if let NodeData::Element { attrs, .. } = &node.data {
        let attrs_mut = &mut attrs.borrow_mut();
        let mut i = 0;
        let mut found_existing_attr: bool = false;

        while i < attrs_mut.len() {
            if &attrs_mut[i].name.local == attr_name {
                found_existing_attr = true;

                if let Some(attr_value) = attr_value.clone() {
                    let _ = &attrs_mut[i].value.clear();
                    let _ = &attrs_mut[i].value.push_slice(attr_value.as_str());
                } else {
                    attrs_mut.remove(i);
                    continue;
                }
            }

            i += 1;
        }

        if !found_existing_attr {
            if let Some(attr_value) = attr_value {
                let name = LocalName::from(attr_name);

                attrs_mut.push(Attribute {
                    name: QualName::new(None, ns!(), name),
                    value: format_tendril!("{}", attr_value),
                });
            }
        }
    };
}

/// 查找元素承载文本的节点：优先直接文本子节点，其次深度优先的后代文本节点
///
/// 扫描与还原共用同一条查找路径，保证独立的扫描/应用周期落在同一个文本节点上。
pub fn find_text_node(element: &Handle) -> Option<Handle> {
    // 直接文本子节点优先
    for child in element.children.borrow().iter() {
        if let NodeData::Text { ref contents } = child.data {
            if !contents.borrow().trim().is_empty() {
                return Some(child.clone());
            }
        }
    }

    // 无直接文本时回退到子树中的首个文本节点
    for child in element.children.borrow().iter() {
        if let Some(found) = find_text_node(child) {
            return Some(found);
        }
    }

    None
}

/// 读取文本节点内容
pub fn text_node_contents(text_node: &Handle) -> Option<String> {
    if let NodeData::Text { ref contents } = text_node.data {
        Some(contents.borrow().to_string())
    } else {
        None
    }
}

/// 覆写文本节点内容
pub fn set_text_node_contents(text_node: &Handle, value: &str) {
    if let NodeData::Text { ref contents } = text_node.data {
        let mut tendril = contents.borrow_mut();
        tendril.clear();
        tendril.push_slice(value);
    }
}

/// 在元素下追加一个文本节点
pub fn append_text_node(element: &Handle, value: &str) -> Handle {
    let text_node = Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(value)),
    });
    element.children.borrow_mut().push(text_node.clone());
    text_node
}

/// 创建带属性的元素节点
pub fn create_element_with_attrs(
    dom: &RcDom,
    tag_name: &str,
    attrs: Vec<(&str, &str)>,
) -> Handle {
    use html5ever::tendril::format_tendril;

    let attributes = attrs
        .into_iter()
        .map(|(name, value)| Attribute {
            name: QualName::new(None, ns!(), LocalName::from(name)),
            value: format_tendril!("{}", value),
        })
        .collect();

    create_element(
        dom,
        QualName::new(None, ns!(), LocalName::from(tag_name)),
        attributes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_attr_roundtrip() {
        let dom = html_to_dom(b"<html><body><p title=\"hi\">text</p></body></html>", "utf-8");
        let p = find_nodes_by_name(&dom.document, "p").pop().unwrap();

        assert_eq!(get_node_attr(&p, "title"), Some("hi".to_string()));

        set_node_attr(&p, "title", Some("bye".to_string()));
        assert_eq!(get_node_attr(&p, "title"), Some("bye".to_string()));

        set_node_attr(&p, "title", None);
        assert_eq!(get_node_attr(&p, "title"), None);
    }

    #[test]
    fn test_find_text_node_prefers_direct_text() {
        let dom = html_to_dom(
            b"<html><body><button><span>icon</span>Save</button></body></html>",
            "utf-8",
        );
        let button = find_nodes_by_name(&dom.document, "button").pop().unwrap();

        let text_node = find_text_node(&button).unwrap();
        assert_eq!(text_node_contents(&text_node).unwrap().trim(), "Save");
    }

    #[test]
    fn test_find_text_node_falls_back_to_subtree() {
        let dom = html_to_dom(
            b"<html><body><button><span>Only nested</span></button></body></html>",
            "utf-8",
        );
        let button = find_nodes_by_name(&dom.document, "button").pop().unwrap();

        let text_node = find_text_node(&button).unwrap();
        assert_eq!(text_node_contents(&text_node).unwrap().trim(), "Only nested");
    }

    #[test]
    fn test_set_text_node_contents() {
        let dom = html_to_dom(b"<html><body><h1>Hello</h1></body></html>", "utf-8");
        let h1 = find_nodes_by_name(&dom.document, "h1").pop().unwrap();
        let text_node = find_text_node(&h1).unwrap();

        set_text_node_contents(&text_node, "你好");
        assert_eq!(text_node_contents(&text_node).unwrap(), "你好");
    }
}
