//! DOM 基础操作
//!
//! 在 `markup5ever_rcdom` 之上提供节点访问工具，以及记录每一次写入的
//! [`LiveDocument`]。所有对页面的修改都经由它进行，写入产生的变更记录
//! 通过 [`LiveDocument::take_records`] 取出，相当于浏览器中的变更观察器。

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::{Rc, Weak};

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, QualName};
use html5ever::parse_document;
use html5ever::tendril::{format_tendril, StrTendril, TendrilSink};
use html5ever::tree_builder::{
    create_element, ElementFlags, NextParserState, NodeOrText, QuirksMode, TreeSink,
};
use html5ever::{namespace_url, ns, ExpandedName, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

use super::selector::ElementMatcher;

/// 节点的稳定标识（指针地址），只用作旁路表的键
pub type NodeKey = usize;

/// 获取节点标识
pub fn node_key(node: &Handle) -> NodeKey {
    Rc::as_ptr(node) as usize
}

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> io::Result<RcDom> {
    let s = match Encoding::for_label(document_encoding.as_bytes()) {
        Some(encoding) => encoding.decode(data).0.into_owned(),
        None => String::from_utf8_lossy(data).into_owned(),
    };

    parse_document(TemplateKeepingSink(RcDom::default()), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
}

/// 包装 `RcDom`，拒绝附加声明式影子根
///
/// `RcDom` 不实现影子根，解析器会把 `<template shadowrootmode>` 丢掉并把
/// 其内容放进宿主的普通子节点。拒绝后模板按普通元素插入，内容留在
/// `template_contents` 中，时间元素的影子根由此取得。
struct TemplateKeepingSink(RcDom);

impl TreeSink for TemplateKeepingSink {
    type Handle = Handle;
    type Output = RcDom;
    type ElemName<'a> = ExpandedName<'a> where Self: 'a;

    fn finish(self) -> RcDom {
        self.0
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        self.0.parse_error(msg)
    }

    fn get_document(&self) -> Handle {
        self.0.get_document()
    }

    fn elem_name<'a>(&'a self, target: &'a Handle) -> ExpandedName<'a> {
        self.0.elem_name(target)
    }

    fn create_element(&self, name: QualName, attrs: Vec<Attribute>, flags: ElementFlags) -> Handle {
        self.0.create_element(name, attrs, flags)
    }

    fn create_comment(&self, text: StrTendril) -> Handle {
        self.0.create_comment(text)
    }

    fn create_pi(&self, target: StrTendril, data: StrTendril) -> Handle {
        self.0.create_pi(target, data)
    }

    fn append(&self, parent: &Handle, child: NodeOrText<Handle>) {
        self.0.append(parent, child)
    }

    fn append_based_on_parent_node(
        &self,
        element: &Handle,
        prev_element: &Handle,
        child: NodeOrText<Handle>,
    ) {
        self.0.append_based_on_parent_node(element, prev_element, child)
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        self.0.append_doctype_to_document(name, public_id, system_id)
    }

    fn mark_script_already_started(&self, node: &Handle) {
        self.0.mark_script_already_started(node)
    }

    fn get_template_contents(&self, target: &Handle) -> Handle {
        self.0.get_template_contents(target)
    }

    fn same_node(&self, x: &Handle, y: &Handle) -> bool {
        self.0.same_node(x, y)
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        self.0.set_quirks_mode(mode)
    }

    fn append_before_sibling(&self, sibling: &Handle, new_node: NodeOrText<Handle>) {
        self.0.append_before_sibling(sibling, new_node)
    }

    fn add_attrs_if_missing(&self, target: &Handle, attrs: Vec<Attribute>) {
        self.0.add_attrs_if_missing(target, attrs)
    }

    fn remove_from_parent(&self, target: &Handle) {
        self.0.remove_from_parent(target)
    }

    fn reparent_children(&self, node: &Handle, new_parent: &Handle) {
        self.0.reparent_children(node, new_parent)
    }

    fn is_mathml_annotation_xml_integration_point(&self, handle: &Handle) -> bool {
        self.0.is_mathml_annotation_xml_integration_point(handle)
    }

    fn complete_script(&self, node: &Handle) -> NextParserState {
        self.0.complete_script(node)
    }

    fn allow_declarative_shadow_roots(&self, _intended_parent: &Handle) -> bool {
        false
    }
}

/// 查找指定路径的DOM节点
pub fn find_nodes(node: &Handle, node_names: &[&str]) -> Vec<Handle> {
    let Some((&first, rest)) = node_names.split_first() else {
        return Vec::new();
    };

    let mut found_nodes = Vec::new();
    let is_match = get_node_name(node) == Some(first);

    if is_match && rest.is_empty() {
        found_nodes.push(node.clone());
    }

    for child_node in node.children.borrow().iter() {
        if is_match && !rest.is_empty() {
            found_nodes.append(&mut find_nodes(child_node, rest));
        } else if !is_match || rest.is_empty() {
            found_nodes.append(&mut find_nodes(child_node, node_names));
        }
    }

    found_nodes
}

/// 根据名称获取子节点
pub fn get_child_node_by_name(parent: &Handle, node_name: &str) -> Option<Handle> {
    parent
        .children
        .borrow()
        .iter()
        .find(|child| get_node_name(child) == Some(node_name))
        .cloned()
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

/// 节点是否带有指定属性
pub fn has_node_attr(node: &Handle, attr_name: &str) -> bool {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            attrs.borrow().iter().any(|attr| &*attr.name.local == attr_name)
        }
        _ => false,
    }
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 获取父节点
///
/// `parent` 是 `Cell<Option<Weak>>`，读取时先取出再放回。
pub fn get_parent_node(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    child.parent.set(weak);
    parent
}

/// 获取父元素（父节点不是元素时返回 `None`）
pub fn parent_element(node: &Handle) -> Option<Handle> {
    get_parent_node(node).filter(is_element)
}

pub fn is_element(node: &Handle) -> bool {
    matches!(node.data, NodeData::Element { .. })
}

pub fn is_text(node: &Handle) -> bool {
    matches!(node.data, NodeData::Text { .. })
}

/// 读取文本节点内容
pub fn text_of(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

/// 元素的全部后代文本（等同 textContent，不进入模板内容）
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        if let NodeData::Text { contents } = &current.data {
            out.push_str(&contents.borrow());
        }
        for child in current.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
    }
    out
}

/// 从自身开始向上的元素链
pub fn element_ancestors_inclusive(node: &Handle) -> impl Iterator<Item = Handle> {
    let start = if is_element(node) {
        Some(node.clone())
    } else {
        parent_element(node)
    };
    std::iter::successors(start, parent_element)
}

/// 最近的匹配祖先（含自身）
pub fn closest(node: &Handle, matcher: &dyn ElementMatcher) -> Option<Handle> {
    element_ancestors_inclusive(node).find(|el| matcher.matches(el))
}

/// 深度优先、文档顺序的后代元素（不含根本身）
pub fn descendant_elements(root: &Handle) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut stack: Vec<Handle> = root.children.borrow().iter().rev().cloned().collect();
    while let Some(node) = stack.pop() {
        if is_element(&node) {
            for child in node.children.borrow().iter().rev() {
                stack.push(child.clone());
            }
            out.push(node);
        }
    }
    out
}

/// 文档顺序的后代文本节点
pub fn descendant_text_nodes(root: &Handle) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut stack: Vec<Handle> = root.children.borrow().iter().rev().cloned().collect();
    while let Some(node) = stack.pop() {
        match node.data {
            NodeData::Text { .. } => out.push(node),
            NodeData::Element { .. } | NodeData::Document => {
                for child in node.children.borrow().iter().rev() {
                    stack.push(child.clone());
                }
            }
            _ => {}
        }
    }
    out
}

/// 第一个匹配的后代元素（querySelector 语义）
pub fn query_descendant(root: &Handle, matcher: &dyn ElementMatcher) -> Option<Handle> {
    descendant_elements(root)
        .into_iter()
        .find(|el| matcher.matches(el))
}

/// 模板元素的内容片段
pub fn template_contents(node: &Handle) -> Option<Handle> {
    match &node.data {
        NodeData::Element {
            template_contents, ..
        } => template_contents.borrow().clone(),
        _ => None,
    }
}

/// 节点所在树的根
pub fn tree_root(node: &Handle) -> Handle {
    std::iter::successors(Some(node.clone()), get_parent_node)
        .last()
        .unwrap_or_else(|| node.clone())
}

/// 设置节点属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let attrs_mut = &mut attrs.borrow_mut();
        let position = attrs_mut
            .iter()
            .position(|attr| &*attr.name.local == attr_name);

        match (position, attr_value) {
            (Some(i), Some(value)) => {
                attrs_mut[i].value.clear();
                attrs_mut[i].value.push_slice(&value);
            }
            (Some(i), None) => {
                attrs_mut.remove(i);
            }
            (None, Some(value)) => {
                attrs_mut.push(Attribute {
                    name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                    value: format_tendril!("{}", value),
                });
            }
            (None, None) => {}
        }
    };
}

/// 以节点为键的旁路表
///
/// 同时保存 `Weak`：只要条目存在，节点的内存就不会被复用，
/// 因此键不会冲突；节点释放后条目在读取时视为不存在。不延长节点生命周期。
pub struct NodeMap<V> {
    entries: HashMap<NodeKey, (Weak<Node>, V)>,
}

impl<V> Default for NodeMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> NodeMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: &Handle) -> Option<&V> {
        self.entries
            .get(&node_key(node))
            .filter(|(weak, _)| weak.strong_count() > 0)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, node: &Handle) -> bool {
        self.get(node).is_some()
    }

    pub fn insert(&mut self, node: &Handle, value: V) -> Option<V> {
        self.entries
            .insert(node_key(node), (Rc::downgrade(node), value))
            .map(|(_, old)| old)
    }

    pub fn remove(&mut self, node: &Handle) -> Option<V> {
        self.entries.remove(&node_key(node)).map(|(_, value)| value)
    }

    /// 丢弃已释放节点的条目
    pub fn prune(&mut self) {
        self.entries.retain(|_, (weak, _)| weak.strong_count() > 0);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 仍存活的节点与值
    pub fn iter_live(&self) -> impl Iterator<Item = (Handle, &V)> {
        self.entries
            .values()
            .filter_map(|(weak, value)| weak.upgrade().map(|node| (node, value)))
    }
}

/// 一条变更记录
#[derive(Debug, Clone)]
pub enum MutationRecord {
    ChildList {
        target: Handle,
        added: Vec<Handle>,
        /// 被移除的节点只弱引用，日志不延长其生命周期
        removed: Vec<Weak<Node>>,
    },
    Attributes {
        target: Handle,
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        target: Handle,
        old_value: String,
    },
}

impl MutationRecord {
    pub fn target(&self) -> &Handle {
        match self {
            MutationRecord::ChildList { target, .. }
            | MutationRecord::Attributes { target, .. }
            | MutationRecord::CharacterData { target, .. } => target,
        }
    }
}

/// 可观察的活动文档
pub struct LiveDocument {
    dom: RcDom,
    journal: RefCell<Vec<MutationRecord>>,
}

impl LiveDocument {
    /// 解析 HTML 文本
    pub fn parse(html: &str) -> io::Result<Self> {
        Self::from_bytes(html.as_bytes(), "utf-8")
    }

    /// 按指定编码解析 HTML 字节
    pub fn from_bytes(data: &[u8], document_encoding: &str) -> io::Result<Self> {
        Ok(Self {
            dom: html_to_dom(data, document_encoding)?,
            journal: RefCell::new(Vec::new()),
        })
    }

    pub fn dom(&self) -> &RcDom {
        &self.dom
    }

    pub fn document(&self) -> &Handle {
        &self.dom.document
    }

    /// `<body>` 元素
    pub fn body(&self) -> Option<Handle> {
        find_nodes(&self.dom.document, &["html", "body"]).into_iter().next()
    }

    /// 节点是否仍挂在本文档上
    pub fn is_connected(&self, node: &Handle) -> bool {
        Rc::ptr_eq(&tree_root(node), &self.dom.document)
    }

    /// 写入文本节点
    pub fn set_text(&self, node: &Handle, value: &str) {
        if let NodeData::Text { contents } = &node.data {
            let old_value = {
                let mut contents = contents.borrow_mut();
                let old = contents.to_string();
                *contents = StrTendril::from(value);
                old
            };
            self.journal.borrow_mut().push(MutationRecord::CharacterData {
                target: node.clone(),
                old_value,
            });
        }
    }

    /// 写入或删除属性
    pub fn set_attr(&self, element: &Handle, name: &str, value: Option<&str>) {
        if !is_element(element) {
            return;
        }
        let old_value = get_node_attr(element, name);
        set_node_attr(element, name, value.map(str::to_string));
        self.journal.borrow_mut().push(MutationRecord::Attributes {
            target: element.clone(),
            name: name.to_string(),
            old_value,
        });
    }

    /// 追加子节点
    pub fn append_child(&self, parent: &Handle, child: Handle) {
        if let Some(previous) = get_parent_node(&child) {
            previous
                .children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(c, &child));
        }
        child.parent.set(Some(Rc::downgrade(parent)));
        parent.children.borrow_mut().push(child.clone());
        self.journal.borrow_mut().push(MutationRecord::ChildList {
            target: parent.clone(),
            added: vec![child],
            removed: Vec::new(),
        });
    }

    /// 移除子节点
    pub fn remove_child(&self, parent: &Handle, child: &Handle) {
        let before = parent.children.borrow().len();
        parent.children.borrow_mut().retain(|c| !Rc::ptr_eq(c, child));
        if parent.children.borrow().len() == before {
            return;
        }
        child.parent.set(None);
        self.journal.borrow_mut().push(MutationRecord::ChildList {
            target: parent.clone(),
            added: Vec::new(),
            removed: vec![Rc::downgrade(child)],
        });
    }

    /// 创建元素
    pub fn create_element(&self, tag: &str, attrs: &[(&str, &str)]) -> Handle {
        let attrs = attrs
            .iter()
            .map(|(name, value)| Attribute {
                name: QualName::new(None, ns!(), LocalName::from(*name)),
                value: format_tendril!("{}", value),
            })
            .collect();
        create_element(
            &self.dom,
            QualName::new(None, ns!(html), LocalName::from(tag)),
            attrs,
        )
    }

    /// 创建文本节点
    pub fn create_text(&self, value: &str) -> Handle {
        Node::new(NodeData::Text {
            contents: RefCell::new(StrTendril::from(value)),
        })
    }

    /// 取出并清空待投递的变更记录
    pub fn take_records(&self) -> Vec<MutationRecord> {
        std::mem::take(&mut *self.journal.borrow_mut())
    }

    pub fn pending_records(&self) -> usize {
        self.journal.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> LiveDocument {
        LiveDocument::parse(
            "<html><body><nav id='n'><a href='/a'>Home</a></nav><p>text</p></body></html>",
        )
        .unwrap()
    }

    #[test]
    fn test_parent_access_is_non_destructive() {
        let doc = doc();
        let body = doc.body().unwrap();
        let nav = body.children.borrow()[0].clone();
        assert!(get_parent_node(&nav).is_some());
        // 第二次读取仍然可用
        assert!(get_parent_node(&nav).is_some());
        assert!(doc.is_connected(&nav));
    }

    #[test]
    fn test_writes_are_journaled() {
        let doc = doc();
        let body = doc.body().unwrap();
        let texts = descendant_text_nodes(&body);
        assert_eq!(texts.len(), 2);

        doc.set_text(&texts[0], "Главная");
        let nav = body.children.borrow()[0].clone();
        doc.set_attr(&nav, "title", Some("x"));

        let records = doc.take_records();
        assert_eq!(records.len(), 2);
        match &records[0] {
            MutationRecord::CharacterData { old_value, .. } => assert_eq!(old_value, "Home"),
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(doc.pending_records(), 0);
        assert_eq!(text_of(&texts[0]).unwrap(), "Главная");
        assert_eq!(get_node_attr(&nav, "title").as_deref(), Some("x"));
    }

    #[test]
    fn test_detached_nodes_are_not_connected() {
        let doc = doc();
        let body = doc.body().unwrap();
        let p = body.children.borrow()[1].clone();
        doc.remove_child(&body, &p);
        assert!(!doc.is_connected(&p));

        let span = doc.create_element("span", &[("class", "x")]);
        doc.append_child(&body, span.clone());
        assert!(doc.is_connected(&span));
        assert_eq!(doc.take_records().len(), 2);
    }

    #[test]
    fn test_node_map_does_not_keep_nodes_alive() {
        let doc = doc();
        let body = doc.body().unwrap();
        let p = body.children.borrow()[1].clone();
        let mut map = NodeMap::new();
        map.insert(&p, 7);
        assert_eq!(map.get(&p), Some(&7));
        assert_eq!(map.iter_live().count(), 1);

        // 记录仍留在日志中，但只弱引用被移除的节点
        doc.remove_child(&body, &p);
        assert_eq!(doc.pending_records(), 1);
        drop(p);
        assert_eq!(map.iter_live().count(), 0);
        map.prune();
        assert!(map.is_empty());

        match &doc.take_records()[0] {
            MutationRecord::ChildList { removed, .. } => {
                assert_eq!(removed.len(), 1);
                assert!(removed[0].upgrade().is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_declarative_shadow_template_is_kept() {
        let doc = LiveDocument::parse(
            "<html><body><relative-time><template shadowrootmode='open'>5 days ago</template></relative-time></body></html>",
        )
        .unwrap();
        let body = doc.body().unwrap();
        let host = body.children.borrow()[0].clone();
        let template = host.children.borrow()[0].clone();
        assert_eq!(get_node_name(&template), Some("template"));
        assert_eq!(get_node_attr(&template, "shadowrootmode").as_deref(), Some("open"));

        // 内容在模板片段中，不在宿主的普通子节点里
        let contents = template_contents(&template).unwrap();
        assert_eq!(text_content(&contents), "5 days ago");
        assert_eq!(text_content(&host), "");
    }

    #[test]
    fn test_text_content_and_set_attr_removal() {
        let doc = doc();
        let body = doc.body().unwrap();
        assert_eq!(text_content(&body), "Hometext");
        let nav = body.children.borrow()[0].clone();
        set_node_attr(&nav, "id", None);
        assert!(!has_node_attr(&nav, "id"));
    }
}
