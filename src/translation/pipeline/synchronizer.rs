//! 页面同步器
//!
//! 负责把翻译写入活动文档并能完整撤销：
//!
//! - 文本节点：写入前在旁路表中记录原文和"已处理"标记
//! - 属性：原值保存在 `data-ghru-orig-<属性>` 标记属性中
//! - 时间元素：设置 `lang="ru"` 并翻译其影子根中的文本
//!
//! 自身写入产生的变更记录会被识别并忽略，因此对已翻译的子树再次处理不会产生任何写入。

use std::collections::HashSet;
use std::rc::{Rc, Weak};

use markup5ever_rcdom::{Handle, Node};
use tokio::time::Instant;

use crate::parsers::html::dom::{
    descendant_elements, descendant_text_nodes, element_ancestors_inclusive,
    get_child_node_by_name, get_node_attr, get_node_name, has_node_attr, is_element, is_text,
    node_key, parent_element, template_contents, text_of, tree_root, LiveDocument,
    MutationRecord, NodeMap,
};
use crate::translation::config::constants::{
    BUTTON_INPUT_TYPES, ORIGINAL_MARKER_PREFIX, TIME_ELEMENT_TAGS, TRANSLATABLE_ATTRS,
};
use crate::translation::config::Settings;
use crate::utils::{has_cyrillic, has_latin};

use super::classifier::{Classifier, ClassifierLimits};
use super::context::{PageContext, Section};
use super::dynamic_rules::relative_time_fallback;
use super::filters::NoiseReason;
use super::normalizer::{extract_base, is_likely_technical_text, norm, normalize_collector_key, strip_trailing_punctuation};
use super::resolver::Resolver;
use super::telemetry::{TelemetryAggregator, TelemetryTimers};

/// 文本单元的状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct UnitState {
    original: Option<String>,
    done: bool,
}

/// 属性原值标记名
pub fn marker_name(attr: &str) -> String {
    format!("{}{}", ORIGINAL_MARKER_PREFIX, attr)
}

fn is_time_element(el: &Handle) -> bool {
    get_node_name(el).is_some_and(|name| TIME_ELEMENT_TAGS.contains(&name))
}

/// `value` 只在按钮类控件上翻译
fn value_is_label(el: &Handle) -> bool {
    match get_node_name(el) {
        Some("input") => {
            let kind = get_node_attr(el, "type").unwrap_or_default().to_lowercase();
            BUTTON_INPUT_TYPES.contains(&kind.as_str())
        }
        Some("button") => true,
        _ => false,
    }
}

/// 时间元素的影子根（声明式影子 DOM 的模板内容）
pub fn shadow_root(host: &Handle) -> Option<Handle> {
    get_child_node_by_name(host, "template").and_then(|template| template_contents(&template))
}

/// 页面同步器
pub struct Synchronizer {
    classifier: Classifier,
    resolver: Resolver,
    telemetry: TelemetryAggregator,
    units: NodeMap<UnitState>,
    time_roots: NodeMap<Weak<Node>>,
}

impl Synchronizer {
    pub fn new(
        settings: Settings,
        resolver: Resolver,
        limits: ClassifierLimits,
        timers: TelemetryTimers,
        context: PageContext,
    ) -> Self {
        Self {
            classifier: Classifier::new(settings, limits, context),
            resolver,
            telemetry: TelemetryAggregator::new(timers),
            units: NodeMap::new(),
            time_roots: NodeMap::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.classifier.settings()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn telemetry(&self) -> &TelemetryAggregator {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut TelemetryAggregator {
        &mut self.telemetry
    }

    fn section(&self) -> Section {
        self.classifier.context().section()
    }

    /// 换用新设置与新翻译表
    pub fn reconfigure(&mut self, settings: Settings, resolver: Resolver) {
        self.classifier.set_settings(settings);
        self.resolver = resolver;
    }

    pub fn set_context(&mut self, context: PageContext) {
        self.classifier.set_context(context);
    }

    pub fn clear_caches(&mut self) {
        self.classifier.clear_caches();
        self.units.prune();
        self.time_roots.prune();
    }

    /// 文本节点是否已处理
    pub fn is_done(&self, node: &Handle) -> bool {
        self.units.get(node).is_some_and(|state| state.done)
    }

    // ========================================================================
    // 单元处理
    // ========================================================================

    /// 对一个单元给出要写入的译文，同时记录覆盖率与未翻译条目
    fn resolve_unit(&mut self, raw: &str, el: &Handle) -> Option<String> {
        let section = self.section();
        let ui = self.classifier.is_allowed_ui(el);
        let out = self.resolver.translate_keeping_punctuation(raw, section);
        let base = extract_base(raw);

        match out {
            Some(out) if ui || self.classifier.can_translate_outside_ui(&base, el) => {
                self.track_coverage(&base, el, true);
                Some(out)
            }
            Some(_) => {
                self.track_coverage(&base, el, true);
                None
            }
            None => {
                if !base.is_empty() && self.resolver.lookup(&base, section).is_none() {
                    self.track_coverage(&base, el, false);
                    self.maybe_collect(&base, el, ui);
                }
                None
            }
        }
    }

    fn track_coverage(&mut self, raw_base: &str, el: &Handle, translated: bool) {
        let base = norm(raw_base);
        if base.is_empty() || !has_latin(&base) || has_cyrillic(&base) {
            return;
        }
        if self.classifier.should_collect(&base, Some(el), false).is_err() {
            return;
        }
        let section = self.section();
        self.telemetry
            .record_coverage(section, base, translated, Instant::now());
    }

    fn maybe_collect(&mut self, raw_base: &str, el: &Handle, enforce_ui_scope: bool) {
        let settings = self.classifier.settings();
        if !settings.enabled || !settings.collect_untranslated {
            return;
        }
        let debug = settings.debug_collector;
        let raw = norm(raw_base);
        if let Err(reason) = self.classifier.should_collect(&raw, Some(el), enforce_ui_scope) {
            if debug {
                self.reject(reason, &raw);
            }
            return;
        }
        let key = normalize_collector_key(&raw);
        if key.is_empty() || is_likely_technical_text(&key) {
            return;
        }
        if self.telemetry.record_untranslated(key.clone(), Instant::now()) {
            tracing::trace!("新的未翻译条目: {}", key);
        }
    }

    fn reject(&mut self, reason: NoiseReason, key: &str) {
        self.telemetry.record_rejection(reason, key, Instant::now());
    }

    /// 翻译单个文本节点
    pub fn translate_text_node(&mut self, doc: &LiveDocument, node: &Handle) {
        let Some(parent) = parent_element(node) else {
            return;
        };
        if self.classifier.is_blacklisted(&parent) || self.classifier.is_user_card(&parent) {
            return;
        }
        let Some(current) = text_of(node) else {
            return;
        };
        if current.trim().is_empty() || self.is_done(node) {
            return;
        }
        if self.classifier.is_identity_text(&current, &parent) {
            self.units.insert(
                node,
                UnitState {
                    original: None,
                    done: true,
                },
            );
            return;
        }

        if let Some(out) = self.resolve_unit(&current, &parent) {
            self.units.insert(
                node,
                UnitState {
                    original: Some(current),
                    done: true,
                },
            );
            doc.set_text(node, &out);
        }
    }

    /// 翻译元素的可翻译属性
    pub fn translate_element_attributes(&mut self, doc: &LiveDocument, el: &Handle) {
        if !self.settings().translate_attributes {
            return;
        }
        if self.classifier.is_blacklisted(el) || self.classifier.is_user_card(el) {
            return;
        }

        for &attr in TRANSLATABLE_ATTRS {
            let Some(raw) = get_node_attr(el, attr) else {
                continue;
            };
            if attr == "value" && !value_is_label(el) {
                continue;
            }
            let marker = marker_name(attr);
            if has_node_attr(el, &marker) {
                continue;
            }
            if self.classifier.is_identity_text(&raw, el) {
                continue;
            }
            if let Some(out) = self.resolve_unit(&raw, el) {
                doc.set_attr(el, &marker, Some(&raw));
                doc.set_attr(el, attr, Some(&norm(&out)));
            }
        }
    }

    /// 遍历过滤：决定文本节点是否交给 [`Self::translate_text_node`]
    fn accept_text(&self, node: &Handle) -> bool {
        let Some(parent) = parent_element(node) else {
            return false;
        };
        let Some(txt) = text_of(node) else {
            return false;
        };
        if txt.trim().is_empty() {
            return false;
        }
        let collect = self.settings().collect_untranslated;
        let core = strip_trailing_punctuation(&norm(&txt));
        let class = self.classifier.classify(&parent, &core);
        if matches!(
            class.reason,
            Some(NoiseReason::BlacklistedElement | NoiseReason::UserContentContext)
        ) {
            return false;
        }
        if !class.ui_context && !collect {
            return false;
        }
        if self.classifier.is_identity_text(&txt, &parent) || is_likely_technical_text(&txt) {
            return false;
        }
        if !class.translatable && !collect {
            return false;
        }
        if self.resolver.lookup(&core, self.section()).is_none() {
            return collect && class.collectable;
        }
        class.translatable
    }

    /// 翻译整个子树
    pub fn translate_subtree(&mut self, doc: &LiveDocument, root: &Handle) {
        if !is_element(root) {
            return;
        }
        self.localize_time_elements(doc, root);
        if self.classifier.is_blacklisted(root) || !self.classifier.is_in_scope(root) {
            return;
        }

        let collect = self.settings().collect_untranslated;
        if self.settings().translate_attributes {
            let elements = std::iter::once(root.clone()).chain(descendant_elements(root));
            for el in elements {
                if !self.classifier.is_blacklisted(&el)
                    && (collect || self.classifier.is_allowed_ui(&el))
                {
                    self.translate_element_attributes(doc, &el);
                }
            }
        }

        for node in descendant_text_nodes(root) {
            if self.accept_text(&node) {
                self.translate_text_node(doc, &node);
            }
        }
    }

    /// 恢复所有文本与属性原值
    pub fn revert_all(&mut self, doc: &LiveDocument) {
        let mut restored = 0usize;
        if let Some(body) = doc.body() {
            for node in descendant_text_nodes(&body) {
                if let Some(UnitState {
                    original: Some(original),
                    ..
                }) = self.units.remove(&node)
                {
                    doc.set_text(&node, &original);
                    restored += 1;
                }
            }
        }

        for el in descendant_elements(doc.document()) {
            for &attr in TRANSLATABLE_ATTRS {
                let marker = marker_name(attr);
                let Some(original) = get_node_attr(&el, &marker) else {
                    continue;
                };
                doc.set_attr(&el, attr, Some(&original));
                doc.set_attr(&el, &marker, None);
                restored += 1;
            }
        }

        self.units.clear();
        tracing::debug!("已恢复 {} 处原文", restored);
    }

    // ========================================================================
    // 时间元素
    // ========================================================================

    /// 处理子树中的时间元素
    pub fn localize_time_elements(&mut self, doc: &LiveDocument, root: &Handle) {
        let hosts: Vec<Handle> = std::iter::once(root.clone())
            .chain(descendant_elements(root))
            .filter(is_time_element)
            .collect();

        for host in hosts {
            if get_node_attr(&host, "lang").as_deref() != Some("ru") {
                doc.set_attr(&host, "lang", Some("ru"));
            }
            self.localize_shadow_text(doc, &host);
            if let Some(shadow) = shadow_root(&host) {
                if !self.time_roots.contains(&shadow) {
                    self.time_roots.insert(&shadow, Rc::downgrade(&host));
                }
            }
        }
    }

    fn localize_shadow_text(&mut self, doc: &LiveDocument, host: &Handle) {
        let Some(shadow) = shadow_root(host) else {
            return;
        };
        let section = self.section();
        for node in descendant_text_nodes(&shadow) {
            let Some(current) = text_of(&node) else {
                continue;
            };
            if current.trim().is_empty() {
                continue;
            }
            let translated = self
                .resolver
                .translate_keeping_punctuation(&current, section)
                .or_else(|| relative_time_fallback(&current));
            if let Some(translated) = translated.filter(|t| *t != current) {
                doc.set_text(&node, &translated);
            }
        }
    }

    // ========================================================================
    // 变更处理
    // ========================================================================

    /// 新增节点是否需要排队；返回要排队的元素
    pub fn should_queue(&self, node: &Handle) -> Option<Handle> {
        if !self.settings().enabled {
            return None;
        }
        let el = if is_element(node) {
            node.clone()
        } else {
            parent_element(node)?
        };
        if self.classifier.is_blacklisted(&el) || !self.classifier.is_in_scope(&el) {
            return None;
        }
        Some(el)
    }

    /// 处理一批变更记录，返回需要延迟翻译的元素
    pub fn apply_mutations(&mut self, doc: &LiveDocument, records: Vec<MutationRecord>) -> Vec<Handle> {
        if !self.settings().enabled {
            return Vec::new();
        }
        let body = doc.body();
        let mut queued = Vec::new();
        let mut hosts: Vec<Handle> = Vec::new();
        let mut seen_hosts = HashSet::new();

        for record in records {
            let target = record.target().clone();
            let root = tree_root(&target);
            if let Some(host) = self.time_roots.get(&root).and_then(Weak::upgrade) {
                if seen_hosts.insert(node_key(&host)) {
                    hosts.push(host);
                }
                continue;
            }
            let in_body = body.as_ref().is_some_and(|body| {
                element_ancestors_inclusive(&target).any(|el| Rc::ptr_eq(&el, body))
            });
            if !in_body {
                continue;
            }

            match record {
                MutationRecord::ChildList { added, .. } => {
                    for node in added {
                        if is_element(&node) {
                            queued.extend(self.should_queue(&node));
                        } else if is_text(&node) {
                            self.translate_text_node(doc, &node);
                        }
                    }
                }
                MutationRecord::Attributes { target, name, .. } => {
                    if TRANSLATABLE_ATTRS.contains(&name.as_str()) {
                        self.translate_element_attributes(doc, &target);
                    }
                }
                MutationRecord::CharacterData { target, old_value } => {
                    let own_write = self.units.get(&target).is_some_and(|state| {
                        state.done && state.original.as_deref() == Some(old_value.as_str())
                    });
                    if own_write {
                        continue;
                    }
                    self.units.remove(&target);
                    self.translate_text_node(doc, &target);
                }
            }
        }

        for host in hosts {
            self.localize_shadow_text(doc, &host);
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::pipeline::table::TranslationTable;
    use crate::translation::storage::Dictionary;

    fn sync_with(pairs: &[(&str, &str)], settings: Settings, path: &str) -> Synchronizer {
        let dict: Dictionary = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let resolver = Resolver::new(TranslationTable::build(&dict, &Dictionary::new(), None));
        Synchronizer::new(
            settings,
            resolver,
            ClassifierLimits::default(),
            TelemetryTimers::default(),
            PageContext::new(path),
        )
    }

    fn body_of(doc: &LiveDocument) -> Handle {
        doc.body().unwrap()
    }

    #[test]
    fn test_text_translation_and_revert() {
        let doc = LiveDocument::parse(
            "<html><body><header><a href='/login'>  Sign in:\n</a></header></body></html>",
        )
        .unwrap();
        let mut sync = sync_with(&[("Sign in", "Войти")], Settings::default(), "/");
        let body = body_of(&doc);

        sync.translate_subtree(&doc, &body);
        let text = descendant_text_nodes(&body)[0].clone();
        assert_eq!(text_of(&text).as_deref(), Some("  Войти:\n"));
        assert!(sync.is_done(&text));

        sync.revert_all(&doc);
        assert_eq!(text_of(&text).as_deref(), Some("  Sign in:\n"));
        assert!(!sync.is_done(&text));
    }

    #[test]
    fn test_second_pass_writes_nothing() {
        let doc = LiveDocument::parse(
            "<html><body><nav><button aria-label='Close'>Issues</button>\
             <relative-time><template shadowrootmode='open'>3 days ago</template></relative-time>\
             </nav></body></html>",
        )
        .unwrap();
        let mut sync = sync_with(&[("Issues", "Задачи"), ("Close", "Закрыть")], Settings::default(), "/");
        let body = body_of(&doc);

        sync.translate_subtree(&doc, &body);
        assert!(!doc.take_records().is_empty());

        sync.translate_subtree(&doc, &body);
        assert_eq!(doc.pending_records(), 0);
    }

    #[test]
    fn test_attribute_marker_and_restore() {
        let doc = LiveDocument::parse(
            "<html><body><form><input id='s' type='submit' value='Save'>\
             <input id='t' type='text' value='Save'></form></body></html>",
        )
        .unwrap();
        let mut sync = sync_with(&[("Save", "Сохранить")], Settings::default(), "/settings");
        let body = body_of(&doc);
        sync.translate_subtree(&doc, &body);

        let inputs = descendant_elements(&body);
        let submit = inputs.iter().find(|e| get_node_attr(e, "id").as_deref() == Some("s")).unwrap();
        let text = inputs.iter().find(|e| get_node_attr(e, "id").as_deref() == Some("t")).unwrap();
        assert_eq!(get_node_attr(submit, "value").as_deref(), Some("Сохранить"));
        assert_eq!(get_node_attr(submit, "data-ghru-orig-value").as_deref(), Some("Save"));
        assert_eq!(get_node_attr(text, "value").as_deref(), Some("Save"));

        sync.revert_all(&doc);
        assert_eq!(get_node_attr(submit, "value").as_deref(), Some("Save"));
        assert!(!has_node_attr(submit, "data-ghru-orig-value"));
    }

    #[test]
    fn test_blacklisted_and_identity_text_untouched() {
        let doc = LiveDocument::parse(
            "<html><body><nav><code>Issues</code><a href='/o/r'>r</a><span>Issues</span></nav></body></html>",
        )
        .unwrap();
        let mut sync = sync_with(&[("Issues", "Задачи"), ("r", "р")], Settings::default(), "/o/r");
        let body = body_of(&doc);
        sync.translate_subtree(&doc, &body);

        let texts: Vec<String> = descendant_text_nodes(&body)
            .iter()
            .filter_map(text_of)
            .collect();
        assert_eq!(texts, vec!["Issues", "r", "Задачи"]);
    }

    #[test]
    fn test_mutations_retranslate_host_changes() {
        let doc = LiveDocument::parse("<html><body><nav><span>Issues</span></nav></body></html>").unwrap();
        let mut sync = sync_with(&[("Issues", "Задачи"), ("Pulls", "Запросы")], Settings::default(), "/");
        let body = body_of(&doc);
        sync.translate_subtree(&doc, &body);

        // 自身写入被忽略
        let own = doc.take_records();
        assert!(sync.apply_mutations(&doc, own).is_empty());
        assert_eq!(doc.pending_records(), 0);

        // 宿主改写文本后重新翻译
        let text = descendant_text_nodes(&body)[0].clone();
        doc.set_text(&text, "Pulls");
        let records = doc.take_records();
        sync.apply_mutations(&doc, records);
        assert_eq!(text_of(&text).as_deref(), Some("Запросы"));

        // 新增元素进入队列
        let nav = descendant_elements(&body)[0].clone();
        let span = doc.create_element("span", &[]);
        doc.append_child(&nav, span.clone());
        let queued = sync.apply_mutations(&doc, doc.take_records());
        assert_eq!(queued.len(), 1);
        assert!(Rc::ptr_eq(&queued[0], &span));
    }

    #[test]
    fn test_time_element_localized() {
        let doc = LiveDocument::parse(
            "<html><body><relative-time datetime='2024-01-01'><template shadowrootmode='open'>5 days ago</template></relative-time></body></html>",
        )
        .unwrap();
        let mut sync = sync_with(&[], Settings::default(), "/");
        let body = body_of(&doc);
        sync.translate_subtree(&doc, &body);

        let host = descendant_elements(&body)[0].clone();
        assert_eq!(get_node_attr(&host, "lang").as_deref(), Some("ru"));
        let shadow = shadow_root(&host).unwrap();
        let text = descendant_text_nodes(&shadow)[0].clone();
        assert_eq!(text_of(&text).as_deref(), Some("5 дней назад"));

        // 影子根内的后续改写触发重新本地化
        doc.take_records();
        doc.set_text(&text, "2 hours ago");
        sync.apply_mutations(&doc, doc.take_records());
        assert_eq!(text_of(&text).as_deref(), Some("2 часа назад"));
    }

    #[test]
    fn test_untranslated_ui_text_is_collected() {
        let doc = LiveDocument::parse(
            "<html><body><nav><a href='/new'>Sign in</a><a href='/x'>bob@example.com</a></nav></body></html>",
        )
        .unwrap();
        let mut sync = sync_with(&[], Settings::default(), "/");
        let body = body_of(&doc);
        sync.translate_subtree(&doc, &body);
        assert_eq!(sync.telemetry().pending_untranslated(), ["Sign in".to_string()]);
    }
}
