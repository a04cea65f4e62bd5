//! 单元分类
//!
//! 判断一个文本或属性单元能否被翻译、能否被收集为未翻译条目：
//! 黑名单区域、严格界面区域、仓库卡片中的用户内容、仓库标识文本、
//! 界面外可安全翻译的短标签，以及收集前的全部噪声规则。
//!
//! 元素级判断结果按节点记忆，页面地址或设置变化时清空。

use std::cell::RefCell;
use std::sync::OnceLock;

use markup5ever_rcdom::Handle;
use regex::Regex;

use crate::cached_regex;
use crate::parsers::html::dom::{
    closest, descendant_elements, get_node_attr, has_node_attr, query_descendant, text_content,
    NodeMap,
};
use crate::parsers::html::{ElementMatcher, SelectorList};
use crate::translation::config::constants;
use crate::translation::config::{OverlayConfig, Settings};
use crate::utils::{has_cyrillic, has_latin, is_match};

use super::context::{looks_like_owner_repo_path, parse_repo_slug, text_matches_repo_slug, PageContext};
use super::filters::{text_noise_reason, LengthBounds, NoiseReason};
use super::normalizer::norm;

/// 分类使用的阈值
#[derive(Debug, Clone, Copy)]
pub struct ClassifierLimits {
    pub bounds: LengthBounds,
    pub safe_label_max_len: usize,
    pub card_text_min_len: usize,
    pub card_spaceless_min_len: usize,
}

impl Default for ClassifierLimits {
    fn default() -> Self {
        Self {
            bounds: LengthBounds::default(),
            safe_label_max_len: constants::SAFE_LABEL_MAX_LEN,
            card_text_min_len: constants::CARD_TEXT_MIN_LEN,
            card_spaceless_min_len: constants::CARD_SPACELESS_MIN_LEN,
        }
    }
}

impl From<&OverlayConfig> for ClassifierLimits {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            bounds: LengthBounds {
                min: config.collect_min_len,
                max: config.collect_max_len,
            },
            safe_label_max_len: config.safe_label_max_len,
            card_text_min_len: config.card_text_min_len,
            card_spaceless_min_len: config.card_spaceless_min_len,
        }
    }
}

/// 固定的选择器集合
struct Selectors {
    deny: SelectorList,
    content_card: SelectorList,
    card_exempt: SelectorList,
    interactive: SelectorList,
    card_neutral: SelectorList,
    select_menu: SelectorList,
    menu_role: SelectorList,
    search_input: SelectorList,
    sidebar: SelectorList,
    hovercard: SelectorList,
    avatar: SelectorList,
    link: SelectorList,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        let list = |sources: &[&str]| SelectorList::from_many(sources.iter().copied());
        Selectors {
            deny: list(constants::DO_NOT_TRANSLATE_SELECTORS),
            content_card: list(constants::CONTENT_CARD_SELECTORS),
            card_exempt: list(constants::CARD_EXEMPT_SELECTORS),
            interactive: list(constants::INTERACTIVE_SELECTORS),
            card_neutral: list(constants::CARD_NEUTRAL_SELECTORS),
            select_menu: list(constants::SELECT_MENU_SELECTORS),
            menu_role: list(constants::MENU_ROLE_SELECTORS),
            search_input: list(constants::SEARCH_INPUT_SELECTORS),
            sidebar: list(constants::SIDEBAR_SELECTORS),
            hovercard: list(constants::HOVERCARD_SELECTORS),
            avatar: list(constants::AVATAR_SELECTORS),
            link: list(&["a[href]"]),
        }
    })
}

fn route_patterns() -> &'static [(Regex, &'static [&'static str])] {
    static ROUTES: OnceLock<Vec<(Regex, &'static [&'static str])>> = OnceLock::new();
    ROUTES.get_or_init(|| {
        constants::STRICT_UI_ROUTE_SELECTORS
            .iter()
            .filter_map(|(pattern, sources)| match Regex::new(pattern) {
                Ok(re) => Some((re, *sources)),
                Err(e) => {
                    tracing::error!("路由正则编译失败 {}: {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// 当前路径下生效的严格界面选择器：基础选择器加上匹配路径的路由组
pub fn active_ui_selectors(path: &str) -> SelectorList {
    let mut sources: Vec<&str> = constants::STRICT_UI_BASE_SELECTORS.to_vec();
    for (re, group) in route_patterns() {
        if re.is_match(path) {
            for &source in group.iter() {
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }
    }
    SelectorList::from_many(sources)
}

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub ui_context: bool,
    pub translatable: bool,
    pub collectable: bool,
    pub reason: Option<NoiseReason>,
}

impl Classification {
    fn excluded(reason: NoiseReason) -> Self {
        Self {
            ui_context: false,
            translatable: false,
            collectable: false,
            reason: Some(reason),
        }
    }
}

/// 页面侧分类器
pub struct Classifier {
    settings: Settings,
    limits: ClassifierLimits,
    context: PageContext,
    ui_selectors: SelectorList,
    blacklisted: RefCell<NodeMap<bool>>,
    allowed_ui: RefCell<NodeMap<bool>>,
    user_card: RefCell<NodeMap<bool>>,
}

fn memoized(cache: &RefCell<NodeMap<bool>>, el: &Handle, compute: impl FnOnce() -> bool) -> bool {
    let cached = cache.borrow().get(el).copied();
    if let Some(value) = cached {
        return value;
    }
    let value = compute();
    cache.borrow_mut().insert(el, value);
    value
}

impl Classifier {
    pub fn new(settings: Settings, limits: ClassifierLimits, context: PageContext) -> Self {
        let ui_selectors = active_ui_selectors(context.path());
        Self {
            settings,
            limits,
            context,
            ui_selectors,
            blacklisted: RefCell::new(NodeMap::new()),
            allowed_ui: RefCell::new(NodeMap::new()),
            user_card: RefCell::new(NodeMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn context(&self) -> &PageContext {
        &self.context
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.clear_caches();
    }

    /// 页面地址变化
    pub fn set_context(&mut self, context: PageContext) {
        if context.path() != self.context.path() {
            self.ui_selectors = active_ui_selectors(context.path());
        }
        self.context = context;
        self.clear_caches();
    }

    /// 清空所有按节点记忆的判断
    pub fn clear_caches(&self) {
        self.blacklisted.borrow_mut().clear();
        self.allowed_ui.borrow_mut().clear();
        self.user_card.borrow_mut().clear();
    }

    // ========================================================================
    // 区域判断
    // ========================================================================

    /// 位于不可翻译区域（代码、Markdown、评论、标题、输入框等）
    pub fn is_blacklisted(&self, el: &Handle) -> bool {
        memoized(&self.blacklisted, el, || {
            closest(el, &selectors().deny).is_some()
        })
    }

    /// 位于严格界面区域；关闭严格模式时总是成立
    pub fn is_allowed_ui(&self, el: &Handle) -> bool {
        if !self.settings.strict_ui_only_mode {
            return true;
        }
        memoized(&self.allowed_ui, el, || {
            closest(el, &self.ui_selectors).is_some()
        })
    }

    /// 是否有后代位于严格界面区域
    pub fn has_allowed_descendant(&self, root: &Handle) -> bool {
        query_descendant(root, &self.ui_selectors).is_some()
    }

    /// 子树是否值得处理：自身或后代在界面区域内，或者开启了收集
    pub fn is_in_scope(&self, root: &Handle) -> bool {
        !self.settings.strict_ui_only_mode
            || self.is_allowed_ui(root)
            || self.has_allowed_descendant(root)
            || self.settings.collect_untranslated
    }

    /// 仓库卡片中的用户内容（描述、动态正文）
    pub fn is_user_card(&self, el: &Handle) -> bool {
        memoized(&self.user_card, el, || self.compute_user_card(el))
    }

    fn compute_user_card(&self, el: &Handle) -> bool {
        let sel = selectors();
        let Some(container) = closest(el, &sel.content_card) else {
            return false;
        };
        if closest(&container, &sel.card_exempt).is_some() {
            return false;
        }
        if !has_owner_repo_link(&container) {
            return false;
        }
        if closest(el, &sel.interactive).is_some() || closest(el, &sel.card_neutral).is_some() {
            return false;
        }

        let txt = norm(&text_content(el));
        let len = txt.chars().count();
        if len < self.limits.card_text_min_len {
            return false;
        }
        if len < self.limits.card_spaceless_min_len && !txt.contains(char::is_whitespace) {
            return false;
        }
        has_latin(&txt)
    }

    /// 文本就是当前仓库或所在链接指向仓库的名称
    pub fn is_identity_text(&self, raw: &str, el: &Handle) -> bool {
        if norm(raw).is_empty() {
            return false;
        }
        if let Some(current) = self.context.current_repo() {
            if text_matches_repo_slug(raw, &current) {
                return true;
            }
        }
        closest(el, &selectors().link)
            .and_then(|a| get_node_attr(&a, "href"))
            .and_then(|href| parse_repo_slug(&href))
            .is_some_and(|linked| text_matches_repo_slug(raw, &linked))
    }

    /// 界面区域之外也允许翻译的情形
    pub fn can_translate_outside_ui(&self, base: &str, el: &Handle) -> bool {
        let key = base.to_lowercase();
        if key.is_empty() {
            return false;
        }
        let safe = constants::SAFE_NON_UI_TRANSLATION_KEYS.contains(&key.as_str())
            || is_match(
                cached_regex!(r"^\d+\s+(stars|forks|watching|branch|branches|tag|tags|commit|commits)$"),
                &key,
            );

        let sel = selectors();
        if closest(el, &sel.select_menu).is_some() || closest(el, &sel.menu_role).is_some() {
            return true;
        }
        if safe && sel.search_input.matches(el) {
            return true;
        }
        if safe && closest(el, &sel.sidebar).is_some() {
            return true;
        }
        safe && key.chars().count() <= self.limits.safe_label_max_len
    }

    // ========================================================================
    // 收集判断
    // ========================================================================

    /// 规范化后的短语能否作为未翻译条目收集
    ///
    /// `enforce_ui_scope` 为真时，严格模式下界面区域外的元素被拒绝。
    pub fn should_collect(
        &self,
        key: &str,
        el: Option<&Handle>,
        enforce_ui_scope: bool,
    ) -> Result<(), NoiseReason> {
        if key.is_empty() {
            return Err(NoiseReason::EmptyKey);
        }
        if self.settings.collector_relaxed_mode {
            if has_cyrillic(key) {
                return Err(NoiseReason::AlreadyRussian);
            }
            return Ok(());
        }
        if enforce_ui_scope
            && self.settings.strict_ui_only_mode
            && !el.is_some_and(|el| self.is_allowed_ui(el))
        {
            return Err(NoiseReason::OutsideUiScope);
        }
        if let Some(el) = el {
            if self.is_blacklisted(el) {
                return Err(NoiseReason::BlacklistedElement);
            }
            if self.is_user_card(el) {
                return Err(NoiseReason::UserContentContext);
            }
        }
        if let Some(reason) = text_noise_reason(key, self.limits.bounds) {
            return Err(reason);
        }
        match el {
            Some(el) => element_noise_reason(el).map_or(Ok(()), Err),
            None => Ok(()),
        }
    }

    /// 综合分类
    pub fn classify(&self, el: &Handle, base: &str) -> Classification {
        if self.is_blacklisted(el) {
            return Classification::excluded(NoiseReason::BlacklistedElement);
        }
        if self.is_user_card(el) {
            return Classification::excluded(NoiseReason::UserContentContext);
        }
        let ui_context = self.is_allowed_ui(el);
        let translatable = ui_context || self.can_translate_outside_ui(base, el);
        let verdict = self.should_collect(&norm(base), Some(el), false);
        Classification {
            ui_context,
            translatable,
            collectable: verdict.is_ok(),
            reason: verdict.err(),
        }
    }
}

/// 用户卡片、头像链接与仓库链接
fn element_noise_reason(el: &Handle) -> Option<NoiseReason> {
    let sel = selectors();
    if closest(el, &sel.hovercard).is_some() {
        return Some(NoiseReason::HovercardContext);
    }
    let anchor = closest(el, &sel.link)?;
    if has_node_attr(&anchor, "data-hovercard-type") || has_node_attr(&anchor, "data-hovercard-url") {
        return Some(NoiseReason::HovercardAnchor);
    }
    let href = get_node_attr(&anchor, "href").unwrap_or_default();
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let slug_part = |s: &str| is_match(cached_regex!(r"^[A-Za-z0-9_.-]+$"), s);
    if parts.len() == 2 && parts.iter().all(|p| slug_part(p)) {
        return Some(NoiseReason::OwnerRepoLink);
    }
    if query_descendant(&anchor, &sel.avatar).is_some() {
        return Some(NoiseReason::AvatarAnchor);
    }
    None
}

/// 容器内是否有文本形如 owner/repo 的仓库链接
fn has_owner_repo_link(container: &Handle) -> bool {
    let link = &selectors().link;
    descendant_elements(container)
        .into_iter()
        .filter(|a| link.matches(a))
        .any(|a| {
            let href = get_node_attr(&a, "href").unwrap_or_default();
            if !looks_like_owner_repo_path(&href) {
                return false;
            }
            let text = text_content(&a);
            let label = if text.is_empty() {
                get_node_attr(&a, "aria-label").unwrap_or_default()
            } else {
                text
            };
            is_match(
                cached_regex!(r"\b[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+\b"),
                &norm(&label),
            )
        })
}
