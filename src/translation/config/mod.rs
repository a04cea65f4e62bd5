//! 翻译配置管理模块
//!
//! 提供配置管理（配置文件、环境变量、默认值）以及页面侧使用的结构常量表。

pub mod manager;

// 重新导出主要类型
pub use manager::{ConfigManager, OverlayConfig, Settings};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 防抖计时
    pub const MUTATION_DEBOUNCE: Duration = Duration::from_millis(80);
    pub const UNTRANSLATED_FLUSH: Duration = Duration::from_millis(800);
    pub const COVERAGE_FLUSH: Duration = Duration::from_millis(1200);
    pub const DEBUG_FLUSH: Duration = Duration::from_millis(1500);

    // 容量上限
    pub const UNTRANSLATED_CAP: usize = 8000;
    pub const COVERAGE_CAP: usize = 5000;
    pub const DEBUG_SAMPLE_CAP: usize = 20;
    pub const PAGE_DEBUG_SAMPLE_CAP: usize = 10;
    pub const DEBUG_SAMPLE_CHARS: usize = 120;

    // 启发式阈值
    pub const LEGACY_CUSTOMIZED_THRESHOLD: usize = 100;
    pub const COLLECT_MIN_LEN: usize = 2;
    pub const COLLECT_MAX_LEN: usize = 240;
    pub const SAFE_LABEL_MAX_LEN: usize = 40;
    pub const CARD_TEXT_MIN_LEN: usize = 12;
    pub const CARD_SPACELESS_MIN_LEN: usize = 28;
    pub const PRUNE_MAX_LEN: usize = 8000;

    // 自动巡检
    pub const AUDIT_DEFAULT_DWELL_MS: u64 = 3500;
    pub const AUDIT_MIN_DWELL_MS: u64 = 1500;
    pub const AUDIT_MAX_DWELL_MS: u64 = 15000;
    pub const AUDIT_LOAD_TIMEOUT_MS: u64 = 20000;

    // 内置词典
    pub const BUNDLED_DICT_FILE: &str = "bundled-dictionary.json";
    pub const BUNDLED_DICT_META_FILE: &str = "dict-version.json";
    pub const DEFAULT_BUNDLED_VERSION: &str = "legacy";
    pub const DEFAULT_STORE_PATH: &str = "~/.local/share/octoru/store.redb";

    // 原文标记属性前缀
    pub const ORIGINAL_MARKER_PREFIX: &str = "data-ghru-orig-";

    // 可翻译属性
    pub const TRANSLATABLE_ATTRS: &[&str] = &[
        "aria-label",
        "title",
        "placeholder",
        "value",
        "data-confirm",
        "data-confirm-text",
    ];

    // `value` 仅在这些按钮类 input 上翻译
    pub const BUTTON_INPUT_TYPES: &[&str] = &["button", "submit", "reset"];

    // 时间显示元素
    pub const TIME_ELEMENT_TAGS: &[&str] = &["relative-time", "time-ago", "time-until", "local-time"];

    // 始终视为用户内容或代码的容器
    pub const DO_NOT_TRANSLATE_SELECTORS: &[&str] = &[
        "[data-no-translate]",
        "pre",
        "code",
        ".blob-code",
        ".blob-wrapper",
        ".js-diff-progressive-container",
        ".js-file",
        ".diff-table",
        ".markdown-body",
        ".timeline-comment",
        ".TimelineItem-body",
        ".TimelineItem .comment",
        ".js-timeline-item",
        ".js-comment-container",
        ".js-discussion-comment",
        ".discussion-comment",
        ".discussion-timeline-item",
        ".comment-body",
        ".js-comment-body",
        ".js-issue-body",
        ".js-discussion",
        ".react-issue-comment",
        ".react-issue-body",
        ".js-pull-refresh-on-pjax",
        "[data-testid='issue-body']",
        "[data-testid*='comment']",
        "[data-testid*='discussion-post']",
        "[itemprop='description']",
        "[data-testid='repository-description']",
        ".repository-description",
        ".gh-header-title",
        ".js-issue-title",
        ".repository-content .Box .markdown-body",
        "textarea",
        "[contenteditable='true']",
    ];

    // 严格模式下的全局界面区域
    pub const STRICT_UI_BASE_SELECTORS: &[&str] = &[
        "header",
        "nav",
        "footer",
        "form",
        "button",
        "summary",
        "label",
        "legend",
        "h1",
        "h2",
        "h3",
        ".h1",
        ".h2",
        ".h3",
        "[role='heading']",
        "[role='button']",
        "[role='menu']",
        "[role='menuitem']",
        "[role='tab']",
        "[role='tablist']",
        "[role='dialog']",
        "[role='alert']",
        "[role='status']",
        "[role='navigation']",
        ".btn",
        ".Button",
        ".UnderlineNav",
        ".subnav",
        ".paginate-container",
        ".pagination",
        ".blankslate",
        ".blankslate-heading",
        ".flash",
        ".flash-full",
        ".ActionList",
        ".SelectMenu",
        ".HeaderMenu",
        ".AppHeader",
        ".js-header-wrapper",
        "[data-view-component='true'][role='button']",
    ];

    /// 按路径追加的界面区域：(路径正则, 选择器)
    pub const STRICT_UI_ROUTE_SELECTORS: &[(&str, &[&str])] = &[
        (
            r"(?i)^/[^/]+/[^/]+/(issues|pulls)(/|$)",
            &[
                ".gh-header-meta",
                ".gh-header-actions",
                ".gh-header-show",
                ".table-list-header",
                ".blankslate",
                ".blankslate-heading",
                ".js-issues-search",
                ".js-check-all-container",
                ".paginate-container",
            ],
        ),
        (
            r"(?i)^/[^/]+/[^/]+/?$",
            &[
                ".git-clone-help",
                ".git-clone-help .Box-header",
                ".git-clone-help .Box-body",
                ".git-clone-help .Box-title",
                ".git-clone-help .mb-0",
                ".height-full.border.rounded-2.p-4",
                ".height-full.border.rounded-2.p-4 .h4",
                ".height-full.border.rounded-2.p-4 .color-fg-muted",
            ],
        ),
        (
            r"(?i)^/[^/]+/[^/]+/discussions(/|$)",
            &[
                ".gh-header-actions",
                ".subnav",
                ".discussion-sidebar",
                ".js-discussion-header",
            ],
        ),
        (
            r"(?i)^/settings(/|$)",
            &[
                ".settings-content",
                ".settings-main",
                "#user-profile-frame",
                ".menu",
                ".Box-header",
            ],
        ),
        (
            r"(?i)^/notifications(/|$)",
            &[
                ".notifications-list",
                ".notifications-mark-all-form",
                ".notifications-v2",
                ".js-notifications-list",
            ],
        ),
    ];

    // 内容卡片容器
    pub const CONTENT_CARD_SELECTORS: &[&str] = &[
        "article",
        "li",
        ".Box-row",
        ".feed-item",
        "[data-testid*='feed']",
        "[data-testid*='repository']",
    ];

    // 卡片位于这些区域内时不视为用户卡片
    pub const CARD_EXEMPT_SELECTORS: &[&str] =
        &["form", "[data-testid='settings-layout']", ".settings-content"];

    // 交互控件
    pub const INTERACTIVE_SELECTORS: &[&str] = &[
        "button",
        "summary",
        "[role='button']",
        "[role='menuitem']",
        "[role='tab']",
        "[role='option']",
        ".btn",
        ".Button",
        "nav",
        "header",
        "footer",
        "form",
        "[data-view-component='true'][role='button']",
    ];

    // 卡片中这些位置的文本不属于用户内容
    pub const CARD_NEUTRAL_SELECTORS: &[&str] = &[
        "a[href]",
        "time",
        "relative-time",
        "[aria-live]",
        "[role='status']",
    ];

    pub const SELECT_MENU_SELECTORS: &[&str] = &[
        ".SelectMenu",
        ".SelectMenu-modal",
        ".SelectMenu-list",
        ".SelectMenu-item",
    ];

    pub const MENU_ROLE_SELECTORS: &[&str] =
        &["[role='menu']", "[role='listbox']", "[class*='prc-ActionList']"];

    pub const SEARCH_INPUT_SELECTORS: &[&str] = &[
        "input[role='combobox']",
        "input[type='search']",
        "input[type='text']",
    ];

    pub const SIDEBAR_SELECTORS: &[&str] = &[".Layout-sidebar", ".BorderGrid"];

    pub const HOVERCARD_SELECTORS: &[&str] = &["[data-hovercard-type]", "[data-hovercard-url]"];

    pub const AVATAR_SELECTORS: &[&str] = &["img.avatar", "img.avatar-user"];

    /// 可在界面区域外翻译的中性短标签（小写）
    pub const SAFE_NON_UI_TRANSLATION_KEYS: &[&str] = &[
        "existing forks",
        "create a new fork",
        "fork your own copy of",
        "you don't have any forks of this repository",
        "no description, website, or topics provided",
        "no releases published",
        "no packages published",
        "report repository",
        "readme",
        "activity",
        "branch",
        "branches",
        "tag",
        "tags",
        "commit",
        "commits",
        "public",
        "local",
        "clone",
        "clone using the web url",
        "open with github desktop",
        "download zip",
        "go to file",
        "type / to search",
        "stars",
        "star",
        "watching",
        "forks",
        "fork",
        "releases",
        "packages",
    ];

    /// 不可能是仓库所有者的一级路径
    pub const RESERVED_PATH_PREFIXES: &[&str] = &[
        "about",
        "account",
        "apps",
        "collections",
        "contact",
        "customer-stories",
        "dashboard",
        "enterprise",
        "events",
        "explore",
        "features",
        "gist",
        "global-campus",
        "issues",
        "marketplace",
        "new",
        "notifications",
        "orgs",
        "organizations",
        "pricing",
        "pulls",
        "readme",
        "search",
        "security",
        "settings",
        "site",
        "sponsors",
        "topics",
        "trending",
        "users",
    ];

    /// 编程语言名停用表
    pub const LANGUAGE_STOPLIST: &[&str] = &[
        "b (formal method)",
        "c#",
        "c++",
        "cap'n proto",
        "f#",
        "f*",
        "graphviz (username)",
        "html+ecr",
        "html+eex",
        "html+erb",
        "html+php",
        "html+razor",
        "javascript+erb",
        "netlinx+erb",
        "omnet++ msg",
        "omnet++ ned",
        "objective-c++",
        "q#",
        "ren'py",
        "shell",
    ];

    /// 页面侧生成巡检地址用的模板
    pub const AUDIT_URL_TEMPLATES: &[&str] = &[
        "https://github.com/",
        "https://github.com/dashboard",
        "https://github.com/notifications",
        "https://github.com/pulls",
        "https://github.com/issues",
        "https://github.com/new",
        "https://github.com/search",
        "https://github.com/explore",
        "https://github.com/marketplace",
        "https://github.com/{user}",
        "https://github.com/{user}?tab=repositories",
        "https://github.com/{user}?tab=stars",
        "https://gist.github.com/{user}",
        "https://github.com/sponsors/{user}",
        "https://github.com/settings",
        "https://github.com/settings/profile",
        "https://github.com/settings/account",
        "https://github.com/settings/emails",
        "https://github.com/settings/notifications",
        "https://github.com/settings/appearance",
        "https://github.com/settings/accessibility",
        "https://github.com/settings/security",
        "https://github.com/settings/sessions",
        "https://github.com/settings/keys",
        "https://github.com/settings/tokens",
        "https://github.com/settings/personal-access-tokens",
        "https://github.com/settings/security-log",
        "https://github.com/settings/applications",
        "https://github.com/settings/apps",
        "https://github.com/settings/installations",
        "https://github.com/settings/organizations",
        "https://github.com/settings/copilot",
        "https://github.com/settings/feature_preview",
        "https://github.com/{owner}/{repo}",
        "https://github.com/{owner}/{repo}/issues",
        "https://github.com/{owner}/{repo}/pulls",
        "https://github.com/{owner}/{repo}/actions",
        "https://github.com/{owner}/{repo}/discussions",
        "https://github.com/{owner}/{repo}/projects",
        "https://github.com/{owner}/{repo}/releases",
        "https://github.com/{owner}/{repo}/tags",
        "https://github.com/{owner}/{repo}/commits",
        "https://github.com/{owner}/{repo}/branches",
        "https://github.com/{owner}/{repo}/contributors",
        "https://github.com/{owner}/{repo}/settings",
    ];

    /// 存储侧自动巡检的默认地址（不含用户内容的页面）
    pub const AUDIT_DEFAULT_URLS: &[&str] = &[
        "https://github.com/dashboard",
        "https://github.com/notifications",
        "https://github.com/pulls",
        "https://github.com/issues",
        "https://github.com/explore",
        "https://github.com/marketplace",
        "https://github.com/settings/personal-access-tokens",
        "https://github.com/settings/organizations",
        "https://github.com/settings/billing",
        "https://github.com/",
        "https://github.com/features",
        "https://github.com/features/actions",
        "https://github.com/features/codespaces",
        "https://github.com/features/code-review",
        "https://github.com/features/issues",
        "https://github.com/features/copilot",
        "https://github.com/features/copilot/plans",
        "https://github.com/solutions",
        "https://github.com/enterprise",
        "https://github.com/enterprise/contact",
        "https://github.com/enterprise/contact/data-residency",
        "https://github.com/organizations/enterprise_plan",
        "https://github.com/pricing",
        "https://github.com/pricing/calculator",
        "https://github.com/security",
        "https://github.com/security/advanced-security",
        "https://github.com/security/contact-sales",
        "https://github.com/trust-center/privacy",
        "https://github.com/customer-terms",
        "https://github.com/customer-terms/general-terms",
        "https://github.com/sitemap",
        "https://github.com/robots.txt",
        "https://github.com/advisories",
        "https://github.com/login",
        "https://github.com/join",
        "https://github.com/password_reset",
        "https://github.com/settings",
        "https://github.com/settings/profile",
        "https://github.com/settings/account",
        "https://github.com/settings/emails",
        "https://github.com/settings/notifications",
        "https://github.com/settings/appearance",
        "https://github.com/settings/accessibility",
        "https://github.com/settings/security",
        "https://github.com/settings/security-log",
        "https://github.com/settings/sessions",
        "https://github.com/settings/keys",
        "https://github.com/settings/tokens",
        "https://github.com/settings/applications",
        "https://github.com/settings/developers",
        "https://github.com/settings/apps",
        "https://github.com/settings/apps/new",
        "https://github.com/settings/installations",
        "https://github.com/settings/repositories",
        "https://github.com/settings/blocked_users",
        "https://github.com/settings/billing/plans",
        "https://github.com/settings/copilot",
        "https://github.com/settings/admin",
    ];

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "octoru.toml",
        ".octoru.toml",
        "~/.config/octoru/config.toml",
        "/etc/octoru/config.toml",
    ];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}

/// 加载配置，失败时回退到默认配置
pub fn load_overlay_config() -> OverlayConfig {
    match ConfigManager::new() {
        Ok(manager) => manager.get_config().clone(),
        Err(e) => {
            tracing::warn!("配置加载失败，使用默认配置: {}", e);
            OverlayConfig::default()
        }
    }
}
