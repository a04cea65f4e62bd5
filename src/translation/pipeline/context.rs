//! 页面上下文
//!
//! 当前地址决定页面分区（用于带分区前缀的词典键和覆盖率统计）、
//! 当前仓库以及严格界面模式下启用哪些路由选择器。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cached_regex;
use crate::parsers::html::dom::{descendant_elements, get_node_attr, query_descendant, LiveDocument};
use crate::parsers::html::{ElementMatcher, SelectorList};
use crate::translation::config::constants::{AUDIT_URL_TEMPLATES, RESERVED_PATH_PREFIXES};
use crate::utils::is_match;

use super::normalizer::norm;

/// 覆盖率分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    RepoHome,
    Issues,
    Pr,
    Settings,
    Other,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::RepoHome,
        Section::Issues,
        Section::Pr,
        Section::Settings,
        Section::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::RepoHome => "repo_home",
            Section::Issues => "issues",
            Section::Pr => "pr",
            Section::Settings => "settings",
            Section::Other => "other",
        }
    }

    /// 未知分区归入 `other`
    pub fn from_loose(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(Section::Other)
    }
}

impl FromStr for Section {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 根据路径判断分区
pub fn detect_section(path: &str) -> Section {
    if is_match(cached_regex!(r"(?i)^/[^/]+/[^/]+/issues(?:/|$)"), path) {
        return Section::Issues;
    }
    if is_match(cached_regex!(r"(?i)^/[^/]+/[^/]+/pulls?(?:/|$)"), path) {
        return Section::Pr;
    }
    if is_match(cached_regex!(r"(?i)^/[^/]+/[^/]+/settings(?:/|$)"), path)
        || is_match(cached_regex!(r"(?i)^/settings(?:/|$)"), path)
        || is_match(
            cached_regex!(r"(?i)^/(?:orgs|organizations)/[^/]+/settings(?:/|$)"),
            path,
        )
    {
        return Section::Settings;
    }
    if path == "/"
        || is_match(cached_regex!(r"(?i)^/dashboard(?:/|$)"), path)
        || is_match(cached_regex!(r"^/[^/]+/[^/]+/?$"), path)
    {
        return Section::RepoHome;
    }
    Section::Other
}

// ============================================================================
// 仓库标识
// ============================================================================

/// owner/repo 对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

fn is_slug_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_reserved_owner(owner: &str) -> bool {
    RESERVED_PATH_PREFIXES.contains(&owner.to_lowercase().as_str())
}

fn strip_query_and_fragment(href: &str) -> &str {
    href.split(['?', '#']).next().unwrap_or_default()
}

/// 从站内链接解析 owner/repo（至少两段路径）
pub fn parse_repo_slug(href: &str) -> Option<RepoSlug> {
    let clean = strip_query_and_fragment(href);
    if !clean.starts_with('/') {
        return None;
    }
    let mut parts = clean.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?;
    if is_reserved_owner(owner) || !is_slug_token(owner) || !is_slug_token(repo) {
        return None;
    }
    Some(RepoSlug {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

/// 恰好两段且像仓库首页的链接
pub fn looks_like_owner_repo_path(href: &str) -> bool {
    let parts: Vec<&str> = strip_query_and_fragment(href)
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    let [owner, repo] = parts.as_slice() else {
        return false;
    };
    if is_reserved_owner(owner) {
        return false;
    }
    if matches!(repo.to_lowercase().as_str(), "settings" | "issues" | "pulls") {
        return false;
    }
    is_slug_token(owner) && is_slug_token(repo)
}

/// 文本是否就是 owner、repo 或 owner/repo
pub fn text_matches_repo_slug(raw: &str, slug: &RepoSlug) -> bool {
    let token: String = norm(raw).chars().filter(|c| !c.is_whitespace()).collect();
    let token = token.trim_matches('/').to_lowercase();
    if token.is_empty() {
        return false;
    }
    let owner = slug.owner.to_lowercase();
    let repo = slug.repo.to_lowercase();
    token == owner || token == repo || token == format!("{}/{}", owner, repo)
}

// ============================================================================
// 页面上下文
// ============================================================================

/// 当前页面
#[derive(Debug, Clone)]
pub struct PageContext {
    url: String,
    path: String,
    section: Section,
}

impl PageContext {
    /// 由完整地址或站内路径构建
    pub fn new(location: &str) -> Self {
        let path = match Url::parse(location) {
            Ok(url) => url.path().to_string(),
            Err(_) => {
                let clean = strip_query_and_fragment(location);
                if clean.starts_with('/') {
                    clean.to_string()
                } else {
                    "/".to_string()
                }
            }
        };
        let section = detect_section(&path);
        Self {
            url: location.to_string(),
            path,
            section,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn section(&self) -> Section {
        self.section
    }

    /// 当前地址对应的仓库
    pub fn current_repo(&self) -> Option<RepoSlug> {
        parse_repo_slug(&self.path)
    }
}

impl Default for PageContext {
    fn default() -> Self {
        Self::new("/")
    }
}

/// 登录用户名：优先 `<meta name="user-login">`，其次 body 的 `data-user-login`
pub fn signed_in_user(doc: &LiveDocument) -> Option<String> {
    let from_meta = SelectorList::parse("meta[name='user-login']")
        .ok()
        .and_then(|sel| query_descendant(doc.document(), &sel))
        .and_then(|meta| get_node_attr(&meta, "content"))
        .filter(|v| !v.trim().is_empty());
    let from_body = || {
        doc.body()
            .and_then(|body| get_node_attr(&body, "data-user-login"))
            .filter(|v| !v.trim().is_empty())
    };
    from_meta.or_else(from_body).map(|v| v.trim().to_string())
}

/// 页面上第一个可识别的仓库链接
pub fn find_first_repo_slug(doc: &LiveDocument) -> Option<RepoSlug> {
    let preferred = [
        "aside a[data-hovercard-type='repository']",
        "a[data-hovercard-type='repository']",
        "a[href^='/'][data-hydro-click*='repository']",
    ];
    let root = doc.document();
    for source in preferred {
        let Ok(selector) = SelectorList::parse(source) else {
            continue;
        };
        let slug = query_descendant(root, &selector)
            .and_then(|a| get_node_attr(&a, "href"))
            .and_then(|href| parse_repo_slug(&href));
        if slug.is_some() {
            return slug;
        }
    }

    let links = SelectorList::parse("a[href^='/']").ok()?;
    descendant_elements(root)
        .into_iter()
        .filter(|el| links.matches(el))
        .filter_map(|a| get_node_attr(&a, "href"))
        .find_map(|href| parse_repo_slug(&href))
}

/// 用登录用户和首个仓库填充巡检模板，丢弃变量缺失的条目并去重
pub fn build_audit_urls(user: Option<&str>, slug: Option<&RepoSlug>) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for template in AUDIT_URL_TEMPLATES {
        let mut url = template.to_string();
        if let Some(user) = user {
            url = url.replace("{user}", user);
        }
        if let Some(slug) = slug {
            url = url.replace("{owner}", &slug.owner).replace("{repo}", &slug.repo);
        }
        if url.contains("{user}") || url.contains("{owner}") || url.contains("{repo}") {
            continue;
        }
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_section() {
        assert_eq!(detect_section("/rust-lang/rust/issues/12"), Section::Issues);
        assert_eq!(detect_section("/rust-lang/rust/pull/3"), Section::Pr);
        assert_eq!(detect_section("/rust-lang/rust/pulls"), Section::Pr);
        assert_eq!(detect_section("/settings/profile"), Section::Settings);
        assert_eq!(detect_section("/orgs/acme/settings"), Section::Settings);
        assert_eq!(detect_section("/rust-lang/rust/settings"), Section::Settings);
        assert_eq!(detect_section("/"), Section::RepoHome);
        assert_eq!(detect_section("/dashboard"), Section::RepoHome);
        assert_eq!(detect_section("/rust-lang/rust"), Section::RepoHome);
        assert_eq!(detect_section("/explore"), Section::Other);
    }

    #[test]
    fn test_page_context_from_url() {
        let ctx = PageContext::new("https://github.com/rust-lang/rust/issues?q=is%3Aopen");
        assert_eq!(ctx.path(), "/rust-lang/rust/issues");
        assert_eq!(ctx.section(), Section::Issues);
        assert_eq!(
            ctx.current_repo(),
            Some(RepoSlug {
                owner: "rust-lang".into(),
                repo: "rust".into()
            })
        );
        assert_eq!(PageContext::new("/settings").section(), Section::Settings);
    }

    #[test]
    fn test_repo_slug_parsing() {
        assert!(parse_repo_slug("/settings/profile").is_none());
        assert!(parse_repo_slug("https://x/a/b").is_none());
        assert!(parse_repo_slug("/octocat").is_none());
        assert!(looks_like_owner_repo_path("/octocat/hello?tab=x"));
        assert!(!looks_like_owner_repo_path("/octocat/hello/issues"));
        assert!(!looks_like_owner_repo_path("/octocat/settings"));

        let slug = parse_repo_slug("/Octocat/Hello-World/tree/main").unwrap();
        assert!(text_matches_repo_slug(" octocat / hello-world ", &slug));
        assert!(text_matches_repo_slug("Hello-World", &slug));
        assert!(!text_matches_repo_slug("Code", &slug));
    }

    #[test]
    fn test_section_from_loose() {
        assert_eq!(Section::from_loose("pr"), Section::Pr);
        assert_eq!(Section::from_loose("wiki"), Section::Other);
    }

    #[test]
    fn test_audit_urls_drop_missing_vars() {
        let without = build_audit_urls(None, None);
        assert!(without.iter().all(|u| !u.contains('{')));
        assert!(without.contains(&"https://github.com/settings".to_string()));

        let slug = RepoSlug {
            owner: "o".into(),
            repo: "r".into(),
        };
        let with = build_audit_urls(Some("me"), Some(&slug));
        assert!(with.contains(&"https://github.com/me?tab=stars".to_string()));
        assert!(with.contains(&"https://github.com/o/r/issues".to_string()));
        assert_eq!(with.len(), AUDIT_URL_TEMPLATES.len());
    }
}
