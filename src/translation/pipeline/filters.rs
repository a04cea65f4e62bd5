//! 文本噪声过滤器
//!
//! 判断一段未翻译文本是否值得上报。每条规则对应一个稳定的原因码，
//! 调试模式下原因码会被计数并送往存储侧。
//! 依赖元素结构的规则在 `classifier` 中实现，这里只处理纯文本。

use std::fmt;

use crate::cached_regex;
use crate::translation::config::constants;
use crate::utils::{has_cyrillic, has_latin, is_match};

use super::normalizer::norm;

/// 拒绝收集的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NoiseReason {
    EmptyKey,
    AlreadyRussian,
    OutsideUiScope,
    BlacklistedElement,
    UserContentContext,
    NoLatinLetters,
    InvalidLength,
    DigitsOnly,
    NonWordOnly,
    HtmlLike,
    PunctuationPrefix,
    GmtOffset,
    TooManyDigits,
    DateLike,
    YearBound,
    JsonBlob,
    SearchQuery,
    KeyboardHint,
    NoisyTestLabel,
    AuditToken,
    CssBlob,
    UiFragment,
    CollectorNoise,
    LanguageToken,
    Email,
    Url,
    ExplicitUsername,
    OwnerRepoReference,
    UserRepoToken,
    UserActivityPhrase,
    WrappedUserToken,
    HovercardContext,
    HovercardAnchor,
    OwnerRepoLink,
    AvatarAnchor,
}

impl NoiseReason {
    /// 稳定的原因码
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseReason::EmptyKey => "empty_key",
            NoiseReason::AlreadyRussian => "already_russian",
            NoiseReason::OutsideUiScope => "outside_ui_scope",
            NoiseReason::BlacklistedElement => "blacklisted_element",
            NoiseReason::UserContentContext => "user_content_context",
            NoiseReason::NoLatinLetters => "no_latin_letters",
            NoiseReason::InvalidLength => "invalid_length",
            NoiseReason::DigitsOnly => "digits_only",
            NoiseReason::NonWordOnly => "non_word_only",
            NoiseReason::HtmlLike => "html_like",
            NoiseReason::PunctuationPrefix => "punctuation_prefix",
            NoiseReason::GmtOffset => "gmt_offset",
            NoiseReason::TooManyDigits => "too_many_digits",
            NoiseReason::DateLike => "date_like",
            NoiseReason::YearBound => "year_bound",
            NoiseReason::JsonBlob => "json_blob",
            NoiseReason::SearchQuery => "search_query",
            NoiseReason::KeyboardHint => "keyboard_hint",
            NoiseReason::NoisyTestLabel => "noisy_test_label",
            NoiseReason::AuditToken => "audit_token",
            NoiseReason::CssBlob => "css_blob",
            NoiseReason::UiFragment => "ui_fragment",
            NoiseReason::CollectorNoise => "collector_noise",
            NoiseReason::LanguageToken => "language_token",
            NoiseReason::Email => "email",
            NoiseReason::Url => "url",
            NoiseReason::ExplicitUsername => "explicit_username",
            NoiseReason::OwnerRepoReference => "owner_repo_reference",
            NoiseReason::UserRepoToken => "user_repo_token",
            NoiseReason::UserActivityPhrase => "user_activity_phrase",
            NoiseReason::WrappedUserToken => "wrapped_user_token",
            NoiseReason::HovercardContext => "hovercard_context",
            NoiseReason::HovercardAnchor => "hovercard_anchor",
            NoiseReason::OwnerRepoLink => "owner_repo_link",
            NoiseReason::AvatarAnchor => "avatar_anchor",
        }
    }
}

impl fmt::Display for NoiseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文本规则使用的长度阈值
#[derive(Debug, Clone, Copy)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for LengthBounds {
    fn default() -> Self {
        Self {
            min: constants::COLLECT_MIN_LEN,
            max: constants::COLLECT_MAX_LEN,
        }
    }
}

const MONTHS: &str = "Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec|January|February|March|April|May|June|July|August|September|October|November|December";

// ============================================================================
// 日期与时间
// ============================================================================

pub fn looks_like_iso_datetime(s: &str) -> bool {
    is_match(
        cached_regex!(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?$"),
        s,
    )
}

pub fn looks_like_iso_date(s: &str) -> bool {
    is_match(cached_regex!(r"^\d{4}-\d{2}-\d{2}$"), s)
}

pub fn looks_like_month_date(s: &str) -> bool {
    is_match(
        cached_regex!(r"^(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2},\s+\d{4}(?:,.*)?$"),
        s,
    )
}

pub fn looks_like_month_year(s: &str) -> bool {
    static PATTERN: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    let pattern = PATTERN.get_or_init(|| format!(r"^({})\.?\s+\d{{4}}$", MONTHS));
    is_match(cached_regex!(pattern.as_str()), s)
}

pub fn looks_like_month_range_with_year(s: &str) -> bool {
    static PATTERN: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        format!(
            r"^({m})\s+\d{{1,2}}\s*[-\u{{2013}}\u{{2014}}]\s*({m})?\s*\d{{1,2}},\s*\d{{4}}$",
            m = MONTHS
        )
    });
    is_match(cached_regex!(pattern.as_str()), s)
}

pub fn looks_like_year_bound_ui_phrase(s: &str) -> bool {
    let t = s.trim();
    is_match(cached_regex!(r"(?i)^Contribution activity in\s+\d{4}$"), t)
        || is_match(
            cached_regex!(r"(?i)^Usage\s+\w+,\s+[A-Za-z]{3,9}\s+\d{1,2}\s+\d{4},\s+Gross:"),
            t,
        )
        || is_match(
            cached_regex!(r"(?i)^View details of session .* last accessed [A-Za-z]{3,9}\s+\d{1,2},\s+\d{4}$"),
            t,
        )
}

pub fn contains_gmt_offset(s: &str) -> bool {
    is_match(cached_regex!(r"(?i)\(\s*GMT\s*[+-]\d{2}:\d{2}\s*\)"), s)
}

// ============================================================================
// 结构化片段
// ============================================================================

pub fn looks_like_json_blob(s: &str) -> bool {
    let t = s.trim();
    ((t.starts_with('{') && t.ends_with('}')) || (t.starts_with('[') && t.ends_with(']')))
        && t.contains("\":")
}

pub fn looks_like_search_query(s: &str) -> bool {
    let t = s.trim();
    is_match(cached_regex!(r"(?i)^-?[a-z][a-z0-9_-]*:[^\s]+$"), t)
        || is_match(
            cached_regex!(r"(?i)\b(repo|org|user|lang|is|in|sort|label|milestone|author|assignee|comments|reactions):"),
            t,
        )
        || (is_match(cached_regex!(r"(?i)\bAND\b|\bOR\b"), t) && t.contains(':'))
}

pub fn looks_like_keyboard_hint(s: &str) -> bool {
    let t = s.trim();
    is_match(cached_regex!(r"(?i)^[a-z]\s+then\s+[a-z]$"), t)
        || is_match(cached_regex!(r"(?i)^[a-z]\s+then\s+[a-z]\s+then\s+[a-z]$"), t)
        || is_match(cached_regex!(r"(?i)^[a-z],?/$"), t)
        || is_match(cached_regex!(r"(?i)^[a-z]$"), t)
}

pub fn looks_like_noisy_test_label(s: &str) -> bool {
    let t = s.trim();
    is_match(cached_regex!(r"\b\d+-\d+\b"), t)
        && is_match(cached_regex!(r"(?i)(Repo Details|repository body)"), t)
}

pub fn looks_like_audit_hex_token(s: &str) -> bool {
    is_match(
        cached_regex!(r"(?i)^(?:[A-F0-9]{3,}[:.-]){3,}[A-F0-9]{3,}$"),
        s.trim(),
    )
}

pub fn looks_like_css_blob(s: &str) -> bool {
    let t = s.trim();
    is_match(cached_regex!(r"(?i)\{[^}]*fill\s*:"), t)
        || is_match(cached_regex!(r"^\.?[A-Za-z0-9_-]+\s*\{[^}]+\}$"), t)
}

pub fn looks_like_ui_fragment(s: &str) -> bool {
    is_match(
        cached_regex!(r"(?i)^,\s*or read more about it at our:?$"),
        s.trim(),
    )
}

pub fn looks_like_collector_noise_token(s: &str) -> bool {
    let t = s.trim();
    t.is_empty()
        || is_match(cached_regex!(r"(?i)^_document_id$"), t)
        || is_match(cached_regex!(r#"^\["[A-Za-z0-9_-]+"\]$"#), t)
        || is_match(
            cached_regex!(r"(?i)^(repo,\s*user(?:,\s*workflow)?|repo,user(?:,workflow)?|scope\(s\)|supported secrets)$"),
            t,
        )
        || is_match(cached_regex!(r"(?i)^[A-Za-z0-9._%+-]+@USERNAME$"), t)
        || is_match(cached_regex!(r"(?i)^\{N\}\+[A-Za-z0-9._%+-]+@USERNAME$"), t)
}

/// 编程语言名（C#、C++、HTML+ERB 等）
pub fn looks_like_language_token(s: &str) -> bool {
    let t = norm(s).to_lowercase();
    if t.is_empty() {
        return true;
    }
    if constants::LANGUAGE_STOPLIST.contains(&t.as_str()) {
        return true;
    }
    is_match(
        cached_regex!(r"(?i)^[a-z0-9][a-z0-9.+#*'_-]*(?:\+\+|#[a-z0-9]*)?(?:\s+[a-z0-9.+#*'_-]+)?$"),
        &t,
    ) && t.contains(['+', '#', '*'])
}

// ============================================================================
// 用户与仓库标识
// ============================================================================

pub fn looks_like_user_or_repo_token(s: &str) -> bool {
    let t = s.trim();
    if t.contains(' ') {
        return false;
    }
    if is_match(cached_regex!(r"^[A-Z][a-z]+$"), t) {
        return false;
    }
    if is_match(
        cached_regex!(r"(?i)^(GitHub|Copilot|Dependabot|Codespaces|Actions|Projects|Discussions)$"),
        t,
    ) {
        return false;
    }
    is_match(cached_regex!(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$"), t)
        || is_match(cached_regex!(r"^[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)+$"), t)
        || is_match(cached_regex!(r"(?i)^[a-z0-9][a-z0-9_.-]{2,}$"), t)
}

pub fn contains_user_repo_reference(s: &str) -> bool {
    is_match(cached_regex!(r"[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+"), s)
}

pub fn contains_email(s: &str) -> bool {
    is_match(
        cached_regex!(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
        s,
    )
}

pub fn contains_url_like_token(s: &str) -> bool {
    is_match(cached_regex!(r"(?i)\bhttps?://\S+"), s)
        || is_match(cached_regex!(r"(?i)\bwww\.[^\s]+\.[A-Za-z]{2,}\b"), s)
}

/// 含有真实账号的 `@提及`（`@mention` 这类说明文字除外）
pub fn contains_explicit_username_mention(s: &str) -> bool {
    let Some(re) = cached_regex!(r"@[A-Za-z0-9_.-]{2,}") else {
        return false;
    };
    re.find_iter(s).any(|m| {
        !matches!(
            m.as_str().to_lowercase().as_str(),
            "@mention" | "@mentions" | "@mentioning" | "@username"
        )
    })
}

pub fn looks_like_user_activity_phrase(s: &str) -> bool {
    let t = s.trim();
    is_match(
        cached_regex!(r"(?i)^[A-Za-z0-9_.-]{2,}\s+had no activity during this period\.?$"),
        t,
    ) || is_match(
        cached_regex!(r"(?i)^[A-Za-z0-9_.-]{2,}\s+has no activity yet for this period\.?$"),
        t,
    ) || is_match(cached_regex!(r"^[A-Za-z0-9_.-]{2,}\s*[\u{00B7}\u{2022}]$"), t)
}

pub fn looks_like_wrapped_user_token(s: &str) -> bool {
    is_match(cached_regex!(r"^\([A-Za-z0-9_.-]{2,}\)$"), s.trim())
}

fn too_many_digits(t: &str) -> bool {
    let letters = t.chars().filter(|c| c.is_ascii_alphabetic()).count();
    let digits = t.chars().filter(|c| c.is_ascii_digit()).count();
    digits > 0 && letters > 0 && digits > letters * 2
}

/// 与元素无关的全部文本规则，按固定顺序检查
///
/// `key` 应为规范化后的基础短语。
pub fn text_noise_reason(key: &str, bounds: LengthBounds) -> Option<NoiseReason> {
    if has_cyrillic(key) {
        return Some(NoiseReason::AlreadyRussian);
    }
    if !has_latin(key) {
        return Some(NoiseReason::NoLatinLetters);
    }

    let t = key.trim();
    let len = t.chars().count();
    if len < bounds.min || len > bounds.max {
        return Some(NoiseReason::InvalidLength);
    }
    if t.chars().all(|c| c.is_ascii_digit()) {
        return Some(NoiseReason::DigitsOnly);
    }
    if t.chars().all(|c| !c.is_ascii_alphanumeric() && c != '_') {
        return Some(NoiseReason::NonWordOnly);
    }
    if t.contains(['<', '>']) {
        return Some(NoiseReason::HtmlLike);
    }
    if t.starts_with([',', '.', ';', ':']) {
        return Some(NoiseReason::PunctuationPrefix);
    }
    if contains_gmt_offset(t) {
        return Some(NoiseReason::GmtOffset);
    }
    if too_many_digits(t) {
        return Some(NoiseReason::TooManyDigits);
    }

    let rules: [(fn(&str) -> bool, NoiseReason); 21] = [
        (looks_like_iso_datetime, NoiseReason::DateLike),
        (looks_like_iso_date, NoiseReason::DateLike),
        (looks_like_month_date, NoiseReason::DateLike),
        (looks_like_month_year, NoiseReason::YearBound),
        (looks_like_month_range_with_year, NoiseReason::YearBound),
        (looks_like_year_bound_ui_phrase, NoiseReason::YearBound),
        (looks_like_json_blob, NoiseReason::JsonBlob),
        (looks_like_search_query, NoiseReason::SearchQuery),
        (looks_like_keyboard_hint, NoiseReason::KeyboardHint),
        (looks_like_noisy_test_label, NoiseReason::NoisyTestLabel),
        (looks_like_audit_hex_token, NoiseReason::AuditToken),
        (looks_like_css_blob, NoiseReason::CssBlob),
        (looks_like_ui_fragment, NoiseReason::UiFragment),
        (looks_like_collector_noise_token, NoiseReason::CollectorNoise),
        (looks_like_language_token, NoiseReason::LanguageToken),
        (contains_email, NoiseReason::Email),
        (contains_url_like_token, NoiseReason::Url),
        (contains_explicit_username_mention, NoiseReason::ExplicitUsername),
        (contains_user_repo_reference, NoiseReason::OwnerRepoReference),
        (looks_like_user_or_repo_token, NoiseReason::UserRepoToken),
        (looks_like_user_activity_phrase, NoiseReason::UserActivityPhrase),
    ];
    if let Some((_, reason)) = rules.iter().find(|(rule, _)| rule(t)) {
        return Some(*reason);
    }
    if looks_like_wrapped_user_token(t) {
        return Some(NoiseReason::WrappedUserToken);
    }
    None
}

// ============================================================================
// 存储侧清理
// ============================================================================

/// 已存储的未翻译条目是否属于噪声（清理命令使用）
pub fn should_drop_untranslated_noise(key: &str) -> bool {
    let t = key.trim();
    if t.is_empty() {
        return true;
    }
    let len = t.chars().count();
    if len < 2 || len > constants::PRUNE_MAX_LEN {
        return true;
    }

    if is_match(cached_regex!(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"), t) {
        return true;
    }
    if t.chars().all(|c| !c.is_ascii_alphanumeric()) {
        return true;
    }
    if is_match(cached_regex!(r"^\p{Extended_Pictographic}+$"), t) {
        return true;
    }

    // 占位符与合成标记
    if is_match(cached_regex!(r"(?i)^\{[A-Z_][A-Z0-9_]*\}$"), t)
        || is_match(cached_regex!(r"(?i)^\(\s*\{[A-Z_][A-Z0-9_]*\}\s*\)$"), t)
    {
        return true;
    }
    let placeholders = cached_regex!(r"(?i)\{[A-Z_][A-Z0-9_]*\}").map_or(0, |re| re.find_iter(t).count());
    if placeholders >= 4 && len < 120 {
        return true;
    }

    // HTML、CSS 与序列化载荷
    if is_match(cached_regex!(r"(?is)</?[a-z].*>"), t)
        || is_match(cached_regex!(r"(?i)data:image/[a-z0-9+.-]+;base64,"), t)
        || is_match(cached_regex!(r"(^|[;{])\s*[.#]?[A-Za-z0-9_-]+\s*\{[^}]*:[^}]*\}"), t)
        || (is_match(cached_regex!(r#"(?s)^(\{|\[).*(:|"|\]).*(\}|\])$"#), t)
            && is_match(cached_regex!(r#""[A-Za-z0-9_.-]+"\s*:"#), t))
    {
        return true;
    }

    // 随机标识、哈希与长令牌
    if is_match(cached_regex!(r"(?i)^[A-F0-9]{16,}$"), t)
        || (is_match(cached_regex!(r"^[A-Za-z0-9+/=_-]{24,}$"), t) && !t.contains(char::is_whitespace))
        || is_match(
            cached_regex!(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"),
            t,
        )
    {
        return true;
    }

    // 查询语法与仓库引用
    if is_match(cached_regex!(r"(?i)\b(?:repo|org|user|is|state|sort|lang|created):"), t)
        || is_match(cached_regex!(r"\b[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+\b"), t)
        || is_match(cached_regex!(r"@[A-Za-z0-9_.-]{2,}"), t)
    {
        return true;
    }

    // 单个技术性记号
    !t.contains(char::is_whitespace) && t.contains(['+', '#', '*', '=']) && len < 80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(s: &str) -> Option<NoiseReason> {
        text_noise_reason(s, LengthBounds::default())
    }

    #[test]
    fn test_plain_ui_phrase_passes() {
        assert_eq!(reason("Sign in"), None);
        assert_eq!(reason("Create a new repository"), None);
        assert_eq!(reason("Pull requests"), None);
    }

    #[test]
    fn test_identity_noise() {
        assert_eq!(reason("user@example.com"), Some(NoiseReason::Email));
        assert_eq!(reason("a/b"), Some(NoiseReason::OwnerRepoReference));
        assert_eq!(reason("C++"), Some(NoiseReason::LanguageToken));
        assert_eq!(reason("Reviewed by @octocat"), Some(NoiseReason::ExplicitUsername));
        assert_eq!(reason("Use @mention to notify"), None);
        assert_eq!(reason("(octocat)"), Some(NoiseReason::WrappedUserToken));
        assert_eq!(reason("octocat"), Some(NoiseReason::UserRepoToken));
        assert_eq!(reason("Copilot"), None);
    }

    #[test]
    fn test_hex_digest_is_rejected() {
        let digest = "0123456789abcdef0123456789abcdef01234567";
        assert!(reason(digest).is_some());
        assert!(should_drop_untranslated_noise(digest));
    }

    #[test]
    fn test_dates_and_queries() {
        assert_eq!(reason("2024-01-31"), Some(NoiseReason::NoLatinLetters));
        assert_eq!(reason("Jan 5, 2024"), Some(NoiseReason::DateLike));
        assert_eq!(reason("March 2024"), Some(NoiseReason::YearBound));
        assert_eq!(reason("Jan 5 - Feb 3, 2024"), Some(NoiseReason::YearBound));
        assert_eq!(reason("is:open label:bug"), Some(NoiseReason::SearchQuery));
        assert_eq!(reason("g then c"), Some(NoiseReason::KeyboardHint));
        assert_eq!(reason("Time (GMT+03:00)"), Some(NoiseReason::GmtOffset));
    }

    #[test]
    fn test_length_and_shape() {
        assert_eq!(reason("x"), Some(NoiseReason::InvalidLength));
        assert_eq!(reason(&"word ".repeat(60)), Some(NoiseReason::InvalidLength));
        assert_eq!(reason("Войти"), Some(NoiseReason::AlreadyRussian));
        assert_eq!(reason("123 456"), Some(NoiseReason::NoLatinLetters));
        assert_eq!(reason("<b>x</b>"), Some(NoiseReason::HtmlLike));
        assert_eq!(reason(", and more"), Some(NoiseReason::PunctuationPrefix));
        assert_eq!(reason("a1234567"), Some(NoiseReason::TooManyDigits));
        assert_eq!(reason(r#"{"a": 1}"#), Some(NoiseReason::JsonBlob));
        assert_eq!(reason("icon { fill: red }"), Some(NoiseReason::CssBlob));
    }

    #[test]
    fn test_prune_rules() {
        assert!(should_drop_untranslated_noise(""));
        assert!(should_drop_untranslated_noise("user@example.com wrote"));
        assert!(should_drop_untranslated_noise("{N}"));
        assert!(should_drop_untranslated_noise("({YEAR})"));
        assert!(should_drop_untranslated_noise("<div>hi</div>"));
        assert!(should_drop_untranslated_noise("550e8400-e29b-41d4-a716-446655440000"));
        assert!(should_drop_untranslated_noise("is:open"));
        assert!(should_drop_untranslated_noise("see rust-lang/rust"));
        assert!(should_drop_untranslated_noise("C++"));
        assert!(should_drop_untranslated_noise("\u{1F680}\u{1F389}"));
        assert!(should_drop_untranslated_noise("--- !!!"));
        assert!(!should_drop_untranslated_noise("Sign in"));
        assert!(!should_drop_untranslated_noise("{N} commits in {YEAR}"));
    }

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(NoiseReason::OwnerRepoLink.as_str(), "owner_repo_link");
        assert_eq!(NoiseReason::EmptyKey.to_string(), "empty_key");
    }
}
