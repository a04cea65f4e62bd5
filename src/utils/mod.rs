//! # 工具模块
//!
//! 这个模块包含各种工具函数和实用程序：
//!
//! - 惰性编译的正则表达式缓存
//! - 文本字符类别检测
//! - 时间戳格式化

use std::borrow::Cow;

use regex::Regex;

/// 惰性编译并缓存一个正则表达式
///
/// 编译失败时记录错误并返回 `None`，调用方把 `None` 视为"不匹配"。
#[macro_export]
macro_rules! cached_regex {
    ($pattern:expr) => {{
        static RE: ::std::sync::OnceLock<Option<::regex::Regex>> = ::std::sync::OnceLock::new();
        RE.get_or_init(|| match ::regex::Regex::new($pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!("正则表达式编译失败 {}: {}", $pattern, e);
                None
            }
        })
        .as_ref()
    }};
}

/// 判断缓存的正则是否匹配
pub fn is_match(re: Option<&Regex>, text: &str) -> bool {
    re.is_some_and(|re| re.is_match(text))
}

/// 使用缓存的正则做全部替换
pub fn replace_all<'t>(re: Option<&Regex>, text: &'t str, rep: &str) -> Cow<'t, str> {
    match re {
        Some(re) => re.replace_all(text, rep),
        None => Cow::Borrowed(text),
    }
}

/// 是否包含西里尔字母（俄文）
pub fn has_cyrillic(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{0410}'..='\u{044F}' | '\u{0401}' | '\u{0451}'))
}

/// 是否包含拉丁字母
pub fn has_latin(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

/// 当前 UTC 时间的 ISO-8601 字符串（毫秒精度）
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_classes() {
        assert!(has_cyrillic("Войти"));
        assert!(has_cyrillic("ёж"));
        assert!(!has_cyrillic("Sign in"));
        assert!(has_latin("v2"));
        assert!(!has_latin("12 345"));
    }

    #[test]
    fn test_cached_regex_helpers() {
        let re = crate::cached_regex!(r"\d+");
        assert!(is_match(re, "abc 12"));
        assert_eq!(replace_all(re, "a1b22", "#"), "a#b#");
        assert!(!is_match(None, "anything"));
    }

    #[test]
    fn test_now_iso_shape() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }
}
