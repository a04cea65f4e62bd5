//! 文本规范化
//!
//! 所有查表、收集和比较都先经过 [`norm`]：统一引号、修复 `字母?字母` 形式的
//! 撇号乱码、折叠空白并去掉首尾空白。

use crate::cached_regex;
use crate::utils::{has_cyrillic, is_match, replace_all};

/// 规范化短语
pub fn norm(raw: &str) -> String {
    let unified: String = raw
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect();
    let repaired = replace_all(cached_regex!(r"([A-Za-z])\?([A-Za-z])"), &unified, "$1'$2");
    let collapsed = replace_all(cached_regex!(r"\s+"), &repaired, " ");
    collapsed.trim().to_string()
}

/// 拆分后的文本：前导空白、核心、结尾标点、结尾空白
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunctuationSplit<'a> {
    pub leading: &'a str,
    pub base: &'a str,
    pub punct: &'a str,
    pub trailing: &'a str,
}

/// 去掉首尾空白后分离出结尾的 `. : … ! ?` 序列
///
/// 核心为空时返回 `None`。核心含换行等无法整体匹配时，整个核心作为 `base`。
pub fn split_punctuation(raw: &str) -> Option<PunctuationSplit<'_>> {
    let trimmed_start = raw.trim_start();
    let leading = &raw[..raw.len() - trimmed_start.len()];
    let core = trimmed_start.trim_end();
    let trailing = &trimmed_start[core.len()..];
    if core.is_empty() {
        return None;
    }

    let (base, punct) = match cached_regex!(r"^(.*?)([.:\u{2026}!?]+)?$").and_then(|re| re.captures(core)) {
        Some(caps) => {
            let base = caps.get(1).map_or(core, |m| m.as_str());
            let punct = caps.get(2).map_or("", |m| m.as_str());
            (base, punct)
        }
        None => (core, ""),
    };

    Some(PunctuationSplit {
        leading,
        base,
        punct,
        trailing,
    })
}

/// 用于查表的基础短语：去掉结尾标点后规范化
pub fn extract_base(raw: &str) -> String {
    split_punctuation(raw).map_or_else(String::new, |split| norm(split.base))
}

/// 去掉结尾标点（遍历过滤阶段使用）
pub fn strip_trailing_punctuation(text: &str) -> String {
    replace_all(cached_regex!(r"[.:\u{2026}!?]+$"), text, "").into_owned()
}

/// 上报前把易变片段替换为占位符
pub fn normalize_collector_key(key: &str) -> String {
    let mut t = norm(key);
    if t.is_empty() {
        return t;
    }

    let steps: [(Option<&regex::Regex>, &str); 8] = [
        (cached_regex!(r"@([A-Za-z0-9_.-]{2,})"), "@USERNAME"),
        (cached_regex!(r"\(([A-Za-z0-9_.-]{2,})\)"), "(USERNAME)"),
        (
            cached_regex!(r"(?i)^([A-Za-z0-9_.-]{2,})\s+(had no activity during this period\.?)$"),
            "USERNAME $2",
        ),
        (
            cached_regex!(r"(?i)^([A-Za-z0-9_.-]{2,})\s+(has no activity yet for this period\.?)$"),
            "USERNAME $2",
        ),
        (cached_regex!(r"^([A-Za-z0-9_.-]{2,})\s*[\u{00B7}\u{2022}]$"), "USERNAME \u{00B7}"),
        (
            cached_regex!(r"(?i)^([A-Za-z0-9_.-]{2,}),\s+Owner\s+\(USERNAME\)$"),
            "USERNAME, Owner (USERNAME)",
        ),
        (cached_regex!(r"\b(19|20)\d{2}\b"), "{YEAR}"),
        (cached_regex!(r"\b\d+\b"), "{N}"),
    ];
    for (re, rep) in steps {
        t = replace_all(re, &t, rep).into_owned();
    }

    norm(&t)
}

/// 疑似技术文本（命令、仓库路径、提交哈希、文件路径）或已是俄文
pub fn is_likely_technical_text(text: &str) -> bool {
    let t = norm(text);
    if t.is_empty() || has_cyrillic(&t) {
        return true;
    }

    let lower = t.to_lowercase();
    if ["git ", "npm ", "docker ", "yarn "]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return true;
    }
    if is_match(cached_regex!(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$"), &t) {
        return true;
    }
    if is_match(cached_regex!(r"(?i)^[0-9a-f]{40}$"), &t) {
        return true;
    }
    t.contains(['\\', '/'])
        && is_match(
            cached_regex!(r"(?i)\.(md|txt|js|ts|py|go|rs|java|cpp|c|h|yml|yaml|json)$"),
            &t,
        )
}

/// 词典值是否为损坏的问号噪声
pub fn is_broken_translation_value(value: &str) -> bool {
    let t = norm(value);
    if t.is_empty() {
        return true;
    }
    let question_marks = t.matches('?').count();
    question_marks >= 3
        && is_match(cached_regex!(r#"^[\s?.,:;!'"`(){}\[\]\-_/\\]+$"#), &t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_quotes_and_whitespace() {
        assert_eq!(norm("  Don\u{2019}t \n\t  stop  "), "Don't stop");
        assert_eq!(norm("\u{201C}Hi\u{201D}"), "\"Hi\"");
        assert_eq!(norm("don?t"), "don't");
        assert_eq!(norm(" \n "), "");
    }

    #[test]
    fn test_split_keeps_surroundings() {
        let split = split_punctuation("  Sign in...\n").unwrap();
        assert_eq!(split.leading, "  ");
        assert_eq!(split.base, "Sign in");
        assert_eq!(split.punct, "...");
        assert_eq!(split.trailing, "\n");
        assert!(split_punctuation("   ").is_none());
        assert_eq!(extract_base(" Loading\u{2026} "), "Loading");
    }

    #[test]
    fn test_collector_key_placeholders() {
        assert_eq!(normalize_collector_key("Mentioned by @octocat"), "Mentioned by @USERNAME");
        assert_eq!(normalize_collector_key("12 commits in 2024"), "{N} commits in {YEAR}");
        assert_eq!(
            normalize_collector_key("octocat had no activity during this period."),
            "USERNAME had no activity during this period."
        );
        assert_eq!(normalize_collector_key("octocat \u{2022}"), "USERNAME \u{00B7}");
        assert_eq!(
            normalize_collector_key("John, Owner (john)"),
            "USERNAME, Owner (USERNAME)"
        );
    }

    #[test]
    fn test_technical_text() {
        assert!(is_likely_technical_text("git clone x"));
        assert!(is_likely_technical_text("rust-lang/rust"));
        assert!(is_likely_technical_text(&"a".repeat(40)));
        assert!(is_likely_technical_text("src/main.rs"));
        assert!(is_likely_technical_text("Войти"));
        assert!(!is_likely_technical_text("Sign in"));
    }

    #[test]
    fn test_broken_values() {
        assert!(is_broken_translation_value("??? ?"));
        assert!(is_broken_translation_value("  "));
        assert!(!is_broken_translation_value("Что?"));
        assert!(!is_broken_translation_value("???abc"));
    }
}
