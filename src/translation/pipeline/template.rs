//! 模板键
//!
//! 把用户名、年份和数字替换为占位符，使 `Mentioned by @alice` 与
//! `Mentioned by @bob` 共用一条翻译；翻译结果再按相同顺序回填原值。

use crate::cached_regex;

use super::normalizer::norm;

/// 从短语中提取出的变量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValues {
    pub usernames: Vec<String>,
    pub paren_usernames: Vec<String>,
    pub owner_usernames: Vec<String>,
    pub years: Vec<String>,
    pub numbers: Vec<String>,
}

/// 模板化结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateKey {
    pub template: String,
    pub values: TemplateValues,
}

/// 替换匹配并记录原值；`group` 为 0 时记录整个匹配
fn collect_and_replace(
    re: Option<&regex::Regex>,
    text: &str,
    placeholder: &str,
    group: usize,
    sink: &mut Vec<String>,
) -> String {
    let Some(re) = re else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let value = caps.get(group).or_else(|| caps.get(0)).map_or("", |m| m.as_str());
        sink.push(value.to_string());
        placeholder.to_string()
    })
    .into_owned()
}

/// 构建模板键
pub fn build_template_key(raw: &str) -> TemplateKey {
    let mut values = TemplateValues::default();

    let t = collect_and_replace(
        cached_regex!(r"@([A-Za-z0-9_.-]{2,})"),
        raw,
        "@USERNAME",
        0,
        &mut values.usernames,
    );
    let t = collect_and_replace(
        cached_regex!(r"\(([A-Za-z0-9_.-]{2,})\)"),
        &t,
        "(USERNAME)",
        0,
        &mut values.paren_usernames,
    );
    let t = collect_and_replace(
        cached_regex!(r"(?i)^([A-Za-z0-9_.-]{2,}),\s+Owner\s+\(USERNAME\)$"),
        &t,
        "{USERNAME}, Owner (USERNAME)",
        1,
        &mut values.owner_usernames,
    );

    // 年份要整体取出，不能只取分组
    let t = match cached_regex!(r"\b(?:19|20)\d{2}\b") {
        Some(re) => re
            .replace_all(&t, |caps: &regex::Captures<'_>| {
                values.years.push(caps[0].to_string());
                "{YEAR}".to_string()
            })
            .into_owned(),
        None => t,
    };
    let t = match cached_regex!(r"\b\d+\b") {
        Some(re) => re
            .replace_all(&t, |caps: &regex::Captures<'_>| {
                values.numbers.push(caps[0].to_string());
                "{N}".to_string()
            })
            .into_owned(),
        None => t,
    };

    TemplateKey {
        template: norm(&t),
        values,
    }
}

/// 依次替换占位符；值不够时保留占位符
fn fill_sequential(text: &str, placeholder: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut next = values.iter();
    while let Some(pos) = rest.find(placeholder) {
        out.push_str(&rest[..pos]);
        match next.next() {
            Some(value) => out.push_str(value),
            None => out.push_str(placeholder),
        }
        rest = &rest[pos + placeholder.len()..];
    }
    out.push_str(rest);
    out
}

/// 回填模板翻译
pub fn fill_template(translated: &str, values: &TemplateValues) -> String {
    let t = fill_sequential(translated, "{USERNAME}", &values.owner_usernames);
    let t = fill_sequential(&t, "{YEAR}", &values.years);
    let t = fill_sequential(&t, "{N}", &values.numbers);
    let t = fill_sequential(&t, "@USERNAME", &values.usernames);
    fill_sequential(&t, "(USERNAME)", &values.paren_usernames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_template() {
        let key = build_template_key("John, Owner (john)");
        assert_eq!(key.template, "{USERNAME}, Owner (USERNAME)");
        assert_eq!(key.values.owner_usernames, vec!["John"]);
        assert_eq!(key.values.paren_usernames, vec!["(john)"]);

        let filled = fill_template("{USERNAME}, владелец (USERNAME)", &key.values);
        assert_eq!(filled, "John, владелец (john)");
    }

    #[test]
    fn test_years_before_numbers() {
        let key = build_template_key("12 contributions in 2024");
        assert_eq!(key.template, "{N} contributions in {YEAR}");
        assert_eq!(key.values.years, vec!["2024"]);
        assert_eq!(key.values.numbers, vec!["12"]);
        assert_eq!(fill_template("{N} вкладов в {YEAR}", &key.values), "12 вкладов в 2024");
    }

    #[test]
    fn test_missing_values_keep_placeholder() {
        let key = build_template_key("Mentioned by @octocat");
        assert_eq!(key.template, "Mentioned by @USERNAME");
        assert_eq!(key.values.usernames, vec!["@octocat"]);
        assert_eq!(
            fill_template("@USERNAME и @USERNAME", &key.values),
            "@octocat и @USERNAME"
        );
    }

    #[test]
    fn test_mention_and_paren_keep_markers() {
        let key = build_template_key("Assigned to @alice (bob)");
        assert_eq!(key.template, "Assigned to @USERNAME (USERNAME)");
        assert_eq!(
            fill_template("Назначено @USERNAME (USERNAME)", &key.values),
            "Назначено @alice (bob)"
        );
    }
}
