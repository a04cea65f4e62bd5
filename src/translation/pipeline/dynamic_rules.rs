//! 动态规则
//!
//! 词典无法枚举的短语（计数、日期、用户名前缀）由有序的正则规则处理，
//! 第一条给出结果的规则生效；规则匹配但无法给出结果时继续尝试后续规则。

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::cached_regex;

use super::normalizer::norm;
use super::table::TranslationTable;

/// 俄语复数形式选择
pub fn plural_ru<'a>(n: u64, one: &'a str, few: &'a str, many: &'a str) -> &'a str {
    let nn = n % 100;
    let n1 = nn % 10;
    if (11..20).contains(&nn) {
        return many;
    }
    if (2..5).contains(&n1) {
        return few;
    }
    if n1 == 1 {
        return one;
    }
    many
}

/// 解析带千分位与 k/M 后缀的计数
pub fn parse_count(raw: &str) -> Option<u64> {
    let cleaned = raw.trim().replace(',', "");
    let caps = cached_regex!(r"^(\d+(?:\.\d+)?)([kKmM])?$")?.captures(&cleaned)?;
    let mut num: f64 = caps.get(1)?.as_str().parse().ok()?;
    match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        Some("k") => num *= 1_000.0,
        Some("m") => num *= 1_000_000.0,
        _ => {}
    }
    num.is_finite().then(|| num.round() as u64)
}

/// 英文月份到俄文属格
pub fn month_genitive(month: &str) -> Option<&'static str> {
    let genitive = match month.to_lowercase().as_str() {
        "jan" | "january" => "января",
        "feb" | "february" => "февраля",
        "mar" | "march" => "марта",
        "apr" | "april" => "апреля",
        "may" => "мая",
        "jun" | "june" => "июня",
        "jul" | "july" => "июля",
        "aug" | "august" => "августа",
        "sep" | "sept" | "september" => "сентября",
        "oct" | "october" => "октября",
        "nov" | "november" => "ноября",
        "dec" | "december" => "декабря",
        _ => return None,
    };
    Some(genitive)
}

fn month_token(raw: &str, table: &TranslationTable) -> String {
    table.lookup(raw).unwrap_or(raw).to_string()
}

fn counted(caps: &Captures<'_>, forms: [&str; 3]) -> String {
    let raw = &caps[1];
    let word = match parse_count(raw) {
        Some(n) => plural_ru(n, forms[0], forms[1], forms[2]),
        None => forms[2],
    };
    format!("{} {}", raw, word)
}

fn integer(caps: &Captures<'_>, forms: [&str; 3]) -> String {
    let raw = &caps[1];
    let n = raw.parse::<u64>().unwrap_or(0);
    format!("{} {}", raw, plural_ru(n, forms[0], forms[1], forms[2]))
}

type Render = fn(&Captures<'_>, &TranslationTable) -> Option<String>;

struct DynamicRule {
    pattern: Regex,
    render: Render,
}

fn rule(source: impl Into<String>, render: Render) -> (String, Render) {
    (source.into(), render)
}

const COUNT: &str = r"(\d[\d.,]*[kKmM]?)";

fn rule_sources() -> Vec<(String, Render)> {
    let c = |tail: &str| format!(r"(?i)^{}\s+{}$", COUNT, tail);
    vec![
        rule(
            r"(?i)^([A-Za-z0-9_.-]{2,})\s+had no activity during this period\.?$",
            |m, _| Some(format!("{}: активности за этот период нет", &m[1])),
        ),
        rule(
            r"(?i)^([A-Za-z0-9_.-]{2,})\s+has no activity yet for this period\.?$",
            |m, _| Some(format!("{}: пока нет активности за этот период", &m[1])),
        ),
        rule(
            r"(?i)^([A-Za-z0-9_.-]{2,})\s+doesn't have any public repositories yet\.?$",
            |m, _| Some(format!("{}: пока нет публичных репозиториев", &m[1])),
        ),
        rule(
            r"^([A-Za-z0-9_.-]{2,})\s*[\u{00B7}\u{2022}]$",
            |m, _| Some(format!("{} \u{00B7}", &m[1])),
        ),
        rule(
            r"(?i)^No contributions on\s+([A-Za-z]{3,9})\s+(\d{1,2})(?:st|nd|rd|th)?$",
            |m, _| month_genitive(&m[1]).map(|month| format!("Нет вкладов {} {}", &m[2], month)),
        ),
        rule(
            r"(?i)^Link to social profile\s+(\d+)$",
            |m, _| Some(format!("Ссылка на соцпрофиль {}", &m[1])),
        ),
        rule(c("contributions in the last year"), |m, _| {
            Some(format!("{} за последний год", counted(m, ["вклад", "вклада", "вкладов"])))
        }),
        rule(
            r"(?i)^\u{00A9}\s*(\d{4})\s+GitHub,\s+Inc$",
            |m, _| Some(format!("\u{00A9} {} GitHub, Inc", &m[1])),
        ),
        rule(r"^([A-Za-z]{3,9})\.?\s+(\d{4})$", |m, table| {
            Some(format!("{} {}", month_token(&m[1], table), &m[2]))
        }),
        rule(
            r"^([A-Za-z]{3,9})\s+(\d{1,2})\s*([-\u{2013}\u{2014}])\s*([A-Za-z]{3,9})?\s*(\d{1,2}),\s*(\d{4})$",
            |m, table| {
                let first = month_token(&m[1], table);
                let second_raw = m.get(4).map_or(&m[1], |g| g.as_str());
                let second = month_token(second_raw, table);
                Some(format!(
                    "{} {} {} {} {}, {}",
                    first, &m[2], &m[3], second, &m[5], &m[6]
                ))
            },
        ),
        rule(
            r"(?i)^Contribution activity in\s+(\d{4})$",
            |m, _| Some(format!("Активность за {} год", &m[1])),
        ),
        rule(c("stargazers?"), |m, _| Some(format!("{} звёзд", &m[1]))),
        rule(c("suggestions?"), |m, _| {
            Some(counted(m, ["предложение", "предложения", "предложений"]))
        }),
        rule(c("characters remaining"), |m, _| {
            Some(format!("Осталось {}", counted(m, ["символ", "символа", "символов"])))
        }),
        rule(c("followers?"), |m, _| {
            Some(counted(m, ["подписчик", "подписчика", "подписчиков"]))
        }),
        rule(c("following"), |m, _| {
            Some(counted(m, ["подписка", "подписки", "подписок"]))
        }),
        rule(c("results"), |m, _| Some(format!("{} результатов", &m[1]))),
        rule(c("repositories"), |m, _| {
            Some(counted(m, ["репозиторий", "репозитория", "репозиториев"]))
        }),
        rule(c("remaining"), |m, _| Some(format!("{} осталось", &m[1]))),
        rule(c("updated"), |m, _| Some(format!("{} обновлено", &m[1]))),
        rule(c("Open"), |m, _| Some(format!("{} открыто", &m[1]))),
        rule(c("Closed"), |m, _| Some(format!("{} закрыто", &m[1]))),
        rule(c("account connected"), |m, _| {
            Some(format!("{} аккаунт подключён", &m[1]))
        }),
        rule(c("verified email configured"), |m, _| {
            Some(format!("{} подтверждённый email настроен", &m[1]))
        }),
        rule(format!(r"(?i)^Selected\s+{}\s+repositories$", COUNT), |m, _| {
            Some(format!(
                "Выбрано {}",
                counted(m, ["репозиторий", "репозитория", "репозиториев"])
            ))
        }),
        rule(r"(?i)^at least\s+(\d+)\s+characters$", |m, _| {
            Some(format!("минимум {}", integer(m, ["символ", "символа", "символов"])))
        }),
        rule(r"(?i)^(\d+)\s+days?$", |m, _| {
            Some(integer(m, ["день", "дня", "дней"]))
        }),
        rule(r"(?i)^(\d+)\s+hours?$", |m, _| {
            Some(integer(m, ["час", "часа", "часов"]))
        }),
        rule(r"(?i)^(\d+)\s+weeks?$", |m, _| {
            Some(integer(m, ["неделя", "недели", "недель"]))
        }),
        rule(r"(?i)^(\d+)\s+months?$", |m, _| {
            Some(integer(m, ["месяц", "месяца", "месяцев"]))
        }),
        rule(r"(?i)^In\s+(\d+)\s+minutes?$", |m, _| {
            Some(format!("Через {}", integer(m, ["минуту", "минуты", "минут"])))
        }),
        rule(r"(?i)^In\s+(\d+)\s+hours?$", |m, _| {
            Some(format!("Через {}", integer(m, ["час", "часа", "часов"])))
        }),
    ]
}

fn rules() -> &'static [DynamicRule] {
    static RULES: OnceLock<Vec<DynamicRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        rule_sources()
            .into_iter()
            .filter_map(|(source, render)| match Regex::new(&source) {
                Ok(pattern) => Some(DynamicRule { pattern, render }),
                Err(e) => {
                    tracing::error!("动态规则编译失败 {}: {}", source, e);
                    None
                }
            })
            .collect()
    })
}

/// 依次尝试动态规则
pub fn apply_dynamic_rules(key: &str, table: &TranslationTable) -> Option<String> {
    let t = norm(key);
    if t.is_empty() {
        return None;
    }
    rules().iter().find_map(|rule| {
        rule.pattern
            .captures(&t)
            .and_then(|caps| (rule.render)(&caps, table))
    })
}

// ============================================================================
// 相对时间
// ============================================================================

/// 相对时间的回退翻译（时间元素内的文本）
pub fn relative_time_fallback(raw: &str) -> Option<String> {
    let t = norm(raw);
    let single = match t.to_lowercase().as_str() {
        "just now" => Some("только что"),
        "a minute ago" => Some("минуту назад"),
        "an hour ago" => Some("час назад"),
        "a day ago" => Some("день назад"),
        "a week ago" => Some("неделю назад"),
        "a month ago" => Some("месяц назад"),
        "a year ago" => Some("год назад"),
        "yesterday" => Some("вчера"),
        _ => None,
    };
    if let Some(single) = single {
        return Some(single.to_string());
    }

    let caps = cached_regex!(
        r"(?i)^(\d+)\s+(second|seconds|minute|minutes|hour|hours|day|days|week|weeks|month|months|year|years)\s+ago$"
    )?
    .captures(&t)?;
    let n: u64 = caps[1].parse().ok()?;
    let unit = caps[2].to_lowercase();
    let forms = match unit.trim_end_matches('s') {
        "second" => ["секунду", "секунды", "секунд"],
        "minute" => ["минуту", "минуты", "минут"],
        "hour" => ["час", "часа", "часов"],
        "day" => ["день", "дня", "дней"],
        "week" => ["неделю", "недели", "недель"],
        "month" => ["месяц", "месяца", "месяцев"],
        "year" => ["год", "года", "лет"],
        _ => return None,
    };
    Some(format!(
        "{} {} назад",
        n,
        plural_ru(n, forms[0], forms[1], forms[2])
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> TranslationTable {
        TranslationTable::default()
    }

    #[test]
    fn test_plural_forms() {
        let f = |n| plural_ru(n, "день", "дня", "дней");
        assert_eq!(f(1), "день");
        assert_eq!(f(2), "дня");
        assert_eq!(f(5), "дней");
        assert_eq!(f(11), "дней");
        assert_eq!(f(21), "день");
        assert_eq!(f(22), "дня");
        assert_eq!(f(25), "дней");
        assert_eq!(f(111), "дней");
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,234"), Some(1234));
        assert_eq!(parse_count("1.5k"), Some(1500));
        assert_eq!(parse_count("2M"), Some(2_000_000));
        assert_eq!(parse_count("1.2.3"), None);
    }

    #[test]
    fn test_counted_rules() {
        let table = empty();
        assert_eq!(apply_dynamic_rules("5 days", &table).as_deref(), Some("5 дней"));
        assert_eq!(apply_dynamic_rules("21 followers", &table).as_deref(), Some("21 подписчик"));
        assert_eq!(apply_dynamic_rules("1.2k followers", &table).as_deref(), Some("1.2k подписчиков"));
        assert_eq!(
            apply_dynamic_rules("3 contributions in the last year", &table).as_deref(),
            Some("3 вклада за последний год")
        );
        assert_eq!(
            apply_dynamic_rules("In 1 minute", &table).as_deref(),
            Some("Через 1 минуту")
        );
        assert_eq!(apply_dynamic_rules("12 Open", &table).as_deref(), Some("12 открыто"));
    }

    #[test]
    fn test_month_rules_use_table() {
        let mut dict = crate::translation::storage::Dictionary::new();
        dict.insert("Mar".to_string(), "мар.".to_string());
        let table = TranslationTable::build(&dict, &Default::default(), None);

        assert_eq!(apply_dynamic_rules("Mar 2024", &table).as_deref(), Some("мар. 2024"));
        assert_eq!(
            apply_dynamic_rules("Mar 3 - 9, 2024", &table).as_deref(),
            Some("мар. 3 - мар. 9, 2024")
        );
        assert_eq!(
            apply_dynamic_rules("No contributions on March 3rd", &table).as_deref(),
            Some("Нет вкладов 3 марта")
        );
    }

    #[test]
    fn test_unknown_month_falls_through() {
        assert!(apply_dynamic_rules("No contributions on Smarch 3", &empty()).is_none());
        assert!(apply_dynamic_rules("Sign in", &empty()).is_none());
    }

    #[test]
    fn test_relative_time() {
        assert_eq!(relative_time_fallback("just now").as_deref(), Some("только что"));
        assert_eq!(relative_time_fallback("5 days ago").as_deref(), Some("5 дней назад"));
        assert_eq!(relative_time_fallback("21 years ago").as_deref(), Some("21 год назад"));
        assert_eq!(relative_time_fallback("2 hours ago").as_deref(), Some("2 часа назад"));
        assert!(relative_time_fallback("tomorrow").is_none());
    }
}
