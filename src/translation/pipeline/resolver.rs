//! 翻译解析
//!
//! 查找顺序：带分区前缀的键与裸键（精确后忽略大小写），然后是动态规则，
//! 最后是模板键。

use super::context::Section;
use super::dynamic_rules::apply_dynamic_rules;
use super::normalizer::{is_likely_technical_text, norm, split_punctuation};
use super::table::TranslationTable;
use super::template::{build_template_key, fill_template};

/// 基于翻译表的解析器
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    table: TranslationTable,
}

impl Resolver {
    pub fn new(table: TranslationTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TranslationTable {
        &self.table
    }

    fn candidates(key: &str, section: Section) -> [String; 3] {
        [
            format!("[{}] {}", section, key),
            format!("{}:{}", section, key),
            key.to_string(),
        ]
    }

    /// 查找短语的译文
    pub fn lookup(&self, phrase: &str, section: Section) -> Option<String> {
        let key = norm(phrase);
        if key.is_empty() {
            return None;
        }
        let candidates = Self::candidates(&key, section);

        if let Some(hit) = candidates.iter().find_map(|c| self.table.lookup(c)) {
            return Some(hit.to_string());
        }
        if let Some(dynamic) = apply_dynamic_rules(&key, &self.table) {
            return Some(dynamic);
        }
        candidates.iter().find_map(|c| self.lookup_template(c))
    }

    fn lookup_template(&self, key: &str) -> Option<String> {
        let template = build_template_key(key);
        if template.template.is_empty() || template.template == key {
            return None;
        }
        self.table
            .lookup(&template.template)
            .map(|translated| fill_template(translated, &template.values))
    }

    /// 翻译并保留首尾空白与结尾标点
    ///
    /// 技术文本或已是俄文的文本返回 `None`。
    pub fn translate_keeping_punctuation(&self, raw: &str, section: Section) -> Option<String> {
        let split = split_punctuation(raw)?;
        let core = &raw[split.leading.len()..raw.len() - split.trailing.len()];
        if is_likely_technical_text(core) {
            return None;
        }
        let translated = self.lookup(split.base, section)?;
        Some(format!(
            "{}{}{}{}",
            split.leading, translated, split.punct, split.trailing
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::storage::Dictionary;

    fn resolver(pairs: &[(&str, &str)]) -> Resolver {
        let dict: Dictionary = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Resolver::new(TranslationTable::build(&dict, &Dictionary::new(), None))
    }

    #[test]
    fn test_section_prefixed_keys_win() {
        let r = resolver(&[
            ("New", "Новый"),
            ("[issues] New", "Новая задача"),
            ("pr:New", "Новый запрос"),
        ]);
        assert_eq!(r.lookup("New", Section::Issues).as_deref(), Some("Новая задача"));
        assert_eq!(r.lookup("New", Section::Pr).as_deref(), Some("Новый запрос"));
        assert_eq!(r.lookup("new", Section::Other).as_deref(), Some("Новый"));
    }

    #[test]
    fn test_dynamic_before_template() {
        let r = resolver(&[("{N} days", "дни: {N}")]);
        assert_eq!(r.lookup("5 days", Section::Other).as_deref(), Some("5 дней"));
    }

    #[test]
    fn test_template_lookup() {
        let r = resolver(&[
            ("{USERNAME}, Owner (USERNAME)", "{USERNAME}, владелец (USERNAME)"),
            ("Mentioned by @USERNAME", "Упомянут @USERNAME"),
        ]);
        assert_eq!(
            r.lookup("John, Owner (john)", Section::Other).as_deref(),
            Some("John, владелец (john)")
        );
        assert_eq!(
            r.lookup("Mentioned by @octocat", Section::Other).as_deref(),
            Some("Упомянут @octocat")
        );
    }

    #[test]
    fn test_keeping_punctuation() {
        let r = resolver(&[("Sign in", "Войти")]);
        assert_eq!(
            r.translate_keeping_punctuation("  Sign in...\n", Section::Other).as_deref(),
            Some("  Войти...\n")
        );
        assert!(r.translate_keeping_punctuation("Войти", Section::Other).is_none());
        assert!(r.translate_keeping_punctuation("git status", Section::Other).is_none());
        assert!(r.translate_keeping_punctuation("Unknown", Section::Other).is_none());
    }
}
