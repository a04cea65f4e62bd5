//! 翻译表
//!
//! 由内置词典、用户（有效）词典以及可选的术语表按顺序合并，后者覆盖前者。
//! 维护精确索引与小写索引两份映射。

use std::collections::HashMap;

use crate::translation::storage::Dictionary;

use super::normalizer::{is_broken_translation_value, norm};

/// 合并后的翻译表
#[derive(Debug, Clone, Default)]
pub struct TranslationTable {
    exact: HashMap<String, String>,
    lower: HashMap<String, String>,
}

impl TranslationTable {
    /// 依次合并词典来源
    ///
    /// 键先规范化；空键和损坏的值被跳过。术语表只在开启术语模式时传入。
    pub fn build(bundled: &Dictionary, custom: &Dictionary, glossary: Option<&Dictionary>) -> Self {
        let mut table = Self::default();
        let sources = [Some(bundled), Some(custom), glossary];
        for source in sources.into_iter().flatten() {
            table.extend(source);
        }
        tracing::debug!("翻译表已构建: {} 条", table.len());
        table
    }

    fn extend(&mut self, source: &Dictionary) {
        for (raw_key, value) in source {
            let key = norm(raw_key);
            if key.is_empty() || is_broken_translation_value(value) {
                continue;
            }
            self.lower.insert(key.to_lowercase(), value.clone());
            self.exact.insert(key, value.clone());
        }
    }

    /// 精确查找（键已规范化）
    pub fn get(&self, key: &str) -> Option<&str> {
        self.exact.get(key).map(String::as_str)
    }

    /// 忽略大小写查找
    pub fn get_ci(&self, key: &str) -> Option<&str> {
        self.lower.get(&key.to_lowercase()).map(String::as_str)
    }

    /// 先精确后忽略大小写
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.get(key).or_else(|| self.get_ci(key))
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}
