//! 词典与协调
//!
//! 有效词典 = 内置词典 ∪ 用户覆盖，覆盖优先。内置词典随版本更新，
//! 协调过程保证用户编辑不会丢失；旧版只保存了合并词典的安装会从中推导出用户覆盖。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::translation::config::constants;
use crate::translation::error::{TranslationError, TranslationResult};

/// 源短语到译文
pub type Dictionary = BTreeMap<String, String>;

/// 清洗存储或外部传入的词典：只保留非空字符串键值，首尾空白去掉
pub fn normalize_dictionary(value: Option<&Value>) -> Dictionary {
    let Some(Value::Object(map)) = value else {
        return Dictionary::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let key = k.trim();
            let value = v.as_str()?.trim();
            (!key.is_empty() && !value.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

pub fn dictionary_to_value(dict: &Dictionary) -> Value {
    Value::Object(
        dict.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

// ============================================================================
// 协调
// ============================================================================

/// 存储中与词典相关的现状
#[derive(Debug, Clone, Default)]
pub struct PersistedDictionaries {
    pub effective: Dictionary,
    pub user: Dictionary,
    pub snapshot: Dictionary,
    pub version: Option<String>,
}

/// 协调结果：新的用户覆盖与有效词典，以及需要写回的部分
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub user: Dictionary,
    pub effective: Dictionary,
    pub write_snapshot: bool,
    pub user_changed: bool,
    pub effective_changed: bool,
}

impl Reconciliation {
    /// 页面需要重新加载词典
    pub fn changed(&self) -> bool {
        self.user_changed || self.effective_changed
    }
}

/// 从旧版合并词典推导用户覆盖
///
/// 有快照时与快照比较；没有快照但条目多于阈值时视为改过的内置词典，
/// 只保留内置词典中没有的键；否则整个词典都算作用户编写。
pub fn derive_user_overrides(
    legacy: &Dictionary,
    snapshot: &Dictionary,
    bundled: &Dictionary,
    threshold: usize,
) -> Dictionary {
    if !snapshot.is_empty() {
        legacy
            .iter()
            .filter(|(k, v)| snapshot.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    } else if legacy.len() > threshold {
        legacy
            .iter()
            .filter(|(k, _)| !bundled.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    } else {
        legacy.clone()
    }
}

/// 把内置词典与存储现状协调为新的有效词典
pub fn reconcile(
    bundled: &Dictionary,
    version: &str,
    persisted: &PersistedDictionaries,
    threshold: usize,
) -> Reconciliation {
    let user = if persisted.user.is_empty() && !persisted.effective.is_empty() {
        derive_user_overrides(&persisted.effective, &persisted.snapshot, bundled, threshold)
    } else {
        persisted.user.clone()
    };

    let mut effective = bundled.clone();
    effective.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));

    let version_changed = persisted.version.as_deref() != Some(version);
    Reconciliation {
        write_snapshot: persisted.snapshot != *bundled || version_changed,
        user_changed: user != persisted.user,
        effective_changed: effective != persisted.effective,
        user,
        effective,
    }
}

// ============================================================================
// 内置词典来源
// ============================================================================

/// 内置词典的元数据文件
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledMeta {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub keys: Option<usize>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub built_at: Option<String>,
}

/// 内置词典的来源
pub trait BundledSource: Send + Sync {
    fn load_dictionary(&self) -> TranslationResult<Dictionary>;

    /// 当前版本；读取失败时沿用上一次成功的版本
    fn load_version(&self) -> String;
}

/// 从文件读取内置词典
pub struct FileBundledSource {
    dict_path: PathBuf,
    meta_path: PathBuf,
    last_version: Mutex<String>,
}

impl FileBundledSource {
    pub fn new(dict_path: PathBuf, meta_path: PathBuf) -> Self {
        Self {
            dict_path,
            meta_path,
            last_version: Mutex::new(constants::DEFAULT_BUNDLED_VERSION.to_string()),
        }
    }

    fn read_meta(&self) -> TranslationResult<BundledMeta> {
        let text = std::fs::read_to_string(&self.meta_path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl BundledSource for FileBundledSource {
    fn load_dictionary(&self) -> TranslationResult<Dictionary> {
        let text = std::fs::read_to_string(&self.dict_path).map_err(|e| {
            TranslationError::DictionaryError(format!(
                "读取内置词典失败 {}: {}",
                self.dict_path.display(),
                e
            ))
        })?;
        let value: Value = serde_json::from_str(&text)?;
        if !value.is_object() {
            return Err(TranslationError::DictionaryError(
                "内置词典必须是 JSON 对象".to_string(),
            ));
        }
        let dict = normalize_dictionary(Some(&value));

        if let Ok(BundledMeta { keys: Some(keys), .. }) = self.read_meta() {
            if keys != dict.len() {
                tracing::warn!("内置词典条目数 {} 与元数据 {} 不一致", dict.len(), keys);
            }
        }
        Ok(dict)
    }

    fn load_version(&self) -> String {
        let mut last = match self.last_version.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.read_meta() {
            Ok(meta) if !meta.version.trim().is_empty() => {
                *last = meta.version.trim().to_string();
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("读取词典版本失败，沿用 {}: {}", *last, e),
        }
        last.clone()
    }
}

/// 内存中的内置词典
#[derive(Debug, Clone, Default)]
pub struct StaticBundledSource {
    pub dictionary: Dictionary,
    pub version: String,
}

impl StaticBundledSource {
    pub fn new(dictionary: Dictionary, version: impl Into<String>) -> Self {
        Self {
            dictionary,
            version: version.into(),
        }
    }
}

impl BundledSource for StaticBundledSource {
    fn load_dictionary(&self) -> TranslationResult<Dictionary> {
        Ok(self.dictionary.clone())
    }

    fn load_version(&self) -> String {
        self.version.clone()
    }
}
