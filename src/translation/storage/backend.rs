//! 键值存储后端
//!
//! 两个作用域：`sync` 保存少量设置，`local` 保存词典与遥测账本。
//! 值一律是 JSON；账本按"读取、合并、整体写回"的方式更新，不做局部写。

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, TableDefinition};
use serde_json::Value;

use crate::translation::error::helpers::storage_error;
use crate::translation::error::TranslationResult;

/// 持久化键名
pub mod keys {
    // sync
    pub const SETTINGS: &str = "ghru_settings_v2";
    pub const MIGRATED: &str = "ghru_migrated_v2";
    pub const LEGACY_CUSTOM_TRANSLATIONS: &str = "customTranslations";

    // local
    pub const EFFECTIVE_DICT: &str = "ghru_custom_dict_v2";
    pub const USER_DICT: &str = "ghru_user_custom_dict_v1";
    pub const UNTRANSLATED: &str = "ghru_untranslated_v2";
    pub const LEGACY_UNTRANSLATED: &str = "ghru_untranslated";
    pub const COVERAGE: &str = "ghru_coverage_v1";
    pub const COLLECTOR_DEBUG: &str = "ghru_collector_debug_v1";
    pub const BUNDLED_VERSION: &str = "ghru_bundled_dict_version_v1";
    pub const BUNDLED_SNAPSHOT: &str = "ghru_bundled_dict_snapshot_v1";
}

/// 存储作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Sync,
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Sync => "sync",
            Scope::Local => "local",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 键值存储
///
/// `set_many` 必须原子地写入全部条目。
pub trait KvStore: Send + Sync {
    fn get(&self, scope: Scope, key: &str) -> TranslationResult<Option<Value>>;

    fn set_many(&self, scope: Scope, entries: Vec<(&str, Value)>) -> TranslationResult<()>;

    fn remove(&self, scope: Scope, keys: &[&str]) -> TranslationResult<()>;

    fn set(&self, scope: Scope, key: &str, value: Value) -> TranslationResult<()> {
        self.set_many(scope, vec![(key, value)])
    }
}

// ============================================================================
// 内存后端
// ============================================================================

/// 进程内存储（测试与一次性运行）
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<(Scope, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TranslationResult<std::sync::MutexGuard<'_, HashMap<(Scope, String), Value>>> {
        self.data
            .lock()
            .map_err(|_| storage_error("内存存储锁已中毒"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, scope: Scope, key: &str) -> TranslationResult<Option<Value>> {
        Ok(self.lock()?.get(&(scope, key.to_string())).cloned())
    }

    fn set_many(&self, scope: Scope, entries: Vec<(&str, Value)>) -> TranslationResult<()> {
        let mut data = self.lock()?;
        for (key, value) in entries {
            data.insert((scope, key.to_string()), value);
        }
        Ok(())
    }

    fn remove(&self, scope: Scope, keys: &[&str]) -> TranslationResult<()> {
        let mut data = self.lock()?;
        for key in keys {
            data.remove(&(scope, key.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// redb 后端
// ============================================================================

const SYNC_TABLE: TableDefinition<&str, &str> = TableDefinition::new("sync");
const LOCAL_TABLE: TableDefinition<&str, &str> = TableDefinition::new("local");

fn table_for(scope: Scope) -> TableDefinition<'static, &'static str, &'static str> {
    match scope {
        Scope::Sync => SYNC_TABLE,
        Scope::Local => LOCAL_TABLE,
    }
}

/// 基于 redb 的持久化存储：每个作用域一张表，值为 JSON 文本
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// 打开或创建存储文件
    pub fn open(path: &Path) -> TranslationResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;
        tracing::info!("存储已打开: {}", path.display());
        Ok(Self { db })
    }
}

impl KvStore for RedbStore {
    fn get(&self, scope: Scope, key: &str) -> TranslationResult<Option<Value>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(table_for(scope)) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(raw) = table.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(raw.value()) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("存储值损坏 {}/{}: {}", scope, key, e);
                Ok(None)
            }
        }
    }

    fn set_many(&self, scope: Scope, entries: Vec<(&str, Value)>) -> TranslationResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(table_for(scope))?;
            for (key, value) in &entries {
                let text = serde_json::to_string(value)?;
                table.insert(*key, text.as_str())?;
            }
        }
        txn.commit()?;
        tracing::debug!("写入 {} 个键到 {}", entries.len(), scope);
        Ok(())
    }

    fn remove(&self, scope: Scope, keys: &[&str]) -> TranslationResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(table_for(scope))?;
            for key in keys {
                table.remove(*key)?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get(Scope::Local, "a").unwrap(), None);
        store
            .set_many(Scope::Local, vec![("a", json!([1, 2])), ("b", json!({"x": "y"}))])
            .unwrap();
        store.set(Scope::Sync, "a", json!(true)).unwrap();
        assert_eq!(store.get(Scope::Local, "a").unwrap(), Some(json!([1, 2])));
        assert_eq!(store.get(Scope::Sync, "a").unwrap(), Some(json!(true)));

        store.remove(Scope::Local, &["a", "missing"]).unwrap();
        assert_eq!(store.get(Scope::Local, "a").unwrap(), None);
        assert_eq!(store.get(Scope::Local, "b").unwrap(), Some(json!({"x": "y"})));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_redb_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            exercise(&store);
        }
        let reopened = RedbStore::open(&path).unwrap();
        assert_eq!(reopened.get(Scope::Local, "b").unwrap(), Some(json!({"x": "y"})));
        assert_eq!(reopened.get(Scope::Sync, "missing").unwrap(), None);
    }
}
