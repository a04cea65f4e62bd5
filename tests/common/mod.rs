// 集成测试公共模块
//
// 提供测试辅助工具和共享功能

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use octoru::translation::storage::{
    BundledSource, Dictionary, MemoryStore, StaticBundledSource, StoreService,
};
use octoru::translation::OverlayConfig;

/// 由键值对构建词典
pub fn dict(pairs: &[(&str, &str)]) -> Dictionary {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// 生成 `count` 条 `prefix N -> перевод N`
pub fn numbered_dict(prefix: &str, range: std::ops::Range<usize>) -> Dictionary {
    range
        .map(|i| (format!("{} {}", prefix, i), format!("перевод {}", i)))
        .collect()
}

/// 内存存储上的服务
pub fn memory_service(bundled: Dictionary, version: &str) -> Arc<StoreService<MemoryStore>> {
    let source: Arc<dyn BundledSource> = Arc::new(StaticBundledSource::new(bundled, version));
    Arc::new(
        StoreService::new(MemoryStore::new(), source, OverlayConfig::default())
            .with_default_audit_urls(Vec::new()),
    )
}

/// 带内置词典文件的临时目录
pub struct BundledFiles {
    pub dir: TempDir,
}

impl BundledFiles {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn dict_path(&self) -> PathBuf {
        self.dir.path().join("bundled-dictionary.json")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.path().join("dict-version.json")
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("store").join("octoru.redb")
    }

    /// 写入词典与元数据
    pub fn write(&self, dictionary: &Dictionary, version: &str) {
        std::fs::write(self.dict_path(), serde_json::to_string(dictionary).unwrap()).unwrap();
        std::fs::write(
            self.meta_path(),
            json!({"version": version, "keys": dictionary.len(), "builtAt": "2024-06-01T00:00:00Z"})
                .to_string(),
        )
        .unwrap();
    }

    /// 指向本目录的运行参数
    pub fn config(&self) -> OverlayConfig {
        OverlayConfig {
            store_path: path_string(&self.store_path()),
            bundled_dict_path: path_string(&self.dict_path()),
            bundled_meta_path: path_string(&self.meta_path()),
            ..OverlayConfig::default()
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// 测试页面
pub struct HtmlTestHelper;

impl HtmlTestHelper {
    /// 已登录用户的仓库页面：导航、标签页与一段用户撰写的评论
    pub fn create_repo_page() -> String {
        r#"<!DOCTYPE html>
<html>
<head>
  <meta name="user-login" content="octocat">
  <title>octocat/hello-world</title>
</head>
<body>
  <header>
    <a href="/login">Sign in</a>
  </header>
  <nav>
    <a href="/octocat/hello-world/issues">Issues</a>
    <a href="/octocat/hello-world/pulls">Pull requests</a>
    <a href="/marketplace">Marketplace</a>
  </nav>
  <div class="comment-body markdown-body">
    <p>Issues are fixed in the next release.</p>
  </div>
</body>
</html>"#
            .to_string()
    }

    pub fn create_simple_nav_page() -> String {
        "<html><body><nav><span>Issues</span></nav></body></html>".to_string()
    }
}
