//! 词典协调集成测试
//!
//! 使用文件中的内置词典与 redb 存储，覆盖全新安装、旧版迁移和版本更新

use std::sync::Arc;

use serde_json::json;

use octoru::translation::storage::{
    keys, FileBundledSource, KvStore, RedbStore, Scope, StoreService,
};
use octoru::translation::StoreRequest;
use octoru::translation::StoreResponse;

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{dict, numbered_dict, BundledFiles};

fn open(files: &BundledFiles) -> StoreService<RedbStore> {
    let config = files.config();
    let store = RedbStore::open(&config.store_path()).unwrap();
    let source = Arc::new(FileBundledSource::new(
        config.bundled_dict_path(),
        config.bundled_meta_path(),
    ));
    StoreService::new(store, source, config)
}

async fn user_and_effective(
    service: &StoreService<RedbStore>,
) -> (octoru::translation::Dictionary, octoru::translation::Dictionary) {
    match service.handle(StoreRequest::GetSettings).await.unwrap() {
        StoreResponse::Settings {
            custom_translations,
            effective_translations,
            ..
        } => (custom_translations, effective_translations),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_fresh_install_uses_bundled_dictionary() {
    let files = BundledFiles::new();
    let bundled = numbered_dict("Phrase", 0..100);
    files.write(&bundled, "2024.06");

    let service = open(&files);
    assert!(service.on_startup().await.unwrap());

    let (user, effective) = user_and_effective(&service).await;
    assert!(user.is_empty());
    assert_eq!(effective, bundled);
    assert_eq!(
        service.store().get(Scope::Local, keys::BUNDLED_VERSION).unwrap(),
        Some(json!("2024.06"))
    );

    // 再次启动没有变化
    assert!(!service.on_startup().await.unwrap());
}

#[tokio::test]
async fn test_customized_legacy_dictionary_keeps_only_unknown_keys() {
    let files = BundledFiles::new();
    // 内置 100 条，其中 80 条与旧词典逐字相同
    let mut bundled = numbered_dict("Phrase", 0..80);
    bundled.extend(numbered_dict("Fresh", 0..20));
    files.write(&bundled, "2024.06");

    // 旧版只有合并后的 150 条：80 条内置 + 70 条用户编写
    let mut legacy = numbered_dict("Phrase", 0..80);
    legacy.extend(numbered_dict("Custom", 0..70));
    assert_eq!(legacy.len(), 150);

    let service = open(&files);
    service
        .store()
        .set(
            Scope::Local,
            keys::EFFECTIVE_DICT,
            serde_json::to_value(&legacy).unwrap(),
        )
        .unwrap();

    assert!(service.on_startup().await.unwrap());
    let (user, effective) = user_and_effective(&service).await;
    assert_eq!(user, numbered_dict("Custom", 0..70));
    assert_eq!(effective.len(), 170);
}

#[tokio::test]
async fn test_user_edits_survive_bundled_update() {
    let files = BundledFiles::new();
    files.write(&dict(&[("Save", "Сохранить"), ("Close", "Закрыть")]), "1");

    let service = open(&files);
    service.on_startup().await.unwrap();
    let reply = service
        .handle_json(json!({
            "type": "ghruSaveSettings",
            "settings": {"enabled": true},
            "customTranslations": {"Close": "Закрыть окно", "Mine": "Моё"}
        }))
        .await;
    assert_eq!(reply, json!({"ok": true}));

    // 新版本改了一条译文、删了一条、加了一条
    files.write(
        &dict(&[("Save", "Записать"), ("Delete", "Удалить")]),
        "2",
    );
    let reply = service
        .handle_json(json!({"type": "ghruPersistBundledDict"}))
        .await;
    assert_eq!(reply, json!({"ok": true, "changed": true}));

    let (user, effective) = user_and_effective(&service).await;
    assert_eq!(user, dict(&[("Close", "Закрыть окно"), ("Mine", "Моё")]));
    assert_eq!(
        effective,
        dict(&[
            ("Close", "Закрыть окно"),
            ("Delete", "Удалить"),
            ("Mine", "Моё"),
            ("Save", "Записать"),
        ])
    );
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let files = BundledFiles::new();
    files.write(&dict(&[("Save", "Сохранить")]), "1");
    {
        let service = open(&files);
        service
            .handle_json(json!({"type": "ghruReportUntranslated", "items": ["Marketplace"]}))
            .await;
    }
    let service = open(&files);
    let reply = service.handle_json(json!({"type": "ghruGetUntranslated"})).await;
    assert_eq!(reply, json!({"ok": true, "list": ["Marketplace"]}));
}

#[tokio::test]
async fn test_missing_bundled_file_does_not_break_requests() {
    let files = BundledFiles::new();
    let service = open(&files);
    let state = service.handle_json(json!({"type": "ghruGetState"})).await;
    assert_eq!(state["ok"], json!(true));
    assert_eq!(state["effectiveTranslations"], json!({}));

    let reply = service.handle_json(json!({"type": "ghruPersistBundledDict"})).await;
    assert_eq!(reply, json!({"ok": true, "changed": false}));
}
