//! 命令行集成测试

use assert_cmd::Command;
use serde_json::Value;

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{dict, BundledFiles, HtmlTestHelper};

/// 指向临时目录的命令；当前目录也放在临时目录，避免读到其他配置文件
fn octoru(files: &BundledFiles) -> Command {
    let mut cmd = Command::cargo_bin("octoru").unwrap();
    cmd.current_dir(files.dir.path())
        .env_remove("RUST_LOG")
        .env("OCTORU_LOG_LEVEL", "warn")
        .env("OCTORU_STORE_PATH", files.store_path())
        .env("OCTORU_BUNDLED_DICT", files.dict_path())
        .env("OCTORU_BUNDLED_META", files.meta_path());
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_env_docs_lists_variables() {
    let files = BundledFiles::new();
    let output = octoru(&files).arg("env-docs").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("OCTORU_STORE_PATH"));
    assert!(text.contains("OCTORU_BUNDLED_DICT"));
}

#[test]
fn test_init_config_writes_file() {
    let files = BundledFiles::new();
    let path = files.dir.path().join("generated.toml");
    octoru(&files)
        .arg("init-config")
        .arg(&path)
        .assert()
        .success();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("store_path"));
}

#[test]
fn test_reconcile_then_settings() {
    let files = BundledFiles::new();
    files.write(&dict(&[("Issues", "Задачи")]), "2024.06");

    let output = octoru(&files).arg("reconcile").output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["changed"], Value::Bool(true));

    let output = octoru(&files)
        .args(["settings", "--set", "glossaryMode=true"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let reply = stdout_json(&output);
    assert_eq!(reply["settings"]["glossaryMode"], Value::Bool(true));
    assert_eq!(reply["effectiveTranslations"]["Issues"], "Задачи");
}

#[test]
fn test_unknown_setting_fails() {
    let files = BundledFiles::new();
    files.write(&dict(&[("Issues", "Задачи")]), "1");
    let output = octoru(&files)
        .args(["settings", "--set", "noSuchFlag=true"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown_setting"));
}

#[test]
fn test_translate_saved_page() {
    let files = BundledFiles::new();
    files.write(
        &dict(&[("Issues", "Задачи"), ("Pull requests", "Запросы на слияние")]),
        "1",
    );
    let input = files.dir.path().join("page.html");
    let output_path = files.dir.path().join("page.ru.html");
    std::fs::write(&input, HtmlTestHelper::create_repo_page()).unwrap();

    octoru(&files)
        .arg("translate")
        .arg(&input)
        .args(["--url", "https://github.com/octocat/hello-world", "-o"])
        .arg(&output_path)
        .assert()
        .success();

    let html = std::fs::read_to_string(&output_path).unwrap();
    assert!(html.contains("Задачи"));
    assert!(html.contains("Запросы на слияние"));
    assert!(html.contains("Issues are fixed in the next release."));
}

#[test]
fn test_untranslated_on_empty_store() {
    let files = BundledFiles::new();
    let output = octoru(&files).arg("untranslated").output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["list"], serde_json::json!([]));
}
