//! 命令行入口
//!
//! 在本地存储上执行存储侧的维护操作，或对保存下来的页面做一次翻译。

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use octoru::env::generate_env_docs;
use octoru::logging::init_tracing;
use octoru::parsers::{serialize_document, LiveDocument};
use octoru::translation::config::load_overlay_config;
use octoru::translation::{
    translate_document, BundledSource, ConfigManager, Dictionary, FileBundledSource,
    OverlayConfig, RedbStore, Settings, StoreRequest, StoreResponse, StoreService,
    TranslationResult,
};
use octoru::translation::error::helpers::internal_error;

#[derive(Parser, Debug)]
#[command(name = "octoru", version, about = "GitHub 俄文翻译覆盖层的本地工具")]
struct Cli {
    /// 配置文件路径（默认按搜索路径查找）
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 覆盖存储文件路径
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 翻译一个保存下来的页面
    Translate {
        input: PathBuf,
        /// 页面原始地址，决定分区与作用域
        #[arg(long, default_value = "https://github.com/")]
        url: String,
        /// 输出文件，缺省写到标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 将内置词典与存储协调
    Reconcile,
    /// 显示覆盖率汇总
    Coverage,
    /// 显示或维护未翻译列表
    Untranslated {
        #[arg(long, conflicts_with = "clear")]
        prune: bool,
        #[arg(long)]
        clear: bool,
    },
    /// 显示或清空收集器调试账本
    Debug {
        #[arg(long)]
        clear: bool,
    },
    /// 显示设置，或用 name=value 修改
    Settings {
        #[arg(long = "set", value_name = "NAME=VALUE")]
        assignments: Vec<String>,
    },
    /// 输出环境变量文档
    EnvDocs,
    /// 生成示例配置文件
    InitConfig {
        #[arg(default_value = "octoru.toml")]
        path: String,
    },
}

fn load_config(cli: &Cli) -> TranslationResult<OverlayConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigManager::from_file(path)?.into_config(),
        None => load_overlay_config(),
    };
    if let Some(store) = &cli.store {
        config.store_path = store.to_string_lossy().into_owned();
    }
    Ok(config)
}

fn bundled_source(config: &OverlayConfig) -> Arc<FileBundledSource> {
    Arc::new(FileBundledSource::new(
        config.bundled_dict_path(),
        config.bundled_meta_path(),
    ))
}

fn open_service(config: &OverlayConfig) -> TranslationResult<StoreService<RedbStore>> {
    let store = RedbStore::open(&config.store_path())?;
    Ok(StoreService::new(store, bundled_source(config), config.clone()))
}

fn print_json(value: &Value) -> TranslationResult<()> {
    let text = serde_json::to_string_pretty(value)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    Ok(())
}

async fn request(service: &StoreService<RedbStore>, request: StoreRequest) -> TranslationResult<()> {
    let response = service.handle(request).await?;
    print_json(&response.to_json())
}

/// 词典与设置：存储中有就用存储的，否则直接读内置词典
async fn page_inputs(config: &OverlayConfig) -> TranslationResult<(Dictionary, Settings)> {
    if config.store_path().exists() {
        let service = open_service(config)?;
        if let StoreResponse::Settings {
            settings,
            effective_translations,
            ..
        } = service.handle(StoreRequest::GetSettings).await?
        {
            if !effective_translations.is_empty() {
                return Ok((effective_translations, settings));
            }
        }
    }
    let dictionary = bundled_source(config).load_dictionary()?;
    Ok((dictionary, Settings::default()))
}

async fn translate(
    config: &OverlayConfig,
    input: &Path,
    url: &str,
    output: Option<&Path>,
) -> TranslationResult<()> {
    let data = fs::read(input)?;
    let doc = LiveDocument::from_bytes(&data, "utf-8")?;
    let (dictionary, settings) = page_inputs(config).await?;
    tracing::info!("使用 {} 条译文翻译 {}", dictionary.len(), input.display());

    let sync = translate_document(&doc, &dictionary, settings, url, config)?;
    let untranslated = sync.telemetry().pending_untranslated().len();

    let bytes = serialize_document(&doc, "utf-8")?;
    match output {
        Some(path) => fs::write(path, bytes)?,
        None => io::stdout().lock().write_all(&bytes)?,
    }
    if untranslated > 0 {
        tracing::info!("发现 {} 条未翻译文本", untranslated);
    }
    Ok(())
}

async fn run(cli: Cli) -> TranslationResult<()> {
    match &cli.command {
        Command::EnvDocs => {
            print!("{}", generate_env_docs());
            return Ok(());
        }
        Command::InitConfig { path } => {
            ConfigManager::generate_example_config(path)?;
            println!("示例配置已写入 {}", path);
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    match cli.command {
        Command::Translate { input, url, output } => {
            translate(&config, &input, &url, output.as_deref()).await
        }
        Command::Reconcile => {
            let service = open_service(&config)?;
            service.ensure_defaults()?;
            let changed = service.ensure_bundled()?;
            print_json(&json!({"ok": true, "changed": changed}))
        }
        Command::Coverage => request(&open_service(&config)?, StoreRequest::GetCoverage).await,
        Command::Untranslated { prune, clear } => {
            let service = open_service(&config)?;
            let req = if prune {
                StoreRequest::PruneUntranslated
            } else if clear {
                StoreRequest::ClearUntranslated
            } else {
                StoreRequest::GetUntranslated
            };
            request(&service, req).await
        }
        Command::Debug { clear } => {
            let service = open_service(&config)?;
            let req = if clear {
                StoreRequest::ClearCollectorDebug
            } else {
                StoreRequest::GetCollectorDebug
            };
            request(&service, req).await
        }
        Command::Settings { assignments } => {
            let service = open_service(&config)?;
            if !assignments.is_empty() {
                let StoreResponse::Settings { mut settings, .. } =
                    service.handle(StoreRequest::GetSettings).await?
                else {
                    return Err(internal_error("unexpected_response"));
                };
                for assignment in &assignments {
                    settings.apply_assignment(assignment)?;
                }
                service
                    .handle(StoreRequest::SaveSettings {
                        settings: settings.to_value(),
                        custom_translations: None,
                    })
                    .await?;
            }
            request(&service, StoreRequest::GetSettings).await
        }
        Command::EnvDocs | Command::InitConfig { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
