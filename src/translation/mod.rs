//! 翻译模块
//!
//! 分为两侧：
//! - **pipeline**: 页面侧，规范化、分类、解析译文并同步到活动文档
//! - **storage**: 存储侧，词典协调、遥测账本与自动巡检
//! - **messages**: 两侧之间的消息协议
//! - **config**: 用户开关与运行参数
//! - **error**: 错误类型
//!
//! # 基本用法
//!
//! ```rust,no_run
//! use octoru::parsers::LiveDocument;
//! use octoru::translation::{translate_document, Dictionary, OverlayConfig, Settings};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = LiveDocument::parse("<html><body><button>Save</button></body></html>")?;
//! let mut dict = Dictionary::new();
//! dict.insert("Save".to_string(), "Сохранить".to_string());
//!
//! translate_document(&doc, &dict, Settings::default(), "https://github.com/", &OverlayConfig::default())?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// 子模块声明
// ============================================================================

/// 用户开关、运行参数与常量
pub mod config;

/// 统一的错误类型和统计
pub mod error;

/// 页面与存储之间的消息
pub mod messages;

/// 页面侧翻译管道
pub mod pipeline;

/// 存储侧服务
pub mod storage;

// ============================================================================
// 重新导出
// ============================================================================

pub use config::{constants, ConfigManager, OverlayConfig, Settings};
pub use error::{ErrorCategory, ErrorSeverity, ErrorStats, TranslationError, TranslationResult};
pub use messages::{PageMessage, PageRequest, PageResponse, StoreRequest, StoreResponse};
pub use pipeline::{
    PageAgent, PageContext, PageEvent, PipelineOptions, Resolver, Section, StoreClient,
    Synchronizer, TranslationTable,
};
pub use storage::{
    BundledSource, CoverageSummary, DebugLedger, Dictionary, FileBundledSource, KvStore,
    MemoryStore, RedbStore, StaticBundledSource, StoreService,
};

use crate::parsers::LiveDocument;

// ============================================================================
// 便捷函数
// ============================================================================

/// 对一份静态页面做一次完整翻译
///
/// 不观察变更，也不发送遥测；返回的同步器保留了原值，可用于还原，
/// 其遥测缓冲中是本次发现的未翻译条目。
pub fn translate_document(
    doc: &LiveDocument,
    dictionary: &Dictionary,
    settings: Settings,
    location: &str,
    config: &OverlayConfig,
) -> TranslationResult<Synchronizer> {
    let body = doc
        .body()
        .ok_or_else(|| TranslationError::InvalidInput("missing_body 文档没有 body".to_string()))?;

    let options = PipelineOptions::from(config);
    let table = TranslationTable::build(dictionary, &Dictionary::new(), None);
    let mut sync = Synchronizer::new(
        settings,
        Resolver::new(table),
        options.limits,
        options.timers,
        PageContext::new(location),
    );

    if sync.settings().enabled {
        sync.translate_subtree(doc, &body);
    }
    tracing::info!(
        "页面翻译完成: {} 处写入, {} 条未翻译",
        doc.pending_records(),
        sync.telemetry().pending_untranslated().len()
    );
    Ok(sync)
}
