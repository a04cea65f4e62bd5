//! 页面侧翻译管道
//!
//! 从文本规范化、噪声过滤、单元分类、翻译表与动态规则，
//! 到写入文档的同步器、遥测缓冲与持有全部页面状态的代理。

pub mod agent;
pub mod classifier;
pub mod context;
pub mod dynamic_rules;
pub mod filters;
pub mod normalizer;
pub mod resolver;
pub mod synchronizer;
pub mod table;
pub mod telemetry;
pub mod template;

use std::time::Duration;

use crate::translation::config::{constants, OverlayConfig};

// 重新导出主要类型
pub use agent::{PageAgent, PageEvent, StoreClient};
pub use classifier::{Classification, Classifier, ClassifierLimits};
pub use context::{PageContext, RepoSlug, Section};
pub use filters::NoiseReason;
pub use resolver::Resolver;
pub use synchronizer::Synchronizer;
pub use table::TranslationTable;
pub use telemetry::{TelemetryAggregator, TelemetrySink, TelemetryTimers};

/// 管道的可调参数
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub limits: ClassifierLimits,
    pub timers: TelemetryTimers,
    pub mutation_debounce: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            limits: ClassifierLimits::default(),
            timers: TelemetryTimers::default(),
            mutation_debounce: constants::MUTATION_DEBOUNCE,
        }
    }
}

impl From<&OverlayConfig> for PipelineOptions {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            limits: ClassifierLimits::from(config),
            timers: TelemetryTimers::from(config),
            mutation_debounce: config.mutation_debounce(),
        }
    }
}
