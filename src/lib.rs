//! # octoru
//!
//! 把 GitHub 页面实时覆盖为俄文译文，同时收集覆盖率遥测。
//!
//! ## 模块组织
//!
//! - `parsers` - HTML 解析、活动文档与结构选择器
//! - `translation` - 翻译管道（页面侧）与存储服务（存储侧）
//! - `env` - 环境变量覆盖
//! - `logging` - 日志订阅者初始化
//! - `utils` - 正则缓存与文本工具

pub mod env;
pub mod logging;
pub mod parsers;
pub mod translation;
pub mod utils;

pub use parsers::{html_to_dom, serialize_document, LiveDocument};
