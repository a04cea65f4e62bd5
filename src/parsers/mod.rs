//! # 解析器模块
//!
//! 只保留 HTML：把页面解析为可观察的活动文档、结构选择器匹配以及序列化。

pub mod html;

pub use html::{html_to_dom, serialize_document, LiveDocument, MutationRecord, SelectorList};
