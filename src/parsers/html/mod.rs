//! HTML解析和处理模块
//!
//! - `dom`: 基础DOM操作与可观察的活动文档
//! - `selector`: 结构选择器与匹配能力
//! - `serializer`: 序列化功能

pub mod dom;
pub mod selector;
pub mod serializer;

// 重新导出主要的公共 API
pub use dom::{
    closest, find_nodes, get_child_node_by_name, get_node_attr, get_node_name, get_parent_node,
    html_to_dom, node_key, set_node_attr, LiveDocument, MutationRecord, NodeKey,
};
pub use selector::{ElementMatcher, SelectorError, SelectorList};
pub use serializer::serialize_document;
