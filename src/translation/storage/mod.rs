//! 存储侧
//!
//! 键值后端、词典协调、遥测账本、自动巡检以及把它们组合起来的请求服务。

pub mod audit;
pub mod backend;
pub mod dictionary;
pub mod ledger;
pub mod service;

pub use audit::{AuditControl, AuditDriver, AuditPlan, AuditState, DetachedDriver};
pub use backend::{keys, KvStore, MemoryStore, RedbStore, Scope};
pub use dictionary::{
    reconcile, BundledMeta, BundledSource, Dictionary, FileBundledSource, PersistedDictionaries,
    Reconciliation, StaticBundledSource,
};
pub use ledger::{CoverageLedger, CoverageSummary, DebugLedger};
pub use service::StoreService;
