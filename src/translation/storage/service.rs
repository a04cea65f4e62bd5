//! 存储服务
//!
//! 处理页面发来的全部请求。每个请求在门锁内完成"读取、合并、写回"，
//! 因此同一进程内的请求不会交错；词典变化时通过广播通知页面重新加载。

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::audit::{
    normalize_audit_urls, requested_dwell_ms, requested_urls, run_audit, AuditControl,
    AuditDriver, AuditPlan, AuditState, DetachedDriver,
};
use super::backend::{keys, KvStore, Scope};
use super::dictionary::{
    dictionary_to_value, normalize_dictionary, reconcile, BundledSource, Dictionary,
    PersistedDictionaries,
};
use super::ledger::{
    merge_untranslated, normalize_coverage_items, prune_untranslated, read_untranslated,
    CoverageLedger, DebugLedger,
};
use crate::translation::config::manager::truthy;
use crate::translation::config::{constants, OverlayConfig, Settings};
use crate::translation::error::helpers::{audit_error, log_error, validation_error};
use crate::translation::error::{ErrorStats, TranslationResult};
use crate::translation::messages::{error_json, PageMessage, StoreRequest, StoreResponse};
use crate::translation::pipeline::agent::StoreClient;

/// 旧版直接存放在同步作用域顶层的开关
const LEGACY_FLAGS: &[&str] = &[
    "enabled",
    "translateAttributes",
    "glossaryMode",
    "collectUntranslated",
    "strictUiOnlyMode",
    "collectorRelaxedMode",
];

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 存储侧服务
pub struct StoreService<S, D = DetachedDriver> {
    store: S,
    bundled: Arc<dyn BundledSource>,
    config: OverlayConfig,
    gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<PageMessage>,
    audit: Arc<AuditControl>,
    driver: Arc<D>,
    default_audit_urls: Vec<String>,
    audit_task: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<ErrorStats>,
}

impl<S: KvStore> StoreService<S, DetachedDriver> {
    /// 创建没有页面宿主的服务
    pub fn new(store: S, bundled: Arc<dyn BundledSource>, config: OverlayConfig) -> Self {
        Self::with_driver(store, bundled, config, DetachedDriver)
    }
}

impl<S: KvStore, D: AuditDriver> StoreService<S, D> {
    pub fn with_driver(
        store: S,
        bundled: Arc<dyn BundledSource>,
        config: OverlayConfig,
        driver: D,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            bundled,
            config,
            gate: tokio::sync::Mutex::new(()),
            events,
            audit: Arc::new(AuditControl::new()),
            driver: Arc::new(driver),
            default_audit_urls: constants::AUDIT_DEFAULT_URLS
                .iter()
                .map(|u| u.to_string())
                .collect(),
            audit_task: Mutex::new(None),
            stats: Mutex::new(ErrorStats::default()),
        }
    }

    /// 替换巡检的默认地址列表
    pub fn with_default_audit_urls(mut self, urls: Vec<String>) -> Self {
        self.default_audit_urls = urls;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// 订阅推送给页面的通知
    pub fn subscribe(&self) -> broadcast::Receiver<PageMessage> {
        self.events.subscribe()
    }

    pub fn audit_state(&self) -> AuditState {
        self.audit.state()
    }

    pub fn error_stats(&self) -> ErrorStats {
        lock_or_recover(&self.stats).clone()
    }

    fn broadcast(&self, message: PageMessage) {
        if self.events.send(message).is_err() {
            tracing::debug!("没有页面订阅通知 {:?}", message);
        }
    }

    // ========================================================================
    // 存储读写
    // ========================================================================

    fn load_settings(&self) -> TranslationResult<Settings> {
        Ok(Settings::from_stored(
            self.store.get(Scope::Sync, keys::SETTINGS)?.as_ref(),
        ))
    }

    fn store_settings(&self, settings: &Settings) -> TranslationResult<()> {
        self.store
            .set(Scope::Sync, keys::SETTINGS, settings.to_value())
    }

    fn load_dictionary(&self, key: &str) -> TranslationResult<Dictionary> {
        Ok(normalize_dictionary(self.store.get(Scope::Local, key)?.as_ref()))
    }

    fn load_untranslated(&self) -> TranslationResult<Vec<String>> {
        Ok(read_untranslated(
            self.store.get(Scope::Local, keys::UNTRANSLATED)?.as_ref(),
        ))
    }

    fn load_coverage(&self) -> TranslationResult<CoverageLedger> {
        Ok(CoverageLedger::normalize(
            self.store.get(Scope::Local, keys::COVERAGE)?.as_ref(),
        ))
    }

    fn load_debug(&self) -> TranslationResult<DebugLedger> {
        Ok(DebugLedger::normalize(
            self.store.get(Scope::Local, keys::COLLECTOR_DEBUG)?.as_ref(),
            self.config.debug_sample_cap,
        ))
    }

    // ========================================================================
    // 词典协调
    // ========================================================================

    /// 将内置词典与存储协调，返回有效词典或用户覆盖是否变化
    pub fn ensure_bundled(&self) -> TranslationResult<bool> {
        let version = self.bundled.load_version();
        let stored_version = self.store.get(Scope::Local, keys::BUNDLED_VERSION)?;
        let persisted = PersistedDictionaries {
            effective: self.load_dictionary(keys::EFFECTIVE_DICT)?,
            user: self.load_dictionary(keys::USER_DICT)?,
            snapshot: self.load_dictionary(keys::BUNDLED_SNAPSHOT)?,
            version: stored_version.as_ref().and_then(Value::as_str).map(str::to_string),
        };
        let bundled = self.bundled.load_dictionary()?;
        let plan = reconcile(
            &bundled,
            &version,
            &persisted,
            self.config.legacy_customized_threshold,
        );

        let mut entries = vec![(keys::BUNDLED_VERSION, Value::String(version.clone()))];
        if plan.write_snapshot {
            entries.push((keys::BUNDLED_SNAPSHOT, dictionary_to_value(&bundled)));
        }
        if plan.user_changed {
            entries.push((keys::USER_DICT, dictionary_to_value(&plan.user)));
        }
        if plan.effective_changed {
            entries.push((keys::EFFECTIVE_DICT, dictionary_to_value(&plan.effective)));
        }
        self.store.set_many(Scope::Local, entries)?;

        if plan.changed() {
            tracing::info!(
                "词典已协调: 版本 {}, 有效 {} 条, 用户覆盖 {} 条",
                version,
                plan.effective.len(),
                plan.user.len()
            );
        }
        Ok(plan.changed())
    }

    /// 协调失败只记日志，视为未变化
    pub fn try_ensure_bundled(&self) -> bool {
        match self.ensure_bundled() {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!("内置词典协调失败: {}", e);
                false
            }
        }
    }

    /// 设置缺失时写入默认值
    pub fn ensure_defaults(&self) -> TranslationResult<()> {
        let stored = self.store.get(Scope::Sync, keys::SETTINGS)?;
        if !truthy(stored.as_ref()) {
            tracing::info!("写入默认设置");
            self.store_settings(&Settings::default())?;
        }
        Ok(())
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 安装或升级：迁移旧版布局，然后协调词典
    pub async fn on_installed(&self) -> TranslationResult<()> {
        let _gate = self.gate.lock().await;

        let migrated = self.store.get(Scope::Sync, keys::MIGRATED)?;
        if truthy(migrated.as_ref()) {
            self.ensure_defaults()?;
            if self.try_ensure_bundled() {
                self.broadcast(PageMessage::Reload);
            }
            return Ok(());
        }

        let mut settings = Settings::default();
        for name in LEGACY_FLAGS {
            if let Some(Value::Bool(flag)) = self.store.get(Scope::Sync, name)? {
                settings.set_flag(name, flag);
            }
        }
        self.store.set_many(
            Scope::Sync,
            vec![
                (keys::SETTINGS, settings.to_value()),
                (keys::MIGRATED, Value::Bool(true)),
            ],
        )?;

        if let Some(legacy @ Value::Object(_)) =
            self.store.get(Scope::Sync, keys::LEGACY_CUSTOM_TRANSLATIONS)?
        {
            let user = normalize_dictionary(Some(&legacy));
            tracing::info!("迁移旧版自定义词典 {} 条", user.len());
            self.store
                .set(Scope::Local, keys::USER_DICT, dictionary_to_value(&user))?;
            self.store
                .remove(Scope::Sync, &[keys::LEGACY_CUSTOM_TRANSLATIONS])?;
        }

        if let Some(Value::Array(old)) = self.store.get(Scope::Local, keys::LEGACY_UNTRANSLATED)? {
            if !old.is_empty() {
                tracing::info!("迁移旧版未翻译列表 {} 条", old.len());
                self.store
                    .set(Scope::Local, keys::UNTRANSLATED, Value::Array(old))?;
                self.store
                    .remove(Scope::Local, &[keys::LEGACY_UNTRANSLATED])?;
            }
        }

        self.ensure_defaults()?;
        self.try_ensure_bundled();
        self.broadcast(PageMessage::Reload);
        Ok(())
    }

    /// 启动：补齐默认设置并协调词典
    pub async fn on_startup(&self) -> TranslationResult<bool> {
        let _gate = self.gate.lock().await;
        self.ensure_defaults()?;
        let changed = self.try_ensure_bundled();
        if changed {
            self.broadcast(PageMessage::Reload);
        }
        Ok(changed)
    }

    // ========================================================================
    // 请求处理
    // ========================================================================

    /// 处理一个请求；失败会计入错误统计
    pub async fn handle(&self, request: StoreRequest) -> TranslationResult<StoreResponse> {
        let kind = request.kind();
        let _gate = self.gate.lock().await;
        match self.dispatch(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let e = e.with_context(kind);
                lock_or_recover(&self.stats).record_error(&e);
                log_error(e)
            }
        }
    }

    /// 线上格式的入口：`{type, ...}` 进，`{ok, ...}` 出
    pub async fn handle_json(&self, request: Value) -> Value {
        let request: StoreRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("无法识别的消息: {}", e);
                return error_json("unknown_message", None);
            }
        };
        match self.handle(request).await {
            Ok(response) => response.to_json(),
            Err(e) => {
                let code = e.code();
                if code == "auto_audit_already_running" {
                    let state = serde_json::to_value(self.audit.state()).unwrap_or(Value::Null);
                    error_json(&code, Some(("state", state)))
                } else {
                    error_json(&code, None)
                }
            }
        }
    }

    async fn dispatch(&self, request: StoreRequest) -> TranslationResult<StoreResponse> {
        match request {
            StoreRequest::GetState => {
                self.try_ensure_bundled();
                Ok(StoreResponse::State {
                    settings: self.load_settings()?,
                    custom_translations: self.load_dictionary(keys::USER_DICT)?,
                    effective_translations: self.load_dictionary(keys::EFFECTIVE_DICT)?,
                    untranslated_count: self.load_untranslated()?.len(),
                    coverage: self.load_coverage()?.summary(),
                    collector_debug: self.load_debug()?,
                })
            }
            StoreRequest::GetSettings => {
                self.try_ensure_bundled();
                Ok(StoreResponse::Settings {
                    settings: self.load_settings()?,
                    custom_translations: self.load_dictionary(keys::USER_DICT)?,
                    effective_translations: self.load_dictionary(keys::EFFECTIVE_DICT)?,
                })
            }
            StoreRequest::ToggleEnabled { enabled } => {
                let enabled = truthy(Some(&enabled));
                let mut settings = self.load_settings()?;
                settings.enabled = enabled;
                self.store_settings(&settings)?;
                tracing::info!("翻译已{}", if enabled { "开启" } else { "关闭" });
                self.broadcast(PageMessage::Reload);
                Ok(StoreResponse::Toggled { enabled })
            }
            StoreRequest::SaveSettings {
                settings,
                custom_translations,
            } => self.save_settings(&settings, custom_translations.as_ref()),
            StoreRequest::SetAdminMode { admin_mode } => {
                let mut settings = self.load_settings()?;
                settings.admin_mode = truthy(Some(&admin_mode));
                self.store_settings(&settings)?;
                Ok(StoreResponse::AdminMode {
                    admin_mode: settings.admin_mode,
                })
            }
            StoreRequest::GetUntranslated => Ok(StoreResponse::Untranslated {
                list: self.load_untranslated()?,
            }),
            StoreRequest::ClearUntranslated => {
                self.store
                    .set(Scope::Local, keys::UNTRANSLATED, Value::Array(Vec::new()))?;
                Ok(StoreResponse::Ack)
            }
            StoreRequest::PruneUntranslated => {
                let list = self.load_untranslated()?;
                let next = prune_untranslated(&list);
                let (before, after) = (list.len(), next.len());
                self.store
                    .set(Scope::Local, keys::UNTRANSLATED, serde_json::to_value(&next)?)?;
                tracing::info!("未翻译列表清理: {} -> {}", before, after);
                Ok(StoreResponse::Pruned {
                    before,
                    after,
                    removed: before - after,
                })
            }
            StoreRequest::GetCoverage => Ok(StoreResponse::Coverage {
                coverage: self.load_coverage()?.summary(),
            }),
            StoreRequest::ClearCoverage => {
                self.store
                    .set(Scope::Local, keys::COVERAGE, CoverageLedger::default().to_value())?;
                Ok(StoreResponse::Ack)
            }
            StoreRequest::GetCollectorDebug => Ok(StoreResponse::CollectorDebug {
                debug: self.load_debug()?,
            }),
            StoreRequest::ClearCollectorDebug => {
                self.store
                    .set(Scope::Local, keys::COLLECTOR_DEBUG, DebugLedger::default().to_value())?;
                Ok(StoreResponse::Ack)
            }
            StoreRequest::ReportUntranslated { items } => {
                if items.as_array().map_or(true, Vec::is_empty) {
                    return Ok(StoreResponse::Ack);
                }
                let next = merge_untranslated(
                    &self.load_untranslated()?,
                    &items,
                    self.config.untranslated_cap,
                );
                self.store
                    .set(Scope::Local, keys::UNTRANSLATED, serde_json::to_value(&next)?)?;
                Ok(StoreResponse::Reported { count: next.len() })
            }
            StoreRequest::ReportCoverage {
                translated,
                untranslated,
            } => {
                let translated = normalize_coverage_items(&translated);
                let untranslated = normalize_coverage_items(&untranslated);
                if translated.is_empty() && untranslated.is_empty() {
                    return Ok(StoreResponse::Ack);
                }
                let mut ledger = self.load_coverage()?;
                ledger.merge(&translated, &untranslated, self.config.coverage_cap);
                self.store
                    .set(Scope::Local, keys::COVERAGE, ledger.to_value())?;
                Ok(StoreResponse::Ack)
            }
            StoreRequest::ReportCollectorDebug { payload } => {
                let incoming = DebugLedger::normalize(Some(&payload), self.config.debug_sample_cap);
                let merged = self
                    .load_debug()?
                    .merge(&incoming, self.config.debug_sample_cap);
                self.store
                    .set(Scope::Local, keys::COLLECTOR_DEBUG, merged.to_value())?;
                Ok(StoreResponse::Ack)
            }
            StoreRequest::PersistBundledDict => {
                let changed = self.try_ensure_bundled();
                if changed {
                    self.broadcast(PageMessage::Reload);
                }
                Ok(StoreResponse::Persisted { changed })
            }
            StoreRequest::StartAutoAudit { urls, dwell_ms } => self.start_audit(&urls, &dwell_ms).await,
            StoreRequest::StopAutoAudit => {
                self.audit.request_stop();
                tracing::info!("已请求停止自动巡检");
                Ok(StoreResponse::Audit {
                    state: self.audit.state(),
                })
            }
            StoreRequest::GetAutoAuditState => Ok(StoreResponse::Audit {
                state: self.audit.state(),
            }),
        }
    }

    /// 保存设置；附带词典时同时重算有效词典
    ///
    /// 设置先写入，词典格式错误时设置的修改仍然保留。
    fn save_settings(
        &self,
        incoming: &Value,
        custom_translations: Option<&Value>,
    ) -> TranslationResult<StoreResponse> {
        let settings = Settings::from_loose(incoming);
        self.store_settings(&settings)?;

        if let Some(custom) = custom_translations {
            if !custom.is_object() {
                return Err(validation_error("invalid_custom_translations"));
            }
            let user = normalize_dictionary(Some(custom));
            let bundled = self.bundled.load_dictionary().unwrap_or_else(|e| {
                tracing::warn!("内置词典不可用，按空词典保存: {}", e);
                Dictionary::new()
            });
            let version = self.bundled.load_version();
            let mut effective = bundled.clone();
            effective.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));

            self.store.set_many(
                Scope::Local,
                vec![
                    (keys::USER_DICT, dictionary_to_value(&user)),
                    (keys::EFFECTIVE_DICT, dictionary_to_value(&effective)),
                    (keys::BUNDLED_SNAPSHOT, dictionary_to_value(&bundled)),
                    (keys::BUNDLED_VERSION, Value::String(version)),
                ],
            )?;
            tracing::info!("用户词典已保存: {} 条", user.len());
        }

        self.broadcast(PageMessage::Reload);
        Ok(StoreResponse::Ack)
    }

    // ========================================================================
    // 自动巡检
    // ========================================================================

    /// 显式地址优先；否则取活动页面生成的地址加默认列表，再否则只用默认列表
    async fn resolve_audit_urls(&self, requested: &Value) -> Vec<String> {
        let explicit = requested_urls(requested);
        if !explicit.is_empty() {
            return explicit;
        }
        let dynamic = self.driver.active_page_urls().await;
        let defaults = self.default_audit_urls.iter().map(String::as_str);
        if normalize_audit_urls(dynamic.iter().map(String::as_str)).is_empty() {
            return normalize_audit_urls(defaults);
        }
        normalize_audit_urls(dynamic.iter().map(String::as_str).chain(defaults))
    }

    async fn start_audit(&self, urls: &Value, dwell_ms: &Value) -> TranslationResult<StoreResponse> {
        if self.audit.is_running() {
            return Err(audit_error("auto_audit_already_running"));
        }
        let urls = self.resolve_audit_urls(urls).await;
        if urls.is_empty() {
            return Err(audit_error("auto_audit_no_urls"));
        }
        let dwell = self.config.clamp_dwell(requested_dwell_ms(dwell_ms));

        let mut settings = self.load_settings()?;
        settings.collect_untranslated = true;
        settings.collector_relaxed_mode = true;
        self.store_settings(&settings)?;
        self.broadcast(PageMessage::Reload);

        if !self.audit.begin(urls.len()) {
            return Err(audit_error("auto_audit_already_running"));
        }
        let plan = AuditPlan {
            urls,
            dwell,
            load_timeout: self.config.audit_load_timeout(),
        };
        let handle = tokio::spawn(run_audit(self.driver.clone(), self.audit.clone(), plan));
        *lock_or_recover(&self.audit_task) = Some(handle);

        Ok(StoreResponse::Audit {
            state: self.audit.state(),
        })
    }

    /// 等待当前巡检任务结束
    pub async fn join_audit(&self) {
        let handle = lock_or_recover(&self.audit_task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("自动巡检任务异常退出: {}", e);
            }
        }
    }

    /// 消费页面的即发即弃上报，直到所有发送端关闭
    pub async fn serve(&self, mut inbox: mpsc::UnboundedReceiver<StoreRequest>) {
        while let Some(request) = inbox.recv().await {
            // 失败已在 handle 中记录
            let _ = self.handle(request).await;
        }
        tracing::debug!("上报通道已关闭");
    }
}

impl<S: KvStore, D: AuditDriver> StoreClient for Arc<StoreService<S, D>> {
    async fn request(&self, request: StoreRequest) -> TranslationResult<StoreResponse> {
        self.handle(request).await
    }
}
