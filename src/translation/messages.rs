//! 页面与存储之间的消息
//!
//! 请求以 `type` 字段区分；载荷保持宽松的 JSON 形态，由存储侧负责清洗。
//! 应答统一带 `ok` 字段，失败时附带错误码。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::translation::config::Settings;
use crate::translation::storage::{AuditState, CoverageSummary, DebugLedger, Dictionary};

/// 区分"字段缺失"与"字段为 null"
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// 发往存储侧的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum StoreRequest {
    #[serde(rename = "ghruGetState")]
    GetState,
    #[serde(rename = "ghruGetSettings")]
    GetSettings,
    #[serde(rename = "ghruToggleEnabled")]
    ToggleEnabled {
        #[serde(default)]
        enabled: Value,
    },
    #[serde(rename = "ghruSaveSettings")]
    SaveSettings {
        #[serde(default)]
        settings: Value,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        custom_translations: Option<Value>,
    },
    #[serde(rename = "ghruSetAdminMode")]
    SetAdminMode {
        #[serde(default)]
        admin_mode: Value,
    },
    #[serde(rename = "ghruGetUntranslated")]
    GetUntranslated,
    #[serde(rename = "ghruClearUntranslated")]
    ClearUntranslated,
    #[serde(rename = "ghruPruneUntranslated")]
    PruneUntranslated,
    #[serde(rename = "ghruGetCoverage")]
    GetCoverage,
    #[serde(rename = "ghruClearCoverage")]
    ClearCoverage,
    #[serde(rename = "ghruGetCollectorDebug")]
    GetCollectorDebug,
    #[serde(rename = "ghruClearCollectorDebug")]
    ClearCollectorDebug,
    #[serde(rename = "ghruReportUntranslated")]
    ReportUntranslated {
        #[serde(default)]
        items: Value,
    },
    #[serde(rename = "ghruReportCoverage")]
    ReportCoverage {
        #[serde(default)]
        translated: Value,
        #[serde(default)]
        untranslated: Value,
    },
    #[serde(rename = "ghruReportCollectorDebug")]
    ReportCollectorDebug {
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename = "ghruPersistBundledDict")]
    PersistBundledDict,
    #[serde(rename = "ghruStartAutoAudit")]
    StartAutoAudit {
        #[serde(default)]
        urls: Value,
        #[serde(default)]
        dwell_ms: Value,
    },
    #[serde(rename = "ghruStopAutoAudit")]
    StopAutoAudit,
    #[serde(rename = "ghruGetAutoAuditState")]
    GetAutoAuditState,
}

impl StoreRequest {
    /// 消息类型名（日志使用）
    pub fn kind(&self) -> &'static str {
        match self {
            StoreRequest::GetState => "ghruGetState",
            StoreRequest::GetSettings => "ghruGetSettings",
            StoreRequest::ToggleEnabled { .. } => "ghruToggleEnabled",
            StoreRequest::SaveSettings { .. } => "ghruSaveSettings",
            StoreRequest::SetAdminMode { .. } => "ghruSetAdminMode",
            StoreRequest::GetUntranslated => "ghruGetUntranslated",
            StoreRequest::ClearUntranslated => "ghruClearUntranslated",
            StoreRequest::PruneUntranslated => "ghruPruneUntranslated",
            StoreRequest::GetCoverage => "ghruGetCoverage",
            StoreRequest::ClearCoverage => "ghruClearCoverage",
            StoreRequest::GetCollectorDebug => "ghruGetCollectorDebug",
            StoreRequest::ClearCollectorDebug => "ghruClearCollectorDebug",
            StoreRequest::ReportUntranslated { .. } => "ghruReportUntranslated",
            StoreRequest::ReportCoverage { .. } => "ghruReportCoverage",
            StoreRequest::ReportCollectorDebug { .. } => "ghruReportCollectorDebug",
            StoreRequest::PersistBundledDict => "ghruPersistBundledDict",
            StoreRequest::StartAutoAudit { .. } => "ghruStartAutoAudit",
            StoreRequest::StopAutoAudit => "ghruStopAutoAudit",
            StoreRequest::GetAutoAuditState => "ghruGetAutoAuditState",
        }
    }
}

/// 存储侧的成功应答
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum StoreResponse {
    State {
        settings: Settings,
        custom_translations: Dictionary,
        effective_translations: Dictionary,
        untranslated_count: usize,
        coverage: CoverageSummary,
        collector_debug: DebugLedger,
    },
    Settings {
        settings: Settings,
        custom_translations: Dictionary,
        effective_translations: Dictionary,
    },
    Toggled {
        enabled: bool,
    },
    AdminMode {
        admin_mode: bool,
    },
    Untranslated {
        list: Vec<String>,
    },
    Coverage {
        coverage: CoverageSummary,
    },
    CollectorDebug {
        debug: DebugLedger,
    },
    Pruned {
        before: usize,
        after: usize,
        removed: usize,
    },
    Reported {
        count: usize,
    },
    Persisted {
        changed: bool,
    },
    Audit {
        state: AuditState,
    },
    Ack,
}

impl StoreResponse {
    /// 线上格式：`{ "ok": true, ...字段 }`
    pub fn to_json(&self) -> Value {
        let mut object = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        object.insert("ok".to_string(), Value::Bool(true));
        Value::Object(object)
    }
}

/// 失败应答：`{ "ok": false, "error": 错误码 }`，可附带额外字段
pub fn error_json(code: &str, extra: Option<(&str, Value)>) -> Value {
    let mut object = Map::new();
    object.insert("ok".to_string(), Value::Bool(false));
    object.insert("error".to_string(), Value::String(code.to_string()));
    if let Some((key, value)) = extra {
        object.insert(key.to_string(), value);
    }
    Value::Object(object)
}

/// 存储侧推送给页面的通知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    #[serde(rename = "ghruReload")]
    Reload,
    #[serde(rename = "ghruForceScan")]
    ForceScan,
}

/// 需要页面应答的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageRequest {
    #[serde(rename = "ghruBuildAutoAuditUrls")]
    BuildAuditUrls,
    #[serde(rename = "ghruBuildUntranslatedReport")]
    BuildUntranslatedReport,
}

/// 页面的应答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum PageResponse {
    AuditUrls { urls: Vec<String> },
    UntranslatedReport { selected_text: String, page_url: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let req: StoreRequest = serde_json::from_value(json!({
            "type": "ghruReportCoverage",
            "translated": [{"section": "pr", "key": "Files"}],
        }))
        .unwrap();
        match req {
            StoreRequest::ReportCoverage { translated, untranslated } => {
                assert!(translated.is_array());
                assert!(untranslated.is_null());
            }
            other => panic!("unexpected {:?}", other),
        }

        let start: StoreRequest =
            serde_json::from_value(json!({"type": "ghruStartAutoAudit", "dwellMs": 2000})).unwrap();
        assert_eq!(
            start,
            StoreRequest::StartAutoAudit {
                urls: Value::Null,
                dwell_ms: json!(2000)
            }
        );
    }

    #[test]
    fn test_custom_translations_null_is_distinct_from_missing() {
        let missing: StoreRequest =
            serde_json::from_value(json!({"type": "ghruSaveSettings", "settings": {}})).unwrap();
        let null: StoreRequest = serde_json::from_value(
            json!({"type": "ghruSaveSettings", "settings": {}, "customTranslations": null}),
        )
        .unwrap();
        assert!(matches!(
            missing,
            StoreRequest::SaveSettings { custom_translations: None, .. }
        ));
        assert!(matches!(
            null,
            StoreRequest::SaveSettings { custom_translations: Some(Value::Null), .. }
        ));
    }

    #[test]
    fn test_response_json() {
        assert_eq!(
            StoreResponse::Pruned { before: 3, after: 1, removed: 2 }.to_json(),
            json!({"ok": true, "before": 3, "after": 1, "removed": 2})
        );
        assert_eq!(StoreResponse::Ack.to_json(), json!({"ok": true}));
        assert_eq!(
            StoreResponse::AdminMode { admin_mode: true }.to_json(),
            json!({"ok": true, "adminMode": true})
        );
        assert_eq!(
            error_json("auto_audit_already_running", None),
            json!({"ok": false, "error": "auto_audit_already_running"})
        );
    }

    #[test]
    fn test_page_messages() {
        assert_eq!(
            serde_json::to_value(PageMessage::Reload).unwrap(),
            json!({"type": "ghruReload"})
        );
        assert_eq!(
            serde_json::to_value(PageResponse::UntranslatedReport {
                selected_text: "x".into(),
                page_url: "https://github.com/".into()
            })
            .unwrap(),
            json!({"selectedText": "x", "pageUrl": "https://github.com/"})
        );
    }
}
