//! 配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值。
//! 用户开关 [`Settings`] 属于同步存储，与运行参数 [`OverlayConfig`] 分开管理。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants;
use crate::translation::error::helpers::config_error;
use crate::translation::error::{TranslationError, TranslationResult};

/// 用户开关（同步存储 `ghru_settings_v2`）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enabled: bool,
    pub translate_attributes: bool,
    pub glossary_mode: bool,
    pub collect_untranslated: bool,
    pub strict_ui_only_mode: bool,
    pub collector_relaxed_mode: bool,
    pub debug_collector: bool,
    pub admin_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            translate_attributes: true,
            glossary_mode: false,
            collect_untranslated: true,
            strict_ui_only_mode: true,
            collector_relaxed_mode: false,
            debug_collector: false,
            admin_mode: false,
        }
    }
}

/// 按 JavaScript 规则判断真值
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

impl Settings {
    /// 清洗外部传入的设置
    ///
    /// `enabled` 必须是布尔值，否则取默认；`strictUiOnlyMode` 只有显式 `false` 才关闭；
    /// 其余字段按真值处理。
    pub fn from_loose(value: &Value) -> Self {
        let get = |name: &str| value.get(name);
        Self {
            enabled: get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(Self::default().enabled),
            translate_attributes: truthy(get("translateAttributes")),
            glossary_mode: truthy(get("glossaryMode")),
            collect_untranslated: truthy(get("collectUntranslated")),
            strict_ui_only_mode: get("strictUiOnlyMode") != Some(&Value::Bool(false)),
            collector_relaxed_mode: truthy(get("collectorRelaxedMode")),
            debug_collector: truthy(get("debugCollector")),
            admin_mode: truthy(get("adminMode")),
        }
    }

    /// 读取已存储的设置：缺失字段回落默认值，类型错误的字段同样回落
    pub fn from_stored(value: Option<&Value>) -> Self {
        let mut settings = Self::default();
        let Some(Value::Object(map)) = value else {
            return settings;
        };
        for (name, raw) in map {
            if let Some(flag) = raw.as_bool() {
                settings.set_flag(name, flag);
            }
        }
        settings
    }

    /// 按 camelCase 名称设置单个开关，未知名称返回 `false`
    pub fn set_flag(&mut self, name: &str, value: bool) -> bool {
        let slot = match name {
            "enabled" => &mut self.enabled,
            "translateAttributes" => &mut self.translate_attributes,
            "glossaryMode" => &mut self.glossary_mode,
            "collectUntranslated" => &mut self.collect_untranslated,
            "strictUiOnlyMode" => &mut self.strict_ui_only_mode,
            "collectorRelaxedMode" => &mut self.collector_relaxed_mode,
            "debugCollector" => &mut self.debug_collector,
            "adminMode" => &mut self.admin_mode,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// 解析 `name=value` 形式的赋值（命令行使用）
    pub fn apply_assignment(&mut self, assignment: &str) -> TranslationResult<()> {
        let (name, raw) = assignment.split_once('=').ok_or_else(|| {
            TranslationError::InvalidInput(format!("invalid_assignment {}", assignment))
        })?;
        let value = crate::env::parse_bool(raw.trim(), name.trim())
            .map_err(|e| TranslationError::InvalidInput(format!("invalid_assignment {}", e)))?;
        if !self.set_flag(name.trim(), value) {
            return Err(TranslationError::InvalidInput(format!(
                "unknown_setting {}",
                name.trim()
            )));
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 运行参数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OverlayConfig {
    // 存储
    pub store_path: String,
    pub bundled_dict_path: String,
    pub bundled_meta_path: String,

    // 启发式阈值
    pub legacy_customized_threshold: usize,
    pub collect_min_len: usize,
    pub collect_max_len: usize,
    pub safe_label_max_len: usize,
    pub card_text_min_len: usize,
    pub card_spaceless_min_len: usize,

    // 容量上限
    pub untranslated_cap: usize,
    pub coverage_cap: usize,
    pub debug_sample_cap: usize,
    pub page_debug_sample_cap: usize,
    pub debug_sample_chars: usize,

    // 防抖（毫秒）
    pub mutation_debounce_ms: u64,
    pub untranslated_flush_ms: u64,
    pub coverage_flush_ms: u64,
    pub debug_flush_ms: u64,

    // 自动巡检（毫秒）
    pub audit_min_dwell_ms: u64,
    pub audit_default_dwell_ms: u64,
    pub audit_max_dwell_ms: u64,
    pub audit_load_timeout_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            store_path: constants::DEFAULT_STORE_PATH.to_string(),
            bundled_dict_path: constants::BUNDLED_DICT_FILE.to_string(),
            bundled_meta_path: constants::BUNDLED_DICT_META_FILE.to_string(),

            legacy_customized_threshold: constants::LEGACY_CUSTOMIZED_THRESHOLD,
            collect_min_len: constants::COLLECT_MIN_LEN,
            collect_max_len: constants::COLLECT_MAX_LEN,
            safe_label_max_len: constants::SAFE_LABEL_MAX_LEN,
            card_text_min_len: constants::CARD_TEXT_MIN_LEN,
            card_spaceless_min_len: constants::CARD_SPACELESS_MIN_LEN,

            untranslated_cap: constants::UNTRANSLATED_CAP,
            coverage_cap: constants::COVERAGE_CAP,
            debug_sample_cap: constants::DEBUG_SAMPLE_CAP,
            page_debug_sample_cap: constants::PAGE_DEBUG_SAMPLE_CAP,
            debug_sample_chars: constants::DEBUG_SAMPLE_CHARS,

            mutation_debounce_ms: constants::MUTATION_DEBOUNCE.as_millis() as u64,
            untranslated_flush_ms: constants::UNTRANSLATED_FLUSH.as_millis() as u64,
            coverage_flush_ms: constants::COVERAGE_FLUSH.as_millis() as u64,
            debug_flush_ms: constants::DEBUG_FLUSH.as_millis() as u64,

            audit_min_dwell_ms: constants::AUDIT_MIN_DWELL_MS,
            audit_default_dwell_ms: constants::AUDIT_DEFAULT_DWELL_MS,
            audit_max_dwell_ms: constants::AUDIT_MAX_DWELL_MS,
            audit_load_timeout_ms: constants::AUDIT_LOAD_TIMEOUT_MS,
        }
    }
}

impl OverlayConfig {
    /// 验证配置
    pub fn validate(&self) -> TranslationResult<()> {
        let caps = [
            ("untranslated_cap", self.untranslated_cap),
            ("coverage_cap", self.coverage_cap),
            ("debug_sample_cap", self.debug_sample_cap),
            ("page_debug_sample_cap", self.page_debug_sample_cap),
            ("debug_sample_chars", self.debug_sample_chars),
        ];
        for (name, value) in caps {
            if value == 0 {
                return Err(config_error(format!("{} 不能为0", name)));
            }
        }

        let timers = [
            ("mutation_debounce_ms", self.mutation_debounce_ms),
            ("untranslated_flush_ms", self.untranslated_flush_ms),
            ("coverage_flush_ms", self.coverage_flush_ms),
            ("debug_flush_ms", self.debug_flush_ms),
            ("audit_load_timeout_ms", self.audit_load_timeout_ms),
        ];
        for (name, value) in timers {
            if value == 0 {
                return Err(config_error(format!("{} 不能为0", name)));
            }
        }

        if self.audit_min_dwell_ms > self.audit_max_dwell_ms {
            return Err(config_error("巡检停留时间下限大于上限"));
        }

        if self.collect_min_len > self.collect_max_len {
            return Err(config_error("收集长度下限大于上限"));
        }

        if self.store_path.trim().is_empty() {
            return Err(config_error("存储路径不能为空"));
        }

        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        use crate::env::{store, EnvVar};

        if let Ok(path) = store::StorePath::get() {
            self.store_path = path;
            tracing::info!("环境变量覆盖存储路径: {}", self.store_path);
        }

        if let Ok(path) = store::BundledDict::get() {
            self.bundled_dict_path = path;
        }

        if let Ok(path) = store::BundledMeta::get() {
            self.bundled_meta_path = path;
        }

        // 有默认值的变量只在显式设置时覆盖
        if std::env::var(store::LegacyThreshold::NAME).is_ok() {
            match store::LegacyThreshold::get() {
                Ok(threshold) => self.legacy_customized_threshold = threshold,
                Err(e) => tracing::warn!("忽略无效的环境变量: {}", e),
            }
        }

        if std::env::var(store::AuditDwell::NAME).is_ok() {
            match store::AuditDwell::get() {
                Ok(dwell) => self.audit_default_dwell_ms = dwell.as_millis() as u64,
                Err(e) => tracing::warn!("忽略无效的环境变量: {}", e),
            }
        }
    }

    /// 展开 `~` 后的存储路径
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.store_path).as_ref())
    }

    pub fn bundled_dict_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.bundled_dict_path).as_ref())
    }

    pub fn bundled_meta_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.bundled_meta_path).as_ref())
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn untranslated_flush(&self) -> Duration {
        Duration::from_millis(self.untranslated_flush_ms)
    }

    pub fn coverage_flush(&self) -> Duration {
        Duration::from_millis(self.coverage_flush_ms)
    }

    pub fn debug_flush(&self) -> Duration {
        Duration::from_millis(self.debug_flush_ms)
    }

    pub fn audit_load_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_load_timeout_ms)
    }

    /// 将请求的停留时间钳制到允许范围；缺失或为0时取默认值
    pub fn clamp_dwell(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.audit_default_dwell_ms);
        Duration::from_millis(ms.clamp(self.audit_min_dwell_ms, self.audit_max_dwell_ms))
    }
}

/// 配置管理器
pub struct ConfigManager {
    config: OverlayConfig,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new() -> TranslationResult<Self> {
        let mut config = Self::load_config()?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self { config })
    }

    /// 从指定文件创建（不搜索默认路径）
    pub fn from_file(path: &str) -> TranslationResult<Self> {
        Self::load_dotenv();
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self { config })
    }

    /// 获取配置
    pub fn get_config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn into_config(self) -> OverlayConfig {
        self.config
    }

    /// 从文件加载配置
    fn load_config() -> TranslationResult<OverlayConfig> {
        // 首先尝试加载 .env 文件
        Self::load_dotenv();

        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                return Self::load_from_file(&expanded_path);
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok(OverlayConfig::default())
    }

    /// 从指定文件加载配置
    fn load_from_file(path: &str) -> TranslationResult<OverlayConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TranslationError::ConfigError(format!("读取配置文件失败: {}", e)))?;

        if path.ends_with(".toml") {
            toml::from_str(&content)
                .map_err(|e| TranslationError::ConfigError(format!("解析TOML配置失败: {}", e)))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| TranslationError::ConfigError(format!("解析JSON配置失败: {}", e)))
        }
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &str) -> TranslationResult<()> {
        let config = OverlayConfig::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| TranslationError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TranslationError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_from_loose() {
        let s = Settings::from_loose(&json!({
            "enabled": "yes",
            "translateAttributes": 1,
            "strictUiOnlyMode": 0,
            "debugCollector": "x"
        }));
        // 非布尔的 enabled 取默认
        assert!(s.enabled);
        assert!(s.translate_attributes);
        // 只有显式 false 才关闭严格模式
        assert!(s.strict_ui_only_mode);
        assert!(s.debug_collector);
        assert!(!s.collect_untranslated);

        let off = Settings::from_loose(&json!({ "enabled": false, "strictUiOnlyMode": false }));
        assert!(!off.enabled);
        assert!(!off.strict_ui_only_mode);
    }

    #[test]
    fn test_settings_from_stored_merges_defaults() {
        let s = Settings::from_stored(Some(&json!({ "glossaryMode": true, "enabled": "bad" })));
        assert!(s.glossary_mode);
        assert!(s.enabled);
        assert_eq!(Settings::from_stored(None), Settings::default());
    }

    #[test]
    fn test_settings_assignment() {
        let mut s = Settings::default();
        s.apply_assignment("adminMode=on").unwrap();
        assert!(s.admin_mode);
        assert!(s.apply_assignment("bogus=true").is_err());
        assert!(s.apply_assignment("enabled").is_err());
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let v = Settings::default().to_value();
        assert_eq!(v["strictUiOnlyMode"], json!(true));
        assert_eq!(v["collectorRelaxedMode"], json!(false));
    }

    #[test]
    fn test_config_validation() {
        let config = OverlayConfig::default();
        assert!(config.validate().is_ok());

        let mut bad = OverlayConfig::default();
        bad.coverage_cap = 0;
        assert!(bad.validate().is_err());

        let mut inverted = OverlayConfig::default();
        inverted.audit_min_dwell_ms = 20_000;
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_dwell_clamp() {
        let config = OverlayConfig::default();
        assert_eq!(config.clamp_dwell(None), Duration::from_millis(3500));
        assert_eq!(config.clamp_dwell(Some(0)), Duration::from_millis(3500));
        assert_eq!(config.clamp_dwell(Some(100)), Duration::from_millis(1500));
        assert_eq!(config.clamp_dwell(Some(60_000)), Duration::from_millis(15000));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("octoru.toml");
        ConfigManager::generate_example_config(path.to_str().unwrap()).unwrap();
        let manager = ConfigManager::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(manager.get_config().untranslated_cap, 8000);
    }
}
