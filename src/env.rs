//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问，用于覆盖配置文件中的存储路径、
//! 内置词典位置以及可调的启发式阈值。

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "OCTORU_LOG_LEVEL";
        const DEFAULT: Option<String> = None;

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }

    /// 禁用颜色输出
    pub struct NoColor;
    impl EnvVar<bool> for NoColor {
        const NAME: &'static str = "NO_COLOR";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Disable colored output when set to any value";

        fn parse(value: &str) -> EnvResult<bool> {
            // NO_COLOR 遵循标准：任何值都表示禁用颜色
            Ok(!value.is_empty())
        }
    }
}

/// 存储与词典相关环境变量
pub mod store {
    use super::*;

    /// 持久化存储文件路径
    pub struct StorePath;
    impl EnvVar<String> for StorePath {
        const NAME: &'static str = "OCTORU_STORE_PATH";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Path of the redb store file (supports ~)";

        fn parse(value: &str) -> EnvResult<String> {
            parse_non_empty_path(value, Self::NAME)
        }
    }

    /// 内置词典文件
    pub struct BundledDict;
    impl EnvVar<String> for BundledDict {
        const NAME: &'static str = "OCTORU_BUNDLED_DICT";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Path of bundled-dictionary.json";

        fn parse(value: &str) -> EnvResult<String> {
            parse_non_empty_path(value, Self::NAME)
        }
    }

    /// 内置词典元数据文件
    pub struct BundledMeta;
    impl EnvVar<String> for BundledMeta {
        const NAME: &'static str = "OCTORU_BUNDLED_META";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Path of dict-version.json";

        fn parse(value: &str) -> EnvResult<String> {
            parse_non_empty_path(value, Self::NAME)
        }
    }

    /// 旧版合并词典被视为"已定制"的条目阈值
    pub struct LegacyThreshold;
    impl EnvVar<usize> for LegacyThreshold {
        const NAME: &'static str = "OCTORU_LEGACY_THRESHOLD";
        const DEFAULT: Option<usize> = Some(100);
        const DESCRIPTION: &'static str =
            "Legacy dictionary size above which bundled keys are diffed out during migration";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 1_000_000)
        }
    }

    /// 自动巡检每个页面的停留时间
    pub struct AuditDwell;
    impl EnvVar<Duration> for AuditDwell {
        const NAME: &'static str = "OCTORU_AUDIT_DWELL_MS";
        const DEFAULT: Option<Duration> = Some(Duration::from_millis(3500));
        const DESCRIPTION: &'static str = "Per-URL dwell of the auto audit in milliseconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            let ms = parse_positive_usize(value, Self::NAME, 1, 600_000)?;
            Ok(Duration::from_millis(ms as u64))
        }
    }
}

fn parse_non_empty_path(value: &str, var_name: &str) -> EnvResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: "Path must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

pub(crate) fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!(
                "Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled",
                value
            ),
        }),
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is above maximum {}", num, max),
        });
    }

    Ok(num)
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables Documentation\n\n");

    docs.push_str("## Core Configuration\n\n");
    docs.push_str(&format!(
        "- `{}`: {} (default: \"info\")\n",
        core::LogLevel::NAME,
        core::LogLevel::DESCRIPTION
    ));
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        core::NoColor::NAME,
        core::NoColor::DESCRIPTION,
        core::NoColor::DEFAULT
    ));

    docs.push_str("\n## Store Configuration\n\n");
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        store::StorePath::NAME,
        store::StorePath::DESCRIPTION,
        store::StorePath::DEFAULT
    ));
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        store::BundledDict::NAME,
        store::BundledDict::DESCRIPTION,
        store::BundledDict::DEFAULT
    ));
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        store::BundledMeta::NAME,
        store::BundledMeta::DESCRIPTION,
        store::BundledMeta::DEFAULT
    ));
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        store::LegacyThreshold::NAME,
        store::LegacyThreshold::DESCRIPTION,
        store::LegacyThreshold::DEFAULT
    ));
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        store::AuditDwell::NAME,
        store::AuditDwell::DESCRIPTION,
        store::AuditDwell::DEFAULT
    ));

    docs
}
