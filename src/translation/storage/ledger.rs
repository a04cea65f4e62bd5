//! 遥测账本
//!
//! 未翻译列表、覆盖率账本与收集器调试账本。读取时格式不符的数据按空值处理，
//! 合并只做单调的集合并与计数累加，因此并发写回时最后写入者获胜也不会损坏账本。

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::translation::pipeline::context::Section;
use crate::translation::pipeline::filters::should_drop_untranslated_noise;
use crate::utils::now_iso;

fn trimmed_strings(value: Option<&Value>) -> impl Iterator<Item = String> + '_ {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// 未翻译列表
// ============================================================================

/// 读取存储中的未翻译列表
pub fn read_untranslated(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// 合并新条目：去重、排序、截断到上限
pub fn merge_untranslated(existing: &[String], items: &Value, cap: usize) -> Vec<String> {
    let mut set: BTreeSet<String> = existing.iter().cloned().collect();
    set.extend(trimmed_strings(Some(items)));
    set.into_iter().take(cap).collect()
}

/// 清理列表中的噪声，返回保留的条目
pub fn prune_untranslated(list: &[String]) -> Vec<String> {
    list.iter()
        .filter(|key| !should_drop_untranslated_noise(key))
        .cloned()
        .collect()
}

// ============================================================================
// 覆盖率
// ============================================================================

/// 一条覆盖率观测
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoverageItem {
    pub section: Section,
    pub key: String,
}

fn loose_section(raw: Option<&str>) -> Section {
    Section::from_loose(&raw.unwrap_or_default().to_lowercase())
}

/// 清洗上报的观测：`{section, key}` 数组，键为空的行丢弃，重复行只保留一次
pub fn normalize_coverage_items(items: &Value) -> Vec<CoverageItem> {
    let mut seen = HashSet::new();
    items
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|row| {
            let key = row.get("key")?.as_str()?.trim();
            if key.is_empty() {
                return None;
            }
            Some(CoverageItem {
                section: loose_section(row.get("section").and_then(Value::as_str)),
                key: key.to_string(),
            })
        })
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// 单个分区的两组键
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSection {
    pub translated: Vec<String>,
    pub untranslated: Vec<String>,
}

/// 覆盖率账本
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageLedger {
    pub sections: BTreeMap<Section, CoverageSection>,
    pub updated_at: String,
}

impl Default for CoverageLedger {
    fn default() -> Self {
        Self {
            sections: Section::ALL
                .into_iter()
                .map(|s| (s, CoverageSection::default()))
                .collect(),
            updated_at: String::new(),
        }
    }
}

impl CoverageLedger {
    /// 从存储值恢复；同一键同时出现在两组时以"已翻译"为准
    pub fn normalize(value: Option<&Value>) -> Self {
        let mut ledger = Self::default();
        let Some(Value::Object(payload)) = value else {
            return ledger;
        };
        if let Some(Value::Object(sections)) = payload.get("sections") {
            for (raw_section, row) in sections {
                let translated: BTreeSet<String> = trimmed_strings(row.get("translated")).collect();
                let untranslated: BTreeSet<String> = trimmed_strings(row.get("untranslated"))
                    .filter(|key| !translated.contains(key))
                    .collect();
                ledger.sections.insert(
                    loose_section(Some(raw_section)),
                    CoverageSection {
                        translated: translated.into_iter().collect(),
                        untranslated: untranslated.into_iter().collect(),
                    },
                );
            }
        }
        if let Some(Value::String(updated_at)) = payload.get("updatedAt") {
            ledger.updated_at = updated_at.clone();
        }
        ledger
    }

    /// 合并一批观测
    ///
    /// 已翻译的键加入 translated 并从 untranslated 移除；未翻译的键只有在
    /// translated 中不存在时才加入。两组各自排序后截断到上限。
    pub fn merge(&mut self, translated: &[CoverageItem], untranslated: &[CoverageItem], cap: usize) {
        for section in Section::ALL {
            let row = self.sections.entry(section).or_default();
            let mut t: BTreeSet<String> = row.translated.drain(..).collect();
            let mut u: BTreeSet<String> = row.untranslated.drain(..).collect();

            for item in translated.iter().filter(|i| i.section == section) {
                u.remove(&item.key);
                t.insert(item.key.clone());
            }
            for item in untranslated.iter().filter(|i| i.section == section) {
                if !t.contains(&item.key) {
                    u.insert(item.key.clone());
                }
            }

            row.translated = t.into_iter().take(cap).collect();
            row.untranslated = u.into_iter().take(cap).collect();
        }
        self.updated_at = now_iso();
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// 汇总：各分区计数与百分比（空分区为 100）
    pub fn summary(&self) -> CoverageSummary {
        let mut sections = BTreeMap::new();
        let mut translated_total = 0;
        let mut untranslated_total = 0;
        for section in Section::ALL {
            let row = self.sections.get(&section).cloned().unwrap_or_default();
            let translated_count = row.translated.len();
            let untranslated_count = row.untranslated.len();
            translated_total += translated_count;
            untranslated_total += untranslated_count;
            sections.insert(
                section,
                SectionSummary {
                    translated_count,
                    untranslated_count,
                    total: translated_count + untranslated_count,
                    percent: percent(translated_count, translated_count + untranslated_count),
                    untranslated: row.untranslated,
                },
            );
        }
        let total = translated_total + untranslated_total;
        CoverageSummary {
            sections,
            totals: CoverageTotals {
                translated_count: translated_total,
                untranslated_count: untranslated_total,
                total,
                percent: percent(translated_total, total),
            },
            updated_at: self.updated_at.clone(),
        }
    }
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    (part as f64 * 100.0 / total as f64).round() as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSummary {
    pub translated_count: usize,
    pub untranslated_count: usize,
    pub total: usize,
    pub percent: u32,
    pub untranslated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageTotals {
    pub translated_count: usize,
    pub untranslated_count: usize,
    pub total: usize,
    pub percent: u32,
}

/// 覆盖率汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub sections: BTreeMap<Section, SectionSummary>,
    pub totals: CoverageTotals,
    pub updated_at: String,
}

// ============================================================================
// 收集器调试
// ============================================================================

/// 拒绝原因计数与样本
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLedger {
    pub reasons: BTreeMap<String, u64>,
    pub samples: BTreeMap<String, Vec<String>>,
    pub updated_at: String,
}

fn loose_count(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(true) => 1.0,
        _ => return None,
    };
    (n.is_finite() && n > 0.0).then(|| n.floor() as u64)
}

fn push_samples(target: &mut Vec<String>, incoming: impl IntoIterator<Item = String>, cap: usize) {
    for sample in incoming {
        if target.len() >= cap {
            break;
        }
        if !target.contains(&sample) {
            target.push(sample);
        }
    }
}

impl DebugLedger {
    /// 从存储值或上报载荷恢复：计数必须为正，样本去空白、去重并截断
    pub fn normalize(value: Option<&Value>, sample_cap: usize) -> Self {
        let mut ledger = Self::default();
        let Some(Value::Object(payload)) = value else {
            return ledger;
        };
        let samples = payload.get("samples");
        if let Some(Value::Object(reasons)) = payload.get("reasons") {
            for (raw_reason, raw_count) in reasons {
                let reason = raw_reason.trim();
                let Some(count) = loose_count(raw_count).filter(|_| !reason.is_empty()) else {
                    continue;
                };
                ledger.reasons.insert(reason.to_string(), count);
                let mut list = Vec::new();
                push_samples(
                    &mut list,
                    trimmed_strings(samples.and_then(|s| s.get(reason))),
                    sample_cap,
                );
                ledger.samples.insert(reason.to_string(), list);
            }
        }
        if let Some(Value::String(updated_at)) = payload.get("updatedAt") {
            ledger.updated_at = updated_at.clone();
        }
        ledger
    }

    /// 计数相加，样本取并集
    pub fn merge(&self, incoming: &DebugLedger, sample_cap: usize) -> DebugLedger {
        let mut next = self.clone();
        for (reason, count) in &incoming.reasons {
            let total = next.reasons.entry(reason.clone()).or_insert(0);
            *total = total.saturating_add(*count);
            let list = next.samples.entry(reason.clone()).or_default();
            let extra = incoming.samples.get(reason).cloned().unwrap_or_default();
            push_samples(list, extra, sample_cap);
        }
        next.updated_at = now_iso();
        next
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
