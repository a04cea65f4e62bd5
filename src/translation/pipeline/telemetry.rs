//! 页面遥测
//!
//! 未翻译条目、覆盖率与收集器调试计数在页面侧先缓冲，
//! 各自的计时器到期后整批发往存储侧。计时器一旦设定不会因新事件而推迟。

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::translation::config::{constants, OverlayConfig};
use crate::translation::messages::StoreRequest;
use crate::utils::now_iso;

use super::context::Section;
use super::filters::NoiseReason;

/// 遥测的出口
pub trait TelemetrySink {
    fn send(&self, request: StoreRequest);
}

impl TelemetrySink for mpsc::UnboundedSender<StoreRequest> {
    fn send(&self, request: StoreRequest) {
        if let Err(e) = mpsc::UnboundedSender::send(self, request) {
            tracing::debug!("遥测通道已关闭，丢弃 {}", e.0.kind());
        }
    }
}

/// 刷新间隔与采样上限
#[derive(Debug, Clone, Copy)]
pub struct TelemetryTimers {
    pub untranslated: Duration,
    pub coverage: Duration,
    pub debug: Duration,
    pub sample_cap: usize,
    pub sample_chars: usize,
}

impl Default for TelemetryTimers {
    fn default() -> Self {
        Self {
            untranslated: constants::UNTRANSLATED_FLUSH,
            coverage: constants::COVERAGE_FLUSH,
            debug: constants::DEBUG_FLUSH,
            sample_cap: constants::PAGE_DEBUG_SAMPLE_CAP,
            sample_chars: constants::DEBUG_SAMPLE_CHARS,
        }
    }
}

impl From<&OverlayConfig> for TelemetryTimers {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            untranslated: config.untranslated_flush(),
            coverage: config.coverage_flush(),
            debug: config.debug_flush(),
            sample_cap: config.page_debug_sample_cap,
            sample_chars: config.debug_sample_chars,
        }
    }
}

/// 页面侧遥测缓冲
#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    timers: TelemetryTimers,
    /// 本会话已知的未翻译键（含存储中已有的）
    known_untranslated: HashSet<String>,
    untranslated_pending: Vec<String>,
    coverage_translated: BTreeSet<(Section, String)>,
    coverage_untranslated: BTreeSet<(Section, String)>,
    debug_reasons: BTreeMap<NoiseReason, u64>,
    debug_samples: BTreeMap<NoiseReason, Vec<String>>,
    untranslated_due: Option<Instant>,
    coverage_due: Option<Instant>,
    debug_due: Option<Instant>,
}

impl TelemetryAggregator {
    pub fn new(timers: TelemetryTimers) -> Self {
        Self {
            timers,
            ..Self::default()
        }
    }

    /// 载入存储中已有的未翻译键，避免重复上报
    pub fn load_known<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.known_untranslated.extend(keys);
    }

    pub fn is_known(&self, key: &str) -> bool {
        self.known_untranslated.contains(key)
    }

    /// 记录新的未翻译键；已知键返回 `false`
    pub fn record_untranslated(&mut self, key: String, now: Instant) -> bool {
        if !self.known_untranslated.insert(key.clone()) {
            return false;
        }
        self.untranslated_pending.push(key);
        self.untranslated_due.get_or_insert(now + self.timers.untranslated);
        true
    }

    /// 记录覆盖率观测；同一窗口内的"已翻译"会撤销"未翻译"
    pub fn record_coverage(&mut self, section: Section, key: String, translated: bool, now: Instant) {
        if key.is_empty() {
            return;
        }
        let entry = (section, key);
        if translated {
            self.coverage_untranslated.remove(&entry);
            self.coverage_translated.insert(entry);
        } else {
            self.coverage_untranslated.insert(entry);
        }
        self.coverage_due.get_or_insert(now + self.timers.coverage);
    }

    /// 计数一次拒绝并保存样本
    pub fn record_rejection(&mut self, reason: NoiseReason, key: &str, now: Instant) {
        *self.debug_reasons.entry(reason).or_insert(0) += 1;
        let sample: String = key.chars().take(self.timers.sample_chars).collect();
        if !sample.is_empty() {
            let samples = self.debug_samples.entry(reason).or_default();
            if samples.len() < self.timers.sample_cap && !samples.contains(&sample) {
                samples.push(sample);
            }
        }
        self.debug_due.get_or_insert(now + self.timers.debug);
    }

    /// 最近的刷新时刻
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.untranslated_due, self.coverage_due, self.debug_due]
            .into_iter()
            .flatten()
            .min()
    }

    /// 刷新所有已到期的缓冲
    pub fn flush_due(&mut self, now: Instant, sink: &dyn TelemetrySink) {
        if self.untranslated_due.is_some_and(|due| due <= now) {
            self.flush_untranslated(sink);
        }
        if self.coverage_due.is_some_and(|due| due <= now) {
            self.flush_coverage(sink);
        }
        if self.debug_due.is_some_and(|due| due <= now) {
            self.flush_debug(sink);
        }
    }

    /// 立即刷新全部缓冲
    pub fn flush_all(&mut self, sink: &dyn TelemetrySink) {
        self.flush_untranslated(sink);
        self.flush_coverage(sink);
        self.flush_debug(sink);
    }

    fn flush_untranslated(&mut self, sink: &dyn TelemetrySink) {
        self.untranslated_due = None;
        let items = std::mem::take(&mut self.untranslated_pending);
        if items.is_empty() {
            return;
        }
        tracing::debug!("上报未翻译条目 {} 条", items.len());
        sink.send(StoreRequest::ReportUntranslated { items: json!(items) });
    }

    fn flush_coverage(&mut self, sink: &dyn TelemetrySink) {
        self.coverage_due = None;
        let translated = std::mem::take(&mut self.coverage_translated);
        let untranslated = std::mem::take(&mut self.coverage_untranslated);
        if translated.is_empty() && untranslated.is_empty() {
            return;
        }
        let rows = |set: BTreeSet<(Section, String)>| {
            set.into_iter()
                .map(|(section, key)| json!({ "section": section.as_str(), "key": key }))
                .collect::<Vec<_>>()
        };
        sink.send(StoreRequest::ReportCoverage {
            translated: json!(rows(translated)),
            untranslated: json!(rows(untranslated)),
        });
    }

    fn flush_debug(&mut self, sink: &dyn TelemetrySink) {
        self.debug_due = None;
        let reasons = std::mem::take(&mut self.debug_reasons);
        let samples = std::mem::take(&mut self.debug_samples);
        if reasons.is_empty() {
            return;
        }
        let reasons: BTreeMap<&str, u64> =
            reasons.into_iter().map(|(r, n)| (r.as_str(), n)).collect();
        let samples: BTreeMap<&str, Vec<String>> =
            samples.into_iter().map(|(r, list)| (r.as_str(), list)).collect();
        sink.send(StoreRequest::ReportCollectorDebug {
            payload: json!({
                "reasons": reasons,
                "samples": samples,
                "updatedAt": now_iso(),
            }),
        });
    }

    /// 停止观察时丢弃覆盖率与调试缓冲；未翻译缓冲照常发送
    pub fn clear_page_queues(&mut self) {
        self.coverage_translated.clear();
        self.coverage_untranslated.clear();
        self.coverage_due = None;
        self.debug_reasons.clear();
        self.debug_samples.clear();
        self.debug_due = None;
    }

    pub fn pending_untranslated(&self) -> &[String] {
        &self.untranslated_pending
    }

    pub fn pending_coverage(&self) -> (usize, usize) {
        (self.coverage_translated.len(), self.coverage_untranslated.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<StoreRequest>>);

    impl TelemetrySink for Recorder {
        fn send(&self, request: StoreRequest) {
            self.0.borrow_mut().push(request);
        }
    }

    #[test]
    fn test_untranslated_is_deduplicated_per_session() {
        let now = Instant::now();
        let mut agg = TelemetryAggregator::new(TelemetryTimers::default());
        agg.load_known(vec!["Old".to_string()]);
        assert!(!agg.record_untranslated("Old".into(), now));
        assert!(agg.record_untranslated("New".into(), now));
        assert!(!agg.record_untranslated("New".into(), now));
        assert_eq!(agg.pending_untranslated(), ["New".to_string()]);
        assert_eq!(agg.next_deadline(), Some(now + Duration::from_millis(800)));
    }

    #[test]
    fn test_flush_only_due_streams() {
        let now = Instant::now();
        let sink = Recorder::default();
        let mut agg = TelemetryAggregator::new(TelemetryTimers::default());
        agg.record_untranslated("Sign in".into(), now);
        agg.record_coverage(Section::Pr, "Files".into(), true, now);

        agg.flush_due(now + Duration::from_millis(900), &sink);
        assert_eq!(sink.0.borrow().len(), 1);
        assert!(matches!(sink.0.borrow()[0], StoreRequest::ReportUntranslated { .. }));

        agg.flush_due(now + Duration::from_millis(1300), &sink);
        let sent = sink.0.borrow();
        assert_eq!(sent.len(), 2);
        match &sent[1] {
            StoreRequest::ReportCoverage { translated, untranslated } => {
                assert_eq!(translated, &json!([{"section": "pr", "key": "Files"}]));
                assert_eq!(untranslated, &json!([]));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(agg.next_deadline().is_none());
    }

    #[test]
    fn test_translated_cancels_pending_untranslated() {
        let now = Instant::now();
        let mut agg = TelemetryAggregator::new(TelemetryTimers::default());
        agg.record_coverage(Section::Other, "Stars".into(), false, now);
        agg.record_coverage(Section::Other, "Stars".into(), true, now);
        assert_eq!(agg.pending_coverage(), (1, 0));
    }

    #[test]
    fn test_debug_samples_are_capped() {
        let now = Instant::now();
        let sink = Recorder::default();
        let mut agg = TelemetryAggregator::new(TelemetryTimers::default());
        for i in 0..15 {
            agg.record_rejection(NoiseReason::Email, &format!("user{}@x.io", i), now);
        }
        agg.record_rejection(NoiseReason::Email, "user0@x.io", now);
        agg.flush_all(&sink);

        let sent = sink.0.borrow();
        let StoreRequest::ReportCollectorDebug { payload } = &sent[0] else {
            panic!("expected debug report");
        };
        assert_eq!(payload["reasons"]["email"], json!(16));
        assert_eq!(payload["samples"]["email"].as_array().unwrap().len(), 10);
    }
}
