//! 自动巡检
//!
//! 驱动一个一次性页面依次打开一组地址，每页加载后触发强制扫描，
//! 停留一段时间让页面收集未翻译条目。停止标志在每个地址之间检查；
//! 无论以何种方式结束，页面都会被关闭、状态都会复位。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::cached_regex;
use crate::translation::error::TranslationResult;
use crate::utils::{is_match, now_iso};

/// 巡检进度（对外展示的部分）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditState {
    pub running: bool,
    pub current_index: usize,
    pub total: usize,
    pub current_url: String,
    pub started_at: String,
    pub finished_at: String,
}

/// 巡检使用的页面宿主
pub trait AuditDriver: Send + Sync + 'static {
    /// 打开一次性页面并载入第一个地址
    fn open(&self, url: &str) -> impl Future<Output = TranslationResult<()>> + Send;

    fn navigate(&self, url: &str) -> impl Future<Output = TranslationResult<()>> + Send;

    /// 等待页面加载完成；调用方负责超时
    fn wait_for_load(&self) -> impl Future<Output = ()> + Send;

    /// 让页面重新扫描
    fn force_scan(&self) -> impl Future<Output = ()> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;

    /// 当前活动页面生成的巡检地址
    fn active_page_urls(&self) -> impl Future<Output = Vec<String>> + Send;
}

/// 没有页面宿主时使用：只推进进度，不打开任何页面
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedDriver;

impl AuditDriver for DetachedDriver {
    async fn open(&self, url: &str) -> TranslationResult<()> {
        tracing::debug!("无页面宿主，跳过打开 {}", url);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> TranslationResult<()> {
        tracing::debug!("无页面宿主，跳过导航 {}", url);
        Ok(())
    }

    async fn wait_for_load(&self) {}

    async fn force_scan(&self) {}

    async fn close(&self) {}

    async fn active_page_urls(&self) -> Vec<String> {
        Vec::new()
    }
}

/// 只接受 github.com 与 gist.github.com 的 https 地址，去重并保持顺序
pub fn normalize_audit_urls<'a>(urls: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in urls {
        let url = raw.trim();
        if url.is_empty() || !is_match(cached_regex!(r"(?i)^https://(github\.com|gist\.github\.com)/"), url) {
            continue;
        }
        if !out.iter().any(|u| u == url) {
            out.push(url.to_string());
        }
    }
    out
}

/// 请求中的地址列表
pub fn requested_urls(value: &Value) -> Vec<String> {
    let strings: Vec<&str> = value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect();
    normalize_audit_urls(strings)
}

/// 请求中的停留时间：数字或数字字符串，非正数视为缺失
pub fn requested_dwell_ms(value: &Value) -> Option<u64> {
    let ms = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (ms.is_finite() && ms > 0.0).then(|| ms as u64)
}

/// 巡检的共享控制块
#[derive(Debug, Default)]
pub struct AuditControl {
    state: Mutex<AuditState>,
    stop_requested: AtomicBool,
}

impl AuditControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AuditState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> AuditState {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// 标记开始；已在运行时返回 `false`
    pub fn begin(&self, total: usize) -> bool {
        let mut state = self.lock();
        if state.running {
            return false;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        *state = AuditState {
            running: true,
            current_index: 0,
            total,
            current_url: String::new(),
            started_at: now_iso(),
            finished_at: String::new(),
        };
        true
    }

    fn advance(&self, index: usize, url: &str) {
        let mut state = self.lock();
        state.current_index = index;
        state.current_url = url.to_string();
    }

    fn finish(&self) {
        let mut state = self.lock();
        state.running = false;
        state.current_url.clear();
        state.finished_at = now_iso();
        self.stop_requested.store(false, Ordering::SeqCst);
    }
}

/// 巡检参数
#[derive(Debug, Clone)]
pub struct AuditPlan {
    pub urls: Vec<String>,
    pub dwell: Duration,
    pub load_timeout: Duration,
}

/// 离开作用域时复位巡检状态，驱动方 panic 时也不会残留"运行中"
struct FinishOnDrop<'a>(&'a AuditControl);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

async fn visit_urls<D: AuditDriver>(
    driver: Arc<D>,
    control: Arc<AuditControl>,
    plan: AuditPlan,
    opened: Arc<AtomicBool>,
) -> TranslationResult<()> {
    let Some(first) = plan.urls.first() else {
        return Ok(());
    };
    driver.open(first).await?;
    opened.store(true, Ordering::SeqCst);

    for (i, url) in plan.urls.iter().enumerate() {
        if control.stop_requested() {
            tracing::info!("自动巡检已按请求停止");
            break;
        }
        control.advance(i + 1, url);
        if i > 0 {
            driver.navigate(url).await?;
        }
        if tokio::time::timeout(plan.load_timeout, driver.wait_for_load())
            .await
            .is_err()
        {
            tracing::warn!("页面加载超时: {}", url);
        }
        driver.force_scan().await;
        tokio::time::sleep(plan.dwell).await;
    }
    Ok(())
}

/// 执行巡检；调用前必须已经 [`AuditControl::begin`]
///
/// 逐页访问在独立任务中进行，出错或 panic 后仍会关闭页面并复位状态。
pub async fn run_audit<D: AuditDriver>(driver: Arc<D>, control: Arc<AuditControl>, plan: AuditPlan) {
    tracing::info!("自动巡检开始: {} 个地址", plan.urls.len());
    let _finish = FinishOnDrop(&control);
    let opened = Arc::new(AtomicBool::new(false));

    let visit = tokio::spawn(visit_urls(
        driver.clone(),
        control.clone(),
        plan,
        opened.clone(),
    ));
    match visit.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("自动巡检中断: {}", e),
        Err(e) => tracing::error!("自动巡检任务异常退出: {}", e),
    }

    if opened.load(Ordering::SeqCst) {
        driver.close().await;
    }
    tracing::info!("自动巡检结束");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::error::TranslationError;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_navigate: bool,
        hang_load: bool,
        panic_scan: bool,
    }

    impl Recorder {
        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AuditDriver for Recorder {
        async fn open(&self, url: &str) -> TranslationResult<()> {
            self.push(format!("open {}", url));
            Ok(())
        }

        async fn navigate(&self, url: &str) -> TranslationResult<()> {
            self.push(format!("navigate {}", url));
            if self.fail_navigate {
                return Err(TranslationError::AuditError("tab_gone".into()));
            }
            Ok(())
        }

        async fn wait_for_load(&self) {
            if self.hang_load {
                std::future::pending::<()>().await;
            }
        }

        async fn force_scan(&self) {
            self.push("scan".into());
            if self.panic_scan {
                panic!("page crashed");
            }
        }

        async fn close(&self) {
            self.push("close".into());
        }

        async fn active_page_urls(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn plan(urls: &[&str]) -> AuditPlan {
        AuditPlan {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            dwell: Duration::from_millis(1500),
            load_timeout: Duration::from_secs(20),
        }
    }

    #[test]
    fn test_url_filtering() {
        let urls = requested_urls(&json!([
            "https://github.com/a",
            " https://github.com/a ",
            "http://github.com/b",
            "https://gist.github.com/u",
            "https://example.com/",
            5
        ]));
        assert_eq!(urls, vec!["https://github.com/a", "https://gist.github.com/u"]);
        assert!(requested_urls(&Value::Null).is_empty());
    }

    #[test]
    fn test_dwell_parsing() {
        assert_eq!(requested_dwell_ms(&json!(2000)), Some(2000));
        assert_eq!(requested_dwell_ms(&json!("2500")), Some(2500));
        assert_eq!(requested_dwell_ms(&json!(0)), None);
        assert_eq!(requested_dwell_ms(&json!("abc")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_visits_every_url_and_closes() {
        let driver = Arc::new(Recorder::default());
        let control = Arc::new(AuditControl::new());
        assert!(control.begin(2));
        assert!(!control.begin(2));

        run_audit(driver.clone(), control.clone(), plan(&["https://github.com/a", "https://github.com/b"])).await;
        assert_eq!(
            driver.calls(),
            vec![
                "open https://github.com/a",
                "scan",
                "navigate https://github.com/b",
                "scan",
                "close"
            ]
        );
        let state = control.state();
        assert!(!state.running);
        assert_eq!(state.current_index, 2);
        assert!(state.current_url.is_empty());
        assert!(!state.finished_at.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_checked_between_urls() {
        let driver = Arc::new(Recorder::default());
        let control = Arc::new(AuditControl::new());
        control.begin(3);
        let task = tokio::spawn(run_audit(
            driver.clone(),
            control.clone(),
            plan(&["https://github.com/a", "https://github.com/b", "https://github.com/c"]),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        control.request_stop();
        task.await.unwrap();

        assert_eq!(driver.calls(), vec!["open https://github.com/a", "scan", "close"]);
        assert!(!control.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_still_closes_page() {
        let driver = Arc::new(Recorder {
            fail_navigate: true,
            hang_load: true,
            ..Recorder::default()
        });
        let control = Arc::new(AuditControl::new());
        control.begin(2);
        run_audit(driver.clone(), control.clone(), plan(&["https://github.com/a", "https://github.com/b"])).await;

        let calls = driver.calls();
        assert_eq!(calls.last().map(String::as_str), Some("close"));
        assert!(!control.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_panic_still_closes_and_resets() {
        let driver = Arc::new(Recorder {
            panic_scan: true,
            ..Recorder::default()
        });
        let control = Arc::new(AuditControl::new());
        control.begin(2);
        run_audit(driver.clone(), control.clone(), plan(&["https://github.com/a", "https://github.com/b"])).await;

        assert_eq!(driver.calls(), vec!["open https://github.com/a", "scan", "close"]);
        let state = control.state();
        assert!(!state.running);
        assert!(!state.finished_at.is_empty());
        // 可以再次开始
        assert!(control.begin(1));
    }
}
