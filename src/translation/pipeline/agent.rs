//! 页面代理
//!
//! 页面侧全部状态的唯一持有者。宿主与代理共享同一个 [`LiveDocument`]：
//! 宿主修改文档后发送 [`PageEvent::Mutations`]，代理取出变更记录并处理；
//! 存储侧的通知、导航与页面请求同样经由收件箱到达。
//!
//! 代理持有 `Rc`，只能在单线程（`LocalSet` 或 current-thread 运行时）中运行。

use std::collections::HashSet;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use markup5ever_rcdom::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::parsers::html::dom::{node_key, LiveDocument, NodeKey};
use crate::translation::config::Settings;
use crate::translation::error::helpers::internal_error;
use crate::translation::error::TranslationResult;
use crate::translation::messages::{PageMessage, PageRequest, PageResponse, StoreRequest, StoreResponse};
use crate::translation::storage::Dictionary;

use super::context::{build_audit_urls, find_first_repo_slug, signed_in_user, PageContext};
use super::resolver::Resolver;
use super::synchronizer::Synchronizer;
use super::table::TranslationTable;
use super::PipelineOptions;

/// 收件箱中的事件
#[derive(Debug)]
pub enum PageEvent {
    /// 宿主修改了文档
    Mutations,
    /// 存储侧推送的通知
    Message(PageMessage),
    /// 页面地址变化
    Navigate(String),
    /// 需要应答的请求
    Request(PageRequest, oneshot::Sender<PageResponse>),
}

/// 页面访问存储侧的方式
pub trait StoreClient {
    fn request(&self, request: StoreRequest) -> impl Future<Output = TranslationResult<StoreResponse>>;
}

/// 页面代理
pub struct PageAgent<C> {
    doc: Rc<LiveDocument>,
    client: C,
    sink: mpsc::UnboundedSender<StoreRequest>,
    sync: Synchronizer,
    bundled: Dictionary,
    glossary: Dictionary,
    debounce: Duration,
    observing: bool,
    queue: Vec<Handle>,
    queued: HashSet<NodeKey>,
    queue_due: Option<Instant>,
}

impl<C: StoreClient> PageAgent<C> {
    pub fn new(
        doc: Rc<LiveDocument>,
        client: C,
        sink: mpsc::UnboundedSender<StoreRequest>,
        options: &PipelineOptions,
        location: &str,
    ) -> Self {
        let sync = Synchronizer::new(
            Settings::default(),
            Resolver::default(),
            options.limits,
            options.timers,
            PageContext::new(location),
        );
        Self {
            doc,
            client,
            sink,
            sync,
            bundled: Dictionary::new(),
            glossary: Dictionary::new(),
            debounce: options.mutation_debounce,
            observing: false,
            queue: Vec::new(),
            queued: HashSet::new(),
            queue_due: None,
        }
    }

    /// 页面自带的内置词典与术语表
    pub fn with_dictionaries(mut self, bundled: Dictionary, glossary: Dictionary) -> Self {
        self.bundled = bundled;
        self.glossary = glossary;
        self
    }

    pub fn document(&self) -> &Rc<LiveDocument> {
        &self.doc
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 启动：载入已知未翻译条目，然后按存储中的设置处理页面
    pub async fn init(&mut self) -> TranslationResult<()> {
        match self.client.request(StoreRequest::GetUntranslated).await {
            Ok(StoreResponse::Untranslated { list }) => {
                tracing::debug!("已知未翻译条目 {} 条", list.len());
                self.sync.telemetry_mut().load_known(list);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("读取未翻译列表失败: {}", e),
        }
        self.reload().await
    }

    async fn fetch_settings(&self) -> TranslationResult<(Settings, Dictionary)> {
        match self.client.request(StoreRequest::GetSettings).await? {
            StoreResponse::Settings {
                settings,
                effective_translations,
                ..
            } => Ok((settings, effective_translations)),
            other => Err(internal_error(format!("设置应答格式不符: {:?}", other))),
        }
    }

    /// 重新读取设置与词典并重建翻译状态
    pub async fn reload(&mut self) -> TranslationResult<()> {
        let (settings, effective) = self.fetch_settings().await?;
        let glossary = settings.glossary_mode.then_some(&self.glossary);
        let table = TranslationTable::build(&self.bundled, &effective, glossary);

        let was_enabled = self.sync.settings().enabled;
        self.sync.reconfigure(settings, Resolver::new(table));
        if was_enabled {
            self.stop_observing();
            self.sync.revert_all(&self.doc);
        }
        if self.sync.settings().enabled {
            self.walk_body();
            self.start_observing();
        }
        tracing::debug!("页面已重新加载, 启用: {}", self.sync.settings().enabled);
        Ok(())
    }

    fn start_observing(&mut self) {
        self.doc.take_records();
        self.observing = true;
    }

    fn stop_observing(&mut self) {
        self.observing = false;
        self.queue.clear();
        self.queued.clear();
        self.queue_due = None;
        self.sync.telemetry_mut().clear_page_queues();
        self.sync.clear_caches();
    }

    fn walk_body(&mut self) {
        if let Some(body) = self.doc.body() {
            self.sync.translate_subtree(&self.doc, &body);
        }
    }

    // ========================================================================
    // 事件处理
    // ========================================================================

    /// 处理单个事件
    pub async fn handle_event(&mut self, event: PageEvent) {
        match event {
            PageEvent::Mutations => self.handle_mutations(Instant::now()),
            PageEvent::Message(PageMessage::Reload) => {
                if let Err(e) = self.reload().await {
                    tracing::warn!("重新加载失败: {}", e);
                }
            }
            PageEvent::Message(PageMessage::ForceScan) => self.force_scan(Instant::now()),
            PageEvent::Navigate(url) => self.navigate(&url),
            PageEvent::Request(request, reply) => {
                if reply.send(self.respond(request)).is_err() {
                    tracing::debug!("页面请求的应答方已离开");
                }
            }
        }
    }

    fn handle_mutations(&mut self, now: Instant) {
        let records = self.doc.take_records();
        if !self.observing || records.is_empty() {
            return;
        }
        let queued = self.sync.apply_mutations(&self.doc, records);
        for el in queued {
            self.enqueue(el, now);
        }
    }

    fn enqueue(&mut self, el: Handle, now: Instant) {
        if self.queued.insert(node_key(&el)) {
            self.queue.push(el);
        }
        self.queue_due.get_or_insert(now + self.debounce);
    }

    fn flush_queue(&mut self) {
        self.queue_due = None;
        let queue = std::mem::take(&mut self.queue);
        self.queued.clear();
        if !self.sync.settings().enabled {
            return;
        }
        tracing::debug!("处理排队元素 {} 个", queue.len());
        for el in queue {
            if self.doc.is_connected(&el) {
                self.sync.translate_subtree(&self.doc, &el);
            }
        }
    }

    fn force_scan(&mut self, now: Instant) {
        self.sync.clear_caches();
        if let Some(body) = self.doc.body() {
            self.enqueue(body, now);
        }
    }

    /// 单页应用内的地址变化
    pub fn navigate(&mut self, url: &str) {
        self.sync.set_context(PageContext::new(url));
        if !self.sync.settings().enabled {
            return;
        }
        self.sync.clear_caches();
        self.walk_body();
    }

    fn respond(&self, request: PageRequest) -> PageResponse {
        match request {
            PageRequest::BuildAuditUrls => {
                let user = signed_in_user(&self.doc);
                let slug = find_first_repo_slug(&self.doc);
                PageResponse::AuditUrls {
                    urls: build_audit_urls(user.as_deref(), slug.as_ref()),
                }
            }
            PageRequest::BuildUntranslatedReport => PageResponse::UntranslatedReport {
                selected_text: String::new(),
                page_url: self.sync.classifier().context().url().to_string(),
            },
        }
    }

    // ========================================================================
    // 计时
    // ========================================================================

    /// 最近的到期时刻（排队翻译或遥测刷新）
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.queue_due, self.sync.telemetry().next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// 处理所有已到期的计时器
    pub fn on_tick(&mut self, now: Instant) {
        if self.queue_due.is_some_and(|due| due <= now) {
            self.flush_queue();
        }
        self.sync.telemetry_mut().flush_due(now, &self.sink);
    }

    /// 事件循环；收件箱关闭后刷新遥测并退出
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<PageEvent>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = wait_for(deadline) => self.on_tick(Instant::now()),
            }
        }
        self.sync.telemetry_mut().flush_all(&self.sink);
        tracing::debug!("页面代理已退出");
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::dom::{descendant_elements, descendant_text_nodes, text_of};
    use serde_json::Value;
    use std::cell::RefCell;

    struct FakeStore {
        settings: RefCell<Settings>,
        dict: Dictionary,
    }

    impl StoreClient for Rc<FakeStore> {
        async fn request(&self, request: StoreRequest) -> TranslationResult<StoreResponse> {
            match request {
                StoreRequest::GetSettings => Ok(StoreResponse::Settings {
                    settings: self.settings.borrow().clone(),
                    custom_translations: Dictionary::new(),
                    effective_translations: self.dict.clone(),
                }),
                StoreRequest::GetUntranslated => Ok(StoreResponse::Untranslated {
                    list: vec!["Known".to_string()],
                }),
                _ => Ok(StoreResponse::Ack),
            }
        }
    }

    fn agent(html: &str) -> (PageAgent<Rc<FakeStore>>, Rc<FakeStore>, mpsc::UnboundedReceiver<StoreRequest>) {
        let store = Rc::new(FakeStore {
            settings: RefCell::new(Settings::default()),
            dict: [("Issues", "Задачи"), ("Pulls", "Запросы")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        let doc = Rc::new(LiveDocument::parse(html).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = PageAgent::new(doc, store.clone(), tx, &PipelineOptions::default(), "https://github.com/");
        (agent, store, rx)
    }

    fn texts(doc: &LiveDocument) -> Vec<String> {
        descendant_text_nodes(&doc.body().unwrap())
            .iter()
            .filter_map(text_of)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_translates_and_observes() {
        let (mut agent, _store, _rx) = agent("<html><body><nav><a href='/issues'>Issues</a></nav></body></html>");
        agent.init().await.unwrap();
        assert!(agent.is_observing());
        assert_eq!(texts(agent.document()), vec!["Задачи"]);
        assert!(agent.synchronizer().telemetry().is_known("Known"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_elements_wait_for_debounce() {
        let (mut agent, _store, _rx) = agent("<html><body><nav id='n'></nav></body></html>");
        agent.init().await.unwrap();

        let doc = agent.document().clone();
        let nav = descendant_elements(&doc.body().unwrap())[0].clone();
        let span = doc.create_element("span", &[]);
        doc.append_child(&span, doc.create_text("Pulls"));
        // 脱离文档时的构建不在观察范围内
        doc.take_records();
        doc.append_child(&nav, span);
        agent.handle_event(PageEvent::Mutations).await;
        assert_eq!(agent.queued_len(), 1);
        assert_eq!(texts(&doc), vec!["Pulls"]);

        let due = agent.next_deadline().unwrap();
        tokio::time::sleep_until(due).await;
        agent.on_tick(Instant::now());
        assert_eq!(agent.queued_len(), 0);
        assert_eq!(texts(&doc), vec!["Запросы"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_reload_reverts_page() {
        let (mut agent, store, _rx) = agent("<html><body><nav><span>Issues</span></nav></body></html>");
        agent.init().await.unwrap();
        assert_eq!(texts(agent.document()), vec!["Задачи"]);

        store.settings.borrow_mut().enabled = false;
        agent.handle_event(PageEvent::Message(PageMessage::Reload)).await;
        assert!(!agent.is_observing());
        assert_eq!(texts(agent.document()), vec!["Issues"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_requests() {
        let (mut agent, _store, _rx) = agent(
            "<html><head><meta name='user-login' content='octocat'></head><body></body></html>",
        );
        agent.init().await.unwrap();

        let (tx, rx) = oneshot::channel();
        agent
            .handle_event(PageEvent::Request(PageRequest::BuildUntranslatedReport, tx))
            .await;
        let report = serde_json::to_value(rx.await.unwrap()).unwrap();
        assert_eq!(report["selectedText"], Value::from(""));
        assert_eq!(report["pageUrl"], Value::from("https://github.com/"));

        let (tx, rx) = oneshot::channel();
        agent
            .handle_event(PageEvent::Request(PageRequest::BuildAuditUrls, tx))
            .await;
        let PageResponse::AuditUrls { urls } = rx.await.unwrap() else {
            panic!("expected urls");
        };
        assert!(urls.iter().any(|u| u.contains("octocat")));
        assert!(urls.iter().all(|u| !u.contains('{')));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_telemetry_on_close() {
        let (mut agent, _store, mut rx) =
            agent("<html><body><nav><a href='/new'>Sign in</a></nav></body></html>");
        agent.init().await.unwrap();

        let (events, inbox) = mpsc::unbounded_channel();
        drop(events);
        agent.run(inbox).await;

        let mut kinds = Vec::new();
        while let Ok(request) = rx.try_recv() {
            kinds.push(request.kind());
        }
        assert!(kinds.contains(&"ghruReportUntranslated"));
    }
}
