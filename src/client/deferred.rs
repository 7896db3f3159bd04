//! Deferred client for synchronous callers.
//!
//! Each operation wraps its request into a unit of work, hands it to the
//! client's [`ExecutionStrategy`], and returns right away with a
//! [`Deferred`] result. Results can be passed on as parents of later calls
//! before they resolve; the dependent unit waits for them when it runs.
//!
//! ```text
//!   start_launch ──► Deferred<Id> ─┐
//!                                  ├─► start_item ──► Deferred<Id> ─┐
//!                                  │                                ├─► log / finish_item
//!                                  └────────────────────────────────┘
//! ```
//!
//! [`finish_launch`](DeferredClient::finish_launch) is the synchronization
//! point: the finish request is sent only after every earlier unit of this
//! client has completed and the remaining logs are sent, and the call
//! returns after the strategy has been drained.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::warn;

use super::{LaunchSlot, LaunchState, api_from_config};
use crate::api::ReportingApi;
use crate::batcher::LogBatcher;
use crate::config::Config;
use crate::deferred::{Deferred, MaybeDeferred};
use crate::error::ReportResult;
use crate::model::{Attachment, Attribute, Id, LogLevel, LogRecord};
use crate::request::{FinishItem, FinishLaunch, StartItem, StartLaunch};
use crate::stack::ItemStack;
use crate::strategy::{self, ExecutionStrategy, schedule};

/// Reporting client whose operations return deferred results.
///
/// # Example
///
/// ```no_run
/// use rp_client::client::DeferredClient;
/// use rp_client::config::load_config_str;
/// use rp_client::model::{timestamp, ItemType, LogLevel, Status};
/// use rp_client::request::{FinishItem, FinishLaunch, StartItem, StartLaunch};
///
/// let config = load_config_str(r#"
///     [server]
///     endpoint = "http://localhost:8080"
///     project = "demo"
/// "#)?;
/// let client = DeferredClient::from_config(&config)?;
///
/// client.start_launch(StartLaunch::new("nightly", timestamp()))?;
/// let test = client.start_item(StartItem::new("test_login", timestamp(), ItemType::Test))?;
/// client.log(timestamp(), "logged in", Some(LogLevel::Info), None, Some((&test).into()))?;
/// client.finish_item(&test, FinishItem::new(timestamp()).with_status(Status::Passed))?;
///
/// let message = client.finish_launch(FinishLaunch::new(timestamp()))?;
/// println!("{}", message.wait_blocking()?);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct DeferredClient {
    api: Arc<ReportingApi>,
    strategy: Arc<dyn ExecutionStrategy>,
    launch: Mutex<LaunchSlot>,
    items: ItemStack<Deferred<Id>>,
    batcher: Arc<LogBatcher>,
    inflight: Mutex<Vec<Deferred<()>>>,
}

impl DeferredClient {
    pub fn new(
        api: Arc<ReportingApi>,
        strategy: Arc<dyn ExecutionStrategy>,
        batcher: LogBatcher,
    ) -> Self {
        Self {
            api,
            strategy,
            launch: Mutex::new(LaunchSlot::new()),
            items: ItemStack::new(),
            batcher: Arc::new(batcher),
            inflight: Mutex::new(Vec::new()),
        }
    }

    /// Builds an HTTP-backed client with the configured strategy.
    ///
    /// When `[launch] uuid` is set, the client reports into that launch.
    pub fn from_config(config: &Config) -> ReportResult<Self> {
        let api = Arc::new(api_from_config(config)?);
        let strategy = strategy::from_config(&config.execution)?;
        let batcher = LogBatcher::new(config.batch.max_count, config.batch.max_payload_size);
        let client = Self::new(api, strategy, batcher);
        Ok(match &config.launch.uuid {
            Some(uuid) => client.with_launch(Id::new(uuid.as_str())),
            None => client,
        })
    }

    /// Reports into an existing launch instead of starting one.
    pub fn with_launch(self, launch: impl Into<MaybeDeferred<Id>>) -> Self {
        Self {
            launch: Mutex::new(LaunchSlot::attached(launch.into())),
            ..self
        }
    }

    fn slot(&self) -> MutexGuard<'_, LaunchSlot> {
        self.launch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inflight(&self) -> MutexGuard<'_, Vec<Deferred<()>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn strategy(&self) -> &Arc<dyn ExecutionStrategy> {
        &self.strategy
    }

    pub fn launch_state(&self) -> LaunchState {
        self.slot().state()
    }

    /// The launch identifier, resolved or pending.
    pub fn launch_id(&self) -> Option<MaybeDeferred<Id>> {
        self.slot().id()
    }

    /// The innermost open item.
    pub fn current_item(&self) -> Option<Deferred<Id>> {
        self.items.peek()
    }

    /// Units of this client that have not completed yet.
    pub fn pending_units(&self) -> usize {
        self.inflight().iter().filter(|c| !c.is_resolved()).count()
    }

    fn run<T, F>(&self, operation: &'static str, future: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: Future<Output = ReportResult<T>> + Send + 'static,
    {
        let scheduled = schedule(self.strategy.as_ref(), operation, future);
        let mut inflight = self.inflight();
        inflight.retain(|c| !c.is_resolved());
        inflight.push(scheduled.completion);
        scheduled.result
    }

    /// Starts the launch.
    ///
    /// Returns the existing identifier for a client attached to a launch.
    pub fn start_launch(&self, request: StartLaunch) -> ReportResult<MaybeDeferred<Id>> {
        let mut slot = self.slot();
        if let Some(existing) = slot.begin_start()? {
            return Ok(existing);
        }
        let api = Arc::clone(&self.api);
        let id = self.run("start_launch", async move { api.start_launch(&request).await });
        slot.started((&id).into());
        Ok(id.into())
    }

    /// Starts an item and makes it the current one.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::ImbalancedLifecycle`](crate::ReportError::ImbalancedLifecycle)
    /// if the launch has not been started.
    pub fn start_item(&self, request: StartItem) -> ReportResult<Deferred<Id>> {
        let launch = self.slot().current()?;
        let api = Arc::clone(&self.api);
        let id = self.run("start_item", async move {
            api.start_item(&launch, &request).await
        });
        self.items.push(id.clone());
        Ok(id)
    }

    /// Finishes `item`, which should be the current item.
    pub fn finish_item(
        &self,
        item: &Deferred<Id>,
        request: FinishItem,
    ) -> ReportResult<Deferred<String>> {
        let launch = self.slot().current()?;
        let current = self.items.pop()?;
        if !current.ptr_eq(item) {
            warn!("Finishing an item that is not the current item");
        }
        let api = Arc::clone(&self.api);
        let item: MaybeDeferred<Id> = item.into();
        Ok(self.run("finish_item", async move {
            api.finish_item(&launch, &item, &request).await
        }))
    }

    /// Buffers a log record, dispatching a batch once one is full.
    ///
    /// A record whose item is already known to be unreported is dropped
    /// with a warning. The result holds the service's per-record answers
    /// when this call dispatched a batch, and is empty otherwise.
    pub fn log(
        &self,
        time: impl Into<String>,
        message: impl Into<String>,
        level: Option<LogLevel>,
        attachment: Option<Attachment>,
        item: Option<MaybeDeferred<Id>>,
    ) -> ReportResult<MaybeDeferred<Vec<String>>> {
        let launch = self.slot().current()?;
        if let Some(item) = &item
            && matches!(item.peek(), Some(Ok(Id::NotFound)) | Some(Err(_)))
        {
            warn!("Log skipped: parent item was not reported");
            return Ok(MaybeDeferred::Resolved(Vec::new()));
        }

        let mut record = LogRecord::new(launch, time, message);
        record.level = level;
        record.attachment = attachment;
        record.item = item;

        match self.batcher.append(record) {
            Some(batch) => {
                let api = Arc::clone(&self.api);
                let sent = self.run("log_batch", async move { api.log_batch(batch).await });
                Ok(sent.into())
            }
            None => Ok(MaybeDeferred::Resolved(Vec::new())),
        }
    }

    /// Finishes the launch and drains the strategy.
    ///
    /// The finish request waits for every earlier unit of this client, then
    /// for the remaining buffered logs to be sent. For a launch this client
    /// did not start, no finish request is sent and the message is empty.
    pub fn finish_launch(&self, request: FinishLaunch) -> ReportResult<Deferred<String>> {
        let (launch, owned) = {
            let mut slot = self.slot();
            (slot.begin_finish()?, slot.owned())
        };
        let earlier = std::mem::take(&mut *self.inflight());
        let api = Arc::clone(&self.api);
        let batcher = Arc::clone(&self.batcher);

        let scheduled = schedule(self.strategy.as_ref(), "finish_launch", async move {
            for unit in earlier {
                let _ = unit.wait().await;
            }
            let remaining = batcher.flush();
            if !remaining.is_empty()
                && let Err(e) = api.log_batch(remaining).await
            {
                warn!("Failed to send remaining logs: {}", e);
            }
            if !owned {
                return Ok(String::new());
            }
            api.finish_launch(&launch, &request).await
        });
        self.slot().finishing(scheduled.completion);

        let report = self.strategy.drain_all();
        if !report.is_complete() {
            warn!(
                "Launch finish returned with {} unit(s) still running",
                report.abandoned
            );
        }
        Ok(scheduled.result)
    }

    pub fn update_item(
        &self,
        item: impl Into<MaybeDeferred<Id>>,
        attributes: Vec<Attribute>,
        description: Option<String>,
    ) -> Deferred<String> {
        let api = Arc::clone(&self.api);
        let item = item.into();
        self.run("update_item", async move {
            api.update_item(&item, &attributes, description.as_deref())
                .await
        })
    }

    pub fn get_item_id_by_uuid(&self, item: impl Into<MaybeDeferred<Id>>) -> Deferred<Id> {
        let api = Arc::clone(&self.api);
        let item = item.into();
        self.run("get_item_id_by_uuid", async move {
            api.get_item_id_by_uuid(&item).await
        })
    }

    pub fn get_launch_info(&self) -> Deferred<Option<Value>> {
        let Some(launch) = self.slot().id() else {
            return Deferred::resolved(None);
        };
        let api = Arc::clone(&self.api);
        self.run("get_launch_info", async move {
            api.get_launch_info(&launch).await
        })
    }

    pub fn get_launch_ui_id(&self) -> Deferred<Option<i64>> {
        let Some(launch) = self.slot().id() else {
            return Deferred::resolved(None);
        };
        let api = Arc::clone(&self.api);
        self.run("get_launch_ui_id", async move {
            api.get_launch_ui_id(&launch).await
        })
    }

    pub fn get_launch_ui_url(&self) -> Deferred<Option<String>> {
        let Some(launch) = self.slot().id() else {
            return Deferred::resolved(None);
        };
        let api = Arc::clone(&self.api);
        self.run("get_launch_ui_url", async move {
            api.get_launch_ui_url(&launch).await
        })
    }

    pub fn get_project_settings(&self) -> Deferred<Value> {
        let api = Arc::clone(&self.api);
        self.run("get_project_settings", async move {
            api.get_project_settings().await
        })
    }

    /// Creates a client reporting into the same launch, for use by another
    /// thread.
    ///
    /// The fork shares the transport and the strategy's runtime, starts with
    /// this client's current item, and has its own log buffer and unit
    /// list. It never finishes the launch.
    pub fn fork(&self) -> Self {
        let launch = self.slot().id();
        let launch = match launch {
            Some(id) => LaunchSlot::attached(id),
            None => LaunchSlot::new(),
        };
        let items = ItemStack::new();
        if let Some(current) = self.items.peek() {
            items.push(current);
        }
        Self {
            api: Arc::clone(&self.api),
            strategy: self.strategy.fork(),
            launch: Mutex::new(launch),
            items,
            batcher: Arc::new(LogBatcher::new(
                self.batcher.max_count(),
                self.batcher.max_payload_size(),
            )),
            inflight: Mutex::new(Vec::new()),
        }
    }

    /// Releases the transport's connections. Requests issued afterwards,
    /// by this client or its forks, fail with a transport error.
    pub fn close(&self) {
        self.api.transport().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::ReportError;
    use crate::model::{ItemType, Status};
    use crate::strategy::immediate::{DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TASK_TIMEOUT};
    use crate::strategy::{BatchedStrategy, ImmediateStrategy};
    use crate::testing::RecordingTransport;
    use crate::transport::Method;

    fn immediate() -> Arc<dyn ExecutionStrategy> {
        Arc::new(ImmediateStrategy::new(DEFAULT_TASK_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT).unwrap())
    }

    fn batched() -> Arc<dyn ExecutionStrategy> {
        Arc::new(BatchedStrategy::new(100, Duration::from_secs(3600)).unwrap())
    }

    fn client(
        transport: &Arc<RecordingTransport>,
        strategy: Arc<dyn ExecutionStrategy>,
        max_count: usize,
    ) -> DeferredClient {
        let api = ReportingApi::new(transport.clone(), "http://rp.local", "demo");
        DeferredClient::new(Arc::new(api), strategy, LogBatcher::new(max_count, usize::MAX))
    }

    fn position(operations: &[&str], operation: &str) -> Vec<usize> {
        operations
            .iter()
            .enumerate()
            .filter(|(_, op)| **op == operation)
            .map(|(i, _)| i)
            .collect()
    }

    fn report_one_test(client: &DeferredClient) -> (Deferred<Id>, Deferred<String>) {
        client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();
        let item = client
            .start_item(StartItem::new("test", "1", ItemType::Test))
            .unwrap();
        for n in 0..3 {
            client
                .log(n.to_string(), format!("line {n}"), None, None, Some((&item).into()))
                .unwrap();
        }
        client
            .finish_item(&item, FinishItem::new("2").with_status(Status::Passed))
            .unwrap();
        let finished = client.finish_launch(FinishLaunch::new("3")).unwrap();
        (item, finished)
    }

    fn assert_reported_in_order(transport: &RecordingTransport, item: &Deferred<Id>) {
        assert_eq!(transport.log_batch_sizes(), vec![2, 1]);

        let operations = transport.operations();
        let finish_launch = position(&operations, "finish_launch");
        assert_eq!(finish_launch.len(), 1);
        assert_eq!(*finish_launch.last().unwrap(), operations.len() - 1);
        assert!(position(&operations, "log_batch")
            .iter()
            .all(|i| *i < finish_launch[0]));

        let item = item.wait_blocking().unwrap();
        let finish_item = transport
            .requests()
            .into_iter()
            .find(|r| r.operation == "finish_item")
            .unwrap();
        assert!(finish_item.path.ends_with(&format!("item/{}", item)));
        assert_eq!(finish_item.method, Method::Put);
    }

    #[test]
    fn test_end_to_end_immediate() {
        let transport = RecordingTransport::new();
        let client = client(&transport, immediate(), 2);

        let (item, finished) = report_one_test(&client);

        assert_eq!(finished.wait_blocking().unwrap(), "ok");
        assert_eq!(client.launch_state(), LaunchState::Finished);
        assert_reported_in_order(&transport, &item);
    }

    #[test]
    fn test_end_to_end_batched() {
        let transport = RecordingTransport::new();
        let client = client(&transport, batched(), 2);

        let (item, finished) = report_one_test(&client);

        assert_eq!(finished.peek().unwrap().unwrap(), "ok");
        assert_eq!(client.strategy().pending(), 0);
        assert_reported_in_order(&transport, &item);
    }

    #[test]
    fn test_scheduling_does_not_wait_for_network() {
        let transport = RecordingTransport::with_delay(Duration::from_millis(200));
        let client = client(&transport, immediate(), 20);

        let started = std::time::Instant::now();
        let launch = client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();
        let item = client
            .start_item(StartItem::new("test", "1", ItemType::Test))
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(!launch.is_resolved());
        assert!(!item.is_resolved());
        assert_eq!(client.launch_state(), LaunchState::Starting);

        assert!(!item.wait_blocking().unwrap().is_not_found());
        assert_eq!(client.launch_state(), LaunchState::Active);
    }

    #[test]
    fn test_not_found_parent_sends_nothing() {
        let transport = RecordingTransport::new();
        let client = client(&transport, immediate(), 1);
        client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();

        let orphan = client
            .start_item(StartItem::new("test", "1", ItemType::Test).with_parent(Id::NotFound))
            .unwrap();
        assert!(orphan.wait_blocking().unwrap().is_not_found());

        let sent = client
            .log("1", "lost", None, None, Some((&orphan).into()))
            .unwrap();
        assert!(sent.peek().unwrap().unwrap().is_empty());

        let finished = client
            .finish_item(&orphan, FinishItem::new("2"))
            .unwrap();
        assert!(matches!(
            finished.wait_blocking(),
            Err(ReportError::UnresolvedParent { .. })
        ));
        assert_eq!(transport.operations(), vec!["start_launch"]);
    }

    #[test]
    fn test_failure_does_not_affect_siblings() {
        let transport = RecordingTransport::new();
        transport.fail(Method::Put, "item/");
        let client = client(&transport, batched(), 20);
        client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();

        let first = client
            .start_item(StartItem::new("first", "1", ItemType::Test))
            .unwrap();
        let failed = client.finish_item(&first, FinishItem::new("2")).unwrap();
        let second = client
            .start_item(StartItem::new("second", "1", ItemType::Test))
            .unwrap();
        let finished = client.finish_launch(FinishLaunch::new("3")).unwrap();

        assert!(matches!(
            failed.wait_blocking(),
            Err(ReportError::Transport { .. })
        ));
        assert!(!second.wait_blocking().unwrap().is_not_found());
        assert_eq!(finished.wait_blocking().unwrap(), "ok");
    }

    #[test]
    fn test_lifecycle_misuse_is_reported_synchronously() {
        let transport = RecordingTransport::new();
        let client = client(&transport, batched(), 20);

        let err = client
            .start_item(StartItem::new("test", "1", ItemType::Test))
            .unwrap_err();
        assert!(err.is_lifecycle_violation());
        assert!(client.log("1", "early", None, None, None).is_err());

        client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();
        let stray: Deferred<Id> = Deferred::resolved(Id::new("stray"));
        assert!(client
            .finish_item(&stray, FinishItem::new("2"))
            .unwrap_err()
            .is_lifecycle_violation());
        assert!(client
            .start_launch(StartLaunch::new("again", "1"))
            .is_err());

        client.finish_launch(FinishLaunch::new("3")).unwrap();
        assert!(client.finish_launch(FinishLaunch::new("4")).is_err());
    }

    #[test]
    fn test_close_releases_transport() {
        let transport = RecordingTransport::new();
        let client = client(&transport, immediate(), 20);
        client.close();
        assert!(transport.is_closed());

        let launch = client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();
        assert!(matches!(
            launch.get_blocking(),
            Err(ReportError::Transport { .. })
        ));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_existing_launch() {
        let transport = RecordingTransport::new();
        let client = client(&transport, immediate(), 20).with_launch(Id::new("existing"));

        let launch = client
            .start_launch(StartLaunch::new("ignored", "1"))
            .unwrap();
        assert_eq!(launch.get_blocking().unwrap(), Id::new("existing"));

        client.log("1", "hello", None, None, None).unwrap();
        let finished = client.finish_launch(FinishLaunch::new("2")).unwrap();

        assert_eq!(finished.wait_blocking().unwrap(), "");
        assert_eq!(transport.operations(), vec!["log_batch"]);
    }

    #[test]
    fn test_fork_reports_under_parent_item() {
        let transport = RecordingTransport::new();
        let client = client(&transport, immediate(), 20);
        client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();
        let suite = client
            .start_item(StartItem::new("suite", "1", ItemType::Suite))
            .unwrap();

        let fork = client.fork();
        let parent = fork.current_item().unwrap();
        assert!(parent.ptr_eq(&suite));

        let child = fork
            .start_item(StartItem::new("test", "1", ItemType::Test).with_parent(&parent))
            .unwrap();
        fork.finish_item(&child, FinishItem::new("2")).unwrap();
        let fork_finished = fork.finish_launch(FinishLaunch::new("2")).unwrap();
        assert_eq!(fork_finished.wait_blocking().unwrap(), "");

        let suite_id = suite.wait_blocking().unwrap();
        assert!(transport
            .paths()
            .contains(&format!("api/v2/demo/item/{}", suite_id)));

        client.finish_item(&suite, FinishItem::new("3")).unwrap();
        client.finish_launch(FinishLaunch::new("4")).unwrap();
        assert_eq!(position(&transport.operations(), "finish_launch").len(), 1);
    }

    #[test]
    fn test_batched_fork_on_worker_thread_finishes() {
        let transport = RecordingTransport::new();
        let client = client(&transport, batched(), 20);
        client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();
        let suite = client
            .start_item(StartItem::new("suite", "1", ItemType::Suite))
            .unwrap();
        let fork = client.fork();

        let worker = std::thread::spawn(move || {
            let parent = fork.current_item().unwrap();
            let child = fork
                .start_item(StartItem::new("test", "1", ItemType::Test).with_parent(&parent))
                .unwrap();
            let finished = fork.finish_item(&child, FinishItem::new("2")).unwrap();
            fork.finish_launch(FinishLaunch::new("2")).unwrap();
            (
                child.wait_timeout(Duration::from_secs(5)),
                finished.wait_timeout(Duration::from_secs(5)),
            )
        });
        let (child, finished) = worker.join().unwrap();
        assert!(child.unwrap().is_ok());
        assert!(finished.unwrap().is_ok());
        assert!(suite.is_resolved());

        client.finish_item(&suite, FinishItem::new("3")).unwrap();
        let launch_finished = client.finish_launch(FinishLaunch::new("4")).unwrap();
        assert!(launch_finished.wait_blocking().is_ok());
        assert_eq!(position(&transport.operations(), "finish_launch").len(), 1);
    }

    #[test]
    fn test_lookups_on_launch() {
        let transport = RecordingTransport::new();
        transport.respond(
            Method::Get,
            "launch/uuid/",
            crate::transport::Response::new(200, serde_json::json!({"id": 5, "mode": "DEFAULT"})),
        );
        let client = client(&transport, immediate(), 20);
        assert_eq!(client.get_launch_ui_id().wait_blocking().unwrap(), None);

        client
            .start_launch(StartLaunch::new("nightly", "1"))
            .unwrap();
        assert_eq!(client.get_launch_ui_id().wait_blocking().unwrap(), Some(5));
        assert_eq!(
            client.get_launch_ui_url().wait_blocking().unwrap().as_deref(),
            Some("http://rp.local/ui/#demo/launches/all/5")
        );
        assert!(client.get_project_settings().wait_blocking().is_ok());
    }
}
