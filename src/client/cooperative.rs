//! Cooperative client for async callers.
//!
//! Every operation is an `async fn` that sends its request (or buffers its
//! log record) before returning. Nothing runs in the background, so the
//! caller's own runtime drives all network traffic.

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

/// Reporting client whose operations are awaited by the caller.
///
/// # Example
///
/// ```no_run
/// use rp_client::client::AsyncClient;
/// use rp_client::config::load_config_str;
/// use rp_client::model::{timestamp, ItemType, Status};
/// use rp_client::request::{FinishItem, FinishLaunch, StartItem, StartLaunch};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = load_config_str(r#"
///     [server]
///     endpoint = "http://localhost:8080"
///     project = "demo"
/// "#)?;
/// let client = AsyncClient::from_config(&config)?;
///
/// client.start_launch(StartLaunch::new("nightly", timestamp())).await?;
/// let test = client
///     .start_item(StartItem::new("test_login", timestamp(), ItemType::Test))
///     .await?;
/// client.log(timestamp(), "logged in", None, None, Some(test.clone())).await?;
/// client
///     .finish_item(&test, FinishItem::new(timestamp()).with_status(Status::Passed))
///     .await?;
/// client.finish_launch(FinishLaunch::new(timestamp())).await?;
/// # Ok(())
/// # }
/// ```
pub struct AsyncClient {
    api: Arc<ReportingApi>,
    launch: Mutex<LaunchSlot>,
    items: ItemStack<Id>,
    batcher: LogBatcher,
}

impl AsyncClient {
    pub fn new(api: Arc<ReportingApi>, batcher: LogBatcher) -> Self {
        Self {
            api,
            launch: Mutex::new(LaunchSlot::new()),
            items: ItemStack::new(),
            batcher,
        }
    }

    /// Builds an HTTP-backed client.
    ///
    /// When `[launch] uuid` is set, the client reports into that launch.
    pub fn from_config(config: &Config) -> ReportResult<Self> {
        let api = Arc::new(api_from_config(config)?);
        let batcher = LogBatcher::new(config.batch.max_count, config.batch.max_payload_size);
        let client = Self::new(api, batcher);
        Ok(match &config.launch.uuid {
            Some(uuid) => client.with_launch(Id::new(uuid.as_str())),
            None => client,
        })
    }

    /// Reports into an existing launch instead of starting one.
    pub fn with_launch(self, launch: Id) -> Self {
        Self {
            launch: Mutex::new(LaunchSlot::attached(launch.into())),
            ..self
        }
    }

    fn slot(&self) -> MutexGuard<'_, LaunchSlot> {
        self.launch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn launch_state(&self) -> LaunchState {
        self.slot().state()
    }

    /// The launch identifier, once known.
    pub fn launch_id(&self) -> Option<Id> {
        self.slot().id()?.peek()?.ok()
    }

    /// The innermost open item.
    pub fn current_item(&self) -> Option<Id> {
        self.items.peek()
    }

    fn launch(&self) -> ReportResult<MaybeDeferred<Id>> {
        self.slot().current()
    }

    /// Starts the launch.
    ///
    /// Items and logs issued by other tasks while the request is in flight
    /// wait for the identifier. A failed start leaves the launch as
    /// [`Id::NotFound`]: later items and logs are skipped instead of sent.
    pub async fn start_launch(&self, request: StartLaunch) -> ReportResult<Id> {
        let pending: Deferred<Id> = Deferred::new();
        let existing = {
            let mut slot = self.slot();
            let existing = slot.begin_start()?;
            if existing.is_none() {
                slot.started((&pending).into());
            }
            existing
        };
        if let Some(existing) = existing {
            return existing.get().await;
        }

        let pending = PendingLaunch(pending);
        let outcome = self.api.start_launch(&request).await;
        let _ = pending
            .0
            .resolve(outcome.as_ref().cloned().unwrap_or(Id::NotFound));
        outcome
    }

    /// Starts an item and makes it the current one.
    pub async fn start_item(&self, request: StartItem) -> ReportResult<Id> {
        let launch = self.launch()?;
        let id = self.api.start_item(&launch, &request).await?;
        self.items.push(id.clone());
        Ok(id)
    }

    /// Finishes `item`, which should be the current item.
    pub async fn finish_item(&self, item: &Id, request: FinishItem) -> ReportResult<String> {
        let launch = self.launch()?;
        let current = self.items.pop()?;
        if current != *item {
            warn!("Finishing item {} while {} is the current item", item, current);
        }
        self.api
            .finish_item(&launch, &item.clone().into(), &request)
            .await
    }

    /// Sends any buffered logs, then finishes the launch.
    ///
    /// For a launch this client did not start, only the logs are sent and
    /// the returned message is empty.
    pub async fn finish_launch(&self, request: FinishLaunch) -> ReportResult<String> {
        let (launch, owned) = {
            let mut slot = self.slot();
            (slot.begin_finish()?, slot.owned())
        };
        self.send_remaining_logs().await;

        let outcome = if owned {
            self.api.finish_launch(&launch, &request).await
        } else {
            Ok(String::new())
        };
        self.slot().finished();
        outcome
    }

    async fn send_remaining_logs(&self) {
        let remaining = self.batcher.flush();
        if remaining.is_empty() {
            return;
        }
        if let Err(e) = self.api.log_batch(remaining).await {
            warn!("Failed to send remaining logs: {}", e);
        }
    }

    /// Buffers a log record, sending a batch once one is full.
    ///
    /// Returns the service's per-record results when a batch was sent.
    pub async fn log(
        &self,
        time: impl Into<String>,
        message: impl Into<String>,
        level: Option<LogLevel>,
        attachment: Option<Attachment>,
        item: Option<Id>,
    ) -> ReportResult<Option<Vec<String>>> {
        let launch = self.launch()?;
        if item.as_ref().is_some_and(Id::is_not_found) {
            warn!("Log skipped: parent item was not reported");
            return Ok(None);
        }

        let mut record = LogRecord::new(launch, time, message);
        record.level = level;
        record.attachment = attachment;
        record.item = item.map(MaybeDeferred::from);

        match self.batcher.append_awaiting(record).await {
            Some(batch) => self.api.log_batch(batch).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn update_item(
        &self,
        item: &Id,
        attributes: &[Attribute],
        description: Option<&str>,
    ) -> ReportResult<String> {
        self.api
            .update_item(&item.clone().into(), attributes, description)
            .await
    }

    pub async fn get_item_id_by_uuid(&self, item: &Id) -> ReportResult<Id> {
        self.api.get_item_id_by_uuid(&item.clone().into()).await
    }

    pub async fn get_launch_info(&self) -> ReportResult<Option<Value>> {
        let launch = self.slot().id();
        match launch {
            Some(launch) => self.api.get_launch_info(&launch).await,
            None => Ok(None),
        }
    }

    pub async fn get_launch_ui_id(&self) -> ReportResult<Option<i64>> {
        let launch = self.slot().id();
        match launch {
            Some(launch) => self.api.get_launch_ui_id(&launch).await,
            None => Ok(None),
        }
    }

    pub async fn get_launch_ui_url(&self) -> ReportResult<Option<String>> {
        let launch = self.slot().id();
        match launch {
            Some(launch) => self.api.get_launch_ui_url(&launch).await,
            None => Ok(None),
        }
    }

    pub async fn get_project_settings(&self) -> ReportResult<Value> {
        self.api.get_project_settings().await
    }

    /// Creates a client reporting into the same launch, for use by another
    /// task.
    ///
    /// The fork shares the transport, starts with this client's current
    /// item, and has its own log buffer. It never finishes the launch.
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
            launch: Mutex::new(launch),
            items,
            batcher: LogBatcher::new(self.batcher.max_count(), self.batcher.max_payload_size()),
        }
    }

    /// Releases the transport's connections. Requests issued afterwards,
    /// by this client or its forks, fail with a transport error.
    pub fn close(&self) {
        self.api.transport().close();
    }
}

/// Settles a launch start as [`Id::NotFound`] if the request is dropped
/// before the service answers.
struct PendingLaunch(Deferred<Id>);

impl Drop for PendingLaunch {
    fn drop(&mut self) {
        if !self.0.is_resolved() {
            warn!("Launch start dropped before completion");
            let _ = self.0.resolve(Id::NotFound);
        }
    }
}
