//! Service API layer.
//!
//! [`ReportingApi`] turns reporting operations into requests against the
//! collection service and interprets the responses. Every method is `async`
//! and accepts identifiers that may still be pending; they are awaited
//! before the request is built.
//!
//! # Identifier short circuits
//!
//! When a launch or item identifier resolves to [`Id::NotFound`] (or fails
//! to resolve), no request is sent and a warning is logged:
//!
//! | Operation | Result |
//! |-----------|--------|
//! | `start_item`, `get_item_id_by_uuid` | `Ok(Id::NotFound)` |
//! | `finish_item`, `finish_launch`, `update_item` | `Err(UnresolvedParent)` |
//! | lookups returning data | `Ok(None)` |
//! | `log_batch` | affected records are dropped |
//!
//! # URL layout
//!
//! ```text
//! api/v2/{project}/launch                 POST  start launch
//! api/v2/{project}/launch/{id}/finish     PUT   finish launch
//! api/v2/{project}/item[/{parent}]        POST  start item
//! api/v2/{project}/item/{id}              PUT   finish item
//! api/v2/{project}/log                    POST  multipart log batch
//! api/v1/{project}/item/uuid/{uuid}       GET   item lookup
//! api/v1/{project}/item/{id}/update       PUT   item update
//! api/v1/{project}/launch/uuid/{uuid}     GET   launch lookup
//! api/v1/{project}/settings               GET   project settings
//! ```

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::deferred::MaybeDeferred;
use crate::error::{ReportError, ReportResult};
use crate::model::{Attribute, Id, LaunchMode, LogRecord};
use crate::request::{
    FILE_PART_NAME, FinishItem, FinishLaunch, JSON_PART_NAME, StartItem, StartLaunch, log_payload,
    update_payload,
};
use crate::transport::{HttpRequest, Part, Response, Transport};

/// Reporting calls against one project of the collection service.
pub struct ReportingApi {
    transport: Arc<dyn Transport>,
    endpoint: String,
    project: String,
    mode: LaunchMode,
    is_skipped_an_issue: bool,
    print_uuid: bool,
}

impl ReportingApi {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            project: project.into(),
            mode: LaunchMode::Default,
            is_skipped_an_issue: true,
            print_uuid: false,
        }
    }

    pub fn with_mode(mut self, mode: LaunchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether skipped items count as issues. When `false`, skipped items
    /// without an explicit issue are sent as `NOT_ISSUE`.
    pub fn with_skipped_an_issue(mut self, is_skipped_an_issue: bool) -> Self {
        self.is_skipped_an_issue = is_skipped_an_issue;
        self
    }

    /// Prints `Launch UUID: <id>` to stdout when a launch starts.
    pub fn with_print_uuid(mut self, print_uuid: bool) -> Self {
        self.print_uuid = print_uuid;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn v1(&self, path: &str) -> String {
        format!("api/v1/{}/{}", self.project, path)
    }

    fn v2(&self, path: &str) -> String {
        format!("api/v2/{}/{}", self.project, path)
    }

    async fn send(&self, request: HttpRequest) -> ReportResult<Response> {
        let operation = request.operation;
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        let message = response
            .message()
            .unwrap_or_else(|| format!("HTTP {}", response.status));
        Err(ReportError::transport(
            operation,
            Some(response.status),
            message,
        ))
    }

    /// Starts a launch and returns its identifier.
    pub async fn start_launch(&self, request: &StartLaunch) -> ReportResult<Id> {
        let response = self
            .send(HttpRequest::post(
                "start_launch",
                self.v2("launch"),
                request.payload(self.mode),
            ))
            .await?;
        let id = identifier("start_launch", &response);
        debug!("start_launch - ID: {}", id);
        if self.print_uuid && !id.is_not_found() {
            println!("Launch UUID: {}", id);
        }
        Ok(id)
    }

    /// Starts an item under `request.parent`, or at the launch root.
    pub async fn start_item(
        &self,
        launch: &MaybeDeferred<Id>,
        request: &StartItem,
    ) -> ReportResult<Id> {
        let Some(launch) = resolve("start_item", launch).await else {
            return Ok(Id::NotFound);
        };
        let path = match &request.parent {
            Some(parent) => match resolve("start_item", parent).await {
                Some(parent) => self.v2(&format!("item/{}", parent)),
                None => return Ok(Id::NotFound),
            },
            None => self.v2("item"),
        };

        let response = self
            .send(HttpRequest::post(
                "start_item",
                path,
                request.payload(&launch),
            ))
            .await?;
        let id = identifier("start_item", &response);
        debug!("start_item - ID: {}", id);
        Ok(id)
    }

    /// Finishes an item and returns the service's message.
    pub async fn finish_item(
        &self,
        launch: &MaybeDeferred<Id>,
        item: &MaybeDeferred<Id>,
        request: &FinishItem,
    ) -> ReportResult<String> {
        let item = resolve("finish_item", item)
            .await
            .ok_or_else(|| ReportError::unresolved("finish_item"))?;
        let launch = resolve("finish_item", launch)
            .await
            .ok_or_else(|| ReportError::unresolved("finish_item"))?;

        let response = self
            .send(HttpRequest::put(
                "finish_item",
                self.v2(&format!("item/{}", item)),
                request.payload(&launch, self.is_skipped_an_issue),
            ))
            .await?;
        debug!("finish_item - ID: {}", item);
        Ok(response.message().unwrap_or_default())
    }

    /// Finishes a launch and returns the service's message.
    pub async fn finish_launch(
        &self,
        launch: &MaybeDeferred<Id>,
        request: &FinishLaunch,
    ) -> ReportResult<String> {
        let launch = resolve("finish_launch", launch)
            .await
            .ok_or_else(|| ReportError::unresolved("finish_launch"))?;

        let response = self
            .send(HttpRequest::put(
                "finish_launch",
                self.v2(&format!("launch/{}/finish", launch)),
                request.payload(),
            ))
            .await?;
        debug!("finish_launch - ID: {}", launch);
        Ok(response.message().unwrap_or_default())
    }

    /// Replaces an item's attributes and, optionally, its description.
    pub async fn update_item(
        &self,
        item: &MaybeDeferred<Id>,
        attributes: &[Attribute],
        description: Option<&str>,
    ) -> ReportResult<String> {
        let internal = match self.get_item_id_by_uuid(item).await? {
            Id::Known(id) => id,
            Id::NotFound => return Err(ReportError::unresolved("update_item")),
        };

        let response = self
            .send(HttpRequest::put(
                "update_item",
                self.v1(&format!("item/{}/update", internal)),
                update_payload(attributes, description),
            ))
            .await?;
        debug!("update_item - Item: {}", internal);
        Ok(response.message().unwrap_or_default())
    }

    /// Looks up the service's internal item id for an item UUID.
    pub async fn get_item_id_by_uuid(&self, item: &MaybeDeferred<Id>) -> ReportResult<Id> {
        let Some(uuid) = resolve("get_item_id_by_uuid", item).await else {
            return Ok(Id::NotFound);
        };
        let response = self
            .send(HttpRequest::get(
                "get_item_id_by_uuid",
                self.v1(&format!("item/uuid/{}", uuid)),
            ))
            .await?;
        Ok(identifier("get_item_id_by_uuid", &response))
    }

    /// Fetches launch details.
    ///
    /// A non-success answer is logged and yields an empty object.
    pub async fn get_launch_info(&self, launch: &MaybeDeferred<Id>) -> ReportResult<Option<Value>> {
        let Some(uuid) = resolve("get_launch_info", launch).await else {
            return Ok(None);
        };
        debug!("get_launch_info - ID: {}", uuid);
        let response = self
            .transport
            .send(HttpRequest::get(
                "get_launch_info",
                self.v1(&format!("launch/uuid/{}", uuid)),
            ))
            .await?;
        if response.is_success() {
            Ok(Some(response.json))
        } else {
            warn!(
                "get_launch_info - failed to fetch launch info (HTTP {})",
                response.status
            );
            Ok(Some(json!({})))
        }
    }

    /// The numeric launch id used in UI links.
    pub async fn get_launch_ui_id(&self, launch: &MaybeDeferred<Id>) -> ReportResult<Option<i64>> {
        let info = self.get_launch_info(launch).await?;
        Ok(info.as_ref().and_then(ui_id))
    }

    /// Link to the launch in the service UI.
    ///
    /// Debug launches live under `userdebug`, others under `launches`.
    pub async fn get_launch_ui_url(
        &self,
        launch: &MaybeDeferred<Id>,
    ) -> ReportResult<Option<String>> {
        let Some(info) = self.get_launch_info(launch).await? else {
            return Ok(None);
        };
        let Some(id) = ui_id(&info) else {
            return Ok(None);
        };
        let mode = info
            .get("mode")
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .unwrap_or_else(|| self.mode.as_wire().to_string());
        let launch_type = if mode == LaunchMode::Default.as_wire() {
            "launches"
        } else {
            "userdebug"
        };

        let url = format!(
            "{}/ui/#{}/{}/all/{}",
            self.endpoint.trim_end_matches('/'),
            self.project.to_lowercase(),
            launch_type,
            id
        );
        debug!("get_launch_ui_url - URL: {}", url);
        Ok(Some(url))
    }

    pub async fn get_project_settings(&self) -> ReportResult<Value> {
        let response = self
            .send(HttpRequest::get(
                "get_project_settings",
                self.v1("settings"),
            ))
            .await?;
        Ok(response.json)
    }

    /// Sends a batch of log records as one multipart request.
    ///
    /// Returns one entry per accepted record: its id, or the service's
    /// message for it. An empty batch sends nothing.
    pub async fn log_batch(&self, records: Vec<LogRecord>) -> ReportResult<Vec<String>> {
        let mut payloads = Vec::with_capacity(records.len());
        let mut files = Vec::new();
        for record in records {
            let Some(launch) = resolve("log", &record.launch).await else {
                continue;
            };
            let item = match &record.item {
                Some(item) => match resolve("log", item).await {
                    Some(item) => Some(Id::new(item)),
                    None => continue,
                },
                None => None,
            };
            payloads.push(log_payload(&record, &Id::new(launch), item.as_ref()));
            if let Some(file) = record.attachment {
                files.push(Part {
                    name: FILE_PART_NAME.to_string(),
                    content_type: file.mime().to_string(),
                    filename: Some(file.name),
                    bytes: file.content,
                });
            }
        }
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let json = serde_json::to_vec(&payloads)
            .map_err(|e| ReportError::transport("log_batch", None, e.to_string()))?;
        let mut parts = vec![Part {
            name: JSON_PART_NAME.to_string(),
            filename: None,
            content_type: "application/json".to_string(),
            bytes: json,
        }];
        parts.extend(files);

        let response = self
            .send(HttpRequest::multipart("log_batch", self.v2("log"), parts))
            .await?;
        Ok(response.messages())
    }
}

/// Awaits an identifier, returning `None` (with a warning) when it is
/// unusable.
async fn resolve(operation: &'static str, id: &MaybeDeferred<Id>) -> Option<String> {
    match id.get().await {
        Ok(Id::Known(id)) => Some(id),
        Ok(Id::NotFound) => {
            warn!(operation, "Attempt to make request for non-existent id");
            None
        }
        Err(e) => {
            warn!(operation, "Identifier failed to resolve: {}", e);
            None
        }
    }
}

fn identifier(operation: &'static str, response: &Response) -> Id {
    response.id().unwrap_or_else(|| {
        warn!(operation, "Invalid response, no id: {}", response.json);
        Id::NotFound
    })
}

fn ui_id(info: &Value) -> Option<i64> {
    info.get("id").and_then(Value::as_i64)
}
