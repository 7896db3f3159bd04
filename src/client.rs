//! Reporting clients.
//!
//! Two clients expose the same reporting operations over the same
//! [`ReportingApi`]:
//!
//! | Client | Module | Call style |
//! |--------|--------|------------|
//! | [`AsyncClient`] | [`cooperative`] | `async fn`, awaited by the caller |
//! | [`DeferredClient`] | [`deferred`] | synchronous, returns [`Deferred`](crate::deferred::Deferred) results |
//!
//! Both track the launch lifecycle and the stack of open items, and both
//! batch log records before sending them.
//!
//! # Launch lifecycle
//!
//! ```text
//! NotStarted ──start_launch──► Starting ──id resolves──► Active
//!                                                          │
//!                                                    finish_launch
//!                                                          ▼
//!                      Finished ◄──request completes── Finishing
//! ```
//!
//! Items and logs are accepted while the launch is `Starting` or `Active`.
//! A client built for an existing launch starts out `Active` and never
//! sends launch start or finish requests itself.

pub mod cooperative;
pub mod deferred;

use std::sync::Arc;

use crate::api::ReportingApi;
use crate::config::Config;
use crate::deferred::{Deferred, MaybeDeferred};
use crate::error::{ReportError, ReportResult};
use crate::model::Id;
use crate::transport::HttpTransport;

pub use cooperative::AsyncClient;
pub use deferred::DeferredClient;

/// Where a client's launch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    NotStarted,
    Starting,
    Active,
    Finishing,
    Finished,
}

/// Builds a [`ReportingApi`] over HTTP from configuration.
///
/// # Errors
///
/// Returns [`ReportError::Config`] if the endpoint is invalid or the HTTP
/// client cannot be built.
pub fn api_from_config(config: &Config) -> ReportResult<ReportingApi> {
    let server = &config.server;
    let transport = HttpTransport::new(
        &server.endpoint,
        server.api_key.clone().unwrap_or_default(),
        server.http_timeout(),
        server.max_pool_size,
    )?;
    Ok(
        ReportingApi::new(Arc::new(transport), &server.endpoint, &server.project)
            .with_mode(config.launch.mode)
            .with_skipped_an_issue(config.launch.is_skipped_an_issue)
            .with_print_uuid(config.launch.print_uuid),
    )
}

/// Launch identifier and lifecycle phase of one client.
#[derive(Debug)]
pub(crate) struct LaunchSlot {
    phase: LaunchState,
    id: Option<MaybeDeferred<Id>>,
    finish: Option<Deferred<()>>,
    owned: bool,
}

impl LaunchSlot {
    /// A slot for a launch this client will start itself.
    pub(crate) fn new() -> Self {
        Self {
            phase: LaunchState::NotStarted,
            id: None,
            finish: None,
            owned: true,
        }
    }

    /// A slot for a launch started elsewhere.
    pub(crate) fn attached(id: MaybeDeferred<Id>) -> Self {
        Self {
            phase: LaunchState::Active,
            id: Some(id),
            finish: None,
            owned: false,
        }
    }

    pub(crate) fn owned(&self) -> bool {
        self.owned
    }

    pub(crate) fn id(&self) -> Option<MaybeDeferred<Id>> {
        self.id.clone()
    }

    pub(crate) fn state(&self) -> LaunchState {
        match self.phase {
            LaunchState::Starting if self.id.as_ref().is_some_and(|id| id.is_resolved()) => {
                LaunchState::Active
            }
            LaunchState::Finishing if self.finish.as_ref().is_some_and(|f| f.is_resolved()) => {
                LaunchState::Finished
            }
            phase => phase,
        }
    }

    /// Identifier of the launch items and logs belong to.
    pub(crate) fn current(&self) -> ReportResult<MaybeDeferred<Id>> {
        match (self.phase, &self.id) {
            (LaunchState::Starting | LaunchState::Active, Some(id)) => Ok(id.clone()),
            (LaunchState::Finishing | LaunchState::Finished, _) => Err(
                ReportError::ImbalancedLifecycle("launch is already finished".to_string()),
            ),
            _ => Err(ReportError::ImbalancedLifecycle(
                "launch has not been started".to_string(),
            )),
        }
    }

    /// Moves to `Starting`.
    ///
    /// Returns the existing identifier instead when the launch is not
    /// owned by this client.
    pub(crate) fn begin_start(&mut self) -> ReportResult<Option<MaybeDeferred<Id>>> {
        if !self.owned {
            return Ok(self.id.clone());
        }
        if self.phase != LaunchState::NotStarted {
            return Err(ReportError::ImbalancedLifecycle(
                "launch already started".to_string(),
            ));
        }
        self.phase = LaunchState::Starting;
        Ok(None)
    }

    pub(crate) fn started(&mut self, id: MaybeDeferred<Id>) {
        self.id = Some(id);
    }

    /// Moves to `Finishing` and returns the launch identifier.
    pub(crate) fn begin_finish(&mut self) -> ReportResult<MaybeDeferred<Id>> {
        let id = self.current()?;
        self.phase = LaunchState::Finishing;
        Ok(id)
    }

    /// Records the signal that completes the finish request.
    pub(crate) fn finishing(&mut self, completion: Deferred<()>) {
        self.finish = Some(completion);
    }

    pub(crate) fn finished(&mut self) {
        self.phase = LaunchState::Finished;
    }
}
