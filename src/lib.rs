//! rp-client: a reporting client for test-result collection services.
//!
//! Test frameworks report a hierarchy of **launches** containing nested
//! **items** (suites, tests, steps) with **log records** attached to either.
//! The service assigns each launch and item an identifier, and children
//! must reference their parent's identifier. This crate lets callers report
//! that hierarchy without waiting for each identifier to come back.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Clients**: [`AsyncClient`] for async callers, [`DeferredClient`] for
//!   synchronous callers
//! - **Strategies**: how deferred units of work are driven (immediate on a
//!   background thread, or batched on the caller's thread)
//! - **Batcher**: groups log records into bounded multipart batches
//! - **API / Transport**: builds service requests and sends them over HTTP
//!
//! ```text
//!   DeferredClient ──► ExecutionStrategy ──┐
//!                                          ├──► ReportingApi ──► Transport
//!   AsyncClient ───────────────────────────┘         ▲
//!        │                                           │
//!        └──────────────► LogBatcher ────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rp_client::config::load_config;
//! use rp_client::model::{timestamp, ItemType};
//! use rp_client::request::{FinishItem, FinishLaunch, StartItem, StartLaunch};
//! use rp_client::DeferredClient;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("reporting.toml"))?;
//!     let client = DeferredClient::from_config(&config)?;
//!
//!     client.start_launch(StartLaunch::new("nightly", timestamp()))?;
//!     let suite = client.start_item(StartItem::new("suite", timestamp(), ItemType::Suite))?;
//!     client.finish_item(&suite, FinishItem::new(timestamp()))?;
//!     client.finish_launch(FinishLaunch::new(timestamp()))?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod batcher;
pub mod client;
pub mod config;
pub mod deferred;
pub mod error;
pub mod model;
pub mod request;
pub mod stack;
pub mod strategy;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use api::ReportingApi;
pub use batcher::LogBatcher;
pub use client::{AsyncClient, DeferredClient, LaunchState};
pub use config::{Config, load_config};
pub use deferred::{Deferred, MaybeDeferred};
pub use error::{ReportError, ReportResult};
pub use model::Id;
pub use strategy::{BatchedStrategy, ExecutionStrategy, ImmediateStrategy};
pub use transport::{HttpTransport, Transport};
