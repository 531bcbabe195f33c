#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Transient Dispatch
//!
//! Asynchronous external dispatch and status-reconciliation engine for
//! time-domain astronomy. Users request that a transient's discovery data
//! be published to slow, rate-limited external systems; the engine queues
//! those requests as database rows and works through them with three
//! cooperating loops, reconciling asynchronous outcomes back into the
//! local store.
//!
//! ## Architecture
//!
//! Submission requests carry one status string per external system. Loops
//! claim work by flipping eligible statuses to `processing` inside a
//! single database transaction, so any number of loop instances can run
//! against the same store without double-submitting. Outcomes flow
//! through the pure transition functions in [`state_machine`]; illegal
//! edges fail loudly instead of silently corrupting a status.
//!
//! ## Module Organization
//!
//! - [`models`] - row structs and plain data types
//! - [`store`] - store traits plus the Postgres implementations
//! - [`state_machine`] - status vocabulary and legal transitions
//! - [`builder`] - deterministic payload construction
//! - [`clients`] - HTTP clients for the external systems
//! - [`dispatch`] - the submission, reconciliation, and retrieval loops
//! - [`notify`] - fire-and-forget status-change notifications
//! - [`config`] - every tunable in one explicit struct
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transient_dispatch::clients::{ReportClient, ReportClientConfig, RelayClient, RelayClientConfig};
//! use transient_dispatch::config::DispatchConfig;
//! use transient_dispatch::dispatch::SubmissionLoop;
//! use transient_dispatch::notify::BroadcastNotifier;
//! use transient_dispatch::store::PgSubmissionStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DispatchConfig::from_env()?;
//! let pool = sqlx::PgPool::connect(&config.database_url).await?;
//! let store = Arc::new(PgSubmissionStore::new(pool));
//! let report = ReportClient::new(ReportClientConfig::new(
//!     config.report_base_url.clone(),
//!     config.report_api_key.clone(),
//! ))?;
//! let relay = RelayClient::new(RelayClientConfig::new(config.relay_base_url.clone()))?;
//! let notifier = Arc::new(BroadcastNotifier::default());
//! let submission = SubmissionLoop::new(store, report, relay, notifier, config);
//! submission.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod clients;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod notify;
pub mod retry;
pub mod state_machine;
pub mod store;
pub mod test_helpers;

pub use config::DispatchConfig;
pub use error::{ClientError, DispatchError, Result, TransitionError};
