//! Mail Policy
//!
//! Keeps the labels and filters of a Gmail or Outlook mailbox in line with a
//! declarative YAML document.
//!
//! # Overview
//!
//! - **Canonical model**: provider-neutral labels and filters, validated on load
//! - **Provider adapters**: Gmail (`google-gmail1`) and Outlook (Microsoft Graph)
//!   behind one async trait
//! - **Normalization**: reshapes a document for Outlook's flat categories and
//!   inbox rules, reporting every field it drops
//! - **Planning**: a deterministic, key-based diff of desired against live state
//! - **Execution**: best-effort apply with dry runs and retried deletes
//! - **Optimization and audit**: merge redundant sender rules, measure how much
//!   of a live setup a document covers
//!
//! # Example Usage
//!
//! ```no_run
//! use mail_policy::{build_plan, cli, Config, Executor, PlanOptions, RemoteState, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("mail-policy.toml".as_ref()).await?;
//!     let doc = cli::prepare_document("filters.yaml".as_ref(), &config).await?;
//!
//!     let adapter = cli::connect(&config).await?;
//!     let state = RemoteState::fetch(adapter.as_ref()).await?;
//!     let plan = build_plan(&doc, &state, PlanOptions::default());
//!
//!     let report = Executor::new(adapter.as_ref(), true, RetryPolicy::from(&config.retry))
//!         .execute(plan)
//!         .await?;
//!     println!("{}", report.summary_line());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`models`] - Canonical documents and live provider entities
//! - [`provider`] - The adapter trait and label reference index
//! - [`gmail`] / [`outlook`] - Backend adapters
//! - [`auth`] - OAuth2 for Gmail, bearer tokens for Outlook
//! - [`normalizer`] - Outlook shaping
//! - [`planner`] - Desired vs live diff
//! - [`executor`] - Plan application
//! - [`optimizer`] - Rule merging
//! - [`auditor`] - Coverage of exported rules
//! - [`clauses`] - `OR` clause handling and token edits
//! - [`sweep`] - Retroactive relabeling of existing messages
//! - [`document`] - YAML input and output
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface
//! - [`error`] - Error types and result aliases

pub mod auditor;
pub mod auth;
pub mod clauses;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod gmail;
pub mod models;
pub mod normalizer;
pub mod optimizer;
pub mod outlook;
pub mod planner;
pub mod provider;
pub mod sweep;

// Re-export commonly used types for convenience
pub use error::{PolicyError, Result};

// Core data models
pub use models::{
    CanonicalDocument, FilterAction, FilterMatch, FilterSpec, LabelColor, LabelSpec, RemoteFilter,
    RemoteLabel,
};

// Provider seam
pub use provider::{LabelIndex, ProviderAdapter, ProviderKind};
pub use gmail::GmailAdapter;
pub use outlook::OutlookAdapter;

// Pipeline stages
pub use normalizer::{normalize_document, NormalizeOptions};
pub use planner::{build_plan, Plan, PlanEntry, PlanOptions, RemoteState};
pub use executor::{ExecutionReport, Executor, RetryPolicy};
pub use optimizer::{optimize, OptimizeOutcome};
pub use auditor::{audit, AuditReport, ExportSnapshot};

// Config types
pub use config::Config;

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
