//! Applies a [`Plan`] through a [`ProviderAdapter`].
//!
//! Entries run in Create, Update, Delete order. A failing entry is recorded
//! and the run moves on; only deletes are retried, and only on transient
//! errors.

use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{RetryConfig, MAX_BATCH_SIZE};
use crate::error::{PolicyError, Result};
use crate::models::LabelSpec;
use crate::planner::{Desired, Existing, Plan, PlanEntry, PlanKind, PlanTarget};
use crate::provider::{LabelIndex, ProviderAdapter, ResolvedAction};

/// Backoff schedule for deliberate deletes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1500),
            backoff_factor: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_factor: config.backoff_factor,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.powi(retry as i32);
        self.backoff_base.mul_f64(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Applied,
    /// Dry run; nothing was sent
    Planned,
    Failed(String),
}

/// Result of one plan entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub kind: PlanKind,
    pub target: PlanTarget,
    pub key: String,
    /// Provider id of the created or touched entity
    pub remote_id: Option<String>,
    pub status: OutcomeStatus,
}

impl EntryOutcome {
    fn new(entry: &PlanEntry, status: OutcomeStatus, remote_id: Option<String>) -> Self {
        Self {
            kind: entry.kind,
            target: entry.target,
            key: entry.key.clone(),
            remote_id,
            status,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub outcomes: Vec<EntryOutcome>,
    /// Plan lines, filled on dry runs
    pub rendered: Vec<String>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Applied)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn summary_line(&self) -> String {
        if self.dry_run {
            format!("dry run: {} entries not applied", self.outcomes.len())
        } else {
            format!("applied={} failed={}", self.succeeded(), self.failed())
        }
    }
}

pub struct Executor<'a> {
    adapter: &'a dyn ProviderAdapter,
    dry_run: bool,
    retry: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(adapter: &'a dyn ProviderAdapter, dry_run: bool, retry: RetryPolicy) -> Self {
        Self {
            adapter,
            dry_run,
            retry,
        }
    }

    /// Apply every entry of `plan`.
    ///
    /// Only the initial label listing can fail the whole run; per-entry
    /// errors land in the report.
    pub async fn execute(&self, plan: Plan) -> Result<ExecutionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("apply", run_id = %run_id, dry_run = self.dry_run);
        self.run(run_id, plan).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, plan: Plan) -> Result<ExecutionReport> {
        if self.dry_run {
            let rendered = plan.render();
            let outcomes = plan
                .entries()
                .iter()
                .map(|entry| EntryOutcome::new(entry, OutcomeStatus::Planned, None))
                .collect();
            info!("Dry run: {}", plan.counts());
            return Ok(ExecutionReport {
                run_id,
                dry_run: true,
                outcomes,
                rendered,
            });
        }

        let mut index = self.adapter.label_id_index().await?;
        let mut entries = plan.into_entries();
        entries.sort_by_key(|entry| entry.kind);

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in &entries {
            let result = match entry.kind {
                PlanKind::Create => self.create(entry, &mut index).await,
                PlanKind::Update => self.update(entry).await,
                PlanKind::Delete => self.delete(entry).await,
            };
            let outcome = match result {
                Ok(remote_id) => {
                    info!("{}", entry.render());
                    EntryOutcome::new(entry, OutcomeStatus::Applied, remote_id)
                }
                Err(e) => {
                    error!("{} {} {} failed: {}", entry.kind, entry.target, entry.key, e);
                    EntryOutcome::new(entry, OutcomeStatus::Failed(e.to_string()), None)
                }
            };
            outcomes.push(outcome);
        }

        let report = ExecutionReport {
            run_id,
            dry_run: false,
            outcomes,
            rendered: Vec::new(),
        };
        info!("Apply finished: {}", report.summary_line());
        Ok(report)
    }

    async fn create(&self, entry: &PlanEntry, index: &mut LabelIndex) -> Result<Option<String>> {
        match &entry.desired {
            Some(Desired::Label(spec)) => {
                let created = self
                    .adapter
                    .create_label(spec)
                    .await
                    .map_err(|e| remote_failure(entry, e))?;
                index.insert(&created.name, &self.adapter.label_ref(&created));
                Ok(Some(created.id))
            }
            Some(Desired::Filter(spec)) => {
                let mut add = Vec::with_capacity(spec.action.add.len());
                for name in spec.action.add.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
                    add.push(
                        ensure_label(self.adapter, index, name)
                            .await
                            .map_err(|e| remote_failure(entry, e))?,
                    );
                }
                let remove = spec
                    .action
                    .remove
                    .iter()
                    .map(|n| n.trim())
                    .filter(|n| !n.is_empty())
                    .map(|n| index.resolve_or_name(n))
                    .collect();
                let action = ResolvedAction {
                    add,
                    remove,
                    forward: spec.action.forward.clone(),
                    move_to_folder: spec.action.move_to_folder.clone(),
                };
                let created = self
                    .adapter
                    .create_filter(&spec.criteria, &action)
                    .await
                    .map_err(|e| remote_failure(entry, e))?;
                Ok(Some(created.id))
            }
            None => Err(PolicyError::Unknown(format!(
                "create entry for {} carries no desired state",
                entry.key
            ))),
        }
    }

    async fn update(&self, entry: &PlanEntry) -> Result<Option<String>> {
        let (Some(Existing::Label(label)), Some(fields)) = (&entry.existing, &entry.changes) else {
            return Err(PolicyError::Unknown(format!(
                "update entry for {} carries no label changes",
                entry.key
            )));
        };
        let updated = self
            .adapter
            .update_label(&label.id, fields)
            .await
            .map_err(|e| remote_failure(entry, e))?;
        Ok(Some(updated.id))
    }

    async fn delete(&self, entry: &PlanEntry) -> Result<Option<String>> {
        let Some(existing) = &entry.existing else {
            return Err(PolicyError::Unknown(format!(
                "delete entry for {} carries no existing entity",
                entry.key
            )));
        };
        let id = existing.id().to_string();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match existing {
                Existing::Label(_) => self.adapter.delete_label(&id).await,
                Existing::Filter(_) => self.adapter.delete_filter(&id).await,
            };
            match result {
                Ok(()) => return Ok(Some(id)),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt - 1);
                    warn!(
                        "delete {} {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        entry.target, entry.key, attempt, self.retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    warn!("failed to delete {} {}: {}", entry.target, entry.key, e);
                    return Err(PolicyError::TransientDeleteFailure {
                        key: entry.key.clone(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(remote_failure(entry, e)),
            }
        }
    }
}

/// Reference for `name`, creating the label when the index has none
pub async fn ensure_label(
    adapter: &dyn ProviderAdapter,
    index: &mut LabelIndex,
    name: &str,
) -> Result<String> {
    if let Some(reference) = index.resolve(name) {
        return Ok(reference);
    }
    debug!("Label '{}' not found; creating it", name);
    let created = adapter.create_label(&LabelSpec::new(name)).await?;
    let reference = adapter.label_ref(&created);
    index.insert(&created.name, &reference);
    Ok(reference)
}

fn remote_failure(entry: &PlanEntry, error: PolicyError) -> PolicyError {
    PolicyError::RemoteCallFailed {
        key: format!("{} {}", entry.target, entry.key),
        message: error.to_string(),
    }
}

/// Modify labels on `message_ids` in chunks of at most `batch_size`
/// (capped at 500). Returns how many messages were modified.
pub async fn modify_messages_in_batches(
    adapter: &dyn ProviderAdapter,
    message_ids: &[String],
    add_label_ids: &[String],
    remove_label_ids: &[String],
    batch_size: usize,
) -> Result<usize> {
    if message_ids.is_empty() || (add_label_ids.is_empty() && remove_label_ids.is_empty()) {
        return Ok(0);
    }

    let chunk_size = batch_size.clamp(1, MAX_BATCH_SIZE);
    let mut modified = 0;
    for (n, chunk) in message_ids.chunks(chunk_size).enumerate() {
        modified += adapter
            .batch_modify_messages(chunk, add_label_ids, remove_label_ids)
            .await?;
        debug!("Batch {}: {} messages modified so far", n + 1, modified);
    }
    Ok(modified)
}
