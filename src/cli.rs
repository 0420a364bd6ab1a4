//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::auditor::{audit, AuditReport, ExportSnapshot};
use crate::auth::{initialize_gmail_hub, load_outlook_token};
use crate::clauses::{add_tokens, remove_tokens, TokenUpdate};
use crate::config::Config;
use crate::document::{load_document, read_yaml, save_document, write_yaml};
use crate::error::{PolicyError, Result};
use crate::executor::{ExecutionReport, Executor, OutcomeStatus, RetryPolicy};
use crate::gmail::GmailAdapter;
use crate::models::CanonicalDocument;
use crate::normalizer::normalize_document;
use crate::optimizer::optimize;
use crate::outlook::OutlookAdapter;
use crate::planner::{build_plan, Plan, PlanOptions, RemoteState};
use crate::provider::{ProviderAdapter, ProviderKind};
use crate::sweep::{sweep, SweepOptions, SweepReport};

#[derive(Parser, Debug)]
#[command(name = "mail-policy")]
#[command(version)]
#[command(about = "Reconcile Gmail and Outlook labels and filters with a YAML policy", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mail-policy.toml", global = true)]
    pub config: PathBuf,

    /// Provider to talk to; overrides the configuration file
    #[arg(short, long, value_enum, global = true)]
    pub provider: Option<ProviderKind>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show what apply would change
    Plan {
        /// Canonical policy document
        document: PathBuf,

        /// Also plan deletes of live labels and filters missing from the document
        #[arg(long)]
        delete_missing: bool,

        /// Only show the first N entries
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Reconcile the provider with the document
    Apply {
        /// Canonical policy document
        document: PathBuf,

        /// Print the plan instead of calling the provider
        #[arg(long)]
        dry_run: bool,

        /// Delete live labels and filters missing from the document
        #[arg(long)]
        delete_missing: bool,

        /// Apply only the first N entries
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Merge from-only filters that share a destination label
    Optimize {
        /// Canonical policy document
        document: PathBuf,

        /// Where to write the optimized document (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Smallest group worth merging
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Measure how many live simple rules the document covers
    Audit {
        /// Canonical policy document
        document: PathBuf,

        /// Snapshot written by `export`
        #[arg(long, conflicts_with = "live")]
        export: Option<PathBuf>,

        /// Read live filters from the provider instead of a snapshot
        #[arg(long)]
        live: bool,

        /// List uncovered rules
        #[arg(long)]
        show_missing: bool,
    },

    /// Write the Outlook form of a document for review
    Derive {
        /// Canonical policy document
        document: PathBuf,

        /// Where to write the derived document (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Snapshot live filters to YAML
    Export {
        #[arg(short, long, default_value = "filters.export.yaml")]
        output: PathBuf,
    },

    /// Add sender tokens to the from clause of filters targeting a label
    AddToken {
        /// Canonical policy document
        document: PathBuf,

        /// Destination label (children included)
        #[arg(long)]
        label: String,

        /// Only touch from clauses containing this text
        #[arg(long, default_value = "")]
        needle: String,

        /// Tokens to add, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        tokens: Vec<String>,

        /// Write here instead of rewriting the document in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove sender tokens from the from clause of filters targeting a label
    RemoveToken {
        /// Canonical policy document
        document: PathBuf,

        /// Destination label (children included)
        #[arg(long)]
        label: String,

        /// Only touch from clauses containing this text
        #[arg(long, default_value = "")]
        needle: String,

        /// Tokens to remove, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        tokens: Vec<String>,

        /// Write here instead of rewriting the document in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply filter actions to messages already in the mailbox (Gmail)
    Sweep {
        /// Canonical policy document
        document: PathBuf,

        /// Only messages newer than this many days
        #[arg(long)]
        days: Option<u32>,

        /// Only messages older than this many days
        #[arg(long)]
        older_than: Option<u32>,

        /// Only messages still in the inbox
        #[arg(long)]
        only_inbox: bool,

        /// Stop after this many messages per filter
        #[arg(long)]
        max_messages: Option<usize>,

        /// Count matches without modifying anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "mail-policy.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(MultiProgress::new())
    }
}

/// Build the adapter for the configured backend
pub async fn connect(config: &Config) -> Result<Box<dyn ProviderAdapter>> {
    match config.provider.kind {
        ProviderKind::Gmail => {
            let hub = initialize_gmail_hub(&config.gmail).await?;
            Ok(Box::new(GmailAdapter::new(hub, &config.gmail)))
        }
        ProviderKind::Outlook => {
            let token = load_outlook_token(&config.outlook).await?;
            Ok(Box::new(OutlookAdapter::new(&config.outlook, token)?))
        }
    }
}

/// Load a document and shape it for the configured backend
pub async fn prepare_document(path: &Path, config: &Config) -> Result<CanonicalDocument> {
    let doc = load_document(path).await?;
    let normalized = normalize_document(&doc, config.provider.kind, (&config.outlook).into());
    if !normalized.dropped.is_empty() {
        info!(
            "{} fields dropped while shaping the document for {}",
            normalized.dropped.len(),
            config.provider.kind
        );
    }
    Ok(normalized.value)
}

async fn fetch_state(
    adapter: &dyn ProviderAdapter,
    reporter: &ProgressReporter,
) -> Result<RemoteState> {
    let spinner = reporter.add_spinner(&format!("Fetching labels and filters from {}...", adapter.kind()));
    let state = RemoteState::fetch(adapter).await;
    match &state {
        Ok(state) => reporter.finish_spinner(
            &spinner,
            &format!(
                "Fetched {} labels and {} filters",
                state.labels.len(),
                state.filters.len()
            ),
        ),
        Err(_) => spinner.finish_and_clear(),
    }
    state
}

fn limit_plan(plan: Plan, limit: Option<usize>) -> Plan {
    match limit {
        Some(n) => plan.truncate(n),
        None => plan,
    }
}

/// `plan`: diff the document against live state and print the result
pub async fn run_plan(
    config: &Config,
    document: &Path,
    delete_missing: bool,
    limit: Option<usize>,
    reporter: &ProgressReporter,
) -> Result<Plan> {
    let doc = prepare_document(document, config).await?;
    let adapter = connect(config).await?;
    let state = fetch_state(adapter.as_ref(), reporter).await?;

    let options = PlanOptions {
        delete_missing: delete_missing || config.execution.delete_missing,
    };
    let plan = limit_plan(build_plan(&doc, &state, options), limit);
    for line in plan.render() {
        println!("{}", line);
    }
    Ok(plan)
}

/// `apply`: plan, then execute (or print on a dry run)
pub async fn run_apply(
    config: &Config,
    document: &Path,
    dry_run: bool,
    delete_missing: bool,
    limit: Option<usize>,
    reporter: &ProgressReporter,
) -> Result<ExecutionReport> {
    let doc = prepare_document(document, config).await?;
    let adapter = connect(config).await?;
    let state = fetch_state(adapter.as_ref(), reporter).await?;

    let options = PlanOptions {
        delete_missing: delete_missing || config.execution.delete_missing,
    };
    let plan = limit_plan(build_plan(&doc, &state, options), limit);
    if plan.is_empty() {
        println!("Nothing to do; {} already matches the document", adapter.kind());
    }

    let dry_run = dry_run || config.execution.dry_run;
    let executor = Executor::new(adapter.as_ref(), dry_run, RetryPolicy::from(&config.retry));
    let report = executor.execute(plan).await?;

    if report.dry_run {
        for line in &report.rendered {
            println!("{}", line);
        }
    } else {
        for outcome in &report.outcomes {
            match &outcome.status {
                OutcomeStatus::Applied => println!("{} {} {}", outcome.kind, outcome.target, outcome.key),
                OutcomeStatus::Failed(message) => {
                    error!("{} {} {} failed: {}", outcome.kind, outcome.target, outcome.key, message)
                }
                OutcomeStatus::Planned => {}
            }
        }
    }
    println!("{}", report.summary_line());
    Ok(report)
}

/// `optimize`: merge filters and write (or print) the result
pub async fn run_optimize(
    config: &Config,
    document: &Path,
    output: Option<&Path>,
    threshold: Option<usize>,
) -> Result<()> {
    let doc = load_document(document).await?;
    let threshold = threshold.unwrap_or(config.optimizer.merge_threshold);
    let outcome = optimize(&doc, threshold);

    for line in outcome.report.render() {
        println!("{}", line);
    }
    emit_document(&outcome.document, output).await
}

/// `audit`: score a snapshot (or live filters) against the document
pub async fn run_audit(
    config: &Config,
    document: &Path,
    export: Option<&Path>,
    live: bool,
    show_missing: bool,
    reporter: &ProgressReporter,
) -> Result<AuditReport> {
    let canonical = load_document(document).await?;
    let snapshot = if live {
        let adapter = connect(config).await?;
        live_snapshot(adapter.as_ref(), reporter).await?
    } else {
        let path = export.ok_or_else(|| {
            PolicyError::ConfigError("audit needs --export <snapshot> or --live".to_string())
        })?;
        read_yaml::<ExportSnapshot>(path).await?
    };

    let report = audit(&canonical, &snapshot, config.audit.sample_limit);
    for line in report.render(show_missing) {
        println!("{}", line);
    }
    Ok(report)
}

async fn live_snapshot(
    adapter: &dyn ProviderAdapter,
    reporter: &ProgressReporter,
) -> Result<ExportSnapshot> {
    let state = fetch_state(adapter, reporter).await?;
    Ok(ExportSnapshot::from_remote(
        &state.filters,
        &state.index.names_by_reference(),
    ))
}

/// `derive`: write the Outlook form of a document
pub async fn run_derive(config: &Config, document: &Path, output: Option<&Path>) -> Result<()> {
    let doc = load_document(document).await?;
    let normalized = normalize_document(&doc, ProviderKind::Outlook, (&config.outlook).into());
    println!(
        "derived {} categories and {} rules ({} fields dropped)",
        normalized.value.labels.len(),
        normalized.value.filters.len(),
        normalized.dropped.len()
    );
    emit_document(&normalized.value, output).await
}

/// `export`: snapshot live filters with label names
pub async fn run_export(config: &Config, output: &Path, reporter: &ProgressReporter) -> Result<usize> {
    let adapter = connect(config).await?;
    let snapshot = live_snapshot(adapter.as_ref(), reporter).await?;
    write_yaml(output, &snapshot).await?;
    println!("Exported {} filters to {}", snapshot.filters.len(), output.display());
    Ok(snapshot.filters.len())
}

/// Which way `run_edit_tokens` edits clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEdit {
    Add,
    Remove,
}

/// `add-token` / `remove-token`
pub async fn run_edit_tokens(
    edit: TokenEdit,
    document: &Path,
    label: &str,
    needle: &str,
    tokens: &[String],
    output: Option<&Path>,
) -> Result<Vec<TokenUpdate>> {
    let mut doc = load_document(document).await?;
    let updates = match edit {
        TokenEdit::Add => add_tokens(&mut doc, label, needle, tokens),
        TokenEdit::Remove => remove_tokens(&mut doc, label, needle, tokens),
    };

    if updates.is_empty() {
        println!("No matching filters changed");
        return Ok(updates);
    }
    for update in &updates {
        println!(
            "filter #{}: '{}' -> '{}'",
            update.index + 1,
            update.old_from,
            update.new_from
        );
    }
    save_document(output.unwrap_or(document), &doc).await?;
    Ok(updates)
}

/// `sweep`: relabel existing messages
pub async fn run_sweep(config: &Config, document: &Path, options: SweepOptions) -> Result<SweepReport> {
    if config.provider.kind != ProviderKind::Gmail {
        warn!("sweep needs message search; {} does not offer it", config.provider.kind);
    }
    let doc = load_document(document).await?;
    let adapter = connect(config).await?;
    let report = sweep(adapter.as_ref(), &doc, options, config.execution.batch_size).await?;

    for rule in &report.rules {
        println!("{}", rule.render(options.dry_run));
    }
    if options.dry_run {
        println!("Total matched: {}", report.total_matched());
    } else {
        println!("Total modified: {}", report.total_modified());
    }
    Ok(report)
}

/// `init-config`
pub async fn run_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(PolicyError::ConfigError(format!(
            "{} already exists; pass --force to overwrite",
            output.display()
        )));
    }
    Config::create_example(output).await?;
    println!("Wrote example configuration to {}", output.display());
    Ok(())
}

async fn emit_document(doc: &CanonicalDocument, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            save_document(path, doc).await?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", serde_yaml::to_string(doc)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply_with_globals() {
        let cli = Cli::try_parse_from([
            "mail-policy",
            "apply",
            "filters.yaml",
            "--dry-run",
            "--provider",
            "outlook",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.provider, Some(ProviderKind::Outlook));
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Apply {
                document, dry_run, ..
            } => {
                assert_eq!(document, PathBuf::from("filters.yaml"));
                assert!(dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_token_list() {
        let cli = Cli::try_parse_from([
            "mail-policy",
            "add-token",
            "filters.yaml",
            "--label",
            "Lists",
            "--tokens",
            "a@b.com,@news.com",
        ])
        .unwrap();
        match cli.command {
            Commands::AddToken { tokens, needle, .. } => {
                assert_eq!(tokens, vec!["a@b.com".to_string(), "@news.com".to_string()]);
                assert_eq!(needle, "");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_audit_export_conflicts_with_live() {
        let result = Cli::try_parse_from([
            "mail-policy",
            "audit",
            "filters.yaml",
            "--export",
            "snap.yaml",
            "--live",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_edit_tokens_rewrites_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filters.yaml");
        tokio::fs::write(
            &path,
            "filters:\n  - match:\n      from: a@news.com\n    action:\n      add: [Lists/News]\n",
        )
        .await
        .unwrap();

        let updates = run_edit_tokens(
            TokenEdit::Add,
            &path,
            "Lists",
            "news",
            &["b@news.com".to_string()],
            None,
        )
        .await
        .unwrap();
        assert_eq!(updates.len(), 1);

        let doc = load_document(&path).await.unwrap();
        assert_eq!(
            doc.filters[0].criteria.from.as_deref(),
            Some("a@news.com OR b@news.com")
        );
    }

    #[tokio::test]
    async fn test_init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail-policy.toml");
        run_init_config(&path, false).await.unwrap();
        assert!(run_init_config(&path, false).await.is_err());
        run_init_config(&path, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_audit_without_source_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filters.yaml");
        tokio::fs::write(&path, "filters: []\n").await.unwrap();

        let err = run_audit(
            &Config::default(),
            &path,
            None,
            false,
            false,
            &ProgressReporter::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PolicyError::ConfigError(_)));
    }
}
