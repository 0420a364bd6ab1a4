use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use mail_policy::cli::{self, Cli, Commands, LogFormat, ProgressReporter, TokenEdit};
use mail_policy::config::Config;
use mail_policy::error::PolicyError;
use mail_policy::sweep::SweepOptions;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    fn lock_buffer(&self) -> std::io::Result<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.lock_buffer()?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.lock_buffer()?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        // Some plan entries failed; details were already logged
        Ok(false) => process::exit(1),
        Err(e) => {
            display_error(&e);
            eprintln!("\nFor help, run: mail-policy --help");
            process::exit(1);
        }
    }
}

fn init_tracing(cli: &Cli, multi: &Arc<MultiProgress>) {
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mail_policy=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_policy=info,warn"))
    };

    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .init(),
        // Logs print above spinners
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(MultiProgressMakeWriter {
                multi: Arc::clone(multi),
            })
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
    }
}

/// Returns false when the command ran but some plan entries failed
async fn run() -> Result<bool> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let multi_progress = Arc::new(MultiProgress::new());
    init_tracing(&cli, &multi_progress);
    let reporter = ProgressReporter::new((*multi_progress).clone());

    // init-config must work before a config file exists
    if let Commands::InitConfig { output, force } = &cli.command {
        cli::run_init_config(output, *force).await?;
        return Ok(true);
    }

    let mut config = Config::load(&cli.config).await?;
    if let Some(kind) = cli.provider {
        config.provider.kind = kind;
    }
    tracing::debug!("Using provider {}", config.provider.kind);

    match cli.command {
        Commands::Plan {
            document,
            delete_missing,
            limit,
        } => {
            cli::run_plan(&config, &document, delete_missing, limit, &reporter).await?;
            Ok(true)
        }

        Commands::Apply {
            document,
            dry_run,
            delete_missing,
            limit,
        } => {
            let report =
                cli::run_apply(&config, &document, dry_run, delete_missing, limit, &reporter)
                    .await?;
            println!("Run ID: {}", report.run_id);
            Ok(report.is_success())
        }

        Commands::Optimize {
            document,
            output,
            threshold,
        } => {
            cli::run_optimize(&config, &document, output.as_deref(), threshold).await?;
            Ok(true)
        }

        Commands::Audit {
            document,
            export,
            live,
            show_missing,
        } => {
            cli::run_audit(
                &config,
                &document,
                export.as_deref(),
                live,
                show_missing,
                &reporter,
            )
            .await?;
            Ok(true)
        }

        Commands::Derive { document, output } => {
            cli::run_derive(&config, &document, output.as_deref()).await?;
            Ok(true)
        }

        Commands::Export { output } => {
            cli::run_export(&config, &output, &reporter).await?;
            Ok(true)
        }

        Commands::AddToken {
            document,
            label,
            needle,
            tokens,
            output,
        } => {
            cli::run_edit_tokens(TokenEdit::Add, &document, &label, &needle, &tokens, output.as_deref())
                .await?;
            Ok(true)
        }

        Commands::RemoveToken {
            document,
            label,
            needle,
            tokens,
            output,
        } => {
            cli::run_edit_tokens(
                TokenEdit::Remove,
                &document,
                &label,
                &needle,
                &tokens,
                output.as_deref(),
            )
            .await?;
            Ok(true)
        }

        Commands::Sweep {
            document,
            days,
            older_than,
            only_inbox,
            max_messages,
            dry_run,
        } => {
            let options = SweepOptions {
                newer_than_days: days,
                older_than_days: older_than,
                only_inbox,
                max_messages,
                dry_run: dry_run || config.execution.dry_run,
            };
            cli::run_sweep(&config, &document, options).await?;
            Ok(true)
        }

        Commands::InitConfig { .. } => Ok(true),
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(policy_err) = error.downcast_ref::<PolicyError>() {
        match policy_err {
            PolicyError::Validation(_) => {
                eprintln!("\nHint: Fix the listed entries in the policy document.");
                eprintln!("      Nothing was sent to the provider.");
            }
            PolicyError::AuthError(_) => {
                eprintln!("\nHint: For Gmail, check credentials_path and delete the token cache to sign in again.");
                eprintln!("      For Outlook, export a Graph token in the configured token_env.");
            }
            PolicyError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: The provider is throttling requests.");
                eprintln!("      Wait a few seconds and try again.");
            }
            PolicyError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: mail-policy init-config --force");
            }
            _ => {}
        }
    }
}
