//! # Hookwarden CLI
//!
//! Operator command-line interface working directly against a filesystem
//! event ledger.
//!
//! This module provides CLI commands for:
//! - Listing failed and pending events
//! - Inspecting a single event
//! - Marking a failed event for retry (the service sweeper re-runs it)
//! - Purging processed events past retention
//! - Generating shell completions

use clap::{Args, CommandFactory, Parser, Subcommand};
use hookwarden_core::{
    ledger::DEFAULT_MAX_RETRIES, EventId, EventLedger, FilesystemEventLedger, LedgerError,
    WebhookEvent, WebhookSource,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Structure
// ============================================================================

/// Hookwarden CLI - operate the webhook event ledger
#[derive(Parser, Debug)]
#[command(name = "hookwarden")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and repair the Hookwarden webhook event ledger")]
pub struct Cli {
    /// Root directory of the filesystem ledger
    #[arg(
        long,
        env = "HOOKWARDEN_LEDGER_PATH",
        default_value = "data/ledger",
        global = true
    )]
    pub ledger_path: PathBuf,

    /// Retry cap enforced when marking events for retry
    #[arg(
        long,
        env = "HOOKWARDEN_MAX_RETRIES",
        default_value_t = DEFAULT_MAX_RETRIES,
        global = true
    )]
    pub max_retries: u32,

    /// Logging level (written to stderr)
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Event ledger commands
    Events {
        #[command(subcommand)]
        action: EventCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Event management subcommands
#[derive(Subcommand, Debug)]
pub enum EventCommands {
    /// List events whose last attempt failed
    Failed(ListArgs),

    /// List events that were never attempted
    Pending(ListArgs),

    /// Show one event including its payload
    Show {
        /// Event ID (ULID)
        event_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Clear a failed event's error so the service sweeper retries it
    Retry {
        /// Event ID (ULID)
        event_id: String,
    },

    /// Delete processed events older than the retention window
    Purge {
        /// Retention window in days
        #[arg(long, default_value_t = 30)]
        retention_days: u64,
    },
}

/// Filters shared by the listing commands
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only events from this provider
    #[arg(short, long)]
    pub source: Option<WebhookSource>,

    /// Maximum number of events to show
    #[arg(short, long, default_value_t = 50)]
    pub limit: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Ledger not found at {}", path.display())]
    LedgerNotFound { path: PathBuf },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: EventId },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } => 2,
            Self::LedgerNotFound { .. } | Self::EventNotFound { .. } => 3,
            Self::Ledger(
                LedgerError::MaxRetriesExceeded { .. } | LedgerError::AlreadyProcessed { .. },
            ) => 4,
            Self::Ledger(_) | Self::Serialization(_) | Self::Io(_) => 1,
        }
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// Install a stderr subscriber so log lines never mix with command output.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Execute `cli`, writing command output to `out`.
pub async fn run(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "hookwarden", out);
            Ok(())
        }
        Commands::Events { action } => {
            let ledger = open_ledger(&cli.ledger_path, cli.max_retries).await?;
            execute_events_command(&ledger, action, out).await
        }
    }
}

/// Open an existing filesystem ledger.
///
/// The CLI never creates a ledger; a mistyped path should fail rather than
/// silently report an empty one.
pub async fn open_ledger(
    path: &std::path::Path,
    max_retries: u32,
) -> Result<FilesystemEventLedger, CliError> {
    if !path.join("events").is_dir() {
        return Err(CliError::LedgerNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(FilesystemEventLedger::with_max_retries(path.to_path_buf(), max_retries).await?)
}

async fn execute_events_command(
    ledger: &dyn EventLedger,
    action: EventCommands,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match action {
        EventCommands::Failed(args) => {
            let events = ledger.list_failed(args.source, args.limit).await?;
            write_events(out, &events, args.format)
        }
        EventCommands::Pending(args) => {
            let events = ledger.list_unprocessed(args.source, args.limit).await?;
            write_events(out, &events, args.format)
        }
        EventCommands::Show { event_id, format } => {
            let event_id = parse_event_id(&event_id)?;
            let event = ledger
                .get(event_id)
                .await?
                .ok_or(CliError::EventNotFound { event_id })?;
            write_event(out, &event, format)
        }
        EventCommands::Retry { event_id } => {
            let event_id = parse_event_id(&event_id)?;
            let event = ledger.retry(event_id).await?;
            info!(event_id = %event_id, retry_count = event.retry_count, "Event marked for retry");
            writeln!(
                out,
                "Event {} marked for retry ({}/{} retries used)",
                event.id,
                event.retry_count,
                ledger.max_retries()
            )?;
            Ok(())
        }
        EventCommands::Purge { retention_days } => {
            let retention = Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60));
            let purged = ledger.purge_expired(retention).await?;
            info!(purged, retention_days, "Purged expired events");
            writeln!(out, "Purged {} event(s)", purged)?;
            Ok(())
        }
    }
}

fn parse_event_id(value: &str) -> Result<EventId, CliError> {
    value.parse().map_err(|_| CliError::InvalidArgument {
        arg: "event_id".to_string(),
        message: format!("'{}' is not a valid event ID", value),
    })
}

// ============================================================================
// Output
// ============================================================================

fn write_events(
    out: &mut dyn Write,
    events: &[WebhookEvent],
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, events)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            for event in events {
                writeln!(out, "{}", summary_line(event))?;
            }
            writeln!(out, "{} event(s)", events.len())?;
        }
    }
    Ok(())
}

fn write_event(
    out: &mut dyn Write,
    event: &WebhookEvent,
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, event)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "ID:          {}", event.id)?;
            writeln!(out, "Source:      {}", event.source)?;
            writeln!(out, "Type:        {}", event.event_type)?;
            writeln!(out, "External ID: {}", event.external_event_id)?;
            writeln!(out, "Created:     {}", event.created_at)?;
            writeln!(out, "Processed:   {}", event.processed)?;
            if let Some(processed_at) = &event.processed_at {
                writeln!(out, "Processed at: {}", processed_at)?;
            }
            writeln!(out, "Retries:     {}", event.retry_count)?;
            if let Some(error) = &event.processing_error {
                writeln!(out, "Error:       {}", error)?;
            }
            writeln!(out, "Payload:")?;
            serde_json::to_writer_pretty(&mut *out, &event.payload)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn summary_line(event: &WebhookEvent) -> String {
    let mut line = format!(
        "{}  {:<8}  {:<32}  retries={}  created={}",
        event.id,
        event.source.as_str(),
        event.event_type,
        event.retry_count,
        event.created_at
    );
    if let Some(error) = &event.processing_error {
        line.push_str("  error=");
        line.push_str(error);
    }
    line
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
