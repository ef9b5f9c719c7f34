//! Stable embedded trust command surface for host runtimes.
//!
//! Host projects (such as a platform bot shell) should embed trust behavior
//! through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_command`] for direct [`Command`] execution against an existing
//!   [`JsonScoreStore`] and a host-supplied [`ModerationContext`].
//!
//! The standalone `trustctl` binary wires in [`ConsoleGateway`] and
//! [`StderrAuditSink`]; a host embedding the engine supplies its own
//! platform client instead.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use trust_engine_core::{
    format_rfc3339, now_utc, AuditSink, AutoBanStatus, GatewayError, ModerationAction,
    ModerationContext, ModerationGateway, TrustLevel,
};
use trust_engine_store_json::{discover_score_file, JsonScoreStore, TRUST_FILE_NAME};

#[derive(Debug, Parser)]
#[command(name = "trustctl")]
#[command(about = "Trust score engine CLI")]
pub struct Cli {
    /// Score file path; resolved by the discovery heuristic when omitted.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Origin label interpolated into user notifications.
    #[arg(long, default_value = "this server")]
    origin: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Trust {
        #[command(subcommand)]
        command: Box<TrustCommand>,
    },
    Mod {
        #[command(subcommand)]
        command: Box<ModCommand>,
    },
    File {
        #[command(subcommand)]
        command: Box<FileCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TrustCommand {
    Show(ShowArgs),
    List(ListArgs),
    Set(SetArgs),
    Reset(UserArgs),
    Adjust(AdjustArgs),
}

#[derive(Debug, Subcommand)]
pub enum ModCommand {
    Warn(WarnArgs),
    Kick(ActionArgs),
    Softban(SoftbanArgs),
    Ban(ActionArgs),
    Timeout(TimeoutArgs),
}

#[derive(Debug, Subcommand)]
pub enum FileCommand {
    Path,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(long)]
    user: String,
}

#[derive(Debug, Args)]
pub struct UserArgs {
    #[arg(long)]
    user: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only list users at this trust level (trusted, warning, critical).
    #[arg(long)]
    level: Option<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    #[arg(long)]
    user: String,
    #[arg(long, allow_hyphen_values = true)]
    score: i64,
}

#[derive(Debug, Args)]
pub struct AdjustArgs {
    #[arg(long)]
    user: String,
    #[arg(long, allow_hyphen_values = true)]
    delta: i64,
    #[arg(long)]
    reason: String,
}

#[derive(Debug, Args)]
pub struct WarnArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    reason: String,
}

#[derive(Debug, Args)]
pub struct ActionArgs {
    #[arg(long)]
    user: String,
    #[arg(long, default_value = "No reason provided")]
    reason: String,
}

#[derive(Debug, Args)]
pub struct SoftbanArgs {
    #[arg(long)]
    user: String,
    #[arg(long, default_value = "Softban")]
    reason: String,
}

#[derive(Debug, Args)]
pub struct TimeoutArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    minutes: u32,
    #[arg(long, default_value = "No reason provided")]
    reason: String,
}

/// Score report printed for read-only lookups.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct TrustReport {
    pub user_id: String,
    pub score: u8,
    pub level: TrustLevel,
}

/// Gateway used by the standalone binary.
///
/// The real platform client is an external collaborator, so notifications
/// and bans are logged rather than delivered; a host runtime embeds the
/// engine with its own [`ModerationGateway`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleGateway;

impl ModerationGateway for ConsoleGateway {
    fn notify(&self, user_id: &str, text: &str) -> Result<(), GatewayError> {
        log::info!("notify user {user_id}: {text}");
        Ok(())
    }

    fn ban(&self, user_id: &str, reason: &str) -> Result<(), GatewayError> {
        log::info!("ban user {user_id}: {reason}");
        Ok(())
    }
}

/// Audit sink writing timestamped lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn report(&self, message: &str) {
        let stamp = format_rfc3339(now_utc()).unwrap_or_else(|_| "unknown-time".to_string());
        eprintln!("[{stamp}] audit: {message}");
    }
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when the score file fails to load or the requested
/// command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let Cli {
        file,
        origin,
        command,
    } = cli;
    let path = file.unwrap_or_else(|| discover_score_file(TRUST_FILE_NAME));

    match command {
        // Path resolution works even when the file itself is malformed.
        Command::File { command } => run_file(*command, &path),
        command => {
            let store = JsonScoreStore::open(&path)?;
            let gateway = ConsoleGateway;
            let audit = StderrAuditSink;
            let ctx = ModerationContext {
                gateway: &gateway,
                audit: &audit,
                origin: &origin,
            };
            run_command(command, &store, &ctx)
        }
    }
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when validation, persistence, or serialization fails.
pub fn run_command(
    command: Command,
    store: &JsonScoreStore,
    ctx: &ModerationContext<'_>,
) -> Result<()> {
    match command {
        Command::Trust { command } => run_trust(*command, store, ctx),
        Command::Mod { command } => run_mod(*command, store, ctx),
        Command::File { command } => run_file(*command, store.path()),
    }
}

fn run_trust(
    command: TrustCommand,
    store: &JsonScoreStore,
    ctx: &ModerationContext<'_>,
) -> Result<()> {
    match command {
        TrustCommand::Show(args) => {
            let score = store.get_score(&args.user);
            let report = TrustReport {
                user_id: args.user,
                score,
                level: TrustLevel::from_score(score),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        TrustCommand::List(args) => {
            let snapshot = store.snapshot();
            let snapshot = match args.level {
                Some(raw) => {
                    let level = TrustLevel::parse(&raw).ok_or_else(|| {
                        anyhow!(
                            "unknown trust level: {raw} (expected trusted, warning, or critical)"
                        )
                    })?;
                    snapshot
                        .iter()
                        .filter(|(_, score)| TrustLevel::from_score(*score) == level)
                        .map(|(user_id, score)| (user_id.to_string(), score))
                        .collect()
                }
                None => snapshot,
            };
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        TrustCommand::Set(args) => {
            let change = store.set_score(&args.user, args.score, ctx)?;
            println!("{}", serde_json::to_string_pretty(&change)?);
            Ok(())
        }
        TrustCommand::Reset(args) => {
            let change = store.reset(&args.user)?;
            println!("{}", serde_json::to_string_pretty(&change)?);
            Ok(())
        }
        TrustCommand::Adjust(args) => {
            let change = store.apply_delta(&args.user, args.delta, &args.reason, ctx)?;
            println!("{}", serde_json::to_string_pretty(&change)?);
            Ok(())
        }
    }
}

fn run_mod(command: ModCommand, store: &JsonScoreStore, ctx: &ModerationContext<'_>) -> Result<()> {
    let (action, user, reason) = match command {
        ModCommand::Warn(args) => (ModerationAction::Warn, args.user, args.reason),
        ModCommand::Kick(args) => (ModerationAction::Kick, args.user, args.reason),
        ModCommand::Softban(args) => (ModerationAction::Softban, args.user, args.reason),
        ModCommand::Ban(args) => (ModerationAction::Ban, args.user, args.reason),
        ModCommand::Timeout(args) => (
            ModerationAction::Timeout {
                minutes: args.minutes,
            },
            args.user,
            args.reason,
        ),
    };

    let change = store.apply_delta(&user, action.delta(), &action.audit_reason(&reason), ctx)?;
    if change.auto_ban != AutoBanStatus::NotTriggered {
        log::info!(
            "auto-ban outcome for user {}: {}",
            change.user_id,
            change.auto_ban.as_str()
        );
    }
    println!("{}", serde_json::to_string_pretty(&change)?);
    Ok(())
}

fn run_file(command: FileCommand, path: &Path) -> Result<()> {
    match command {
        FileCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}
