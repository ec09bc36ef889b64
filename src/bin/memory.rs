//! `memory` — operator CLI for the long-term memory core (spec.md §6 / C12).
//!
//! Exit codes: `0` success, `2` usage error (bad flags/args), `1` runtime
//! error (store unavailable, corrupt index, etc).

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use chrono::Utc;
use clap::{Parser, Subcommand};
use nanomem_core::config::MemoryConfig;
use nanomem_core::engine::MemoryEngine;
use nanomem_core::retrieval::RetrievalRequest;
use nanomem_core::types::MemoryKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memory", about = "Inspect and operate the long-term memory store")]
struct Cli {
    /// Path to a config file; defaults to `~/.nanobot/config.json`.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Workspace root the mirrors/WAL paths are relative to; defaults to the
    /// current directory.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print row counts, FTS consistency, and last hygiene run.
    Status {
        /// Emit machine-readable JSON instead of the human-readable summary.
        #[arg(long)]
        json: bool,
    },
    /// Run a one-off retrieval query against a scope.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "cli")]
        channel: String,
        #[arg(long = "chat-id", default_value = "direct")]
        chat_id: String,
        #[arg(long, default_value = "all")]
        scope: ScopeArg,
        #[arg(long, default_value_t = 8)]
        k: usize,
    },
    /// Manually insert a memory row (`source = manual`).
    Add {
        #[arg(long)]
        text: String,
        #[arg(long)]
        kind: KindArg,
        /// Overrides the kind→scope default (spec.md §4.2).
        #[arg(long)]
        scope: ScopeKindArg,
        #[arg(long, default_value = "cli")]
        channel: String,
        #[arg(long = "chat-id", default_value = "direct")]
        chat_id: String,
        #[arg(long = "sender-id")]
        sender_id: Option<String>,
    },
    /// Delete rows older than the given number of days, ignoring the normal
    /// per-kind retention and the hygiene throttle.
    Prune {
        #[arg(long = "older-than-days")]
        older_than_days: i64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild the FTS index from the canonical table.
    Reindex,
    /// One-time import of legacy `MEMORY.md`/semantic files; no-op after the
    /// first successful run.
    Backfill,
}

#[derive(Clone)]
enum ScopeArg {
    Chat,
    User,
    All,
}

impl FromStr for ScopeArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "user" => Ok(Self::User),
            "all" => Ok(Self::All),
            other => Err(format!("unknown scope: {other} (expected chat|user|all)")),
        }
    }
}

#[derive(Clone)]
struct ScopeKindArg(nanomem_core::types::ScopeKind);

impl FromStr for ScopeKindArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use nanomem_core::types::ScopeKind;
        match s {
            "chat" => Ok(Self(ScopeKind::Chat)),
            "user" => Ok(Self(ScopeKind::User)),
            "global" => Ok(Self(ScopeKind::Global)),
            other => Err(format!("unknown scope: {other} (expected chat|user|global)")),
        }
    }
}

#[derive(Clone)]
struct KindArg(MemoryKind);

impl FromStr for KindArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryKind::from_str(s).map(KindArg)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Usage(msg)) => {
            eprintln!("usage error: {msg}");
            ExitCode::from(2)
        }
        Err(CliError::Runtime(e)) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

enum CliError {
    Usage(String),
    Runtime(nanomem_core::MemoryError),
}

impl From<nanomem_core::MemoryError> for CliError {
    fn from(e: nanomem_core::MemoryError) -> Self {
        CliError::Runtime(e)
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = MemoryConfig::load(cli.config.as_deref())?;
    let workspace = cli.workspace.unwrap_or_else(|| PathBuf::from("."));
    let engine = MemoryEngine::open(config, workspace)?;
    let now = Utc::now();

    match cli.command {
        Command::Status { json } => {
            let stats = engine.stats()?;
            if json {
                let rendered = serde_json::to_string_pretty(&stats)
                    .map_err(|e| CliError::Runtime(nanomem_core::MemoryError::Internal(e.to_string())))?;
                println!("{rendered}");
            } else {
                println!("db: {}", stats.db_path);
                println!("total rows: {}", stats.total_rows);
                println!("fts rows: {}", stats.fts_rows);
                for (kind, count) in &stats.rows_by_kind {
                    println!("  {kind}: {count}");
                }
                match stats.last_hygiene_run {
                    Some(ts) => println!("last hygiene run: {}", ts.to_rfc3339()),
                    None => println!("last hygiene run: never"),
                }
            }
        }
        Command::Search { query, channel, chat_id, scope, k } => {
            let scopes = engine.resolve_scopes(&channel, &chat_id, None, "default");
            let (chat_scope, user_scope) = match scope {
                ScopeArg::Chat => (scopes.chat.clone(), String::new()),
                ScopeArg::User => (String::new(), scopes.user.clone()),
                ScopeArg::All => (scopes.chat.clone(), scopes.user.clone()),
            };
            let effective_scopes = nanomem_core::types::ResolvedScopes {
                chat: chat_scope,
                user: user_scope,
                global: scopes.global.clone(),
            };
            let req = RetrievalRequest {
                user_text: &query,
                reply_to_text: None,
                scopes: &effective_scopes,
                max_results: k,
                user_preference_layer_results: k,
                max_prompt_chars: 4096,
            };
            let outcome = engine.retrieve(&req, now)?;
            if outcome.entries.is_empty() {
                println!("no matches");
            }
            for scored in &outcome.entries {
                println!(
                    "[{:.3}] ({}) [{}] {}",
                    scored.final_score, scored.entry.scope_key, scored.entry.kind, scored.entry.text
                );
            }
        }
        Command::Add { text, kind, scope, channel, chat_id, sender_id } => {
            let scopes = engine.resolve_scopes(&channel, &chat_id, sender_id.as_deref(), "default");
            let id = engine.add_manual(
                kind.0,
                &text,
                &channel,
                Some(&chat_id),
                sender_id.as_deref(),
                &scopes,
                Some(scope.0),
                now,
            )?;
            println!("inserted id={id}");
        }
        Command::Prune { older_than_days, dry_run } => {
            if older_than_days < 0 {
                return Err(CliError::Usage("--older-than-days must be >= 0".to_string()));
            }
            if dry_run {
                let count = engine.count_older_than_days(older_than_days, now)?;
                println!("dry run: would prune {count} rows older than {older_than_days} days");
            } else {
                let pruned = engine.prune_older_than_days(older_than_days, now)?;
                println!("pruned {pruned} rows");
            }
        }
        Command::Reindex => {
            let count = engine.reindex()?;
            println!("reindexed {count} rows");
        }
        Command::Backfill => {
            let imported = engine.backfill("workspace:default:global")?;
            println!("backfilled {imported} rows");
        }
    }
    Ok(())
}
