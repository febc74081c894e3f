//! Thin CLI over the engine: index repos, cut slices, inspect deltas and
//! the audit trail. Output is JSON on stdout; errors render the structured
//! envelope on stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use codeslice::error::ErrorEnvelope;
use codeslice::slice::wire;
use codeslice::{Engine, EngineError, Settings, SliceBudget, SliceRequest, SymbolId, VersionId};

#[derive(Parser)]
#[command(
    name = "codeslice",
    version,
    about = "Incremental code intelligence and context slices for LLM agents"
)]
struct Cli {
    /// Config file path; defaults to SDL_CONFIG / SDL_CONFIG_PATH /
    /// ./codeslice.json.
    #[arg(long, global = true, env = "SDL_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config file.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Index one repo (or all configured repos).
    Index {
        /// Repo id; omit to index everything.
        repo: Option<String>,
        /// Reindex unchanged files too.
        #[arg(long)]
        force: bool,
    },
    /// Build a context slice.
    Slice {
        repo: String,
        /// Task description used to derive entry symbols.
        #[arg(long)]
        task: Option<String>,
        /// Explicit entry symbol ids.
        #[arg(long = "entry")]
        entries: Vec<String>,
        #[arg(long)]
        max_cards: Option<usize>,
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Emit the compact wire form (version 1).
        #[arg(long)]
        compact: bool,
    },
    /// Delta between two committed versions.
    Delta {
        repo: String,
        from: String,
        to: String,
    },
    /// Show recent audit events.
    Audit {
        repo: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        match err.downcast_ref::<EngineError>() {
            Some(engine_err) => {
                let envelope = ErrorEnvelope::from_error(engine_err);
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&envelope)
                        .unwrap_or_else(|_| engine_err.to_string())
                );
            }
            None => eprintln!("error: {err}"),
        }
        std::process::exit(1);
    }
}

fn load_settings(cli_config: &Option<std::path::PathBuf>) -> Result<Settings> {
    let settings = match cli_config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    Ok(settings)
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Init { force } = &cli.command {
        return init_config(*force);
    }

    let settings = load_settings(&cli.config)?;
    codeslice::logging::init_with_config(&settings.logging);
    let engine = Engine::new(settings)?;

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Index { repo, force } => {
            let results = match repo {
                Some(repo_id) => vec![(repo_id.clone(), engine.index_repo(&repo_id, force))],
                None => engine.index_all(force),
            };
            let mut failed = false;
            for (repo_id, result) in results {
                match result {
                    Ok(stats) => {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    }
                    Err(err) => {
                        failed = true;
                        eprintln!(
                            "{}",
                            serde_json::to_string_pretty(&ErrorEnvelope::from_error(&err))?
                        );
                        tracing::error!(target: "cli", "indexing '{repo_id}' failed: {err}");
                    }
                }
            }
            if failed {
                anyhow::bail!("one or more repos failed to index");
            }
        }
        Command::Slice {
            repo,
            task,
            entries,
            max_cards,
            max_tokens,
            compact,
        } => {
            let mut request = SliceRequest::new(repo);
            request.task_text = task;
            request.entry_symbols = entries.iter().map(|e| SymbolId::from(e.as_str())).collect();
            let defaults = SliceBudget::default();
            request.budget = SliceBudget {
                max_cards: max_cards.unwrap_or(defaults.max_cards),
                max_estimated_tokens: max_tokens.unwrap_or(defaults.max_estimated_tokens),
            };

            let result = engine.build_slice(&request)?;
            if compact {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&wire::encode_compact(&result.slice))?
                );
            } else {
                println!("{}", serde_json::to_string_pretty(&*result)?);
            }
        }
        Command::Delta { repo, from, to } => {
            let delta = engine.delta(&repo, &VersionId::new(from), &VersionId::new(to))?;
            println!("{}", serde_json::to_string_pretty(&delta)?);
        }
        Command::Audit { repo, limit } => {
            let trail = engine.audit().trail(repo.as_deref(), limit)?;
            let rows: Vec<serde_json::Value> = trail
                .iter()
                .map(|event| {
                    serde_json::json!({
                        "eventId": event.event_id,
                        "timestamp": event.timestamp,
                        "tool": event.tool,
                        "decision": event.decision,
                        "repoId": event.repo_id,
                        "symbolId": event.symbol_id,
                        "details": event.details,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let path = Settings::config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "config already exists at {}; pass --force to overwrite",
            path.display()
        );
    }
    let starter = serde_json::json!({
        "repos": [{
            "repoId": "my-repo",
            "rootPath": ".",
            "languages": ["ts", "tsx", "js", "jsx"],
            "ignore": ["**/*.min.js"],
            "maxFileBytes": 1_048_576
        }],
        "dbPath": ".codeslice/index.db",
        "policy": {
            "maxWindowLines": 180,
            "maxWindowTokens": 1400,
            "defaultDenyRaw": true,
            "budgetCaps": {"maxCards": 60, "maxEstimatedTokens": 12000}
        }
    });
    std::fs::write(&path, serde_json::to_string_pretty(&starter)?)?;
    println!("wrote {}", path.display());
    Ok(())
}
