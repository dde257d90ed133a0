// ABOUTME: Entry point for the ruleward binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and drives sessions against the configured snapshot store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ruleward_core::{Fact, PersistenceStrategy, Rule, RuleProgram, SafepointStrategy, SessionOptions};
use ruleward_session::{ReliabilityConfig, SessionManager, StoreKind};
use ruleward_store::read_header;
use ulid::Ulid;

/// Ruleward - failover recovery for stateful rule sessions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory (overrides RULEWARD_HOME)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Snapshot store backend: memory, file or sqlite (overrides RULEWARD_STORE)
    #[arg(long)]
    store: Option<StoreKind>,

    /// stores_only or full (overrides RULEWARD_PERSISTENCE)
    #[arg(long)]
    persistence: Option<PersistenceStrategy>,

    /// explicit or always (overrides RULEWARD_SAFEPOINT)
    #[arg(long)]
    safepoint: Option<SafepointStrategy>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the prefix-matching walkthrough across a simulated failover
    Demo,
    /// List sessions with a snapshot in the store
    Sessions,
    /// Restore a stored session and print its facts and globals
    Show { session_id: Ulid },
    /// Delete a session's stored snapshot
    Destroy { session_id: Ulid },
}

/// Fires once per (prefix, person) pair where the person's name starts with
/// the prefix, recording the name in the `results` global.
fn prefix_program() -> Arc<RuleProgram> {
    Arc::new(RuleProgram::new(vec![
        Rule::new("prefix_match")
            .when("String")
            .when("Person")
            .filter(|t| match (t.fact(0).str("value"), t.fact(1).str("name")) {
                (Some(prefix), Some(name)) => name.starts_with(prefix),
                _ => false,
            })
            .then(|t, ctx| ctx.push_global("results", t.fact(1).str("name").unwrap_or_default())),
    ]))
}

fn person(name: &str, age: i64) -> Fact {
    Fact::new("Person").with("name", name).with("age", age)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ruleward=debug".into()),
        )
        .init();

    let mut config = ReliabilityConfig::from_env().context("loading configuration")?;
    if let Some(home) = args.home {
        config.home = home;
    }
    if let Some(store) = args.store {
        config.store = store;
    }
    if let Some(persistence) = args.persistence {
        config.options.persistence = persistence;
    }
    if let Some(safepoint) = args.safepoint {
        config.options.safepoint = safepoint;
    }
    config.options.validate()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ruleward starting up");

    let store = config.open_store().context("opening snapshot store")?;
    let manager = SessionManager::new(store);

    match args.command {
        Cmd::Demo => demo(&manager, config.options).await,
        Cmd::Sessions => list_sessions(&manager),
        Cmd::Show { session_id } => show(&manager, session_id).await,
        Cmd::Destroy { session_id } => {
            manager.destroy_session(&session_id).await?;
            println!("destroyed {session_id}");
            Ok(())
        }
    }
}

async fn demo(manager: &SessionManager, options: SessionOptions) -> Result<()> {
    let program = prefix_program();
    let id = manager.create_session(Arc::clone(&program), options).await?;
    println!("session {id} ({} / {})", options.persistence, options.safepoint);

    manager.insert(&id, Fact::text("M")).await?;
    manager.insert(&id, person("Matching Person One", 37)).await?;
    let fired = manager.fire_all_rules(&id).await?;
    println!("fired {fired} before failover");

    manager.insert(&id, person("Matching Person Two", 35)).await?;
    manager.safepoint(&id).await?;

    manager.failover().await;
    manager.restore_session(id, program, options).await?;

    let fired = manager.fire_all_rules(&id).await?;
    println!("fired {fired} after restore");

    let results = manager.global(&id, "results").await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn list_sessions(manager: &SessionManager) -> Result<()> {
    for id in manager.stored_sessions()? {
        match read_header(manager.store().as_ref(), &id)? {
            Some(header) => println!(
                "{id}  state_version={}  {} / {}",
                header.state_version, header.persistence, header.safepoint
            ),
            None => println!("{id}  (no header)"),
        }
    }
    Ok(())
}

async fn show(manager: &SessionManager, session_id: Ulid) -> Result<()> {
    let Some(header) = read_header(manager.store().as_ref(), &session_id)? else {
        bail!("no snapshot stored for session {session_id}");
    };
    manager
        .restore_session(session_id, prefix_program(), header.options())
        .await?;

    for (handle, fact) in manager.facts(&session_id).await? {
        println!("{handle}  {}", serde_json::to_string(&fact)?);
    }
    let results = manager.global(&session_id, "results").await?;
    println!("results: {}", serde_json::to_string(&results)?);
    println!("pending activations: {}", manager.pending_activations(&session_id).await?);
    Ok(())
}
