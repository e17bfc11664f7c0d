//! Tabula application binary - composition root.
//!
//! Ties the Tabula crates into an interactive terminal chat:
//! 1. Parse CLI args and load configuration from TOML
//! 2. Open the SQLite session store behind the retry policy
//! 3. Build the CSV library, role registry and inference service
//! 4. Run the read-eval-print loop against one session

mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use tabula_analysis::{suggest_questions, CsvLibrary};
use tabula_chat::{ChatOrchestrator, KeywordInference, RoleRegistry};
use tabula_core::config::TabulaConfig;
use tabula_core::types::SessionId;
use tabula_storage::{Database, RetryingStore, SqliteSessionStore};

use cli::{CliArgs, Command};

const HELP: &str = "\
Commands:
  help              show this message
  roles | agents    list the roles and what each can do
  load <file>       load a CSV file from the data directory
  quit | exit | bye leave (the session is kept)

Anything else is sent to the assistant, for example:
  which datasets are available?
  what is the average salary by department?
  are there any outliers in price?";

fn print_roles(orch: &ChatOrchestrator) {
    for role in orch.roles() {
        let tools: Vec<String> = role.capabilities.iter().map(|t| t.to_string()).collect();
        println!("  {} ({})", role.name.label(), role.name);
        println!("    {}", role.persona);
        println!("    tools: {}", tools.join(", "));
    }
}

fn print_banner(orch: &ChatOrchestrator, data_dir: &Path, session_id: SessionId) {
    println!("Tabula v{}: chat with your CSV data", env!("CARGO_PKG_VERSION"));
    let labels: Vec<&str> = orch.list_roles().iter().map(|r| r.label()).collect();
    println!("Roles: {}", labels.join(", "));

    match orch.available_datasets() {
        Ok(files) if files.is_empty() => {
            println!("No CSV files found in {}", data_dir.display());
        }
        Ok(files) => println!("Datasets in {}: {}", data_dir.display(), files.join(", ")),
        Err(e) => tracing::warn!(error = %e, "Could not list datasets"),
    }
    println!("Session {}. Type 'help' for commands.", session_id);
}

async fn resolve_session(orch: &ChatOrchestrator, requested: Option<SessionId>) -> Result<SessionId, Box<dyn std::error::Error>> {
    match requested {
        Some(id) => {
            let session = orch.session(id).await?;
            tracing::info!(
                session_id = %id,
                turns = session.turns.len(),
                role = %session.active_role,
                "Resumed session"
            );
            Ok(id)
        }
        None => Ok(orch.open_session().await?),
    }
}

async fn load_command(orch: &ChatOrchestrator, session_id: SessionId, file: &str) {
    match orch.load_dataset(session_id, Path::new(file)).await {
        Ok(dataset) => {
            println!(
                "Loaded {}: {} rows, columns: {}",
                dataset.file_name(),
                dataset.row_count,
                dataset.column_names().join(", ")
            );
            let suggestions = suggest_questions(&dataset);
            if !suggestions.is_empty() {
                println!("Try asking:");
                for q in suggestions.iter().take(3) {
                    println!("  {}", q);
                }
            }
        }
        Err(e) => println!("Error: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = TabulaConfig::load_or_default(&config_file);
    args.apply(&mut config);
    config.routing.validate()?;

    // Tracing. An explicit --log-level beats RUST_LOG, which beats the config file.
    let filter = match args.log_level {
        Some(ref level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Tabula v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Data directory.
    let data_dir = config.general.resolved_data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    // Storage. Database::new creates the parent directory.
    let db = Arc::new(Database::new(&config.storage.resolved_db_path())?);
    let store = RetryingStore::new(SqliteSessionStore::new(db), &config.storage);

    let orch = ChatOrchestrator::new(
        &config,
        Arc::new(RoleRegistry::builtin()),
        Arc::new(store),
        Arc::new(CsvLibrary::new(&data_dir)),
        Arc::new(KeywordInference::default()),
    );

    let session_id = resolve_session(&orch, args.session).await?;
    print_banner(&orch, &data_dir, session_id);

    // === REPL ===

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match Command::parse(&line) {
            Command::Empty => continue,
            Command::Help => println!("{}", HELP),
            Command::Roles => print_roles(&orch),
            Command::Load(file) => load_command(&orch, session_id, &file).await,
            Command::Quit => {
                println!("Goodbye!");
                break;
            }
            Command::Say(text) => match orch.submit_turn(session_id, &text).await {
                Ok(reply) => println!("{}", reply.answer),
                Err(e) => println!("Error: {}", e),
            },
        }
    }

    println!("Resume this conversation with: tabula --session {}", session_id);
    Ok(())
}
