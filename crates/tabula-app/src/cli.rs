//! CLI argument definitions and REPL command parsing for the Tabula binary.
//!
//! Uses `clap` with derive macros for argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;
use uuid::Uuid;

use tabula_core::config::TabulaConfig;

/// Tabula: chat with your CSV data through a small team of specialist roles.
#[derive(Parser, Debug)]
#[command(name = "tabula", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Directory holding the CSV files to chat about.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// SQLite database for session memory.
    #[arg(long = "db-path")]
    pub db_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Resume an existing session instead of starting a new one.
    #[arg(short = 's', long = "session")]
    pub session: Option<Uuid>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > TABULA_CONFIG env var > ~/.tabula/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("TABULA_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut TabulaConfig) {
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref path) = self.db_path {
            config.storage.db_path = path.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".tabula").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".tabula").join("config.toml");
    }
    PathBuf::from("config.toml")
}

// =============================================================================
// REPL commands
// =============================================================================

/// One line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Roles,
    /// Load a CSV file; `.csv` is appended when missing.
    Load(String),
    Quit,
    Empty,
    /// Anything else is a chat turn.
    Say(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }

        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };

        match (head.to_ascii_lowercase().as_str(), rest) {
            ("help", "") => Command::Help,
            ("roles" | "agents", "") => Command::Roles,
            ("quit" | "exit" | "bye", "") => Command::Quit,
            ("load", file) if !file.is_empty() && !file.contains(char::is_whitespace) => {
                Command::Load(with_csv_extension(file))
            }
            _ => Command::Say(trimmed.to_string()),
        }
    }
}

fn with_csv_extension(file: &str) -> String {
    if file.to_ascii_lowercase().ends_with(".csv") {
        file.to_string()
    } else {
        format!("{}.csv", file)
    }
}
