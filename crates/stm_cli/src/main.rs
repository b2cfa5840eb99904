//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `stm_core` linkage, configuration and database migration.
//! - Issue bearer tokens for local testing in place of the identity
//!   provider callback.
//!
//! Usage: `stm_cli [--config <path>] [issue-token <user>]`

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use stm_core::auth::unix_now;
use stm_core::db::migrations::current_user_version;
use stm_core::{init_logging, open_db_with, CoreConfig};

#[derive(Debug, Parser)]
#[command(name = "stm_cli")]
#[command(about = "Smoke checks and local tokens for the shared task manager")]
struct Cli {
    /// JSON config file; `STM_*` variables override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a bearer token for USER
    IssueToken { user: String },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("stm_cli: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = CoreConfig::load(cli.config.as_deref()).map_err(|err| err.to_string())?;
    if let Some(log_dir) = &config.log_dir {
        let level = config.log_level().map_err(|err| err.to_string())?;
        init_logging(level, log_dir).map_err(|err| err.to_string())?;
    }

    println!("stm_core ping={}", stm_core::ping());
    println!("stm_core version={}", stm_core::core_version());

    if let Some(path) = &config.database_path {
        let conn = open_db_with(path, &config.db_options()).map_err(|err| err.to_string())?;
        let version = current_user_version(&conn).map_err(|err| err.to_string())?;
        println!("stm_core schema_version={version}");
    }

    if let Some(Commands::IssueToken { user }) = cli.command {
        let signer = config.token_signer().map_err(|err| err.to_string())?;
        if config.token_secret.is_none() {
            eprintln!("stm_cli: no token_secret configured; token only valid in this process");
        }
        let token = signer
            .issue_encoded(&user, unix_now())
            .map_err(|err| err.to_string())?;
        println!("{token}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn parses_config_and_issue_token() {
        let cli = Cli::try_parse_from(["stm_cli", "--config", "/etc/stm.json", "issue-token", "alice"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/stm.json")));
        assert!(matches!(cli.command, Some(Commands::IssueToken { user }) if user == "alice"));
    }

    #[test]
    fn bare_invocation_runs_smoke_checks_only() {
        let cli = Cli::try_parse_from(["stm_cli"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn issue_token_needs_a_user() {
        assert!(Cli::try_parse_from(["stm_cli", "issue-token"]).is_err());
        assert!(Cli::try_parse_from(["stm_cli", "--verbose"]).is_err());
    }
}
