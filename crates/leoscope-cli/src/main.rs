//! LEOScope CLI - manage users, nodes, jobs, runs, and config.
//!
//! Exit codes: 0 on success, 1 on a domain error from the coordinator,
//! 2 on transport failure, 3 on bad input.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use leoscope_client::{ApiClient, ClientError, Credential};

#[derive(Parser)]
#[command(name = "leoscope")]
#[command(about = "Manage LEOScope users, nodes, jobs, runs, and config")]
#[command(version)]
struct Cli {
    /// Coordinator base URL.
    #[arg(long, env = "LEOSCOPE_URL", default_value = "http://localhost:8070")]
    url: String,

    /// Caller user id.
    #[arg(long, env = "LEOSCOPE_USERID")]
    user_id: String,

    /// Static bearer token.
    #[arg(long, env = "LEOSCOPE_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage user credentials
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },

    /// Manage measurement nodes
    Node {
        #[command(subcommand)]
        action: commands::node::NodeAction,
    },

    /// Submit and inspect experiment jobs
    Job {
        #[command(subcommand)]
        action: commands::job::JobAction,
    },

    /// Inspect runs and download artifacts
    Run {
        #[command(subcommand)]
        action: commands::run::RunAction,
    },

    /// Read or replace the global config document
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

/// CLI failures, partitioned by exit code.
pub enum CliError {
    /// Coordinator rejected the call (exit 1) or transport failed (exit 2).
    Client(ClientError),
    /// Local input was unusable (exit 3).
    Input(String),
}

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        Self::Client(err)
    }
}

impl CliError {
    fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    fn report(&self) -> ExitCode {
        match self {
            Self::Client(err @ ClientError::Api(_)) => {
                eprintln!("error: {err}");
                ExitCode::from(1)
            }
            Self::Client(err) => {
                eprintln!("transport error: {err}");
                ExitCode::from(2)
            }
            Self::Input(msg) => {
                eprintln!("bad input: {msg}");
                ExitCode::from(3)
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version requests are not errors.
            if err.use_stderr() {
                let _ = err.print();
                return ExitCode::from(3);
            }
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    let client = match ApiClient::new(
        cli.url.clone(),
        Credential::Static {
            user_id: cli.user_id.clone(),
            token: cli.token.clone(),
        },
    ) {
        Ok(client) => client,
        Err(err) => return CliError::from(err).report(),
    };

    let result = match cli.command {
        Commands::User { action } => commands::user::run(&client, action).await,
        Commands::Node { action } => commands::node::run(&client, action).await,
        Commands::Job { action } => commands::job::run(&client, action).await,
        Commands::Run { action } => commands::run::run(&client, action).await,
        Commands::Config { action } => commands::config::run(&client, action).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => err.report(),
    }
}

/// Pretty-print any serialisable payload as JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::input(format!("unprintable response: {e}")))?;
    println!("{rendered}");
    Ok(())
}
