//! `leoscope config` subcommands.

use std::path::PathBuf;

use clap::Subcommand;

use leoscope_client::ApiClient;

use crate::{print_json, CliError};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the global config document
    Get,

    /// Replace the global config document from a JSON file
    Update {
        /// Path to the config document (`-` for stdin)
        #[arg(long)]
        file: PathBuf,
    },
}

pub async fn run(client: &ApiClient, action: ConfigAction) -> Result<(), CliError> {
    match action {
        ConfigAction::Get => {
            let config = client.get_config().await?;
            print_json(&config)
        }
        ConfigAction::Update { file } => {
            let raw = if file.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())
                    .map_err(|e| CliError::Input(format!("reading stdin: {e}")))?
            } else {
                std::fs::read_to_string(&file)
                    .map_err(|e| CliError::Input(format!("reading {}: {e}", file.display())))?
            };
            let config: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| CliError::Input(format!("unparseable config document: {e}")))?;

            let ack = client.update_config(config).await?;
            print_json(&ack)
        }
    }
}
