//! `leoscope job` subcommands.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Subcommand;

use leoscope_client::ApiClient;
use leoscope_proto::{Job, JobId, NodeId, UserId};

use crate::{print_json, CliError};

#[derive(Subcommand)]
pub enum JobAction {
    /// Submit a job for admission from a JSON file
    Schedule {
        /// Path to the job record (`-` for stdin)
        #[arg(long)]
        file: PathBuf,
    },

    /// Fetch a job by id
    Get {
        /// Job id
        #[arg(long)]
        id: String,
    },

    /// Jobs targeting a node (as client or paired server)
    GetByNode {
        /// Node id
        #[arg(long)]
        node_id: String,
    },

    /// Jobs owned by a user
    GetByUser {
        /// User id
        #[arg(long)]
        user_id: String,
    },

    /// Delete a job
    Delete {
        /// Job id
        #[arg(long)]
        id: String,
    },

    /// Move a one-shot job to the nearest free slot
    Reschedule {
        /// Job id
        #[arg(long)]
        id: String,

        /// Earliest acceptable instant, RFC 3339 (defaults to now)
        #[arg(long)]
        after: Option<String>,
    },
}

pub async fn run(client: &ApiClient, action: JobAction) -> Result<(), CliError> {
    match action {
        JobAction::Schedule { file } => {
            let raw = if file.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())
                    .map_err(|e| CliError::Input(format!("reading stdin: {e}")))?
            } else {
                std::fs::read_to_string(&file)
                    .map_err(|e| CliError::Input(format!("reading {}: {e}", file.display())))?
            };
            let job: Job = serde_json::from_str(&raw)
                .map_err(|e| CliError::Input(format!("unparseable job record: {e}")))?;

            let ack = client.schedule_job(&job).await?;
            print_json(&ack)
        }
        JobAction::Get { id } => {
            let job = client.get_job(&JobId::new(id)).await?;
            print_json(&job)
        }
        JobAction::GetByNode { node_id } => {
            let jobs = client.get_jobs_by_node(&NodeId::new(node_id)).await?;
            print_json(&jobs)
        }
        JobAction::GetByUser { user_id } => {
            let jobs = client.get_jobs_by_user(&UserId::new(user_id)).await?;
            print_json(&jobs)
        }
        JobAction::Delete { id } => {
            let ack = client.delete_job(&JobId::new(id)).await?;
            print_json(&ack)
        }
        JobAction::Reschedule { id, after } => {
            let after = match after {
                Some(raw) => raw
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| CliError::Input(format!("unparseable timestamp '{raw}': {e}")))?,
                None => Utc::now(),
            };
            let moved = client
                .reschedule_job_nearest(&JobId::new(id), after)
                .await?;
            print_json(&moved)
        }
    }
}
