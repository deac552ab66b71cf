//! `leoscope run` subcommands.

use std::path::PathBuf;

use clap::Subcommand;

use leoscope_client::ApiClient;
use leoscope_proto::{JobId, NodeId, RunFilter, RunId, UserId};

use crate::{print_json, CliError};

#[derive(Subcommand)]
pub enum RunAction {
    /// List runs
    Get {
        /// Runs of this job
        #[arg(long)]
        job_id: Option<String>,

        /// Runs on this node
        #[arg(long)]
        node_id: Option<String>,

        /// Runs owned by this user
        #[arg(long)]
        user_id: Option<String>,

        /// Only runs that have not reached a terminal state
        #[arg(long)]
        scheduled: bool,
    },

    /// Download a run's artifact archive
    Download {
        /// Job the run belongs to
        #[arg(long)]
        job_id: String,

        /// Run id
        #[arg(long)]
        run_id: String,

        /// Output file (defaults to `<run_id>.tar`)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub async fn run(client: &ApiClient, action: RunAction) -> Result<(), CliError> {
    match action {
        RunAction::Get {
            job_id,
            node_id,
            user_id,
            scheduled,
        } => {
            let filter = RunFilter {
                job_id: job_id.map(JobId::new),
                node_id: node_id.map(NodeId::new),
                user_id: user_id.map(UserId::new),
            };
            let runs = if scheduled {
                client.get_scheduled_runs(&filter).await?
            } else {
                client.get_runs(&filter).await?
            };
            print_json(&runs)
        }
        RunAction::Download {
            job_id,
            run_id,
            output,
        } => {
            let runs = client
                .get_runs(&RunFilter {
                    job_id: Some(JobId::new(job_id.as_str())),
                    ..Default::default()
                })
                .await?;
            let wanted = RunId::new(run_id.as_str());
            let run = runs
                .into_iter()
                .find(|r| r.id == wanted)
                .ok_or_else(|| CliError::Input(format!("no run {run_id} under job {job_id}")))?;
            let artifact_url = run.artifact_url.ok_or_else(|| {
                CliError::Input(format!("run {run_id} has no uploaded artifact"))
            })?;

            let data = client.download_artifact(&artifact_url).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{run_id}.tar")));
            std::fs::write(&output, &data)
                .map_err(|e| CliError::Input(format!("writing {}: {e}", output.display())))?;
            println!("downloaded {} bytes to {}", data.len(), output.display());
            Ok(())
        }
    }
}
