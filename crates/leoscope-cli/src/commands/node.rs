//! `leoscope node` subcommands.

use clap::Subcommand;

use leoscope_client::ApiClient;
use leoscope_proto::{Coords, NodeFilter, NodeId, RegisterNodeRequest, UpdateNodeRequest};

use crate::{print_json, CliError};

#[derive(Subcommand)]
pub enum NodeAction {
    /// Register a node; prints the node credential exactly once
    Register {
        /// Node id
        #[arg(long)]
        id: String,

        /// Human-readable name
        #[arg(long)]
        display_name: String,

        /// Terminal latitude in degrees
        #[arg(long)]
        lat: f64,

        /// Terminal longitude in degrees
        #[arg(long)]
        lon: f64,

        /// Location description
        #[arg(long)]
        location: String,

        /// Connectivity provider
        #[arg(long, default_value = "starlink")]
        provider: String,

        /// Publicly reachable address
        #[arg(long)]
        public_ip: Option<String>,
    },

    /// List nodes
    Get {
        /// Restrict to one node
        #[arg(long)]
        node_id: Option<String>,

        /// Restrict to a location substring
        #[arg(long)]
        location: Option<String>,

        /// Only nodes with a recent heartbeat
        #[arg(long)]
        active: bool,

        /// Heartbeat recency threshold in seconds
        #[arg(long)]
        active_thres_s: Option<u32>,
    },

    /// Update a node record
    Update {
        /// Node id
        #[arg(long)]
        id: String,

        /// New display name
        #[arg(long)]
        display_name: Option<String>,

        /// New location description
        #[arg(long)]
        location: Option<String>,

        /// New provider
        #[arg(long)]
        provider: Option<String>,

        /// New public address
        #[arg(long)]
        public_ip: Option<String>,
    },

    /// Delete a node and its credential
    Delete {
        /// Node id
        #[arg(long)]
        id: String,
    },

    /// Toggle scavenger mode on a node
    ScavengerSet {
        /// Node id
        #[arg(long)]
        id: String,

        /// Desired state
        #[arg(long)]
        active: bool,
    },

    /// Read a node's scavenger state
    ScavengerGet {
        /// Node id
        #[arg(long)]
        id: String,
    },
}

pub async fn run(client: &ApiClient, action: NodeAction) -> Result<(), CliError> {
    match action {
        NodeAction::Register {
            id,
            display_name,
            lat,
            lon,
            location,
            provider,
            public_ip,
        } => {
            let credential = client
                .register_node(&RegisterNodeRequest {
                    id: NodeId::new(id),
                    display_name,
                    coords: Coords { lat, lon },
                    location,
                    provider,
                    public_ip,
                })
                .await?;
            println!("node {} registered", credential.id);
            println!("token (store it now, it is not recoverable): {}", credential.token);
            Ok(())
        }
        NodeAction::Get {
            node_id,
            location,
            active,
            active_thres_s,
        } => {
            let nodes = client
                .get_nodes(&NodeFilter {
                    node_id: node_id.map(NodeId::new),
                    location,
                    active: active.then_some(true),
                    active_thres_s,
                })
                .await?;
            print_json(&nodes)
        }
        NodeAction::Update {
            id,
            display_name,
            location,
            provider,
            public_ip,
        } => {
            let ack = client
                .update_node(
                    &NodeId::new(id),
                    &UpdateNodeRequest {
                        display_name,
                        coords: None,
                        location,
                        provider,
                        public_ip,
                    },
                )
                .await?;
            print_json(&ack)
        }
        NodeAction::Delete { id } => {
            let ack = client.delete_node(&NodeId::new(id)).await?;
            print_json(&ack)
        }
        NodeAction::ScavengerSet { id, active } => {
            let state = client.set_scavenger(&NodeId::new(id), active).await?;
            print_json(&state)
        }
        NodeAction::ScavengerGet { id } => {
            let state = client.get_scavenger(&NodeId::new(id)).await?;
            print_json(&state)
        }
    }
}
