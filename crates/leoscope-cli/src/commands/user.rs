//! `leoscope user` subcommands.

use clap::Subcommand;

use leoscope_client::ApiClient;
use leoscope_proto::{ModifyUserRequest, RegisterUserRequest, UserId};

use crate::{print_json, CliError};

use super::parse_role;

#[derive(Subcommand)]
pub enum UserAction {
    /// Register a user; prints the credential exactly once
    Register {
        /// User id
        #[arg(long)]
        id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Role: admin, node_priv, user_priv, node, or user
        #[arg(long, default_value = "user")]
        role: String,

        /// Owning team
        #[arg(long)]
        team: String,
    },

    /// Modify a user record
    Modify {
        /// User id
        #[arg(long)]
        id: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New role
        #[arg(long)]
        role: Option<String>,

        /// New team
        #[arg(long)]
        team: Option<String>,
    },

    /// Delete a user
    Delete {
        /// User id
        #[arg(long)]
        id: String,
    },
}

pub async fn run(client: &ApiClient, action: UserAction) -> Result<(), CliError> {
    match action {
        UserAction::Register {
            id,
            name,
            role,
            team,
        } => {
            let credential = client
                .register_user(&RegisterUserRequest {
                    id: UserId::new(id),
                    name,
                    role: parse_role(&role)?,
                    team,
                })
                .await?;
            println!("user {} registered", credential.id);
            println!("token (store it now, it is not recoverable): {}", credential.token);
            Ok(())
        }
        UserAction::Modify {
            id,
            name,
            role,
            team,
        } => {
            let role = role.as_deref().map(parse_role).transpose()?;
            let ack = client
                .modify_user(
                    &UserId::new(id),
                    &ModifyUserRequest { name, role, team },
                )
                .await?;
            print_json(&ack)
        }
        UserAction::Delete { id } => {
            let ack = client.delete_user(&UserId::new(id)).await?;
            print_json(&ack)
        }
    }
}
