//! CLI subcommand implementations.

pub mod config;
pub mod job;
pub mod node;
pub mod run;
pub mod user;

use leoscope_proto::Role;

use crate::CliError;

/// Parse a role name as accepted on the command line.
pub fn parse_role(value: &str) -> Result<Role, CliError> {
    match value {
        "admin" => Ok(Role::Admin),
        "node_priv" => Ok(Role::NodePriv),
        "user_priv" => Ok(Role::UserPriv),
        "node" => Ok(Role::Node),
        "user" => Ok(Role::User),
        other => Err(CliError::Input(format!(
            "unknown role '{other}' (expected admin, node_priv, user_priv, node, or user)"
        ))),
    }
}
