use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sqlbind_core::EncryptMode;

#[derive(Debug, Parser)]
#[command(
    name = "sqlbind",
    version,
    about = "Create, delete and inspect per-binding SQL Server users"
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) connection: ConnectionArgs,
    /// Log every statement kind issued (overridden by RUST_LOG)
    #[arg(short, long)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Default, Args)]
pub(crate) struct ConnectionArgs {
    /// YAML file with connection settings; flags take precedence
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    /// Database that holds the bindings
    #[arg(short, long)]
    pub(crate) database: Option<String>,
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Administrative login
    #[arg(short, long)]
    pub(crate) user: Option<String>,
    #[arg(long, env = "SQLBIND_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,
    /// disable, false, true or strict
    #[arg(long, value_name = "MODE")]
    pub(crate) encrypt: Option<EncryptMode>,
    #[arg(long)]
    pub(crate) trust_server_certificate: bool,
    /// Principal that receives schemas and roles owned by a deleted user
    #[arg(long, value_name = "PRINCIPAL")]
    pub(crate) fallback_owner: Option<String>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Ensure the database, user, role memberships and execute grant exist
    Create {
        username: String,
        #[arg(long)]
        binding_password: String,
        /// Database role to add the user to; repeatable
        #[arg(long = "role", value_name = "ROLE")]
        roles: Vec<String>,
    },
    /// Reassign owned objects, then drop the user and any legacy login
    Delete { username: String },
    /// Print whether the user exists
    Read { username: String },
}
