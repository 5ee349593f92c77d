//! Command line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dropbox-login", about = "Authorize Dropbox accounts and manage stored credentials")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file. Falls back to $DROPBOX_AUTH_CONFIG, then dropbox-auth.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Credential file.
    #[arg(
        long,
        global = true,
        env = "DROPBOX_CREDENTIALS_FILE",
        default_value = "dropbox-credentials.json"
    )]
    pub store: PathBuf,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Authorize a Dropbox account.
    Login,
    /// List stored accounts.
    List,
    /// Refresh stored tokens.
    Refresh {
        /// Refresh even tokens that have not expired.
        #[arg(long)]
        force: bool,
    },
    /// Remove stored accounts.
    Logout {
        /// Account to remove.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        account_id: Option<String>,
        /// Remove every account.
        #[arg(long)]
        all: bool,
    },
    /// Keep tokens fresh until interrupted.
    Watch,
}
