use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "newsbridge")]
#[command(about = "Nextcloud News API client", long_about = None)]
pub struct Cli {
    /// Configuration file, overrides NEWSBRIDGE_CONFIG
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Default log filter, RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "newsbridge=info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Grant access through the Nextcloud login flow
    Login(LoginArgs),
    /// Check the configured account against the server
    Validate,
}

#[derive(clap::Args, Debug)]
pub struct LoginArgs {
    /// Server URL, e.g. https://cloud.example.com/nextcloud
    #[arg(long)]
    pub server: Option<String>,
}
