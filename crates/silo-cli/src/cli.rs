use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "silo",
    about = "Silo storage node: content-addressed asset storage with ranged downloads and peer sync",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the storage node
    Serve(ServeArgs),
    /// Generate a node identity key
    Keygen(KeygenArgs),
    /// Print the public key of an identity key file
    Pubkey(PubkeyArgs),
    /// Print the default configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// HTTP listen address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Peer listen address
    #[arg(long)]
    pub peer: Option<SocketAddr>,
    /// Storage root directory
    #[arg(long)]
    pub storage: Option<PathBuf>,
    /// Identity key file
    #[arg(long)]
    pub key: Option<PathBuf>,
    /// Refuse all uploads
    #[arg(long)]
    pub anonymous: bool,
}

#[derive(Args)]
pub struct KeygenArgs {
    #[arg(short, long)]
    pub out: PathBuf,
    /// Overwrite an existing key file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct PubkeyArgs {
    #[arg(short, long)]
    pub key: PathBuf,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}
