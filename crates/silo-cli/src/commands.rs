use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use silo_crypto::{Keypair, PublicKey};
use silo_server::{ServerConfig, SiloServer};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Keygen(args) => cmd_keygen(args, &cli.format),
        Command::Pubkey(args) => cmd_pubkey(args, &cli.format),
        Command::Config(args) => cmd_config(args),
    }
}

fn serve_config(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(peer) = args.peer {
        config.peer_addr = Some(peer);
    }
    if let Some(storage) = &args.storage {
        config.storage_root = storage.clone();
    }
    if let Some(key) = &args.key {
        config.keypair_path = Some(key.clone());
    }
    if args.anonymous {
        config.allow_uploads = false;
    }
    Ok(config)
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = serve_config(&args)?;
    let server = SiloServer::open(config).await.context("failed to open storage node")?;
    let config = server.config();
    println!("{} Silo node on {}", "✓".green().bold(), config.bind_addr.to_string().bold());
    println!("  Storage: {}", config.storage_root.display());
    println!("  Node key: {}", server.public_key().to_hex().cyan());
    if let Some(peer) = config.peer_addr {
        println!("  Peers: {}", peer.to_string().yellow());
    }
    if !config.allow_uploads {
        println!("  {}", "Anonymous mode: uploads disabled".yellow());
    }
    server.serve().await?;
    Ok(())
}

fn print_key(label: &str, key: &PublicKey, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{label} {}", key.to_hex().cyan()),
        OutputFormat::Json => println!("{}", json!({ "public_key": key.to_hex() })),
    }
}

fn cmd_keygen(args: KeygenArgs, format: &OutputFormat) -> anyhow::Result<()> {
    if args.out.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", args.out.display());
    }
    let keypair = Keypair::generate();
    keypair
        .save(&args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    if matches!(format, OutputFormat::Text) {
        println!("{} Wrote node key to {}", "✓".green().bold(), args.out.display());
    }
    print_key("Public key:", &keypair.public_key(), format);
    Ok(())
}

fn cmd_pubkey(args: PubkeyArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let keypair = Keypair::load(&args.key)
        .with_context(|| format!("failed to read {}", args.key.display()))?;
    print_key("Public key:", &keypair.public_key(), format);
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let text = toml::to_string_pretty(&ServerConfig::default())?;
    match args.out {
        Some(path) => {
            std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
            println!("{} Wrote default config to {}", "✓".green().bold(), path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "bind_addr = \"0.0.0.0:7000\"\nbackend_timeout = 9\n").unwrap();

        let cli = Cli::try_parse_from([
            "silo",
            "serve",
            "-c",
            path.to_str().unwrap(),
            "--bind",
            "127.0.0.1:7100",
            "--anonymous",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else { panic!("wrong command") };
        let config = serve_config(&args).unwrap();
        assert_eq!(config.bind_addr.port(), 7100);
        assert_eq!(config.backend_timeout, 9);
        assert!(!config.allow_uploads);
    }

    #[test]
    fn keygen_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("node.key");
        cmd_keygen(KeygenArgs { out: out.clone(), force: false }, &OutputFormat::Json).unwrap();
        let first = Keypair::load(&out).unwrap().public_key();

        assert!(cmd_keygen(KeygenArgs { out: out.clone(), force: false }, &OutputFormat::Json).is_err());
        cmd_keygen(KeygenArgs { out: out.clone(), force: true }, &OutputFormat::Json).unwrap();
        assert_ne!(Keypair::load(&out).unwrap().public_key(), first);
        cmd_pubkey(PubkeyArgs { key: out }, &OutputFormat::Text).unwrap();
    }

    #[test]
    fn default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("silo.toml");
        cmd_config(ConfigArgs { out: Some(out.clone()) }).unwrap();
        let loaded = ServerConfig::load(&out).unwrap();
        assert_eq!(loaded.bind_addr, ServerConfig::default().bind_addr);
    }
}
