// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! remact catalog daemon
//!
//! # Usage
//!
//! ```bash
//! # Default port 40000 on localhost
//! remact-catalog
//!
//! # All interfaces, gossiping with a second catalog
//! remact-catalog --bind 0.0.0.0 --peer tcp://plant-9:40000/RemactCatalog
//!
//! # From a file
//! remact-catalog --config catalog.toml
//! remact-catalog gen-config -o catalog.toml
//! ```

use clap::{Parser, Subcommand};
use remact_catalog::{CatalogServer, CatalogServerConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// remact catalog - service registry with peer gossip
#[derive(Parser, Debug)]
#[command(name = "remact-catalog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Peer catalog URI (can repeat)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Log filter (trace, debug, info, warn, error or a directive list)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "catalog.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("+----------------------------------------------------+");
    info!(
        "|       remact catalog v{}                       |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Uri:    {:40} |", config.catalog.uri);
    info!(
        "|  Bind:   {:40} |",
        config
            .transport
            .bind_address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "uri host".to_string())
    );
    info!("|  Peers:  {:40} |", config.catalog.peers.len());
    info!("+----------------------------------------------------+");
    for peer in &config.catalog.peers {
        info!("peer: {}", peer);
    }

    let server = Arc::new(CatalogServer::new(config)?);

    let server_handle = Arc::clone(&server);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping catalog...");
        server_handle.shutdown();
    });

    server.run().await?;
    Ok(())
}

fn build_config(args: &Args) -> Result<CatalogServerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => CatalogServerConfig::from_file(path)?,
        None => CatalogServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.set_port(port)?;
    }
    if let Some(bind) = args.bind {
        config.transport.bind_address = Some(bind);
    }
    config.add_peers(args.peers.iter().cloned());
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = CatalogServerConfig::example().to_toml()?;
    let content = format!(
        r#"# remact catalog configuration
# Generated by remact-catalog gen-config

{}
"#,
        toml_str
    );
    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match CatalogServerConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Catalog: {} at {}", config.catalog.name, config.catalog.uri);
            println!("Peers:   {}", config.catalog.peers.len());
            for peer in &config.catalog.peers {
                println!("  {}", peer);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
