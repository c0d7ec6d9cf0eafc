// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Meridian - a clustered healthcare integration engine.
//!
//! This is the binary entry point for the Meridian server.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod leases;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use meridian_config::MeridianConfig;

/// Meridian - a clustered healthcare integration engine.
#[derive(Parser, Debug)]
#[command(name = "meridian", version, about, long_about = None)]
struct Cli {
    /// Configuration file to load instead of the XDG hierarchy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy the configured channels and run until interrupted.
    Serve,
    /// Inspect Meridian configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the channel leases recorded in the coordination database.
    Leases {
        /// Print the inventory as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate the configuration and print a summary.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => meridian_config::load_and_validate_path(path),
        None => meridian_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            meridian_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Config {
            action: ConfigAction::Check,
        }) => {
            print!("{}", config_summary(&config));
            Ok(())
        }
        Some(Commands::Leases { json }) => leases::run_leases(&config, json).await,
        None => {
            println!("meridian: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("meridian: {e}");
        std::process::exit(1);
    }
}

fn config_summary(config: &MeridianConfig) -> String {
    let mut out = format!(
        "server_id: {}\ndatabase: {}\ncluster: {}\nshadow: {}\ngateway: {}\n",
        config.server.server_id,
        config.storage.database_path,
        if config.cluster.enabled {
            format!(
                "enabled (ttl {}s, heartbeat {}s)",
                config.cluster.lease_ttl_secs, config.cluster.heartbeat_interval_secs
            )
        } else {
            "disabled".to_string()
        },
        if config.shadow.enabled { "on" } else { "off" },
        if config.gateway.enabled {
            format!("{}:{}", config.gateway.host, config.gateway.port)
        } else {
            "disabled".to_string()
        },
    );
    out.push_str(&format!("channels: {}\n", config.channels.len()));
    for channel in &config.channels {
        out.push_str(&format!(
            "  {} ({}){}{}\n",
            channel.name,
            channel.id,
            if channel.enabled { "" } else { " disabled" },
            if channel.clustered { " clustered" } else { "" },
        ));
    }
    out
}
