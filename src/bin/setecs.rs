//! setecs: CLI tool for checking setecs configurations and resolving clients.

use clap::{Parser, Subcommand};
use setecs::{HttpFetcher, SetEcs};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "setecs")]
#[command(version = "0.1.0")]
#[command(about = "Check setecs configurations and resolve substitute ECS addresses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a configuration, load every source and print the loaded state
    Check {
        /// Configuration file
        config: PathBuf,

        /// Print a JSON summary instead of the dump
        #[arg(long)]
        json: bool,
    },

    /// Print the substitute ECS address for each client IP
    Resolve {
        /// Configuration file
        config: PathBuf,

        /// Client IPs
        #[arg(required = true)]
        clients: Vec<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { config, json } => check(&config, json),
        Commands::Resolve { config, clients } => resolve(&config, &clients),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load(config: &PathBuf) -> Result<SetEcs, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(config)?;
    let fetcher = Arc::new(HttpFetcher::new()?);
    Ok(SetEcs::from_text(&text, fetcher)?)
}

fn check(config: &PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let setecs = load(config)?;

    if json {
        let snapshot = setecs.resolver().snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    for binding in setecs.resolver().bindings() {
        println!("{}", binding);
    }
    for table in setecs.resolver().tables() {
        println!("{}", table);
    }
    println!("reload {:?}", setecs.reload());
    Ok(())
}

fn resolve(config: &PathBuf, clients: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let setecs = load(config)?;

    for client in clients {
        match setecs.resolver().resolve(client) {
            Some(ecs_ip) => println!("{}\t{}", client, ecs_ip),
            None => println!("{}\t-", client),
        }
    }
    Ok(())
}
