//! Route Schema Registry CLI
//!
//! Inspect routes, encode/decode messages and export snapshots.

use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use route_schemas::{Direction, RegistryConfig, SchemaRegistry};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "route-schemas")]
#[command(about = "Live-reloading protobuf schema registry")]
struct Cli {
    /// Base directory artifact paths are relative to
    #[arg(short, long, default_value = ".")]
    base: PathBuf,

    /// Configuration file (defaults to route-schemas.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a route resolves to a known type
    Check {
        /// "server" or "client"
        direction: String,
        route: String,
    },

    /// Encode a JSON message with the server schema
    Encode {
        route: String,
        /// JSON input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output file for the encoded bytes (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode bytes with the client schema
    Decode {
        route: String,
        /// Encoded input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List message types of a direction
    Types {
        /// "server" or "client"
        direction: String,
    },

    /// Print the snapshot exported to peers
    Snapshot,

    /// Keep the registry running and log reloads until stdin closes
    Watch,

    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = RegistryConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    if !matches!(cli.command, Commands::Config { .. }) {
        config.watch.enabled = matches!(cli.command, Commands::Watch);
    }

    let mut registry = SchemaRegistry::new(&cli.base, config);
    registry.start()?;

    match cli.command {
        Commands::Check { direction, route } => {
            let direction: Direction = direction.parse()?;
            if registry.check(direction, &route) {
                println!("✅ {} route '{}' is known", direction, route);
            } else {
                println!("❌ {} route '{}' is unknown", direction, route);
                std::process::exit(2);
            }
        }

        Commands::Encode { route, input, output } => {
            let text = match input {
                Some(path) => fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let message: serde_json::Value = serde_json::from_str(&text).context("parsing message JSON")?;
            let bytes = registry.encode(&route, &message)?;
            match output {
                Some(path) => {
                    fs::write(&path, &bytes)?;
                    eprintln!("📦 wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => io::stdout().write_all(&bytes)?,
            }
        }

        Commands::Decode { route, input } => {
            let bytes = match input {
                Some(path) => fs::read(&path).with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            let message = registry.decode(&route, &bytes)?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }

        Commands::Types { direction } => {
            let direction: Direction = direction.parse()?;
            let types = registry.message_types(direction);
            if types.is_empty() {
                println!("No {} schema loaded.", direction);
            } else {
                println!("📚 {} message types:", direction);
                for name in types {
                    println!("  {}", name);
                }
            }
        }

        Commands::Snapshot => {
            println!("{}", serde_json::to_string_pretty(&registry.snapshot())?);
        }

        Commands::Watch => {
            println!(
                "👀 watching {} files at version {}; close stdin to stop",
                registry.watched_files(),
                registry.schema_version()
            );
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                line?;
                println!("version {}", registry.schema_version());
            }
        }

        Commands::Config { save } => {
            print!("{}", toml::to_string_pretty(registry.config())?);
            if let Some(path) = save {
                registry
                    .config()
                    .save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                eprintln!("💾 saved configuration to {}", path.display());
            }
        }
    }

    registry.stop();
    Ok(())
}
