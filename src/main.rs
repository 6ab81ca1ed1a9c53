//! Binary entrypoint for the mudstore CLI.
//!
//! Commands:
//! - `init` - create a starter `mudstore.toml` and an empty world store
//! - `status` - print record counts for the configured store
//! - `get --id <n>` - dump one entity record as JSON
//! - `attrs --id <n>` - list an entity's materialized attributes
//! - `tags --name <tag>` - list entities joined to a tag
//!
//! The store has no end-user surface of its own; these commands exist for
//! operators poking at a world offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use mudstore::config::Config;
use mudstore::WorldStore;

#[derive(Parser)]
#[command(name = "mudstore")]
#[command(about = "Persistence and identity-cache layer for multiplayer text-game worlds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "mudstore.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter configuration and an empty world store
    Init,
    /// Show store statistics
    Status,
    /// Dump one entity record as JSON
    Get {
        /// Entity id
        #[arg(long)]
        id: u64,
    },
    /// List an entity's materialized attributes
    Attrs {
        /// Entity id
        #[arg(long)]
        id: u64,
    },
    /// List entities joined to a tag
    Tags {
        /// Tag name
        #[arg(long)]
        name: String,
        /// Tag category (omit for the no-category bucket)
        #[arg(long)]
        category: Option<String>,
        /// Tag kind marker
        #[arg(long, default_value = "tag")]
        marker: String,
    },
}

fn init_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);
    if !atty::is(atty::Stream::Stdout) {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    let _ = builder.try_init();
}

fn open_store(config_path: &str) -> Result<WorldStore> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path))?;
    WorldStore::open(&config.storage.data_dir)
        .with_context(|| format!("failed to open store at {}", config.storage.data_dir))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init => {
            let config = Config::create_default(&cli.config)
                .with_context(|| format!("failed to write {}", cli.config))?;
            WorldStore::open(&config.storage.data_dir)?;
            info!("initialized store at {}", config.storage.data_dir);
            println!(
                "Created {} and an empty store at {}",
                cli.config, config.storage.data_dir
            );
        }
        Commands::Status => {
            let store = open_store(&cli.config)?;
            let stats = store.stats();
            println!("entities:   {}", stats.entities);
            println!("attributes: {}", stats.attributes);
            println!("tags:       {}", stats.tags);
            println!("joins:      {}", stats.joins);
            println!("resident:   {}", stats.resident);
        }
        Commands::Get { id } => {
            let store = open_store(&cli.config)?;
            let handle = store.load_entity(id)?;
            let record = serde_json::json!({
                "id": handle.id(),
                "key": handle.key(),
                "kind_path": handle.kind_path(),
                "created_at": handle.created_at().to_rfc3339(),
                "location": handle.location().map(|r| r.id),
                "home": handle.home().map(|r| r.id),
            });
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Attrs { id } => {
            let store = open_store(&cli.config)?;
            let handle = store.load_entity(id)?;
            let rows = handle.attr_all_any()?;
            if rows.is_empty() {
                println!("entity #{} has no materialized attributes", id);
            }
            for (name, category, value) in rows {
                let bucket = category.unwrap_or_default();
                println!(
                    "{:<24} {:<12} {}",
                    name,
                    bucket,
                    serde_json::to_string(&value.to_json())?
                );
            }
        }
        Commands::Tags {
            name,
            category,
            marker,
        } => {
            let store = open_store(&cli.config)?;
            let handles = store.query_by_tag_with(&name, category.as_deref(), &marker)?;
            if handles.is_empty() {
                println!("no entities joined to {:?}", name);
            }
            for handle in handles {
                println!("#{:<8} {}", handle.id(), handle.key());
            }
        }
    }

    Ok(())
}
