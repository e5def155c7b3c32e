//! # Magetools CLI (`magetools`)
//!
//! Scaffold, inspect, search, and cast spells from the command line.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `magetools init [DIR]` | Write a default `manifest.json` into a collection |
//! | `magetools new <COLLECTION> <NAME>` | Scaffold a spell script |
//! | `magetools scan` | Discover spells and sync the vector index |
//! | `magetools search "<query>"` | Rank spells against a query |
//! | `magetools cast <SPELL>` | Cast a spell and print its JSON result |
//! | `magetools hash <DIR>` | Print a collection's content hash |
//! | `magetools completions <SHELL>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! magetools new weather get_forecast
//! magetools scan --config ./magetools.toml
//! magetools search "weather forecast" --limit 3
//! magetools cast weather.get_forecast --param city=Oslo --collection weather
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;

use magetools::config::{self, Config};
use magetools::grimorium::{Grimorium, RefreshReport};
use magetools::hasher::hash_collection;
use magetools::loader::{scaffold_spell, FileStatus};
use magetools::manifest::init_collection;
use magetools::sync::BookOutcome;

/// Magetools: discover, guard, and semantically match scripted tools
/// ("spells") for AI agents.
#[derive(Parser)]
#[command(name = "magetools", version)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./magetools.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default manifest.json into a collection directory.
    Init {
        /// Collection directory (defaults to the current directory).
        dir: Option<PathBuf>,

        /// Overwrite an existing manifest.
        #[arg(long)]
        force: bool,
    },

    /// Scaffold a spell script under the configured root.
    New {
        /// Collection (directory) name.
        collection: String,
        /// Spell name; becomes the Lua global and the file name.
        name: String,
    },

    /// Discover spells, report quarantined files, and sync the index.
    Scan,

    /// Rank spells against a natural-language query.
    Search {
        query: String,

        /// Maximum number of matches.
        #[arg(long)]
        limit: Option<usize>,

        /// Maximum cosine distance for a match.
        #[arg(long)]
        threshold: Option<f32>,

        /// Restrict to these collections (repeatable).
        #[arg(long = "collection")]
        collections: Vec<String>,
    },

    /// Cast a spell by qualified name.
    Cast {
        spell: String,

        /// Argument as KEY=VALUE; VALUE is parsed as JSON when it can be.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Restrict to these collections (repeatable).
        #[arg(long = "collection")]
        collections: Vec<String>,
    },

    /// Print the content hash of a collection directory.
    Hash { dir: PathBuf },

    /// Print shell completions.
    Completions { shell: clap_complete::Shell },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn allow_list(collections: Vec<String>) -> Option<Vec<String>> {
    if collections.is_empty() {
        None
    } else {
        Some(collections)
    }
}

fn params_to_args(params: Vec<(String, String)>) -> Value {
    let map = params
        .into_iter()
        .map(|(k, v)| {
            let value = serde_json::from_str(&v).unwrap_or(Value::String(v));
            (k, value)
        })
        .collect();
    Value::Object(map)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { dir, force } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from("."));
            let path = init_collection(&dir, force)?;
            println!("Wrote {}", path.display());
        }
        Commands::New { collection, name } => {
            let cfg = config::load_config(&cli.config)?;
            let path = scaffold_spell(&cfg.grimorium.root.join(&collection), &name)?;
            println!("Created {}", path.display());
        }
        Commands::Scan => {
            let cfg = config::load_config(&cli.config)?;
            let grimorium = Grimorium::from_config(&cfg, None).await?;
            print_scan(&grimorium.last_report());
            grimorium.close().await?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
            collections,
        } => {
            let mut cfg = config::load_config(&cli.config)?;
            if let Some(limit) = limit {
                cfg.matching.top_k = limit;
            }
            if let Some(threshold) = threshold {
                cfg.matching.distance_threshold = threshold;
            }
            cfg.validate()?;
            search(&cfg, &query, allow_list(collections)).await?;
        }
        Commands::Cast {
            spell,
            params,
            collections,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let grimorium = Grimorium::from_config(&cfg, allow_list(collections)).await?;
            let result = grimorium.execute_spell(&spell, params_to_args(params)).await;
            grimorium.close().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result["status"] != "success" {
                std::process::exit(1);
            }
        }
        Commands::Hash { dir } => {
            let cfg = config::load_config(&cli.config)?;
            println!("{}", hash_collection(&dir, &cfg.grimorium.extensions));
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "magetools", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn search(cfg: &Config, query: &str, allowed: Option<Vec<String>>) -> Result<()> {
    let grimorium = Grimorium::from_config(cfg, allowed).await?;
    let matches = grimorium.find(query).await;
    if matches.is_empty() {
        println!("No spells found.");
    }

    let mut out = std::io::stdout().lock();
    for m in &matches {
        let description = grimorium
            .registry()
            .get(&m.name)
            .map(|s| s.description.lines().next().unwrap_or_default().to_string())
            .unwrap_or_default();
        writeln!(out, "{:.3}  {}  {}", m.distance, m.name, description)?;
    }
    drop(out);

    grimorium.close().await
}

fn print_scan(report: &RefreshReport) {
    let discovery = &report.discovery;
    println!(
        "Discovered {} spell(s) in {} collection(s)",
        discovery.spell_count(),
        discovery.collections.len()
    );

    for collection in &discovery.collections {
        let state = if collection.disabled { " (disabled)" } else { "" };
        println!("  {}{}  {}", collection.name, state, collection.content_hash);
    }

    for file in &discovery.files {
        if let FileStatus::Loaded {
            spells,
            denied,
            invalid,
        } = &file.status
        {
            for name in spells {
                println!("    + {}", name);
            }
            for name in denied {
                println!("    - {} (denied by manifest)", name);
            }
            for (name, reason) in invalid {
                println!("    ! {}.{}: {}", file.collection, name, reason);
            }
        }
    }

    let quarantined: Vec<_> = discovery.quarantined().collect();
    if !quarantined.is_empty() {
        println!("Quarantined {} file(s):", quarantined.len());
        for (path, reason) in quarantined {
            println!("  {}: {}", path.display(), reason);
        }
    }

    let totals = report.sync.totals();
    println!(
        "Sync: {} upserted, {} unchanged, {} removed",
        totals.upserted, totals.unchanged, totals.removed
    );
    for failure in report.sync.failures() {
        if let BookOutcome::Failed(reason) = &failure.outcome {
            println!("  failed {}: {}", failure.book, reason);
        }
    }
}
