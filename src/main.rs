//! Metagame Subsets CLI
//!
//! ## Usage
//!
//! ```bash
//! # Materialize every archetype of a tournament in the local store
//! metagame-subsets generate --tournament "2025-08-15, Worlds"
//!
//! # Only decks that made top 8, with reprints collapsed
//! metagame-subsets generate --tournament "2025-08-15, Worlds" --success top8 \
//!     --synonyms data/synonyms.json
//!
//! # Resolve one request (prints JSON)
//! metagame-subsets resolve --tournament "2025-08-15, Worlds" --archetype "Gardevoir ex" \
//!     --include SVI~086 --exclude TWM~095
//!
//! # Resolve against a published HTTP origin instead of the local store
//! metagame-subsets resolve --base-url https://example.org/data ...
//!
//! # Print a card key
//! metagame-subsets normalize svi 18a
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use metagame_subsets::{
    BlobStore, CanonicalCards, CardKey, Config, FsBlobStore, HttpBlobStore, IdentityCards,
    Materializer, PersistenceGateway, ResolveRequest, SubsetResolver, SuccessTag, SynonymTable,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "metagame-subsets")]
#[command(about = "Materialized include/exclude reports for tournament archetypes")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "METAGAME_CONFIG")]
    config: Option<PathBuf>,

    /// Store root directory
    #[arg(long, env = "METAGAME_ROOT")]
    root_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Materialize include/exclude subsets for a tournament
    Generate {
        #[arg(long)]
        tournament: String,

        /// Restrict the pool to decks with this success tag (winner, top2 ... top32)
        #[arg(long)]
        success: Option<SuccessTag>,

        /// synonyms.json used to collapse reprints
        #[arg(long)]
        synonyms: Option<PathBuf>,

        /// Archetypes persisted in parallel
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Resolve one include/exclude request and print the result as JSON
    Resolve {
        #[arg(long)]
        tournament: String,

        #[arg(long)]
        archetype: String,

        /// Card key to include (repeatable)
        #[arg(long)]
        include: Vec<String>,

        /// Card key to exclude (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Quantity operator applied to every included card (=, <, <=, >, >=, any, "")
        #[arg(long)]
        operator: Option<String>,

        #[arg(long)]
        count: Option<u32>,

        /// Read artifacts from this HTTP origin instead of the local store
        #[arg(long, env = "METAGAME_BASE_URL")]
        base_url: Option<String>,

        #[arg(long)]
        synonyms: Option<PathBuf>,
    },

    /// Print the card key for a set code and number
    Normalize { set: String, number: String },
}

fn load_cards(path: Option<&Path>) -> anyhow::Result<Arc<dyn CanonicalCards>> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading synonyms from {}", path.display()))?;
            let table = SynonymTable::from_json(&bytes)?;
            info!(path = %path.display(), synonyms = table.len(), "Loaded synonym table");
            Ok(Arc::new(table))
        }
        None => Ok(Arc::new(IdentityCards)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("metagame_subsets=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = args.root_dir {
        config.storage.root_dir = dir;
    }

    match args.command {
        Command::Generate {
            tournament,
            success,
            synonyms,
            concurrency,
        } => {
            if let Some(n) = concurrency {
                config.persistence.concurrency = n;
            }
            config.validate()?;

            info!(
                root_dir = %config.storage.root_dir.display(),
                tournament = %tournament,
                "Starting generation"
            );

            let store = Arc::new(FsBlobStore::new(&config.storage.root_dir).await?);
            let materializer = Materializer::new(
                PersistenceGateway::new(store),
                load_cards(synonyms.as_deref())?,
                config.generator.clone(),
                config.persistence.clone(),
            );
            let summary = materializer.run(&tournament, success).await?;

            for (archetype, error) in &summary.publish.failures {
                warn!(archetype = %archetype, error = %error, "Archetype not published");
            }
            println!(
                "{}: {} decks ({} repeated), {} archetypes ({} materialized, {} below minimum), {} subsets written, {} stale removed, {} failures",
                summary.tournament,
                summary.decks,
                summary.duplicate_decks,
                summary.archetypes,
                summary.materialized,
                summary.skipped_small,
                summary.publish.subsets_written,
                summary.publish.stale_removed,
                summary.publish.failures.len(),
            );
        }

        Command::Resolve {
            tournament,
            archetype,
            include,
            exclude,
            operator,
            count,
            base_url,
            synonyms,
        } => {
            let base_url = base_url.or_else(|| config.storage.base_url.clone());
            let store: Arc<dyn BlobStore> = match base_url {
                Some(url) => Arc::new(HttpBlobStore::new(&url, config.resolver.corpus_timeout())?),
                None => Arc::new(FsBlobStore::new(&config.storage.root_dir).await?),
            };

            let resolver = SubsetResolver::new(store, load_cards(synonyms.as_deref())?, &config.resolver);
            let request = ResolveRequest {
                tournament,
                archetype,
                include,
                exclude,
                operator,
                count,
            };

            let resolution = resolver.resolve(&request).await?;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }

        Command::Normalize { set, number } => match CardKey::normalize(&set, &number) {
            Some(key) => println!("{}", key),
            None => anyhow::bail!("cannot build a card key from set '{}' and number '{}'", set, number),
        },
    }

    Ok(())
}
