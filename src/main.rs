//! # Citemap CLI (`citemap`)
//!
//! The `citemap` binary is the primary interface for mapping resources and
//! resolving evidence.
//!
//! ## Usage
//!
//! ```bash
//! citemap --config ./config/citemap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `citemap ingest <path>` | Analyze a file and store its resource map |
//! | `citemap import <path>` | Register an externally-produced map |
//! | `citemap maps` | List stored resource maps |
//! | `citemap structure <id>` | Print one map's node tree |
//! | `citemap resolve <id> <node>` | Materialize a node into an evidence file |
//! | `citemap context` | Print the agent-context index over all maps |
//! | `citemap serve` | Start the HTTP tool server |
//!
//! ## Examples
//!
//! ```bash
//! # Map a PDF (modality inferred from the file type)
//! citemap ingest textbook.pdf --id textbook
//!
//! # Map a recording, overriding inference
//! citemap ingest talk.mkv --modality video
//!
//! # Cut the cited segment out as a standalone file
//! citemap resolve talk intro.hook
//!
//! # Address only, no extraction
//! citemap resolve talk intro.hook --pointer
//! ```

mod adapt;
mod address;
mod aggregate;
mod backend_document;
mod backend_image;
mod backend_media;
mod backend_text;
mod config;
mod ingest;
mod mapper;
mod models;
mod repair;
mod resolve;
mod server;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapt::AdaptOptions;
use crate::address::build_address;
use crate::aggregate::{create_agent_context, ContextFormat};
use crate::config::Config;
use crate::ingest::Ingestor;
use crate::models::{Modality, Node};
use crate::resolve::{Dispatcher, ResolveMode};
use crate::store::MapStore;

/// Citemap CLI — map multimodal resources into addressable nodes and
/// resolve them into precise evidence.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/citemap.example.toml` for a full example. Every command
/// except `ingest` works without any configuration file at all.
#[derive(Parser)]
#[command(
    name = "citemap",
    about = "Citemap — resource mapping and evidence resolution for AI agents",
    version,
    long_about = "Citemap sends multimodal files (PDFs, video, audio, images, text) to an \
    analysis provider that maps their semantic structure, stores the maps locally, and resolves \
    any node back into a standalone evidence file or a canonical pointer address."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/citemap.toml`. Storage paths, the mapper
    /// provider, and the server bind address are read from this file.
    #[arg(long, global = true, default_value = "./config/citemap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Analyze a file and store its resource map.
    ///
    /// Sends the file to the configured analysis provider, repairs the
    /// response into a node tree, and persists the map. Byte-identical
    /// content is deduplicated: re-ingesting the same bytes returns the
    /// stored map without calling the provider.
    Ingest {
        /// Path to the file to analyze.
        path: PathBuf,

        /// Override modality inference: `document`, `video`, `audio`,
        /// `image`, or `text`.
        #[arg(long)]
        modality: Option<Modality>,

        /// Resource id to store the map under. Defaults to a slug derived
        /// from the file name.
        #[arg(long)]
        id: Option<String>,
    },

    /// Register an externally-produced map without calling a provider.
    ///
    /// Adapts an external artifact into a resource map and stores it.
    /// Adapter `generic` takes an already-serialized map file; `graphrag`
    /// maps GraphRAG entity/community exports to virtual-location nodes.
    Import {
        /// Path to the artifact to adapt.
        path: PathBuf,

        /// Adapter to use: `generic` or `graphrag`.
        #[arg(long, default_value = "generic")]
        adapter: String,

        /// Resource id override.
        #[arg(long)]
        id: Option<String>,

        /// Title override.
        #[arg(long)]
        title: Option<String>,
    },

    /// List stored resource maps.
    Maps,

    /// Print one map's node tree with canonical addresses.
    Structure {
        /// Resource id of the map.
        resource_id: String,
    },

    /// Resolve a node into evidence.
    ///
    /// Materializes the node's region into a file in the output directory,
    /// or with `--pointer` returns only the canonical address.
    Resolve {
        /// Resource id of the map.
        resource_id: String,

        /// Node id within the map (e.g. `ch1.intro`).
        node_id: String,

        /// Pointer mode — print the address without extracting anything.
        #[arg(long)]
        pointer: bool,
    },

    /// Print the agent-context index over all stored maps.
    Context {
        /// Output format: `markdown` or `json`.
        #[arg(long, default_value = "markdown")]
        format: ContextFormat,
    },

    /// Start the HTTP tool server.
    ///
    /// Exposes `list_resources`, `get_structure`, and `resolve` as JSON
    /// tools on the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Ingest { path, modality, id } => {
            run_ingest(&cfg, &path, modality, id.as_deref()).await?;
        }
        Commands::Import {
            path,
            adapter,
            id,
            title,
        } => {
            run_import(&cfg, &path, &adapter, id, title).await?;
        }
        Commands::Maps => {
            run_maps(&cfg).await?;
        }
        Commands::Structure { resource_id } => {
            run_structure(&cfg, &resource_id).await?;
        }
        Commands::Resolve {
            resource_id,
            node_id,
            pointer,
        } => {
            run_resolve(&cfg, &resource_id, &node_id, pointer).await?;
        }
        Commands::Context { format } => {
            run_context(&cfg, format).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Infer a modality from the file's MIME type, falling back to `text`.
fn infer_modality(path: &std::path::Path) -> Modality {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    match mime.type_().as_str() {
        "video" => Modality::Video,
        "audio" => Modality::Audio,
        "image" => Modality::Image,
        "application" if mime.subtype() == "pdf" => Modality::Document,
        _ => Modality::Text,
    }
}

async fn run_ingest(
    cfg: &Config,
    path: &std::path::Path,
    modality: Option<Modality>,
    id: Option<&str>,
) -> anyhow::Result<()> {
    let modality = modality.unwrap_or_else(|| infer_modality(path));
    let mapper = mapper::create_mapper(&cfg.mapper)?;
    let store = MapStore::new(&cfg.storage.maps_dir);
    let ingestor = Ingestor::new(mapper, store, &cfg.mapper);

    println!("ingesting {} as {}...", path.display(), modality);
    let map = ingestor.ingest(path, modality, id).await?;

    println!("  resource id: {}", map.resource_id);
    println!("  nodes: {}", map.list_node_ids().len());
    println!(
        "  stored: {}",
        cfg.storage
            .maps_dir
            .join(format!("{}.json", map.resource_id))
            .display()
    );
    println!("ok");
    Ok(())
}

async fn run_import(
    cfg: &Config,
    path: &std::path::Path,
    adapter: &str,
    id: Option<String>,
    title: Option<String>,
) -> anyhow::Result<()> {
    let adapter = adapt::create_adapter(adapter)?;
    let store = MapStore::new(&cfg.storage.maps_dir);
    let options = AdaptOptions { resource_id: id, title };

    println!("importing {} via {} adapter...", path.display(), adapter.name());
    let map = adapt::import_map(&store, adapter.as_ref(), path, &options).await?;

    println!("  resource id: {}", map.resource_id);
    println!("  nodes: {}", map.list_node_ids().len());
    println!("ok");
    Ok(())
}

async fn run_maps(cfg: &Config) -> anyhow::Result<()> {
    let store = MapStore::new(&cfg.storage.maps_dir);
    let maps = store.load_all().await?;
    if maps.is_empty() {
        println!("no maps stored in {}", cfg.storage.maps_dir.display());
        return Ok(());
    }
    for map in maps {
        println!(
            "{:<24} {:<10} {:<4} nodes  {}",
            map.resource_id,
            map.modality.to_string(),
            map.list_node_ids().len(),
            map.title
        );
    }
    Ok(())
}

async fn run_structure(cfg: &Config, resource_id: &str) -> anyhow::Result<()> {
    let store = MapStore::new(&cfg.storage.maps_dir);
    let map = store.load(resource_id).await?;

    println!("{} ({}, {})", map.title, map.resource_id, map.modality);
    println!("source: {}", map.source_path);
    for node in &map.nodes {
        print_node(resource_id, node, 1);
    }
    Ok(())
}

fn print_node(resource_id: &str, node: &Node, depth: usize) {
    println!(
        "{}{} [{}] {}  {}",
        "  ".repeat(depth),
        node.id,
        node.kind,
        node.title.as_deref().unwrap_or(""),
        build_address(resource_id, &node.location),
    );
    for child in &node.children {
        print_node(resource_id, child, depth + 1);
    }
}

async fn run_resolve(
    cfg: &Config,
    resource_id: &str,
    node_id: &str,
    pointer: bool,
) -> anyhow::Result<()> {
    let store = MapStore::new(&cfg.storage.maps_dir);
    let dispatcher = Arc::new(Dispatcher::with_default_backends(
        store,
        &cfg.storage.output_dir,
    ));
    let mode = if pointer {
        ResolveMode::Virtual
    } else {
        ResolveMode::Physical
    };

    let evidence = dispatcher.resolve(resource_id, node_id, mode).await?;

    println!("address: {}", evidence.address);
    if let Some(path) = &evidence.output_path {
        println!("output:  {}", path);
    }
    if let Some(summary) = &evidence.node.summary {
        println!("summary: {}", summary);
    }
    println!("ok");
    Ok(())
}

async fn run_context(cfg: &Config, format: ContextFormat) -> anyhow::Result<()> {
    let store = MapStore::new(&cfg.storage.maps_dir);
    let maps = store.load_all().await?;
    println!("{}", create_agent_context(&maps, format));
    Ok(())
}
