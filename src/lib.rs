//! # Citemap
//!
//! A local-first resource mapping and evidence resolution toolkit for AI
//! agents.
//!
//! Citemap ingests multimodal files (PDFs, video, audio, images, text) by
//! sending them to an analysis provider that returns a hierarchical map of
//! semantic nodes, each anchored to a precise physical location (pages, time
//! ranges, bounding boxes, line ranges). Stored maps can then be resolved on
//! demand: a node either materializes into a standalone evidence file or is
//! returned as a pointer address, so an agent can cite exactly the region it
//! used.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐
//! │  Mapper   │──▶│  Ingestion   │──▶│ Map Store  │
//! │ (Gemini)  │   │ hash+retry  │   │ JSON/file │
//! └──────────┘   └─────────────┘   └─────┬─────┘
//!                                        │
//!                    ┌───────────────────┤
//!                    ▼                   ▼
//!               ┌──────────┐       ┌──────────┐
//!               │   CLI    │       │   HTTP   │
//!               │ (citemap)│       │  (tools) │
//!               └──────────┘       └──────────┘
//!                       │
//!                       ▼
//!               ┌─────────────────────────┐
//!               │  Resolution Dispatcher   │
//!               │ pdf/ffmpeg/image/text    │
//!               └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! citemap ingest lecture.mp4            # analyze and store a map
//! citemap import graph.json --adapter graphrag   # register an external map
//! citemap maps                          # list stored maps
//! citemap structure lecture             # show one map's node tree
//! citemap resolve lecture intro.hook    # materialize an evidence clip
//! citemap resolve lecture intro.hook --pointer   # address only
//! citemap context --format markdown     # agent-context index of all maps
//! citemap serve                         # start the HTTP tool server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types: maps, nodes, locations |
//! | [`address`] | Canonical address codec (`doc://…#pages=1-3`) |
//! | [`repair`] | JSON repair pipeline for provider output |
//! | [`store`] | JSON-file map store with hash lookup |
//! | [`mapper`] | Analysis provider abstraction (Gemini) |
//! | [`ingest`] | Ingestion orchestrator: dedup, gate, retry |
//! | [`adapt`] | Map adapters for externally-produced maps |
//! | [`resolve`] | Resolution dispatcher and backend trait |
//! | [`aggregate`] | Agent-context index over stored maps |
//! | [`server`] | HTTP tool server |

pub mod adapt;
pub mod address;
pub mod aggregate;
pub mod backend_document;
pub mod backend_image;
pub mod backend_media;
pub mod backend_text;
pub mod config;
pub mod ingest;
pub mod mapper;
pub mod models;
pub mod repair;
pub mod resolve;
pub mod server;
pub mod store;
