//! # Magetools
//!
//! Run-time discovery of scripted capabilities ("spells") for AI agents.
//!
//! Magetools walks a directory tree of collections, loads the Lua spell
//! scripts it finds under each collection's manifest policy, indexes their
//! documentation in a vector store, and answers "which spell does this?"
//! by semantic similarity. An allow-list restricts both search and casting
//! per toolset.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Collections  │──▶│   Loader     │──▶│   Registry   │
//! │ *.lua + json │   │ sandbox+hash │   │ qualified    │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ sync (hash diff)
//!                                              ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!   query ──────────▶│   Matcher    │◀──│ Vector store │
//!                    │ rank+access  │   │ SQLite / mem │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! magetools new weather get_forecast      # scaffold .magetools/weather/get_forecast.lua
//! magetools init .magetools/weather       # write a manifest
//! magetools scan                          # discover + sync
//! magetools search "weather forecast"
//! magetools cast weather.get_forecast --param city=Oslo
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`manifest`] | Manifest loading and scaffolding |
//! | [`hasher`] | Collection and documentation hashes |
//! | [`loader`] | Spell discovery and quarantine |
//! | [`lua_runtime`] | Sandboxed Lua VMs and host APIs |
//! | [`spell`] | Spells and cast handles |
//! | [`registry`] | The spell registry |
//! | [`sync`] | Incremental vector index sync |
//! | [`matcher`] | Semantic matching and ranking |
//! | [`access`] | Collection allow-lists |
//! | [`grimorium`] | The agent-facing toolset |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`db`] | Database connection and schema |

pub mod access;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod grimorium;
pub mod hasher;
pub mod loader;
pub mod lua_runtime;
pub mod manifest;
pub mod matcher;
pub mod prompts;
pub mod registry;
pub mod retry;
pub mod spell;
pub mod sqlite_store;
pub mod sync;
