//! # Magetools Core
//!
//! Shared, I/O-free logic for Magetools: manifest policy, match ranking,
//! the vector store abstraction, and the embedding provider trait.
//!
//! This crate contains no tokio, sqlx, Lua, or filesystem code. The
//! `magetools` app crate supplies discovery, synchronization, and the
//! concrete providers and stores that plug into these traits.

pub mod embedding;
pub mod manifest;
pub mod models;
pub mod ranking;
pub mod store;
