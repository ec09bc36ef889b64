//! Long-term memory core for the nanobot chat runtime.
//!
//! A local-first, scope-isolated, ranked memory store: candidate extraction
//! and safety filtering on the way in (see [`capture`]), lexical dual-scope
//! retrieval on the way out (see [`retrieval`]), a SQLite-backed [`store`]
//! for the canonical rows plus their FTS5 index, an append-only [`wal`] of
//! per-session generation markers, human-readable [`mirrors`], and a
//! throttled [`hygiene`] sweep that enforces per-kind retention.
//!
//! [`engine::MemoryEngine`] is the one handle a host process constructs and
//! shares; everything else in this crate is reachable through it or usable
//! standalone for tests and the `memory` CLI.

pub mod backfill;
pub mod capture;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod hygiene;
pub mod metrics;
pub mod mirrors;
pub mod normalize;
pub mod retrieval;
pub mod safety;
pub mod scope;
pub mod store;
pub mod types;
pub mod wal;

pub use engine::MemoryEngine;
pub use error::{MemoryError, Result};
pub use types::{MemoryEntry, MemoryKind, ScoredEntry};
