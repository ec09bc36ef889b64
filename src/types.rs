use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of memory a row represents. Drives retention, the kind→scope
/// default in the Scope Resolver, and the Extractor's candidate tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Preference,
    Fact,
    Decision,
    Episodic,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preference => write!(f, "preference"),
            Self::Fact => write!(f, "fact"),
            Self::Decision => write!(f, "decision"),
            Self::Episodic => write!(f, "episodic"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "decision" => Ok(Self::Decision),
            "episodic" => Ok(Self::Episodic),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::Preference,
        MemoryKind::Fact,
        MemoryKind::Decision,
        MemoryKind::Episodic,
    ];

    /// Default retention in days per kind (spec.md §4.8).
    pub fn retention_days_default(self) -> i64 {
        match self {
            MemoryKind::Episodic => 90,
            MemoryKind::Fact | MemoryKind::Preference | MemoryKind::Decision => 3650,
        }
    }
}

/// How a row entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Written by the Capture Pipeline from extracted candidates.
    Auto,
    /// Written via the operator `memory add` command or a manual API call.
    Manual,
    /// Imported once from the legacy `MEMORY.md` / semantic files.
    Backfill,
}

impl std::fmt::Display for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
            Self::Backfill => write!(f, "backfill"),
        }
    }
}

impl std::str::FromStr for EntrySource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "backfill" => Ok(Self::Backfill),
            other => Err(format!("unknown entry source: {other}")),
        }
    }
}

/// The class of isolation boundary a scope key belongs to. Used by the CLI's
/// `--scope` flag and returned by the Scope Resolver alongside the key string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Chat,
    User,
    Global,
}

/// Which dual-scope search pass produced a retrieval hit (spec.md §4.6).
/// Carried on `ScoredEntry` for tie-breaking and telemetry; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalLayer {
    Chat,
    User,
}

/// Canonical memory record (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub kind: MemoryKind,
    pub scope_key: String,
    pub text: String,
    pub channel: String,
    pub chat_id: Option<String>,
    pub sender_id: Option<String>,
    /// Design-time weight in [0.0, 1.0].
    pub importance: f64,
    /// Extractor certainty in [0.0, 1.0]; 1.0 for manual inserts.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub hit_count: i64,
    pub source: EntrySource,
    pub expires_at: DateTime<Utc>,
}

/// An entry paired with its fused retrieval score (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub fts_score: f64,
    pub fts_norm: f64,
    pub recency: f64,
    pub final_score: f64,
    pub layer: RetrievalLayer,
}

/// Discriminator returned by `Store::upsert` (spec.md §4.1), used to drive
/// `memory_capture_saved` vs. `memory_capture_deduped` telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
}

/// Result of one `Store::upsert` call.
#[derive(Debug, Clone, Copy)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
    pub id: i64,
}

/// A single extracted candidate before safety/gating (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: MemoryKind,
    pub text: String,
    pub importance: f64,
    pub confidence: f64,
}

/// Resolved isolation boundaries for one turn (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct ResolvedScopes {
    pub chat: String,
    pub user: String,
    pub global: String,
}

/// `memory status` / C8 counters snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_rows: i64,
    pub rows_by_kind: Vec<(String, i64)>,
    pub fts_rows: i64,
    pub last_hygiene_run: Option<DateTime<Utc>>,
    pub db_path: String,
}

/// Rendered retrieval block plus metadata for telemetry (spec.md §4.6 step 7-8).
#[derive(Debug, Clone)]
pub struct RenderedContext {
    pub text: String,
    pub entry_count: usize,
    pub char_count: usize,
}
