//! Store (spec.md §4.1) — canonical entry table + lexical index + metadata
//! markers; upsert/query/prune primitives.
//!
//! A single `rusqlite::Connection` behind a `Mutex`, same shape as the
//! teacher's `MemoryManager`: one process, one writer at a time, SQLite's
//! own file lock coordinates across processes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument, warn};

use crate::db;
use crate::error::{MemoryError, Result};
use crate::normalize::normalize_for_dedupe;
use crate::types::{
    EntrySource, MemoryEntry, MemoryKind, StoreStats, UpsertOutcome, UpsertResult,
};

/// Soft deadline for one `search` call (spec.md §5). On timeout, return
/// whatever rows were already materialized.
const SEARCH_SOFT_DEADLINE: Duration = Duration::from_secs(2);

/// Retry budget for `SQLITE_BUSY` (spec.md §5): 3 attempts, 50/125/250ms.
const BUSY_BACKOFF_MS: [u64; 3] = [50, 125, 250];

pub struct Store {
    conn: Mutex<Connection>,
    db_path: String,
}

impl Store {
    /// Wrap an already-open connection, initializing the schema if needed.
    pub fn new(conn: Connection, db_path: impl Into<String>) -> Result<Self> {
        db::init_db(&conn).map_err(MemoryError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: db_path.into(),
        })
    }

    /// Open (creating parent directories as needed) a file-backed store.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        }
        let conn = with_busy_retry(|| Connection::open(path))?;
        Self::new(conn, path)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Insert or merge a candidate row (spec.md §4.1).
    ///
    /// Transactional: lookup by dedupe key `(scope_key, kind, normalized(text))`.
    /// On hit: bump `last_seen_at`/`hit_count`, take the max of `importance`.
    /// On miss: insert and mirror into the FTS index in the same transaction.
    ///
    /// Wrapped in the documented `SQLITE_BUSY` retry (spec.md §5/§7): this is
    /// a write path, so cross-process contention on the same DB file shows up
    /// here, not just on the initial `Connection::open`.
    #[instrument(skip(self, entry), fields(scope = %entry.scope_key, kind = %entry.kind))]
    pub fn upsert(&self, entry: NewEntry) -> Result<UpsertResult> {
        let mut conn = self.conn.lock().unwrap();
        with_busy_retry(|| upsert_tx(&mut conn, &entry))
    }

    /// Lexical search over the FTS index (spec.md §4.1).
    ///
    /// Constrained by `scope_key ∈ scope_keys` and `kind ∈ kinds`. Returns
    /// raw FTS relevance scores (SQLite's `bm25()`, lower is more relevant —
    /// callers normalize and invert as needed).
    ///
    /// Wrapped in the `SQLITE_BUSY` retry (spec.md §5): a read can still
    /// contend with another process's write transaction on the same file.
    #[instrument(skip(self, scope_keys, kinds))]
    pub fn search(
        &self,
        scope_keys: &[String],
        kinds: &[MemoryKind],
        query_text: &str,
        k: usize,
    ) -> Result<Vec<(MemoryEntry, f64)>> {
        if scope_keys.is_empty() || kinds.is_empty() || query_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        with_busy_retry(|| search_tx(&conn, scope_keys, kinds, query_text, k))
    }

    /// Delete every row matching `predicate` within one transaction, keeping
    /// the FTS index consistent (spec.md §4.1, §4.8).
    ///
    /// Wrapped in the `SQLITE_BUSY` retry (spec.md §5/§7): a write path.
    #[instrument(skip(self, predicate))]
    pub fn prune(&self, predicate: PrunePredicate) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        with_busy_retry(|| prune_tx(&mut conn, &predicate))
    }

    /// Rebuild the FTS index from the canonical table (operator `reindex`
    /// and the documented recovery from `Corrupt`).
    ///
    /// Wrapped in the `SQLITE_BUSY` retry (spec.md §5/§7): a write path.
    #[instrument(skip(self))]
    pub fn reindex(&self) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        with_busy_retry(|| reindex_tx(&mut conn))
    }

    /// Count rows `prune` would remove for `predicate`, without deleting
    /// anything. Backs the operator `prune --dry-run` flag.
    #[instrument(skip(self, predicate))]
    pub fn count_matching(&self, predicate: &PrunePredicate) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let (sql, param): (&str, String) = match predicate {
            PrunePredicate::Expired { now } => (
                "SELECT COUNT(*) FROM memory_entries WHERE expires_at < ?1",
                now.to_rfc3339(),
            ),
            PrunePredicate::OlderThanDays { cutoff } => (
                "SELECT COUNT(*) FROM memory_entries WHERE created_at < ?1",
                cutoff.to_rfc3339(),
            ),
        };
        let count: i64 = conn.query_row(sql, [&param], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Probe that the FTS index and canonical table agree on row count
    /// (I3/I6). Returns `Corrupt` if they disagree.
    pub fn check_consistency(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let canonical: i64 = conn.query_row("SELECT COUNT(*) FROM memory_entries", [], |r| r.get(0))?;
        let fts: i64 = conn.query_row("SELECT COUNT(*) FROM memory_entries_fts", [], |r| r.get(0))?;
        if canonical != fts {
            return Err(MemoryError::Corrupt(format!(
                "canonical row count {canonical} != FTS row count {fts}"
            )));
        }
        Ok(())
    }

    /// `memory status` counters.
    pub fn stats(&self, last_hygiene_run: Option<DateTime<Utc>>) -> Result<StoreStats> {
        let conn = self.conn.lock().unwrap();
        let total_rows: i64 = conn.query_row("SELECT COUNT(*) FROM memory_entries", [], |r| r.get(0))?;
        let fts_rows: i64 = conn.query_row("SELECT COUNT(*) FROM memory_entries_fts", [], |r| r.get(0))?;

        let mut rows_by_kind = Vec::new();
        let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM memory_entries GROUP BY kind")?;
        let kind_rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in kind_rows {
            if let Ok(pair) = row {
                rows_by_kind.push(pair);
            }
        }

        Ok(StoreStats {
            total_rows,
            rows_by_kind,
            fts_rows,
            last_hygiene_run,
            db_path: self.db_path.clone(),
        })
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row("SELECT value FROM memory_meta WHERE key = ?1", [key], |r| r.get(0))
            .ok();
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }
}

/// Fields needed to upsert a new candidate row; `now` and `retention_days`
/// are passed in rather than computed internally so tests can control time
/// and so the retention policy stays a config-layer concern.
pub struct NewEntry {
    pub kind: MemoryKind,
    pub scope_key: String,
    pub text: String,
    pub channel: String,
    pub chat_id: Option<String>,
    pub sender_id: Option<String>,
    pub importance: f64,
    pub confidence: f64,
    pub source: EntrySource,
    pub now: DateTime<Utc>,
    pub retention_days: i64,
}

pub enum PrunePredicate {
    Expired { now: DateTime<Utc> },
    OlderThanDays { cutoff: DateTime<Utc> },
}

fn placeholders(count: usize, start_at: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start_at + i))
        .collect::<Vec<_>>()
        .join(",")
}

/// Quote each term so FTS5 doesn't choke on punctuation in free-form user text.
fn fts_query(query_text: &str) -> String {
    query_text
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn row_to_entry_with_score(row: &rusqlite::Row<'_>) -> rusqlite::Result<(MemoryEntry, f64)> {
    let kind_str: String = row.get(1)?;
    let source_str: String = row.get(13)?;
    let entry = MemoryEntry {
        id: row.get(0)?,
        kind: kind_str.parse().unwrap_or(MemoryKind::Fact),
        scope_key: row.get(2)?,
        text: row.get(3)?,
        channel: row.get(4)?,
        chat_id: row.get(5)?,
        sender_id: row.get(6)?,
        importance: row.get(7)?,
        confidence: row.get(8)?,
        created_at: parse_ts(row.get::<_, String>(9)?),
        updated_at: parse_ts(row.get::<_, String>(10)?),
        last_seen_at: parse_ts(row.get::<_, String>(11)?),
        hit_count: row.get(12)?,
        source: source_str.parse().unwrap_or(EntrySource::Auto),
        expires_at: parse_ts(row.get::<_, String>(14)?),
    };
    // bm25() is negative and smaller-is-better; flip sign so larger is more
    // relevant, matching the "higher fts_score is better" framing callers expect.
    let rank: f64 = row.get(15)?;
    Ok((entry, -rank))
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// One `upsert` attempt's transactional body — re-run wholesale by
/// `with_busy_retry` on `SQLITE_BUSY`, since a retry must re-do the
/// dedupe-key lookup against whatever the contending writer just committed.
fn upsert_tx(conn: &mut Connection, entry: &NewEntry) -> rusqlite::Result<UpsertResult> {
    let tx = conn.transaction()?;
    let norm = normalize_for_dedupe(&entry.text);
    let now = entry.now;

    let existing: Option<(i64, f64, i64)> = tx
        .query_row(
            "SELECT id, importance, hit_count FROM memory_entries
             WHERE scope_key = ?1 AND kind = ?2 AND norm_text = ?3",
            rusqlite::params![entry.scope_key, entry.kind.to_string(), norm],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .ok();

    let result = match existing {
        Some((id, old_importance, hit_count)) => {
            let new_importance = old_importance.max(entry.importance);
            tx.execute(
                "UPDATE memory_entries
                 SET last_seen_at = ?1, hit_count = ?2, updated_at = ?1, importance = ?3
                 WHERE id = ?4",
                rusqlite::params![now.to_rfc3339(), hit_count + 1, new_importance, id],
            )?;
            debug!(id, hit_count = hit_count + 1, "upsert: merged duplicate");
            UpsertResult {
                outcome: UpsertOutcome::Merged,
                id,
            }
        }
        None => {
            let expires_at = now + chrono::Duration::days(entry.retention_days);
            // hit_count starts at 1: it counts sightings (upserts), and the
            // insert itself is the first one (P2: after N upserts of the same
            // dedupe key, hit_count == N).
            tx.execute(
                "INSERT INTO memory_entries
                 (kind, scope_key, text, norm_text, channel, chat_id, sender_id,
                  importance, confidence, created_at, updated_at, last_seen_at,
                  hit_count, source, expires_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?10,?10,1,?11,?12)",
                rusqlite::params![
                    entry.kind.to_string(),
                    entry.scope_key,
                    entry.text,
                    norm,
                    entry.channel,
                    entry.chat_id,
                    entry.sender_id,
                    entry.importance,
                    entry.confidence,
                    now.to_rfc3339(),
                    entry.source.to_string(),
                    expires_at.to_rfc3339(),
                ],
            )?;
            let id = tx.last_insert_rowid();
            db::fts_insert(&tx, id, &entry.text)?;
            debug!(id, "upsert: inserted new row");
            UpsertResult {
                outcome: UpsertOutcome::Inserted,
                id,
            }
        }
    };

    tx.commit()?;
    Ok(result)
}

/// One `search` attempt's body.
fn search_tx(
    conn: &Connection,
    scope_keys: &[String],
    kinds: &[MemoryKind],
    query_text: &str,
    k: usize,
) -> rusqlite::Result<Vec<(MemoryEntry, f64)>> {
    let started = Instant::now();

    let scope_placeholders = placeholders(scope_keys.len(), 1);
    let kind_placeholders = placeholders(kinds.len(), scope_keys.len() + 1);

    let sql = format!(
        "SELECT m.id, m.kind, m.scope_key, m.text, m.channel, m.chat_id, m.sender_id,
                m.importance, m.confidence, m.created_at, m.updated_at, m.last_seen_at,
                m.hit_count, m.source, m.expires_at, bm25(memory_entries_fts) as rank
         FROM memory_entries m
         JOIN memory_entries_fts f ON m.id = f.rowid
         WHERE memory_entries_fts MATCH ?{match_pos}
           AND m.scope_key IN ({scope_placeholders})
           AND m.kind IN ({kind_placeholders})
         ORDER BY rank
         LIMIT ?{limit_pos}",
        match_pos = scope_keys.len() + kinds.len() + 1,
        limit_pos = scope_keys.len() + kinds.len() + 2,
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for s in scope_keys {
        params.push(Box::new(s.clone()));
    }
    for k in kinds {
        params.push(Box::new(k.to_string()));
    }
    params.push(Box::new(fts_query(query_text)));
    params.push(Box::new(k as i64));

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(param_refs.as_slice(), row_to_entry_with_score)?;

    let mut out = Vec::new();
    for row in rows {
        if started.elapsed() > SEARCH_SOFT_DEADLINE {
            warn!("search soft deadline exceeded, returning partial results");
            break;
        }
        if let Ok(item) = row {
            out.push(item);
        }
    }
    Ok(out)
}

/// One `prune` attempt's transactional body.
fn prune_tx(conn: &mut Connection, predicate: &PrunePredicate) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;

    let (sql, param): (&str, String) = match predicate {
        PrunePredicate::Expired { now } => (
            "SELECT id, text FROM memory_entries WHERE expires_at < ?1",
            now.to_rfc3339(),
        ),
        PrunePredicate::OlderThanDays { cutoff } => (
            "SELECT id, text FROM memory_entries WHERE created_at < ?1",
            cutoff.to_rfc3339(),
        ),
    };

    let rows: Vec<(i64, String)> = {
        let mut stmt = tx.prepare(sql)?;
        let rows = stmt.query_map([&param], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    for (id, text) in &rows {
        db::fts_delete(&tx, *id, text)?;
        tx.execute("DELETE FROM memory_entries WHERE id = ?1", [id])?;
    }

    tx.commit()?;
    Ok(rows.len())
}

/// One `reindex` attempt's transactional body.
fn reindex_tx(conn: &mut Connection) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM memory_entries_fts", [])?;
    let rows: Vec<(i64, String)> = {
        let mut stmt = tx.prepare("SELECT id, text FROM memory_entries")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.filter_map(|r| r.ok()).collect()
    };
    for (id, text) in &rows {
        db::fts_insert(&tx, *id, text)?;
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Retry a SQLite operation up to `BUSY_BACKOFF_MS.len()` times on
/// `SQLITE_BUSY`, sleeping the documented backoff between attempts
/// (spec.md §5: 3 attempts, 50/125/250ms).
fn with_busy_retry<T>(mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
    let mut last_err = None;
    for delay_ms in BUSY_BACKOFF_MS {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(error = %e, "store operation busy, retrying");
                last_err = Some(e);
                std::thread::sleep(Duration::from_millis(delay_ms));
            }
        }
    }
    match op() {
        Ok(v) => Ok(v),
        Err(e) => {
            let _ = last_err;
            Err(MemoryError::StoreBusy(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn test_store() -> Store {
        let conn = Connection::open_in_memory().unwrap();
        Store::new(conn, ":memory:").unwrap()
    }

    fn entry(scope: &str, kind: MemoryKind, text: &str, now: DateTime<Utc>) -> NewEntry {
        NewEntry {
            kind,
            scope_key: scope.to_string(),
            text: text.to_string(),
            channel: "cli".to_string(),
            chat_id: Some("chat-a".to_string()),
            sender_id: None,
            importance: 0.7,
            confidence: 0.9,
            source: EntrySource::Auto,
            now,
            retention_days: 3650,
        }
    }

    #[test]
    fn upsert_then_search_roundtrip() {
        let store = test_store();
        let now = Utc::now();
        store
            .upsert(entry("channel:cli:user:s1", MemoryKind::Fact, "uses tailwind", now))
            .unwrap();

        let hits = store
            .search(&["channel:cli:user:s1".to_string()], &[MemoryKind::Fact], "tailwind", 8)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.text, "uses tailwind");
    }

    #[test]
    fn duplicate_upsert_merges_and_bumps_hit_count() {
        let store = test_store();
        let now = Utc::now();
        let r1 = store
            .upsert(entry("scope-a", MemoryKind::Preference, "I always prefer dark mode", now))
            .unwrap();
        assert_eq!(r1.outcome, UpsertOutcome::Inserted);

        let r2 = store
            .upsert(entry(
                "scope-a",
                MemoryKind::Preference,
                "I always prefer dark mode",
                now + ChronoDuration::seconds(1),
            ))
            .unwrap();
        assert_eq!(r2.outcome, UpsertOutcome::Merged);
        assert_eq!(r1.id, r2.id);

        let stats = store.stats(None).unwrap();
        assert_eq!(stats.total_rows, 1);

        let hits = store
            .search(&["scope-a".to_string()], &[MemoryKind::Preference], "dark mode", 8)
            .unwrap();
        assert_eq!(hits[0].0.hit_count, 2);
    }

    #[test]
    fn cross_scope_search_returns_nothing() {
        let store = test_store();
        let now = Utc::now();
        store
            .upsert(entry("channel:cli:chat:a", MemoryKind::Decision, "use postgres", now))
            .unwrap();

        let hits = store
            .search(
                &["channel:cli:chat:b".to_string()],
                &[MemoryKind::Decision],
                "postgres",
                8,
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn prune_removes_expired_rows_and_keeps_fts_consistent() {
        let store = test_store();
        let now = Utc::now();
        let mut e = entry("scope-a", MemoryKind::Episodic, "short-lived note", now);
        e.retention_days = -1; // already expired
        store.upsert(e).unwrap();

        let pruned = store.prune(PrunePredicate::Expired { now }).unwrap();
        assert_eq!(pruned, 1);
        store.check_consistency().unwrap();

        let stats = store.stats(None).unwrap();
        assert_eq!(stats.total_rows, 0);
    }

    #[test]
    fn reindex_rebuilds_fts_from_canonical() {
        let store = test_store();
        let now = Utc::now();
        store
            .upsert(entry("scope-a", MemoryKind::Fact, "lives in Berlin", now))
            .unwrap();
        let count = store.reindex().unwrap();
        assert_eq!(count, 1);
        store.check_consistency().unwrap();
    }
}
