//! Engine (spec.md §9: "construct once, share the handle") — the single
//! object a host process builds at startup and passes into its responder
//! path. Bundles the Store, config, WAL/mirror writers, and the hygiene
//! throttle state behind one `Arc`-friendly handle, the same shape as the
//! teacher's `SessionManager`/`SchedulerHandle` pairing a `Mutex`-guarded
//! resource with read-mostly config.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::backfill;
use crate::capture::{self, CaptureReport, CaptureRequest};
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::hygiene::{self, HygieneState};
use crate::mirrors::MirrorWriter;
use crate::retrieval::{self, RetrievalOutcome, RetrievalRequest};
use crate::scope;
use crate::store::Store;
use crate::types::{EntrySource, MemoryKind, ResolvedScopes, StoreStats};
use crate::wal::WalWriter;

pub struct MemoryEngine {
    store: Store,
    config: MemoryConfig,
    mirrors: MirrorWriter,
    wal: WalWriter,
    hygiene_state: Mutex<HygieneState>,
    workspace_root: std::path::PathBuf,
}

impl MemoryEngine {
    /// Open (or create) the store at `config.memory.db_path` and wire up the
    /// mirror/WAL writers against the same workspace root as the db path's
    /// parent directory.
    pub fn open(config: MemoryConfig, workspace_root: impl Into<std::path::PathBuf>) -> Result<Self> {
        let store = Store::open(&config.memory.db_path)?;
        let workspace_root = workspace_root.into();
        let wal_dir = workspace_root.join(&config.wal.state_dir);
        Ok(Self {
            mirrors: MirrorWriter::new(workspace_root.clone()),
            wal: WalWriter::new(wal_dir),
            store,
            config,
            hygiene_state: Mutex::new(HygieneState::new()),
            workspace_root,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Resolve scope keys for one turn's channel identity.
    pub fn resolve_scopes(&self, channel: &str, chat_id: &str, sender_id: Option<&str>, workspace_id: &str) -> ResolvedScopes {
        scope::resolve(channel, chat_id, sender_id, workspace_id)
    }

    /// Run the Retrieval Pipeline for one turn.
    #[instrument(skip(self, req))]
    pub fn retrieve(&self, req: &RetrievalRequest, now: DateTime<Utc>) -> Result<RetrievalOutcome> {
        if !self.config.memory.enabled {
            return Ok(RetrievalOutcome { rendered: None, entries: Vec::new() });
        }
        retrieval::retrieve(&self.store, req, now)
    }

    /// Run the Capture Pipeline for one turn, then mark hygiene dirty and
    /// sweep if due.
    #[instrument(skip(self, channel, user_text, assistant_text, scopes, sender_id))]
    pub fn capture_turn(
        &self,
        channel: &str,
        user_text: &str,
        assistant_text: Option<&str>,
        scopes: &ResolvedScopes,
        sender_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CaptureReport> {
        if !self.config.memory.enabled {
            return Ok(CaptureReport::default());
        }
        let req = CaptureRequest { channel, user_text, assistant_text, scopes, sender_id };
        let report = capture::capture(&self.store, &self.mirrors, &self.config.capture, &self.config.retention, &req, now)?;

        if report.saved > 0 || report.deduped > 0 {
            self.hygiene_state.lock().unwrap().mark_dirty();
        }
        hygiene::run_if_due(&self.store, &self.hygiene_state, &self.config.retention, now)?;
        Ok(report)
    }

    /// Write the `PRE` WAL marker before a turn begins.
    pub fn wal_pre(&self, session_key: &str, turn_meta: &str) {
        if self.config.wal.enabled {
            let _ = self.wal.append_pre(session_key, turn_meta);
        }
    }

    /// Write the `POST` WAL marker after a turn completes.
    pub fn wal_post(&self, session_key: &str, assistant_summary: &str) {
        if self.config.wal.enabled {
            let _ = self.wal.append_post(session_key, assistant_summary);
        }
    }

    /// Manual insert (operator `memory add`, spec.md §6). `scope_override`
    /// takes precedence over the kind→scope default (spec.md §4.2) when the
    /// caller passes an explicit `--scope` argument.
    pub fn add_manual(
        &self,
        kind: MemoryKind,
        text: &str,
        channel: &str,
        chat_id: Option<&str>,
        sender_id: Option<&str>,
        scopes: &ResolvedScopes,
        scope_override: Option<crate::types::ScopeKind>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let scope_key = match scope_override {
            Some(scope_kind) => scope::key_for_scope_kind(scope_kind, scopes),
            None => scope::scope_key_for(kind, scopes),
        };
        let retention_days = self.config.retention.days_for(kind);
        let result = self.store.upsert(crate::store::NewEntry {
            kind,
            scope_key,
            text: text.to_string(),
            channel: channel.to_string(),
            chat_id: chat_id.map(String::from),
            sender_id: sender_id.map(String::from),
            importance: 1.0,
            confidence: 1.0,
            source: EntrySource::Manual,
            now,
            retention_days,
        })?;
        self.hygiene_state.lock().unwrap().mark_dirty();
        Ok(result.id)
    }

    /// Operator `memory prune --older-than-days`.
    pub fn prune_older_than_days(&self, days: i64, now: DateTime<Utc>) -> Result<usize> {
        hygiene::prune_older_than_days(&self.store, days, now)
    }

    /// Operator `memory prune --older-than-days --dry-run`: counts without
    /// deleting.
    pub fn count_older_than_days(&self, days: i64, now: DateTime<Utc>) -> Result<usize> {
        hygiene::count_older_than_days(&self.store, days, now)
    }

    /// Operator `memory reindex`.
    pub fn reindex(&self) -> Result<usize> {
        self.store.reindex()
    }

    /// Operator `memory status`.
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats(self.hygiene_state.lock().unwrap().last_run())
    }

    /// Operator `memory backfill` — one-time import of legacy semantic/
    /// episodic markdown, guarded by a `memory_meta` marker so repeat
    /// invocations are free.
    pub fn backfill(&self, fallback_scope_key: &str) -> Result<usize> {
        let retention = self.config.retention.clone();
        backfill::run(&self.store, &self.workspace_root, fallback_scope_key, move |kind| retention.days_for(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_engine(dir: &std::path::Path) -> MemoryEngine {
        let mut config = MemoryConfig::default();
        config.memory.db_path = dir.join("longterm.db").to_string_lossy().to_string();
        MemoryEngine::open(config, dir).unwrap()
    }

    #[test]
    fn capture_then_retrieve_round_trip() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        let scopes = engine.resolve_scopes("cli", "chat-a", Some("s1"), "ws-1");
        let now = Utc::now();

        engine
            .capture_turn("cli", "I always prefer dark mode", None, &scopes, Some("s1"), now)
            .unwrap();

        let req = RetrievalRequest {
            user_text: "dark mode",
            reply_to_text: None,
            scopes: &scopes,
            max_results: 8,
            user_preference_layer_results: 2,
            max_prompt_chars: 2400,
        };
        let outcome = engine.retrieve(&req, now).unwrap();
        assert_eq!(outcome.entries.len(), 1);
    }

    #[test]
    fn add_manual_scope_override_reaches_global() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        let scopes = engine.resolve_scopes("cli", "chat-a", Some("s1"), "ws-1");
        let now = Utc::now();

        // No override: a fact defaults to the user scope.
        engine
            .add_manual(MemoryKind::Fact, "lives in Berlin", "cli", Some("chat-a"), Some("s1"), &scopes, None, now)
            .unwrap();

        // Explicit override: the same kind can still be pinned to global.
        engine
            .add_manual(
                MemoryKind::Fact,
                "workspace uses UTC",
                "cli",
                Some("chat-a"),
                Some("s1"),
                &scopes,
                Some(crate::types::ScopeKind::Global),
                now,
            )
            .unwrap();

        let hits = engine
            .store()
            .search(&[scopes.global.clone()], &[MemoryKind::Fact], "UTC", 8)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.scope_key, scopes.global);
    }

    #[test]
    fn disabled_memory_short_circuits_capture_and_retrieve() {
        let dir = tempdir().unwrap();
        let mut config = MemoryConfig::default();
        config.memory.db_path = dir.path().join("longterm.db").to_string_lossy().to_string();
        config.memory.enabled = false;
        let engine = MemoryEngine::open(config, dir.path()).unwrap();
        let scopes = engine.resolve_scopes("cli", "chat-a", Some("s1"), "ws-1");
        let now = Utc::now();

        let report = engine
            .capture_turn("cli", "I always prefer dark mode", None, &scopes, Some("s1"), now)
            .unwrap();
        assert_eq!(report.saved, 0);
        assert_eq!(engine.stats().unwrap().total_rows, 0);
    }
}
