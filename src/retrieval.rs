//! Retrieval Pipeline (spec.md §4.6) — query construction, dual-scope
//! full-text search, score fusion, bounded rendering.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::metrics as telemetry;
use crate::store::Store;
use crate::types::{MemoryKind, RenderedContext, ResolvedScopes, RetrievalLayer, ScoredEntry};

/// Half-life for the recency component of the fusion score (spec.md §9
/// Open Question, resolved to 7 days).
const RECENCY_HALF_LIFE_SECS: f64 = 7.0 * 86_400.0;

/// Fusion weights (spec.md §4.6 step 5): fixed, not configurable in v1.
const WEIGHT_FTS: f64 = 0.65;
const WEIGHT_IMPORTANCE: f64 = 0.20;
const WEIGHT_RECENCY: f64 = 0.15;

pub struct RetrievalRequest<'a> {
    pub user_text: &'a str,
    pub reply_to_text: Option<&'a str>,
    pub scopes: &'a ResolvedScopes,
    pub max_results: usize,
    pub user_preference_layer_results: usize,
    pub max_prompt_chars: usize,
}

pub struct RetrievalOutcome {
    pub rendered: Option<RenderedContext>,
    pub entries: Vec<ScoredEntry>,
}

/// Run the full eight-step pipeline from spec.md §4.6.
#[instrument(skip(store, req))]
pub fn retrieve(store: &Store, req: &RetrievalRequest, now: DateTime<Utc>) -> crate::error::Result<RetrievalOutcome> {
    let query = build_query(req.user_text, req.reply_to_text);
    if query.is_empty() {
        return Ok(RetrievalOutcome { rendered: None, entries: Vec::new() });
    }

    let chat_hits = store.search(
        &[req.scopes.chat.clone()],
        &MemoryKind::ALL,
        &query,
        req.max_results,
    )?;
    let user_hits = store.search(
        &[req.scopes.user.clone()],
        &[MemoryKind::Preference, MemoryKind::Fact],
        &query,
        req.user_preference_layer_results,
    )?;

    let chat_scored = fuse_layer(chat_hits, RetrievalLayer::Chat, now);
    let user_scored = fuse_layer(user_hits, RetrievalLayer::User, now);

    let merged = merge_and_dedupe(chat_scored, user_scored, req.max_results);
    let rendered = render(&merged, req.max_prompt_chars);

    if merged.is_empty() {
        telemetry::recall_miss();
    } else {
        telemetry::recall_hit();
    }
    telemetry::prompt_chars(rendered.char_count);

    Ok(RetrievalOutcome {
        rendered: Some(rendered),
        entries: merged,
    })
}

/// Step 1: whitespace-normalized concatenation of the user text and (if
/// present) the reply-to text. No heavy stemming; backend FTS defaults
/// handle tokenization.
fn build_query(user_text: &str, reply_to_text: Option<&str>) -> String {
    let mut parts: Vec<&str> = vec![user_text.trim()];
    if let Some(r) = reply_to_text {
        let r = r.trim();
        if !r.is_empty() {
            parts.push(r);
        }
    }
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Steps 3-5: per-layer normalization against that layer's max score, plus
/// recency and the fixed 0.65/0.20/0.15 fusion weights.
fn fuse_layer(hits: Vec<(crate::types::MemoryEntry, f64)>, layer: RetrievalLayer, now: DateTime<Utc>) -> Vec<ScoredEntry> {
    let max_score = hits.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);

    hits.into_iter()
        .map(|(entry, fts_score)| {
            let fts_norm = if max_score > 0.0 { (fts_score / max_score).clamp(0.0, 1.0) } else { 0.0 };
            let recency = recency_decay(entry.last_seen_at, now);
            let final_score = WEIGHT_FTS * fts_norm + WEIGHT_IMPORTANCE * entry.importance + WEIGHT_RECENCY * recency;
            ScoredEntry {
                entry,
                fts_score,
                fts_norm,
                recency,
                final_score,
                layer,
            }
        })
        .collect()
}

/// Exponential decay with a 7-day half-life, clamped to `[0, 1]`.
fn recency_decay(last_seen_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_secs = (now - last_seen_at).num_seconds().max(0) as f64;
    let decay = 0.5_f64.powf(age_secs / RECENCY_HALF_LIFE_SECS);
    decay.clamp(0.0, 1.0)
}

/// Step 6: merge layers, dedupe by entry id (chat layer wins ties since it
/// is searched first and carries the full kind set), sort by `final_score`
/// desc with the documented tie-break, take top `max_results`.
fn merge_and_dedupe(chat: Vec<ScoredEntry>, user: Vec<ScoredEntry>, max_results: usize) -> Vec<ScoredEntry> {
    use std::collections::HashMap;
    let mut by_id: HashMap<i64, ScoredEntry> = HashMap::new();
    for scored in chat.into_iter().chain(user.into_iter()) {
        by_id.entry(scored.entry.id).or_insert(scored);
    }

    let mut merged: Vec<ScoredEntry> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.importance.partial_cmp(&a.entry.importance).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.entry.last_seen_at.cmp(&a.entry.last_seen_at))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    merged.truncate(max_results);
    merged
}

/// Step 7: render a single synthetic system message, one `- [{kind}] {text}`
/// line per entry, truncated so total length stays ≤ `max_prompt_chars`
/// without ever emitting a partial line (spec.md §4.6, P3).
fn render(entries: &[ScoredEntry], max_prompt_chars: usize) -> RenderedContext {
    let mut out = String::new();
    let mut entry_count = 0;
    for scored in entries {
        let line = format!("- [{}] {}", scored.entry.kind, scored.entry.text);
        let projected_len = if out.is_empty() { line.len() } else { out.len() + 1 + line.len() };
        if projected_len > max_prompt_chars {
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
        entry_count += 1;
    }
    let char_count = out.len();
    RenderedContext { text: out, entry_count, char_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewEntry, Store};
    use crate::types::EntrySource;
    use rusqlite::Connection;

    fn store_with(entries: &[(&str, MemoryKind, &str, f64, DateTime<Utc>)]) -> Store {
        let store = Store::new(Connection::open_in_memory().unwrap(), ":memory:").unwrap();
        for (scope, kind, text, importance, last_seen) in entries {
            store
                .upsert(NewEntry {
                    kind: *kind,
                    scope_key: scope.to_string(),
                    text: text.to_string(),
                    channel: "cli".to_string(),
                    chat_id: Some("direct".to_string()),
                    sender_id: None,
                    importance: *importance,
                    confidence: 0.9,
                    source: EntrySource::Auto,
                    now: *last_seen,
                    retention_days: 3650,
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn recency_decay_halves_at_one_half_life() {
        let now = Utc::now();
        let week_ago = now - chrono::Duration::days(7);
        let decay = recency_decay(week_ago, now);
        assert!((decay - 0.5).abs() < 0.01);
    }

    #[test]
    fn render_drops_whole_lines_never_partial() {
        let now = Utc::now();
        let store = store_with(&[
            ("s", MemoryKind::Fact, "short fact one", 0.7, now),
            ("s", MemoryKind::Fact, "short fact two is a bit longer than the first", 0.7, now),
        ]);
        let scopes = ResolvedScopes {
            chat: "s".to_string(),
            user: "s".to_string(),
            global: "s".to_string(),
        };
        let req = RetrievalRequest {
            user_text: "fact",
            reply_to_text: None,
            scopes: &scopes,
            max_results: 8,
            user_preference_layer_results: 2,
            max_prompt_chars: 30,
        };
        let outcome = retrieve(&store, &req, now).unwrap();
        let rendered = outcome.rendered.unwrap();
        assert!(rendered.char_count <= 30);
        for line in rendered.text.lines() {
            assert!(line.starts_with("- ["));
        }
    }

    #[test]
    fn cross_chat_isolation_yields_miss() {
        let now = Utc::now();
        let store = store_with(&[("channel:cli:chat:a", MemoryKind::Decision, "use rust", 0.8, now)]);
        let scopes = ResolvedScopes {
            chat: "channel:cli:chat:b".to_string(),
            user: "channel:cli:user:b".to_string(),
            global: "workspace:w:global".to_string(),
        };
        let req = RetrievalRequest {
            user_text: "rust",
            reply_to_text: None,
            scopes: &scopes,
            max_results: 8,
            user_preference_layer_results: 2,
            max_prompt_chars: 2400,
        };
        let outcome = retrieve(&store, &req, now).unwrap();
        assert!(outcome.entries.is_empty());
    }

    #[test]
    fn user_layer_bleeds_across_chats_for_same_sender() {
        let now = Utc::now();
        let store = store_with(&[("channel:cli:user:s1", MemoryKind::Preference, "prefers dark mode", 0.7, now)]);
        let scopes = ResolvedScopes {
            chat: "channel:cli:chat:b".to_string(),
            user: "channel:cli:user:s1".to_string(),
            global: "workspace:w:global".to_string(),
        };
        let req = RetrievalRequest {
            user_text: "dark mode",
            reply_to_text: None,
            scopes: &scopes,
            max_results: 8,
            user_preference_layer_results: 2,
            max_prompt_chars: 2400,
        };
        let outcome = retrieve(&store, &req, now).unwrap();
        assert_eq!(outcome.entries.len(), 1);
    }
}
