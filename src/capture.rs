//! Capture Pipeline (spec.md §4.5) — orchestrates extract → filter → gate →
//! dedupe → upsert → mirror for one turn.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::config::{CaptureSection, RetentionSection};
use crate::extractor;
use crate::metrics as telemetry;
use crate::mirrors::MirrorWriter;
use crate::safety::{self, SafetyVerdict};
use crate::scope;
use crate::store::{NewEntry, Store};
use crate::types::{Candidate, EntrySource, MemoryEntry, ResolvedScopes, UpsertOutcome};

pub struct CaptureRequest<'a> {
    pub channel: &'a str,
    pub user_text: &'a str,
    pub assistant_text: Option<&'a str>,
    pub scopes: &'a ResolvedScopes,
    /// Identity of the turn's sender, carried onto every row Capture writes
    /// (spec.md §3's `sender_id` column). `None` when the channel has no
    /// per-user identity (e.g. an anonymous CLI session).
    pub sender_id: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct CaptureReport {
    pub saved: usize,
    pub deduped: usize,
    pub dropped_safety: usize,
    pub dropped_low_conf: usize,
}

/// Run the seven-step pipeline from spec.md §4.5. Idempotent per I2: running
/// this twice on the same turn results in dedupe merges, never duplicate rows.
#[instrument(skip(store, mirrors, capture_cfg, retention_cfg, req))]
pub fn capture(
    store: &Store,
    mirrors: &MirrorWriter,
    capture_cfg: &CaptureSection,
    retention_cfg: &RetentionSection,
    req: &CaptureRequest,
    now: DateTime<Utc>,
) -> crate::error::Result<CaptureReport> {
    let mut report = CaptureReport::default();

    // Step 1: master switch + channel allowlist.
    if !capture_cfg.enabled || !capture_cfg.channels.iter().any(|c| c == req.channel) {
        return Ok(report);
    }

    // Step 2: extract candidates. The Safety Filter runs against each raw
    // source text first — extraction can't turn code-fenced or injection-
    // style text into something safe, and a turn that the Extractor finds
    // no cue in (so yields zero candidates) must still be rejected and
    // counted rather than silently passing through (spec.md §8 scenario 5).
    let mut candidates = Vec::new();
    if safety_gate_raw_text(req.user_text, &mut report) {
        candidates.extend(extractor::extract(req.user_text));
    }
    if capture_cfg.capture_assistant {
        if let Some(assistant_text) = req.assistant_text {
            if safety_gate_raw_text(assistant_text, &mut report) {
                candidates.extend(extractor::extract(assistant_text));
            }
        }
    }

    // Step 3: safety filter (per candidate; redundant with the raw-text gate
    // above for the common case since candidate text is the trimmed source
    // text, but still the documented per-candidate checkpoint).
    let mut survivors: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        match safety::evaluate(&candidate.text, safety::DEFAULT_MIN_CHARS, safety::DEFAULT_MAX_CHARS) {
            SafetyVerdict::Accept => survivors.push(candidate),
            SafetyVerdict::Reject(reason) => {
                report.dropped_safety += 1;
                telemetry::capture_dropped_safety(reason.label());
            }
        }
    }

    // Step 4: gate on confidence/importance.
    let gated: Vec<Candidate> = survivors
        .into_iter()
        .filter(|c| {
            let passes = c.confidence >= capture_cfg.min_confidence && c.importance >= capture_cfg.min_importance;
            if !passes {
                report.dropped_low_conf += 1;
                telemetry::capture_dropped_low_conf();
            }
            passes
        })
        .collect();

    // Step 5: truncate to maxEntriesPerTurn by descending (confidence+importance).
    let mut ranked = gated;
    ranked.sort_by(|a, b| {
        (b.confidence + b.importance)
            .partial_cmp(&(a.confidence + a.importance))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(capture_cfg.max_entries_per_turn);

    // Steps 6-7: resolve scope, upsert, mirror inserts.
    for candidate in ranked {
        let scope_key = scope::scope_key_for(candidate.kind, req.scopes);
        let retention_days = retention_cfg.days_for(candidate.kind);

        let result = store.upsert(NewEntry {
            kind: candidate.kind,
            scope_key: scope_key.clone(),
            text: candidate.text.clone(),
            channel: req.channel.to_string(),
            chat_id: Some(req.scopes.chat.clone()),
            sender_id: req.sender_id.map(String::from),
            importance: candidate.importance,
            confidence: candidate.confidence,
            source: EntrySource::Auto,
            now,
            retention_days,
        })?;

        match result.outcome {
            UpsertOutcome::Inserted => {
                report.saved += 1;
                telemetry::capture_saved();
                let entry = MemoryEntry {
                    id: result.id,
                    kind: candidate.kind,
                    scope_key,
                    text: candidate.text,
                    channel: req.channel.to_string(),
                    chat_id: Some(req.scopes.chat.clone()),
                    sender_id: req.sender_id.map(String::from),
                    importance: candidate.importance,
                    confidence: candidate.confidence,
                    created_at: now,
                    updated_at: now,
                    last_seen_at: now,
                    hit_count: 1,
                    source: EntrySource::Auto,
                    expires_at: now + chrono::Duration::days(retention_days),
                };
                // Mirror failure is logged but not fatal (spec.md §4.5 step 7).
                let _ = mirrors.mirror(&entry);
            }
            UpsertOutcome::Merged => {
                report.deduped += 1;
                telemetry::capture_deduped();
            }
        }
    }

    Ok(report)
}

/// Runs the Safety Filter on one raw source text before extraction.
/// Returns `true` if the text may proceed to the Extractor; on reject,
/// bumps `report.dropped_safety` and the matching counter and returns `false`.
fn safety_gate_raw_text(text: &str, report: &mut CaptureReport) -> bool {
    match safety::evaluate(text, safety::DEFAULT_MIN_CHARS, safety::DEFAULT_MAX_CHARS) {
        SafetyVerdict::Accept => true,
        SafetyVerdict::Reject(reason) => {
            report.dropped_safety += 1;
            telemetry::capture_dropped_safety(reason.label());
            false
        }
    }
}
