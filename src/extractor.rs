//! Extractor (spec.md §4.4), heuristic mode — the only mode this spec
//! requires (`capture.mode = "heuristic"`).
//!
//! Derives zero or more typed [`Candidate`]s from a turn's user text (and,
//! when `capture.captureAssistant` is set, the assistant text too — the
//! caller decides which text to pass in; the Extractor itself is
//! stateless and has no opinion about whose turn it is).

use crate::normalize::normalize_for_dedupe;
use crate::types::{Candidate, MemoryKind};

const EPISODIC_MAX_CHARS: usize = 200;

/// Cue phrases per kind, cheapest-first. Mirrors the priority table the
/// teacher's `build_user_context` uses for render order, reused here to
/// drive candidate confidence instead.
struct CueRule {
    kind: MemoryKind,
    cues: &'static [&'static str],
    base_confidence: f64,
    base_importance: f64,
}

const RULES: &[CueRule] = &[
    CueRule {
        kind: MemoryKind::Decision,
        cues: &["we'll go with", "decided to", "let's go with", "we will use", "going with"],
        base_confidence: 0.85,
        base_importance: 0.75,
    },
    CueRule {
        kind: MemoryKind::Preference,
        cues: &[
            "i prefer",
            "i always",
            "i never",
            "don't use",
            "do not use",
            "please use",
            "i like to use",
            "i want",
            "my preference is",
        ],
        base_confidence: 0.82,
        base_importance: 0.65,
    },
    CueRule {
        kind: MemoryKind::Fact,
        cues: &["my ", "i work on", "i use ", "i'm ", "i am "],
        base_confidence: 0.8,
        base_importance: 0.6,
    },
];

/// Markers that bump a candidate's importance when present (spec.md §4.4:
/// `"always" ⇒ +0.1`).
const IMPORTANCE_BOOST_MARKERS: &[(&str, f64)] = &[("always", 0.1), ("never", 0.1), ("must", 0.05)];

/// Extract candidates from one turn's text.
pub fn extract(text: &str) -> Vec<Candidate> {
    let lower = text.to_lowercase();
    let mut candidates = Vec::new();

    for rule in RULES {
        if let Some(cue) = rule.cues.iter().find(|c| lower.contains(**c)) {
            let importance = (rule.base_importance + importance_boost(&lower)).min(1.0);
            candidates.push(Candidate {
                kind: rule.kind,
                text: text.trim().to_string(),
                importance,
                confidence: confidence_for_cue(rule.base_confidence, cue, &lower),
            });
        }
    }

    if candidates.is_empty() {
        if let Some(episodic) = episodic_candidate(text) {
            candidates.push(episodic);
        }
    }

    dedupe_within_turn(candidates)
}

fn importance_boost(lower: &str) -> f64 {
    IMPORTANCE_BOOST_MARKERS
        .iter()
        .filter(|(marker, _)| lower.contains(marker))
        .map(|(_, boost)| *boost)
        .sum()
}

/// Stronger, more specific cues get a small confidence bump over generic ones.
fn confidence_for_cue(base: f64, cue: &str, lower: &str) -> f64 {
    let specificity_bonus = if cue.len() > 10 { 0.05 } else { 0.0 };
    let repetition_bonus = if lower.matches(cue).count() > 1 { 0.03 } else { 0.0 };
    (base + specificity_bonus + repetition_bonus).min(1.0)
}

/// A turn that doesn't fit preference/fact/decision may still carry a short
/// continuity marker worth remembering as `episodic` — but only when it's
/// compact enough to summarize in one line (spec.md §4.4: "≤ 200 chars").
fn episodic_candidate(text: &str) -> Option<Candidate> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > EPISODIC_MAX_CHARS {
        return None;
    }
    // Heuristic continuity signal: the turn references "we" (shared
    // context) or a forward-looking verb, without matching any of the
    // stronger preference/fact/decision cues above.
    let lower = trimmed.to_lowercase();
    let looks_continuous = ["we're", "we are", "next time", "from now on", "going forward", "continuing"]
        .iter()
        .any(|m| lower.contains(m));
    if !looks_continuous {
        return None;
    }
    Some(Candidate {
        kind: MemoryKind::Episodic,
        text: trimmed.to_string(),
        importance: 0.6,
        confidence: 0.78,
    })
}

/// Candidates sharing a `(kind, normalized(text))` pair within one turn
/// collapse to the single highest-confidence one (spec.md §4.4 / SPEC_FULL §4.4).
fn dedupe_within_turn(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    use std::collections::HashMap;
    let mut best: HashMap<(MemoryKind, String), Candidate> = HashMap::new();
    for c in candidates.drain(..) {
        let key = (c.kind, normalize_for_dedupe(&c.text));
        match best.get(&key) {
            Some(existing) if existing.confidence >= c.confidence => {}
            _ => {
                best.insert(key, c);
            }
        }
    }
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_preference_with_always_boost() {
        let candidates = extract("I always prefer dark mode");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, MemoryKind::Preference);
        assert!(candidates[0].importance > 0.65);
    }

    #[test]
    fn extracts_fact() {
        let candidates = extract("I work on the billing team at my company");
        assert!(candidates.iter().any(|c| c.kind == MemoryKind::Fact));
    }

    #[test]
    fn extracts_decision() {
        let candidates = extract("After discussion we'll go with Postgres for storage");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, MemoryKind::Decision);
    }

    #[test]
    fn falls_back_to_episodic_when_nothing_else_matches() {
        let candidates = extract("Going forward let's keep using this thread for planning");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, MemoryKind::Episodic);
    }

    #[test]
    fn plain_statement_yields_no_candidates() {
        let candidates = extract("the weather today is quite nice");
        assert!(candidates.is_empty());
    }

    #[test]
    fn dedupes_within_turn() {
        let candidates = dedupe_within_turn(vec![
            Candidate {
                kind: MemoryKind::Preference,
                text: "I prefer dark mode".into(),
                importance: 0.6,
                confidence: 0.7,
            },
            Candidate {
                kind: MemoryKind::Preference,
                text: "I prefer dark mode".into(),
                importance: 0.6,
                confidence: 0.9,
            },
        ]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, 0.9);
    }
}
