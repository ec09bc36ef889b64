//! Telemetry (spec.md §4.10 / C11) — thin wrappers around the seven
//! contract counters/gauges, grounded in the `metrics` crate the way
//! `ConaryLabs-Mira`'s `backend::metrics` module wraps `counter!`/`gauge!`.
//!
//! No exporter is wired up here; whichever binary embeds this crate installs
//! a `metrics` recorder (Prometheus, statsd, or none) and these calls become
//! live the moment one is installed, no-ops otherwise.

use metrics::{counter, gauge};

pub fn recall_hit() {
    counter!("memory_recall_hit").increment(1);
}

pub fn recall_miss() {
    counter!("memory_recall_miss").increment(1);
}

pub fn capture_saved() {
    counter!("memory_capture_saved").increment(1);
}

pub fn capture_deduped() {
    counter!("memory_capture_deduped").increment(1);
}

pub fn capture_dropped_low_conf() {
    counter!("memory_capture_dropped_low_conf").increment(1);
}

pub fn capture_dropped_safety(reason: &'static str) {
    counter!("memory_capture_dropped_safety", "reason" => reason).increment(1);
}

pub fn prompt_chars(chars: usize) {
    gauge!("memory_prompt_chars").set(chars as f64);
}
