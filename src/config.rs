use figment::providers::{Env, Format, Json, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Top-level config (`config.json`/`config.toml` + `NANOMEM_*` env overrides).
///
/// Mirrors every key in spec.md §6's configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub recall: RecallSection,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub retention: RetentionSection,
    #[serde(default)]
    pub wal: WalSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySection {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            backend: default_backend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallSection {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_user_layer_results")]
    pub user_preference_layer_results: usize,
}

impl Default for RecallSection {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            max_prompt_chars: default_max_prompt_chars(),
            user_preference_layer_results: default_user_layer_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSection {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_capture_mode")]
    pub mode: String,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_importance")]
    pub min_importance: f64,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default)]
    pub capture_assistant: bool,
    #[serde(default = "default_max_entries_per_turn")]
    pub max_entries_per_turn: usize,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: default_capture_mode(),
            min_confidence: default_min_confidence(),
            min_importance: default_min_importance(),
            channels: default_channels(),
            capture_assistant: false,
            max_entries_per_turn: default_max_entries_per_turn(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSection {
    #[serde(default = "default_episodic_days")]
    pub episodic_days: i64,
    #[serde(default = "default_long_days")]
    pub fact_days: i64,
    #[serde(default = "default_long_days")]
    pub preference_days: i64,
    #[serde(default = "default_long_days")]
    pub decision_days: i64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            episodic_days: default_episodic_days(),
            fact_days: default_long_days(),
            preference_days: default_long_days(),
            decision_days: default_long_days(),
        }
    }
}

impl RetentionSection {
    pub fn days_for(&self, kind: crate::types::MemoryKind) -> i64 {
        use crate::types::MemoryKind;
        match kind {
            MemoryKind::Episodic => self.episodic_days,
            MemoryKind::Fact => self.fact_days,
            MemoryKind::Preference => self.preference_days,
            MemoryKind::Decision => self.decision_days,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalSection {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_wal_state_dir")]
    pub state_dir: String,
}

impl Default for WalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            state_dir: default_wal_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory: MemorySection::default(),
            recall: RecallSection::default(),
            capture: CaptureSection::default(),
            retention: RetentionSection::default(),
            wal: WalSection::default(),
            embedding: EmbeddingSection::default(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_backend() -> String {
    "sqlite_fts".to_string()
}
fn default_max_results() -> usize {
    8
}
fn default_max_prompt_chars() -> usize {
    2400
}
fn default_user_layer_results() -> usize {
    2
}
fn default_capture_mode() -> String {
    "heuristic".to_string()
}
fn default_min_confidence() -> f64 {
    0.78
}
fn default_min_importance() -> f64 {
    0.6
}
fn default_channels() -> Vec<String> {
    vec!["cli".to_string(), "discord".to_string(), "telegram".to_string()]
}
fn default_max_entries_per_turn() -> usize {
    4
}
fn default_episodic_days() -> i64 {
    90
}
fn default_long_days() -> i64 {
    3650
}
fn default_wal_state_dir() -> String {
    "memory/session-state".to_string()
}

/// Default home directory for the memory store (`~/.nanobot` per spec.md §6).
pub fn default_home() -> String {
    dirs::home_dir()
        .map(|p| p.join(".nanobot").to_string_lossy().to_string())
        .unwrap_or_else(|| ".nanobot".to_string())
}

fn default_db_path() -> String {
    format!("{}/memory/longterm.db", default_home())
}

fn default_config_path() -> String {
    format!("{}/config.json", default_home())
}

impl MemoryConfig {
    /// Load config from a TOML or JSON file (format picked by extension,
    /// TOML if ambiguous) with `NANOMEM_*` env var overrides layered on top.
    /// Mirrors `SkynetConfig::load`'s precedence: explicit path argument,
    /// else the default `~/.nanobot/config.json`.
    ///
    /// Unknown top-level sections are rejected — figment itself is
    /// permissive about unknown keys, so the crate does an explicit check
    /// of the raw extracted value's top-level keys before extracting into
    /// the typed struct.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let figment = if path.ends_with(".json") {
            Figment::new().merge(Json::file(&path))
        } else {
            Figment::new().merge(Toml::file(&path))
        }
        .merge(Env::prefixed("NANOMEM_").split("_"));

        let raw: figment::value::Value = figment
            .extract()
            .map_err(|e| MemoryError::ConfigInvalid(e.to_string()))?;

        validate_known_keys(&raw)?;

        let config: MemoryConfig = figment
            .extract()
            .map_err(|e| MemoryError::ConfigInvalid(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject config values outside their documented ranges.
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.capture.min_confidence) {
            return Err(MemoryError::ConfigInvalid(
                "capture.minConfidence must be in [0.0, 1.0]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.capture.min_importance) {
            return Err(MemoryError::ConfigInvalid(
                "capture.minImportance must be in [0.0, 1.0]".to_string(),
            ));
        }
        if self.recall.max_results == 0 {
            return Err(MemoryError::ConfigInvalid(
                "recall.maxResults must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

const KNOWN_SECTIONS: &[&str] = &[
    "memory",
    "recall",
    "capture",
    "retention",
    "wal",
    "embedding",
];

fn validate_known_keys(raw: &figment::value::Value) -> Result<()> {
    let dict = match raw.as_dict() {
        Some(d) => d,
        None => return Ok(()),
    };
    for key in dict.keys() {
        if !KNOWN_SECTIONS.contains(&key.as_str()) {
            return Err(MemoryError::ConfigInvalid(format!(
                "unknown configuration section: {key}"
            )));
        }
    }
    Ok(())
}
