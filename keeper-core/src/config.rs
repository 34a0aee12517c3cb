use std::collections::BTreeMap;
use std::env;

use chrono::Duration;
use keeper_model::Tags;
use keeper_providers::ProviderIdentity;
use serde::Deserialize;
use serde::Serialize;

use crate::error::KeeperError;
use crate::error::KeeperResult;

const DEFAULT_HALF_LIFE_SECONDS: f64 = 30.0 * 86_400.0;
const DEFAULT_MAX_SUMMARY_LENGTH: usize = 480;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_CLAIM_TIMEOUT_SECONDS: i64 = 120;

/// The store's global configuration (spec §9 "Global state"), loaded once at
/// open and compared against the on-disk provider identity to drive the
/// reindex transition (spec §4.6, §7 `DimensionMismatch`). A plain
/// `serde`-deserializable struct read from TOML, the way the teacher's
/// `codex-core` config loads `config.toml` plus a handful of named
/// environment overrides (mirroring `codex-accounting-api::telemetry`'s
/// `CODEX_HOME`-keyed `env::var` reads, not a generic env-config crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The provider identity this store was last indexed with, if known.
    pub provider_identity: Option<ProviderIdentity>,
    /// Recency decay half-life in seconds (spec §4.1, §9). `0` disables
    /// decay.
    pub half_life_seconds: f64,
    /// Below this length, a document's content becomes its summary
    /// verbatim (Phase C.3); above it, a placeholder is stored and a
    /// `summarize` task is enqueued.
    pub max_summary_length: usize,
    /// PendingQueue retry cap before a task is dead-lettered (spec §4.4,
    /// §7).
    pub max_attempts: u32,
    /// How long a PendingQueue claim is held before it is eligible for
    /// re-claim by another worker.
    pub claim_timeout_seconds: i64,
    /// Tags merged in ahead of caller tags (Phase A.3, third priority).
    pub default_tags: BTreeMap<String, String>,
    /// Tag keys whose values are read from `KEEPER_TAG_{KEY}` environment
    /// variables (Phase A.3, fourth priority, ahead of caller tags).
    pub environment_tag_keys: Vec<String>,
    /// Keys that must be present on every non-system write (Phase A.5).
    pub required_tags: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider_identity: None,
            half_life_seconds: DEFAULT_HALF_LIFE_SECONDS,
            max_summary_length: DEFAULT_MAX_SUMMARY_LENGTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            claim_timeout_seconds: DEFAULT_CLAIM_TIMEOUT_SECONDS,
            default_tags: BTreeMap::new(),
            environment_tag_keys: Vec::new(),
            required_tags: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Parse a `StoreConfig` from TOML text, then apply the handful of
    /// named environment overrides the teacher's telemetry module uses
    /// (`KEEPER_HALF_LIFE_SECONDS`, `KEEPER_MAX_SUMMARY_LENGTH`,
    /// `KEEPER_MAX_ATTEMPTS`, `KEEPER_CLAIM_TIMEOUT_SECONDS`).
    pub fn load(toml_text: &str) -> KeeperResult<Self> {
        let mut config: StoreConfig = toml::from_str(toml_text)
            .map_err(|e| KeeperError::FormatError(format!("parse store config: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = parse_env("KEEPER_HALF_LIFE_SECONDS") {
            self.half_life_seconds = value;
        }
        if let Some(value) = parse_env::<usize>("KEEPER_MAX_SUMMARY_LENGTH") {
            self.max_summary_length = value;
        }
        if let Some(value) = parse_env::<u32>("KEEPER_MAX_ATTEMPTS") {
            self.max_attempts = value;
        }
        if let Some(value) = parse_env::<i64>("KEEPER_CLAIM_TIMEOUT_SECONDS") {
            self.claim_timeout_seconds = value;
        }
    }

    /// Tags contributed by the environment-derived layer of Phase A.3:
    /// `KEEPER_TAG_{KEY}` for each configured `environment_tag_keys` entry.
    #[must_use]
    pub fn environment_tags(&self) -> Tags {
        let mut tags = Tags::new();
        for key in &self.environment_tag_keys {
            let var_name = format!("KEEPER_TAG_{}", key.to_uppercase());
            if let Ok(value) = env::var(var_name) {
                tags.set(key.clone(), value);
            }
        }
        tags
    }

    #[must_use]
    pub fn default_tags(&self) -> Tags {
        Tags::from_map(self.default_tags.clone())
    }

    #[must_use]
    pub fn claim_timeout(&self) -> Duration {
        Duration::seconds(self.claim_timeout_seconds)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_spec_half_life() {
        let config = StoreConfig::default();
        assert_eq!(config.half_life_seconds, 30.0 * 86_400.0);
    }

    #[test]
    fn loads_toml_and_overrides_defaults() {
        let config = StoreConfig::load(
            r#"
            max_summary_length = 200
            required_tags = ["topic"]
            "#,
        )
        .expect("load");
        assert_eq!(config.max_summary_length, 200);
        assert_eq!(config.required_tags, vec!["topic".to_string()]);
        assert_eq!(config.half_life_seconds, 30.0 * 86_400.0);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(StoreConfig::load("not = [valid").is_err());
    }
}
