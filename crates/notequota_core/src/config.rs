//! Engine configuration.
//!
//! # Responsibility
//! - Hold the deployment's tier table, size ceilings, retry and rate-limit
//!   settings in one explicit object.
//! - Load and validate configuration from JSON.
//!
//! # Invariants
//! - A validated config always yields a `TierPolicyTable` with a resolvable
//!   default tier.
//! - Configuration is read once at process start and never mutated.

use crate::model::tier::{builtin_tiers, TierPolicy, TierPolicyTable};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DEFAULT_FILE_SIZE_CEILING_BYTES: u64 = 25 * 1024 * 1024;
const DEFAULT_CASCADE_PAGE_SIZE: u32 = 200;
const DEFAULT_MIN_ORPHAN_AGE_MS: u64 = 15 * 60 * 1000;
const MAX_CONFIGURED_RETRIES: u32 = 10;

/// Configuration load/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    EmptyTierTable,
    InvalidTierName(String),
    DuplicateTier(String),
    UnknownDefaultTier(String),
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::EmptyTierTable => write!(f, "tier table must contain at least one tier"),
            Self::InvalidTierName(name) => write!(f, "invalid tier name `{name}`"),
            Self::DuplicateTier(name) => write!(f, "tier `{name}` is defined more than once"),
            Self::UnknownDefaultTier(name) => {
                write!(f, "default tier `{name}` is not defined in the tier table")
            }
            Self::InvalidValue { field, message } => write!(f, "invalid `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Bounded retry settings for store write conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt before surfacing `Conflict`.
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 10,
            max_backoff_ms: 200,
        }
    }
}

/// Default request-gate settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_per_window: u64,
    pub sweep_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_per_window: 100,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Process-wide engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tiers: Vec<TierPolicy>,
    pub default_tier: String,
    /// Hard per-file ceiling, independent of tier.
    pub absolute_file_size_ceiling_bytes: u64,
    /// Media types accepted by the pass/fail type check. Empty accepts all.
    pub allowed_mime_prefixes: Vec<String>,
    /// Root of every account's object prefix.
    pub storage_prefix: String,
    /// Child rows read per page during cascade enumeration.
    pub cascade_page_size: u32,
    /// Unreferenced objects younger than this are left alone by the
    /// reconciler; an upload may still be about to commit them.
    pub min_orphan_age_ms: u64,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: builtin_tiers(),
            default_tier: "free".to_string(),
            absolute_file_size_ceiling_bytes: DEFAULT_FILE_SIZE_CEILING_BYTES,
            allowed_mime_prefixes: ["image/", "audio/", "video/", "application/pdf", "text/"]
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
            storage_prefix: "accounts".to_string(),
            cascade_page_size: DEFAULT_CASCADE_PAGE_SIZE,
            min_orphan_age_ms: DEFAULT_MIN_ORPHAN_AGE_MS,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tier_table()?;

        if self.retry.max_retries > MAX_CONFIGURED_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_retries",
                message: format!("must be <= {MAX_CONFIGURED_RETRIES}"),
            });
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.base_backoff_ms",
                message: "must not exceed retry.max_backoff_ms".to_string(),
            });
        }
        if self.cascade_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cascade_page_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.window_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.max_per_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.max_per_window",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.sweep_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.storage_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage_prefix",
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Builds the immutable tier lookup table.
    pub fn tier_table(&self) -> Result<TierPolicyTable, ConfigError> {
        TierPolicyTable::new(self.tiers.clone(), &self.default_tier)
    }

    /// Pass/fail media type check.
    pub fn is_mime_allowed(&self, mime_type: &str) -> bool {
        let normalized = mime_type.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return false;
        }
        self.allowed_mime_prefixes.is_empty()
            || self
                .allowed_mime_prefixes
                .iter()
                .any(|prefix| normalized.starts_with(&prefix.trim().to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};
    use crate::model::tier::Limit;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.tier_table().unwrap().default_tier(), "free");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "default_tier": "basic",
                "tiers": [
                    {"name": "basic", "max_modules": 1, "max_notes_per_module": 3,
                     "max_storage_bytes": 1000},
                    {"name": "team", "max_modules": "unlimited",
                     "max_notes_per_module": "unlimited", "max_storage_bytes": 5000,
                     "features": ["export"]}
                ],
                "rate_limit": {"max_per_window": 5}
            }"#,
        )
        .expect("config should parse");

        let table = config.tier_table().unwrap();
        assert_eq!(table.limits_for("team").max_modules, Limit::Unlimited);
        assert!(table.limits_for("team").has_feature("export"));
        assert_eq!(config.rate_limit.max_per_window, 5);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.cascade_page_size, 200);
    }

    #[test]
    fn validate_rejects_zero_intervals_and_page_size() {
        let mut config = EngineConfig::default();
        config.rate_limit.window_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "rate_limit.window_ms",
                ..
            })
        ));

        let mut config = EngineConfig::default();
        config.cascade_page_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rate_limit.sweep_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "rate_limit.sweep_interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn mime_check_uses_prefixes() {
        let config = EngineConfig::default();
        assert!(config.is_mime_allowed("image/png"));
        assert!(config.is_mime_allowed("Application/PDF"));
        assert!(!config.is_mime_allowed("application/x-msdownload"));
        assert!(!config.is_mime_allowed("  "));
    }

    #[test]
    fn mime_prefixes_match_regardless_of_case() {
        let config = EngineConfig {
            allowed_mime_prefixes: vec!["Image/".to_string(), " AUDIO/ ".to_string()],
            ..EngineConfig::default()
        };
        assert!(config.is_mime_allowed("image/png"));
        assert!(config.is_mime_allowed("Audio/MPEG"));
        assert!(!config.is_mime_allowed("video/mp4"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
