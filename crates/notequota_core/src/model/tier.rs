//! Tier policies and limit arithmetic.
//!
//! # Responsibility
//! - Model resource ceilings as `Limit::{Unlimited, Bounded(n)}`.
//! - Resolve a tier name to its policy without I/O.
//!
//! # Invariants
//! - `TierPolicyTable::limits_for` never fails: unknown or legacy tier names
//!   resolve to the default tier's policy.
//! - Tier names are matched after trim + ASCII lowercase.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Resource ceiling for one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum Limit {
    Unlimited,
    Bounded(u64),
}

impl Limit {
    /// Whether one more unit fits when `current` units already exist.
    pub fn allows_another(self, current: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Bounded(max) => current < max,
        }
    }

    /// Whether a resulting total of `total` stays within the ceiling.
    pub fn allows_total(self, total: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Bounded(max) => total <= max,
        }
    }

    /// Units left before the ceiling. `None` means unlimited.
    pub fn remaining(self, current: u64) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Bounded(max) => Some(max.saturating_sub(current)),
        }
    }

    pub fn as_bounded(self) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Bounded(max) => Some(max),
        }
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl Display for Limit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Bounded(max) => write!(f, "{max}"),
        }
    }
}

/// Wire shape: a plain number or the keyword `"unlimited"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(u64),
    Keyword(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = String;

    fn try_from(value: LimitRepr) -> Result<Self, Self::Error> {
        match value {
            LimitRepr::Count(max) => Ok(Self::Bounded(max)),
            LimitRepr::Keyword(keyword) if keyword.trim().eq_ignore_ascii_case("unlimited") => {
                Ok(Self::Unlimited)
            }
            LimitRepr::Keyword(other) => Err(format!(
                "invalid limit `{other}`; expected a non-negative integer or `unlimited`"
            )),
        }
    }
}

impl From<Limit> for LimitRepr {
    fn from(value: Limit) -> Self {
        match value {
            Limit::Unlimited => Self::Keyword("unlimited".to_string()),
            Limit::Bounded(max) => Self::Count(max),
        }
    }
}

/// Named bundle of resource limits and enabled features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub name: String,
    pub max_modules: Limit,
    pub max_notes_per_module: Limit,
    pub max_storage_bytes: Limit,
    #[serde(default)]
    pub features: BTreeSet<String>,
}

impl TierPolicy {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

/// Immutable tier lookup table, built once per process.
#[derive(Debug, Clone)]
pub struct TierPolicyTable {
    policies: BTreeMap<String, TierPolicy>,
    default_tier: String,
}

impl TierPolicyTable {
    /// Builds a table from policies and the name of the fallback tier.
    ///
    /// # Errors
    /// - `EmptyTierTable` when `policies` is empty.
    /// - `DuplicateTier` when two policies normalize to the same name.
    /// - `UnknownDefaultTier` when `default_tier` is not among `policies`.
    pub fn new(policies: Vec<TierPolicy>, default_tier: &str) -> Result<Self, ConfigError> {
        if policies.is_empty() {
            return Err(ConfigError::EmptyTierTable);
        }

        let mut by_name = BTreeMap::new();
        for mut policy in policies {
            let name = normalize_tier_name(&policy.name);
            if name.is_empty() {
                return Err(ConfigError::InvalidTierName(policy.name));
            }
            policy.name = name.clone();
            if by_name.insert(name.clone(), policy).is_some() {
                return Err(ConfigError::DuplicateTier(name));
            }
        }

        let default_tier = normalize_tier_name(default_tier);
        if !by_name.contains_key(&default_tier) {
            return Err(ConfigError::UnknownDefaultTier(default_tier));
        }

        Ok(Self {
            policies: by_name,
            default_tier,
        })
    }

    /// Resolves a tier name, degrading to the default tier when unknown.
    pub fn limits_for(&self, tier_name: &str) -> &TierPolicy {
        self.get(tier_name).unwrap_or_else(|| self.default_policy())
    }

    /// Exact lookup without fallback.
    pub fn get(&self, tier_name: &str) -> Option<&TierPolicy> {
        self.policies.get(&normalize_tier_name(tier_name))
    }

    pub fn contains(&self, tier_name: &str) -> bool {
        self.get(tier_name).is_some()
    }

    pub fn default_policy(&self) -> &TierPolicy {
        // `new` guarantees the default tier is present; the index is total.
        &self.policies[&self.default_tier]
    }

    pub fn default_tier(&self) -> &str {
        self.default_tier.as_str()
    }

    /// Policies sorted by tier name.
    pub fn policies(&self) -> impl Iterator<Item = &TierPolicy> {
        self.policies.values()
    }
}

/// Normalizes a persisted or caller-supplied tier name.
pub fn normalize_tier_name(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Tier table shipped with the binary when no config file is supplied.
pub fn builtin_tiers() -> Vec<TierPolicy> {
    let features = |names: &[&str]| -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    };
    vec![
        TierPolicy {
            name: "free".to_string(),
            max_modules: Limit::Bounded(2),
            max_notes_per_module: Limit::Bounded(20),
            max_storage_bytes: Limit::Bounded(100 * MIB),
            features: features(&["basic_notes"]),
        },
        TierPolicy {
            name: "plus".to_string(),
            max_modules: Limit::Bounded(10),
            max_notes_per_module: Limit::Bounded(200),
            max_storage_bytes: Limit::Bounded(2 * GIB),
            features: features(&["basic_notes", "export", "offline_sync"]),
        },
        TierPolicy {
            name: "pro".to_string(),
            max_modules: Limit::Unlimited,
            max_notes_per_module: Limit::Unlimited,
            max_storage_bytes: Limit::Bounded(20 * GIB),
            features: features(&["basic_notes", "export", "offline_sync", "priority_support"]),
        },
    ]
}
