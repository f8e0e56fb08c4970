//! Usage report for one account.

use crate::error::{QuotaError, QuotaResult};
use crate::model::ledger::{AccountId, EntityRef, ModuleId};
use crate::model::tier::{Limit, TierPolicyTable};
use crate::repo::ledger_repo::LedgerRepository;
use serde::Serialize;

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterUsage {
    pub current: u64,
    pub max: Limit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUsage {
    pub module_id: ModuleId,
    pub current: u64,
    pub max: Limit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesPerModuleUsage {
    pub max: Limit,
    pub per_module: Vec<ModuleUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub current: u64,
    pub max: Limit,
    pub current_formatted: String,
    pub max_formatted: String,
}

/// Current counters against the effective tier's limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    /// Effective tier. An unknown persisted tier reports the default tier.
    pub tier: String,
    pub features: Vec<String>,
    pub modules: CounterUsage,
    pub notes_per_module: NotesPerModuleUsage,
    pub storage: StorageUsage,
}

/// Builds the usage report from ledger counters. Read-only.
pub fn usage_report<R: LedgerRepository>(
    repo: &R,
    tiers: &TierPolicyTable,
    account_id: AccountId,
) -> QuotaResult<UsageReport> {
    let account = repo
        .get_account(account_id)?
        .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))?;
    let policy = tiers.limits_for(&account.tier);
    let per_module = repo
        .list_modules(account_id)?
        .into_iter()
        .map(|module| ModuleUsage {
            module_id: module.id,
            current: module.note_count,
            max: policy.max_notes_per_module,
        })
        .collect();

    Ok(UsageReport {
        tier: policy.name.clone(),
        features: policy.features.iter().cloned().collect(),
        modules: CounterUsage {
            current: account.module_count,
            max: policy.max_modules,
        },
        notes_per_module: NotesPerModuleUsage {
            max: policy.max_notes_per_module,
            per_module,
        },
        storage: StorageUsage {
            current: account.storage_used_bytes,
            max: policy.max_storage_bytes,
            current_formatted: format_bytes(account.storage_used_bytes),
            max_formatted: format_limit_bytes(policy.max_storage_bytes),
        },
    })
}

/// Formats a byte count with 1024-based units and one decimal.
///
/// Values under 1 KB print as whole bytes (`"512 B"`).
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", BYTE_UNITS[unit])
}

pub fn format_limit_bytes(limit: Limit) -> String {
    match limit {
        Limit::Unlimited => "Unlimited".to_string(),
        Limit::Bounded(bytes) => format_bytes(bytes),
    }
}
