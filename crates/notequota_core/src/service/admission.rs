//! Pre-flight admission checks.
//!
//! # Responsibility
//! - Compare ledger counters against the account's tier limits before a
//!   mutation is attempted.
//! - Resolve ownership (`Unauthorized`) and existence (`NotFound`) up front.
//!
//! # Invariants
//! - Checks are read-only and never touch counters.
//! - Unknown tier names resolve to the default tier's limits.
//! - A denial carries the current value and the limit.
//! - The pure `evaluate_*` functions are shared with the in-transaction
//!   re-check so both sides apply identical rules.

use crate::error::{QuotaError, QuotaResource, QuotaResult};
use crate::model::ledger::{Account, AccountId, EntityRef, Module, ModuleId};
use crate::model::tier::{Limit, TierPolicy, TierPolicyTable};
use crate::repo::ledger_repo::LedgerRepository;
use log::info;
use serde::Serialize;

/// Admission query input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionQuery {
    pub account_id: AccountId,
    pub module_id: Option<ModuleId>,
    pub candidate_bytes: Option<u64>,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDecision {
    pub allowed: bool,
    #[serde(skip)]
    pub resource: QuotaResource,
    /// Counter value before the attempted addition.
    pub current: u64,
    pub max: Limit,
    /// Size of the attempted addition.
    #[serde(skip)]
    pub requested: u64,
}

impl AdmissionDecision {
    /// Converts a denial into `QuotaExceeded` and logs it.
    pub fn into_result(self, account_id: AccountId) -> QuotaResult<()> {
        if self.allowed {
            return Ok(());
        }
        info!(
            "event=admission_denied module=admission status=rejected account_id={} resource={} current={} requested={} max={}",
            account_id,
            self.resource.as_str(),
            self.current,
            self.requested,
            self.max
        );
        Err(QuotaError::QuotaExceeded {
            resource: self.resource,
            current: self.current,
            requested: self.requested,
            max: self.max,
        })
    }
}

/// `moduleCount < maxModules`.
pub(crate) fn evaluate_module(account: &Account, policy: &TierPolicy) -> AdmissionDecision {
    AdmissionDecision {
        allowed: policy.max_modules.allows_another(account.module_count),
        resource: QuotaResource::Modules,
        current: account.module_count,
        max: policy.max_modules,
        requested: 1,
    }
}

/// `module.noteCount < maxNotesPerModule`.
pub(crate) fn evaluate_note(module: &Module, policy: &TierPolicy) -> AdmissionDecision {
    AdmissionDecision {
        allowed: policy.max_notes_per_module.allows_another(module.note_count),
        resource: QuotaResource::NotesPerModule,
        current: module.note_count,
        max: policy.max_notes_per_module,
        requested: 1,
    }
}

/// `storageUsed + candidate <= maxStorage` and `candidate <= ceiling`.
///
/// The per-file ceiling is checked first so the denial names the tighter
/// constraint when both fail.
pub(crate) fn evaluate_upload(
    account: &Account,
    policy: &TierPolicy,
    candidate_bytes: u64,
    file_size_ceiling_bytes: u64,
) -> AdmissionDecision {
    if candidate_bytes > file_size_ceiling_bytes {
        return AdmissionDecision {
            allowed: false,
            resource: QuotaResource::FileSize,
            current: candidate_bytes,
            max: Limit::Bounded(file_size_ceiling_bytes),
            requested: candidate_bytes,
        };
    }
    let total = account.storage_used_bytes.saturating_add(candidate_bytes);
    AdmissionDecision {
        allowed: policy.max_storage_bytes.allows_total(total),
        resource: QuotaResource::StorageBytes,
        current: account.storage_used_bytes,
        max: policy.max_storage_bytes,
        requested: candidate_bytes,
    }
}

/// Confirms that `module` belongs to `account_id`.
pub(crate) fn ensure_owner(account_id: AccountId, module: &Module) -> QuotaResult<()> {
    if module.account_id != account_id {
        info!(
            "event=admission_denied module=admission status=rejected account_id={} module_id={} reason=unauthorized",
            account_id, module.id
        );
        return Err(QuotaError::Unauthorized {
            account_id,
            module_id: module.id,
        });
    }
    Ok(())
}

/// Read-only admission controller over a ledger repository.
pub struct AdmissionController<'a, R: LedgerRepository> {
    repo: R,
    tiers: &'a TierPolicyTable,
    file_size_ceiling_bytes: u64,
}

impl<'a, R: LedgerRepository> AdmissionController<'a, R> {
    pub fn new(repo: R, tiers: &'a TierPolicyTable, file_size_ceiling_bytes: u64) -> Self {
        Self {
            repo,
            tiers,
            file_size_ceiling_bytes,
        }
    }

    /// True iff the account has room for one more module.
    pub fn can_create_module(&self, account_id: AccountId) -> QuotaResult<AdmissionDecision> {
        let account = self.load_account(account_id)?;
        Ok(evaluate_module(&account, self.tiers.limits_for(&account.tier)))
    }

    /// True iff the module belongs to the account and has room for one more
    /// note.
    ///
    /// # Errors
    /// - `NotFound` when the account or module is missing.
    /// - `Unauthorized` when the module belongs to another account.
    pub fn can_create_note(
        &self,
        account_id: AccountId,
        module_id: ModuleId,
    ) -> QuotaResult<AdmissionDecision> {
        let account = self.load_account(account_id)?;
        let module = self
            .repo
            .get_module(module_id)?
            .ok_or(QuotaError::NotFound(EntityRef::module(module_id)))?;
        ensure_owner(account_id, &module)?;
        Ok(evaluate_note(&module, self.tiers.limits_for(&account.tier)))
    }

    /// True iff the candidate fits both the tier's storage budget and the
    /// absolute per-file ceiling.
    pub fn can_upload_media(
        &self,
        account_id: AccountId,
        candidate_bytes: u64,
    ) -> QuotaResult<AdmissionDecision> {
        let account = self.load_account(account_id)?;
        Ok(evaluate_upload(
            &account,
            self.tiers.limits_for(&account.tier),
            candidate_bytes,
            self.file_size_ceiling_bytes,
        ))
    }

    /// Dispatches a generic admission query.
    ///
    /// `candidate_bytes` selects the upload check, otherwise `module_id`
    /// selects the note check, otherwise the module check runs.
    pub fn check(&self, query: AdmissionQuery) -> QuotaResult<AdmissionDecision> {
        match (query.candidate_bytes, query.module_id) {
            (Some(bytes), _) => self.can_upload_media(query.account_id, bytes),
            (None, Some(module_id)) => self.can_create_note(query.account_id, module_id),
            (None, None) => self.can_create_module(query.account_id),
        }
    }

    fn load_account(&self, account_id: AccountId) -> QuotaResult<Account> {
        self.repo
            .get_account(account_id)?
            .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))
    }
}
