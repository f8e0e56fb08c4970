mod common;

use common::{default_harness, harness, small_config};
use notequota_core::{
    open_db_in_memory, AdmissionQuery, Limit, QuotaError, QuotaResource, UploadRequest,
};
use uuid::Uuid;

#[test]
fn module_admission_boundary_at_two() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(Some("free")).unwrap();

    assert!(engine.can_create_module(account.id).unwrap().allowed);
    engine.create_module(account.id).unwrap();
    assert!(engine.can_create_module(account.id).unwrap().allowed);
    engine.create_module(account.id).unwrap();

    let decision = engine.can_create_module(account.id).unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.current, 2);
    assert_eq!(decision.max, Limit::Bounded(2));
}

#[test]
fn tier_upgrade_flips_admission_without_counter_change() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(Some("free")).unwrap();
    engine.create_module(account.id).unwrap();
    engine.create_module(account.id).unwrap();

    assert!(!engine.can_create_module(account.id).unwrap().allowed);
    let err = engine.create_module(account.id).unwrap_err();
    assert!(matches!(
        err,
        QuotaError::QuotaExceeded {
            resource: QuotaResource::Modules,
            current: 2,
            max: Limit::Bounded(2),
            ..
        }
    ));

    let before = engine.account(account.id).unwrap();
    let upgraded = engine.change_tier(account.id, "pro").unwrap();
    assert_eq!(upgraded.tier, "pro");
    assert_eq!(upgraded.module_count, before.module_count);
    assert_eq!(upgraded.note_count, before.note_count);
    assert_eq!(upgraded.storage_used_bytes, before.storage_used_bytes);

    let decision = engine.can_create_module(account.id).unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.max, Limit::Unlimited);
}

#[test]
fn unknown_tier_name_is_rejected_on_change() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(None).unwrap();
    assert_eq!(account.tier, "free");

    let err = engine.change_tier(account.id, "platinum").unwrap_err();
    assert!(matches!(err, QuotaError::InvalidRequest(_)));
}

#[test]
fn legacy_tier_value_degrades_to_default_limits() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(Some("pro")).unwrap();
    conn.execute(
        "UPDATE accounts SET tier = 'legacy-gold' WHERE id = ?1;",
        [account.id.to_string()],
    )
    .unwrap();

    let decision = engine.can_create_module(account.id).unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.max, Limit::Bounded(2));
    assert_eq!(engine.usage(account.id).unwrap().tier, "free");
}

#[test]
fn note_admission_checks_ownership_and_existence() {
    let h = harness(small_config());
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let owner = engine.create_account(None).unwrap();
    let stranger = engine.create_account(None).unwrap();
    let module = engine.create_module(owner.id).unwrap();

    let err = engine.can_create_note(stranger.id, module.id).unwrap_err();
    assert!(matches!(
        err,
        QuotaError::Unauthorized { account_id, module_id }
            if account_id == stranger.id && module_id == module.id
    ));
    let err = engine.create_note(stranger.id, module.id).unwrap_err();
    assert!(matches!(err, QuotaError::Unauthorized { .. }));

    let missing = Uuid::new_v4();
    assert!(matches!(
        engine.can_create_note(owner.id, missing),
        Err(QuotaError::NotFound(_))
    ));
    assert!(matches!(
        engine.can_create_module(missing),
        Err(QuotaError::NotFound(_))
    ));
}

#[test]
fn notes_per_module_limit_is_enforced() {
    let h = harness(small_config());
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(None).unwrap();
    let module = engine.create_module(account.id).unwrap();

    for expected_position in 0..3 {
        let note = engine.create_note(account.id, module.id).unwrap();
        assert_eq!(note.position, expected_position);
    }
    let err = engine.create_note(account.id, module.id).unwrap_err();
    assert!(matches!(
        err,
        QuotaError::QuotaExceeded {
            resource: QuotaResource::NotesPerModule,
            current: 3,
            max: Limit::Bounded(3),
            ..
        }
    ));
    assert_eq!(engine.module(module.id).unwrap().note_count, 3);
}

#[test]
fn upload_admission_respects_budget_and_file_ceiling() {
    let h = harness(small_config());
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(None).unwrap();
    let module = engine.create_module(account.id).unwrap();
    let note = engine.create_note(account.id, module.id).unwrap();

    assert!(engine.can_upload_media(account.id, 4_000).unwrap().allowed);
    let ceiling = engine.can_upload_media(account.id, 4_001).unwrap();
    assert!(!ceiling.allowed);
    assert_eq!(ceiling.resource, QuotaResource::FileSize);

    for _ in 0..2 {
        engine
            .upload_media(UploadRequest {
                account_id: account.id,
                note_id: note.id,
                mime_type: "image/png",
                data: &[7u8; 4_000],
            })
            .unwrap();
    }
    let decision = engine.admission_query(AdmissionQuery {
        account_id: account.id,
        module_id: None,
        candidate_bytes: Some(2_001),
    });
    let decision = decision.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.current, 8_000);
    assert_eq!(decision.max, Limit::Bounded(10_000));

    let err = engine
        .upload_media(UploadRequest {
            account_id: account.id,
            note_id: note.id,
            mime_type: "image/png",
            data: &[1u8; 2_001],
        })
        .unwrap_err();
    assert!(matches!(
        err,
        QuotaError::QuotaExceeded {
            resource: QuotaResource::StorageBytes,
            current: 8_000,
            requested: 2_001,
            ..
        }
    ));
    // Rejected before the object write.
    assert_eq!(h.store.len(), 2);
}

#[test]
fn unsupported_media_type_is_rejected_before_storage() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(Some("plus")).unwrap();
    let module = engine.create_module(account.id).unwrap();
    let note = engine.create_note(account.id, module.id).unwrap();

    let err = engine
        .upload_media(UploadRequest {
            account_id: account.id,
            note_id: note.id,
            mime_type: "application/x-msdownload",
            data: b"MZ",
        })
        .unwrap_err();
    assert!(matches!(err, QuotaError::UnsupportedMediaType(_)));
    assert!(h.store.is_empty());
}

#[test]
fn admission_query_dispatches_by_input() {
    let h = harness(small_config());
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(None).unwrap();
    let module = engine.create_module(account.id).unwrap();

    let modules = engine
        .admission_query(AdmissionQuery {
            account_id: account.id,
            module_id: None,
            candidate_bytes: None,
        })
        .unwrap();
    assert_eq!(modules.resource, QuotaResource::Modules);
    assert_eq!(modules.current, 1);

    let notes = engine
        .admission_query(AdmissionQuery {
            account_id: account.id,
            module_id: Some(module.id),
            candidate_bytes: None,
        })
        .unwrap();
    assert_eq!(notes.resource, QuotaResource::NotesPerModule);
    assert_eq!(notes.max, Limit::Bounded(3));

    let json = serde_json::to_value(notes).unwrap();
    assert_eq!(json["allowed"], true);
    assert_eq!(json["current"], 0);
    assert_eq!(json["max"], 3);
}
