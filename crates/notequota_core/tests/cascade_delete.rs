mod common;

use common::{default_harness, harness};
use notequota_core::{
    open_db_in_memory, EngineConfig, EntityKind, LedgerRepository, QuotaEngine, QuotaError,
    UploadRequest,
};
use rusqlite::Connection;

fn row_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

/// One module with five notes holding 600,000 bytes of media each.
fn seed_module(engine: &QuotaEngine<'_>) -> (notequota_core::Account, notequota_core::Module) {
    let account = engine.create_account(Some("pro")).unwrap();
    let module = engine.create_module(account.id).unwrap();
    let payload = vec![3u8; 600_000];
    for _ in 0..5 {
        let note = engine.create_note(account.id, module.id).unwrap();
        engine
            .upload_media(UploadRequest {
                account_id: account.id,
                note_id: note.id,
                mime_type: "image/jpeg",
                data: &payload,
            })
            .unwrap();
    }
    (engine.account(account.id).unwrap(), module)
}

#[test]
fn module_cascade_applies_counter_delta_in_one_step() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let (before, module) = seed_module(&engine);
    let survivor = engine.create_module(before.id).unwrap();
    let before = engine.account(before.id).unwrap();
    assert_eq!(before.module_count, 2);
    assert_eq!(before.note_count, 5);
    assert_eq!(before.storage_used_bytes, 3_000_000);
    assert_eq!(h.store.len(), 5);

    let report = engine.delete_module(module.id).unwrap();
    assert_eq!(report.entity.kind, EntityKind::Module);
    assert_eq!(report.modules_deleted, 1);
    assert_eq!(report.notes_deleted, 5);
    assert_eq!(report.bytes_released, 3_000_000);
    assert_eq!(report.objects_deleted, 5);
    assert_eq!(report.cleanup_failures, 0);

    let after = engine.account(before.id).unwrap();
    assert_eq!(after.module_count, before.module_count - 1);
    assert_eq!(after.note_count, before.note_count - 5);
    assert_eq!(after.storage_used_bytes, before.storage_used_bytes - 3_000_000);
    assert!(h.store.is_empty());
    assert_eq!(row_count(&conn, "notes"), 0);
    assert_eq!(row_count(&conn, "media_files"), 0);

    // The surviving module slides into the freed position.
    assert_eq!(engine.module(survivor.id).unwrap().position, 0);
    assert!(engine.audit(before.id).unwrap().is_clean());
}

#[test]
fn failure_inside_cascade_leaves_full_pre_state() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let (before, module) = seed_module(&engine);

    let notes = engine
        .repository()
        .list_notes_page(
            module.id,
            notequota_core::NotePage {
                after_position: None,
                limit: 10,
            },
        )
        .unwrap();
    let blocked = notes[3].id;
    conn.execute_batch(&format!(
        "CREATE TRIGGER block_note_delete BEFORE DELETE ON notes
         WHEN old.id = '{blocked}'
         BEGIN SELECT RAISE(ABORT, 'injected'); END;"
    ))
    .unwrap();

    let err = engine.delete_module(module.id).unwrap_err();
    assert!(matches!(err, QuotaError::Db(_)), "got {err:?}");

    let after = engine.account(before.id).unwrap();
    assert_eq!(after.module_count, before.module_count);
    assert_eq!(after.note_count, before.note_count);
    assert_eq!(after.storage_used_bytes, before.storage_used_bytes);
    assert_eq!(engine.module(module.id).unwrap().note_count, 5);
    assert_eq!(row_count(&conn, "notes"), 5);
    assert_eq!(row_count(&conn, "media_files"), 5);
    // Objects are only touched after commit.
    assert_eq!(h.store.len(), 5);

    conn.execute_batch("DROP TRIGGER block_note_delete;").unwrap();
    let report = engine.delete_module(module.id).unwrap();
    assert_eq!(report.notes_deleted, 5);
    assert!(h.store.is_empty());
}

#[test]
fn account_cascade_removes_every_descendant() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let (account, _) = seed_module(&engine);
    let second = engine.create_module(account.id).unwrap();
    engine.create_note(account.id, second.id).unwrap();
    let bystander = engine.create_account(None).unwrap();
    engine.create_module(bystander.id).unwrap();

    let report = engine.delete_account(account.id).unwrap();
    assert_eq!(report.entity.kind, EntityKind::Account);
    assert_eq!(report.modules_deleted, 2);
    assert_eq!(report.notes_deleted, 6);
    assert_eq!(report.bytes_released, 3_000_000);
    assert_eq!(report.objects_deleted, 5);

    assert!(matches!(
        engine.account(account.id),
        Err(QuotaError::NotFound(_))
    ));
    assert_eq!(row_count(&conn, "accounts"), 1);
    assert_eq!(row_count(&conn, "modules"), 1);
    assert_eq!(row_count(&conn, "notes"), 0);
    assert!(h.store.is_empty());
    assert_eq!(engine.account(bystander.id).unwrap().module_count, 1);
}

#[test]
fn small_pages_enumerate_large_modules() {
    let h = harness(EngineConfig {
        cascade_page_size: 2,
        ..EngineConfig::default()
    });
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(Some("pro")).unwrap();
    let module = engine.create_module(account.id).unwrap();
    for index in 0..9u8 {
        let note = engine.create_note(account.id, module.id).unwrap();
        if index % 2 == 0 {
            engine
                .upload_media(UploadRequest {
                    account_id: account.id,
                    note_id: note.id,
                    mime_type: "text/plain",
                    data: &[index; 10],
                })
                .unwrap();
        }
    }

    let report = engine.delete_module(module.id).unwrap();
    assert_eq!(report.notes_deleted, 9);
    assert_eq!(report.bytes_released, 50);
    assert_eq!(report.objects_deleted, 5);

    let after = engine.account(account.id).unwrap();
    assert_eq!(after.module_count, 0);
    assert_eq!(after.note_count, 0);
    assert_eq!(after.storage_used_bytes, 0);
}

#[test]
fn single_note_delete_releases_its_media() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let (account, module) = seed_module(&engine);
    let victim = engine
        .repository()
        .list_notes_page(
            module.id,
            notequota_core::NotePage {
                after_position: None,
                limit: 1,
            },
        )
        .unwrap()
        .remove(0);

    let deleted = engine.delete_note(victim.id).unwrap();
    assert_eq!(deleted.bytes_released, 600_000);
    assert_eq!(h.store.len(), 4);

    let after = engine.account(account.id).unwrap();
    assert_eq!(after.note_count, 4);
    assert_eq!(after.storage_used_bytes, 2_400_000);
    assert_eq!(engine.module(module.id).unwrap().note_count, 4);

    let positions: Vec<u64> = engine
        .repository()
        .list_notes_page(
            module.id,
            notequota_core::NotePage {
                after_position: None,
                limit: 10,
            },
        )
        .unwrap()
        .iter()
        .map(|note| note.position)
        .collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
}

#[test]
fn parent_deletes_through_the_mutator_are_refused() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    let account = engine.create_account(None).unwrap();
    let module = engine.create_module(account.id).unwrap();

    let mutator = notequota_core::TransactionalMutator::new(&conn, Default::default());
    assert!(matches!(
        mutator.delete(EntityKind::Module, module.id),
        Err(QuotaError::InvalidRequest(_))
    ));
    assert!(matches!(
        mutator.delete(EntityKind::Account, account.id),
        Err(QuotaError::InvalidRequest(_))
    ));
    assert_eq!(engine.account(account.id).unwrap().module_count, 1);
}
