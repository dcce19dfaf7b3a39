use std::path::Path;

use hourglass::db::{
    apply_migrations, Storage, StorageError, UserInput, UserStore, UserUpdate, DEFAULT_BUSY_TIMEOUT,
};

fn migrated(path: &Path) -> Storage {
    let mut storage = Storage::open(path, DEFAULT_BUSY_TIMEOUT).unwrap();
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    apply_migrations(storage.connection_mut(), &migrations).unwrap();
    storage
}

fn input(id: Option<i64>, username: &str, email: &str) -> UserInput {
    UserInput {
        id,
        username: username.to_string(),
        email: email.to_string(),
    }
}

#[test]
fn test_save_inserts_then_updates() {
    let dir = tempfile::tempdir().unwrap();
    let storage = migrated(&dir.path().join("users.db"));
    let store = UserStore::new(storage.connection());

    let created = store.save(&input(None, "ada", "ada@example.com")).unwrap();
    let updated = store
        .save(&input(Some(created.id), "ada", "ada@lovelace.org"))
        .unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.email, "ada@lovelace.org");
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);
    assert_eq!(store.list().unwrap(), vec![updated]);
}

#[test]
fn test_partial_update_keeps_other_fields() {
    let dir = tempfile::tempdir().unwrap();
    let storage = migrated(&dir.path().join("users.db"));
    let store = UserStore::new(storage.connection());

    let user = store.save(&input(None, "grace", "grace@example.com")).unwrap();
    let renamed = store
        .update_by_id(
            user.id,
            &UserUpdate {
                username: Some("hopper".to_string()),
                email: None,
            },
        )
        .unwrap();

    assert_eq!(renamed.username, "hopper");
    assert_eq!(renamed.email, "grace@example.com");
}

#[test]
fn test_rename_onto_existing_username_is_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let storage = migrated(&dir.path().join("users.db"));
    let store = UserStore::new(storage.connection());

    store.save(&input(None, "first", "first@example.com")).unwrap();
    let second = store.save(&input(None, "second", "second@example.com")).unwrap();

    let err = store
        .save(&input(Some(second.id), "first", "second@example.com"))
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)), "{err:?}");
    assert_eq!(store.get_by_id(second.id).unwrap().username, "second");
}

#[test]
fn test_records_survive_reopen_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.db");

    let id = {
        let storage = migrated(&path);
        let id = UserStore::new(storage.connection())
            .save(&input(None, "linus", "linus@example.com"))
            .unwrap()
            .id;
        storage.close().unwrap();
        id
    };

    let storage = Storage::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
    let store = UserStore::new(storage.connection());
    assert_eq!(store.get_by_id(id).unwrap().username, "linus");

    store.delete_by_id(id).unwrap();
    assert!(store.list().unwrap().is_empty());
    assert!(matches!(
        store.delete_by_id(id),
        Err(StorageError::NotFound { .. })
    ));
}
