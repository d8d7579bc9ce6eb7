//! Integration tests for the file-backed entry repository.

use chrono::Utc;
use tempfile::TempDir;
use transfer_store::error::Error;
use transfer_store::model::{TransferEntry, WorkerId};
use transfer_store::repository::EntryRepository;

fn entry(id: &str) -> TransferEntry {
    TransferEntry::new(id, "S1", "R1", Utc::now())
}

#[test]
fn save_then_load_returns_same_entry() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());

    let mut original = entry("t1");
    original.claim(&WorkerId::new("w1"), Utc::now()).unwrap();
    repo.save(&original).unwrap();

    let loaded = repo.load("t1").unwrap().unwrap();
    assert_eq!(loaded, original);
}

#[test]
fn save_creates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("a").join("b");
    let repo = EntryRepository::new(&nested);

    repo.save(&entry("t1")).unwrap();
    assert!(nested.join("transfer_t1.json").exists());
}

#[test]
fn files_are_compact_camel_case_json() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    repo.save(&entry("t1")).unwrap();

    let raw = std::fs::read_to_string(repo.path_for("t1")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["id"], "t1");
    assert_eq!(value["senderId"], "S1");
    assert_eq!(value["receiverId"], "R1");
    assert_eq!(value["confirmed"], false);
    assert_eq!(value["claimed"], false);
    assert!(value["claimedBy"].is_null());
    assert!(!raw.contains('\n'));
}

#[test]
fn overwrite_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    let mut e = entry("t1");
    repo.save(&e).unwrap();
    e.confirm(Utc::now());
    repo.save(&e).unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|d| d.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, ["transfer_t1.json"]);
    assert!(repo.load("t1").unwrap().unwrap().confirmed);
}

#[test]
fn load_missing_is_none() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    assert!(repo.load("nope").unwrap().is_none());
}

#[test]
fn similar_ids_get_separate_files() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());

    for id in ["a b", "a_b", "a%20b", "a/b", "a:b"] {
        repo.save(&entry(id)).unwrap();
    }
    for id in ["a b", "a_b", "a%20b", "a/b", "a:b"] {
        assert_eq!(repo.load(id).unwrap().unwrap().id, id);
    }
    assert_eq!(repo.scan().unwrap().len(), 5);
}

#[test]
fn load_rejects_file_holding_another_id() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    repo.save(&entry("x")).unwrap();
    std::fs::copy(repo.path_for("x"), repo.path_for("y")).unwrap();

    assert!(repo.load("y").unwrap().is_none());
    let ids: Vec<String> = repo.scan().unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, ["x"]);
}

#[test]
fn save_refuses_to_replace_another_transfer() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    repo.save(&entry("x")).unwrap();
    std::fs::copy(repo.path_for("x"), repo.path_for("y")).unwrap();

    let err = repo.save(&entry("y")).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");

    let raw = std::fs::read_to_string(repo.path_for("y")).unwrap();
    let kept: TransferEntry = serde_json::from_str(&raw).unwrap();
    assert_eq!(kept.id, "x");
}

#[test]
fn load_tolerates_missing_optional_fields() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    std::fs::write(
        repo.path_for("legacy"),
        r#"{"id":"legacy","senderId":"S1","receiverId":"R1","createdAt":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let loaded = repo.load("legacy").unwrap().unwrap();
    assert!(!loaded.confirmed);
    assert!(!loaded.claimed);
    assert!(loaded.claimed_by.is_none());
}

#[test]
fn delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    repo.save(&entry("t1")).unwrap();

    repo.delete("t1").unwrap();
    assert!(!repo.path_for("t1").exists());
    repo.delete("t1").unwrap();
}

#[test]
fn scan_of_missing_directory_is_empty() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path().join("never-created"));
    assert!(repo.scan().unwrap().is_empty());
}

#[test]
fn scan_skips_corrupt_and_foreign_files() {
    let dir = TempDir::new().unwrap();
    let repo = EntryRepository::new(dir.path());
    repo.save(&entry("t1")).unwrap();
    repo.save(&entry("t2")).unwrap();

    std::fs::write(dir.path().join("transfer_broken.json"), b"{\"id\":").unwrap();
    std::fs::write(dir.path().join("transfer_empty.json"), b"").unwrap();
    std::fs::write(
        dir.path().join("transfer_noid.json"),
        r#"{"id":"","senderId":"S1","receiverId":"R1","createdAt":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("readme.md"), b"not an entry").unwrap();

    let mut ids: Vec<String> = repo.scan().unwrap().into_iter().map(|e| e.id).collect();
    ids.sort();
    assert_eq!(ids, ["t1", "t2"]);
}
