// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{FileStorage, MemoryStorage, Storage, StorageChange};

#[test]
fn memory_round_trips_and_removes() -> anyhow::Result<()> {
    let storage = MemoryStorage::new();
    storage.set("accessToken", "abc")?;
    assert_eq!(storage.get("accessToken")?.as_deref(), Some("abc"));
    storage.remove("accessToken")?;
    assert_eq!(storage.get("accessToken")?, None);
    Ok(())
}

#[tokio::test]
async fn memory_broadcasts_mutations() -> anyhow::Result<()> {
    let storage = MemoryStorage::new();
    let mut rx = storage.subscribe().ok_or_else(|| anyhow::anyhow!("no subscription"))?;

    storage.set("refreshToken", "r1")?;
    storage.remove("refreshToken")?;
    // Removing an absent key is silent.
    storage.remove("refreshToken")?;

    assert_eq!(rx.recv().await?, StorageChange { key: Some("refreshToken".into()) });
    assert_eq!(rx.recv().await?, StorageChange { key: Some("refreshToken".into()) });
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[test]
fn file_storage_missing_file_is_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::new(dir.path().join("session.json"));
    assert_eq!(storage.get("accessToken")?, None);
    // Removing from a missing file does not create it.
    storage.remove("accessToken")?;
    assert!(!storage.path().exists());
    Ok(())
}

#[test]
fn file_storage_persists_across_instances() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested/session.json");

    let first = FileStorage::new(&path);
    first.set("accessToken", "a1")?;
    first.set("refreshToken", "r1")?;

    let second = FileStorage::new(&path);
    assert_eq!(second.get("accessToken")?.as_deref(), Some("a1"));
    second.remove("accessToken")?;

    // Read-through: the first instance observes the second's write.
    assert_eq!(first.get("accessToken")?, None);
    assert_eq!(first.get("refreshToken")?.as_deref(), Some("r1"));
    Ok(())
}

#[test]
fn file_storage_leaves_no_temp_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::new(dir.path().join("session.json"));
    for i in 0..5 {
        storage.set("accessToken", &format!("token-{i}"))?;
    }
    let names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["session.json".to_owned()]);
    Ok(())
}

#[test]
fn file_storage_rejects_corrupt_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{not json")?;
    let storage = FileStorage::new(&path);
    assert!(storage.get("accessToken").is_err());
    Ok(())
}
