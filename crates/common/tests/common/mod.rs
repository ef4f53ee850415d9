//! Shared helpers for store integration tests
#![allow(dead_code)]

use std::path::PathBuf;

use common::kv::Store;
use tempfile::TempDir;

/// A fresh on-disk store inside its own temp directory.
pub async fn setup_store() -> (Store, PathBuf, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("beacon.db");
    let store = Store::open(&path).await.unwrap();
    (store, path, dir)
}

/// Reopen the store at `path`, as a restarted process would.
pub async fn reopen(store: Store, path: &PathBuf) -> Store {
    drop(store);
    Store::open(path).await.unwrap()
}
