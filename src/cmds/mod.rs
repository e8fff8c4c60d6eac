// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

use base::{Error, ErrorKind, ResultExt};
use db::Store;
use std::path::Path;
use tracing::info;

pub mod check;
pub mod config;
pub mod init;
pub mod run;

/// Opens the metadata store at `db_dir/fieldcast.db`, creating the
/// directory (and, via `Store::open`'s own idempotent schema init, the
/// database file and tables) if `create` is set — otherwise errors out
/// pointing at `init`.
fn open_store(db_dir: &Path, create: bool) -> Result<Store, Error> {
    if create {
        std::fs::create_dir_all(db_dir)
            .err_context(ErrorKind::Configuration, format!("creating db dir {}", db_dir.display()))?;
    } else if !db_dir.is_dir() {
        return Err(base::format_err_t!(
            Configuration,
            "db dir {} not found; try running `fieldcast init` first",
            db_dir.display()
        ));
    }
    let db_path = db_dir.join("fieldcast.db");
    info!(path = %db_path.display(), "opening metadata store");
    Store::open(&db_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_store_without_create_errors_on_missing_dir() {
        let tmpdir = tempfile::Builder::new().prefix("fieldcast-test").tempdir().unwrap();
        let mut missing = tmpdir.path().to_path_buf();
        missing.push("nonexistent");
        let err = open_store(&missing, false).unwrap_err();
        assert!(err.to_string().contains("fieldcast init"), "unexpected error {err}");
    }

    #[test]
    fn open_store_with_create_initializes_schema() {
        let tmpdir = tempfile::Builder::new().prefix("fieldcast-test").tempdir().unwrap();
        let mut dir = tmpdir.path().to_path_buf();
        dir.push("db");
        let store = open_store(&dir, true).unwrap();
        assert!(store.list_cameras(false).unwrap().is_empty());
    }
}
