// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! The per-venue watermark cache (`SPEC_FULL.md` §4.5.11): fetched once from
//! the remote API and cached on the active disk, refetched only if missing
//! or older than 24h, so a down remote API doesn't block every booking.

use crate::remote::RemoteApi;
use base::{Error, ErrorKind, ResultExt};
use db::{Store, StorageDisk};
use jiff::Timestamp;
use std::path::{Path, PathBuf};

const MAX_AGE_SECS: i64 = 24 * 3600;

fn cache_path(disk: &StorageDisk, venue_code: &str) -> PathBuf {
    Path::new(&disk.path).join("watermark").join(format!("{venue_code}.png"))
}

fn last_fetched_key(venue_code: &str) -> String {
    format!("watermark_fetched_at_{venue_code}")
}

/// Returns a path to the cached watermark PNG for `venue_code`, fetching a
/// fresh copy from `remote` first if the cache is missing or stale.
pub async fn cached_path(
    store: &Store,
    remote: &RemoteApi,
    disk: &StorageDisk,
    venue_code: &str,
) -> Result<PathBuf, Error> {
    let path = cache_path(disk, venue_code);
    let last_fetched = store
        .get_config_str(&last_fetched_key(venue_code))?
        .and_then(|s| s.parse::<Timestamp>().ok());
    let stale = match last_fetched {
        Some(t) => (Timestamp::now().as_second() - t.as_second()) > MAX_AGE_SECS,
        None => true,
    };
    if !stale && tokio::fs::metadata(&path).await.is_ok() {
        return Ok(path);
    }

    let bytes = remote.get_watermark(venue_code).await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .err_context(ErrorKind::Transient, format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(&path, &bytes)
        .await
        .err_context(ErrorKind::Transient, format!("writing {}", path.display()))?;
    store.set_config(&last_fetched_key(venue_code), &Timestamp::now().to_string())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_is_keyed_by_venue() {
        let disk = StorageDisk {
            id: 1,
            path: "/mnt/fast".into(),
            total_gb: 1.0,
            available_gb: 1.0,
            priority_order: 0,
            is_active: true,
            last_scan: None,
        };
        assert_eq!(cache_path(&disk, "acme-sports"), PathBuf::from("/mnt/fast/watermark/acme-sports.png"));
    }
}
