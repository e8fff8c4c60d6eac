// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

use base::Error;
use std::path::Path;

pub fn run(db_dir: &Path) -> Result<i32, Error> {
    let store = super::super::open_store(db_dir, false)?;
    let active = store.active_disk()?;
    for disk in store.list_disks()? {
        let marker = match &active {
            Some(a) if a.id == disk.id => "*",
            _ => " ",
        };
        println!(
            "{marker} [{}] {:<40} {:>8.1}/{:<8.1} GiB free priority={} last_scan={}",
            disk.id,
            disk.path,
            disk.available_gb,
            disk.total_gb,
            disk.priority_order,
            disk.last_scan.map(|t| t.to_string()).unwrap_or_else(|| "never".to_string()),
        );
    }
    Ok(0)
}
