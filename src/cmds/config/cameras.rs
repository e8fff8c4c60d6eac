// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

use base::Error;
use std::path::Path;

pub fn run(db_dir: &Path) -> Result<i32, Error> {
    let store = super::super::open_store(db_dir, false)?;
    for camera in store.list_cameras(false)? {
        println!(
            "{:<20} field={:<10} button={:<4} {}:{}{} [{}x{} @{}fps {}] {}",
            camera.name,
            camera.field_id,
            camera.button_no.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            camera.ip,
            camera.port,
            camera.path,
            camera.width,
            camera.height,
            camera.frame_rate,
            camera.codec,
            if camera.enabled { "enabled" } else { "disabled" },
        );
    }
    Ok(0)
}
