// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! `fieldcast check`: a read-only consistency sweep over the metadata
//! store — recording segments whose file is missing on disk, and `ready`
//! videos whose local artifacts have disappeared out from under the store.
//! Reports problems; fixes none (no `--trash`/`--delete` flags, unlike the
//! teacher's `db::check`, since this store's rows are cheap to regenerate
//! from the next scheduler tick rather than requiring manual repair).

use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;
use tracing::warn;

#[derive(Bpaf, Debug)]
#[bpaf(command("check"))]
pub struct Args {
    #[bpaf(external(crate::parse_db_dir))]
    db_dir: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let store = super::open_store(&args.db_dir, false)?;
    let mut problems = 0;

    for camera in store.list_cameras(false)? {
        for segment in store.segments_older_than(&camera.name, jiff::Timestamp::now())? {
            if !std::path::Path::new(&segment.mp4_path).exists() {
                warn!(camera = %camera.name, path = %segment.mp4_path, "recording_segment row has no backing file");
                problems += 1;
            }
        }
    }

    for video in store.ready_videos_older_than(jiff::Timestamp::now())? {
        if let Some(path) = &video.local_path {
            if !std::path::Path::new(path).exists() {
                warn!(unique_id = %video.unique_id, path, "ready video row has no backing local file");
                problems += 1;
            }
        }
    }

    if problems == 0 {
        tracing::info!("no problems found");
        Ok(0)
    } else {
        tracing::error!(problems, "problems found");
        Ok(1)
    }
}
