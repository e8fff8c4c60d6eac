// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! `fieldcast init`: creates the metadata store and seeds it from the
//! configuration file, so a fresh venue install has its camera roster and
//! venue credentials in place before `fieldcast run` ever starts.

use crate::config;
use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;
use tracing::info;

#[derive(Bpaf, Debug)]
#[bpaf(command("init"))]
pub struct Args {
    #[bpaf(external(crate::parse_db_dir))]
    db_dir: PathBuf,

    #[bpaf(external(crate::parse_config_path))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let store = super::open_store(&args.db_dir, true)?;
    let cfg = config::read(&args.config)?;
    cfg.seed_store(&store)?;
    info!(
        cameras = cfg.cameras.len(),
        db_dir = %args.db_dir.display(),
        "metadata store initialized and seeded from config"
    );
    Ok(0)
}
