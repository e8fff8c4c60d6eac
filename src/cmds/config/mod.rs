// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! `fieldcast config`: read-only inspection of the metadata store's camera
//! roster and storage disks. Unlike the teacher's `cursive`-based
//! interactive editor, cameras and disks here are edited by re-running
//! `fieldcast init` against an updated config file (spec §3: "mutable by
//! admin via hot-reload" of the TOML file, not an in-process TUI) — these
//! subcommands exist for an operator to confirm what's currently loaded.

use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;

mod cameras;
mod dirs;

#[derive(Bpaf, Debug)]
#[bpaf(command("config"))]
pub enum Args {
    #[bpaf(command("cameras"))]
    Cameras {
        #[bpaf(external(crate::parse_db_dir))]
        db_dir: PathBuf,
    },
    #[bpaf(command("dirs"))]
    Dirs {
        #[bpaf(external(crate::parse_db_dir))]
        db_dir: PathBuf,
    },
}

pub fn run(args: Args) -> Result<i32, Error> {
    match args {
        Args::Cameras { db_dir } => cameras::run(&db_dir),
        Args::Dirs { db_dir } => dirs::run(&db_dir),
    }
}
