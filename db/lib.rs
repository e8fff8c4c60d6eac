// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

#![cfg_attr(all(feature = "nightly", test), feature(test))]

//! The Metadata Store: SQLite schema, migrations, and typed CRUD for every
//! entity in the data model, plus the Disk Manager (`dir`), since disk rows
//! and segment rows are store-owned.

pub mod dir;
mod schema;
mod store;

pub use crate::store::{
    Booking, BookingStatus, Camera, PendingTask, RecordingSegment, StorageDisk, Store,
    SystemConfig, TaskStatus, Video, VideoStatus, VideoType,
};
