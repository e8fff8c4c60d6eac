// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! The Capture Supervisor (spec §4.3): one long-lived task per enabled
//! camera, recording to time-aligned segments on whichever disk the Disk
//! Manager currently has active.
//!
//! Grounded in the teacher's `streamer.rs` for the overall
//! probe-then-record-then-restart-on-failure shape, but running as a
//! `tokio::spawn`ed task rather than an OS thread (`SPEC_FULL.md` §5: the
//! teacher's thread-per-camera design exists only because its in-process
//! RTSP demuxer historically blocked, which doesn't apply when both the
//! probe and the transcoder subprocess are non-blocking).

use crate::probe;
use crate::transcoder::Transcoder;
use base::{Error, ResultExt};
use db::{Camera, RecordingSegment, Store, StorageDisk};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// The process-wide storage-root variable (spec §4.2, design note #9): the
/// Scheduler publishes the newly-elected active disk here after every scan;
/// every Capture Supervisor holds a receiver and reads it once per capture
/// cycle start, so an active-disk change takes effect on a supervisor's next
/// restart without restarting the whole process.
pub type ActiveDiskRx = watch::Receiver<Option<StorageDisk>>;
pub type ActiveDiskTx = watch::Sender<Option<StorageDisk>>;

pub fn active_disk_channel(initial: Option<StorageDisk>) -> (ActiveDiskTx, ActiveDiskRx) {
    watch::channel(initial)
}

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);
const SEGMENT_EXT: &str = "mp4";

pub struct Supervisor {
    pub store: Arc<Store>,
    pub transcoder: Transcoder,
    pub camera: Camera,
    pub active_disk_rx: ActiveDiskRx,
    pub shutdown_rx: base::shutdown::Receiver,
    pub segment_secs: u32,
}

impl Supervisor {
    /// Runs until shutdown. Never returns an error: every failure is logged
    /// and retried per spec §4.3 step 6 ("no error is allowed to kill a
    /// worker").
    pub async fn run(mut self) {
        loop {
            if self.shutdown_rx.check().is_err() {
                info!(camera = %self.camera.name, "capture supervisor shutting down");
                return;
            }
            if let Err(e) = self.cycle().await {
                warn!(camera = %self.camera.name, error = %e.chain(), "capture cycle failed, retrying after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = self.shutdown_rx.cancelled() => return,
                }
            }
        }
    }

    /// One probe-then-record cycle: returns once the transcoder subprocess
    /// exits (network loss, camera unreachable, or shutdown), per spec §4.3
    /// step 6 ("on process exit... restart from step 1").
    async fn cycle(&mut self) -> Result<(), Error> {
        let active_disk = self
            .active_disk_rx
            .borrow()
            .clone()
            .ok_or_else(|| base::format_err_t!(Transient, "no active storage disk yet"))?;
        let (output_dir, disk_id) = db::dir::recording_path(&active_disk, &self.camera.name);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .err_context(base::ErrorKind::Transient, format!("creating {}", output_dir.display()))?;

        let url: url::Url = self
            .camera
            .rtsp_url()
            .parse()
            .err_context(base::ErrorKind::Configuration, "camera RTSP URL")?;
        probe::probe(&url).await?;

        let mut child = self.transcoder.spawn_segmented_capture(
            &self.camera.rtsp_url(),
            &output_dir,
            &self.camera.name,
            self.segment_secs,
            SEGMENT_EXT,
        )?;

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut poll = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.err_context(base::ErrorKind::Transient, "waiting for transcoder")?;
                    self.scan_closed_segments(&output_dir, disk_id, &mut seen).await;
                    return Err(base::format_err_t!(Transient, "transcoder exited with {status}"));
                }
                _ = poll.tick() => {
                    self.scan_closed_segments(&output_dir, disk_id, &mut seen).await;
                }
                _ = self.shutdown_rx.cancelled() => {
                    info!(camera = %self.camera.name, "sending graceful terminate to transcoder");
                    if let Some(pid) = child.id() {
                        let _ = nix::sys::signal::kill(
                            nix::unistd::Pid::from_raw(pid as i32),
                            nix::sys::signal::Signal::SIGTERM,
                        );
                    }
                    let _ = tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await;
                    let _ = child.start_kill();
                    self.scan_closed_segments(&output_dir, disk_id, &mut seen).await;
                    return Ok(());
                }
            }
        }
    }

    /// Registers every segment file that isn't the most-recently-created one
    /// (assumed still open) into the Store (spec §4.3 step 5). Errors here
    /// don't abort capture, matching "errors in recording do not abort
    /// capture".
    async fn scan_closed_segments(&self, dir: &std::path::Path, disk_id: i64, seen: &mut BTreeSet<String>) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) => {
                warn!(camera = %self.camera.name, error = %e, "unable to poll segment directory");
                return;
            }
        };
        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(&format!("{}_", self.camera.name)) && name.ends_with(&format!(".{SEGMENT_EXT}")) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        // The lexicographically-last file shares the `<camera>_<timestamp>`
        // naming scheme, so it's also the most recent and presumed still open.
        let Some((_last, closed)) = files.split_last() else { return };
        for name in closed {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Err(e) = self.register_segment(dir, name, disk_id).await {
                warn!(camera = %self.camera.name, file = %name, error = %e.chain(), "failed to register closed segment");
                seen.remove(name);
            }
        }
    }

    async fn register_segment(&self, dir: &std::path::Path, name: &str, disk_id: i64) -> Result<(), Error> {
        let segment_start = parse_segment_start(&self.camera.name, name)?;
        let segment_end = segment_start + jiff::Span::new().seconds(self.segment_secs as i64);
        let path = dir.join(name);
        let metadata = tokio::fs::metadata(&path)
            .await
            .err_context(base::ErrorKind::Transient, format!("stat {}", path.display()))?;
        self.store.insert_segment(&RecordingSegment {
            id: 0,
            camera_name: self.camera.name.clone(),
            storage_disk_id: disk_id,
            mp4_path: path.to_string_lossy().into_owned(),
            segment_start,
            segment_end,
            file_size_bytes: metadata.len() as i64,
        })
    }
}

/// Parses `<camera>_<YYYYMMDD_HHMMSS>.<ext>` into the segment's start time
/// (spec §4.3 step 4/5: "the timestamp is the segment-start wall clock").
fn parse_segment_start(camera_name: &str, filename: &str) -> Result<jiff::Timestamp, Error> {
    let stem = filename
        .strip_prefix(&format!("{camera_name}_"))
        .and_then(|s| s.split('.').next())
        .ok_or_else(|| base::format_err_t!(Integrity, "unexpected segment filename {filename:?}"))?;
    let dt = jiff::civil::DateTime::strptime("%Y%m%d_%H%M%S", stem)
        .map_err(|e| base::format_err_t!(Integrity, "unparseable segment timestamp in {filename:?}: {e}"))?;
    dt.to_zoned(jiff::tz::TimeZone::system())
        .map(|z| z.timestamp())
        .map_err(|e| base::format_err_t!(Integrity, "segment timestamp {filename:?} out of range: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strftime_segment_names() {
        let ts = parse_segment_start("CAMERA_1", "CAMERA_1_20260727_100000.mp4").unwrap();
        let zoned = ts.to_zoned(jiff::tz::TimeZone::UTC);
        assert_eq!(zoned.strftime("%Y-%m-%d %H:%M").to_string(), {
            let local = jiff::civil::DateTime::strptime("%Y%m%d_%H%M%S", "20260727_100000")
                .unwrap()
                .to_zoned(jiff::tz::TimeZone::system())
                .unwrap();
            local.with_time_zone(jiff::tz::TimeZone::UTC).strftime("%Y-%m-%d %H:%M").to_string()
        });
    }

    #[test]
    fn rejects_mismatched_prefix() {
        assert!(parse_segment_start("CAMERA_1", "CAMERA_2_20260727_100000.mp4").is_err());
    }
}
