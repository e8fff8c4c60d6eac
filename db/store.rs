// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Typed CRUD over the schema in `db/schema.rs`.
//!
//! [`Store`] wraps a single `rusqlite::Connection` behind a `std::sync::Mutex`
//! rather than a connection pool: SQLite serializes writers internally, and
//! the teacher's own `Database`/`LockedDatabase` split makes the same call
//! ("single writer from many goroutines" per the component table). The lock
//! is never held across an `.await` — every method here is synchronous and
//! callers copy rows out before releasing it.

use base::{format_err_t, Error, ErrorKind, ResultExt};
use jiff::Timestamp;
use rusqlite::{named_params, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// A registered camera. Loaded from config at startup; mutable via admin
/// hot-reload; never deleted by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub name: String,
    pub button_no: Option<i64>,
    pub field_id: String,
    pub ip: String,
    pub port: u16,
    pub path: String,
    pub user: String,
    pub password: String,
    pub width: i64,
    pub height: i64,
    pub frame_rate: i64,
    pub resolution: String,
    pub codec: String,
    pub enabled: bool,
    pub auto_delete_days: Option<i64>,
}

impl Camera {
    pub fn rtsp_url(&self) -> String {
        format!(
            "rtsp://{}:{}@{}:{}/{}",
            self.user, self.password, self.ip, self.port, self.path
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageDisk {
    pub id: i64,
    pub path: String,
    pub total_gb: f64,
    pub available_gb: f64,
    pub priority_order: i64,
    pub is_active: bool,
    pub last_scan: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSegment {
    pub id: i64,
    pub camera_name: String,
    pub storage_disk_id: i64,
    pub mp4_path: String,
    pub segment_start: Timestamp,
    pub segment_end: Timestamp,
    pub file_size_bytes: i64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VideoType {
    Full,
    Clip,
}

impl VideoType {
    fn as_str(self) -> &'static str {
        match self {
            VideoType::Full => "full",
            VideoType::Clip => "clip",
        }
    }

    fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "full" => Ok(VideoType::Full),
            "clip" => Ok(VideoType::Clip),
            _ => Err(format_err_t!(Integrity, "unknown video_type {s:?} in store")),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VideoStatus {
    Initial,
    Pending,
    Processing,
    Uploading,
    Ready,
    Failed,
    Cancelled,
    Unavailable,
}

impl VideoStatus {
    fn as_str(self) -> &'static str {
        match self {
            VideoStatus::Initial => "initial",
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Uploading => "uploading",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
            VideoStatus::Cancelled => "cancelled",
            VideoStatus::Unavailable => "unavailable",
        }
    }

    fn parse(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "initial" => VideoStatus::Initial,
            "pending" => VideoStatus::Pending,
            "processing" => VideoStatus::Processing,
            "uploading" => VideoStatus::Uploading,
            "ready" => VideoStatus::Ready,
            "failed" => VideoStatus::Failed,
            "cancelled" => VideoStatus::Cancelled,
            "unavailable" => VideoStatus::Unavailable,
            _ => return Err(format_err_t!(Integrity, "unknown video status {s:?} in store")),
        })
    }

    /// States the TOCTOU guard (spec §4.5 step 1) treats as "already being
    /// handled, don't start another".
    pub const ACTIVE: [VideoStatus; 3] =
        [VideoStatus::Initial, VideoStatus::Processing, VideoStatus::Uploading];
}

#[derive(Debug, Clone)]
pub struct Video {
    pub id: i64,
    pub unique_id: String,
    pub camera_name: String,
    pub booking_id: Option<String>,
    pub order_detail_id: Option<String>,
    pub video_type: VideoType,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub local_path: Option<String>,
    pub hls_path: Option<String>,
    pub mp4_full_path: Option<String>,
    pub r2_hls_url: Option<String>,
    pub r2_mp4_url: Option<String>,
    pub preview_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: VideoStatus,
    pub request_id: Option<String>,
    pub error_message: Option<String>,
    pub duration_secs: Option<f64>,
    pub size_bytes: Option<i64>,
    pub resolution: Option<String>,
}

impl Video {
    /// `status=ready` requires every remote URL populated (invariant 2).
    pub fn is_ready_and_complete(&self) -> bool {
        self.status == VideoStatus::Ready
            && self.r2_mp4_url.is_some()
            && self.preview_url.is_some()
            && self.thumbnail_url.is_some()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BookingStatus {
    Success,
    Cancelled,
    Other,
}

impl BookingStatus {
    fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Success => "success",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Other => "other",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "success" => BookingStatus::Success,
            "cancelled" => BookingStatus::Cancelled,
            _ => BookingStatus::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub booking_id: String,
    pub order_detail_id: String,
    pub field_id: String,
    pub date: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub status: BookingStatus,
    pub raw_json: String,
    pub last_sync_at: Timestamp,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "pending" => TaskStatus::Pending,
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "dead" => TaskStatus::Dead,
            _ => return Err(format_err_t!(Integrity, "unknown task status {s:?} in store")),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PendingTask {
    pub id: i64,
    pub task_type: String,
    pub task_data: serde_json::Value,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_retry_at: Timestamp,
    pub status: TaskStatus,
    pub error_msg: Option<String>,
    pub created_at: Timestamp,
}

/// Typed access to the `system_config` key/value table (spec §6's system
/// config keys).
#[derive(Debug, Clone, Copy)]
pub struct SystemConfig;

pub struct Store {
    conn: Mutex<rusqlite::Connection>,
}

fn ts_to_sql(t: Timestamp) -> String {
    t.to_string()
}

fn ts_from_sql(s: &str) -> Result<Timestamp, Error> {
    s.parse()
        .map_err(|e| format_err_t!(Integrity, "invalid timestamp {s:?} in store: {e}"))
}

impl Store {
    pub fn open(path: &Path) -> Result<Store, Error> {
        let conn = rusqlite::Connection::open(path)
            .err_context(ErrorKind::Fatal, format!("opening store at {}", path.display()))?;
        schema::init(&conn).err_kind(ErrorKind::Fatal)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Store, Error> {
        let conn = rusqlite::Connection::open_in_memory()
            .err_kind(ErrorKind::Fatal)?;
        schema::init(&conn).err_kind(ErrorKind::Fatal)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    // ---- Camera ----

    pub fn upsert_camera(&self, c: &Camera) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"insert into camera
                 (name, button_no, field_id, ip, port, path, user, password,
                  width, height, frame_rate, resolution, codec, enabled, auto_delete_days)
               values
                 (:name, :button_no, :field_id, :ip, :port, :path, :user, :password,
                  :width, :height, :frame_rate, :resolution, :codec, :enabled, :auto_delete_days)
               on conflict (name) do update set
                 button_no = excluded.button_no,
                 field_id = excluded.field_id,
                 ip = excluded.ip,
                 port = excluded.port,
                 path = excluded.path,
                 user = excluded.user,
                 password = excluded.password,
                 width = excluded.width,
                 height = excluded.height,
                 frame_rate = excluded.frame_rate,
                 resolution = excluded.resolution,
                 codec = excluded.codec,
                 enabled = excluded.enabled,
                 auto_delete_days = excluded.auto_delete_days"#,
            named_params! {
                ":name": c.name,
                ":button_no": c.button_no,
                ":field_id": c.field_id,
                ":ip": c.ip,
                ":port": c.port,
                ":path": c.path,
                ":user": c.user,
                ":password": c.password,
                ":width": c.width,
                ":height": c.height,
                ":frame_rate": c.frame_rate,
                ":resolution": c.resolution,
                ":codec": c.codec,
                ":enabled": c.enabled,
                ":auto_delete_days": c.auto_delete_days,
            },
        )
        .err_context(ErrorKind::Transient, "upserting camera")?;
        Ok(())
    }

    pub fn list_cameras(&self, enabled_only: bool) -> Result<Vec<Camera>, Error> {
        let conn = self.conn.lock().unwrap();
        let sql = if enabled_only {
            "select name, button_no, field_id, ip, port, path, user, password, width, height, \
             frame_rate, resolution, codec, enabled, auto_delete_days from camera \
             where enabled = 1 order by name"
        } else {
            "select name, button_no, field_id, ip, port, path, user, password, width, height, \
             frame_rate, resolution, codec, enabled, auto_delete_days from camera order by name"
        };
        let mut stmt = conn.prepare(sql).err_kind(ErrorKind::Transient)?;
        let rows = stmt
            .query_map([], row_to_camera)
            .err_kind(ErrorKind::Transient)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .err_kind(ErrorKind::Transient)
    }

    pub fn get_camera(&self, name: &str) -> Result<Option<Camera>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "select name, button_no, field_id, ip, port, path, user, password, width, height, \
             frame_rate, resolution, codec, enabled, auto_delete_days from camera where name = ?1",
            [name],
            row_to_camera,
        )
        .optional()
        .err_kind(ErrorKind::Transient)
    }

    pub fn camera_by_button(&self, button_no: i64) -> Result<Option<Camera>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "select name, button_no, field_id, ip, port, path, user, password, width, height, \
             frame_rate, resolution, codec, enabled, auto_delete_days from camera \
             where button_no = ?1",
            [button_no],
            row_to_camera,
        )
        .optional()
        .err_kind(ErrorKind::Transient)
    }

    // ---- StorageDisk ----

    pub fn upsert_disk(&self, d: &StorageDisk) -> Result<i64, Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"insert into storage_disk (path, total_gb, available_gb, priority_order, is_active, last_scan)
               values (:path, :total_gb, :available_gb, :priority_order, :is_active, :last_scan)
               on conflict (path) do update set
                 total_gb = excluded.total_gb,
                 available_gb = excluded.available_gb,
                 priority_order = excluded.priority_order,
                 last_scan = excluded.last_scan"#,
            named_params! {
                ":path": d.path,
                ":total_gb": d.total_gb,
                ":available_gb": d.available_gb,
                ":priority_order": d.priority_order,
                ":is_active": d.is_active,
                ":last_scan": d.last_scan.map(ts_to_sql),
            },
        )
        .err_context(ErrorKind::Transient, "upserting storage disk")?;
        conn.query_row(
            "select id from storage_disk where path = ?1",
            [&d.path],
            |r| r.get(0),
        )
        .err_kind(ErrorKind::Transient)
    }

    pub fn list_disks(&self) -> Result<Vec<StorageDisk>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "select id, path, total_gb, available_gb, priority_order, is_active, last_scan \
                 from storage_disk order by priority_order",
            )
            .err_kind(ErrorKind::Transient)?;
        let rows = stmt
            .query_map([], row_to_disk)
            .err_kind(ErrorKind::Transient)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .err_kind(ErrorKind::Transient)
    }

    pub fn active_disk(&self) -> Result<Option<StorageDisk>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "select id, path, total_gb, available_gb, priority_order, is_active, last_scan \
             from storage_disk where is_active = 1",
            [],
            row_to_disk,
        )
        .optional()
        .err_kind(ErrorKind::Transient)
    }

    /// Deactivates every disk and activates `id`, in one transaction, per the
    /// spec's "at most one active disk" invariant.
    pub fn set_active_disk(&self, id: i64) -> Result<(), Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().err_kind(ErrorKind::Transient)?;
        tx.execute("update storage_disk set is_active = 0", [])
            .err_kind(ErrorKind::Transient)?;
        let updated = tx
            .execute("update storage_disk set is_active = 1 where id = ?1", [id])
            .err_kind(ErrorKind::Transient)?;
        if updated == 0 {
            return Err(format_err_t!(Configuration, "no such storage disk id {id}"));
        }
        tx.commit().err_kind(ErrorKind::Transient)?;
        Ok(())
    }

    pub fn refresh_disk_scan(&self, id: i64, available_gb: f64, now: Timestamp) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "update storage_disk set available_gb = ?1, last_scan = ?2 where id = ?3",
            rusqlite::params![available_gb, ts_to_sql(now), id],
        )
        .err_kind(ErrorKind::Transient)?;
        Ok(())
    }

    // ---- RecordingSegment ----

    /// Idempotent on `(camera_name, segment_start)`: the Capture Supervisor
    /// may retry a segment-close insert after a crash without duplicating
    /// the row.
    pub fn insert_segment(&self, s: &RecordingSegment) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"insert into recording_segment
                 (camera_name, storage_disk_id, mp4_path, segment_start, segment_end, file_size_bytes)
               values (:camera_name, :storage_disk_id, :mp4_path, :segment_start, :segment_end, :file_size_bytes)
               on conflict (camera_name, segment_start) do update set
                 storage_disk_id = excluded.storage_disk_id,
                 mp4_path = excluded.mp4_path,
                 segment_end = excluded.segment_end,
                 file_size_bytes = excluded.file_size_bytes"#,
            named_params! {
                ":camera_name": s.camera_name,
                ":storage_disk_id": s.storage_disk_id,
                ":mp4_path": s.mp4_path,
                ":segment_start": ts_to_sql(s.segment_start),
                ":segment_end": ts_to_sql(s.segment_end),
                ":file_size_bytes": s.file_size_bytes,
            },
        )
        .err_context(ErrorKind::Transient, "inserting recording segment")?;
        Ok(())
    }

    /// `segments(camera, t0, t1) = {s : s.start <= t1 && s.end >= t0}`,
    /// ordered by `segment_start` (spec §4.1).
    pub fn segments_in_range(
        &self,
        camera_name: &str,
        t0: Timestamp,
        t1: Timestamp,
    ) -> Result<Vec<RecordingSegment>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "select id, camera_name, storage_disk_id, mp4_path, segment_start, segment_end, \
                 file_size_bytes from recording_segment \
                 where camera_name = ?1 and segment_start <= ?2 and segment_end >= ?3 \
                 order by segment_start",
            )
            .err_kind(ErrorKind::Transient)?;
        let rows = stmt
            .query_map(
                rusqlite::params![camera_name, ts_to_sql(t1), ts_to_sql(t0)],
                row_to_segment,
            )
            .err_kind(ErrorKind::Transient)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .err_kind(ErrorKind::Transient)
    }

    /// Segments a camera's retention window has expired (spec §4.1
    /// "deleted only by retention/cleanup"); the Scheduler's cleanup job
    /// removes both the row and the backing file for each.
    pub fn segments_older_than(&self, camera_name: &str, cutoff: Timestamp) -> Result<Vec<RecordingSegment>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "select id, camera_name, storage_disk_id, mp4_path, segment_start, segment_end, \
                 file_size_bytes from recording_segment where camera_name = ?1 and segment_end < ?2 \
                 order by segment_start",
            )
            .err_kind(ErrorKind::Transient)?;
        let rows = stmt
            .query_map(rusqlite::params![camera_name, ts_to_sql(cutoff)], row_to_segment)
            .err_kind(ErrorKind::Transient)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .err_kind(ErrorKind::Transient)
    }

    pub fn delete_segment(&self, id: i64) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute("delete from recording_segment where id = ?1", [id])
            .err_kind(ErrorKind::Transient)?;
        Ok(())
    }

    // ---- Video ----

    /// Upsert on `unique_id` (spec's idempotency contract for videos).
    pub fn upsert_video(&self, v: &Video) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"insert into video
                 (unique_id, camera_name, booking_id, order_detail_id, video_type, start_time, end_time,
                  local_path, hls_path, mp4_full_path, r2_hls_url, r2_mp4_url, preview_url, thumbnail_url,
                  status, request_id, error_message, duration_secs, size_bytes, resolution)
               values
                 (:unique_id, :camera_name, :booking_id, :order_detail_id, :video_type, :start_time, :end_time,
                  :local_path, :hls_path, :mp4_full_path, :r2_hls_url, :r2_mp4_url, :preview_url, :thumbnail_url,
                  :status, :request_id, :error_message, :duration_secs, :size_bytes, :resolution)
               on conflict (unique_id) do update set
                 local_path = excluded.local_path,
                 hls_path = excluded.hls_path,
                 mp4_full_path = excluded.mp4_full_path,
                 r2_hls_url = excluded.r2_hls_url,
                 r2_mp4_url = excluded.r2_mp4_url,
                 preview_url = excluded.preview_url,
                 thumbnail_url = excluded.thumbnail_url,
                 status = excluded.status,
                 request_id = excluded.request_id,
                 error_message = excluded.error_message,
                 duration_secs = excluded.duration_secs,
                 size_bytes = excluded.size_bytes,
                 resolution = excluded.resolution"#,
            named_params! {
                ":unique_id": v.unique_id,
                ":camera_name": v.camera_name,
                ":booking_id": v.booking_id,
                ":order_detail_id": v.order_detail_id,
                ":video_type": v.video_type.as_str(),
                ":start_time": ts_to_sql(v.start_time),
                ":end_time": ts_to_sql(v.end_time),
                ":local_path": v.local_path,
                ":hls_path": v.hls_path,
                ":mp4_full_path": v.mp4_full_path,
                ":r2_hls_url": v.r2_hls_url,
                ":r2_mp4_url": v.r2_mp4_url,
                ":preview_url": v.preview_url,
                ":thumbnail_url": v.thumbnail_url,
                ":status": v.status.as_str(),
                ":request_id": v.request_id,
                ":error_message": v.error_message,
                ":duration_secs": v.duration_secs,
                ":size_bytes": v.size_bytes,
                ":resolution": v.resolution,
            },
        )
        .err_context(ErrorKind::Transient, "upserting video")?;
        Ok(())
    }

    pub fn get_video(&self, unique_id: &str) -> Result<Option<Video>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{VIDEO_COLUMNS} from video where unique_id = ?1"),
            [unique_id],
            row_to_video,
        )
        .optional()
        .err_kind(ErrorKind::Transient)
    }

    pub fn set_video_status(
        &self,
        unique_id: &str,
        status: VideoStatus,
        error_message: Option<&str>,
    ) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "update video set status = ?1, error_message = ?2 where unique_id = ?3",
            rusqlite::params![status.as_str(), error_message, unique_id],
        )
        .err_kind(ErrorKind::Transient)?;
        Ok(())
    }

    /// The TOCTOU guard at spec §4.5 step 1: is there already an active
    /// `(booking_id, camera, video_type=full)` video?
    pub fn active_full_video(
        &self,
        booking_id: &str,
        camera_name: &str,
    ) -> Result<Option<Video>, Error> {
        let conn = self.conn.lock().unwrap();
        let placeholders = VideoStatus::ACTIVE
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        conn.query_row(
            &format!(
                "{VIDEO_COLUMNS} from video where booking_id = ?1 and camera_name = ?2 \
                 and video_type = 'full' and status in ({placeholders})"
            ),
            rusqlite::params![booking_id, camera_name],
            row_to_video,
        )
        .optional()
        .err_kind(ErrorKind::Transient)
    }

    /// `ready` videos whose booking window ended before `cutoff` — retention
    /// candidates for the Scheduler's cleanup job (`ready -> unavailable`).
    pub fn ready_videos_older_than(&self, cutoff: Timestamp) -> Result<Vec<Video>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{VIDEO_COLUMNS} from video where status = 'ready' and end_time < ?1"))
            .err_kind(ErrorKind::Transient)?;
        let rows = stmt
            .query_map([ts_to_sql(cutoff)], row_to_video)
            .err_kind(ErrorKind::Transient)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .err_kind(ErrorKind::Transient)
    }

    /// Appends `request_id` to a Video's comma-separated `request_id` list
    /// if it isn't already present (spec §3: "Video may have many
    /// `request_id`s it satisfies").
    pub fn append_video_request_id(&self, unique_id: &str, request_id: &str) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row("select request_id from video where unique_id = ?1", [unique_id], |r| r.get(0))
            .err_kind(ErrorKind::Transient)?;
        let mut ids: Vec<&str> = existing.as_deref().unwrap_or("").split(',').filter(|s| !s.is_empty()).collect();
        if !ids.contains(&request_id) {
            ids.push(request_id);
        }
        conn.execute(
            "update video set request_id = ?1 where unique_id = ?2",
            rusqlite::params![ids.join(","), unique_id],
        )
        .err_kind(ErrorKind::Transient)?;
        Ok(())
    }

    // ---- Booking ----

    /// Upsert on `booking_id`; re-running sync for the same booking only
    /// changes `last_sync_at` if nothing else about the booking changed.
    pub fn upsert_booking(&self, b: &Booking) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"insert into booking
                 (booking_id, order_detail_id, field_id, date, start_time, end_time, status, raw_json, last_sync_at)
               values
                 (:booking_id, :order_detail_id, :field_id, :date, :start_time, :end_time, :status, :raw_json, :last_sync_at)
               on conflict (booking_id) do update set
                 order_detail_id = excluded.order_detail_id,
                 field_id = excluded.field_id,
                 date = excluded.date,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 status = excluded.status,
                 raw_json = excluded.raw_json,
                 last_sync_at = excluded.last_sync_at"#,
            named_params! {
                ":booking_id": b.booking_id,
                ":order_detail_id": b.order_detail_id,
                ":field_id": b.field_id,
                ":date": b.date,
                ":start_time": ts_to_sql(b.start_time),
                ":end_time": ts_to_sql(b.end_time),
                ":status": b.status.as_str(),
                ":raw_json": b.raw_json,
                ":last_sync_at": ts_to_sql(b.last_sync_at),
            },
        )
        .err_context(ErrorKind::Transient, "upserting booking")?;
        Ok(())
    }

    pub fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "select booking_id, order_detail_id, field_id, date, start_time, end_time, status, \
             raw_json, last_sync_at from booking where booking_id = ?1",
            [booking_id],
            row_to_booking,
        )
        .optional()
        .err_kind(ErrorKind::Transient)
    }

    /// Bookings whose `end_time` has passed the given cutoff (normally
    /// `now - tolerance`) and which haven't been cancelled — candidates for
    /// the Booking Engine's sweep (spec §4.5, end-to-end scenario 1).
    pub fn bookings_ready_for_processing(&self, cutoff: Timestamp) -> Result<Vec<Booking>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "select booking_id, order_detail_id, field_id, date, start_time, end_time, status, \
                 raw_json, last_sync_at from booking \
                 where status = 'success' and end_time <= ?1 order by end_time",
            )
            .err_kind(ErrorKind::Transient)?;
        let rows = stmt
            .query_map([ts_to_sql(cutoff)], row_to_booking)
            .err_kind(ErrorKind::Transient)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .err_kind(ErrorKind::Transient)
    }

    pub fn cancelled_bookings_with_active_videos(&self) -> Result<Vec<(Booking, Video)>, Error> {
        let bookings = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    "select booking_id, order_detail_id, field_id, date, start_time, end_time, \
                     status, raw_json, last_sync_at from booking where status = 'cancelled'",
                )
                .err_kind(ErrorKind::Transient)?;
            let rows = stmt
                .query_map([], row_to_booking)
                .err_kind(ErrorKind::Transient)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .err_kind(ErrorKind::Transient)?
        };
        let mut out = Vec::new();
        for b in bookings {
            let conn = self.conn.lock().unwrap();
            let placeholders = VideoStatus::ACTIVE
                .iter()
                .map(|s| format!("'{}'", s.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            let mut stmt = conn
                .prepare(&format!(
                    "{VIDEO_COLUMNS} from video where booking_id = ?1 and status in ({placeholders})"
                ))
                .err_kind(ErrorKind::Transient)?;
            let rows: Vec<Video> = stmt
                .query_map([&b.booking_id], row_to_video)
                .err_kind(ErrorKind::Transient)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .err_kind(ErrorKind::Transient)?;
            drop(conn);
            for v in rows {
                out.push((b.clone(), v));
            }
        }
        Ok(out)
    }

    // ---- PendingTask ----

    pub fn enqueue_task(
        &self,
        task_type: &str,
        task_data: &serde_json::Value,
        max_attempts: i64,
        now: Timestamp,
    ) -> Result<i64, Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "insert into pending_task (task_type, task_data, attempts, max_attempts, next_retry_at, status, created_at) \
             values (?1, ?2, 0, ?3, ?4, 'pending', ?4)",
            rusqlite::params![task_type, task_data.to_string(), max_attempts, ts_to_sql(now)],
        )
        .err_context(ErrorKind::Transient, "enqueuing pending task")?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomically claims up to `limit` ready tasks by flipping them to
    /// `processing` inside one transaction, giving the
    /// SKIP-LOCKED-equivalent semantics the spec asks for (SQLite's single
    /// writer means no other connection can interleave).
    pub fn claim_ready_tasks(&self, now: Timestamp, limit: i64) -> Result<Vec<PendingTask>, Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().err_kind(ErrorKind::Transient)?;
        let ids: Vec<i64> = {
            let mut stmt = tx
                .prepare(
                    "select id from pending_task where status in ('pending', 'failed') \
                     and next_retry_at <= ?1 order by created_at limit ?2",
                )
                .err_kind(ErrorKind::Transient)?;
            stmt.query_map(rusqlite::params![ts_to_sql(now), limit], |r| r.get(0))
                .err_kind(ErrorKind::Transient)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .err_kind(ErrorKind::Transient)?
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            tx.execute(
                "update pending_task set status = 'processing' where id = ?1",
                [id],
            )
            .err_kind(ErrorKind::Transient)?;
            let task = tx
                .query_row(
                    "select id, task_type, task_data, attempts, max_attempts, next_retry_at, \
                     status, error_msg, created_at from pending_task where id = ?1",
                    [id],
                    row_to_task,
                )
                .err_kind(ErrorKind::Transient)?;
            out.push(task);
        }
        tx.commit().err_kind(ErrorKind::Transient)?;
        Ok(out)
    }

    pub fn complete_task(&self, id: i64) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "update pending_task set status = 'completed', error_msg = null where id = ?1",
            [id],
        )
        .err_kind(ErrorKind::Transient)?;
        Ok(())
    }

    /// Records a handler failure: increments `attempts`, computes the next
    /// retry time from `backoff`, and marks the task `dead` once
    /// `attempts >= max_attempts` (spec §4.6, invariant 6).
    pub fn fail_task(
        &self,
        id: i64,
        error_msg: &str,
        backoff: impl Fn(i64) -> jiff::SignedDuration,
        now: Timestamp,
    ) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        let (attempts, max_attempts): (i64, i64) = conn
            .query_row(
                "select attempts, max_attempts from pending_task where id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .err_kind(ErrorKind::Transient)?;
        let attempts = attempts + 1;
        let status = if attempts >= max_attempts { "dead" } else { "failed" };
        let next_retry_at = now.checked_add(backoff(attempts)).unwrap_or(now);
        conn.execute(
            "update pending_task set attempts = ?1, status = ?2, error_msg = ?3, next_retry_at = ?4 \
             where id = ?5",
            rusqlite::params![attempts, status, error_msg, ts_to_sql(next_retry_at), id],
        )
        .err_kind(ErrorKind::Transient)?;
        Ok(())
    }

    // ---- SystemConfig ----

    pub fn get_config_str(&self, key: &str) -> Result<Option<String>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("select value from system_config where key = ?1", [key], |r| r.get(0))
            .optional()
            .err_kind(ErrorKind::Transient)
    }

    pub fn get_config_i64(&self, key: &str, default: i64) -> Result<i64, Error> {
        match self.get_config_str(key)? {
            Some(s) => s
                .parse()
                .map_err(|e| format_err_t!(Configuration, "config {key} = {s:?} is not an integer: {e}")),
            None => Ok(default),
        }
    }

    pub fn get_config_f64(&self, key: &str, default: f64) -> Result<f64, Error> {
        match self.get_config_str(key)? {
            Some(s) => s
                .parse()
                .map_err(|e| format_err_t!(Configuration, "config {key} = {s:?} is not a number: {e}")),
            None => Ok(default),
        }
    }

    pub fn get_config_bool(&self, key: &str, default: bool) -> Result<bool, Error> {
        match self.get_config_str(key)? {
            Some(s) => match s.as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(format_err_t!(Configuration, "config {key} = {s:?} is not a bool")),
            },
            None => Ok(default),
        }
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "insert into system_config (key, value) values (?1, ?2) \
             on conflict (key) do update set value = excluded.value",
            rusqlite::params![key, value],
        )
        .err_kind(ErrorKind::Transient)?;
        Ok(())
    }
}

const VIDEO_COLUMNS: &str = "select id, unique_id, camera_name, booking_id, order_detail_id, \
    video_type, start_time, end_time, local_path, hls_path, mp4_full_path, r2_hls_url, r2_mp4_url, \
    preview_url, thumbnail_url, status, request_id, error_message, duration_secs, size_bytes, resolution";

fn row_to_camera(row: &rusqlite::Row) -> rusqlite::Result<Camera> {
    Ok(Camera {
        name: row.get(0)?,
        button_no: row.get(1)?,
        field_id: row.get(2)?,
        ip: row.get(3)?,
        port: row.get(4)?,
        path: row.get(5)?,
        user: row.get(6)?,
        password: row.get(7)?,
        width: row.get(8)?,
        height: row.get(9)?,
        frame_rate: row.get(10)?,
        resolution: row.get(11)?,
        codec: row.get(12)?,
        enabled: row.get(13)?,
        auto_delete_days: row.get(14)?,
    })
}

fn sql_err(e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_disk(row: &rusqlite::Row) -> rusqlite::Result<StorageDisk> {
    let last_scan: Option<String> = row.get(6)?;
    Ok(StorageDisk {
        id: row.get(0)?,
        path: row.get(1)?,
        total_gb: row.get(2)?,
        available_gb: row.get(3)?,
        priority_order: row.get(4)?,
        is_active: row.get(5)?,
        last_scan: last_scan.map(|s| ts_from_sql(&s)).transpose().map_err(sql_err)?,
    })
}

fn row_to_segment(row: &rusqlite::Row) -> rusqlite::Result<RecordingSegment> {
    let start: String = row.get(4)?;
    let end: String = row.get(5)?;
    Ok(RecordingSegment {
        id: row.get(0)?,
        camera_name: row.get(1)?,
        storage_disk_id: row.get(2)?,
        mp4_path: row.get(3)?,
        segment_start: ts_from_sql(&start).map_err(sql_err)?,
        segment_end: ts_from_sql(&end).map_err(sql_err)?,
        file_size_bytes: row.get(6)?,
    })
}

fn row_to_video(row: &rusqlite::Row) -> rusqlite::Result<Video> {
    let video_type: String = row.get(5)?;
    let start: String = row.get(6)?;
    let end: String = row.get(7)?;
    let status: String = row.get(15)?;
    Ok(Video {
        id: row.get(0)?,
        unique_id: row.get(1)?,
        camera_name: row.get(2)?,
        booking_id: row.get(3)?,
        order_detail_id: row.get(4)?,
        video_type: VideoType::parse(&video_type).map_err(sql_err)?,
        start_time: ts_from_sql(&start).map_err(sql_err)?,
        end_time: ts_from_sql(&end).map_err(sql_err)?,
        local_path: row.get(8)?,
        hls_path: row.get(9)?,
        mp4_full_path: row.get(10)?,
        r2_hls_url: row.get(11)?,
        r2_mp4_url: row.get(12)?,
        preview_url: row.get(13)?,
        thumbnail_url: row.get(14)?,
        status: VideoStatus::parse(&status).map_err(sql_err)?,
        request_id: row.get(16)?,
        error_message: row.get(17)?,
        duration_secs: row.get(18)?,
        size_bytes: row.get(19)?,
        resolution: row.get(20)?,
    })
}

fn row_to_booking(row: &rusqlite::Row) -> rusqlite::Result<Booking> {
    let start: String = row.get(4)?;
    let end: String = row.get(5)?;
    let status: String = row.get(6)?;
    let last_sync: String = row.get(8)?;
    Ok(Booking {
        booking_id: row.get(0)?,
        order_detail_id: row.get(1)?,
        field_id: row.get(2)?,
        date: row.get(3)?,
        start_time: ts_from_sql(&start).map_err(sql_err)?,
        end_time: ts_from_sql(&end).map_err(sql_err)?,
        status: BookingStatus::parse(&status),
        raw_json: row.get(7)?,
        last_sync_at: ts_from_sql(&last_sync).map_err(sql_err)?,
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<PendingTask> {
    let task_data: String = row.get(2)?;
    let next_retry: String = row.get(5)?;
    let status: String = row.get(6)?;
    let created: String = row.get(8)?;
    Ok(PendingTask {
        id: row.get(0)?,
        task_type: row.get(1)?,
        task_data: serde_json::from_str(&task_data).map_err(|e| {
            sql_err(format_err_t!(Integrity, "invalid task_data JSON in store: {e}"))
        })?,
        attempts: row.get(3)?,
        max_attempts: row.get(4)?,
        next_retry_at: ts_from_sql(&next_retry).map_err(sql_err)?,
        status: TaskStatus::parse(&status).map_err(sql_err)?,
        error_msg: row.get(7)?,
        created_at: ts_from_sql(&created).map_err(sql_err)?,
    })
}

use crate::schema;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera(name: &str) -> Camera {
        Camera {
            name: name.to_string(),
            button_no: Some(1),
            field_id: "field-1".to_string(),
            ip: "192.168.1.10".to_string(),
            port: 554,
            path: "stream1".to_string(),
            user: "admin".to_string(),
            password: "hunter2".to_string(),
            width: 1920,
            height: 1080,
            frame_rate: 30,
            resolution: "1080p".to_string(),
            codec: "h264".to_string(),
            enabled: true,
            auto_delete_days: Some(30),
        }
    }

    #[test]
    fn camera_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let cam = test_camera("cam1");
        store.upsert_camera(&cam).unwrap();
        store.upsert_camera(&cam).unwrap();
        assert_eq!(store.list_cameras(false).unwrap(), vec![cam]);
    }

    #[test]
    fn exactly_one_active_disk() {
        let store = Store::open_in_memory().unwrap();
        let id_a = store
            .upsert_disk(&StorageDisk {
                id: 0,
                path: "/mnt/a".into(),
                total_gb: 500.0,
                available_gb: 400.0,
                priority_order: 1,
                is_active: false,
                last_scan: None,
            })
            .unwrap();
        let id_b = store
            .upsert_disk(&StorageDisk {
                id: 0,
                path: "/mnt/b".into(),
                total_gb: 1000.0,
                available_gb: 900.0,
                priority_order: 2,
                is_active: false,
                last_scan: None,
            })
            .unwrap();
        store.set_active_disk(id_a).unwrap();
        assert_eq!(store.active_disk().unwrap().unwrap().id, id_a);
        store.set_active_disk(id_b).unwrap();
        let active: Vec<_> = store
            .list_disks()
            .unwrap()
            .into_iter()
            .filter(|d| d.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id_b);
    }

    #[test]
    fn segments_in_range_uses_overlap_condition() {
        let store = Store::open_in_memory().unwrap();
        let cam = test_camera("cam1");
        store.upsert_camera(&cam).unwrap();
        let disk_id = store
            .upsert_disk(&StorageDisk {
                id: 0,
                path: "/mnt/a".into(),
                total_gb: 500.0,
                available_gb: 400.0,
                priority_order: 1,
                is_active: true,
                last_scan: None,
            })
            .unwrap();
        let t0: Timestamp = "2026-07-27T10:00:00Z".parse().unwrap();
        for i in 0..5i64 {
            let start = t0 + jiff::Span::new().minutes(i);
            let end = t0 + jiff::Span::new().minutes(i + 1);
            store
                .insert_segment(&RecordingSegment {
                    id: 0,
                    camera_name: "cam1".into(),
                    storage_disk_id: disk_id,
                    mp4_path: format!("cam1_{i}.mp4"),
                    segment_start: start,
                    segment_end: end,
                    file_size_bytes: 1_000_000,
                })
                .unwrap();
        }
        // Query a window starting and ending on segment boundaries: the
        // overlap condition (segment_start <= t1 && segment_end >= t0)
        // pulls in the segment immediately before the window too (its
        // `segment_end` lands exactly on `q0`) as well as the one
        // immediately after (its `segment_start` lands exactly on `q1`),
        // so all 5 inserted segments overlap this window (spec §8: "segment
        // spanning booking end is included").
        let q0 = t0 + jiff::Span::new().minutes(1);
        let q1 = t0 + jiff::Span::new().minutes(4);
        let found = store.segments_in_range("cam1", q0, q1).unwrap();
        assert_eq!(found.len(), 5);
        assert_eq!(found[0].mp4_path, "cam1_0.mp4");
        assert_eq!(found.last().unwrap().mp4_path, "cam1_4.mp4");
    }

    #[test]
    fn video_upsert_on_unique_id_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let cam = test_camera("cam1");
        store.upsert_camera(&cam).unwrap();
        let start: Timestamp = "2026-07-27T10:00:00Z".parse().unwrap();
        let end: Timestamp = "2026-07-27T11:00:00Z".parse().unwrap();
        let mut v = Video {
            id: 0,
            unique_id: "BK-0003_cam1_20260727T100000Z".into(),
            camera_name: "cam1".into(),
            booking_id: Some("BK-0003".into()),
            order_detail_id: None,
            video_type: VideoType::Full,
            start_time: start,
            end_time: end,
            local_path: None,
            hls_path: None,
            mp4_full_path: None,
            r2_hls_url: None,
            r2_mp4_url: None,
            preview_url: None,
            thumbnail_url: None,
            status: VideoStatus::Initial,
            request_id: None,
            error_message: None,
            duration_secs: None,
            size_bytes: None,
            resolution: None,
        };
        store.upsert_video(&v).unwrap();
        v.status = VideoStatus::Ready;
        v.r2_mp4_url = Some("https://cdn/mp4/x.mp4".into());
        store.upsert_video(&v).unwrap();

        let got = store.get_video(&v.unique_id).unwrap().unwrap();
        assert_eq!(got.status, VideoStatus::Ready);
        assert_eq!(got.r2_mp4_url.as_deref(), Some("https://cdn/mp4/x.mp4"));

        // No duplicate row: only one active-state guard hit, and it's this one.
        assert!(store.active_full_video("BK-0003", "cam1").unwrap().is_none());
    }

    #[test]
    fn pending_task_backoff_marks_dead_at_max_attempts() {
        let store = Store::open_in_memory().unwrap();
        let now: Timestamp = "2026-07-27T00:00:00Z".parse().unwrap();
        let id = store
            .enqueue_task("r2_upload", &serde_json::json!({"k": "v"}), 2, now)
            .unwrap();
        let claimed = store.claim_ready_tasks(now, 10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);

        store
            .fail_task(id, "boom", |n| jiff::SignedDuration::from_secs(30 * n), now)
            .unwrap();
        let claimed = store.claim_ready_tasks(now, 10).unwrap();
        assert!(claimed.is_empty(), "next_retry_at hasn't elapsed yet");

        let later = now + jiff::Span::new().seconds(120);
        let claimed = store.claim_ready_tasks(later, 10).unwrap();
        assert_eq!(claimed.len(), 1);
        store
            .fail_task(id, "boom again", |n| jiff::SignedDuration::from_secs(30 * n), later)
            .unwrap();
        let claimed = store.claim_ready_tasks(later + jiff::Span::new().hours(1), 10).unwrap();
        assert!(claimed.is_empty(), "task should be dead, not failed/pending");
    }

    #[test]
    fn system_config_typed_accessors() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_config_i64("booking_worker_concurrency", 2).unwrap(), 2);
        store.set_config("booking_worker_concurrency", "5").unwrap();
        assert_eq!(store.get_config_i64("booking_worker_concurrency", 2).unwrap(), 5);
        assert_eq!(
            store.get_config_bool("enable_video_duration_check", true).unwrap(),
            true
        );
    }

    #[test]
    fn segments_older_than_respects_camera_and_cutoff() {
        let store = Store::open_in_memory().unwrap();
        let cam = test_camera("cam1");
        store.upsert_camera(&cam).unwrap();
        let disk_id = store
            .upsert_disk(&StorageDisk {
                id: 0,
                path: "/mnt/a".into(),
                total_gb: 500.0,
                available_gb: 400.0,
                priority_order: 1,
                is_active: true,
                last_scan: None,
            })
            .unwrap();
        let old_start: Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        let old_end = old_start + jiff::Span::new().minutes(1);
        store
            .insert_segment(&RecordingSegment {
                id: 0,
                camera_name: "cam1".into(),
                storage_disk_id: disk_id,
                mp4_path: "cam1_old.mp4".into(),
                segment_start: old_start,
                segment_end: old_end,
                file_size_bytes: 1,
            })
            .unwrap();
        let recent_start: Timestamp = "2026-07-27T00:00:00Z".parse().unwrap();
        let recent_end = recent_start + jiff::Span::new().minutes(1);
        store
            .insert_segment(&RecordingSegment {
                id: 0,
                camera_name: "cam1".into(),
                storage_disk_id: disk_id,
                mp4_path: "cam1_recent.mp4".into(),
                segment_start: recent_start,
                segment_end: recent_end,
                file_size_bytes: 1,
            })
            .unwrap();

        let cutoff: Timestamp = "2026-02-01T00:00:00Z".parse().unwrap();
        let expired = store.segments_older_than("cam1", cutoff).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].mp4_path, "cam1_old.mp4");

        store.delete_segment(expired[0].id).unwrap();
        assert!(store.segments_older_than("cam1", cutoff).unwrap().is_empty());
    }

    #[test]
    fn append_video_request_id_is_idempotent_and_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let cam = test_camera("cam1");
        store.upsert_camera(&cam).unwrap();
        let start: Timestamp = "2026-07-27T10:00:00Z".parse().unwrap();
        let end: Timestamp = "2026-07-27T11:00:00Z".parse().unwrap();
        let v = Video {
            id: 0,
            unique_id: "BK-0003_cam1_20260727T100000Z".into(),
            camera_name: "cam1".into(),
            booking_id: Some("BK-0003".into()),
            order_detail_id: None,
            video_type: VideoType::Full,
            start_time: start,
            end_time: end,
            local_path: None,
            hls_path: None,
            mp4_full_path: None,
            r2_hls_url: None,
            r2_mp4_url: None,
            preview_url: None,
            thumbnail_url: None,
            status: VideoStatus::Ready,
            request_id: None,
            error_message: None,
            duration_secs: None,
            size_bytes: None,
            resolution: None,
        };
        store.upsert_video(&v).unwrap();
        store.append_video_request_id(&v.unique_id, "REQ-1").unwrap();
        store.append_video_request_id(&v.unique_id, "REQ-2").unwrap();
        store.append_video_request_id(&v.unique_id, "REQ-1").unwrap();
        let got = store.get_video(&v.unique_id).unwrap().unwrap();
        assert_eq!(got.request_id.as_deref(), Some("REQ-1,REQ-2"));
    }

    #[test]
    fn ready_videos_older_than_filters_by_end_time() {
        let store = Store::open_in_memory().unwrap();
        let cam = test_camera("cam1");
        store.upsert_camera(&cam).unwrap();
        let old_end: Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        let v = Video {
            id: 0,
            unique_id: "BK-0001_cam1_20251231T230000Z".into(),
            camera_name: "cam1".into(),
            booking_id: Some("BK-0001".into()),
            order_detail_id: None,
            video_type: VideoType::Full,
            start_time: old_end - jiff::Span::new().hours(1),
            end_time: old_end,
            local_path: None,
            hls_path: None,
            mp4_full_path: None,
            r2_hls_url: None,
            r2_mp4_url: Some("https://cdn/mp4/x.mp4".into()),
            preview_url: Some("https://cdn/preview/x.mp4".into()),
            thumbnail_url: Some("https://cdn/thumbnail/x.png".into()),
            status: VideoStatus::Ready,
            request_id: None,
            error_message: None,
            duration_secs: None,
            size_bytes: None,
            resolution: None,
        };
        store.upsert_video(&v).unwrap();
        let cutoff: Timestamp = "2026-02-01T00:00:00Z".parse().unwrap();
        let expired = store.ready_videos_older_than(cutoff).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].unique_id, v.unique_id);
        assert!(store
            .ready_videos_older_than("2025-01-01T00:00:00Z".parse().unwrap())
            .unwrap()
            .is_empty());
    }
}
