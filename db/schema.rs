// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! The SQLite schema for the metadata store. See `db/store.rs` for the typed
//! CRUD built on top of it.

pub const EXPECTED_SCHEMA_VERSION: i32 = 1;

const SCHEMA_SQL: &str = r#"
create table if not exists meta (
  id integer primary key check (id = 0),
  version integer not null
);

create table if not exists camera (
  name text primary key,
  button_no integer,
  field_id text not null,
  ip text not null,
  port integer not null,
  path text not null,
  user text not null,
  password text not null,
  width integer not null,
  height integer not null,
  frame_rate integer not null,
  resolution text not null,
  codec text not null,
  enabled integer not null default 1,
  auto_delete_days integer
);

create table if not exists storage_disk (
  id integer primary key,
  path text not null unique,
  total_gb real not null,
  available_gb real not null,
  priority_order integer not null,
  is_active integer not null default 0,
  last_scan text
);

create table if not exists recording_segment (
  id integer primary key,
  camera_name text not null references camera (name),
  storage_disk_id integer not null references storage_disk (id),
  mp4_path text not null,
  segment_start text not null,
  segment_end text not null,
  file_size_bytes integer not null
);
create unique index if not exists recording_segment_camera_start
  on recording_segment (camera_name, segment_start);
create index if not exists recording_segment_camera_range
  on recording_segment (camera_name, segment_end);

create table if not exists video (
  id integer primary key,
  unique_id text not null unique,
  camera_name text not null references camera (name),
  booking_id text,
  order_detail_id text,
  video_type text not null,
  start_time text not null,
  end_time text not null,
  local_path text,
  hls_path text,
  mp4_full_path text,
  r2_hls_url text,
  r2_mp4_url text,
  preview_url text,
  thumbnail_url text,
  status text not null,
  request_id text,
  error_message text,
  duration_secs real,
  size_bytes integer,
  resolution text
);
create index if not exists video_booking_camera
  on video (booking_id, camera_name, video_type);

create table if not exists booking (
  booking_id text primary key,
  order_detail_id text not null,
  field_id text not null,
  date text not null,
  start_time text not null,
  end_time text not null,
  status text not null,
  raw_json text not null,
  last_sync_at text not null
);

create table if not exists pending_task (
  id integer primary key,
  task_type text not null,
  task_data text not null,
  attempts integer not null default 0,
  max_attempts integer not null,
  next_retry_at text not null,
  status text not null,
  error_msg text,
  created_at text not null
);
create index if not exists pending_task_ready
  on pending_task (status, next_retry_at);

create table if not exists system_config (
  key text primary key,
  value text not null
);
"#;

/// Opens (or creates) the schema in `conn`, enabling WAL mode and foreign
/// keys the way the teacher's `rusqlite`-based stores always do before
/// touching application tables.
pub fn init(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(SCHEMA_SQL)?;
    let version: Option<i32> = conn
        .query_row("select version from meta where id = 0", [], |r| r.get(0))
        .ok();
    match version {
        None => {
            conn.execute(
                "insert into meta (id, version) values (0, ?1)",
                [EXPECTED_SCHEMA_VERSION],
            )?;
        }
        Some(v) if v != EXPECTED_SCHEMA_VERSION => {
            // No migrations exist yet for this young a schema; a mismatch
            // here means a developer bumped EXPECTED_SCHEMA_VERSION without
            // writing one.
            panic!(
                "schema version {v} on disk does not match expected {EXPECTED_SCHEMA_VERSION}; \
                 a migration is needed but none is registered"
            );
        }
        Some(_) => {}
    }
    Ok(())
}
