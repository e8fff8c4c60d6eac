// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! The Offline Queue (spec §4.6): a `pending_task` worker pool that retries
//! uploads and API notifications dropped by a flaky or absent remote.
//!
//! Grounded on the teacher's `writer.rs` syncer loop for the general shape
//! of "claim work, run it, ack or reschedule on failure" against a
//! SQLite-backed queue, generalized from "one syncer per open database" to
//! "N workers pulling from one `pending_task` table" per spec §4.6.

use crate::booking::Rendered;
use crate::remote::{RemoteApi, SaveVideoRequest};
use crate::s3::ObjectStore;
use base::concurrency::Controller;
use base::{Error, ErrorKind, ResultExt};
use db::{PendingTask, Store, Video};
use jiff::Timestamp;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `base_backoff_secs * 2^attempts + jitter([0, base_backoff_secs))` (spec
/// §4.6, invariant 6).
pub fn backoff(base_backoff_secs: i64) -> impl Fn(i64) -> jiff::SignedDuration {
    move |attempts: i64| {
        let exp = base_backoff_secs.saturating_mul(1i64 << attempts.clamp(0, 30));
        let jitter = if base_backoff_secs > 0 {
            rand::thread_rng().gen_range(0..base_backoff_secs)
        } else {
            0
        };
        jiff::SignedDuration::from_secs(exp.saturating_add(jitter))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    pub field: &'static str,
    pub local_path: std::path::PathBuf,
    pub remote_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirUpload {
    pub field: &'static str,
    pub local_dir: std::path::PathBuf,
    pub remote_key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct R2UploadPayload {
    pub unique_id: String,
    pub files: Vec<FileUpload>,
    pub dirs: Vec<DirUpload>,
}

impl R2UploadPayload {
    /// Builds the upload plan from a rendered video's artifacts under the
    /// stable key layout spec §4.5 step 8 names.
    pub(crate) fn from_rendered(unique_id: &str, rendered: &Rendered) -> Self {
        let mut files = vec![
            FileUpload {
                field: "mp4",
                local_path: rendered.mp4_path.clone(),
                remote_key: format!("mp4/{unique_id}.mp4"),
            },
            FileUpload {
                field: "preview",
                local_path: rendered.preview_path.clone(),
                remote_key: format!("preview/{unique_id}.mp4"),
            },
            FileUpload {
                field: "thumbnail",
                local_path: rendered.thumbnail_path.clone(),
                remote_key: format!("thumbnail/{unique_id}.png"),
            },
        ];
        files.retain(|f| f.local_path.as_os_str().len() > 0);
        let dirs = rendered
            .hls_dir
            .as_ref()
            .map(|dir| {
                vec![DirUpload {
                    field: "hls",
                    local_dir: dir.clone(),
                    remote_key_prefix: format!("hls/{unique_id}"),
                }]
            })
            .unwrap_or_default();
        R2UploadPayload { unique_id: unique_id.to_string(), files, dirs }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadedUrls {
    pub mp4_url: Option<String>,
    pub preview_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub hls_url: Option<String>,
}

/// Uploads every entry in `payload` and validates it with `HEAD` (spec
/// invariant 2); used both for a direct inline upload attempt and as the
/// `r2_upload` task handler.
pub async fn execute_upload(store: &ObjectStore, payload: &R2UploadPayload) -> Result<UploadedUrls, Error> {
    let mut urls = UploadedUrls::default();
    for file in &payload.files {
        let url = store.put_file(&file.local_path, &file.remote_key).await?;
        store.head_validate(&file.remote_key).await?;
        match file.field {
            "mp4" => urls.mp4_url = Some(url),
            "preview" => urls.preview_url = Some(url),
            "thumbnail" => urls.thumbnail_url = Some(url),
            _ => {}
        }
    }
    for dir in &payload.dirs {
        let url = store.put_dir(&dir.local_dir, &dir.remote_key_prefix).await?;
        if dir.field == "hls" {
            urls.hls_url = Some(url);
        }
    }
    Ok(urls)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AyoNotifyPayload {
    pub unique_id: String,
    pub request_id: Option<String>,
    pub booking_id: Option<String>,
    pub video_type: String,
    pub stream_url: Option<String>,
    pub download_url: Option<String>,
    pub start_time: String,
    pub end_time: String,
}

impl AyoNotifyPayload {
    pub(crate) fn from_video(video: &Video) -> Self {
        AyoNotifyPayload {
            unique_id: video.unique_id.clone(),
            request_id: video.request_id.clone(),
            booking_id: video.booking_id.clone(),
            video_type: match video.video_type {
                db::VideoType::Full => "full".to_string(),
                db::VideoType::Clip => "clip".to_string(),
            },
            stream_url: video.r2_hls_url.clone(),
            download_url: video.r2_mp4_url.clone(),
            start_time: video.start_time.to_string(),
            end_time: video.end_time.to_string(),
        }
    }
}

/// Notifies the remote booking API that a video is ready; used both inline
/// and as the `ayo_api_notify` task handler.
pub async fn execute_notify(remote: &RemoteApi, payload: &AyoNotifyPayload) -> Result<(), Error> {
    remote
        .save_video(&SaveVideoRequest {
            request_id: payload.request_id.as_deref().unwrap_or(&payload.unique_id),
            booking_id: payload.booking_id.as_deref(),
            video_type: &payload.video_type,
            stream_url: payload.stream_url.as_deref(),
            download_url: payload.download_url.as_deref(),
            start_time: &payload.start_time,
            end_time: &payload.end_time,
        })
        .await
}

pub struct Worker {
    pub store: Arc<Store>,
    pub object_store: Arc<ObjectStore>,
    pub remote: Arc<RemoteApi>,
    pub controller: Arc<Controller>,
    pub shutdown_rx: base::shutdown::Receiver,
    pub poll_interval: std::time::Duration,
    pub base_backoff_secs: i64,
}

impl Worker {
    /// Runs until shutdown, claiming and dispatching ready tasks once per
    /// tick (spec §4.6 steps 1-4).
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_ready().await {
                        warn!(error = %e.chain(), "offline queue drain failed");
                    }
                }
                _ = self.shutdown_rx.cancelled() => {
                    info!("offline queue worker shutting down");
                    return;
                }
            }
        }
    }

    async fn drain_ready(&mut self) -> Result<(), Error> {
        let now = Timestamp::now();
        let (capacity, _in_flight) = self.controller.current("pending_task");
        let limit = capacity as i64;
        let tasks = self.store.claim_ready_tasks(now, limit)?;
        for task in tasks {
            self.dispatch(task).await;
        }
        Ok(())
    }

    async fn dispatch(&self, task: PendingTask) {
        let _permit = self.controller.acquire("pending_task").await;
        let result = match task.task_type.as_str() {
            "r2_upload" => self.handle_upload(&task).await,
            "ayo_api_notify" => self.handle_notify(&task).await,
            other => Err(base::format_err_t!(Configuration, "unknown task_type {other:?}")),
        };
        match result {
            Ok(()) => {
                if let Err(e) = self.store.complete_task(task.id) {
                    warn!(task_id = task.id, error = %e.chain(), "failed to mark task completed");
                }
                debug!(task_id = task.id, task_type = %task.task_type, "task completed");
            }
            Err(e) => {
                warn!(task_id = task.id, task_type = %task.task_type, error = %e.chain(), "task attempt failed");
                if let Err(e2) =
                    self.store.fail_task(task.id, &e.chain(), backoff(self.base_backoff_secs), Timestamp::now())
                {
                    warn!(task_id = task.id, error = %e2.chain(), "failed to record task failure");
                }
            }
        }
    }

    async fn handle_upload(&self, task: &PendingTask) -> Result<(), Error> {
        let payload: R2UploadPayload = serde_json::from_value(task.task_data.clone()).err_kind(ErrorKind::Integrity)?;
        let urls = match execute_upload(&self.object_store, &payload).await {
            Ok(urls) => urls,
            Err(e) if e.kind() == ErrorKind::Integrity => {
                // Corrupt artifact: the same bytes will never pass HEAD
                // validation on a second try, so don't let `dispatch`
                // reschedule this task. Mark the video failed and report it
                // upstream instead (end-to-end scenario 5).
                warn!(unique_id = %payload.unique_id, error = %e.chain(), "queued artifact failed integrity validation");
                if let Some(video) = self.store.get_video(&payload.unique_id)? {
                    self.store.set_video_status(&video.unique_id, db::VideoStatus::Failed, Some(&e.chain()))?;
                    if let Some(request_id) = &video.request_id {
                        let _ = self.remote.mark_video_requests_invalid(std::slice::from_ref(request_id), false).await;
                    }
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if let Some(mut video) = self.store.get_video(&payload.unique_id)? {
            video.r2_mp4_url = urls.mp4_url.or(video.r2_mp4_url);
            video.preview_url = urls.preview_url.or(video.preview_url);
            video.thumbnail_url = urls.thumbnail_url.or(video.thumbnail_url);
            video.r2_hls_url = urls.hls_url.or(video.r2_hls_url);
            self.store.upsert_video(&video)?;
            if video.is_ready_and_complete() || video.r2_mp4_url.is_some() {
                let notify = AyoNotifyPayload::from_video(&video);
                self.store.enqueue_task(
                    "ayo_api_notify",
                    &serde_json::to_value(&notify).err_kind(ErrorKind::Configuration)?,
                    3,
                    Timestamp::now(),
                )?;
            }
        }
        Ok(())
    }

    async fn handle_notify(&self, task: &PendingTask) -> Result<(), Error> {
        let payload: AyoNotifyPayload = serde_json::from_value(task.task_data.clone()).err_kind(ErrorKind::Integrity)?;
        execute_notify(&self.remote, &payload).await?;
        if let Some(video) = self.store.get_video(&payload.unique_id)? {
            self.store.set_video_status(&video.unique_id, db::VideoStatus::Ready, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_adds_jitter() {
        let f = backoff(30);
        for attempts in 1..5 {
            let d = f(attempts);
            let base = 30 * (1i64 << attempts);
            let secs = d.as_secs();
            assert!(secs >= base && secs < base + 30, "attempt {attempts}: {secs}s not in [{base}, {})", base + 30);
        }
    }

    #[test]
    fn ayo_notify_payload_defaults_request_id_to_unique_id() {
        let video = Video {
            id: 1,
            unique_id: "BK-1_cam1_20260727T100000Z".into(),
            camera_name: "cam1".into(),
            booking_id: Some("BK-1".into()),
            order_detail_id: Some("OD-1".into()),
            video_type: db::VideoType::Full,
            start_time: "2026-07-27T10:00:00Z".parse().unwrap(),
            end_time: "2026-07-27T11:00:00Z".parse().unwrap(),
            local_path: None,
            hls_path: None,
            mp4_full_path: None,
            r2_hls_url: None,
            r2_mp4_url: Some("https://cdn.example.com/mp4/x.mp4".into()),
            preview_url: None,
            thumbnail_url: None,
            status: db::VideoStatus::Uploading,
            request_id: None,
            error_message: None,
            duration_secs: None,
            size_bytes: None,
            resolution: None,
        };
        let payload = AyoNotifyPayload::from_video(&video);
        assert_eq!(payload.request_id, None);
        assert_eq!(payload.download_url.as_deref(), Some("https://cdn.example.com/mp4/x.mp4"));
    }
}
