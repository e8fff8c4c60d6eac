// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! The Booking Engine (spec §4.5): turns a `(booking, camera)` pair into a
//! single uploaded, notified `Video` artifact.
//!
//! The teacher has no equivalent pipeline (its videos are always live
//! recordings, never materialized from a time-window query after the fact),
//! so this module's control flow is grounded directly in spec §4.5's
//! numbered steps; the retry/backoff shape around each fallible step follows
//! the teacher's general posture of "classify, log, and either retry or
//! give up" from `base::Error`/`ErrorKind`.

use crate::remote::RemoteApi;
use crate::s3::ObjectStore;
use crate::transcoder::{Corner, QualityPreset, Transcoder};
use crate::watermark;
use base::concurrency::Controller;
use base::{format_err_t, Error, ErrorKind, ResultExt};
use db::{Booking, BookingStatus, Camera, RecordingSegment, StorageDisk, Store, Video, VideoStatus, VideoType};
use jiff::{tz::TimeZone, Timestamp};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Spec §4.5: "Consumes a `(booking, camera)` pair when `now >=
/// booking.end_time + tolerance`."
pub const PROCESSING_TOLERANCE_SECS: i64 = 180;

#[derive(Debug, Clone)]
pub struct WatermarkConfig {
    pub corner: Corner,
    pub margin_px: u32,
    pub opacity: f32,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enabled_qualities: Vec<QualityPreset>,
    pub watermark: WatermarkConfig,
    pub preview_interval_secs: u32,
    pub preview_clip_secs: u32,
    pub enable_duration_check: bool,
    pub venue_code: String,
}

impl EngineConfig {
    /// Reads the system-config keys backing every field (spec §6: venue
    /// code, enabled HLS qualities, watermark position/margin/opacity,
    /// duration-check toggle). Called once at startup; an admin edit takes
    /// effect on the next process restart, same as the teacher's own
    /// config-file reload story.
    pub fn from_store(store: &Store) -> Result<EngineConfig, Error> {
        let enabled_qualities = store
            .get_config_str("enabled_qualities")?
            .unwrap_or_else(|| "1080p,720p,480p,360p".to_string())
            .split(',')
            .filter_map(|s| QualityPreset::parse(s.trim()))
            .collect();
        let corner = match store.get_config_str("watermark_position")?.as_deref() {
            Some("top_left") => Corner::TopLeft,
            Some("top_right") => Corner::TopRight,
            Some("bottom_left") => Corner::BottomLeft,
            _ => Corner::BottomRight,
        };
        let venue_code = store
            .get_config_str("venue_code")?
            .ok_or_else(|| base::format_err_t!(Configuration, "venue_code is not set"))?;
        Ok(EngineConfig {
            enabled_qualities,
            watermark: WatermarkConfig {
                corner,
                margin_px: store.get_config_i64("watermark_margin_px", 20)? as u32,
                opacity: store.get_config_f64("watermark_opacity", 0.8)? as f32,
            },
            preview_interval_secs: store.get_config_i64("preview_interval_secs", 5)? as u32,
            preview_clip_secs: store.get_config_i64("preview_clip_secs", 2)? as u32,
            enable_duration_check: store.get_config_bool("enable_video_duration_check", true)?,
            venue_code,
        })
    }
}

/// Deterministic artifact identity (spec glossary: "Unique ID"), so a
/// retried invocation of the same `(booking_id|request_id, camera,
/// start_time)` upserts the same row instead of duplicating it.
pub fn unique_id(booking_or_request_id: &str, camera_name: &str, start_time: Timestamp) -> String {
    let stamp = start_time.to_zoned(TimeZone::UTC).strftime("%Y%m%dT%H%M%SZ");
    format!("{booking_or_request_id}_{camera_name}_{stamp}")
}

pub struct BookingEngine {
    pub store: Arc<Store>,
    pub transcoder: Transcoder,
    pub remote: Arc<RemoteApi>,
    pub object_store: Arc<ObjectStore>,
    pub controller: Arc<Controller>,
    pub config: EngineConfig,
}

/// A source-agnostic production request: either a synced booking (spec
/// §4.5) or a button-triggered clip (`SPEC_FULL.md`'s Arduino button
/// channel) reusing the same pipeline with `video_type = clip`.
pub struct ProduceRequest {
    pub unique_id: String,
    pub camera_name: String,
    pub booking_id: Option<String>,
    pub order_detail_id: Option<String>,
    pub request_id: Option<String>,
    pub video_type: VideoType,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

impl BookingEngine {
    /// Runs the full pipeline for one booking sweep candidate (spec §4.5
    /// steps 1-10). Never returns an error for booking-level problems
    /// (not-applicable, configuration, transient-after-retries): those are
    /// logged and leave the Video row in `failed`/absent so the sweep moves
    /// on to the next candidate, per §7's "no error is allowed to kill a
    /// worker".
    pub async fn process_booking(&self, disk: &StorageDisk, booking: &Booking, camera: &Camera) -> Result<(), Error> {
        let uid = unique_id(&booking.booking_id, &camera.name, booking.start_time);

        if booking.status == BookingStatus::Cancelled {
            if let Some(existing) = self.store.active_full_video(&booking.booking_id, &camera.name)? {
                self.store.set_video_status(&existing.unique_id, VideoStatus::Cancelled, None)?;
                info!(booking_id = %booking.booking_id, camera = %camera.name, "booking cancelled, existing video marked cancelled");
            }
            return Ok(());
        }

        // Step 1 (outer TOCTOU check).
        if self.store.active_full_video(&booking.booking_id, &camera.name)?.is_some() {
            return Ok(());
        }

        let _permit = self.controller.acquire("booking").await;

        // Step 1 (inner TOCTOU check, after acquiring the worker slot).
        if self.store.active_full_video(&booking.booking_id, &camera.name)?.is_some() {
            return Ok(());
        }

        let req = ProduceRequest {
            unique_id: uid,
            camera_name: camera.name.clone(),
            booking_id: Some(booking.booking_id.clone()),
            order_detail_id: Some(booking.order_detail_id.clone()),
            request_id: None,
            video_type: VideoType::Full,
            start_time: booking.start_time,
            end_time: booking.end_time,
        };
        self.produce(disk, camera, req).await
    }

    /// The shared pipeline body (spec §4.5 steps 2-10), used for both
    /// booking-derived full videos and button-triggered clips.
    pub async fn produce(&self, disk: &StorageDisk, camera: &Camera, req: ProduceRequest) -> Result<(), Error> {
        let mut video = Video {
            id: 0,
            unique_id: req.unique_id.clone(),
            camera_name: req.camera_name.clone(),
            booking_id: req.booking_id.clone(),
            order_detail_id: req.order_detail_id.clone(),
            video_type: req.video_type,
            start_time: req.start_time,
            end_time: req.end_time,
            local_path: None,
            hls_path: None,
            mp4_full_path: None,
            r2_hls_url: None,
            r2_mp4_url: None,
            preview_url: None,
            thumbnail_url: None,
            status: VideoStatus::Initial,
            request_id: req.request_id.clone(),
            error_message: None,
            duration_secs: None,
            size_bytes: None,
            resolution: Some(format!("{}x{}", camera.width, camera.height)),
        };
        self.store.upsert_video(&video)?;

        // Step 2: segment selection.
        let segments = self.store.segments_in_range(&camera.name, req.start_time, req.end_time)?;
        if segments.is_empty() {
            info!(unique_id = %req.unique_id, "no recorded segments in range, skipping");
            self.store.set_video_status(&req.unique_id, VideoStatus::Failed, Some("no segments in range"))?;
            return Ok(());
        }

        self.store.set_video_status(&req.unique_id, VideoStatus::Processing, None)?;
        video.status = VideoStatus::Processing;

        let rendered = match self.render(disk, camera, &req, &segments).await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(unique_id = %req.unique_id, error = %e.chain(), "booking processing failed");
                self.store.set_video_status(&req.unique_id, VideoStatus::Failed, Some(&e.chain()))?;
                if let Some(request_id) = &req.request_id {
                    let _ = self.remote.mark_video_requests_invalid(std::slice::from_ref(request_id), false).await;
                }
                return Ok(());
            }
        };

        video.local_path = Some(rendered.mp4_path.to_string_lossy().into_owned());
        video.mp4_full_path = video.local_path.clone();
        video.hls_path = rendered.hls_dir.as_ref().map(|p| p.to_string_lossy().into_owned());
        video.duration_secs = Some(rendered.duration_secs);
        self.store.upsert_video(&video)?;

        let payload = crate::queue::R2UploadPayload::from_rendered(&req.unique_id, &rendered);
        self.upload_and_notify(&mut video, &payload).await
    }

    async fn render(
        &self,
        disk: &StorageDisk,
        camera: &Camera,
        req: &ProduceRequest,
        segments: &[RecordingSegment],
    ) -> Result<Rendered, Error> {
        let first_start = segments[0].segment_start;
        let trim_start = (req.start_time.as_second() - first_start.as_second()).max(0) as f64;
        let trim_end = trim_start + (req.end_time.as_second() - req.start_time.as_second()) as f64;

        let merge_dir = db::dir::tmp_dir(disk, &camera.name, "merge");
        let list_path = merge_dir.join(format!("{}.txt", req.unique_id));
        let merged_path = merge_dir.join(format!("{}.mp4", req.unique_id));
        retry(3, || {
            self.transcoder.concat(
                &segments.iter().map(|s| PathBuf::from(&s.mp4_path)).collect::<Vec<_>>(),
                trim_start,
                trim_end,
                &list_path,
                &merged_path,
            )
        })
        .await?;

        let watermark_path = watermark::cached_path(&self.store, &self.remote, disk, &self.config.venue_code).await?;
        let watermark_dir = db::dir::tmp_dir(disk, &camera.name, "watermark");
        tokio::fs::create_dir_all(&watermark_dir).await.err_kind(ErrorKind::Transient)?;
        let watermarked_path = watermark_dir.join(format!("{}.mp4", req.unique_id));
        retry(3, || {
            self.transcoder.overlay_watermark(
                &merged_path,
                &watermark_path,
                &watermarked_path,
                self.config.watermark.corner,
                self.config.watermark.margin_px,
                self.config.watermark.opacity,
            )
        })
        .await?;

        let preview_dir = db::dir::tmp_dir(disk, &camera.name, "preview");
        tokio::fs::create_dir_all(&preview_dir).await.err_kind(ErrorKind::Transient)?;
        let preview_path = preview_dir.join(format!("{}.mp4", req.unique_id));
        retry(3, || {
            self.transcoder.preview(
                &watermarked_path,
                &preview_path,
                self.config.preview_interval_secs,
                self.config.preview_clip_secs,
            )
        })
        .await?;

        let thumb_dir = db::dir::tmp_dir(disk, &camera.name, "thumbnail");
        tokio::fs::create_dir_all(&thumb_dir).await.err_kind(ErrorKind::Transient)?;
        let thumb_path = thumb_dir.join(format!("{}.png", req.unique_id));
        retry(3, || self.transcoder.thumbnail(&watermarked_path, &thumb_path)).await?;

        let hls_dir = if self.config.enabled_qualities.is_empty() {
            None
        } else {
            let dir = db::dir::tmp_dir(disk, &camera.name, "hls").join(&req.unique_id);
            retry(3, || self.transcoder.hls(&watermarked_path, &dir, camera.height, &self.config.enabled_qualities)).await?;
            Some(dir)
        };

        let duration_secs = self.transcoder.probe_duration_secs(&watermarked_path).await?;
        let wanted = (req.end_time.as_second() - req.start_time.as_second()) as f64;
        if self.config.enable_duration_check && duration_secs < wanted - 1.0 {
            if let Some(request_id) = &req.request_id {
                let _ = self.remote.mark_video_requests_invalid(std::slice::from_ref(request_id), true).await;
            }
            return Err(format_err_t!(
                Integrity,
                "rendered duration {duration_secs:.1}s shorter than booking window {wanted:.1}s"
            ));
        }

        Ok(Rendered {
            mp4_path: watermarked_path,
            preview_path,
            thumbnail_path: thumb_path,
            hls_dir,
            duration_secs,
        })
    }

    /// Steps 8-9: upload (directly if the remote is reachable, otherwise via
    /// the offline queue) and notify, finalizing `ready` on success.
    async fn upload_and_notify(&self, video: &mut Video, payload: &crate::queue::R2UploadPayload) -> Result<(), Error> {
        if self.remote.health_check().await {
            match self.try_upload(payload).await {
                Ok(urls) => {
                    apply_urls(video, &urls);
                    self.store.upsert_video(video)?;
                }
                Err(e) if e.kind() == ErrorKind::Integrity => {
                    // Corrupt artifact (end-to-end scenario 5): never the
                    // same bytes twice, so don't retry it. Mark the video
                    // failed and tell the remote the request needs redoing.
                    warn!(unique_id = %video.unique_id, error = %e.chain(), "uploaded artifact failed integrity validation");
                    self.store.set_video_status(&video.unique_id, VideoStatus::Failed, Some(&e.chain()))?;
                    if let Some(request_id) = &video.request_id {
                        let _ = self.remote.mark_video_requests_invalid(std::slice::from_ref(request_id), false).await;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(unique_id = %video.unique_id, error = %e.chain(), "direct upload failed, falling back to offline queue");
                    self.store.set_video_status(&video.unique_id, VideoStatus::Uploading, None)?;
                    self.store.enqueue_task("r2_upload", &serde_json::to_value(payload).err_kind(ErrorKind::Configuration)?, 5, Timestamp::now())?;
                    return Ok(());
                }
            }
        } else {
            self.store.set_video_status(&video.unique_id, VideoStatus::Uploading, None)?;
            self.store.enqueue_task("r2_upload", &serde_json::to_value(payload).err_kind(ErrorKind::Configuration)?, 5, Timestamp::now())?;
            return Ok(());
        }

        let notify = crate::queue::AyoNotifyPayload::from_video(video);
        if self.remote.health_check().await {
            if let Err(e) = self.try_notify(&notify).await {
                warn!(unique_id = %video.unique_id, error = %e.chain(), "direct notify failed, enqueuing");
                self.store.enqueue_task("ayo_api_notify", &serde_json::to_value(&notify).err_kind(ErrorKind::Configuration)?, 3, Timestamp::now())?;
                return Ok(());
            }
        } else {
            self.store.enqueue_task("ayo_api_notify", &serde_json::to_value(&notify).err_kind(ErrorKind::Configuration)?, 3, Timestamp::now())?;
            return Ok(());
        }

        self.store.set_video_status(&video.unique_id, VideoStatus::Ready, None)?;
        info!(unique_id = %video.unique_id, "video ready");
        Ok(())
    }

    async fn try_upload(&self, payload: &crate::queue::R2UploadPayload) -> Result<crate::queue::UploadedUrls, Error> {
        retry(5, || crate::queue::execute_upload(&self.object_store, payload)).await
    }

    async fn try_notify(&self, payload: &crate::queue::AyoNotifyPayload) -> Result<(), Error> {
        retry(3, || crate::queue::execute_notify(&self.remote, payload)).await
    }
}

pub(crate) struct Rendered {
    pub(crate) mp4_path: PathBuf,
    pub(crate) preview_path: PathBuf,
    pub(crate) thumbnail_path: PathBuf,
    pub(crate) hls_dir: Option<PathBuf>,
    pub(crate) duration_secs: f64,
}

fn apply_urls(video: &mut Video, urls: &crate::queue::UploadedUrls) {
    video.r2_mp4_url = urls.mp4_url.clone();
    video.preview_url = urls.preview_url.clone();
    video.thumbnail_url = urls.thumbnail_url.clone();
    video.r2_hls_url = urls.hls_url.clone();
}

/// Linear backoff `3n` seconds between attempts (spec §4.5's retry policy
/// for steps 3-5 and 8-9); a `NotApplicable` or `Integrity` error
/// short-circuits immediately rather than retrying a doomed operation.
pub async fn retry<T, F, Fut>(attempts: u32, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut last_err = None;
    for n in 1..=attempts {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if matches!(e.kind(), ErrorKind::NotApplicable | ErrorKind::Integrity | ErrorKind::Configuration) {
                    return Err(e);
                }
                if n < attempts {
                    tokio::time::sleep(std::time::Duration::from_secs(3 * n as u64)).await;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| format_err_t!(Transient, "retry loop exited without attempting")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_is_deterministic() {
        let t: Timestamp = "2026-07-27T10:00:00Z".parse().unwrap();
        assert_eq!(unique_id("BK-0003", "CAMERA_1", t), "BK-0003_CAMERA_1_20260727T100000Z");
        assert_eq!(unique_id("BK-0003", "CAMERA_1", t), unique_id("BK-0003", "CAMERA_1", t));
    }

    #[tokio::test]
    async fn retry_short_circuits_on_not_applicable() {
        let mut calls = 0;
        let result: Result<(), Error> = retry(3, || {
            calls += 1;
            async { Err(format_err_t!(NotApplicable, "booking in the future")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1, "NotApplicable should not be retried");
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = retry(3, || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(format_err_t!(Transient, "not yet"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }
}
