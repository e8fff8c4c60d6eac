// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! The transcoder subprocess contract (spec §4.3.1, §6).
//!
//! Neither the Capture Supervisor nor the Booking Engine link an encoding
//! library directly; every encode/mux/overlay operation is delegated to an
//! external `ffmpeg`-compatible binary run as a child process, following the
//! teacher's own posture toward heavyweight media work (`retina` handles
//! only RTSP demuxing in-process; muxing to `.mp4` is the one place the
//! teacher does bring its own encoder, in `mp4.rs` — not applicable here,
//! since this design treats the whole segment/concat/overlay/HLS pipeline as
//! opaque subprocess work per spec §6).

use base::{format_err_t, Error, ErrorKind, ResultExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Duration;
use tracing::{debug, warn};

/// A named `(resolution, bitrate)` pair for HLS variant generation (spec
/// §6's quality preset table).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QualityPreset {
    P1080,
    P720,
    P480,
    P360,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::P1080,
        QualityPreset::P720,
        QualityPreset::P480,
        QualityPreset::P360,
    ];

    pub fn name(self) -> &'static str {
        match self {
            QualityPreset::P1080 => "1080p",
            QualityPreset::P720 => "720p",
            QualityPreset::P480 => "480p",
            QualityPreset::P360 => "360p",
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            QualityPreset::P1080 => (1920, 1080),
            QualityPreset::P720 => (1280, 720),
            QualityPreset::P480 => (854, 480),
            QualityPreset::P360 => (640, 360),
        }
    }

    /// Bitrate in bits/sec, matching the spec's `k` suffixed table.
    pub fn bitrate_bps(self) -> u32 {
        match self {
            QualityPreset::P1080 => 5_000_000,
            QualityPreset::P720 => 2_800_000,
            QualityPreset::P480 => 1_400_000,
            QualityPreset::P360 => 800_000,
        }
    }

    pub fn parse(name: &str) -> Option<QualityPreset> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// Which corner of the frame the watermark is anchored to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    fn overlay_xy(self, margin_px: u32) -> String {
        match self {
            Corner::TopLeft => format!("{margin_px}:{margin_px}"),
            Corner::TopRight => format!("W-w-{margin_px}:{margin_px}"),
            Corner::BottomLeft => format!("{margin_px}:H-h-{margin_px}"),
            Corner::BottomRight => format!("W-w-{margin_px}:H-h-{margin_px}"),
        }
    }
}

/// Wraps the external transcoder binary. Building each of the four argument
/// vectors in spec §6 and enforcing the per-call timeout is this type's
/// whole job; retry policy (spec §4.5's "linear backoff `3n` seconds")
/// belongs to the Booking Engine, not here.
#[derive(Debug, Clone)]
pub struct Transcoder {
    binary: PathBuf,
    ffprobe_binary: PathBuf,
}

impl Default for Transcoder {
    fn default() -> Self {
        Transcoder {
            binary: "ffmpeg".into(),
            ffprobe_binary: "ffprobe".into(),
        }
    }
}

impl Transcoder {
    pub fn new(binary: impl Into<PathBuf>, ffprobe_binary: impl Into<PathBuf>) -> Self {
        Transcoder {
            binary: binary.into(),
            ffprobe_binary: ffprobe_binary.into(),
        }
    }

    /// (a) segmented capture: `-f segment -segment_time N -reset_timestamps 1
    /// -strftime 1 output_%Y%m%d_%H%M%S.ext` (spec §6). Returns the spawned,
    /// still-running child; the caller (Capture Supervisor) owns its
    /// lifecycle and must send it a graceful terminate on shutdown (spec
    /// §4.3 step 7).
    pub fn spawn_segmented_capture(
        &self,
        rtsp_url: &str,
        output_dir: &Path,
        camera_name: &str,
        segment_secs: u32,
        ext: &str,
    ) -> Result<Child, Error> {
        let pattern = output_dir.join(format!("{camera_name}_%Y%m%d_%H%M%S.{ext}"));
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-nostdin",
            "-rtsp_transport",
            "tcp",
            "-i",
            rtsp_url,
            "-c",
            "copy",
            "-f",
            "segment",
            "-segment_time",
            &segment_secs.to_string(),
            "-reset_timestamps",
            "1",
            "-strftime",
            "1",
        ])
        .arg(&pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd.spawn()
            .err_context(ErrorKind::Transient, format!("spawning segmented capture for {camera_name}"))
    }

    /// (b) concat: joins `segment_paths` via the concat demuxer and trims to
    /// `[trim_start_secs, trim_end_secs)` measured from the start of the
    /// first segment — the caller (Booking Engine) is responsible for
    /// computing that offset from the booking window and segment start
    /// times, since the transcoder has no notion of wall-clock time.
    pub async fn concat(
        &self,
        segment_paths: &[PathBuf],
        trim_start_secs: f64,
        trim_end_secs: f64,
        list_path: &Path,
        out_path: &Path,
    ) -> Result<(), Error> {
        if segment_paths.is_empty() {
            return Err(format_err_t!(NotApplicable, "no segments to concatenate"));
        }
        write_concat_list(list_path, segment_paths).await?;
        self.run(
            [
                "-nostdin",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
            ]
            .into_iter()
            .map(str::to_string)
            .chain([list_path.to_string_lossy().into_owned()])
            .chain(
                ["-ss", &trim_start_secs.to_string(), "-to", &trim_end_secs.to_string(), "-c", "copy"]
                    .into_iter()
                    .map(str::to_string),
            )
            .chain([out_path.to_string_lossy().into_owned()]),
            Duration::from_secs(120),
        )
        .await
    }

    /// (c) overlay: `-filter_complex "overlay=…:alpha=α"` anchored to
    /// `corner` with `margin_px` and `opacity` (spec §4.5 step 4).
    pub async fn overlay_watermark(
        &self,
        input: &Path,
        watermark: &Path,
        out_path: &Path,
        corner: Corner,
        margin_px: u32,
        opacity: f32,
    ) -> Result<(), Error> {
        let xy = corner.overlay_xy(margin_px);
        let filter = format!(
            "[1:v]format=rgba,colorchannelmixer=aa={opacity}[wm];[0:v][wm]overlay={xy}:format=auto[v]"
        );
        self.run(
            [
                "-nostdin".to_string(),
                "-i".to_string(),
                input.to_string_lossy().into_owned(),
                "-i".to_string(),
                watermark.to_string_lossy().into_owned(),
                "-filter_complex".to_string(),
                filter,
                "-map".to_string(),
                "[v]".to_string(),
                "-map".to_string(),
                "0:a?".to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-c:a".to_string(),
                "copy".to_string(),
                out_path.to_string_lossy().into_owned(),
            ],
            Duration::from_secs(180),
        )
        .await
    }

    /// A single-frame thumbnail captured one second in.
    pub async fn thumbnail(&self, input: &Path, out_path: &Path) -> Result<(), Error> {
        self.run(
            [
                "-nostdin".to_string(),
                "-ss".to_string(),
                "1".to_string(),
                "-i".to_string(),
                input.to_string_lossy().into_owned(),
                "-frames:v".to_string(),
                "1".to_string(),
                out_path.to_string_lossy().into_owned(),
            ],
            Duration::from_secs(30),
        )
        .await
    }

    /// Interval-sampled preview clip (spec §4.5 step 5): one short sample
    /// every `interval_secs`, concatenated into a single clip no longer than
    /// `clip_secs`.
    pub async fn preview(
        &self,
        input: &Path,
        out_path: &Path,
        interval_secs: u32,
        clip_secs: u32,
    ) -> Result<(), Error> {
        let filter = format!(
            "select='lt(mod(t,{interval_secs}),1)',setpts=N/FRAME_RATE/TB"
        );
        self.run(
            [
                "-nostdin".to_string(),
                "-i".to_string(),
                input.to_string_lossy().into_owned(),
                "-vf".to_string(),
                filter,
                "-t".to_string(),
                clip_secs.to_string(),
                "-an".to_string(),
                out_path.to_string_lossy().into_owned(),
            ],
            Duration::from_secs(120),
        )
        .await
    }

    /// (d) HLS: one variant per enabled preset (skipping any above the
    /// source resolution per the Open Question resolution in
    /// `SPEC_FULL.md`), plus a hand-written master playlist referencing
    /// them.
    pub async fn hls(
        &self,
        input: &Path,
        out_dir: &Path,
        source_height: i64,
        enabled: &[QualityPreset],
    ) -> Result<Vec<QualityPreset>, Error> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .err_context(ErrorKind::Transient, format!("creating hls dir {}", out_dir.display()))?;

        let mut generated = Vec::new();
        for preset in enabled {
            let (w, h) = preset.dimensions();
            if h as i64 > source_height {
                debug!(preset = preset.name(), source_height, "skipping HLS variant above source resolution");
                continue;
            }
            let variant_dir = out_dir.join(preset.name());
            tokio::fs::create_dir_all(&variant_dir)
                .await
                .err_kind(ErrorKind::Transient)?;
            let playlist = variant_dir.join("stream.m3u8");
            let segment_pattern = variant_dir.join("seg_%03d.ts");
            self.run(
                [
                    "-nostdin".to_string(),
                    "-i".to_string(),
                    input.to_string_lossy().into_owned(),
                    "-vf".to_string(),
                    format!("scale={w}:{h}"),
                    "-b:v".to_string(),
                    preset.bitrate_bps().to_string(),
                    "-c:a".to_string(),
                    "aac".to_string(),
                    "-f".to_string(),
                    "hls".to_string(),
                    "-hls_time".to_string(),
                    "6".to_string(),
                    "-hls_playlist_type".to_string(),
                    "vod".to_string(),
                    "-hls_segment_filename".to_string(),
                    segment_pattern.to_string_lossy().into_owned(),
                    playlist.to_string_lossy().into_owned(),
                ],
                Duration::from_secs(180),
            )
            .await?;
            generated.push(*preset);
        }

        if generated.is_empty() {
            return Err(format_err_t!(Configuration, "no HLS variant fits the source resolution"));
        }

        let mut master = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        for preset in &generated {
            let (w, h) = preset.dimensions();
            master.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}/stream.m3u8\n",
                preset.bitrate_bps(),
                w,
                h,
                preset.name()
            ));
        }
        tokio::fs::write(out_dir.join("master.m3u8"), master)
            .await
            .err_kind(ErrorKind::Transient)?;
        Ok(generated)
    }

    /// Computes the output duration in seconds for step 7's validation
    /// ("compute actual output duration").
    pub async fn probe_duration_secs(&self, path: &Path) -> Result<f64, Error> {
        let output = Command::new(&self.ffprobe_binary)
            .args([
                "-v",
                "quiet",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .err_context(ErrorKind::Transient, format!("probing duration of {}", path.display()))?;
        if !output.status.success() {
            return Err(format_err_t!(
                Transient,
                "ffprobe exited with {} probing {}",
                output.status,
                path.display()
            ));
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|e| format_err_t!(Integrity, "unparseable ffprobe duration output: {e}"))
    }

    async fn run(&self, args: impl IntoIterator<Item = String>, timeout: Duration) -> Result<(), Error> {
        let args: Vec<String> = args.into_iter().collect();
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let child = cmd.spawn().err_context(ErrorKind::Transient, "spawning transcoder")?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| format_err_t!(Transient, "transcoder timed out after {timeout:?}"))?
            .err_context(ErrorKind::Transient, "waiting for transcoder")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(10).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n");
            warn!(status = %output.status, stderr = %tail, "transcoder invocation failed");
            return Err(format_err_t!(Transient, "transcoder exited with {}: {tail}", output.status));
        }
        Ok(())
    }
}

async fn write_concat_list(list_path: &Path, segment_paths: &[PathBuf]) -> Result<(), Error> {
    if let Some(parent) = list_path.parent() {
        tokio::fs::create_dir_all(parent).await.err_kind(ErrorKind::Transient)?;
    }
    let mut contents = String::new();
    for p in segment_paths {
        // ffmpeg's concat demuxer needs single quotes escaped as `'\''`.
        let escaped = p.to_string_lossy().replace('\'', "'\\''");
        contents.push_str(&format!("file '{escaped}'\n"));
    }
    let mut f = tokio::fs::File::create(list_path)
        .await
        .err_context(ErrorKind::Transient, format!("creating concat list {}", list_path.display()))?;
    f.write_all(contents.as_bytes())
        .await
        .err_kind(ErrorKind::Transient)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_offsets_use_ffmpeg_overlay_expressions() {
        assert_eq!(Corner::BottomRight.overlay_xy(20), "W-w-20:H-h-20");
        assert_eq!(Corner::TopLeft.overlay_xy(10), "10:10");
    }

    #[test]
    fn quality_presets_match_bitrate_table() {
        assert_eq!(QualityPreset::P1080.bitrate_bps(), 5_000_000);
        assert_eq!(QualityPreset::P360.dimensions(), (640, 360));
        assert_eq!(QualityPreset::parse("720p"), Some(QualityPreset::P720));
        assert_eq!(QualityPreset::parse("bogus"), None);
    }

    #[tokio::test]
    async fn concat_list_escapes_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let list_path = dir.path().join("list.txt");
        write_concat_list(&list_path, &[PathBuf::from("/tmp/a b.mp4"), PathBuf::from("/tmp/o'Brien.mp4")])
            .await
            .unwrap();
        let contents = tokio::fs::read_to_string(&list_path).await.unwrap();
        assert!(contents.contains("file '/tmp/a b.mp4'"));
        assert!(contents.contains("o'\\''Brien"));
    }
}
