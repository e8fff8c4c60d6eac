// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! RTSP connectivity probe (spec §4.3 step 3: "Probe the camera (short-
//! timeout connection test) before full capture").
//!
//! Grounded on the teacher's `stream.rs` (`RetinaStreamInner::play`), which
//! uses `retina::client::Session::describe` then `.setup()` to find and
//! negotiate the video stream before ever pulling a frame. This module stops
//! right there — a successful DESCRIBE + SETUP is proof the camera is
//! reachable and speaking RTSP, which is all the Capture Supervisor needs
//! before handing the URL to the transcoder subprocess; pulling frames
//! in-process (the teacher's next step, to mux into `.mp4` itself) isn't
//! needed here since segment capture happens out-of-process.

use base::{format_err_t, Error, ErrorKind};
use url::Url;

const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// A single RTSP DESCRIBE + SETUP round trip against `url`, bounded by the
/// spec's 5 s subprocess-probe timeout.
pub async fn probe(url: &Url) -> Result<(), Error> {
    tokio::time::timeout(PROBE_TIMEOUT, probe_inner(url))
        .await
        .map_err(|_| format_err_t!(Transient, "camera probe timed out after {PROBE_TIMEOUT:?}"))?
}

async fn probe_inner(url: &Url) -> Result<(), Error> {
    let session_options = retina::client::SessionOptions::default()
        .user_agent(format!("fieldcast/{}", env!("CARGO_PKG_VERSION")));
    let mut session = retina::client::Session::describe(url.clone(), session_options)
        .await
        .map_err(|e| format_err_t!(Transient, "RTSP DESCRIBE failed: {e}"))?;
    let video_i = session
        .streams()
        .iter()
        .position(|s| s.media() == "video" && matches!(s.encoding_name(), "h264" | "h265" | "jpeg"))
        .ok_or_else(|| format_err_t!(Configuration, "camera offers no supported video stream"))?;
    session
        .setup(video_i, retina::client::SetupOptions::default())
        .await
        .map_err(|e| format_err_t!(Transient, "RTSP SETUP failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_rejects_unparseable_host_quickly() {
        let url: Url = "rtsp://127.0.0.1:1/nonexistent".parse().unwrap();
        let result = probe(&url).await;
        assert!(result.is_err(), "nothing is listening on 127.0.0.1:1, probe must fail");
    }
}
