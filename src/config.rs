// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! The `fieldcast` TOML configuration file.
//!
//! Loaded once at `fieldcast run` startup. Cameras listed here are upserted
//! into the Metadata Store every time the file is (re-)loaded, so the store
//! stays the source of truth an admin can also edit via `fieldcast config`
//! (spec §3: "mutable by admin via hot-reload").

use base::{Error, ErrorKind, ResultExt};
use db::{Camera, Store};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_db_dir() -> PathBuf {
    "/var/lib/fieldcast/db".into()
}

fn default_worker_pool_batch() -> i64 {
    10
}

/// Top-level configuration file object (`/etc/fieldcast.toml` by default).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Directory holding the SQLite3 metadata store.
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,

    /// The number of worker threads used by the asynchronous runtime.
    /// Defaults to the number of cores on the system.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    pub venue: VenueConfig,

    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    #[serde(default)]
    pub storage: StorageConfig,

    pub remote_api: RemoteApiConfig,

    pub object_store: ObjectStoreConfig,

    #[serde(default)]
    pub arduino: Option<ArduinoConfig>,

    /// Batch size for the Offline Queue's `claim_ready_tasks` poll.
    #[serde(default = "default_worker_pool_batch")]
    pub pending_task_batch: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueConfig {
    pub code: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    pub name: String,
    pub field_id: String,
    #[serde(default)]
    pub button_no: Option<i64>,
    pub ip: String,
    #[serde(default = "default_rtsp_port")]
    pub port: u16,
    #[serde(default)]
    pub path: String,
    pub user: String,
    pub password: String,
    pub width: i64,
    pub height: i64,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: i64,
    pub resolution: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_delete_days: Option<i64>,
}

fn default_rtsp_port() -> u16 {
    554
}

fn default_frame_rate() -> i64 {
    30
}

fn default_codec() -> String {
    "h264".to_string()
}

fn default_enabled() -> bool {
    true
}

impl CameraConfig {
    fn into_camera(self) -> Camera {
        Camera {
            name: self.name,
            button_no: self.button_no,
            field_id: self.field_id,
            ip: self.ip,
            port: self.port,
            path: self.path,
            user: self.user,
            password: self.password,
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            resolution: self.resolution,
            codec: self.codec,
            enabled: self.enabled,
            auto_delete_days: self.auto_delete_days,
        }
    }
}

/// Explicit storage disk paths (spec §4.2: "any explicitly registered path")
/// that bypass `/proc/mounts` discovery.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub explicit_paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteApiConfig {
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub public_base_url: String,
}

fn default_region() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArduinoConfig {
    pub device: PathBuf,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    9600
}

pub fn read(path: &Path) -> Result<ConfigFile, Error> {
    let raw = std::fs::read_to_string(path)
        .err_context(ErrorKind::Configuration, format!("reading config file {}", path.display()))?;
    toml::from_str(&raw)
        .err_context(ErrorKind::Configuration, format!("parsing config file {}", path.display()))
}

impl ConfigFile {
    /// Upserts every configured camera and the venue credentials into the
    /// store. Called once at `run` startup and available to `fieldcast
    /// config` subcommands for a dry-run reload.
    pub fn seed_store(&self, store: &Store) -> Result<(), Error> {
        for cam in &self.cameras {
            store.upsert_camera(&cam.clone().into_camera())?;
        }
        store.set_config("venue_code", &self.venue.code)?;
        store.set_config("venue_secret_key", &self.venue.secret_key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [venue]
            code = "acme-sports"
            secretKey = "sekret"

            [remoteApi]
            baseUrl = "https://api.example.com"

            [objectStore]
            endpoint = "https://s3.example.com"
            bucket = "fieldcast"
            accessKeyId = "AKIA"
            secretAccessKey = "shh"
            publicBaseUrl = "https://cdn.example.com"

            [[cameras]]
            name = "CAMERA_1"
            fieldId = "field-2892"
            ip = "192.168.1.10"
            user = "admin"
            password = "hunter2"
            width = 1920
            height = 1080
            resolution = "1080p"
        "#;
        let cfg: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(cfg.db_dir, PathBuf::from("/var/lib/fieldcast/db"));
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.cameras[0].port, 554);
        assert_eq!(cfg.cameras[0].frame_rate, 30);
        assert!(cfg.cameras[0].enabled);
        assert_eq!(cfg.pending_task_batch, 10);
    }

    #[test]
    fn seeds_store_with_cameras_and_venue() {
        let store = Store::open_in_memory().unwrap();
        let toml = r#"
            [venue]
            code = "acme-sports"
            secretKey = "sekret"

            [remoteApi]
            baseUrl = "https://api.example.com"

            [objectStore]
            endpoint = "https://s3.example.com"
            bucket = "fieldcast"
            accessKeyId = "AKIA"
            secretAccessKey = "shh"
            publicBaseUrl = "https://cdn.example.com"

            [[cameras]]
            name = "CAMERA_1"
            fieldId = "field-2892"
            ip = "192.168.1.10"
            user = "admin"
            password = "hunter2"
            width = 1920
            height = 1080
            resolution = "1080p"
        "#;
        let cfg: ConfigFile = toml::from_str(toml).unwrap();
        cfg.seed_store(&store).unwrap();
        assert_eq!(store.list_cameras(false).unwrap().len(), 1);
        assert_eq!(
            store.get_config_str("venue_code").unwrap().as_deref(),
            Some("acme-sports")
        );
    }
}
