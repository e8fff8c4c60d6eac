// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! `fieldcast run`: boots every long-running subsystem (spec §2's
//! dependency order — Store, then Disk Manager, Capture Supervisors,
//! Booking Engine, Offline Queue, Scheduler) and runs them until a
//! shutdown signal arrives.
//!
//! Grounded on the teacher's `cmds::run` top-level structure: a
//! config-driven `tokio::runtime::Builder`, a `base::shutdown` broadcast
//! fed by SIGINT/SIGTERM with a second-signal immediate-exit escape hatch,
//! and an orderly "ask everything to stop, then join it" shutdown
//! sequence (construction order here is Store → Disk Manager → Capture
//! Supervisors/Booking Engine/Offline Queue → Scheduler, per design note
//! #9's "break the cyclic lifetime with construction ordering").

use crate::booking::{BookingEngine, EngineConfig};
use crate::capture::{self, Supervisor};
use crate::config::ConfigFile;
use crate::queue;
use crate::remote::RemoteApi;
use crate::s3::ObjectStore;
use crate::scheduler::Scheduler;
use crate::transcoder::Transcoder;
use base::concurrency::Controller;
use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

#[derive(Bpaf, Debug)]
#[bpaf(command("run"))]
pub struct Args {
    #[bpaf(external(crate::parse_config_path))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = crate::config::read(&args.config)?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(worker_threads) = config.worker_threads {
        builder.worker_threads(worker_threads);
    }
    let rt = builder.build().err_kind(base::ErrorKind::Fatal)?;
    let r = rt.block_on(async_run(config));
    rt.shutdown_background();
    r
}

use base::ResultExt;

async fn async_run(config: ConfigFile) -> Result<i32, Error> {
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let mut shutdown_tx = Some(shutdown_tx);

    tokio::pin! {
        let int = signal(SignalKind::interrupt()).err_kind(base::ErrorKind::Fatal)?;
        let term = signal(SignalKind::terminate()).err_kind(base::ErrorKind::Fatal)?;
        let inner = inner(config, shutdown_rx);
    }

    tokio::select! {
        _ = int.recv() => {
            info!("received SIGINT; shutting down gracefully. Send another SIGINT or SIGTERM to shut down immediately.");
            shutdown_tx.take();
        },
        _ = term.recv() => {
            info!("received SIGTERM; shutting down gracefully. Send another SIGINT or SIGTERM to shut down immediately.");
            shutdown_tx.take();
        },
        result = &mut inner => return result,
    }

    tokio::select! {
        _ = int.recv() => Err(base::format_err_t!(Fatal, "immediate shutdown due to second signal (SIGINT)")),
        _ = term.recv() => Err(base::format_err_t!(Fatal, "immediate shutdown due to second signal (SIGTERM)")),
        result = &mut inner => result,
    }
}

async fn inner(config: ConfigFile, shutdown_rx: base::shutdown::Receiver) -> Result<i32, Error> {
    // Store first; every other component takes a handle to it (design note #9).
    let store = Arc::new(super::open_store(&config.db_dir, true)?);
    config.seed_store(&store)?;
    info!(db_dir = %config.db_dir.display(), "metadata store opened and seeded from config");

    // Disk Manager: run one scan synchronously before anything tries to
    // record, so the first Capture Supervisor cycle already has an active
    // disk to ask for (spec §4.2's scheduled scan then runs every 4h).
    let disk_scan_paths = config.storage.explicit_paths.clone();
    let active_id = {
        let store = store.clone();
        let paths = disk_scan_paths.clone();
        tokio::task::spawn_blocking(move || db::dir::run_scan(&store, &paths, jiff::Timestamp::now()))
            .await
            .err_kind(base::ErrorKind::Fatal)??
    };
    let initial_active_disk = store.active_disk()?;
    if initial_active_disk.as_ref().map(|d| d.id) != Some(active_id) {
        warn!("disk scan elected a disk that didn't come back as active; continuing with whatever the store reports");
    }
    let (active_disk_tx, active_disk_rx) = capture::active_disk_channel(initial_active_disk);
    info!(disk_id = active_id, "initial active storage disk elected");

    // Concurrency Controller: one gate per worker pool (spec §4.4), seeded
    // from system config; the Scheduler re-reads and resizes these every tick.
    let controller = Arc::new(Controller::new());
    controller.register("booking", store.get_config_i64("booking_worker_concurrency", 2)?.max(1) as usize);
    controller.register("video_request", store.get_config_i64("video_request_worker_concurrency", 2)?.max(1) as usize);
    controller.register("pending_task", store.get_config_i64("pending_task_worker_concurrency", 3)?.max(1) as usize);

    let remote = Arc::new(RemoteApi::new(
        config.remote_api.base_url.clone(),
        config.venue.code.clone(),
        config.venue.secret_key.clone(),
        Duration::from_secs(config.remote_api.timeout_secs),
    )?);
    let object_store = Arc::new(
        ObjectStore::new(
            &config.object_store.endpoint,
            &config.object_store.region,
            config.object_store.bucket.clone(),
            &config.object_store.access_key_id,
            &config.object_store.secret_access_key,
            config.object_store.public_base_url.clone(),
        )
        .await,
    );
    let transcoder = Transcoder::default();

    let engine = Arc::new(BookingEngine {
        store: store.clone(),
        transcoder: transcoder.clone(),
        remote: remote.clone(),
        object_store: object_store.clone(),
        controller: controller.clone(),
        config: EngineConfig::from_store(&store)?,
    });

    // One Capture Supervisor task per enabled camera (spec §4.3).
    let mut capture_handles = Vec::new();
    for camera in store.list_cameras(true)? {
        let supervisor = Supervisor {
            store: store.clone(),
            transcoder: transcoder.clone(),
            camera,
            active_disk_rx: active_disk_rx.clone(),
            shutdown_rx: shutdown_rx.clone(),
            segment_secs: 60,
        };
        capture_handles.push(tokio::spawn(supervisor.run()));
    }
    info!(cameras = capture_handles.len(), "capture supervisors started");

    // Offline Queue worker pool (spec §4.6).
    let queue_worker = queue::Worker {
        store: store.clone(),
        object_store: object_store.clone(),
        remote: remote.clone(),
        controller: controller.clone(),
        shutdown_rx: shutdown_rx.clone(),
        poll_interval: Duration::from_secs(15),
        base_backoff_secs: 30,
    };
    let queue_handle = tokio::spawn(queue_worker.run());

    // Arduino button channel (optional; spec §9's "bounded channel of
    // ButtonPress events").
    let button_handle = config.arduino.as_ref().map(|arduino| {
        let rx = crate::button::spawn_reader(arduino.device.display().to_string(), arduino.baud_rate);
        tokio::spawn(crate::button::run(rx, store.clone(), engine.clone(), shutdown_rx.clone()))
    });

    // Scheduler: booking sync, booking processing, video-request processing,
    // disk scan, cleanup (spec §4.7). Owns the only other handle to
    // `active_disk_tx` besides the initial scan above.
    let scheduler = Scheduler {
        store: store.clone(),
        engine: engine.clone(),
        remote: remote.clone(),
        controller: controller.clone(),
        active_disk_tx,
        disk_scan_paths,
        shutdown_rx: shutdown_rx.clone(),
    };
    let scheduler_handle = tokio::spawn(scheduler.run());

    info!("fieldcast is running");
    let mut shutdown_wait = shutdown_rx.clone();
    shutdown_wait.cancelled().await;

    info!("shutting down; waiting for capture supervisors, offline queue, scheduler, and button handler");
    for h in capture_handles {
        let _ = h.await;
    }
    let _ = queue_handle.await;
    let _ = scheduler_handle.await;
    if let Some(h) = button_handle {
        let _ = h.await;
    }

    info!("exiting");
    Ok(0)
}
