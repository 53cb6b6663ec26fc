/*
 * rtk-base drives a u-blox high precision receiver into time mode and
 * broadcasts the RTCM3 corrections it then produces over UDP.
 *
 * Three long-running tasks cooperate:
 *   - the I/O worker owns the serial link and the deframer,
 *   - the controller owns the receiver configuration state,
 *   - the assistance task keeps the AssistNow blob file current.
 */

use env_logger::{Builder, Target};

use log::info;

use std::process::exit;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::{
    signal,
    sync::{mpsc, watch},
};

mod antenna;
mod assist;
mod cli;
mod controller;
mod device;
mod protocol;
mod utils;

use crate::{
    assist::{AssistTask, LocationHandle, LocationHint},
    cli::Cli,
    controller::{Controller, Mode},
    device::{broadcast::Broadcaster, IoWorker},
};

#[tokio::main]
async fn main() {
    let mut builder = Builder::from_default_env();

    builder
        .target(Target::Stdout)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    let cli = Cli::new();

    let config = match cli.config() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("rtk-base: {}", e);
            exit(1);
        },
    };

    // the assistance token is a startup requirement, not a runtime one
    let assistance = match &config.assistance_file {
        Some(blob_path) => {
            let token_path = assist::default_token_path();
            match assist::read_token(&token_path) {
                Ok(token) => Some((token, blob_path.clone())),
                Err(e) => {
                    eprintln!("rtk-base: {}", e);
                    exit(1);
                },
            }
        },
        None => None,
    };

    info!("starting in {} mode", config.mode);

    let broadcaster = Broadcaster::discover()
        .unwrap_or_else(|e| panic!("Failed to open the UDP broadcast socket: {}", e));

    // shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // UBX inbox, I/O worker towards controller
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

    // configuration mailbox, controller towards I/O worker
    let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();

    let udp_stream_active = Arc::new(AtomicBool::new(false));
    let link_ready = Arc::new(AtomicBool::new(false));

    let location_hint = LocationHandle::default();

    // a fixed station seeds the hint so the very first assistance
    // download is already position filtered
    if config.mode == Mode::Fixed && assistance.is_some() {
        if let Some(location) = &config.location {
            location_hint.update(LocationHint {
                lat_deg: location.lat_deg,
                lon_deg: location.lon_deg,
                alt_m: location.height_m,
                acc_m: location.accuracy_m,
            });
        }
    }

    let io_worker = IoWorker::new(
        inbox_tx,
        mailbox_rx,
        broadcaster,
        udp_stream_active.clone(),
        link_ready.clone(),
        shutdown_rx.clone(),
    );

    let io_handle = std::thread::spawn(move || io_worker.run());

    let mut controller = Controller::new(
        config.clone(),
        inbox_rx,
        mailbox_tx,
        udp_stream_active,
        link_ready,
        assistance.as_ref().map(|_| location_hint.clone()),
        shutdown_rx.clone(),
    );

    let controller_handle = tokio::spawn(async move { controller.run().await });

    let assist_handle = assistance.map(|(token, blob_path)| {
        let mut task = AssistTask::new(token, blob_path, location_hint, shutdown_rx);
        tokio::spawn(async move { task.run().await })
    });

    signal::ctrl_c()
        .await
        .unwrap_or_else(|e| panic!("Tokio signal handling error: {}", e));

    info!("interrupted, shutting down");
    let _ = shutdown_tx.send(true);

    let _ = io_handle.join();
    let _ = controller_handle.await;

    if let Some(handle) = assist_handle {
        let _ = handle.await;
    }

    info!("bye");
}
