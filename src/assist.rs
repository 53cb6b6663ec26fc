//! AssistNow Online background task.
//!
//! Every ten minutes the task downloads fresh ephemeris assistance for
//! the receiver and replaces the blob file atomically. The controller
//! feeds it the latest good fix so the download can be trimmed to the
//! station's surroundings. The blob itself is consumed by the injection
//! path on demand; this task only keeps the file current.

use log::{debug, error, info, warn};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use tokio::sync::watch;

use crate::utils::replace_file_atomic;

const ASSISTNOW_URL: &str = "http://online-live1.services.u-blox.com/GetOnlineData.ashx";

const FETCH_INTERVAL: Duration = Duration::from_secs(600);

/// UBX-MGA-INI-TIME_UTC header including its fixed 0x18 byte length.
const MGA_INI_TIME_HEADER: [u8; 6] = [0xB5, 0x62, 0x13, 0x40, 0x18, 0x00];

/// Whole MGA-INI-TIME message: 8 byte envelope + 24 byte payload.
const MGA_INI_TIME_LEN: usize = 32;

/// Any MGA message starts like this after stripping.
const MGA_HEADER: [u8; 3] = [0xB5, 0x62, 0x13];

#[derive(Debug, Error)]
pub enum AssistError {
    #[error("cannot read token file {path}: {source}")]
    Token { path: PathBuf, source: io::Error },

    #[error("assistance download failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("response carries no MGA data")]
    MalformedBlob,
}

/// Last good fix, degrees / metres.
#[derive(Debug, Clone, Copy)]
pub struct LocationHint {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    pub acc_m: f64,
}

/// Shared location hint slot: written by the controller on every good
/// fix, read by the fetch task when building the request.
#[derive(Clone, Default)]
pub struct LocationHandle(Arc<Mutex<Option<LocationHint>>>);

impl LocationHandle {
    pub fn update(&self, hint: LocationHint) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(hint);
        }
    }

    fn get(&self) -> Option<LocationHint> {
        self.0.lock().ok().and_then(|slot| *slot)
    }
}

/// `~/.keys/ublox_token.txt`
pub fn default_token_path() -> PathBuf {
    PathBuf::from(std::env::var_os("HOME").unwrap_or_default()).join(".keys/ublox_token.txt")
}

/// Reads and trims the service token.
pub fn read_token(path: &Path) -> Result<String, AssistError> {
    let raw = fs::read_to_string(path).map_err(|source| AssistError::Token {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(raw.trim_matches(['\r', '\n', ' '].as_slice()).to_string())
}

/// Drops leading MGA-INI-TIME messages: the host already knows the time,
/// injecting a stale one would do harm. A remainder that is not MGA data
/// means the service answered with something else entirely.
pub fn strip_ini_time(mut data: &[u8]) -> Option<&[u8]> {
    while data.len() >= MGA_INI_TIME_LEN && data[..6] == MGA_INI_TIME_HEADER {
        data = &data[MGA_INI_TIME_LEN..];
    }

    if data.len() >= 3 && data[..3] == MGA_HEADER {
        Some(data)
    } else {
        None
    }
}

pub struct AssistTask {
    token: String,
    blob_path: PathBuf,
    location: LocationHandle,
    client: reqwest::Client,

    /// Last good blob, kept in memory across failed refreshes
    data: Vec<u8>,

    shutdown: watch::Receiver<bool>,
}

impl AssistTask {
    pub fn new(
        token: String,
        blob_path: PathBuf,
        location: LocationHandle,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            token,
            blob_path,
            location,
            client: reqwest::Client::new(),
            data: Vec::new(),
            shutdown,
        }
    }

    pub async fn run(&mut self) {
        info!("assistance task deployed, {:?} refresh period", FETCH_INTERVAL);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.refresh().await;

            tokio::select! {
                _ = tokio::time::sleep(FETCH_INTERVAL) => {},
                _ = self.shutdown.changed() => break,
            }
        }

        info!("assistance task stopped");
    }

    async fn refresh(&mut self) {
        match self.fetch().await {
            Ok(data) => {
                if data == self.data {
                    debug!("assistance data unchanged");
                    return;
                }

                info!(
                    "writing {} bytes of assistance data to {}",
                    data.len(),
                    self.blob_path.display()
                );

                if let Err(e) = replace_file_atomic(&self.blob_path, &data) {
                    error!("cannot write {}: {}", self.blob_path.display(), e);
                }

                self.data = data;
            },
            Err(e) => {
                warn!("{}, falling back to the on-disk blob", e);
                self.reload_from_disk();
            },
        }
    }

    async fn fetch(&self) -> Result<Vec<u8>, AssistError> {
        let url = self.request_url();

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        match strip_ini_time(&body) {
            Some(data) => Ok(data.to_vec()),
            None => Err(AssistError::MalformedBlob),
        }
    }

    fn request_url(&self) -> String {
        let mut url = format!(
            "{}?token={};gnss=gps;datatype=eph",
            ASSISTNOW_URL, self.token
        );

        if let Some(hint) = self.location.get() {
            url.push_str(&format!(
                ";lat={:.6};lon={:.6};alt={:.6};pacc={:.6};filteronpos",
                hint.lat_deg, hint.lon_deg, hint.alt_m, hint.acc_m
            ));
        }

        url
    }

    fn reload_from_disk(&mut self) {
        match fs::read(&self.blob_path) {
            Ok(data) => self.data = data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => error!("cannot read {}: {}", self.blob_path.display(), e),
        }
    }
}
