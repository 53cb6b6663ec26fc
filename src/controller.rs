//! Receiver state machine.
//!
//! Sole consumer of decoded UBX traffic and sole author of the
//! receiver's configuration: reset, navigation rate, message activation
//! set and time mode all funnel through here, as does the decision
//! whether RTCM corrections are worth broadcasting at all.

use log::{debug, error, info, trace, warn};

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};

use tokio::sync::{mpsc, watch};

use crate::assist::{LocationHandle, LocationHint};
use crate::cli::Config;
use crate::protocol::commands::{self, ResetKind};
use crate::protocol::ubx::{self, Message, NavHpPosLlh, NavPvt, NavSvin, UbxFrame};
use crate::utils::replace_file_atomic;

const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Statuses decay back to undefined when their bearer messages stop.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Breather between silencing obsolete messages and activating the
/// required ones; the receiver offers no ack round-trip worth waiting on.
const ACTIVATION_GUARD: Duration = Duration::from_secs(1);

/// Clock offset samples averaged for the time difference estimate.
const TIME_DIFF_WINDOW: usize = 20;

/// gpsFix / fixType value for "time only".
const FIX_TIME_ONLY: u8 = 5;

const RTCM_1005: (u8, u8) = (0xF5, 0x05);
const RTCM_1074: (u8, u8) = (0xF5, 0x4A);
const RTCM_1077: (u8, u8) = (0xF5, 0x4D);
const RTCM_1084: (u8, u8) = (0xF5, 0x54);
const RTCM_1087: (u8, u8) = (0xF5, 0x57);
const RTCM_1230: (u8, u8) = (0xF5, 0xE6);

/// What the base station is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Survey own position, then stream corrections
    SurveyIn,
    /// Known position, stream corrections immediately
    Fixed,
    /// No corrections, log high precision fixes instead
    OutputPositions,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SurveyIn => write!(f, "survey-in"),
            Self::Fixed => write!(f, "fixed"),
            Self::OutputPositions => write!(f, "output-positions"),
        }
    }
}

/// What the receiver is currently observed doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Undefined,
    Surveying,
    Time,
    Streaming,
    Acquiring,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Surveying => write!(f, "surveying"),
            Self::Time => write!(f, "time"),
            Self::Streaming => write!(f, "streaming"),
            Self::Acquiring => write!(f, "acquiring"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixStatus {
    Undefined,
    Ok,
    NotOk,
}

/// Named activation sets. Applying one silences everything it declares
/// obsolete and activates everything it requires, so the receiver's
/// output is always exactly one of these, never a partial union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageSet {
    Svin,
    Time,
    OutputPositions,
    Status,
}

impl std::fmt::Display for MessageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Svin => write!(f, "svin"),
            Self::Time => write!(f, "time"),
            Self::OutputPositions => write!(f, "output_positions"),
            Self::Status => write!(f, "status"),
        }
    }
}

/// The standard NMEA outputs, NMEA-GxGGA through NMEA-GvLW.
fn nmea_outputs() -> Vec<(u8, u8)> {
    (0x00..=0x0F).map(|id| (0xF0, id)).collect()
}

impl MessageSet {
    fn required(self) -> Vec<(u8, u8)> {
        match self {
            Self::Svin => vec![ubx::NAV_SVIN, ubx::NAV_STATUS],
            Self::Time => vec![
                ubx::NAV_STATUS,
                RTCM_1005,
                RTCM_1074, // GPS MSM4
                RTCM_1084, // GLONASS MSM4
                RTCM_1230, // GLONASS code-phase biases
            ],
            Self::OutputPositions => vec![ubx::NAV_HPPOSLLH],
            Self::Status => vec![ubx::NAV_PVT],
        }
    }

    fn obsolete(self) -> Vec<(u8, u8)> {
        let mut ids = nmea_outputs();

        match self {
            Self::Svin => {
                ids.push(ubx::NAV_HPPOSLLH);
                ids.extend([
                    RTCM_1005, RTCM_1074, RTCM_1077, RTCM_1084, RTCM_1087, RTCM_1230,
                ]);
            },
            Self::Time => {
                ids.push(ubx::NAV_SVIN);
                ids.push(ubx::NAV_HPPOSLLH);
                ids.extend([RTCM_1077, RTCM_1087]);
            },
            Self::OutputPositions => {
                ids.push(ubx::NAV_SVIN);
                ids.extend([
                    RTCM_1005, RTCM_1074, RTCM_1077, RTCM_1084, RTCM_1087, RTCM_1230,
                ]);
            },
            Self::Status => {
                ids.push(ubx::NAV_SVIN);
                ids.push(ubx::NAV_HPPOSLLH);
                ids.extend([RTCM_1077, RTCM_1087]);
            },
        }

        ids
    }
}

pub struct Controller {
    config: Arc<Config>,

    status: Status,
    fix_status: FixStatus,

    /// Currently applied activation set, None right after a reset
    msg_mode: Option<MessageSet>,

    /// Currently applied navigation rate, 0 right after a reset
    rate_ms: u16,

    last_status: Instant,
    last_fix: Instant,

    /// Clock offset ring for the time difference estimate
    time_diffs: VecDeque<f64>,

    inbox: mpsc::UnboundedReceiver<UbxFrame>,
    mailbox: mpsc::UnboundedSender<Vec<u8>>,

    udp_stream_active: Arc<AtomicBool>,
    link_ready: Arc<AtomicBool>,

    /// AssistNow location hint intake, when assistance is enabled
    location_hint: Option<LocationHandle>,

    shutdown: watch::Receiver<bool>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        inbox: mpsc::UnboundedReceiver<UbxFrame>,
        mailbox: mpsc::UnboundedSender<Vec<u8>>,
        udp_stream_active: Arc<AtomicBool>,
        link_ready: Arc<AtomicBool>,
        location_hint: Option<LocationHandle>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            status: Status::Undefined,
            fix_status: FixStatus::Undefined,
            msg_mode: None,
            rate_ms: 0,
            last_status: Instant::now(),
            last_fix: Instant::now(),
            time_diffs: VecDeque::with_capacity(TIME_DIFF_WINDOW),
            inbox,
            mailbox,
            udp_stream_active,
            link_ready,
            location_hint,
            shutdown,
        }
    }

    pub async fn run(&mut self) {
        info!("controller deployed in {} mode", self.config.mode);

        while !*self.shutdown.borrow() {
            if !self.link_ready.load(Ordering::Acquire) {
                self.sleep(TICK_PERIOD).await;
                continue;
            }

            self.tick().await;
            self.sleep(TICK_PERIOD).await;
        }

        info!("controller stopped");
    }

    async fn tick(&mut self) {
        match self.config.mode {
            Mode::SurveyIn => self.drive_survey_in().await,
            Mode::Fixed => self.drive_fixed().await,
            Mode::OutputPositions => self.drive_output_positions().await,
        }

        self.process_messages();
        self.age_statuses();
    }

    async fn drive_survey_in(&mut self) {
        match self.status {
            Status::Undefined => {
                self.reset_receiver();
                self.sleep(Duration::from_secs(1)).await;
                self.set_rate(500);
                self.set_messages(MessageSet::Svin).await;

                let survey = &self.config.survey;
                info!(
                    "starting survey-in, min duration {} s, target accuracy {:.3} m",
                    survey.min_duration_s, survey.accuracy_m
                );
                self.send(commands::cfg_tmode3_survey_in(
                    survey.min_duration_s,
                    survey.accuracy_m,
                ));

                self.set_udp_stream(false);
                self.sleep(Duration::from_secs(2)).await;
            },
            Status::Surveying => {
                self.set_udp_stream(false);
            },
            Status::Time => {
                self.set_rate(1000);
                self.set_messages(MessageSet::Time).await;
                self.set_udp_stream(true);
            },
            _ => {},
        }
    }

    async fn drive_fixed(&mut self) {
        match self.status {
            Status::Undefined => {
                self.reset_receiver();
                self.set_rate(1000);
                self.set_messages(MessageSet::Svin).await;

                if let Some(location) = &self.config.location {
                    info!(
                        "entering fixed time mode at {:.7}, {:.7}, {:.4} m",
                        location.lat_deg, location.lon_deg, location.height_m
                    );
                    self.send(commands::cfg_tmode3_fixed(
                        location.lat_deg,
                        location.lon_deg,
                        location.height_m,
                        location.accuracy_m,
                    ));
                }

                self.sleep(Duration::from_secs(1)).await;
                self.set_udp_stream(false);
            },
            Status::Time => {
                self.set_messages(MessageSet::Time).await;
                self.set_udp_stream(true);
            },
            _ => {},
        }
    }

    async fn drive_output_positions(&mut self) {
        match self.status {
            Status::Streaming => {},
            Status::Acquiring => {
                if self.fix_status == FixStatus::Ok {
                    self.set_messages(MessageSet::OutputPositions).await;
                }
            },
            _ => {
                self.reset_receiver();
                self.send(commands::cfg_tmode3_disabled());
                self.set_rate(1000);
                self.set_messages(MessageSet::Status).await;
            },
        }
    }

    /// Hot reset. The receiver comes back with default outputs, so the
    /// cached rate and activation set are forgotten here.
    fn reset_receiver(&mut self) {
        info!("sending {} reset", ResetKind::Hot);
        self.send(commands::cfg_rst(ResetKind::Hot));
        self.msg_mode = None;
        self.rate_ms = 0;
    }

    fn set_rate(&mut self, rate_ms: u16) {
        if self.rate_ms == rate_ms {
            return;
        }

        self.rate_ms = rate_ms;
        debug!("setting navigation rate to {} ms", rate_ms);
        self.send(commands::cfg_rate(rate_ms));
    }

    async fn set_messages(&mut self, set: MessageSet) {
        if self.msg_mode == Some(set) {
            return;
        }

        self.msg_mode = Some(set);
        let (required, obsolete) = self.message_plan(set);

        debug!("silencing {} obsolete messages", obsolete.len());
        for id in obsolete {
            self.send(commands::cfg_msg(id, 0));
        }

        self.sleep(ACTIVATION_GUARD).await;

        info!("activating message set \"{}\"", set);
        for id in required {
            self.send(commands::cfg_msg(id, 1));
        }
    }

    /// The set's own tables, with NAV-PVT riding along whenever
    /// assistance or clock offset estimation needs continuous fix data.
    fn message_plan(&self, set: MessageSet) -> (Vec<(u8, u8)>, Vec<(u8, u8)>) {
        let mut required = set.required();
        let mut obsolete = set.obsolete();

        if self.config.assistance_file.is_some() || self.config.time_difference_file.is_some() {
            obsolete.retain(|id| *id != ubx::NAV_PVT);
            if !required.contains(&ubx::NAV_PVT) {
                required.push(ubx::NAV_PVT);
            }
        }

        (required, obsolete)
    }

    fn send(&mut self, bytes: Vec<u8>) {
        // failure means the I/O worker is gone, i.e. shutdown
        let _ = self.mailbox.send(bytes);
    }

    fn set_udp_stream(&mut self, active: bool) {
        if self.udp_stream_active.swap(active, Ordering::Relaxed) != active {
            info!(
                "UDP correction stream {}",
                if active { "enabled" } else { "disabled" }
            );
        }
    }

    fn process_messages(&mut self) {
        while let Ok(frame) = self.inbox.try_recv() {
            match frame.decode() {
                Message::Svin(svin) => self.handle_svin(&svin, &frame),
                Message::Status(status) => {
                    if status.gps_fix == FIX_TIME_ONLY {
                        self.set_status(Status::Time, frame.received);
                    }
                },
                Message::Pvt(pvt) => self.handle_pvt(&pvt, &frame),
                Message::HpPosLlh(pos) => self.handle_position(&pos, &frame),
                Message::TimeUtc(utc) => {
                    trace!(
                        "NAV-TIMEUTC {:04}-{:02}-{:02} {:02}:{:02}:{:02} valid {}",
                        utc.year,
                        utc.month,
                        utc.day,
                        utc.hour,
                        utc.min,
                        utc.sec,
                        utc.valid_utc
                    );
                },
                Message::Other => {
                    trace!("ignoring UBX {:02X} {:02X}", frame.class, frame.id);
                },
            }
        }
    }

    fn handle_svin(&mut self, svin: &NavSvin, frame: &UbxFrame) {
        info!(
            "survey-in: dur {} s, mean acc {:.3} m, valid {}, obs {}, in progress {}",
            svin.duration_s,
            svin.mean_acc_m(),
            svin.valid,
            svin.num_obs,
            svin.in_progress
        );

        if svin.in_progress {
            self.set_status(Status::Surveying, frame.received);
        }
    }

    fn handle_pvt(&mut self, pvt: &NavPvt, frame: &UbxFrame) {
        trace!(
            "NAV-PVT {:04}-{:02}-{:02} {:02}:{:02}:{:02} fix {} ok {}",
            pvt.year,
            pvt.month,
            pvt.day,
            pvt.hour,
            pvt.min,
            pvt.sec,
            pvt.fix_type,
            pvt.gnss_fix_ok
        );

        let fix_ok = pvt.gnss_fix_ok && pvt.valid_time && pvt.valid_date && pvt.fully_resolved;

        if fix_ok {
            self.fix_status = FixStatus::Ok;

            if let Some(hint) = &self.location_hint {
                hint.update(LocationHint {
                    lat_deg: pvt.lat_deg(),
                    lon_deg: pvt.lon_deg(),
                    alt_m: pvt.height_m(),
                    acc_m: pvt.h_acc_mm as f64 * 1.0E-3,
                });
            }

            if self.config.time_difference_file.is_some() {
                self.update_time_difference(pvt, frame.received_unix);
            }
        } else {
            self.fix_status = FixStatus::NotOk;

            if self.config.mode == Mode::OutputPositions {
                self.set_status(Status::Acquiring, frame.received);
            }
        }

        self.last_fix = frame.received;

        if pvt.fix_type == FIX_TIME_ONLY {
            self.set_status(Status::Time, frame.received);
        }
    }

    fn handle_position(&mut self, pos: &NavHpPosLlh, frame: &UbxFrame) {
        if self.config.mode != Mode::OutputPositions {
            return;
        }

        self.set_status(Status::Streaming, frame.received);

        let line = format!(
            "{}, {:.9}, {:.9}, {:.4}\n",
            frame.received_unix,
            pos.lat_deg(),
            pos.lon_deg(),
            pos.height_m()
        );

        let appended = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.config.positions_file)
            .and_then(|mut f| f.write_all(line.as_bytes()));

        if let Err(e) = appended {
            error!(
                "cannot log position to {}: {}",
                self.config.positions_file.display(),
                e
            );
        }
    }

    /// One clock offset sample per good NAV-PVT: GNSS UTC minus host
    /// receive time, plus the configured link latency. The written value
    /// is the mean over the current window.
    fn update_time_difference(&mut self, pvt: &NavPvt, received_unix: f64) {
        let calendar = Utc.with_ymd_and_hms(
            pvt.year as i32,
            pvt.month as u32,
            pvt.day as u32,
            pvt.hour as u32,
            pvt.min as u32,
            pvt.sec as u32,
        );

        let t_gnss = match calendar.single() {
            Some(t) => t.timestamp() as f64 + pvt.nano as f64 * 1.0E-9,
            None => {
                warn!("NAV-PVT carries an invalid date, skipping clock offset sample");
                return;
            },
        };

        let diff = (t_gnss - received_unix) + self.config.latency_s;

        if self.time_diffs.len() == TIME_DIFF_WINDOW {
            self.time_diffs.pop_front();
        }
        self.time_diffs.push_back(diff);

        let mean = self.time_diffs.iter().sum::<f64>() / self.time_diffs.len() as f64;

        if let Some(path) = &self.config.time_difference_file {
            if let Err(e) = replace_file_atomic(path, format!("{:.6}\n", mean).as_bytes()) {
                error!("cannot write clock offset to {}: {}", path.display(), e);
            }
        }
    }

    fn set_status(&mut self, status: Status, at: Instant) {
        if self.status != status {
            info!("changing status from {} to {}", self.status, status);
            self.status = status;
        }

        self.last_status = at;
    }

    fn age_statuses(&mut self) {
        if self.status != Status::Undefined && self.last_status.elapsed() > STATUS_TIMEOUT {
            info!(
                "no status bearing message within {:?}, back to undefined",
                STATUS_TIMEOUT
            );
            self.status = Status::Undefined;
        }

        if self.fix_status != FixStatus::Undefined && self.last_fix.elapsed() > STATUS_TIMEOUT {
            self.fix_status = FixStatus::Undefined;
        }
    }

    /// Tick/guard sleep that a shutdown unblocks immediately.
    async fn sleep(&mut self, duration: Duration) {
        if *self.shutdown.borrow() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {},
            _ = self.shutdown.changed() => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{FixedLocation, SurveyParams};

    struct Harness {
        controller: Controller,
        inbox: mpsc::UnboundedSender<UbxFrame>,
        mailbox: mpsc::UnboundedReceiver<Vec<u8>>,
        udp_stream_active: Arc<AtomicBool>,
        _shutdown: watch::Sender<bool>,
    }

    impl Harness {
        fn push_ubx(&self, class: u8, id: u8, payload: &[u8]) {
            let frame = UbxFrame::from_frame_bytes(&ubx::frame(class, id, payload));
            self.inbox.send(frame).unwrap();
        }

        fn sent_commands(&mut self) -> Vec<Vec<u8>> {
            let mut commands = vec![];
            while let Ok(bytes) = self.mailbox.try_recv() {
                commands.push(bytes);
            }
            commands
        }

        fn udp_active(&self) -> bool {
            self.udp_stream_active.load(Ordering::Relaxed)
        }
    }

    fn test_config(mode: Mode) -> Config {
        Config {
            mode,
            survey: SurveyParams {
                min_duration_s: 180,
                accuracy_m: 2.0,
            },
            location: Some(FixedLocation {
                lat_deg: 49.634584546,
                lon_deg: 8.631469629,
                height_m: 148.6396,
                accuracy_m: 1.0,
            }),
            positions_file: std::env::temp_dir().join(format!(
                "rtk-base-positions-{}-{mode}.csv",
                std::process::id()
            )),
            assistance_file: None,
            time_difference_file: None,
            latency_s: 0.093,
        }
    }

    fn harness(config: Config) -> Harness {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let udp_stream_active = Arc::new(AtomicBool::new(false));
        let link_ready = Arc::new(AtomicBool::new(true));

        let controller = Controller::new(
            Arc::new(config),
            inbox_rx,
            mailbox_tx,
            udp_stream_active.clone(),
            link_ready,
            None,
            shutdown_rx,
        );

        Harness {
            controller,
            inbox: inbox_tx,
            mailbox: mailbox_rx,
            udp_stream_active,
            _shutdown: shutdown_tx,
        }
    }

    fn message_id(command: &[u8]) -> (u8, u8) {
        (command[2], command[3])
    }

    #[tokio::test(start_paused = true)]
    async fn reapplying_message_set_is_a_noop() {
        let mut h = harness(test_config(Mode::SurveyIn));

        h.controller.set_messages(MessageSet::Svin).await;
        assert!(!h.sent_commands().is_empty());

        h.controller.set_messages(MessageSet::Svin).await;
        assert!(h.sent_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forces_reconfiguration() {
        let mut h = harness(test_config(Mode::SurveyIn));

        h.controller.set_rate(500);
        h.controller.set_messages(MessageSet::Svin).await;
        h.controller.reset_receiver();
        h.sent_commands();

        h.controller.set_rate(500);
        h.controller.set_messages(MessageSet::Svin).await;
        assert!(!h.sent_commands().is_empty());
    }

    #[test]
    fn statuses_age_out_after_silence() {
        let mut h = harness(test_config(Mode::SurveyIn));
        let stale = Instant::now() - Duration::from_secs(6);

        h.controller.set_status(Status::Time, stale);
        h.controller.fix_status = FixStatus::Ok;
        h.controller.last_fix = stale;

        h.controller.age_statuses();
        assert_eq!(h.controller.status, Status::Undefined);
        assert_eq!(h.controller.fix_status, FixStatus::Undefined);
    }

    #[test]
    fn fresh_statuses_do_not_age() {
        let mut h = harness(test_config(Mode::SurveyIn));

        h.controller.set_status(Status::Time, Instant::now());
        h.controller.age_statuses();
        assert_eq!(h.controller.status, Status::Time);
    }

    #[tokio::test(start_paused = true)]
    async fn survey_in_reaches_time_mode_and_enables_streaming() {
        let mut h = harness(test_config(Mode::SurveyIn));

        // undefined: full reconfiguration, stream off
        h.controller.tick().await;
        let commands = h.sent_commands();
        assert_eq!(message_id(&commands[0]), (0x06, 0x04)); // reset first
        assert_eq!(&commands[0][6..8], &[0x00, 0x00]); // hot
        assert!(commands.iter().any(|c| message_id(c) == (0x06, 0x71)));
        assert!(!h.udp_active());

        // survey progress reported
        let mut svin = [0u8; 40];
        svin[37] = 1; // in progress
        h.push_ubx(0x01, 0x3B, &svin);
        h.controller.tick().await;
        assert_eq!(h.controller.status, Status::Surveying);
        assert!(!h.udp_active());

        // time only fix reached
        let mut nav_status = [0u8; 16];
        nav_status[4] = FIX_TIME_ONLY;
        h.push_ubx(0x01, 0x03, &nav_status);
        h.controller.tick().await;
        assert_eq!(h.controller.status, Status::Time);

        // next tick turns the correction stream on
        h.controller.tick().await;
        assert!(h.udp_active());
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_mode_resets_then_configures_fixed_position() {
        let mut h = harness(test_config(Mode::Fixed));

        h.controller.tick().await;
        let commands = h.sent_commands();

        assert_eq!(message_id(&commands[0]), (0x06, 0x04)); // reset first
        let tmode3 = commands
            .iter()
            .find(|c| message_id(c) == (0x06, 0x71))
            .expect("no CFG-TMODE3 emitted");
        assert_eq!(&tmode3[8..10], &[0x01, 0x01]); // fixed + LLA flags
        assert!(!h.udp_active());
    }

    #[tokio::test(start_paused = true)]
    async fn output_positions_waits_for_fix_before_activating_output() {
        let mut h = harness(test_config(Mode::OutputPositions));

        h.controller.status = Status::Acquiring;
        h.controller.last_status = Instant::now();
        h.controller.fix_status = FixStatus::NotOk;

        h.controller.tick().await;
        assert!(h.sent_commands().is_empty()); // no reset, no activation

        h.controller.fix_status = FixStatus::Ok;
        h.controller.tick().await;
        let commands = h.sent_commands();
        assert!(!commands.is_empty());
        assert!(commands.iter().all(|c| message_id(c) == (0x06, 0x01)));
    }

    #[tokio::test(start_paused = true)]
    async fn position_reports_are_appended_while_streaming() {
        let config = test_config(Mode::OutputPositions);
        let path = config.positions_file.clone();
        let _ = std::fs::remove_file(&path);

        let mut h = harness(config);
        h.controller.status = Status::Acquiring;

        let mut payload = [0u8; 36];
        payload[12..16].copy_from_slice(&496_345_845i32.to_le_bytes()); // lat
        payload[8..12].copy_from_slice(&86_314_696i32.to_le_bytes()); // lon
        payload[16..20].copy_from_slice(&148_639i32.to_le_bytes()); // height
        h.push_ubx(0x01, 0x14, &payload);

        h.controller.process_messages();
        assert_eq!(h.controller.status, Status::Streaming);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("49.634584500, 8.631469600, 148.6390\n"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn pvt_forced_into_required_set_when_estimating_clock_offset() {
        let mut config = test_config(Mode::SurveyIn);
        config.time_difference_file = Some(std::env::temp_dir().join("rtk-base-unused.txt"));
        let h = harness(config);

        let (required, obsolete) = h.controller.message_plan(MessageSet::Svin);
        assert!(required.contains(&ubx::NAV_PVT));
        assert!(!obsolete.contains(&ubx::NAV_PVT));

        // and stays naturally required for the status set
        let (required, _) = h.controller.message_plan(MessageSet::Status);
        assert_eq!(required.iter().filter(|id| **id == ubx::NAV_PVT).count(), 1);
    }

    #[test]
    fn clock_offset_mean_over_sliding_window() {
        let path = std::env::temp_dir().join(format!("rtk-base-timediff-{}", std::process::id()));
        let mut config = test_config(Mode::SurveyIn);
        config.time_difference_file = Some(path.clone());
        let latency = config.latency_s;

        let mut h = harness(config);

        let mut pvt = NavPvt {
            year: 2021,
            month: 7,
            day: 31,
            hour: 12,
            min: 0,
            sec: 0,
            nano: 0,
            fix_type: 3,
            lat_e7: 0,
            lon_e7: 0,
            height_mm: 0,
            h_acc_mm: 0,
            v_acc_mm: 0,
            gnss_fix_ok: true,
            valid_date: true,
            valid_time: true,
            fully_resolved: true,
            valid_mag: false,
            invalid_llh: false,
        };

        let base = Utc
            .with_ymd_and_hms(2021, 7, 31, 12, 0, 0)
            .single()
            .unwrap()
            .timestamp() as f64;

        // host clock drifts linearly from 1.000 s to 1.024 s behind
        let mut window = VecDeque::new();
        for i in 0..25 {
            pvt.nano = i * 1_000_000;
            let t_gnss = base + pvt.nano as f64 * 1.0E-9;
            let t_host = t_gnss - (1.0 + 0.001 * i as f64);

            h.controller.update_time_difference(&pvt, t_host);

            if window.len() == TIME_DIFF_WINDOW {
                window.pop_front();
            }
            window.push_back((t_gnss - t_host) + latency);
        }

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, format!("{:.6}\n", mean));

        std::fs::remove_file(&path).unwrap();
    }
}
