//! UBX framing and payload decoding.
//!
//! Wire format: `B5 62 | class | id | len (LE u16) | payload | ck_a ck_b`,
//! the checksum being the 8-bit Fletcher of everything between the sync
//! characters and the checksum itself.

use std::time::Instant;

use crate::protocol::Scan;
use crate::utils::unix_time;

pub const SYNC_1: u8 = 0xB5;
pub const SYNC_2: u8 = 0x62;

/// Frame bytes beyond the 8 byte envelope.
pub const OVERHEAD: usize = 8;

/// Larger length fields are treated as line noise rather than waited for.
pub const MAX_PAYLOAD: usize = 4096;

pub const NAV_STATUS: (u8, u8) = (0x01, 0x03);
pub const NAV_PVT: (u8, u8) = (0x01, 0x07);
pub const NAV_HPPOSLLH: (u8, u8) = (0x01, 0x14);
pub const NAV_TIMEUTC: (u8, u8) = (0x01, 0x21);
pub const NAV_SVIN: (u8, u8) = (0x01, 0x3B);

/// 8-bit Fletcher over class..payload, per the interface description.
pub fn checksum(body: &[u8]) -> (u8, u8) {
    let mut ck_a = 0u8;
    let mut ck_b = 0u8;

    for byte in body {
        ck_a = ck_a.wrapping_add(*byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }

    (ck_a, ck_b)
}

/// Builds one complete frame around `payload`.
pub fn frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(OVERHEAD + payload.len());

    bytes.push(SYNC_1);
    bytes.push(SYNC_2);
    bytes.push(class);
    bytes.push(id);
    bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    bytes.extend_from_slice(payload);

    let (ck_a, ck_b) = checksum(&bytes[2..]);
    bytes.push(ck_a);
    bytes.push(ck_b);
    bytes
}

/// Probes `head` for a UBX frame.
pub fn scan(head: &[u8]) -> Scan {
    if head.first() != Some(&SYNC_1) {
        return Scan::NoMatch;
    }

    if head.len() < 2 {
        return Scan::Candidate;
    }

    if head[1] != SYNC_2 {
        return Scan::NoMatch;
    }

    if head.len() < 6 {
        return Scan::Candidate;
    }

    let payload_len = u16::from_le_bytes([head[4], head[5]]) as usize;

    if payload_len > MAX_PAYLOAD {
        return Scan::Invalid;
    }

    let total = OVERHEAD + payload_len;

    if head.len() < total {
        return Scan::Candidate;
    }

    let (ck_a, ck_b) = checksum(&head[2..total - 2]);

    if ck_a == head[total - 2] && ck_b == head[total - 1] {
        Scan::Complete(total)
    } else {
        Scan::Invalid
    }
}

/// One validated UBX frame, stamped when its final byte left the serial link.
#[derive(Debug, Clone)]
pub struct UbxFrame {
    pub class: u8,
    pub id: u8,
    pub payload: Vec<u8>,

    /// Monotonic receive instant
    pub received: Instant,

    /// Wall clock receive time, unix seconds
    pub received_unix: f64,
}

impl UbxFrame {
    /// Wraps validated frame bytes, stamping them with the current time.
    pub fn from_frame_bytes(bytes: &[u8]) -> Self {
        Self {
            class: bytes[2],
            id: bytes[3],
            payload: bytes[6..bytes.len() - 2].to_vec(),
            received: Instant::now(),
            received_unix: unix_time(),
        }
    }

    pub fn message_id(&self) -> (u8, u8) {
        (self.class, self.id)
    }

    /// Decodes the payload according to the (class, id) pair.
    /// Anything unknown, or known but truncated, stays [Message::Other].
    pub fn decode(&self) -> Message {
        match self.message_id() {
            NAV_SVIN => NavSvin::parse(&self.payload).map_or(Message::Other, Message::Svin),
            NAV_STATUS => NavStatus::parse(&self.payload).map_or(Message::Other, Message::Status),
            NAV_PVT => NavPvt::parse(&self.payload).map_or(Message::Other, Message::Pvt),
            NAV_HPPOSLLH => {
                NavHpPosLlh::parse(&self.payload).map_or(Message::Other, Message::HpPosLlh)
            },
            NAV_TIMEUTC => {
                NavTimeUtc::parse(&self.payload).map_or(Message::Other, Message::TimeUtc)
            },
            _ => Message::Other,
        }
    }
}

/// Decoded view of one [UbxFrame].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Svin(NavSvin),
    Status(NavStatus),
    Pvt(NavPvt),
    HpPosLlh(NavHpPosLlh),
    TimeUtc(NavTimeUtc),
    Other,
}

fn u16_at(payload: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn u32_at(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

fn i32_at(payload: &[u8], offset: usize) -> i32 {
    u32_at(payload, offset) as i32
}

/// UBX-NAV-SVIN: survey-in progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct NavSvin {
    pub itow_ms: u32,
    pub duration_s: u32,
    /// Mean position accuracy, 0.1 mm units
    pub mean_acc: u32,
    pub num_obs: u32,
    pub valid: bool,
    pub in_progress: bool,
}

impl NavSvin {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != 40 {
            return None;
        }

        Some(Self {
            itow_ms: u32_at(payload, 4),
            duration_s: u32_at(payload, 8),
            mean_acc: u32_at(payload, 28),
            num_obs: u32_at(payload, 32),
            valid: payload[36] != 0,
            in_progress: payload[37] != 0,
        })
    }

    pub fn mean_acc_m(&self) -> f64 {
        self.mean_acc as f64 * 1.0E-4
    }
}

/// UBX-NAV-STATUS: only the fix kind is of interest (5 = time only).
#[derive(Debug, Clone, PartialEq)]
pub struct NavStatus {
    pub itow_ms: u32,
    pub gps_fix: u8,
}

impl NavStatus {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != 16 {
            return None;
        }

        Some(Self {
            itow_ms: u32_at(payload, 0),
            gps_fix: payload[4],
        })
    }
}

/// UBX-NAV-PVT: position/velocity/time bundle with validity flags.
#[derive(Debug, Clone, PartialEq)]
pub struct NavPvt {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    /// Signed fraction-of-second correction, may be negative
    pub nano: i32,
    pub fix_type: u8,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub height_mm: i32,
    pub h_acc_mm: u32,
    pub v_acc_mm: u32,
    pub gnss_fix_ok: bool,
    pub valid_date: bool,
    pub valid_time: bool,
    pub fully_resolved: bool,
    pub valid_mag: bool,
    pub invalid_llh: bool,
}

impl NavPvt {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 92 {
            return None;
        }

        let valid = payload[11];
        let flags = payload[21];
        let flags3 = payload[78];

        Some(Self {
            year: u16_at(payload, 4),
            month: payload[6],
            day: payload[7],
            hour: payload[8],
            min: payload[9],
            sec: payload[10],
            nano: i32_at(payload, 16),
            fix_type: payload[20],
            lon_e7: i32_at(payload, 24),
            lat_e7: i32_at(payload, 28),
            height_mm: i32_at(payload, 32),
            h_acc_mm: u32_at(payload, 40),
            v_acc_mm: u32_at(payload, 44),
            valid_date: valid & 0x01 != 0,
            valid_time: valid & 0x02 != 0,
            fully_resolved: valid & 0x04 != 0,
            valid_mag: valid & 0x08 != 0,
            gnss_fix_ok: flags & 0x01 != 0,
            invalid_llh: flags3 & 0x01 != 0,
        })
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat_e7 as f64 * 1.0E-7
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon_e7 as f64 * 1.0E-7
    }

    pub fn height_m(&self) -> f64 {
        self.height_mm as f64 * 1.0E-3
    }
}

/// UBX-NAV-HPPOSLLH: high precision geodetic position.
///
/// The integer and high-precision components combine to 1e-9 degree
/// resolution for latitude/longitude and 0.1 mm for height.
#[derive(Debug, Clone, PartialEq)]
pub struct NavHpPosLlh {
    pub itow_ms: u32,
    pub lon_e7: i32,
    pub lat_e7: i32,
    pub height_mm: i32,
    pub lon_hp: i8,
    pub lat_hp: i8,
    pub height_hp: i8,
    pub h_acc: u32,
    pub v_acc: u32,
}

impl NavHpPosLlh {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != 36 {
            return None;
        }

        Some(Self {
            itow_ms: u32_at(payload, 4),
            lon_e7: i32_at(payload, 8),
            lat_e7: i32_at(payload, 12),
            height_mm: i32_at(payload, 16),
            lon_hp: payload[24] as i8,
            lat_hp: payload[25] as i8,
            height_hp: payload[26] as i8,
            h_acc: u32_at(payload, 28),
            v_acc: u32_at(payload, 32),
        })
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat_e7 as f64 * 1.0E-7 + self.lat_hp as f64 * 1.0E-9
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon_e7 as f64 * 1.0E-7 + self.lon_hp as f64 * 1.0E-9
    }

    pub fn height_m(&self) -> f64 {
        (self.height_mm as f64 + self.height_hp as f64 * 0.1) * 1.0E-3
    }
}

/// UBX-NAV-TIMEUTC. Decoded for completeness, the controller only traces it.
#[derive(Debug, Clone, PartialEq)]
pub struct NavTimeUtc {
    pub itow_ms: u32,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    pub valid_utc: bool,
}

impl NavTimeUtc {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != 20 {
            return None;
        }

        Some(Self {
            itow_ms: u32_at(payload, 0),
            year: u16_at(payload, 12),
            month: payload[14],
            day: payload[15],
            hour: payload[16],
            min: payload[17],
            sec: payload[18],
            valid_utc: payload[19] & 0x04 != 0,
        })
    }
}
