//! Configuration command encoders, byte-for-byte per the u-blox
//! interface description (UBX-13003221).

use crate::protocol::ubx;

const CLASS_CFG: u8 = 0x06;
const CLASS_MGA: u8 = 0x13;

const CFG_MSG: u8 = 0x01;
const CFG_RST: u8 = 0x04;
const CFG_RATE: u8 = 0x08;
const CFG_TMODE3: u8 = 0x71;
const MGA_DBD: u8 = 0x80;

/// Which receiver state a CFG-RST clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Clears everything, longest reacquisition
    Cold,
    /// Clears the ephemeris
    Warm,
    /// Keeps all navigation data
    Hot,
}

impl std::fmt::Display for ResetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cold => write!(f, "cold"),
            Self::Warm => write!(f, "warm"),
            Self::Hot => write!(f, "hot"),
        }
    }
}

/// UBX-CFG-RST, controlled software reset (resetMode 0x02).
pub fn cfg_rst(kind: ResetKind) -> Vec<u8> {
    let nav_bbr_mask: [u8; 2] = match kind {
        ResetKind::Cold => [0xff, 0xff],
        ResetKind::Warm => [0x01, 0x00],
        ResetKind::Hot => [0x00, 0x00],
    };

    let payload = [nav_bbr_mask[0], nav_bbr_mask[1], 0x02, 0x00];
    ubx::frame(CLASS_CFG, CFG_RST, &payload)
}

/// UBX-CFG-RATE: measurement period in ms, one solution per measurement,
/// aligned to GPS time.
pub fn cfg_rate(meas_rate_ms: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&meas_rate_ms.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes()); // navRate
    payload.extend_from_slice(&1u16.to_le_bytes()); // timeRef: GPS

    ubx::frame(CLASS_CFG, CFG_RATE, &payload)
}

/// UBX-CFG-MSG, short (current port) form. Rate 0 silences the message,
/// rate 1 emits it once per navigation solution.
pub fn cfg_msg(msg_id: (u8, u8), rate: u8) -> Vec<u8> {
    ubx::frame(CLASS_CFG, CFG_MSG, &[msg_id.0, msg_id.1, rate])
}

/// UBX-CFG-TMODE3: start a survey-in of at least `min_duration_s` down to
/// `accuracy_m` mean accuracy.
pub fn cfg_tmode3_survey_in(min_duration_s: u32, accuracy_m: f64) -> Vec<u8> {
    let mut payload = [0u8; 40];

    payload[2..4].copy_from_slice(&0x0001u16.to_le_bytes()); // survey-in mode
    payload[24..28].copy_from_slice(&min_duration_s.to_le_bytes());

    let acc_limit = (accuracy_m * 1.0E4).round() as u32; // 0.1 mm
    payload[28..32].copy_from_slice(&acc_limit.to_le_bytes());

    ubx::frame(CLASS_CFG, CFG_TMODE3, &payload)
}

/// UBX-CFG-TMODE3: fixed position, geodetic form (flags 0x0101).
///
/// Latitude and longitude split into a 1e-7 degree integer part plus a
/// 1e-9 degree high precision correction; altitude into cm plus 0.1 mm.
pub fn cfg_tmode3_fixed(lat_deg: f64, lon_deg: f64, alt_m: f64, accuracy_m: f64) -> Vec<u8> {
    let mut payload = [0u8; 40];

    payload[2..4].copy_from_slice(&0x0101u16.to_le_bytes()); // fixed + LLA

    let lat = (lat_deg * 1.0E9).round() as i64;
    let lon = (lon_deg * 1.0E9).round() as i64;
    let alt = (alt_m * 1.0E4).round() as i64; // 0.1 mm

    payload[4..8].copy_from_slice(&((lat / 100) as i32).to_le_bytes());
    payload[8..12].copy_from_slice(&((lon / 100) as i32).to_le_bytes());
    payload[12..16].copy_from_slice(&((alt / 100) as i32).to_le_bytes()); // cm
    payload[16] = (lat % 100) as i8 as u8;
    payload[17] = (lon % 100) as i8 as u8;
    payload[18] = (alt % 100) as i8 as u8;

    let acc = (accuracy_m * 1.0E4).round() as u32; // 0.1 mm
    payload[20..24].copy_from_slice(&acc.to_le_bytes());

    ubx::frame(CLASS_CFG, CFG_TMODE3, &payload)
}

/// UBX-CFG-TMODE3 with all flags clear: leave time mode.
pub fn cfg_tmode3_disabled() -> Vec<u8> {
    ubx::frame(CLASS_CFG, CFG_TMODE3, &[0u8; 40])
}

/// UBX-MGA-DBD poll: asks the receiver to dump its navigation database.
/// Emitted by the assistance injection path, not by the controller itself.
#[allow(dead_code)]
pub fn mga_dbd_poll() -> Vec<u8> {
    ubx::frame(CLASS_MGA, MGA_DBD, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ubx, Scan};

    fn payload(frame: &[u8]) -> &[u8] {
        assert_eq!(ubx::scan(frame), Scan::Complete(frame.len()));
        &frame[6..frame.len() - 2]
    }

    #[test]
    fn reset_masks() {
        let hot = cfg_rst(ResetKind::Hot);
        assert_eq!(&hot[2..4], &[0x06, 0x04]);
        assert_eq!(payload(&hot), &[0x00, 0x00, 0x02, 0x00]);

        assert_eq!(payload(&cfg_rst(ResetKind::Warm)), &[0x01, 0x00, 0x02, 0x00]);
        assert_eq!(payload(&cfg_rst(ResetKind::Cold)), &[0xff, 0xff, 0x02, 0x00]);
    }

    #[test]
    fn rate_is_gps_aligned() {
        let frame = cfg_rate(500);
        assert_eq!(&frame[2..4], &[0x06, 0x08]);
        assert_eq!(payload(&frame), &[0xf4, 0x01, 0x01, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn msg_activation_uses_short_form() {
        let frame = cfg_msg((0x01, 0x3b), 1);
        assert_eq!(&frame[2..4], &[0x06, 0x01]);
        assert_eq!(payload(&frame), &[0x01, 0x3b, 0x01]);

        assert_eq!(payload(&cfg_msg((0xf0, 0x00), 0)), &[0xf0, 0x00, 0x00]);
    }

    #[test]
    fn survey_in_units() {
        let frame = cfg_tmode3_survey_in(180, 2.0);
        let p = payload(&frame);

        assert_eq!(p.len(), 40);
        assert_eq!(&p[2..4], &[0x01, 0x00]);
        assert_eq!(u32::from_le_bytes(p[24..28].try_into().unwrap()), 180);
        // 2 m in 0.1 mm
        assert_eq!(u32::from_le_bytes(p[28..32].try_into().unwrap()), 20_000);
    }

    #[test]
    fn fixed_position_splits_high_precision_parts() {
        let frame = cfg_tmode3_fixed(49.634584546, 8.631469629, 148.6396, 1.0);
        let p = payload(&frame);

        assert_eq!(&p[2..4], &[0x01, 0x01]);
        assert_eq!(
            i32::from_le_bytes(p[4..8].try_into().unwrap()),
            496_345_845 // 1e-7 deg
        );
        assert_eq!(p[16] as i8, 46); // 1e-9 remainder
        assert_eq!(
            i32::from_le_bytes(p[8..12].try_into().unwrap()),
            86_314_696
        );
        assert_eq!(p[17] as i8, 29);
        assert_eq!(
            i32::from_le_bytes(p[12..16].try_into().unwrap()),
            14_863 // cm
        );
        assert_eq!(p[18] as i8, 96); // 0.1 mm remainder
        assert_eq!(u32::from_le_bytes(p[20..24].try_into().unwrap()), 10_000);
    }

    #[test]
    fn disabled_clears_all_flags() {
        let p_owned = cfg_tmode3_disabled();
        let p = payload(&p_owned);
        assert!(p.iter().all(|b| *b == 0));
    }

    #[test]
    fn database_poll_is_empty() {
        let frame = mga_dbd_poll();
        assert_eq!(&frame[2..4], &[0x13, 0x80]);
        assert!(payload(&frame).is_empty());
    }
}
