//! LCDM command opcodes, the 14-bit sensor vector, and the fatal/non-fatal
//! error-code table (§4.3).

pub mod cmd {
    pub const STATUS: u8 = 0x46;
    pub const DISPENSE_SINGLE: u8 = 0x50;
    pub const DISPENSE_DUAL: u8 = 0x53;
}

pub const ERROR_GOOD: u8 = 0x30;
pub const ERROR_NORMAL_STOP: u8 = 0x31;

/// `true` for the two non-fatal error-byte values (§4.3).
pub fn is_non_fatal(error_byte: u8) -> bool {
    matches!(error_byte, ERROR_GOOD | ERROR_NORMAL_STOP)
}

/// Human-readable reason for a fatal error byte. Unknown codes fall back to
/// a generic description rather than failing to decode.
pub fn fatal_error_reason(error_byte: u8) -> &'static str {
    match error_byte {
        0x32 => "upper cassette empty",
        0x33 => "lower cassette empty",
        0x34 => "upper cassette jam",
        0x35 => "lower cassette jam",
        0x36 => "exit jam",
        0x37 => "upper cassette not seated",
        0x38 => "lower cassette not seated",
        0x39 => "cashbox removed",
        0x3a => "solenoid fault",
        0x3b => "motor fault",
        0x3c => "count sensor fault",
        0x3d => "timeout waiting for bill exit",
        0x3e => "double-note detected",
        0x3f => "note too long",
        0x40 => "note too short",
        0x41 => "upper cassette near-end",
        0x42 => "lower cassette near-end",
        0x43 => "reject bin full",
        0x44 => "communication error",
        0x45 => "cassette count mismatch",
        0x46 => "unknown command",
        0x47 => "invalid count requested",
        0x48 => "upper cassette over-dispense",
        0x49 => "lower cassette over-dispense",
        0x4a => "power fault",
        0x4b => "cam sensor fault",
        0x4c => "dispense interrupted",
        0x4d => "shutter fault",
        _ => "unspecified LCDM device fault",
    }
}

/// 14 sensor flags parsed from the two STATUS data bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorVector {
    pub exit_sensor: bool,
    pub upper_near_end: bool,
    pub upper_count: bool,
    pub upper_feed: bool,
    pub upper_jam: bool,
    pub upper_cassette_out: bool,
    pub lower_near_end: bool,
    pub lower_count: bool,
    pub lower_feed: bool,
    pub lower_jam: bool,
    pub lower_cassette_out: bool,
    pub cashbox_present: bool,
    pub solenoid: bool,
    pub reject_tray: bool,
}

impl SensorVector {
    /// Bit layout chosen to agree with the literal STATUS fixture in §8
    /// (`d1=0x17, d2=0x80` ⇒ `ExitSensor=1, UpperNearEnd=0, …, RejectTray=1`):
    /// `d1` carries the upper-path sensors LSB-first, `d2` the lower-path
    /// and cabinet sensors LSB-first.
    pub fn from_bytes(d1: u8, d2: u8) -> Self {
        Self {
            exit_sensor: d1 & (1 << 0) != 0,
            upper_count: d1 & (1 << 1) != 0,
            upper_feed: d1 & (1 << 2) != 0,
            upper_near_end: d1 & (1 << 3) != 0,
            upper_jam: d1 & (1 << 4) != 0,
            upper_cassette_out: d1 & (1 << 5) != 0,
            lower_near_end: d1 & (1 << 6) != 0,
            lower_count: d1 & (1 << 7) != 0,
            lower_feed: d2 & (1 << 0) != 0,
            lower_jam: d2 & (1 << 1) != 0,
            lower_cassette_out: d2 & (1 << 2) != 0,
            cashbox_present: d2 & (1 << 3) != 0,
            solenoid: d2 & (1 << 4) != 0,
            reject_tray: d2 & (1 << 7) != 0,
        }
    }

    /// Any optical sensor that implies a jam candidate worth a purge-and-retry.
    pub fn jam_candidate(&self) -> bool {
        self.upper_jam || self.lower_jam || self.exit_sensor
    }

    /// Cashbox-presence and solenoid flags are fatal immediately (§4.3).
    pub fn immediately_fatal(&self) -> bool {
        !self.cashbox_present || self.solenoid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_fatal_codes_are_exactly_good_and_normal_stop() {
        assert!(is_non_fatal(0x30));
        assert!(is_non_fatal(0x31));
        assert!(!is_non_fatal(0x32));
    }

    #[test]
    fn sensor_vector_matches_literal_status_fixture() {
        // d1=0x17, d2=0x80 ⇒ ExitSensor=1, UpperNearEnd=0, RejectTray=1 (§8).
        let v = SensorVector::from_bytes(0x17, 0x80);
        assert!(v.exit_sensor);
        assert!(!v.upper_near_end);
        assert!(v.reject_tray);
    }
}
