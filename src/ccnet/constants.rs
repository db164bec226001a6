//! CCNET opcodes, device-state codes, and the firmware-dependent bill tables.

/// Opcodes the driver issues.
pub mod cmd {
    pub const RESET: u8 = 0x30;
    pub const GET_STATUS: u8 = 0x31;
    pub const SET_SECURITY: u8 = 0x32;
    pub const POLL: u8 = 0x33;
    pub const ENABLE_BILL_TYPES: u8 = 0x34;
    pub const STACK: u8 = 0x35;
    pub const RETURN: u8 = 0x36;
    pub const IDENTIFICATION: u8 = 0x37;
    pub const HOLD: u8 = 0x38;
    pub const GET_BILL_TABLE: u8 = 0x41;
}

/// The 20 enumerated device-state codes returned by POLL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceState {
    PowerUp,
    PowerUpBillInValidator,
    PowerUpBillInStacker,
    Initialize,
    Idling,
    Accepting,
    Stacking,
    Returning,
    UnitDisabled,
    Holding,
    DeviceBusy,
    Rejecting,
    Escrow,
    Stacked,
    Returned,
    FailureCashboxFull,
    FailureCashboxRemoved,
    FailureJam,
    FailureStackerJam,
    FailureCheated,
    FailurePause,
    FailureGeneric,
}

impl DeviceState {
    /// Decode the single status byte returned by a POLL reply. Failure
    /// codes `0x41..=0x47` per the drop-cassette/validator fault table:
    /// `0x41` cashbox full, `0x42` cashbox out of position, `0x43` validator
    /// jammed, `0x44` drop-cassette jammed, `0x45` cheated, `0x46` paused,
    /// `0x47` generic failure.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x10 => Self::PowerUp,
            0x11 => Self::PowerUpBillInValidator,
            0x12 => Self::PowerUpBillInStacker,
            0x13 => Self::Initialize,
            0x14 => Self::Idling,
            0x15 => Self::Accepting,
            0x17 => Self::Stacking,
            0x18 => Self::Returning,
            0x19 => Self::UnitDisabled,
            0x1a => Self::Holding,
            0x1b => Self::DeviceBusy,
            0x1c => Self::Rejecting,
            0x80 => Self::Escrow,
            0x81 => Self::Stacked,
            0x82 => Self::Returned,
            0x41 => Self::FailureCashboxFull,
            0x42 => Self::FailureCashboxRemoved,
            0x43 => Self::FailureJam,
            0x44 => Self::FailureStackerJam,
            0x45 => Self::FailureCheated,
            0x46 => Self::FailurePause,
            0x47 => Self::FailureGeneric,
            _ => return None,
        })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FailureCashboxFull
                | Self::FailureCashboxRemoved
                | Self::FailureJam
                | Self::FailureStackerJam
                | Self::FailureCheated
                | Self::FailurePause
                | Self::FailureGeneric
        )
    }
}

/// Firmware variant governing which denomination table applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirmwareVariant {
    V1,
    V2,
    V3,
}

impl From<&str> for FirmwareVariant {
    fn from(s: &str) -> Self {
        match s {
            "v1" => Self::V1,
            "v3" => Self::V3,
            _ => Self::V2,
        }
    }
}

/// Map a firmware-specific bill code (the escrow/stacked extension byte) to
/// an amount in kopecks. An unknown code yields `None`; callers still emit
/// the stack event, flagged, per §4.2.
pub fn bill_amount_kopecks(variant: FirmwareVariant, bill_code: u8) -> Option<u64> {
    match variant {
        FirmwareVariant::V1 => V1_TABLE.iter().find(|(c, _)| *c == bill_code).map(|(_, v)| *v),
        FirmwareVariant::V2 | FirmwareVariant::V3 => {
            V2_TABLE.iter().find(|(c, _)| *c == bill_code).map(|(_, v)| *v)
        }
    }
}

/// Short-list table for V1 firmware.
const V1_TABLE: &[(u8, u64)] = &[
    (0x00, 10_00),
    (0x01, 50_00),
    (0x02, 100_00),
    (0x03, 500_00),
];

/// Extended table for V2/V3 firmware.
const V2_TABLE: &[(u8, u64)] = &[
    (0x00, 10_00),
    (0x01, 50_00),
    (0x02, 100_00),
    (0x03, 500_00),
    (0x04, 1_000_00),
    (0x05, 5_000_00),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_poll_codes() {
        assert_eq!(DeviceState::from_code(0x14), Some(DeviceState::Idling));
        assert_eq!(DeviceState::from_code(0x80), Some(DeviceState::Escrow));
        assert_eq!(DeviceState::from_code(0x81), Some(DeviceState::Stacked));
    }

    #[test]
    fn cashbox_full_decodes_and_counts_as_a_failure() {
        let state = DeviceState::from_code(0x41).unwrap();
        assert_eq!(state, DeviceState::FailureCashboxFull);
        assert!(state.is_failure());
    }

    #[test]
    fn unknown_bill_code_yields_none() {
        assert_eq!(bill_amount_kopecks(FirmwareVariant::V2, 0xff), None);
    }

    #[test]
    fn known_bill_code_resolves_by_variant() {
        assert_eq!(bill_amount_kopecks(FirmwareVariant::V1, 0x02), Some(100_00));
        assert_eq!(bill_amount_kopecks(FirmwareVariant::V2, 0x04), Some(1_000_00));
    }
}
