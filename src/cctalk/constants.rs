//! ccTalk header codes and the coin-slot-to-denomination table (§4.4).

pub mod header {
    pub const RESET: u8 = 1;
    pub const SIMPLE_POLL: u8 = 254;
    pub const READ_BUFFERED_CREDIT: u8 = 229;
    pub const MODIFY_INHIBIT: u8 = 231;
}

/// Maps a coin-event slot (1-based, as reported by Read-buffered-credit) to
/// a denomination in kopecks. Slot 0 is a status-only event, never a coin.
pub fn slot_denomination_kopecks(slot: u8) -> Option<u64> {
    match slot {
        1 => Some(1_00),
        2 => Some(2_00),
        5 => Some(5_00),
        10 => Some(1_00),
        _ => None,
    }
}
