//! CCNET framing: `sync addr len cmd data[] crc16_lo crc16_hi` (§3, §4.2).

use crate::error::{Error, Result};
use crate::transport::SerialLink;
use std::time::{Duration, Instant};

pub const SYNC: u8 = 0x02;
pub const HOST_ADDR: u8 = 0x00;
pub const DEVICE_ADDR: u8 = 0x03;

pub const MIN_FRAME_LEN: usize = 6;
pub const MAX_FRAME_LEN: usize = 250;

/// Maximum non-sync bytes to discard while hunting for SYNC.
const SYNC_HUNT_LIMIT: usize = 10;

/// CCITT CRC16, reflected, poly `0x08408`, init `0`. Self-checking: appending
/// a frame's own CRC to itself and recomputing yields zero.
pub fn crc16_ccnet(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0x08408;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// A decoded CCNET frame: command plus whatever data bytes followed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CcnetFrame {
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl CcnetFrame {
    pub fn new(cmd: u8, data: Vec<u8>) -> Self {
        Self { cmd, data }
    }

    /// Encode into `sync addr len cmd data[] crc_lo crc_hi`. `addr` is
    /// always `DEVICE_ADDR` (0x03); CCNET has no true host/device
    /// addressing, just this fixed convention byte.
    pub fn encode(&self) -> Vec<u8> {
        let len = (self.data.len() + 6) as u8;
        let mut buf = Vec::with_capacity(len as usize);
        buf.push(SYNC);
        buf.push(DEVICE_ADDR);
        buf.push(len);
        buf.push(self.cmd);
        buf.extend_from_slice(&self.data);

        let crc = crc16_ccnet(&buf);
        buf.push((crc & 0xff) as u8);
        buf.push((crc >> 8) as u8);
        buf
    }
}

/// Receive a CCNET frame from `link` per the four-step algorithm in §4.2,
/// re-synchronising on garbage rather than failing outright.
pub fn receive(link: &SerialLink, deadline: Instant) -> Result<CcnetFrame> {
    let mut discarded = 0;
    loop {
        let byte = link.read_exact(1, deadline)?[0];
        if byte == SYNC {
            break;
        }
        discarded += 1;
        if discarded > SYNC_HUNT_LIMIT {
            return Err(Error::framing("no SYNC byte within hunt limit"));
        }
    }

    let header = link.read_exact(2, deadline)?;
    let addr = header[0];
    let len = header[1] as usize;

    if addr != HOST_ADDR && addr != DEVICE_ADDR {
        return Err(Error::framing(format!("unexpected address byte {addr:#04x}")));
    }
    if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&len) {
        // Drain whatever is sitting in the buffer so the next hunt starts clean.
        let _ = link.read_exact(1, deadline.min(Instant::now() + Duration::from_millis(50)));
        return Err(Error::framing(format!("length {len} out of range [6, 250]")));
    }

    let rest = link.read_exact(len - 3, deadline)?;
    let cmd = rest[0];
    let data = rest[1..rest.len() - 2].to_vec();
    let crc_received = u16::from_le_bytes([rest[rest.len() - 2], rest[rest.len() - 1]]);

    let mut whole = vec![SYNC, addr, len as u8, cmd];
    whole.extend_from_slice(&data);
    let crc_computed = crc16_ccnet(&whole);

    if crc_computed != crc_received {
        return Err(Error::checksum(format!(
            "CRC mismatch: computed {crc_computed:#06x}, received {crc_received:#06x}"
        )));
    }

    Ok(CcnetFrame::new(cmd, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_frame_crc_matches_literal_vector() {
        // `02 03 06 33`; calculate_crc16 = DA 81; appending it self-checks to zero.
        let partial = [0x02u8, 0x03, 0x06, 0x33];
        let crc = crc16_ccnet(&partial);
        assert_eq!(crc.to_le_bytes(), [0xDA, 0x81]);

        let mut whole = partial.to_vec();
        whole.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(crc16_ccnet(&whole), 0);
    }

    #[test]
    fn encode_then_decode_is_self_checking_for_empty_data() {
        let frame = CcnetFrame::new(0x33, vec![]);
        let encoded = frame.encode();
        assert_eq!(encoded.len(), MIN_FRAME_LEN);
        assert_eq!(crc16_ccnet(&encoded), 0);
    }

    #[test]
    fn encode_round_trips_through_receive() {
        use crate::transport::test_support::MockPort;
        use std::time::Duration;

        let frame = CcnetFrame::new(0x34, vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        let encoded = frame.encode();

        let port = MockPort::new(encoded);
        let link = SerialLink::from_port(Box::new(port));

        let decoded = receive(&link, Instant::now() + Duration::from_millis(200)).unwrap();
        assert_eq!(decoded, frame);
    }
}
