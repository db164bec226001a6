//! LCDM-2000 framing: `EOT ID STX cmd data ETX xor` outbound, ACK/NAK then
//! `SOH ID STX cmd data ETX xor` inbound (§3, §4.3).

use crate::error::{Error, Result};
use crate::transport::SerialLink;
use std::time::Instant;

pub const EOT: u8 = 0x04;
pub const SOH: u8 = 0x01;
pub const DEVICE_ID: u8 = 0x50;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0xff;

const ACK_RETRIES: u32 = 2;
const PACKET_RETRIES: u32 = 3;

/// Running XOR of every byte it is fed.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Outbound command packet: `EOT ID STX cmd data ETX xor`.
pub fn build_command(cmd: u8, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![EOT, DEVICE_ID, STX, cmd];
    buf.extend_from_slice(data);
    buf.push(ETX);
    let xor = xor_checksum(&buf[1..]);
    buf.push(xor);
    buf
}

/// A decoded inbound response packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LcdmResponse {
    pub cmd: u8,
    pub data: Vec<u8>,
}

/// Send `cmd`/`data`, run the ACK/NAK dance, and return the parsed response
/// body. Retries the ACK wait up to `ACK_RETRIES` times and a bad packet up
/// to `PACKET_RETRIES` times, per §4.3.
pub fn exchange(link: &SerialLink, cmd: u8, data: &[u8], response_len: usize, deadline: Instant) -> Result<LcdmResponse> {
    let outbound = build_command(cmd, data);

    for _ in 0..ACK_RETRIES {
        link.write(&outbound)?;

        let ack = link.read_exact(1, deadline)?[0];
        if ack == NAK {
            continue;
        }
        if ack != ACK {
            return Err(Error::framing(format!("expected ACK/NAK, got {ack:#04x}")));
        }

        for _ in 0..PACKET_RETRIES {
            match read_response(link, response_len, deadline) {
                Ok(resp) => {
                    link.write(&[ACK])?;
                    return Ok(resp);
                }
                Err(e) if !e.is_transport() => return Err(e),
                Err(_) => {
                    link.write(&[NAK])?;
                }
            }
        }
        return Err(Error::framing("response packet failed validation after retries"));
    }

    Err(Error::timeout("no ACK received for LCDM command"))
}

fn read_response(link: &SerialLink, response_len: usize, deadline: Instant) -> Result<LcdmResponse> {
    let packet = link.read_exact(response_len, deadline)?;
    if packet[0] != SOH {
        return Err(Error::framing("expected SOH"));
    }
    if packet[1] != DEVICE_ID {
        return Err(Error::framing("unexpected device ID"));
    }
    if packet[2] != STX {
        return Err(Error::framing("expected STX"));
    }
    if packet[packet.len() - 2] != ETX {
        return Err(Error::framing("expected ETX"));
    }

    let xor_expected = xor_checksum(&packet[1..packet.len() - 1]);
    let xor_received = packet[packet.len() - 1];
    if xor_expected != xor_received {
        return Err(Error::checksum(format!(
            "XOR mismatch: computed {xor_expected:#04x}, received {xor_received:#04x}"
        )));
    }

    let cmd = packet[3];
    let data = packet[4..packet.len() - 2].to_vec();
    Ok(LcdmResponse { cmd, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_command_xor_checksums_to_zero_over_all_bytes() {
        let packet = build_command(0x46, &[0x03]);
        assert_eq!(xor_checksum(&packet[1..]), 0);
    }

    #[test]
    fn status_command_has_expected_header_and_self_consistent_xor() {
        // send `04 50 02 46 .. 03 xor` with no data bytes
        let packet = build_command(0x46, &[]);
        assert_eq!(&packet[..5], &[0x04, 0x50, 0x02, 0x46, 0x03]);
        assert_eq!(packet[5], xor_checksum(&packet[1..5]));
    }

    #[test]
    fn exchange_parses_status_response() {
        use crate::transport::test_support::MockPort;
        use std::time::Duration;

        // `01 50 02 46 d1 d2 err f6 f7 03 xor` with err=0x30, d1=0x17, d2=0x80
        let mut body = vec![0x01, 0x50, 0x02, 0x46, 0x17, 0x80, 0x30, 0xf6, 0xf7, 0x03];
        let xor = xor_checksum(&body[1..]);
        body.push(xor);

        let mut inbound = vec![ACK];
        inbound.extend_from_slice(&body);

        let port = MockPort::new(inbound);
        let link = SerialLink::from_port(Box::new(port));

        let resp = exchange(&link, 0x46, &[], body.len(), Instant::now() + Duration::from_millis(200)).unwrap();
        assert_eq!(resp.cmd, 0x46);
        assert_eq!(resp.data, vec![0x17, 0x80, 0x30, 0xf6, 0xf7]);
    }
}
