//! ccTalk framing: `dest len src header data cksum`, checksum makes the
//! byte sum ≡ 0 mod 256 (§3, §4.4).

use crate::error::{Error, Result};
use crate::transport::SerialLink;
use std::time::Instant;

pub const HOST_ADDR: u8 = 1;
pub const DEVICE_ADDR: u8 = 2;

/// Build a request frame addressed to `dest` with the given `header` and
/// `data`, appending the sum-to-zero checksum byte.
pub fn build(dest: u8, src: u8, header: u8, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![dest, data.len() as u8, src, header];
    buf.extend_from_slice(data);
    let sum: u8 = buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    buf.push(0u8.wrapping_sub(sum));
    buf
}

/// A decoded reply frame's data payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CctalkReply {
    pub data: Vec<u8>,
}

/// Send a request and await the reply within `deadline`, validating the
/// sum-to-zero checksum.
pub fn exchange(link: &SerialLink, header: u8, data: &[u8], reply_timeout: Instant) -> Result<CctalkReply> {
    let outbound = build(DEVICE_ADDR, HOST_ADDR, header, data);
    link.write(&outbound)?;

    let prefix = link.read_exact(3, reply_timeout)?;
    let len = prefix[1] as usize;
    let rest = link.read_exact(len + 1, reply_timeout)?;

    let mut whole = prefix.clone();
    whole.extend_from_slice(&rest);

    let sum: u8 = whole.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        return Err(Error::checksum("ccTalk reply does not sum to zero mod 256"));
    }

    Ok(CctalkReply {
        data: rest[..len].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_frame_sums_to_zero() {
        let frame = build(DEVICE_ADDR, HOST_ADDR, 254, &[]);
        let sum: u8 = frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn exchange_round_trips_through_mock_port() {
        use crate::transport::test_support::MockPort;
        use std::time::Duration;

        let reply = build(HOST_ADDR, DEVICE_ADDR, 0, &[0x01, 10, 0]);
        let port = MockPort::new(reply);
        let link = SerialLink::from_port(Box::new(port));

        let decoded = exchange(&link, 229, &[], Instant::now() + Duration::from_millis(200)).unwrap();
        assert_eq!(decoded.data, vec![0x01, 10, 0]);
    }
}
