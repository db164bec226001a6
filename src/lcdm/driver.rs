//! `BillDispenser`: sensor-based readiness probe and dual-cassette dispense
//! accounting (§4.3).

use std::time::{Duration, Instant};

use log::warn;

use crate::error::{Error, Result};
use crate::transport::SerialLink;

use super::constants::{cmd, fatal_error_reason, is_non_fatal, SensorVector};
use super::frame;

/// Outcome of a dispense request: bills the driver actually ejected, per
/// cassette, plus whatever it rejected/miscounted on the way out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispenseOutcome {
    pub upper_exit: u32,
    pub lower_exit: u32,
    pub upper_rejected: u32,
    pub lower_rejected: u32,
    pub upper_checked: u32,
    pub lower_checked: u32,
}

pub struct BillDispenser {
    link: SerialLink,
    exchange_timeout: Duration,
}

impl BillDispenser {
    pub fn new(link: SerialLink, exchange_timeout: Duration) -> Self {
        Self {
            link,
            exchange_timeout,
        }
    }

    /// Query STATUS, parse the sensor vector, and act on `test_status()`'s
    /// jam-candidate rule: purge once, re-poll, and only then fail.
    pub fn test_status(&self) -> Result<SensorVector> {
        let sensors = self.status_once()?;
        if sensors.immediately_fatal() {
            return Err(Error::device_fault("cashbox removed or solenoid fault"));
        }
        if !sensors.jam_candidate() {
            return Ok(sensors);
        }

        warn!("LCDM jam candidate detected, purging once");
        let purged = self.status_once()?;
        if purged.jam_candidate() {
            return Err(Error::device_fault("bill jam after purge"));
        }
        Ok(purged)
    }

    fn status_once(&self) -> Result<SensorVector> {
        let deadline = Instant::now() + self.exchange_timeout;
        let resp = frame::exchange(&self.link, cmd::STATUS, &[], 10, deadline)?;
        if resp.data.len() < 3 {
            return Err(Error::framing("STATUS reply too short"));
        }
        let (d1, d2, err) = (resp.data[0], resp.data[1], resp.data[2]);
        if !is_non_fatal(err) {
            return Err(Error::device_fault(fatal_error_reason(err)));
        }
        Ok(SensorVector::from_bytes(d1, d2))
    }

    /// Dispense from a single cassette, `count` in `1..=60`.
    pub fn dispense_single(&self, count: u32) -> Result<u32> {
        let digits = decimal2(count)?;
        let deadline = Instant::now() + self.exchange_timeout;
        let resp = frame::exchange(&self.link, cmd::DISPENSE_SINGLE, &digits, 12, deadline)?;
        let err = *resp.data.last().ok_or_else(|| Error::framing("dispense reply too short"))?;
        if !is_non_fatal(err) {
            return Err(Error::device_fault(fatal_error_reason(err)));
        }
        let exit = parse_two_digit(&resp.data, 0)?;
        Ok(exit)
    }

    /// Dispense from both cassettes, each `0..=60`. Returns the
    /// `(upper_exit, lower_exit)` pair; the coordinator converts to a
    /// monetary amount via the stored denominations.
    pub fn dispense_dual(&self, upper_count: u32, lower_count: u32) -> Result<DispenseOutcome> {
        let mut digits = decimal2(upper_count)?;
        digits.extend_from_slice(&decimal2(lower_count)?);

        let deadline = Instant::now() + self.exchange_timeout;
        let resp = frame::exchange(&self.link, cmd::DISPENSE_DUAL, &digits, 18, deadline)?;

        if resp.data.len() < 13 {
            return Err(Error::framing("dual-dispense reply too short"));
        }
        let err = resp.data[12];
        if !is_non_fatal(err) {
            return Err(Error::device_fault(fatal_error_reason(err)));
        }

        Ok(DispenseOutcome {
            upper_exit: parse_two_digit(&resp.data, 0)?,
            upper_rejected: parse_two_digit(&resp.data, 2)?,
            upper_checked: parse_two_digit(&resp.data, 4)?,
            lower_exit: parse_two_digit(&resp.data, 6)?,
            lower_rejected: parse_two_digit(&resp.data, 8)?,
            lower_checked: parse_two_digit(&resp.data, 10)?,
        })
    }
}

/// Encode `0..=60` as two decimal-ASCII digit bytes.
fn decimal2(count: u32) -> Result<Vec<u8>> {
    if count > 60 {
        return Err(Error::precondition("dispense count must be in 0..=60"));
    }
    let s = format!("{count:02}");
    Ok(s.into_bytes())
}

fn parse_two_digit(data: &[u8], offset: usize) -> Result<u32> {
    let slice = data
        .get(offset..offset + 2)
        .ok_or_else(|| Error::framing("dispense field out of range"))?;
    let s = std::str::from_utf8(slice).map_err(|_| Error::framing("non-ASCII dispense field"))?;
    s.parse::<u32>().map_err(|_| Error::framing("non-decimal dispense field"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal2_rejects_counts_over_sixty() {
        assert!(decimal2(61).is_err());
        assert_eq!(decimal2(7).unwrap(), b"07".to_vec());
    }

    #[test]
    fn parse_two_digit_reads_ascii_fields() {
        assert_eq!(parse_two_digit(b"0205", 0).unwrap(), 2);
        assert_eq!(parse_two_digit(b"0205", 2).unwrap(), 5);
    }

    #[test]
    fn sensor_vector_status_round_trip_literal_fixture() {
        use crate::transport::test_support::MockPort;
        use crate::lcdm::frame::xor_checksum;

        // `01 50 02 46 d1 d2 err f6 f7 03 xor` with err=0x30, d1=0x17, d2=0x80
        let mut body = vec![0x01, 0x50, 0x02, 0x46, 0x17, 0x80, 0x30, 0xf6, 0xf7, 0x03];
        let xor = xor_checksum(&body[1..]);
        body.push(xor);

        let mut inbound = vec![0x06];
        inbound.extend_from_slice(&body);

        let link = SerialLink::from_port(Box::new(MockPort::new(inbound)));
        let dispenser = BillDispenser::new(link, Duration::from_millis(200));
        let sensors = dispenser.status_once().unwrap();
        assert!(sensors.exit_sensor);
    }
}
