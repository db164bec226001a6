//! `CoinHopper`: the full SSP/eSSP command repertoire, the key-exchange
//! handshake, send-and-retry, and the polling loop (§4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use log::warn;

use crate::config::SspConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus};
use crate::transport::SerialLink;

use super::constants::{op, ReplyResult};
use super::crypto::{self, KeyExchange};
use super::frame::{self, SEQ_FLAG, STEX};

/// One denomination entry as reported by `GET_ALL_LEVELS` (§3 `HopperLevels`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HopperLevel {
    pub denomination_kopecks: u32,
    pub count: u16,
    pub country: [u8; 3],
}

/// Result of a payout command: amount actually dispensed vs. requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayoutOutcome {
    pub requested_kopecks: u64,
    pub dispensed_kopecks: u64,
}

struct Session {
    key: Option<[u8; 16]>,
    host_ecount: u32,
    seq_flag: u8,
}

/// Single-writer state shared between explicit commands and the poll loop
/// (§4.5 "Single-writer invariant").
pub struct CoinHopper {
    link: SerialLink,
    bus: Arc<EventBus>,
    config: SspConfig,
    session: Mutex<Session>,
    running: Arc<AtomicBool>,
}

impl CoinHopper {
    pub fn new(link: SerialLink, bus: Arc<EventBus>, config: SspConfig) -> Self {
        Self {
            link,
            bus,
            config,
            session: Mutex::new(Session {
                key: None,
                host_ecount: 0,
                seq_flag: SEQ_FLAG,
            }),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `SYNC -> HOST_PROTOCOL_VERSION -> SETUP_REQUEST` in the clear, then
    /// the Diffie-Hellman handshake (§4.5 steps 1-6).
    pub fn connect(&self) -> Result<()> {
        {
            let mut session = self.session.lock().unwrap();
            session.seq_flag = SEQ_FLAG;
        }
        self.send_plain(op::SYNC, &[])?;
        self.send_plain(op::HOST_PROTOCOL_VERSION, &[6])?;
        self.send_plain(op::SETUP_REQUEST, &[])?;
        self.key_exchange()?;
        self.bus.publish(Event::Opened {
            component: crate::hardware::HardwareComponent::CoinHopper,
        });
        Ok(())
    }

    fn key_exchange(&self) -> Result<()> {
        let exchange = KeyExchange::generate();

        self.send_plain(op::SET_GENERATOR, &exchange.generator.to_le_bytes())?;
        self.send_plain(op::SET_MODULUS, &exchange.modulus.to_le_bytes())?;
        let reply = self.send_plain(op::REQUEST_KEY_EXCHANGE, &exchange.host_inter.to_le_bytes())?;

        if reply.len() < 8 {
            return Err(Error::protocol("REQUEST_KEY_EXCHANGE reply too short"));
        }
        let slave_inter = u64::from_le_bytes(reply[0..8].try_into().unwrap());
        let shared = exchange.shared_key(slave_inter);
        let key = crypto::derive_aes_key(&self.config.fixed_key_hex, shared)?;

        let mut session = self.session.lock().unwrap();
        session.key = Some(key);
        session.host_ecount = 0;
        Ok(())
    }

    pub fn enable(self: &Arc<Self>) -> Result<()> {
        self.send_encrypted(op::ENABLE, &[])?;
        self.start_poll_loop();
        Ok(())
    }

    pub fn disable(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.send_encrypted(op::DISABLE, &[])?;
        self.bus.publish(Event::Closed {
            component: crate::hardware::HardwareComponent::CoinHopper,
        });
        Ok(())
    }

    fn start_poll_loop(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let driver = Arc::clone(self);
        thread::spawn(move || driver.poll_loop());
    }

    fn poll_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            match self.send_encrypted(op::POLL, &[]) {
                Ok(events) => self.handle_poll_events(&events),
                Err(e) => warn!("SSP poll error: {e}"),
            }
            let elapsed = started.elapsed();
            if elapsed < self.config.poll_interval {
                thread::sleep(self.config.poll_interval - elapsed);
            }
        }
    }

    fn handle_poll_events(&self, events: &[u8]) {
        // A stream of 1-byte status codes; only the payout-outcome family is
        // surfaced upward per §4.5.
        let mut i = 0;
        while i < events.len() {
            let code = events[i];
            i += 1;
            match code {
                0x01 if i + 12 <= events.len() => {
                    // simplified payout-outcome record: actual, requested, country
                    let actual = u32::from_le_bytes(events[i..i + 4].try_into().unwrap());
                    let requested = u32::from_le_bytes(events[i + 4..i + 8].try_into().unwrap());
                    i += 12;
                    if actual >= requested {
                        self.bus.publish(Event::Dispensed {
                            amount_kopecks: actual as u64,
                        });
                    } else {
                        self.bus.publish(Event::IncompletePayout {
                            requested_kopecks: requested as u64,
                            dispensed_kopecks: actual as u64,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    pub fn payout_amount(&self, amount_kopecks: u32, country: [u8; 3]) -> Result<PayoutOutcome> {
        let mut args = amount_kopecks.to_le_bytes().to_vec();
        args.extend_from_slice(&country);
        args.push(0);

        let rx = self.bus.subscribe();
        self.send_encrypted(op::PAYOUT_AMOUNT, &args)?;
        self.await_payout_outcome(amount_kopecks as u64, rx)
    }

    pub fn payout_by_denomination(&self, items: &[(u16, u32, [u8; 3])]) -> Result<PayoutOutcome> {
        let mut args = vec![items.len() as u8];
        let mut requested = 0u64;
        for (count, denom, country) in items {
            args.extend_from_slice(&count.to_le_bytes());
            args.extend_from_slice(&denom.to_le_bytes());
            args.extend_from_slice(country);
            requested += *count as u64 * *denom as u64;
        }
        args.push(0);

        let rx = self.bus.subscribe();
        self.send_encrypted(op::PAYOUT_BY_DENOMINATION, &args)?;
        self.await_payout_outcome(requested, rx)
    }

    /// The ACK to a payout command only means the hopper accepted the
    /// request; the actual dispensed amount is reported later by the poll
    /// loop as a `Dispensed` or `IncompletePayout` event (§4.5 step 5, §4.6
    /// Testable Property #8). Subscribing before sending avoids missing a
    /// fast poll reply; any unrelated event in between (another device's
    /// credit, say) is ignored.
    fn await_payout_outcome(&self, requested_kopecks: u64, rx: mpsc::Receiver<Event>) -> Result<PayoutOutcome> {
        let deadline = Instant::now() + self.config.payout_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout("no payout outcome reported within payout_timeout"));
            }

            match rx.recv_timeout(remaining)? {
                Event::Dispensed { amount_kopecks } => {
                    return Ok(PayoutOutcome {
                        requested_kopecks,
                        dispensed_kopecks: amount_kopecks,
                    });
                }
                Event::IncompletePayout {
                    requested_kopecks: reported_requested,
                    dispensed_kopecks,
                } => {
                    return Ok(PayoutOutcome {
                        requested_kopecks: reported_requested,
                        dispensed_kopecks,
                    });
                }
                _ => continue,
            }
        }
    }

    pub fn get_all_levels(&self) -> Result<Vec<HopperLevel>> {
        let reply = self.send_encrypted(op::GET_ALL_LEVELS, &[])?;
        if reply.is_empty() {
            return Ok(Vec::new());
        }
        let n = reply[0] as usize;
        let mut levels = Vec::with_capacity(n);
        let mut offset = 1;
        for _ in 0..n {
            if offset + 9 > reply.len() {
                break;
            }
            let count = u16::from_le_bytes([reply[offset], reply[offset + 1]]);
            let denom = u32::from_le_bytes(reply[offset + 2..offset + 6].try_into().unwrap());
            let country = [reply[offset + 6], reply[offset + 7], reply[offset + 8]];
            levels.push(HopperLevel {
                denomination_kopecks: denom,
                count,
                country,
            });
            offset += 9;
        }
        Ok(levels)
    }

    pub fn set_denomination_level(&self, count: u16, denom: u32, country: [u8; 3]) -> Result<()> {
        let mut args = count.to_le_bytes().to_vec();
        args.extend_from_slice(&denom.to_le_bytes());
        args.extend_from_slice(&country);
        self.send_encrypted(op::SET_DENOMINATION_LEVEL, &args)?;
        Ok(())
    }

    pub fn empty_all(&self) -> Result<()> {
        self.send_encrypted(op::EMPTY_ALL, &[])?;
        Ok(())
    }

    /// Send an unencrypted command and wait for its reply, per §4.5's
    /// send-and-retry rule: on sequence mismatch, CRC failure, timeout, or
    /// retry the attempt up to `commandRetries` times.
    fn send_plain(&self, cmd: u8, args: &[u8]) -> Result<Vec<u8>> {
        let mut payload = vec![cmd];
        payload.extend_from_slice(args);
        let reply = self.send_and_retry(&payload)?;
        let result_code = *reply.first().ok_or_else(|| Error::protocol("empty SSP reply"))?;
        check_result(result_code, &reply[1..])
    }

    /// Encrypt `cmd`/`args` into the AES envelope, send, decrypt the reply,
    /// and bump `host_ecount` on success.
    fn send_encrypted(&self, cmd: u8, args: &[u8]) -> Result<Vec<u8>> {
        let (key, ecount) = {
            let session = self.session.lock().unwrap();
            let key = session.key.ok_or_else(|| Error::protocol("SSP key exchange not completed"))?;
            (key, session.host_ecount)
        };

        let envelope = crypto::encrypt_envelope(&key, ecount, cmd, args);
        let mut payload = vec![STEX];
        payload.extend_from_slice(&envelope);

        let reply_payload = self.send_and_retry(&payload)?;
        if reply_payload.first() != Some(&STEX) {
            return Err(Error::protocol("expected encrypted SSP reply"));
        }

        let (new_ecount, result_code, data) =
            crypto::decrypt_envelope(&key, &reply_payload[1..], ecount + 1)?;

        let mut session = self.session.lock().unwrap();
        session.host_ecount = new_ecount;

        check_result(result_code, &data)
    }

    /// Holds `session`'s lock across the full write-then-read exchange so no
    /// other caller (an explicit command or the poll loop's `POLL`) can get
    /// its own frame interleaved on the wire (§4.5 "Single-writer invariant").
    fn send_and_retry(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut last_err = Error::timeout("no SSP reply");

        for _ in 0..self.config.command_retries {
            let mut session = self.session.lock().unwrap();

            let encoded = frame::encode(session.seq_flag, payload);
            if let Err(e) = self.link.write(&encoded) {
                last_err = e;
                continue;
            }

            let deadline = Instant::now() + self.config.command_timeout;
            match frame::receive(&self.link, deadline) {
                Ok(packet) => {
                    session.seq_flag ^= SEQ_FLAG;
                    return Ok(packet.payload);
                }
                Err(e) => {
                    last_err = e;
                    continue;
                }
            }
        }

        Err(last_err)
    }
}

/// The first payload byte of a plain (non-enveloped) reply is a
/// [`ReplyResult`]; for an encrypted reply the enveloped `cmd` byte plays
/// the same role. Only a well-formed device failure propagates as
/// `DeviceFault`; unknown codes are treated as a protocol violation.
fn check_result(result_code: u8, data: &[u8]) -> Result<Vec<u8>> {
    match ReplyResult::from_code(result_code) {
        Some(ReplyResult::Ok) => Ok(data.to_vec()),
        Some(other) => Err(Error::device_fault(format!("SSP command failed: {other:?}"))),
        None => Err(Error::protocol(format!("unrecognized SSP result code {result_code:#04x}"))),
    }
}

impl Drop for CoinHopper {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::MockPort;
    use std::time::Duration;

    fn hopper(payout_timeout: Duration) -> CoinHopper {
        let link = SerialLink::from_port(Box::new(MockPort::new(vec![])));
        let mut config = SspConfig::default();
        config.payout_timeout = payout_timeout;
        CoinHopper::new(link, Arc::new(EventBus::new()), config)
    }

    #[test]
    fn await_payout_outcome_reports_full_dispense() {
        let hopper = hopper(Duration::from_millis(200));
        let rx = hopper.bus.subscribe();
        hopper.bus.publish(Event::Dispensed { amount_kopecks: 500 });

        let outcome = hopper.await_payout_outcome(500, rx).unwrap();
        assert_eq!(
            outcome,
            PayoutOutcome { requested_kopecks: 500, dispensed_kopecks: 500 }
        );
    }

    #[test]
    fn await_payout_outcome_reports_partial_dispense() {
        let hopper = hopper(Duration::from_millis(200));
        let rx = hopper.bus.subscribe();
        hopper.bus.publish(Event::IncompletePayout {
            requested_kopecks: 500,
            dispensed_kopecks: 300,
        });

        let outcome = hopper.await_payout_outcome(500, rx).unwrap();
        assert_eq!(
            outcome,
            PayoutOutcome { requested_kopecks: 500, dispensed_kopecks: 300 }
        );
    }

    #[test]
    fn await_payout_outcome_ignores_unrelated_events_first() {
        let hopper = hopper(Duration::from_millis(200));
        let rx = hopper.bus.subscribe();
        hopper.bus.publish(Event::CoinCredit { amount_kopecks: 1_00 });
        hopper.bus.publish(Event::Dispensed { amount_kopecks: 500 });

        let outcome = hopper.await_payout_outcome(500, rx).unwrap();
        assert_eq!(outcome.dispensed_kopecks, 500);
    }

    #[test]
    fn await_payout_outcome_times_out_when_nothing_is_reported() {
        let hopper = hopper(Duration::from_millis(20));
        let rx = hopper.bus.subscribe();

        let err = hopper.await_payout_outcome(500, rx).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Timeout);
    }

    #[test]
    fn check_result_ok_returns_data() {
        assert_eq!(check_result(0xF0, &[1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn check_result_failure_is_device_fault() {
        let err = check_result(0xF8, &[]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DeviceFault);
    }

    #[test]
    fn check_result_unknown_code_is_protocol_error() {
        let err = check_result(0x01, &[]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Protocol);
    }
}
