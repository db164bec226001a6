//! `BillAcceptor`: connect/enable sequences, the adaptive poll loop, and
//! auto-stack/auto-re-enable policy (§4.2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventBus};
use crate::transport::SerialLink;

use super::constants::{cmd, DeviceState, FirmwareVariant};
use super::frame::{self, CcnetFrame};
use super::state_machine::{BillEvent, StateMachine};

const CONNECT_POLL_ATTEMPTS: u32 = 50;
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Driver for a CCNET bill validator. Owns the link exclusively for its
/// lifetime; the poll loop runs on a dedicated thread started by `enable`.
pub struct BillAcceptor {
    link: Arc<SerialLink>,
    bus: Arc<EventBus>,
    variant: FirmwareVariant,
    command_timeout: Duration,
    poll_interval: Duration,
    stacked_poll_interval: Duration,
    error_backoff: Duration,
    auto_stack: bool,
    running: Arc<AtomicBool>,
    state_machine: Mutex<StateMachine>,
}

impl BillAcceptor {
    pub fn new(
        link: SerialLink,
        bus: Arc<EventBus>,
        variant: FirmwareVariant,
        command_timeout: Duration,
        poll_interval: Duration,
        stacked_poll_interval: Duration,
        error_backoff: Duration,
        auto_stack: bool,
    ) -> Self {
        Self {
            link: Arc::new(link),
            bus,
            variant,
            command_timeout,
            poll_interval,
            stacked_poll_interval,
            error_backoff,
            auto_stack,
            running: Arc::new(AtomicBool::new(false)),
            state_machine: Mutex::new(StateMachine::new(variant)),
        }
    }

    /// Issues RESET, drains whatever is left in the inbound buffer, and
    /// clears the poll state machine's latch and pending-bill-code memory,
    /// so a reconnect never replays a stale stacked-event (§9).
    pub fn reset(&self) -> Result<bool> {
        let sent = self.send_command(cmd::RESET, &[])?;
        self.link.clear_input()?;
        self.state_machine.lock().unwrap().reset();
        Ok(sent)
    }

    /// `open port -> POLL once -> RESET -> POLL up to 50 times waiting for
    /// IDLING or UNIT_DISABLED; proceed even if not reached` (§4.2).
    pub fn connect(&self) -> Result<()> {
        let _ = self.poll_once();
        self.reset()?;

        for _ in 0..CONNECT_POLL_ATTEMPTS {
            if let Ok(Some(state)) = self.poll_once() {
                if matches!(state, DeviceState::Idling | DeviceState::UnitDisabled) {
                    self.bus.publish(Event::Opened {
                        component: crate::hardware::HardwareComponent::BillAcceptor,
                    });
                    return Ok(());
                }
            }
            thread::sleep(CONNECT_POLL_INTERVAL);
        }

        warn!("bill acceptor did not reach IDLING/UNIT_DISABLED during connect, proceeding anyway");
        self.bus.publish(Event::Opened {
            component: crate::hardware::HardwareComponent::BillAcceptor,
        });
        Ok(())
    }

    /// `SET_SECURITY(0xFFFFFF) -> ENABLE_BILL_TYPES(0xFFFFFF, 0xFFFFFF) -> start poll loop`.
    pub fn enable(self: &Arc<Self>) -> Result<()> {
        self.send_command(cmd::SET_SECURITY, &[0xff, 0xff, 0xff])?;
        self.send_command(cmd::ENABLE_BILL_TYPES, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff])?;
        self.start_poll_loop();
        Ok(())
    }

    pub fn disable(&self) -> Result<()> {
        self.stop_poll_loop();
        self.send_command(cmd::ENABLE_BILL_TYPES, &[0, 0, 0, 0, 0, 0])?;
        self.bus.publish(Event::Closed {
            component: crate::hardware::HardwareComponent::BillAcceptor,
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

    fn stop_poll_loop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn poll_loop(self: Arc<Self>) {
        let mut interval = self.poll_interval;

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            match self.poll_raw() {
                Ok(frame) => {
                    let state = DeviceState::from_code(frame.cmd);
                    if let Some(state) = state {
                        let extra = frame.data.first().copied();
                        let event = self.state_machine.lock().unwrap().observe(state, extra);
                        if let Some(event) = event {
                            self.handle_bill_event(&event);
                        }
                        interval = if state == DeviceState::Stacked {
                            self.stacked_poll_interval
                        } else {
                            self.poll_interval
                        };
                        if self.auto_stack && state == DeviceState::Escrow {
                            let _ = self.send_command(cmd::STACK, &[]);
                        }
                        if state == DeviceState::UnitDisabled {
                            warn!("bill acceptor unexpectedly disabled, re-enabling");
                            let _ = self.send_command(cmd::SET_SECURITY, &[0xff, 0xff, 0xff]);
                            let _ = self.send_command(
                                cmd::ENABLE_BILL_TYPES,
                                &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!("bill acceptor poll error: {e}");
                    thread::sleep(self.error_backoff);
                    continue;
                }
            }

            let elapsed = started.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }

    fn handle_bill_event(&self, event: &BillEvent) {
        match event {
            BillEvent::Stacked { amount, .. } => {
                info!("bill stacked, amount={amount}");
                self.bus.publish(Event::BillAccepted {
                    amount_kopecks: *amount,
                });
            }
            BillEvent::Escrow { .. } | BillEvent::Returned | BillEvent::Rejected | BillEvent::Disabled => {}
            BillEvent::Failure(state) => {
                warn!("bill acceptor failure state: {state:?}");
            }
        }
    }

    fn poll_once(&self) -> Result<Option<DeviceState>> {
        let frame = self.poll_raw()?;
        Ok(DeviceState::from_code(frame.cmd))
    }

    fn poll_raw(&self) -> Result<CcnetFrame> {
        self.send_and_receive(cmd::POLL, &[])
    }

    /// Send a command and await exactly one reply within the command
    /// timeout; returns the decoded frame.
    fn send_and_receive(&self, command: u8, data: &[u8]) -> Result<CcnetFrame> {
        let outbound = CcnetFrame::new(command, data.to_vec()).encode();
        self.link.write(&outbound)?;
        frame::receive(&self.link, Instant::now() + self.command_timeout)
    }

    /// One-shot command that tolerates no-reply as a soft failure (§4.2:
    /// "no-reply is not an error immediately but makes the command return
    /// false").
    fn send_command(&self, command: u8, data: &[u8]) -> Result<bool> {
        match self.send_and_receive(command, data) {
            Ok(_) => Ok(true),
            Err(e) if !e.is_transport() => Err(e),
            Err(_) => Ok(false),
        }
    }
}

impl Drop for BillAcceptor {
    fn drop(&mut self) {
        self.stop_poll_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::MockPort;

    fn acceptor_over(inbound: Vec<u8>) -> BillAcceptor {
        let link = SerialLink::from_port(Box::new(MockPort::new(inbound)));
        BillAcceptor::new(
            link,
            Arc::new(EventBus::new()),
            FirmwareVariant::V2,
            Duration::from_millis(200),
            Duration::from_millis(50),
            Duration::from_millis(5),
            Duration::from_millis(50),
            true,
        )
    }

    #[test]
    fn poll_once_decodes_idling() {
        let reply = CcnetFrame::new(0x14, vec![]).encode();
        let acceptor = acceptor_over(reply);
        assert_eq!(acceptor.poll_once().unwrap(), Some(DeviceState::Idling));
    }

    #[test]
    fn soft_command_failure_returns_false_not_error() {
        let acceptor = acceptor_over(vec![]);
        assert_eq!(acceptor.send_command(cmd::RESET, &[]).unwrap(), false);
    }
}
