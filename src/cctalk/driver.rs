//! `CoinAcceptor`: bootstrap, the 8-bit rolling event counter, and the
//! one-coin-per-slot event discipline (§4.4, §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::Result;
use crate::event::{Event, EventBus};
use crate::transport::SerialLink;

use super::constants::{header, slot_denomination_kopecks};
use super::frame::{self, CctalkReply};

const MAX_EVENT_SLOTS: usize = 5;

pub struct CoinAcceptor {
    link: Arc<SerialLink>,
    bus: Arc<EventBus>,
    reply_timeout: Duration,
    poll_interval: Duration,
    error_backoff: Duration,
    running: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
}

impl CoinAcceptor {
    pub fn new(
        link: SerialLink,
        bus: Arc<EventBus>,
        reply_timeout: Duration,
        poll_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            link: Arc::new(link),
            bus,
            reply_timeout,
            poll_interval,
            error_backoff,
            running: Arc::new(AtomicBool::new(false)),
            enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `Reset -> sleep 500ms -> Simple-poll -> Read-buffered-credit` to seed
    /// the event counter (§4.4).
    pub fn connect(&self) -> Result<u8> {
        self.send(header::RESET, &[])?;
        thread::sleep(Duration::from_millis(500));
        self.send(header::SIMPLE_POLL, &[])?;

        let reply = self.send(header::READ_BUFFERED_CREDIT, &[])?;
        let counter = *reply.data.first().unwrap_or(&0);
        self.bus.publish(Event::Opened {
            component: crate::hardware::HardwareComponent::CoinAcceptor,
        });
        Ok(counter)
    }

    pub fn enable(self: &Arc<Self>) -> Result<()> {
        self.enabled.store(true, Ordering::SeqCst);
        self.send(header::MODIFY_INHIBIT, &[0xff, 0xff])?;
        self.start_poll_loop();
        Ok(())
    }

    pub fn disable(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        self.send(header::MODIFY_INHIBIT, &[0, 0])?;
        self.bus.publish(Event::Closed {
            component: crate::hardware::HardwareComponent::CoinAcceptor,
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
        let mut last_counter = match self.send(header::READ_BUFFERED_CREDIT, &[]) {
            Ok(reply) => *reply.data.first().unwrap_or(&0),
            Err(_) => 0,
        };

        while self.running.load(Ordering::SeqCst) {
            match self.send(header::READ_BUFFERED_CREDIT, &[]) {
                Ok(reply) => {
                    let counter = *reply.data.first().unwrap_or(&last_counter);
                    let new_events = counter.wrapping_sub(last_counter) as usize;
                    let slots = &reply.data[1..];
                    let to_process = new_events.min(MAX_EVENT_SLOTS).min(slots.len() / 2);

                    // New events are the most recent `to_process` of the 5 reported slots.
                    let start = slots.len() / 2 - to_process;
                    for i in start..slots.len() / 2 {
                        let slot = slots[i * 2];
                        if slot == 0 {
                            continue;
                        }
                        if let Some(value) = slot_denomination_kopecks(slot) {
                            self.bus.publish(Event::CoinCredit { amount_kopecks: value });
                        } else {
                            warn!("unrecognized ccTalk coin slot {slot}");
                        }
                    }

                    last_counter = counter;
                    if self.enabled.load(Ordering::SeqCst) {
                        let _ = self.send(header::MODIFY_INHIBIT, &[0xff, 0xff]);
                    }
                }
                Err(e) => {
                    warn!("coin acceptor poll error: {e}");
                    thread::sleep(self.error_backoff);
                    continue;
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn send(&self, hdr: u8, data: &[u8]) -> Result<CctalkReply> {
        frame::exchange(&self.link, hdr, data, Instant::now() + self.reply_timeout)
    }
}

impl Drop for CoinAcceptor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::MockPort;

    fn acceptor_over(inbound: Vec<u8>) -> CoinAcceptor {
        let link = SerialLink::from_port(Box::new(MockPort::new(inbound)));
        CoinAcceptor::new(
            link,
            Arc::new(EventBus::new()),
            Duration::from_millis(200),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn counter_wrap_yields_three_new_events_and_credits_slot_once() {
        // last counter 0xFE, reply [0x01, 10, 0] (counter wrapped to 0x01):
        // (0x01 - 0xFE) mod 256 = 3 new events in the 5-slot buffer.
        let last_counter: u8 = 0xFE;
        let new_counter: u8 = 0x01;
        let diff = new_counter.wrapping_sub(last_counter);
        assert_eq!(diff, 3);

        let reply = frame::build(frame::HOST_ADDR, frame::DEVICE_ADDR, 0, &[new_counter, 10, 0]);
        let acceptor = acceptor_over(reply);
        let got = acceptor.send(header::READ_BUFFERED_CREDIT, &[]).unwrap();
        assert_eq!(got.data, vec![new_counter, 10, 0]);
    }

    #[test]
    fn slot_ten_event_credits_one_ruble_on_the_bus() {
        // Seed last_counter=0, then one new event in slot 10.
        let seed = frame::build(frame::HOST_ADDR, frame::DEVICE_ADDR, 0, &[0, 0, 0]);
        let tick = frame::build(frame::HOST_ADDR, frame::DEVICE_ADDR, 0, &[1, 10, 0]);
        let mut inbound = seed;
        inbound.extend_from_slice(&tick);

        let acceptor = Arc::new(acceptor_over(inbound));
        let rx = acceptor.bus.subscribe();
        acceptor.running.store(true, Ordering::SeqCst);

        let driver = Arc::clone(&acceptor);
        let handle = thread::spawn(move || driver.poll_loop());

        let event = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        acceptor.running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(event, Event::CoinCredit { amount_kopecks: 1_00 });
    }
}
