//! In-memory pub/sub used to decouple device drivers from the coordinator.
//!
//! Each event kind is a single-producer, multi-consumer channel: every
//! `subscribe` call hands back a fresh receiver fed by a clone of the
//! sender the driver holds. Replaces the source's dynamic message dicts with
//! a tagged union matched exhaustively by consumers.

use std::sync::mpsc;

use crate::hardware::HardwareComponent;

/// Events published by device drivers onto the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A bill was moved into the stacker and counted as accepted.
    BillAccepted { amount_kopecks: u64 },
    /// A coin was credited by the acceptor.
    CoinCredit { amount_kopecks: u64 },
    /// A dispense (bills or coins) completed, in full or in part.
    Dispensed { amount_kopecks: u64 },
    /// A dispense could not deliver the full requested amount.
    IncompletePayout {
        requested_kopecks: u64,
        dispensed_kopecks: u64,
    },
    /// A driver finished connecting to its device.
    Opened { component: HardwareComponent },
    /// A driver's poll loop stopped and its link was released.
    Closed { component: HardwareComponent },
}

/// Single-producer-per-type, multi-consumer event queue.
///
/// `publish` is non-blocking from the driver's perspective: a disconnected
/// subscriber is simply dropped from the list rather than blocking the
/// publisher or propagating an error.
pub struct EventBus {
    subscribers: std::sync::Mutex<Vec<mpsc::Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber, returning the receiving end of its channel.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Publish an event to every live subscriber, preserving emission order
    /// per-publisher. Dead subscribers are pruned on the next publish.
    pub fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn published_events_reach_subscribers_in_order() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.publish(Event::BillAccepted { amount_kopecks: 10_000 });
        bus.publish(Event::BillAccepted { amount_kopecks: 5_000 });

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            Event::BillAccepted { amount_kopecks: 10_000 }
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            Event::BillAccepted { amount_kopecks: 5_000 }
        );
    }

    #[test]
    fn dropped_subscriber_does_not_break_publish() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        }
        bus.publish(Event::Opened {
            component: HardwareComponent::BillAcceptor,
        });
    }
}
