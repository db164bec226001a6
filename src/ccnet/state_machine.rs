//! Poll-reply state machine: 5 transition categories plus the
//! escrow-processed latch (§4.2, §9).

use super::constants::{bill_amount_kopecks, DeviceState, FirmwareVariant};

/// Immutable snapshot passed to every state-machine observer.
#[derive(Clone, Debug, PartialEq)]
pub struct StateContext {
    pub previous: Option<DeviceState>,
    pub current: DeviceState,
    pub bill_code: Option<u8>,
    pub bill_amount: u64,
    pub raw: Vec<u8>,
}

/// Bill-acceptor lifecycle events raised by the state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum BillEvent {
    Escrow { bill_code: Option<u8>, amount: u64 },
    Stacked { bill_code: Option<u8>, amount: u64 },
    Returned,
    Rejected,
    Disabled,
    Failure(DeviceState),
}

/// Tracks the previous poll state and the escrow latch described in §9
/// ("explicit fields ... with a clear reset rule in the IDLING transition").
pub struct StateMachine {
    variant: FirmwareVariant,
    previous: Option<DeviceState>,
    pending_bill_code: Option<u8>,
    escrow_finalised: bool,
}

impl StateMachine {
    pub fn new(variant: FirmwareVariant) -> Self {
        Self {
            variant,
            previous: None,
            pending_bill_code: None,
            escrow_finalised: true,
        }
    }

    /// Clears the previous-state memory and the escrow latch. Called on
    /// every `RESET` so a reset always restarts the machine from scratch,
    /// resolving the two-implementations drift noted in §9.
    pub fn reset(&mut self) {
        self.previous = None;
        self.pending_bill_code = None;
        self.escrow_finalised = true;
    }

    /// Feed one POLL observation; returns the event to emit, if any.
    pub fn observe(&mut self, current: DeviceState, extra_byte: Option<u8>) -> Option<BillEvent> {
        let previous = self.previous;
        let event = match current {
            DeviceState::Escrow if previous != Some(DeviceState::Escrow) => {
                self.pending_bill_code = extra_byte;
                self.escrow_finalised = false;
                let amount = extra_byte
                    .and_then(|c| bill_amount_kopecks(self.variant, c))
                    .unwrap_or(0);
                Some(BillEvent::Escrow {
                    bill_code: extra_byte,
                    amount,
                })
            }
            // v2 rule (§9): emit on entering 0x81 from any non-0x81 state,
            // using the pending escrow code when the stacked frame carries none.
            DeviceState::Stacked if previous != Some(DeviceState::Stacked) => {
                let bill_code = extra_byte.or(self.pending_bill_code);
                let amount = bill_code
                    .and_then(|c| bill_amount_kopecks(self.variant, c))
                    .unwrap_or(0);
                self.escrow_finalised = true;
                Some(BillEvent::Stacked { bill_code, amount })
            }
            DeviceState::Returned if previous != Some(DeviceState::Returned) => {
                self.escrow_finalised = true;
                Some(BillEvent::Returned)
            }
            DeviceState::Rejecting if previous != Some(DeviceState::Rejecting) => {
                self.escrow_finalised = true;
                Some(BillEvent::Rejected)
            }
            DeviceState::UnitDisabled if previous != Some(DeviceState::UnitDisabled) => {
                Some(BillEvent::Disabled)
            }
            other if other.is_failure() && previous != Some(other) => Some(BillEvent::Failure(other)),
            DeviceState::Idling if Self::is_terminal(previous) => {
                self.pending_bill_code = None;
                self.escrow_finalised = true;
                None
            }
            _ => None,
        };

        self.previous = Some(current);
        event
    }

    fn is_terminal(state: Option<DeviceState>) -> bool {
        matches!(
            state,
            Some(DeviceState::Returned) | Some(DeviceState::Stacked) | Some(DeviceState::Rejecting) | None
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_then_stacked_uses_pending_code_when_stacked_frame_is_bare() {
        let mut sm = StateMachine::new(FirmwareVariant::V2);
        let escrow = sm.observe(DeviceState::Escrow, Some(0x02));
        assert_eq!(
            escrow,
            Some(BillEvent::Escrow {
                bill_code: Some(0x02),
                amount: 100_00
            })
        );

        let stacked = sm.observe(DeviceState::Stacked, None);
        assert_eq!(
            stacked,
            Some(BillEvent::Stacked {
                bill_code: Some(0x02),
                amount: 100_00
            })
        );
    }

    #[test]
    fn repeated_stacked_polls_emit_only_once() {
        let mut sm = StateMachine::new(FirmwareVariant::V2);
        sm.observe(DeviceState::Escrow, Some(0x00));
        assert!(sm.observe(DeviceState::Stacked, Some(0x00)).is_some());
        assert!(sm.observe(DeviceState::Stacked, Some(0x00)).is_none());
    }

    #[test]
    fn idling_from_terminal_state_resets_latch() {
        let mut sm = StateMachine::new(FirmwareVariant::V2);
        sm.observe(DeviceState::Escrow, Some(0x00));
        sm.observe(DeviceState::Stacked, Some(0x00));
        sm.observe(DeviceState::Idling, None);
        assert!(sm.escrow_finalised);
        assert!(sm.pending_bill_code.is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let mut sm = StateMachine::new(FirmwareVariant::V2);
        sm.observe(DeviceState::Escrow, Some(0x01));
        sm.reset();
        assert!(sm.previous.is_none());
        assert!(sm.pending_bill_code.is_none());
    }
}
