//! CCNET bill-validator driver: framing, device-state table, and the
//! `BillAcceptor` itself (§4.2).

pub mod constants;
pub mod driver;
pub mod frame;
pub mod state_machine;

pub use constants::{DeviceState, FirmwareVariant};
pub use driver::BillAcceptor;
pub use frame::CcnetFrame;
pub use state_machine::{BillEvent, StateContext};
