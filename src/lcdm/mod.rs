//! LCDM-2000 dual-cassette bill-dispenser driver: XOR-checksummed framing,
//! sensor probe, and decimal-ASCII dispense accounting (§4.3).

pub mod constants;
pub mod driver;
pub mod frame;

pub use constants::SensorVector;
pub use driver::{BillDispenser, DispenseOutcome};
